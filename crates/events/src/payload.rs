//! The closed set of event types the projector understands.
//!
//! Every event type has a data struct of the same name; [`EventPayload`] is
//! the sum of them. Decoding is an exhaustive match on [`EventType`], so a new
//! event type cannot be added without a decoder arm.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use circlegraph_core::{AccountabilityId, DomainId, MemberId, RoleId, RoleType, TensionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    /// The event type is outside the closed set.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The event type is known but its data does not match the schema.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload {
        event_type: &'static str,
        reason: String,
    },
}

macro_rules! event_payloads {
    ($($name:ident),* $(,)?) => {
        /// Event type discriminant, as stored in the event log.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum EventType {
            $($name),*
        }

        impl EventType {
            pub const ALL: &'static [EventType] = &[$(EventType::$name),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventType::$name => stringify!($name)),*
                }
            }
        }

        impl FromStr for EventType {
            type Err = EventDecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($name) => Ok(EventType::$name),)*
                    other => Err(EventDecodeError::UnknownEventType(other.to_string())),
                }
            }
        }

        /// Typed event data.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(tag = "type", content = "data")]
        pub enum EventPayload {
            $($name($name)),*
        }

        impl EventPayload {
            pub fn event_type(&self) -> EventType {
                match self {
                    $(EventPayload::$name(_) => EventType::$name),*
                }
            }

            /// Decode the data of an event of type `event_type`.
            pub fn decode(
                event_type: EventType,
                data: &serde_json::Value,
            ) -> Result<Self, EventDecodeError> {
                match event_type {
                    $(EventType::$name => serde_json::from_value::<$name>(data.clone())
                        .map(EventPayload::$name)
                        .map_err(|e| EventDecodeError::InvalidPayload {
                            event_type: stringify!($name),
                            reason: e.to_string(),
                        }),)*
                }
            }

            /// The data part alone, as stored in the event log.
            pub fn to_data(&self) -> Result<serde_json::Value, serde_json::Error> {
                match self {
                    $(EventPayload::$name(data) => serde_json::to_value(data)),*
                }
            }
        }

        $(
            impl From<$name> for EventPayload {
                fn from(value: $name) -> Self {
                    EventPayload::$name(value)
                }
            }
        )*
    };
}

event_payloads!(
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    RoleDomainCreated,
    RoleDomainUpdated,
    RoleDomainDeleted,
    RoleAccountabilityCreated,
    RoleAccountabilityUpdated,
    RoleAccountabilityDeleted,
    RoleAdditionalContentSet,
    RoleChangedParent,
    RoleMemberAdded,
    RoleMemberUpdated,
    RoleMemberRemoved,
    CircleDirectMemberAdded,
    CircleDirectMemberRemoved,
    CircleLeadLinkMemberSet,
    CircleLeadLinkMemberUnset,
    CircleCoreRoleMemberSet,
    CircleCoreRoleMemberUnset,
    TensionCreated,
    TensionUpdated,
    TensionRoleChanged,
    TensionClosed,
    MemberCreated,
    MemberUpdated,
    MemberPasswordSet,
    MemberMatchUidSet,
    MemberAvatarSet,
);

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCreated {
    pub role_id: RoleId,
    pub role_type: RoleType,
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    /// Absent only for the root circle.
    #[serde(default)]
    pub parent_role_id: Option<RoleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdated {
    pub role_id: RoleId,
    pub role_type: RoleType,
    pub name: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDeleted {
    pub role_id: RoleId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDomainCreated {
    pub role_id: RoleId,
    pub domain_id: DomainId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDomainUpdated {
    pub role_id: RoleId,
    pub domain_id: DomainId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDomainDeleted {
    pub role_id: RoleId,
    pub domain_id: DomainId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAccountabilityCreated {
    pub role_id: RoleId,
    pub accountability_id: AccountabilityId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAccountabilityUpdated {
    pub role_id: RoleId,
    pub accountability_id: AccountabilityId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAccountabilityDeleted {
    pub role_id: RoleId,
    pub accountability_id: AccountabilityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAdditionalContentSet {
    pub role_id: RoleId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChangedParent {
    pub role_id: RoleId,
    #[serde(default)]
    pub parent_role_id: Option<RoleId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Role membership
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMemberAdded {
    pub role_id: RoleId,
    pub member_id: MemberId,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub no_core_member: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMemberUpdated {
    pub role_id: RoleId,
    pub member_id: MemberId,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub no_core_member: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMemberRemoved {
    pub role_id: RoleId,
    pub member_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleDirectMemberAdded {
    pub role_id: RoleId,
    pub member_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleDirectMemberRemoved {
    pub role_id: RoleId,
    pub member_id: MemberId,
}

/// `role_id` is the circle; the member fills its lead link core role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleLeadLinkMemberSet {
    pub role_id: RoleId,
    pub lead_link_role_id: RoleId,
    pub member_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleLeadLinkMemberUnset {
    pub role_id: RoleId,
    pub lead_link_role_id: RoleId,
    pub member_id: MemberId,
}

/// `role_id` is the circle; the member fills one of its elected core roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleCoreRoleMemberSet {
    pub role_id: RoleId,
    pub core_role_id: RoleId,
    pub role_type: RoleType,
    pub member_id: MemberId,
    #[serde(default)]
    pub election_expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleCoreRoleMemberUnset {
    pub role_id: RoleId,
    pub core_role_id: RoleId,
    pub role_type: RoleType,
    pub member_id: MemberId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tensions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensionCreated {
    pub tension_id: TensionId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub member_id: MemberId,
    #[serde(default)]
    pub role_id: Option<RoleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensionUpdated {
    pub tension_id: TensionId,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensionRoleChanged {
    pub tension_id: TensionId,
    #[serde(default)]
    pub prev_role_id: Option<RoleId>,
    #[serde(default)]
    pub role_id: Option<RoleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensionClosed {
    pub tension_id: TensionId,
    #[serde(default)]
    pub reason: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Members
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCreated {
    pub member_id: MemberId,
    #[serde(default)]
    pub is_admin: bool,
    /// External identity key, when the member comes from an identity provider.
    #[serde(default)]
    pub match_uid: Option<String>,
    pub user_name: String,
    #[serde(default)]
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberUpdated {
    pub member_id: MemberId,
    #[serde(default)]
    pub is_admin: bool,
    pub user_name: String,
    #[serde(default)]
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPasswordSet {
    pub member_id: MemberId,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberMatchUidSet {
    pub member_id: MemberId,
    pub match_uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAvatarSet {
    pub member_id: MemberId,
    pub image: Vec<u8>,
}
