//! Vertex classes of the organizational graph.
//!
//! The set of classes is closed: every versioned row in the graph store is
//! one of the variants of [`Vertex`]. Each class also publishes the list of
//! attribute fields a caller may filter or order on.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::id::{AccountabilityId, DomainId, MemberId, RoleId, TensionId};

/// Kind of a role. Circles are roles that can contain other roles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Circle,
    Normal,
    LeadLink,
    RepLink,
    Facilitator,
    Secretary,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Circle => "circle",
            RoleType::Normal => "normal",
            RoleType::LeadLink => "leadlink",
            RoleType::RepLink => "replink",
            RoleType::Facilitator => "facilitator",
            RoleType::Secretary => "secretary",
        }
    }

    /// Core roles are the fixed governance roles every circle carries.
    pub fn is_core_role(&self) -> bool {
        matches!(
            self,
            RoleType::LeadLink | RoleType::RepLink | RoleType::Facilitator | RoleType::Secretary
        )
    }
}

impl core::fmt::Display for RoleType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "circle" => Ok(RoleType::Circle),
            "normal" => Ok(RoleType::Normal),
            "leadlink" => Ok(RoleType::LeadLink),
            "replink" => Ok(RoleType::RepLink),
            "facilitator" => Ok(RoleType::Facilitator),
            "secretary" => Ok(RoleType::Secretary),
            other => Err(DomainError::validation(format!("unknown role type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub role_type: RoleType,
    /// Distance from the root circle. Denormalized; kept current by the projector.
    pub depth: i32,
    pub name: String,
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accountability {
    pub id: AccountabilityId,
    pub description: String,
}

/// Free-form content attached to a role; shares the role's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAdditionalContent {
    pub id: RoleId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub is_admin: bool,
    pub user_name: String,
    pub full_name: String,
    pub email: String,
}

/// Avatar image of a member; shares the member's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAvatar {
    pub id: MemberId,
    pub image: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tension {
    pub id: TensionId,
    pub title: String,
    pub description: String,
    pub closed: bool,
    pub close_reason: String,
}

/// Discriminant of [`Vertex`]; one table per class in persistent backends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VertexClass {
    Role,
    Domain,
    Accountability,
    RoleAdditionalContent,
    Member,
    MemberAvatar,
    Tension,
}

/// Value kind of a filterable attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Uuid,
    Text,
    Int,
    Bool,
}

impl VertexClass {
    pub const ALL: [VertexClass; 7] = [
        VertexClass::Role,
        VertexClass::Domain,
        VertexClass::Accountability,
        VertexClass::RoleAdditionalContent,
        VertexClass::Member,
        VertexClass::MemberAvatar,
        VertexClass::Tension,
    ];

    /// Persistent table name.
    pub fn table(&self) -> &'static str {
        match self {
            VertexClass::Role => "role",
            VertexClass::Domain => "domain",
            VertexClass::Accountability => "accountability",
            VertexClass::RoleAdditionalContent => "roleadditionalcontent",
            VertexClass::Member => "member",
            VertexClass::MemberAvatar => "memberavatar",
            VertexClass::Tension => "tension",
        }
    }

    /// Attributes that may appear in filters and orderings.
    pub fn fields(&self) -> &'static [(&'static str, FieldKind)] {
        match self {
            VertexClass::Role => &[
                ("id", FieldKind::Uuid),
                ("roletype", FieldKind::Text),
                ("depth", FieldKind::Int),
                ("name", FieldKind::Text),
                ("purpose", FieldKind::Text),
            ],
            VertexClass::Domain | VertexClass::Accountability => {
                &[("id", FieldKind::Uuid), ("description", FieldKind::Text)]
            }
            VertexClass::RoleAdditionalContent => {
                &[("id", FieldKind::Uuid), ("content", FieldKind::Text)]
            }
            VertexClass::Member => &[
                ("id", FieldKind::Uuid),
                ("isadmin", FieldKind::Bool),
                ("username", FieldKind::Text),
                ("fullname", FieldKind::Text),
                ("email", FieldKind::Text),
            ],
            VertexClass::MemberAvatar => &[("id", FieldKind::Uuid)],
            VertexClass::Tension => &[
                ("id", FieldKind::Uuid),
                ("title", FieldKind::Text),
                ("description", FieldKind::Text),
                ("closed", FieldKind::Bool),
                ("closereason", FieldKind::Text),
            ],
        }
    }

    pub fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.fields()
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, kind)| *kind)
    }
}

impl core::fmt::Display for VertexClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.table())
    }
}

/// A vertex of any class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vertex {
    Role(Role),
    Domain(Domain),
    Accountability(Accountability),
    RoleAdditionalContent(RoleAdditionalContent),
    Member(Member),
    MemberAvatar(MemberAvatar),
    Tension(Tension),
}

impl Vertex {
    pub fn class(&self) -> VertexClass {
        match self {
            Vertex::Role(_) => VertexClass::Role,
            Vertex::Domain(_) => VertexClass::Domain,
            Vertex::Accountability(_) => VertexClass::Accountability,
            Vertex::RoleAdditionalContent(_) => VertexClass::RoleAdditionalContent,
            Vertex::Member(_) => VertexClass::Member,
            Vertex::MemberAvatar(_) => VertexClass::MemberAvatar,
            Vertex::Tension(_) => VertexClass::Tension,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Vertex::Role(v) => *v.id.as_uuid(),
            Vertex::Domain(v) => *v.id.as_uuid(),
            Vertex::Accountability(v) => *v.id.as_uuid(),
            Vertex::RoleAdditionalContent(v) => *v.id.as_uuid(),
            Vertex::Member(v) => *v.id.as_uuid(),
            Vertex::MemberAvatar(v) => *v.id.as_uuid(),
            Vertex::Tension(v) => *v.id.as_uuid(),
        }
    }
}

/// Typed access to one variant of [`Vertex`].
pub trait VertexKind: Sized + Clone + Send + Sync + 'static {
    const CLASS: VertexClass;

    fn from_vertex(vertex: Vertex) -> Option<Self>;

    fn into_vertex(self) -> Vertex;
}

macro_rules! impl_vertex_kind {
    ($t:ident) => {
        impl VertexKind for $t {
            const CLASS: VertexClass = VertexClass::$t;

            fn from_vertex(vertex: Vertex) -> Option<Self> {
                match vertex {
                    Vertex::$t(v) => Some(v),
                    _ => None,
                }
            }

            fn into_vertex(self) -> Vertex {
                Vertex::$t(self)
            }
        }

        impl From<$t> for Vertex {
            fn from(value: $t) -> Self {
                Vertex::$t(value)
            }
        }
    };
}

impl_vertex_kind!(Role);
impl_vertex_kind!(Domain);
impl_vertex_kind!(Accountability);
impl_vertex_kind!(RoleAdditionalContent);
impl_vertex_kind!(Member);
impl_vertex_kind!(MemberAvatar);
impl_vertex_kind!(Tension);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_roles_are_the_four_governance_roles() {
        let core: Vec<_> = [
            RoleType::Circle,
            RoleType::Normal,
            RoleType::LeadLink,
            RoleType::RepLink,
            RoleType::Facilitator,
            RoleType::Secretary,
        ]
        .into_iter()
        .filter(RoleType::is_core_role)
        .collect();
        assert_eq!(
            core,
            vec![
                RoleType::LeadLink,
                RoleType::RepLink,
                RoleType::Facilitator,
                RoleType::Secretary
            ]
        );
    }

    #[test]
    fn role_type_parses_its_own_names() {
        for rt in [RoleType::Circle, RoleType::LeadLink, RoleType::Secretary] {
            assert_eq!(rt.as_str().parse::<RoleType>().unwrap(), rt);
        }
        assert!("chair".parse::<RoleType>().is_err());
    }

    #[test]
    fn typed_access_rejects_other_variants() {
        let member = Member {
            id: MemberId::new(),
            is_admin: false,
            user_name: "ada".into(),
            full_name: "Ada".into(),
            email: "ada@example.com".into(),
        };
        let vertex = member.clone().into_vertex();
        assert_eq!(vertex.class(), VertexClass::Member);
        assert_eq!(vertex.id(), *member.id.as_uuid());
        assert!(Role::from_vertex(vertex.clone()).is_none());
        assert_eq!(Member::from_vertex(vertex), Some(member));
    }

    #[test]
    fn field_kinds_are_declared_per_class() {
        assert_eq!(VertexClass::Role.field_kind("depth"), Some(FieldKind::Int));
        assert_eq!(VertexClass::Member.field_kind("depth"), None);
        assert_eq!(VertexClass::MemberAvatar.field_kind("image"), None);
    }
}
