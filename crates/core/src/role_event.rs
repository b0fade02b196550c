//! Role audit records derived from the event stream.
//!
//! One [`RoleEvent`] summarizes every structural change applied to a circle
//! within a single timeline. The record is built incrementally while the
//! events of a batch are projected; the helpers on [`CircleChangesApplied`]
//! encode how individual changes fold into it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{MemberId, RoleId};
use crate::timeline::TimelineNumber;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleEventType {
    CircleChangesApplied,
}

impl RoleEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleEventType::CircleChangesApplied => "CircleChangesApplied",
        }
    }
}

impl core::str::FromStr for RoleEventType {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CircleChangesApplied" => Ok(RoleEventType::CircleChangesApplied),
            other => Err(crate::DomainError::validation(format!(
                "unknown role event type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEvent {
    pub timeline: TimelineNumber,
    pub id: Uuid,
    /// Command (correlation id) that produced the batch, when known.
    pub command_id: Option<Uuid>,
    /// Last event folded into this record.
    pub cause_id: Option<Uuid>,
    pub role_id: RoleId,
    pub event_type: RoleEventType,
    pub data: CircleChangesApplied,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    New,
    Updated,
    Deleted,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleParentChange {
    pub previous_parent: RoleId,
    pub new_parent: RoleId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedRole {
    pub change_type: ChangeType,
    pub moved: Option<RoleParentChange>,
    /// Roles moved from this circle into the changed role.
    #[serde(default)]
    pub roles_moved_from_parent: Vec<RoleId>,
    /// Roles moved out of the changed role into this circle.
    #[serde(default)]
    pub roles_moved_to_parent: Vec<RoleId>,
}

impl ChangedRole {
    fn new(change_type: ChangeType) -> Self {
        Self {
            change_type,
            moved: None,
            roles_moved_from_parent: Vec::new(),
            roles_moved_to_parent: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleChangesApplied {
    pub issuer_id: MemberId,
    pub changed_roles: BTreeMap<RoleId, ChangedRole>,
    /// role -> circle it came from
    #[serde(default)]
    pub roles_moved_in: BTreeMap<RoleId, RoleId>,
    /// role -> circle it went to
    #[serde(default)]
    pub roles_moved_out: BTreeMap<RoleId, RoleId>,
}

impl CircleChangesApplied {
    pub fn new(issuer_id: MemberId) -> Self {
        Self {
            issuer_id,
            changed_roles: BTreeMap::new(),
            roles_moved_in: BTreeMap::new(),
            roles_moved_out: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_roles.is_empty()
            && self.roles_moved_in.is_empty()
            && self.roles_moved_out.is_empty()
    }

    pub fn record_new(&mut self, role: RoleId) {
        self.changed_roles.insert(role, ChangedRole::new(ChangeType::New));
    }

    /// A role created earlier in the same batch stays `New`.
    pub fn record_updated(&mut self, role: RoleId) {
        self.changed_roles
            .entry(role)
            .or_insert_with(|| ChangedRole::new(ChangeType::Updated));
    }

    /// Deleting a role created in the same batch erases it from the record.
    pub fn record_deleted(&mut self, role: RoleId) {
        match self.changed_roles.get(&role).map(|c| c.change_type) {
            Some(ChangeType::New) => {
                self.changed_roles.remove(&role);
            }
            _ => {
                self.changed_roles.insert(role, ChangedRole::new(ChangeType::Deleted));
            }
        }
        self.roles_moved_in.remove(&role);
    }

    /// `role` left this circle for `new_parent`.
    ///
    /// Returns true when the role had been created in this circle during the
    /// same batch; its entry is dropped and the destination should record it
    /// as new instead of moved.
    pub fn record_moved_out(&mut self, role: RoleId, new_parent: RoleId) -> bool {
        if let Some(ChangeType::New) = self.changed_roles.get(&role).map(|c| c.change_type) {
            self.changed_roles.remove(&role);
            return true;
        }
        self.changed_roles.remove(&role);
        if self.roles_moved_in.remove(&role).is_none() {
            self.roles_moved_out.insert(role, new_parent);
        }
        false
    }

    /// `role` arrived in this circle from `previous_parent`.
    pub fn record_moved_in(&mut self, role: RoleId, previous_parent: RoleId, this_circle: RoleId) {
        if self.roles_moved_out.remove(&role).is_some() {
            // moved away and back within one batch
            self.record_updated(role);
            return;
        }
        self.roles_moved_in.insert(role, previous_parent);
        let entry = self
            .changed_roles
            .entry(role)
            .or_insert_with(|| ChangedRole::new(ChangeType::Updated));
        if entry.change_type != ChangeType::New {
            entry.moved = Some(RoleParentChange {
                previous_parent,
                new_parent: this_circle,
            });
        }
    }

    /// `moved` went from this circle down into its child role `child`.
    pub fn record_child_received(&mut self, child: RoleId, moved: RoleId) {
        let entry = self
            .changed_roles
            .entry(child)
            .or_insert_with(|| ChangedRole::new(ChangeType::Updated));
        if !entry.roles_moved_from_parent.contains(&moved) {
            entry.roles_moved_from_parent.push(moved);
        }
    }

    /// `moved` went from the child role `child` up into this circle.
    pub fn record_child_released(&mut self, child: RoleId, moved: RoleId) {
        let entry = self
            .changed_roles
            .entry(child)
            .or_insert_with(|| ChangedRole::new(ChangeType::Updated));
        if !entry.roles_moved_to_parent.contains(&moved) {
            entry.roles_moved_to_parent.push(moved);
        }
    }
}
