//! Directed, versioned relations between vertices.
//!
//! An edge goes from `x` to `y`. Each class fixes the vertex class of both
//! ends; edges are keyed by `(x, y)` within their class.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vertex::VertexClass;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeClass {
    /// child role -> parent role
    RoleParent,
    /// domain -> role
    RoleDomain,
    /// accountability -> role
    RoleAccountability,
    /// member -> role, carries a [`RoleMemberEdge`]
    RoleMember,
    /// member -> circle
    CircleDirectMember,
    /// tension -> member that opened it
    TensionMember,
    /// tension -> role it is addressed to
    TensionRole,
}

impl EdgeClass {
    pub const ALL: [EdgeClass; 7] = [
        EdgeClass::RoleParent,
        EdgeClass::RoleDomain,
        EdgeClass::RoleAccountability,
        EdgeClass::RoleMember,
        EdgeClass::CircleDirectMember,
        EdgeClass::TensionMember,
        EdgeClass::TensionRole,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            EdgeClass::RoleParent => "rolerole",
            EdgeClass::RoleDomain => "roledomain",
            EdgeClass::RoleAccountability => "roleaccountability",
            EdgeClass::RoleMember => "rolemember",
            EdgeClass::CircleDirectMember => "circledirectmember",
            EdgeClass::TensionMember => "tensionmember",
            EdgeClass::TensionRole => "tensionrole",
        }
    }

    /// Class of the `x` end.
    pub fn x_class(&self) -> VertexClass {
        match self {
            EdgeClass::RoleParent => VertexClass::Role,
            EdgeClass::RoleDomain => VertexClass::Domain,
            EdgeClass::RoleAccountability => VertexClass::Accountability,
            EdgeClass::RoleMember | EdgeClass::CircleDirectMember => VertexClass::Member,
            EdgeClass::TensionMember | EdgeClass::TensionRole => VertexClass::Tension,
        }
    }

    /// Class of the `y` end.
    pub fn y_class(&self) -> VertexClass {
        match self {
            EdgeClass::RoleParent
            | EdgeClass::RoleDomain
            | EdgeClass::RoleAccountability
            | EdgeClass::RoleMember
            | EdgeClass::CircleDirectMember
            | EdgeClass::TensionRole => VertexClass::Role,
            EdgeClass::TensionMember => VertexClass::Member,
        }
    }

    /// Class reached when traversing from a source id in `direction`.
    pub fn target_class(&self, direction: Direction) -> VertexClass {
        match direction {
            Direction::Out => self.y_class(),
            Direction::In => self.x_class(),
        }
    }
}

impl core::fmt::Display for EdgeClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.table())
    }
}

/// Traversal direction relative to the source ids.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Source is `x`, targets are `y`.
    Out,
    /// Source is `y`, targets are `x`.
    In,
}

/// Payload of a member filling a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMemberEdge {
    pub focus: Option<String>,
    pub no_core_member: bool,
    pub election_expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgePayload {
    #[default]
    None,
    RoleMember(RoleMemberEdge),
}

impl EdgePayload {
    pub fn role_member(&self) -> Option<&RoleMemberEdge> {
        match self {
            EdgePayload::RoleMember(p) => Some(p),
            EdgePayload::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub class: EdgeClass,
    pub x: Uuid,
    pub y: Uuid,
    pub payload: EdgePayload,
}

impl Edge {
    pub fn new(class: EdgeClass, x: impl Into<Uuid>, y: impl Into<Uuid>) -> Self {
        let payload = match class {
            EdgeClass::RoleMember => EdgePayload::RoleMember(RoleMemberEdge::default()),
            _ => EdgePayload::None,
        };
        Self {
            class,
            x: x.into(),
            y: y.into(),
            payload,
        }
    }

    pub fn with_role_member(mut self, payload: RoleMemberEdge) -> Self {
        self.payload = EdgePayload::RoleMember(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{MemberId, RoleId};

    #[test]
    fn role_member_edges_always_carry_a_payload() {
        let edge = Edge::new(EdgeClass::RoleMember, MemberId::new(), RoleId::new());
        assert_eq!(edge.payload.role_member(), Some(&RoleMemberEdge::default()));

        let edge = Edge::new(EdgeClass::RoleParent, RoleId::new(), RoleId::new());
        assert_eq!(edge.payload, EdgePayload::None);
    }

    #[test]
    fn traversal_direction_selects_the_opposite_end() {
        assert_eq!(EdgeClass::RoleDomain.target_class(Direction::In), VertexClass::Domain);
        assert_eq!(EdgeClass::RoleDomain.target_class(Direction::Out), VertexClass::Role);
        assert_eq!(EdgeClass::TensionMember.target_class(Direction::Out), VertexClass::Member);
    }
}
