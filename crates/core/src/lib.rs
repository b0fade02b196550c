//! `circlegraph-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the timeline version axis, the closed set of vertex and edge
//! classes stored in the bitemporal graph, and the derived role audit records.

pub mod edge;
pub mod error;
pub mod id;
pub mod role_event;
pub mod timeline;
pub mod vertex;

pub use edge::{Direction, Edge, EdgeClass, EdgePayload, RoleMemberEdge};
pub use error::{DomainError, DomainResult};
pub use id::{AccountabilityId, DomainId, MemberId, RoleId, TensionId};
pub use role_event::{
    ChangeType, ChangedRole, CircleChangesApplied, RoleEvent, RoleEventType, RoleParentChange,
};
pub use timeline::{Timeline, TimelineNumber};
pub use vertex::{
    Accountability, Domain, FieldKind, Member, MemberAvatar, Role, RoleAdditionalContent,
    RoleType, Tension, Vertex, VertexClass, VertexKind,
};
