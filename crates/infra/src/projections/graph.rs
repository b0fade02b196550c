//! Graph mutations per event type.
//!
//! Every arm is expressed with the store primitives (insert / update /
//! delete vertex, add / update / delete edge) at the event's timeline, so
//! history is only ever appended to.

use std::collections::{HashSet, VecDeque};

use tracing::debug;
use uuid::Uuid;

use circlegraph_core::{
    Accountability, Direction, Domain, DomainError, Edge, EdgeClass, Member, MemberAvatar, Role,
    RoleAdditionalContent, RoleId, RoleMemberEdge, Tension, TimelineNumber, Vertex, VertexClass,
};
use circlegraph_events::EventPayload;

use super::ProjectionError;
use crate::graph::{GraphTx, StoreResult, VertexQuery};

/// Parent of `role` at `t`, if any.
pub(crate) async fn parent_of(
    tx: &mut dyn GraphTx,
    t: TimelineNumber,
    role: RoleId,
) -> StoreResult<Option<Role>> {
    let parents = tx
        .connected::<Role>(t, role, EdgeClass::RoleParent, Direction::Out, &VertexQuery::all())
        .await?;
    Ok(parents.into_iter().next().map(|(parent, _)| parent))
}

async fn require_role(tx: &mut dyn GraphTx, t: TimelineNumber, role: RoleId) -> Result<Role, ProjectionError> {
    tx.vertex::<Role>(t, role)
        .await?
        .ok_or(ProjectionError::Domain(DomainError::RoleNotFound(role)))
}

async fn require_tension(tx: &mut dyn GraphTx, t: TimelineNumber, id: Uuid) -> Result<Tension, ProjectionError> {
    tx.vertex::<Tension>(t, id)
        .await?
        .ok_or(ProjectionError::Domain(DomainError::not_found()))
}

/// Close every edge of `class` reaching `id` from the other end.
async fn close_incoming(
    tx: &mut dyn GraphTx,
    t: TimelineNumber,
    class: EdgeClass,
    id: Uuid,
) -> StoreResult<Vec<Uuid>> {
    let found = tx
        .fetch_connected(t, &[id], class, Direction::In, &VertexQuery::all())
        .await?;
    let mut closed = Vec::new();
    for connected in found.into_iter().flat_map(|(_, v)| v) {
        let x = connected.vertex.id();
        tx.delete_edge(t, class, x, id).await?;
        closed.push(x);
    }
    Ok(closed)
}

/// Apply the graph mutations of one event at timeline `t`.
pub async fn apply(tx: &mut dyn GraphTx, t: TimelineNumber, payload: &EventPayload) -> Result<(), ProjectionError> {
    match payload {
        // ── roles ──────────────────────────────────────────────────────────
        EventPayload::RoleCreated(e) => {
            let depth = match e.parent_role_id {
                Some(parent) => require_role(tx, t, parent).await?.depth + 1,
                None => 0,
            };
            let role = Role {
                id: e.role_id,
                role_type: e.role_type,
                depth,
                name: e.name.clone(),
                purpose: e.purpose.clone(),
            };
            tx.insert_vertex(t, &Vertex::Role(role)).await?;
            if let Some(parent) = e.parent_role_id {
                tx.add_edge(t, &Edge::new(EdgeClass::RoleParent, e.role_id, parent))
                    .await?;
            }
        }
        EventPayload::RoleUpdated(e) => {
            let existing = require_role(tx, t, e.role_id).await?;
            let role = Role {
                role_type: e.role_type,
                name: e.name.clone(),
                purpose: e.purpose.clone(),
                ..existing
            };
            tx.update_vertex(t, &Vertex::Role(role)).await?;
        }
        EventPayload::RoleDeleted(e) => delete_role(tx, t, e.role_id).await?,
        EventPayload::RoleChangedParent(e) => change_parent(tx, t, e.role_id, e.parent_role_id).await?,
        EventPayload::RoleAdditionalContentSet(e) => {
            let content = RoleAdditionalContent {
                id: e.role_id,
                content: e.content.clone(),
            };
            tx.update_vertex(t, &Vertex::RoleAdditionalContent(content))
                .await?;
        }

        // ── domains & accountabilities ─────────────────────────────────────
        EventPayload::RoleDomainCreated(e) => {
            let domain = Domain {
                id: e.domain_id,
                description: e.description.clone(),
            };
            tx.insert_vertex(t, &Vertex::Domain(domain)).await?;
            tx.add_edge(t, &Edge::new(EdgeClass::RoleDomain, e.domain_id, e.role_id))
                .await?;
        }
        EventPayload::RoleDomainUpdated(e) => {
            let domain = Domain {
                id: e.domain_id,
                description: e.description.clone(),
            };
            tx.update_vertex(t, &Vertex::Domain(domain)).await?;
        }
        EventPayload::RoleDomainDeleted(e) => {
            tx.delete_edge(t, EdgeClass::RoleDomain, e.domain_id.into(), e.role_id.into())
                .await?;
            tx.delete_vertex(t, VertexClass::Domain, e.domain_id.into())
                .await?;
        }
        EventPayload::RoleAccountabilityCreated(e) => {
            let accountability = Accountability {
                id: e.accountability_id,
                description: e.description.clone(),
            };
            tx.insert_vertex(t, &Vertex::Accountability(accountability))
                .await?;
            tx.add_edge(
                t,
                &Edge::new(EdgeClass::RoleAccountability, e.accountability_id, e.role_id),
            )
            .await?;
        }
        EventPayload::RoleAccountabilityUpdated(e) => {
            let accountability = Accountability {
                id: e.accountability_id,
                description: e.description.clone(),
            };
            tx.update_vertex(t, &Vertex::Accountability(accountability))
                .await?;
        }
        EventPayload::RoleAccountabilityDeleted(e) => {
            tx.delete_edge(
                t,
                EdgeClass::RoleAccountability,
                e.accountability_id.into(),
                e.role_id.into(),
            )
            .await?;
            tx.delete_vertex(t, VertexClass::Accountability, e.accountability_id.into())
                .await?;
        }

        // ── role membership ────────────────────────────────────────────────
        EventPayload::RoleMemberAdded(e) => {
            let edge = Edge::new(EdgeClass::RoleMember, e.member_id, e.role_id).with_role_member(
                RoleMemberEdge {
                    focus: e.focus.clone(),
                    no_core_member: e.no_core_member,
                    election_expiration: None,
                },
            );
            tx.add_edge(t, &edge).await?;
        }
        EventPayload::RoleMemberUpdated(e) => {
            let edge = Edge::new(EdgeClass::RoleMember, e.member_id, e.role_id).with_role_member(
                RoleMemberEdge {
                    focus: e.focus.clone(),
                    no_core_member: e.no_core_member,
                    election_expiration: None,
                },
            );
            tx.update_edge(t, &edge).await?;
        }
        EventPayload::RoleMemberRemoved(e) => {
            tx.delete_edge(t, EdgeClass::RoleMember, e.member_id.into(), e.role_id.into())
                .await?;
        }
        EventPayload::CircleDirectMemberAdded(e) => {
            tx.add_edge(t, &Edge::new(EdgeClass::CircleDirectMember, e.member_id, e.role_id))
                .await?;
        }
        EventPayload::CircleDirectMemberRemoved(e) => {
            tx.delete_edge(
                t,
                EdgeClass::CircleDirectMember,
                e.member_id.into(),
                e.role_id.into(),
            )
            .await?;
        }
        EventPayload::CircleLeadLinkMemberSet(e) => {
            let edge = Edge::new(EdgeClass::RoleMember, e.member_id, e.lead_link_role_id);
            tx.update_edge(t, &edge).await?;
        }
        EventPayload::CircleLeadLinkMemberUnset(e) => {
            tx.delete_edge(
                t,
                EdgeClass::RoleMember,
                e.member_id.into(),
                e.lead_link_role_id.into(),
            )
            .await?;
        }
        EventPayload::CircleCoreRoleMemberSet(e) => {
            let edge = Edge::new(EdgeClass::RoleMember, e.member_id, e.core_role_id).with_role_member(
                RoleMemberEdge {
                    focus: None,
                    no_core_member: false,
                    election_expiration: e.election_expiration,
                },
            );
            tx.update_edge(t, &edge).await?;
        }
        EventPayload::CircleCoreRoleMemberUnset(e) => {
            tx.delete_edge(
                t,
                EdgeClass::RoleMember,
                e.member_id.into(),
                e.core_role_id.into(),
            )
            .await?;
        }

        // ── tensions ───────────────────────────────────────────────────────
        EventPayload::TensionCreated(e) => {
            let tension = Tension {
                id: e.tension_id,
                title: e.title.clone(),
                description: e.description.clone(),
                closed: false,
                close_reason: String::new(),
            };
            tx.insert_vertex(t, &Vertex::Tension(tension)).await?;
            tx.add_edge(t, &Edge::new(EdgeClass::TensionMember, e.tension_id, e.member_id))
                .await?;
            if let Some(role) = e.role_id {
                tx.add_edge(t, &Edge::new(EdgeClass::TensionRole, e.tension_id, role))
                    .await?;
            }
        }
        EventPayload::TensionUpdated(e) => {
            let existing = require_tension(tx, t, e.tension_id.into()).await?;
            let tension = Tension {
                title: e.title.clone(),
                description: e.description.clone(),
                ..existing
            };
            tx.update_vertex(t, &Vertex::Tension(tension)).await?;
        }
        EventPayload::TensionRoleChanged(e) => {
            if let Some(prev) = e.prev_role_id {
                tx.delete_edge(t, EdgeClass::TensionRole, e.tension_id.into(), prev.into())
                    .await?;
            }
            if let Some(role) = e.role_id {
                tx.update_edge(t, &Edge::new(EdgeClass::TensionRole, e.tension_id, role))
                    .await?;
            }
        }
        EventPayload::TensionClosed(e) => {
            let existing = require_tension(tx, t, e.tension_id.into()).await?;
            let tension = Tension {
                closed: true,
                close_reason: e.reason.clone(),
                ..existing
            };
            tx.update_vertex(t, &Vertex::Tension(tension)).await?;
        }

        // ── members ────────────────────────────────────────────────────────
        EventPayload::MemberCreated(e) => {
            let member = Member {
                id: e.member_id,
                is_admin: e.is_admin,
                user_name: e.user_name.clone(),
                full_name: e.full_name.clone(),
                email: e.email.clone(),
            };
            tx.insert_vertex(t, &Vertex::Member(member)).await?;
            if let Some(uid) = &e.match_uid {
                tx.set_match_uid(e.member_id, uid).await?;
            }
        }
        EventPayload::MemberUpdated(e) => {
            let member = Member {
                id: e.member_id,
                is_admin: e.is_admin,
                user_name: e.user_name.clone(),
                full_name: e.full_name.clone(),
                email: e.email.clone(),
            };
            tx.update_vertex(t, &Vertex::Member(member)).await?;
        }
        EventPayload::MemberPasswordSet(e) => {
            tx.set_password(e.member_id, &e.password_hash).await?;
        }
        EventPayload::MemberMatchUidSet(e) => {
            tx.set_match_uid(e.member_id, &e.match_uid).await?;
        }
        EventPayload::MemberAvatarSet(e) => {
            let avatar = MemberAvatar {
                id: e.member_id,
                image: e.image.clone(),
            };
            tx.update_vertex(t, &Vertex::MemberAvatar(avatar)).await?;
        }
    }
    Ok(())
}

/// Close a role and everything that only exists through it.
///
/// Domains and accountabilities are owned by the role and are deleted with
/// it; membership and tension links are closed so that no edge is left
/// pointing at a deleted vertex. Child roles must be moved or deleted first.
async fn delete_role(tx: &mut dyn GraphTx, t: TimelineNumber, role: RoleId) -> Result<(), ProjectionError> {
    let id: Uuid = role.into();

    let children = tx
        .connected::<Role>(
            t,
            role,
            EdgeClass::RoleParent,
            Direction::In,
            &VertexQuery::all().limit(1),
        )
        .await?;
    if let Some((child, _)) = children.first() {
        return Err(DomainError::invariant(format!(
            "cannot delete role {role} while child role {} is below it",
            child.id
        ))
        .into());
    }

    if let Some(parent) = parent_of(tx, t, role).await? {
        tx.delete_edge(t, EdgeClass::RoleParent, id, parent.id.into())
            .await?;
    }
    for domain in close_incoming(tx, t, EdgeClass::RoleDomain, id).await? {
        tx.delete_vertex(t, VertexClass::Domain, domain).await?;
    }
    for accountability in close_incoming(tx, t, EdgeClass::RoleAccountability, id).await? {
        tx.delete_vertex(t, VertexClass::Accountability, accountability)
            .await?;
    }
    for class in [
        EdgeClass::RoleMember,
        EdgeClass::CircleDirectMember,
        EdgeClass::TensionRole,
    ] {
        close_incoming(tx, t, class, id).await?;
    }

    tx.delete_vertex(t, VertexClass::RoleAdditionalContent, id)
        .await?;
    tx.delete_vertex(t, VertexClass::Role, id).await?;
    Ok(())
}

async fn change_parent(
    tx: &mut dyn GraphTx,
    t: TimelineNumber,
    role: RoleId,
    new_parent: Option<RoleId>,
) -> Result<(), ProjectionError> {
    let current = require_role(tx, t, role).await?;
    let previous = parent_of(tx, t, role).await?.map(|p| p.id);
    if previous == new_parent {
        return Ok(());
    }

    let depth = match new_parent {
        Some(parent) => {
            let parent_role = require_role(tx, t, parent).await?;
            ensure_not_descendant(tx, t, role, parent).await?;
            parent_role.depth + 1
        }
        None => 0,
    };

    if let Some(previous) = previous {
        tx.delete_edge(t, EdgeClass::RoleParent, role.into(), previous.into())
            .await?;
    }
    if let Some(parent) = new_parent {
        tx.add_edge(t, &Edge::new(EdgeClass::RoleParent, role, parent))
            .await?;
    }

    recompute_depths(tx, t, current, depth).await?;
    Ok(())
}

/// Moving `role` under `new_parent` must not close a cycle.
async fn ensure_not_descendant(
    tx: &mut dyn GraphTx,
    t: TimelineNumber,
    role: RoleId,
    new_parent: RoleId,
) -> Result<(), ProjectionError> {
    let mut cursor = Some(new_parent);
    let mut seen = HashSet::new();
    while let Some(id) = cursor {
        if id == role {
            return Err(DomainError::invariant(format!(
                "cannot move role {role} below its own descendant {new_parent}"
            ))
            .into());
        }
        if !seen.insert(id) {
            break;
        }
        cursor = parent_of(tx, t, id).await?.map(|p| p.id);
    }
    Ok(())
}

/// Breadth-first depth recomputation of `root` and its subtree.
///
/// Children are visited in id order, so the write order is deterministic.
/// Only roles whose depth actually changes get a new version.
async fn recompute_depths(
    tx: &mut dyn GraphTx,
    t: TimelineNumber,
    root: Role,
    root_depth: i32,
) -> Result<usize, ProjectionError> {
    let mut frontier = VecDeque::from([(root, root_depth)]);
    let mut visited = HashSet::new();
    let mut rewritten = 0;

    while let Some((role, depth)) = frontier.pop_front() {
        if !visited.insert(role.id) {
            continue;
        }
        let id = role.id;
        if role.depth != depth {
            tx.update_vertex(t, &Vertex::Role(Role { depth, ..role }))
                .await?;
            rewritten += 1;
        }

        let children = tx
            .connected::<Role>(t, id, EdgeClass::RoleParent, Direction::In, &VertexQuery::all())
            .await?;
        frontier.extend(children.into_iter().map(|(child, _)| (child, depth + 1)));
    }

    debug!(timeline = %t, rewritten, "recomputed role depths");
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use circlegraph_core::{MemberId, RoleType, TensionId};
    use circlegraph_events::payload::{
        RoleChangedParent, RoleCreated, RoleDeleted, RoleDomainCreated, RoleMemberAdded,
        TensionClosed, TensionCreated,
    };
    use proptest::prelude::*;

    use crate::graph::{GraphStore, InMemoryGraphStore};

    fn created(role_id: RoleId, parent: Option<RoleId>) -> EventPayload {
        EventPayload::from(RoleCreated {
            role_id,
            role_type: if parent.is_none() {
                RoleType::Circle
            } else {
                RoleType::Normal
            },
            name: format!("role {role_id}"),
            purpose: String::new(),
            parent_role_id: parent,
        })
    }

    fn moved(role_id: RoleId, parent: Option<RoleId>) -> EventPayload {
        EventPayload::from(RoleChangedParent {
            role_id,
            parent_role_id: parent,
        })
    }

    async fn depth(tx: &mut dyn GraphTx, t: TimelineNumber, role: RoleId) -> i32 {
        tx.vertex::<Role>(t, role).await.unwrap().unwrap().depth
    }

    #[tokio::test]
    async fn creation_derives_depth_from_parent() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        let t = TimelineNumber::new(10);
        let (root, child) = (RoleId::new(), RoleId::new());

        apply(tx.as_mut(), t, &created(root, None)).await.unwrap();
        apply(tx.as_mut(), t, &created(child, Some(root))).await.unwrap();

        assert_eq!(depth(tx.as_mut(), t, root).await, 0);
        assert_eq!(depth(tx.as_mut(), t, child).await, 1);
        let parent = parent_of(tx.as_mut(), t, child).await.unwrap().unwrap();
        assert_eq!(parent.id, root);
    }

    #[tokio::test]
    async fn creating_under_a_missing_parent_is_a_domain_error() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        let missing = RoleId::new();

        let err = apply(tx.as_mut(), TimelineNumber::new(1), &created(RoleId::new(), Some(missing)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::RoleNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn moving_a_missing_role_is_a_domain_error() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = apply(tx.as_mut(), TimelineNumber::new(1), &moved(RoleId::new(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::RoleNotFound(_))));
    }

    #[tokio::test]
    async fn moving_below_a_descendant_is_refused() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        let t = TimelineNumber::new(1);
        let (a, b) = (RoleId::new(), RoleId::new());
        apply(tx.as_mut(), t, &created(a, None)).await.unwrap();
        apply(tx.as_mut(), t, &created(b, Some(a))).await.unwrap();

        let err = apply(tx.as_mut(), TimelineNumber::new(2), &moved(a, Some(b)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn deleting_a_role_with_children_is_refused() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        let (t1, t2) = (TimelineNumber::new(1), TimelineNumber::new(2));
        let (parent, child) = (RoleId::new(), RoleId::new());
        apply(tx.as_mut(), t1, &created(parent, None)).await.unwrap();
        apply(tx.as_mut(), t1, &created(child, Some(parent))).await.unwrap();

        let err = apply(tx.as_mut(), t2, &EventPayload::from(RoleDeleted { role_id: parent }))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(parent_of(tx.as_mut(), t2, child).await.unwrap().map(|p| p.id), Some(parent));

        // children first, then the parent, within one timeline
        apply(tx.as_mut(), t2, &EventPayload::from(RoleDeleted { role_id: child }))
            .await
            .unwrap();
        apply(tx.as_mut(), t2, &EventPayload::from(RoleDeleted { role_id: parent }))
            .await
            .unwrap();
        assert!(tx.vertex::<Role>(t2, parent).await.unwrap().is_none());
        assert!(tx.vertex::<Role>(t1, child).await.unwrap().is_some());
        tx.check_integrity(t2).await.unwrap();
    }

    #[tokio::test]
    async fn deleting_a_role_closes_everything_attached_to_it() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        let t1 = TimelineNumber::new(1);
        let t2 = TimelineNumber::new(2);
        let (circle, role) = (RoleId::new(), RoleId::new());
        let member = MemberId::new();
        let domain = circlegraph_core::DomainId::new();
        let tension = TensionId::new();

        apply(tx.as_mut(), t1, &created(circle, None)).await.unwrap();
        apply(tx.as_mut(), t1, &created(role, Some(circle))).await.unwrap();
        apply(
            tx.as_mut(),
            t1,
            &EventPayload::from(RoleDomainCreated {
                role_id: role,
                domain_id: domain,
                description: "budget".into(),
            }),
        )
        .await
        .unwrap();
        apply(
            tx.as_mut(),
            t1,
            &EventPayload::from(circlegraph_events::payload::MemberCreated {
                member_id: member,
                is_admin: false,
                match_uid: None,
                user_name: "ada".into(),
                full_name: "Ada".into(),
                email: "ada@example.com".into(),
            }),
        )
        .await
        .unwrap();
        apply(
            tx.as_mut(),
            t1,
            &EventPayload::from(RoleMemberAdded {
                role_id: role,
                member_id: member,
                focus: Some("ops".into()),
                no_core_member: false,
            }),
        )
        .await
        .unwrap();
        apply(
            tx.as_mut(),
            t1,
            &EventPayload::from(TensionCreated {
                tension_id: tension,
                title: "t".into(),
                description: String::new(),
                member_id: member,
                role_id: Some(role),
            }),
        )
        .await
        .unwrap();

        apply(tx.as_mut(), t2, &EventPayload::from(RoleDeleted { role_id: role }))
            .await
            .unwrap();

        tx.check_integrity(t1).await.unwrap();
        tx.check_integrity(t2).await.unwrap();
        assert!(tx.vertex::<Role>(t2, role).await.unwrap().is_none());
        assert!(tx.vertex::<Domain>(t2, domain).await.unwrap().is_none());
        assert!(tx.vertex::<Domain>(t1, domain).await.unwrap().is_some());
        assert!(tx.vertex::<Tension>(t2, tension).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn closing_a_tension_keeps_its_text() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        let member = MemberId::new();
        let tension = TensionId::new();
        apply(
            tx.as_mut(),
            TimelineNumber::new(1),
            &EventPayload::from(circlegraph_events::payload::MemberCreated {
                member_id: member,
                is_admin: false,
                match_uid: None,
                user_name: "bob".into(),
                full_name: String::new(),
                email: "bob@example.com".into(),
            }),
        )
        .await
        .unwrap();
        apply(
            tx.as_mut(),
            TimelineNumber::new(1),
            &EventPayload::from(TensionCreated {
                tension_id: tension,
                title: "noise".into(),
                description: "too loud".into(),
                member_id: member,
                role_id: None,
            }),
        )
        .await
        .unwrap();
        apply(
            tx.as_mut(),
            TimelineNumber::new(2),
            &EventPayload::from(TensionClosed {
                tension_id: tension,
                reason: "fixed".into(),
            }),
        )
        .await
        .unwrap();

        let closed = tx
            .vertex::<Tension>(TimelineNumber::new(2), tension)
            .await
            .unwrap()
            .unwrap();
        assert!(closed.closed);
        assert_eq!(closed.close_reason, "fixed");
        assert_eq!(closed.description, "too loud");
    }

    proptest! {
        /// After any sequence of moves, depth(child) = depth(parent) + 1 for
        /// every parent link and roots sit at depth 0.
        #[test]
        fn depth_follows_the_hierarchy(
            parents in proptest::collection::vec(proptest::option::of(0usize..8), 8),
            moves in proptest::collection::vec((0usize..8, proptest::option::of(0usize..8)), 0..12),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryGraphStore::new();
                let mut tx = store.begin().await.unwrap();
                let ids: Vec<RoleId> = (0..8).map(|_| RoleId::new()).collect();
                let t0 = TimelineNumber::new(1);

                // initial forest: a role may only hang below an earlier one
                for (i, parent) in parents.iter().enumerate() {
                    let parent = parent.filter(|p| *p < i).map(|p| ids[p]);
                    apply(tx.as_mut(), t0, &created(ids[i], parent)).await.unwrap();
                }

                for (step, (role, parent)) in moves.iter().enumerate() {
                    let t = TimelineNumber::new(2 + step as i64);
                    // cycles are refused with a domain error and leave the graph untouched
                    let _ = apply(tx.as_mut(), t, &moved(ids[*role], parent.map(|p| ids[p]))).await;
                }

                let t = TimelineNumber::new(2 + moves.len() as i64);
                for id in &ids {
                    let d = depth(tx.as_mut(), t, *id).await;
                    match parent_of(tx.as_mut(), t, *id).await.unwrap() {
                        Some(parent) => prop_assert_eq!(d, parent.depth + 1),
                        None => prop_assert_eq!(d, 0),
                    }
                }
                tx.check_integrity(t).await.unwrap();
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
