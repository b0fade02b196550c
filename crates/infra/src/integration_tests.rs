//! Integration tests for the full projection pipeline.
//!
//! Tests: EventSource → Projector → GraphStore → ReadSession
//!
//! Verifies:
//! - a re-parented subtree keeps consistent depths and history
//! - audit records land on the circles that saw the change
//! - re-applying a creation without the checkpoint guard is refused

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use uuid::Uuid;

    use circlegraph_core::{ChangeType, MemberId, RoleId, RoleType, TimelineNumber};
    use circlegraph_events::payload::{
        CircleLeadLinkMemberSet, MemberCreated, RoleChangedParent, RoleCreated, RoleDeleted,
        RoleMemberAdded, RoleMemberRemoved,
    };
    use circlegraph_events::{EventMetadata, EventPayload, EventSource, InMemoryEventSource, LocalHub};

    use crate::graph::{GraphStore, InMemoryGraphStore, StoreError};
    use crate::projections::{self, ProjectionError};
    use crate::query::{ReadDb, ReadSession, TimelineWaiter};
    use crate::timeline::timeline_for_event;
    use crate::workers::Projector;

    struct Pipeline {
        store: Arc<InMemoryGraphStore>,
        source: Arc<InMemoryEventSource>,
        hub: LocalHub,
        projector: Projector,
        issuer: MemberId,
    }

    impl Pipeline {
        fn new() -> Self {
            let store = Arc::new(InMemoryGraphStore::new());
            let source = Arc::new(InMemoryEventSource::new());
            let hub = LocalHub::new();
            let projector = Projector::new(store.clone(), source.clone(), Arc::new(hub.clone()));
            Self {
                store,
                source,
                hub,
                projector,
                issuer: MemberId::new(),
            }
        }

        /// Append one single-event batch and return its group id.
        fn command(&self, payload: impl Into<EventPayload>) -> Uuid {
            self.batch(vec![payload.into()])
        }

        /// Append events sharing one group, hence one timeline.
        fn batch(&self, payloads: Vec<EventPayload>) -> Uuid {
            let group = Uuid::now_v7();
            let correlation = Uuid::now_v7();
            for payload in payloads {
                self.source
                    .append(
                        "role",
                        "role",
                        payload,
                        EventMetadata {
                            group_id: Some(group),
                            command_issuer_id: Some(self.issuer),
                            correlation_id: Some(correlation),
                        },
                    )
                    .unwrap();
            }
            group
        }

        async fn session(&self) -> ReadSession {
            ReadDb::new(self.store.clone()).session().await.unwrap()
        }
    }

    fn create(role_id: RoleId, role_type: RoleType, name: &str, parent: Option<RoleId>) -> RoleCreated {
        RoleCreated {
            role_id,
            role_type,
            name: name.into(),
            purpose: String::new(),
            parent_role_id: parent,
        }
    }

    async fn timeline_of(s: &mut ReadSession, group: Uuid) -> TimelineNumber {
        s.timeline_for_group(group).await.unwrap().unwrap().number
    }

    async fn depth(s: &mut ReadSession, t: TimelineNumber, role: RoleId) -> i32 {
        s.role(t, role).await.unwrap().unwrap().depth
    }

    async fn child_ids(s: &mut ReadSession, t: TimelineNumber, role: RoleId) -> Vec<RoleId> {
        s.role_children(t, role).await.unwrap().into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn reparenting_keeps_depths_and_history() {
        let p = Pipeline::new();
        let (r0, r1, c1, c2) = (RoleId::new(), RoleId::new(), RoleId::new(), RoleId::new());

        let g_r0 = p.command(create(r0, RoleType::Circle, "R0", None));
        let g_c1 = p.command(create(c1, RoleType::Circle, "C1", Some(r0)));
        let g_c2 = p.command(create(c2, RoleType::Normal, "C2", Some(c1)));
        let g_r1 = p.command(create(r1, RoleType::Circle, "R1", None));
        let g_move = p.command(RoleChangedParent {
            role_id: c1,
            parent_role_id: Some(r1),
        });
        let g_delete = p.command(RoleDeleted { role_id: c2 });

        assert_eq!(p.projector.catch_up().await.unwrap(), 6);

        let mut s = p.session().await;
        let t_r0 = timeline_of(&mut s, g_r0).await;
        let t_c1 = timeline_of(&mut s, g_c1).await;
        let t_c2 = timeline_of(&mut s, g_c2).await;
        let pre_move = timeline_of(&mut s, g_r1).await;
        let t_move = timeline_of(&mut s, g_move).await;
        let t_delete = timeline_of(&mut s, g_delete).await;
        assert!(t_r0 < t_c1 && t_c1 < t_c2 && t_c2 < pre_move && pre_move < t_move && t_move < t_delete);
        assert_eq!(s.now(), t_delete);

        assert_eq!(depth(&mut s, t_r0, r0).await, 0);
        assert_eq!(depth(&mut s, t_c1, c1).await, 1);
        assert_eq!(depth(&mut s, t_c2, c2).await, 2);
        assert_eq!(depth(&mut s, t_move, c1).await, 1);
        assert_eq!(depth(&mut s, t_move, c2).await, 2);

        let now = s.now();
        s.check_integrity(now).await.unwrap();
        for t in [t_r0, t_c1, t_c2, pre_move, t_move] {
            s.check_integrity(t).await.unwrap();
        }

        assert!(child_ids(&mut s, now, r0).await.is_empty());
        assert_eq!(child_ids(&mut s, now, r1).await, vec![c1]);
        assert!(child_ids(&mut s, now, c1).await.is_empty());
        assert!(s.role(now, c2).await.unwrap().is_none());

        // time travel to before the move
        assert_eq!(child_ids(&mut s, pre_move, r0).await, vec![c1]);
        assert_eq!(child_ids(&mut s, pre_move, c1).await, vec![c2]);
        assert_eq!(s.role_parent(pre_move, c1).await.unwrap().map(|r| r.id), Some(r0));
        assert_eq!(s.role_parent(now, c1).await.unwrap().map(|r| r.id), Some(r1));
        assert_eq!(s.role(t_move, c2).await.unwrap().map(|r| r.name), Some("C2".to_string()));
    }

    #[tokio::test]
    async fn circles_collect_their_audit_trail() {
        let p = Pipeline::new();
        let (r0, r1, c1, c2) = (RoleId::new(), RoleId::new(), RoleId::new(), RoleId::new());

        p.command(create(r0, RoleType::Circle, "R0", None));
        let g_c1 = p.command(create(c1, RoleType::Circle, "C1", Some(r0)));
        p.command(create(c2, RoleType::Normal, "C2", Some(c1)));
        p.command(create(r1, RoleType::Circle, "R1", None));
        let g_move = p.command(RoleChangedParent {
            role_id: c1,
            parent_role_id: Some(r1),
        });
        p.command(RoleDeleted { role_id: c2 });
        p.projector.catch_up().await.unwrap();

        let mut s = p.session().await;
        let t_c1 = timeline_of(&mut s, g_c1).await;
        let t_move = timeline_of(&mut s, g_move).await;

        let r0_events = s.role_events(r0, None, 10).await.unwrap();
        assert!(!r0_events.has_more);
        let timelines: Vec<_> = r0_events.items.iter().map(|e| e.timeline).collect();
        assert_eq!(timelines, vec![t_move, t_c1]);
        assert_eq!(r0_events.items[0].data.roles_moved_out.get(&c1), Some(&r1));
        assert_eq!(
            r0_events.items[1].data.changed_roles[&c1].change_type,
            ChangeType::New
        );
        assert!(r0_events.items.iter().all(|e| e.data.issuer_id == p.issuer));

        let r1_events = s.role_events(r1, None, 10).await.unwrap();
        assert_eq!(r1_events.items.len(), 1);
        assert_eq!(r1_events.items[0].data.roles_moved_in.get(&c1), Some(&r0));

        let c1_events = s.role_events(c1, None, 1).await.unwrap();
        assert!(c1_events.has_more);
        assert_eq!(c1_events.items[0].data.changed_roles[&c2].change_type, ChangeType::Deleted);
        let older = s
            .role_events(c1, Some(c1_events.items[0].timeline), 10)
            .await
            .unwrap();
        assert_eq!(older.items.len(), 1);
        assert_eq!(older.items[0].data.changed_roles[&c2].change_type, ChangeType::New);
    }

    #[tokio::test]
    async fn lead_link_assignment_grants_permissions() {
        let p = Pipeline::new();
        let (circle, lead_link) = (RoleId::new(), RoleId::new());
        let member = MemberId::new();

        p.command(MemberCreated {
            member_id: member,
            is_admin: false,
            match_uid: Some("oidc|lee".into()),
            user_name: "lee".into(),
            full_name: "Lee".into(),
            email: "lee@example.com".into(),
        });
        p.command(create(circle, RoleType::Circle, "General", None));
        p.command(create(lead_link, RoleType::LeadLink, "Lead Link", Some(circle)));
        p.command(CircleLeadLinkMemberSet {
            role_id: circle,
            lead_link_role_id: lead_link,
            member_id: member,
        });
        p.projector.catch_up().await.unwrap();

        let mut s = p.session().await;
        let now = s.now();
        let permissions = s.circle_permissions(now, circle, member).await.unwrap();
        assert!(permissions.is_lead_link && permissions.is_root);
        assert!(permissions.can_manage_roles());

        assert_eq!(s.member_by_match_uid(now, "oidc|lee").await.unwrap().map(|m| m.id), Some(member));
        let circles: Vec<_> = s.member_circles(now, member).await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(circles, vec![circle]);
        // core roles stay out of the audit trail
        assert!(s.role_events(circle, None, 10).await.unwrap().items.is_empty());
        s.check_integrity(now).await.unwrap();
    }

    #[tokio::test]
    async fn member_re_added_within_one_group_keeps_one_assignment() {
        let p = Pipeline::new();
        let (circle, role) = (RoleId::new(), RoleId::new());
        let member = MemberId::new();

        p.command(MemberCreated {
            member_id: member,
            is_admin: false,
            match_uid: None,
            user_name: "sam".into(),
            full_name: "Sam".into(),
            email: "sam@example.com".into(),
        });
        p.command(create(circle, RoleType::Circle, "General", None));
        p.command(create(role, RoleType::Normal, "Scribe", Some(circle)));
        let added = |focus: &str| {
            EventPayload::from(RoleMemberAdded {
                role_id: role,
                member_id: member,
                focus: Some(focus.into()),
                no_core_member: false,
            })
        };
        let removed = EventPayload::from(RoleMemberRemoved {
            role_id: role,
            member_id: member,
        });
        let g_first = p.command(added("minutes"));
        let g_churn = p.batch(vec![removed.clone(), added("agenda"), removed, added("notes")]);
        assert_eq!(p.projector.catch_up().await.unwrap(), 8);

        let mut s = p.session().await;
        let t_first = timeline_of(&mut s, g_first).await;
        let t_churn = timeline_of(&mut s, g_churn).await;
        for (t, focus) in [(t_first, "minutes"), (t_churn, "notes")] {
            let members = s.role_members(t, role).await.unwrap();
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].member.id, member);
            assert_eq!(members[0].assignment.focus.as_deref(), Some(focus));
            s.check_integrity(t).await.unwrap();
        }
        assert_eq!(s.member_roles(t_churn, member).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reapplying_a_creation_without_checkpoint_is_a_conflict() {
        let p = Pipeline::new();
        let role = RoleId::new();
        p.command(create(role, RoleType::Circle, "General", None));
        let event = p.source.get_events(0, 1).await.unwrap().remove(0);

        assert!(p.projector.apply_event(&event).await.unwrap());
        // the checkpoint guard makes a regular replay a no-op
        assert!(!p.projector.apply_event(&event).await.unwrap());

        // a retry that bypasses the guard must not produce a second current version
        let mut tx = p.store.begin().await.unwrap();
        let payload = event.decode().unwrap();
        let timeline = timeline_for_event(tx.as_mut(), &event).await.unwrap();
        let err = projections::project(tx.as_mut(), timeline.number, &event, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Store(StoreError::Conflict(_))));
        tx.rollback().await.unwrap();

        let mut s = p.session().await;
        let now = s.now();
        assert!(s.role(now, role).await.unwrap().is_some());
        s.check_integrity(now).await.unwrap();
    }

    #[tokio::test]
    async fn waiter_sees_the_projected_group() {
        let p = Pipeline::new();
        let waiter = TimelineWaiter::new(p.store.clone(), Arc::new(p.hub.clone()))
            .with_recheck_interval(Duration::from_secs(30));
        let group = p.command(create(RoleId::new(), RoleType::Circle, "General", None));

        let projector = p.projector;
        let apply = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            projector.catch_up().await.unwrap()
        });

        let timeline = waiter
            .wait_for_group(group, Duration::from_secs(20), std::future::pending())
            .await
            .unwrap();
        assert_eq!(timeline.group_id, group);
        assert_eq!(apply.await.unwrap(), 1);
    }
}
