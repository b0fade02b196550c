//! What a member may do on a circle, derived from the graph at a timeline.

use circlegraph_core::{DomainError, MemberId, RoleId, RoleType, TimelineNumber};

use super::{QueryResult, ReadSession};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CirclePermissions {
    pub is_admin: bool,
    /// Fills the lead link role of the circle itself.
    pub is_lead_link: bool,
    /// Fills the lead link role of the circle's parent.
    pub is_parent_lead_link: bool,
    pub is_root: bool,
}

impl CirclePermissions {
    /// Change the circle's structure (roles, domains, accountabilities).
    pub fn can_manage_roles(&self) -> bool {
        self.is_admin || self.is_lead_link
    }

    /// Assign members to the circle's roles.
    pub fn can_assign_members(&self) -> bool {
        self.is_admin || self.is_lead_link
    }

    /// Assign the circle's own lead link. Done from the parent circle, or by
    /// an admin on the root circle which has no parent.
    pub fn can_assign_lead_link(&self) -> bool {
        self.is_parent_lead_link || (self.is_admin && self.is_root)
    }
}

pub(super) async fn compute(
    session: &mut ReadSession,
    t: TimelineNumber,
    role_id: RoleId,
    member_id: MemberId,
) -> QueryResult<CirclePermissions> {
    let circle = session
        .role(t, role_id)
        .await?
        .ok_or(DomainError::RoleNotFound(role_id))?;

    let mut permissions = CirclePermissions {
        is_root: circle.depth == 0,
        ..CirclePermissions::default()
    };
    let Some(member) = session.member(t, member_id).await? else {
        return Ok(permissions);
    };
    permissions.is_admin = member.is_admin;
    permissions.is_lead_link = fills_lead_link(session, t, circle.id, member_id).await?;
    if let Some(parent) = session.role_parent(t, circle.id).await? {
        permissions.is_parent_lead_link = fills_lead_link(session, t, parent.id, member_id).await?;
    }
    Ok(permissions)
}

async fn fills_lead_link(
    session: &mut ReadSession,
    t: TimelineNumber,
    circle: RoleId,
    member_id: MemberId,
) -> QueryResult<bool> {
    let children = session.role_children(t, circle).await?;
    let Some(lead_link) = children.into_iter().find(|r| r.role_type == RoleType::LeadLink) else {
        return Ok(false);
    };
    let members = session.role_members(t, lead_link.id).await?;
    Ok(members.iter().any(|m| m.member.id == member_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use circlegraph_core::{Edge, EdgeClass, Member, Role, Timeline, Vertex};
    use uuid::Uuid;

    use super::*;
    use crate::graph::{GraphStore, InMemoryGraphStore};
    use crate::query::{QueryError, ReadDb};

    struct Org {
        store: Arc<InMemoryGraphStore>,
        t: TimelineNumber,
        root: RoleId,
        sales: RoleId,
        admin: MemberId,
        root_lead: MemberId,
        sales_lead: MemberId,
    }

    fn role(name: &str, role_type: RoleType, depth: i32) -> Role {
        Role {
            id: RoleId::new(),
            role_type,
            depth,
            name: name.to_string(),
            purpose: String::new(),
        }
    }

    fn member(name: &str, is_admin: bool) -> Member {
        Member {
            id: MemberId::new(),
            is_admin,
            user_name: name.to_string(),
            full_name: name.to_string(),
            email: format!("{name}@example.com"),
        }
    }

    async fn org() -> Org {
        let store = Arc::new(InMemoryGraphStore::new());
        let t = TimelineNumber::new(10);
        let root = role("General", RoleType::Circle, 0);
        let root_ll = role("Lead Link", RoleType::LeadLink, 1);
        let sales = role("Sales", RoleType::Circle, 1);
        let sales_ll = role("Lead Link", RoleType::LeadLink, 2);
        let admin = member("admin", true);
        let root_lead = member("rita", false);
        let sales_lead = member("sam", false);

        let mut tx = store.begin().await.unwrap();
        tx.insert_timeline(&Timeline::allocate(None, t.timestamp(), Uuid::now_v7(), None, None))
            .await
            .unwrap();
        for r in [&root, &root_ll, &sales, &sales_ll] {
            tx.insert_vertex(t, &Vertex::Role(r.clone())).await.unwrap();
        }
        for m in [&admin, &root_lead, &sales_lead] {
            tx.insert_vertex(t, &Vertex::Member(m.clone())).await.unwrap();
        }
        for (child, parent) in [(root_ll.id, root.id), (sales.id, root.id), (sales_ll.id, sales.id)] {
            tx.add_edge(t, &Edge::new(EdgeClass::RoleParent, child, parent)).await.unwrap();
        }
        tx.add_edge(t, &Edge::new(EdgeClass::RoleMember, root_lead.id, root_ll.id)).await.unwrap();
        tx.add_edge(t, &Edge::new(EdgeClass::RoleMember, sales_lead.id, sales_ll.id)).await.unwrap();
        tx.commit().await.unwrap();

        Org {
            store,
            t,
            root: root.id,
            sales: sales.id,
            admin: admin.id,
            root_lead: root_lead.id,
            sales_lead: sales_lead.id,
        }
    }

    #[tokio::test]
    async fn lead_links_of_circle_and_parent() {
        let org = org().await;
        let mut s = ReadDb::new(org.store.clone()).session().await.unwrap();

        let p = s.circle_permissions(org.t, org.sales, org.sales_lead).await.unwrap();
        assert!(p.is_lead_link && !p.is_parent_lead_link && !p.is_root);
        assert!(p.can_manage_roles());
        assert!(!p.can_assign_lead_link());

        let p = s.circle_permissions(org.t, org.sales, org.root_lead).await.unwrap();
        assert!(!p.is_lead_link && p.is_parent_lead_link);
        assert!(p.can_assign_lead_link());

        let p = s.circle_permissions(org.t, org.root, org.admin).await.unwrap();
        assert_eq!(
            p,
            CirclePermissions {
                is_admin: true,
                is_root: true,
                ..CirclePermissions::default()
            }
        );
        assert!(p.can_assign_lead_link());
    }

    #[tokio::test]
    async fn unknown_circle_or_member() {
        let org = org().await;
        let mut s = ReadDb::new(org.store.clone()).session().await.unwrap();

        let err = s
            .circle_permissions(org.t, RoleId::new(), org.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Domain(DomainError::RoleNotFound(_))));

        let p = s.circle_permissions(org.t, org.sales, MemberId::new()).await.unwrap();
        assert!(!p.is_admin && !p.is_lead_link && !p.is_parent_lead_link);
    }
}
