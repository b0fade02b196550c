//! Point-in-time read facade over the graph store.
//!
//! A [`ReadSession`] is one read-only store transaction. The current timeline
//! is read once when the session opens and stays fixed for its lifetime, so
//! every answer of a session comes from the same snapshot. All lookups take
//! the timeline to read at explicitly; [`ReadSession::now`] is the session's
//! current one.
//!
//! Absent rows are `None` / empty, not errors. Paginated lists fetch one
//! row more than requested to fill [`Page::has_more`].

pub mod auth;
pub mod permissions;
pub mod wait;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use circlegraph_core::{
    Accountability, Direction, Domain, DomainError, EdgeClass, EdgePayload, Member, MemberAvatar,
    MemberId, Role, RoleAdditionalContent, RoleEvent, RoleId, RoleMemberEdge, Tension, TensionId,
    Timeline, TimelineNumber,
};

use crate::graph::{Filter, GraphStore, GraphTx, StoreError, TimelineRange, VertexQuery};

pub use auth::PasswordVerifier;
pub use permissions::CirclePermissions;
pub use wait::{TimelineWaiter, WaitError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}

pub type QueryResult<T> = Result<T, QueryError>;

/// One page of a list, newest/first-ordered per the method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Trim a fetch of `limit + 1` rows down to `limit`.
    fn from_overfetch(mut items: Vec<T>, limit: usize) -> Self {
        let has_more = items.len() > limit;
        items.truncate(limit);
        Self { items, has_more }
    }
}

/// A member filling a role, with the assignment details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMember {
    pub member: Member,
    pub assignment: RoleMemberEdge,
}

/// A role filled by a member, with the assignment details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRole {
    pub role: Role,
    pub assignment: RoleMemberEdge,
}

fn assignment(payload: EdgePayload) -> RoleMemberEdge {
    payload.role_member().cloned().unwrap_or_default()
}

/// Opens read sessions.
#[derive(Clone)]
pub struct ReadDb {
    store: Arc<dyn GraphStore>,
}

impl ReadDb {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn session(&self) -> QueryResult<ReadSession> {
        let mut tx = self.store.begin_read().await?;
        let current = tx.current_timeline().await?;
        Ok(ReadSession { tx, current })
    }
}

pub struct ReadSession {
    tx: Box<dyn GraphTx>,
    current: Option<Timeline>,
}

impl ReadSession {
    /// Current timeline as of session start.
    pub fn current_timeline(&self) -> Option<&Timeline> {
        self.current.as_ref()
    }

    /// Current timeline number, or [`TimelineNumber::ZERO`] (nothing visible)
    /// when nothing was projected yet.
    pub fn now(&self) -> TimelineNumber {
        self.current
            .as_ref()
            .map(|t| t.number)
            .unwrap_or(TimelineNumber::ZERO)
    }

    pub async fn close(self) -> QueryResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    // ── timelines ──────────────────────────────────────────────────────────

    pub async fn timeline(&mut self, number: TimelineNumber) -> QueryResult<Option<Timeline>> {
        Ok(self.tx.timeline(number).await?)
    }

    pub async fn timeline_for_group(&mut self, group_id: Uuid) -> QueryResult<Option<Timeline>> {
        Ok(self.tx.timeline_for_group(group_id).await?)
    }

    /// Timelines newest first.
    pub async fn timelines(&mut self, range: TimelineRange, limit: usize) -> QueryResult<Page<Timeline>> {
        let found = self.tx.timelines(range, limit.saturating_add(1)).await?;
        Ok(Page::from_overfetch(found, limit))
    }

    // ── roles ──────────────────────────────────────────────────────────────

    /// The role at depth 0.
    ///
    /// # Panics
    ///
    /// Panics when more than one root role is visible at `t`.
    pub async fn root_role(&mut self, t: TimelineNumber) -> QueryResult<Option<Role>> {
        let query = VertexQuery::all().filter(Filter::eq("depth", 0i64)).limit(2);
        let mut roots = self.tx.vertices::<Role>(t, &query).await?;
        if roots.len() > 1 {
            panic!("more than one root role at timeline {t}");
        }
        Ok(roots.pop())
    }

    pub async fn role(&mut self, t: TimelineNumber, id: RoleId) -> QueryResult<Option<Role>> {
        Ok(self.tx.vertex::<Role>(t, id).await?)
    }

    pub async fn role_parent(&mut self, t: TimelineNumber, id: RoleId) -> QueryResult<Option<Role>> {
        let parents = self
            .tx
            .connected::<Role>(t, id, EdgeClass::RoleParent, Direction::Out, &VertexQuery::all())
            .await?;
        Ok(parents.into_iter().next().map(|(role, _)| role))
    }

    /// Child roles ordered by name.
    pub async fn role_children(&mut self, t: TimelineNumber, id: RoleId) -> QueryResult<Vec<Role>> {
        let query = VertexQuery::all().order_by("name", false);
        let children = self
            .tx
            .connected::<Role>(t, id, EdgeClass::RoleParent, Direction::In, &query)
            .await?;
        Ok(children.into_iter().map(|(role, _)| role).collect())
    }

    pub async fn role_domains(&mut self, t: TimelineNumber, id: RoleId) -> QueryResult<Vec<Domain>> {
        let found = self
            .tx
            .connected::<Domain>(t, id, EdgeClass::RoleDomain, Direction::In, &VertexQuery::all())
            .await?;
        Ok(found.into_iter().map(|(d, _)| d).collect())
    }

    pub async fn role_accountabilities(&mut self, t: TimelineNumber, id: RoleId) -> QueryResult<Vec<Accountability>> {
        let found = self
            .tx
            .connected::<Accountability>(t, id, EdgeClass::RoleAccountability, Direction::In, &VertexQuery::all())
            .await?;
        Ok(found.into_iter().map(|(a, _)| a).collect())
    }

    pub async fn role_additional_content(
        &mut self,
        t: TimelineNumber,
        id: RoleId,
    ) -> QueryResult<Option<RoleAdditionalContent>> {
        Ok(self.tx.vertex::<RoleAdditionalContent>(t, id).await?)
    }

    /// Members filling the role, ordered by user name.
    pub async fn role_members(&mut self, t: TimelineNumber, id: RoleId) -> QueryResult<Vec<RoleMember>> {
        let query = VertexQuery::all().order_by("username", false);
        let found = self
            .tx
            .connected::<Member>(t, id, EdgeClass::RoleMember, Direction::In, &query)
            .await?;
        Ok(found
            .into_iter()
            .map(|(member, payload)| RoleMember {
                member,
                assignment: assignment(payload),
            })
            .collect())
    }

    pub async fn circle_direct_members(&mut self, t: TimelineNumber, id: RoleId) -> QueryResult<Vec<Member>> {
        let query = VertexQuery::all().order_by("username", false);
        let found = self
            .tx
            .connected::<Member>(t, id, EdgeClass::CircleDirectMember, Direction::In, &query)
            .await?;
        Ok(found.into_iter().map(|(m, _)| m).collect())
    }

    pub async fn role_tensions(&mut self, t: TimelineNumber, id: RoleId) -> QueryResult<Vec<Tension>> {
        let found = self
            .tx
            .connected::<Tension>(t, id, EdgeClass::TensionRole, Direction::In, &VertexQuery::all())
            .await?;
        Ok(found.into_iter().map(|(tension, _)| tension).collect())
    }

    /// Audit records of a circle strictly older than `before`, newest first.
    pub async fn role_events(
        &mut self,
        id: RoleId,
        before: Option<TimelineNumber>,
        limit: usize,
    ) -> QueryResult<Page<RoleEvent>> {
        let found = self.tx.role_events(id, before, limit.saturating_add(1)).await?;
        Ok(Page::from_overfetch(found, limit))
    }

    // ── members ────────────────────────────────────────────────────────────

    pub async fn member(&mut self, t: TimelineNumber, id: MemberId) -> QueryResult<Option<Member>> {
        Ok(self.tx.vertex::<Member>(t, id).await?)
    }

    pub async fn member_by_user_name(&mut self, t: TimelineNumber, user_name: &str) -> QueryResult<Option<Member>> {
        self.member_by_field(t, "username", user_name).await
    }

    pub async fn member_by_email(&mut self, t: TimelineNumber, email: &str) -> QueryResult<Option<Member>> {
        self.member_by_field(t, "email", email).await
    }

    async fn member_by_field(&mut self, t: TimelineNumber, field: &str, value: &str) -> QueryResult<Option<Member>> {
        let query = VertexQuery::all().filter(Filter::eq(field, value)).limit(1);
        Ok(self.tx.vertices::<Member>(t, &query).await?.pop())
    }

    pub async fn member_by_match_uid(&mut self, t: TimelineNumber, match_uid: &str) -> QueryResult<Option<Member>> {
        match self.tx.member_by_match_uid(match_uid).await? {
            Some(id) => self.member(t, id).await,
            None => Ok(None),
        }
    }

    /// Members ordered by user name, optionally matching `search` in user
    /// name, full name or email, starting after the user name `after`.
    pub async fn members(
        &mut self,
        t: TimelineNumber,
        search: Option<&str>,
        after: Option<&str>,
        limit: usize,
    ) -> QueryResult<Page<Member>> {
        let mut query = VertexQuery::all()
            .order_by("username", false)
            .limit(limit.saturating_add(1));
        if let Some(search) = search.filter(|s| !s.is_empty()) {
            query = query.filter(Filter::Or(vec![
                Filter::contains("username", search),
                Filter::contains("fullname", search),
                Filter::contains("email", search),
            ]));
        }
        if let Some(after) = after {
            query = query.filter(Filter::gt("username", after));
        }
        let found = self.tx.vertices::<Member>(t, &query).await?;
        Ok(Page::from_overfetch(found, limit))
    }

    /// Roles the member fills, ordered by role name.
    pub async fn member_roles(&mut self, t: TimelineNumber, id: MemberId) -> QueryResult<Vec<MemberRole>> {
        let query = VertexQuery::all().order_by("name", false);
        let found = self
            .tx
            .connected::<Role>(t, id, EdgeClass::RoleMember, Direction::Out, &query)
            .await?;
        Ok(found
            .into_iter()
            .map(|(role, payload)| MemberRole {
                role,
                assignment: assignment(payload),
            })
            .collect())
    }

    /// Circles the member belongs to: directly, or by filling one of their roles.
    pub async fn member_circles(&mut self, t: TimelineNumber, id: MemberId) -> QueryResult<Vec<Role>> {
        let mut circles: BTreeMap<RoleId, Role> = BTreeMap::new();

        let direct = self
            .tx
            .connected::<Role>(t, id, EdgeClass::CircleDirectMember, Direction::Out, &VertexQuery::all())
            .await?;
        circles.extend(direct.into_iter().map(|(circle, _)| (circle.id, circle)));

        let roles: Vec<Uuid> = self
            .member_roles(t, id)
            .await?
            .into_iter()
            .map(|r| r.role.id.into())
            .collect();
        let parents = self
            .tx
            .fetch_connected(t, &roles, EdgeClass::RoleParent, Direction::Out, &VertexQuery::all())
            .await?;
        for connected in parents.into_values().flatten() {
            if let circlegraph_core::Vertex::Role(circle) = connected.vertex {
                circles.insert(circle.id, circle);
            }
        }
        Ok(circles.into_values().collect())
    }

    pub async fn member_tensions(&mut self, t: TimelineNumber, id: MemberId) -> QueryResult<Vec<Tension>> {
        let found = self
            .tx
            .connected::<Tension>(t, id, EdgeClass::TensionMember, Direction::In, &VertexQuery::all())
            .await?;
        Ok(found.into_iter().map(|(tension, _)| tension).collect())
    }

    pub async fn member_avatar(&mut self, t: TimelineNumber, id: MemberId) -> QueryResult<Option<MemberAvatar>> {
        Ok(self.tx.vertex::<MemberAvatar>(t, id).await?)
    }

    // ── tensions ───────────────────────────────────────────────────────────

    pub async fn tension(&mut self, t: TimelineNumber, id: TensionId) -> QueryResult<Option<Tension>> {
        Ok(self.tx.vertex::<Tension>(t, id).await?)
    }

    pub async fn tension_member(&mut self, t: TimelineNumber, id: TensionId) -> QueryResult<Option<Member>> {
        let found = self
            .tx
            .connected::<Member>(t, id, EdgeClass::TensionMember, Direction::Out, &VertexQuery::all())
            .await?;
        Ok(found.into_iter().next().map(|(m, _)| m))
    }

    pub async fn tension_role(&mut self, t: TimelineNumber, id: TensionId) -> QueryResult<Option<Role>> {
        let found = self
            .tx
            .connected::<Role>(t, id, EdgeClass::TensionRole, Direction::Out, &VertexQuery::all())
            .await?;
        Ok(found.into_iter().next().map(|(r, _)| r))
    }

    // ── derived ────────────────────────────────────────────────────────────

    pub async fn circle_permissions(
        &mut self,
        t: TimelineNumber,
        role_id: RoleId,
        member_id: MemberId,
    ) -> QueryResult<CirclePermissions> {
        permissions::compute(self, t, role_id, member_id).await
    }

    /// See [`GraphTx::check_integrity`].
    pub async fn check_integrity(&mut self, t: TimelineNumber) -> QueryResult<()> {
        Ok(self.tx.check_integrity(t).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circlegraph_core::{Edge, RoleType, Vertex};

    use crate::graph::InMemoryGraphStore;

    fn member(name: &str) -> Member {
        Member {
            id: MemberId::new(),
            is_admin: false,
            user_name: name.to_string(),
            full_name: name.to_uppercase(),
            email: format!("{name}@example.com"),
        }
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

    async fn seeded(members: &[Member]) -> (Arc<InMemoryGraphStore>, TimelineNumber) {
        let store = Arc::new(InMemoryGraphStore::new());
        let mut tx = store.begin().await.unwrap();
        let t = TimelineNumber::new(100);
        tx.insert_timeline(&Timeline::allocate(None, t.timestamp(), Uuid::now_v7(), None, None))
            .await
            .unwrap();
        for m in members {
            tx.insert_vertex(t, &Vertex::Member(m.clone())).await.unwrap();
        }
        tx.commit().await.unwrap();
        (store, t)
    }

    #[tokio::test]
    async fn members_page_by_user_name_with_search() {
        let all: Vec<Member> = ["dora", "alice", "carol", "bob", "carlos"]
            .iter()
            .map(|n| member(n))
            .collect();
        let (store, t) = seeded(&all).await;
        let db = ReadDb::new(store);
        let mut s = db.session().await.unwrap();
        assert_eq!(s.now(), t);

        let first = s.members(t, None, None, 2).await.unwrap();
        let names: Vec<_> = first.items.iter().map(|m| m.user_name.as_str()).collect();
        assert_eq!(names, ["alice", "bob"]);
        assert!(first.has_more);

        let rest = s.members(t, None, Some("bob"), 10).await.unwrap();
        assert_eq!(rest.items.len(), 3);
        assert!(!rest.has_more);

        let everyone = s.members(t, None, None, usize::MAX).await.unwrap();
        assert_eq!(everyone.items.len(), 5);
        assert!(!everyone.has_more);

        let found = s.members(t, Some("CAR"), None, 10).await.unwrap();
        let names: Vec<_> = found.items.iter().map(|m| m.user_name.as_str()).collect();
        assert_eq!(names, ["carlos", "carol"]);
    }

    #[tokio::test]
    async fn unique_member_lookups() {
        let ada = member("ada");
        let (store, t) = seeded(std::slice::from_ref(&ada)).await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.set_match_uid(ada.id, "oidc|ada").await.unwrap();
            tx.commit().await.unwrap();
        }
        let mut s = ReadDb::new(store).session().await.unwrap();

        assert_eq!(s.member_by_user_name(t, "ada").await.unwrap(), Some(ada.clone()));
        assert_eq!(s.member_by_email(t, "ada@example.com").await.unwrap(), Some(ada.clone()));
        assert_eq!(s.member_by_match_uid(t, "oidc|ada").await.unwrap(), Some(ada));
        assert_eq!(s.member_by_user_name(t, "nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn member_circles_cover_direct_and_role_membership() {
        let ada = member("ada");
        let (store, t) = seeded(std::slice::from_ref(&ada)).await;
        let general = role("General", RoleType::Circle, 0);
        let sales = role("Sales", RoleType::Circle, 1);
        let seller = role("Seller", RoleType::Normal, 2);
        {
            let mut tx = store.begin().await.unwrap();
            for r in [&general, &sales, &seller] {
                tx.insert_vertex(t, &Vertex::Role(r.clone())).await.unwrap();
            }
            tx.add_edge(t, &Edge::new(EdgeClass::RoleParent, sales.id, general.id)).await.unwrap();
            tx.add_edge(t, &Edge::new(EdgeClass::RoleParent, seller.id, sales.id)).await.unwrap();
            tx.add_edge(t, &Edge::new(EdgeClass::CircleDirectMember, ada.id, general.id))
                .await
                .unwrap();
            tx.add_edge(
                t,
                &Edge::new(EdgeClass::RoleMember, ada.id, seller.id).with_role_member(RoleMemberEdge {
                    focus: Some("EMEA".into()),
                    ..RoleMemberEdge::default()
                }),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let mut s = ReadDb::new(store).session().await.unwrap();
        let mut circles: Vec<_> = s.member_circles(t, ada.id).await.unwrap().into_iter().map(|c| c.id).collect();
        circles.sort();
        let mut expected = vec![general.id, sales.id];
        expected.sort();
        assert_eq!(circles, expected);

        let roles = s.member_roles(t, ada.id).await.unwrap();
        assert_eq!(roles[0].assignment.focus.as_deref(), Some("EMEA"));
        let members = s.role_members(t, seller.id).await.unwrap();
        assert_eq!(members[0].member.id, ada.id);

        assert_eq!(s.root_role(t).await.unwrap().map(|r| r.id), Some(general.id));
        let children = s.role_children(t, general.id).await.unwrap();
        assert_eq!(children, vec![sales]);
        s.check_integrity(t).await.unwrap();
    }

    #[tokio::test]
    #[should_panic(expected = "more than one root role")]
    async fn two_roots_abort() {
        let (store, t) = seeded(&[]).await;
        {
            let mut tx = store.begin().await.unwrap();
            for name in ["a", "b"] {
                tx.insert_vertex(t, &Vertex::Role(role(name, RoleType::Circle, 0)))
                    .await
                    .unwrap();
            }
            tx.commit().await.unwrap();
        }
        let mut s = ReadDb::new(store).session().await.unwrap();
        let _ = s.root_role(t).await;
    }

    #[tokio::test]
    async fn session_keeps_its_snapshot() {
        let (store, t) = seeded(&[]).await;
        let mut s = ReadDb::new(store.clone()).session().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let later = TimelineNumber::new(200);
        tx.insert_timeline(&Timeline::allocate(Some(t), later.timestamp(), Uuid::now_v7(), None, None))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(s.now(), t);
        assert!(s.timeline(later).await.unwrap().is_none());
        let page = s.timelines(TimelineRange::default(), 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        s.close().await.unwrap();

        let mut fresh = ReadDb::new(store).session().await.unwrap();
        assert_eq!(fresh.now(), later);
        let page = fresh.timelines(TimelineRange::default(), 1).await.unwrap();
        assert!(page.has_more);
        let page = fresh.timelines(TimelineRange::default(), usize::MAX).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_more);
    }
}
