//! Local password authentication against the projected members.

use circlegraph_core::{DomainError, Member, TimelineNumber};
use tracing::debug;

use super::{QueryResult, ReadSession};

/// Checks a clear-text password against a stored hash.
///
/// Hashing is owned by the command side; the read side only needs to verify.
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, password: &str, hash: &str) -> bool;
}

impl ReadSession {
    /// Resolve `login` (a user name, or an email when it contains `@`) and
    /// verify `password`.
    ///
    /// Every failure is [`DomainError::Unauthorized`], whether the member is
    /// unknown, has no local password or gave a wrong one.
    pub async fn authenticate_local(
        &mut self,
        t: TimelineNumber,
        login: &str,
        password: &str,
        verifier: &dyn PasswordVerifier,
    ) -> QueryResult<Member> {
        let member = if login.contains('@') {
            self.member_by_email(t, login).await?
        } else {
            self.member_by_user_name(t, login).await?
        };
        let Some(member) = member else {
            debug!("authentication failed: unknown login");
            return Err(unauthorized());
        };
        let Some(hash) = self.tx.password_hash(member.id).await? else {
            debug!(member_id = %member.id, "authentication failed: no local password");
            return Err(unauthorized());
        };
        if !verifier.verify(password, &hash) {
            debug!(member_id = %member.id, "authentication failed: wrong password");
            return Err(unauthorized());
        }
        Ok(member)
    }
}

fn unauthorized() -> super::QueryError {
    DomainError::Unauthorized.into()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use circlegraph_core::{MemberId, Timeline, Vertex};
    use uuid::Uuid;

    use super::*;
    use crate::graph::{GraphStore, InMemoryGraphStore};
    use crate::query::{QueryError, ReadDb};

    /// Stores passwords reversed; enough to tell right from wrong.
    struct Reversed;

    impl PasswordVerifier for Reversed {
        fn verify(&self, password: &str, hash: &str) -> bool {
            password.chars().rev().collect::<String>() == hash
        }
    }

    async fn store_with(members: &[(Member, Option<&str>)]) -> (Arc<InMemoryGraphStore>, TimelineNumber) {
        let store = Arc::new(InMemoryGraphStore::new());
        let t = TimelineNumber::new(5);
        let mut tx = store.begin().await.unwrap();
        tx.insert_timeline(&Timeline::allocate(None, t.timestamp(), Uuid::now_v7(), None, None))
            .await
            .unwrap();
        for (member, hash) in members {
            tx.insert_vertex(t, &Vertex::Member(member.clone())).await.unwrap();
            if let Some(hash) = hash {
                tx.set_password(member.id, hash).await.unwrap();
            }
        }
        tx.commit().await.unwrap();
        (store, t)
    }

    fn member(name: &str) -> Member {
        Member {
            id: MemberId::new(),
            is_admin: false,
            user_name: name.to_string(),
            full_name: name.to_string(),
            email: format!("{name}@example.com"),
        }
    }

    fn is_unauthorized(result: QueryResult<Member>) -> bool {
        matches!(result, Err(QueryError::Domain(DomainError::Unauthorized)))
    }

    #[tokio::test]
    async fn login_by_user_name_or_email() {
        let ada = member("ada");
        let (store, t) = store_with(&[(ada.clone(), Some("terces"))]).await;
        let mut s = ReadDb::new(store).session().await.unwrap();

        let by_name = s.authenticate_local(t, "ada", "secret", &Reversed).await.unwrap();
        assert_eq!(by_name, ada);
        let by_email = s
            .authenticate_local(t, "ada@example.com", "secret", &Reversed)
            .await
            .unwrap();
        assert_eq!(by_email, ada);
    }

    #[tokio::test]
    async fn failures_are_indistinguishable() {
        let (store, t) = store_with(&[(member("ada"), Some("terces")), (member("bob"), None)]).await;
        let mut s = ReadDb::new(store).session().await.unwrap();

        assert!(is_unauthorized(s.authenticate_local(t, "ada", "wrong", &Reversed).await));
        assert!(is_unauthorized(s.authenticate_local(t, "nobody", "secret", &Reversed).await));
        assert!(is_unauthorized(s.authenticate_local(t, "bob", "", &Reversed).await));
    }
}
