//! Postgres-backed coordination: advisory locks and LISTEN/NOTIFY.
//!
//! In-process counterparts live in `circlegraph-events`; the projector binary
//! picks one family at start-up and injects it.

pub mod pg_lock;
pub mod pg_notify;

pub use pg_lock::{PgAdvisoryLock, advisory_key};
pub use pg_notify::{PgChangeListener, PgNotifier};
