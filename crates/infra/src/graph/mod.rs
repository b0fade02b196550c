//! Bitemporal graph store boundary.
//!
//! Every vertex and edge row carries a `[start, end]` timeline interval
//! (inclusive on both ends, `end = None` meaning "current"). A row is
//! visible at timeline `T` iff `start <= T` and (`end` is `None` or
//! `end >= T`). Visible rows are never physically removed:
//!
//! - insert: new row starting at `T`
//! - update: close the current row at `T - 1`, insert a new row at `T`
//! - delete: close the current row at `T - 1`
//!
//! A current row that itself started at `T` is dropped rather than closed, so
//! an add, remove and re-add of the same key within one timeline leaves one
//! row and never a row whose end precedes its start.
//!
//! As a consequence a point-in-time read is a pure predicate on the interval
//! columns and the full history stays queryable.
//!
//! ## Transactions
//!
//! All access goes through a [`GraphTx`]. A write transaction is what the
//! projector applies one event in, together with the checkpoint advance; a
//! read transaction is a consistent snapshot for the life of a query session.
//!
//! ## Backends
//!
//! - [`InMemoryGraphStore`]: tests/dev, single process
//! - [`PgGraphStore`]: Postgres, one table per vertex and edge class

pub mod filter;
pub mod in_memory;
pub mod postgres;
pub mod schema;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use circlegraph_core::{
    Direction, Edge, EdgeClass, EdgePayload, MemberId, RoleEvent, RoleId, Timeline,
    TimelineNumber, Vertex, VertexClass, VertexKind,
};

pub use filter::{Filter, OrderBy, Value, VertexQuery};
pub use in_memory::InMemoryGraphStore;
pub use postgres::PgGraphStore;

/// Graph store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The query could not be built (unknown field, wrong value kind).
    #[error("invalid query: {0}")]
    QueryBuild(String),

    /// The backend failed while executing `operation`.
    #[error("store failure in {operation}: {message}")]
    Execution { operation: String, message: String },

    /// A uniqueness constraint was violated, e.g. a second current version of an id.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row could not be mapped back to a domain value.
    #[error("failed to decode row: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn execution(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A target vertex reached through an edge, with the edge payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedVertex {
    /// Id the traversal started from.
    pub source: Uuid,
    pub vertex: Vertex,
    pub payload: EdgePayload,
}

/// Bounds for paging through timelines, newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineRange {
    /// Only timelines strictly older than this.
    pub before: Option<TimelineNumber>,
    /// Only timelines strictly newer than this.
    pub after: Option<TimelineNumber>,
}

/// Entry point of a graph store backend.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Begin a write transaction. Write transactions are serialized.
    async fn begin(&self) -> StoreResult<Box<dyn GraphTx>>;

    /// Begin a read-only, snapshot-consistent transaction.
    async fn begin_read(&self) -> StoreResult<Box<dyn GraphTx>>;
}

/// One store transaction.
///
/// Required methods are the backend primitives. The provided methods build
/// the update/delete patterns and the integrity audit on top of them, so both
/// backends share those semantics.
#[async_trait]
pub trait GraphTx: Send {
    // ── timelines ──────────────────────────────────────────────────────────

    async fn current_timeline(&mut self) -> StoreResult<Option<Timeline>>;

    async fn timeline(&mut self, number: TimelineNumber) -> StoreResult<Option<Timeline>>;

    async fn timeline_for_group(&mut self, group_id: Uuid) -> StoreResult<Option<Timeline>>;

    /// Timelines within `range`, newest first, at most `limit`.
    async fn timelines(&mut self, range: TimelineRange, limit: usize) -> StoreResult<Vec<Timeline>>;

    async fn insert_timeline(&mut self, timeline: &Timeline) -> StoreResult<()>;

    // ── checkpoint ─────────────────────────────────────────────────────────

    /// Sequence number of the last applied event (0 when none).
    async fn checkpoint(&mut self) -> StoreResult<i64>;

    async fn set_checkpoint(&mut self, sequence_number: i64) -> StoreResult<()>;

    // ── vertices ───────────────────────────────────────────────────────────

    /// Vertices of `class` visible at `t`.
    async fn fetch_vertices(
        &mut self,
        t: TimelineNumber,
        class: VertexClass,
        query: &VertexQuery,
    ) -> StoreResult<Vec<Vertex>>;

    /// Targets reachable from `sources` along `class` in `direction`, visible
    /// at `t` together with the edge, grouped by source id.
    ///
    /// The target class is implied by the edge class and direction; `query`
    /// filters and orders the targets within each group.
    async fn fetch_connected(
        &mut self,
        t: TimelineNumber,
        sources: &[Uuid],
        class: EdgeClass,
        direction: Direction,
        query: &VertexQuery,
    ) -> StoreResult<HashMap<Uuid, Vec<ConnectedVertex>>>;

    /// Insert a new current version starting at `t`.
    ///
    /// Fails with [`StoreError::Conflict`] when the id already has a current version.
    async fn insert_vertex(&mut self, t: TimelineNumber, vertex: &Vertex) -> StoreResult<()>;

    /// Close the current version at `t - 1`, or drop it when it started at
    /// `t`. Returns false when there is none.
    async fn close_vertex(&mut self, t: TimelineNumber, class: VertexClass, id: Uuid)
    -> StoreResult<bool>;

    /// Rewrite the current version in place if it starts at `t`.
    async fn rewrite_vertex(&mut self, t: TimelineNumber, vertex: &Vertex) -> StoreResult<bool>;

    // ── edges ──────────────────────────────────────────────────────────────

    async fn add_edge(&mut self, t: TimelineNumber, edge: &Edge) -> StoreResult<()>;

    /// Same contract as [`GraphTx::close_vertex`].
    async fn close_edge(&mut self, t: TimelineNumber, class: EdgeClass, x: Uuid, y: Uuid)
    -> StoreResult<bool>;

    async fn rewrite_edge(&mut self, t: TimelineNumber, edge: &Edge) -> StoreResult<bool>;

    /// `(total, valid)` counts of `class` edges visible at `t`; valid edges
    /// have both endpoints visible at `t` as well.
    async fn edge_integrity(&mut self, t: TimelineNumber, class: EdgeClass) -> StoreResult<(u64, u64)>;

    // ── role events ────────────────────────────────────────────────────────

    async fn role_events_at(&mut self, t: TimelineNumber, role_id: RoleId) -> StoreResult<Vec<RoleEvent>>;

    async fn delete_role_events(&mut self, t: TimelineNumber, role_id: RoleId) -> StoreResult<()>;

    async fn insert_role_event(&mut self, event: &RoleEvent) -> StoreResult<()>;

    /// Role events of `role_id` strictly older than `before`, newest first.
    async fn role_events(
        &mut self,
        role_id: RoleId,
        before: Option<TimelineNumber>,
        limit: usize,
    ) -> StoreResult<Vec<RoleEvent>>;

    // ── auxiliary auth data ────────────────────────────────────────────────

    async fn set_password(&mut self, member_id: MemberId, password_hash: &str) -> StoreResult<()>;

    async fn password_hash(&mut self, member_id: MemberId) -> StoreResult<Option<String>>;

    async fn set_match_uid(&mut self, member_id: MemberId, match_uid: &str) -> StoreResult<()>;

    async fn member_by_match_uid(&mut self, match_uid: &str) -> StoreResult<Option<MemberId>>;

    // ── lifecycle ──────────────────────────────────────────────────────────

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;

    // ── provided ───────────────────────────────────────────────────────────

    /// Replace the current version of a vertex with `vertex` from `t` on.
    ///
    /// A version that itself started at `t` is rewritten in place, so a
    /// batch touching the same vertex twice leaves one row for that timeline.
    /// Without a current version this inserts.
    async fn update_vertex(&mut self, t: TimelineNumber, vertex: &Vertex) -> StoreResult<()> {
        if self.rewrite_vertex(t, vertex).await? {
            return Ok(());
        }
        self.close_vertex(t, vertex.class(), vertex.id()).await?;
        self.insert_vertex(t, vertex).await
    }

    /// Close the current version without a successor.
    async fn delete_vertex(&mut self, t: TimelineNumber, class: VertexClass, id: Uuid) -> StoreResult<bool> {
        self.close_vertex(t, class, id).await
    }

    async fn update_edge(&mut self, t: TimelineNumber, edge: &Edge) -> StoreResult<()> {
        if self.rewrite_edge(t, edge).await? {
            return Ok(());
        }
        self.close_edge(t, edge.class, edge.x, edge.y).await?;
        self.add_edge(t, edge).await
    }

    async fn delete_edge(&mut self, t: TimelineNumber, class: EdgeClass, x: Uuid, y: Uuid) -> StoreResult<bool> {
        self.close_edge(t, class, x, y).await
    }

    /// Referential integrity audit.
    ///
    /// # Panics
    ///
    /// Panics when any edge visible at `t` has an endpoint that is not: the
    /// history is append-only, so projecting further on top of a dangling
    /// edge would only bury the corruption.
    async fn check_integrity(&mut self, t: TimelineNumber) -> StoreResult<()> {
        for class in EdgeClass::ALL {
            let (total, valid) = self.edge_integrity(t, class).await?;
            if total != valid {
                panic!(
                    "integrity violation at timeline {t}: {} of {total} {class} edges are dangling",
                    total - valid
                );
            }
        }
        Ok(())
    }
}

/// Typed access on top of the class-erased primitives.
impl dyn GraphTx + '_ {
    pub async fn vertices<T: VertexKind>(&mut self, t: TimelineNumber, query: &VertexQuery) -> StoreResult<Vec<T>> {
        let found = self.fetch_vertices(t, T::CLASS, query).await?;
        found.into_iter().map(expect_kind::<T>).collect()
    }

    pub async fn vertex<T: VertexKind>(&mut self, t: TimelineNumber, id: impl Into<Uuid> + Send) -> StoreResult<Option<T>> {
        let query = VertexQuery::by_id(id).limit(1);
        Ok(self.vertices::<T>(t, &query).await?.into_iter().next())
    }

    /// Targets of type `T` connected to a single source.
    pub async fn connected<T: VertexKind>(
        &mut self,
        t: TimelineNumber,
        source: impl Into<Uuid> + Send,
        class: EdgeClass,
        direction: Direction,
        query: &VertexQuery,
    ) -> StoreResult<Vec<(T, EdgePayload)>> {
        let source = source.into();
        let mut grouped = self
            .fetch_connected(t, &[source], class, direction, query)
            .await?;
        grouped
            .remove(&source)
            .unwrap_or_default()
            .into_iter()
            .map(|c| Ok((expect_kind::<T>(c.vertex)?, c.payload)))
            .collect()
    }
}

fn expect_kind<T: VertexKind>(vertex: Vertex) -> StoreResult<T> {
    let class = vertex.class();
    T::from_vertex(vertex)
        .ok_or_else(|| StoreError::Decode(format!("expected {} vertex, got {class}", T::CLASS)))
}
