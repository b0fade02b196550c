//! Postgres-backed bitemporal graph store.
//!
//! One table per vertex class (`id, start_timeline, end_timeline, ...attrs`)
//! and per edge class (`start_timeline, end_timeline, x, y, ...payload`); see
//! [`super::schema`] for the DDL. Filters are rendered with `QueryBuilder`
//! after validation against the class field list, so only known column names
//! are ever interpolated and every value is bound.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Second current version of an id / edge, reused group id |
//! | Database (other) | Any other | `Execution` | Other database errors |
//! | ColumnDecode / Decode | N/A | `Decode` | Row does not map to a domain value |
//! | Other | N/A | `Execution` | Pool closed, network errors, etc. |
//!
//! ## Transactions
//!
//! Write transactions lock the checkpoint row on first read, which serializes
//! concurrent projectors even if the distributed lock is misconfigured. Read
//! transactions run `REPEATABLE READ, READ ONLY` so a query session sees one
//! snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use circlegraph_core::{
    Accountability, AccountabilityId, CircleChangesApplied, Direction, Domain, DomainId, Edge,
    EdgeClass, EdgePayload, Member, MemberAvatar, MemberId, Role, RoleAdditionalContent,
    RoleEvent, RoleEventType, RoleId, RoleMemberEdge, Tension, TensionId, Timeline,
    TimelineNumber, Vertex, VertexClass,
};

use super::filter::{Filter, Value, VertexQuery, escape_like};
use super::{ConnectedVertex, GraphStore, GraphTx, StoreError, StoreResult, TimelineRange};

/// Postgres graph store over a connection pool.
#[derive(Debug, Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn begin(&self) -> StoreResult<Box<dyn GraphTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgGraphTx {
            tx,
            read_only: false,
        }))
    }

    async fn begin_read(&self) -> StoreResult<Box<dyn GraphTx>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_read", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin_read", e))?;
        Ok(Box::new(PgGraphTx {
            tx,
            read_only: true,
        }))
    }
}

struct PgGraphTx {
    tx: Transaction<'static, Postgres>,
    read_only: bool,
}

impl PgGraphTx {
    /// Close the current row of `table` identified by `key` at `t - 1`.
    ///
    /// A current row that started at `t` was never visible and is dropped,
    /// leaving `t` free for a re-insert in the same batch.
    async fn close_current(
        &mut self,
        operation: &str,
        table: &str,
        key: &[(&str, Uuid)],
        t: TimelineNumber,
    ) -> StoreResult<bool> {
        let columns: Vec<&str> = key.iter().map(|(column, _)| *column).collect();
        let (drop_sql, close_sql) = close_statements(table, &columns);

        let mut dropped = sqlx::query(&drop_sql).bind(t.get());
        for (_, id) in key {
            dropped = dropped.bind(*id);
        }
        let result = dropped
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let mut closed = sqlx::query(&close_sql).bind(t.prev().get());
        for (_, id) in key {
            closed = closed.bind(*id);
        }
        let result = closed
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(result.rows_affected() > 0)
    }
}

/// `LIMIT` bind value; limits beyond `i64::MAX` mean no limit.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// `(drop, close)` statements for the current row matching `key`. Both take
/// the timeline as `$1` and the key columns from `$2` on.
fn close_statements(table: &str, key: &[&str]) -> (String, String) {
    let key_clause: String = key
        .iter()
        .enumerate()
        .map(|(i, column)| format!(" AND {column} = ${}", i + 2))
        .collect();
    (
        format!("DELETE FROM {table} WHERE start_timeline = $1 AND end_timeline IS NULL{key_clause}"),
        format!("UPDATE {table} SET end_timeline = $1 WHERE end_timeline IS NULL{key_clause}"),
    )
}

/// Owned column value for inserts and in-place rewrites.
enum Column {
    Text(String),
    Int(i32),
    Bool(bool),
    Bytes(Vec<u8>),
    OptText(Option<String>),
    OptTimestamp(Option<DateTime<Utc>>),
}

fn push_column(qb: &mut QueryBuilder<'_, Postgres>, column: Column) {
    match column {
        Column::Text(v) => {
            qb.push_bind(v);
        }
        Column::Int(v) => {
            qb.push_bind(v);
        }
        Column::Bool(v) => {
            qb.push_bind(v);
        }
        Column::Bytes(v) => {
            qb.push_bind(v);
        }
        Column::OptText(v) => {
            qb.push_bind(v);
        }
        Column::OptTimestamp(v) => {
            qb.push_bind(v);
        }
    }
}

/// Attribute columns of a vertex, without `id`.
fn vertex_values(vertex: &Vertex) -> Vec<(&'static str, Column)> {
    match vertex {
        Vertex::Role(r) => vec![
            ("roletype", Column::Text(r.role_type.as_str().to_string())),
            ("depth", Column::Int(r.depth)),
            ("name", Column::Text(r.name.clone())),
            ("purpose", Column::Text(r.purpose.clone())),
        ],
        Vertex::Domain(d) => vec![("description", Column::Text(d.description.clone()))],
        Vertex::Accountability(a) => vec![("description", Column::Text(a.description.clone()))],
        Vertex::RoleAdditionalContent(c) => vec![("content", Column::Text(c.content.clone()))],
        Vertex::Member(m) => vec![
            ("isadmin", Column::Bool(m.is_admin)),
            ("username", Column::Text(m.user_name.clone())),
            ("fullname", Column::Text(m.full_name.clone())),
            ("email", Column::Text(m.email.clone())),
        ],
        Vertex::MemberAvatar(a) => vec![("image", Column::Bytes(a.image.clone()))],
        Vertex::Tension(t) => vec![
            ("title", Column::Text(t.title.clone())),
            ("description", Column::Text(t.description.clone())),
            ("closed", Column::Bool(t.closed)),
            ("closereason", Column::Text(t.close_reason.clone())),
        ],
    }
}

fn edge_values(edge: &Edge) -> Vec<(&'static str, Column)> {
    match edge.class {
        EdgeClass::RoleMember => {
            let payload = edge.payload.role_member().cloned().unwrap_or_default();
            vec![
                ("focus", Column::OptText(payload.focus)),
                ("nocoremember", Column::Bool(payload.no_core_member)),
                ("electionexpiration", Column::OptTimestamp(payload.election_expiration)),
            ]
        }
        _ => Vec::new(),
    }
}

fn push_visible(qb: &mut QueryBuilder<'_, Postgres>, alias: &str, t: TimelineNumber) {
    qb.push(format!("{alias}.start_timeline <= "));
    qb.push_bind(t.get());
    qb.push(format!(" AND ({alias}.end_timeline IS NULL OR {alias}.end_timeline >= "));
    qb.push_bind(t.get());
    qb.push(")");
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Uuid(v) => {
            qb.push_bind(*v);
        }
        Value::Text(v) => {
            qb.push_bind(v.clone());
        }
        Value::Int(v) => {
            qb.push_bind(*v);
        }
        Value::Bool(v) => {
            qb.push_bind(*v);
        }
    }
}

/// Render a validated filter. Field names come from the class field list.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, alias: &str, filter: &Filter) {
    match filter {
        Filter::Eq(field, value) => {
            qb.push(format!("{alias}.{field} = "));
            push_value(qb, value);
        }
        Filter::In(field, values) => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push(format!("{alias}.{field} IN ("));
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_value(qb, value);
            }
            qb.push(")");
        }
        Filter::Gt(field, value) => {
            qb.push(format!("{alias}.{field} > "));
            push_value(qb, value);
        }
        Filter::Lt(field, value) => {
            qb.push(format!("{alias}.{field} < "));
            push_value(qb, value);
        }
        Filter::Contains(field, needle) => {
            qb.push(format!("{alias}.{field} ILIKE "));
            qb.push_bind(format!("%{}%", escape_like(needle)));
        }
        Filter::And(all) | Filter::Or(all) => {
            let (joiner, empty) = match filter {
                Filter::And(_) => (" AND ", "TRUE"),
                _ => (" OR ", "FALSE"),
            };
            if all.is_empty() {
                qb.push(empty);
                return;
            }
            qb.push("(");
            for (i, f) in all.iter().enumerate() {
                if i > 0 {
                    qb.push(joiner);
                }
                push_filter(qb, alias, f);
            }
            qb.push(")");
        }
    }
}

fn order_clause(alias: &str, query: &VertexQuery) -> String {
    let mut parts: Vec<String> = query
        .order_by
        .iter()
        .map(|o| {
            let dir = if o.descending { "DESC" } else { "ASC" };
            format!("{alias}.{} {dir}", o.field)
        })
        .collect();
    parts.push(format!("{alias}.id ASC"));
    parts.join(", ")
}

fn decode_vertex(class: VertexClass, row: &PgRow) -> Result<Vertex, sqlx::Error> {
    let id: Uuid = row.try_get("id")?;
    Ok(match class {
        VertexClass::Role => {
            let role_type: String = row.try_get("roletype")?;
            Vertex::Role(Role {
                id: RoleId::from_uuid(id),
                role_type: role_type
                    .parse()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                depth: row.try_get("depth")?,
                name: row.try_get("name")?,
                purpose: row.try_get("purpose")?,
            })
        }
        VertexClass::Domain => Vertex::Domain(Domain {
            id: DomainId::from_uuid(id),
            description: row.try_get("description")?,
        }),
        VertexClass::Accountability => Vertex::Accountability(Accountability {
            id: AccountabilityId::from_uuid(id),
            description: row.try_get("description")?,
        }),
        VertexClass::RoleAdditionalContent => {
            Vertex::RoleAdditionalContent(RoleAdditionalContent {
                id: RoleId::from_uuid(id),
                content: row.try_get("content")?,
            })
        }
        VertexClass::Member => Vertex::Member(Member {
            id: MemberId::from_uuid(id),
            is_admin: row.try_get("isadmin")?,
            user_name: row.try_get("username")?,
            full_name: row.try_get("fullname")?,
            email: row.try_get("email")?,
        }),
        VertexClass::MemberAvatar => Vertex::MemberAvatar(MemberAvatar {
            id: MemberId::from_uuid(id),
            image: row.try_get("image")?,
        }),
        VertexClass::Tension => Vertex::Tension(Tension {
            id: TensionId::from_uuid(id),
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            closed: row.try_get("closed")?,
            close_reason: row.try_get("closereason")?,
        }),
    })
}

fn decode_timeline(row: &PgRow) -> Result<Timeline, sqlx::Error> {
    Ok(Timeline {
        number: TimelineNumber::new(row.try_get("number")?),
        timestamp: row.try_get("timestamp")?,
        group_id: row.try_get("groupid")?,
        aggregate_type: row.try_get("aggregatetype")?,
        aggregate_id: row.try_get("aggregateid")?,
    })
}

fn decode_role_event(row: &PgRow) -> Result<RoleEvent, sqlx::Error> {
    let event_type: String = row.try_get("eventtype")?;
    let data: serde_json::Value = row.try_get("data")?;
    let role_id: Uuid = row.try_get("roleid")?;
    Ok(RoleEvent {
        timeline: TimelineNumber::new(row.try_get("timeline")?),
        id: row.try_get("id")?,
        command_id: row.try_get("command")?,
        cause_id: row.try_get("cause")?,
        role_id: RoleId::from_uuid(role_id),
        event_type: event_type
            .parse::<RoleEventType>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        data: serde_json::from_value::<CircleChangesApplied>(data)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
    })
}

fn decode_err(e: sqlx::Error) -> StoreError {
    StoreError::Decode(e.to_string())
}

const TIMELINE_COLUMNS: &str = r#"number, "timestamp", groupid, aggregatetype, aggregateid"#;
const ROLE_EVENT_COLUMNS: &str = "timeline, id, command, cause, eventtype, roleid, data";

#[async_trait]
impl GraphTx for PgGraphTx {
    async fn current_timeline(&mut self) -> StoreResult<Option<Timeline>> {
        let row = sqlx::query(&format!(
            "SELECT {TIMELINE_COLUMNS} FROM timeline ORDER BY number DESC LIMIT 1"
        ))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("current_timeline", e))?;
        row.as_ref().map(decode_timeline).transpose().map_err(decode_err)
    }

    async fn timeline(&mut self, number: TimelineNumber) -> StoreResult<Option<Timeline>> {
        let row = sqlx::query(&format!(
            "SELECT {TIMELINE_COLUMNS} FROM timeline WHERE number = $1"
        ))
        .bind(number.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("timeline", e))?;
        row.as_ref().map(decode_timeline).transpose().map_err(decode_err)
    }

    async fn timeline_for_group(&mut self, group_id: Uuid) -> StoreResult<Option<Timeline>> {
        let row = sqlx::query(&format!(
            "SELECT {TIMELINE_COLUMNS} FROM timeline WHERE groupid = $1"
        ))
        .bind(group_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("timeline_for_group", e))?;
        row.as_ref().map(decode_timeline).transpose().map_err(decode_err)
    }

    async fn timelines(&mut self, range: TimelineRange, limit: usize) -> StoreResult<Vec<Timeline>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TIMELINE_COLUMNS} FROM timeline WHERE TRUE"
        ));
        if let Some(before) = range.before {
            qb.push(" AND number < ");
            qb.push_bind(before.get());
        }
        if let Some(after) = range.after {
            qb.push(" AND number > ");
            qb.push_bind(after.get());
        }
        qb.push(" ORDER BY number DESC LIMIT ");
        qb.push_bind(sql_limit(limit));
        let rows = qb
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("timelines", e))?;
        rows.iter()
            .map(decode_timeline)
            .collect::<Result<_, _>>()
            .map_err(decode_err)
    }

    #[instrument(skip(self, timeline), fields(timeline = %timeline.number, group_id = %timeline.group_id), err)]
    async fn insert_timeline(&mut self, timeline: &Timeline) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO timeline (number, "timestamp", groupid, aggregatetype, aggregateid)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(timeline.number.get())
        .bind(timeline.timestamp)
        .bind(timeline.group_id)
        .bind(timeline.aggregate_type.as_deref())
        .bind(timeline.aggregate_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_timeline", e))?;
        Ok(())
    }

    async fn checkpoint(&mut self) -> StoreResult<i64> {
        let sql = if self.read_only {
            "SELECT sequencenumber FROM checkpoint WHERE id = 1"
        } else {
            "SELECT sequencenumber FROM checkpoint WHERE id = 1 FOR UPDATE"
        };
        let seq: Option<i64> = sqlx::query_scalar(sql)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("checkpoint", e))?;
        Ok(seq.unwrap_or(0))
    }

    async fn set_checkpoint(&mut self, sequence_number: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO checkpoint (id, sequencenumber) VALUES (1, $1)
             ON CONFLICT (id) DO UPDATE SET sequencenumber = EXCLUDED.sequencenumber",
        )
        .bind(sequence_number)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("set_checkpoint", e))?;
        Ok(())
    }

    #[instrument(skip(self, query), fields(timeline = %t, class = %class), err)]
    async fn fetch_vertices(
        &mut self,
        t: TimelineNumber,
        class: VertexClass,
        query: &VertexQuery,
    ) -> StoreResult<Vec<Vertex>> {
        query.validate(class)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT v.* FROM {} v WHERE ",
            class.table()
        ));
        push_visible(&mut qb, "v", t);
        if let Some(filter) = &query.filter {
            qb.push(" AND ");
            push_filter(&mut qb, "v", filter);
        }
        qb.push(" ORDER BY ");
        qb.push(order_clause("v", query));
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(sql_limit(limit));
        }

        let rows = qb
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_vertices", e))?;
        rows.iter()
            .map(|row| decode_vertex(class, row))
            .collect::<Result<_, _>>()
            .map_err(decode_err)
    }

    #[instrument(skip(self, sources, query), fields(timeline = %t, class = %class, sources = sources.len()), err)]
    async fn fetch_connected(
        &mut self,
        t: TimelineNumber,
        sources: &[Uuid],
        class: EdgeClass,
        direction: Direction,
        query: &VertexQuery,
    ) -> StoreResult<HashMap<Uuid, Vec<ConnectedVertex>>> {
        let target = class.target_class(direction);
        query.validate(target)?;
        let mut grouped: HashMap<Uuid, Vec<ConnectedVertex>> = HashMap::new();
        if sources.is_empty() {
            return Ok(grouped);
        }

        let (src, dst) = match direction {
            Direction::Out => ("x", "y"),
            Direction::In => ("y", "x"),
        };
        let payload_columns = match class {
            EdgeClass::RoleMember => {
                ", e.focus AS edge_focus, e.nocoremember AS edge_nocoremember, \
                 e.electionexpiration AS edge_electionexpiration"
            }
            _ => "",
        };

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT e.{src} AS edge_source{payload_columns}, v.* FROM {edges} e \
             JOIN {targets} v ON v.id = e.{dst} WHERE e.{src} = ANY(",
            edges = class.table(),
            targets = target.table(),
        ));
        qb.push_bind(sources.to_vec());
        qb.push(") AND ");
        push_visible(&mut qb, "e", t);
        qb.push(" AND ");
        push_visible(&mut qb, "v", t);
        if let Some(filter) = &query.filter {
            qb.push(" AND ");
            push_filter(&mut qb, "v", filter);
        }
        qb.push(format!(" ORDER BY e.{src}, "));
        qb.push(order_clause("v", query));

        let rows = qb
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_connected", e))?;

        for row in &rows {
            let source: Uuid = row.try_get("edge_source").map_err(decode_err)?;
            let vertex = decode_vertex(target, row).map_err(decode_err)?;
            let payload = match class {
                EdgeClass::RoleMember => EdgePayload::RoleMember(RoleMemberEdge {
                    focus: row.try_get("edge_focus").map_err(decode_err)?,
                    no_core_member: row.try_get("edge_nocoremember").map_err(decode_err)?,
                    election_expiration: row
                        .try_get("edge_electionexpiration")
                        .map_err(decode_err)?,
                }),
                _ => EdgePayload::None,
            };
            let group = grouped.entry(source).or_default();
            if query.limit.is_none_or(|limit| group.len() < limit) {
                group.push(ConnectedVertex {
                    source,
                    vertex,
                    payload,
                });
            }
        }
        Ok(grouped)
    }

    #[instrument(skip(self, vertex), fields(timeline = %t, class = %vertex.class(), id = %vertex.id()), err)]
    async fn insert_vertex(&mut self, t: TimelineNumber, vertex: &Vertex) -> StoreResult<()> {
        let values = vertex_values(vertex);
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} (id, start_timeline, end_timeline",
            vertex.class().table()
        ));
        for (name, _) in &values {
            qb.push(format!(", {name}"));
        }
        qb.push(") VALUES (");
        qb.push_bind(vertex.id());
        qb.push(", ");
        qb.push_bind(t.get());
        qb.push(", NULL");
        for (_, column) in values {
            qb.push(", ");
            push_column(&mut qb, column);
        }
        qb.push(")");

        qb.build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_vertex", e))?;
        Ok(())
    }

    async fn close_vertex(&mut self, t: TimelineNumber, class: VertexClass, id: Uuid) -> StoreResult<bool> {
        self.close_current("close_vertex", class.table(), &[("id", id)], t)
            .await
    }

    async fn rewrite_vertex(&mut self, t: TimelineNumber, vertex: &Vertex) -> StoreResult<bool> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", vertex.class().table()));
        for (i, (name, column)) in vertex_values(vertex).into_iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(format!("{name} = "));
            push_column(&mut qb, column);
        }
        qb.push(" WHERE id = ");
        qb.push_bind(vertex.id());
        qb.push(" AND start_timeline = ");
        qb.push_bind(t.get());
        qb.push(" AND end_timeline IS NULL");

        let result = qb
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("rewrite_vertex", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, edge), fields(timeline = %t, class = %edge.class), err)]
    async fn add_edge(&mut self, t: TimelineNumber, edge: &Edge) -> StoreResult<()> {
        let values = edge_values(edge);
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} (start_timeline, end_timeline, x, y",
            edge.class.table()
        ));
        for (name, _) in &values {
            qb.push(format!(", {name}"));
        }
        qb.push(") VALUES (");
        qb.push_bind(t.get());
        qb.push(", NULL, ");
        qb.push_bind(edge.x);
        qb.push(", ");
        qb.push_bind(edge.y);
        for (_, column) in values {
            qb.push(", ");
            push_column(&mut qb, column);
        }
        qb.push(")");

        qb.build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("add_edge", e))?;
        Ok(())
    }

    async fn close_edge(&mut self, t: TimelineNumber, class: EdgeClass, x: Uuid, y: Uuid) -> StoreResult<bool> {
        self.close_current("close_edge", class.table(), &[("x", x), ("y", y)], t)
            .await
    }

    async fn rewrite_edge(&mut self, t: TimelineNumber, edge: &Edge) -> StoreResult<bool> {
        let values = edge_values(edge);
        if values.is_empty() {
            // nothing to rewrite; report whether the version exists
            let exists: Option<i32> = sqlx::query_scalar(&format!(
                "SELECT 1 FROM {} WHERE x = $1 AND y = $2 AND start_timeline = $3 AND end_timeline IS NULL",
                edge.class.table()
            ))
            .bind(edge.x)
            .bind(edge.y)
            .bind(t.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("rewrite_edge", e))?;
            return Ok(exists.is_some());
        }

        let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", edge.class.table()));
        for (i, (name, column)) in values.into_iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(format!("{name} = "));
            push_column(&mut qb, column);
        }
        qb.push(" WHERE x = ");
        qb.push_bind(edge.x);
        qb.push(" AND y = ");
        qb.push_bind(edge.y);
        qb.push(" AND start_timeline = ");
        qb.push_bind(t.get());
        qb.push(" AND end_timeline IS NULL");

        let result = qb
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("rewrite_edge", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn edge_integrity(&mut self, t: TimelineNumber, class: EdgeClass) -> StoreResult<(u64, u64)> {
        let visible = |alias: &str| {
            format!(
                "{alias}.start_timeline <= $1 AND ({alias}.end_timeline IS NULL OR {alias}.end_timeline >= $1)"
            )
        };
        let sql = format!(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE
                        EXISTS (SELECT 1 FROM {xt} vx WHERE vx.id = e.x AND {vx})
                        AND EXISTS (SELECT 1 FROM {yt} vy WHERE vy.id = e.y AND {vy})
                    ) AS valid
             FROM {et} e WHERE {ve}",
            xt = class.x_class().table(),
            yt = class.y_class().table(),
            et = class.table(),
            vx = visible("vx"),
            vy = visible("vy"),
            ve = visible("e"),
        );
        let row = sqlx::query(&sql)
            .bind(t.get())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("edge_integrity", e))?;
        let total: i64 = row.try_get("total").map_err(decode_err)?;
        let valid: i64 = row.try_get("valid").map_err(decode_err)?;
        Ok((total as u64, valid as u64))
    }

    async fn role_events_at(&mut self, t: TimelineNumber, role_id: RoleId) -> StoreResult<Vec<RoleEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_EVENT_COLUMNS} FROM roleevent WHERE timeline = $1 AND roleid = $2"
        ))
        .bind(t.get())
        .bind(*role_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("role_events_at", e))?;
        rows.iter()
            .map(decode_role_event)
            .collect::<Result<_, _>>()
            .map_err(decode_err)
    }

    async fn delete_role_events(&mut self, t: TimelineNumber, role_id: RoleId) -> StoreResult<()> {
        sqlx::query("DELETE FROM roleevent WHERE timeline = $1 AND roleid = $2")
            .bind(t.get())
            .bind(*role_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role_events", e))?;
        Ok(())
    }

    async fn insert_role_event(&mut self, event: &RoleEvent) -> StoreResult<()> {
        let data = serde_json::to_value(&event.data)
            .map_err(|e| StoreError::execution("insert_role_event", e.to_string()))?;
        sqlx::query(&format!(
            "INSERT INTO roleevent ({ROLE_EVENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(event.timeline.get())
        .bind(event.id)
        .bind(event.command_id)
        .bind(event.cause_id)
        .bind(event.event_type.as_str())
        .bind(*event.role_id.as_uuid())
        .bind(data)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role_event", e))?;
        Ok(())
    }

    async fn role_events(
        &mut self,
        role_id: RoleId,
        before: Option<TimelineNumber>,
        limit: usize,
    ) -> StoreResult<Vec<RoleEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_EVENT_COLUMNS} FROM roleevent
             WHERE roleid = $1 AND ($2::bigint IS NULL OR timeline < $2)
             ORDER BY timeline DESC LIMIT $3"
        ))
        .bind(*role_id.as_uuid())
        .bind(before.map(TimelineNumber::get))
        .bind(sql_limit(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("role_events", e))?;
        rows.iter()
            .map(decode_role_event)
            .collect::<Result<_, _>>()
            .map_err(decode_err)
    }

    async fn set_password(&mut self, member_id: MemberId, password_hash: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO password (memberid, password) VALUES ($1, $2)
             ON CONFLICT (memberid) DO UPDATE SET password = EXCLUDED.password",
        )
        .bind(*member_id.as_uuid())
        .bind(password_hash)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("set_password", e))?;
        Ok(())
    }

    async fn password_hash(&mut self, member_id: MemberId) -> StoreResult<Option<String>> {
        sqlx::query_scalar("SELECT password FROM password WHERE memberid = $1")
            .bind(*member_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("password_hash", e))
    }

    async fn set_match_uid(&mut self, member_id: MemberId, match_uid: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO membermatch (memberid, matchuid) VALUES ($1, $2)
             ON CONFLICT (memberid) DO UPDATE SET matchuid = EXCLUDED.matchuid",
        )
        .bind(*member_id.as_uuid())
        .bind(match_uid)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("set_match_uid", e))?;
        Ok(())
    }

    async fn member_by_match_uid(&mut self, match_uid: &str) -> StoreResult<Option<MemberId>> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT memberid FROM membermatch WHERE matchuid = $1")
            .bind(match_uid)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("member_by_match_uid", e))?;
        Ok(id.map(MemberId::from_uuid))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::execution(operation, msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("{operation}: {err}"))
        }
        sqlx::Error::PoolClosed => StoreError::execution(operation, "connection pool closed"),
        _ => StoreError::execution(operation, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(filter: &Filter) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("");
        push_filter(&mut qb, "v", filter);
        qb.sql().to_string()
    }

    #[test]
    fn filters_render_with_bound_values() {
        let f = Filter::eq("username", "ada").and(Filter::Or(vec![
            Filter::contains("email", "50%"),
            Filter::any_of("id", [Uuid::nil(), Uuid::max()]),
        ]));
        assert_eq!(
            sql(&f),
            "(v.username = $1 AND (v.email ILIKE $2 OR v.id IN ($3, $4)))"
        );
    }

    #[test]
    fn empty_sets_render_as_constants() {
        assert_eq!(sql(&Filter::any_of("id", Vec::<Uuid>::new())), "FALSE");
        assert_eq!(sql(&Filter::And(vec![])), "TRUE");
        assert_eq!(sql(&Filter::Or(vec![])), "FALSE");
    }

    #[test]
    fn ordering_always_ends_with_id() {
        let q = VertexQuery::all().order_by("username", true);
        assert_eq!(order_clause("v", &q), "v.username DESC, v.id ASC");
        assert_eq!(order_clause("v", &VertexQuery::all()), "v.id ASC");
    }

    #[test]
    fn oversized_limits_clamp_instead_of_wrapping() {
        assert_eq!(sql_limit(25), 25);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }

    #[test]
    fn closing_drops_a_row_started_at_the_same_timeline() {
        let (drop_sql, close_sql) = close_statements("rolemember", &["x", "y"]);
        assert_eq!(
            drop_sql,
            "DELETE FROM rolemember WHERE start_timeline = $1 AND end_timeline IS NULL AND x = $2 AND y = $3"
        );
        assert_eq!(
            close_sql,
            "UPDATE rolemember SET end_timeline = $1 WHERE end_timeline IS NULL AND x = $2 AND y = $3"
        );
    }

    #[test]
    fn role_member_edges_carry_payload_columns() {
        let edge = Edge::new(EdgeClass::RoleMember, MemberId::new(), RoleId::new());
        let names: Vec<_> = edge_values(&edge).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["focus", "nocoremember", "electionexpiration"]);

        let edge = Edge::new(EdgeClass::RoleParent, RoleId::new(), RoleId::new());
        assert!(edge_values(&edge).is_empty());
    }
}
