//! One-time schema bootstrap for the Postgres backend.
//!
//! Every statement is idempotent (`IF NOT EXISTS`), so bootstrap runs on
//! every process start. There are no migrations beyond this.

use sqlx::PgPool;
use tracing::info;

use circlegraph_core::{EdgeClass, VertexClass};

use super::StoreResult;
use super::postgres::map_sqlx_error;

/// Attribute columns per vertex class, after `id` and the interval columns.
fn vertex_columns(class: VertexClass) -> &'static str {
    match class {
        VertexClass::Role => {
            "roletype text NOT NULL, depth integer NOT NULL, name text NOT NULL, purpose text NOT NULL"
        }
        VertexClass::Domain | VertexClass::Accountability => "description text NOT NULL",
        VertexClass::RoleAdditionalContent => "content text NOT NULL",
        VertexClass::Member => {
            "isadmin boolean NOT NULL, username text NOT NULL, fullname text NOT NULL, email text NOT NULL"
        }
        VertexClass::MemberAvatar => "image bytea NOT NULL",
        VertexClass::Tension => {
            "title text NOT NULL, description text NOT NULL, closed boolean NOT NULL, closereason text NOT NULL"
        }
    }
}

/// Payload columns per edge class.
fn edge_columns(class: EdgeClass) -> &'static str {
    match class {
        EdgeClass::RoleMember => {
            ", focus text, nocoremember boolean NOT NULL DEFAULT false, electionexpiration timestamptz"
        }
        _ => "",
    }
}

/// All DDL statements, in execution order.
pub fn statements() -> Vec<String> {
    let mut stmts = vec![
        r#"CREATE TABLE IF NOT EXISTS timeline (
            number bigint PRIMARY KEY,
            "timestamp" timestamptz NOT NULL,
            groupid uuid NOT NULL UNIQUE,
            aggregatetype text,
            aggregateid uuid
        )"#
        .to_string(),
        "CREATE TABLE IF NOT EXISTS checkpoint (
            id integer PRIMARY KEY DEFAULT 1 CHECK (id = 1),
            sequencenumber bigint NOT NULL
        )"
        .to_string(),
        "INSERT INTO checkpoint (id, sequencenumber) VALUES (1, 0) ON CONFLICT (id) DO NOTHING"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS roleevent (
            timeline bigint NOT NULL,
            id uuid NOT NULL,
            command uuid,
            cause uuid,
            eventtype text NOT NULL,
            roleid uuid NOT NULL,
            data jsonb NOT NULL,
            PRIMARY KEY (id)
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS roleevent_roleid_timeline ON roleevent (roleid, timeline DESC)"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS password (
            memberid uuid PRIMARY KEY,
            password text NOT NULL
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS membermatch (
            memberid uuid PRIMARY KEY,
            matchuid text NOT NULL UNIQUE
        )"
        .to_string(),
    ];

    for class in VertexClass::ALL {
        let table = class.table();
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id uuid NOT NULL,
                start_timeline bigint NOT NULL,
                end_timeline bigint,
                {columns},
                PRIMARY KEY (id, start_timeline)
            )",
            columns = vertex_columns(class)
        ));
        stmts.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_id_interval ON {table} (id, start_timeline, end_timeline DESC)"
        ));
        stmts.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_current ON {table} (id) WHERE end_timeline IS NULL"
        ));
    }

    for class in EdgeClass::ALL {
        let table = class.table();
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                start_timeline bigint NOT NULL,
                end_timeline bigint,
                x uuid NOT NULL,
                y uuid NOT NULL{payload},
                PRIMARY KEY (x, y, start_timeline)
            )",
            payload = edge_columns(class)
        ));
        stmts.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_current ON {table} (x, y) WHERE end_timeline IS NULL"
        ));
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS {table}_y ON {table} (y, start_timeline)"
        ));
    }

    stmts
}

/// Create all tables and indexes and seed the checkpoint row.
pub async fn bootstrap(pool: &PgPool) -> StoreResult<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("bootstrap_begin", e))?;
    for stmt in statements() {
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("bootstrap", e))?;
    }
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("bootstrap_commit", e))?;
    info!("graph schema ready");
    Ok(())
}
