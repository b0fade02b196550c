//! Backend wiring, selected once at start-up from [`Config::backend`].

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use circlegraph_events::{
    DistributedLock, EventSource, InMemoryEventSource, LocalHub, LocalLock, Notifier,
};
use circlegraph_infra::config::{Backend, Config};
use circlegraph_infra::coordination::{PgAdvisoryLock, PgNotifier};
use circlegraph_infra::event_source::PgEventSource;
use circlegraph_infra::graph::{GraphStore, InMemoryGraphStore, PgGraphStore, schema};

pub struct Services {
    pub store: Arc<dyn GraphStore>,
    pub source: Arc<dyn EventSource>,
    pub lock: Arc<dyn DistributedLock>,
    pub notifier: Arc<dyn Notifier>,
}

pub async fn build_services(config: &Config) -> anyhow::Result<Services> {
    match config.backend {
        Backend::Memory => Ok(build_in_memory_services()),
        Backend::Postgres => build_postgres_services(config).await,
    }
}

fn build_in_memory_services() -> Services {
    // In-memory wiring (dev/test): nothing appends to the log from outside
    // this process, so the projector idles.
    tracing::warn!("CIRCLEGRAPH_BACKEND=memory: graph and event log live in this process only");
    Services {
        store: Arc::new(InMemoryGraphStore::new()),
        source: Arc::new(InMemoryEventSource::new()),
        lock: Arc::new(LocalLock::new()),
        notifier: Arc::new(LocalHub::new()),
    }
}

async fn build_postgres_services(config: &Config) -> anyhow::Result<Services> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for the postgres backend")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    schema::bootstrap(&pool)
        .await
        .context("failed to bootstrap the graph schema")?;
    tracing::info!(max_connections = config.db_max_connections, "postgres backend ready");

    Ok(Services {
        store: Arc::new(PgGraphStore::new(pool.clone())),
        source: Arc::new(PgEventSource::new(pool.clone())),
        lock: Arc::new(PgAdvisoryLock::new(pool.clone(), config.lock_namespace.clone())),
        notifier: Arc::new(PgNotifier::new(pool)),
    })
}
