//! Process configuration, read from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `CIRCLEGRAPH_BACKEND` | `memory` (`memory` or `postgres`) |
//! | `DATABASE_URL` | required for `postgres` |
//! | `CIRCLEGRAPH_DB_MAX_CONNECTIONS` | 10 |
//! | `CIRCLEGRAPH_LOCK_NAMESPACE` | `circlegraph` |
//! | `CIRCLEGRAPH_PAGE_SIZE` | 100 |
//! | `CIRCLEGRAPH_POLL_INTERVAL_MS` | 1000 |

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process store, lock and notifications (single node, dev/test).
    Memory,
    Postgres,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set when CIRCLEGRAPH_BACKEND=postgres")]
    MissingDatabaseUrl,

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub lock_namespace: String,
    pub page_size: usize,
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            database_url: None,
            db_max_connections: 10,
            lock_namespace: "circlegraph".to_string(),
            page_size: 100,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend = match lookup("CIRCLEGRAPH_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => Backend::Memory,
            Some("postgres") => Backend::Postgres,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "CIRCLEGRAPH_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if backend == Backend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if backend == Backend::Memory && database_url.is_some() {
            warn!("DATABASE_URL is set but CIRCLEGRAPH_BACKEND=memory; ignoring it");
        }

        let db_max_connections = parse(&lookup, "CIRCLEGRAPH_DB_MAX_CONNECTIONS", defaults.db_max_connections)?;
        let page_size = parse(&lookup, "CIRCLEGRAPH_PAGE_SIZE", defaults.page_size)?;
        let poll_ms = parse(
            &lookup,
            "CIRCLEGRAPH_POLL_INTERVAL_MS",
            defaults.poll_interval.as_millis() as u64,
        )?;
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "CIRCLEGRAPH_PAGE_SIZE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            backend,
            database_url,
            db_max_connections,
            lock_namespace: lookup("CIRCLEGRAPH_LOCK_NAMESPACE").unwrap_or(defaults.lock_namespace),
            page_size,
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_in_memory() {
        assert_eq!(config(&[]).unwrap(), Config::default());
    }

    #[test]
    fn postgres_requires_a_database_url() {
        assert_eq!(
            config(&[("CIRCLEGRAPH_BACKEND", "postgres")]),
            Err(ConfigError::MissingDatabaseUrl)
        );

        let cfg = config(&[
            ("CIRCLEGRAPH_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/circlegraph"),
            ("CIRCLEGRAPH_PAGE_SIZE", "25"),
            ("CIRCLEGRAPH_POLL_INTERVAL_MS", "250"),
        ])
        .unwrap();
        assert_eq!(cfg.backend, Backend::Postgres);
        assert_eq!(cfg.page_size, 25);
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            config(&[("CIRCLEGRAPH_BACKEND", "mysql")]),
            Err(ConfigError::Invalid { name: "CIRCLEGRAPH_BACKEND", .. })
        ));
        assert!(matches!(
            config(&[("CIRCLEGRAPH_DB_MAX_CONNECTIONS", "lots")]),
            Err(ConfigError::Invalid { name: "CIRCLEGRAPH_DB_MAX_CONNECTIONS", .. })
        ));
        assert!(matches!(
            config(&[("CIRCLEGRAPH_PAGE_SIZE", "0")]),
            Err(ConfigError::Invalid { name: "CIRCLEGRAPH_PAGE_SIZE", .. })
        ));
    }
}
