//! Event source backends. The in-memory source lives in `circlegraph-events`.

pub mod postgres;

pub use postgres::PgEventSource;
