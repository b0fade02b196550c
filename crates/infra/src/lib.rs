//! Infrastructure layer: graph store, projector, coordination, read side.

pub mod config;
pub mod coordination;
pub mod event_source;
pub mod graph;
pub mod projections;
pub mod query;
pub mod timeline;
pub mod workers;

mod integration_tests;
