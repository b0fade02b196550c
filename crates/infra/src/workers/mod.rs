//! Background workers.

pub mod projector;

pub use projector::{Projector, ProjectorError, TIMELINE_CHANNEL, WorkerHandle};
