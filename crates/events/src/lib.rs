//! The event contract consumed by the projector and the coordination
//! capabilities shared by projector and readers.
//!
//! - [`StoredEvent`]: one row of the upstream, append-only event log
//! - [`EventPayload`]: the closed set of event types and their data
//! - [`EventSource`]: ordered, paged retrieval of stored events
//! - [`DistributedLock`]: mutual exclusion over an opaque key
//! - [`Notifier`] / [`Listener`]: signal-only publish/subscribe on named channels
//!
//! Each capability ships with an in-process implementation here; backends
//! built on the relational engine live in `circlegraph-infra`.

pub mod event;
pub mod lock;
pub mod notify;
pub mod payload;
pub mod source;

pub use event::{EventMetadata, StoredEvent};
pub use lock::{DistributedLock, LocalLock, LockError, LockGuard, LockHandle};
pub use notify::{LocalHub, LocalListener, Listener, Notification, Notifier, NotifyError};
pub use payload::{EventDecodeError, EventPayload, EventType};
pub use source::{EventSource, InMemoryEventSource, SourceError};
