//! Source lifecycle event consumption: the durable-log abstraction, the
//! consumer-group reader with idle-entry reclamation, and the handlers
//! that keep job state in sync with the system of record.

mod consumer;
mod handlers;
mod log;
mod source_event;

pub use consumer::EventConsumer;
pub use handlers::{SourceEventHandler, SourceSyncHandler};
pub use log::{EventLog, InMemoryEventLog, LogEntry};
pub use source_event::{SourceEvent, SourceEventKind};
