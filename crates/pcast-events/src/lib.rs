//! Story event publishing.
//!
//! This crate provides:
//! - The [`EventSink`] contract used to notify subscribers of story changes
//! - A Redis Pub/Sub publisher and subscriber
//! - In-memory and no-op sinks

pub mod error;
pub mod publisher;
pub mod sink;

pub use error::{EventError, EventResult};
pub use publisher::RedisEventPublisher;
pub use sink::{EventSink, MemoryEventSink, NullEventSink};
