//! Job registry for story generation.
//!
//! This crate provides:
//! - The [`JobRegistry`] contract used by dispatchers, completion handlers
//!   and the completion evaluator
//! - An in-memory registry for single-process runs and tests
//! - A Redis-backed registry with optimistic compare-and-set updates
//!
//! Every read re-queries live state; nothing caches aggregate totals.

pub mod error;
pub mod memory;
pub mod redis_registry;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use memory::MemoryRegistry;
pub use redis_registry::{RedisRegistry, RegistryConfig};
pub use registry::JobRegistry;
