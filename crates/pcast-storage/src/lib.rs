//! Blob storage for generated story media.
//!
//! This crate provides:
//! - The [`BlobStore`] contract: upload bytes, get back a public URL
//! - A Cloudflare R2 (S3 API) implementation
//! - An in-memory store for tests and local runs
//! - The object key layout for story media

pub mod blob;
pub mod client;
pub mod error;
pub mod keys;

pub use blob::{BlobStore, MemoryBlobStore};
pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
