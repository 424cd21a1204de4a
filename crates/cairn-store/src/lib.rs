//! Cairn store - key/blob object backends for the cairn backup engine.
//!
//! This crate provides the synchronous object store the engine layers its
//! blocks, file recipes, and archive manifests over, along with a
//! filesystem backend and an in-memory backend.

pub mod store;

pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, Metadata, ObjectMeta, StoreError};
