//! meetrec Storage
//!
//! Durable object storage behind the [`ObjectStore`] trait. Recordings are
//! streamed into storage as multipart uploads while they are still being
//! encoded, so the trait mirrors the multipart model of S3-like services.
//!
//! Two implementations ship here:
//! - [`FsObjectStore`]: a directory tree, used by the CLI and local setups
//! - [`MemoryObjectStore`]: in-memory with fault injection, used by tests

pub mod etag;
pub mod fs;
pub mod memory;
pub mod store;

pub use etag::{etag_of, Fnv1a};
pub use fs::FsObjectStore;
pub use memory::{CallCounts, MemoryObjectStore};
pub use store::{CompletedPart, ObjectInfo, ObjectStore, UploadId, TRANSFER_CHUNK_BYTES};
