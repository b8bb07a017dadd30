//! Core types, backend traits, and error handling shared across the Entropy
//! workspace: the content-addressed object model, the hash registry, the
//! Read/Write/DeferredWrite/Migratable capability traits, and the error
//! taxonomy every backend and the coordinator agree on.

pub mod backend;
pub mod error;
pub mod hash;
pub mod model;

pub use backend::{DeferredWriteBackend, Migratable, PendingUploadSink, ReadBackend, WriteBackend};
pub use error::{Error, Result};
pub use hash::HashAlgorithm;
pub use model::{blob_relative_path, ContentObject, ObjectId, DEFAULT_CONTENT_TYPE};
