//! Backend capability traits (C3): the abstract Read/Write/DeferredWrite/
//! Migratable interfaces every storage backend implements some subset of.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{ContentObject, ObjectId};

/// A backend that can serve previously stored content.
#[async_trait]
pub trait ReadBackend: Send + Sync {
    /// Human-readable name used in logs and error messages.
    fn name(&self) -> &str;

    /// Fetch an object's bytes and metadata. Fails with
    /// `Error::NonexistentObject` if this backend does not have it.
    async fn get_object(&self, id: &ObjectId) -> Result<(ContentObject, Vec<u8>)>;

    /// Cheaper existence check than `get_object`, used by the remote
    /// backend's `HEAD` and by verification to probe without transferring
    /// bytes when a backend can answer without a full fetch. The default
    /// implementation falls back to a full fetch.
    async fn exists(&self, id: &ObjectId) -> Result<bool> {
        match self.get_object(id).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e, crate::error::Error::NonexistentObject { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// A backend that can accept synchronous writes.
#[async_trait]
pub trait WriteBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Store `content`, returning the id it was stored under.
    ///
    /// If the backend is content-addressed it computes its own id and, when
    /// `object_id` is supplied, verifies it matches. If the backend is
    /// opaque (e.g. S3), `object_id` is required. Non-empty `metadata` fails
    /// with `Error::NotImplemented`.
    async fn store_object(
        &self,
        content: &[u8],
        content_type: &str,
        metadata: &BTreeMap<String, String>,
        created: Option<DateTime<Utc>>,
        object_id: Option<&ObjectId>,
    ) -> Result<ObjectId>;
}

/// Marker capability: writes to this backend are queued via the upload
/// scheduler rather than invoked synchronously from `storeObject`.
#[async_trait]
pub trait DeferredWriteBackend: WriteBackend {
    /// An opaque reference used to key `PendingUpload` rows for this
    /// backend (e.g. a configured backend name).
    fn backend_ref(&self) -> &str;
}

/// Capability for durably enqueuing a deferred write. Implemented by the
/// local backend, whose indexed store hosts the `PendingUpload` table; the
/// coordinator depends on this trait rather than on `entropy-local` directly
/// so it stays backend-agnostic.
#[async_trait]
pub trait PendingUploadSink: Send + Sync {
    async fn create_pending_upload(
        &self,
        object_id: &ObjectId,
        backend: &str,
        scheduled: DateTime<Utc>,
    ) -> Result<()>;
}

/// Optional capability: a backend that can enumerate and replicate its
/// objects to another backend. Backends that cannot enumerate (S3, a
/// remote HTTP peer) do not implement this trait; callers that need it
/// dynamically should treat its absence as `Error::NotImplemented`.
#[async_trait]
pub trait Migratable: Send + Sync {
    /// Snapshot the current max ordinal id and prepare a migration plan
    /// bounded by it. Returns the bounds `(start, end)` a `Migration`
    /// should be constructed with.
    async fn snapshot_bounds(&self) -> Result<(i64, i64)>;
}
