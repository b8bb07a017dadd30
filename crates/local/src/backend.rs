//! The local backend (C4): the authoritative on-disk store plus its indexed
//! row table. Implements `ReadBackend`/`WriteBackend` and exposes the extra
//! operations (`migrate_to`, `_nextObject`, pending-upload bookkeeping) that
//! the scheduler and migration engine drive directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entropy_core::{
    ContentObject, Error, HashAlgorithm, ObjectId, PendingUploadSink, ReadBackend, Result, WriteBackend,
};
use tracing::{debug, instrument};

use crate::blob;
use crate::db::{Index, MigrationRow, PendingMigrationRow, PendingUploadRow};

/// The on-disk content-addressed store: blob files under `<base>/objects/...`
/// and an indexed SQLite table alongside them.
pub struct LocalBackend {
    name: String,
    base_dir: PathBuf,
    hash: HashAlgorithm,
    index: Index,
}

impl LocalBackend {
    /// Open (creating if absent) a local backend rooted at `base_dir`, with
    /// its index database at `<base_dir>/index.sqlite3`.
    pub fn open(name: impl Into<String>, base_dir: impl Into<PathBuf>, hash: HashAlgorithm) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| Error::io("create base_dir", e))?;
        let index = Index::open(&base_dir.join("index.sqlite3"))?;
        Ok(Self {
            name: name.into(),
            base_dir,
            hash,
            index,
        })
    }

    /// An in-memory-indexed backend (blobs still land on disk under
    /// `base_dir`), used by tests so each run starts from an empty index.
    pub fn open_ephemeral(name: impl Into<String>, base_dir: impl Into<PathBuf>, hash: HashAlgorithm) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| Error::io("create base_dir", e))?;
        Ok(Self {
            name: name.into(),
            base_dir,
            hash,
            index: Index::open_in_memory()?,
        })
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Read the raw bytes for an object already known to exist, without
    /// going through the full `get_object` row lookup. Used by the scheduler
    /// and migration engine, which already hold the object id.
    pub fn read_content(&self, id: &ObjectId) -> Result<Vec<u8>> {
        blob::read(&blob::blob_path(&self.base_dir, id))
    }

    /// `migrateTo`: snapshot the current max ordinal and create a Migration
    /// row bounding `(0, max_ordinal]`.
    pub fn migrate_to(&self, destination: Option<&str>, concurrency: i64) -> Result<MigrationRow> {
        let end = self.index.max_ordinal()?;
        self.index.create_migration(&self.name, destination, 0, end, concurrency)
    }

    pub fn next_migration_object(&self, migration_id: i64) -> Result<Option<PendingMigrationRow>> {
        self.index.next_migration_object(migration_id)
    }

    pub fn pending_migrations_for(&self, migration_id: i64) -> Result<Vec<PendingMigrationRow>> {
        self.index.pending_migrations_for(migration_id)
    }

    pub fn delete_pending_migration(&self, id: i64) -> Result<()> {
        self.index.delete_pending_migration(id)
    }

    pub fn record_migration_failure(&self, id: i64, trace: &str) -> Result<()> {
        self.index.record_migration_failure(id, trace)
    }

    pub fn create_pending_upload(&self, object_id: &ObjectId, backend: &str, scheduled: DateTime<Utc>) -> Result<i64> {
        self.index.create_pending_upload(&object_id.to_string(), backend, scheduled)
    }

    pub fn earliest_due_upload(&self, now: DateTime<Utc>) -> Result<Option<PendingUploadRow>> {
        self.index.earliest_due_upload(now)
    }

    pub fn earliest_upload(&self) -> Result<Option<PendingUploadRow>> {
        self.index.earliest_upload()
    }

    pub fn delete_pending_upload(&self, id: i64) -> Result<()> {
        self.index.delete_pending_upload(id)
    }

    pub fn reschedule_pending_upload(&self, id: i64, scheduled: DateTime<Utc>) -> Result<()> {
        self.index.reschedule_pending_upload(id, scheduled)
    }
}

#[async_trait]
impl ReadBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self))]
    async fn get_object(&self, id: &ObjectId) -> Result<(ContentObject, Vec<u8>)> {
        let row = self
            .index
            .find_by_hash_digest(id.hash().name(), id.digest())?
            .ok_or_else(|| Error::nonexistent_object(id.to_string()))?;

        let content_path = self.base_dir.join(&row.content_path);
        let bytes = blob::read(&content_path)?;
        let obj = ContentObject::new(
            id.clone(),
            PathBuf::from(&row.content_path),
            Some(row.content_type),
            Some(row.created),
            BTreeMap::new(),
        )?;
        Ok((obj, bytes))
    }
}

#[async_trait]
impl WriteBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, content, metadata))]
    async fn store_object(
        &self,
        content: &[u8],
        content_type: &str,
        metadata: &BTreeMap<String, String>,
        created: Option<DateTime<Utc>>,
        object_id: Option<&ObjectId>,
    ) -> Result<ObjectId> {
        if !metadata.is_empty() {
            return Err(Error::not_implemented("non-empty object metadata"));
        }

        let digest = self.hash.hexdigest(content);
        let id = ObjectId::new(self.hash, digest.clone());

        if let Some(supplied) = object_id {
            if *supplied != id {
                return Err(Error::unexpected_digest(supplied.to_string()));
            }
        }

        let created = created.unwrap_or_else(Utc::now);
        let content_type = if content_type.is_empty() {
            entropy_core::DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };

        if let Some(existing) = self.index.find_by_hash_digest(self.hash.name(), &digest)? {
            debug!(object_id = %id, "re-ingesting existing object, updating metadata only");
            self.index.update_content_metadata(existing.ordinal, content_type, created)?;
            return Ok(id);
        }

        let relative = entropy_core::blob_relative_path(&id);
        blob::write_atomic(&self.base_dir, &id, content)?;
        self.index.insert_content(
            self.hash.name(),
            &digest,
            relative.to_string_lossy().as_ref(),
            content_type,
            created,
        )?;

        Ok(id)
    }
}

#[async_trait]
impl PendingUploadSink for LocalBackend {
    async fn create_pending_upload(&self, object_id: &ObjectId, backend: &str, scheduled: DateTime<Utc>) -> Result<()> {
        self.index.create_pending_upload(&object_id.to_string(), backend, scheduled)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> LocalBackend {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.keep();
        LocalBackend::open_ephemeral("local", path, HashAlgorithm::Sha256).unwrap()
    }

    #[tokio::test]
    async fn store_then_get_round_trips_bytes_and_content_type() {
        let backend = backend();
        let id = backend
            .store_object(b"blahblah some data blahblah", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        assert_eq!(
            id.to_string(),
            "sha256:9aef0e119873bb0aab04e941d8f76daf21dedcd79e2024004766ee3b22ca9862"
        );
        let (obj, bytes) = backend.get_object(&id).await.unwrap();
        assert_eq!(bytes, b"blahblah some data blahblah");
        assert_eq!(obj.content_type(), "text/plain");
    }

    #[tokio::test]
    async fn store_is_idempotent_and_does_not_duplicate_blobs() {
        let backend = backend();
        let id1 = backend
            .store_object(b"somecontent", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let id2 = backend
            .store_object(b"somecontent", "application/json", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        assert_eq!(id1, id2);
        let (obj, _) = backend.get_object(&id1).await.unwrap();
        assert_eq!(obj.content_type(), "application/json");
    }

    #[tokio::test]
    async fn missing_object_fails() {
        let backend = backend();
        let id = ObjectId::compute(HashAlgorithm::Sha256, b"nope");
        let err = backend.get_object(&id).await.unwrap_err();
        assert!(matches!(err, Error::NonexistentObject { .. }));
    }

    #[tokio::test]
    async fn corrupted_blob_fails_verify_not_get() {
        let backend = backend();
        let id = backend
            .store_object(b"somecontent", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let path = blob::blob_path(backend.base_dir(), &id);
        std::fs::write(&path, b"garbage!").unwrap();
        let (obj, bytes) = backend.get_object(&id).await.unwrap();
        assert!(obj.verify(&bytes).is_err());
    }

    #[tokio::test]
    async fn migrate_to_snapshots_current_max_ordinal() {
        let backend = backend();
        backend
            .store_object(b"object1", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        backend
            .store_object(b"object2", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let migration = backend.migrate_to(None, 4).unwrap();
        assert_eq!(migration.end, 2);

        // Objects created after the snapshot must not be in range.
        backend
            .store_object(b"object3", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let next = backend.next_migration_object(migration.id).unwrap();
        assert!(next.is_some());
        let next = backend.next_migration_object(migration.id).unwrap();
        assert!(next.is_some());
        let next = backend.next_migration_object(migration.id).unwrap();
        assert!(next.is_none(), "object3 is outside the snapshot range");
    }
}
