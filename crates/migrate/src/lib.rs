//! Migration engine (C9): snapshot-bounded replication and verify-and-repair
//! across backends, with transactional object iteration and bounded
//! concurrency. Grounded in `LocalStoreMigration`/`PendingMigration` from
//! `original_source/entropy/backends/localaxiom.py` (see DESIGN.md).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use entropy_core::{ObjectId, ReadBackend, WriteBackend};
use entropy_local::{LocalBackend, MigrationRow, PendingMigrationRow};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// One non-authoritative backend consulted during verification: read access
/// to detect missing/corrupt copies, write access to repair them. Typically
/// the same physical backend cast to both trait objects.
pub struct ReplicaBackend {
    pub read: Arc<dyn ReadBackend>,
    pub write: Arc<dyn WriteBackend>,
}

/// Drives a single `Migration` to completion: either replicating every
/// object in its snapshot range to `destination`, or (when `destination` is
/// `None`) verifying every configured replica against the source and
/// repairing divergence.
pub struct MigrationEngine {
    local: Arc<LocalBackend>,
    migration: MigrationRow,
    destination: Option<Arc<dyn WriteBackend>>,
    replicas: Vec<ReplicaBackend>,
    running: Arc<AtomicBool>,
}

impl MigrationEngine {
    #[must_use]
    pub fn new(
        local: Arc<LocalBackend>,
        migration: MigrationRow,
        destination: Option<Arc<dyn WriteBackend>>,
        replicas: Vec<ReplicaBackend>,
    ) -> Self {
        Self {
            local,
            migration,
            destination,
            replicas,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn migration_id(&self) -> i64 {
        self.migration.id
    }

    /// Idempotent and re-entrant: a concurrent or already-in-flight call is
    /// a no-op. Spawns `concurrency` workers pulling from a shared stream
    /// that chains pre-existing `PendingMigration` rows with a lazily
    /// produced `_nextObject()` sequence.
    pub async fn run(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(migration_id = self.migration.id, "migration already running, ignoring run()");
            return;
        }

        let pre_existing = self
            .local
            .pending_migrations_for(self.migration.id)
            .unwrap_or_default();
        let queue = Arc::new(Mutex::new(VecDeque::from(pre_existing)));

        let concurrency = self.migration.concurrency.max(1) as usize;
        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let engine = Arc::clone(self);
            let queue = Arc::clone(&queue);
            workers.spawn(async move { engine.worker_loop(queue).await });
        }
        while workers.join_next().await.is_some() {}

        self.running.store(false, Ordering::SeqCst);
    }

    async fn worker_loop(&self, queue: Arc<Mutex<VecDeque<PendingMigrationRow>>>) {
        loop {
            let next = {
                let mut q = queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                q.pop_front()
            };
            let pending = match next {
                Some(p) => p,
                None => match self.local.next_migration_object(self.migration.id) {
                    Ok(Some(p)) => p,
                    Ok(None) => return,
                    Err(e) => {
                        error!(migration_id = self.migration.id, error = %e, "failed to pull next migration object");
                        return;
                    }
                },
            };
            self.attempt_migration(&pending).await;
        }
    }

    /// `attemptMigration`: replicate to `destination`, or run the
    /// verify-and-repair protocol when there is none.
    async fn attempt_migration(&self, pending: &PendingMigrationRow) {
        let id = match ObjectId::parse(&pending.object_id) {
            Ok(id) => id,
            Err(e) => {
                let _ = self.local.record_migration_failure(pending.id, &e.to_string());
                return;
            }
        };

        if let Some(destination) = &self.destination {
            match self.local.get_object(&id).await {
                Ok((obj, bytes)) => {
                    let result = destination
                        .store_object(&bytes, obj.content_type(), obj.metadata(), Some(obj.created()), Some(&id))
                        .await;
                    match result {
                        Ok(_) => {
                            let _ = self.local.delete_pending_migration(pending.id);
                        }
                        Err(e) => {
                            warn!(object_id = %id, error = %e, "migration copy failed, will retry next run");
                            let _ = self.local.record_migration_failure(pending.id, &e.to_string());
                        }
                    }
                }
                Err(e) => {
                    let _ = self.local.record_migration_failure(pending.id, &e.to_string());
                }
            }
            return;
        }

        self.verify_and_repair(pending, &id).await;
    }

    /// The verify-and-repair protocol (spec §4.9): fetch the object from
    /// every configured backend, classify each copy as good/missing/corrupt,
    /// and repair any non-good backend from a good copy. Fatal per-object
    /// outcomes (`UnexpectedDigest`, `NoGoodCopies`) leave the tracking row
    /// in place for inspection instead of retrying.
    async fn verify_and_repair(&self, pending: &PendingMigrationRow, id: &ObjectId) {
        let mut good_content: Option<Vec<u8>> = None;
        let mut repair_targets: Vec<Arc<dyn WriteBackend>> = Vec::new();

        // The source participates like any other backend (spec §4.9:
        // `backends = [source] ++ siblings ++ cloud`) — a corrupted or
        // missing local blob is itself a repair target, not just a
        // quarantine-and-move-on case.
        match self.local.get_object(id).await {
            Ok((obj, bytes)) => {
                if obj.id() != id {
                    let _ = self.local.record_migration_failure(
                        pending.id,
                        &format!("source returned unexpected digest for {id}"),
                    );
                    return;
                }
                if obj.verify(&bytes).is_ok() {
                    good_content = Some(bytes);
                } else {
                    self.quarantine(id, "source", &bytes);
                    repair_targets.push(Arc::clone(&self.local) as Arc<dyn WriteBackend>);
                }
            }
            Err(e) if is_nonexistent(&e) => {
                debug!(object_id = %id, backend = "source", "missing during verification");
                repair_targets.push(Arc::clone(&self.local) as Arc<dyn WriteBackend>);
            }
            Err(e) => {
                let _ = self.local.record_migration_failure(pending.id, &e.to_string());
                return;
            }
        }

        for replica in &self.replicas {
            match replica.read.get_object(id).await {
                Ok((obj, bytes)) => {
                    if obj.id() != id {
                        let _ = self.local.record_migration_failure(
                            pending.id,
                            &format!("backend {} returned unexpected digest for {id}", replica.read.name()),
                        );
                        return;
                    }
                    if obj.verify(&bytes).is_ok() {
                        if good_content.is_none() {
                            good_content = Some(bytes);
                        }
                    } else {
                        self.quarantine(id, replica.read.name(), &bytes);
                        repair_targets.push(Arc::clone(&replica.write));
                    }
                }
                Err(e) if is_nonexistent(&e) => {
                    repair_targets.push(Arc::clone(&replica.write));
                }
                Err(e) => {
                    warn!(object_id = %id, backend = replica.read.name(), error = %e, "transient error during verification, retrying next run");
                    let _ = self.local.record_migration_failure(pending.id, &e.to_string());
                    return;
                }
            }
        }

        let Some(content) = good_content else {
            let _ = self.local.record_migration_failure(pending.id, "no good copies found");
            return;
        };

        if repair_targets.is_empty() {
            let _ = self.local.delete_pending_migration(pending.id);
            return;
        }

        let repairs = repair_targets.iter().map(|backend| {
            let backend = Arc::clone(backend);
            let content = content.clone();
            let id = id.clone();
            async move {
                backend
                    .store_object(&content, entropy_core::DEFAULT_CONTENT_TYPE, &Default::default(), Some(Utc::now()), Some(&id))
                    .await
            }
        });
        let results = futures::future::join_all(repairs).await;

        if results.iter().all(Result::is_ok) {
            let _ = self.local.delete_pending_migration(pending.id);
        } else {
            let failures = results
                .into_iter()
                .filter_map(std::result::Result::err)
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let _ = self.local.record_migration_failure(pending.id, &failures);
        }
    }

    fn quarantine(&self, id: &ObjectId, backend_name: &str, bytes: &[u8]) {
        let dir = self.local.base_dir().join("quarantine");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(error = %e, "failed to create quarantine directory");
            return;
        }
        let path = dir.join(format!("{}-{}-{}", id.digest(), backend_name, Utc::now().timestamp_nanos_opt().unwrap_or_default()));
        if let Err(e) = std::fs::write(&path, bytes) {
            warn!(error = %e, path = %path.display(), "failed to write quarantine file");
        }
    }
}

fn is_nonexistent(e: &entropy_core::Error) -> bool {
    matches!(e, entropy_core::Error::NonexistentObject { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use entropy_core::{ContentObject, Error, HashAlgorithm, Result as CoreResult, DEFAULT_CONTENT_TYPE};
    use std::collections::BTreeMap;

    struct MockBackend {
        name: String,
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl MockBackend {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                objects: Mutex::new(BTreeMap::new()),
            }
        }
    }

    #[async_trait]
    impl ReadBackend for MockBackend {
        fn name(&self) -> &str {
            &self.name
        }
        async fn get_object(&self, id: &ObjectId) -> CoreResult<(ContentObject, Vec<u8>)> {
            let bytes = self
                .objects
                .lock()
                .unwrap()
                .get(&id.to_string())
                .cloned()
                .ok_or_else(|| Error::nonexistent_object(id.to_string()))?;
            let obj = ContentObject::new(
                id.clone(),
                std::path::PathBuf::from(id.to_string()),
                Some(DEFAULT_CONTENT_TYPE.to_string()),
                None,
                BTreeMap::new(),
            )?;
            Ok((obj, bytes))
        }
    }

    #[async_trait]
    impl WriteBackend for MockBackend {
        fn name(&self) -> &str {
            &self.name
        }
        async fn store_object(
            &self,
            content: &[u8],
            _content_type: &str,
            _metadata: &BTreeMap<String, String>,
            _created: Option<chrono::DateTime<Utc>>,
            object_id: Option<&ObjectId>,
        ) -> CoreResult<ObjectId> {
            let id = object_id
                .cloned()
                .unwrap_or_else(|| ObjectId::compute(HashAlgorithm::Sha256, content));
            self.objects.lock().unwrap().insert(id.to_string(), content.to_vec());
            Ok(id)
        }
    }

    fn local() -> Arc<LocalBackend> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(LocalBackend::open_ephemeral("local", dir.keep(), HashAlgorithm::Sha256).unwrap())
    }

    #[tokio::test]
    async fn migration_snapshot_excludes_objects_created_after_end() {
        use entropy_core::WriteBackend as _;

        let local_backend = local();
        local_backend
            .store_object(b"object1", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        local_backend
            .store_object(b"object2", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let migration = local_backend.migrate_to(Some("mock"), 2).unwrap();

        // Created after the snapshot instant: must not be migrated.
        local_backend
            .store_object(b"object2-again-after-snapshot", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();

        let mock = Arc::new(MockBackend::new("mock"));
        let engine = Arc::new(MigrationEngine::new(
            local_backend.clone(),
            migration,
            Some(mock.clone()),
            vec![],
        ));
        engine.run().await;

        assert_eq!(mock.objects.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rerunning_while_idle_processes_remaining_work_once() {
        use entropy_core::WriteBackend as _;
        let local_backend = local();
        local_backend
            .store_object(b"object1", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let migration = local_backend.migrate_to(Some("mock"), 4).unwrap();
        let mock = Arc::new(MockBackend::new("mock"));
        let engine = Arc::new(MigrationEngine::new(local_backend.clone(), migration, Some(mock.clone()), vec![]));
        engine.run().await;
        engine.run().await;
        assert_eq!(mock.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn verification_repairs_corrupt_sibling_from_good_copy() {
        use entropy_core::WriteBackend as _;
        let local_backend = local();
        let id = local_backend
            .store_object(b"somecontent", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let migration = local_backend.migrate_to(None, 2).unwrap();

        let sibling = Arc::new(MockBackend::new("sibling"));
        sibling
            .objects
            .lock()
            .unwrap()
            .insert(id.to_string(), b"damaged".to_vec());

        let replicas = vec![ReplicaBackend {
            read: sibling.clone(),
            write: sibling.clone(),
        }];
        let engine = Arc::new(MigrationEngine::new(local_backend.clone(), migration, None, replicas));
        engine.run().await;

        assert_eq!(
            sibling.objects.lock().unwrap().get(&id.to_string()).unwrap(),
            b"somecontent"
        );
    }

    #[tokio::test]
    async fn verification_repairs_source_from_good_sibling_copy() {
        use entropy_core::WriteBackend as _;
        let local_backend = local();
        let id = local_backend
            .store_object(b"somecontent", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let migration = local_backend.migrate_to(None, 2).unwrap();

        // Damage the source's on-disk blob directly, leaving its index row
        // (and thus the digest it claims to hold) intact.
        let blob_path = local_backend.base_dir().join(entropy_core::blob_relative_path(&id));
        std::fs::write(&blob_path, b"corrupted").unwrap();

        let sibling = Arc::new(MockBackend::new("sibling"));
        sibling.objects.lock().unwrap().insert(id.to_string(), b"somecontent".to_vec());

        let replicas = vec![ReplicaBackend {
            read: sibling.clone(),
            write: sibling.clone(),
        }];
        let engine = Arc::new(MigrationEngine::new(local_backend.clone(), migration, None, replicas));
        engine.run().await;

        assert_eq!(local_backend.read_content(&id).unwrap(), b"somecontent");
    }
}
