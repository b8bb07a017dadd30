//! Storage coordinator (C7): the user-facing `IContentStore`. Composes an
//! ordered list of `ReadBackend`s (priority search), an ordered list of
//! synchronous `WriteBackend`s, and a list of `DeferredWriteBackend`s whose
//! writes are enqueued rather than invoked inline.
//!
//! Grounded in the priority/fallback read search and concurrent write
//! fan-out of `MultiBackend` (see DESIGN.md), adapted to Entropy's
//! first-hit-wins read semantics and first-failure-surfaces write semantics.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use entropy_core::{
    ContentObject, DeferredWriteBackend, Error, ObjectId, PendingUploadSink, ReadBackend, Result,
    WriteBackend,
};
use tracing::{debug, warn};

/// Composes Entropy's configured backends into a single read/write surface.
pub struct Coordinator {
    read_backends: Vec<Arc<dyn ReadBackend>>,
    write_backends: Vec<Arc<dyn WriteBackend>>,
    deferred_backends: Vec<Arc<dyn DeferredWriteBackend>>,
    /// Backend re-stored-into on a non-local read hit (typically the same
    /// underlying local store as `read_backends[0]`).
    import_target: Option<Arc<dyn WriteBackend>>,
    /// Where `PendingUpload` rows are recorded for deferred backends
    /// (typically the same underlying local store).
    pending_sink: Option<Arc<dyn PendingUploadSink>>,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        read_backends: Vec<Arc<dyn ReadBackend>>,
        write_backends: Vec<Arc<dyn WriteBackend>>,
        deferred_backends: Vec<Arc<dyn DeferredWriteBackend>>,
        import_target: Option<Arc<dyn WriteBackend>>,
        pending_sink: Option<Arc<dyn PendingUploadSink>>,
    ) -> Self {
        Self {
            read_backends,
            write_backends,
            deferred_backends,
            import_target,
            pending_sink,
        }
    }

    /// Try each `ReadBackend` in configured order. The first success wins;
    /// `NonexistentObject` moves on to the next backend, any other error
    /// surfaces immediately. A hit on a non-first backend is best-effort
    /// imported into `import_target`.
    pub async fn get_object(&self, id: &ObjectId) -> Result<(ContentObject, Vec<u8>)> {
        if self.read_backends.is_empty() {
            return Err(Error::NoReadBackends);
        }

        for (i, backend) in self.read_backends.iter().enumerate() {
            match backend.get_object(id).await {
                Ok((obj, bytes)) => {
                    if i > 0 {
                        self.best_effort_import(id, &obj, &bytes).await;
                    }
                    return Ok((obj, bytes));
                }
                Err(Error::NonexistentObject { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(Error::nonexistent_object(id.to_string()))
    }

    async fn best_effort_import(&self, id: &ObjectId, obj: &ContentObject, bytes: &[u8]) {
        let Some(target) = &self.import_target else {
            return;
        };
        let result = target
            .store_object(bytes, obj.content_type(), &BTreeMap::new(), Some(obj.created()), Some(id))
            .await;
        if let Err(e) = result {
            warn!(object_id = %id, error = %e, "best-effort import into local cache failed");
        }
    }

    /// Write `content` to every synchronous backend (first failure
    /// surfaces; earlier backends are not rolled back — safe because
    /// objects are content-addressed), then enqueue a `PendingUpload` per
    /// deferred backend. Returns the id all backends agree on.
    pub async fn store_object(
        &self,
        content: &[u8],
        content_type: &str,
        metadata: &BTreeMap<String, String>,
        created: Option<DateTime<Utc>>,
    ) -> Result<ObjectId> {
        if self.write_backends.is_empty() {
            return Err(Error::NoWriteBackends);
        }

        let mut id: Option<ObjectId> = None;
        for backend in &self.write_backends {
            let stored = backend
                .store_object(content, content_type, metadata, created, id.as_ref())
                .await?;
            id = Some(stored);
        }
        let id = id.expect("write_backends is non-empty, so id was set in the loop above");

        if let Some(sink) = &self.pending_sink {
            let now = Utc::now();
            for backend in &self.deferred_backends {
                if let Err(e) = sink.create_pending_upload(&id, backend.backend_ref(), now).await {
                    warn!(object_id = %id, backend = backend.backend_ref(), error = %e, "failed to enqueue deferred upload");
                    return Err(e);
                }
                debug!(object_id = %id, backend = backend.backend_ref(), "enqueued deferred upload");
            }
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use entropy_core::{HashAlgorithm, DEFAULT_CONTENT_TYPE};
    use std::sync::Mutex;

    struct MockBackend {
        name: String,
        objects: Mutex<BTreeMap<String, (ContentObject, Vec<u8>)>>,
    }

    impl MockBackend {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                objects: Mutex::new(BTreeMap::new()),
            }
        }

        fn seed(&self, id: ObjectId, content: Vec<u8>) {
            let obj = ContentObject::new(
                id.clone(),
                std::path::PathBuf::from(id.to_string()),
                Some(DEFAULT_CONTENT_TYPE.to_string()),
                None,
                BTreeMap::new(),
            )
            .unwrap();
            self.objects.lock().unwrap().insert(id.to_string(), (obj, content));
        }
    }

    #[async_trait]
    impl ReadBackend for MockBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_object(&self, id: &ObjectId) -> Result<(ContentObject, Vec<u8>)> {
            self.objects
                .lock()
                .unwrap()
                .get(&id.to_string())
                .cloned()
                .ok_or_else(|| Error::nonexistent_object(id.to_string()))
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
            content_type: &str,
            metadata: &BTreeMap<String, String>,
            created: Option<DateTime<Utc>>,
            object_id: Option<&ObjectId>,
        ) -> Result<ObjectId> {
            if !metadata.is_empty() {
                return Err(Error::not_implemented("metadata"));
            }
            let id = object_id.cloned().unwrap_or_else(|| {
                ObjectId::compute(HashAlgorithm::Sha256, content)
            });
            let obj = ContentObject::new(
                id.clone(),
                std::path::PathBuf::from(id.to_string()),
                Some(content_type.to_string()),
                created,
                BTreeMap::new(),
            )?;
            self.objects
                .lock()
                .unwrap()
                .insert(id.to_string(), (obj, content.to_vec()));
            Ok(id)
        }
    }

    #[tokio::test]
    async fn read_search_tries_backends_in_order_and_stops_at_first_hit() {
        let l1 = Arc::new(MockBackend::new("l1"));
        let l2 = Arc::new(MockBackend::new("l2"));
        let id = ObjectId::compute(HashAlgorithm::Sha256, b"somecontent");
        l2.seed(id.clone(), b"somecontent".to_vec());

        let coordinator = Coordinator::new(
            vec![l1.clone(), l2.clone()],
            vec![l1.clone()],
            vec![],
            Some(l1.clone()),
            None,
        );

        let (_, bytes) = coordinator.get_object(&id).await.unwrap();
        assert_eq!(bytes, b"somecontent");
        // Best-effort import into l1 (index 0) should have happened.
        assert!(l1.objects.lock().unwrap().contains_key(&id.to_string()));
    }

    #[tokio::test]
    async fn no_backend_has_it_is_nonexistent() {
        let l1 = Arc::new(MockBackend::new("l1"));
        let coordinator = Coordinator::new(vec![l1.clone()], vec![l1.clone()], vec![], None, None);
        let id = ObjectId::compute(HashAlgorithm::Sha256, b"missing");
        let err = coordinator.get_object(&id).await.unwrap_err();
        assert!(matches!(err, Error::NonexistentObject { .. }));
    }

    #[tokio::test]
    async fn store_object_writes_to_all_synchronous_backends() {
        let l1 = Arc::new(MockBackend::new("l1"));
        let l2 = Arc::new(MockBackend::new("l2"));
        let coordinator = Coordinator::new(
            vec![l1.clone()],
            vec![l1.clone(), l2.clone()],
            vec![],
            None,
            None,
        );
        let id = coordinator
            .store_object(b"blahblah some data blahblah", "text/plain", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(l1.objects.lock().unwrap().contains_key(&id.to_string()));
        assert!(l2.objects.lock().unwrap().contains_key(&id.to_string()));
    }

    #[tokio::test]
    async fn no_write_backends_is_an_error() {
        let coordinator = Coordinator::new(vec![], vec![], vec![], None, None);
        let err = coordinator
            .store_object(b"x", "text/plain", &BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoWriteBackends));
    }
}
