//! Upload scheduler (C8): a single persistent "wake" timer driving deferred
//! writes to completion with a fixed back-off on failure.
//!
//! Grounded in the retry-loop shape of the teacher's `cuenv_remote::retry`
//! (see DESIGN.md) and the `IUploadScheduler.wake`/`attemptUpload` contract
//! recovered from `original_source/entropy/backends/localaxiom.py`, but using
//! a *fixed* interval rather than exponential backoff, per spec.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use entropy_core::{Error, ObjectId, ReadBackend, Result, WriteBackend};
use entropy_local::{LocalBackend, PendingUploadRow};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Fixed back-off applied to a `PendingUpload` row after a failed attempt.
pub const BACKOFF: ChronoDuration = ChronoDuration::minutes(2);

/// Durable, single-flight dispatcher of `PendingUpload` rows against their
/// configured deferred backends.
pub struct Scheduler {
    local: Arc<LocalBackend>,
    backends: HashMap<String, Arc<dyn WriteBackend>>,
    notify: Arc<Notify>,
}

impl Scheduler {
    #[must_use]
    pub fn new(local: Arc<LocalBackend>, backends: HashMap<String, Arc<dyn WriteBackend>>) -> Self {
        Self {
            local,
            backends,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Re-evaluate the dispatch loop: wakes the scheduler if it is
    /// currently sleeping on a future-scheduled row or idling with an empty
    /// queue. Callers invoke this after creating a new `PendingUpload`.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Run the scheduler until `shutdown` resolves. Schedules an immediate
    /// wake on entry, per spec.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        self.wake();
        loop {
            tokio::select! {
                () = self.dispatch_once() => {}
                _ = &mut shutdown => {
                    info!("scheduler shutting down; in-flight uploads will finish, no new work will be dispatched");
                    break;
                }
            }
        }
    }

    /// One iteration of the wake/dispatch/sleep state machine described in
    /// spec §4.8. Returns once it has either dispatched an upload or gone
    /// to sleep and woken back up (by timer or external `wake()`).
    async fn dispatch_once(&self) {
        let now = Utc::now();
        match self.local.earliest_due_upload(now) {
            Ok(Some(row)) => {
                let _ = self.attempt_upload(&row).await;
            }
            Ok(None) => match self.local.earliest_upload() {
                Ok(Some(row)) => {
                    let wait = (row.scheduled - now).to_std().unwrap_or(StdDuration::ZERO);
                    debug!(seconds = wait.as_secs(), "scheduler idle, next upload due later");
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        () = self.notify.notified() => {}
                    }
                }
                Ok(None) => {
                    debug!("no pending uploads, scheduler idling");
                    self.notify.notified().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to query earliest pending upload");
                    self.notify.notified().await;
                }
            },
            Err(e) => {
                error!(error = %e, "failed to query due pending uploads");
                self.notify.notified().await;
            }
        }
    }

    /// Load the local object, push it to its target backend, and either
    /// delete the row on success or advance `scheduled` by `BACKOFF` on
    /// failure. The error (if any) is returned so tests and `dispatch_once`
    /// can observe it, but it never aborts the service loop.
    pub async fn attempt_upload(&self, row: &PendingUploadRow) -> Result<()> {
        let id = ObjectId::parse(&row.object_id)?;
        let backend = self.backends.get(&row.backend).ok_or_else(|| {
            Error::configuration(format!("no deferred backend registered as {:?}", row.backend))
        })?;

        let attempt = async {
            let (obj, bytes) = self.local.get_object(&id).await?;
            backend
                .store_object(&bytes, obj.content_type(), obj.metadata(), Some(obj.created()), Some(&id))
                .await
        }
        .await;

        match attempt {
            Ok(_) => {
                self.local.delete_pending_upload(row.id)?;
                debug!(object_id = %id, backend = %row.backend, "deferred upload succeeded");
                Ok(())
            }
            Err(e) => {
                warn!(object_id = %id, backend = %row.backend, error = %e, "deferred upload failed, backing off");
                let rescheduled = row.scheduled + BACKOFF;
                self.local.reschedule_pending_upload(row.id, rescheduled)?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use entropy_core::HashAlgorithm;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FlakyBackend {
        calls: AtomicUsize,
        fail_until: usize,
        stored: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl WriteBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn store_object(
            &self,
            content: &[u8],
            _content_type: &str,
            _metadata: &BTreeMap<String, String>,
            _created: Option<chrono::DateTime<Utc>>,
            object_id: Option<&ObjectId>,
        ) -> Result<ObjectId> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_until {
                return Err(Error::api_error(503, "temporarily unavailable", None));
            }
            self.stored.lock().unwrap().push(content.to_vec());
            Ok(object_id.cloned().unwrap_or_else(|| ObjectId::compute(HashAlgorithm::Sha256, content)))
        }
    }

    fn local() -> Arc<LocalBackend> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(LocalBackend::open_ephemeral("local", dir.keep(), HashAlgorithm::Sha256).unwrap())
    }

    #[tokio::test]
    async fn failed_attempt_advances_scheduled_by_exactly_one_backoff() {
        let local = local();
        let id = local
            .store_object(b"object1", "text/plain", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        let scheduled = Utc::now();
        let row_id = local.create_pending_upload(&id, "flaky", scheduled).unwrap();

        let mut backends: HashMap<String, Arc<dyn WriteBackend>> = HashMap::new();
        let flaky = Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_until: 1,
            stored: Mutex::new(Vec::new()),
        });
        backends.insert("flaky".to_string(), flaky.clone());
        let scheduler = Scheduler::new(local.clone(), backends);

        let row = PendingUploadRow {
            id: row_id,
            object_id: id.to_string(),
            backend: "flaky".to_string(),
            scheduled,
        };
        let err = scheduler.attempt_upload(&row).await.unwrap_err();
        assert!(matches!(err, Error::ApiError { .. }));

        let still_pending = local.earliest_upload().unwrap().unwrap();
        assert_eq!(
            (still_pending.scheduled - scheduled).num_seconds(),
            BACKOFF.num_seconds()
        );

        // Second attempt, after the clock has effectively advanced, succeeds.
        let row2 = PendingUploadRow {
            scheduled: still_pending.scheduled,
            ..row
        };
        scheduler.attempt_upload(&row2).await.unwrap();
        assert!(local.earliest_upload().unwrap().is_none());
        assert_eq!(flaky.stored.lock().unwrap().len(), 1);
    }
}
