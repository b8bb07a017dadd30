//! HTTP surface (ambient A4): the axum router implementing the wire contract
//! documented in spec.md §6, built over an `entropy-coordinator::Coordinator`.
//! Grounded in the router/handler shape of the pack's `echo-session-ws-gateway`
//! (see DESIGN.md), trimmed down to a plain request/response surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use entropy_core::{DeferredWriteBackend, Error, ObjectId, Result, WriteBackend, DEFAULT_CONTENT_TYPE};
use entropy_coordinator::Coordinator;
use entropy_scheduler::Scheduler;
use md5::{Digest as _, Md5};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Adapts any synchronous `WriteBackend` into a `DeferredWriteBackend` keyed
/// by a configured name, for backends the coordinator should only reach via
/// the upload scheduler.
pub struct Deferred {
    backend: Arc<dyn WriteBackend>,
    name: String,
}

impl Deferred {
    #[must_use]
    pub fn new(backend: Arc<dyn WriteBackend>, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
        }
    }
}

#[async_trait]
impl WriteBackend for Deferred {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn store_object(
        &self,
        content: &[u8],
        content_type: &str,
        metadata: &BTreeMap<String, String>,
        created: Option<DateTime<Utc>>,
        object_id: Option<&ObjectId>,
    ) -> Result<ObjectId> {
        self.backend.store_object(content, content_type, metadata, created, object_id).await
    }
}

#[async_trait]
impl DeferredWriteBackend for Deferred {
    fn backend_ref(&self) -> &str {
        &self.name
    }
}

/// Shared state handed to every handler.
pub struct AppState {
    coordinator: Coordinator,
    /// Woken after a store that enqueued deferred uploads, so they are not
    /// left waiting for the scheduler's own idle wake timer.
    scheduler: Option<Arc<Scheduler>>,
}

impl AppState {
    #[must_use]
    pub fn new(coordinator: Coordinator, scheduler: Option<Arc<Scheduler>>) -> Self {
        Self { coordinator, scheduler }
    }
}

/// Build the router described in spec.md §6. `GET`/`PUT` on `/new` and
/// `GET` on `/:object_id` are exact; axum dispatches unmatched methods on a
/// matched path as `405` and serves `HEAD` on a `GET` route automatically.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/new", get(new_info).put(store))
        .route("/{object_id}", get(get_object))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    "Entropy"
}

async fn new_info() -> &'static str {
    "PUT data here to create an object."
}

async fn store(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    if let Some(declared) = headers.get("content-md5").and_then(|v| v.to_str().ok()) {
        let mut hasher = Md5::new();
        hasher.update(&body);
        let actual = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
        if actual != declared {
            return (
                StatusCode::BAD_REQUEST,
                format!("Content-MD5 mismatch: header said {declared}, body hashes to {actual}"),
            )
                .into_response();
        }
    }

    match state
        .coordinator
        .store_object(&body, &content_type, &BTreeMap::new(), None)
        .await
    {
        Ok(id) => {
            if let Some(scheduler) = &state.scheduler {
                scheduler.wake();
            }
            (StatusCode::OK, id.to_string()).into_response()
        }
        Err(e) => store_error_response(&e),
    }
}

async fn get_object(State(state): State<Arc<AppState>>, Path(object_id): Path<String>) -> Response {
    let id = match ObjectId::parse(&object_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    match state.coordinator.get_object(&id).await {
        Ok((obj, bytes)) => {
            let content_type = HeaderValue::from_str(obj.content_type())
                .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(Error::NonexistentObject { .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(Error::CorruptObject { object_id, .. }) => {
            error!(object_id = %object_id, "object failed verification on read");
            (StatusCode::INTERNAL_SERVER_ERROR, "object is corrupt").into_response()
        }
        Err(e) => {
            warn!(object_id = %id, error = %e, "failed to read object");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

fn store_error_response(e: &Error) -> Response {
    match e {
        Error::DigestMismatch { .. } => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Error::NotImplemented { .. } => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        _ => {
            error!(error = %e, "failed to store object");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}
