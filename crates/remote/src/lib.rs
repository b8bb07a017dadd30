//! Remote backend (C5): an HTTP client speaking the same wire surface the
//! `entropy-server` binary exposes, so one Entropy deployment can act as a
//! storage backend for another.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use entropy_core::{ContentObject, Error, ObjectId, ReadBackend, Result, WriteBackend};
use md5::{Digest as _, Md5};
use tracing::{debug, instrument};

/// HTTP client backend for a peer Entropy service.
pub struct RemoteBackend {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl RemoteBackend {
    /// `base_url` should not have a trailing slash, e.g. `http://peer:8080`.
    #[must_use]
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, id: &ObjectId) -> String {
        format!("{}/{}", self.base_url, id)
    }
}

#[async_trait]
impl ReadBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self))]
    async fn get_object(&self, id: &ObjectId) -> Result<(ContentObject, Vec<u8>)> {
        let response = self
            .client
            .get(self.object_url(id))
            .send()
            .await
            .map_err(|e| Error::api_error(0, e.to_string(), None))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::nonexistent_object(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(api_error_from_response(response).await);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(entropy_core::DEFAULT_CONTENT_TYPE)
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::api_error(0, e.to_string(), None))?
            .to_vec();

        let obj = ContentObject::new(
            id.clone(),
            std::path::PathBuf::from(id.to_string()),
            Some(content_type),
            None,
            BTreeMap::new(),
        )?;
        Ok((obj, bytes))
    }

    #[instrument(skip(self))]
    async fn exists(&self, id: &ObjectId) -> Result<bool> {
        let response = self
            .client
            .head(self.object_url(id))
            .send()
            .await
            .map_err(|e| Error::api_error(0, e.to_string(), None))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(api_error_from_response(response).await);
        }
        Ok(true)
    }
}

#[async_trait]
impl WriteBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, content, metadata))]
    async fn store_object(
        &self,
        content: &[u8],
        content_type: &str,
        metadata: &BTreeMap<String, String>,
        _created: Option<DateTime<Utc>>,
        _object_id: Option<&ObjectId>,
    ) -> Result<ObjectId> {
        if !metadata.is_empty() {
            return Err(Error::not_implemented("non-empty object metadata"));
        }

        let content_md5 = {
            let mut hasher = Md5::new();
            hasher.update(content);
            base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
        };

        debug!(url = %format!("{}/new", self.base_url), "uploading to remote peer");
        let response = self
            .client
            .put(format!("{}/new", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("Content-MD5", content_md5)
            .body(content.to_vec())
            .send()
            .await
            .map_err(|e| Error::api_error(0, e.to_string(), None))?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::digest_mismatch("peer-computed", body));
        }
        if !response.status().is_success() {
            return Err(api_error_from_response(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::api_error(0, e.to_string(), None))?;
        ObjectId::parse(body.trim())
    }
}

async fn api_error_from_response(response: reqwest::Response) -> Error {
    let code = response.status().as_u16();
    let reason = response.status().canonical_reason().map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    Error::api_error(code, body, reason)
}
