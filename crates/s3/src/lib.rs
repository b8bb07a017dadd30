//! Object-store cloud backend (C6): put/get against a named S3-compatible
//! bucket, addressed by object id. This backend is opaque-addressed — it
//! never computes its own digest, so callers must always supply `object_id`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_http_client::{tls, Builder as SmithyHttpClientBuilder};
use chrono::{DateTime, Utc};
use entropy_core::{ContentObject, Error, ObjectId, ReadBackend, Result, WriteBackend};
use tracing::{debug, instrument};

/// S3 (or S3-compatible) bucket backend.
pub struct S3Backend {
    name: String,
    bucket: String,
    client: Client,
}

impl S3Backend {
    /// Build an S3 client the same way the workspace's secrets resolvers do:
    /// a rustls/ring-backed Smithy HTTP client feeding the default AWS
    /// config loader.
    pub async fn new(name: impl Into<String>, bucket: impl Into<String>) -> Self {
        let http_client = SmithyHttpClientBuilder::new()
            .tls_provider(tls::Provider::Rustls(tls::rustls_provider::CryptoMode::Ring))
            .build_https();
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .http_client(http_client)
            .load()
            .await;
        Self {
            name: name.into(),
            bucket: bucket.into(),
            client: Client::new(&config),
        }
    }

    /// Construct directly from a pre-built client, used by tests against a
    /// local S3-compatible endpoint.
    #[must_use]
    pub fn from_client(name: impl Into<String>, bucket: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            client,
        }
    }
}

#[async_trait]
impl ReadBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self))]
    async fn get_object(&self, id: &ObjectId) -> Result<(ContentObject, Vec<u8>)> {
        let key = id.to_string();
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_no_such_key() => Error::nonexistent_object(&key),
                _ => Error::api_error(0, e.to_string(), None),
            })?;

        let content_type = output
            .content_type()
            .unwrap_or(entropy_core::DEFAULT_CONTENT_TYPE)
            .to_string();
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| Error::api_error(0, e.to_string(), None))?
            .into_bytes()
            .to_vec();

        let obj = ContentObject::new(
            id.clone(),
            std::path::PathBuf::from(&key),
            Some(content_type),
            None,
            BTreeMap::new(),
        )?;
        Ok((obj, bytes))
    }

    #[instrument(skip(self))]
    async fn exists(&self, id: &ObjectId) -> Result<bool> {
        let key = id.to_string();
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(Error::api_error(0, e.to_string(), None))
                }
            }
        }
    }
}

#[async_trait]
impl WriteBackend for S3Backend {
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
        object_id: Option<&ObjectId>,
    ) -> Result<ObjectId> {
        if !metadata.is_empty() {
            return Err(Error::not_implemented("non-empty object metadata"));
        }
        let id = object_id
            .cloned()
            .ok_or_else(|| Error::configuration("S3 backend requires an explicit object_id"))?;

        let key = id.to_string();
        debug!(bucket = %self.bucket, key = %key, "uploading to S3");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(content.to_vec()))
            .send()
            .await
            .map_err(|e| Error::api_error(0, e.to_string(), None))?;

        Ok(id)
    }
}

