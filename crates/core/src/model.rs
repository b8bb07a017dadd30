//! Object model (C2): the content-addressed identity/verification contract.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;

/// MIME type assumed when a caller does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// The stable identifier returned to clients: `<algo>:<lowercase-hex-digest>`.
///
/// `ObjectId` is a pure function of the bytes and the hash algorithm used to
/// address them — it carries no reference to any particular backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    hash: HashAlgorithm,
    digest: String,
}

impl ObjectId {
    /// Construct an id directly from an algorithm and an already-lowercased
    /// hex digest. Does not verify that `digest` is valid hex.
    #[must_use]
    pub fn new(hash: HashAlgorithm, digest: String) -> Self {
        Self { hash, digest }
    }

    /// Compute the id for `content` under `hash`.
    #[must_use]
    pub fn compute(hash: HashAlgorithm, content: &[u8]) -> Self {
        Self {
            hash,
            digest: hash.hexdigest(content),
        }
    }

    /// Parse `"algo:digest"`, splitting on the first colon.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo, digest) = s
            .split_once(':')
            .ok_or_else(|| Error::nonexistent_object(s))?;
        let hash = HashAlgorithm::lookup(algo)?;
        Ok(Self {
            hash,
            digest: digest.to_string(),
        })
    }

    #[must_use]
    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The first 4 hex characters of the digest (3 if shorter), used to cap
    /// directory fan-out in the local backend's on-disk layout.
    #[must_use]
    pub fn bucket(&self) -> &str {
        let len = self.digest.len().min(4);
        &self.digest[..len]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.digest)
    }
}

/// An immutable content object: identity, on-disk blob reference, and a
/// verification contract. Constructed and owned by `ReadBackend`/`WriteBackend`
/// implementations; the coordinator and HTTP layer only ever see the id,
/// content type, and bytes.
#[derive(Debug, Clone)]
pub struct ContentObject {
    id: ObjectId,
    /// Path to the on-disk blob, relative to a backend's base directory.
    content_path: PathBuf,
    content_type: String,
    created: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
}

impl ContentObject {
    /// Construct a `ContentObject` record. `metadata` is validated here: the
    /// core has no implementation for user metadata, matching the source's
    /// explicit `NotImplementedError` for non-empty maps.
    pub fn new(
        id: ObjectId,
        content_path: PathBuf,
        content_type: Option<String>,
        created: Option<DateTime<Utc>>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self> {
        if !metadata.is_empty() {
            return Err(Error::not_implemented("non-empty object metadata"));
        }
        Ok(Self {
            id,
            content_path,
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            created: created.unwrap_or_else(Utc::now),
            metadata,
        })
    }

    #[must_use]
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    #[must_use]
    pub fn content_path(&self) -> &std::path::Path {
        &self.content_path
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Apply the two mutable fields updated on re-ingestion.
    pub fn touch(&mut self, content_type: Option<String>, created: Option<DateTime<Utc>>) {
        if let Some(content_type) = content_type {
            self.content_type = content_type;
        }
        if let Some(created) = created {
            self.created = created;
        }
    }

    /// Re-hash `bytes` and compare against the stored digest. Callers read
    /// the bytes themselves (the backend knows how to reach the blob, on
    /// disk or otherwise); this keeps the model free of I/O.
    pub fn verify(&self, bytes: &[u8]) -> Result<()> {
        let actual = self.id.hash().hexdigest(bytes);
        if actual == self.id.digest() {
            Ok(())
        } else {
            Err(Error::corrupt_object(
                self.id.to_string(),
                self.id.digest(),
                actual,
            ))
        }
    }
}

/// The bucket-fan-out relative path `objects/immutable/<bucket>/<algo>:<digest>`.
#[must_use]
pub fn blob_relative_path(id: &ObjectId) -> PathBuf {
    PathBuf::from("objects")
        .join("immutable")
        .join(id.bucket())
        .join(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_display_and_parse_roundtrip() {
        let id = ObjectId::compute(HashAlgorithm::Sha256, b"somecontent");
        let s = id.to_string();
        assert_eq!(
            s,
            "sha256:d5a3477d91583e65a7aba6f6db7a53e2de739bc7bf8f4a08f0df0457b637f1fb"
        );
        let parsed = ObjectId::parse(&s).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn object_id_is_pure_function_of_bytes() {
        let a = ObjectId::compute(HashAlgorithm::Sha256, b"blahblah some data blahblah");
        let b = ObjectId::compute(HashAlgorithm::Sha256, b"blahblah some data blahblah");
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_is_leading_hex_chars() {
        let id = ObjectId::new(HashAlgorithm::Sha256, "d5a3477d91583e65".to_string());
        assert_eq!(id.bucket(), "d5a3");
    }

    #[test]
    fn non_empty_metadata_rejected() {
        let id = ObjectId::compute(HashAlgorithm::Sha256, b"x");
        let mut metadata = BTreeMap::new();
        metadata.insert("k".to_string(), "v".to_string());
        let err = ContentObject::new(id, PathBuf::from("x"), None, None, metadata).unwrap_err();
        assert!(matches!(err, Error::NotImplemented { .. }));
    }

    #[test]
    fn verify_detects_corruption() {
        let id = ObjectId::compute(HashAlgorithm::Sha256, b"somecontent");
        let obj = ContentObject::new(id, PathBuf::from("x"), None, None, BTreeMap::new()).unwrap();
        assert!(obj.verify(b"somecontent").is_ok());
        assert!(matches!(
            obj.verify(b"garbage!"),
            Err(Error::CorruptObject { .. })
        ));
    }
}
