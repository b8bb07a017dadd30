//! Error taxonomy shared by every Entropy backend and the coordinator.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias used throughout the Entropy workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing, retrieving, or migrating content.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// `getHash` was asked for an algorithm that is not in the registry.
    #[error("unknown hash algorithm: {name}")]
    #[diagnostic(
        code(entropy::unknown_hash_algorithm),
        help("only algorithms registered in the hash registry (e.g. \"sha256\") are supported")
    )]
    UnknownHashAlgorithm { name: String },

    /// No configured backend holds the requested object.
    #[error("object not found: {object_id}")]
    #[diagnostic(
        code(entropy::nonexistent_object),
        help("the object may not have been stored yet, or may have been evicted by a backend outside the core's control")
    )]
    NonexistentObject { object_id: String },

    /// `verify()` found that the on-disk bytes no longer hash to the stored digest.
    #[error("object {object_id} is corrupt: expected digest {expected}, found {actual}")]
    #[diagnostic(
        code(entropy::corrupt_object),
        help("run a verification migration against a backend known to hold a good copy")
    )]
    CorruptObject {
        object_id: String,
        expected: String,
        actual: String,
    },

    /// The HTTP `Content-MD5` header disagreed with the uploaded body.
    #[error("Content-MD5 mismatch: expected {expected}, computed {actual}")]
    #[diagnostic(code(entropy::digest_mismatch))]
    DigestMismatch { expected: String, actual: String },

    /// A remote or cloud backend returned a non-success status.
    #[error("backend API error ({code}): {message}")]
    #[diagnostic(code(entropy::api_error))]
    ApiError {
        code: u16,
        message: String,
        reason: Option<String>,
    },

    /// The coordinator was asked to read but has no `ReadBackend` configured.
    #[error("no read backends configured")]
    #[diagnostic(
        code(entropy::no_read_backends),
        help("configure at least one entry in `read_backends`")
    )]
    NoReadBackends,

    /// The coordinator was asked to write but has no `WriteBackend` configured.
    #[error("no write backends configured")]
    #[diagnostic(
        code(entropy::no_write_backends),
        help("configure at least one entry in `write_backends`")
    )]
    NoWriteBackends,

    /// Verification found no backend holding a copy matching the expected digest.
    #[error("no good copies of {object_id} found during verification")]
    #[diagnostic(
        code(entropy::no_good_copies),
        help("every reachable backend is missing or corrupt for this object; manual recovery is required")
    )]
    NoGoodCopies { object_id: String },

    /// A backend returned an object whose own declared digest disagrees with
    /// the digest the coordinator asked for — a backend bug, not corruption.
    #[error("backend returned unexpected digest for {object_id}")]
    #[diagnostic(
        code(entropy::unexpected_digest),
        help("the backend that returned this object has a bug: it served the wrong blob for this id")
    )]
    UnexpectedDigest { object_id: String },

    /// A capability a backend does not support was invoked (non-empty
    /// metadata, `migrateTo` on a non-enumerable backend, etc).
    #[error("not implemented: {what}")]
    #[diagnostic(code(entropy::not_implemented))]
    NotImplemented { what: String },

    /// Invalid or missing configuration.
    #[error("configuration error: {message}")]
    #[diagnostic(code(entropy::configuration))]
    Configuration { message: String },

    /// An I/O failure against the local blob store or its index.
    #[error("I/O error during {operation}")]
    #[diagnostic(code(entropy::io))]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// A failure in the local index database.
    #[error("index store error during {operation}")]
    #[diagnostic(code(entropy::index))]
    Index {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn unknown_hash_algorithm(name: impl Into<String>) -> Self {
        Self::UnknownHashAlgorithm { name: name.into() }
    }

    pub fn nonexistent_object(object_id: impl Into<String>) -> Self {
        Self::NonexistentObject {
            object_id: object_id.into(),
        }
    }

    pub fn corrupt_object(
        object_id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::CorruptObject {
            object_id: object_id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn digest_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn api_error(code: u16, message: impl Into<String>, reason: Option<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            reason,
        }
    }

    pub fn no_good_copies(object_id: impl Into<String>) -> Self {
        Self::NoGoodCopies {
            object_id: object_id.into(),
        }
    }

    pub fn unexpected_digest(object_id: impl Into<String>) -> Self {
        Self::UnexpectedDigest {
            object_id: object_id.into(),
        }
    }

    pub fn not_implemented(what: impl Into<String>) -> Self {
        Self::NotImplemented { what: what.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn index(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Index {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Whether a failure of this kind is worth retrying (transient) as
    /// opposed to fatal for the object it concerns. Used by the upload
    /// scheduler and migration engine to decide between backoff-and-retry
    /// and recording a permanent per-object failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { code, .. } => !(400..500).contains(code),
            Self::Io { .. } | Self::Index { .. } => true,
            Self::UnexpectedDigest { .. } | Self::NoGoodCopies { .. } => false,
            Self::UnknownHashAlgorithm { .. }
            | Self::NonexistentObject { .. }
            | Self::CorruptObject { .. }
            | Self::DigestMismatch { .. }
            | Self::NoReadBackends
            | Self::NoWriteBackends
            | Self::NotImplemented { .. }
            | Self::Configuration { .. } => false,
        }
    }
}
