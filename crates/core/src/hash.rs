//! Hash registry (C1): map an algorithm name to a hasher, rejecting names
//! the core does not recognize.

use crate::error::{Error, Result};
use sha2::{Digest as _, Sha256};

/// A hash algorithm recognized by the registry.
///
/// The registry is a small process-wide static table; there is no way to
/// register additional algorithms at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
}

impl HashAlgorithm {
    /// Look up an algorithm by its configuration/wire name.
    ///
    /// This is `getHash` from the core spec: any name outside the registry
    /// fails with `Error::UnknownHashAlgorithm`.
    pub fn lookup(name: &str) -> Result<Self> {
        match name {
            "sha256" => Ok(Self::Sha256),
            other => Err(Error::unknown_hash_algorithm(other)),
        }
    }

    /// The canonical name used in configuration and in `objectId` strings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Hash `content` and return its lowercase hex digest.
    #[must_use]
    pub fn hexdigest(self, content: &[u8]) -> String {
        match self {
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(content);
                hex::encode(hasher.finalize())
            }
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
