//! Structured configuration (ambient A2): the TOML schema described in
//! spec.md §6 "Configuration". Grounded in the teacher's
//! `core::config::Config`/`BackendConfig` shape (see DESIGN.md), swapping
//! CUE-sourced deserialization for plain `toml`.

use std::path::{Path, PathBuf};

use entropy_core::{Error, HashAlgorithm, Result};
use serde::{Deserialize, Serialize};

fn default_hash_algorithm() -> String {
    "sha256".to_string()
}

/// Top-level configuration for one Entropy deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    pub base_dir: PathBuf,

    #[serde(default)]
    pub read_backends: Vec<BackendDescriptor>,

    #[serde(default)]
    pub write_backends: Vec<BackendDescriptor>,

    #[serde(default)]
    pub deferred_write_backends: Vec<BackendDescriptor>,

    /// HTTP listen address for the `entropyd` binary, e.g. `"0.0.0.0:8080"`.
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// Read and parse a config file. I/O and TOML errors both surface as
    /// `Error::Configuration`; the content itself is not otherwise validated
    /// here (backend construction validates its own options).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("reading {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::configuration(e.to_string()))
    }

    /// Resolve `hash_algorithm` against the hash registry. Deferred to use
    /// time rather than parse time, matching `getHash`'s `UnknownHashAlgorithm`
    /// being raised where the name is looked up, not where it's read.
    pub fn hash_algorithm(&self) -> Result<HashAlgorithm> {
        HashAlgorithm::lookup(&self.hash_algorithm)
    }
}

/// One entry in an ordered backend list. List order is priority; backends
/// are tried/written in the order they appear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub options: BackendOptions,
}

/// Per-backend options, tagged by `type`. Local backends need nothing beyond
/// the deployment's `base_dir`/`hash_algorithm`; remote and cloud backends
/// carry their own connection details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendOptions {
    Local,
    Remote {
        url: String,
    },
    S3 {
        bucket: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        access_key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        secret_key: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_example_config() {
        let text = r#"
            base_dir = "/var/lib/entropy"
            listen = "0.0.0.0:9090"

            [[read_backends]]
            name = "local"
            type = "local"

            [[read_backends]]
            name = "peer-a"
            type = "remote"
            url = "http://peer-a:8080"

            [[write_backends]]
            name = "local"
            type = "local"

            [[deferred_write_backends]]
            name = "cold"
            type = "s3"
            bucket = "entropy-cold"
            access_key = "AKIA..."
            secret_key = "shh"
        "#;
        let config = Config::parse(text).unwrap();
        assert_eq!(config.hash_algorithm, "sha256");
        assert_eq!(config.base_dir, PathBuf::from("/var/lib/entropy"));
        assert_eq!(config.listen, "0.0.0.0:9090");
        assert_eq!(config.read_backends.len(), 2);
        assert_eq!(config.read_backends[0].options, BackendOptions::Local);
        assert_eq!(
            config.read_backends[1].options,
            BackendOptions::Remote {
                url: "http://peer-a:8080".to_string()
            }
        );
        assert_eq!(config.deferred_write_backends.len(), 1);
        assert!(matches!(
            config.deferred_write_backends[0].options,
            BackendOptions::S3 { .. }
        ));
    }

    #[test]
    fn defaults_hash_algorithm_and_listen_address() {
        let config = Config::parse(r#"base_dir = "/tmp/entropy""#).unwrap();
        assert_eq!(config.hash_algorithm, "sha256");
        assert_eq!(config.listen, "127.0.0.1:8080");
        assert!(config.read_backends.is_empty());
    }

    #[test]
    fn unknown_hash_algorithm_fails_at_resolution_not_parse() {
        let text = r#"
            hash_algorithm = "md5"
            base_dir = "/tmp/entropy"
        "#;
        let config = Config::parse(text).unwrap();
        assert!(matches!(
            config.hash_algorithm(),
            Err(Error::UnknownHashAlgorithm { .. })
        ));
    }

    #[test]
    fn missing_base_dir_is_a_configuration_error() {
        let err = Config::parse("listen = \"0.0.0.0:1\"").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
