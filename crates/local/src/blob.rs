//! On-disk blob storage: atomic create-then-rename writes under a two-level
//! `objects/immutable/<bucket>/<algo>:<digest>` layout, adapted from the
//! teacher's `CasStore` to the core's bucket-per-digest-prefix convention.

use std::fs;
use std::path::{Path, PathBuf};

use entropy_core::{blob_relative_path, Error, ObjectId, Result};

/// Resolve the absolute path a blob for `id` lives (or would live) at, rooted
/// under `base_dir`.
#[must_use]
pub fn blob_path(base_dir: &Path, id: &ObjectId) -> PathBuf {
    base_dir.join(blob_relative_path(id))
}

/// Write `content` to `id`'s blob path atomically: the bytes land in a
/// sibling temp file first, then `rename` makes the final path appear (or
/// not) in one step, so a concurrent reader never observes a partial write.
pub fn write_atomic(base_dir: &Path, id: &ObjectId, content: &[u8]) -> Result<PathBuf> {
    let path = blob_path(base_dir, id);
    let dir = path.parent().ok_or_else(|| {
        Error::io(
            "resolve parent directory",
            std::io::Error::other("blob path has no parent"),
        )
    })?;
    fs::create_dir_all(dir).map_err(|e| Error::io("create bucket directory", e))?;

    let tmp_path = dir.join(format!(".{}.tmp", id.digest()));
    fs::write(&tmp_path, content).map_err(|e| Error::io("write temp blob", e))?;
    fs::rename(&tmp_path, &path).map_err(|e| Error::io("rename temp blob into place", e))?;
    Ok(path)
}

/// Read the bytes at `path`.
pub fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::io("read blob", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use entropy_core::HashAlgorithm;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let id = ObjectId::compute(HashAlgorithm::Sha256, b"somecontent");
        let path = write_atomic(dir.path(), &id, b"somecontent").unwrap();
        assert_eq!(read(&path).unwrap(), b"somecontent");
        assert!(path
            .to_string_lossy()
            .contains("objects/immutable"));
    }

    #[test]
    fn bucket_fan_out_caps_directory_size() {
        let dir = tempfile::tempdir().unwrap();
        let id = ObjectId::compute(HashAlgorithm::Sha256, b"blahblah some data blahblah");
        let path = write_atomic(dir.path(), &id, b"blahblah some data blahblah").unwrap();
        let bucket_dir = path.parent().unwrap();
        assert_eq!(bucket_dir.file_name().unwrap().to_str().unwrap(), id.bucket());
    }
}
