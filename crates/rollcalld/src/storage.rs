//! Atomic file persistence.
//!
//! Both gallery enrollment and annotated-output persistence go through a
//! staged write: bytes land in a uniquely-named sibling temp file which is
//! renamed over the final name on commit. Readers never observe a partial
//! file, and the staged temp is removed on every exit path that does not
//! commit, including panics unwinding through the guard.

use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A staged write that must be explicitly committed.
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Stage `bytes` next to `target` under a unique temp name.
    pub fn stage(target: &Path, bytes: &[u8]) -> std::io::Result<Self> {
        let file_name = target
            .file_name()
            .ok_or_else(|| std::io::Error::other("target path has no file name"))?
            .to_string_lossy()
            .into_owned();
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let temp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let mut file = std::fs::File::create(&temp)?;
        let staged = Self {
            temp,
            target: target.to_path_buf(),
            committed: false,
        };
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(staged)
    }

    /// Atomically move the staged bytes into place.
    pub fn commit(mut self) -> std::io::Result<()> {
        std::fs::rename(&self.temp, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Stage and commit in one step.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    StagedFile::stage(target, bytes)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_write_atomic_creates_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("photo.jpg");

        write_atomic(&target, b"image bytes").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"image bytes");
        assert_eq!(dir_entries(dir.path()), vec!["photo.jpg"]);
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("photo.jpg");

        let staged = StagedFile::stage(&target, b"bytes").unwrap();
        drop(staged);

        assert!(dir_entries(dir.path()).is_empty());
    }

    #[test]
    fn test_commit_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("photo.jpg");
        std::fs::write(&target, b"old").unwrap();

        write_atomic(&target, b"new").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }
}
