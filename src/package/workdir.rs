//! Scoped scratch space for downloads and extraction

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch directory removed when dropped
///
/// Created under an explicit parent rather than a process-wide temp location,
/// so concurrent preparations never share files.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a fresh directory under `parent` (created when missing)
    pub fn new_in(parent: impl AsRef<Path>) -> io::Result<Self> {
        let parent = parent.as_ref();
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("tmmt-").tempdir_in(parent)?;
        log::debug!("created work directory {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Create a fresh directory under the system temp location
    pub fn new() -> io::Result<Self> {
        Self::new_in(std::env::temp_dir())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Sub-directory of the work directory, created on demand
    pub fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Keep the directory on disk and return its path
    pub fn persist(self) -> PathBuf {
        self.dir.keep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let workdir = WorkDir::new_in(parent.path().join("work")).unwrap();
            std::fs::write(workdir.path().join("a.txt"), "x").unwrap();
            assert!(workdir.subdir("downloads").unwrap().is_dir());
            workdir.path().to_path_buf()
        };
        assert!(path.starts_with(parent.path()));
        assert!(!path.exists());
    }

    #[test]
    fn test_persist_keeps_directory() {
        let parent = tempfile::tempdir().unwrap();
        let path = WorkDir::new_in(parent.path()).unwrap().persist();
        assert!(path.is_dir());
    }
}
