//! Process-private scratch directory
//!
//! Every spool and spill file of a run lives under one [`ScratchSpace`]. The
//! directory is removed when the value is dropped, which covers every early
//! return and unwinding path; [`ScratchSpace::close`] removes it explicitly
//! so that removal failures surface as errors on the normal path.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;
use tempfile::TempDir;

use crate::error::{ResourceError, Result};

const SCRATCH_PREFIX: &str = "genmod_";

#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
    counter: AtomicUsize,
}
impl ScratchSpace {
    /// Create a scratch directory under `parent`, or the system temp directory
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let parent = parent.map_or_else(std::env::temp_dir, Path::to_path_buf);
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&parent)
            .map_err(|source| ResourceError::CreateScratch {
                path: parent.clone(),
                source,
            })?;
        debug!("Created scratch directory {}", dir.path().display());
        Ok(Self {
            dir,
            counter: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh, unique file path inside the scratch directory
    ///
    /// Names are generated from a counter; they never encode record content.
    #[must_use]
    pub fn file(&self, stem: &str, extension: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir.path().join(format!("{stem}_{n:05}.{extension}"))
    }

    /// Remove the directory and everything in it
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|source| ResourceError::RemoveScratch {
                path: path.clone(),
                source,
            })?;
        debug!("Removed scratch directory {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_removes_everything() {
        let parent = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(Some(parent.path())).unwrap();
        let file = scratch.file("partition", "spool");
        std::fs::write(&file, "data").unwrap();
        let path = scratch.path().to_path_buf();
        assert!(path.starts_with(parent.path()));

        scratch.close().unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_removes_on_error_paths() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchSpace::new(Some(parent.path())).unwrap();
            std::fs::write(scratch.file("spill", "zst"), "x").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_unique_names() {
        let scratch = ScratchSpace::new(None).unwrap();
        assert_ne!(scratch.file("a", "b"), scratch.file("a", "b"));
    }

    #[test]
    fn test_uncreatable_parent() {
        let err = ScratchSpace::new(Some(Path::new("/definitely/not/a/dir"))).unwrap_err();
        assert!(matches!(err, crate::Error::ResourceError(_)));
    }
}
