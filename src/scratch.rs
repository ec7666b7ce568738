//! Exclusively owned scratch directories.
//!
//! A [`ScratchDir`] has exactly one owner. Ownership moves with the value:
//! the install session holds it while staging, and hands it to the
//! [`InstalledMachine`](crate::InstalledMachine) only once the VM is up. If
//! the session fails first, dropping it removes the directory. The
//! directory is removed once, by [`ScratchDir::release`] or by drop,
//! unless [`ScratchDir::persist`] deliberately gives it away.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `root` named `<prefix>XXXXXX`.
    pub fn new_in(root: &Path, prefix: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory and everything in it.
    pub fn release(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "removing scratch directory");
        self.dir.close()
    }

    /// Stop managing the directory; the caller now owns it on disk.
    pub fn persist(self) -> PathBuf {
        self.dir.keep()
    }
}
