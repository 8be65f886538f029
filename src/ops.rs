//! Injected filesystem capabilities.
//!
//! Components that touch the filesystem take a [`SysOps`] handle instead
//! of calling `std::fs` directly, so tests can substitute fakes without
//! any process-wide mutable state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

/// Small set of filesystem operations the coordinator needs.
pub trait SysOps: Send + Sync {
    /// Write `contents` to `path`, creating parent directories as needed.
    fn create_file(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Create a fresh isolated temporary directory whose name starts
    /// with `prefix`. The caller owns removal.
    fn create_temp_dir(&self, prefix: &str) -> io::Result<PathBuf>;

    /// Remove a file or directory tree. Missing paths are not an error.
    fn remove_path(&self, path: &Path) -> io::Result<()>;
}

/// [`SysOps`] backed by the real filesystem.
pub struct RealSysOps;

impl SysOps for RealSysOps {
    fn create_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    fn create_temp_dir(&self, prefix: &str) -> io::Result<PathBuf> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        // Detach from the guard; removal is an explicit teardown step.
        Ok(dir.keep())
    }

    fn remove_path(&self, path: &Path) -> io::Result<()> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Deletes the on-disk gossip keyring during teardown so a re-bootstrapped
/// node never reuses stale key material.
pub struct KeyringRemover {
    path: PathBuf,
    ops: Arc<dyn SysOps>,
}

impl KeyringRemover {
    pub fn new(path: PathBuf, ops: Arc<dyn SysOps>) -> Self {
        Self { path, ops }
    }

    /// Remove the keyring file if present.
    pub fn remove(&self) -> io::Result<()> {
        info!("removing keyring file {}", self.path.display());
        self.ops.remove_path(&self.path)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
