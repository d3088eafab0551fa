//! Plugin cache directory
//!
//! Provider plugins downloaded by the external tool are shared across every
//! session in the process through one cache directory. The cache is purely a
//! speed-up: failing to create it never fails a session, and no locking is done
//! here. Concurrent use is left to the tool's own cache handling.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Default cache location shared by all sessions
pub const DEFAULT_PLUGIN_CACHE_DIR: &str = "/tmp/tftest/plugin_cache";

/// Environment variable the external tool reads the cache location from
pub const PLUGIN_CACHE_ENV: &str = "TF_PLUGIN_CACHE_DIR";

/// Handle to the process-wide plugin cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCache {
    dir: PathBuf,
}

impl Default for PluginCache {
    fn default() -> Self {
        Self::new(DEFAULT_PLUGIN_CACHE_DIR)
    }
}

impl PluginCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory. Errors are deliberately swallowed.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub fn init(&self) {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        if let Err(e) = builder.create(&self.dir) {
            debug!("Ignoring plugin cache creation failure: {}", e);
        }
    }

    /// Remove the cache directory and everything in it. A cache that was never
    /// created is not an error.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub fn clean(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                debug!("Removed plugin cache");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// The `(name, value)` pair appended to every invocation's environment
    pub fn env_pair(&self) -> (&'static str, &Path) {
        (PLUGIN_CACHE_ENV, &self.dir)
    }
}
