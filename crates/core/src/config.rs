//! Harness configuration
//!
//! Everything a session needs to know about the host is collected here and
//! handed to [`crate::harness::Harness::new`], so sessions never read mutable
//! process globals. [`HarnessConfig::from_env`] applies the supported
//! environment overrides.

use crate::cache::PluginCache;
use crate::errors::SetupError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Overrides the external tool executable
pub const TOOL_ENV: &str = "TFTEST_TERRAFORM";
/// Any non-empty value suppresses automatic teardown after apply
pub const NO_CLEANUP_ENV: &str = "NO_CLEANUP";
/// Overrides the plugin cache location
pub const PLUGIN_CACHE_DIR_ENV: &str = "TFTEST_PLUGIN_CACHE_DIR";
/// Executable looked up on `PATH` when no override is set
pub const DEFAULT_TOOL: &str = "terraform";

/// Session configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    tool_path: PathBuf,
    plugin_cache: PluginCache,
    auto_cleanup: bool,
    state_file: Option<PathBuf>,
    work_root: Option<PathBuf>,
}

impl HarnessConfig {
    /// Configuration for an explicit tool path with default settings
    pub fn new(tool_path: impl Into<PathBuf>) -> Self {
        Self {
            tool_path: tool_path.into(),
            plugin_cache: PluginCache::default(),
            auto_cleanup: true,
            state_file: None,
            work_root: None,
        }
    }

    /// Build configuration from the process environment.
    ///
    /// Precedence for the tool: `TFTEST_TERRAFORM` > `terraform` on `PATH`.
    pub fn from_env() -> Result<Self, SetupError> {
        Ok(Self::new(locate_tool()?).with_env_overrides())
    }

    /// Apply `TFTEST_PLUGIN_CACHE_DIR` and `NO_CLEANUP`, leaving the tool path alone.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = non_empty_env(PLUGIN_CACHE_DIR_ENV) {
            self.plugin_cache = PluginCache::new(dir);
        }
        if non_empty_env(NO_CLEANUP_ENV).is_some() {
            debug!("{} set; automatic teardown disabled", NO_CLEANUP_ENV);
            self.auto_cleanup = false;
        }
        self
    }

    pub fn with_tool_path(mut self, tool_path: impl Into<PathBuf>) -> Self {
        self.tool_path = tool_path.into();
        self
    }

    pub fn with_plugin_cache(mut self, plugin_cache: PluginCache) -> Self {
        self.plugin_cache = plugin_cache;
        self
    }

    /// Whether apply arms a deferred destroy
    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = auto_cleanup;
        self
    }

    /// Read state from (and point the tool at) an explicit state file
    pub fn with_state_file(mut self, state_file: impl Into<PathBuf>) -> Self {
        self.state_file = Some(state_file.into());
        self
    }

    /// Parent directory for session working directories
    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(work_root.into());
        self
    }

    pub fn tool_path(&self) -> &Path {
        &self.tool_path
    }

    pub fn plugin_cache(&self) -> &PluginCache {
        &self.plugin_cache
    }

    pub fn auto_cleanup(&self) -> bool {
        self.auto_cleanup
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    pub fn work_root(&self) -> Option<&Path> {
        self.work_root.as_deref()
    }
}

/// Resolve the external tool: the env override verbatim, else a `PATH` lookup.
pub fn locate_tool() -> Result<PathBuf, SetupError> {
    if let Some(path) = non_empty_env(TOOL_ENV) {
        debug!("Using tool from {}: {}", TOOL_ENV, path);
        return Ok(PathBuf::from(path));
    }

    which::which(DEFAULT_TOOL).map_err(|e| {
        debug!("PATH lookup for {} failed: {}", DEFAULT_TOOL, e);
        SetupError::ExecutableNotFound {
            name: DEFAULT_TOOL.to_string(),
        }
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
