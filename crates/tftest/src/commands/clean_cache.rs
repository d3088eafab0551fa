//! `tftest clean-cache`

use anyhow::{Context, Result};
use tftest_core::cache::PluginCache;
use tracing::info;

pub fn execute_clean_cache(cache: &PluginCache) -> Result<()> {
    cache
        .clean()
        .with_context(|| format!("Failed to remove plugin cache {}", cache.path().display()))?;
    info!("Removed plugin cache {}", cache.path().display());
    Ok(())
}
