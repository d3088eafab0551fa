//! Plan file materialisation
//!
//! The caller's definition file is copied verbatim into the session working
//! directory under a fixed name before `init` runs.

use crate::errors::SetupError;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fixed filename of the copied plan inside the working directory
pub const PLAN_FILENAME: &str = "plan.tf";

/// Copy `source` to `<dir>/plan.tf`, returning the target path.
pub fn materialize(source: &Path, dir: &Path) -> Result<PathBuf, SetupError> {
    let mut reader = File::open(source).map_err(|e| SetupError::PlanUnreadable {
        path: source.to_path_buf(),
        source: e,
    })?;

    let target = dir.join(PLAN_FILENAME);
    let mut writer = File::create(&target).map_err(|e| SetupError::PlanCopy {
        path: target.clone(),
        source: e,
    })?;

    let copied = io::copy(&mut reader, &mut writer).map_err(|e| SetupError::PlanCopy {
        path: target.clone(),
        source: e,
    })?;

    debug!(
        "Copied {} bytes from {} to {}",
        copied,
        source.display(),
        target.display()
    );
    Ok(target)
}
