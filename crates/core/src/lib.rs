//! Core library for tftest
//!
//! Drives an external infrastructure-provisioning tool from inside automated
//! tests: apply a plan in a fresh working directory, expose the decoded state,
//! and make sure the resources are destroyed again, even when the test process
//! is interrupted.
//!
//! ```no_run
//! # async fn example() -> tftest_core::errors::Result<()> {
//! use tftest_core::harness::Harness;
//!
//! let harness = Harness::from_env()?;
//! harness.handle_signals(true)?;
//! harness.apply("testdata/docker-test.tf").await?;
//! assert!(harness.state().is_some_and(|s| !s.is_empty()));
//! harness.teardown().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod errors;
pub mod harness;
pub mod logging;
pub mod plan;
pub mod runner;
#[cfg(unix)]
pub mod signals;
pub mod state;

pub use harness::{Harness, Phase};
pub use state::State;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
