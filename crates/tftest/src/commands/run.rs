//! `tftest run`
//!
//! Drives one session end to end: apply, optional refresh, print the state
//! document on stdout, then tear down. Logs go to stderr so stdout stays
//! machine-readable.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tftest_core::config::HarnessConfig;
use tftest_core::{Harness, State};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub plan: PathBuf,
    pub refresh: bool,
    pub keep: bool,
    pub hold: bool,
    pub forward: bool,
}

pub async fn execute_run(config: HarnessConfig, args: RunArgs) -> Result<()> {
    let config = if args.keep {
        config.with_auto_cleanup(false)
    } else {
        config
    };
    let harness = Harness::new(config);

    #[cfg(unix)]
    harness.handle_signals(args.forward)?;

    let outcome = provision(&harness, &args).await;

    if outcome.is_ok() && args.hold {
        hold(&harness).await;
    }

    if args.keep {
        if let Some(dir) = harness.plan_dir() {
            info!("Keeping resources; working directory {}", dir.display());
        }
    }

    let teardown = harness.teardown().await.context("Teardown failed");
    outcome.and(teardown)
}

async fn provision(harness: &Harness, args: &RunArgs) -> Result<()> {
    harness
        .apply(&args.plan)
        .await
        .with_context(|| format!("Failed to apply {}", args.plan.display()))?;

    if args.refresh {
        harness.refresh().await.context("Failed to refresh")?;
    }

    let state = harness
        .state()
        .context("Apply finished without a state document")?;
    print_state(&state)
}

fn print_state(state: &State) -> Result<()> {
    let rendered = serde_json::to_string_pretty(state)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(unix)]
async fn hold(harness: &Harness) {
    info!("Holding until SIGINT or SIGTERM");
    if harness.wait_for_signal().await {
        warn!("Interrupted while holding; resources destroyed");
    }
}

#[cfg(not(unix))]
async fn hold(_harness: &Harness) {
    warn!("--hold is only supported on unix; continuing to teardown");
}
