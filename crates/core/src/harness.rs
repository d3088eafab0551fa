//! Session lifecycle coordinator
//!
//! A [`Harness`] drives one provisioning session through
//! `Uninitialized -> Applied -> {Refreshed, Destroyed}`. Every invocation goes
//! through the session's [`CommandRunner`], so the signal guard's emergency
//! destroy and the test's own calls never touch the working directory at the
//! same time.
//!
//! Operations return [`crate::errors::Result`]; converting a failure into a test
//! abort is the caller's job.

use crate::config::HarnessConfig;
use crate::errors::{LifecycleError, Result, SetupError};
use crate::plan;
use crate::runner::{CommandRunner, Invocation};
use crate::state::{State, StateStore, STATE_FILENAME};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::TempDir;
use tracing::{debug, error, info, instrument, warn};

#[cfg(unix)]
use crate::signals::SignalGuard;

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No successful apply yet
    Uninitialized,
    /// Resources provisioned
    Applied,
    /// State re-read after a refresh
    Refreshed,
    /// Resources torn down; terminal
    Destroyed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Applied => "applied",
            Phase::Refreshed => "refreshed",
            Phase::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Session {
    phase: Phase,
    plan_dir: Option<PathBuf>,
    cleanup_armed: bool,
    /// Destroy invocations currently running
    destroys_in_flight: usize,
    #[cfg(unix)]
    signal_guard: Option<SignalGuard>,
    // dropped last so a drop-time destroy still finds the directory
    work_dir: Option<TempDir>,
}

#[derive(Debug)]
struct Inner {
    config: HarnessConfig,
    runner: CommandRunner,
    store: StateStore,
    session: Mutex<Session>,
}

/// Handle to one provisioning session. Clones share the session.
#[derive(Debug, Clone)]
pub struct Harness {
    inner: Arc<Inner>,
}

impl Harness {
    /// Create a session. The plugin cache directory is created best-effort.
    pub fn new(config: HarnessConfig) -> Self {
        config.plugin_cache().init();
        let runner = CommandRunner::new(config.tool_path(), config.plugin_cache().clone());

        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                store: StateStore::new(),
                session: Mutex::new(Session {
                    phase: Phase::Uninitialized,
                    plan_dir: None,
                    cleanup_armed: false,
                    destroys_in_flight: 0,
                    #[cfg(unix)]
                    signal_guard: None,
                    work_dir: None,
                }),
            }),
        }
    }

    /// Create a session configured from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(HarnessConfig::from_env()?))
    }

    /// Provision the resources described by `plan_file`.
    ///
    /// Valid once per session. Creates the working directory, copies the plan in,
    /// runs `init` then `apply`, arms the deferred destroy (unless disabled) and
    /// decodes the resulting state.
    #[instrument(skip_all, fields(plan = %plan_file.as_ref().display()))]
    pub async fn apply(&self, plan_file: impl AsRef<Path>) -> Result<()> {
        let dir = self.begin_session()?;
        plan::materialize(plan_file.as_ref(), &dir)?;

        self.invoke(
            &dir,
            vec![format!("-chdir={}", dir.display()), "init".to_string()],
        )
        .await?;

        self.ensure_not_destroying("apply")?;
        let mut args = vec!["apply".to_string(), "-auto-approve".to_string()];
        args.extend(self.state_args());
        self.invoke(&dir, args).await?;

        {
            let mut session = self.inner.lock_session();
            if self.inner.config.auto_cleanup() {
                debug!("Deferred destroy armed");
                session.cleanup_armed = true;
            } else {
                info!("Automatic teardown disabled; resources will be left behind");
            }
            if session.phase == Phase::Uninitialized {
                session.phase = Phase::Applied;
            }
        }

        self.load_state(&dir)?;
        info!("Apply complete");
        Ok(())
    }

    /// Re-read resource state from the provider. Requires a prior apply.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<()> {
        let dir = {
            let session = self.inner.lock_session();
            if session.destroys_in_flight > 0 {
                return Err(destroying("refresh").into());
            }
            match session.phase {
                Phase::Applied | Phase::Refreshed => {}
                Phase::Uninitialized => return Err(LifecycleError::NotApplied.into()),
                Phase::Destroyed => {
                    return Err(LifecycleError::InvalidTransition {
                        from: session.phase.to_string(),
                        op: "refresh".to_string(),
                    }
                    .into())
                }
            }
            session
                .plan_dir
                .clone()
                .ok_or(LifecycleError::NotApplied)?
        };

        let mut args = vec!["refresh".to_string()];
        args.extend(self.state_args());
        self.invoke(&dir, args).await?;
        self.load_state(&dir)?;

        let mut session = self.inner.lock_session();
        if session.phase != Phase::Destroyed {
            session.phase = Phase::Refreshed;
        }
        Ok(())
    }

    /// Tear the resources down.
    ///
    /// Allowed once a working directory exists, including while an apply is
    /// still running (that invocation is cancelled first). Once started, a
    /// destroy cannot be cancelled by `apply` or `refresh`; those are refused
    /// until it finishes. Repeated calls re-invoke the tool, which treats an
    /// empty state as a no-op.
    #[instrument(skip_all)]
    pub async fn destroy(&self) -> Result<()> {
        let dir = {
            let mut session = self.inner.lock_session();
            let dir = session
                .plan_dir
                .clone()
                .ok_or(LifecycleError::NotApplied)?;
            session.destroys_in_flight += 1;
            dir
        };

        let outcome = self.inner.run_destroy(&dir).await;

        let mut session = self.inner.lock_session();
        session.destroys_in_flight -= 1;
        outcome?;
        session.phase = Phase::Destroyed;
        session.cleanup_armed = false;
        info!("Destroy complete");
        Ok(())
    }

    /// End-of-test hook: disarm the signal guard and run the deferred destroy
    /// if one is armed.
    pub async fn teardown(&self) -> Result<()> {
        let armed = {
            let session = self.inner.lock_session();
            #[cfg(unix)]
            if let Some(guard) = &session.signal_guard {
                guard.disarm();
            }
            session.cleanup_armed
        };

        if armed {
            self.destroy().await
        } else {
            debug!("No deferred destroy armed");
            Ok(())
        }
    }

    /// Install the interrupt watcher for this session.
    ///
    /// On SIGINT/SIGTERM the watcher runs [`Harness::destroy`] to completion,
    /// logging rather than returning any failure, then re-raises the signal when
    /// `forward` is set. Must be called from within a tokio runtime; at most one
    /// watcher per session.
    #[cfg(unix)]
    pub fn handle_signals(&self, forward: bool) -> Result<()> {
        let mut session = self.inner.lock_session();
        if session.signal_guard.is_some() {
            return Err(LifecycleError::SignalGuardInstalled.into());
        }

        let weak = Arc::downgrade(&self.inner);
        let guard = SignalGuard::install(forward, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let harness = Harness { inner };
            match harness.destroy().await {
                Ok(()) => {}
                Err(e) if matches!(e, crate::errors::HarnessError::Lifecycle(_)) => {
                    debug!("Nothing to destroy: {}", e);
                }
                Err(e) => error!("Emergency destroy failed: {}", e),
            }
        })?;
        session.signal_guard = Some(guard);
        Ok(())
    }

    /// Wait for the signal watcher to finish. Returns true if it ran cleanup
    /// because of a signal; false if disarmed or never installed.
    #[cfg(unix)]
    pub async fn wait_for_signal(&self) -> bool {
        let completion = self
            .inner
            .lock_session()
            .signal_guard
            .as_ref()
            .map(SignalGuard::completion);

        match completion {
            Some((done, fired)) => {
                done.cancelled().await;
                fired.load(std::sync::atomic::Ordering::SeqCst)
            }
            None => false,
        }
    }

    /// Latest decoded state; `None` until an apply succeeds
    pub fn state(&self) -> Option<Arc<State>> {
        self.inner.store.snapshot()
    }

    /// Working directory holding the plan and state
    pub fn plan_dir(&self) -> Option<PathBuf> {
        self.inner.lock_session().plan_dir.clone()
    }

    /// Path the state document is read from
    pub fn state_path(&self) -> Option<PathBuf> {
        let dir = self.plan_dir()?;
        Some(self.inner.state_path(&dir))
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock_session().phase
    }

    /// Whether a deferred destroy will run at teardown
    pub fn cleanup_registered(&self) -> bool {
        self.inner.lock_session().cleanup_armed
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.inner.config
    }

    /// Claim the session for apply and create its working directory.
    fn begin_session(&self) -> Result<PathBuf> {
        let mut session = self.inner.lock_session();
        if session.phase != Phase::Uninitialized || session.plan_dir.is_some() {
            return Err(LifecycleError::AlreadyApplied.into());
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("tftest-");
        // resources left behind stay manageable from their state file
        builder.disable_cleanup(!self.inner.config.auto_cleanup());
        let work_dir = match self.inner.config.work_root() {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(SetupError::WorkDir)?;

        let dir = work_dir.path().to_path_buf();
        debug!("Working directory: {}", dir.display());
        session.plan_dir = Some(dir.clone());
        session.work_dir = Some(work_dir);
        Ok(dir)
    }

    fn ensure_not_destroying(&self, op: &str) -> Result<()> {
        if self.inner.lock_session().destroys_in_flight > 0 {
            return Err(destroying(op).into());
        }
        Ok(())
    }

    async fn invoke(&self, dir: &Path, args: Vec<String>) -> Result<Invocation> {
        Ok(self.inner.runner.run(dir, &args).await?)
    }

    fn load_state(&self, dir: &Path) -> Result<()> {
        self.inner.store.load(&self.inner.state_path(dir))?;
        Ok(())
    }

    fn state_args(&self) -> Vec<String> {
        self.inner.state_args()
    }
}

fn destroying(op: &str) -> LifecycleError {
    LifecycleError::InvalidTransition {
        from: "destroying".to_string(),
        op: op.to_string(),
    }
}

impl Inner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_path(&self, dir: &Path) -> PathBuf {
        match self.config.state_file() {
            Some(path) => path.to_path_buf(),
            None => dir.join(STATE_FILENAME),
        }
    }

    fn state_args(&self) -> Vec<String> {
        self.config
            .state_file()
            .map(|path| format!("-state={}", path.display()))
            .into_iter()
            .collect()
    }

    fn destroy_args(&self) -> Vec<String> {
        let mut args = vec!["destroy".to_string(), "-auto-approve".to_string()];
        args.extend(self.state_args());
        args
    }

    async fn run_destroy(&self, dir: &Path) -> Result<Invocation> {
        Ok(self.runner.run_teardown(dir, &self.destroy_args()).await?)
    }

    /// Blocking destroy for the drop path, where no runtime may be available.
    fn destroy_blocking(&self, dir: &Path) {
        let (name, value) = self.config.plugin_cache().env_pair();
        let result = std::process::Command::new(self.config.tool_path())
            .args(self.destroy_args())
            .current_dir(dir)
            .env(name, value)
            .stdin(std::process::Stdio::null())
            .output();

        match result {
            Ok(output) => {
                for line in String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .chain(String::from_utf8_lossy(&output.stderr).lines())
                {
                    info!(target: "tftest_core::runner", subcommand = "destroy", "{}", line);
                }
                if !output.status.success() {
                    error!("Deferred destroy failed with {}", output.status);
                }
            }
            Err(e) => error!("Failed to launch deferred destroy: {}", e),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !session.cleanup_armed {
            return;
        }
        let Some(dir) = session.plan_dir.clone() else {
            return;
        };
        session.cleanup_armed = false;
        warn!("Harness dropped without teardown; destroying resources");
        self.destroy_blocking(&dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PluginCache;

    fn harness_in(temp: &TempDir) -> Harness {
        Harness::new(
            HarnessConfig::new(temp.path().join("missing-tool"))
                .with_plugin_cache(PluginCache::new(temp.path().join("cache")))
                .with_work_root(temp.path()),
        )
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Uninitialized.to_string(), "uninitialized");
        assert_eq!(Phase::Applied.as_str(), "applied");
        assert_eq!(Phase::Refreshed.as_str(), "refreshed");
        assert_eq!(Phase::Destroyed.as_str(), "destroyed");
    }

    #[test]
    fn test_new_session_is_empty() {
        let temp = TempDir::new().unwrap();
        let harness = harness_in(&temp);
        assert_eq!(harness.phase(), Phase::Uninitialized);
        assert!(harness.state().is_none());
        assert!(harness.plan_dir().is_none());
        assert!(harness.state_path().is_none());
        assert!(!harness.cleanup_registered());
        // cache created on construction
        assert!(temp.path().join("cache").is_dir());
    }

    #[tokio::test]
    async fn test_refresh_before_apply() {
        let temp = TempDir::new().unwrap();
        let err = harness_in(&temp).refresh().await.unwrap_err();
        assert!(matches!(
            err,
            crate::errors::HarnessError::Lifecycle(LifecycleError::NotApplied)
        ));
    }

    #[tokio::test]
    async fn test_destroy_before_apply() {
        let temp = TempDir::new().unwrap();
        let err = harness_in(&temp).destroy().await.unwrap_err();
        assert!(matches!(
            err,
            crate::errors::HarnessError::Lifecycle(LifecycleError::NotApplied)
        ));
    }

    #[tokio::test]
    async fn test_teardown_without_apply_is_noop() {
        let temp = TempDir::new().unwrap();
        harness_in(&temp).teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_with_unreadable_plan() {
        let temp = TempDir::new().unwrap();
        let harness = harness_in(&temp);
        let err = harness.apply(temp.path().join("nope.tf")).await.unwrap_err();
        assert!(matches!(
            err,
            crate::errors::HarnessError::Setup(SetupError::PlanUnreadable { .. })
        ));
        assert!(harness.state().is_none());
        // the session is spent even though apply failed
        let err = harness.apply(temp.path().join("nope.tf")).await.unwrap_err();
        assert!(matches!(
            err,
            crate::errors::HarnessError::Lifecycle(LifecycleError::AlreadyApplied)
        ));
    }

    #[test]
    fn test_state_path_honours_explicit_file() {
        let temp = TempDir::new().unwrap();
        let harness = Harness::new(
            HarnessConfig::new("tf")
                .with_plugin_cache(PluginCache::new(temp.path().join("cache")))
                .with_state_file("/elsewhere/custom.tfstate"),
        );
        assert_eq!(
            harness.inner.state_args(),
            vec!["-state=/elsewhere/custom.tfstate".to_string()]
        );
        assert_eq!(
            harness.inner.state_path(Path::new("/work")),
            PathBuf::from("/elsewhere/custom.tfstate")
        );
        assert_eq!(
            harness.inner.destroy_args(),
            vec![
                "destroy".to_string(),
                "-auto-approve".to_string(),
                "-state=/elsewhere/custom.tfstate".to_string()
            ]
        );
    }
}
