//! Teardown on interrupt
//!
//! A [`SignalGuard`] is a background task that waits for SIGINT or SIGTERM, or for
//! an explicit disarm. When a signal wins it runs the supplied cleanup to
//! completion exactly once, stops listening, and optionally re-delivers the
//! signal with its default disposition so the host process still dies the way
//! it would have without the guard.
//!
//! Signal delivery does not compose across independent handlers: install at
//! most one guard per process and no other SIGINT/SIGTERM handler after it.
//!
//! Once no guard is watching (all disarmed or finished), SIGINT and SIGTERM
//! terminate the process again as they would by default.

use crate::errors::SetupError;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Handle to an installed watcher. Dropping it disarms the watcher.
#[derive(Debug)]
pub struct SignalGuard {
    disarm: CancellationToken,
    done: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl SignalGuard {
    /// Register for SIGINT/SIGTERM and spawn the watcher on the current tokio
    /// runtime.
    ///
    /// `cleanup` runs at most once, only on the signal path. With `forward`
    /// set, the caught signal is re-raised after cleanup completes.
    pub fn install<F, Fut>(forward: bool, cleanup: F) -> Result<Self, SetupError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let claim = Claim::acquire()?;
        let interrupt = signal(SignalKind::interrupt())
            .map_err(|e| SetupError::SignalRegistration { source: e })?;
        let terminate = signal(SignalKind::terminate())
            .map_err(|e| SetupError::SignalRegistration { source: e })?;

        let guard = Self {
            disarm: CancellationToken::new(),
            done: CancellationToken::new(),
            fired: Arc::new(AtomicBool::new(false)),
        };

        tokio::spawn(watch(
            Listeners {
                interrupt,
                terminate,
                _claim: claim,
            },
            guard.disarm.clone(),
            guard.done.clone(),
            guard.fired.clone(),
            forward,
            cleanup,
        ));
        debug!(forward, "Signal guard installed");

        Ok(guard)
    }

    /// Stop watching without running cleanup. No effect once a signal fired.
    pub fn disarm(&self) {
        self.disarm.cancel();
    }

    /// Whether a signal was caught and cleanup started
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Whether the watcher has exited (after cleanup, or after disarm)
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait for the watcher to exit; returns true if it exited because of a
    /// signal (cleanup has completed by then).
    pub async fn finished(&self) -> bool {
        self.done.cancelled().await;
        self.has_fired()
    }

    pub(crate) fn completion(&self) -> (CancellationToken, Arc<AtomicBool>) {
        (self.done.clone(), self.fired.clone())
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.disarm.cancel();
    }
}

struct Listeners {
    interrupt: Signal,
    terminate: Signal,
    _claim: Claim,
}

/// Process-wide bookkeeping of live watchers. While the count is zero the
/// `restore` flag is set and the conditional default handlers registered for
/// SIGINT/SIGTERM terminate the process.
struct Handoff {
    restore: Option<Arc<AtomicBool>>,
    active: usize,
}

static HANDOFF: Mutex<Handoff> = Mutex::new(Handoff {
    restore: None,
    active: 0,
});

fn lock_handoff() -> std::sync::MutexGuard<'static, Handoff> {
    HANDOFF.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One live watcher. Dropping it (watcher exit, or its task being dropped with
/// the runtime) hands the signals back once no other watcher remains.
struct Claim;

impl Claim {
    fn acquire() -> Result<Self, SetupError> {
        let mut handoff = lock_handoff();
        let restore = match &handoff.restore {
            Some(restore) => restore.clone(),
            None => {
                let restore = Arc::new(AtomicBool::new(false));
                for signo in [SIGINT, SIGTERM] {
                    signal_hook::flag::register_conditional_default(signo, restore.clone())
                        .map_err(|e| SetupError::SignalRegistration { source: e })?;
                }
                handoff.restore = Some(restore.clone());
                restore
            }
        };
        handoff.active += 1;
        restore.store(false, Ordering::SeqCst);
        Ok(Claim)
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut handoff = lock_handoff();
        handoff.active = handoff.active.saturating_sub(1);
        if handoff.active == 0 {
            if let Some(restore) = &handoff.restore {
                debug!("No signal guard left; default SIGINT/SIGTERM handling restored");
                restore.store(true, Ordering::SeqCst);
            }
        }
    }
}

async fn watch<F, Fut>(
    mut listeners: Listeners,
    disarm: CancellationToken,
    done: CancellationToken,
    fired: Arc<AtomicBool>,
    forward: bool,
    cleanup: F,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let signo = tokio::select! {
        _ = listeners.interrupt.recv() => SIGINT,
        _ = listeners.terminate.recv() => SIGTERM,
        _ = disarm.cancelled() => {
            debug!("Signal guard disarmed");
            drop(listeners);
            done.cancel();
            return;
        }
    };

    fired.store(true, Ordering::SeqCst);
    warn!(signal = signo, "Signalled; destroying resources now");
    cleanup().await;

    // the host must not observe completion before the re-raise takes it down
    if forward {
        reraise(signo);
    }

    // stop receiving further deliveries
    drop(listeners);
    done.cancel();
}

fn reraise(signo: i32) {
    debug!(signal = signo, "Re-delivering signal with default disposition");
    if let Err(e) = signal_hook::low_level::emulate_default_handler(signo) {
        error!("Failed to re-deliver signal {}: {}", signo, e);
    }
}
