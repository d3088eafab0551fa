//! Serialized, cancellation-aware execution of the external tool
//!
//! A session's working directory and state file are not safe for concurrent
//! mutation, so every invocation goes through one [`CommandRunner`]. Issuing a
//! new invocation first cancels the token of the previous one (which kills its
//! process), then waits for the execution slot; at most one child process is
//! alive under a runner at any time, and the newest request wins. The one
//! exception is teardown: while a [`CommandRunner::run_teardown`] invocation is
//! pending, only another teardown may supersede it.

use crate::cache::PluginCache;
use crate::errors::InvocationError;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Output of a successful invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Subcommand that ran (`init`, `apply`, ...)
    pub subcommand: String,
    /// Interleaved stdout and stderr
    pub output: String,
    pub duration: Duration,
}

/// Runs the external tool one invocation at a time
#[derive(Debug)]
pub struct CommandRunner {
    tool_path: PathBuf,
    plugin_cache: PluginCache,
    /// Most recently issued invocation
    current: Mutex<Issued>,
    /// Held for the whole lifetime of a child process
    slot: tokio::sync::Mutex<()>,
}

impl CommandRunner {
    pub fn new(tool_path: impl Into<PathBuf>, plugin_cache: PluginCache) -> Self {
        Self {
            tool_path: tool_path.into(),
            plugin_cache,
            current: Mutex::new(Issued::default()),
            slot: tokio::sync::Mutex::new(()),
        }
    }

    pub fn tool_path(&self) -> &Path {
        &self.tool_path
    }

    pub fn plugin_cache(&self) -> &PluginCache {
        &self.plugin_cache
    }

    /// Cancel the in-flight invocation, if any, without starting a new one.
    /// A pending teardown is left alone.
    pub fn cancel_current(&self) {
        let mut current = self.lock_current();
        if current.teardown {
            debug!("Not cancelling a pending teardown");
            return;
        }
        if let Some(token) = current.token.take() {
            token.cancel();
        }
    }

    /// Run `<tool> args...` in `work_dir`.
    ///
    /// Any earlier invocation still running is cancelled before this one
    /// launches. Combined output is logged line by line and returned, both on
    /// success and inside the error on failure.
    pub async fn run(&self, work_dir: &Path, args: &[String]) -> Result<Invocation, InvocationError> {
        self.execute(work_dir, args, false).await
    }

    /// Like [`CommandRunner::run`], but once issued the invocation can only be
    /// superseded by another teardown; ordinary invocations are refused with
    /// [`InvocationError::Blocked`] until it completes.
    pub async fn run_teardown(
        &self,
        work_dir: &Path,
        args: &[String],
    ) -> Result<Invocation, InvocationError> {
        self.execute(work_dir, args, true).await
    }

    #[instrument(skip_all, fields(subcommand = %subcommand_of(args), dir = %work_dir.display()))]
    async fn execute(
        &self,
        work_dir: &Path,
        args: &[String],
        teardown: bool,
    ) -> Result<Invocation, InvocationError> {
        let subcommand = subcommand_of(args).to_string();
        let (token, generation) = self.reissue(&subcommand, teardown)?;
        let _release = Release {
            runner: self,
            generation,
        };

        let _slot = self.slot.lock().await;
        if token.is_cancelled() {
            debug!("Superseded before launch");
            return Err(InvocationError::Cancelled {
                subcommand,
                output: String::new(),
            });
        }

        let (name, value) = self.plugin_cache.env_pair();
        let mut command = Command::new(&self.tool_path);
        command
            .args(args)
            .current_dir(work_dir)
            .env(name, value)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Executing: {} {}",
            self.tool_path.display(),
            args.join(" ")
        );
        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| InvocationError::Launch {
            subcommand: subcommand.clone(),
            source: e,
        })?;

        let mut combined = Vec::new();
        let outcome = tokio::select! {
            status = collect_combined(&mut child, &mut combined) => Some(status),
            _ = token.cancelled() => None,
        };

        let output = String::from_utf8_lossy(&combined).into_owned();
        log_output(&subcommand, &output);

        let status = match outcome {
            Some(status) => status.map_err(|e| InvocationError::Io {
                subcommand: subcommand.clone(),
                source: e,
            })?,
            None => {
                warn!("Cancelled by a newer invocation; killing process");
                if let Err(e) = child.start_kill() {
                    debug!("Kill failed (process likely exited): {}", e);
                }
                let _ = child.wait().await;
                return Err(InvocationError::Cancelled { subcommand, output });
            }
        };

        let duration = start.elapsed();
        debug!("Completed with {} in {:?}", status, duration);

        if !status.success() {
            return Err(InvocationError::Failed {
                subcommand,
                code: status.code(),
                output,
            });
        }

        Ok(Invocation {
            subcommand,
            output,
            duration,
        })
    }

    /// Cancel the previous token and install a fresh one, atomically.
    fn reissue(
        &self,
        subcommand: &str,
        teardown: bool,
    ) -> Result<(CancellationToken, u64), InvocationError> {
        let mut current = self.lock_current();
        if current.teardown && !teardown {
            warn!("Refusing '{}' while a destroy is running", subcommand);
            return Err(InvocationError::Blocked {
                subcommand: subcommand.to_string(),
            });
        }
        if let Some(previous) = current.token.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        current.generation += 1;
        current.token = Some(token.clone());
        current.teardown = teardown;
        Ok((token, current.generation))
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Issued> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct Issued {
    token: Option<CancellationToken>,
    generation: u64,
    teardown: bool,
}

/// Clears the issued slot when its invocation ends, unless a newer one took it.
struct Release<'a> {
    runner: &'a CommandRunner,
    generation: u64,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let mut current = self.runner.lock_current();
        if current.generation == self.generation {
            current.token = None;
            current.teardown = false;
        }
    }
}

/// First argument that is not a global `-flag`
fn subcommand_of(args: &[String]) -> &str {
    args.iter()
        .map(String::as_str)
        .find(|a| !a.starts_with('-'))
        .unwrap_or("")
}

/// Read stdout and stderr into one buffer in arrival order, then reap the child.
async fn collect_combined(child: &mut Child, combined: &mut Vec<u8>) -> io::Result<ExitStatus> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_some(&mut stdout, &mut out_buf), if stdout.is_some() => match read? {
                0 => stdout = None,
                n => combined.extend_from_slice(&out_buf[..n]),
            },
            read = read_some(&mut stderr, &mut err_buf), if stderr.is_some() => match read? {
                0 => stderr = None,
                n => combined.extend_from_slice(&err_buf[..n]),
            },
        }
    }

    child.wait().await
}

async fn read_some<R: AsyncRead + Unpin>(pipe: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

fn log_output(subcommand: &str, output: &str) {
    for line in output.lines() {
        info!(target: "tftest_core::runner", subcommand, "{}", line);
    }
}
