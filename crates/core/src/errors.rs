//! Error types and handling
//!
//! Every failure a harness session can hit is fatal to the enclosing test, so the
//! taxonomy exists for diagnosis rather than recovery. Domain enums (setup, tool
//! invocation, state decoding, lifecycle ordering) are wrapped in [`HarnessError`]
//! so callers deal with a single type and decide how to abort.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised before the external tool runs at all
#[derive(Error, Debug)]
pub enum SetupError {
    /// The external tool could not be located on this host
    #[error("Executable '{name}' not found on PATH (set TFTEST_TERRAFORM to override)")]
    ExecutableNotFound { name: String },

    /// The caller-supplied plan file could not be opened
    #[error("Could not open plan file {}: {source}", path.display())]
    PlanUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The plan file could not be written into the working directory
    #[error("Could not copy plan into {}: {source}", path.display())]
    PlanCopy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session working directory could not be created
    #[error("Failed to create working directory")]
    WorkDir(#[from] std::io::Error),

    /// Interrupt/termination listeners could not be registered
    #[error("Failed to register signal handlers: {source}")]
    SignalRegistration {
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a single external tool invocation
#[derive(Error, Debug)]
pub enum InvocationError {
    /// The process could not be spawned
    #[error("Failed to launch '{subcommand}': {source}")]
    Launch {
        subcommand: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully
    #[error("'{subcommand}' failed ({}):\n{output}", describe_exit(code))]
    Failed {
        subcommand: String,
        code: Option<i32>,
        output: String,
    },

    /// A newer invocation superseded this one before it finished
    #[error("'{subcommand}' was cancelled by a newer invocation")]
    Cancelled { subcommand: String, output: String },

    /// A teardown invocation is in flight and may not be superseded
    #[error("'{subcommand}' refused while a destroy is running")]
    Blocked { subcommand: String },

    /// Reading the process output or waiting on it failed
    #[error("I/O error while running '{subcommand}': {source}")]
    Io {
        subcommand: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Errors reading the state document
#[derive(Error, Debug)]
pub enum StateError {
    /// The state file does not exist or could not be opened
    #[error("Failed to read state file {}: {source}", path.display())]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON
    #[error("Failed to decode state JSON {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The state file is JSON but not a key-value document
    #[error("State document {} is not a JSON object", path.display())]
    NotAnObject { path: PathBuf },
}

/// Operations requested out of lifecycle order
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    /// Apply was already attempted on this session
    #[error("Apply was already called on this harness; create a new one")]
    AlreadyApplied,

    /// An operation that needs a working directory ran before apply
    #[error("Run apply first")]
    NotApplied,

    /// The session is in a phase that does not permit the operation
    #[error("Cannot {op} while {from}")]
    InvalidTransition { from: String, op: String },

    /// A signal guard is already watching this harness
    #[error("Signal handling is already installed for this harness")]
    SignalGuardInstalled,
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Setup errors
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    /// External tool invocation errors
    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    /// State decoding errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Lifecycle ordering errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

impl HarnessError {
    /// Whether the enclosing test should abort. Every harness failure is fatal;
    /// nothing above the lifecycle coordinator retries.
    pub fn is_fatal(&self) -> bool {
        true
    }

    /// Captured tool output, when the failure came from an invocation that
    /// produced any.
    pub fn output(&self) -> Option<&str> {
        match self {
            HarnessError::Invocation(InvocationError::Failed { output, .. })
            | HarnessError::Invocation(InvocationError::Cancelled { output, .. }) => {
                Some(output.as_str())
            }
            _ => None,
        }
    }

    /// True when the invocation lost to a newer one rather than failing on its own
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            HarnessError::Invocation(InvocationError::Cancelled { .. })
        )
    }
}

/// Convenience type alias for Results with HarnessError
pub type Result<T> = std::result::Result<T, HarnessError>;
