//! Logging setup
//!
//! Installs a `tracing-subscriber` registry writing to stderr, in either text or
//! JSON form. Test binaries and the CLI both call [`init`]; only the first call
//! takes effect.
//!
//! ## Environment Variables
//!
//! * `TFTEST_LOG_FORMAT` - `json` for structured output, anything else for text
//! * `TFTEST_LOG` - filter directives (e.g. `tftest_core=debug`)
//! * `RUST_LOG` - fallback filter when `TFTEST_LOG` is unset

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize logging with an optional format (`"text"` or `"json"`).
///
/// The explicit `format` wins over `TFTEST_LOG_FORMAT`. Safe to call repeatedly.
/// A subscriber installed elsewhere first (e.g. by the host test binary) is left
/// in place.
pub fn init(format: Option<&str>) -> Result<()> {
    init_with_filter(format, None)
}

/// Like [`init`], with explicit filter directives taking precedence over the
/// environment.
pub fn init_with_filter(format: Option<&str>, directives: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter(directives);

        let env_format = std::env::var("TFTEST_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        let installed = match effective_format {
            "json" => tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(io::stderr),
                )
                .with(filter)
                .try_init(),
            _ => tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_writer(io::stderr))
                .with(filter)
                .try_init(),
        };

        if installed.is_ok() {
            tracing::debug!("Logging initialized with format: {}", effective_format);
        }
    });

    Ok(())
}

fn create_env_filter(directives: Option<&str>) -> EnvFilter {
    if let Some(spec) = directives {
        if let Ok(filter) = EnvFilter::try_new(spec) {
            return filter;
        }
    }

    if let Ok(spec) = std::env::var("TFTEST_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            eprintln!("Invalid TFTEST_LOG specification '{}', using 'info'", spec);
            EnvFilter::new("info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
