use crate::commands::clean_cache::execute_clean_cache;
use crate::commands::run::{execute_run, RunArgs};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tftest_core::cache::PluginCache;
use tftest_core::config::{self, HarnessConfig};

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Drive a provisioning session from the shell
#[derive(Debug, Parser)]
#[command(name = "tftest", version, about, long_about = None)]
pub struct Cli {
    /// Log output format (overrides TFTEST_LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level (overrides TFTEST_LOG / RUST_LOG)
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Path to the provisioning tool executable
    #[arg(long, global = true, env = config::TOOL_ENV)]
    pub terraform: Option<PathBuf>,

    /// Plugin cache directory shared across sessions
    #[arg(long, global = true, env = config::PLUGIN_CACHE_DIR_ENV)]
    pub plugin_cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply a plan, print its state as JSON, then destroy it
    Run {
        /// Plan definition file
        plan: PathBuf,
        /// Refresh after apply and print the refreshed state
        #[arg(long)]
        refresh: bool,
        /// Leave resources in place instead of destroying them
        #[arg(long)]
        keep: bool,
        /// After printing state, wait for SIGINT/SIGTERM before exiting
        #[arg(long)]
        hold: bool,
        /// Do not re-raise a caught signal after cleanup
        #[arg(long)]
        no_forward: bool,
        /// Explicit state file location
        #[arg(long)]
        state_file: Option<PathBuf>,
    },

    /// Remove the plugin cache directory
    CleanCache,
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        tftest_core::logging::init_with_filter(
            self.log_format.as_ref().map(LogFormat::as_str),
            self.log_level.as_ref().map(LogLevel::as_str),
        )?;

        let plugin_cache = self.plugin_cache_dir.clone().map(PluginCache::new);

        match self.command {
            Commands::Run {
                ref plan,
                refresh,
                keep,
                hold,
                no_forward,
                ref state_file,
            } => {
                let tool = match &self.terraform {
                    Some(path) => path.clone(),
                    None => config::locate_tool().context("Cannot run without the tool")?,
                };
                let mut harness_config = HarnessConfig::new(tool).with_env_overrides();
                if let Some(cache) = plugin_cache {
                    harness_config = harness_config.with_plugin_cache(cache);
                }
                if let Some(path) = state_file {
                    harness_config = harness_config.with_state_file(path);
                }

                execute_run(
                    harness_config,
                    RunArgs {
                        plan: plan.clone(),
                        refresh,
                        keep,
                        hold,
                        forward: !no_forward,
                    },
                )
                .await
            }
            Commands::CleanCache => execute_clean_cache(&plugin_cache.unwrap_or_default()),
        }
    }
}
