//! Shared test helpers for core integration tests.
//!
//! [`FakeTool`] writes a small `sh` script that stands in for the external
//! provisioning tool: it records every invocation to a log file, echoes to both
//! stdout and stderr, and writes state documents the way the real tool would.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tftest_core::cache::PluginCache;
use tftest_core::config::HarnessConfig;

pub const APPLIED_STATE: &str = r#"{"version":4,"serial":1,"resources":[{"mode":"managed","type":"null_resource","name":"test","instances":[{"attributes":{"id":"4242"}}]}],"outputs":{}}"#;
pub const REFRESHED_STATE: &str = r#"{"version":4,"serial":2,"resources":[{"mode":"managed","type":"null_resource","name":"test","instances":[{"attributes":{"id":"4242"}}]}],"outputs":{}}"#;
pub const DESTROYED_STATE: &str = r#"{"version":4,"serial":3,"resources":[],"outputs":{}}"#;

/// Behaviour knobs baked into the generated script
#[derive(Default)]
pub struct FakeToolOptions {
    /// Subcommand that exits 1
    pub fail_on: Option<&'static str>,
    /// Tenths of a second `apply` spends before writing state
    pub apply_delay_tenths: Option<u32>,
    /// Tenths of a second `destroy` spends before writing state
    pub destroy_delay_tenths: Option<u32>,
    /// Replaces the state written by `apply`
    pub apply_state: Option<String>,
}

pub struct FakeTool {
    pub root: TempDir,
    pub script: PathBuf,
    pub log: PathBuf,
}

impl FakeTool {
    pub fn new() -> Self {
        Self::with_options(FakeToolOptions::default())
    }

    pub fn with_options(options: FakeToolOptions) -> Self {
        let root = TempDir::new().unwrap();
        let script = root.path().join("terraform");
        let log = root.path().join("invocations.log");

        let delay = sleep_loop(options.apply_delay_tenths);
        let destroy_delay = sleep_loop(options.destroy_delay_tenths);
        let fail = match options.fail_on {
            Some(sub) => format!(
                "if [ \"$sub\" = \"{sub}\" ]; then echo \"Error: injected failure in $sub\" >&2; exit 1; fi"
            ),
            None => ":".to_string(),
        };
        let apply_state = options.apply_state.unwrap_or_else(|| APPLIED_STATE.to_string());

        let body = format!(
            r#"#!/bin/sh
LOG='{log}'
STATE=terraform.tfstate
sub=""
for a in "$@"; do
  case "$a" in
    -state=*) STATE="${{a#-state=}}" ;;
    -*) ;;
    *) if [ -z "$sub" ]; then sub="$a"; fi ;;
  esac
done
echo "start $sub|$(pwd)|$*|$TF_PLUGIN_CACHE_DIR" >> "$LOG"
echo "running $sub"
echo "diagnostics for $sub" >&2
{fail}
case "$sub" in
  apply)
    {delay}
    cat > "$STATE" <<'JSON'
{apply_state}
JSON
    ;;
  refresh)
    cat > "$STATE" <<'JSON'
{refreshed}
JSON
    ;;
  destroy)
    {destroy_delay}
    cat > "$STATE" <<'JSON'
{destroyed}
JSON
    ;;
esac
echo "end $sub" >> "$LOG"
"#,
            log = log.display(),
            fail = fail,
            delay = delay,
            destroy_delay = destroy_delay,
            apply_state = apply_state,
            refreshed = REFRESHED_STATE,
            destroyed = DESTROYED_STATE,
        );

        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { root, script, log }
    }

    /// Config pointing at this script, with cache and work dirs under the
    /// fake tool's temp root.
    pub fn config(&self) -> HarnessConfig {
        HarnessConfig::new(&self.script)
            .with_plugin_cache(PluginCache::new(self.root.path().join("plugin_cache")))
            .with_work_root(self.root.path())
    }

    pub fn lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// `start` records, one per launched invocation
    pub fn starts(&self) -> Vec<Invocation> {
        self.lines()
            .iter()
            .filter_map(|line| line.strip_prefix("start "))
            .map(|rest| {
                let parts: Vec<&str> = rest.splitn(4, '|').collect();
                Invocation {
                    subcommand: parts[0].to_string(),
                    cwd: PathBuf::from(parts[1]),
                    args: parts[2].to_string(),
                    cache_dir: parts[3].to_string(),
                }
            })
            .collect()
    }

    pub fn count(&self, subcommand: &str) -> usize {
        self.starts()
            .iter()
            .filter(|i| i.subcommand == subcommand)
            .count()
    }

    pub fn finished(&self, subcommand: &str) -> bool {
        self.lines().iter().any(|l| l == &format!("end {}", subcommand))
    }

    /// Poll the log until `predicate` holds or the timeout elapses.
    pub async fn wait_until(&self, predicate: impl Fn(&FakeTool) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if predicate(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        predicate(self)
    }
}

fn sleep_loop(tenths: Option<u32>) -> String {
    match tenths {
        Some(n) => format!("i=0; while [ $i -lt {n} ]; do sleep 0.1; i=$((i+1)); done"),
        None => ":".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub subcommand: String,
    pub cwd: PathBuf,
    pub args: String,
    pub cache_dir: String,
}

/// Write a trivial plan file and return its path
pub fn write_plan(dir: &Path) -> PathBuf {
    let path = dir.join("docker-test.tf");
    std::fs::write(&path, "resource \"null_resource\" \"test\" {}\n").unwrap();
    path
}
