//! Helpers shared by the CLI integration tests.
//!
//! The binary is pointed at a generated `sh` script through `--terraform`; the
//! script logs each call and writes canned state documents.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const APPLIED_STATE: &str = r#"{"version":4,"serial":1,"resources":[{"type":"null_resource","name":"cli"}],"outputs":{"id":{"value":"abc"}}}"#;
pub const REFRESHED_STATE: &str = r#"{"version":4,"serial":2,"resources":[{"type":"null_resource","name":"cli"}],"outputs":{"id":{"value":"abc"}}}"#;
pub const DESTROYED_STATE: &str = r#"{"version":4,"serial":3,"resources":[],"outputs":{}}"#;

pub struct Sandbox {
    pub root: TempDir,
    pub tool: PathBuf,
    pub log: PathBuf,
    pub plan: PathBuf,
    pub cache: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::failing_on(None)
    }

    /// Sandbox whose tool exits 1 for `subcommand`
    pub fn failing_on(subcommand: Option<&str>) -> Self {
        let root = TempDir::new().unwrap();
        let tool = root.path().join("terraform");
        let log = root.path().join("calls.log");
        let plan = root.path().join("main.tf");
        let cache = root.path().join("plugins");

        let fail = match subcommand {
            Some(sub) => format!(
                "if [ \"$sub\" = \"{sub}\" ]; then echo \"Error: {sub} exploded\" >&2; exit 1; fi"
            ),
            None => ":".to_string(),
        };

        let script = format!(
            r#"#!/bin/sh
sub=""
STATE=terraform.tfstate
for a in "$@"; do
  case "$a" in
    -state=*) STATE="${{a#-state=}}" ;;
    -*) ;;
    *) if [ -z "$sub" ]; then sub="$a"; fi ;;
  esac
done
echo "$sub" >> '{log}'
echo "tool says $sub"
{fail}
case "$sub" in
  apply) printf '%s\n' '{applied}' > "$STATE" ;;
  refresh) printf '%s\n' '{refreshed}' > "$STATE" ;;
  destroy) printf '%s\n' '{destroyed}' > "$STATE" ;;
esac
"#,
            log = log.display(),
            fail = fail,
            applied = APPLIED_STATE,
            refreshed = REFRESHED_STATE,
            destroyed = DESTROYED_STATE,
        );
        std::fs::write(&tool, script).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(&plan, "resource \"null_resource\" \"cli\" {}\n").unwrap();

        Self {
            root,
            tool,
            log,
            plan,
            cache,
        }
    }

    /// `tftest` with the fake tool, a private plugin cache and quiet logs
    pub fn command(&self) -> assert_cmd::Command {
        assert_cmd::Command::from_std(self.std_command())
    }

    /// Same as [`Sandbox::command`] but as a plain std command, for tests that
    /// need the child pid
    pub fn std_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("tftest"));
        self.configure(&mut cmd);
        cmd
    }

    fn configure(&self, cmd: &mut std::process::Command) {
        cmd.env_remove("NO_CLEANUP")
            .env_remove("TFTEST_PLUGIN_CACHE_DIR")
            .env("TFTEST_LOG", "warn")
            .arg("--terraform")
            .arg(&self.tool)
            .arg("--plugin-cache-dir")
            .arg(&self.cache);
    }

    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count(&self, subcommand: &str) -> usize {
        self.calls().iter().filter(|c| *c == subcommand).count()
    }

    /// Poll the call log until `subcommand` has run, or give up after a while.
    pub fn wait_for_call(&self, subcommand: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.count(subcommand) > 0 {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}
