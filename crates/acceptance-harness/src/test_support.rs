// crates/acceptance-harness/src/test_support.rs
// ============================================================================
// Module: Test Support
// Description: Scripted stand-in for the platform CLI used by unit tests.
// Purpose: Exercise identity and lifecycle flows without a live platform.
// Dependencies: tempfile
// ============================================================================

//! ## Overview
//! A single shell script is installed once per test binary and emulates the
//! CLI subcommands the harness issues. Per-test state (invocation log, login
//! markers, injected failures and stalls) lives in a directory passed through
//! `FAKE_CF_STATE`, so tests never share mutable files.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Test-only helpers favor direct unwrap/expect for clarity."
)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::HarnessConfig;
use crate::events::EventRecorder;
use crate::poll::PollPolicy;
use crate::process::ProcessRunner;

/// Environment variable naming the per-test state directory.
const STATE_ENV: &str = "FAKE_CF_STATE";

/// Fake CLI script body.
const SCRIPT: &str = r#"#!/bin/sh
state="$FAKE_CF_STATE"
printf '%s\n' "$*" >> "$state/invocations.log"
if [ -e "$state/hang-$1" ]; then
  sleep 5
fi
if [ -e "$state/fail-$1" ]; then
  echo "FAILED"
  echo "$1 refused" >&2
  exit 1
fi
case "$1" in
  auth)
    echo "Authenticating..."
    if [ -e "$state/fail-auth-$2" ]; then
      echo "FAILED"
      exit 1
    fi
    printf '%s' "$2" > "$CF_HOME/current_user"
    echo "OK"
    ;;
  oauth-token)
    if [ ! -f "$CF_HOME/current_user" ]; then
      echo "Not logged in." >&2
      exit 1
    fi
    echo "bearer token-$(cat "$CF_HOME/current_user")"
    ;;
  logout)
    rm -f "$CF_HOME/current_user"
    echo "Logging out..."
    echo "OK"
    ;;
  *)
    echo "$1"
    echo "OK"
    ;;
esac
"#;

/// Returns the path of the shared fake CLI script.
fn script_path() -> &'static Path {
    static INSTALLED: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = INSTALLED.get_or_init(|| {
        let dir = tempfile::tempdir().expect("fake cli dir");
        let path = dir.path().join("cf");
        fs::write(&path, SCRIPT).expect("write fake cli");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake cli");
        (dir, path)
    });
    path
}

/// Per-test handle to the fake CLI.
pub(crate) struct FakeCli {
    /// State directory for this test.
    state: TempDir,
}

impl FakeCli {
    /// Installs the script if needed and creates a fresh state directory.
    pub(crate) fn install() -> Self {
        let _ = script_path();
        Self {
            state: tempfile::tempdir().expect("fake cli state"),
        }
    }

    /// Returns the script path.
    pub(crate) fn path(&self) -> PathBuf {
        script_path().to_path_buf()
    }

    /// Returns a runner wired to this test's state directory.
    pub(crate) fn runner(&self, events: EventRecorder) -> ProcessRunner {
        ProcessRunner::new(events).with_env(STATE_ENV, self.state.path().display().to_string())
    }

    /// Makes every invocation of `subcommand` fail.
    pub(crate) fn fail(&self, subcommand: &str) {
        fs::write(self.state.path().join(format!("fail-{subcommand}")), b"").expect("marker");
    }

    /// Makes logins for `username` fail.
    pub(crate) fn fail_auth(&self, username: &str) {
        fs::write(self.auth_failure_marker(username), b"").expect("marker");
    }

    /// Returns the file that, once written, makes logins for `username` fail.
    pub(crate) fn auth_failure_marker(&self, username: &str) -> PathBuf {
        self.state.path().join(format!("fail-auth-{username}"))
    }

    /// Makes every invocation of `subcommand` stall for several seconds.
    pub(crate) fn hang(&self, subcommand: &str) {
        fs::write(self.state.path().join(format!("hang-{subcommand}")), b"").expect("marker");
    }

    /// Returns every recorded invocation, oldest first.
    pub(crate) fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.state.path().join("invocations.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Returns recorded invocations whose first word is `subcommand`.
    pub(crate) fn invocations_of(&self, subcommand: &str) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.split_whitespace().next() == Some(subcommand))
            .collect()
    }

    /// Returns a minimal config pointing at this fake CLI.
    pub(crate) fn config(&self, user: bool) -> HarnessConfig {
        let user_block = if user {
            "\n[user]\nusername = \"dev\"\npassword = \"dev-pw\"\n"
        } else {
            ""
        };
        let raw = format!(
            "api = \"https://api.example.test\"\ncli_path = \"{}\"\n\n[timeouts]\ndefault_secs = 10\npoll_interval_ms = 5\n\n[admin]\nusername = \"admin\"\npassword = \"admin-pw\"\n{user_block}",
            self.path().display()
        );
        HarnessConfig::from_toml_str(&raw).expect("fake config")
    }
}

/// Short policy for tests that drive real child processes.
pub(crate) fn test_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(10), Duration::from_millis(5))
}
