// crates/acceptance-harness/src/artifacts.rs
// ============================================================================
// Module: Run Artifacts
// Description: Per-run artifact directory, summaries, and JUnit reports.
// Purpose: Leave deterministic evidence of every suite run, even on panic.
// Dependencies: serde, serde_jcs
// ============================================================================

//! ## Overview
//! [`TestArtifacts`] owns the run root. [`SuiteReporter`] collects scenario
//! results and writes `summary.json` (canonical JSON), `summary.md`, and
//! `junit-<suite>-<worker>.xml` when finished. A reporter dropped without
//! finishing writes a `panic` or `unknown` summary instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::HarnessConfig;
use crate::environment::TeardownReport;
use crate::error::HarnessError;
use crate::events::now_millis;
use crate::suite::ScenarioReport;
use crate::suite::ScenarioStatus;

// ============================================================================
// SECTION: Artifacts
// ============================================================================

/// Returns the default run root.
fn default_run_root(suite: &str) -> PathBuf {
    PathBuf::from("target/acceptance").join(format!("run_{}", now_millis())).join(suite)
}

/// Artifact directory for one suite run.
#[derive(Debug, Clone)]
pub struct TestArtifacts {
    /// Root directory.
    root: PathBuf,
}

impl TestArtifacts {
    /// Creates the artifact root at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
        })
    }

    /// Creates the artifact root from configuration.
    ///
    /// Uses `artifacts_directory` when set, else a timestamped directory
    /// under `target/acceptance`.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn for_config(config: &HarnessConfig, suite: &str) -> io::Result<Self> {
        let root = config
            .artifacts_directory
            .as_ref()
            .map_or_else(|| default_run_root(suite), |dir| dir.join(suite));
        Self::new(root)
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the CLI trace path for a worker.
    #[must_use]
    pub fn trace_path(&self, suite: &str, worker: u32) -> PathBuf {
        self.root.join(format!("TRACE-{suite}-{worker}.txt"))
    }

    /// Returns the event log path for a worker.
    #[must_use]
    pub fn events_path(&self, worker: u32) -> PathBuf {
        self.root.join(format!("events-{worker}.jsonl"))
    }

    /// Writes a JSON artifact using canonical JCS serialization.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the write fails.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> io::Result<PathBuf> {
        let path = self.root.join(name);
        let bytes = serde_jcs::to_vec(value).map_err(|err| io::Error::other(err.to_string()))?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Writes a UTF-8 text artifact.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub fn write_text(&self, name: &str, value: &str) -> io::Result<PathBuf> {
        let path = self.root.join(name);
        fs::write(&path, value.as_bytes())?;
        Ok(path)
    }
}

// ============================================================================
// SECTION: Reporter
// ============================================================================

/// Serialized suite summary.
#[derive(Debug, Serialize)]
struct SuiteSummary<'a> {
    /// Suite name.
    suite: &'a str,
    /// Worker index.
    worker: u32,
    /// Final status label.
    status: &'a str,
    /// Start time, ms since epoch.
    started_at_ms: u64,
    /// End time, ms since epoch.
    ended_at_ms: u64,
    /// Wall time.
    duration_ms: u64,
    /// Scenario results.
    scenarios: &'a [ScenarioReport],
    /// Teardown result, when teardown ran.
    teardown: Option<&'a TeardownReport>,
    /// Free-form notes.
    notes: &'a [String],
}

/// Collects scenario results and writes reports for one suite run.
pub struct SuiteReporter {
    /// Artifact directory.
    artifacts: TestArtifacts,
    /// Suite name.
    suite: String,
    /// Worker index.
    worker: u32,
    /// Start time, ms since epoch.
    started_at_ms: u64,
    /// Scenario results in completion order.
    scenarios: Vec<ScenarioReport>,
    /// Teardown result.
    teardown: Option<TeardownReport>,
    /// Free-form notes.
    notes: Vec<String>,
    /// Set once a summary has been written.
    finalized: bool,
}

impl SuiteReporter {
    /// Creates a reporter writing into `artifacts`.
    #[must_use]
    pub fn new(artifacts: TestArtifacts, suite: &str, worker: u32) -> Self {
        Self {
            artifacts,
            suite: suite.to_string(),
            worker,
            started_at_ms: now_millis(),
            scenarios: Vec::new(),
            teardown: None,
            notes: Vec::new(),
            finalized: false,
        }
    }

    /// Returns the artifact directory.
    #[must_use]
    pub const fn artifacts(&self) -> &TestArtifacts {
        &self.artifacts
    }

    /// Returns the recorded scenario results.
    #[must_use]
    pub fn scenarios(&self) -> &[ScenarioReport] {
        &self.scenarios
    }

    /// Adds a note to the summary.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Records a scenario result.
    pub fn record(&mut self, report: ScenarioReport) {
        self.scenarios.push(report);
    }

    /// Records the teardown result.
    pub fn record_teardown(&mut self, report: TeardownReport) {
        self.teardown = Some(report);
    }

    /// Writes `summary.json`, `summary.md`, and the JUnit report.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when an artifact cannot be written.
    pub fn finish(&mut self, status: &str) -> Result<(), HarnessError> {
        let ended_at_ms = now_millis();
        let summary = SuiteSummary {
            suite: &self.suite,
            worker: self.worker,
            status,
            started_at_ms: self.started_at_ms,
            ended_at_ms,
            duration_ms: ended_at_ms.saturating_sub(self.started_at_ms),
            scenarios: &self.scenarios,
            teardown: self.teardown.as_ref(),
            notes: &self.notes,
        };
        self.artifacts.write_json("summary.json", &summary)?;
        self.artifacts.write_text("summary.md", &summary_markdown(&summary))?;
        self.artifacts.write_text(
            &format!("junit-{}-{}.xml", self.suite, self.worker),
            &junit_xml(&self.suite, &self.scenarios),
        )?;
        self.finalized = true;
        Ok(())
    }
}

impl Drop for SuiteReporter {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        let status = if std::thread::panicking() { "panic" } else { "unknown" };
        self.note("suite terminated without explicit summary");
        let _ = self.finish(status);
    }
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders the Markdown summary.
fn summary_markdown(summary: &SuiteSummary<'_>) -> String {
    let mut out = String::new();
    out.push_str("# Acceptance Suite Summary\n\n");
    out.push_str("## Status\n\n");
    let _ = writeln!(out, "- Suite: {}", summary.suite);
    let _ = writeln!(out, "- Worker: {}", summary.worker);
    let _ = writeln!(out, "- Status: {}", summary.status);
    let _ = writeln!(out, "- Duration (ms): {}", summary.duration_ms);
    out.push_str("\n## Scenarios\n\n");
    if summary.scenarios.is_empty() {
        out.push_str("- None\n");
    }
    for scenario in summary.scenarios {
        let _ = write!(out, "- {}: {}", scenario.name, scenario.status.as_str());
        if let Some(failure) = &scenario.failure {
            let _ = write!(out, " ({failure})");
        }
        out.push('\n');
    }
    if let Some(teardown) = summary.teardown {
        out.push_str("\n## Teardown\n\n");
        let _ = writeln!(out, "- Removed: {}", teardown.removed.len());
        for failure in &teardown.failed {
            let _ = writeln!(out, "- Failed: {} ({})", failure.resource.name, failure.detail);
        }
    }
    out.push_str("\n## Notes\n\n");
    if summary.notes.is_empty() {
        out.push_str("- None\n");
    }
    for note in summary.notes {
        let _ = writeln!(out, "- {note}");
    }
    out
}

/// Renders a JUnit XML report.
fn junit_xml(suite: &str, scenarios: &[ScenarioReport]) -> String {
    let count = |status: ScenarioStatus| {
        scenarios.iter().filter(|scenario| scenario.status == status).count()
    };
    let total_ms =
        scenarios.iter().fold(0_u64, |total, scenario| total.saturating_add(scenario.duration_ms));
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{}\">",
        xml_escape(suite),
        scenarios.len(),
        count(ScenarioStatus::Failed),
        count(ScenarioStatus::Panicked) + count(ScenarioStatus::Interrupted),
        count(ScenarioStatus::Skipped),
        seconds(total_ms),
    );
    for scenario in scenarios {
        let _ = write!(
            out,
            "  <testcase name=\"{}\" classname=\"{}\" time=\"{}\"",
            xml_escape(&scenario.name),
            xml_escape(suite),
            seconds(scenario.duration_ms),
        );
        let message = xml_escape(scenario.failure.as_deref().unwrap_or_default());
        let kind = scenario.failure_kind.unwrap_or(scenario.status.as_str());
        match scenario.status {
            ScenarioStatus::Passed => out.push_str("/>\n"),
            ScenarioStatus::Skipped => {
                let _ = writeln!(out, "><skipped message=\"{message}\"/></testcase>");
            }
            ScenarioStatus::Failed => {
                let _ = writeln!(
                    out,
                    "><failure type=\"{kind}\" message=\"{message}\">{message}</failure></testcase>"
                );
            }
            ScenarioStatus::Panicked | ScenarioStatus::Interrupted => {
                let _ = writeln!(
                    out,
                    "><error type=\"{kind}\" message=\"{message}\">{message}</error></testcase>"
                );
            }
        }
    }
    out.push_str("</testsuite>\n");
    out
}

/// Formats milliseconds as fractional seconds.
fn seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Escapes text for XML attributes and content.
///
/// Control characters other than tab, newline, and carriage return are not
/// legal XML 1.0 and are replaced with U+FFFD.
fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(ch),
            _ if ch < ' ' => out.push(char::REPLACEMENT_CHARACTER),
            _ => out.push(ch),
        }
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================
