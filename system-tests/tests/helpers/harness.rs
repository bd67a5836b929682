// system-tests/tests/helpers/harness.rs
// ============================================================================
// Module: Buildpack Harness Helpers
// Description: Worker wiring for the live buildpack scenarios.
// Purpose: Build the runner, environment, API client, and scenario context.
// Dependencies: acceptance-harness, system-tests
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use acceptance_harness::ApiClient;
use acceptance_harness::HarnessConfig;
use acceptance_harness::HarnessError;
use acceptance_harness::ProcessRunner;
use acceptance_harness::TestEnvironment;
use acceptance_harness::artifacts::TestArtifacts;
use acceptance_harness::config::ConfigError;
use acceptance_harness::events::EventRecorder;
use acceptance_harness::events::FileEventSink;
use acceptance_harness::events::HarnessEventSink;
use acceptance_harness::events::StderrEventSink;
use acceptance_harness::events::TeeEventSink;
use system_tests::fixtures::AppFixture;
use system_tests::fixtures::BuildpackFixture;

/// Suite name used in artifact file names.
pub const SUITE_NAME: &str = "buildpack_lifecycle";
/// CLI variable naming the request trace file.
const CLI_TRACE_ENV: &str = "CF_TRACE";

/// Loads the acceptance config, or `None` when no config file exists.
pub fn load_config() -> Result<Option<HarnessConfig>, HarnessError> {
    match HarnessConfig::load(None) {
        Ok(config) => Ok(Some(config)),
        Err(ConfigError::Io(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Artifact root used when the suite is skipped for lack of config.
pub fn skipped_artifacts() -> std::io::Result<TestArtifacts> {
    TestArtifacts::new(PathBuf::from("target/acceptance").join(SUITE_NAME))
}

/// Builds the worker's process runner.
///
/// Events go to `events-<worker>.jsonl` and stderr; the CLI writes its
/// request trace to `TRACE-<suite>-<worker>.txt`.
pub fn worker_runner(
    config: &HarnessConfig,
    artifacts: &TestArtifacts,
) -> Result<ProcessRunner, HarnessError> {
    let file = FileEventSink::new(&artifacts.events_path(config.worker))?;
    let sinks: Vec<Arc<dyn HarnessEventSink>> = vec![Arc::new(file), Arc::new(StderrEventSink)];
    let events = EventRecorder::new(Arc::new(TeeEventSink::new(sinks)), config.worker);
    let trace = artifacts.trace_path(SUITE_NAME, config.worker);
    Ok(ProcessRunner::new(events).with_env(CLI_TRACE_ENV, trace.display().to_string()))
}

/// Per-worker state shared by the buildpack scenarios.
pub struct BuildpackContext {
    /// Worker environment.
    pub env: TestEnvironment,
    /// Management API client.
    pub api: ApiClient,
    /// Buildpack for the current scenario.
    pub buildpack: Option<BuildpackFixture>,
    /// App for the current scenario.
    pub app: Option<AppFixture>,
}

impl BuildpackContext {
    /// Builds the context for a worker.
    pub fn new(config: HarnessConfig, runner: ProcessRunner) -> Result<Self, HarnessError> {
        let api = ApiClient::new(
            &config.api,
            config.timeouts.default_timeout(),
            config.skip_ssl_validation,
        )?;
        Ok(Self {
            env: TestEnvironment::new(config, runner)?,
            api,
            buildpack: None,
            app: None,
        })
    }

    /// Returns the current scenario's fixtures.
    pub fn fixtures(&self) -> Result<(&BuildpackFixture, &AppFixture), HarnessError> {
        match (&self.buildpack, &self.app) {
            (Some(buildpack), Some(app)) => Ok((buildpack, app)),
            _ => Err(HarnessError::Assertion("scenario fixtures were not created".to_string())),
        }
    }
}

impl AsMut<TestEnvironment> for BuildpackContext {
    fn as_mut(&mut self) -> &mut TestEnvironment {
        &mut self.env
    }
}
