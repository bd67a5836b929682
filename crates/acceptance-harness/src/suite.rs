// crates/acceptance-harness/src/suite.rs
// ============================================================================
// Module: Suite Runner
// Description: Table-driven scenario execution around one worker environment.
// Purpose: Run scenarios with per-scenario hooks, panic isolation, and teardown.
// Dependencies: tokio, futures, serde
// ============================================================================

//! ## Overview
//! A [`Suite`] is a named table of async scenario functions plus optional
//! `before_each`/`after_each` hooks. [`Suite::run`] sets up the worker
//! environment, runs each scenario in registration order, and always tears
//! the environment down.
//!
//! Invariants:
//! - A panic in a hook or scenario is caught and recorded; the run continues.
//! - `after_each` runs whenever `before_each` was attempted.
//! - A fatal error ([`HarnessError::is_fatal`]) skips the remaining scenarios,
//!   including one raised by `after_each` after the scenario already failed.
//! - One Ctrl-C listener covers the whole run. An interrupt cancels setup or
//!   the running scenario and skips the rest; teardown always runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::artifacts::SuiteReporter;
use crate::environment::TeardownReport;
use crate::environment::TestEnvironment;
use crate::error::HarnessError;
use crate::error::panic_message;
use crate::events::EventOutcome;
use crate::events::HarnessEvent;
use crate::events::duration_millis;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Async scenario or hook over a suite context.
pub type ScenarioFn<C> = for<'a> fn(&'a mut C) -> LocalBoxFuture<'a, Result<(), HarnessError>>;

/// Final status of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Every step succeeded.
    Passed,
    /// A step returned an error.
    Failed,
    /// A step panicked.
    Panicked,
    /// Not run because an earlier failure was fatal or the run was stopped.
    Skipped,
    /// Cancelled by Ctrl-C while running.
    Interrupted,
}

impl ScenarioStatus {
    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Panicked => "panicked",
            Self::Skipped => "skipped",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Recorded result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: String,
    /// Final status.
    pub status: ScenarioStatus,
    /// Wall time including hooks.
    pub duration_ms: u64,
    /// Failure class label, when failed.
    pub failure_kind: Option<&'static str>,
    /// Failure text, when failed or panicked.
    pub failure: Option<String>,
}

/// Aggregate result of a suite run.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteOutcome {
    /// Per-scenario results in registration order.
    pub scenarios: Vec<ScenarioReport>,
    /// Teardown result.
    pub teardown: TeardownReport,
    /// True when Ctrl-C stopped the run.
    pub interrupted: bool,
}

impl SuiteOutcome {
    /// Returns true when every scenario passed and the run was not stopped.
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.interrupted
            && self.scenarios.iter().all(|report| report.status == ScenarioStatus::Passed)
    }

    /// Returns the reports that did not pass.
    #[must_use]
    pub fn failures(&self) -> Vec<&ScenarioReport> {
        self.scenarios.iter().filter(|report| report.status != ScenarioStatus::Passed).collect()
    }
}

/// Result of a single step.
enum StepOutcome {
    /// Step succeeded.
    Ok,
    /// Step returned an error.
    Failed(HarnessError),
    /// Step panicked with the rendered payload.
    Panicked(String),
}

/// A registered scenario.
struct Scenario<C> {
    /// Scenario name.
    name: String,
    /// Scenario body.
    run: ScenarioFn<C>,
}

// ============================================================================
// SECTION: Suite
// ============================================================================

/// Named scenario table.
pub struct Suite<C> {
    /// Suite name, used in reports and artifact names.
    name: String,
    /// Registered scenarios in order.
    scenarios: Vec<Scenario<C>>,
    /// Hook run before every scenario.
    before_each: Option<ScenarioFn<C>>,
    /// Hook run after every scenario.
    after_each: Option<ScenarioFn<C>>,
}

impl<C: AsMut<TestEnvironment>> Suite<C> {
    /// Creates an empty suite.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scenarios: Vec::new(),
            before_each: None,
            after_each: None,
        }
    }

    /// Returns the suite name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a scenario.
    #[must_use]
    pub fn scenario(mut self, name: impl Into<String>, run: ScenarioFn<C>) -> Self {
        self.scenarios.push(Scenario {
            name: name.into(),
            run,
        });
        self
    }

    /// Sets the hook run before every scenario.
    #[must_use]
    pub fn before_each(mut self, hook: ScenarioFn<C>) -> Self {
        self.before_each = Some(hook);
        self
    }

    /// Sets the hook run after every scenario.
    #[must_use]
    pub fn after_each(mut self, hook: ScenarioFn<C>) -> Self {
        self.after_each = Some(hook);
        self
    }

    /// Sets up, runs every scenario, tears down, and writes the reports.
    ///
    /// Ctrl-C is handled for the whole call: it stops setup or the running
    /// scenario, and teardown still runs.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Setup`] when the environment cannot be set up,
    /// or [`HarnessError::Io`] when the reports cannot be written.
    pub async fn run(
        &self,
        ctx: &mut C,
        reporter: &mut SuiteReporter,
    ) -> Result<SuiteOutcome, HarnessError> {
        let (raise, interrupt) = watch::channel(false);
        let listener = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = raise.send(true);
            }
        });
        let outcome = self.run_until(ctx, reporter, interrupt).await;
        listener.abort();
        outcome
    }

    /// Runs the suite, stopping early once `interrupt` turns true.
    pub(crate) async fn run_until(
        &self,
        ctx: &mut C,
        reporter: &mut SuiteReporter,
        mut interrupt: watch::Receiver<bool>,
    ) -> Result<SuiteOutcome, HarnessError> {
        let setup = tokio::select! {
            result = ctx.as_mut().setup() => Some(result),
            () = interrupt_raised(&mut interrupt) => None,
        };
        let mut interrupted = false;
        match setup {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                reporter.note(format!("setup failed: {err}"));
                reporter.finish("setup_failed")?;
                return Err(err);
            }
            None => {
                interrupted = true;
                reporter.note("interrupted during setup");
            }
        }

        let mut scenarios = Vec::with_capacity(self.scenarios.len());
        let mut stop_reason = interrupted.then(|| "skipped after interrupt".to_string());
        for scenario in &self.scenarios {
            if stop_reason.is_none() && *interrupt.borrow() {
                interrupted = true;
                stop_reason = Some("skipped after interrupt".to_string());
            }
            if let Some(reason) = &stop_reason {
                let report = ScenarioReport {
                    name: scenario.name.clone(),
                    status: ScenarioStatus::Skipped,
                    duration_ms: 0,
                    failure_kind: None,
                    failure: Some(reason.clone()),
                };
                reporter.record(report.clone());
                scenarios.push(report);
                continue;
            }
            let started = Instant::now();
            let executed = tokio::select! {
                outcome = self.execute(ctx, scenario.run) => Some(outcome),
                () = interrupt_raised(&mut interrupt) => None,
            };
            let duration_ms = duration_millis(started.elapsed());
            let report = match executed {
                Some(outcome) => {
                    let (status, failure_kind, failure) = match outcome {
                        StepOutcome::Ok => (ScenarioStatus::Passed, None, None),
                        StepOutcome::Failed(err) => {
                            if err.is_fatal() {
                                stop_reason = Some(format!(
                                    "skipped after fatal error in {}: {err}",
                                    scenario.name
                                ));
                            }
                            (ScenarioStatus::Failed, Some(err.kind()), Some(err.to_string()))
                        }
                        StepOutcome::Panicked(message) => {
                            (ScenarioStatus::Panicked, Some("panic"), Some(message))
                        }
                    };
                    ScenarioReport {
                        name: scenario.name.clone(),
                        status,
                        duration_ms,
                        failure_kind,
                        failure,
                    }
                }
                None => {
                    interrupted = true;
                    stop_reason = Some("skipped after interrupt".to_string());
                    ScenarioReport {
                        name: scenario.name.clone(),
                        status: ScenarioStatus::Interrupted,
                        duration_ms,
                        failure_kind: None,
                        failure: Some("interrupted".to_string()),
                    }
                }
            };
            self.record_scenario(ctx, &report);
            reporter.record(report.clone());
            scenarios.push(report);
        }

        interrupted |= *interrupt.borrow();
        let teardown = ctx.as_mut().teardown().await;
        reporter.record_teardown(teardown.clone());
        let outcome = SuiteOutcome {
            scenarios,
            teardown,
            interrupted,
        };
        let status = if interrupted {
            "interrupted"
        } else if outcome.passed() {
            "pass"
        } else {
            "fail"
        };
        reporter.finish(status)?;
        Ok(outcome)
    }

    /// Runs hooks and the scenario body, returning the first failure.
    async fn execute(&self, ctx: &mut C, run: ScenarioFn<C>) -> StepOutcome {
        if let Some(before) = self.before_each {
            let outcome = run_step(before, ctx).await;
            if !matches!(outcome, StepOutcome::Ok) {
                return self.finish_scenario(ctx, outcome).await;
            }
        }
        let outcome = run_step(run, ctx).await;
        self.finish_scenario(ctx, outcome).await
    }

    /// Runs `after_each` and merges its result with the scenario outcome.
    ///
    /// The first failure wins unless `after_each` fails fatally; the masked
    /// failure is then kept as an event.
    async fn finish_scenario(&self, ctx: &mut C, outcome: StepOutcome) -> StepOutcome {
        let Some(after) = self.after_each else {
            return outcome;
        };
        let after_outcome = run_step(after, ctx).await;
        match (outcome, after_outcome) {
            (StepOutcome::Ok, after_outcome) => after_outcome,
            (masked, StepOutcome::Failed(err)) if err.is_fatal() => {
                let masked = match masked {
                    StepOutcome::Failed(masked) => masked.to_string(),
                    StepOutcome::Panicked(message) => format!("panic: {message}"),
                    StepOutcome::Ok => String::new(),
                };
                ctx.as_mut().identity().runner().events().record(
                    HarnessEvent::new("suite.masked_failure", EventOutcome::Error)
                        .with_detail(format!("{masked}; superseded by after_each: {err}")),
                );
                StepOutcome::Failed(err)
            }
            (outcome, _) => outcome,
        }
    }

    /// Records a scenario event through the environment's recorder.
    fn record_scenario(&self, ctx: &mut C, report: &ScenarioReport) {
        let outcome = match report.status {
            ScenarioStatus::Passed => EventOutcome::Ok,
            _ => EventOutcome::Error,
        };
        let mut event = HarnessEvent::new("suite.scenario", outcome)
            .with_command(format!("{}::{}", self.name, report.name));
        if let Some(failure) = &report.failure {
            event = event.with_detail(failure.clone());
        }
        ctx.as_mut().identity().runner().events().record(event);
    }
}

/// Resolves once the interrupt flag is raised.
///
/// Never resolves when the flag's sender is gone without raising it.
async fn interrupt_raised(flag: &mut watch::Receiver<bool>) {
    if flag.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Runs one step with panic isolation.
async fn run_step<C>(step: ScenarioFn<C>, ctx: &mut C) -> StepOutcome {
    match AssertUnwindSafe(step(ctx)).catch_unwind().await {
        Ok(Ok(())) => StepOutcome::Ok,
        Ok(Err(err)) => StepOutcome::Failed(err),
        Err(payload) => StepOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
