// crates/acceptance-harness/src/poll.rs
// ============================================================================
// Module: Polling Assertions
// Description: Deadline-bounded, interval-sampled condition checks.
// Purpose: Synchronize with asynchronous platform operations without sleeps.
// Dependencies: tokio, regex
// ============================================================================

//! ## Overview
//! The platform offers no completion callback for staging or provisioning, so
//! the harness samples conditions until they hold or a deadline passes.
//!
//! Invariants:
//! - The first evaluation happens immediately; an already-true condition
//!   succeeds without sleeping.
//! - Sleeps never overshoot the deadline; a final evaluation runs at the
//!   deadline itself, so a failure is reported no earlier than the timeout.
//! - Each evaluation is itself bounded by the remaining budget.
//! - The poller never kills processes; expiring is the only cancellation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::ops::Range;
use std::time::Duration;

use regex::bytes::Regex;
use tokio::time::Instant;
use tokio::time::sleep;
use tokio::time::timeout;

use crate::error::HarnessError;
use crate::events::duration_millis;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default deadline for simple CLI commands and queries.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default deadline for application pushes and other staging work.
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(60);
/// Default interval between evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Smallest interval accepted; zero would spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Deadline and sampling interval for a polling assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total time budget.
    pub timeout: Duration,
    /// Delay between evaluations.
    pub interval: Duration,
}

impl PollPolicy {
    /// Builds a policy, clamping the interval to at least one millisecond.
    #[must_use]
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Builds a policy with the default interval.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL)
    }

    /// Returns the policy used for application pushes.
    #[must_use]
    pub fn push() -> Self {
        Self::with_timeout(PUSH_TIMEOUT)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}

/// Deadline semantics for ordered multi-pattern assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceDeadline {
    /// Each pattern gets the full policy timeout.
    #[default]
    PerPattern,
    /// All patterns share a single policy timeout.
    Shared,
}

// ============================================================================
// SECTION: Patterns
// ============================================================================

/// Pattern searched for in an output stream.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact byte substring.
    Literal(String),
    /// Regular expression over raw bytes.
    Regex(Regex),
}

impl Pattern {
    /// Builds a literal pattern.
    #[must_use]
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Builds a regular-expression pattern.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Assertion`] when the expression does not compile.
    pub fn regex(expression: &str) -> Result<Self, HarnessError> {
        Regex::new(expression)
            .map(Self::Regex)
            .map_err(|err| HarnessError::Assertion(format!("invalid pattern {expression}: {err}")))
    }

    /// Returns the first match range within `haystack`.
    #[must_use]
    pub fn find(&self, haystack: &[u8]) -> Option<Range<usize>> {
        match self {
            Self::Literal(text) => find_literal(haystack, text.as_bytes()),
            Self::Regex(regex) => regex.find(haystack).map(|found| found.range()),
        }
    }

    /// Returns a human-readable description for failure messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Literal(text) => format!("\"{text}\""),
            Self::Regex(regex) => format!("/{}/", regex.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(value: &str) -> Self {
        Self::literal(value)
    }
}

impl From<String> for Pattern {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

/// Finds the first occurrence of `needle` in `haystack`.
fn find_literal(haystack: &[u8], needle: &[u8]) -> Option<Range<usize>> {
    if needle.is_empty() {
        return Some(0 .. 0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|start| start .. start + needle.len())
}

// ============================================================================
// SECTION: Polling
// ============================================================================

/// Re-evaluates `evaluator` until it succeeds or the policy deadline passes.
///
/// The evaluator reports on the current state only; an `Err` carries the
/// reason this tick failed and becomes the detail of a timeout failure.
///
/// # Errors
///
/// Returns [`HarnessError::Timeout`] when the deadline elapses without success.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    description: &str,
    mut evaluator: F,
) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        let budget = policy.timeout.saturating_sub(start.elapsed());
        let detail = match timeout(budget, evaluator()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(reason)) => reason,
            Err(_) => "evaluation did not complete before the deadline".to_string(),
        };
        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(HarnessError::Timeout {
                description: description.to_string(),
                elapsed_ms: duration_millis(elapsed),
                attempts,
                detail,
            });
        }
        sleep(policy.interval.min(policy.timeout - elapsed)).await;
    }
}

/// Synchronous-predicate flavor of [`poll_until`].
///
/// # Errors
///
/// Returns [`HarnessError::Timeout`] when the deadline elapses without success.
pub async fn eventually<F>(
    policy: PollPolicy,
    description: &str,
    mut check: F,
) -> Result<(), HarnessError>
where
    F: FnMut() -> Result<(), String>,
{
    poll_until(policy, description, || std::future::ready(check())).await
}

// ============================================================================
// SECTION: Tests
// ============================================================================
