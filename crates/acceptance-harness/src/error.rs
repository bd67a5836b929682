// crates/acceptance-harness/src/error.rs
// ============================================================================
// Module: Harness Errors
// Description: Failure taxonomy for the acceptance harness.
// Purpose: Keep spawn, timeout, identity, API, and setup failures distinct.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every harness operation returns [`HarnessError`]. Variants map one-to-one
//! onto the failure classes scenario authors need to tell apart: a spawn
//! failure is not a nonzero exit, and an identity-restore failure is not an
//! assertion failure.
//!
//! A nonzero exit code is never an error here; it is an assertable outcome on
//! [`crate::process::Session`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Acceptance harness failures.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The external executable could not be started.
    #[error("failed to spawn {program}: {detail}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error text.
        detail: String,
    },
    /// A polling deadline elapsed without the condition holding.
    #[error(
        "timed out after {elapsed_ms} ms ({attempts} attempts) waiting for {description}: {detail}"
    )]
    Timeout {
        /// What the poll was waiting for.
        description: String,
        /// Milliseconds elapsed when the poll gave up.
        elapsed_ms: u64,
        /// Number of evaluator invocations.
        attempts: u32,
        /// Failure detail from the final evaluation.
        detail: String,
    },
    /// The previously active principal could not be restored.
    #[error("failed to restore identity {principal}: {detail}")]
    IdentityRestore {
        /// Label of the principal that should have been restored.
        principal: String,
        /// Underlying failure.
        detail: String,
    },
    /// Management API request failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Environment setup failed; the worker cannot run scenarios.
    #[error("environment setup failed: {0}")]
    Setup(String),
    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A scenario-level expectation did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// Filesystem failure while preparing fixtures or artifacts.
    #[error("io error: {0}")]
    Io(String),
}

impl HarnessError {
    /// Returns true when the failure invalidates the rest of the worker's run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::IdentityRestore { .. } | Self::Setup(_) | Self::Config(_)
        )
    }

    /// Returns a stable label for the failure class.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Timeout { .. } => "timeout",
            Self::IdentityRestore { .. } => "identity_restore",
            Self::Api(_) => "api",
            Self::Setup(_) => "setup",
            Self::Config(_) => "config",
            Self::Assertion(_) => "assertion",
            Self::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
