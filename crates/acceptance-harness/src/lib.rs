// crates/acceptance-harness/src/lib.rs
// ============================================================================
// Module: Acceptance Harness Library
// Description: Orchestration engine for black-box buildpack acceptance tests.
// Purpose: Provide process, polling, identity, API, and lifecycle primitives.
// Dependencies: tokio, reqwest, serde, thiserror, toml
// ============================================================================

//! ## Overview
//! This crate drives an external platform CLI and the platform management API
//! against a live deployment and asserts on their observable behavior under
//! bounded time budgets.
//!
//! Leaves first:
//! - [`process`]: spawns commands and captures their output incrementally.
//! - [`poll`]: deadline-bounded polling assertions over streams and predicates.
//! - [`identity`]: scoped principal switching with guaranteed restore.
//! - [`api`]: authenticated JSON requests against the management API.
//! - [`environment`]: once-per-worker setup and best-effort teardown.
//! - [`suite`]: table-driven scenario runner tying the pieces together.
//!
//! Invariants:
//! - Every wait is deadline-bounded; nothing in the harness blocks forever.
//! - Worker state is owned per worker; only configuration is shared.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod api;
pub mod artifacts;
pub mod config;
pub mod environment;
pub mod error;
pub mod events;
pub mod identity;
pub mod names;
pub mod poll;
pub mod process;
pub mod suite;

#[cfg(test)]
mod test_support;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use api::ApiClient;
pub use api::ApiError;
pub use config::HarnessConfig;
pub use environment::TestEnvironment;
pub use error::HarnessError;
pub use identity::IdentityContext;
pub use identity::Principal;
pub use poll::PollPolicy;
pub use process::Invocation;
pub use process::ProcessRunner;
pub use process::Session;
