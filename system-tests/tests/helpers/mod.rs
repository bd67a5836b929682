// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: System Test Helpers
// Description: Shared helpers for the buildpack system tests.
// Purpose: Load configuration, wire event sinks, and hold scenario context.
// Dependencies: acceptance-harness, system-tests
// ============================================================================

//! ## Overview
//! Shared helpers for the buildpack system tests.

pub mod harness;
