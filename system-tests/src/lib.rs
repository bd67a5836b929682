// system-tests/src/lib.rs
// ============================================================================
// Module: Buildpack System Tests Library
// Description: Shared fixtures for the live buildpack scenarios.
// Purpose: Build buildpack archives and app directories on disk.
// Dependencies: acceptance-harness, tempfile
// ============================================================================

//! ## Overview
//! This crate hosts the on-disk fixtures used by the buildpack scenario
//! binaries in `system-tests/tests`. The scenarios themselves only run with
//! the `system-tests` feature because they need a live platform.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod fixtures;
