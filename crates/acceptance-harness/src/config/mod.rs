// crates/acceptance-harness/src/config/mod.rs
// ============================================================================
// Module: Harness Configuration
// Description: Centralized configuration for acceptance runs.
// Purpose: Provide typed access to platform target, credentials, and timeouts.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration is read from a TOML file and then layered with environment
//! overrides. The harness treats credentials and endpoints as opaque values;
//! validation only rejects inputs that cannot possibly work.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod env;
mod file;

// ============================================================================
// SECTION: Tests
// ============================================================================


// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use env::EnvOverrides;
pub use env::HarnessEnv;
pub use env::read_env_strict;
pub use file::ConfigError;
pub use file::CredentialsConfig;
pub use file::HarnessConfig;
pub use file::TimeoutConfig;
