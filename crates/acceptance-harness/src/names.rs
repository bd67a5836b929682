// crates/acceptance-harness/src/names.rs
// ============================================================================
// Module: Resource Names
// Description: Collision-free names for disposable platform resources.
// Purpose: Keep parallel workers and repeated runs from colliding.
// Dependencies: rand
// ============================================================================

//! Random, worker-scoped resource names.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of the random suffix appended to generated names.
const SUFFIX_LEN: usize = 10;

/// Returns `<prefix>-<random>` with a lowercase alphanumeric suffix.
#[must_use]
pub fn random_name(prefix: &str) -> String {
    format!("{prefix}-{}", random_suffix(SUFFIX_LEN))
}

/// Returns a lowercase alphanumeric string of `len` characters.
#[must_use]
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect()
}

/// Generates names of the form `<prefix>-<kind>-<worker>-<random>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNamer {
    /// Run-wide prefix from configuration.
    prefix: String,
    /// Worker index.
    worker: u32,
}

impl ResourceNamer {
    /// Creates a namer for a worker.
    #[must_use]
    pub fn new(prefix: impl Into<String>, worker: u32) -> Self {
        Self {
            prefix: prefix.into(),
            worker,
        }
    }

    /// Returns a fresh name for a resource kind.
    #[must_use]
    pub fn name(&self, kind: &str) -> String {
        random_name(&format!("{}-{kind}-{}", self.prefix, self.worker))
    }
}
