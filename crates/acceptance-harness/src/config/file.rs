// crates/acceptance-harness/src/config/file.rs
// ============================================================================
// Module: Harness Configuration File
// Description: TOML configuration loading and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with a size limit and UTF-8
//! enforcement, layered with [`EnvOverrides`], and validated. Missing or
//! invalid configuration fails closed; a run that cannot authenticate or
//! target the platform must not start.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::env::EnvOverrides;
use super::env::HarnessEnv;
use super::env::read_env_nonempty;
use crate::identity::Principal;
use crate::identity::PrincipalScope;
use crate::poll::PollPolicy;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "acceptance.toml";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 64 * 1024;
/// Default CLI executable.
const DEFAULT_CLI: &str = "cf";
/// Default prefix for disposable resource names.
const DEFAULT_NAME_PREFIX: &str = "BPATS";
/// Maximum resource-name prefix length.
const MAX_NAME_PREFIX_LEN: usize = 32;

// ============================================================================
// SECTION: Config Types
// ============================================================================

/// Username and password for one principal.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Login name.
    pub username: String,
    /// Password; never rendered by `Debug`.
    pub password: String,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Timeout settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimeoutConfig {
    /// Deadline for simple commands, in seconds.
    pub default_secs: u64,
    /// Deadline for pushes and staging, in seconds.
    pub push_secs: u64,
    /// Interval between poll evaluations, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_secs: 30,
            push_secs: 60,
            poll_interval_ms: 10,
        }
    }
}

impl TimeoutConfig {
    /// Returns the default command deadline.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    /// Returns the push deadline.
    #[must_use]
    pub const fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_secs)
    }

    /// Returns the poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Acceptance run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Management API endpoint of the platform under test.
    pub api: String,
    /// Skip TLS certificate validation for CLI and API calls.
    #[serde(default)]
    pub skip_ssl_validation: bool,
    /// Platform CLI executable.
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,
    /// Prefix for disposable resource names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Administrative principal.
    pub admin: CredentialsConfig,
    /// Existing standard principal; created during setup when absent.
    #[serde(default)]
    pub user: Option<CredentialsConfig>,
    /// Timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Directory for traces, event logs, and reports.
    #[serde(default)]
    pub artifacts_directory: Option<PathBuf>,
    /// Worker index for parallel runs.
    #[serde(default)]
    pub worker: u32,
}

/// Returns the default CLI path.
fn default_cli_path() -> PathBuf {
    PathBuf::from(DEFAULT_CLI)
}

/// Returns the default resource-name prefix.
fn default_name_prefix() -> String {
    DEFAULT_NAME_PREFIX.to_string()
}

impl HarnessConfig {
    /// Loads configuration from disk and applies environment overrides.
    ///
    /// The path is `path`, else `BUILDPACK_ACCEPTANCE_CONFIG`, else
    /// `acceptance.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        let bytes = fs::read(&resolved)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", resolved.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::parse(content)?;
        config.apply_overrides(&EnvOverrides::load()?);
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates TOML without consulting the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML into a config.
    fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Layers environment overrides onto the config.
    ///
    /// A timeout floor acts as a minimum so it never shortens a longer
    /// configured deadline.
    pub fn apply_overrides(&mut self, overrides: &EnvOverrides) {
        if let Some(dir) = &overrides.artifacts_dir {
            self.artifacts_directory = Some(dir.clone());
        }
        if let Some(worker) = overrides.worker {
            self.worker = worker;
        }
        if let Some(floor) = overrides.timeout_floor {
            let floor_secs = floor.as_secs();
            self.timeouts.default_secs = self.timeouts.default_secs.max(floor_secs);
            self.timeouts.push_secs = self.timeouts.push_secs.max(floor_secs);
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let api = Url::parse(self.api.trim())
            .map_err(|err| ConfigError::Invalid(format!("api must be a valid url: {err}")))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid("api must use http or https".to_string()));
        }
        if self.cli_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cli_path must be non-empty".to_string()));
        }
        validate_name_prefix(&self.name_prefix)?;
        validate_credentials("admin", &self.admin)?;
        if let Some(user) = &self.user {
            validate_credentials("user", user)?;
        }
        let timeouts = &self.timeouts;
        if timeouts.default_secs == 0 || timeouts.push_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".to_string()));
        }
        if timeouts.push_secs < timeouts.default_secs {
            return Err(ConfigError::Invalid(
                "timeouts.push_secs must be at least timeouts.default_secs".to_string(),
            ));
        }
        if timeouts.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if timeouts.poll_interval() > timeouts.default_timeout() {
            return Err(ConfigError::Invalid(
                "timeouts.poll_interval_ms must not exceed timeouts.default_secs".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the administrative principal.
    #[must_use]
    pub fn admin_principal(&self) -> Principal {
        Principal::new(
            "admin",
            &self.admin.username,
            &self.admin.password,
            PrincipalScope::Admin,
        )
    }

    /// Returns the configured standard principal, if any.
    #[must_use]
    pub fn user_principal(&self) -> Option<Principal> {
        self.user.as_ref().map(|user| {
            Principal::new("user", &user.username, &user.password, PrincipalScope::Standard)
        })
    }

    /// Returns the policy for simple commands.
    #[must_use]
    pub fn default_policy(&self) -> PollPolicy {
        PollPolicy::new(self.timeouts.default_timeout(), self.timeouts.poll_interval())
    }

    /// Returns the policy for pushes and staging.
    #[must_use]
    pub fn push_policy(&self) -> PollPolicy {
        PollPolicy::new(self.timeouts.push_timeout(), self.timeouts.poll_interval())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the argument, the environment, or default.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Some(env_path) = read_env_nonempty(HarnessEnv::Config.as_str())? {
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates one credentials block.
fn validate_credentials(field: &str, credentials: &CredentialsConfig) -> Result<(), ConfigError> {
    if credentials.username.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field}.username must be non-empty")));
    }
    if credentials.password.is_empty() {
        return Err(ConfigError::Invalid(format!("{field}.password must be non-empty")));
    }
    Ok(())
}

/// Validates the resource-name prefix.
fn validate_name_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() || prefix.len() > MAX_NAME_PREFIX_LEN {
        return Err(ConfigError::Invalid(format!(
            "name_prefix must be 1 to {MAX_NAME_PREFIX_LEN} characters"
        )));
    }
    if !prefix.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_') {
        return Err(ConfigError::Invalid(
            "name_prefix may only contain ASCII letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}
