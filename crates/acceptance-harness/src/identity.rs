// crates/acceptance-harness/src/identity.rs
// ============================================================================
// Module: Identity Scope
// Description: Per-worker authenticated CLI context with scoped switching.
// Purpose: Run blocks as another principal and always restore the previous one.
// Dependencies: tokio, futures, tempfile
// ============================================================================

//! ## Overview
//! The platform CLI keeps its login in a home directory. Each
//! [`IdentityContext`] owns a private home (passed to every command through
//! `CF_HOME`) plus the marker of which principal is logged in there, so
//! parallel workers never observe each other's logins.
//!
//! [`IdentityContext::as_principal`] authenticates, runs a block, and restores
//! the previous principal on every exit path: success, error, and panic. When
//! there was no previous principal the context logs out instead.
//!
//! Invariants:
//! - The marker is set only after a full successful login, and cleared as
//!   soon as a login attempt starts; it never names a principal the CLI does
//!   not hold.
//! - Restore failures surface as [`HarnessError::IdentityRestore`] and take
//!   precedence over the block's own error or panic.
//! - Secrets are passed as redacted arguments and never logged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::path::PathBuf;

use futures::FutureExt;
use tempfile::TempDir;

use crate::error::HarnessError;
use crate::error::panic_message;
use crate::events::EventOutcome;
use crate::events::HarnessEvent;
use crate::poll::PollPolicy;
use crate::process::Invocation;
use crate::process::ProcessRunner;
use crate::process::Session;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable naming the CLI home directory.
pub const CLI_HOME_ENV: &str = "CF_HOME";
/// Label used when no principal was active.
const NO_PRINCIPAL: &str = "none";
/// Prefix of the token line printed by `oauth-token`.
const BEARER_PREFIX: &str = "bearer ";

// ============================================================================
// SECTION: Principals
// ============================================================================

/// Privilege level of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalScope {
    /// Platform administrator.
    Admin,
    /// Ordinary developer account.
    Standard,
}

impl PrincipalScope {
    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Standard => "standard",
        }
    }
}

/// Secret string that never renders through `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Named credential set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Display label used in events and errors.
    label: String,
    /// Login name.
    username: String,
    /// Password.
    password: Secret,
    /// Privilege level.
    scope: PrincipalScope,
}

impl Principal {
    /// Creates a principal.
    #[must_use]
    pub fn new(label: &str, username: &str, password: &str, scope: PrincipalScope) -> Self {
        Self {
            label: label.to_string(),
            username: username.to_string(),
            password: Secret::new(password),
            scope,
        }
    }

    /// Returns the display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password.
    #[must_use]
    pub const fn password(&self) -> &Secret {
        &self.password
    }

    /// Returns the privilege level.
    #[must_use]
    pub const fn scope(&self) -> PrincipalScope {
        self.scope
    }
}

/// Org and space the CLI targets after login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliTarget {
    /// Organization name.
    pub org: String,
    /// Space name within the org.
    pub space: Option<String>,
}

// ============================================================================
// SECTION: Identity Context
// ============================================================================

/// Per-worker CLI session state.
pub struct IdentityContext {
    /// CLI executable.
    cli: PathBuf,
    /// Runner carrying the private `CF_HOME`.
    runner: ProcessRunner,
    /// Private CLI home; removed on drop.
    home: TempDir,
    /// Active-principal marker.
    active: Option<Principal>,
    /// Bearer token for the active principal.
    token: Option<String>,
    /// Target re-applied after every login.
    target: Option<CliTarget>,
    /// Policy for identity commands.
    policy: PollPolicy,
}

impl IdentityContext {
    /// Creates a logged-out context with a fresh private CLI home.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when the home directory cannot be created.
    pub fn new(
        cli: impl Into<PathBuf>,
        runner: ProcessRunner,
        policy: PollPolicy,
    ) -> Result<Self, HarnessError> {
        let home = tempfile::Builder::new().prefix("cf-home-").tempdir()?;
        let runner = runner.with_env(CLI_HOME_ENV, home.path().display().to_string());
        Ok(Self {
            cli: cli.into(),
            runner,
            home,
            active: None,
            token: None,
            target: None,
            policy,
        })
    }

    /// Returns the active principal, if any.
    #[must_use]
    pub const fn active(&self) -> Option<&Principal> {
        self.active.as_ref()
    }

    /// Returns the bearer token of the active principal.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Returns the private CLI home.
    #[must_use]
    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// Returns the runner that carries this context's CLI home.
    #[must_use]
    pub const fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Returns the policy applied to identity commands.
    #[must_use]
    pub const fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Returns the target re-applied after login.
    #[must_use]
    pub const fn target(&self) -> Option<&CliTarget> {
        self.target.as_ref()
    }

    /// Sets the target re-applied after every login.
    pub fn set_target(&mut self, target: Option<CliTarget>) {
        self.target = target;
    }

    /// Builds a CLI invocation bound to this context.
    #[must_use]
    pub fn command<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.cli).args(args)
    }

    /// Starts a CLI command under this context's home.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] when the CLI cannot be started.
    pub fn cli<I, S>(&self, args: I) -> Result<Session, HarnessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(self.command(args))
    }

    /// Starts an arbitrary invocation under this context's home.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] when the program cannot be started.
    pub fn run(&self, invocation: Invocation) -> Result<Session, HarnessError> {
        self.runner.run(invocation)
    }

    /// Runs an invocation to completion and requires exit code zero.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] when the command outlives the policy,
    /// or [`HarnessError::Assertion`] on a nonzero exit.
    pub async fn run_checked(&self, invocation: Invocation) -> Result<Session, HarnessError> {
        let session = self.runner.run(invocation)?;
        let code = session.wait(self.policy.timeout).await?;
        if code != 0 {
            return Err(HarnessError::Assertion(format!(
                "{} exited with code {code}; {}",
                session.command(),
                session.diagnostics()
            )));
        }
        Ok(session)
    }

    /// Logs in as `principal`, re-targets, and fetches a bearer token.
    ///
    /// # Errors
    ///
    /// Returns the failing command's error; the marker is left empty.
    pub async fn authenticate(&mut self, principal: &Principal) -> Result<(), HarnessError> {
        self.active = None;
        self.token = None;
        match self.login(principal).await {
            Ok(token) => {
                self.active = Some(principal.clone());
                self.token = Some(token);
                self.record("identity.authenticate", EventOutcome::Ok, principal.label(), None);
                Ok(())
            }
            Err(err) => {
                self.record(
                    "identity.authenticate",
                    EventOutcome::Error,
                    principal.label(),
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// Performs the CLI login sequence and returns the bearer token.
    async fn login(&self, principal: &Principal) -> Result<String, HarnessError> {
        let auth = self
            .command(["auth", principal.username()])
            .secret_arg(principal.password().expose());
        self.run_checked(auth).await?;
        if let Some(target) = &self.target {
            let mut args = vec!["target".to_string(), "-o".to_string(), target.org.clone()];
            if let Some(space) = &target.space {
                args.push("-s".to_string());
                args.push(space.clone());
            }
            self.run_checked(self.command(args)).await?;
        }
        let session = self.run_checked(self.command(["oauth-token"])).await?;
        parse_bearer_token(&session.out().contents_lossy()).ok_or_else(|| {
            HarnessError::Assertion(format!(
                "oauth-token printed no bearer token; {}",
                session.diagnostics()
            ))
        })
    }

    /// Logs the CLI out and clears the marker.
    ///
    /// # Errors
    ///
    /// Returns the logout command's error; the marker is cleared regardless.
    pub async fn logout(&mut self) -> Result<(), HarnessError> {
        let label = self.active.as_ref().map_or(NO_PRINCIPAL, Principal::label).to_string();
        self.active = None;
        self.token = None;
        let outcome = self.run_checked(self.command(["logout"])).await.map(|_| ());
        let (event_outcome, detail) = match &outcome {
            Ok(()) => (EventOutcome::Ok, None),
            Err(err) => (EventOutcome::Error, Some(err.to_string())),
        };
        self.record("identity.logout", event_outcome, &label, detail);
        outcome
    }

    /// Runs `block` as `principal`, then restores the previous principal.
    ///
    /// The restore runs when the block returns `Ok`, returns `Err`, or
    /// panics. A panic resumes after a successful restore; when the restore
    /// fails the panic is converted into the restore error so the caller
    /// sees a fatal failure instead of an ordinary panic.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::IdentityRestore`] when the restore fails, the
    /// login error when switching fails, and otherwise the block's result.
    pub async fn as_principal<T, F>(
        &mut self,
        principal: &Principal,
        block: F,
    ) -> Result<T, HarnessError>
    where
        F: AsyncFnOnce(&mut Self) -> Result<T, HarnessError>,
    {
        let previous = self.active.clone();
        if let Err(err) = self.authenticate(principal).await {
            self.restore(previous).await?;
            return Err(err);
        }
        let outcome = AssertUnwindSafe(block(self)).catch_unwind().await;
        let restored = self.restore(previous).await;
        match (outcome, restored) {
            (Ok(result), Ok(())) => result,
            (Err(panic), Ok(())) => std::panic::resume_unwind(panic),
            (
                Err(panic),
                Err(HarnessError::IdentityRestore {
                    principal,
                    detail,
                }),
            ) => Err(HarnessError::IdentityRestore {
                principal,
                detail: format!("{detail}; block panicked: {}", panic_message(panic.as_ref())),
            }),
            (_, Err(err)) => Err(err),
        }
    }

    /// Returns the CLI to `previous`, or logs out when there was none.
    async fn restore(&mut self, previous: Option<Principal>) -> Result<(), HarnessError> {
        let label = previous.as_ref().map_or(NO_PRINCIPAL, Principal::label).to_string();
        let outcome = match previous {
            Some(principal) => self.authenticate(&principal).await,
            None => self.logout().await,
        };
        match outcome {
            Ok(()) => {
                self.record("identity.restore", EventOutcome::Ok, &label, None);
                Ok(())
            }
            Err(err) => {
                let detail = err.to_string();
                self.record("identity.restore", EventOutcome::Error, &label, Some(detail.clone()));
                Err(HarnessError::IdentityRestore {
                    principal: label,
                    detail,
                })
            }
        }
    }

    /// Records an identity event.
    fn record(
        &self,
        event: &'static str,
        outcome: EventOutcome,
        label: &str,
        detail: Option<String>,
    ) {
        let mut event = HarnessEvent::new(event, outcome).with_principal(label);
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.runner.events().record(event);
    }
}

/// Extracts the `bearer ...` line printed by `oauth-token`.
fn parse_bearer_token(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| {
            line.len() > BEARER_PREFIX.len()
                && line
                    .get(..BEARER_PREFIX.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(BEARER_PREFIX))
        })
        .map(str::to_string)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
