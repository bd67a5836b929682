// crates/acceptance-harness/src/environment.rs
// ============================================================================
// Module: Environment Lifecycle
// Description: Once-per-worker provisioning and best-effort teardown.
// Purpose: Give each worker an isolated org, space, and user on the platform.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`TestEnvironment`] moves through `Uninitialized -> Ready -> TornDown`.
//! Setup targets the API, provisions a quota, org, space, and (when none is
//! configured) a standard user, and leaves the worker logged in as that user.
//! Every resource is entered into a ledger before it is created, and teardown
//! deletes the ledger in reverse as admin.
//!
//! Invariants:
//! - Teardown runs at most once; later calls are logged no-ops.
//! - Teardown never fails; individual deletion failures are logged and
//!   reported in the [`TeardownReport`].
//! - A setup failure cleans up whatever the ledger holds before returning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::events::EventOutcome;
use crate::events::HarnessEvent;
use crate::identity::CliTarget;
use crate::identity::IdentityContext;
use crate::identity::Principal;
use crate::identity::PrincipalScope;
use crate::names::ResourceNamer;
use crate::names::random_suffix;
use crate::process::ProcessRunner;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Memory limit of the per-worker quota.
const QUOTA_MEMORY: &str = "10G";
/// Route limit of the per-worker quota.
const QUOTA_ROUTES: &str = "1000";
/// Service-instance limit of the per-worker quota.
const QUOTA_SERVICES: &str = "100";
/// Space role granted to the standard principal.
const SPACE_ROLE: &str = "SpaceDeveloper";
/// Length of generated user passwords.
const GENERATED_PASSWORD_LEN: usize = 24;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Lifecycle state of a worker environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    /// Nothing provisioned yet.
    Uninitialized,
    /// Provisioned and logged in as the standard principal.
    Ready,
    /// Cleaned up; terminal.
    TornDown,
}

impl EnvironmentState {
    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::TornDown => "torn_down",
        }
    }
}

/// Kind of platform resource in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Quota definition.
    Quota,
    /// Organization.
    Org,
    /// Space within an organization.
    Space,
    /// User account.
    User,
}

/// Ledger entry for a platform resource created by setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedResource {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
    /// Owning org, for spaces.
    pub parent: Option<String>,
}

impl CreatedResource {
    /// Returns the CLI arguments that delete this resource.
    #[must_use]
    pub fn delete_args(&self) -> Vec<String> {
        let mut args = match self.kind {
            ResourceKind::Quota => vec!["delete-quota".to_string(), self.name.clone()],
            ResourceKind::Org => vec!["delete-org".to_string(), self.name.clone()],
            ResourceKind::Space => vec!["delete-space".to_string(), self.name.clone()],
            ResourceKind::User => vec!["delete-user".to_string(), self.name.clone()],
        };
        if let Some(parent) = &self.parent {
            args.push("-o".to_string());
            args.push(parent.clone());
        }
        args.push("-f".to_string());
        args
    }
}

/// One failed deletion during teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownFailure {
    /// Resource that could not be removed.
    pub resource: CreatedResource,
    /// Failure text.
    pub detail: String,
}

/// Outcome of a teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Resources removed, in deletion order.
    pub removed: Vec<CreatedResource>,
    /// Resources that could not be removed.
    pub failed: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Returns true when every ledger entry was removed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// SECTION: Environment
// ============================================================================

/// Per-worker platform environment.
pub struct TestEnvironment {
    /// Run configuration.
    config: HarnessConfig,
    /// Worker CLI session.
    identity: IdentityContext,
    /// Administrative principal.
    admin: Principal,
    /// Standard principal; known after setup.
    user: Option<Principal>,
    /// Resource-name generator.
    namer: ResourceNamer,
    /// Provisioned org name.
    org: Option<String>,
    /// Provisioned space name.
    space: Option<String>,
    /// Resources entered by setup, in creation order.
    ledger: Vec<CreatedResource>,
    /// Lifecycle state.
    state: EnvironmentState,
}

impl TestEnvironment {
    /// Creates an uninitialized environment with its private CLI home.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when the CLI home cannot be created.
    pub fn new(config: HarnessConfig, runner: ProcessRunner) -> Result<Self, HarnessError> {
        let identity =
            IdentityContext::new(config.cli_path.clone(), runner, config.default_policy())?;
        let admin = config.admin_principal();
        let namer = ResourceNamer::new(config.name_prefix.clone(), config.worker);
        Ok(Self {
            config,
            identity,
            admin,
            user: None,
            namer,
            org: None,
            space: None,
            ledger: Vec::new(),
            state: EnvironmentState::Uninitialized,
        })
    }

    /// Returns the run configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EnvironmentState {
        self.state
    }

    /// Returns the worker CLI session.
    #[must_use]
    pub const fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    /// Returns the worker CLI session mutably.
    pub fn identity_mut(&mut self) -> &mut IdentityContext {
        &mut self.identity
    }

    /// Returns the administrative principal.
    #[must_use]
    pub const fn admin(&self) -> &Principal {
        &self.admin
    }

    /// Returns the standard principal once setup has chosen one.
    #[must_use]
    pub const fn user(&self) -> Option<&Principal> {
        self.user.as_ref()
    }

    /// Returns the provisioned org name.
    #[must_use]
    pub fn org_name(&self) -> Option<&str> {
        self.org.as_deref()
    }

    /// Returns the provisioned space name.
    #[must_use]
    pub fn space_name(&self) -> Option<&str> {
        self.space.as_deref()
    }

    /// Returns the resource namer for this worker.
    #[must_use]
    pub const fn namer(&self) -> &ResourceNamer {
        &self.namer
    }

    /// Returns the ledger in creation order.
    #[must_use]
    pub fn created_resources(&self) -> &[CreatedResource] {
        &self.ledger
    }

    /// Runs `block` as the administrative principal.
    ///
    /// # Errors
    ///
    /// See [`IdentityContext::as_principal`].
    pub async fn as_admin<T, F>(&mut self, block: F) -> Result<T, HarnessError>
    where
        F: AsyncFnOnce(&mut IdentityContext) -> Result<T, HarnessError>,
    {
        self.identity.as_principal(&self.admin, block).await
    }

    /// Provisions the worker environment.
    ///
    /// A second call is a logged no-op. On failure the partial ledger is torn
    /// down before returning.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Setup`] describing the failing step.
    pub async fn setup(&mut self) -> Result<(), HarnessError> {
        if self.state != EnvironmentState::Uninitialized {
            self.record("environment.setup", EventOutcome::Info, "already initialized");
            return Ok(());
        }
        match self.provision().await {
            Ok(()) => {
                self.state = EnvironmentState::Ready;
                self.record("environment.setup", EventOutcome::Ok, "ready");
                Ok(())
            }
            Err(err) => {
                let detail = err.to_string();
                self.record("environment.setup", EventOutcome::Error, &detail);
                self.state = EnvironmentState::TornDown;
                let _ = self.remove_ledger().await;
                Err(HarnessError::Setup(detail))
            }
        }
    }

    /// Runs the provisioning steps in order.
    async fn provision(&mut self) -> Result<(), HarnessError> {
        let mut api = vec!["api".to_string(), self.config.api.trim().to_string()];
        if self.config.skip_ssl_validation {
            api.push("--skip-ssl-validation".to_string());
        }
        self.identity.run_checked(self.identity.command(api)).await?;
        self.identity.authenticate(&self.admin).await?;

        let quota = self.namer.name("quota");
        self.enter(ResourceKind::Quota, &quota, None);
        self.cli_checked([
            "create-quota",
            &quota,
            "-m",
            QUOTA_MEMORY,
            "-r",
            QUOTA_ROUTES,
            "-s",
            QUOTA_SERVICES,
        ])
        .await?;

        let org = self.namer.name("org");
        self.enter(ResourceKind::Org, &org, None);
        self.cli_checked(["create-org", &org]).await?;
        self.org = Some(org.clone());
        self.cli_checked(["set-quota", &org, &quota]).await?;

        let space = self.namer.name("space");
        self.enter(ResourceKind::Space, &space, Some(&org));
        self.cli_checked(["create-space", &space, "-o", &org]).await?;
        self.space = Some(space.clone());

        let user = match self.config.user_principal() {
            Some(user) => user,
            None => self.create_user().await?,
        };
        self.cli_checked(["set-space-role", user.username(), &org, &space, SPACE_ROLE]).await?;

        self.identity.set_target(Some(CliTarget {
            org,
            space: Some(space),
        }));
        self.identity.authenticate(&user).await?;
        self.user = Some(user);
        Ok(())
    }

    /// Creates a disposable standard user.
    async fn create_user(&mut self) -> Result<Principal, HarnessError> {
        let username = self.namer.name("user");
        let password = random_suffix(GENERATED_PASSWORD_LEN);
        self.enter(ResourceKind::User, &username, None);
        let create = self.identity.command(["create-user", username.as_str()]).secret_arg(&password);
        self.identity.run_checked(create).await?;
        Ok(Principal::new("user", &username, &password, PrincipalScope::Standard))
    }

    /// Runs a CLI command that must exit zero.
    async fn cli_checked<const N: usize>(&self, args: [&str; N]) -> Result<(), HarnessError> {
        self.identity.run_checked(self.identity.command(args)).await.map(|_| ())
    }

    /// Enters a resource into the ledger before it is created.
    fn enter(&mut self, kind: ResourceKind, name: &str, parent: Option<&str>) {
        self.ledger.push(CreatedResource {
            kind,
            name: name.to_string(),
            parent: parent.map(str::to_string),
        });
    }

    /// Removes every provisioned resource, best-effort.
    ///
    /// Runs once; later calls and calls before setup are logged no-ops that
    /// return an empty report. A setup that was cancelled part way leaves
    /// ledger entries behind, and those are removed here.
    pub async fn teardown(&mut self) -> TeardownReport {
        match self.state {
            EnvironmentState::Ready => {
                self.state = EnvironmentState::TornDown;
                self.remove_ledger().await
            }
            EnvironmentState::Uninitialized if !self.ledger.is_empty() => {
                self.state = EnvironmentState::TornDown;
                self.record("environment.teardown", EventOutcome::Info, "setup was cancelled");
                self.remove_ledger().await
            }
            EnvironmentState::Uninitialized => {
                self.state = EnvironmentState::TornDown;
                self.record("environment.teardown", EventOutcome::Info, "never set up");
                TeardownReport::default()
            }
            EnvironmentState::TornDown => {
                self.record("environment.teardown", EventOutcome::Info, "already torn down");
                TeardownReport::default()
            }
        }
    }

    /// Deletes ledger entries in reverse creation order as admin.
    async fn remove_ledger(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        self.identity.set_target(None);
        if let Err(err) = self.identity.authenticate(&self.admin).await {
            self.record("environment.teardown", EventOutcome::Error, &err.to_string());
        }
        for resource in self.ledger.iter().rev() {
            let delete = self.identity.command(resource.delete_args());
            match self.identity.run_checked(delete).await {
                Ok(_) => report.removed.push(resource.clone()),
                Err(err) => {
                    let detail = err.to_string();
                    self.identity.runner().events().record(
                        HarnessEvent::new("environment.delete", EventOutcome::Error)
                            .with_command(resource.delete_args().join(" "))
                            .with_detail(detail.clone()),
                    );
                    report.failed.push(TeardownFailure {
                        resource: resource.clone(),
                        detail,
                    });
                }
            }
        }
        if let Err(err) = self.identity.logout().await {
            self.record("environment.teardown", EventOutcome::Error, &err.to_string());
        }
        let outcome = if report.is_clean() { EventOutcome::Ok } else { EventOutcome::Error };
        self.record(
            "environment.teardown",
            outcome,
            &format!("removed {} of {} resources", report.removed.len(), self.ledger.len()),
        );
        report
    }

    /// Records a lifecycle event.
    fn record(&self, event: &'static str, outcome: EventOutcome, detail: &str) {
        self.identity
            .runner()
            .events()
            .record(HarnessEvent::new(event, outcome).with_detail(detail));
    }
}

impl AsMut<Self> for TestEnvironment {
    fn as_mut(&mut self) -> &mut Self {
        self
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        if self.state == EnvironmentState::Ready {
            let names: Vec<&str> = self.ledger.iter().map(|entry| entry.name.as_str()).collect();
            self.record(
                "environment.leak",
                EventOutcome::Error,
                &format!("dropped without teardown: {}", names.join(", ")),
            );
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
