// system-tests/tests/suites/buildpack_lifecycle.rs
// ============================================================================
// Module: Admin Buildpack Lifecycle Tests
// Description: Staging behavior of an admin buildpack across its lifecycle.
// Purpose: Verify detection, disabling, and deletion against a live platform.
// Dependencies: system-tests helpers, acceptance-harness
// ============================================================================

//! ## Overview
//! Each scenario uploads a fresh buildpack as admin, pushes an app as the
//! standard user, and watches the push output. The buildpack is deleted as
//! admin afterwards, whether or not the scenario passed.

use acceptance_harness::HarnessError;
use acceptance_harness::IdentityContext;
use acceptance_harness::Session;
use acceptance_harness::TestEnvironment;
use acceptance_harness::api::Method;
use acceptance_harness::api::QueryResponse;
use acceptance_harness::artifacts::SuiteReporter;
use acceptance_harness::artifacts::TestArtifacts;
use acceptance_harness::poll::Pattern;
use acceptance_harness::poll::SequenceDeadline;
use acceptance_harness::suite::Suite;
use futures::future::LocalBoxFuture;
use helpers::harness::BuildpackContext;
use helpers::harness::SUITE_NAME;
use helpers::harness::load_config;
use helpers::harness::skipped_artifacts;
use helpers::harness::worker_runner;
use serde_json::Value;
use serde_json::json;
use system_tests::fixtures::AppFixture;
use system_tests::fixtures::BuildpackFixture;
use system_tests::fixtures::STAGING_BANNER;

use crate::helpers;

/// Push output when no buildpack accepts the app.
const STAGING_ERROR: &str = "Staging error";

// ============================================================================
// SECTION: Hooks
// ============================================================================

/// Uploads a fresh buildpack as admin and prepares the matching app.
fn create_buildpack(ctx: &mut BuildpackContext) -> LocalBoxFuture<'_, Result<(), HarnessError>> {
    Box::pin(async move {
        let buildpack_name = ctx.env.namer().name("buildpack");
        let app_name = ctx.env.namer().name("app");
        let policy = ctx.env.config().default_policy();
        let buildpack = BuildpackFixture::create(&buildpack_name, &app_name)?;
        ctx.app = Some(AppFixture::create(&app_name)?);
        let archive =
            buildpack.archive(ctx.env.identity().runner(), policy).await?.display().to_string();
        ctx.buildpack = Some(buildpack);

        let progress = [
            Pattern::literal("Creating"),
            Pattern::literal("OK"),
            Pattern::literal("Uploading"),
            Pattern::literal("OK"),
        ];
        ctx.env
            .as_admin(async |identity: &mut IdentityContext| -> Result<(), HarnessError> {
                let session = identity.cli([
                    "create-buildpack",
                    buildpack_name.as_str(),
                    archive.as_str(),
                    "0",
                ])?;
                session.say_in_order(&progress, policy, SequenceDeadline::PerPattern).await?;
                session.exit(0, policy).await
            })
            .await
    })
}

/// Deletes the scenario's buildpack as admin and drops the fixtures.
fn remove_buildpack(ctx: &mut BuildpackContext) -> LocalBoxFuture<'_, Result<(), HarnessError>> {
    Box::pin(async move {
        ctx.app = None;
        let Some(buildpack) = ctx.buildpack.take() else {
            return Ok(());
        };
        delete_buildpack_as_admin(&mut ctx.env, buildpack.name()).await
    })
}

// ============================================================================
// SECTION: Scenarios
// ============================================================================

/// A detected buildpack stages the app.
fn buildpack_is_used_when_detected(
    ctx: &mut BuildpackContext,
) -> LocalBoxFuture<'_, Result<(), HarnessError>> {
    Box::pin(async move {
        let policy = ctx.env.config().push_policy();
        let push = push_app(ctx)?;
        push.say(STAGING_BANNER, policy).await?;
        push.exit(0, policy).await
    })
}

/// Without the matching file, detection fails and staging errors.
fn staging_fails_when_detection_fails(
    ctx: &mut BuildpackContext,
) -> LocalBoxFuture<'_, Result<(), HarnessError>> {
    Box::pin(async move {
        ctx.fixtures()?.1.remove_matching_file()?;
        expect_staging_error(ctx).await
    })
}

/// A deleted buildpack is never offered to the app.
fn staging_fails_when_buildpack_deleted(
    ctx: &mut BuildpackContext,
) -> LocalBoxFuture<'_, Result<(), HarnessError>> {
    Box::pin(async move {
        let name = ctx.fixtures()?.0.name().to_string();
        delete_buildpack_as_admin(&mut ctx.env, &name).await?;
        expect_staging_error(ctx).await
    })
}

/// A disabled buildpack is never offered to the app.
fn staging_fails_when_buildpack_disabled(
    ctx: &mut BuildpackContext,
) -> LocalBoxFuture<'_, Result<(), HarnessError>> {
    Box::pin(async move {
        let name = ctx.fixtures()?.0.name().to_string();
        let api = &ctx.api;
        ctx.env
            .as_admin(async |identity: &mut IdentityContext| -> Result<(), HarnessError> {
                let query: QueryResponse<Value> = api
                    .request(identity, Method::GET, &format!("/v2/buildpacks?q=name:{name}"), None)
                    .await?;
                let [buildpack] = query.resources.as_slice() else {
                    return Err(HarnessError::Assertion(format!(
                        "expected one buildpack named {name}, found {}",
                        query.resources.len()
                    )));
                };
                let _: Value = api
                    .request(
                        identity,
                        Method::PUT,
                        &format!("/v2/buildpacks/{}", buildpack.guid()),
                        Some(&json!({ "enabled": false })),
                    )
                    .await?;
                Ok(())
            })
            .await?;
        expect_staging_error(ctx).await
    })
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Runs `delete-buildpack <name> -f` as admin and expects exit 0.
async fn delete_buildpack_as_admin(
    env: &mut TestEnvironment,
    name: &str,
) -> Result<(), HarnessError> {
    let policy = env.config().default_policy();
    env.as_admin(async |identity: &mut IdentityContext| -> Result<(), HarnessError> {
        let session = identity.cli(["delete-buildpack", name, "-f"])?;
        session.exit(0, policy).await
    })
    .await
}

/// Pushes the scenario's app as the current principal.
fn push_app(ctx: &BuildpackContext) -> Result<Session, HarnessError> {
    let (_, app) = ctx.fixtures()?;
    let path = app.path().display().to_string();
    ctx.env.identity().cli(["push", app.name(), "-p", path.as_str()])
}

/// Pushes the app and expects staging to fail.
async fn expect_staging_error(ctx: &BuildpackContext) -> Result<(), HarnessError> {
    let push = push_app(ctx)?;
    push.say(STAGING_ERROR, ctx.env.config().push_policy()).await
}

/// Builds the scenario table.
fn suite() -> Suite<BuildpackContext> {
    Suite::new(SUITE_NAME)
        .before_each(create_buildpack)
        .after_each(remove_buildpack)
        .scenario("buildpack is used when detected", buildpack_is_used_when_detected)
        .scenario("staging fails when detection fails", staging_fails_when_detection_fails)
        .scenario("staging fails when buildpack deleted", staging_fails_when_buildpack_deleted)
        .scenario("staging fails when buildpack disabled", staging_fails_when_buildpack_disabled)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn admin_buildpack_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let Some(config) = load_config()? else {
        let mut reporter = SuiteReporter::new(skipped_artifacts()?, SUITE_NAME, 0);
        reporter.note("no acceptance config found; set BUILDPACK_ACCEPTANCE_CONFIG");
        reporter.finish("skip")?;
        return Ok(());
    };
    let artifacts = TestArtifacts::for_config(&config, SUITE_NAME)?;
    let runner = worker_runner(&config, &artifacts)?;
    let worker = config.worker;
    let mut ctx = BuildpackContext::new(config, runner)?;
    let mut reporter = SuiteReporter::new(artifacts, SUITE_NAME, worker);

    let outcome = suite().run(&mut ctx, &mut reporter).await?;

    if outcome.passed() {
        return Ok(());
    }
    let failures: Vec<String> = outcome
        .failures()
        .iter()
        .map(|report| {
            format!(
                "{}: {}",
                report.name,
                report.failure.as_deref().unwrap_or(report.status.as_str())
            )
        })
        .collect();
    Err(format!("buildpack scenarios failed: {}", failures.join("; ")).into())
}
