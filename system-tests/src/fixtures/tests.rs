// system-tests/src/fixtures/tests.rs
// ============================================================================
// Module: Buildpack Fixture Tests
// Description: On-disk layout and detect behavior of the fixtures.
// Purpose: Catch fixture regressions without a live platform.
// Dependencies: acceptance-harness, tokio
// ============================================================================

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Test-only assertions favor direct unwrap/expect for clarity."
)]

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use acceptance_harness::Invocation;
use acceptance_harness::PollPolicy;
use acceptance_harness::ProcessRunner;
use acceptance_harness::events::EventRecorder;

use super::AppFixture;
use super::BuildpackFixture;
use super::FILLER_FILE;
use super::matching_filename;

fn policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(10), Duration::from_millis(5))
}

#[test]
fn buildpack_scripts_are_executable() {
    let fixture = BuildpackFixture::create("bp", "my-app").expect("fixture");

    for script in ["compile", "detect", "release"] {
        let path = fixture.root().join("bin").join(script);
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "{script} is not executable");
    }
    let detect = std::fs::read_to_string(fixture.root().join("bin/detect")).unwrap();
    assert!(detect.contains("simple-buildpack-please-match-my-app"));
    assert!(fixture.archive_path().ends_with("buildpack.zip"));
    assert_eq!(fixture.name(), "bp");
}

#[test]
fn app_fixture_holds_matching_and_filler_files() {
    let app = AppFixture::create("my-app").expect("app");

    assert!(app.path().join(matching_filename("my-app")).exists());
    assert!(app.path().join(FILLER_FILE).exists());

    app.remove_matching_file().expect("remove");
    assert!(!app.path().join(matching_filename("my-app")).exists());
    assert!(app.path().join(FILLER_FILE).exists());
    assert!(app.remove_matching_file().is_err());
}

#[tokio::test]
async fn detect_accepts_only_the_matching_app() {
    let fixture = BuildpackFixture::create("bp", "my-app").expect("fixture");
    let app = AppFixture::create("my-app").expect("app");
    let runner = ProcessRunner::new(EventRecorder::noop());
    let detect = fixture.root().join("bin/detect");
    let run_detect = || {
        Invocation::new("sh")
            .arg(detect.display().to_string())
            .arg(app.path().display().to_string())
    };

    let matched = runner.run(run_detect()).expect("spawn");
    matched.say("Simple", policy()).await.expect("detected");
    matched.exit(0, policy()).await.expect("exit");

    app.remove_matching_file().expect("remove");
    let missed = runner.run(run_detect()).expect("spawn");
    missed.say("no", policy()).await.expect("not detected");
    missed.exit(1, policy()).await.expect("exit");
}
