// system-tests/src/fixtures.rs
// ============================================================================
// Module: Buildpack Fixtures
// Description: Temporary buildpack archives and app directories.
// Purpose: Give each scenario its own disposable on-disk inputs.
// Dependencies: acceptance-harness, tempfile
// ============================================================================

//! ## Overview
//! [`BuildpackFixture`] writes a minimal buildpack whose `bin/detect` only
//! accepts apps carrying [`matching_filename`], then zips it with the system
//! `zip` tool. [`AppFixture`] is an app directory holding that file plus an
//! unrelated one. Both live in a [`TempDir`] and vanish on drop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use acceptance_harness::HarnessError;
use acceptance_harness::Invocation;
use acceptance_harness::PollPolicy;
use acceptance_harness::ProcessRunner;
use tempfile::TempDir;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Archive file name inside the buildpack directory.
pub const ARCHIVE_NAME: &str = "buildpack.zip";
/// Line printed by the fixture's compile step.
pub const STAGING_BANNER: &str = "Staging with Simple Buildpack";
/// Unrelated file shipped in every app fixture.
pub const FILLER_FILE: &str = "some-file";
/// Archiver executable.
const ZIP_PROGRAM: &str = "zip";
/// Mode for fixture scripts.
const SCRIPT_MODE: u32 = 0o755;

/// `bin/compile`: announces itself, then keeps staging busy for a while.
const COMPILE_SCRIPT: &str = r#"#!/usr/bin/env bash


echo "Staging with Simple Buildpack"

sleep 10
"#;

/// `bin/release`: a web process answering with a fixed body.
const RELEASE_SCRIPT: &str = r#"#!/usr/bin/env bash

cat <<EOF
---
config_vars:
  PATH: bin:/usr/local/bin:/usr/bin:/bin
  FROM_BUILD_PACK: "yes"
default_process_types:
  web: while true; do { echo -e 'HTTP/1.1 200 OK\r\n'; echo "hi from a simple admin buildpack"; } | nc -l \$PORT; done
EOF
"#;

/// Returns the file name the fixture buildpack detects for `app_name`.
#[must_use]
pub fn matching_filename(app_name: &str) -> String {
    format!("simple-buildpack-please-match-{app_name}")
}

/// Renders `bin/detect` for `app_name`.
fn detect_script(app_name: &str) -> String {
    format!(
        "#!/bin/bash\n\nif [ -f \"${{1}}/{}\" ]; then\n  echo Simple\nelse\n  echo no\n  exit 1\nfi\n",
        matching_filename(app_name)
    )
}

/// Writes an executable script.
fn write_script(path: &Path, body: &str) -> io::Result<()> {
    fs::write(path, body)?;
    fs::set_permissions(path, fs::Permissions::from_mode(SCRIPT_MODE))
}

// ============================================================================
// SECTION: Buildpack
// ============================================================================

/// Buildpack source tree and archive in a temporary directory.
#[derive(Debug)]
pub struct BuildpackFixture {
    /// Buildpack name registered with the platform.
    name: String,
    /// Owning temporary directory.
    dir: TempDir,
    /// Archive path; exists once [`BuildpackFixture::archive`] succeeds.
    archive: PathBuf,
}

impl BuildpackFixture {
    /// Writes `bin/compile`, `bin/detect`, and `bin/release` for `app_name`.
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary tree cannot be written.
    pub fn create(name: &str, app_name: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("matching-buildpack").tempdir()?;
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin)?;
        write_script(&bin.join("compile"), COMPILE_SCRIPT)?;
        write_script(&bin.join("detect"), &detect_script(app_name))?;
        write_script(&bin.join("release"), RELEASE_SCRIPT)?;
        let archive = dir.path().join(ARCHIVE_NAME);
        Ok(Self {
            name: name.to_string(),
            dir,
            archive,
        })
    }

    /// Returns the buildpack name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the buildpack source root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the archive path.
    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    /// Zips `bin/` into the archive and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] when `zip` is missing, or
    /// [`HarnessError::Timeout`] when it does not exit cleanly in time.
    pub async fn archive(
        &self,
        runner: &ProcessRunner,
        policy: PollPolicy,
    ) -> Result<&Path, HarnessError> {
        let invocation = Invocation::new(ZIP_PROGRAM)
            .args(["-q", "-r", ARCHIVE_NAME, "bin"])
            .current_dir(self.dir.path());
        let session = runner.run(invocation)?;
        session.exit(0, policy).await?;
        Ok(&self.archive)
    }
}

// ============================================================================
// SECTION: App
// ============================================================================

/// App directory containing the matching file and a filler file.
#[derive(Debug)]
pub struct AppFixture {
    /// App name used for `cf push`.
    name: String,
    /// Owning temporary directory.
    dir: TempDir,
}

impl AppFixture {
    /// Creates the app directory for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or files cannot be created.
    pub fn create(name: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("matching-app").tempdir()?;
        fs::write(dir.path().join(matching_filename(name)), b"")?;
        fs::write(dir.path().join(FILLER_FILE), b"")?;
        Ok(Self {
            name: name.to_string(),
            dir,
        })
    }

    /// Returns the app name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the app directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the file the buildpack detects, so detection fails.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be removed.
    pub fn remove_matching_file(&self) -> io::Result<()> {
        fs::remove_file(self.dir.path().join(matching_filename(&self.name)))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
