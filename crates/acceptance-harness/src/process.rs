// crates/acceptance-harness/src/process.rs
// ============================================================================
// Module: Process Runner
// Description: Spawns external commands with incrementally captured output.
// Purpose: Expose live, non-destructive reads of stdout/stderr and exit codes.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`ProcessRunner::run`] spawns an [`Invocation`] and returns a [`Session`]
//! immediately. Background tasks drain stdout and stderr into append-only
//! [`OutputBuffer`]s; a third task waits for exit, lets the drains finish, and
//! then publishes the exit code exactly once.
//!
//! Invariants:
//! - The exit code is unset until the process has terminated and both
//!   channels are drained; afterwards the buffers are frozen.
//! - Buffer locks are short-lived and never held across an await, so readers
//!   never stall the drains and the process can always keep writing.
//! - Each buffer owns one read cursor. Every `say` on that channel resumes
//!   after the previous match, whichever call site issued it.
//! - Spawn failures surface as [`HarnessError::Spawn`] and are never retried.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::HarnessError;
use crate::events::EventOutcome;
use crate::events::EventRecorder;
use crate::events::HarnessEvent;
use crate::events::duration_millis;
use crate::poll::Pattern;
use crate::poll::PollPolicy;
use crate::poll::SequenceDeadline;
use crate::poll::poll_until;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Exit code reported when the process was terminated by a signal.
pub const SIGNALED_EXIT_CODE: i32 = -1;
/// Read size for pipe drains.
const READ_CHUNK_BYTES: usize = 8 * 1024;
/// Upper bound on waiting for pipes to close after the process exits.
const DRAIN_GRACE: Duration = Duration::from_secs(5);
/// Maximum unread output echoed into a failure message.
const MAX_DIAGNOSTIC_BYTES: usize = 8 * 1024;
/// Placeholder rendered in place of secret arguments.
const REDACTED: &str = "[REDACTED]";

// ============================================================================
// SECTION: Invocation
// ============================================================================

/// Immutable description of a command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable path or name resolved through `PATH`.
    program: PathBuf,
    /// Ordered argument vector.
    args: Vec<String>,
    /// Indices into `args` that must never be logged.
    secret_args: Vec<usize>,
    /// Working directory override.
    working_dir: Option<PathBuf>,
    /// Environment overrides layered over the inherited environment.
    env: BTreeMap<String, String>,
}

impl Invocation {
    /// Starts an invocation for `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret_args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends an argument that is redacted from every rendering.
    #[must_use]
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Returns the program.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns the argument vector, secrets included.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Returns the working directory override.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Returns the environment overrides.
    #[must_use]
    pub const fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Renders the command line with secret arguments redacted.
    #[must_use]
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for (index, arg) in self.args.iter().enumerate() {
            rendered.push(' ');
            if self.secret_args.contains(&index) {
                rendered.push_str(REDACTED);
            } else {
                rendered.push_str(arg);
            }
        }
        rendered
    }
}

// ============================================================================
// SECTION: Output Buffers
// ============================================================================

/// Output channel of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Channel {
    /// Returns a stable label for the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Mutable state behind an [`OutputBuffer`].
#[derive(Debug, Default)]
struct BufferState {
    /// Bytes received so far.
    bytes: Vec<u8>,
    /// Offset just past the last successful match.
    cursor: usize,
    /// Set once the producing pipe is drained; no appends afterwards.
    closed: bool,
}

/// Append-only byte stream with a single match cursor.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    /// Shared state; cloning a buffer shares it.
    state: Arc<Mutex<BufferState>>,
}

impl OutputBuffer {
    /// Creates an empty, open buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with the state locked, recovering from poisoning.
    fn with_state<R>(&self, f: impl FnOnce(&mut BufferState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Appends bytes; returns false when the buffer is already closed.
    pub(crate) fn append(&self, chunk: &[u8]) -> bool {
        self.with_state(|state| {
            if state.closed {
                return false;
            }
            state.bytes.extend_from_slice(chunk);
            true
        })
    }

    /// Freezes the buffer.
    pub(crate) fn close(&self) {
        self.with_state(|state| state.closed = true);
    }

    /// Returns true once the producer has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.with_state(|state| state.closed)
    }

    /// Returns the number of bytes received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_state(|state| state.bytes.len())
    }

    /// Returns true when nothing has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current cursor offset.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.with_state(|state| state.cursor)
    }

    /// Returns every byte received so far without moving the cursor.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.with_state(|state| state.bytes.clone())
    }

    /// Returns the contents as lossy UTF-8.
    #[must_use]
    pub fn contents_lossy(&self) -> String {
        self.with_state(|state| String::from_utf8_lossy(&state.bytes).into_owned())
    }

    /// Returns the bytes after the cursor as lossy UTF-8.
    #[must_use]
    pub fn unread_lossy(&self) -> String {
        self.with_state(|state| String::from_utf8_lossy(&state.bytes[state.cursor ..]).into_owned())
    }

    /// Searches past the cursor; on a match, advances the cursor past it.
    ///
    /// Returns the absolute byte range of the match.
    pub fn try_say(&self, pattern: &Pattern) -> Option<Range<usize>> {
        self.with_state(|state| {
            let base = state.cursor;
            let found = pattern.find(&state.bytes[base ..])?;
            let absolute = (base + found.start) .. (base + found.end);
            state.cursor = absolute.end;
            Some(absolute)
        })
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Handle to a spawned process.
pub struct Session {
    /// Redacted command line.
    command: String,
    /// OS process id when available.
    pid: Option<u32>,
    /// Captured standard output.
    stdout: OutputBuffer,
    /// Captured standard error.
    stderr: OutputBuffer,
    /// Exit code, published once.
    exit: watch::Receiver<Option<i32>>,
    /// Kill trigger; taken on first use.
    kill: Mutex<Option<oneshot::Sender<()>>>,
    /// Spawn instant.
    started_at: Instant,
}

impl Session {
    /// Returns the redacted command line.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the OS process id.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the stdout buffer.
    #[must_use]
    pub const fn out(&self) -> &OutputBuffer {
        &self.stdout
    }

    /// Returns the stderr buffer.
    #[must_use]
    pub const fn err(&self) -> &OutputBuffer {
        &self.stderr
    }

    /// Returns the buffer for a channel.
    #[must_use]
    pub const fn buffer(&self, channel: Channel) -> &OutputBuffer {
        match channel {
            Channel::Stdout => &self.stdout,
            Channel::Stderr => &self.stderr,
        }
    }

    /// Returns the exit code once the process has terminated and drained.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    /// Returns true once the exit code is published.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Returns time since spawn.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Kills the process. Has no effect once it has exited.
    pub fn terminate(&self) {
        let sender = self.kill.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Waits for the exit code, bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] when the process is still running.
    pub async fn wait(&self, limit: Duration) -> Result<i32, HarnessError> {
        let mut exit = self.exit.clone();
        let waited = tokio::time::timeout(limit, exit.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(code)) => Ok((*code).unwrap_or(SIGNALED_EXIT_CODE)),
            Ok(Err(_)) => Err(HarnessError::Assertion(format!(
                "exit watcher for {} dropped before publishing",
                self.command
            ))),
            Err(_) => Err(HarnessError::Timeout {
                description: format!("{} to exit", self.command),
                elapsed_ms: duration_millis(limit),
                attempts: 1,
                detail: self.diagnostics(),
            }),
        }
    }

    /// Eventually sees `pattern` on stdout.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] with the unread output when the
    /// pattern does not appear in time.
    pub async fn say(
        &self,
        pattern: impl Into<Pattern>,
        policy: PollPolicy,
    ) -> Result<(), HarnessError> {
        self.say_on(Channel::Stdout, &pattern.into(), policy).await
    }

    /// Eventually sees `pattern` on stderr.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] when the pattern does not appear.
    pub async fn say_err(
        &self,
        pattern: impl Into<Pattern>,
        policy: PollPolicy,
    ) -> Result<(), HarnessError> {
        self.say_on(Channel::Stderr, &pattern.into(), policy).await
    }

    /// Eventually sees each pattern on stdout, in order.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] naming the first unmet pattern.
    pub async fn say_in_order(
        &self,
        patterns: &[Pattern],
        policy: PollPolicy,
        deadline: SequenceDeadline,
    ) -> Result<(), HarnessError> {
        let start = Instant::now();
        for pattern in patterns {
            let step = match deadline {
                SequenceDeadline::PerPattern => policy,
                SequenceDeadline::Shared => {
                    PollPolicy::new(policy.timeout.saturating_sub(start.elapsed()), policy.interval)
                }
            };
            self.say_on(Channel::Stdout, pattern, step).await?;
        }
        Ok(())
    }

    /// Eventually sees `pattern` on the given channel.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] when the pattern does not appear.
    pub async fn say_on(
        &self,
        channel: Channel,
        pattern: &Pattern,
        policy: PollPolicy,
    ) -> Result<(), HarnessError> {
        let buffer = self.buffer(channel);
        let description =
            format!("{} to say {} on {}", self.command, pattern.describe(), channel.as_str());
        poll_until(policy, &description, || {
            let outcome = match buffer.try_say(pattern) {
                Some(_) => Ok(()),
                None => Err(self.unmet_detail(channel, pattern)),
            };
            std::future::ready(outcome)
        })
        .await
    }

    /// Eventually exits with `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] when the process has not exited with
    /// the expected code by the deadline.
    pub async fn exit(&self, expected: i32, policy: PollPolicy) -> Result<(), HarnessError> {
        let description = format!("{} to exit with code {expected}", self.command);
        poll_until(policy, &description, || {
            let outcome = match self.exit_code() {
                Some(code) if code == expected => Ok(()),
                Some(code) => Err(format!("exited with code {code}; {}", self.diagnostics())),
                None => Err(format!("still running; {}", self.diagnostics())),
            };
            std::future::ready(outcome)
        })
        .await
    }

    /// Renders both channels and the exit state for failure messages.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        format!(
            "exit code {}; stdout \"{}\"; stderr \"{}\"",
            self.exit_label(),
            tail(&self.stdout.contents_lossy()),
            tail(&self.stderr.contents_lossy()),
        )
    }

    /// Describes an unmet pattern with the unread output so far.
    fn unmet_detail(&self, channel: Channel, pattern: &Pattern) -> String {
        let buffer = self.buffer(channel);
        format!(
            "pattern {} not found in unread {} \"{}\" (cursor {} of {} bytes); exit code {}",
            pattern.describe(),
            channel.as_str(),
            tail(&buffer.unread_lossy()),
            buffer.cursor(),
            buffer.len(),
            self.exit_label(),
        )
    }

    /// Returns the exit code as text, or `running`.
    fn exit_label(&self) -> String {
        self.exit_code().map_or_else(|| "running".to_string(), |code| code.to_string())
    }
}

/// Returns at most the last [`MAX_DIAGNOSTIC_BYTES`] of `text`.
fn tail(text: &str) -> &str {
    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text;
    }
    let mut start = text.len() - MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start ..]
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Spawns invocations with worker-level environment overrides.
#[derive(Clone)]
pub struct ProcessRunner {
    /// Overrides applied beneath each invocation's own overrides.
    base_env: BTreeMap<String, String>,
    /// Event recorder for spawn and exit records.
    events: EventRecorder,
}

impl ProcessRunner {
    /// Creates a runner with no base overrides.
    #[must_use]
    pub fn new(events: EventRecorder) -> Self {
        Self {
            base_env: BTreeMap::new(),
            events,
        }
    }

    /// Returns a copy of this runner with an additional base override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_env.insert(key.into(), value.into());
        self
    }

    /// Returns the base overrides.
    #[must_use]
    pub const fn base_env(&self) -> &BTreeMap<String, String> {
        &self.base_env
    }

    /// Returns the event recorder.
    #[must_use]
    pub const fn events(&self) -> &EventRecorder {
        &self.events
    }

    /// Spawns the invocation and returns its live session.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] when the process cannot be started.
    pub fn run(&self, invocation: Invocation) -> Result<Session, HarnessError> {
        let display = invocation.display();
        let mut command = Command::new(invocation.program());
        command.args(invocation.arguments());
        command.envs(&self.base_env);
        command.envs(invocation.env_overrides());
        if let Some(dir) = invocation.working_dir() {
            command.current_dir(dir);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.events.record(
                    HarnessEvent::new("process.spawn", EventOutcome::Error)
                        .with_command(display.clone())
                        .with_detail(err.to_string()),
                );
                return Err(HarnessError::Spawn {
                    program: invocation.program().display().to_string(),
                    detail: err.to_string(),
                });
            }
        };
        let pid = child.id();
        self.events.record(
            HarnessEvent::new("process.spawn", EventOutcome::Ok).with_command(display.clone()),
        );

        let stdout = OutputBuffer::new();
        let stderr = OutputBuffer::new();
        let stdout_drain = child.stdout.take().map(|pipe| spawn_drain(pipe, stdout.clone()));
        let stderr_drain = child.stderr.take().map(|pipe| spawn_drain(pipe, stderr.clone()));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        let events = self.events.clone();
        let exit_stdout = stdout.clone();
        let exit_stderr = stderr.clone();
        let exit_display = display.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = &mut kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            finish_drain(stdout_drain).await;
            finish_drain(stderr_drain).await;
            exit_stdout.close();
            exit_stderr.close();
            let (code, outcome, detail) = match status {
                Ok(status) => (
                    status.code().unwrap_or(SIGNALED_EXIT_CODE),
                    EventOutcome::Ok,
                    status.to_string(),
                ),
                Err(err) => (SIGNALED_EXIT_CODE, EventOutcome::Error, err.to_string()),
            };
            events.record(
                HarnessEvent::new("process.exit", outcome)
                    .with_command(exit_display)
                    .with_detail(detail),
            );
            let _ = exit_tx.send(Some(code));
        });

        Ok(Session {
            command: display,
            pid,
            stdout,
            stderr,
            exit: exit_rx,
            kill: Mutex::new(Some(kill_tx)),
            started_at: Instant::now(),
        })
    }
}

/// Drains a pipe into a buffer until EOF or a read error.
fn spawn_drain<R>(mut pipe: R, buffer: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    if !buffer.append(&chunk[.. read]) {
                        break;
                    }
                }
            }
        }
    })
}

/// Waits for a drain to finish, bounded by [`DRAIN_GRACE`].
///
/// A grandchild holding the pipe open would otherwise keep the exit code
/// unpublished forever.
async fn finish_drain(drain: Option<JoinHandle<()>>) {
    if let Some(mut drain) = drain
        && tokio::time::timeout(DRAIN_GRACE, &mut drain).await.is_err()
    {
        drain.abort();
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
