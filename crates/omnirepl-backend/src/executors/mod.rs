//! Execute capabilities plugged into the generic backend.
//!
//! An [`Executor`] runs one snippet for one session. It never talks to the
//! registry itself: the backend hands it the session's last snapshot and stores
//! whatever snapshot it returns.

use async_trait::async_trait;
use omnirepl_types::{Language, StreamEvent};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, Result};

pub mod kite;
pub mod process;

pub use kite::KiteExecutor;
pub use process::{ProcessExecutor, ProcessMode, ProcessProfile};

/// One execution request as seen by an executor.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub session_id: String,
    pub code: String,
    /// Snapshot produced by the previous run, if any.
    pub environment: Option<String>,
    pub timeout: Duration,
}

/// A failure of the guest code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestError {
    pub message: String,
    /// Error class such as `ZeroDivisionError` or `ExitStatus`.
    pub kind: Option<String>,
    pub timed_out: bool,
    /// The message only stands in for missing error output; anything the guest
    /// wrote to its error stream replaces it.
    pub synthesized: bool,
}

impl GuestError {
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind.into()),
            timed_out: false,
            synthesized: false,
        }
    }

    pub fn exit_status(code: i32) -> Self {
        Self {
            message: format!("Command exited with code {}", code),
            kind: Some("ExitStatus".to_string()),
            timed_out: false,
            synthesized: true,
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self {
            message: format!("Command execution timed out after {} seconds", timeout.as_secs()),
            kind: Some("TimeoutError".to_string()),
            timed_out: true,
            synthesized: false,
        }
    }
}

/// What an executor hands back after a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub failure: Option<GuestError>,
    /// New snapshot to store; `None` leaves the stored one untouched.
    pub state: Option<String>,
    /// Output written before the failure is withheld from buffered responses.
    pub discard_output: bool,
}

/// How the streaming executor should collect output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingStyle {
    /// Poll shared buffers on a fixed cadence.
    Polled,
    /// Forward each line as soon as it is read.
    Lines,
}

/// Where an executor writes guest output.
pub trait OutputSink: Send + Sync {
    fn stdout(&self, text: &str);
    fn stderr(&self, text: &str);
}

/// Buffers both streams; drained by buffered responses and the polling loop.
#[derive(Debug, Default)]
pub struct Accumulator {
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything written so far.
    pub fn drain(&self) -> (String, String) {
        (take(&self.stdout), take(&self.stderr))
    }

    /// Pending output as stream events, stdout first.
    pub fn drain_events(&self) -> Vec<StreamEvent> {
        let (stdout, stderr) = self.drain();
        let mut events = Vec::new();
        if !stdout.is_empty() {
            events.push(StreamEvent::output(stdout));
        }
        if !stderr.is_empty() {
            events.push(StreamEvent::error(stderr));
        }
        events
    }
}

fn take(buffer: &Mutex<String>) -> String {
    match buffer.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

fn append(buffer: &Mutex<String>, text: &str) {
    match buffer.lock() {
        Ok(mut guard) => guard.push_str(text),
        Err(poisoned) => poisoned.into_inner().push_str(text),
    }
}

impl OutputSink for Accumulator {
    fn stdout(&self, text: &str) {
        append(&self.stdout, text);
    }

    fn stderr(&self, text: &str) {
        append(&self.stderr, text);
    }
}

/// Sends every write straight to a stream.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { sender }
    }
}

impl OutputSink for ChannelSink {
    fn stdout(&self, text: &str) {
        // A closed receiver means the client went away; the run is being cancelled.
        let _ = self.sender.send(StreamEvent::output(text));
    }

    fn stderr(&self, text: &str) {
        let _ = self.sender.send(StreamEvent::error(text));
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn language(&self) -> &Language;

    /// Whether session state travels through the registry's environment slot.
    fn persists_environment(&self) -> bool;

    fn streaming_style(&self) -> StreamingStyle;

    /// Run `invocation.code`. Guest failures are reported in the `RunReport`;
    /// `Err` means the run could not be set up or its state could not be read.
    async fn run(
        &self,
        invocation: Invocation,
        sink: Arc<dyn OutputSink>,
        cancel: CancellationToken,
    ) -> Result<RunReport>;

    /// Drop any state held outside the registry.
    async fn reset(&self, session_id: &str) -> Result<()>;
}

/// Pick the executor for `language`, keeping subprocess working directories
/// under `session_root`.
pub fn executor_for(language: &Language, session_root: &Path) -> Result<Arc<dyn Executor>> {
    if language == "kite" {
        return Ok(Arc::new(KiteExecutor::new()));
    }
    match ProcessProfile::for_language(language) {
        Some(profile) => Ok(Arc::new(ProcessExecutor::new(profile, session_root))),
        None => Err(BackendError::validation(format!(
            "No executor available for language '{}'",
            language
        ))),
    }
}
