//! Subprocess executors.
//!
//! Every session gets a working directory under the backend's session root.
//! Shell-mode languages run only the new code and carry exported variables
//! forward; transcript-mode languages re-run every previously successful
//! submission followed by the new one.

use async_trait::async_trait;
use omnirepl_types::Language;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Executor, GuestError, Invocation, OutputSink, RunReport, StreamingStyle};
use crate::error::{BackendError, Result};

/// Per-session bookkeeping directory inside the working directory.
const STATE_DIR: &str = ".omnirepl";
const TRANSCRIPT_FILE: &str = "transcript";
const ENV_FILE: &str = "env";
const STATE_ENV_VAR: &str = "OMNIREPL_STATE";
const MAX_SESSION_ID_LEN: usize = 128;
/// How long to wait for the error stream after the process exited.
const STDERR_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessMode {
    /// `program -c <code>` with exported variables restored and captured.
    Shell,
    /// `program <script>` where the script is prelude + transcript + code.
    Transcript { extension: String, prelude: String },
}

/// How to run one language as a subprocess.
#[derive(Debug, Clone)]
pub struct ProcessProfile {
    pub language: Language,
    pub program: String,
    pub args: Vec<String>,
    pub mode: ProcessMode,
    /// Statement printing `{marker}` on both streams, run between the
    /// transcript and the new code.
    pub boundary: String,
}

impl ProcessProfile {
    pub fn shell(language: Language, program: impl Into<String>) -> Self {
        Self {
            language,
            program: program.into(),
            args: Vec::new(),
            mode: ProcessMode::Shell,
            boundary: String::new(),
        }
    }

    pub fn transcript(
        language: Language,
        program: impl Into<String>,
        extension: impl Into<String>,
        prelude: impl Into<String>,
        boundary: impl Into<String>,
    ) -> Self {
        Self {
            language,
            program: program.into(),
            args: Vec::new(),
            mode: ProcessMode::Transcript {
                extension: extension.into(),
                prelude: prelude.into(),
            },
            boundary: boundary.into(),
        }
    }

    /// Profiles for the subprocess languages shipped with the backend.
    pub fn for_language(language: &Language) -> Option<Self> {
        let profile = match language.as_str() {
            "bash" => Self::shell(language.clone(), "bash"),
            "perl" => Self::transcript(
                language.clone(),
                "perl",
                ".pl",
                "use strict;\nuse warnings;\n",
                "$| = 1; print STDOUT \"{marker}\\n\"; print STDERR \"{marker}\\n\";",
            ),
            "python" => Self::transcript(
                language.clone(),
                "python3",
                ".py",
                "import sys\n",
                "print(\"{marker}\", flush=True); print(\"{marker}\", file=sys.stderr, flush=True)",
            ),
            "ruby" => Self::transcript(
                language.clone(),
                "ruby",
                ".rb",
                "",
                "$stdout.puts \"{marker}\"; $stdout.flush; $stderr.puts \"{marker}\"",
            ),
            "php" => Self::transcript(
                language.clone(),
                "php",
                ".php",
                "<?php\n",
                "echo \"{marker}\\n\"; fwrite(STDERR, \"{marker}\\n\");",
            ),
            "node" => Self::transcript(
                language.clone(),
                "node",
                ".js",
                "",
                "console.log(\"{marker}\"); console.error(\"{marker}\");",
            ),
            _ => return None,
        };
        Some(profile)
    }

    fn boundary_statement(&self, marker: &str) -> String {
        self.boundary.replace("{marker}", marker)
    }
}

/// Wrap shell code so exported variables survive into the next run.
fn shell_script(code: &str) -> String {
    format!(
        concat!(
            "if [ -f \"${var}/{env}\" ]; then . \"${var}/{env}\"; fi\n",
            "trap 'export -p | grep -Ev \"^declare -x ({var}|OLDPWD|PWD|SHLVL|_)(=|$)\" > \"${var}/{env}\"' EXIT\n",
            "{code}\n"
        ),
        var = STATE_ENV_VAR,
        env = ENV_FILE,
        code = code
    )
}

fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BackendError::validation(format!(
            "Invalid session id '{}'",
            session_id
        )))
    }
}

/// Forward `reader` line by line. Lines up to and including `marker` are held
/// back, and released only if the marker never shows up.
async fn pump<R, F>(reader: R, marker: Option<String>, mut emit: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut waiting = marker;
    let mut held = String::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        match &waiting {
            Some(marker) if line.trim_end().ends_with(marker.as_str()) => {
                waiting = None;
                held.clear();
            }
            Some(_) => held.push_str(&line),
            None => emit(&line),
        }
    }

    if waiting.is_some() && !held.is_empty() {
        emit(&held);
    }
    Ok(())
}

async fn read_transcript(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(transcript) => Ok(transcript),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

enum Outcome {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

pub struct ProcessExecutor {
    profile: ProcessProfile,
    root: PathBuf,
}

impl ProcessExecutor {
    pub fn new(profile: ProcessProfile, session_root: &Path) -> Self {
        let root = std::path::absolute(session_root).unwrap_or_else(|_| session_root.to_path_buf());
        Self { profile, root }
    }

    pub fn workdir(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.profile.program);
        command.args(&self.profile.args);
        command
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    fn language(&self) -> &Language {
        &self.profile.language
    }

    fn persists_environment(&self) -> bool {
        false
    }

    fn streaming_style(&self) -> StreamingStyle {
        StreamingStyle::Lines
    }

    async fn run(
        &self,
        invocation: Invocation,
        sink: Arc<dyn OutputSink>,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let workdir = self.workdir(&invocation.session_id)?;
        let state_dir = workdir.join(STATE_DIR);
        tokio::fs::create_dir_all(&state_dir).await?;

        let mut command = self.command();
        let mut marker = None;
        // Kept alive until the process is done with it.
        let mut script_file = None;
        let mut transcript = None;

        match &self.profile.mode {
            ProcessMode::Shell => {
                command
                    .arg("-c")
                    .arg(shell_script(&invocation.code))
                    .env(STATE_ENV_VAR, &state_dir);
            }
            ProcessMode::Transcript { extension, prelude } => {
                let previous = read_transcript(&state_dir.join(TRANSCRIPT_FILE)).await?;
                let mut script = prelude.clone();
                if !previous.trim().is_empty() {
                    let boundary = format!("__omnirepl_boundary_{}__", Uuid::new_v4().simple());
                    script.push_str(&previous);
                    if !previous.ends_with('\n') {
                        script.push('\n');
                    }
                    script.push_str(&self.profile.boundary_statement(&boundary));
                    script.push('\n');
                    marker = Some(boundary);
                }
                script.push_str(&invocation.code);
                script.push('\n');

                let file = tempfile::Builder::new()
                    .prefix("run-")
                    .suffix(extension.as_str())
                    .tempfile_in(&state_dir)?;
                tokio::fs::write(file.path(), script).await?;
                command.arg(file.path());
                script_file = Some(file);
                transcript = Some(previous);
            }
        }

        command
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to start {}: {}", self.profile.program, e);
                return Ok(RunReport {
                    failure: Some(GuestError::raised(
                        "SpawnError",
                        format!("Error executing command: {}", e),
                    )),
                    ..RunReport::default()
                });
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::internal("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::internal("child stderr was not captured"))?;

        let err_sink = sink.clone();
        let err_marker = marker.clone();
        let mut stderr_task =
            tokio::spawn(async move { pump(stderr, err_marker, |line| err_sink.stderr(line)).await });

        let outcome = {
            let work = async {
                pump(stdout, marker, |line| sink.stdout(line)).await?;
                child.wait().await
            };
            tokio::select! {
                result = tokio::time::timeout(invocation.timeout, work) => match result {
                    Ok(status) => Outcome::Exited(status),
                    Err(_) => Outcome::TimedOut,
                },
                _ = cancel.cancelled() => Outcome::Cancelled,
            }
        };

        let status = match outcome {
            Outcome::Exited(Ok(status)) => status,
            Outcome::Exited(Err(e)) => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(e.into());
            }
            Outcome::TimedOut => {
                log::warn!(
                    "{} run for session {} timed out after {:?}",
                    self.profile.language,
                    crate::short_id(&invocation.session_id),
                    invocation.timeout
                );
                let _ = child.kill().await;
                stderr_task.abort();
                return Ok(RunReport {
                    failure: Some(GuestError::timeout(invocation.timeout)),
                    state: None,
                    discard_output: true,
                });
            }
            Outcome::Cancelled => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Ok(RunReport {
                    failure: Some(GuestError::raised("Interrupted", "execution interrupted")),
                    ..RunReport::default()
                });
            }
        };

        match tokio::time::timeout(STDERR_GRACE, &mut stderr_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => log::warn!("Failed to read stderr: {}", e),
            Ok(Err(e)) => log::warn!("stderr reader failed: {}", e),
            Err(_) => stderr_task.abort(),
        }
        drop(script_file);

        if !status.success() {
            return Ok(RunReport {
                failure: Some(GuestError::exit_status(status.code().unwrap_or(-1))),
                ..RunReport::default()
            });
        }

        if let Some(mut previous) = transcript {
            if !previous.is_empty() && !previous.ends_with('\n') {
                previous.push('\n');
            }
            previous.push_str(&invocation.code);
            previous.push('\n');
            tokio::fs::write(state_dir.join(TRANSCRIPT_FILE), previous).await?;
        }

        Ok(RunReport::default())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let workdir = self.workdir(session_id)?;
        match tokio::fs::remove_dir_all(&workdir).await {
            Ok(()) => {
                log::info!("Removed working directory for session {}", crate::short_id(session_id));
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::Accumulator;

    fn invocation(session_id: &str, code: &str) -> Invocation {
        Invocation {
            session_id: session_id.to_string(),
            code: code.to_string(),
            environment: None,
            timeout: Duration::from_secs(10),
        }
    }

    async fn run(executor: &ProcessExecutor, session_id: &str, code: &str) -> (RunReport, String, String) {
        let sink = Arc::new(Accumulator::new());
        let report = executor
            .run(invocation(session_id, code), sink.clone(), CancellationToken::new())
            .await
            .unwrap();
        let (stdout, stderr) = sink.drain();
        (report, stdout, stderr)
    }

    fn bash(root: &Path) -> ProcessExecutor {
        ProcessExecutor::new(
            ProcessProfile::for_language(&Language::new("bash")).unwrap(),
            root,
        )
    }

    /// Transcript mode driven by bash so the test needs no other interpreter.
    fn bash_transcript(root: &Path) -> ProcessExecutor {
        ProcessExecutor::new(
            ProcessProfile::transcript(
                Language::new("sh"),
                "bash",
                ".sh",
                "",
                "echo {marker}; echo {marker} >&2",
            ),
            root,
        )
    }

    #[test]
    fn test_profiles() {
        assert_eq!(
            ProcessProfile::for_language(&Language::new("bash")).unwrap().mode,
            ProcessMode::Shell
        );
        let perl = ProcessProfile::for_language(&Language::new("perl")).unwrap();
        assert!(matches!(perl.mode, ProcessMode::Transcript { ref extension, .. } if extension == ".pl"));
        assert!(perl.boundary_statement("M").contains("\"M\\n\""));
        assert!(ProcessProfile::for_language(&Language::new("kite")).is_none());
    }

    #[test]
    fn test_session_ids_are_path_safe() {
        let dir = tempfile::tempdir().unwrap();
        let executor = bash(dir.path());
        assert!(executor.workdir("3f2a-b_9").is_ok());
        assert!(executor.workdir("../etc").is_err());
        assert!(executor.workdir("").is_err());
        assert!(executor.workdir(&"a".repeat(200)).is_err());
    }

    #[tokio::test]
    async fn test_shell_keeps_exports_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let executor = bash(dir.path());

        let (report, _, _) = run(&executor, "s1", "export GREETING=hello\ntouch made.txt").await;
        assert!(report.failure.is_none());

        let (report, stdout, _) = run(&executor, "s1", "echo $GREETING; ls").await;
        assert!(report.failure.is_none());
        assert_eq!(stdout, "hello\nmade.txt\n");

        let (_, stdout, _) = run(&executor, "s2", "echo \"[$GREETING]\"").await;
        assert_eq!(stdout, "[]\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_synthesized() {
        let dir = tempfile::tempdir().unwrap();
        let executor = bash(dir.path());

        let (report, stdout, stderr) = run(&executor, "s1", "echo partial; echo bad >&2; exit 3").await;
        let failure = report.failure.unwrap();
        assert_eq!(failure.message, "Command exited with code 3");
        assert!(failure.synthesized);
        assert_eq!(stdout, "partial\n");
        assert_eq!(stderr, "bad\n");
    }

    #[tokio::test]
    async fn test_transcript_replays_successful_code_only() {
        let dir = tempfile::tempdir().unwrap();
        let executor = bash_transcript(dir.path());

        let (report, stdout, _) = run(&executor, "t1", "x=5\necho first").await;
        assert!(report.failure.is_none());
        assert_eq!(stdout, "first\n");

        let (report, _, _) = run(&executor, "t1", "x=99; false").await;
        assert!(report.failure.is_some());

        let (report, stdout, stderr) = run(&executor, "t1", "echo \"x=$x\"").await;
        assert!(report.failure.is_none());
        assert_eq!(stdout, "x=5\n");
        assert_eq!(stderr, "");
    }

    #[tokio::test]
    async fn test_timeout_kills_and_discards() {
        let dir = tempfile::tempdir().unwrap();
        let executor = bash(dir.path());
        let mut inv = invocation("slow", "echo started; sleep 5");
        inv.timeout = Duration::from_millis(300);

        let report = executor
            .run(inv, Arc::new(Accumulator::new()), CancellationToken::new())
            .await
            .unwrap();
        assert!(report.discard_output);
        assert!(report.failure.unwrap().timed_out);
    }

    #[tokio::test]
    async fn test_reset_removes_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = bash(dir.path());
        run(&executor, "gone", "touch f").await;
        assert!(dir.path().join("gone").exists());

        executor.reset("gone").await.unwrap();
        assert!(!dir.path().join("gone").exists());
        executor.reset("gone").await.unwrap();
    }
}
