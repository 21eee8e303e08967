use chrono::Utc;
use futures_util::Stream;
use omnirepl_types::{
    BackendHealth, ExecuteResponse, ExecutionErrorType, Language, MessageResponse, StreamEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, Result};
use crate::executors::{
    Accumulator, ChannelSink, Executor, Invocation, OutputSink, RunReport, StreamingStyle,
};
use crate::registry_client::RegistryClient;
use crate::short_id;

/// Cadence at which buffered output is flushed to a stream.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A language backend: one executor bracketed by registry state pulls and pushes.
///
/// Holds no session state of its own; any instance can serve any request.
#[derive(Clone)]
pub struct Backend {
    executor: Arc<dyn Executor>,
    registry: Arc<dyn RegistryClient>,
    timeout: Duration,
}

impl Backend {
    pub fn new(executor: Arc<dyn Executor>, registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            executor,
            registry,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn language(&self) -> &Language {
        self.executor.language()
    }

    fn check_code(code: &str) -> Result<()> {
        if code.trim().is_empty() {
            return Err(BackendError::validation("Code cannot be empty"));
        }
        Ok(())
    }

    /// Confirm the session belongs to this backend and pull its stored state.
    async fn prepare(&self, session_id: &str, code: String) -> Result<Invocation> {
        let language = self.language();
        let session = self
            .registry
            .fetch_session(session_id)
            .await?
            .ok_or_else(|| BackendError::SessionNotFound(session_id.to_string()))?;
        if session.language != *language {
            return Err(BackendError::LanguageMismatch {
                session_id: session_id.to_string(),
                stored: session.language,
                requested: language.clone(),
            });
        }

        let mut environment = None;
        if self.executor.persists_environment() {
            if let Some(state) = self.registry.fetch_environment(session_id).await? {
                if state.language == *language {
                    environment = state.serialized_data;
                } else {
                    log::warn!(
                        "Ignoring {} environment stored for {} session {}",
                        state.language,
                        language,
                        short_id(session_id)
                    );
                }
            }
        }

        Ok(Invocation {
            session_id: session_id.to_string(),
            code,
            environment,
            timeout: self.timeout,
        })
    }

    /// Push the new state and count the execution. Failures here are logged,
    /// never surfaced: the guest result is already final.
    async fn finish(&self, session_id: &str, report: &RunReport) {
        let language = self.language();
        if self.executor.persists_environment() {
            if let Some(state) = &report.state {
                if let Err(e) = self
                    .registry
                    .store_environment(session_id, language, state.clone())
                    .await
                {
                    log::error!(
                        "Failed to store environment for session {}: {}",
                        short_id(session_id),
                        e
                    );
                }
            }
        }

        if let Err(e) = self.registry.record_activity(session_id, language).await {
            log::warn!(
                "Failed to record activity for session {}: {}",
                short_id(session_id),
                e
            );
        }
    }

    pub async fn execute(&self, session_id: &str, code: String) -> Result<ExecuteResponse> {
        Self::check_code(&code)?;
        let invocation = self.prepare(session_id, code).await?;

        let sink = Arc::new(Accumulator::new());
        let cancel = CancellationToken::new();
        // Cancels the run if the request is dropped mid-flight.
        let _guard = cancel.clone().drop_guard();

        let report = self.executor.run(invocation, sink.clone(), cancel).await?;
        self.finish(session_id, &report).await;

        let (stdout, stderr) = sink.drain();
        log::info!(
            "Executed {} code for session {} ({})",
            self.language(),
            short_id(session_id),
            if report.failure.is_some() { "error" } else { "ok" }
        );
        Ok(compose_response(stdout, stderr, report))
    }

    /// Run `code` and emit its output as it is produced.
    ///
    /// Blank code is rejected up front; every later failure is reported inside
    /// the stream, which always ends with exactly one `complete` event.
    pub fn execute_stream(
        &self,
        session_id: String,
        code: String,
    ) -> Result<impl Stream<Item = StreamEvent> + Send + 'static> {
        Self::check_code(&code)?;
        let backend = self.clone();

        Ok(async_stream::stream! {
            let cancel = CancellationToken::new();
            let _guard = cancel.clone().drop_guard();

            let invocation = match backend.prepare(&session_id, code).await {
                Ok(invocation) => invocation,
                Err(e) => {
                    yield StreamEvent::error(e.to_string());
                    yield StreamEvent::complete(1);
                    return;
                }
            };

            let executor = backend.executor.clone();
            let run_cancel = cancel.clone();
            let mut saw_stderr = false;

            let joined = match executor.streaming_style() {
                StreamingStyle::Polled => {
                    let accumulator = Arc::new(Accumulator::new());
                    let sink: Arc<dyn OutputSink> = accumulator.clone();
                    let mut task = tokio::spawn(async move {
                        executor.run(invocation, sink, run_cancel).await
                    });
                    let mut ticker = tokio::time::interval(POLL_INTERVAL);

                    loop {
                        let finished = tokio::select! {
                            joined = &mut task => Some(joined),
                            _ = ticker.tick() => None,
                        };
                        for event in accumulator.drain_events() {
                            saw_stderr |= matches!(event, StreamEvent::Error { .. });
                            yield event;
                        }
                        if let Some(joined) = finished {
                            break joined;
                        }
                    }
                }
                StreamingStyle::Lines => {
                    let (tx, mut rx) = mpsc::unbounded_channel();
                    let sink: Arc<dyn OutputSink> = Arc::new(ChannelSink::new(tx));
                    let mut task = tokio::spawn(async move {
                        executor.run(invocation, sink, run_cancel).await
                    });
                    let mut open = true;

                    let joined = loop {
                        let step = tokio::select! {
                            biased;
                            event = rx.recv(), if open => match event {
                                Some(event) => Ok(event),
                                None => {
                                    open = false;
                                    continue;
                                }
                            },
                            joined = &mut task => Err(joined),
                        };
                        match step {
                            Ok(event) => {
                                saw_stderr |= matches!(event, StreamEvent::Error { .. });
                                yield event;
                            }
                            Err(joined) => break joined,
                        }
                    };
                    while let Ok(event) = rx.try_recv() {
                        saw_stderr |= matches!(event, StreamEvent::Error { .. });
                        yield event;
                    }
                    joined
                }
            };

            let report = match flatten(joined) {
                Ok(report) => report,
                Err(e) => {
                    log::error!("Streaming run for session {} failed: {}", short_id(&session_id), e);
                    yield StreamEvent::error(e.to_string());
                    yield StreamEvent::complete(1);
                    return;
                }
            };

            backend.finish(&session_id, &report).await;

            match &report.failure {
                Some(failure) => {
                    if !(failure.synthesized && saw_stderr) {
                        yield StreamEvent::error(failure.message.clone());
                    }
                    yield StreamEvent::complete(1);
                }
                None => yield StreamEvent::complete(0),
            }
        })
    }

    /// Drop the session's state: the stored environment and anything the
    /// executor keeps on disk.
    pub async fn reset(&self, session_id: &str) -> Result<MessageResponse> {
        if self.executor.persists_environment() && !self.registry.clear_environment(session_id).await? {
            log::debug!(
                "Registry has no session {} to clear; nothing to reset there",
                short_id(session_id)
            );
        }
        self.executor.reset(session_id).await?;
        log::info!("Reset {} session {}", self.language(), short_id(session_id));
        Ok(MessageResponse::for_session("Session reset successfully", session_id))
    }

    pub fn health(&self) -> BackendHealth {
        BackendHealth {
            status: "healthy".to_string(),
            language: self.language().clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            stateless: true,
            timestamp: Utc::now(),
        }
    }
}

fn flatten(joined: std::result::Result<Result<RunReport>, JoinError>) -> Result<RunReport> {
    joined.map_err(|e| BackendError::internal(format!("execution task failed: {}", e)))?
}

/// Fold guest output and the run's failure into the response body.
fn compose_response(stdout: String, stderr: String, report: RunReport) -> ExecuteResponse {
    if report.discard_output {
        return match report.failure {
            Some(failure) => ExecuteResponse {
                output: String::new(),
                error: Some(failure.message),
                error_type: Some(error_type(failure.timed_out)),
                error_kind: failure.kind,
            },
            None => ExecuteResponse::default(),
        };
    }

    match report.failure {
        Some(failure) => {
            let error = if stderr.is_empty() {
                failure.message
            } else if failure.synthesized {
                stderr
            } else if stderr.ends_with('\n') {
                format!("{}{}", stderr, failure.message)
            } else {
                format!("{}\n{}", stderr, failure.message)
            };
            ExecuteResponse {
                output: stdout,
                error: Some(error),
                error_type: Some(error_type(failure.timed_out)),
                error_kind: failure.kind,
            }
        }
        None => ExecuteResponse {
            output: stdout,
            error: (!stderr.is_empty()).then_some(stderr),
            error_type: None,
            error_kind: None,
        },
    }
}

fn error_type(timed_out: bool) -> ExecutionErrorType {
    if timed_out {
        ExecutionErrorType::TimeoutError
    } else {
        ExecutionErrorType::ExecutionError
    }
}
