//! The in-process `kite` guest language.
//!
//! Each run restores the session's globals from the stored snapshot, evaluates
//! the submission on a dedicated interpreter thread and snapshots the globals
//! again, whether or not the submission raised.

pub mod ast;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod modules;
pub mod parser;
pub mod snapshot;
pub mod value;

use async_trait::async_trait;
use omnirepl_types::Language;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{Executor, GuestError, Invocation, OutputSink, RunReport, StreamingStyle};
use crate::error::{BackendError, Result};
use interp::Interpreter;

/// Stack for interpreter threads; deep guest recursion runs on it.
pub(crate) const INTERPRETER_STACK_SIZE: usize = 32 * 1024 * 1024;

pub struct KiteExecutor {
    language: Language,
}

impl KiteExecutor {
    pub fn new() -> Self {
        Self {
            language: Language::new("kite"),
        }
    }
}

impl Default for KiteExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode, evaluate and encode on the calling thread.
fn evaluate(
    code: &str,
    environment: Option<&str>,
    sink: &dyn OutputSink,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let globals = match environment {
        Some(data) if !data.trim().is_empty() => snapshot::decode(data)?,
        _ => BTreeMap::new(),
    };

    let mut interpreter = Interpreter::new(globals, sink, cancel);
    let failure = interpreter
        .run_source(code)
        .err()
        .map(|e| GuestError::raised(e.kind.as_str(), e.to_string()));
    let state = snapshot::encode(interpreter.globals())?;

    Ok(RunReport {
        failure,
        state: Some(state),
        discard_output: false,
    })
}

#[async_trait]
impl Executor for KiteExecutor {
    fn language(&self) -> &Language {
        &self.language
    }

    fn persists_environment(&self) -> bool {
        true
    }

    fn streaming_style(&self) -> StreamingStyle {
        StreamingStyle::Polled
    }

    async fn run(
        &self,
        invocation: Invocation,
        sink: Arc<dyn OutputSink>,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let Invocation {
            session_id,
            code,
            environment,
            timeout,
        } = invocation;

        let (tx, rx) = oneshot::channel();
        let worker_cancel = cancel.clone();
        std::thread::Builder::new()
            .name(format!("kite-{}", crate::short_id(&session_id)))
            .stack_size(INTERPRETER_STACK_SIZE)
            .spawn(move || {
                let result = evaluate(&code, environment.as_deref(), sink.as_ref(), &worker_cancel);
                // The receiver is gone once the run timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| BackendError::internal(format!("failed to start interpreter: {}", e)))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BackendError::internal(
                "interpreter thread exited without a result",
            )),
            Err(_) => {
                log::warn!(
                    "kite run for session {} timed out after {:?}",
                    crate::short_id(&session_id),
                    timeout
                );
                cancel.cancel();
                Ok(RunReport {
                    failure: Some(GuestError::timeout(timeout)),
                    state: None,
                    discard_output: false,
                })
            }
        }
    }

    async fn reset(&self, _session_id: &str) -> Result<()> {
        // Nothing lives outside the registry's environment slot.
        Ok(())
    }
}
