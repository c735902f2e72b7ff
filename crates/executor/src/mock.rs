//! Scriptable executor for tests: replays queued outcomes and records
//! every request it was given.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::{
    AgentExecutor, CancelToken, ExecError, ExecEvent, ExecOutcome, ExecRequest, ExecResult,
    ToolInvocation,
};

/// One scripted step.
pub enum Scripted {
    Ok(ExecOutcome),
    Err(ExecError),
    /// Sleep until cancelled, then report `Cancelled` (for loop-stop tests).
    Hang,
}

#[derive(Default)]
pub struct MockExecutor {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: Scripted) {
        self.script.lock().push_back(step);
    }

    /// Queue a plain text reply with no tool calls.
    pub fn push_text(&self, text: &str, session_id: Option<&str>) {
        self.push(Scripted::Ok(ExecOutcome {
            text: text.to_string(),
            exit_code: 0,
            duration_ms: 5,
            session_id: session_id.map(String::from),
            timed_out: false,
            tool_calls: Vec::new(),
        }));
    }

    /// Queue a reply carrying tool invocations.
    pub fn push_tool_calls(&self, text: &str, calls: Vec<ToolInvocation>) {
        self.push(Scripted::Ok(ExecOutcome {
            text: text.to_string(),
            exit_code: 0,
            duration_ms: 5,
            session_id: None,
            timed_out: false,
            tool_calls: calls,
        }));
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait::async_trait]
impl AgentExecutor for MockExecutor {
    async fn execute(
        &self,
        req: ExecRequest,
        events: Option<mpsc::UnboundedSender<ExecEvent>>,
        cancel: CancelToken,
    ) -> ExecResult<ExecOutcome> {
        self.requests.lock().push(req);
        let step = self.script.lock().pop_front();
        match step {
            Some(Scripted::Ok(outcome)) => {
                if let Some(tx) = &events {
                    for call in &outcome.tool_calls {
                        let _ = tx.send(ExecEvent::ToolCall {
                            invocation: call.clone(),
                        });
                    }
                    if !outcome.text.is_empty() {
                        let _ = tx.send(ExecEvent::Assistant {
                            text: outcome.text.clone(),
                        });
                    }
                }
                Ok(outcome)
            }
            Some(Scripted::Err(e)) => Err(e),
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                Err(ExecError::Cancelled)
            }
            // An unscripted call answers quickly and idly.
            None => {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(ExecOutcome {
                    text: "(idle)".into(),
                    exit_code: 0,
                    duration_ms: 1,
                    session_id: None,
                    timed_out: false,
                    tool_calls: Vec::new(),
                })
            }
        }
    }

    fn executor_id(&self) -> &str {
        "mock"
    }
}
