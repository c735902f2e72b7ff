//! Child-process executor: drives a subscription agent CLI.
//!
//! The CLI is handed the prompt on stdin and reports on stdout as
//! line-delimited JSON events (`assistant`, `tool_call`, `session`);
//! unrecognized lines pass through as plain stdout. stderr is streamed
//! verbatim.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::{
    AgentExecutor, CancelToken, ExecError, ExecEvent, ExecOutcome, ExecRequest, ExecResult,
    ToolInvocation,
};

pub struct CliExecutor {
    program: String,
    base_args: Vec<String>,
    id: String,
}

/// One stdout line, when it parses as an event.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Assistant { text: String },
    ToolCall { name: String, arguments: serde_json::Value },
    Session { id: String },
}

impl CliExecutor {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        let program = program.into();
        let id = format!("cli:{program}");
        Self {
            program,
            base_args,
            id,
        }
    }

    fn build_command(&self, req: &ExecRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args);
        if let Some(model) = &req.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(session) = &req.resume_session_id {
            cmd.arg("--resume").arg(session);
        }
        cmd.arg("--max-turns").arg(req.max_turns.to_string());
        if let Some(sys) = &req.system_prompt {
            cmd.arg("--system-prompt").arg(sys);
        }
        if !req.tools.is_empty() {
            // Tool schemas travel as one JSON argument.
            if let Ok(json) = serde_json::to_string(&req.tools) {
                cmd.arg("--tools").arg(json);
            }
        }
        if let Some(key) = &req.api_key {
            cmd.env("AGENT_API_KEY", key);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl AgentExecutor for CliExecutor {
    async fn execute(
        &self,
        req: ExecRequest,
        events: Option<mpsc::UnboundedSender<ExecEvent>>,
        cancel: CancelToken,
    ) -> ExecResult<ExecOutcome> {
        let started = Instant::now();
        let mut child = self
            .build_command(&req)
            .spawn()
            .map_err(|e| ExecError::Failed(format!("spawn {}: {e}", self.program)))?;

        // Feed the prompt and close stdin so the CLI starts its turn.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(req.prompt.as_bytes())
                .await
                .map_err(|e| ExecError::Failed(format!("stdin: {e}")))?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Failed("no stdout pipe".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Failed("no stderr pipe".into()))?;

        let mut text = String::new();
        let mut session_id = req.resume_session_id.clone();
        let mut tool_calls: Vec<ToolInvocation> = Vec::new();

        let emit = |ev: ExecEvent, events: &Option<mpsc::UnboundedSender<ExecEvent>>| {
            if let Some(tx) = events {
                let _ = tx.send(ev);
            }
        };

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let deadline = tokio::time::sleep(req.timeout);
        tokio::pin!(deadline);

        let mut out_done = false;
        let mut err_done = false;
        let mut timed_out = false;

        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => match serde_json::from_str::<WireEvent>(&line) {
                        Ok(WireEvent::Assistant { text: t }) => {
                            if !text.is_empty() {
                                text.push('\n');
                            }
                            text.push_str(&t);
                            emit(ExecEvent::Assistant { text: t }, &events);
                        }
                        Ok(WireEvent::ToolCall { name, arguments }) => {
                            let invocation = ToolInvocation { name, arguments };
                            tool_calls.push(invocation.clone());
                            emit(ExecEvent::ToolCall { invocation }, &events);
                        }
                        Ok(WireEvent::Session { id }) => session_id = Some(id),
                        Err(_) => {
                            if !text.is_empty() {
                                text.push('\n');
                            }
                            text.push_str(&line);
                            emit(ExecEvent::Stdout { line }, &events);
                        }
                    },
                    Ok(None) => out_done = true,
                    Err(e) => return Err(ExecError::Failed(format!("stdout: {e}"))),
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) => emit(ExecEvent::Stderr { line }, &events),
                    Ok(None) => err_done = true,
                    Err(e) => return Err(ExecError::Failed(format!("stderr: {e}"))),
                },
                () = &mut deadline => {
                    let _ = child.kill().await;
                    timed_out = true;
                    break;
                }
                () = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(ExecError::Cancelled);
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExecError::Failed(format!("wait: {e}")))?;
        let exit_code = status.code().unwrap_or(-1);
        if !timed_out && exit_code != 0 && text.is_empty() {
            return Err(ExecError::Failed(format!(
                "{} exited with code {exit_code}",
                self.program
            )));
        }

        Ok(ExecOutcome {
            text,
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            session_id,
            timed_out,
            tool_calls,
        })
    }

    fn executor_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CliExecutor {
        CliExecutor::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn plain_stdout_becomes_text() {
        // The trailing flags added by build_command are absorbed by sh -c's
        // positional arguments.
        let exec = sh("cat > /dev/null; echo hello; echo world");
        let out = exec
            .execute(
                ExecRequest {
                    prompt: "hi".into(),
                    ..Default::default()
                },
                None,
                CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.text, "hello\nworld");
        assert_eq!(out.exit_code, 0);
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn json_events_are_parsed() {
        let exec = sh(
            r#"cat > /dev/null
echo '{"type":"session","id":"s42"}'
echo '{"type":"assistant","text":"thinking done"}'
echo '{"type":"tool_call","name":"set_goal","arguments":{"description":"x"}}'"#,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let out = exec
            .execute(
                ExecRequest {
                    prompt: "go".into(),
                    ..Default::default()
                },
                Some(tx),
                CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.session_id.as_deref(), Some("s42"));
        assert_eq!(out.text, "thinking done");
        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].name, "set_goal");

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(match ev {
                ExecEvent::Assistant { .. } => "assistant",
                ExecEvent::ToolCall { .. } => "tool_call",
                ExecEvent::Stdout { .. } => "stdout",
                ExecEvent::Stderr { .. } => "stderr",
                ExecEvent::ToolResult { .. } => "tool_result",
            });
        }
        assert_eq!(kinds, vec!["assistant", "tool_call"]);
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let exec = sh("cat > /dev/null; sleep 30");
        let out = exec
            .execute(
                ExecRequest {
                    prompt: "hi".into(),
                    timeout: Duration::from_millis(100),
                    ..Default::default()
                },
                None,
                CancelToken::new(),
            )
            .await
            .unwrap();
        assert!(out.timed_out);
    }

    #[tokio::test]
    async fn cancel_kills_the_child() {
        let exec = sh("cat > /dev/null; sleep 30");
        let cancel = CancelToken::new();
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            c2.cancel();
        });
        let err = exec
            .execute(
                ExecRequest {
                    prompt: "hi".into(),
                    ..Default::default()
                },
                None,
                cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[tokio::test]
    async fn nonzero_exit_with_no_output_is_failure() {
        let exec = sh("cat > /dev/null; exit 3");
        let err = exec
            .execute(
                ExecRequest {
                    prompt: "hi".into(),
                    ..Default::default()
                },
                None,
                CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)));
    }
}
