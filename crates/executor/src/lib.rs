//! The Agent Executor contract: the uniform interface the engine speaks
//! to any LLM backend, plus the cancellation plumbing threaded through
//! every blocking call.
//!
//! Implementations translate between these types and a concrete runtime:
//! [`cli::CliExecutor`] drives a subscription CLI as a child process;
//! [`mock::MockExecutor`] replays scripted outcomes for tests.

pub mod cancel;
pub mod cli;
pub mod mock;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use cancel::{CancelMap, CancelToken};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Schema of one tool offered to the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON-schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A tool invocation the agent asked for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Debug)]
pub struct ExecRequest {
    /// Model tag; `None` uses the backend default.
    pub model: Option<String>,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolSchema>,
    /// Session to resume for conversational continuity.
    pub resume_session_id: Option<String>,
    pub api_key: Option<String>,
    pub max_turns: u32,
    pub timeout: Duration,
}

impl Default for ExecRequest {
    fn default() -> Self {
        Self {
            model: None,
            prompt: String::new(),
            system_prompt: None,
            tools: Vec::new(),
            resume_session_id: None,
            api_key: None,
            max_turns: 1,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Streamed while a request is in flight.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecEvent {
    Stdout { line: String },
    Stderr { line: String },
    Assistant { text: String },
    ToolCall { invocation: ToolInvocation },
    ToolResult { name: String, output: String },
}

#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub text: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub session_id: Option<String>,
    pub timed_out: bool,
    /// Tool invocations in the order the agent emitted them.
    pub tool_calls: Vec<ToolInvocation>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executor failures, each kind distinct so callers can back off or
/// surface them differently.
#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("network: {0}")]
    Network(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid tool call: {0}")]
    InvalidToolCall(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl From<ExecError> for qr_domain::Error {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::RateLimited(msg) => {
                qr_domain::Error::ExecutorFailed(format!("rate limited: {msg}"))
            }
            ExecError::Cancelled => qr_domain::Error::Timeout("executor cancelled".into()),
            other => qr_domain::Error::ExecutorFailed(other.to_string()),
        }
    }
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Uniform contract over LLM backends. `events` receives streaming output
/// as it happens; the returned outcome is the aggregate.
#[async_trait::async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        req: ExecRequest,
        events: Option<mpsc::UnboundedSender<ExecEvent>>,
        cancel: CancelToken,
    ) -> ExecResult<ExecOutcome>;

    /// Identifier used in task `executor` tags and logs.
    fn executor_id(&self) -> &str;
}
