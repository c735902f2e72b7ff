//! Task runner: owns one task-run lifecycle from `queued` to a terminal
//! status — concurrency gate, console streaming, session continuity,
//! learned-context distillation, timeout, cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use qr_domain::model::{ConsoleEntry, RunStatus, Task, TaskStatus, TriggerType};
use qr_domain::{Error, Result};
use qr_executor::{ExecEvent, ExecRequest};

use crate::events::EngineEvent;
use crate::state::EngineState;

/// Distillation cadence: after the 3rd successful run, then every 5.
const DISTILL_AFTER: u32 = 3;
const DISTILL_EVERY: u32 = 5;
/// Results fed into one distillation call.
const DISTILL_WINDOW: usize = 3;
const MEMO_MAX_CHARS: usize = 2000;

/// Results larger than this spill into a file under the results dir.
const RESULT_INLINE_CAP: usize = 8 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-room concurrency gates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One semaphore per room, sized to `max_concurrent_tasks`. A cap change
/// replaces the semaphore; in-flight permits on the old one drain out on
/// their own.
#[derive(Default)]
pub struct RoomGates {
    gates: Mutex<HashMap<i64, (u32, Arc<Semaphore>)>>,
}

impl RoomGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, room_id: i64, cap: u32) -> Arc<Semaphore> {
        let cap = cap.max(1);
        let mut gates = self.gates.lock();
        match gates.get(&room_id) {
            Some((existing_cap, sem)) if *existing_cap == cap => sem.clone(),
            _ => {
                let sem = Arc::new(Semaphore::new(cap as usize));
                gates.insert(room_id, (cap, sem.clone()));
                sem
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Create a run in `queued` and execute it in the background. Returns
/// the run id immediately; webhook callers respond 202 with it.
pub fn dispatch(state: &EngineState, task_id: i64) -> Result<i64> {
    let task = state
        .store
        .task(task_id)?
        .ok_or_else(|| Error::not_found(format!("task {task_id}")))?;
    if task.status != TaskStatus::Active {
        return Err(Error::invalid_state(format!("task {task_id} is {}", task.status)));
    }
    let run = state.store.create_run(task.id)?;
    publish_run(state, task.id, run.id, RunStatus::Queued);

    let state = state.clone();
    tokio::spawn(async move {
        execute_run(&state, task, run.id).await;
    });
    Ok(run.id)
}

/// Manual cancel: no retries, the run finalizes as `cancelled`.
pub fn cancel_run(state: &EngineState, run_id: i64) -> Result<()> {
    let key = EngineState::run_key(run_id);
    if state.cancels.cancel(&key) {
        return Ok(());
    }
    // No in-flight token (e.g. still queued): finalize directly.
    let run = state
        .store
        .run(run_id)?
        .ok_or_else(|| Error::not_found(format!("run {run_id}")))?;
    if run.status.is_terminal() {
        return Err(Error::invalid_state(format!("run {run_id} is already {}", run.status)));
    }
    if run.status == RunStatus::Queued {
        // finish_run requires started_at ordering only for running runs.
        state.store.start_run(run_id)?;
    }
    let run = state
        .store
        .finish_run(run_id, RunStatus::Cancelled, None, None, None, None)?;
    publish_run(state, run.task_id, run_id, RunStatus::Cancelled);
    Ok(())
}

async fn execute_run(state: &EngineState, task: Task, run_id: i64) {
    if let Err(e) = execute_run_inner(state, &task, run_id).await {
        tracing::warn!(task_id = task.id, run_id, error = %e, "run finalization failed");
    }
}

/// Execute a run for a task that already left `active` status (one-shots
/// are completed at dispatch time).
pub async fn execute_detached(state: &EngineState, task: Task, run_id: i64) {
    execute_run(state, task, run_id).await;
}

async fn execute_run_inner(state: &EngineState, task: &Task, run_id: i64) -> Result<()> {
    let cancel = state.cancels.register(&EngineState::run_key(run_id));
    if let Some(room_id) = task.room_id {
        state
            .cancels
            .add_to_group(&EngineState::room_key(room_id), &EngineState::run_key(run_id));
    }

    // Per-room concurrency gate: block until the room is below its cap.
    let _permit = if let Some(room_id) = task.room_id {
        let cap = state
            .store
            .room(room_id)?
            .map(|r| r.config.max_concurrent_tasks)
            .unwrap_or(1);
        let gate = state.gates.gate(room_id, cap);
        tokio::select! {
            permit = gate.acquire_owned() => Some(permit.map_err(|_| Error::internal("gate closed"))?),
            _ = cancel.cancelled() => {
                finalize_cancelled(state, task, run_id)?;
                return Ok(());
            }
        }
    } else {
        None
    };

    if cancel.is_cancelled() {
        finalize_cancelled(state, task, run_id)?;
        return Ok(());
    }

    state.store.start_run(run_id)?;
    publish_run(state, task.id, run_id, RunStatus::Running);

    // Learned context rides in front of the task's own prompt.
    let prompt = match &task.learned_context {
        Some(memo) => format!("Context from earlier runs:\n{memo}\n\n{}", task.prompt),
        None => task.prompt.clone(),
    };

    let timeout = Duration::from_secs(u64::from(task.timeout_minutes) * 60);
    let request = ExecRequest {
        model: None,
        prompt,
        system_prompt: None,
        tools: Vec::new(),
        resume_session_id: if task.session_continuity {
            task.session_id.clone()
        } else {
            None
        },
        api_key: None,
        max_turns: task.max_turns.unwrap_or(25),
        timeout,
    };

    // Console collector: stream stdout/stderr/tool events into rows.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ExecEvent>();
    let collector_store = state.store.clone();
    let collector = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let (entry, content) = match event {
                ExecEvent::Stdout { line } => (ConsoleEntry::Stdout, line),
                ExecEvent::Stderr { line } => (ConsoleEntry::Stderr, line),
                ExecEvent::Assistant { text } => (ConsoleEntry::Assistant, text),
                ExecEvent::ToolCall { invocation } => (
                    ConsoleEntry::ToolCall,
                    serde_json::to_string(&invocation).unwrap_or_default(),
                ),
                ExecEvent::ToolResult { name, output } => {
                    (ConsoleEntry::ToolResult, format!("{name}: {output}"))
                }
            };
            if let Err(e) = collector_store.append_console(run_id, entry, &content) {
                tracing::debug!(run_id, error = %e, "console append failed");
            }
        }
    });

    // The runner arms its own timer; a backend that ignores the request
    // timeout still gets cut off here.
    let outcome = tokio::time::timeout(
        timeout + Duration::from_secs(5),
        state.executor.execute(request, Some(event_tx), cancel.clone()),
    )
    .await;
    let _ = collector.await;

    let status = match outcome {
        Err(_elapsed) => {
            cancel.cancel();
            state
                .store
                .finish_run(run_id, RunStatus::TimedOut, None, None, Some("run timed out"), None)?;
            state.store.record_task_failure(task.id)?;
            RunStatus::TimedOut
        }
        Ok(Err(qr_executor::ExecError::Cancelled)) => {
            finalize_cancelled(state, task, run_id)?;
            state.cancels.remove(&EngineState::run_key(run_id));
            return Ok(());
        }
        Ok(Err(exec_err)) => {
            state.store.finish_run(
                run_id,
                RunStatus::Failed,
                None,
                None,
                Some(&exec_err.to_string()),
                None,
            )?;
            state.store.record_task_failure(task.id)?;
            RunStatus::Failed
        }
        Ok(Ok(exec)) if exec.timed_out => {
            state.store.finish_run(
                run_id,
                RunStatus::TimedOut,
                Some(exec.exit_code),
                None,
                Some("executor timed out"),
                None,
            )?;
            state.store.record_task_failure(task.id)?;
            RunStatus::TimedOut
        }
        Ok(Ok(exec)) if exec.exit_code != 0 => {
            state.store.finish_run(
                run_id,
                RunStatus::Failed,
                Some(exec.exit_code),
                None,
                Some(&format!("exit code {}", exec.exit_code)),
                None,
            )?;
            state.store.record_task_failure(task.id)?;
            RunStatus::Failed
        }
        Ok(Ok(exec)) => {
            let result_file = spill_result(state, run_id, &exec.text);
            state.store.finish_run(
                run_id,
                RunStatus::Completed,
                Some(exec.exit_code),
                Some(&exec.text),
                None,
                result_file.as_deref(),
            )?;
            let session_id = if task.session_continuity {
                exec.session_id.as_deref()
            } else {
                None
            };
            let task_after = state.store.record_task_success(task.id, session_id)?;
            maybe_distill(state, &task_after).await;
            RunStatus::Completed
        }
    };

    publish_run(state, task.id, run_id, status);
    state.cancels.remove(&EngineState::run_key(run_id));
    Ok(())
}

fn finalize_cancelled(state: &EngineState, task: &Task, run_id: i64) -> Result<()> {
    let run = state
        .store
        .run(run_id)?
        .ok_or_else(|| Error::not_found(format!("run {run_id}")))?;
    if !run.status.is_terminal() {
        if run.status == RunStatus::Queued {
            state.store.start_run(run_id)?;
        }
        state
            .store
            .finish_run(run_id, RunStatus::Cancelled, None, None, None, None)?;
    }
    publish_run(state, task.id, run_id, RunStatus::Cancelled);
    Ok(())
}

/// Oversized outputs land under the results dir; the row keeps the path.
fn spill_result(state: &EngineState, run_id: i64, text: &str) -> Option<String> {
    if text.len() <= RESULT_INLINE_CAP {
        return None;
    }
    let dir = &state.config.results_dir;
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(error = %e, "results dir unavailable");
        return None;
    }
    let path = dir.join(format!("run-{run_id}-{}.txt", uuid::Uuid::new_v4()));
    match std::fs::write(&path, text) {
        Ok(()) => Some(path.to_string_lossy().into_owned()),
        Err(e) => {
            tracing::warn!(error = %e, "result spill failed");
            None
        }
    }
}

/// After the N-th success and every M-th after that, distill the last K
/// results into a bounded memo prepended to future prompts.
async fn maybe_distill(state: &EngineState, task: &Task) {
    let due = task.run_count == DISTILL_AFTER
        || (task.run_count > DISTILL_AFTER
            && (task.run_count - DISTILL_AFTER) % DISTILL_EVERY == 0);
    if !due || task.trigger == TriggerType::Once {
        return;
    }
    let results = match state.store.recent_successful_results(task.id, DISTILL_WINDOW) {
        Ok(r) if !r.is_empty() => r,
        _ => return,
    };
    let prompt = format!(
        "These are the most recent results of the recurring task \"{}\":\n\n{}\n\n\
         Write a short memo (max {MEMO_MAX_CHARS} characters) of durable context the next \
         run should know: stable facts, formats that worked, pitfalls to avoid.",
        task.name,
        results.join("\n---\n")
    );
    let request = ExecRequest {
        prompt,
        max_turns: 1,
        timeout: Duration::from_secs(120),
        ..Default::default()
    };
    match state
        .executor
        .execute(request, None, qr_executor::CancelToken::new())
        .await
    {
        Ok(outcome) => {
            let mut memo = outcome.text;
            if memo.len() > MEMO_MAX_CHARS {
                let mut end = MEMO_MAX_CHARS;
                while !memo.is_char_boundary(end) && end > 0 {
                    end -= 1;
                }
                memo.truncate(end);
            }
            if !memo.is_empty() {
                if let Err(e) = state.store.set_learned_context(task.id, &memo) {
                    tracing::warn!(task_id = task.id, error = %e, "memo store failed");
                }
            }
        }
        Err(e) => tracing::debug!(task_id = task.id, error = %e, "distillation skipped"),
    }
}

fn publish_run(state: &EngineState, task_id: i64, run_id: i64, status: RunStatus) {
    state.events.publish(EngineEvent::RunChanged {
        task_id,
        run_id,
        status: status.as_str().to_string(),
    });
}
