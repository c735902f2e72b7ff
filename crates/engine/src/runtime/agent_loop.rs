//! Per-worker cooperative cycler.
//!
//! One long-lived task per active worker in an active room. Each
//! iteration snapshots the room into an envelope, runs one executor
//! call, applies the returned tool calls (each in its own store
//! transaction), records an activity entry, then sleeps the cycle gap,
//! interruptible by a nudge. Consecutive executor failures double the
//! effective gap up to 64× until the first success.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveTime;
use parking_lot::Mutex;

use qr_domain::model::{AgentState, AutonomyMode, RoomStatus};
use qr_domain::Result;
use qr_executor::{CancelToken, ExecRequest};

use crate::events::EngineEvent;
use crate::runtime::{envelope, tools};
use crate::state::EngineState;

const MAX_BACKOFF_MULTIPLIER: u64 = 64;

/// In-memory registry of running loops, keyed by worker id.
#[derive(Default)]
pub struct LoopRegistry {
    running: Mutex<HashMap<i64, CancelToken>>,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot; false when the worker's loop is already running.
    fn claim(&self, worker_id: i64, token: CancelToken) -> bool {
        let mut running = self.running.lock();
        if running.contains_key(&worker_id) {
            return false;
        }
        running.insert(worker_id, token);
        true
    }

    pub fn deregister(&self, worker_id: i64) {
        self.running.lock().remove(&worker_id);
    }

    pub fn is_running(&self, worker_id: i64) -> bool {
        self.running.lock().contains_key(&worker_id)
    }

    pub fn active_count(&self) -> usize {
        self.running.lock().len()
    }
}

/// What one tick decided to do, and how long to sleep after it.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Executor ran and tool calls were applied.
    Ran { gap: Duration },
    /// Quiet hours suppressed the cycle.
    Skipped { gap: Duration },
    /// Semi autonomy: wait for a nudge instead of a timer.
    AwaitNudge,
    /// Executor failed; gap carries the doubled back-off.
    Failed { gap: Duration },
    /// Room or worker is gone / paused; the loop should end.
    Stopped,
}

/// Start a worker's loop. Idempotent: a second start while running is a
/// no-op.
pub fn start_worker(state: &EngineState, room_id: i64, worker_id: i64) -> Result<()> {
    // Claim the registry slot first; a duplicate start must not disturb
    // the running loop's cancellation token.
    let token = CancelToken::new();
    if !state.loops.claim(worker_id, token.clone()) {
        return Ok(());
    }
    state.cancels.adopt(&EngineState::worker_key(worker_id), token.clone());
    state
        .cancels
        .add_to_group(&EngineState::room_key(room_id), &EngineState::worker_key(worker_id));
    let state = state.clone();
    tokio::spawn(async move {
        run_loop(&state, room_id, worker_id, token).await;
        state.loops.deregister(worker_id);
        state.cancels.remove(&EngineState::worker_key(worker_id));
        // Cancelled loops leave the worker idle.
        if let Err(e) = state.store.set_agent_state(worker_id, AgentState::Idle) {
            tracing::debug!(worker_id, error = %e, "could not park worker as idle");
        }
    });
    Ok(())
}

/// Start only when the room is active (used by `create_worker`).
pub fn start_worker_if_room_active(
    state: &EngineState,
    room_id: i64,
    worker_id: i64,
) -> Result<()> {
    match state.store.room(room_id)? {
        Some(room) if room.status == RoomStatus::Active => start_worker(state, room_id, worker_id),
        _ => Ok(()),
    }
}

/// Stop request: parks the worker idle and breaks the loop at its next
/// scheduling point; an in-flight executor call is cancelled.
pub fn stop_worker(state: &EngineState, worker_id: i64) {
    state.cancels.cancel(&EngineState::worker_key(worker_id));
}

async fn run_loop(state: &EngineState, room_id: i64, worker_id: i64, cancel: CancelToken) {
    tracing::info!(room_id, worker_id, "agent loop started");
    let mut fail_streak: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let local_time = chrono::Local::now().time();
        let outcome = run_cycle(state, room_id, worker_id, local_time, fail_streak, &cancel).await;
        let gap = match outcome {
            Ok(CycleOutcome::Ran { gap }) | Ok(CycleOutcome::Skipped { gap }) => {
                fail_streak = 0;
                gap
            }
            Ok(CycleOutcome::Failed { gap }) => {
                fail_streak = fail_streak.saturating_add(1);
                gap
            }
            Ok(CycleOutcome::AwaitNudge) => {
                let nudge = state.nudges.worker_handle(worker_id);
                tokio::select! {
                    _ = nudge.notified() => continue,
                    _ = cancel.cancelled() => break,
                }
            }
            Ok(CycleOutcome::Stopped) => break,
            Err(e) => {
                tracing::warn!(room_id, worker_id, error = %e, "cycle errored");
                fail_streak = fail_streak.saturating_add(1);
                Duration::from_secs(30)
            }
        };

        let nudge = state.nudges.worker_handle(worker_id);
        tokio::select! {
            _ = tokio::time::sleep(gap) => {}
            _ = nudge.notified() => {}
            _ = cancel.cancelled() => break,
        }
    }
    tracing::info!(room_id, worker_id, "agent loop stopped");
}

/// One tick. Takes the local wall-clock time so quiet hours are testable.
pub async fn run_cycle(
    state: &EngineState,
    room_id: i64,
    worker_id: i64,
    local_time: NaiveTime,
    fail_streak: u32,
    cancel: &CancelToken,
) -> Result<CycleOutcome> {
    let Some(room) = state.store.room(room_id)? else {
        return Ok(CycleOutcome::Stopped);
    };
    if room.status != RoomStatus::Active {
        return Ok(CycleOutcome::Stopped);
    }
    let Some(worker) = state.store.worker(worker_id)? else {
        return Ok(CycleOutcome::Stopped);
    };

    let base_gap = Duration::from_millis(worker.effective_cycle_gap_ms(room.config.cycle_gap_ms));

    if let Some(quiet) = &room.config.quiet_hours {
        if quiet.contains(local_time) {
            state.store.record_activity(
                room_id,
                "skipped",
                &format!("cycle suppressed by quiet hours ({local_time})"),
                Some(worker_id),
                None,
            )?;
            return Ok(CycleOutcome::Skipped { gap: base_gap });
        }
    }

    if room.config.autonomy == AutonomyMode::Semi {
        return Ok(CycleOutcome::AwaitNudge);
    }

    state.store.set_agent_state(worker_id, AgentState::Thinking)?;
    state.events.publish(EngineEvent::WorkerState {
        worker_id,
        state: AgentState::Thinking.as_str().to_string(),
    });

    let prompt = envelope::build(state, &room, &worker)?;
    let request = ExecRequest {
        model: worker.model.clone(),
        prompt,
        system_prompt: Some(worker.system_prompt.clone()),
        tools: tools::tool_schemas(),
        resume_session_id: None,
        api_key: None,
        max_turns: worker.effective_max_turns(room.config.max_turns_per_cycle),
        timeout: Duration::from_secs(30 * 60),
    };

    let outcome = state.executor.execute(request, None, cancel.clone()).await;

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            let multiplier =
                (1u64 << fail_streak.saturating_add(1).min(6)).min(MAX_BACKOFF_MULTIPLIER);
            state.store.record_activity(
                room_id,
                "error",
                &format!("executor failed: {e}"),
                Some(worker_id),
                None,
            )?;
            state.store.set_agent_state(worker_id, AgentState::Idle)?;
            return Ok(CycleOutcome::Failed {
                gap: base_gap.saturating_mul(multiplier as u32),
            });
        }
    };

    state.store.set_agent_state(worker_id, AgentState::Acting)?;
    let mut applied = 0usize;
    let mut failed = 0usize;
    for invocation in outcome.tool_calls {
        let name = invocation.name.clone();
        let result = match tools::ToolCall::parse(invocation) {
            Ok(call) => tools::dispatch(state, room_id, &worker, call).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => applied += 1,
            Err(e) => {
                // Tool failures are surfaced and the loop continues.
                failed += 1;
                state.store.record_activity(
                    room_id,
                    "tool_error",
                    &format!("{name}: {e}"),
                    Some(worker_id),
                    Some(&serde_json::json!({ "kind": e.kind() })),
                )?;
            }
        }
    }

    let summary = if outcome.text.is_empty() {
        format!("cycle: {applied} tool calls applied, {failed} failed")
    } else {
        let mut text = outcome.text.clone();
        if text.len() > 300 {
            let mut end = 300;
            while !text.is_char_boundary(end) && end > 0 {
                end -= 1;
            }
            text.truncate(end);
            text.push_str("...");
        }
        format!("cycle: {text}")
    };
    state
        .store
        .record_activity(room_id, "cycle", &summary, Some(worker_id), None)?;

    state.store.set_agent_state(worker_id, AgentState::Idle)?;
    state.events.publish(EngineEvent::CycleCompleted { room_id, worker_id });

    Ok(CycleOutcome::Ran { gap: base_gap })
}

// Re-exported for bootstrap: start loops for every active room.
pub fn start_all_active(state: &EngineState) -> Result<()> {
    for room in state.store.rooms(Some(RoomStatus::Active))? {
        for worker in state.store.workers_in_room(room.id)? {
            start_worker(state, room.id, worker.id)?;
        }
    }
    Ok(())
}
