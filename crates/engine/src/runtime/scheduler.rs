//! Trigger dispatch: the 1 s cron poll, the once-dispatcher, and the
//! quorum deadline sweep.

use std::time::Duration;

use chrono::Utc;

use qr_domain::model::TaskStatus;

use crate::runtime::{cron, quorum, task_runner};
use crate::state::EngineState;

/// Spawn all scheduler loops. They run for the life of the process.
pub fn spawn(state: &EngineState) {
    let cron_state = state.clone();
    tokio::spawn(async move { cron_loop(cron_state).await });

    let once_state = state.clone();
    tokio::spawn(async move { once_loop(once_state).await });

    let quorum_state = state.clone();
    tokio::spawn(async move { quorum_loop(quorum_state).await });
}

/// Poll active cron tasks once per second against local wall-clock.
/// A (task, minute) pair fires at most once: `last_run` stores the
/// minute key and is written before dispatch.
async fn cron_loop(state: EngineState) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        if let Err(e) = cron_tick(&state) {
            tracing::warn!(error = %e, "cron tick failed");
        }
    }
}

/// One poll pass; separated for tests.
pub fn cron_tick(state: &EngineState) -> qr_domain::Result<usize> {
    let now = chrono::Local::now().naive_local();
    cron_tick_at(state, now)
}

pub fn cron_tick_at(state: &EngineState, now: chrono::NaiveDateTime) -> qr_domain::Result<usize> {
    let key = cron::minute_key(&now);
    let mut fired = 0;
    for task in state.store.active_cron_tasks()? {
        let Some(expr) = task.cron_expression.as_deref() else { continue };
        if !cron::cron_matches(expr, &now) {
            continue;
        }
        if task.last_run.as_deref() == Some(key.as_str()) {
            continue;
        }
        // Dedupe before dispatch so a slow run cannot double-fire.
        state.store.set_task_last_run(task.id, &key)?;
        match task_runner::dispatch(state, task.id) {
            Ok(run_id) => {
                fired += 1;
                tracing::info!(task_id = task.id, run_id, "cron task dispatched");
            }
            Err(e) => tracing::warn!(task_id = task.id, error = %e, "cron dispatch failed"),
        }
    }
    Ok(fired)
}

/// Sleep to the earliest pending `scheduled_at`; wake early when the
/// task table changes.
async fn once_loop(state: EngineState) {
    let changed = state.nudges.tasks_changed_handle();
    loop {
        let wait = match once_pass(&state) {
            Ok(next_wake) => next_wake,
            Err(e) => {
                tracing::warn!(error = %e, "once dispatcher pass failed");
                Duration::from_secs(5)
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = changed.notified() => {}
        }
    }
}

/// Dispatch due one-shot tasks; returns how long to sleep until the next
/// pending one (capped for safety).
pub fn once_pass(state: &EngineState) -> qr_domain::Result<Duration> {
    let now = Utc::now();
    let mut next_wake = Duration::from_secs(60);
    for task in state.store.pending_once_tasks()? {
        let Some(at) = task.scheduled_at else { continue };
        if at <= now {
            // A one-shot fires exactly once; completing it first keeps a
            // crash from re-firing it.
            state.store.set_task_status(task.id, TaskStatus::Completed)?;
            match dispatch_completed_once(state, task.id) {
                Ok(run_id) => {
                    tracing::info!(task_id = task.id, run_id, "one-shot task dispatched")
                }
                Err(e) => tracing::warn!(task_id = task.id, error = %e, "one-shot dispatch failed"),
            }
        } else {
            let until = (at - now).to_std().unwrap_or(Duration::from_secs(1));
            next_wake = next_wake.min(until);
        }
    }
    Ok(next_wake)
}

/// One-shots are completed at dispatch time, so the usual active-status
/// guard in `dispatch` is bypassed by re-reading the row here.
fn dispatch_completed_once(state: &EngineState, task_id: i64) -> qr_domain::Result<i64> {
    let task = state
        .store
        .task(task_id)?
        .ok_or_else(|| qr_domain::Error::not_found(format!("task {task_id}")))?;
    let run = state.store.create_run(task.id)?;
    let state_clone = state.clone();
    let run_id = run.id;
    tokio::spawn(async move {
        task_runner::execute_detached(&state_clone, task, run_id).await;
    });
    Ok(run_id)
}

/// Re-check quorum deadlines once per second; each transition re-reads
/// the row transactionally.
async fn quorum_loop(state: EngineState) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        if let Err(e) = quorum::handle_deadlines(&state) {
            tracing::warn!(error = %e, "quorum deadline sweep failed");
        }
    }
}
