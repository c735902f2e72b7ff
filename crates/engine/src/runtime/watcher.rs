//! File-change watcher: one recursive notify watcher per active Watch
//! row, debounced 200 ms, dispatching a task run bound to the watch's
//! action prompt through a synthetic task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use qr_domain::model::{TriggerType, WatchStatus};
use qr_domain::{Error, Result};
use qr_store::NewTask;

use crate::events::EngineEvent;
use crate::runtime::task_runner;
use crate::state::EngineState;

pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// Directories that are never watchable, relative to home.
const DENIED_HOME_SUBDIRS: &[&str] = &[".ssh", ".gnupg", ".aws", ".config", ".quoroom"];

/// Validate a watch path: absolute, inside the user's home hierarchy,
/// and outside sensitive roots.
pub fn validate_watch_path(raw: &str, home: &Path) -> Result<PathBuf> {
    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(Error::invalid_input(format!("watch path {raw:?} must be absolute")));
    }
    if !path.starts_with(home) {
        return Err(Error::invalid_input(format!(
            "watch path {raw:?} is outside the home hierarchy"
        )));
    }
    for denied in DENIED_HOME_SUBDIRS {
        if path.starts_with(home.join(denied)) {
            return Err(Error::invalid_input(format!(
                "watch path {raw:?} is under a sensitive directory"
            )));
        }
    }
    Ok(path)
}

/// Create a watch row after validating its path; the reconciler picks it
/// up on its next pass.
pub fn create_watch(
    state: &EngineState,
    room_id: i64,
    path: &str,
    action_prompt: &str,
    description: Option<&str>,
) -> Result<qr_domain::model::Watch> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::internal("cannot resolve home directory for watch validation"))?;
    let validated = validate_watch_path(path, &home)?;
    state.store.create_watch(
        room_id,
        &validated.to_string_lossy(),
        action_prompt,
        description,
    )
}

struct WatchHandle {
    // Dropping the watcher stops event delivery.
    _watcher: notify::RecommendedWatcher,
    stop: tokio::task::JoinHandle<()>,
}

/// Running watchers, reconciled against the watches table.
#[derive(Default)]
pub struct WatcherSet {
    active: Mutex<HashMap<i64, WatchHandle>>,
}

impl WatcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile running watchers with the store: start newly active
    /// watches, drop paused or deleted ones.
    pub fn sync(&self, state: &EngineState) -> Result<()> {
        let wanted: HashMap<i64, _> = state
            .store
            .active_watches()?
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        let mut active = self.active.lock();
        active.retain(|id, handle| {
            let keep = wanted.contains_key(id);
            if !keep {
                handle.stop.abort();
                tracing::info!(watch_id = id, "watcher stopped");
            }
            keep
        });

        for (id, watch) in wanted {
            if active.contains_key(&id) {
                continue;
            }
            match start_one(state, id, &watch.path) {
                Ok(handle) => {
                    active.insert(id, handle);
                    tracing::info!(watch_id = id, path = %watch.path, "watcher started");
                }
                Err(e) => {
                    tracing::warn!(watch_id = id, path = %watch.path, error = %e, "watcher failed to start")
                }
            }
        }
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

fn start_one(state: &EngineState, watch_id: i64, path: &str) -> Result<WatchHandle> {
    let (tx, rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if event.is_ok() {
            let _ = tx.send(());
        }
    })
    .map_err(|e| Error::internal(format!("watcher: {e}")))?;
    watcher
        .watch(Path::new(path), RecursiveMode::Recursive)
        .map_err(|e| Error::invalid_input(format!("cannot watch {path:?}: {e}")))?;

    let state = state.clone();
    let stop = tokio::spawn(async move { debounce_loop(state, watch_id, rx).await });

    Ok(WatchHandle {
        _watcher: watcher,
        stop,
    })
}

/// Collapse event bursts: fire only after 200 ms of quiescence.
async fn debounce_loop(state: EngineState, watch_id: i64, mut rx: mpsc::UnboundedReceiver<()>) {
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_quiet) => break,
            }
        }
        if let Err(e) = fire(&state, watch_id) {
            tracing::warn!(watch_id, error = %e, "watch dispatch failed");
        }
    }
}

/// Paused watches ignore events; active ones dispatch a run of their
/// synthetic task.
pub fn fire(state: &EngineState, watch_id: i64) -> Result<()> {
    let watch = state
        .store
        .watch(watch_id)?
        .ok_or_else(|| Error::not_found(format!("watch {watch_id}")))?;
    if watch.status != WatchStatus::Active {
        return Ok(());
    }

    let task_id = synthetic_task(state, watch.room_id, watch_id, &watch.action_prompt)?;
    let run_id = task_runner::dispatch(state, task_id)?;
    state.store.record_watch_trigger(watch_id)?;
    state.events.publish(EngineEvent::WatchTriggered { watch_id, run_id });
    Ok(())
}

/// Find or create the manual task that carries this watch's action
/// prompt. One per watch, reused across triggers.
fn synthetic_task(state: &EngineState, room_id: i64, watch_id: i64, action_prompt: &str) -> Result<i64> {
    let name = format!("watch:{watch_id}");
    if let Some(existing) = state
        .store
        .tasks_in_room(room_id)?
        .into_iter()
        .find(|t| t.name == name)
    {
        return Ok(existing.id);
    }
    let task = state.store.create_task(&NewTask {
        room_id: Some(room_id),
        worker_id: None,
        name,
        prompt: action_prompt.to_string(),
        trigger: TriggerType::Manual,
        cron_expression: None,
        scheduled_at: None,
        executor: state.config.source_tag.clone(),
        max_runs: None,
        session_continuity: false,
        timeout_minutes: 30,
        max_turns: None,
        allowed_tools: Vec::new(),
        disallowed_tools: Vec::new(),
        webhook_token: None,
    })?;
    Ok(task.id)
}

/// Periodic reconciler keeping watchers in step with the table.
pub fn spawn(state: &EngineState, set: std::sync::Arc<WatcherSet>) {
    let state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(10));
        loop {
            tick.tick().await;
            if let Err(e) = set.sync(&state) {
                tracing::warn!(error = %e, "watcher sync failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_rejected() {
        let home = Path::new("/home/u");
        assert!(validate_watch_path("notes", home).is_err());
        assert!(validate_watch_path("./notes", home).is_err());
    }

    #[test]
    fn outside_home_rejected() {
        let home = Path::new("/home/u");
        assert!(validate_watch_path("/etc/passwd", home).is_err());
        assert!(validate_watch_path("/home/other/notes", home).is_err());
        assert!(validate_watch_path("/var/log", home).is_err());
    }

    #[test]
    fn sensitive_subdirs_rejected() {
        let home = Path::new("/home/u");
        assert!(validate_watch_path("/home/u/.ssh", home).is_err());
        assert!(validate_watch_path("/home/u/.ssh/keys", home).is_err());
        assert!(validate_watch_path("/home/u/.config/app", home).is_err());
        assert!(validate_watch_path("/home/u/.aws/credentials", home).is_err());
    }

    #[test]
    fn plain_home_paths_accepted() {
        let home = Path::new("/home/u");
        assert!(validate_watch_path("/home/u/notes", home).is_ok());
        assert!(validate_watch_path("/home/u/projects/app/src", home).is_ok());
        // Dotfiles are fine when not on the deny list.
        assert!(validate_watch_path("/home/u/.notes", home).is_ok());
    }
}
