//! Nudge channels: cross-component wake signals that shortcut an agent
//! loop's cycle-gap sleep and the once-dispatcher's wait.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

pub struct NudgeMap {
    workers: Mutex<HashMap<i64, Arc<Notify>>>,
    /// Wakes the once-dispatcher when the task table changes.
    tasks_changed: Arc<Notify>,
}

impl NudgeMap {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            tasks_changed: Arc::new(Notify::new()),
        }
    }

    /// Handle a loop sleeps on. Created on first use.
    pub fn worker_handle(&self, worker_id: i64) -> Arc<Notify> {
        self.workers
            .lock()
            .entry(worker_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wake a worker's loop early. A nudge to a sleeping loop fires
    /// immediately; to a busy loop it is absorbed by `Notify` semantics
    /// and wakes the next sleep.
    pub fn nudge_worker(&self, worker_id: i64) {
        self.worker_handle(worker_id).notify_one();
    }

    pub fn tasks_changed_handle(&self) -> Arc<Notify> {
        self.tasks_changed.clone()
    }

    pub fn nudge_tasks_changed(&self) {
        self.tasks_changed.notify_one();
    }
}

impl Default for NudgeMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn nudge_wakes_a_sleeper() {
        let map = NudgeMap::new();
        let handle = map.worker_handle(7);
        let waiter = tokio::spawn(async move {
            handle.notified().await;
            true
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        map.nudge_worker(7);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn nudge_before_sleep_is_not_lost() {
        let map = NudgeMap::new();
        map.nudge_worker(3);
        // notify_one stores a permit; the next notified() resolves at once.
        tokio::time::timeout(Duration::from_millis(100), map.worker_handle(3).notified())
            .await
            .expect("permit should be waiting");
    }
}
