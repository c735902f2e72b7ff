//! Cancellation tokens with group fan-out.
//!
//! Every in-flight executor call, worker loop, and task run carries a
//! `CancelToken`. Groups support cascading cancellation: pausing a room
//! cancels every child registered under its key.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A cancellation token that can be polled synchronously or awaited.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active tokens per key, with group support for cascading
/// parent→child cancellation (room → its workers and runs).
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a fresh token under a key.
    pub fn register(&self, key: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(key.to_owned(), token.clone());
        token
    }

    /// Register an existing token under a key. Used when the token had to
    /// be created before the key's owner was sure it would run.
    pub fn adopt(&self, key: &str, token: CancelToken) {
        self.tokens.lock().insert(key.to_owned(), token);
    }

    /// Cancel a key and everything in its group. Returns true when a
    /// token was found under the key itself.
    pub fn cancel(&self, key: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(key) {
            token.cancel();
            true
        } else {
            false
        };
        if let Some(children) = self.groups.lock().get(key) {
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(t) = tokens.get(child) {
                    t.cancel();
                }
            }
        }
        found
    }

    /// Remove a key's token (and the group it owned).
    pub fn remove(&self, key: &str) {
        self.tokens.lock().remove(key);
        self.groups.lock().remove(key);
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.tokens.lock().contains_key(key)
    }

    pub fn add_to_group(&self, parent: &str, child: &str) {
        self.groups
            .lock()
            .entry(parent.to_owned())
            .or_default()
            .insert(child.to_owned());
    }

    pub fn remove_from_group(&self, parent: &str, child: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent) {
            children.remove(child);
            if children.is_empty() {
                groups.remove(parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        token.cancel();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await; // must not hang
    }

    #[test]
    fn map_register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("worker:1");
        assert!(map.is_active("worker:1"));
        assert!(map.cancel("worker:1"));
        assert!(token.is_cancelled());

        map.remove("worker:1");
        assert!(!map.is_active("worker:1"));
        assert!(!map.cancel("worker:1"));
    }

    #[test]
    fn cancel_cascades_to_group() {
        let map = CancelMap::new();
        let room = map.register("room:1");
        let loop_a = map.register("worker:1");
        let run_b = map.register("run:9");
        map.add_to_group("room:1", "worker:1");
        map.add_to_group("room:1", "run:9");

        map.cancel("room:1");
        assert!(room.is_cancelled());
        assert!(loop_a.is_cancelled());
        assert!(run_b.is_cancelled());
    }

    #[test]
    fn removed_child_escapes_cascade() {
        let map = CancelMap::new();
        let _room = map.register("room:1");
        let child = map.register("worker:1");
        map.add_to_group("room:1", "worker:1");
        map.remove_from_group("room:1", "worker:1");
        map.cancel("room:1");
        assert!(!child.is_cancelled());
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old = map.register("k");
        let new = map.register("k");
        map.cancel("k");
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled(), "orphaned token is not reachable via the map");
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("k");
        map.remove("k");
        map.remove("k");
        assert!(!map.is_active("k"));
    }
}
