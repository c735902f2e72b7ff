//! Cloud relay boundary: public-room registry, keeper notifications,
//! inbox, invite network, and update-source diagnostics.
//!
//! All calls are best-effort; transient errors degrade silently and are
//! only visible through the diagnostics block on `/api/status`.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use qr_domain::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: String,
    pub room_token: String,
    pub body: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperChannel {
    Email,
    Telegram,
}

#[async_trait::async_trait]
pub trait CloudClient: Send + Sync {
    /// Register a room in the public registry; returns its cloud token.
    async fn register_room(&self, room_name: &str, referrer: Option<&str>) -> Result<String>;

    async fn fetch_inbox(&self, room_token: &str) -> Result<Vec<InboxMessage>>;

    async fn ack_message(&self, message_id: &str) -> Result<()>;

    async fn notify_keeper(&self, channel: KeeperChannel, message: &str) -> Result<()>;

    async fn fetch_invite_network(&self, referrer: &str) -> Result<Vec<String>>;
}

/// Used when no cloud endpoint is configured.
pub struct NoopCloud;

#[async_trait::async_trait]
impl CloudClient for NoopCloud {
    async fn register_room(&self, _room_name: &str, _referrer: Option<&str>) -> Result<String> {
        Ok(String::new())
    }

    async fn fetch_inbox(&self, _room_token: &str) -> Result<Vec<InboxMessage>> {
        Ok(Vec::new())
    }

    async fn ack_message(&self, _message_id: &str) -> Result<()> {
        Ok(())
    }

    async fn notify_keeper(&self, _channel: KeeperChannel, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn fetch_invite_network(&self, _referrer: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cloud room tokens sidecar
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maintains `cloud-room-tokens.json`: room id → cloud token.
pub struct CloudTokenFile {
    path: PathBuf,
    tokens: Mutex<HashMap<i64, String>>,
}

impl CloudTokenFile {
    pub fn load(path: PathBuf) -> Self {
        let tokens = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            tokens: Mutex::new(tokens),
        }
    }

    pub fn get(&self, room_id: i64) -> Option<String> {
        self.tokens.lock().get(&room_id).cloned()
    }

    pub fn set(&self, room_id: i64, token: String) {
        let snapshot = {
            let mut tokens = self.tokens.lock();
            tokens.insert(room_id, token);
            tokens.clone()
        };
        if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
            if let Err(e) = std::fs::write(&self.path, json) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to persist cloud tokens");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cloud sync loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Best-effort relay sync: registers public rooms, drains their cloud
/// inboxes into room mail, and nudges the queen. Errors are logged and
/// retried on the next pass.
pub fn spawn_sync(state: &crate::state::EngineState, tokens: std::sync::Arc<CloudTokenFile>) {
    let state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SYNC_INTERVAL);
        loop {
            tick.tick().await;
            if let Err(e) = sync_pass(&state, &tokens).await {
                tracing::debug!(error = %e, "cloud sync pass failed");
            }
        }
    });
}

async fn sync_pass(
    state: &crate::state::EngineState,
    tokens: &CloudTokenFile,
) -> qr_domain::Result<()> {
    use qr_domain::model::Visibility;

    for room in state.store.rooms(None)? {
        if room.visibility != Visibility::Public {
            continue;
        }
        let token = match tokens.get(room.id) {
            Some(token) => token,
            None => {
                let token = state
                    .cloud
                    .register_room(&room.name, room.referrer_code.as_deref())
                    .await?;
                if token.is_empty() {
                    continue;
                }
                tokens.set(room.id, token.clone());
                tracing::info!(room_id = room.id, "room registered with cloud relay");
                token
            }
        };

        for message in state.cloud.fetch_inbox(&token).await? {
            state.store.send_room_message(
                room.id,
                "cloud",
                room.queen_worker_id,
                &message.body,
            )?;
            if let Some(queen_id) = room.queen_worker_id {
                state.nudges.nudge_worker(queen_id);
            }
            state.cloud.ack_message(&message.id).await?;
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Update diagnostics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDiagnosticsSnapshot {
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub update_source: Option<String>,
}

/// Health of the update-source checks, surfaced on `/api/status`.
#[derive(Default)]
pub struct UpdateDiagnostics {
    inner: Mutex<UpdateDiagnosticsSnapshot>,
}

impl UpdateDiagnostics {
    pub fn new(update_source: Option<String>) -> Self {
        Self {
            inner: Mutex::new(UpdateDiagnosticsSnapshot {
                update_source,
                ..Default::default()
            }),
        }
    }

    pub fn record_success(&self, next_check_at: DateTime<Utc>) {
        let mut d = self.inner.lock();
        let now = Utc::now();
        d.last_check_at = Some(now);
        d.last_success_at = Some(now);
        d.next_check_at = Some(next_check_at);
        d.consecutive_failures = 0;
    }

    pub fn record_error(&self, code: &str, next_check_at: DateTime<Utc>) {
        let mut d = self.inner.lock();
        let now = Utc::now();
        d.last_check_at = Some(now);
        d.last_error_at = Some(now);
        d.last_error_code = Some(code.to_string());
        d.next_check_at = Some(next_check_at);
        d.consecutive_failures += 1;
    }

    pub fn snapshot(&self) -> UpdateDiagnosticsSnapshot {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_track_failures_until_success() {
        let d = UpdateDiagnostics::new(Some("https://updates.example".into()));
        let next = Utc::now() + chrono::Duration::hours(1);
        d.record_error("http_503", next);
        d.record_error("http_503", next);
        assert_eq!(d.snapshot().consecutive_failures, 2);
        assert_eq!(d.snapshot().last_error_code.as_deref(), Some("http_503"));

        d.record_success(next);
        let snap = d.snapshot();
        assert_eq!(snap.consecutive_failures, 0);
        assert!(snap.last_success_at.is_some());
        assert_eq!(snap.update_source.as_deref(), Some("https://updates.example"));
    }

    #[test]
    fn token_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud-room-tokens.json");
        {
            let file = CloudTokenFile::load(path.clone());
            file.set(1, "tok-a".into());
            file.set(2, "tok-b".into());
        }
        let file = CloudTokenFile::load(path);
        assert_eq!(file.get(1).as_deref(), Some("tok-a"));
        assert_eq!(file.get(2).as_deref(), Some("tok-b"));
        assert!(file.get(3).is_none());
    }

    #[tokio::test]
    async fn noop_cloud_degrades_silently() {
        let cloud = NoopCloud;
        assert!(cloud.fetch_inbox("tok").await.unwrap().is_empty());
        cloud
            .notify_keeper(KeeperChannel::Email, "room needs attention")
            .await
            .unwrap();
    }
}
