//! In-process event bus: state transitions published for UI and
//! observers over a broadcast channel.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RoomStatus { room_id: i64, status: String },
    WorkerState { worker_id: i64, state: String },
    CycleCompleted { room_id: i64, worker_id: i64 },
    GoalChanged { room_id: i64, goal_id: i64 },
    DecisionChanged { room_id: i64, decision_id: i64, status: String },
    RunChanged { task_id: i64, run_id: i64, status: String },
    WatchTriggered { watch_id: i64, run_id: i64 },
    MessagePosted { room_id: i64 },
    WalletActivity { room_id: i64 },
}

/// Cheap-to-clone publisher handle. Publishing never blocks; with no
/// subscribers the event is dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::RoomStatus {
            room_id: 1,
            status: "paused".into(),
        });
        match rx.recv().await.unwrap() {
            EngineEvent::RoomStatus { room_id, status } => {
                assert_eq!(room_id, 1);
                assert_eq!(status, "paused");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::MessagePosted { room_id: 9 });
    }
}
