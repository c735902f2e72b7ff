//! End-to-end store scenarios against a real on-disk database.

use qr_domain::model::{RunStatus, TriggerType, Visibility};
use qr_domain::QuietHours;
use qr_store::{NewRoom, NewTask, Store, WalletSeed};

fn room_with_wallet(name: &str) -> NewRoom {
    NewRoom {
        name: name.into(),
        objective: "ship v1".into(),
        visibility: Visibility::Private,
        config: Default::default(),
        webhook_token: "0f".repeat(16),
        referrer_code: None,
        queen_system_prompt: "You coordinate the room.".into(),
        wallet: Some(WalletSeed {
            address: format!("0x{}", "1c".repeat(20)),
            encrypted_key: vec![7; 76],
            chain: "base".into(),
        }),
    }
}

#[test]
fn room_birth_writes_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("quoroom.db")).unwrap();

    let (room, queen) = store.create_room(&room_with_wallet("R")).unwrap();
    let goal = store.set_objective_goal(room.id, "ship v1").unwrap();

    assert_eq!(room.queen_worker_id, Some(queen.id));
    assert_eq!(queen.name, "R Queen");
    assert_eq!(goal.progress, 0.0);

    let wallet = store.wallet_for_room(room.id).unwrap().unwrap();
    assert_eq!(wallet.address.len(), 42);
    assert!(wallet.address.starts_with("0x"));

    let activity = store.recent_activity(room.id, 10).unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].event_type, "system");
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quoroom.db");
    let room_id;
    {
        let store = Store::open(&path).unwrap();
        let (room, _) = store.create_room(&room_with_wallet("R")).unwrap();
        let mut config = room.config.clone();
        config.quiet_hours = Some(QuietHours::parse("22:00", "06:00").unwrap());
        store.set_room_config(room.id, &config).unwrap();
        room_id = room.id;
    }
    let store = Store::open(&path).unwrap();
    let room = store.room(room_id).unwrap().unwrap();
    assert_eq!(
        room.config.quiet_hours,
        Some(QuietHours::parse("22:00", "06:00").unwrap())
    );
    assert!(store.wallet_for_room(room_id).unwrap().is_some());
}

#[test]
fn crash_recovery_fails_inflight_runs_but_keeps_finished_ones() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quoroom.db");
    let (done_id, inflight_id);
    {
        let store = Store::open(&path).unwrap();
        let (room, _) = store.create_room(&room_with_wallet("R")).unwrap();
        let task = store
            .create_task(&NewTask {
                room_id: Some(room.id),
                worker_id: None,
                name: "t".into(),
                prompt: "p".into(),
                trigger: TriggerType::Manual,
                cron_expression: None,
                scheduled_at: None,
                executor: None,
                max_runs: None,
                session_continuity: false,
                timeout_minutes: 30,
                max_turns: None,
                allowed_tools: vec![],
                disallowed_tools: vec![],
                webhook_token: None,
            })
            .unwrap();

        let done = store.create_run(task.id).unwrap();
        store.start_run(done.id).unwrap();
        store
            .finish_run(done.id, RunStatus::Completed, Some(0), Some("ok"), None, None)
            .unwrap();
        done_id = done.id;

        let inflight = store.create_run(task.id).unwrap();
        store.start_run(inflight.id).unwrap();
        inflight_id = inflight.id;
    }

    let store = Store::open(&path).unwrap();
    assert_eq!(
        store.run(done_id).unwrap().unwrap().status,
        RunStatus::Completed
    );
    let recovered = store.run(inflight_id).unwrap().unwrap();
    assert_eq!(recovered.status, RunStatus::Failed);
    assert_eq!(recovered.error_message.as_deref(), Some("process restart"));
    assert!(recovered.finished_at.is_some());
}
