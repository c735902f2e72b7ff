//! Room control: birth, pause/resume/stop, configuration, deletion.

use qr_domain::model::{Room, RoomConfig, RoomStatus, Visibility, Worker};
use qr_domain::{Error, QuietHours, Result};

use crate::events::EngineEvent;
use crate::runtime::tools::ConfigureRoomArgs;
use crate::state::EngineState;

/// Opaque 16-byte secret, hex-encoded, for webhook routes.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

fn default_queen_prompt(room_name: &str, objective: &str) -> String {
    format!(
        "You are the Queen of the room \"{room_name}\". Your objective: {objective}\n\
         Coordinate strategy, decompose goals, delegate tasks to workers, and put \
         consequential choices to a vote. Work in small, concrete steps each cycle."
    )
}

/// Create a room with its implicit Queen, wallet, and root goal.
pub fn create_room(
    state: &EngineState,
    name: &str,
    objective: &str,
    visibility: Visibility,
    referrer_code: Option<String>,
) -> Result<(Room, Worker)> {
    if name.trim().is_empty() {
        return Err(Error::invalid_input("room name is empty"));
    }
    if objective.trim().is_empty() {
        return Err(Error::invalid_input("room objective is empty"));
    }
    let seed = state.wallet.generate_seed()?;
    let (room, queen) = state.store.create_room(&qr_store::NewRoom {
        name: name.to_string(),
        objective: objective.to_string(),
        visibility,
        config: RoomConfig::default(),
        webhook_token: generate_token(),
        referrer_code,
        queen_system_prompt: default_queen_prompt(name, objective),
        wallet: Some(seed),
    })?;
    state.store.set_objective_goal(room.id, objective)?;
    state.events.publish(EngineEvent::RoomStatus {
        room_id: room.id,
        status: room.status.as_str().to_string(),
    });
    tracing::info!(room_id = room.id, name, "room created");
    Ok((room, queen))
}

/// Pause: idempotent; cancels every loop and run in the room's group.
pub fn pause_room(state: &EngineState, room_id: i64) -> Result<Room> {
    let room = state.store.set_room_status(room_id, RoomStatus::Paused)?;
    state.cancels.cancel(&EngineState::room_key(room_id));
    state.events.publish(EngineEvent::RoomStatus {
        room_id,
        status: room.status.as_str().to_string(),
    });
    Ok(room)
}

/// Resume: idempotent; restarts loops for the room's workers.
pub fn resume_room(state: &EngineState, room_id: i64) -> Result<Room> {
    let room = state.store.set_room_status(room_id, RoomStatus::Active)?;
    for worker in state.store.workers_in_room(room_id)? {
        crate::runtime::agent_loop::start_worker(state, room_id, worker.id)?;
    }
    state.events.publish(EngineEvent::RoomStatus {
        room_id,
        status: room.status.as_str().to_string(),
    });
    Ok(room)
}

pub fn stop_room(state: &EngineState, room_id: i64) -> Result<Room> {
    let room = state.store.set_room_status(room_id, RoomStatus::Stopped)?;
    state.cancels.cancel(&EngineState::room_key(room_id));
    state.events.publish(EngineEvent::RoomStatus {
        room_id,
        status: room.status.as_str().to_string(),
    });
    Ok(room)
}

/// Delete a room and everything it owns.
pub fn delete_room(state: &EngineState, room_id: i64) -> Result<()> {
    state.cancels.cancel(&EngineState::room_key(room_id));
    state.store.delete_room(room_id)
}

/// Remove a worker: stop its loop, detach its tasks (store-side), and
/// re-tally open decisions since eligibility changed.
pub fn remove_worker(state: &EngineState, room_id: i64, worker_id: i64) -> Result<()> {
    let worker = state
        .store
        .worker(worker_id)?
        .ok_or_else(|| Error::not_found(format!("worker {worker_id}")))?;
    if worker.room_id != Some(room_id) {
        return Err(Error::Scope(format!("worker {worker_id} belongs to another room")));
    }
    state.cancels.cancel(&EngineState::worker_key(worker_id));
    state.loops.deregister(worker_id);
    state.store.delete_worker(worker_id)?;
    crate::runtime::quorum::retally_room(state, room_id)?;
    Ok(())
}

/// Apply a configuration patch. Quiet-hours endpoints are validated here
/// (a degenerate window is rejected rather than guessed at).
pub fn configure_room(state: &EngineState, room_id: i64, patch: &ConfigureRoomArgs) -> Result<()> {
    let room = state
        .store
        .room(room_id)?
        .ok_or_else(|| Error::not_found(format!("room {room_id}")))?;
    let mut config = room.config.clone();

    if let Some(v) = patch.cycle_gap_ms {
        config.cycle_gap_ms = v.max(1_000);
    }
    if let Some(v) = patch.max_turns_per_cycle {
        config.max_turns_per_cycle = v.max(1);
    }
    if let Some(v) = patch.max_concurrent_tasks {
        config.max_concurrent_tasks = v.max(1);
    }
    if let Some(v) = patch.vote_timeout_minutes {
        config.vote_timeout_minutes = v.max(1);
    }
    match (&patch.quiet_from, &patch.quiet_until) {
        (Some(from), Some(until)) => {
            config.quiet_hours = Some(QuietHours::parse(from, until)?);
        }
        (None, None) => {}
        _ => {
            return Err(Error::invalid_input(
                "quiet hours need both quiet_from and quiet_until",
            ));
        }
    }
    if patch.clear_quiet_hours {
        config.quiet_hours = None;
    }
    if let Some(v) = patch.auto_approve_low_impact {
        config.auto_approve_low_impact = v;
    }

    state.store.set_room_config(room_id, &config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_opaque_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn queen_prompt_mentions_the_objective() {
        let p = default_queen_prompt("R", "ship v1");
        assert!(p.contains("ship v1"));
        assert!(p.contains("Queen"));
    }
}
