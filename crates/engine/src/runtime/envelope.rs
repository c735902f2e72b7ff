//! Prompt envelope: the room-state snapshot handed to the executor at
//! the start of each cycle.

use qr_domain::model::{Room, Worker};
use qr_domain::Result;

use crate::state::EngineState;

const RECENT_ACTIVITY: usize = 10;
const RECENT_TXS: usize = 3;

/// Build the cycle envelope for a worker: active goals, recent activity,
/// pending decisions it has not voted on, unread mail, delegated tasks,
/// wallet summary, and the previous cycle's summary. Included mail is
/// marked read so cycle n+1 does not repeat it.
pub fn build(state: &EngineState, room: &Room, worker: &Worker) -> Result<String> {
    let mut out = String::new();
    let push_section = |out: &mut String, title: &str| {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("## ");
        out.push_str(title);
        out.push('\n');
    };

    push_section(&mut out, "Objective");
    out.push_str(&room.objective);
    out.push('\n');

    push_section(&mut out, "Active goals");
    let goals = state.store.active_goals(room.id)?;
    if goals.is_empty() {
        out.push_str("(none yet; set one)\n");
    }
    for g in &goals {
        let parent = g
            .parent_goal_id
            .map(|p| format!(" (under #{p})"))
            .unwrap_or_default();
        out.push_str(&format!(
            "- #{} [{}] {:.0}% {}{}\n",
            g.id,
            g.status,
            g.progress * 100.0,
            g.description,
            parent
        ));
    }

    let pending = state.store.unvoted_decisions(room.id, worker.id)?;
    if !pending.is_empty() {
        push_section(&mut out, "Decisions awaiting your vote");
        for d in &pending {
            out.push_str(&format!(
                "- #{} [{}] {} (threshold {})\n",
                d.id, d.decision_type, d.proposal, d.threshold
            ));
        }
    }

    let mut mail = state.store.unread_messages_for_worker(room.id, worker.id)?;
    if room.queen_worker_id == Some(worker.id) {
        // The queen also reads the keeper-directed wake messages.
        mail.extend(state.store.unread_keeper_messages(room.id)?);
    }
    if !mail.is_empty() {
        push_section(&mut out, "Unread messages");
        for m in &mail {
            out.push_str(&format!("- from {}: {}\n", m.sender, m.body));
        }
        state
            .store
            .mark_messages_read(&mail.iter().map(|m| m.id).collect::<Vec<_>>())?;
    }

    let tasks = state.store.tasks_in_room(room.id)?;
    if !tasks.is_empty() {
        push_section(&mut out, "Delegated tasks");
        for t in &tasks {
            out.push_str(&format!(
                "- #{} [{}] {} ({} runs, {} errors)\n",
                t.id, t.status, t.name, t.run_count, t.error_count
            ));
        }
    }

    if let Some(wallet) = state.store.wallet_for_room(room.id)? {
        push_section(&mut out, "Wallet");
        out.push_str(&format!("address {} on {}\n", wallet.address, wallet.chain));
        for tx in state.store.wallet_transactions(wallet.id, RECENT_TXS)? {
            out.push_str(&format!(
                "- {} {} [{}]{}\n",
                tx.tx_type,
                tx.amount,
                tx.status,
                tx.counterparty
                    .as_deref()
                    .map(|c| format!(" → {c}"))
                    .unwrap_or_default()
            ));
        }
    }

    let activity = state.store.recent_activity(room.id, RECENT_ACTIVITY)?;
    if !activity.is_empty() {
        push_section(&mut out, "Recent activity");
        for a in &activity {
            out.push_str(&format!("- [{}] {}\n", a.event_type, a.summary));
        }
    }

    if let Some(last) = activity
        .iter()
        .find(|a| a.event_type == "cycle" && a.worker_id == Some(worker.id))
    {
        push_section(&mut out, "Your last cycle");
        out.push_str(&last.summary);
        out.push('\n');
    }

    Ok(out)
}
