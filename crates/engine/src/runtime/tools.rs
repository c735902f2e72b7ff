//! The queen/worker tool surface: a closed enum of tool calls, each with
//! a validated argument record, applied through a dispatch table.
//!
//! Unknown tool names fail with `invalid_input` rather than being
//! forwarded anywhere. Every reference to a row in another room fails
//! with `scope`. Each call mutates the store in its own transaction.

use serde::Deserialize;

use qr_domain::model::{
    DecisionType, EntityType, QuorumThreshold, TriggerType, VoteValue, Worker,
};
use qr_domain::{Error, Result};
use qr_executor::{ToolInvocation, ToolSchema};
use qr_store::{NewTask, NewWorker, WorkerPatch};

use crate::events::EngineEvent;
use crate::runtime::{cron, memory, quorum};
use crate::state::EngineState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SetGoalArgs {
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubgoalArgs {
    pub parent_goal_id: i64,
    pub descriptions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProgressArgs {
    pub goal_id: i64,
    pub metric_value: f64,
    #[serde(default)]
    pub observation: String,
}

#[derive(Debug, Deserialize)]
pub struct GoalIdArgs {
    pub goal_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ProposeArgs {
    pub proposal: String,
    pub decision_type: DecisionType,
    #[serde(default)]
    pub threshold: Option<QuorumThreshold>,
    #[serde(default)]
    pub min_voters: Option<u32>,
    #[serde(default)]
    pub sealed: bool,
}

#[derive(Debug, Deserialize)]
pub struct VoteArgs {
    pub decision_id: i64,
    pub value: VoteValue,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkerArgs {
    pub name: String,
    pub role: String,
    pub system_prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cycle_gap_ms: Option<u64>,
    #[serde(default)]
    pub max_turns: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkerArgs {
    pub worker_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cycle_gap_ms: Option<u64>,
    #[serde(default)]
    pub max_turns: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleTaskArgs {
    pub name: String,
    pub prompt: String,
    pub trigger: TriggerType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub session_continuity: bool,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub max_turns: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RememberArgs {
    pub entity: String,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub category: Option<String>,
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecallArgs {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageArgs {
    /// A worker name, or "keeper".
    pub to: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfigureRoomArgs {
    #[serde(default)]
    pub cycle_gap_ms: Option<u64>,
    #[serde(default)]
    pub max_turns_per_cycle: Option<u32>,
    #[serde(default)]
    pub max_concurrent_tasks: Option<u32>,
    #[serde(default)]
    pub vote_timeout_minutes: Option<u32>,
    #[serde(default)]
    pub quiet_from: Option<String>,
    #[serde(default)]
    pub quiet_until: Option<String>,
    /// Set true together with empty quiet_from/quiet_until to clear.
    #[serde(default)]
    pub clear_quiet_hours: bool,
    #[serde(default)]
    pub auto_approve_low_impact: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct WebSearchArgs {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct WebFetchArgs {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct BrowserArgs {
    pub actions: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct WalletBalanceArgs {
    #[serde(default = "default_token")]
    pub token: String,
    #[serde(default)]
    pub network: Option<String>,
}

fn default_token() -> String {
    "usdc".to_string()
}

#[derive(Debug, Deserialize)]
pub struct WalletSendArgs {
    pub to: String,
    pub amount: String,
    #[serde(default = "default_token")]
    pub token: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WalletHistoryArgs {
    #[serde(default)]
    pub limit: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The closed tool enum
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub enum ToolCall {
    SetGoal(SetGoalArgs),
    CreateSubgoal(CreateSubgoalArgs),
    UpdateProgress(UpdateProgressArgs),
    CompleteGoal(GoalIdArgs),
    AbandonGoal(GoalIdArgs),
    Propose(ProposeArgs),
    Vote(VoteArgs),
    CreateWorker(CreateWorkerArgs),
    UpdateWorker(UpdateWorkerArgs),
    ScheduleTask(ScheduleTaskArgs),
    Remember(RememberArgs),
    Recall(RecallArgs),
    SendMessage(SendMessageArgs),
    ConfigureRoom(ConfigureRoomArgs),
    WebSearch(WebSearchArgs),
    WebFetch(WebFetchArgs),
    Browser(BrowserArgs),
    WalletBalance(WalletBalanceArgs),
    WalletSend(WalletSendArgs),
    WalletHistory(WalletHistoryArgs),
}

fn args<T: serde::de::DeserializeOwned>(name: &str, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::invalid_input(format!("bad arguments for {name}: {e}")))
}

impl ToolCall {
    /// Parse one invocation. Unknown names are `invalid_input`.
    pub fn parse(invocation: ToolInvocation) -> Result<Self> {
        let ToolInvocation { name, arguments } = invocation;
        let call = match name.as_str() {
            "set_goal" => Self::SetGoal(args(&name, arguments)?),
            "create_subgoal" => Self::CreateSubgoal(args(&name, arguments)?),
            "update_progress" => Self::UpdateProgress(args(&name, arguments)?),
            "complete_goal" => Self::CompleteGoal(args(&name, arguments)?),
            "abandon_goal" => Self::AbandonGoal(args(&name, arguments)?),
            "propose" => Self::Propose(args(&name, arguments)?),
            "vote" => Self::Vote(args(&name, arguments)?),
            "create_worker" => Self::CreateWorker(args(&name, arguments)?),
            "update_worker" => Self::UpdateWorker(args(&name, arguments)?),
            "schedule_task" => Self::ScheduleTask(args(&name, arguments)?),
            "remember" => Self::Remember(args(&name, arguments)?),
            "recall" => Self::Recall(args(&name, arguments)?),
            "send_message" => Self::SendMessage(args(&name, arguments)?),
            "configure_room" => Self::ConfigureRoom(args(&name, arguments)?),
            "web_search" => Self::WebSearch(args(&name, arguments)?),
            "web_fetch" => Self::WebFetch(args(&name, arguments)?),
            "browser" => Self::Browser(args(&name, arguments)?),
            "wallet_balance" => Self::WalletBalance(args(&name, arguments)?),
            "wallet_send" => Self::WalletSend(args(&name, arguments)?),
            "wallet_history" => Self::WalletHistory(args(&name, arguments)?),
            other => {
                return Err(Error::invalid_input(format!("unknown tool {other:?}")));
            }
        };
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetGoal(_) => "set_goal",
            Self::CreateSubgoal(_) => "create_subgoal",
            Self::UpdateProgress(_) => "update_progress",
            Self::CompleteGoal(_) => "complete_goal",
            Self::AbandonGoal(_) => "abandon_goal",
            Self::Propose(_) => "propose",
            Self::Vote(_) => "vote",
            Self::CreateWorker(_) => "create_worker",
            Self::UpdateWorker(_) => "update_worker",
            Self::ScheduleTask(_) => "schedule_task",
            Self::Remember(_) => "remember",
            Self::Recall(_) => "recall",
            Self::SendMessage(_) => "send_message",
            Self::ConfigureRoom(_) => "configure_room",
            Self::WebSearch(_) => "web_search",
            Self::WebFetch(_) => "web_fetch",
            Self::Browser(_) => "browser",
            Self::WalletBalance(_) => "wallet_balance",
            Self::WalletSend(_) => "wallet_send",
            Self::WalletHistory(_) => "wallet_history",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scope guards
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn goal_in_room(state: &EngineState, room_id: i64, goal_id: i64) -> Result<()> {
    let goal = state
        .store
        .goal(goal_id)?
        .ok_or_else(|| Error::not_found(format!("goal {goal_id}")))?;
    if goal.room_id != room_id {
        return Err(Error::Scope(format!("goal {goal_id} belongs to another room")));
    }
    Ok(())
}

fn worker_in_room(state: &EngineState, room_id: i64, worker_id: i64) -> Result<Worker> {
    let worker = state
        .store
        .worker(worker_id)?
        .ok_or_else(|| Error::not_found(format!("worker {worker_id}")))?;
    if worker.room_id != Some(room_id) {
        return Err(Error::Scope(format!("worker {worker_id} belongs to another room")));
    }
    Ok(worker)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Apply one tool call on behalf of `worker` in `room`. The JSON result
/// goes back to the executor as the tool result.
pub async fn dispatch(
    state: &EngineState,
    room_id: i64,
    worker: &Worker,
    call: ToolCall,
) -> Result<serde_json::Value> {
    match call {
        ToolCall::SetGoal(a) => {
            let goal = state.store.set_objective_goal(room_id, &a.description)?;
            state.events.publish(EngineEvent::GoalChanged { room_id, goal_id: goal.id });
            Ok(serde_json::json!({ "goal_id": goal.id }))
        }
        ToolCall::CreateSubgoal(a) => {
            goal_in_room(state, room_id, a.parent_goal_id)?;
            let goals =
                state
                    .store
                    .decompose_goal(a.parent_goal_id, &a.descriptions, Some(worker.id))?;
            state.events.publish(EngineEvent::GoalChanged {
                room_id,
                goal_id: a.parent_goal_id,
            });
            Ok(serde_json::json!({
                "goal_ids": goals.iter().map(|g| g.id).collect::<Vec<_>>()
            }))
        }
        ToolCall::UpdateProgress(a) => {
            goal_in_room(state, room_id, a.goal_id)?;
            let goal = state.store.update_goal_progress(
                a.goal_id,
                a.metric_value,
                &a.observation,
                Some(worker.id),
            )?;
            state.events.publish(EngineEvent::GoalChanged { room_id, goal_id: goal.id });
            Ok(serde_json::json!({
                "goal_id": goal.id,
                "progress": goal.progress,
                "status": goal.status,
            }))
        }
        ToolCall::CompleteGoal(a) => {
            goal_in_room(state, room_id, a.goal_id)?;
            let goal = state.store.complete_goal(a.goal_id, Some(worker.id))?;
            state.events.publish(EngineEvent::GoalChanged { room_id, goal_id: goal.id });
            Ok(serde_json::json!({ "goal_id": goal.id, "status": goal.status }))
        }
        ToolCall::AbandonGoal(a) => {
            goal_in_room(state, room_id, a.goal_id)?;
            let goal = state.store.abandon_goal(a.goal_id, Some(worker.id))?;
            state.events.publish(EngineEvent::GoalChanged { room_id, goal_id: goal.id });
            Ok(serde_json::json!({ "goal_id": goal.id, "status": goal.status }))
        }
        ToolCall::Propose(a) => {
            let decision = quorum::propose(
                state,
                room_id,
                Some(worker.id),
                &a.proposal,
                a.decision_type,
                a.threshold,
                a.min_voters,
                a.sealed,
            )
            .await?;
            Ok(serde_json::json!({
                "decision_id": decision.id,
                "status": decision.status,
            }))
        }
        ToolCall::Vote(a) => {
            let decision = state
                .store
                .decision(a.decision_id)?
                .ok_or_else(|| Error::not_found(format!("decision {}", a.decision_id)))?;
            if decision.room_id != room_id {
                return Err(Error::Scope(format!(
                    "decision {} belongs to another room",
                    a.decision_id
                )));
            }
            let after =
                quorum::cast_vote(state, a.decision_id, worker.id, a.value, a.reasoning.as_deref())
                    .await?;
            Ok(serde_json::json!({ "decision_id": after.id, "status": after.status }))
        }
        ToolCall::CreateWorker(a) => {
            let new = state.store.create_worker(&NewWorker {
                room_id: Some(room_id),
                name: a.name,
                role: a.role,
                system_prompt: a.system_prompt,
                model: a.model,
                is_default: false,
                cycle_gap_ms: a.cycle_gap_ms,
                max_turns: a.max_turns,
            })?;
            crate::runtime::agent_loop::start_worker_if_room_active(state, room_id, new.id)?;
            Ok(serde_json::json!({ "worker_id": new.id }))
        }
        ToolCall::UpdateWorker(a) => {
            worker_in_room(state, room_id, a.worker_id)?;
            let patch = WorkerPatch {
                name: a.name,
                role: a.role,
                system_prompt: a.system_prompt,
                model: a.model.map(Some),
                cycle_gap_ms: a.cycle_gap_ms.map(Some),
                max_turns: a.max_turns.map(Some),
            };
            let updated = state.store.update_worker(a.worker_id, &patch)?;
            Ok(serde_json::json!({ "worker_id": updated.id }))
        }
        ToolCall::ScheduleTask(a) => {
            if a.trigger == TriggerType::Cron {
                let expr = a
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| Error::invalid_input("cron task needs a cron expression"))?;
                cron::validate_cron(expr)?;
            }
            let webhook_token = (a.trigger == TriggerType::Webhook)
                .then(crate::runtime::rooms::generate_token);
            let task = state.store.create_task(&NewTask {
                room_id: Some(room_id),
                worker_id: Some(worker.id),
                name: a.name,
                prompt: a.prompt,
                trigger: a.trigger,
                cron_expression: a.cron_expression,
                scheduled_at: a.scheduled_at,
                executor: state.config.source_tag.clone(),
                max_runs: a.max_runs,
                session_continuity: a.session_continuity,
                timeout_minutes: a.timeout_minutes.unwrap_or(30),
                max_turns: a.max_turns,
                allowed_tools: Vec::new(),
                disallowed_tools: Vec::new(),
                webhook_token,
            })?;
            state.nudges.nudge_tasks_changed();
            Ok(serde_json::json!({
                "task_id": task.id,
                "webhook_token": task.webhook_token,
            }))
        }
        ToolCall::Remember(a) => {
            let entity = state.store.upsert_entity(
                Some(room_id),
                &a.entity,
                a.entity_type.unwrap_or(EntityType::Fact),
                a.category.as_deref(),
            )?;
            let observation = state.store.add_observation(
                entity.id,
                &a.content,
                a.source.as_deref().or(Some("cycle")),
            )?;
            if let Err(e) = state.memsearch.index(observation.id, &a.content).await {
                tracing::debug!(error = %e, "semantic index unavailable");
            }
            Ok(serde_json::json!({ "entity_id": entity.id, "observation_id": observation.id }))
        }
        ToolCall::Recall(a) => {
            let hits =
                memory::recall(state, Some(room_id), &a.query, a.limit.unwrap_or(8)).await?;
            Ok(serde_json::json!({
                "results": hits
                    .iter()
                    .map(|h| serde_json::json!({
                        "entity": h.entity_name,
                        "content": h.content,
                        "score": h.score,
                    }))
                    .collect::<Vec<_>>()
            }))
        }
        ToolCall::SendMessage(a) => {
            let recipient = if a.to.eq_ignore_ascii_case("keeper") {
                None
            } else {
                let target = state
                    .store
                    .worker_by_name(room_id, &a.to)?
                    .ok_or_else(|| Error::not_found(format!("worker {:?}", a.to)))?;
                Some(target.id)
            };
            let message =
                state
                    .store
                    .send_room_message(room_id, &worker.name, recipient, &a.body)?;
            state.events.publish(EngineEvent::MessagePosted { room_id });
            if let Some(worker_id) = recipient {
                state.nudges.nudge_worker(worker_id);
            }
            Ok(serde_json::json!({ "message_id": message.id }))
        }
        ToolCall::ConfigureRoom(a) => {
            crate::runtime::rooms::configure_room(state, room_id, &a)?;
            Ok(serde_json::json!({ "configured": true }))
        }
        ToolCall::WebSearch(a) => {
            let results = state.web.search(&a.query).await?;
            Ok(serde_json::json!({ "results": results }))
        }
        ToolCall::WebFetch(a) => {
            let body = state.web.fetch(&a.url).await?;
            Ok(serde_json::json!({ "body": body }))
        }
        ToolCall::Browser(a) => {
            let page = state.web.browse(&a.actions).await?;
            Ok(serde_json::json!({ "page": page }))
        }
        ToolCall::WalletBalance(a) => {
            let balance = state
                .wallet
                .balance(room_id, &a.token, a.network.as_deref())
                .await?;
            Ok(serde_json::json!({ "balance": balance, "token": a.token }))
        }
        ToolCall::WalletSend(a) => {
            let tx = state
                .wallet
                .send_token(
                    room_id,
                    &a.to,
                    &a.amount,
                    &a.token,
                    a.network.as_deref(),
                    a.description.as_deref(),
                )
                .await?;
            state.events.publish(EngineEvent::WalletActivity { room_id });
            Ok(serde_json::json!({ "tx_hash": tx.tx_hash, "status": tx.status }))
        }
        ToolCall::WalletHistory(a) => {
            let history = state.wallet.history(room_id, a.limit.unwrap_or(20))?;
            Ok(serde_json::json!({
                "transactions": history
                    .iter()
                    .map(|t| serde_json::json!({
                        "type": t.tx_type,
                        "amount": t.amount,
                        "counterparty": t.counterparty,
                        "status": t.status,
                        "tx_hash": t.tx_hash,
                    }))
                    .collect::<Vec<_>>()
            }))
        }
    }
}

/// Schemas for the full queen surface, handed to the executor.
pub fn tool_schemas() -> Vec<ToolSchema> {
    fn schema(name: &str, description: &str, required: &[(&str, &str)]) -> ToolSchema {
        let properties: serde_json::Map<String, serde_json::Value> = required
            .iter()
            .map(|(field, ty)| ((*field).to_string(), serde_json::json!({ "type": ty })))
            .collect();
        ToolSchema {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
            }),
        }
    }

    vec![
        schema("set_goal", "Create a root goal for the room", &[("description", "string")]),
        schema(
            "create_subgoal",
            "Decompose a goal into subgoals",
            &[("parent_goal_id", "integer"), ("descriptions", "array")],
        ),
        schema(
            "update_progress",
            "Record progress on a leaf goal (fraction or percent)",
            &[("goal_id", "integer"), ("metric_value", "number"), ("observation", "string")],
        ),
        schema("complete_goal", "Mark a goal completed", &[("goal_id", "integer")]),
        schema("abandon_goal", "Abandon a goal", &[("goal_id", "integer")]),
        schema(
            "propose",
            "Open a quorum decision",
            &[("proposal", "string"), ("decision_type", "string")],
        ),
        schema(
            "vote",
            "Vote on an open decision",
            &[("decision_id", "integer"), ("value", "string"), ("reasoning", "string")],
        ),
        schema(
            "create_worker",
            "Add a worker to the room",
            &[("name", "string"), ("role", "string"), ("system_prompt", "string")],
        ),
        schema("update_worker", "Update a worker's configuration", &[("worker_id", "integer")]),
        schema(
            "schedule_task",
            "Schedule a delegated task (cron, once, manual, webhook)",
            &[("name", "string"), ("prompt", "string"), ("trigger", "string")],
        ),
        schema(
            "remember",
            "Store a memory observation",
            &[("entity", "string"), ("content", "string")],
        ),
        schema("recall", "Search room memory", &[("query", "string")]),
        schema(
            "send_message",
            "Message the keeper or a worker by name",
            &[("to", "string"), ("body", "string")],
        ),
        schema("configure_room", "Adjust room configuration", &[]),
        schema("web_search", "Search the web", &[("query", "string")]),
        schema("web_fetch", "Fetch a URL", &[("url", "string")]),
        schema("browser", "Run a browser action sequence", &[("actions", "array")]),
        schema("wallet_balance", "Read the room wallet balance", &[("token", "string")]),
        schema(
            "wallet_send",
            "Send tokens from the room wallet",
            &[("to", "string"), ("amount", "string"), ("token", "string")],
        ),
        schema("wallet_history", "List recent wallet transactions", &[]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_is_invalid_input() {
        let err = ToolCall::parse(ToolInvocation {
            name: "rm_rf".into(),
            arguments: serde_json::json!({}),
        })
        .unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidInput);
    }

    #[test]
    fn bad_arguments_are_invalid_input() {
        let err = ToolCall::parse(ToolInvocation {
            name: "update_progress".into(),
            arguments: serde_json::json!({ "goal_id": "not a number" }),
        })
        .unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidInput);
    }

    #[test]
    fn every_surface_tool_parses() {
        let cases = vec![
            ("set_goal", serde_json::json!({"description": "x"})),
            (
                "create_subgoal",
                serde_json::json!({"parent_goal_id": 1, "descriptions": ["a"]}),
            ),
            (
                "update_progress",
                serde_json::json!({"goal_id": 1, "metric_value": 50.0}),
            ),
            ("complete_goal", serde_json::json!({"goal_id": 1})),
            ("abandon_goal", serde_json::json!({"goal_id": 1})),
            (
                "propose",
                serde_json::json!({"proposal": "x", "decision_type": "resource"}),
            ),
            ("vote", serde_json::json!({"decision_id": 1, "value": "yes"})),
            (
                "create_worker",
                serde_json::json!({"name": "w", "role": "r", "system_prompt": "s"}),
            ),
            ("update_worker", serde_json::json!({"worker_id": 1})),
            (
                "schedule_task",
                serde_json::json!({"name": "t", "prompt": "p", "trigger": "manual"}),
            ),
            ("remember", serde_json::json!({"entity": "e", "content": "c"})),
            ("recall", serde_json::json!({"query": "q"})),
            ("send_message", serde_json::json!({"to": "keeper", "body": "b"})),
            ("configure_room", serde_json::json!({})),
            ("web_search", serde_json::json!({"query": "q"})),
            ("web_fetch", serde_json::json!({"url": "https://example.com"})),
            ("browser", serde_json::json!({"actions": []})),
            ("wallet_balance", serde_json::json!({})),
            (
                "wallet_send",
                serde_json::json!({"to": "0xabc", "amount": "1"}),
            ),
            ("wallet_history", serde_json::json!({})),
        ];
        for (name, arguments) in cases {
            let call = ToolCall::parse(ToolInvocation {
                name: name.into(),
                arguments,
            })
            .unwrap_or_else(|e| panic!("{name} should parse: {e}"));
            assert_eq!(call.name(), name);
        }
    }

    #[test]
    fn schemas_cover_the_surface() {
        let schemas = tool_schemas();
        assert_eq!(schemas.len(), 20);
        assert!(schemas.iter().any(|s| s.name == "wallet_send"));
        assert!(schemas.iter().all(|s| !s.description.is_empty()));
    }
}
