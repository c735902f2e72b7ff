//! Shared engine state passed into every runtime component and API
//! handler. Global singletons become explicit dependencies built once in
//! `bootstrap`; no module-scoped mutables.

use std::sync::Arc;

use qr_domain::EngineConfig;
use qr_executor::{AgentExecutor, CancelMap};
use qr_store::Store;
use qr_wallet::WalletService;

use crate::events::EventBus;
use crate::nudge::NudgeMap;
use crate::runtime::agent_loop::LoopRegistry;
use crate::runtime::rate_limit::RateLimiter;
use crate::runtime::task_runner::RoomGates;
use crate::shims::cloud::{CloudClient, UpdateDiagnostics};
use crate::shims::memsearch::MemorySearch;
use crate::shims::station::StationProvider;
use crate::shims::web::WebRunner;

/// Shared application state. Fields are grouped by concern:
/// - **Core** — config, store, executor, wallet
/// - **Coordination** — event bus, nudges, cancellation, loop registry
/// - **Scheduling** — per-room concurrency gates, webhook rate limiter
/// - **Collaborators** — cloud, stations, semantic memory, web tools
#[derive(Clone)]
pub struct EngineState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<EngineConfig>,
    pub store: Store,
    pub executor: Arc<dyn AgentExecutor>,
    pub wallet: Arc<WalletService>,

    // ── Coordination ──────────────────────────────────────────────────
    pub events: EventBus,
    pub nudges: Arc<NudgeMap>,
    pub cancels: Arc<CancelMap>,
    pub loops: Arc<LoopRegistry>,

    // ── Scheduling ────────────────────────────────────────────────────
    pub gates: Arc<RoomGates>,
    pub limiter: Arc<RateLimiter>,

    // ── Collaborators ─────────────────────────────────────────────────
    pub cloud: Arc<dyn CloudClient>,
    pub stations: Arc<dyn StationProvider>,
    pub memsearch: Arc<dyn MemorySearch>,
    pub web: Arc<dyn WebRunner>,
    pub diagnostics: Arc<UpdateDiagnostics>,

    /// Local API token, also written to the `api.token` sidecar.
    pub api_token: Arc<String>,
}

impl EngineState {
    /// Cancellation key for a worker loop.
    pub fn worker_key(worker_id: i64) -> String {
        format!("worker:{worker_id}")
    }

    /// Cancellation key for a task run.
    pub fn run_key(run_id: i64) -> String {
        format!("run:{run_id}")
    }

    /// Cancellation group key for a room.
    pub fn room_key(room_id: i64) -> String {
        format!("room:{room_id}")
    }
}
