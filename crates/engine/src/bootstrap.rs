//! EngineState construction and background-task spawning shared by the
//! server path and tests.

use std::sync::Arc;

use qr_domain::{EngineConfig, Error, Result};
use qr_executor::{AgentExecutor, CancelMap};
use qr_store::Store;
use qr_wallet::{ChainRpc, NoChain, TokenTable, WalletService};

use crate::events::EventBus;
use crate::nudge::NudgeMap;
use crate::runtime::agent_loop::LoopRegistry;
use crate::runtime::rate_limit::RateLimiter;
use crate::runtime::task_runner::RoomGates;
use crate::runtime::{agent_loop, scheduler, watcher};
use crate::shims::cloud::{CloudClient, NoopCloud, UpdateDiagnostics};
use crate::shims::memsearch::{MemorySearch, NoopMemorySearch};
use crate::shims::station::{NoopStations, StationProvider};
use crate::shims::web::{HttpWebRunner, WebRunner};
use crate::state::EngineState;

/// External collaborators, swappable for tests.
pub struct Collaborators {
    pub executor: Arc<dyn AgentExecutor>,
    pub chain: Arc<dyn ChainRpc>,
    pub cloud: Arc<dyn CloudClient>,
    pub stations: Arc<dyn StationProvider>,
    pub memsearch: Arc<dyn MemorySearch>,
    pub web: Arc<dyn WebRunner>,
}

impl Collaborators {
    /// Local defaults: a CLI agent runtime, no chain endpoint, no cloud.
    /// The agent CLI program comes from `QUOROOM_AGENT_CLI` (default
    /// `agent`).
    pub fn local() -> Self {
        let program =
            std::env::var("QUOROOM_AGENT_CLI").unwrap_or_else(|_| "agent".to_string());
        Self {
            executor: Arc::new(qr_executor::cli::CliExecutor::new(program, Vec::new())),
            chain: Arc::new(NoChain),
            cloud: Arc::new(NoopCloud),
            stations: Arc::new(NoopStations),
            memsearch: Arc::new(NoopMemorySearch),
            web: Arc::new(HttpWebRunner::new()),
        }
    }
}

/// Open the store, wire every subsystem, and return a fully-built state.
pub fn build_state(config: EngineConfig, collab: Collaborators) -> Result<EngineState> {
    config.validate()?;
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.results_dir)?;

    let store = Store::open(&config.db_path)?;
    tracing::info!(db = %config.db_path.display(), "store ready");

    let wallet_secret = load_or_create_secret(&config)?;
    let wallet = Arc::new(WalletService::new(
        store.clone(),
        collab.chain,
        TokenTable::builtin(),
        &wallet_secret,
        "base",
    ));
    tracing::info!("wallet service ready");

    let diagnostics = Arc::new(UpdateDiagnostics::new(config.update_source_url.clone()));
    let api_token = crate::runtime::rooms::generate_token();

    Ok(EngineState {
        config: Arc::new(config),
        store,
        executor: collab.executor,
        wallet,
        events: EventBus::new(),
        nudges: Arc::new(NudgeMap::new()),
        cancels: Arc::new(CancelMap::new()),
        loops: Arc::new(LoopRegistry::new()),
        gates: Arc::new(RoomGates::new()),
        limiter: Arc::new(RateLimiter::webhook()),
        cloud: collab.cloud,
        stations: collab.stations,
        memsearch: collab.memsearch,
        web: collab.web,
        diagnostics,
        api_token: Arc::new(api_token),
    })
}

/// Spawn everything long-running: schedulers, watcher reconciler, and
/// agent loops for every active room.
pub fn start_background(state: &EngineState) -> Result<()> {
    scheduler::spawn(state);
    tracing::info!("schedulers ready");

    let watchers = Arc::new(watcher::WatcherSet::new());
    watchers.sync(state)?;
    watcher::spawn(state, watchers.clone());
    tracing::info!(watchers = watchers.active_count(), "file watchers ready");

    agent_loop::start_all_active(state)?;
    tracing::info!(loops = state.loops.active_count(), "agent loops ready");

    let tokens = Arc::new(crate::shims::cloud::CloudTokenFile::load(
        state.config.cloud_tokens_file(),
    ));
    crate::shims::cloud::spawn_sync(state, tokens);
    tracing::info!("cloud sync ready");
    Ok(())
}

/// The wallet encryption secret lives in a sidecar created on first
/// boot, so keys survive restarts.
fn load_or_create_secret(config: &EngineConfig) -> Result<String> {
    let path = config.data_dir.join("wallet.secret");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }
    let secret = crate::runtime::rooms::generate_token();
    std::fs::write(&path, &secret)
        .map_err(|e| Error::internal(format!("cannot write wallet secret: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_stable_across_boots() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::with_data_dir(dir.path().to_path_buf());
        std::fs::create_dir_all(&config.data_dir).unwrap();
        let a = load_or_create_secret(&config).unwrap();
        let b = load_or_create_secret(&config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
