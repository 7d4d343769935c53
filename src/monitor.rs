//! One polling cycle over a batch of monitored servers.
//!
//! Stats are fetched under a concurrency gate, then each running server is
//! queried in list order and fed to its idle timer. The session cache and
//! the idle timers live in a [MonitorContext] owned by the [Monitor], so
//! cycles must not overlap; `poll` takes `&mut self` to enforce that.

use crate::{
    dispatch::{dispatch, ServerTarget},
    session::SessionCache,
    tracker::{parse_display_count, parse_idle_timeout, PowerAction, ServerState, ShutdownTracker},
    variables::VariableTable,
    Endpoint, GameProtocolConfig, MonitorSettings, PowerSignal,
};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{sync::Semaphore, time::Instant};

/// Stats requests in flight at once.
pub const STATS_CONCURRENCY: usize = 5;

pub type CollaboratorErr = Box<dyn std::error::Error + Send + Sync>;

/// A server as known to the panel, plus its latest display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredServer {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    /// Egg name, matched against [GameProtocolConfig::game_name].
    pub game_name: String,
    #[serde(default)]
    pub variables: VariableTable,
    pub allocation: Endpoint,
    #[serde(default)]
    pub state: ServerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_count_text: Option<String>,
}

/// Live server state from the panel.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_state(&self, server: &MonitoredServer) -> Result<ServerState, CollaboratorErr>;
}

/// Issues power commands through the panel.
#[async_trait]
pub trait PowerSink: Send + Sync {
    async fn send_power(&self, server_id: &str, signal: PowerSignal) -> Result<(), CollaboratorErr>;
}

/// Result of one polling cycle.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub servers: Vec<MonitoredServer>,
    pub shutdowns: Vec<PowerAction>,
}

/// State that survives between polling cycles.
#[derive(Default)]
pub struct MonitorContext {
    pub sessions: SessionCache,
    pub tracker: ShutdownTracker,
}

pub struct Monitor {
    settings: MonitorSettings,
    games: Vec<GameProtocolConfig>,
    idle_timeout: Duration,
    context: MonitorContext,
}

impl Monitor {
    pub fn create(settings: MonitorSettings, games: Vec<GameProtocolConfig>) -> Self {
        let idle_timeout = parse_idle_timeout(&settings.empty_server_timeout);

        Self {
            settings,
            games,
            idle_timeout,
            context: MonitorContext::default(),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn context(&self) -> &MonitorContext {
        &self.context
    }

    /// Replace the game configs after an external reload.
    pub fn update_games(&mut self, games: Vec<GameProtocolConfig>) {
        self.games = games;
    }

    /// Replace the settings after an external reload.
    pub fn update_settings(&mut self, settings: MonitorSettings) {
        self.idle_timeout = parse_idle_timeout(&settings.empty_server_timeout);
        self.settings = settings;
    }

    /// Run one polling cycle.
    pub async fn poll<S>(&mut self, source: &S, mut servers: Vec<MonitoredServer>) -> PollOutcome
    where
        S: StatsSource + ?Sized,
    {
        let states = fetch_states(source, &servers, STATS_CONCURRENCY).await;
        let mut shutdowns = Vec::new();

        for (server, state) in servers.iter_mut().zip(states) {
            server.state = state;

            if self.settings.player_count_display && state.is_running() {
                let config = GameProtocolConfig::find(&self.games, &server.game_name);
                let target = ServerTarget {
                    uuid: &server.uuid,
                    game_name: &server.game_name,
                    variables: &server.variables,
                    allocation: &server.allocation,
                };

                if let Some(text) =
                    dispatch(config, target, &self.settings, &self.context.sessions).await
                {
                    server.player_count_text = Some(text);
                }
            }

            if !self.settings.auto_shutdown_enabled_for(&server.uuid) {
                self.context.tracker.untrack(&server.uuid);
                continue;
            }

            let player_count = parse_display_count(server.player_count_text.as_deref());

            if let Some(action) = self.context.tracker.observe(
                &server.uuid,
                state,
                player_count,
                self.idle_timeout,
                Instant::now(),
            ) {
                shutdowns.push(action);
            }
        }

        PollOutcome { servers, shutdowns }
    }

    /// Send every shutdown action, logging failures and carrying on.
    pub async fn issue<P>(&self, sink: &P, actions: &[PowerAction])
    where
        P: PowerSink + ?Sized,
    {
        for action in actions {
            match sink.send_power(&action.server_id, action.signal).await {
                Ok(()) => tracing::info!("Sent {} to server {}", action.signal, action.server_id),
                Err(err) => tracing::error!(
                    "Failed to send {} to server {}: {}",
                    action.signal,
                    action.server_id,
                    err
                ),
            }
        }
    }

    /// Close every cached session.
    pub async fn shutdown(self) {
        self.context.sessions.close_all().await;
    }
}

/// Fetch every server's state with at most `limit` requests in flight.
///
/// A failed fetch counts as [ServerState::Missing].
pub async fn fetch_states<S>(source: &S, servers: &[MonitoredServer], limit: usize) -> Vec<ServerState>
where
    S: StatsSource + ?Sized,
{
    let gate = Semaphore::new(limit.max(1));

    join_all(servers.iter().map(|server| {
        let gate = &gate;

        async move {
            let Ok(_permit) = gate.acquire().await else {
                return ServerState::Missing;
            };

            match source.fetch_state(server).await {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!("Failed to fetch stats for {}: {}", server.uuid, err);
                    ServerState::Missing
                }
            }
        }
    }))
    .await
}
