//! Picks the probe for a server and turns its outcome into display text.

use crate::{
    conf::is_internal_address,
    players::extract_player_count,
    probe::{
        run_probe, A2sProbe, BedrockProbe, JavaProbe, Probe, ProbeReply, ProbeResult, RconProbe,
        TerrariaProbe, NOT_AVAILABLE,
    },
    session::SessionCache,
    variables::{resolve_max_players, resolve_password, resolve_port, VariableTable},
    Endpoint, GameProtocolConfig, MonitorSettings, Protocol, QueryErr, SocketConf,
};
use regex::Regex;

/// The slice of a server record the dispatcher needs.
#[derive(Debug, Clone, Copy)]
pub struct ServerTarget<'a> {
    pub uuid: &'a str,
    pub game_name: &'a str,
    pub variables: &'a VariableTable,
    /// The server's default allocation.
    pub allocation: &'a Endpoint,
}

/// Build the probe for a connectionless protocol. RCON needs a session and is built separately.
pub fn build_probe(
    protocol: Protocol,
    endpoint: Endpoint,
    socket_conf: SocketConf,
) -> Option<Box<dyn Probe>> {
    match protocol {
        Protocol::A2S => Some(Box::new(A2sProbe::create(endpoint, socket_conf))),
        Protocol::MinecraftJava => Some(Box::new(JavaProbe::create(endpoint, socket_conf))),
        Protocol::MinecraftBedrock => Some(Box::new(BedrockProbe::create(endpoint, socket_conf))),
        Protocol::Terraria => Some(Box::new(TerrariaProbe::create(endpoint, socket_conf))),
        Protocol::Rcon => None,
    }
}

/// Query one server with its game's protocol.
///
/// Returns `None` when the probe was skipped (no config, unresolved port or
/// password, no external IP), in which case the previous display value stays.
pub async fn dispatch(
    config: Option<&GameProtocolConfig>,
    target: ServerTarget<'_>,
    settings: &MonitorSettings,
    sessions: &SessionCache,
) -> Option<String> {
    let Some(config) = config else {
        tracing::debug!("No protocol config for game '{}', skipping {}", target.game_name, target.uuid);
        return None;
    };

    let max_players = resolve_max_players(
        config.max_player_variable.as_deref(),
        config.max_player_static.as_deref(),
        target.variables,
    );

    match config.protocol {
        Protocol::A2S | Protocol::MinecraftJava | Protocol::MinecraftBedrock => {
            let port = resolve_port(
                config.query_port_variable.as_deref(),
                config.protocol.default_port_variable(),
                target.variables,
                target.allocation.port,
            );

            if port == 0 {
                tracing::debug!("No query port for {}, skipping", target.uuid);
                return None;
            }

            let endpoint = Endpoint::create(&public_ip(target, settings)?, port);
            let mut probe = build_probe(config.protocol, endpoint, settings.socket)?;
            let outcome = run_probe(probe.as_mut()).await;

            log_failure(config.protocol, target, &outcome);

            Some(ProbeResult::from_outcome(&outcome, probe.failure_sentinel()).into_string())
        }
        Protocol::Terraria => {
            let port = match resolve_port(
                config.query_port_variable.as_deref(),
                config.protocol.default_port_variable(),
                target.variables,
                target.allocation.port,
            ) {
                0 => target.allocation.port,
                port => port,
            };

            if port == 0 {
                tracing::debug!("No port for {}, skipping", target.uuid);
                return None;
            }

            let endpoint = Endpoint::create(&public_ip(target, settings)?, port);
            let mut probe = build_probe(config.protocol, endpoint, settings.socket)?;
            let outcome = run_probe(probe.as_mut()).await;

            log_failure(config.protocol, target, &outcome);

            match outcome {
                Ok(ProbeReply::Reachable) if max_players > 0 => Some(format!("?/{}", max_players)),
                outcome => {
                    Some(ProbeResult::from_outcome(&outcome, probe.failure_sentinel()).into_string())
                }
            }
        }
        Protocol::Rcon => query_rcon(config, target, settings, sessions, max_players).await,
    }
}

async fn query_rcon(
    config: &GameProtocolConfig,
    target: ServerTarget<'_>,
    settings: &MonitorSettings,
    sessions: &SessionCache,
    max_players: u32,
) -> Option<String> {
    let port = resolve_port(
        config.rcon_port_variable.as_deref(),
        Protocol::Rcon.default_port_variable(),
        target.variables,
        target.allocation.port,
    );
    let password = resolve_password(
        config.rcon_password_variable.as_deref(),
        config.rcon_password_static.as_deref(),
        target.variables,
    );

    let (port, password) = match (port, password) {
        (0, _) | (_, None) => {
            tracing::debug!("RCON port or password missing for {}, skipping", target.uuid);
            return None;
        }
        (port, Some(password)) => (port, password),
    };

    let Some(command) = config.command.as_deref().filter(|c| !c.trim().is_empty()) else {
        tracing::debug!("No RCON command configured for game '{}', skipping", config.game_name);
        return None;
    };

    let endpoint = Endpoint::create(&rcon_ip(target, settings), port);
    let custom_pattern = config
        .player_count_regex
        .as_deref()
        .and_then(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(err) => {
                tracing::warn!("Ignoring invalid player count pattern '{}': {}", pattern, err);
                None
            }
        });

    let session = match sessions.get(&endpoint, &password, &settings.socket).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!("RCON connect to {} failed ({}): {}", endpoint, err.reason(), err);
            return Some(NOT_AVAILABLE.into());
        }
    };

    let mut probe = RconProbe::create(session, command, None);
    let outcome = run_probe(&mut probe).await;

    match outcome {
        Ok(ProbeReply::Text(text)) => {
            let count = extract_player_count(Some(&text), custom_pattern.as_ref());

            Some(match max_players {
                0 => format!("{}/Unknown", count),
                max => format!("{}/{}", count, max),
            })
        }
        Ok(other) => {
            tracing::warn!("Unexpected RCON reply from {}: {:?}", endpoint, other);
            Some(NOT_AVAILABLE.into())
        }
        Err(err) => {
            tracing::warn!("RCON command on {} failed ({}): {}", endpoint, err.reason(), err);

            if err.is_transport() || matches!(err, QueryErr::Malformed(_)) {
                sessions.evict(&endpoint).await;
            }

            Some(NOT_AVAILABLE.into())
        }
    }
}

/// Address to probe from outside. Every query protocol requires a configured external IP.
fn public_ip(target: ServerTarget<'_>, settings: &MonitorSettings) -> Option<String> {
    let Some(external_ip) = settings.external_ip() else {
        tracing::debug!("No external IP configured, skipping {}", target.uuid);
        return None;
    };

    if is_internal_address(&target.allocation.ip) {
        Some(external_ip.into())
    } else {
        Some(target.allocation.ip.clone())
    }
}

/// RCON targets the allocation directly unless it is internal and an external IP is set.
fn rcon_ip(target: ServerTarget<'_>, settings: &MonitorSettings) -> String {
    match settings.external_ip() {
        Some(external_ip) if is_internal_address(&target.allocation.ip) => external_ip.into(),
        _ => target.allocation.ip.clone(),
    }
}

fn log_failure(protocol: Protocol, target: ServerTarget<'_>, outcome: &Result<ProbeReply, QueryErr>) {
    if let Err(err) = outcome {
        tracing::warn!("{} query for {} failed ({}): {}", protocol, target.uuid, err.reason(), err);
    }
}
