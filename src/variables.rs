//! Connection parameters pulled out of a server's panel variables.
//!
//! Every function here is a pure lookup: the same hint and table always
//! resolve to the same value. Each resolution path is logged at debug level.

use regex::Regex;
use std::{collections::HashMap, sync::OnceLock};

/// Per-server key/value variables as delivered by the panel.
pub type VariableTable = HashMap<String, String>;

/// Hint that refers to the server's primary allocation port.
pub const SERVER_PORT: &str = "SERVER_PORT";
/// Variable consulted for the RCON password when the config names none.
pub const DEFAULT_PASSWORD_VARIABLE: &str = "RCON_PASS";
/// Variable consulted for the player cap when the config names none.
pub const DEFAULT_MAX_PLAYERS_VARIABLE: &str = "MAX_PLAYERS";

fn offset_pattern() -> &'static Regex {
    static OFFSET: OnceLock<Regex> = OnceLock::new();

    OFFSET.get_or_init(|| {
        Regex::new(r"^SERVER_PORT\s*\+\s*(\d+)$").expect("valid port offset pattern")
    })
}

/// Resolve a port from a hint.
///
/// In order: `SERVER_PORT + N` adds `N` to the allocation port, `SERVER_PORT`
/// returns the allocation port, anything else names a variable (falling back
/// to `default_variable` when the hint is blank). Missing or unparseable
/// variables resolve to 0.
pub fn resolve_port(
    hint: Option<&str>,
    default_variable: &str,
    table: &VariableTable,
    allocation_port: u16,
) -> u16 {
    let hint = hint.map(str::trim).filter(|h| !h.is_empty());

    if let Some(hint) = hint {
        if let Some(offset) = offset_pattern()
            .captures(hint)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            let port = allocation_port as u32 + offset;

            return match u16::try_from(port) {
                Ok(port) => {
                    tracing::debug!("Port {} from '{}' (allocation {} + {})", port, hint, allocation_port, offset);
                    port
                }
                Err(_) => {
                    tracing::debug!("Port offset '{}' overflows allocation {}", hint, allocation_port);
                    0
                }
            };
        }

        if hint == SERVER_PORT {
            tracing::debug!("Port {} from allocation", allocation_port);
            return allocation_port;
        }
    }

    let variable = hint.unwrap_or(default_variable);

    match table.get(variable).map(|v| v.trim().parse::<u16>()) {
        Some(Ok(port)) => {
            tracing::debug!("Port {} from variable {}", port, variable);
            port
        }
        Some(Err(_)) => {
            tracing::debug!("Variable {} does not hold a port", variable);
            0
        }
        None => {
            tracing::debug!("Variable {} not set, no port", variable);
            0
        }
    }
}

/// Resolve the RCON password. A static password wins over any variable.
pub fn resolve_password(
    hint: Option<&str>,
    static_password: Option<&str>,
    table: &VariableTable,
) -> Option<String> {
    if let Some(password) = static_password.filter(|p| !p.is_empty()) {
        tracing::debug!("Using static RCON password");
        return Some(password.into());
    }

    let variable = hint
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or(DEFAULT_PASSWORD_VARIABLE);

    match table.get(variable).filter(|p| !p.is_empty()) {
        Some(password) => {
            tracing::debug!("RCON password from variable {}", variable);
            Some(password.clone())
        }
        None => {
            tracing::debug!("Variable {} not set, no RCON password", variable);
            None
        }
    }
}

/// Resolve the player cap, 0 when unknown. A numeric static value wins over any variable.
pub fn resolve_max_players(
    hint: Option<&str>,
    static_value: Option<&str>,
    table: &VariableTable,
) -> u32 {
    if let Some(max) = static_value.and_then(|v| v.trim().parse::<u32>().ok()) {
        tracing::debug!("Max players {} from static value", max);
        return max;
    }

    let variable = hint
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or(DEFAULT_MAX_PLAYERS_VARIABLE);

    match table.get(variable).and_then(|v| v.trim().parse::<u32>().ok()) {
        Some(max) => {
            tracing::debug!("Max players {} from variable {}", max, variable);
            max
        }
        None => {
            tracing::debug!("Variable {} does not hold a player cap", variable);
            0
        }
    }
}
