//! Wire-level probes, one per supported game protocol.
//!
//! Every probe follows the same lifecycle: [Probe::connect] opens the socket,
//! [Probe::query] performs one exchange and [Probe::release] drops the socket.
//! Network failures come back as a [QueryErr] naming the reason; only
//! [QueryErr::NotConnected] signals a usage bug.

mod a2s;
mod bedrock;
mod java;
mod rcon;
mod terraria;

pub use a2s::*;
pub use bedrock::*;
pub use java::*;
pub use rcon::*;
pub use terraria::*;

use crate::QueryErr;
use async_trait::async_trait;

/// Display value for any failed probe.
pub const NOT_AVAILABLE: &str = "N/A";
/// Display value for a reachable server without a player count.
pub const ONLINE: &str = "Online";
/// Display value for an unreachable server without a player count.
pub const OFFLINE: &str = "Offline";

/// What a probe learned from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    /// Online and max player counts.
    Players { online: u32, max: u32 },
    /// Raw console output (RCON).
    Text(String),
    /// The server accepted a connection and nothing more.
    Reachable,
}

#[async_trait]
pub trait Probe: Send {
    /// Open the underlying socket.
    async fn connect(&mut self) -> Result<(), QueryErr>;

    /// Perform one query. Fails with [QueryErr::NotConnected] before [Probe::connect].
    async fn query(&mut self) -> Result<ProbeReply, QueryErr>;

    /// Drop the underlying socket.
    fn release(&mut self);

    /// Display value used when the probe fails.
    fn failure_sentinel(&self) -> &'static str {
        NOT_AVAILABLE
    }
}

/// Run the full connect, query and release cycle of a probe.
pub async fn run_probe(probe: &mut dyn Probe) -> Result<ProbeReply, QueryErr> {
    let outcome = match probe.connect().await {
        Ok(()) => probe.query().await,
        Err(err) => Err(err),
    };

    probe.release();

    outcome
}

/// Plain-text probe result as shown to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult(String);

impl ProbeResult {
    /// Map a probe outcome to its display value, logging the failure reason.
    pub fn from_outcome(outcome: &Result<ProbeReply, QueryErr>, failure_sentinel: &str) -> Self {
        match outcome {
            Ok(ProbeReply::Players { online, max }) => Self(format!("{}/{}", online, max)),
            Ok(ProbeReply::Text(text)) => Self(text.clone()),
            Ok(ProbeReply::Reachable) => Self(ONLINE.into()),
            Err(err) => {
                tracing::debug!("Probe failed ({}): {}", err.reason(), err);
                Self(failure_sentinel.into())
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether this is one of the failure sentinels.
    pub fn is_failure(&self) -> bool {
        self.0 == NOT_AVAILABLE || self.0 == OFFLINE
    }
}

impl std::fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
