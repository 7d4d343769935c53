//! Multi-protocol game server query engine.
//!
//! Probes game servers over A2S, Minecraft Server List Ping, RakNet,
//! RCON or a bare TCP connect, turns the replies into player-count text
//! and tracks idle servers for automatic shutdown.

mod conf;
mod error;
mod share;
mod varint;

pub mod dispatch;
pub mod monitor;
pub mod players;
pub mod probe;
pub mod session;
pub mod tracker;
pub mod variables;

pub use conf::*;
pub use error::QueryErr;
pub use monitor::{Monitor, MonitoredServer, PollOutcome, PowerSink, StatsSource};
pub use probe::{Probe, ProbeReply, ProbeResult};
pub use session::SessionCache;
pub use tracker::{PowerAction, PowerSignal, ServerState, ShutdownTracker};
pub use varint::{decode_varint, encode_varint};
