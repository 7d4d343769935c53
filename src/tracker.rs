//! Idle timers deciding when an empty server may be shut down.

use crate::conf::DEFAULT_EMPTY_SERVER_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Lifecycle state of a server as reported by the panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Running,
    Starting,
    Stopping,
    Offline,
    /// The panel no longer knows the server, or its stats could not be fetched.
    #[default]
    Missing,
}

impl ServerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServerState::Running)
    }
}

/// Power signal sent to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerSignal {
    Stop,
}

impl std::fmt::Display for PowerSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerSignal::Stop => f.write_str("stop"),
        }
    }
}

/// A power command to issue for one server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PowerAction {
    pub server_id: String,
    pub signal: PowerSignal,
}

/// Parse an idle timeout such as `"1:00:00"`.
///
/// Accepts `h:mm`, `h:mm:ss`, `d:hh:mm:ss`, `d.hh:mm:ss` and a bare day count.
/// Invalid or zero values fall back to one hour with a warning.
pub fn parse_idle_timeout(value: &str) -> Duration {
    match parse_time_span(value.trim()) {
        Some(timeout) if !timeout.is_zero() => timeout,
        _ => {
            tracing::warn!(
                "Invalid empty server timeout '{}', using {}",
                value,
                DEFAULT_EMPTY_SERVER_TIMEOUT
            );
            DEFAULT_IDLE_TIMEOUT
        }
    }
}

fn parse_time_span(value: &str) -> Option<Duration> {
    let (days, clock) = match value.split_once('.') {
        Some((days, clock)) => (days.parse::<u64>().ok()?, clock),
        None => (0, value),
    };
    let parts = clock
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    let (days, hours, minutes, seconds) = match parts.as_slice() {
        [d] if days == 0 => (*d, 0, 0, 0),
        [h, m] => (days, *h, *m, 0),
        [h, m, s] => (days, *h, *m, *s),
        [d, h, m, s] if days == 0 => (*d, *h, *m, *s),
        _ => return None,
    };

    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }

    Some(Duration::from_secs(
        ((days * 24 + hours) * 60 + minutes) * 60 + seconds,
    ))
}

/// Per-server idle timers.
///
/// A server is tracked from the first poll that sees it running. Its
/// timestamp moves forward whenever players are online; once it has been
/// empty for the whole timeout a [PowerAction] is emitted and tracking stops.
#[derive(Debug, Default)]
pub struct ShutdownTracker {
    entries: HashMap<String, Instant>,
}

impl ShutdownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observation and return the shutdown action, if due.
    ///
    /// `player_count` is `None` when the count is unknown, which counts as empty.
    pub fn observe(
        &mut self,
        server_id: &str,
        state: ServerState,
        player_count: Option<u32>,
        idle_timeout: Duration,
        now: Instant,
    ) -> Option<PowerAction> {
        if !state.is_running() {
            if self.entries.remove(server_id).is_some() {
                tracing::debug!("Server {} is {:?}, no longer tracked", server_id, state);
            }
            return None;
        }

        let since = match self.entries.get(server_id) {
            Some(&since) => since,
            None => {
                tracing::debug!("Tracking idle time of server {}", server_id);
                self.entries.insert(server_id.into(), now);
                return None;
            }
        };

        if player_count.unwrap_or(0) > 0 {
            self.entries.insert(server_id.into(), now);
            return None;
        }

        let idle = now.saturating_duration_since(since);

        if idle < idle_timeout {
            tracing::debug!(
                "Server {} empty for {:?} of {:?}",
                server_id,
                idle,
                idle_timeout
            );
            return None;
        }

        self.entries.remove(server_id);
        tracing::info!(
            "Server {} has been empty for {:?}, shutting it down",
            server_id,
            idle
        );

        Some(PowerAction {
            server_id: server_id.into(),
            signal: PowerSignal::Stop,
        })
    }

    /// Start of the current idle window, if the server is tracked.
    pub fn tracked_since(&self, server_id: &str) -> Option<Instant> {
        self.entries.get(server_id).copied()
    }

    /// Stop tracking a server.
    pub fn untrack(&mut self, server_id: &str) {
        self.entries.remove(server_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Online player count shown in a display string like `"3/20"`.
///
/// Sentinels and `"?/20"` are unknown.
pub fn parse_display_count(text: Option<&str>) -> Option<u32> {
    text?.split('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn idle_timeout_formats() {
        assert_eq!(parse_idle_timeout("0:01:00"), MINUTE);
        assert_eq!(parse_idle_timeout("1:00:00"), Duration::from_secs(3600));
        assert_eq!(parse_idle_timeout("0:30"), 30 * MINUTE);
        assert_eq!(parse_idle_timeout("1:02:03:04"), Duration::from_secs(93_784));
        assert_eq!(parse_idle_timeout("1.02:03:04"), Duration::from_secs(93_784));
        assert_eq!(parse_idle_timeout("2"), Duration::from_secs(2 * 86_400));
    }

    #[test]
    fn bad_idle_timeouts_fall_back_to_an_hour() {
        assert_eq!(parse_idle_timeout(""), DEFAULT_IDLE_TIMEOUT);
        assert_eq!(parse_idle_timeout("0:00:00"), DEFAULT_IDLE_TIMEOUT);
        assert_eq!(parse_idle_timeout("soon"), DEFAULT_IDLE_TIMEOUT);
        assert_eq!(parse_idle_timeout("0:75:00"), DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn empty_server_is_stopped_after_timeout() {
        let mut tracker = ShutdownTracker::new();
        let t = Instant::now();

        assert_eq!(tracker.observe("srv", ServerState::Running, Some(0), MINUTE, t), None);
        assert_eq!(tracker.tracked_since("srv"), Some(t));

        let action = tracker.observe(
            "srv",
            ServerState::Running,
            Some(0),
            MINUTE,
            t + Duration::from_secs(61),
        );

        assert_eq!(
            action,
            Some(PowerAction {
                server_id: "srv".into(),
                signal: PowerSignal::Stop
            })
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn empty_server_within_timeout_keeps_its_timestamp() {
        let mut tracker = ShutdownTracker::new();
        let t = Instant::now();

        tracker.observe("srv", ServerState::Running, Some(0), MINUTE, t);
        let action = tracker.observe(
            "srv",
            ServerState::Running,
            None,
            MINUTE,
            t + Duration::from_secs(30),
        );

        assert_eq!(action, None);
        assert_eq!(tracker.tracked_since("srv"), Some(t));
    }

    #[test]
    fn players_refresh_the_timer() {
        let mut tracker = ShutdownTracker::new();
        let t = Instant::now();

        tracker.observe("srv", ServerState::Running, Some(0), MINUTE, t);
        tracker.observe("srv", ServerState::Running, Some(2), MINUTE, t + Duration::from_secs(50));

        assert_eq!(tracker.tracked_since("srv"), Some(t + Duration::from_secs(50)));
        assert_eq!(
            tracker.observe("srv", ServerState::Running, Some(0), MINUTE, t + Duration::from_secs(70)),
            None
        );
    }

    #[test]
    fn leaving_running_state_untracks() {
        let mut tracker = ShutdownTracker::new();
        let t = Instant::now();

        tracker.observe("srv", ServerState::Running, Some(0), MINUTE, t);

        for state in [ServerState::Stopping, ServerState::Offline, ServerState::Missing] {
            tracker.observe("srv", ServerState::Running, Some(0), MINUTE, t);
            assert_eq!(tracker.observe("srv", state, Some(0), MINUTE, t), None);
            assert_eq!(tracker.tracked_since("srv"), None);
        }

        // A restart begins a new idle window.
        tracker.observe("srv", ServerState::Starting, None, MINUTE, t);
        tracker.observe("srv", ServerState::Running, Some(0), MINUTE, t + 2 * MINUTE);
        assert_eq!(tracker.tracked_since("srv"), Some(t + 2 * MINUTE));
    }

    #[test]
    fn display_counts() {
        assert_eq!(parse_display_count(Some("3/20")), Some(3));
        assert_eq!(parse_display_count(Some("0/Unknown")), Some(0));
        assert_eq!(parse_display_count(Some("?/20")), None);
        assert_eq!(parse_display_count(Some("N/A")), None);
        assert_eq!(parse_display_count(Some("Online")), None);
        assert_eq!(parse_display_count(None), None);
    }

    #[test]
    fn power_signal_text() {
        assert_eq!(PowerSignal::Stop.to_string(), "stop");
    }
}
