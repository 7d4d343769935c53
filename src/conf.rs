use crate::QueryErr;
use serde::{Deserialize, Serialize};
use std::{net::Ipv4Addr, str::FromStr, time::Duration};

/// Placeholder entry in [MonitorSettings::servers_to_auto_shutdown] meaning "every server".
pub const AUTO_SHUTDOWN_ALL: &str = "ALL";

/// Idle timeout used when [MonitorSettings::empty_server_timeout] is unset.
pub const DEFAULT_EMPTY_SERVER_TIMEOUT: &str = "1:00:00";

const MIN_SOCKET_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// A network destination for a probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server IP address or a domain name.
    pub ip: String,
    /// Server port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from a host and port.
    ///
    /// # Examples
    ///
    /// ```
    /// # use gsq::Endpoint;
    /// #
    /// let endpoint = Endpoint::create(" 10.0.0.5 ", 27015);
    /// #
    /// # assert_eq!(endpoint.ip, "10.0.0.5");
    /// # assert_eq!(endpoint.port, 27015);
    /// ```
    pub fn create(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.trim().into(),
            port,
        }
    }

    /// Create an endpoint by splitting a `host:port` string.
    ///
    /// If the port cannot be converted to [u16], a [QueryErr::Config] is returned.
    ///
    /// # Example
    ///
    /// ```
    /// # use gsq::{Endpoint, QueryErr};
    /// #
    /// # fn main() -> Result<(), QueryErr> {
    ///     let endpoint = Endpoint::create_from_str("play.example.com:25565")?;
    /// #
    /// #   assert_eq!(endpoint.ip, "play.example.com");
    /// #   assert_eq!(endpoint.port, 25565);
    /// #   assert!(Endpoint::create_from_str("25565").is_err());
    /// #   assert!(Endpoint::create_from_str("play.example.com:-1").is_err());
    /// #   Ok(())
    /// # }
    /// ```
    pub fn create_from_str(addr: &str) -> Result<Self, QueryErr> {
        let addr_split = addr.split(':').map(|x| x.trim()).collect::<Vec<_>>();

        if addr_split.len() != 2 {
            return Err(QueryErr::Config(format!(
                "Invalid socket address syntax: {}",
                addr
            )));
        }

        match addr_split[1].parse::<u16>() {
            Ok(port) => Ok(Self::create(addr_split[0], port)),
            Err(_) => Err(QueryErr::Config(format!("Invalid port: {}", addr_split[1]))),
        }
    }

    /// Address tuple accepted by tokio's socket constructors.
    pub fn addr(&self) -> (&str, u16) {
        (&self.ip, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Socket deadlines shared by every probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConf {
    /// Deadline for establishing a TCP connection.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Deadline for each receive.
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
}

impl Default for SocketConf {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(3),
        }
    }
}

impl SocketConf {
    /// Reject deadlines outside the 2 to 5 second window.
    pub fn validate(&self) -> Result<(), QueryErr> {
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
        ] {
            if !(MIN_SOCKET_TIMEOUT..=MAX_SOCKET_TIMEOUT).contains(&value) {
                return Err(QueryErr::Config(format!(
                    "{} must be between {:?} and {:?}, but got {:?}",
                    name, MIN_SOCKET_TIMEOUT, MAX_SOCKET_TIMEOUT, value
                )));
            }
        }

        Ok(())
    }
}

/// Wire protocol used to query a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Valve Source-engine server query.
    A2S,
    /// Source RCON.
    Rcon,
    /// Minecraft Java Edition Server List Ping.
    MinecraftJava,
    /// Minecraft Bedrock Edition RakNet unconnected ping.
    MinecraftBedrock,
    /// TCP reachability only.
    Terraria,
}

impl Protocol {
    /// Variable consulted for the query port when the config names none.
    pub fn default_port_variable(&self) -> &'static str {
        match self {
            Protocol::Rcon => "RCON_PORT",
            _ => "QUERY_PORT",
        }
    }
}

impl FromStr for Protocol {
    type Err = QueryErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a2s" | "source" => Ok(Protocol::A2S),
            "rcon" => Ok(Protocol::Rcon),
            "minecraftjava" | "java" => Ok(Protocol::MinecraftJava),
            "minecraftbedrock" | "bedrock" => Ok(Protocol::MinecraftBedrock),
            "terraria" => Ok(Protocol::Terraria),
            other => Err(QueryErr::Config(format!("Unknown protocol: {}", other))),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::A2S => "A2S",
            Protocol::Rcon => "Rcon",
            Protocol::MinecraftJava => "MinecraftJava",
            Protocol::MinecraftBedrock => "MinecraftBedrock",
            Protocol::Terraria => "Terraria",
        };

        f.write_str(name)
    }
}

/// How to query one game, matched to servers by egg name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProtocolConfig {
    pub game_name: String,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rcon_port_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rcon_password_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rcon_password_static: Option<String>,
    /// RCON command whose output lists the players.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_port_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_player_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_player_static: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_count_regex: Option<String>,
}

impl GameProtocolConfig {
    /// Create a config with only a game name and protocol set.
    ///
    /// # Example
    ///
    /// ```
    /// # use gsq::{GameProtocolConfig, Protocol};
    /// #
    /// let config = GameProtocolConfig::create("Counter-Strike 2", Protocol::A2S);
    /// #
    /// # assert_eq!(config.game_name, "Counter-Strike 2");
    /// # assert!(config.query_port_variable.is_none());
    /// ```
    pub fn create(game_name: &str, protocol: Protocol) -> Self {
        Self {
            game_name: game_name.into(),
            protocol,
            rcon_port_variable: None,
            rcon_password_variable: None,
            rcon_password_static: None,
            command: None,
            query_port_variable: None,
            max_player_variable: None,
            max_player_static: None,
            player_count_regex: None,
        }
    }

    /// Find the config for a game by exact name.
    pub fn find<'a>(configs: &'a [GameProtocolConfig], game_name: &str) -> Option<&'a Self> {
        configs.iter().find(|c| c.game_name == game_name)
    }
}

/// Global settings consumed by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MonitorSettings {
    pub automatic_shutdown: bool,
    /// Idle time before an empty server is stopped, e.g. `"1:00:00"`.
    pub empty_server_timeout: String,
    /// Server ids eligible for automatic shutdown, or [AUTO_SHUTDOWN_ALL].
    pub servers_to_auto_shutdown: Vec<String>,
    pub player_count_display: bool,
    /// Public address used for servers whose allocation is on an internal network.
    pub external_ip: Option<String>,
    pub socket: SocketConf,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            automatic_shutdown: false,
            empty_server_timeout: DEFAULT_EMPTY_SERVER_TIMEOUT.into(),
            servers_to_auto_shutdown: vec![AUTO_SHUTDOWN_ALL.into()],
            player_count_display: true,
            external_ip: None,
            socket: SocketConf::default(),
        }
    }
}

impl MonitorSettings {
    /// Whether automatic shutdown applies to the given server.
    pub fn auto_shutdown_enabled_for(&self, server_id: &str) -> bool {
        if !self.automatic_shutdown {
            return false;
        }

        let all = self.servers_to_auto_shutdown.is_empty()
            || self
                .servers_to_auto_shutdown
                .iter()
                .any(|id| id.trim().eq_ignore_ascii_case(AUTO_SHUTDOWN_ALL));

        all || self
            .servers_to_auto_shutdown
            .iter()
            .any(|id| id.trim() == server_id)
    }

    /// The configured external IP, if any non-blank value is set.
    pub fn external_ip(&self) -> Option<&str> {
        self.external_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }
}

/// Whether an allocation address sits on an internal network.
pub fn is_internal_address(ip: &str) -> bool {
    match ip.trim().parse::<Ipv4Addr>() {
        Ok(addr) => {
            addr.is_private() || addr.is_loopback() || addr.is_link_local() || addr.is_unspecified()
        }
        Err(_) => false,
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_config_reads_camel_case_json() {
        let config: GameProtocolConfig = serde_json::from_str(
            r#"{
                "gameName": "Palworld",
                "protocol": "Rcon",
                "rconPortVariable": "RCON_PORT",
                "command": "ShowPlayers",
                "maxPlayerStatic": "32"
            }"#,
        )
        .unwrap();

        assert_eq!(config.protocol, Protocol::Rcon);
        assert_eq!(config.command.as_deref(), Some("ShowPlayers"));
        assert_eq!(config.max_player_static.as_deref(), Some("32"));
        assert!(config.rcon_password_variable.is_none());
    }

    #[test]
    fn settings_default_when_fields_missing() {
        let settings: MonitorSettings =
            serde_json::from_str(r#"{ "AutomaticShutdown": true }"#).unwrap();

        assert!(settings.automatic_shutdown);
        assert_eq!(settings.empty_server_timeout, DEFAULT_EMPTY_SERVER_TIMEOUT);
        assert_eq!(settings.socket, SocketConf::default());
        assert!(settings.auto_shutdown_enabled_for("anything"));
    }

    #[test]
    fn allow_list_limits_auto_shutdown() {
        let settings = MonitorSettings {
            automatic_shutdown: true,
            servers_to_auto_shutdown: vec!["abc123".into()],
            ..Default::default()
        };

        assert!(settings.auto_shutdown_enabled_for("abc123"));
        assert!(!settings.auto_shutdown_enabled_for("def456"));

        let disabled = MonitorSettings {
            automatic_shutdown: false,
            ..settings
        };
        assert!(!disabled.auto_shutdown_enabled_for("abc123"));
    }

    #[test]
    fn socket_conf_window() {
        assert!(SocketConf::default().validate().is_ok());
        assert!(SocketConf {
            connect_timeout: Duration::from_secs(10),
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn internal_addresses() {
        assert!(is_internal_address("192.168.1.20"));
        assert!(is_internal_address("127.0.0.1"));
        assert!(is_internal_address("0.0.0.0"));
        assert!(!is_internal_address("8.8.8.8"));
        assert!(!is_internal_address("play.example.com"));
    }

    #[test]
    fn protocol_names() {
        assert_eq!("bedrock".parse::<Protocol>().unwrap(), Protocol::MinecraftBedrock);
        assert_eq!(Protocol::Rcon.default_port_variable(), "RCON_PORT");
        assert!("gopher".parse::<Protocol>().is_err());
    }
}
