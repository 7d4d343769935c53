use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gsq::{
    dispatch::build_probe,
    monitor::CollaboratorErr,
    probe::{run_probe, RconProbe},
    Endpoint, GameProtocolConfig, Monitor, MonitorSettings, MonitoredServer, Probe, ProbeResult,
    Protocol, QueryErr, ServerState, SessionCache, SocketConf, StatsSource,
};
use std::{path::PathBuf, str::FromStr};
use tracing_subscriber::{
    filter::Directive, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

#[derive(Parser)]
#[command(version, about = "Query game servers for player counts")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single probe and print its display text.
    Probe {
        /// A2S, Rcon, MinecraftJava, MinecraftBedrock or Terraria.
        protocol: String,
        host: String,
        port: u16,
        /// RCON password.
        #[arg(long)]
        password: Option<String>,
        /// RCON command.
        #[arg(long, default_value = "list")]
        command: String,
    },
    /// Run one polling cycle, treating every listed server as running.
    Poll {
        /// JSON array of game protocol configs.
        #[arg(long)]
        games: PathBuf,
        /// JSON array of servers.
        #[arg(long)]
        servers: PathBuf,
        /// JSON settings object.
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

struct AssumeRunning;

#[async_trait]
impl StatsSource for AssumeRunning {
    async fn fetch_state(&self, _: &MonitoredServer) -> Result<ServerState, CollaboratorErr> {
        Ok(ServerState::Running)
    }
}

fn init_tracing() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    let filter = EnvFilter::from_default_env();
    let filter = match Directive::from_str("tokio=warn") {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T, CollaboratorErr> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read {}: {}", path.display(), err))?;

    Ok(serde_json::from_str(&text)
        .map_err(|err| format!("Failed to parse {}: {}", path.display(), err))?)
}

async fn probe_once(
    protocol: Protocol,
    endpoint: Endpoint,
    password: Option<String>,
    command: &str,
) -> Result<String, CollaboratorErr> {
    let socket_conf = SocketConf::default();

    if protocol != Protocol::Rcon {
        let mut probe = build_probe(protocol, endpoint, socket_conf)
            .ok_or_else(|| QueryErr::Config(format!("No probe for {}", protocol)))?;
        let outcome = run_probe(probe.as_mut()).await;

        return Ok(ProbeResult::from_outcome(&outcome, probe.failure_sentinel()).into_string());
    }

    let password = password.ok_or_else(|| QueryErr::Config("--password is required for RCON".into()))?;
    let sessions = SessionCache::new();
    let session = sessions.get(&endpoint, &password, &socket_conf).await?;
    let mut probe = RconProbe::create(session, command, None);
    let outcome = run_probe(&mut probe).await;

    sessions.close_all().await;

    Ok(ProbeResult::from_outcome(&outcome, probe.failure_sentinel()).into_string())
}

#[tokio::main]
async fn main() -> Result<(), CollaboratorErr> {
    init_tracing();

    match Args::parse().command {
        Command::Probe {
            protocol,
            host,
            port,
            password,
            command,
        } => {
            let protocol = protocol.parse::<Protocol>()?;
            let text = probe_once(protocol, Endpoint::create(&host, port), password, &command).await?;

            println!("{}", text);
        }
        Command::Poll {
            games,
            servers,
            settings,
        } => {
            let games: Vec<GameProtocolConfig> = read_json(&games)?;
            let servers: Vec<MonitoredServer> = read_json(&servers)?;
            let settings: MonitorSettings = match settings {
                Some(path) => read_json(&path)?,
                None => MonitorSettings::default(),
            };

            settings.socket.validate()?;

            let mut monitor = Monitor::create(settings, games);
            let outcome = monitor.poll(&AssumeRunning, servers).await;

            for server in &outcome.servers {
                println!(
                    "{} ({}): {}",
                    server.name,
                    server.uuid,
                    server.player_count_text.as_deref().unwrap_or("-")
                );
            }

            for action in &outcome.shutdowns {
                println!("{} -> {}", action.server_id, action.signal);
            }

            monitor.shutdown().await;
        }
    }

    Ok(())
}
