use super::{Probe, ProbeReply, OFFLINE};
use crate::{share::create_tcp_socket, Endpoint, QueryErr, SocketConf};
use async_trait::async_trait;
use tokio::net::TcpStream;

/// Reachability check for servers without a public query protocol, such as vanilla Terraria.
///
/// Only a TCP connect is attempted; no player count is ever read.
pub struct TerrariaProbe {
    endpoint: Endpoint,
    socket_conf: SocketConf,
    socket: Option<TcpStream>,
}

impl TerrariaProbe {
    pub fn create(endpoint: Endpoint, socket_conf: SocketConf) -> Self {
        Self {
            endpoint,
            socket_conf,
            socket: None,
        }
    }
}

#[async_trait]
impl Probe for TerrariaProbe {
    async fn connect(&mut self) -> Result<(), QueryErr> {
        self.socket = Some(create_tcp_socket(&self.endpoint, &self.socket_conf).await?);

        Ok(())
    }

    async fn query(&mut self) -> Result<ProbeReply, QueryErr> {
        match self.socket {
            Some(_) => Ok(ProbeReply::Reachable),
            None => Err(QueryErr::NotConnected(format!(
                "Reachability probe for {} queried before connect",
                self.endpoint
            ))),
        }
    }

    fn release(&mut self) {
        self.socket = None;
    }

    fn failure_sentinel(&self) -> &'static str {
        OFFLINE
    }
}
