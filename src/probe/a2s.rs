use super::{Probe, ProbeReply};
use crate::{
    share::{create_udp_socket, recv_datagram, PacketReader},
    Endpoint, QueryErr, SocketConf,
};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;

const SIMPLE_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO: u8 = b'T';
const A2S_INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
const S2C_CHALLENGE: u8 = 0x41;
const S2A_INFO: u8 = 0x49;

/// Fields of an [A2S_INFO](https://developer.valvesoftware.com/wiki/Server_queries#A2S_INFO) reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A2sInfo {
    pub protocol: u8,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
}

/// Source-engine server query over UDP.
pub struct A2sProbe {
    endpoint: Endpoint,
    socket_conf: SocketConf,
    socket: Option<UdpSocket>,
}

impl A2sProbe {
    pub fn create(endpoint: Endpoint, socket_conf: SocketConf) -> Self {
        Self {
            endpoint,
            socket_conf,
            socket: None,
        }
    }

    /// Send the info request and follow a challenge if the server asks for one.
    pub async fn query_info(&mut self) -> Result<A2sInfo, QueryErr> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            QueryErr::NotConnected(format!("A2S probe for {} queried before connect", self.endpoint))
        })?;

        socket.send(&build_info_request(None)).await?;
        let reply = recv_datagram(socket, &self.socket_conf).await?;

        match reply_header(&reply)? {
            S2C_CHALLENGE => {
                let mut reader = PacketReader::create_with_idx(&reply, 5);
                let challenge = reader.read_array::<4>()?;

                tracing::debug!(
                    "A2S challenge 0x{:08X} from {}",
                    u32::from_le_bytes(challenge),
                    self.endpoint
                );

                socket.send(&build_info_request(Some(challenge))).await?;
                let reply = recv_datagram(socket, &self.socket_conf).await?;

                match reply_header(&reply)? {
                    S2A_INFO => parse_info(&reply),
                    other => Err(QueryErr::Malformed(format!(
                        "Expected info reply after challenge, but got header 0x{:02X}",
                        other
                    ))),
                }
            }
            S2A_INFO => parse_info(&reply),
            other => Err(QueryErr::Malformed(format!(
                "Unsupported A2S response header: 0x{:02X}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Probe for A2sProbe {
    async fn connect(&mut self) -> Result<(), QueryErr> {
        self.socket = Some(create_udp_socket(&self.endpoint).await?);

        Ok(())
    }

    async fn query(&mut self) -> Result<ProbeReply, QueryErr> {
        let info = self.query_info().await?;

        Ok(ProbeReply::Players {
            online: info.players as u32,
            max: info.max_players as u32,
        })
    }

    fn release(&mut self) {
        self.socket = None;
    }
}

/// Build the `A2S_INFO` request, with the challenge appended when one was issued.
pub fn build_info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut packet = BytesMut::with_capacity(SIMPLE_HEADER.len() + 1 + A2S_INFO_PAYLOAD.len() + 4);

    packet.put_slice(&SIMPLE_HEADER);
    packet.put_u8(A2S_INFO);
    packet.put_slice(A2S_INFO_PAYLOAD);

    if let Some(challenge) = challenge {
        packet.put_slice(&challenge);
    }

    packet.to_vec()
}

/// Header byte of a single-packet reply. Split replies are rejected.
fn reply_header(reply: &[u8]) -> Result<u8, QueryErr> {
    let mut reader = PacketReader::create_with_idx(reply, 0);
    let prefix = reader.read_array::<4>()?;

    if prefix != SIMPLE_HEADER {
        return Err(QueryErr::Malformed(format!(
            "Unsupported A2S packet prefix: {:02X?}",
            prefix
        )));
    }

    reader.read()
}

/// Parse an `S2A_INFO` reply, including its 5-byte header.
pub fn parse_info(reply: &[u8]) -> Result<A2sInfo, QueryErr> {
    let mut reader = PacketReader::create_with_idx(reply, 5);

    Ok(A2sInfo {
        protocol: reader.read()?,
        name: reader.read_nt_str()?,
        map: reader.read_nt_str()?,
        folder: reader.read_nt_str()?,
        game: reader.read_nt_str()?,
        app_id: reader.read_u16_le()?,
        players: reader.read()?,
        max_players: reader.read()?,
        bots: reader.read()?,
    })
}
