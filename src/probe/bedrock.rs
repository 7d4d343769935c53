use super::{Probe, ProbeReply};
use crate::{
    share::{create_udp_socket, get_server_current_time, recv_datagram, PacketReader},
    Endpoint, QueryErr, SocketConf,
};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;

pub const MAGIC_BYTES: [u8; 16] = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

const UNCONNECTED_PING: u8 = 0x01;
const UNCONNECTED_PONG: u8 = 0x1C;
/// id + time + server guid + magic + string length
const MIN_PONG_LEN: usize = 1 + 8 + 8 + 16 + 2;
const EDITION: &str = "MCPE";

/// Fields of the pong's semicolon separated server id string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BedrockStatus {
    pub edition: String,
    pub motd: String,
    pub protocol_version: String,
    pub version_name: String,
    pub online_players: u32,
    pub max_players: u32,
}

/// Minecraft Bedrock Edition [RakNet unconnected ping](https://wiki.vg/Raknet_Protocol#Unconnected_Ping).
pub struct BedrockProbe {
    endpoint: Endpoint,
    socket_conf: SocketConf,
    socket: Option<UdpSocket>,
    client_guid: u64,
}

impl BedrockProbe {
    pub fn create(endpoint: Endpoint, socket_conf: SocketConf) -> Self {
        Self {
            endpoint,
            socket_conf,
            socket: None,
            client_guid: rand::random(),
        }
    }

    pub async fn query_status(&mut self) -> Result<BedrockStatus, QueryErr> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            QueryErr::NotConnected(format!(
                "Bedrock probe for {} queried before connect",
                self.endpoint
            ))
        })?;
        let packet = build_ping_packet(get_server_current_time()?, self.client_guid);

        socket.send(&packet).await?;

        parse_pong(&recv_datagram(socket, &self.socket_conf).await?)
    }
}

#[async_trait]
impl Probe for BedrockProbe {
    async fn connect(&mut self) -> Result<(), QueryErr> {
        self.socket = Some(create_udp_socket(&self.endpoint).await?);

        Ok(())
    }

    async fn query(&mut self) -> Result<ProbeReply, QueryErr> {
        let status = self.query_status().await?;

        Ok(ProbeReply::Players {
            online: status.online_players,
            max: status.max_players,
        })
    }

    fn release(&mut self) {
        self.socket = None;
    }
}

pub fn build_ping_packet(time_millis: u64, client_guid: u64) -> Vec<u8> {
    let mut packet = BytesMut::with_capacity(1 + 8 + MAGIC_BYTES.len() + 8);

    packet.put_u8(UNCONNECTED_PING);
    packet.put_u64(time_millis);
    packet.put_slice(&MAGIC_BYTES);
    packet.put_u64(client_guid);

    packet.to_vec()
}

/// Parse an unconnected pong datagram.
pub fn parse_pong(bufs: &[u8]) -> Result<BedrockStatus, QueryErr> {
    if bufs.len() < MIN_PONG_LEN {
        return Err(QueryErr::Malformed(format!(
            "Pong must be at least {} bytes, but got {}",
            MIN_PONG_LEN,
            bufs.len()
        )));
    }

    let mut reader = PacketReader::create_with_idx(bufs, 0);

    match reader.read()? {
        UNCONNECTED_PONG => {}
        other => {
            return Err(QueryErr::Malformed(format!(
                "Packet response expected to start with: 0x1C, but got: 0x{:02X}",
                other
            )));
        }
    }

    // Echoed ping time.
    reader.set_current_idx_forward(8)?;
    let _server_guid = reader.read_u64_be()?;

    if reader.read_bufs(MAGIC_BYTES.len())? != MAGIC_BYTES {
        return Err(QueryErr::Malformed("Pong carries the wrong magic".into()));
    }

    let server_info_len = reader.read_u16_be()? as usize;
    let server_info = String::from_utf8_lossy(reader.read_bufs(server_info_len)?);
    let server_info_split = server_info.split(';').collect::<Vec<_>>();

    if server_info_split.len() < 6 {
        return Err(QueryErr::Malformed(format!(
            "Expected at least 6 parts of server information, but {} were obtained.",
            server_info_split.len()
        )));
    }

    if server_info_split[0] != EDITION {
        return Err(QueryErr::Malformed(format!(
            "Unexpected edition: {}",
            server_info_split[0]
        )));
    }

    Ok(BedrockStatus {
        edition: server_info_split[0].into(),
        motd: server_info_split[1].into(),
        protocol_version: server_info_split[2].into(),
        version_name: server_info_split[3].into(),
        online_players: server_info_split[4].trim().parse()?,
        max_players: server_info_split[5].trim().parse()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong(server_id: &str, magic: &[u8; 16]) -> Vec<u8> {
        let mut bufs = vec![UNCONNECTED_PONG];
        bufs.extend_from_slice(&1234u64.to_be_bytes());
        bufs.extend_from_slice(&0xABCDu64.to_be_bytes());
        bufs.extend_from_slice(magic);
        bufs.extend_from_slice(&(server_id.len() as u16).to_be_bytes());
        bufs.extend_from_slice(server_id.as_bytes());
        bufs
    }

    #[test]
    fn ping_layout() {
        let packet = build_ping_packet(0x0102030405060708, 42);

        assert_eq!(packet.len(), 33);
        assert_eq!(packet[0], 0x01);
        assert_eq!(&packet[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&packet[9..25], &MAGIC_BYTES);
        assert_eq!(&packet[25..], &42u64.to_be_bytes());
    }

    #[test]
    fn parses_server_id_string() {
        let status = parse_pong(&pong(
            "MCPE;Dedicated Server;618;1.20.41;4;10;13253860892328930865;Bedrock level;Survival;1;19132;19133;",
            &MAGIC_BYTES,
        ))
        .unwrap();

        assert_eq!(status.online_players, 4);
        assert_eq!(status.max_players, 10);
        assert_eq!(status.version_name, "1.20.41");
    }

    #[test]
    fn short_pong_is_malformed() {
        let bufs = pong("MCPE;a;1;1;1;1", &MAGIC_BYTES);

        for len in [0, 1, 20, 34] {
            assert!(matches!(parse_pong(&bufs[..len]), Err(QueryErr::Malformed(_))));
        }
    }

    #[test]
    fn mismatched_magic_is_malformed() {
        let mut magic = MAGIC_BYTES;
        magic[15] = 0x00;

        assert!(parse_pong(&pong("MCPE;a;1;1;1;1", &magic)).is_err());
    }

    #[test]
    fn wrong_edition_or_missing_fields() {
        assert!(parse_pong(&pong("MCEE;a;1;1;1;1", &MAGIC_BYTES)).is_err());
        assert!(parse_pong(&pong("MCPE;a;1;1;1", &MAGIC_BYTES)).is_err());
        assert!(parse_pong(&pong("MCPE;a;1;1;x;1", &MAGIC_BYTES)).is_err());
    }
}
