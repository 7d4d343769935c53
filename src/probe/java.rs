use super::{Probe, ProbeReply};
use crate::{
    share::create_tcp_socket,
    varint::{decode_varint_from_socket, encode_varint},
    Endpoint, QueryErr, SocketConf,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

/// Status documents are capped well below the protocol's 2^21 packet limit.
const MAX_STATUS_LEN: i32 = 1 << 21;

/// Minecraft Java Edition [Server List Ping](https://wiki.vg/Server_List_Ping).
pub struct JavaProbe {
    endpoint: Endpoint,
    socket_conf: SocketConf,
    socket: Option<TcpStream>,
}

impl JavaProbe {
    pub fn create(endpoint: Endpoint, socket_conf: SocketConf) -> Self {
        Self {
            endpoint,
            socket_conf,
            socket: None,
        }
    }

    /// Fetch the raw JSON status document.
    pub async fn query_status_json(&mut self) -> Result<String, QueryErr> {
        let socket = self.socket.as_mut().ok_or_else(|| {
            QueryErr::NotConnected(format!(
                "Java probe for {} queried before connect",
                self.endpoint
            ))
        })?;

        socket
            .write_all(&build_handshake_packet(&self.endpoint))
            .await?;
        socket.write_all(&build_status_request_packet()).await?;

        match timeout(self.socket_conf.read_timeout, read_status_response(socket)).await {
            Ok(status) => status,
            Err(_) => Err(QueryErr::Timeout(format!(
                "status from {} exceeded {:?}",
                self.endpoint, self.socket_conf.read_timeout
            ))),
        }
    }
}

#[async_trait]
impl Probe for JavaProbe {
    async fn connect(&mut self) -> Result<(), QueryErr> {
        self.socket = Some(create_tcp_socket(&self.endpoint, &self.socket_conf).await?);

        Ok(())
    }

    async fn query(&mut self) -> Result<ProbeReply, QueryErr> {
        let status = self.query_status_json().await?;
        let (online, max) = parse_player_counts(&status).ok_or_else(|| {
            QueryErr::Malformed(format!("No player counts in status from {}", self.endpoint))
        })?;

        Ok(ProbeReply::Players { online, max })
    }

    fn release(&mut self) {
        self.socket = None;
    }
}

/// Build handshake packet buffer.
pub fn build_handshake_packet(endpoint: &Endpoint) -> Vec<u8> {
    let mut packet = Vec::<u8>::new();
    let mut packet_data = Vec::<u8>::new();
    let server_addr_bytes = endpoint.ip.as_bytes();

    // A client pinging to discover the server version sends -1 by convention.
    packet_data.append(&mut encode_varint(-1));
    // UTF-8 string prefixed with its size in bytes as a VarInt.
    packet_data.append(&mut encode_varint(server_addr_bytes.len() as i32));
    packet_data.extend_from_slice(server_addr_bytes);
    packet_data.extend_from_slice(&endpoint.port.to_be_bytes());
    // Next state: 1 for status.
    packet_data.append(&mut encode_varint(1));

    // [Packet format](https://wiki.vg/Protocol#Packet_format): length, id, data.
    packet.append(&mut encode_varint(1 + packet_data.len() as i32));
    packet.append(&mut encode_varint(0x00));
    packet.append(&mut packet_data);

    packet
}

/// Build status request packet buffer.
pub fn build_status_request_packet() -> Vec<u8> {
    let mut packet = Vec::<u8>::new();

    packet.append(&mut encode_varint(1));
    packet.append(&mut encode_varint(0x00));

    packet
}

async fn read_status_response(socket: &mut TcpStream) -> Result<String, QueryErr> {
    let (_p_buf_len, _p_size) = decode_varint_from_socket(socket).await?;
    let (_id_buf_len, id) = decode_varint_from_socket(socket).await?;

    if id != 0x00 {
        return Err(QueryErr::Malformed(format!(
            "Status response expected packet id 0x00, but got: 0x{:02X}",
            id
        )));
    }

    let (_d_buf_len, d_size) = decode_varint_from_socket(socket).await?;

    if !(0..=MAX_STATUS_LEN).contains(&d_size) {
        return Err(QueryErr::Malformed(format!(
            "Status length out of range: {}",
            d_size
        )));
    }

    let mut data_buffer = vec![0u8; d_size as usize];
    socket.read_exact(&mut data_buffer).await?;

    Ok(std::str::from_utf8(&data_buffer)?.to_string())
}

/// Pull `players.online` and `players.max` out of a status document.
///
/// The document is read as JSON first. Documents that fail to parse
/// fall back to matching the two fields anywhere in the text.
pub fn parse_player_counts(status: &str) -> Option<(u32, u32)> {
    if let Ok(doc) = serde_json::from_str::<Value>(status) {
        let players = doc.get("players");
        let online = players.and_then(|p| p.get("online")).and_then(json_count);
        let max = players.and_then(|p| p.get("max")).and_then(json_count);

        if let (Some(online), Some(max)) = (online, max) {
            return Some((online, max));
        }
    }

    static ONLINE: OnceLock<Regex> = OnceLock::new();
    static MAX: OnceLock<Regex> = OnceLock::new();

    let online = ONLINE
        .get_or_init(|| Regex::new(r#""online"\s*:\s*(\d+)"#).expect("valid online pattern"))
        .captures(status)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    let max = MAX
        .get_or_init(|| Regex::new(r#""max"\s*:\s*(\d+)"#).expect("valid max pattern"))
        .captures(status)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;

    Some((online, max))
}

fn json_count(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_layout() {
        let packet = build_handshake_packet(&Endpoint::create("mc.local", 25565));

        // length, id 0x00, protocol -1 (5 bytes), host length, host, port, next state
        let body_len = 1 + 5 + 1 + "mc.local".len() + 2 + 1;
        assert_eq!(packet[0] as usize, body_len);
        assert_eq!(packet[1], 0x00);
        assert_eq!(&packet[2..7], &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(packet[7] as usize, "mc.local".len());
        assert_eq!(&packet[8..16], b"mc.local");
        assert_eq!(&packet[16..18], &25565u16.to_be_bytes());
        assert_eq!(packet[18], 0x01);
        assert_eq!(build_status_request_packet(), vec![0x01, 0x00]);
    }

    #[test]
    fn reads_nested_players() {
        let status = r#"{"version":{"name":"1.20.4","protocol":765},"players":{"max":20,"online":3,"sample":[]},"description":"hi"}"#;

        assert_eq!(parse_player_counts(status), Some((3, 20)));
    }

    #[test]
    fn falls_back_to_flat_matching() {
        // Truncated JSON still carries both fields.
        let status = r#"{"players":{"max": 50, "online": 7, "sample":[{"name":"Ste"#;

        assert_eq!(parse_player_counts(status), Some((7, 50)));
    }

    #[test]
    fn missing_players_yield_nothing() {
        assert_eq!(parse_player_counts(r#"{"description":"x"}"#), None);
        assert_eq!(parse_player_counts(""), None);
    }
}
