use super::{Probe, ProbeReply};
use crate::{share::create_tcp_socket, Endpoint, QueryErr, SocketConf};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use regex::Regex;
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
    time::{timeout_at, Instant},
};

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id the server answers an auth packet with when the password is wrong.
const AUTH_FAILED_ID: i32 = -1;
/// Size field covers id, type, body and the two trailing nulls.
const MIN_PACKET_SIZE: i32 = 4 + 4 + 2;
const MAX_PACKET_SIZE: i32 = 1 << 20;
/// How long to wait for the next fragment of a multi-packet reply.
const FRAGMENT_GRACE: Duration = Duration::from_millis(50);

/// One decoded RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

/// Encode a packet: size, request id, type, body, two nulls. All integers little-endian.
pub fn encode_packet(id: i32, kind: i32, body: &str) -> Vec<u8> {
    let size = 4 + 4 + body.len() + 2;
    let mut packet = BytesMut::with_capacity(4 + size);

    packet.put_i32_le(size as i32);
    packet.put_i32_le(id);
    packet.put_i32_le(kind);
    packet.put_slice(body.as_bytes());
    packet.put_slice(&[0x00, 0x00]);

    packet.to_vec()
}

/// Split one complete packet off the front of the buffer, if one is there.
pub fn decode_packet(buf: &mut BytesMut) -> Result<Option<RconPacket>, QueryErr> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let size = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
        return Err(QueryErr::Malformed(format!(
            "RCON packet size out of range: {}",
            size
        )));
    }

    if buf.len() < 4 + size as usize {
        return Ok(None);
    }

    let mut packet = buf.split_to(4 + size as usize);
    packet.advance(4);
    let id = packet.get_i32_le();
    let kind = packet.get_i32_le();
    let body_len = packet.len() - 2;

    Ok(Some(RconPacket {
        id,
        kind,
        body: String::from_utf8_lossy(&packet[..body_len]).into_owned(),
    }))
}

/// A persistent, authenticated RCON connection.
pub struct RconSession {
    endpoint: Endpoint,
    password: String,
    socket_conf: SocketConf,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    authenticated: bool,
    sequence: i32,
}

impl RconSession {
    pub fn create(endpoint: Endpoint, password: &str, socket_conf: SocketConf) -> Self {
        Self {
            endpoint,
            password: password.into(),
            socket_conf,
            stream: None,
            read_buf: BytesMut::with_capacity(4096),
            authenticated: false,
            sequence: 0,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Connect and authenticate.
    ///
    /// A rejected password leaves the session connected but unauthenticated;
    /// only transport failures are returned as errors.
    pub async fn connect(&mut self) -> Result<(), QueryErr> {
        self.close().await;

        let result = self.connect_and_auth().await;

        if result.is_err() {
            self.close().await;
        }

        result
    }

    async fn connect_and_auth(&mut self) -> Result<(), QueryErr> {
        self.stream = Some(create_tcp_socket(&self.endpoint, &self.socket_conf).await?);

        let id = self.next_id();
        let password = self.password.clone();
        self.send(id, SERVERDATA_AUTH, &password).await?;

        let deadline = Instant::now() + self.socket_conf.read_timeout;

        loop {
            let packet = self.read_packet(deadline).await?;

            // Source servers send an empty response value ahead of the auth response.
            if packet.kind == SERVERDATA_RESPONSE_VALUE {
                continue;
            }

            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                return Err(QueryErr::Malformed(format!(
                    "Expected auth response, but got packet type {}",
                    packet.kind
                )));
            }

            self.authenticated = packet.id != AUTH_FAILED_ID;

            if self.authenticated {
                tracing::debug!("RCON authenticated with {}", self.endpoint);
            } else {
                tracing::warn!("RCON password rejected by {}", self.endpoint);
            }

            return Ok(());
        }
    }

    /// Run a command and return the concatenated text of every reply fragment.
    pub async fn execute(&mut self, command: &str) -> Result<String, QueryErr> {
        if self.stream.is_none() {
            return Err(QueryErr::NotConnected(format!(
                "RCON session for {} is not connected",
                self.endpoint
            )));
        }

        if !self.authenticated {
            return Err(QueryErr::Unauthenticated(format!(
                "RCON session for {} is not authenticated",
                self.endpoint
            )));
        }

        let result = self.execute_inner(command).await;

        if let Err(err) = &result {
            if err.is_transport() || matches!(err, QueryErr::Malformed(_)) {
                self.close().await;
            }
        }

        result
    }

    async fn execute_inner(&mut self, command: &str) -> Result<String, QueryErr> {
        let id = self.next_id();
        self.send(id, SERVERDATA_EXECCOMMAND, command).await?;

        let deadline = Instant::now() + self.socket_conf.read_timeout;
        let mut response = loop {
            let packet = self.read_packet(deadline).await?;

            if packet.id == id {
                break packet.body;
            }

            tracing::debug!("Skipping stale RCON packet id {} from {}", packet.id, self.endpoint);
        };

        // Keep gathering fragments while more data shows up right away.
        loop {
            match self.read_packet(Instant::now() + FRAGMENT_GRACE).await {
                Ok(packet) if packet.id == id => response.push_str(&packet.body),
                Ok(_) => {}
                Err(QueryErr::Timeout(_)) => break,
                Err(err) if err.is_transport() => {
                    tracing::debug!("RCON connection to {} dropped after reply: {}", self.endpoint, err);
                    self.close().await;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(response)
    }

    async fn send(&mut self, id: i32, kind: i32, body: &str) -> Result<(), QueryErr> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            QueryErr::NotConnected(format!("RCON session for {} is not connected", self.endpoint))
        })?;

        match timeout_at(
            Instant::now() + self.socket_conf.read_timeout,
            stream.write_all(&encode_packet(id, kind, body)),
        )
        .await
        {
            Ok(written) => Ok(written?),
            Err(err) => Err(err.into()),
        }
    }

    /// Read one packet, keeping any bytes already received if the deadline passes.
    async fn read_packet(&mut self, deadline: Instant) -> Result<RconPacket, QueryErr> {
        loop {
            if let Some(packet) = decode_packet(&mut self.read_buf)? {
                return Ok(packet);
            }

            let stream = self.stream.as_mut().ok_or_else(|| {
                QueryErr::NotConnected(format!(
                    "RCON session for {} is not connected",
                    self.endpoint
                ))
            })?;

            match timeout_at(deadline, stream.read_buf(&mut self.read_buf)).await {
                Ok(Ok(0)) => {
                    return Err(QueryErr::Refused(format!(
                        "{} closed the RCON connection",
                        self.endpoint
                    )));
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn next_id(&mut self) -> i32 {
        // Ids stay positive so they never collide with the auth failure id.
        self.sequence = if self.sequence >= i32::MAX { 1 } else { self.sequence + 1 };
        self.sequence
    }

    /// Shut the transport down and forget authentication.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }

        self.read_buf.clear();
        self.authenticated = false;
    }
}

pub type SharedRconSession = Arc<Mutex<RconSession>>;

/// Source RCON probe over a shared session.
pub struct RconProbe {
    session: SharedRconSession,
    command: String,
    pattern: Option<Regex>,
}

impl RconProbe {
    /// `pattern`, when given, narrows the reply to its first capture group.
    pub fn create(session: SharedRconSession, command: &str, pattern: Option<Regex>) -> Self {
        Self {
            session,
            command: command.into(),
            pattern,
        }
    }
}

#[async_trait]
impl Probe for RconProbe {
    async fn connect(&mut self) -> Result<(), QueryErr> {
        let mut session = self.session.lock().await;

        if session.is_connected() {
            return Ok(());
        }

        session.connect().await
    }

    async fn query(&mut self) -> Result<ProbeReply, QueryErr> {
        let text = self.session.lock().await.execute(&self.command).await?;

        match &self.pattern {
            Some(pattern) => match pattern.captures(&text).and_then(|c| c.get(1)) {
                Some(capture) => Ok(ProbeReply::Text(capture.as_str().into())),
                None => Err(QueryErr::Malformed(format!(
                    "Reply did not match {}",
                    pattern.as_str()
                ))),
            },
            None => Ok(ProbeReply::Text(text)),
        }
    }

    /// The session outlives the probe; the session cache releases it.
    fn release(&mut self) {}
}
