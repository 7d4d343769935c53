//! In-process fake game servers bound to ephemeral loopback ports.
#![allow(dead_code)]

use bytes::BytesMut;
use gsq::{
    encode_varint,
    probe::{
        decode_packet, encode_packet, MAGIC_BYTES, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE,
        SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE,
    },
    SocketConf,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
};

pub const HOST: &str = "127.0.0.1";

pub fn short_socket_conf() -> SocketConf {
    SocketConf {
        connect_timeout: Duration::from_millis(500),
        read_timeout: Duration::from_millis(500),
    }
}

/// A loopback port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind((HOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

pub fn a2s_info_reply(players: u8, max: u8) -> Vec<u8> {
    let mut reply = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x49, 17];
    reply.extend_from_slice(b"Test Server\0cp_badlands\0tf\0Team Fortress\0");
    reply.extend_from_slice(&440u16.to_le_bytes());
    reply.extend_from_slice(&[players, max, 0, b'd', b'l', 0, 1]);
    reply
}

/// A2S server answering every info request, optionally demanding a challenge first.
pub async fn spawn_a2s(players: u8, max: u8, challenge: Option<[u8; 4]>) -> u16 {
    let socket = UdpSocket::bind((HOST, 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut buf = [0u8; 1400];

        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let request = &buf[..len];

            let reply = match challenge {
                Some(challenge) if !request.ends_with(&challenge) => {
                    let mut reply = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x41];
                    reply.extend_from_slice(&challenge);
                    reply
                }
                _ => a2s_info_reply(players, max),
            };

            let _ = socket.send_to(&reply, peer).await;
        }
    });

    port
}

/// UDP server replying to every datagram with the same bytes.
pub async fn spawn_udp_reply(reply: Vec<u8>) -> u16 {
    let socket = UdpSocket::bind((HOST, 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut buf = [0u8; 1400];

        while let Ok((_, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&reply, peer).await;
        }
    });

    port
}

pub fn bedrock_pong(server_id: &str) -> Vec<u8> {
    let mut pong = vec![0x1C];
    pong.extend_from_slice(&0u64.to_be_bytes());
    pong.extend_from_slice(&7u64.to_be_bytes());
    pong.extend_from_slice(&MAGIC_BYTES);
    pong.extend_from_slice(&(server_id.len() as u16).to_be_bytes());
    pong.extend_from_slice(server_id.as_bytes());
    pong
}

/// Minecraft Java server answering the status handshake with `status`.
pub async fn spawn_java(status: &str) -> u16 {
    let listener = TcpListener::bind((HOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let status = status.to_string();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let status = status.clone();

            tokio::spawn(async move {
                // Handshake then status request; contents are not checked.
                let mut buf = [0u8; 512];
                let mut seen = Vec::new();

                while !seen.ends_with(&[0x01, 0x00]) {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }

                let mut data = encode_varint(status.len() as i32);
                data.extend_from_slice(status.as_bytes());

                let mut packet = encode_varint(1 + data.len() as i32);
                packet.push(0x00);
                packet.extend_from_slice(&data);

                let _ = stream.write_all(&packet).await;
            });
        }
    });

    port
}

/// TCP server that accepts and holds connections without speaking.
pub async fn spawn_silent_tcp() -> u16 {
    let listener = TcpListener::bind((HOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut held = Vec::new();

        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    port
}

/// Behaviour of the fake RCON server.
#[derive(Clone)]
pub struct FakeRcon {
    pub password: String,
    /// Reply fragments sent for every command.
    pub fragments: Vec<String>,
    /// Drop the connection after answering this many commands.
    pub close_after: Option<usize>,
}

impl FakeRcon {
    pub fn create(password: &str, fragments: &[&str]) -> Self {
        Self {
            password: password.into(),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            close_after: None,
        }
    }
}

pub struct RconServer {
    pub port: u16,
    pub connections: Arc<AtomicUsize>,
    pub commands: Arc<AtomicUsize>,
}

impl RconServer {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }
}

pub async fn spawn_rcon(fake: FakeRcon) -> RconServer {
    let listener = TcpListener::bind((HOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));
    let commands = Arc::new(AtomicUsize::new(0));
    let server = RconServer {
        port,
        connections: connections.clone(),
        commands: commands.clone(),
    };

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_rcon(stream, fake.clone(), commands.clone()));
        }
    });

    server
}

async fn serve_rcon(mut stream: TcpStream, fake: FakeRcon, commands: Arc<AtomicUsize>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut answered = 0;

    loop {
        let packet = loop {
            match decode_packet(&mut buf) {
                Ok(Some(packet)) => break packet,
                Ok(None) => {}
                Err(_) => return,
            }

            match stream.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };

        match packet.kind {
            SERVERDATA_AUTH => {
                let id = if packet.body == fake.password { packet.id } else { -1 };
                let mut reply = encode_packet(packet.id, SERVERDATA_RESPONSE_VALUE, "");
                reply.extend(encode_packet(id, SERVERDATA_AUTH_RESPONSE, ""));

                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
            SERVERDATA_EXECCOMMAND => {
                commands.fetch_add(1, Ordering::SeqCst);

                for fragment in &fake.fragments {
                    let reply = encode_packet(packet.id, SERVERDATA_RESPONSE_VALUE, fragment);

                    if stream.write_all(&reply).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }

                answered += 1;

                if fake.close_after == Some(answered) {
                    return;
                }
            }
            _ => return,
        }
    }
}
