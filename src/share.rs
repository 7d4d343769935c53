use crate::{Endpoint, QueryErr, SocketConf};
use std::{
    net::Ipv4Addr,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{
    net::{TcpStream, UdpSocket},
    time::timeout,
};

/// Largest datagram any of the UDP protocols will answer with.
const MAX_DATAGRAM: usize = 1400 * 4;

pub fn get_server_current_time() -> Result<u64, QueryErr> {
    let tm = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();

    // Time should not exceed `u64::MAX`
    u64::try_from(tm).map_err(|_| {
        QueryErr::Config(format!(
            "Failed to obtain current time. It should not exceed u64::MAX, but got: {}",
            tm
        ))
    })
}

/// Open a TCP connection, bounded by the connect timeout.
pub async fn create_tcp_socket(
    endpoint: &Endpoint,
    socket_conf: &SocketConf,
) -> Result<TcpStream, QueryErr> {
    match timeout(socket_conf.connect_timeout, TcpStream::connect(endpoint.addr())).await {
        Ok(socket) => {
            let socket = socket?;
            socket.set_nodelay(true)?;

            Ok(socket)
        }
        Err(_) => Err(QueryErr::Timeout(format!(
            "connect to {} exceeded {:?}",
            endpoint, socket_conf.connect_timeout
        ))),
    }
}

/// Bind an ephemeral UDP socket and connect it to the endpoint.
pub async fn create_udp_socket(endpoint: &Endpoint) -> Result<UdpSocket, QueryErr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;

    socket.connect(endpoint.addr()).await?;

    Ok(socket)
}

/// Receive one datagram, bounded by the read timeout.
pub async fn recv_datagram(
    socket: &UdpSocket,
    socket_conf: &SocketConf,
) -> Result<Vec<u8>, QueryErr> {
    let mut bufs = vec![0u8; MAX_DATAGRAM];

    match timeout(socket_conf.read_timeout, socket.recv(&mut bufs)).await {
        Ok(len) => {
            bufs.truncate(len?);

            Ok(bufs)
        }
        Err(_) => Err(QueryErr::Timeout(format!(
            "no datagram within {:?}",
            socket_conf.read_timeout
        ))),
    }
}

/// Bounds-checked cursor over a received packet.
///
/// Every read fails with [QueryErr::Malformed] instead of indexing past the end.
pub struct PacketReader<'a> {
    bufs: &'a [u8],
    current_idx: usize,
}

impl<'a> PacketReader<'a> {
    pub fn create_with_idx(bufs: &'a [u8], current_idx: usize) -> Self {
        Self { bufs, current_idx }
    }

    pub fn remaining(&self) -> usize {
        self.bufs.len().saturating_sub(self.current_idx)
    }

    pub fn set_current_idx_forward(&mut self, idx: usize) -> Result<(), QueryErr> {
        self.read_bufs(idx).map(|_| ())
    }

    pub fn read(&mut self) -> Result<u8, QueryErr> {
        match self.bufs.get(self.current_idx) {
            Some(&buf) => {
                self.current_idx += 1;

                Ok(buf)
            }
            None => Err(self.incomplete(1)),
        }
    }

    pub fn read_bufs(&mut self, size: usize) -> Result<&'a [u8], QueryErr> {
        let end = self
            .current_idx
            .checked_add(size)
            .filter(|&end| end <= self.bufs.len())
            .ok_or_else(|| self.incomplete(size))?;
        let all: &'a [u8] = self.bufs;
        let bufs = &all[self.current_idx..end];

        self.current_idx = end;

        Ok(bufs)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], QueryErr> {
        let mut arr = [0u8; N];

        arr.copy_from_slice(self.read_bufs(N)?);

        Ok(arr)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, QueryErr> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16_be(&mut self) -> Result<u16, QueryErr> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, QueryErr> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read a null-terminated string. Invalid UTF-8 is replaced, not rejected.
    pub fn read_nt_str(&mut self) -> Result<String, QueryErr> {
        let all: &'a [u8] = self.bufs;
        let rest = &all[self.current_idx.min(all.len())..];

        match rest.iter().position(|&b| b == 0x00) {
            Some(nul) => {
                let str = String::from_utf8_lossy(&rest[..nul]).into_owned();
                self.current_idx += nul + 1;

                Ok(str)
            }
            None => Err(QueryErr::Malformed(format!(
                "Unterminated string at offset {}",
                self.current_idx
            ))),
        }
    }

    fn incomplete(&self, wanted: usize) -> QueryErr {
        QueryErr::Malformed(format!(
            "Incomplete data: wanted {} bytes at offset {}, but only {} remain",
            wanted,
            self.current_idx,
            self.remaining()
        ))
    }
}
