//! Client side of the TCP connection to the game server

use log::{debug, info, warn};
use shared::Message;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use thiserror::Error;

const READ_CHUNK_SIZE: usize = 4096;
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not resolve server address {0:?}")]
    Resolve(String),
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Still connected; `chunks` holds whatever arrived, possibly nothing
    Data,
    /// The server closed the connection
    Disconnected,
    /// Reading failed; the connection should be dropped
    Error,
}

/// Result of one non-blocking [`ClientSocket::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub status: ReceiveStatus,
    pub chunks: Vec<Vec<u8>>,
}

/// Non-blocking connection to the game server.
pub struct ClientSocket {
    stream: Option<TcpStream>,
}

impl ClientSocket {
    /// Connects to the first address `addr` resolves to that accepts.
    pub fn connect(addr: &str) -> Result<Self, ClientError> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|_| ClientError::Resolve(addr.to_string()))?
            .collect();
        if candidates.is_empty() {
            return Err(ClientError::Resolve(addr.to_string()));
        }

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect(candidate) {
                Ok(stream) => {
                    stream.set_nonblocking(true)?;
                    info!("Connected to server at {}", candidate);
                    return Ok(Self {
                        stream: Some(stream),
                    });
                }
                Err(e) => {
                    debug!("Connecting to {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ClientError::Connect {
            addr: addr.to_string(),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address")),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.stream()?.local_addr()?)
    }

    /// Takes everything the server has sent so far without blocking.
    pub fn receive(&mut self) -> Received {
        let Some(stream) = self.stream.as_mut() else {
            return Received {
                status: ReceiveStatus::Error,
                chunks: Vec::new(),
            };
        };

        let mut chunks = Vec::new();
        let mut buffer = [0u8; READ_CHUNK_SIZE];
        let status = loop {
            match stream.read(&mut buffer) {
                Ok(0) => break ReceiveStatus::Disconnected,
                Ok(n) => chunks.push(buffer[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break ReceiveStatus::Data,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    break ReceiveStatus::Disconnected
                }
                Err(e) => {
                    warn!("Failed to read from server: {}", e);
                    break ReceiveStatus::Error;
                }
            }
        };

        Received { status, chunks }
    }

    /// Writes every byte of `data`, retrying partial writes.
    pub fn transmit(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let mut stream = self.stream()?;
        let mut sent = 0;
        while sent < data.len() {
            match stream.write(&data[sent..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(WRITE_RETRY_INTERVAL)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn send_message(&mut self, message: &Message) -> Result<(), ClientError> {
        self.transmit(message.encode().as_bytes())
    }

    /// Closes the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("Shutdown failed: {}", e);
            }
            info!("Disconnected from server");
        }
    }

    fn stream(&self) -> Result<&TcpStream, ClientError> {
        self.stream.as_ref().ok_or(ClientError::NotConnected)
    }
}

impl Drop for ClientSocket {
    fn drop(&mut self) {
        self.close();
    }
}
