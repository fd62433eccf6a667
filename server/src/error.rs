//! Errors surfaced by the socket server

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Fatal startup errors returned by [`crate::socket::ServerSocket::initialize`].
///
/// When one of these is returned nothing has been started and there is
/// nothing to terminate.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server socket is already initialized")]
    AlreadyInitialized,
    #[error("failed to create listening socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),
    #[error("failed to set up the readiness multiplexer: {0}")]
    Poller(#[source] io::Error),
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ServerError>;
