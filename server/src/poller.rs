//! Readiness multiplexer and listening socket setup
//!
//! One [`Poller`] watches the listener, every client socket and a waker used
//! only to interrupt a blocking wait from another thread. Only the receive
//! thread waits on it.

use crate::error::ServerError;
use crate::event::ClientId;
use log::trace;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const WAKE_TOKEN: Token = Token(usize::MAX);
const LISTENER_TOKEN: Token = Token(usize::MAX - 1);

/// What became ready during one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Another thread called [`Waker::wake`]
    Wake,
    /// The listener has pending connections
    Listener,
    /// A client socket is readable, closed or in error
    Client(ClientId),
}

/// Creates the non-blocking listening socket with address reuse enabled.
///
/// The backlog equals the connection capacity.
pub(crate) fn bind_listener(addr: SocketAddr, backlog: usize) -> Result<TcpListener, ServerError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(ServerError::Socket)?;
    socket.set_nonblocking(true).map_err(ServerError::Socket)?;
    socket.set_reuse_address(true).map_err(ServerError::Socket)?;
    socket
        .bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    let backlog = i32::try_from(backlog.max(1)).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(ServerError::Listen)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}

pub(crate) struct Poller {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl Poller {
    pub(crate) fn new(events_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(events_capacity.max(1)),
            waker: Arc::new(waker),
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    pub(crate) fn register_listener(&self, listener: &mut TcpListener) -> io::Result<()> {
        self.poll
            .registry()
            .register(listener, LISTENER_TOKEN, Interest::READABLE)
    }

    pub(crate) fn register_client(&self, stream: &mut TcpStream, id: ClientId) -> io::Result<()> {
        self.poll
            .registry()
            .register(stream, Token(id), Interest::READABLE)
    }

    pub(crate) fn deregister_client(&self, stream: &mut TcpStream) -> io::Result<()> {
        self.poll.registry().deregister(stream)
    }

    /// Blocks until something is ready or `timeout` elapses.
    ///
    /// An elapsed timeout, or a wait interrupted by a signal, yields an
    /// empty batch.
    pub(crate) fn wait(&mut self, timeout: Duration) -> io::Result<Vec<Readiness>> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let ready: Vec<Readiness> = self
            .events
            .iter()
            .map(|event| match event.token() {
                WAKE_TOKEN => Readiness::Wake,
                LISTENER_TOKEN => Readiness::Listener,
                Token(id) => Readiness::Client(id),
            })
            .collect();
        trace!("Poller returned {} ready descriptors", ready.len());
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn localhost() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    #[test]
    fn test_wait_times_out_with_empty_batch() {
        let mut poller = Poller::new(4).unwrap();
        let ready = poller.wait(Duration::from_millis(10)).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_waker_interrupts_wait() {
        let mut poller = Poller::new(4).unwrap();
        poller.waker().wake().unwrap();
        let ready = poller.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(ready, vec![Readiness::Wake]);
    }

    #[test]
    fn test_listener_readiness_on_connect() {
        let mut poller = Poller::new(4).unwrap();
        let mut listener = bind_listener(localhost(), 2).unwrap();
        poller.register_listener(&mut listener).unwrap();

        let _peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let ready = poller.wait(Duration::from_secs(5)).unwrap();
        assert!(ready.contains(&Readiness::Listener));
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let first = bind_listener(localhost(), 1).unwrap();
        let taken = first.local_addr().unwrap();
        match bind_listener(taken, 1) {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, taken),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("second bind on {} should fail", taken),
        }
    }
}
