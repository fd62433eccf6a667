//! Receive pipeline: the thread that owns the multiplexer
//!
//! On every wake-up it accepts pending connections, drains readable client
//! sockets and pushes what it saw onto the receive queue, in the order it
//! saw it.

use crate::event::{ClientId, ReceivedEvent};
use crate::poller::{Poller, Readiness};
use crate::registry::{self, SharedRegistry};
use log::{debug, error, info, trace, warn};
use mio::net::{TcpListener, TcpStream};
use socket2::SockRef;
use std::collections::HashMap;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) struct ReceivePipeline {
    poller: Poller,
    listener: TcpListener,
    /// Read halves of live connections; the registry holds the write halves
    streams: HashMap<ClientId, TcpStream>,
    registry: SharedRegistry,
    events: mpsc::UnboundedSender<ReceivedEvent>,
    terminate: Arc<AtomicBool>,
    poll_timeout: Duration,
    read_buffer: Vec<u8>,
}

impl ReceivePipeline {
    pub(crate) fn new(
        poller: Poller,
        listener: TcpListener,
        registry: SharedRegistry,
        events: mpsc::UnboundedSender<ReceivedEvent>,
        terminate: Arc<AtomicBool>,
        poll_timeout: Duration,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            poller,
            listener,
            streams: HashMap::new(),
            registry,
            events,
            terminate,
            poll_timeout,
            read_buffer: vec![0; read_buffer_size.max(1)],
        }
    }

    /// Runs until the terminate flag is raised or the multiplexer fails.
    ///
    /// Every socket this pipeline owns is closed when it returns.
    pub(crate) fn run(mut self) -> io::Result<()> {
        info!("Receive pipeline: polling for events");

        loop {
            let ready = match self.poller.wait(self.poll_timeout) {
                Ok(ready) => ready,
                Err(e) => {
                    error!("Receive pipeline: failed polling events: {}", e);
                    return Err(e);
                }
            };

            if self.terminate.load(Ordering::Acquire) {
                info!("Receive pipeline: request to terminate");
                return Ok(());
            }

            if ready.is_empty() {
                trace!("Receive pipeline: poll timeout");
                continue;
            }

            for readiness in ready {
                match readiness {
                    // The terminate flag is checked right after the wait
                    Readiness::Wake => debug!("Receive pipeline: ignoring spurious wake-up"),
                    Readiness::Listener => self.accept_pending(),
                    Readiness::Client(id) => self.drain_client(id),
                }
            }
        }
    }

    /// Accepts every pending connection on the listener.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.admit(stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to accept a new connection: {}", e);
                    break;
                }
            }
        }
    }

    /// Registers an accepted connection, or closes it right away when the
    /// server is full.
    fn admit(&mut self, mut stream: TcpStream, peer_addr: SocketAddr) {
        let writer = match SockRef::from(&stream).try_clone() {
            Ok(socket) => std::net::TcpStream::from(socket),
            Err(e) => {
                warn!("Failed to duplicate socket for {}: {}", peer_addr, e);
                return;
            }
        };

        let id = {
            let mut registry = registry::write(&self.registry);
            let Some(id) = registry.register(peer_addr, writer) else {
                info!(
                    "Dismissing new client {}, maximum ({}) reached",
                    peer_addr,
                    registry.capacity()
                );
                return;
            };

            if let Err(e) = self.poller.register_client(&mut stream, id) {
                warn!("Failed to add client {} to poller: {}", id, e);
                if let Some(connection) = registry.release(id) {
                    let _ = connection.shutdown();
                }
                return;
            }
            id
        };

        self.streams.insert(id, stream);
        self.push(ReceivedEvent::connected(id));
        debug!("Client {} added to poller", id);
    }

    /// Reads from a client until the read would block.
    ///
    /// End of stream, a reset, or any other read error tears the connection
    /// down.
    fn drain_client(&mut self, id: ClientId) {
        let Some(stream) = self.streams.get_mut(&id) else {
            debug!("Readiness for unknown client {}, ignoring", id);
            return;
        };

        let mut closed = false;
        loop {
            match stream.read(&mut self.read_buffer) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    debug!("Received {} bytes from client {}", n, id);
                    let payload = self.read_buffer[..n].to_vec();
                    if self.events.send(ReceivedEvent::data(id, payload)).is_err() {
                        debug!("Receive queue closed, dropping data from client {}", id);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    closed = true;
                    break;
                }
                Err(e) => {
                    warn!("Failed to read data from client {}: {}", id, e);
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            self.disconnect(id);
        }
    }

    fn disconnect(&mut self, id: ClientId) {
        if let Some(mut stream) = self.streams.remove(&id) {
            if let Err(e) = self.poller.deregister_client(&mut stream) {
                warn!("Failed to remove closed client {} from poller: {}", id, e);
            }
        }

        let connection = registry::write(&self.registry).release(id);
        if let Some(connection) = connection {
            if let Err(e) = connection.shutdown() {
                debug!("Shutdown of client {} failed: {}", id, e);
            }
        }

        self.push(ReceivedEvent::disconnected(id));
        info!("Client {} closed connection", id);
    }

    fn push(&self, event: ReceivedEvent) {
        if self.events.send(event).is_err() {
            debug!("Receive queue closed, dropping event");
        }
    }
}
