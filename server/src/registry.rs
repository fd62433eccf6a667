//! Client registry and identifier allocation
//!
//! This module is the source of truth for "who is connected":
//! - A fixed pool of client identifiers `0..capacity`, handed out smallest first
//! - The live connection behind every identifier in use
//! - Capacity enforcement for new connections
//!
//! The registry is shared between the receive thread, which is the only
//! writer, and the transmit thread, which only resolves identifiers to
//! sockets. It lives behind a reader/writer lock; when a queue lock is also
//! needed the registry lock is always taken first.

use crate::event::ClientId;
use log::info;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) type SharedRegistry = Arc<RwLock<ClientRegistry>>;

/// Takes the registry read lock. The registry is consistent between
/// statements, so a poisoned lock is still safe to use.
pub(crate) fn read(registry: &RwLock<ClientRegistry>) -> RwLockReadGuard<'_, ClientRegistry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(registry: &RwLock<ClientRegistry>) -> RwLockWriteGuard<'_, ClientRegistry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

/// A live connection as seen by the transmit side.
///
/// The receive thread keeps its own handle to the socket for reading; this
/// one shares the same underlying connection and is only written to.
#[derive(Debug)]
pub struct Connection {
    /// Identifier assigned by the server
    pub id: ClientId,
    /// Address of the remote peer
    pub peer_addr: SocketAddr,
    writer: TcpStream,
}

impl Connection {
    pub fn new(id: ClientId, peer_addr: SocketAddr, writer: TcpStream) -> Self {
        Self {
            id,
            peer_addr,
            writer,
        }
    }

    pub fn writer(&self) -> &TcpStream {
        &self.writer
    }

    /// Shuts down both directions so the peer observes the close even while
    /// another handle to the socket is still open.
    pub fn shutdown(&self) -> io::Result<()> {
        match self.writer.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

/// Free identifiers, always handed out smallest first.
#[derive(Debug, Clone)]
pub struct IdPool {
    free: BTreeSet<ClientId>,
    capacity: usize,
}

impl IdPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: (0..capacity).collect(),
            capacity,
        }
    }

    /// Takes the smallest free identifier, or `None` at capacity.
    pub fn allocate(&mut self) -> Option<ClientId> {
        self.free.pop_first()
    }

    /// Returns an identifier to the pool.
    ///
    /// Returns false for identifiers outside the pool's range or ones that
    /// are already free.
    pub fn release(&mut self, id: ClientId) -> bool {
        id < self.capacity && self.free.insert(id)
    }

    pub fn is_free(&self, id: ClientId) -> bool {
        self.free.contains(&id)
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps client identifiers to live connections.
///
/// Invariant: every identifier in `0..capacity` is either in the pool or
/// owns exactly one entry in `connections`, never both.
#[derive(Debug)]
pub struct ClientRegistry {
    connections: HashMap<ClientId, Arc<Connection>>,
    pool: IdPool,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: HashMap::with_capacity(capacity),
            pool: IdPool::new(capacity),
        }
    }

    /// Takes the smallest free identifier without registering anything.
    ///
    /// The caller must either [`insert`](Self::insert) a connection under
    /// it or [`release`](Self::release) it.
    pub fn try_allocate(&mut self) -> Option<ClientId> {
        self.pool.allocate()
    }

    /// Stores the connection for an identifier obtained from
    /// [`try_allocate`](Self::try_allocate).
    pub fn insert(&mut self, connection: Connection) -> Arc<Connection> {
        let connection = Arc::new(connection);
        self.connections
            .insert(connection.id, Arc::clone(&connection));
        connection
    }

    /// Allocates an identifier and registers the connection in one step.
    ///
    /// Returns `None` when the server is at capacity; the writer is then
    /// dropped by the caller.
    pub fn register(&mut self, peer_addr: SocketAddr, writer: TcpStream) -> Option<ClientId> {
        let id = self.try_allocate()?;
        self.insert(Connection::new(id, peer_addr, writer));
        info!("Client {} connected from {}", id, peer_addr);
        Some(id)
    }

    /// Removes the connection for `id` and puts the identifier back in the
    /// pool.
    pub fn release(&mut self, id: ClientId) -> Option<Arc<Connection>> {
        let connection = self.connections.remove(&id);
        if self.pool.release(id) && connection.is_some() {
            info!("Client {} released", id);
        }
        connection
    }

    /// Looks up the connection for `id`.
    pub fn resolve(&self, id: ClientId) -> Option<Arc<Connection>> {
        self.connections.get(&id).cloned()
    }

    /// Identifiers of every live connection, ascending.
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes every connection and refills the pool.
    pub fn clear(&mut self) -> Vec<Arc<Connection>> {
        let capacity = self.pool.capacity();
        self.pool = IdPool::new(capacity);
        self.connections.drain().map(|(_, connection)| connection).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pool.available() == 0
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }
}
