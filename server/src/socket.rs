//! Server socket facade
//!
//! [`ServerSocket`] is the only type application code needs. It binds the
//! listener, starts the receive and transmit threads, and exposes two
//! queues: received events are drained with
//! [`drain_received`](ServerSocket::drain_received), and outgoing payloads
//! are queued with [`submit`](ServerSocket::submit).

use crate::completion::{completion_pair, CompletionHandle};
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::event::{ClientId, ReceivedEvent, SendOutcome};
use crate::poller::{bind_listener, Poller};
use crate::receiver::ReceivePipeline;
use crate::registry::{self, ClientRegistry, SharedRegistry};
use crate::transmitter::{SendRequest, TransmitPipeline, TxCommand};
use log::{debug, error, info, warn};
use mio::Waker;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

const RECEIVE_THREAD_NAME: &str = "server-rx";
const TRANSMIT_THREAD_NAME: &str = "server-tx";

/// Whether each I/O thread is still alive.
///
/// A pipeline that hit a fatal error stops on its own; the server keeps
/// reporting itself as initialized until [`ServerSocket::terminate`] is
/// called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub receive_running: bool,
    pub transmit_running: bool,
}

/// Clears its flag when the owning thread exits, including by panic.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State that exists only between `initialize` and `terminate`.
struct Running {
    local_addr: SocketAddr,
    registry: SharedRegistry,
    events: Mutex<mpsc::UnboundedReceiver<ReceivedEvent>>,
    commands: mpsc::UnboundedSender<TxCommand>,
    waker: Arc<Waker>,
    terminate: Arc<AtomicBool>,
    receive_alive: Arc<AtomicBool>,
    transmit_alive: Arc<AtomicBool>,
    receive_thread: JoinHandle<()>,
    transmit_thread: JoinHandle<()>,
}

/// Multi-client TCP server with one receive thread and one transmit thread.
///
/// `drain_received` and `submit` take `&self` and may be called from any
/// thread. Dropping the server terminates it.
pub struct ServerSocket {
    config: ServerConfig,
    running: Option<Running>,
}

impl ServerSocket {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    /// Binds `bind_ip:port`, starts listening and spawns both I/O threads.
    ///
    /// Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    /// Fails with [`ServerError::AlreadyInitialized`] when already running.
    /// Nothing is left running when an error is returned.
    pub fn initialize(&mut self, port: u16) -> Result<()> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyInitialized);
        }

        let addr = SocketAddr::new(self.config.bind_ip, port);
        let mut listener = bind_listener(addr, self.config.capacity)?;
        let local_addr = listener.local_addr().map_err(ServerError::Socket)?;

        let poller = Poller::new(self.config.events_capacity).map_err(ServerError::Poller)?;
        poller
            .register_listener(&mut listener)
            .map_err(ServerError::Poller)?;
        let waker = poller.waker();

        let registry = Arc::new(RwLock::new(ClientRegistry::new(self.config.capacity)));
        let terminate = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let receiver = ReceivePipeline::new(
            poller,
            listener,
            Arc::clone(&registry),
            event_tx,
            Arc::clone(&terminate),
            self.config.poll_timeout,
            self.config.read_buffer_size,
        );
        let receive_alive = Arc::new(AtomicBool::new(true));
        let receive_thread = {
            let guard = AliveGuard(Arc::clone(&receive_alive));
            thread::Builder::new()
                .name(RECEIVE_THREAD_NAME.to_string())
                .spawn(move || {
                    let _guard = guard;
                    if let Err(e) = receiver.run() {
                        error!("Receive pipeline stopped: {}", e);
                    }
                })
                .map_err(|source| ServerError::ThreadSpawn {
                    name: RECEIVE_THREAD_NAME,
                    source,
                })?
        };

        let transmitter = TransmitPipeline::new(
            command_rx,
            Arc::clone(&registry),
            Arc::clone(&terminate),
            self.config.write_timeout,
        );
        let transmit_alive = Arc::new(AtomicBool::new(true));
        let spawned = {
            let guard = AliveGuard(Arc::clone(&transmit_alive));
            thread::Builder::new()
                .name(TRANSMIT_THREAD_NAME.to_string())
                .spawn(move || {
                    let _guard = guard;
                    transmitter.run();
                })
        };
        let transmit_thread = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                terminate.store(true, Ordering::Release);
                if let Err(e) = waker.wake() {
                    warn!("Failed to wake receive thread: {}", e);
                }
                if receive_thread.join().is_err() {
                    error!("Receive thread panicked");
                }
                shutdown_all(&registry);
                return Err(ServerError::ThreadSpawn {
                    name: TRANSMIT_THREAD_NAME,
                    source,
                });
            }
        };

        info!(
            "Server listening on {} (capacity {})",
            local_addr, self.config.capacity
        );
        self.running = Some(Running {
            local_addr,
            registry,
            events: Mutex::new(event_rx),
            commands: command_tx,
            waker,
            terminate,
            receive_alive,
            transmit_alive,
            receive_thread,
            transmit_thread,
        });
        Ok(())
    }

    /// Stops both threads, closes every socket and discards both queues.
    ///
    /// Queued sends that were not started resolve as
    /// [`SendOutcome::ShuttingDown`]. Does nothing when not running.
    pub fn terminate(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("Server terminating");

        running.terminate.store(true, Ordering::Release);
        if let Err(e) = running.waker.wake() {
            // The receive thread still notices the flag after its poll timeout
            warn!("Failed to wake receive thread: {}", e);
        }
        if running.commands.send(TxCommand::Terminate).is_err() {
            debug!("Transmit thread already stopped");
        }

        if running.receive_thread.join().is_err() {
            error!("Receive thread panicked");
        }
        if running.transmit_thread.join().is_err() {
            error!("Transmit thread panicked");
        }

        shutdown_all(&running.registry);
        info!("Server terminated");
    }

    /// Takes every event received so far, oldest first.
    ///
    /// Returns an empty list when nothing arrived or the server is not
    /// running.
    pub fn drain_received(&self) -> Vec<ReceivedEvent> {
        let Some(running) = &self.running else {
            return Vec::new();
        };

        let mut events = running.events.lock().unwrap_or_else(PoisonError::into_inner);
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Queues `payload` for every client in `targets`, in that order.
    ///
    /// Returns at once. The handle resolves after the transmit thread has
    /// handled the request, or immediately with [`SendOutcome::Error`] when
    /// `targets` or `payload` is empty or the server is not running.
    pub fn submit(&self, targets: Vec<ClientId>, payload: impl Into<Vec<u8>>) -> CompletionHandle {
        let payload = payload.into();
        if targets.is_empty() || payload.is_empty() {
            debug!("Rejecting send request with no targets or no data");
            return CompletionHandle::resolved(SendOutcome::Error);
        }
        let Some(running) = &self.running else {
            debug!("Rejecting send request, server not running");
            return CompletionHandle::resolved(SendOutcome::Error);
        };

        let (completion, handle) = completion_pair();
        let request = SendRequest {
            targets,
            payload,
            completion,
        };
        if let Err(mpsc::error::SendError(command)) = running.commands.send(TxCommand::Send(request)) {
            warn!("Transmit thread is gone, send request dropped");
            if let TxCommand::Send(request) = command {
                request.completion.resolve(SendOutcome::Error);
            }
        }
        handle
    }

    /// Queues one payload for every connected client.
    pub fn broadcast(&self, payload: impl Into<Vec<u8>>) -> CompletionHandle {
        self.submit(self.connected_clients(), payload)
    }

    /// Identifiers of the clients connected right now, ascending.
    pub fn connected_clients(&self) -> Vec<ClientId> {
        match &self.running {
            Some(running) => registry::read(&running.registry).ids(),
            None => Vec::new(),
        }
    }

    /// Address the listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn status(&self) -> PipelineStatus {
        match &self.running {
            Some(running) => PipelineStatus {
                receive_running: running.receive_alive.load(Ordering::Acquire),
                transmit_running: running.transmit_alive.load(Ordering::Acquire),
            },
            None => PipelineStatus {
                receive_running: false,
                transmit_running: false,
            },
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for ServerSocket {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Shuts down and forgets every registered connection.
fn shutdown_all(registry: &RwLock<ClientRegistry>) {
    let connections = registry::write(registry).clear();
    for connection in connections {
        if let Err(e) = connection.shutdown() {
            debug!("Shutdown of client {} failed: {}", connection.id, e);
        }
    }
}
