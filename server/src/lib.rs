//! # Game Server Library
//!
//! Multi-client TCP server for the fighting game, plus the authoritative
//! game simulation built on top of it.
//!
//! ## Socket Layer
//!
//! [`socket::ServerSocket`] accepts up to a fixed number of clients and runs
//! two dedicated threads:
//! - **Receive thread**: waits on a readiness multiplexer, accepts new
//!   connections, reads whatever clients send and queues it as
//!   [`event::ReceivedEvent`]s
//! - **Transmit thread**: writes queued payloads to their target clients in
//!   submission order and resolves a [`completion::CompletionHandle`] per
//!   request
//!
//! The application never touches a socket. It drains received events and
//! submits payloads, both from any thread and without blocking on I/O.
//!
//! Clients are identified by small integers drawn from `0..capacity`. The
//! smallest free identifier is always handed out first and is returned to
//! the pool when the client disconnects.
//!
//! ## Game Layer
//!
//! [`game::GameServer`] drives the simulation at a fixed tick rate. Each
//! tick drains network input, advances every player and sends all
//! positions back to every client using the line protocol from the
//! `shared` crate.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::socket::ServerSocket;
//!
//! let mut socket = ServerSocket::new(ServerConfig::default());
//! socket.initialize(8080)?;
//!
//! for event in socket.drain_received() {
//!     println!("{:?}", event);
//! }
//!
//! let outcome = socket.submit(vec![0], "3:Alice:2,18\n").wait();
//! println!("send finished: {}", outcome);
//!
//! socket.terminate();
//! # Ok::<(), server::error::ServerError>(())
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod event;
pub mod game;
mod poller;
mod receiver;
pub mod registry;
pub mod socket;
mod transmitter;
