//! # Game Client Library
//!
//! Terminal client for the fighting game server. It connects over TCP,
//! announces a player name, sends key presses and keeps track of where
//! every player is according to the server.
//!
//! ## Module Organization
//!
//! ### Socket Module (`socket`)
//! Non-blocking connection to the server:
//! - Connecting to a resolved server address
//! - Draining everything received so far without blocking
//! - Writing whole payloads, retrying partial writes
//!
//! ### Game Module (`game`)
//! Positions of all players, updated from the server's position and
//! "player left" lines.
//!
//! ### Input Module (`input`)
//! Maps typed commands and bot choices to the key codes the server
//! understands.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::RemotePlayers;
//! use client::socket::ClientSocket;
//! use shared::{LineBuffer, Message, KEY_UP};
//!
//! let mut socket = ClientSocket::connect("127.0.0.1:8080")?;
//! socket.send_message(&Message::PlayerName { name: "Alice".into() })?;
//! socket.send_message(&Message::KeyPress { key: KEY_UP })?;
//!
//! let mut lines = LineBuffer::new();
//! let mut players = RemotePlayers::new();
//! for chunk in socket.receive().chunks {
//!     for line in lines.push(&chunk) {
//!         players.apply_line(&line)?;
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod game;
pub mod input;
pub mod socket;
