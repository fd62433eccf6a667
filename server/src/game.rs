//! Authoritative game state and the fixed-rate loop driving it

use crate::completion::CompletionHandle;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::event::{ClientId, EventKind, ReceivedEvent};
use crate::socket::ServerSocket;
use log::{debug, info, warn};
use shared::{encode_batch, LineBuffer, Message, KEY_LEFT, KEY_RIGHT, KEY_SPACE, KEY_UP};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub const MAP_WIDTH: i32 = 76;
pub const PLAYER_WIDTH: i32 = 3;
pub const SPAWN_Y: i32 = 18;
/// Length of a jump in ticks: half going up, half coming down
pub const JUMP_TICKS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub name: String,
    pub x: i32,
    pub y: i32,
    jump_ticks: u32,
}

impl Player {
    /// Places a new player for `client_id` on the floor, spread out by id.
    pub fn spawn(client_id: ClientId) -> Self {
        let offset = i32::try_from(client_id).unwrap_or(0).saturating_mul(10);
        Self {
            name: String::new(),
            x: (2 + offset).min(MAP_WIDTH - PLAYER_WIDTH),
            y: SPAWN_Y,
            jump_ticks: 0,
        }
    }

    /// Applies one key press. Unknown keys are ignored.
    pub fn handle_key(&mut self, key: i32) {
        match key {
            KEY_LEFT => self.x = (self.x - 1).max(0),
            KEY_RIGHT => self.x = (self.x + 1).min(MAP_WIDTH - PLAYER_WIDTH),
            KEY_UP | KEY_SPACE => self.start_jump(),
            _ => debug!("Ignoring key {} for player '{}'", key, self.name),
        }
    }

    pub fn start_jump(&mut self) {
        if !self.is_jumping() {
            self.jump_ticks = JUMP_TICKS;
        }
    }

    pub fn is_jumping(&self) -> bool {
        self.jump_ticks > 0
    }

    /// Advances the player by one tick.
    pub fn update(&mut self) {
        if self.jump_ticks > 0 {
            if self.jump_ticks > JUMP_TICKS / 2 {
                self.y -= 1;
            } else {
                self.y += 1;
            }
            self.jump_ticks -= 1;
        }
    }

    pub fn position_message(&self) -> Message {
        Message::PlayerPosition {
            name: self.name.clone(),
            x: self.x,
            y: self.y,
        }
    }
}

/// Game simulation on top of a [`ServerSocket`].
///
/// Each tick drains network input, advances every player and sends the
/// new positions to every client.
pub struct GameServer {
    socket: ServerSocket,
    players: BTreeMap<ClientId, Player>,
    buffers: HashMap<ClientId, LineBuffer>,
    tick: u64,
}

impl GameServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            socket: ServerSocket::new(config),
            players: BTreeMap::new(),
            buffers: HashMap::new(),
            tick: 0,
        }
    }

    pub fn start(&mut self, port: u16) -> Result<()> {
        self.socket.initialize(port)
    }

    pub fn shutdown(&mut self) {
        self.socket.terminate();
        self.players.clear();
        self.buffers.clear();
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn socket(&self) -> &ServerSocket {
        &self.socket
    }

    pub fn player(&self, client_id: ClientId) -> Option<&Player> {
        self.players.get(&client_id)
    }

    pub fn players(&self) -> impl Iterator<Item = (&ClientId, &Player)> {
        self.players.iter()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Runs one tick and returns the handles of every send it queued.
    pub fn tick(&mut self) -> Vec<CompletionHandle> {
        let mut sends = self.process_network_input();
        self.update();
        sends.extend(self.transmit_updates());
        sends
    }

    /// Applies every event received since the last call.
    pub fn process_network_input(&mut self) -> Vec<CompletionHandle> {
        let events = self.socket.drain_received();
        events
            .into_iter()
            .filter_map(|event| self.apply_event(event))
            .collect()
    }

    /// Applies one network event to the game state.
    ///
    /// Returns the handle of the "player left" notice when a disconnect
    /// produced one.
    pub fn apply_event(&mut self, event: ReceivedEvent) -> Option<CompletionHandle> {
        let client_id = event.client_id;
        match event.kind {
            EventKind::Connected => {
                let player = Player::spawn(client_id);
                info!(
                    "New client {} spawned at ({}, {})",
                    client_id, player.x, player.y
                );
                self.players.insert(client_id, player);
                self.buffers.insert(client_id, LineBuffer::new());
                None
            }
            EventKind::Disconnected => {
                self.buffers.remove(&client_id);
                let Some(player) = self.players.remove(&client_id) else {
                    warn!("Can't remove unknown client {}", client_id);
                    return None;
                };
                info!("Client {} ('{}') disconnected", client_id, player.name);

                let others: Vec<ClientId> = self.players.keys().copied().collect();
                if others.is_empty() {
                    return None;
                }
                let notice = Message::PlayerLeft { name: player.name };
                Some(self.socket.submit(others, notice.encode()))
            }
            EventKind::DataReceived => {
                let lines = self
                    .buffers
                    .entry(client_id)
                    .or_default()
                    .push(&event.payload);
                for line in lines {
                    self.process_line(client_id, &line);
                }
                None
            }
        }
    }

    /// Applies one complete protocol line sent by `client_id`.
    pub fn process_line(&mut self, client_id: ClientId, line: &str) {
        let Some(player) = self.players.get_mut(&client_id) else {
            warn!("Data from unknown client {}: {:?}", client_id, line);
            return;
        };

        match Message::parse(line) {
            Ok(Message::PlayerName { name }) => {
                info!("Client {} is now '{}'", client_id, name);
                player.name = name;
            }
            Ok(Message::KeyPress { key }) => player.handle_key(key),
            Ok(other) => warn!(
                "Unexpected message tag '{}' from client {}",
                other.tag(),
                client_id
            ),
            Err(e) => warn!("Malformed line from client {}: {}", client_id, e),
        }
    }

    pub fn update(&mut self) {
        self.tick += 1;
        for player in self.players.values_mut() {
            player.update();
        }
    }

    /// Sends every named player's position to every client.
    pub fn transmit_updates(&self) -> Option<CompletionHandle> {
        let positions: Vec<Message> = self
            .players
            .values()
            .filter(|player| !player.name.is_empty())
            .map(Player::position_message)
            .collect();
        if positions.is_empty() {
            return None;
        }

        let targets: Vec<ClientId> = self.players.keys().copied().collect();
        Some(self.socket.submit(targets, encode_batch(&positions)))
    }

    /// Runs the game loop at `tick_rate` ticks per second until the
    /// future is dropped.
    pub async fn run(&mut self, tick_rate: u32) {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / f64::from(tick_rate.max(1))));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Game loop running at {} ticks per second", tick_rate.max(1));

        loop {
            ticker.tick().await;
            let tick = self.tick;
            for handle in self.tick() {
                tokio::spawn(async move {
                    let outcome = handle.await;
                    if !outcome.is_success() {
                        warn!("Update for tick {} not delivered: {}", tick, outcome);
                    }
                });
            }
        }
    }
}
