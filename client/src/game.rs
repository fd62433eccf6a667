//! What the client knows about the other players

use log::{debug, warn};
use shared::{Message, ProtocolError};
use std::collections::BTreeMap;

/// Latest known position of every player, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct RemotePlayers {
    positions: BTreeMap<String, (i32, i32)>,
}

impl RemotePlayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a server message. Returns true if anything changed.
    pub fn apply(&mut self, message: &Message) -> bool {
        match message {
            Message::PlayerPosition { name, x, y } => {
                self.positions.insert(name.clone(), (*x, *y)) != Some((*x, *y))
            }
            Message::PlayerLeft { name } => {
                let removed = self.positions.remove(name).is_some();
                if removed {
                    debug!("Player '{}' left", name);
                }
                removed
            }
            other => {
                warn!("Unexpected message from server: {:?}", other);
                false
            }
        }
    }

    /// Parses and applies one line from the server.
    pub fn apply_line(&mut self, line: &str) -> Result<bool, ProtocolError> {
        let message = Message::parse(line)?;
        Ok(self.apply(&message))
    }

    pub fn position(&self, name: &str) -> Option<(i32, i32)> {
        self.positions.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, (i32, i32))> {
        self.positions
            .iter()
            .map(|(name, position)| (name.as_str(), *position))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_are_tracked_by_name() {
        let mut players = RemotePlayers::new();
        assert!(players.apply_line("3:Alice:2,18").unwrap());
        assert!(players.apply_line("3:Bob:12,18").unwrap());
        assert_eq!(players.len(), 2);

        // Same position again is not a change
        assert!(!players.apply_line("3:Alice:2,18").unwrap());
        assert!(players.apply_line("3:Alice:3,17").unwrap());
        assert_eq!(players.position("Alice"), Some((3, 17)));
    }

    #[test]
    fn test_player_left_removes_entry() {
        let mut players = RemotePlayers::new();
        players.apply_line("3:Bob:12,18").unwrap();
        assert!(players.apply_line("4:Bob").unwrap());
        assert!(players.is_empty());
        assert!(!players.apply_line("4:Bob").unwrap());
    }

    #[test]
    fn test_client_messages_are_ignored() {
        let mut players = RemotePlayers::new();
        assert!(!players.apply_line("2:259").unwrap());
        assert!(players.apply_line("3:x").is_err());
        assert!(players.is_empty());
    }
}
