//! Line protocol shared by the game server and its clients.
//!
//! Every application message is one line terminated by `\n` with the form
//! `<tag>:<body>`. Several lines may travel in one payload and a line may be
//! split across two reads, so consumers feed raw bytes into a [`LineBuffer`]
//! and parse the complete lines it hands back.

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
/// Maximum number of simultaneous connections the server accepts.
pub const MAX_CLIENTS: usize = 4;

pub const TAG_PLAYER_NAME: char = '1';
pub const TAG_KEY_PRESS: char = '2';
pub const TAG_PLAYER_POSITION: char = '3';
pub const TAG_PLAYER_LEFT: char = '4';

// Curses key codes, as reported by clients
pub const KEY_SPACE: i32 = 32;
pub const KEY_DOWN: i32 = 258;
pub const KEY_UP: i32 = 259;
pub const KEY_LEFT: i32 = 260;
pub const KEY_RIGHT: i32 = 261;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
    #[error("missing ':' separator in line {0:?}")]
    MissingSeparator(String),
    #[error("unknown message tag {0:?}")]
    UnknownTag(char),
    #[error("invalid key code {0:?}")]
    InvalidKeyCode(String),
    #[error("invalid player position {0:?}")]
    InvalidPosition(String),
}

/// One application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client announces its display name.
    PlayerName { name: String },
    /// Client reports a key press.
    KeyPress { key: i32 },
    /// Server reports one player's position.
    PlayerPosition { name: String, x: i32, y: i32 },
    /// Server reports that a named player has left.
    PlayerLeft { name: String },
}

impl Message {
    pub fn tag(&self) -> char {
        match self {
            Message::PlayerName { .. } => TAG_PLAYER_NAME,
            Message::KeyPress { .. } => TAG_KEY_PRESS,
            Message::PlayerPosition { .. } => TAG_PLAYER_POSITION,
            Message::PlayerLeft { .. } => TAG_PLAYER_LEFT,
        }
    }

    /// Encodes the message as a single line, including the trailing `\n`.
    pub fn encode(&self) -> String {
        match self {
            Message::PlayerName { name } => format!("{}:{}\n", TAG_PLAYER_NAME, name),
            Message::KeyPress { key } => format!("{}:{}\n", TAG_KEY_PRESS, key),
            Message::PlayerPosition { name, x, y } => {
                format!("{}:{}:{},{}\n", TAG_PLAYER_POSITION, name, x, y)
            }
            Message::PlayerLeft { name } => format!("{}:{}\n", TAG_PLAYER_LEFT, name),
        }
    }

    /// Parses one line. A trailing `\n` or `\r\n` is tolerated.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut chars = line.chars();
        let tag = chars.next().ok_or(ProtocolError::Empty)?;
        let body = chars
            .as_str()
            .strip_prefix(':')
            .ok_or_else(|| ProtocolError::MissingSeparator(line.to_string()))?;

        match tag {
            TAG_PLAYER_NAME => Ok(Message::PlayerName {
                name: body.to_string(),
            }),
            TAG_KEY_PRESS => body
                .trim()
                .parse::<i32>()
                .map(|key| Message::KeyPress { key })
                .map_err(|_| ProtocolError::InvalidKeyCode(body.to_string())),
            TAG_PLAYER_POSITION => {
                // Names may contain ':', the coordinates never do
                let (name, coords) = body
                    .rsplit_once(':')
                    .ok_or_else(|| ProtocolError::InvalidPosition(body.to_string()))?;
                let (x, y) = coords
                    .split_once(',')
                    .ok_or_else(|| ProtocolError::InvalidPosition(body.to_string()))?;
                let x = x
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidPosition(body.to_string()))?;
                let y = y
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidPosition(body.to_string()))?;
                Ok(Message::PlayerPosition {
                    name: name.to_string(),
                    x,
                    y,
                })
            }
            TAG_PLAYER_LEFT => Ok(Message::PlayerLeft {
                name: body.to_string(),
            }),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// Concatenates several messages into one payload.
pub fn encode_batch<'a, I>(messages: I) -> String
where
    I: IntoIterator<Item = &'a Message>,
{
    messages.into_iter().map(Message::encode).collect()
}

/// Reassembles `\n`-terminated lines from a stream of arbitrarily split chunks.
///
/// Bytes after the last newline are kept until a later chunk completes the
/// line. Empty lines are dropped.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let raw = &self.pending[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if !raw.is_empty() {
                lines.push(String::from_utf8_lossy(raw).into_owned());
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        lines
    }

    /// Bytes of the incomplete trailing line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
