//! Values exchanged between the I/O threads and the application

use std::fmt;

/// Small integer handle for one live connection, drawn from `0..capacity`.
pub type ClientId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    Disconnected,
    DataReceived,
}

/// Something the receive thread observed on a connection.
///
/// `payload` holds exactly the bytes of one read for `DataReceived` and is
/// empty otherwise. No framing is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub client_id: ClientId,
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

impl ReceivedEvent {
    pub fn connected(client_id: ClientId) -> Self {
        Self {
            client_id,
            kind: EventKind::Connected,
            payload: Vec::new(),
        }
    }

    pub fn disconnected(client_id: ClientId) -> Self {
        Self {
            client_id,
            kind: EventKind::Disconnected,
            payload: Vec::new(),
        }
    }

    pub fn data(client_id: ClientId, payload: Vec<u8>) -> Self {
        Self {
            client_id,
            kind: EventKind::DataReceived,
            payload,
        }
    }

    /// Payload of a `DataReceived` event, `None` for the other kinds.
    pub fn data_payload(&self) -> Option<&[u8]> {
        match self.kind {
            EventKind::DataReceived => Some(&self.payload),
            _ => None,
        }
    }
}

/// Final state of one send request.
///
/// A multi-target request is `Error` as soon as one target fails; bytes
/// already written to earlier targets are not taken back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    Error,
    /// The server was terminating before the request was started
    ShuttingDown,
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Success => write!(f, "success"),
            SendOutcome::Error => write!(f, "error"),
            SendOutcome::ShuttingDown => write!(f, "server shutting down"),
        }
    }
}
