//! Transmit pipeline: the thread that writes queued payloads to clients
//!
//! Requests are served strictly in submission order. Each wake-up moves
//! everything queued so far into a local batch, so producers never wait on
//! a socket write.

use crate::completion::Completion;
use crate::event::{ClientId, SendOutcome};
use crate::registry::{self, SharedRegistry};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// One payload for one or more clients, plus the cell its outcome goes to.
#[derive(Debug)]
pub(crate) struct SendRequest {
    pub(crate) targets: Vec<ClientId>,
    pub(crate) payload: Vec<u8>,
    pub(crate) completion: Completion,
}

#[derive(Debug)]
pub(crate) enum TxCommand {
    Send(SendRequest),
    Terminate,
}

pub(crate) struct TransmitPipeline {
    commands: mpsc::UnboundedReceiver<TxCommand>,
    registry: SharedRegistry,
    terminate: Arc<AtomicBool>,
    write_timeout: Duration,
}

impl TransmitPipeline {
    pub(crate) fn new(
        commands: mpsc::UnboundedReceiver<TxCommand>,
        registry: SharedRegistry,
        terminate: Arc<AtomicBool>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            commands,
            registry,
            terminate,
            write_timeout,
        }
    }

    /// Runs until a terminate command arrives or every sender is gone.
    ///
    /// Requests that were queued but not started by then are resolved as
    /// [`SendOutcome::ShuttingDown`].
    pub(crate) fn run(mut self) {
        info!("Transmit pipeline: waiting for send requests");
        let mut batch = VecDeque::new();

        loop {
            // Sleeps while the queue is empty
            let Some(first) = self.commands.blocking_recv() else {
                debug!("Transmit pipeline: all producers gone");
                break;
            };
            batch.push_back(first);
            while let Ok(command) = self.commands.try_recv() {
                batch.push_back(command);
            }
            debug!("Transmit pipeline: took {} queued commands", batch.len());

            let mut terminate = false;
            for command in batch.drain(..) {
                match command {
                    TxCommand::Terminate => terminate = true,
                    TxCommand::Send(request) => {
                        let outcome = if terminate || self.terminate.load(Ordering::Acquire) {
                            SendOutcome::ShuttingDown
                        } else {
                            self.transmit(&request.targets, &request.payload)
                        };
                        request.completion.resolve(outcome);
                    }
                }
            }

            if terminate {
                info!("Transmit pipeline: request to terminate");
                break;
            }
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let TxCommand::Send(request) = command {
                request.completion.resolve(SendOutcome::ShuttingDown);
            }
        }
    }

    /// Writes the payload to each target in order.
    ///
    /// Stops at the first target that is unknown or fails; earlier targets
    /// keep what they were sent.
    fn transmit(&self, targets: &[ClientId], payload: &[u8]) -> SendOutcome {
        for &id in targets {
            let connection = registry::read(&self.registry).resolve(id);
            let Some(connection) = connection else {
                warn!("Failed to send data to client {}: unknown client", id);
                return SendOutcome::Error;
            };

            if let Err(e) = self.write_all(connection.writer(), payload) {
                warn!("Failed to send data to client {}: {}", id, e);
                return SendOutcome::Error;
            }
            debug!("Sent {} bytes to client {}", payload.len(), id);
        }
        SendOutcome::Success
    }

    /// Writes every byte, retrying partial writes.
    ///
    /// The socket is non-blocking; a full send buffer is retried until
    /// `write_timeout` has passed or the server starts terminating.
    fn write_all(&self, mut writer: &TcpStream, bytes: &[u8]) -> io::Result<()> {
        let deadline = Instant::now() + self.write_timeout;
        let mut sent = 0;

        while sent < bytes.len() {
            match writer.write(&bytes[sent..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed while writing",
                    ))
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.terminate.load(Ordering::Acquire) {
                        return Err(io::Error::new(
                            io::ErrorKind::Interrupted,
                            "server terminating",
                        ));
                    }
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("send buffer full after {} of {} bytes", sent, bytes.len()),
                        ));
                    }
                    thread::sleep(WRITE_RETRY_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
