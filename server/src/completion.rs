//! Write-once completion cell handed back for every send request
//!
//! The transmit thread holds the [`Completion`] side and resolves it exactly
//! once; the caller keeps the [`CompletionHandle`] and may poll it, block on
//! it, or `.await` it.

use crate::event::SendOutcome;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Producer side of a completion cell. Consumed by [`Completion::resolve`].
#[derive(Debug)]
pub(crate) struct Completion {
    tx: oneshot::Sender<SendOutcome>,
}

impl Completion {
    pub(crate) fn resolve(self, outcome: SendOutcome) {
        // The caller may have dropped its handle; nobody is left to tell
        let _ = self.tx.send(outcome);
    }
}

/// Creates a linked producer/consumer pair.
pub(crate) fn completion_pair() -> (Completion, CompletionHandle) {
    let (tx, rx) = oneshot::channel();
    (
        Completion { tx },
        CompletionHandle {
            rx: Some(rx),
            outcome: None,
        },
    )
}

/// Consumer side of a completion cell.
///
/// If the producer disappears without resolving (the transmit thread
/// panicked), the handle reports [`SendOutcome::Error`].
#[derive(Debug)]
pub struct CompletionHandle {
    rx: Option<oneshot::Receiver<SendOutcome>>,
    outcome: Option<SendOutcome>,
}

impl CompletionHandle {
    /// A handle that is already resolved.
    pub fn resolved(outcome: SendOutcome) -> Self {
        Self {
            rx: None,
            outcome: Some(outcome),
        }
    }

    /// Returns the outcome if it is known, without blocking.
    pub fn try_outcome(&mut self) -> Option<SendOutcome> {
        if self.outcome.is_some() {
            return self.outcome;
        }

        let rx = self.rx.as_mut()?;
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => SendOutcome::Error,
        };
        self.settle(outcome)
    }

    pub fn is_resolved(&mut self) -> bool {
        self.try_outcome().is_some()
    }

    /// Blocks the calling thread until the request is resolved.
    ///
    /// Must not be called from inside an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(mut self) -> SendOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        match self.rx.take() {
            Some(rx) => rx.blocking_recv().unwrap_or(SendOutcome::Error),
            None => SendOutcome::Error,
        }
    }

    /// Waits up to `timeout` for the outcome.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<SendOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.try_outcome() {
                return Some(outcome);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    fn settle(&mut self, outcome: SendOutcome) -> Option<SendOutcome> {
        self.outcome = Some(outcome);
        self.rx = None;
        self.outcome
    }
}

impl Future for CompletionHandle {
    type Output = SendOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.outcome {
            return Poll::Ready(outcome);
        }

        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(SendOutcome::Error);
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(result) => {
                let outcome = result.unwrap_or(SendOutcome::Error);
                this.settle(outcome);
                Poll::Ready(outcome)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_until_resolved() {
        let (completion, mut handle) = completion_pair();
        assert_eq!(handle.try_outcome(), None);
        assert!(!handle.is_resolved());

        completion.resolve(SendOutcome::Success);
        assert_eq!(handle.try_outcome(), Some(SendOutcome::Success));
        // Reading again returns the same value
        assert_eq!(handle.try_outcome(), Some(SendOutcome::Success));
    }

    #[test]
    fn test_already_resolved_handle() {
        let mut handle = CompletionHandle::resolved(SendOutcome::Error);
        assert_eq!(handle.try_outcome(), Some(SendOutcome::Error));
        assert_eq!(handle.wait(), SendOutcome::Error);
    }

    #[test]
    fn test_dropped_producer_reports_error() {
        let (completion, mut handle) = completion_pair();
        drop(completion);
        assert_eq!(handle.try_outcome(), Some(SendOutcome::Error));
    }

    #[test]
    fn test_wait_blocks_until_other_thread_resolves() {
        let (completion, handle) = completion_pair();
        let resolver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completion.resolve(SendOutcome::ShuttingDown);
        });

        assert_eq!(handle.wait(), SendOutcome::ShuttingDown);
        resolver.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let (_completion, mut handle) = completion_pair();
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_await_handle() {
        let (completion, handle) = completion_pair();
        completion.resolve(SendOutcome::Success);
        assert_eq!(tokio_test::block_on(handle), SendOutcome::Success);
    }

    #[tokio::test]
    async fn test_await_resolved_from_thread() {
        let (completion, handle) = completion_pair();
        std::thread::spawn(move || completion.resolve(SendOutcome::Error));
        assert_eq!(handle.await, SendOutcome::Error);
    }
}
