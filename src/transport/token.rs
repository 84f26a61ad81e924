//! Pending broker operations
//!
//! Every request handed to a [`BrokerClient`](super::BrokerClient) returns a
//! [`Token`]. The client keeps the matching [`Completer`] and resolves it
//! exactly once when the broker answers (or the connection dies). Dropping a
//! token discards the outcome; dropping a completer without resolving it
//! resolves the token with [`BrokerError::Abandoned`].

use super::BrokerError;
use std::time::Duration;
use tokio::sync::oneshot;

type Outcome = Result<(), BrokerError>;

/// Caller side of one outstanding broker request
#[derive(Debug)]
pub struct Token {
    rx: Option<oneshot::Receiver<Outcome>>,
    outcome: Option<Outcome>,
}

/// Client side of one outstanding broker request
#[derive(Debug)]
pub struct Completer {
    tx: oneshot::Sender<Outcome>,
}

impl Token {
    /// Create a token that resolves when the returned completer is used
    pub fn pending() -> (Completer, Token) {
        let (tx, rx) = oneshot::channel();
        (
            Completer { tx },
            Token {
                rx: Some(rx),
                outcome: None,
            },
        )
    }

    /// Create a token that is already resolved
    pub fn ready(outcome: Outcome) -> Token {
        Token {
            rx: None,
            outcome: Some(outcome),
        }
    }

    /// Non-blocking completion check
    pub fn is_complete(&mut self) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        let Some(rx) = self.rx.as_mut() else {
            return true;
        };
        match rx.try_recv() {
            Ok(outcome) => self.settle(outcome),
            Err(oneshot::error::TryRecvError::Empty) => false,
            Err(oneshot::error::TryRecvError::Closed) => self.settle(Err(BrokerError::Abandoned)),
        }
    }

    /// Wait up to `timeout` for the operation to resolve.
    ///
    /// Returns `true` once the outcome is available. Cancel-safe: a `false`
    /// return (or dropping the future) leaves the token pending.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        let Some(rx) = self.rx.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => self.settle(outcome),
            Ok(Err(_)) => self.settle(Err(BrokerError::Abandoned)),
            Err(_) => false,
        }
    }

    /// Take the outcome, `None` while still pending
    pub fn into_outcome(mut self) -> Option<Outcome> {
        if self.is_complete() {
            self.outcome.take()
        } else {
            None
        }
    }

    fn settle(&mut self, outcome: Outcome) -> bool {
        self.outcome = Some(outcome);
        self.rx = None;
        true
    }
}

impl Completer {
    /// Resolve the token. A token that was already dropped is ignored.
    pub fn complete(self, outcome: Outcome) {
        let _ = self.tx.send(outcome);
    }

    /// Whether the caller stopped waiting for this operation
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}
