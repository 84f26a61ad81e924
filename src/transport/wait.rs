//! Bounded waiting on pending broker operations
//!
//! Broker requests are asynchronous, the bridge's control flow is not. [`wait`]
//! polls a [`Token`] every [`POLL_INTERVAL`] until it resolves, the deadline
//! passes, or the cancellation token fires. On timeout or cancellation the
//! token is dropped and whatever the broker eventually answers is discarded.

use super::{BrokerError, Token};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval between completion checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Deadline applied to connect, subscribe and publish
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Why a bounded wait did not produce a successful outcome
#[derive(Debug, Error)]
pub enum WaitError {
    /// The process-wide cancellation signal fired first
    #[error("operation cancelled")]
    Cancelled,
    /// Still unresolved locally when the deadline passed.
    /// The broker may yet apply the operation.
    #[error("operation did not complete within {0:?}")]
    DeadlineExceeded(Duration),
    /// The operation resolved with an error
    #[error(transparent)]
    Operation(#[from] BrokerError),
}

impl WaitError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled)
    }
}

/// Wait for `token` with the standard poll interval
pub async fn wait(
    cancel: &CancellationToken,
    token: Token,
    deadline: Duration,
) -> Result<(), WaitError> {
    wait_with_interval(cancel, token, deadline, POLL_INTERVAL).await
}

/// Wait for `token`, checking for completion every `interval`
pub async fn wait_with_interval(
    cancel: &CancellationToken,
    mut token: Token,
    deadline: Duration,
    interval: Duration,
) -> Result<(), WaitError> {
    let expires_at = Instant::now() + deadline;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        let remaining = expires_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(WaitError::DeadlineExceeded(deadline));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            done = token.wait_timeout(interval.min(remaining)) => {
                if done {
                    break;
                }
            }
        }
    }

    token
        .into_outcome()
        .unwrap_or(Err(BrokerError::Abandoned))
        .map_err(WaitError::Operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_success() {
        let cancel = CancellationToken::new();
        let result = wait(&cancel, Token::ready(Ok(())), DEFAULT_DEADLINE).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_returns_operation_error() {
        let cancel = CancellationToken::new();
        let token = Token::ready(Err(BrokerError::RequestFailed("queue full".to_string())));

        let result = wait(&cancel, token, DEFAULT_DEADLINE).await;
        assert!(matches!(
            result,
            Err(WaitError::Operation(BrokerError::RequestFailed(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_hits_deadline_for_unresolved_operation() {
        let cancel = CancellationToken::new();
        let (completer, token) = Token::pending();
        let start = Instant::now();

        let result = wait(&cancel, token, Duration::from_secs(2)).await;

        assert!(matches!(result, Err(WaitError::DeadlineExceeded(_))));
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
        // The outcome is discarded, not awaited further
        assert!(completer.is_abandoned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_within_one_poll_interval() {
        let cancel = CancellationToken::new();
        let (_completer, token) = Token::pending();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = wait(&cancel, token, DEFAULT_DEADLINE).await;

        assert!(matches!(result, Err(WaitError::Cancelled)));
        assert!(start.elapsed() <= Duration::from_millis(1200) + POLL_INTERVAL);
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_completer, token) = Token::pending();

        let result = wait(&cancel, token, DEFAULT_DEADLINE).await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_within_deadline_succeeds() {
        let cancel = CancellationToken::new();
        let (completer, token) = Token::pending();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1700)).await;
            completer.complete(Ok(()));
        });

        let result = wait(&cancel, token, DEFAULT_DEADLINE).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_operation_is_an_error() {
        let cancel = CancellationToken::new();
        let (completer, token) = Token::pending();
        drop(completer);

        let result = wait(&cancel, token, DEFAULT_DEADLINE).await;
        assert!(matches!(
            result,
            Err(WaitError::Operation(BrokerError::Abandoned))
        ));
    }
}
