//! Reconnect loop around broker sessions
//!
//! The [`Supervisor`] runs one [`Session`] at a time until cancellation or a
//! non-retriable error. Each session is fully torn down (its client
//! disconnected) before the next one is created.

use super::output::Printer;
use super::session::Session;
use crate::config::StreamConfig;
use crate::error::{SessionError, SessionResult};
use crate::input::LineStream;
use crate::transport::Connector;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument};

/// Delay between session attempts
///
/// Attempt N sleeps `backoff_pattern[N - 1]` milliseconds, then
/// `sustained_delay` once the pattern is exhausted. The default retries
/// immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay in milliseconds after the pattern is exhausted
    pub sustained_delay: u64,
}

impl ReconnectPolicy {
    /// Retry without delay
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Follow `pattern`, then hold at its last element
    pub fn from_pattern(pattern: Vec<u64>) -> Self {
        let sustained_delay = pattern.last().copied().unwrap_or(0);
        Self {
            backoff_pattern: pattern,
            sustained_delay,
        }
    }

    /// Calculate backoff delay for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay);
        Duration::from_millis(millis)
    }
}

/// Outer reconnect loop
pub struct Supervisor<K: Connector> {
    connector: K,
    config: StreamConfig,
    policy: ReconnectPolicy,
    printer: Arc<Printer>,
    cancel: CancellationToken,
}

impl<K: Connector> Supervisor<K> {
    pub fn new(
        connector: K,
        config: StreamConfig,
        printer: Arc<Printer>,
        cancel: CancellationToken,
    ) -> Self {
        let policy = ReconnectPolicy::from_pattern(config.reconnect_backoff_ms.clone());
        Self {
            connector,
            config,
            policy,
            printer,
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run sessions until cancelled
    ///
    /// Returns `Ok(())` on cancellation and the session error when it is not
    /// retriable.
    pub async fn run(&self, lines: &mut LineStream) -> SessionResult<()> {
        let mut session_count: u64 = 0;
        // Failed attempts since the last session that reached the active state
        let mut attempt: u32 = 0;

        while !self.cancel.is_cancelled() {
            session_count += 1;
            let span = crate::session_span!(session = session_count, broker = %self.config.host);

            let created = Session::create(
                &self.connector,
                self.config.clone(),
                Arc::clone(&self.printer),
                self.cancel.clone(),
            );
            let result = match created {
                Ok(session) => session.run(lines).instrument(span).await,
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(()) => break,
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) => e,
            };

            match &error {
                SessionError::Decode(_) => error!(error = %error, "Session ended"),
                _ => debug!(error = %error, "Session ended, reconnecting"),
            }

            attempt = if error.was_connected() {
                1
            } else {
                attempt.saturating_add(1)
            };

            let delay = self.policy.calculate_backoff_delay(attempt);
            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(sessions = session_count, "Supervisor stopped");
        Ok(())
    }
}
