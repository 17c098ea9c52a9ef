//! Periodic heartbeat loop.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::client::AsyncReporter;
use crate::error::SendError;

/// A pulse loop could not run to completion.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    /// The interval between heartbeats was zero.
    #[error("Pulse interval must be greater than zero")]
    ZeroInterval,

    /// A heartbeat could not be delivered.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Why a pulse loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseOutcome {
    /// The requested number of heartbeats was sent.
    Completed { sent: u64 },
    /// The shutdown signal fired first.
    Shutdown { sent: u64 },
}

impl PulseOutcome {
    /// Number of heartbeats delivered before the loop stopped.
    #[must_use]
    pub fn sent(self) -> u64 {
        match self {
            Self::Completed { sent } | Self::Shutdown { sent } => sent,
        }
    }
}

/// Sends a healthy heartbeat every `interval` until `limit` heartbeats have
/// gone out or `shutdown` becomes `true`.
///
/// The first heartbeat is sent immediately. The loop does not close the
/// reporter; the caller owns its lifecycle. A dropped shutdown sender is
/// treated as a shutdown request.
///
/// # Errors
///
/// Returns [`PulseError::ZeroInterval`] before sending anything if
/// `interval` is zero. Otherwise returns the first send failure; no further
/// heartbeats are attempted.
pub async fn run_pulse<R>(
    reporter: &mut R,
    interval: Duration,
    limit: Option<u64>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<PulseOutcome, PulseError>
where
    R: AsyncReporter + ?Sized,
{
    if interval.is_zero() {
        return Err(PulseError::ZeroInterval);
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent: u64 = 0;

    loop {
        if limit.is_some_and(|limit| sent >= limit) {
            return Ok(PulseOutcome::Completed { sent });
        }
        if *shutdown.borrow() {
            return Ok(PulseOutcome::Shutdown { sent });
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!(sent, "Pulse loop shutting down");
                    return Ok(PulseOutcome::Shutdown { sent });
                }
            }

            _ = ticker.tick() => {
                reporter.heartbeat().await?;
                sent = sent.saturating_add(1);
                tracing::trace!(sent, "Pulse heartbeat sent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Metadata, Status};
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Status>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl AsyncReporter for Recorder {
        async fn send(&mut self, status: Status, _metadata: Metadata) -> Result<(), SendError> {
            if self.fail_after.is_some_and(|n| self.sent.len() >= n) {
                return Err(SendError::NotConnected {
                    path: "/tmp/recorder.sock".into(),
                });
            }
            self.sent.push(status);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_stops_after_limit() {
        let (_tx, rx) = watch::channel(false);
        let mut recorder = Recorder::default();

        let outcome = run_pulse(&mut recorder, Duration::from_secs(1), Some(3), rx)
            .await
            .unwrap();

        assert_eq!(outcome, PulseOutcome::Completed { sent: 3 });
        assert_eq!(recorder.sent, vec![Status::Healthy; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_stops_on_shutdown_signal() {
        let (tx, rx) = watch::channel(false);
        let mut recorder = Recorder::default();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            tx.send(true).unwrap();
            tx
        });

        let outcome = run_pulse(&mut recorder, Duration::from_secs(1), None, rx)
            .await
            .unwrap();
        let _tx = stopper.await.unwrap();

        // Ticks at 0s, 1s and 2s; shutdown at 2.5s.
        assert_eq!(outcome, PulseOutcome::Shutdown { sent: 3 });
    }

    #[tokio::test]
    async fn pulse_returns_immediately_when_already_shut_down() {
        let (_tx, rx) = watch::channel(true);
        let mut recorder = Recorder::default();

        let outcome = run_pulse(&mut recorder, Duration::from_secs(1), None, rx)
            .await
            .unwrap();
        assert_eq!(outcome.sent(), 0);
        assert!(recorder.sent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_propagates_first_send_error() {
        let (_tx, rx) = watch::channel(false);
        let mut recorder = Recorder {
            fail_after: Some(2),
            ..Recorder::default()
        };

        let result = run_pulse(&mut recorder, Duration::from_millis(10), Some(5), rx).await;
        assert!(matches!(
            result,
            Err(PulseError::Send(SendError::NotConnected { .. }))
        ));
        assert_eq!(recorder.sent.len(), 2);
    }

    #[tokio::test]
    async fn pulse_rejects_zero_interval() {
        let (_tx, rx) = watch::channel(false);
        let mut recorder = Recorder::default();

        let result = run_pulse(&mut recorder, Duration::ZERO, Some(1), rx).await;
        assert!(matches!(result, Err(PulseError::ZeroInterval)));
        assert!(recorder.sent.is_empty());
    }

    #[tokio::test]
    async fn pulse_rejects_zero_interval_from_config() {
        let config: crate::config::ClientConfig = toml::from_str("interval_ms = 0").unwrap();
        let (_tx, rx) = watch::channel(false);
        let mut recorder = Recorder::default();

        let result = run_pulse(&mut recorder, config.interval(), Some(1), rx).await;
        assert!(matches!(result, Err(PulseError::ZeroInterval)));
    }
}
