//! Heartbeat clients.
//!
//! Two interchangeable clients speak the same wire contract:
//!
//! - [`HeartbeatClient`] blocks the calling thread. One lock serializes every
//!   operation, so a single instance can be shared across threads via `Arc`.
//! - [`AsyncHeartbeatClient`] runs on a tokio runtime and takes `&mut self`.
//!   It has no lock; exclusive ownership is enforced by the borrow checker.
//!
//! Both implement the same capability set ([`Reporter`] and [`AsyncReporter`]
//! respectively) and follow one lifecycle:
//!
//! ```text
//! connect --ok--> Connected --write fails--> Disconnected
//!                     |                           |
//!                     +---------- close ----------+--> Closed (terminal)
//! ```
//!
//! No operation retries or reconnects. A broken client stays broken until it
//! is dropped and a new one is connected.
//!
//! # Example
//!
//! ```no_run
//! use krill_sdk::{HeartbeatClient, Reporter};
//!
//! # fn example() -> Result<(), krill_sdk::ClientError> {
//! let client = HeartbeatClient::new("vision-pipeline")?;
//! client.heartbeat()?;
//! client.report_degraded("High latency detected")?;
//! client.close();
//! # Ok(())
//! # }
//! ```

mod async_client;
mod blocking;

pub use async_client::AsyncHeartbeatClient;
pub use blocking::HeartbeatClient;

use async_trait::async_trait;

use crate::error::SendError;
use crate::protocol::{reason_metadata, Metadata, Status};

/// Default socket path of the krill daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/krill.sock";

/// Lifecycle state of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport failed mid-session; sends are rejected.
    Disconnected,
    /// Connected and accepting sends.
    Connected,
    /// Explicitly closed. Terminal.
    Closed,
}

/// Connection slot owned by a client.
#[derive(Debug)]
pub(crate) enum Link<S> {
    Open(S),
    Broken,
    Closed,
}

impl<S> Link<S> {
    pub(crate) fn state(&self) -> ConnectionState {
        match self {
            Self::Open(_) => ConnectionState::Connected,
            Self::Broken => ConnectionState::Disconnected,
            Self::Closed => ConnectionState::Closed,
        }
    }
}

/// Blocking heartbeat operations.
pub trait Reporter {
    /// Writes one heartbeat line with the given status and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the client is not connected or the write fails.
    fn send(&self, status: Status, metadata: Metadata) -> Result<(), SendError>;

    /// Releases the connection. Never fails and may be called repeatedly.
    fn close(&self);

    /// Sends a healthy heartbeat with no metadata.
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    fn heartbeat(&self) -> Result<(), SendError> {
        self.send(Status::Healthy, Metadata::new())
    }

    /// Sends a healthy heartbeat with caller-supplied metadata.
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    fn heartbeat_with_metadata(&self, metadata: Metadata) -> Result<(), SendError> {
        self.send(Status::Healthy, metadata)
    }

    /// Reports degraded status with `{"reason": reason}` metadata.
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    fn report_degraded(&self, reason: &str) -> Result<(), SendError> {
        self.send(Status::Degraded, reason_metadata(reason))
    }

    /// Alias of [`Reporter::heartbeat`].
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    fn report_healthy(&self) -> Result<(), SendError> {
        self.heartbeat()
    }
}

/// Suspending heartbeat operations.
#[async_trait]
pub trait AsyncReporter: Send {
    /// Writes one heartbeat line with the given status and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the client is not connected or the write fails.
    async fn send(&mut self, status: Status, metadata: Metadata) -> Result<(), SendError>;

    /// Shuts the connection down. Never fails and may be called repeatedly.
    async fn close(&mut self);

    /// Sends a healthy heartbeat with no metadata.
    ///
    /// # Errors
    ///
    /// See [`AsyncReporter::send`].
    async fn heartbeat(&mut self) -> Result<(), SendError> {
        self.send(Status::Healthy, Metadata::new()).await
    }

    /// Sends a healthy heartbeat with caller-supplied metadata.
    ///
    /// # Errors
    ///
    /// See [`AsyncReporter::send`].
    async fn heartbeat_with_metadata(&mut self, metadata: Metadata) -> Result<(), SendError> {
        self.send(Status::Healthy, metadata).await
    }

    /// Reports degraded status with `{"reason": reason}` metadata.
    ///
    /// # Errors
    ///
    /// See [`AsyncReporter::send`].
    async fn report_degraded(&mut self, reason: &str) -> Result<(), SendError> {
        self.send(Status::Degraded, reason_metadata(reason)).await
    }

    /// Alias of [`AsyncReporter::heartbeat`].
    ///
    /// # Errors
    ///
    /// See [`AsyncReporter::send`].
    async fn report_healthy(&mut self) -> Result<(), SendError> {
        self.heartbeat().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_mapping() {
        assert_eq!(Link::Open(()).state(), ConnectionState::Connected);
        assert_eq!(Link::<()>::Broken.state(), ConnectionState::Disconnected);
        assert_eq!(Link::<()>::Closed.state(), ConnectionState::Closed);
    }
}
