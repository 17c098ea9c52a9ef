//! Krill SDK - Heartbeat client for services supervised by the krill daemon.
//!
//! A service reports liveness by writing line-delimited JSON heartbeats to
//! the daemon's Unix socket. Nothing is read back.
//!
//! - [`HeartbeatClient`]: blocking, shareable across threads.
//! - [`AsyncHeartbeatClient`]: tokio-based, single owner.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod pulse;
pub mod receiver;

pub use client::{
    AsyncHeartbeatClient, AsyncReporter, ConnectionState, HeartbeatClient, Reporter,
    DEFAULT_SOCKET_PATH,
};
pub use config::{ClientConfig, ConfigError, ConfigLoader};
pub use error::{ClientError, ConnectionError, SendError};
pub use protocol::{reason_metadata, HeartbeatMessage, Metadata, Status};
pub use pulse::{run_pulse, PulseError, PulseOutcome};
pub use receiver::{HeartbeatReceiver, ReceiverError, ReceiverHandle};
