//! Heartbeat wire format.
//!
//! Each heartbeat is a single compact JSON object followed by one line feed:
//!
//! ```text
//! {"type":"heartbeat","service":"lidar","status":"healthy","metadata":{}}
//! ```
//!
//! Keys always appear in the order `type`, `service`, `status`, `metadata`.
//! Metadata is kept in a [`BTreeMap`] so equal maps encode to identical bytes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata attached to a heartbeat.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key used by degraded reports.
pub const REASON_KEY: &str = "reason";

/// Builds the `{"reason": reason}` metadata sent with degraded reports.
#[must_use]
pub fn reason_metadata(reason: impl Into<String>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(REASON_KEY.to_string(), reason.into());
    metadata
}

/// Health status carried by a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The service is operating normally.
    Healthy,
    /// The service is running but impaired.
    Degraded,
}

impl Status {
    /// Lowercase name used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message discriminator. Heartbeat is the only kind a client emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Heartbeat,
}

/// A single status report from a service to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub service: String,
    pub status: Status,
    #[serde(default)]
    pub metadata: Metadata,
}

impl HeartbeatMessage {
    /// Creates a heartbeat for `service` with the given status and metadata.
    #[must_use]
    pub fn new(service: impl Into<String>, status: Status, metadata: Metadata) -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            service: service.into(),
            status,
            metadata,
        }
    }

    /// Healthy heartbeat with no metadata.
    #[must_use]
    pub fn healthy(service: impl Into<String>) -> Self {
        Self::new(service, Status::Healthy, Metadata::new())
    }

    /// Degraded heartbeat with `{"reason": reason}` metadata.
    #[must_use]
    pub fn degraded(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(service, Status::Degraded, reason_metadata(reason))
    }

    /// Encodes the message as one newline-terminated UTF-8 line.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization fails, which cannot happen for
    /// string-keyed string metadata.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decodes a single line produced by [`HeartbeatMessage::encode`].
    ///
    /// A trailing `\n` (or `\r\n`) is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a valid heartbeat object.
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end_matches(['\n', '\r']))
    }
}
