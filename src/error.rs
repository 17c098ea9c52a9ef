//! Client error types.

use std::path::PathBuf;

/// The daemon socket could not be reached.
///
/// Returned only by client construction, never by a send.
#[derive(Debug, thiserror::Error)]
#[error("Failed to connect to daemon at {}: {source}", .path.display())]
pub struct ConnectionError {
    /// Socket path that was attempted.
    pub path: PathBuf,
    /// Underlying OS failure.
    #[source]
    pub source: std::io::Error,
}

impl ConnectionError {
    /// Returns the socket path that was attempted.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// A heartbeat could not be delivered to the transport.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The connection was closed, or dropped after an earlier failure.
    #[error("Not connected to daemon at {}", .path.display())]
    NotConnected { path: PathBuf },

    /// The transport reported a write failure.
    #[error("Failed to send heartbeat to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The message could not be encoded.
    #[error("Failed to encode heartbeat: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Any error produced by a heartbeat client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Send(#[from] SendError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn connection_error_display_includes_path_and_cause() {
        let err = ConnectionError {
            path: PathBuf::from("/tmp/missing.sock"),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        let display = err.to_string();
        assert!(display.contains("/tmp/missing.sock"));
        assert!(display.contains("No such file or directory"));
    }

    #[test]
    fn send_error_display() {
        let err = SendError::NotConnected {
            path: PathBuf::from("/tmp/krill.sock"),
        };
        assert_eq!(err.to_string(), "Not connected to daemon at /tmp/krill.sock");

        let err = SendError::Write {
            path: PathBuf::from("/tmp/krill.sock"),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to send heartbeat to /tmp/krill.sock: broken pipe"
        );
    }

    #[test]
    fn client_error_wraps_both_kinds() {
        let err: ClientError = SendError::NotConnected {
            path: PathBuf::from("/a.sock"),
        }
        .into();
        assert!(matches!(err, ClientError::Send(_)));
        assert_eq!(err.to_string(), "Not connected to daemon at /a.sock");

        let err: ClientError = ConnectionError {
            path: PathBuf::from("/b.sock"),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        }
        .into();
        assert!(matches!(err, ClientError::Connection(_)));
        assert!(err.to_string().contains("/b.sock"));
    }
}
