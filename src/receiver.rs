//! Line-delimited heartbeat receiver.
//!
//! A diagnostic listener that accepts heartbeat clients on a Unix socket and
//! forwards every decoded line into a channel. It makes no scheduling or
//! restart decisions; the krill daemon does that.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};

use crate::client::DEFAULT_SOCKET_PATH;
use crate::protocol::HeartbeatMessage;

/// Capacity of the channel handed back by [`HeartbeatReceiver::start`].
pub const RECEIVER_BUFFER: usize = 1024;

/// Errors that can occur while starting a receiver.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("Failed to remove stale socket {}: {source}", .path.display())]
    RemoveStale {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to bind {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Listens for heartbeat clients on a Unix domain socket.
#[derive(Debug)]
pub struct HeartbeatReceiver {
    socket_path: PathBuf,
}

impl HeartbeatReceiver {
    /// Creates a receiver that will listen on `socket_path`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Creates a receiver on [`DEFAULT_SOCKET_PATH`].
    #[must_use]
    pub fn with_default_path() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }

    /// Returns the socket path this receiver listens on.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and spawns the accept loop on the current runtime.
    ///
    /// Each connection gets its own task. Decoded heartbeats arrive on the
    /// returned channel in the order each connection wrote them; lines that
    /// fail to decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a stale socket file cannot be removed or the
    /// socket cannot be bound.
    pub fn start(
        &self,
    ) -> Result<(ReceiverHandle, mpsc::Receiver<HeartbeatMessage>), ReceiverError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|source| {
                ReceiverError::RemoveStale {
                    path: self.socket_path.clone(),
                    source,
                }
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|source| {
            ReceiverError::Bind {
                path: self.socket_path.clone(),
                source,
            }
        })?;

        tracing::info!(path = %self.socket_path.display(), "Heartbeat receiver started");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(RECEIVER_BUFFER);
        tokio::spawn(accept_heartbeat_clients(listener, tx, shutdown_rx));

        Ok((
            ReceiverHandle {
                socket_path: self.socket_path.clone(),
                shutdown_tx,
            },
            rx,
        ))
    }
}

/// Delay between retries after `accept` fails, doubling up to a ceiling.
#[derive(Debug)]
struct AcceptBackoff {
    current: Duration,
}

impl AcceptBackoff {
    const INITIAL: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(1);

    fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::MAX);
        delay
    }

    fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

/// Accepts clients until `shutdown` flips, spawning one reader per client.
async fn accept_heartbeat_clients(
    listener: UnixListener,
    tx: mpsc::Sender<HeartbeatMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = AcceptBackoff::new();

    loop {
        let accepted = tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }

            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, _addr)) => {
                backoff.reset();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = read_heartbeats(stream, tx).await {
                        tracing::warn!(error = %e, "Heartbeat connection error");
                    }
                });
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    error = %e,
                    retry_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Failed to accept heartbeat client"
                );
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {}
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::info!("Heartbeat receiver shutting down");
}

/// Handle for a running receiver.
///
/// When dropped, the accept loop stops and the socket file is removed.
#[derive(Debug)]
pub struct ReceiverHandle {
    socket_path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
}

impl ReceiverHandle {
    /// Stops accepting new connections. Open connections drain until EOF.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Returns the socket path removed when this handle is dropped.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        self.shutdown();

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!(
                    path = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }
    }
}

/// Reads newline-delimited heartbeats from one client until EOF.
async fn read_heartbeats(
    stream: UnixStream,
    tx: mpsc::Sender<HeartbeatMessage>,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(stream).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match HeartbeatMessage::decode(&line) {
            Ok(message) => {
                tracing::debug!(
                    service = %message.service,
                    status = %message.status,
                    "Received heartbeat"
                );
                if tx.send(message).await.is_err() {
                    // Nobody is listening any more.
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, line = %line, "Skipping malformed heartbeat");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn receiver_new_uses_custom_path() {
        let receiver = HeartbeatReceiver::new("/custom/path.sock");
        assert_eq!(receiver.socket_path(), Path::new("/custom/path.sock"));
    }

    #[test]
    fn receiver_with_default_path_uses_default() {
        let receiver = HeartbeatReceiver::with_default_path();
        assert_eq!(receiver.socket_path(), Path::new(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn accept_backoff_doubles_up_to_ceiling_and_resets() {
        let mut backoff = AcceptBackoff::new();
        let delays: Vec<_> = (0..9).map(|_| backoff.next_delay()).collect();

        assert_eq!(delays[0], Duration::from_millis(10));
        assert_eq!(delays[1], Duration::from_millis(20));
        assert_eq!(delays[2], Duration::from_millis(40));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[8], AcceptBackoff::MAX);
        assert_eq!(backoff.next_delay(), AcceptBackoff::MAX);

        backoff.reset();
        assert_eq!(backoff.next_delay(), AcceptBackoff::INITIAL);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_clients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop.sock");
        let (handle, mut rx) = HeartbeatReceiver::new(&path).start().unwrap();

        handle.shutdown();
        // The accept task owns the only sender; it closes once the loop exits.
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recv.sock");
        let (_handle, mut rx) = HeartbeatReceiver::new(&path).start().unwrap();

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream
            .write_all(b"not json\n\n{\"type\":\"heartbeat\",\"service\":\"a\",\"status\":\"healthy\",\"metadata\":{}}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.service, "a");
    }

    #[tokio::test]
    async fn start_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();

        let (handle, _rx) = HeartbeatReceiver::new(&path).start().unwrap();
        assert!(UnixStream::connect(handle.socket_path()).await.is_ok());
    }

    #[tokio::test]
    async fn handle_drop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.sock");
        {
            let (_handle, _rx) = HeartbeatReceiver::new(&path).start().unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
