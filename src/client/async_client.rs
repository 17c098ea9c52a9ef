//! Cooperative client for tokio runtimes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use super::{AsyncReporter, ConnectionState, Link, DEFAULT_SOCKET_PATH};
use crate::error::{ConnectionError, SendError};
use crate::protocol::{HeartbeatMessage, Metadata, Status};

/// Async heartbeat client.
///
/// Every operation takes `&mut self`: one task owns the client and no lock
/// protects the stream. Suspension points are the connect, each write and
/// flush, and the shutdown in [`AsyncHeartbeatClient::close`].
///
/// If a send future is dropped before it completes, the line may have been
/// partially written. The client then treats the connection as broken rather
/// than risk corrupting the framing of the next line.
#[derive(Debug)]
pub struct AsyncHeartbeatClient {
    service: String,
    socket_path: PathBuf,
    link: Link<UnixStream>,
}

impl AsyncHeartbeatClient {
    /// Connects to the daemon at `socket_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] carrying the path and OS cause if the
    /// socket cannot be reached.
    pub async fn connect<P: AsRef<Path>>(
        service: impl Into<String>,
        socket_path: P,
    ) -> Result<Self, ConnectionError> {
        let service = service.into();
        let socket_path = socket_path.as_ref().to_path_buf();

        let stream = UnixStream::connect(&socket_path)
            .await
            .map_err(|source| ConnectionError {
                path: socket_path.clone(),
                source,
            })?;

        tracing::debug!(
            service = %service,
            path = %socket_path.display(),
            "Connected to daemon"
        );

        Ok(Self {
            service,
            socket_path,
            link: Link::Open(stream),
        })
    }

    /// Connects to the daemon at [`DEFAULT_SOCKET_PATH`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the socket cannot be reached.
    pub async fn connect_default(service: impl Into<String>) -> Result<Self, ConnectionError> {
        Self::connect(service, DEFAULT_SOCKET_PATH).await
    }

    /// Returns the service name reported in every heartbeat.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the daemon socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Returns `true` while heartbeats can still be written.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Writes and flushes one heartbeat line.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the client is closed or broken, or if the
    /// write fails. A failed write leaves the client disconnected.
    pub async fn send(&mut self, status: Status, metadata: Metadata) -> Result<(), SendError> {
        let line = HeartbeatMessage::new(self.service.as_str(), status, metadata).encode()?;

        // Held out of the slot while writing; only a completed write puts it back.
        let mut stream = match std::mem::replace(&mut self.link, Link::Broken) {
            Link::Open(stream) => stream,
            other => {
                self.link = other;
                return Err(SendError::NotConnected {
                    path: self.socket_path.clone(),
                });
            }
        };

        let result = async {
            stream.write_all(&line).await?;
            stream.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                self.link = Link::Open(stream);
                tracing::trace!(service = %self.service, status = %status, "Heartbeat sent");
                Ok(())
            }
            Err(source) => {
                tracing::debug!(
                    service = %self.service,
                    path = %self.socket_path.display(),
                    error = %source,
                    "Heartbeat write failed, dropping connection"
                );
                Err(SendError::Write {
                    path: self.socket_path.clone(),
                    source,
                })
            }
        }
    }

    /// Shuts the connection down. Idempotent; transport errors are absorbed.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.link, Link::Closed);
        if let Link::Open(mut stream) = previous {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "Ignoring socket shutdown error");
            }
            tracing::debug!(
                service = %self.service,
                path = %self.socket_path.display(),
                "Connection closed"
            );
        }
    }
}

#[async_trait]
impl AsyncReporter for AsyncHeartbeatClient {
    async fn send(&mut self, status: Status, metadata: Metadata) -> Result<(), SendError> {
        AsyncHeartbeatClient::send(self, status, metadata).await
    }

    async fn close(&mut self) {
        AsyncHeartbeatClient::close(self).await;
    }
}
