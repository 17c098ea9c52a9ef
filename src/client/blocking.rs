//! Thread-safe blocking client.

use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ConnectionState, Link, Reporter, DEFAULT_SOCKET_PATH};
use crate::error::{ConnectionError, SendError};
use crate::protocol::{HeartbeatMessage, Metadata, Status};

/// Blocking heartbeat client.
///
/// The connection is opened in the constructor and guarded by a mutex, so
/// operations from concurrent threads never interleave on the stream. A
/// `close` racing a send either lets the send finish first or makes it fail
/// with [`SendError::NotConnected`].
///
/// Dropping the client closes the connection.
#[derive(Debug)]
pub struct HeartbeatClient {
    service: String,
    socket_path: PathBuf,
    link: Mutex<Link<UnixStream>>,
}

impl HeartbeatClient {
    /// Connects to the daemon at [`DEFAULT_SOCKET_PATH`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the socket cannot be reached.
    pub fn new(service: impl Into<String>) -> Result<Self, ConnectionError> {
        Self::connect(service, DEFAULT_SOCKET_PATH)
    }

    /// Connects to the daemon at `socket_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] carrying the path and OS cause if the
    /// socket is missing, refuses the connection, or is not accessible.
    pub fn connect<P: AsRef<Path>>(
        service: impl Into<String>,
        socket_path: P,
    ) -> Result<Self, ConnectionError> {
        let service = service.into();
        let socket_path = socket_path.as_ref().to_path_buf();

        let stream = UnixStream::connect(&socket_path).map_err(|source| ConnectionError {
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
            link: Mutex::new(Link::Open(stream)),
        })
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
        self.lock().state()
    }

    /// Returns `true` while heartbeats can still be written.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Writes one heartbeat line.
    ///
    /// A write failure drops the connection; every later send returns
    /// [`SendError::NotConnected`].
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the client is closed or broken, or if the
    /// write fails.
    pub fn send(&self, status: Status, metadata: Metadata) -> Result<(), SendError> {
        let line = HeartbeatMessage::new(self.service.as_str(), status, metadata).encode()?;

        let mut link = self.lock();
        let Link::Open(stream) = &mut *link else {
            return Err(SendError::NotConnected {
                path: self.socket_path.clone(),
            });
        };

        let result = stream.write_all(&line).and_then(|()| stream.flush());
        if let Err(source) = result {
            tracing::debug!(
                service = %self.service,
                path = %self.socket_path.display(),
                error = %source,
                "Heartbeat write failed, dropping connection"
            );
            *link = Link::Broken;
            return Err(SendError::Write {
                path: self.socket_path.clone(),
                source,
            });
        }

        tracing::trace!(service = %self.service, status = %status, "Heartbeat sent");
        Ok(())
    }

    /// Closes the connection. Idempotent; transport errors are absorbed.
    pub fn close(&self) {
        let mut link = self.lock();
        let previous = std::mem::replace(&mut *link, Link::Closed);
        if let Link::Open(stream) = previous {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                tracing::debug!(error = %e, "Ignoring socket shutdown error");
            }
            tracing::debug!(
                service = %self.service,
                path = %self.socket_path.display(),
                "Connection closed"
            );
        }
    }

    // The guarded link is always in a valid state, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, Link<UnixStream>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reporter for HeartbeatClient {
    fn send(&self, status: Status, metadata: Metadata) -> Result<(), SendError> {
        HeartbeatClient::send(self, status, metadata)
    }

    fn close(&self) {
        HeartbeatClient::close(self);
    }
}

impl Drop for HeartbeatClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    fn listener() -> (tempfile::TempDir, PathBuf, UnixListener) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("krill.sock");
        let listener = UnixListener::bind(&path).unwrap();
        (dir, path, listener)
    }

    #[test]
    fn client_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HeartbeatClient>();
    }

    #[test]
    fn connect_records_service_and_path() {
        let (_dir, path, _listener) = listener();
        let client = HeartbeatClient::connect("lidar", &path).unwrap();
        assert_eq!(client.service(), "lidar");
        assert_eq!(client.socket_path(), path.as_path());
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[test]
    fn connect_without_listener_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let err = HeartbeatClient::connect("lidar", &path).unwrap_err();
        assert_eq!(err.path(), path.as_path());
        assert!(err.to_string().contains(&path.display().to_string()));
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let (_dir, path, _listener) = listener();
        let client = HeartbeatClient::connect("lidar", &path).unwrap();
        client.close();
        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            client.send(Status::Healthy, Metadata::new()),
            Err(SendError::NotConnected { .. })
        ));
    }

    #[test]
    fn drop_closes_connection() {
        let (_dir, path, listener) = listener();
        {
            let client = HeartbeatClient::connect("lidar", &path).unwrap();
            client.send(Status::Healthy, Metadata::new()).unwrap();
        }
        let (mut conn, _) = listener.accept().unwrap();
        let mut received = String::new();
        // Reaches EOF only because the client released the socket on drop.
        conn.read_to_string(&mut received).unwrap();
        assert_eq!(received.lines().count(), 1);
    }

    #[test]
    fn write_failure_marks_connection_broken() {
        let (_dir, path, listener) = listener();
        let client = HeartbeatClient::connect("lidar", &path).unwrap();
        let (conn, _) = listener.accept().unwrap();
        drop(conn);
        drop(listener);

        // The first write after the peer hangs up may still be buffered by the
        // kernel; keep writing until the broken pipe surfaces.
        let mut failure = None;
        for _ in 0..64 {
            if let Err(e) = client.send(Status::Healthy, Metadata::new()) {
                failure = Some(e);
                break;
            }
        }
        assert!(matches!(failure, Some(SendError::Write { .. })));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.send(Status::Healthy, Metadata::new()),
            Err(SendError::NotConnected { .. })
        ));

        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
