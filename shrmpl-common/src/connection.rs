//! # Transport Connections
//!
//! Purpose: Give every client one owned transport that is either fully usable
//! or fully closed, over a plain TCP socket or a mutually authenticated TLS
//! session.
//!
//! ## Design Principles
//! 1. **One Owner**: A [`Connection`] belongs to exactly one client instance.
//! 2. **Same Surface**: Plain and TLS variants both expose `Read + Write` and
//!    `close`, so protocol code never branches on the transport.
//! 3. **Checked State**: [`ConnectionState`] replaces null checks with an
//!    explicit Disconnected/Connected enum.
//! 4. **Drop On Failure**: A transport error discards the connection instead of
//!    leaving a half-read stream behind for the next command.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use rustls::{ClientConnection, StreamOwned};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default socket read/write timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket options applied when a client opens its TCP stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpOptions {
    /// Upper bound on the TCP handshake.
    pub connect_timeout: Duration,
    /// Receive timeout; bounds every blocking read.
    pub read_timeout: Option<Duration>,
    /// Send timeout; bounds every blocking write.
    pub write_timeout: Option<Duration>,
    /// Disable Nagle so small commands are flushed immediately.
    pub nodelay: bool,
}

impl Default for TcpOptions {
    fn default() -> Self {
        TcpOptions {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Some(DEFAULT_IO_TIMEOUT),
            write_timeout: Some(DEFAULT_IO_TIMEOUT),
            nodelay: true,
        }
    }
}

impl TcpOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

/// Resolves `host:port` and connects to the first address that answers
/// within the connect timeout.
pub fn connect_tcp(host: &str, port: u16, options: &TcpOptions) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    let mut last_err = None;

    for addr in addrs {
        match TcpStream::connect_timeout(&addr, options.connect_timeout) {
            Ok(stream) => {
                configure_stream(&stream, options)?;
                debug!(%addr, "tcp connection established");
                return Ok(stream);
            }
            Err(err) => {
                debug!(%addr, error = %err, "tcp connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {}:{}", host, port),
        )
    }))
}

fn configure_stream(stream: &TcpStream, options: &TcpOptions) -> io::Result<()> {
    stream.set_read_timeout(options.read_timeout)?;
    stream.set_write_timeout(options.write_timeout)?;
    stream.set_nodelay(options.nodelay)?;
    Ok(())
}

/// An owned transport: raw socket or TLS session over a socket.
pub enum Connection {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Connection {
    /// Wraps an already configured TCP stream.
    pub fn plain(stream: TcpStream) -> Self {
        Connection::Plain(stream)
    }

    /// Runs the TLS handshake to completion over `stream`.
    ///
    /// Handshake failures (bad chain, rejected client certificate) surface
    /// here rather than on the first request write.
    pub fn tls(mut session: ClientConnection, mut stream: TcpStream) -> ClientResult<Self> {
        while session.is_handshaking() {
            session
                .complete_io(&mut stream)
                .map_err(ClientError::from_transport)?;
        }
        debug!("tls handshake complete");
        Ok(Connection::Tls(Box::new(StreamOwned::new(session, stream))))
    }

    fn socket(&self) -> &TcpStream {
        match self {
            Connection::Plain(stream) => stream,
            Connection::Tls(tls) => &tls.sock,
        }
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket().peer_addr()
    }

    /// Returns a handle that can tear the socket down from another thread.
    pub fn abort_handle(&self) -> io::Result<AbortHandle> {
        Ok(AbortHandle {
            socket: self.socket().try_clone()?,
        })
    }

    /// Closes the transport, sending `close_notify` first for TLS sessions.
    pub fn close(self) -> io::Result<()> {
        let socket = match self {
            Connection::Plain(stream) => stream,
            Connection::Tls(mut tls) => {
                tls.conn.send_close_notify();
                // Best effort: the peer may already be gone.
                let _ = tls.flush();
                tls.sock
            }
        };
        match socket.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Connection::Plain(_) => "Plain",
            Connection::Tls(_) => "Tls",
        };
        f.debug_struct("Connection")
            .field("kind", &kind)
            .field("peer", &self.peer_addr().ok())
            .finish()
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(stream) => stream.read(buf),
            Connection::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(stream) => stream.write(buf),
            Connection::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Plain(stream) => stream.flush(),
            Connection::Tls(tls) => tls.flush(),
        }
    }
}

/// Cancels a blocked operation by shutting the shared socket down.
///
/// The call blocked on the owning client returns a transport error; the
/// client then drops its connection and reports `not connected` afterwards.
#[derive(Debug)]
pub struct AbortHandle {
    socket: TcpStream,
}

impl AbortHandle {
    /// Shuts down both directions of the socket. Safe to call repeatedly.
    pub fn abort(&self) -> io::Result<()> {
        match self.socket.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}

/// Disconnected/Connected state machine owned by each client.
#[derive(Debug, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(Connection),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// Installs a fresh connection, closing any previous one.
    pub fn establish(&mut self, conn: Connection) {
        self.close();
        *self = ConnectionState::Connected(conn);
    }

    /// Borrows the live connection or fails with `NotConnected`.
    pub fn connection_mut(&mut self) -> ClientResult<&mut Connection> {
        match self {
            ConnectionState::Connected(conn) => Ok(conn),
            ConnectionState::Disconnected => Err(ClientError::NotConnected),
        }
    }

    pub fn abort_handle(&self) -> ClientResult<AbortHandle> {
        match self {
            ConnectionState::Connected(conn) => Ok(conn.abort_handle()?),
            ConnectionState::Disconnected => Err(ClientError::NotConnected),
        }
    }

    /// Runs `op` against the live connection.
    ///
    /// If `op` fails with a transport error the connection is discarded so the
    /// next call sees `Disconnected` rather than a desynchronized stream.
    pub fn with_connection<T>(
        &mut self,
        op: impl FnOnce(&mut Connection) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let result = op(self.connection_mut()?);
        if let Err(err) = &result {
            if err.breaks_connection() {
                warn!(error = %err, "dropping connection after transport failure");
                self.close();
            }
        }
        result
    }

    /// Releases the transport. Idempotent.
    pub fn close(&mut self) {
        if let ConnectionState::Connected(conn) = std::mem::take(self) {
            if let Err(err) = conn.close() {
                debug!(error = %err, "error while closing connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn default_options_bound_every_blocking_call() {
        let options = TcpOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.read_timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.write_timeout, Some(Duration::from_secs(10)));
        assert!(options.nodelay);
    }

    #[test]
    fn disconnected_state_rejects_operations() {
        let mut state = ConnectionState::default();
        assert!(!state.is_connected());
        assert!(matches!(state.connection_mut(), Err(ClientError::NotConnected)));
        assert!(matches!(
            state.with_connection(|_| Ok(())),
            Err(ClientError::NotConnected)
        ));
        state.close();
        state.close();
    }

    #[test]
    fn transport_failure_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect_tcp("127.0.0.1", port, &TcpOptions::default()).unwrap();

        let mut state = ConnectionState::default();
        state.establish(Connection::plain(stream));
        assert!(state.is_connected());

        let result: ClientResult<()> = state.with_connection(|_| Err(ClientError::ConnectionClosed));
        assert!(result.is_err());
        assert!(!state.is_connected());
    }

    #[test]
    fn protocol_failure_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect_tcp("127.0.0.1", port, &TcpOptions::default()).unwrap();

        let mut state = ConnectionState::default();
        state.establish(Connection::plain(stream));
        let result: ClientResult<()> =
            state.with_connection(|_| Err(ClientError::Server("ERROR nope".into())));
        assert!(result.is_err());
        assert!(state.is_connected());
        state.close();
        assert!(!state.is_connected());
    }

    #[test]
    fn connect_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_tcp("127.0.0.1", port, &TcpOptions::default()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
