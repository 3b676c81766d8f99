//! # Log Sink Client
//!
//! Purpose: Fire-and-forget delivery of fixed-width log frames to the shrmpl
//! log sink over a plain TCP connection. Nothing is ever read back.

use std::io::Write;

use tracing::{debug, trace};

use shrmpl_common::{
    connect_tcp, AbortHandle, ClientError, ClientResult, Connection, ConnectionState, TcpOptions,
};

use crate::log_frame::LogRecord;

/// Blocking, write-only client for the log sink.
///
/// Sending without a live connection fails with [`ClientError::NotConnected`];
/// records are never silently dropped.
#[derive(Debug, Default)]
pub struct LogClient {
    options: TcpOptions,
    state: ConnectionState,
    frame_buf: Vec<u8>,
}

impl LogClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TcpOptions) -> Self {
        LogClient {
            options,
            state: ConnectionState::Disconnected,
            frame_buf: Vec::with_capacity(256),
        }
    }

    /// Opens the TCP connection, replacing any existing one.
    pub fn connect(&mut self, host: &str, port: u16) -> ClientResult<()> {
        let stream = connect_tcp(host, port, &self.options)?;
        self.state.establish(Connection::plain(stream));
        debug!(host, port, "log client connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn abort_handle(&self) -> ClientResult<AbortHandle> {
        self.state.abort_handle()
    }

    /// Validates, frames and writes one record.
    pub fn send(&mut self, level: &str, host: &str, code: &str, message: &str) -> ClientResult<()> {
        let record = LogRecord::new(level, host, code, message)?;
        let LogClient {
            state, frame_buf, ..
        } = self;

        state.with_connection(|conn| {
            record.encode(frame_buf);
            trace!(bytes = frame_buf.len(), level = record.level(), "log frame send");
            conn.write_all(frame_buf)
                .and_then(|_| conn.flush())
                .map_err(ClientError::from_transport)
        })
    }

    /// Releases the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state.is_connected() {
            debug!("log client closing");
        }
        self.state.close();
    }
}
