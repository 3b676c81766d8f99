//! # KV Client
//!
//! Purpose: Expose a compact, blocking API for the shrmpl key-value server's
//! newline-delimited text protocol.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KvClient` hides framing and reply classification.
//! 2. **Validate Before IO**: Length limits are checked before any write.
//! 3. **Absence Is Not Failure**: `key not found` becomes `None`/`false`.
//! 4. **Fail Fast**: Transport errors drop the connection immediately.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use shrmpl_common::{
    connect_tcp, AbortHandle, ClientError, ClientResult, Connection, ConnectionState,
    TcpOptions, ValidationError, MAX_KV_KEY_LEN, MAX_KV_VALUE_LEN,
};

use crate::kv_codec::{classify, encode_command, parse_list, read_response};

const KEY_NOT_FOUND: &str = "key not found";

/// One row of a `LIST` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    /// Expiration as Unix epoch seconds; `None` means no expiration.
    pub expires_at: Option<i64>,
}

/// Blocking client for the shrmpl KV server.
///
/// One instance owns at most one TCP connection and is not meant to be shared
/// between threads without external locking. Use [`KvClient::abort_handle`] to
/// cancel a blocked call from another thread.
#[derive(Debug, Default)]
pub struct KvClient {
    options: TcpOptions,
    state: ConnectionState,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl KvClient {
    /// Creates a disconnected client with default socket options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disconnected client with custom socket options.
    pub fn with_options(options: TcpOptions) -> Self {
        KvClient {
            options,
            state: ConnectionState::Disconnected,
            read_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        }
    }

    /// Opens the TCP connection, replacing any existing one.
    pub fn connect(&mut self, host: &str, port: u16) -> ClientResult<()> {
        let stream = connect_tcp(host, port, &self.options)?;
        self.state.establish(Connection::plain(stream));
        debug!(host, port, "kv client connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Handle that unblocks an in-flight call by shutting the socket down.
    pub fn abort_handle(&self) -> ClientResult<AbortHandle> {
        self.state.abort_handle()
    }

    /// Fetches a value. Returns `Ok(None)` when the key does not exist.
    pub fn get(&mut self, key: &str) -> ClientResult<Option<String>> {
        validate_key(key)?;
        match self.send_command("GET", &[key]) {
            Ok(value) => Ok(Some(value)),
            Err(ClientError::Server(message)) if message.contains(KEY_NOT_FOUND) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Stores a value with an optional opaque TTL such as `30s` or `1min`.
    ///
    /// Returns true when the server acknowledged with `OK`.
    pub fn set(&mut self, key: &str, value: &str, ttl: Option<&str>) -> ClientResult<bool> {
        validate_key(key)?;
        validate_value(value)?;
        let ttl = validate_ttl(ttl)?;

        let response = match ttl {
            Some(ttl) => self.send_command("SET", &[key, value, ttl])?,
            None => self.send_command("SET", &[key, value])?,
        };
        Ok(response == "OK")
    }

    /// Increments an integer key and returns the new value.
    pub fn incr(&mut self, key: &str, ttl: Option<&str>) -> ClientResult<i64> {
        validate_key(key)?;
        let ttl = validate_ttl(ttl)?;

        let response = match ttl {
            Some(ttl) => self.send_command("INCR", &[key, ttl])?,
            None => self.send_command("INCR", &[key])?,
        };
        response
            .parse::<i64>()
            .map_err(|_| ClientError::InvalidResponse(response))
    }

    /// Deletes a key. Returns false when the key did not exist.
    pub fn delete(&mut self, key: &str) -> ClientResult<bool> {
        validate_key(key)?;
        match self.send_command("DEL", &[key]) {
            Ok(response) => Ok(response == "OK"),
            Err(ClientError::Server(message)) if message.contains(KEY_NOT_FOUND) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Returns true iff the server answered exactly `PONG`.
    pub fn ping(&mut self) -> ClientResult<bool> {
        let response = self.send_command("PING", &[])?;
        Ok(response == "PONG")
    }

    /// Lists all keys. Malformed rows are skipped.
    pub fn list(&mut self) -> ClientResult<Vec<KvEntry>> {
        let response = self.send_command("LIST", &[])?;
        let entries = parse_list(&response);
        debug!(count = entries.len(), "kv list parsed");
        Ok(entries)
    }

    /// Releases the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state.is_connected() {
            debug!("kv client closing");
        }
        self.state.close();
    }

    fn send_command(&mut self, verb: &str, args: &[&str]) -> ClientResult<String> {
        let KvClient {
            state,
            read_buf,
            write_buf,
            ..
        } = self;

        let raw = state.with_connection(|conn| {
            encode_command(verb, args, write_buf);
            trace!(command = %String::from_utf8_lossy(write_buf).trim_end(), "kv send");
            conn.write_all(write_buf)
                .and_then(|_| conn.flush())
                .map_err(ClientError::from_transport)?;
            read_response(conn, read_buf)
        })?;

        trace!(response = %raw.trim_end(), "kv recv");
        let result = classify(&raw);
        if let Err(err) = &result {
            if err.is_notice() {
                warn!(command = verb, notice = %err, "kv server notice instead of reply");
            }
        }
        result
    }
}

fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.len() > MAX_KV_KEY_LEN {
        return Err(ValidationError::KeyTooLong { len: key.len() });
    }
    reject_line_breaks("key", key)
}

fn validate_value(value: &str) -> Result<(), ValidationError> {
    if value.len() > MAX_KV_VALUE_LEN {
        return Err(ValidationError::ValueTooLong { len: value.len() });
    }
    reject_line_breaks("value", value)
}

/// An empty TTL is treated as no TTL.
fn validate_ttl(ttl: Option<&str>) -> Result<Option<&str>, ValidationError> {
    match ttl {
        Some(ttl) if !ttl.is_empty() => {
            reject_line_breaks("ttl", ttl)?;
            Ok(Some(ttl))
        }
        _ => Ok(None),
    }
}

fn reject_line_breaks(field: &'static str, text: &str) -> Result<(), ValidationError> {
    if text.contains(['\n', '\r']) {
        return Err(ValidationError::LineBreak { field });
    }
    Ok(())
}
