//! # KV Line Protocol
//!
//! Purpose: Encode newline-terminated text commands and decode the server's
//! newline-terminated replies into payloads or typed errors.
//!
//! ## Design Principles
//! 1. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 2. **Classify Once**: Heartbeat, shutdown and `ERROR` lines are mapped to
//!    errors in one place so every command sees the same rules.
//! 3. **Lenient Listing**: Malformed `LIST` lines are skipped, never fatal.

use std::io::{self, Read};

use shrmpl_common::{ClientError, ClientResult};

use crate::kv::KvEntry;

/// Keep-alive line the server may send at any time.
pub const HEARTBEAT: &str = "UPONG";

/// Notice sent before the server closes every connection.
pub const SHUTDOWN: &str = "TERM";

/// Expiration token used by `LIST` for keys without a TTL.
pub const NO_EXPIRATION: &str = "no-expiration";

/// Upper bound on one reply; anything larger means the stream is out of sync.
pub const MAX_RESPONSE_LEN: usize = 1024 * 1024;

const READ_CHUNK: usize = 1024;

/// Encodes `verb arg1 arg2 ...\n` into the provided buffer.
pub fn encode_command(verb: &str, args: &[&str], out: &mut Vec<u8>) {
    out.clear();
    out.extend_from_slice(verb.as_bytes());
    for arg in args {
        out.push(b' ');
        out.extend_from_slice(arg.as_bytes());
    }
    out.push(b'\n');
}

/// Reads until the accumulated bytes end with `\n`.
///
/// A reply may arrive in several segments, and a multi-line `LIST` reply is
/// complete once a read leaves the buffer ending in a newline.
pub fn read_response<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<String> {
    buf.clear();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(ClientError::from_transport(err)),
        };
        if n == 0 {
            // EOF before the terminator: the reply is incomplete or absent.
            return Err(ClientError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.ends_with(b"\n") {
            break;
        }
        if buf.len() > MAX_RESPONSE_LEN {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("response exceeds {} bytes", MAX_RESPONSE_LEN),
            )));
        }
    }
    Ok(String::from_utf8_lossy(buf).into_owned())
}

/// Strips trailing whitespace and maps notices and `ERROR` lines to errors.
pub fn classify(raw: &str) -> ClientResult<String> {
    let text = raw.trim_end();
    match text {
        HEARTBEAT => Err(ClientError::Heartbeat),
        SHUTDOWN => Err(ClientError::ShuttingDown),
        _ if text.starts_with("ERROR") => Err(ClientError::Server(text.to_string())),
        _ => Ok(text.to_string()),
    }
}

/// Parses a `LIST` payload, dropping lines that do not match
/// `key=<ignored>=value,expiration`.
pub fn parse_list(payload: &str) -> Vec<KvEntry> {
    if payload.trim().is_empty() {
        return Vec::new();
    }
    payload
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_list_line)
        .collect()
}

/// Parses one `LIST` line. Returns `None` for malformed lines.
pub fn parse_list_line(line: &str) -> Option<KvEntry> {
    let mut parts = line.splitn(3, '=');
    let key = parts.next()?;
    let _ = parts.next()?;
    let rest = parts.next()?;

    let (value, token) = rest.split_once(',')?;
    let expires_at = match token {
        NO_EXPIRATION => None,
        // Unparsable timestamps degrade to "no expiration".
        _ => token.parse::<i64>().ok(),
    };

    Some(KvEntry {
        key: key.to_string(),
        value: value.to_string(),
        expires_at,
    })
}
