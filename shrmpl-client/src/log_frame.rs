//! # Log Frame Encoding
//!
//! Fixed-width, single-line frames understood by the shrmpl log sink:
//!
//! ```text
//! [LEVL] [HOST............................] [CODE] [0042]: message\n
//!  4B     32B                                4B     4 digits
//! ```
//!
//! Field lengths are measured in bytes because the sink slices frames at
//! fixed byte offsets.

use std::io::Write;

use shrmpl_common::ValidationError;

pub const LEVEL_WIDTH: usize = 4;
pub const HOST_WIDTH: usize = 32;
pub const CODE_WIDTH: usize = 4;
pub const MAX_MESSAGE_LEN: usize = 4096;

/// A validated log record borrowed from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord<'a> {
    level: &'a str,
    host: &'a str,
    code: &'a str,
    message: &'a str,
}

impl<'a> LogRecord<'a> {
    /// Checks every field bound before anything is written.
    pub fn new(
        level: &'a str,
        host: &'a str,
        code: &'a str,
        message: &'a str,
    ) -> Result<Self, ValidationError> {
        if level.len() != LEVEL_WIDTH {
            return Err(ValidationError::LevelLength { len: level.len() });
        }
        if host.len() > HOST_WIDTH {
            return Err(ValidationError::HostTooLong { len: host.len() });
        }
        if code.len() != CODE_WIDTH {
            return Err(ValidationError::CodeLength { len: code.len() });
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(ValidationError::MessageTooLong { len: message.len() });
        }
        Ok(LogRecord {
            level,
            host,
            code,
            message,
        })
    }

    pub fn level(&self) -> &'a str {
        self.level
    }

    /// Serializes the record as one frame into `out`, replacing its contents.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(64 + HOST_WIDTH + self.message.len());
        out.push(b'[');
        push_fixed(out, self.level, LEVEL_WIDTH);
        out.extend_from_slice(b"] [");
        push_fixed(out, self.host, HOST_WIDTH);
        out.extend_from_slice(b"] [");
        push_fixed(out, self.code, CODE_WIDTH);
        out.extend_from_slice(b"] [");
        // Writing into a Vec cannot fail.
        let _ = write!(out, "{:04}", self.message.len());
        out.extend_from_slice(b"]: ");
        out.extend_from_slice(self.message.as_bytes());
        out.push(b'\n');
    }
}

/// Right-pads with spaces, or truncates, to exactly `width` bytes.
fn push_fixed(out: &mut Vec<u8>, field: &str, width: usize) {
    let bytes = field.as_bytes();
    let take = bytes.len().min(width);
    out.extend_from_slice(&bytes[..take]);
    out.resize(out.len() + (width - take), b' ');
}
