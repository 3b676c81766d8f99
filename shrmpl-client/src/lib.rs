//! # shrmpl Sync Clients
//!
//! Purpose: Give application code typed, blocking access to the three shrmpl
//! backends: the key-value server, the log sink and the config vault.
//!
//! ## Design Principles
//! 1. **Independent Clients**: `KvClient`, `LogClient` and `VaultClient` never
//!    call each other; each owns its own transport.
//! 2. **Errors As Values**: Every operation returns [`ClientResult`]; transport,
//!    TLS and parse failures never escape as panics.
//! 3. **Minimal Allocation**: Request and response buffers are reused per client.
//! 4. **Protocol Clarity**: Each wire format lives in its own codec module.

mod kv;
mod kv_codec;
mod log_client;
mod log_frame;
mod logger;
mod tls;
mod vault;

pub use kv::{KvClient, KvEntry};
pub use log_client::LogClient;
pub use log_frame::LogRecord;
pub use logger::{LogDestination, LogLevel, Logger, LoggerConfig};
pub use vault::{VaultClient, VaultConfig};

pub use shrmpl_common::{
    AbortHandle, ClientError, ClientResult, ConfigError, ErrorKind, Settings, TcpOptions,
    ValidationError,
};
