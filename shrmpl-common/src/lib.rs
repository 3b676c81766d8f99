// shrmpl-common - Shared transport, error and settings types for the shrmpl clients
//
// The KV, log and vault clients are independent; this crate only holds the
// pieces they have in common.

pub mod config;
pub mod connection;
pub mod error;

// Re-export for convenience
pub use config::*;
pub use connection::*;
pub use error::*;
