//! Error types shared across the workspace
//!
//! Telemetry anomalies (lap numbers skipping, negative fuel deltas) are not
//! errors: the tracker absorbs them. Only transport and decoding failures
//! are modelled here.

use std::time::Duration;
use thiserror::Error;

/// Failure of the connection delivering snapshots
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed")]
    Closed,

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// A received text frame that does not have the snapshot shape.
/// Fatal to that frame only.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Raw GT7 packet decoding failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },

    #[error("bad magic after decryption")]
    BadMagic,
}

/// Rejected PlayStation address
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("IP address is required")]
    Empty,

    #[error("invalid IP address format: {0}")]
    Format(String),
}

/// Car metadata tables could not be read
#[derive(Debug, Error)]
pub enum CarDataError {
    #[error("failed to open car data: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse car data: {0}")]
    Csv(#[from] csv::Error),
}
