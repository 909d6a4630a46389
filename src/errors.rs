// src/errors.rs

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::models::ProtocolVersion;

/// Failure of a single network probe.
///
/// None of these ever abort a domain's pipeline: every component recovers them
/// locally and folds them into a `false` or `indeterminate` field of the record.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("port {port} on {host} is unreachable: {reason}")]
    UnreachablePort {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("peer rejected {0} handshake")]
    TlsHandshakeRejected(ProtocolVersion),

    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    #[error("failed to parse response: {0}")]
    ParseFailure(String),

    #[error("lookup failed: {0}")]
    LookupFailure(String),
}

impl ProbeError {
    /// True for the two connectivity failures the HTTP checker reports.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ProbeError::Connection(_) | ProbeError::Timeout(_))
    }
}

/// Conditions that abort the whole run.
///
/// Everything except `SinkWrite` is detected before the first worker starts.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("cannot read input {path}: {source}")]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("input {0} contains no domains")]
    EmptyInput(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read config file {path}: {source}")]
    UnreadableConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    MalformedConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot read parking registry {path}: {source}")]
    UnreadableRegistry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open output sink {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output: {0}")]
    SinkWrite(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
