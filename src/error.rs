//! Error types for the wire codec, the transport and the resolution engine.

use thiserror::Error;

/// Malformed or truncated DNS data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of message at offset {offset}")]
    Truncated { offset: usize },

    #[error("label '{label}' is {length} bytes, maximum is 63")]
    LabelTooLong { label: String, length: usize },

    #[error("empty label in name '{name}'")]
    EmptyLabel { name: String },

    #[error("name exceeds 255 bytes")]
    NameTooLong,

    #[error("compression pointer at offset {offset} loops back to visited offset {target}")]
    CompressionLoop { offset: usize, target: usize },

    #[error("invalid label type 0x{byte:02X} at offset {offset}")]
    InvalidLabelType { offset: usize, byte: u8 },

    #[error("RDATA name at offset {offset} runs past its record end {end}")]
    RdataOverrun { offset: usize, end: usize },

    #[error("invalid section {0:?} for RDATA")]
    InvalidSection(crate::types::Section),
}

pub type WireResult<T> = std::result::Result<T, WireError>;

/// One UDP exchange failed. The engine treats this as "no answer from that server".
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("socket error talking to {server}: {source}")]
    Io { server: String, #[source] source: std::io::Error },

    #[error("no reply from {server} within {millis}ms")]
    Timeout { server: String, millis: u128 },

    #[error("'{0}' is not an IP address")]
    InvalidAddress(String),
}

/// Failures that abort a top-level attempt against one root server.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("malformed response from {server}: {source}")]
    Protocol { server: String, #[source] source: WireError },

    #[error("malformed query for '{domain}': {source}")]
    Query { domain: String, #[source] source: WireError },
}

/// Rejected client input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("invalid domain '{0}'")]
    InvalidDomain(String),
}
