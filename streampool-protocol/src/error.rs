//! Error types for the streampool boundary types.

use thiserror::Error;

/// Errors raised while converting or validating boundary values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Stored endpoint state could not be decoded.
    #[error("Invalid endpoint state: {0}")]
    InvalidState(String),

    /// Ingested record failed validation.
    #[error("Invalid ingest record: {0}")]
    InvalidRecord(String),

    /// Cycle kind name is not recognised.
    #[error("Unknown cycle kind: {0}")]
    UnknownCycleKind(String),
}

/// Errors reported to the routing layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The current snapshot holds no eligible endpoint for the channel.
    #[error("No source available for channel {0}")]
    NoSourceAvailable(String),
}
