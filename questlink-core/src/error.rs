//! Error types for Questlink operations

use thiserror::Error;

/// Connection-level failures. These drive status transitions and are never
/// surfaced to application code as panics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Connection to {endpoint} refused: {reason}")]
    Refused { endpoint: String, reason: String },

    #[error("Connection to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Connection closed unexpectedly: {reason}")]
    Closed { reason: String },

    #[error("WebSocket error: {reason}")]
    WebSocket { reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    Exhausted { attempts: u32 },
}

/// Credential rejection. Terminal until the user supplies new credentials.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication rejected: {reason}")]
    Rejected { reason: String },

    #[error("No credentials available")]
    MissingCredentials,
}

/// Malformed or unrecognized envelopes. Logged and dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed envelope: {reason}")]
    Malformed { reason: String },

    #[error("Unknown message type: {message_type}")]
    UnknownType { message_type: String },

    #[error("Invalid payload for {message_type}: {reason}")]
    InvalidPayload {
        message_type: &'static str,
        reason: String,
    },

    #[error("Failed to encode {message_type}: {reason}")]
    Encode {
        message_type: &'static str,
        reason: String,
    },
}

/// An event referenced an entity the registries have never seen.
/// Resolved by creating a placeholder, never by dropping the event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("Unknown agent referenced: {agent_id}")]
    UnknownAgent { agent_id: String },

    #[error("Unknown quest referenced: {quest_id}")]
    UnknownQuest { quest_id: String },
}

/// A payload field could not be interpreted. Normalization falls back to a default.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Master error type for all Questlink errors.
#[derive(Debug, Clone, Error)]
pub enum QuestlinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),
}

/// Result type alias for Questlink operations.
pub type QuestlinkResult<T> = Result<T, QuestlinkError>;

// =============================================================================
// TESTS
// =============================================================================
