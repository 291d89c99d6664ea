//! Error types for the sync client.

use crate::config::ConfigError;
use crate::persistence::PersistenceError;
use questlink_core::{QuestlinkError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Questlink(#[from] QuestlinkError),
    #[error("Sync session has stopped")]
    SessionClosed,
}

pub type ClientResult<T> = Result<T, ClientError>;
