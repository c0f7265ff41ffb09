use std::fmt;

use thiserror::Error;

pub const NETWORK_ERROR_MESSAGE: &str =
    "Network error. Please check your connection and ensure backend is running.";

pub type Result<T> = std::result::Result<T, TallyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Todo,
    Category,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Todo => f.write_str("todo"),
            Resource::Category => f.write_str("category"),
        }
    }
}

/// First violation found while validating user input. Never reaches the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the store, the cache and the repositories.
///
/// `Clone` because a single in-flight load is shared by every reader waiting on
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TallyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{message}")]
    Network { message: String },

    #[error("{message}")]
    Api { code: u16, message: String },

    #[error("{resource} {id} not found")]
    NotFound { resource: Resource, id: i64 },

    #[error("{target} already has a mutation in flight")]
    Busy { target: String },

    #[error("failed to decode response: {message}")]
    Decode { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("load was cancelled before it finished")]
    Cancelled,
}

impl TallyError {
    pub fn network() -> Self {
        TallyError::Network {
            message: NETWORK_ERROR_MESSAGE.to_string(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        TallyError::Decode {
            message: message.into(),
        }
    }

    pub fn storage(err: anyhow::Error) -> Self {
        TallyError::Storage {
            message: format!("{err:#}"),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TallyError::NotFound { .. } | TallyError::Api { code: 404, .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, TallyError::Validation(_))
    }

    /// Field the message should be shown next to, when there is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            TallyError::Validation(err) => Some(err.field),
            _ => None,
        }
    }
}
