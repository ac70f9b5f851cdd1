use crate::core::state::PersistenceState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: PersistenceState,
        to: PersistenceState,
    },

    #[error("Illegal starting state: {0} (only New and Virtual can be declared)")]
    IllegalStartingState(PersistenceState),

    #[error("Operation '{operation}' is not allowed in state {state}")]
    InvalidState {
        state: PersistenceState,
        operation: &'static str,
    },

    #[error("Reference integrity violation: {0}")]
    ReferenceIntegrity(String),

    #[error("Optimistic concurrency conflict: {0}")]
    OptimisticConcurrency(String),

    #[error("Null key for type '{0}'")]
    NullKey(String),

    #[error("Discriminator {discriminator} is already registered for '{existing}'")]
    DuplicateDiscriminator {
        discriminator: i32,
        existing: &'static str,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Data mapper error: {0}")]
    Mapper(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Re-entrant lifecycle operation: {0}")]
    Reentrant(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl OrmError {
    /// `true` for storage-side failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OptimisticConcurrency(_) | Self::Mapper(_) | Self::IoError(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for OrmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for OrmError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Codec("unexpected end of stream".to_string())
        } else {
            Self::IoError(err.to_string())
        }
    }
}
