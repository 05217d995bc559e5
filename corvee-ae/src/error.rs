//! Error types for corvee-ae
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.

use corvee_common::{ItemId, UserId};
use thiserror::Error;

/// Main error type for the corvee-ae module
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dataset parsing errors
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Requested item does not exist
    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    /// Requested strategy is not registered
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Outcome reported for a reservation that is not held
    ///
    /// Either the reservation was never made, was already resolved, or the
    /// sweeper reclaimed it.
    #[error("no reservation held by user {user_id} for item {item_id}")]
    OutcomeWithoutReservation { user_id: UserId, item_id: ItemId },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<corvee_common::Error> for Error {
    fn from(e: corvee_common::Error) -> Self {
        match e {
            corvee_common::Error::Config(msg) => Error::Config(msg),
            corvee_common::Error::Io(io) => Error::Io(io),
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Convenience Result type using corvee-ae Error
pub type Result<T> = std::result::Result<T, Error>;
