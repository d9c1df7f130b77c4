//! Error types for vigia-core

use thiserror::Error;

/// Result type alias using vigia-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vigia-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// No session token available for an authenticated endpoint
    #[error("No autenticado")]
    NotAuthenticated,

    /// Offline, or the transport failed before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success, non-conflict HTTP response from the server
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The reservation endpoint rejected the request
    #[error("Reservation failed: {0}")]
    Reservation(String),

    /// An operation that requires a draft found the slot empty
    #[error("No hay draft pendiente")]
    NoDraft,

    /// A new draft was requested while a different-typed one is pending
    #[error("{reason}")]
    DraftTypeBlocked { tipo: String, reason: String },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
