//! Error types for keeplog-store
//!
//! Only backend failures are errors. A duplicate admission or an unknown
//! entry id is reported through the return value of the store operation.

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Database error from the durable backend
    #[error("Database error: {0}")]
    Database(String),

    /// Command failure reported by a remote backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// A key holds a value of a different kind than the command expects
    #[error("Wrong value type at key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A stored key or value could not be interpreted
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Invalid store configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new WrongType error
    pub fn wrong_type(key: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            key: key.into(),
            expected,
        }
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new InvalidKey error
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new Database error from any redb error
    pub fn database(err: impl Into<redb::Error>) -> Self {
        Self::Database(err.into().to_string())
    }
}

/// Convert from serde_json Error to StorageError
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            StorageError::Deserialization(err.to_string())
        } else {
            StorageError::Serialization(err.to_string())
        }
    }
}

/// Convert from postcard Error to StorageError
impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() {
            StorageError::Io(err.to_string())
        } else {
            StorageError::Backend(err.to_string())
        }
    }
}
