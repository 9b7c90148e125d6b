//! Backend error taxonomy.

use thiserror::Error;

/// Errors raised by a [`DocumentStore`](super::DocumentStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The collection has never been created. Index reconciliation treats this
    /// as "no indexes yet".
    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error("duplicate key in collection '{collection}' on index '{index}'")]
    DuplicateKey { collection: String, index: String },

    #[error("collection '{0}' has no text index")]
    TextIndexRequired(String),

    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// True when the error reports a uniqueness violation on the given index.
    pub fn is_duplicate_on(&self, index_name: &str) -> bool {
        matches!(self, StoreError::DuplicateKey { index, .. } if index == index_name)
    }
}
