//! Error taxonomy of the entity layer.
//!
//! Every public operation returns [`Result`]. Messages always name the entity
//! (and the field when one is involved) so callers can surface them as-is.

use crate::storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EntityError {
    /// Invalid declaration or environment. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The store reported an identifier collision for a freshly allocated oid.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// The query cannot be translated. Raised before any storage round-trip.
    #[error("query error: {0}")]
    Query(String),

    /// I/O failure from the underlying store, surfaced unchanged.
    #[error("storage error on entity '{entity}': {source}")]
    Storage {
        entity: String,
        #[source]
        source: StoreError,
    },

    /// The opaque payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An index value could not be cast to its declared type at store time.
    #[error("cannot cast '{entity}.{field}': {message}")]
    Cast {
        entity: String,
        field: String,
        message: String,
    },

    #[error("{phase} hook failed on entity '{entity}': {source}")]
    Hook {
        entity: String,
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl EntityError {
    pub(crate) fn storage(entity: &str, source: StoreError) -> Self {
        EntityError::Storage {
            entity: entity.to_string(),
            source,
        }
    }

    pub(crate) fn hook(entity: &str, phase: &'static str, source: anyhow::Error) -> Self {
        EntityError::Hook {
            entity: entity.to_string(),
            phase,
            source,
        }
    }

    /// The backend error behind a `Storage` failure, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            EntityError::Storage { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EntityError>;
