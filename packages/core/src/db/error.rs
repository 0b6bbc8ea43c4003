//! Database Error Types

use thiserror::Error;

/// Store operation errors
///
/// Uniqueness conflicts are separated out so the service layer can map
/// them to duplicate-resource errors; everything else surfaces as a
/// backend failure. The store never retries internally.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Unique-key conflict on write
    #[error("duplicate {resource}: {id}")]
    Duplicate { resource: &'static str, id: String },

    /// The backend could not be reached or initialised
    #[error("backend unavailable: {context}")]
    Unavailable { context: String },

    /// A statement failed to execute
    #[error("query failed: {context}")]
    QueryFailed { context: String },

    /// A document could not be encoded or decoded
    #[error("serialization failed: {context}")]
    Serialization { context: String },
}

impl DatabaseError {
    /// Create a duplicate error
    pub fn duplicate(resource: &'static str, id: impl Into<String>) -> Self {
        Self::Duplicate {
            resource,
            id: id.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(context: impl Into<String>) -> Self {
        Self::Unavailable {
            context: context.into(),
        }
    }

    /// Create a query failed error
    pub fn query_failed(context: impl Into<String>) -> Self {
        Self::QueryFailed {
            context: context.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>) -> Self {
        Self::Serialization {
            context: context.into(),
        }
    }
}
