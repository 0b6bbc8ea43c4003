//! Service Layer Error Types
//!
//! One error type for every engine and admin operation. Each variant maps
//! to a stable [`ErrorKind`] so callers at the transport boundary can
//! translate without matching on individual variants.

use stratum_hiera::HieraError;
use thiserror::Error;

use crate::db::DatabaseError;

/// Stable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Resource does not exist (includes lookups that found no data)
    NotFound,
    /// Unique-key conflict on write
    Duplicate,
    /// Schema or fact validation failure, bad expansion, malformed id
    InvalidInput,
    /// Deletion forbidden because references exist
    InUse,
    /// Store I/O failure; retry/backoff is the caller's policy
    Backend,
}

/// Service operation errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("key not found: {id}")]
    KeyNotFound { id: String },

    #[error("key model not found: {id}")]
    KeyModelNotFound { id: String },

    #[error("level not found: {id}")]
    LevelNotFound { id: String },

    #[error("level data not found: {level_id}/{expanded_id}/{key_id}")]
    LevelDataNotFound {
        level_id: String,
        expanded_id: String,
        key_id: String,
    },

    #[error("node group not found: {id}")]
    NodeGroupNotFound { id: String },

    /// No level contributed a value for the key under the given facts
    #[error("no data found for key {key_id}")]
    NoDataFound { key_id: String },

    #[error("duplicate {resource}: {id}")]
    DuplicateResource { resource: String, id: String },

    #[error("key model {id} is referenced by {references} key(s)")]
    ModelInUse { id: String, references: u64 },

    #[error("invalid data: {0}")]
    InvalidData(HieraError),

    #[error("backend failure: {0}")]
    Backend(DatabaseError),
}

impl ServiceError {
    /// Create a level-data not found error
    pub fn level_data_not_found(id: &crate::models::LevelDataId) -> Self {
        Self::LevelDataNotFound {
            level_id: id.level_id.clone(),
            expanded_id: id.expanded_id.clone(),
            key_id: id.key_id.clone(),
        }
    }

    /// The stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyNotFound { .. }
            | Self::KeyModelNotFound { .. }
            | Self::LevelNotFound { .. }
            | Self::LevelDataNotFound { .. }
            | Self::NodeGroupNotFound { .. }
            | Self::NoDataFound { .. } => ErrorKind::NotFound,
            Self::DuplicateResource { .. } => ErrorKind::Duplicate,
            Self::ModelInUse { .. } => ErrorKind::InUse,
            Self::InvalidData(_) => ErrorKind::InvalidInput,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }
}

impl From<HieraError> for ServiceError {
    fn from(err: HieraError) -> Self {
        match err {
            HieraError::ModelNotFound { id } => Self::KeyModelNotFound { id },
            HieraError::KeyNotFound { id } => Self::KeyNotFound { id },
            other => Self::InvalidData(other),
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Duplicate { resource, id } => Self::DuplicateResource {
                resource: resource.to_string(),
                id,
            },
            other => Self::Backend(other),
        }
    }
}
