//! Change-Feed Events
//!
//! Both store backends push one event per committed mutation over
//! `tokio::sync::broadcast` channels, one channel per watched collection.
//! Subscribers (the catalogue synchroniser) apply events idempotently; a
//! lagged receiver reloads a full snapshot instead of replaying.

use serde::{Deserialize, Serialize};

/// Broadcast channel capacity for change-feed events.
///
/// 128 gives headroom for bursts of admin writes while bounding memory.
/// Receiver lag is recoverable - the synchroniser falls back to a
/// snapshot reload.
pub const CHANGE_CHANNEL_CAPACITY: usize = 128;

/// Change-feed operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Replace,
    Delete,
}

/// One change-feed event
///
/// `full_document` carries the post-image for inserts/updates/replaces
/// and is absent for deletes.
#[derive(Debug, Clone)]
pub struct ChangeEvent<T> {
    pub op: ChangeOp,
    pub document_key: String,
    pub full_document: Option<T>,
}

impl<T> ChangeEvent<T> {
    /// An insert/update/replace event carrying the post-image
    pub fn upsert(op: ChangeOp, document_key: impl Into<String>, document: T) -> Self {
        Self {
            op,
            document_key: document_key.into(),
            full_document: Some(document),
        }
    }

    /// A delete event
    pub fn delete(document_key: impl Into<String>) -> Self {
        Self {
            op: ChangeOp::Delete,
            document_key: document_key.into(),
            full_document: None,
        }
    }
}
