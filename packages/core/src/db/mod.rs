//! Database Layer
//!
//! Catalogue persistence behind the [`HieraStore`] trait:
//!
//! - [`SurrealStore`] - embedded SurrealDB (RocksDB or in-memory engine)
//!   or a remote server over HTTP; the production backend
//! - [`MemoryStore`] - process-local maps; tests and embedding
//!
//! Both backends emit change-feed events over broadcast channels so the
//! synchroniser can keep in-memory projections eventually consistent.

mod error;
pub mod events;
mod memory_store;
mod store;
mod surreal_store;

pub use error::DatabaseError;
pub use events::{ChangeEvent, ChangeOp, CHANGE_CHANNEL_CAPACITY};
pub use memory_store::MemoryStore;
pub use store::HieraStore;
pub use surreal_store::{EmbeddedStore, HttpStore, SurrealStore};
