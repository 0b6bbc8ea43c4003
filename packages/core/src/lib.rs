//! Stratum Core Service Layer
//!
//! This crate provides the persistence and orchestration layer of the
//! Stratum hierarchical configuration service on top of the
//! `stratum-hiera` engine primitives.
//!
//! # Architecture
//!
//! - **Document store**: catalogue collections (key models, keys, levels,
//!   level data, lookup cache, node groups) behind the [`db::HieraStore`]
//!   trait, with an embedded SurrealDB backend and an in-memory backend
//! - **Projections**: level and node-group registries kept eventually
//!   consistent by the change-feed synchroniser
//! - **Engine**: priority-ordered lookup with deep merge and an
//!   invalidation-correct persistent lookup cache
//! - **Admin surface**: CRUD coordination with schema validation
//!
//! # Modules
//!
//! - [`models`] - Stored record types and query parameters
//! - [`db`] - Store trait, backends, change-feed events
//! - [`registry`] - In-memory projections (levels, node groups)
//! - [`services`] - Engine, admin surface, synchroniser, membership
//! - [`config`] - Store backend selection

pub mod config;
pub mod db;
pub mod models;
pub mod registry;
pub mod services;

// Re-exports
pub use config::StoreConfig;
pub use db::{ChangeEvent, ChangeOp, DatabaseError, HieraStore, MemoryStore, SurrealStore};
pub use models::{
    KeyModelRecord, KeyPatch, KeyRecord, LevelDataId, LevelDataPatch, LevelDataQuery,
    LevelDataRecord, LevelPatch, LevelRecord, NodeFacts, NodeGroup,
};
pub use registry::{LevelRegistry, NodeGroupRegistry};
pub use services::{
    AdminService, CatalogSync, ErrorKind, HieraEngine, MembershipService, ServiceError, Stratum,
};
