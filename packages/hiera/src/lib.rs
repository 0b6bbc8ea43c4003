//! Stratum Hiera Engine Primitives
//!
//! This crate provides the embeddable building blocks of the Stratum
//! hierarchical configuration engine:
//!
//! - [`schema`] - JSON-Schema subset compiled into runtime validator trees
//! - [`model`] - Key model trait, built-in primitive models, schema-backed models
//! - [`registry`] - Shared catalogues of key models and keys
//! - [`template`] - `{fact}` placeholder parsing and expansion for level ids
//! - [`merge`] - Deep merge of priority-ordered configuration documents
//!
//! The crate holds no persistence: stores, caches and change-feed
//! projections live in `stratum-core` and drive these primitives.

pub mod error;
pub mod merge;
pub mod model;
pub mod registry;
pub mod schema;
pub mod template;

// Re-exports
pub use error::HieraError;
pub use model::{KeyModel, SchemaModel, DYNAMIC_MODEL_PREFIX, STATIC_MODEL_PREFIX};
pub use registry::{KeyEntry, KeyModelRegistry, KeyRegistry};
pub use schema::{SchemaOptions, Validator};
pub use template::Facts;
