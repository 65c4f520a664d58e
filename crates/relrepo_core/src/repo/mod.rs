//! Repository layer over a storage gateway.
//!
//! # Responsibility
//! - Expose per-entity CRUD, nested create and aggregate fetch.
//! - Translate gateway and schema failures into one error type.
//!
//! # Invariants
//! - Repositories hold no row state between calls.
//! - Relationship paths are validated before any query runs.

pub mod aggregate_loader;
pub mod entity_repo;
pub mod error;
