//! Store-independent data model.
//!
//! # Responsibility
//! - Define the values, rows and aggregates that cross the repository API.
//! - Define declarative relationship trees for fetch and nested create.
//!
//! # Invariants
//! - Records are owned by the caller that received them; there is no cache
//!   or identity map behind them.

pub mod aggregate;
pub mod path;
pub mod record;
pub mod value;
