//! Storage module
//!
//! Implementations of the resource traits in [`crate::core::traits`].
//! - `memory`: in-process accounts table with row locks and commit/rollback

pub mod memory;

pub use memory::{MemoryConnection, MemoryStore, StoreConfig};
