//! Impls - port implementations for development and tests.
//!
//! Production stores live in their own crates and implement
//! `ports::DataStore` against a relational database.

pub mod memory;

pub use self::memory::{InMemoryStore, InMemoryTransaction};
