//! Ports - seams to the outside world.
//!
//! Each trait hides an external collaborator (the relational store, the time
//! source, id generation) so the core can run against in-memory
//! implementations in tests and the demo host.

pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock, earlier, later};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{DataStore, Transaction};
