//! Persistence for the order-fulfillment engine.
//!
//! All mutations go through a [`UnitOfWork`]: a transaction that takes
//! row-level locks as it reads and applies every write atomically on
//! commit. Two implementations share the contract:
//!
//! - [`InMemoryStore`] for tests and single-process runs
//! - [`PostgresStore`] for production, built on `SELECT ... FOR UPDATE`
//!   and conditional updates
//!
//! Callers must acquire locks in a fixed order to stay deadlock free:
//! payment, user, cart items, then products sorted by id.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{Store, UnitOfWork};
