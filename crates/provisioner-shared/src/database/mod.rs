//! # Operation Persistence
//!
//! The `OperationStore` trait plus its PostgreSQL and in-memory implementations.

pub mod memory;
pub mod migrator;
pub mod postgres;
pub mod store;

pub use memory::InMemoryOperationStore;
pub use postgres::PgOperationStore;
pub use store::{OperationStore, StoreResult};
