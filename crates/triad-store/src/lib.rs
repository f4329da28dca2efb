//! §4.K State Store Interface — the `StateStore` port trait plus a
//! Postgres-backed implementation and an in-memory test double.
//!
//! Grounded in the teacher's `sem_os_core`/`sem_os_postgres` split (pure
//! port crate vs. sqlx adapter crate), folded into one crate here since
//! this system has a single storage backend rather than a pluggable
//! multi-tenant one.

pub mod error;
pub mod memory;
pub mod ports;
pub mod postgres;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use ports::{HoursCacheEntry, PlaceCacheEntry, StateStore};
pub use postgres::PostgresStore;
