//! Cache backends.
//!
//! Available backends:
//! - `MemoryCache` - In-memory (always available)
//! - `SqliteCache` - SQLite file-based (requires `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryCache;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCache;
