//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer the sync engines run
//! against. The trait-based design allows swapping between in-memory and
//! persistent storage implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::MailStore;
