// Implementations for the leveling system.
#![allow(unused_imports)]

pub mod in_memory;
pub mod json_store;
pub mod sqlite_store;

// Re-export for convenience
pub use in_memory::InMemoryXpStore;
pub use json_store::JsonXpStore;
pub use sqlite_store::SqliteXpStore;
