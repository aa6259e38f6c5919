//! Parley Storage crate - durable collection of conversation sessions.
//!
//! Provides the `SessionStore` contract, a JSON-file implementation with
//! atomic replace-on-write, and a volatile in-memory implementation.

pub mod memory_store;
pub mod store;

pub use memory_store::InMemoryStore;
pub use store::{retain_recent, JsonFileStore, SessionStore, MAX_SESSIONS};
