//! Live session storage for in-flight calls.
//!
//! A `ConversationSession` is the hot state of exactly one call (§3
//! ownership rule); this crate is where it gets read, written, and
//! expired outside the turn controller that owns it in memory.

pub mod store;

pub use store::{SessionStore, SharedSessionStore};
