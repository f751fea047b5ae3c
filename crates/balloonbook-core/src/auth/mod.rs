//! Authentication state for the signed-in streamer.
//!
//! This module provides:
//! - `SessionStore`: the authenticated identity, mirrored field by field to storage
//! - `KeyValueStore`: the persistence layer it writes through, with
//!   `FileStore` (survives restarts) and `MemoryStore` implementations
//!
//! Being logged in means holding a non-empty access token. There is no expiry
//! or refresh; the token is kept until logout.

pub mod session;
pub mod storage;

pub use session::{AuthPayload, SessionError, SessionSnapshot, SessionStore, StreamerIdValue};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
