//! Core library for balloonbook.
//!
//! Holds the authenticated SOOP streamer session, persists it across restarts,
//! and provides the API client that attaches its bearer token to requests.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{
    AuthPayload, FileStore, KeyValueStore, MemoryStore, SessionError, SessionSnapshot, SessionStore,
};
pub use chat::ChatSdk;
pub use config::Config;
