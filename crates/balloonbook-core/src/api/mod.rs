//! HTTP client module for the balloonbook backend.
//!
//! `ApiClient` performs the login code exchange and the record endpoints.
//! Authenticated requests carry the session's access token as a bearer token.

pub mod client;
pub mod error;

pub use client::{extract_code, ApiClient, ExportKind, DEFAULT_PAGE_LIMIT};
pub use error::ApiError;
