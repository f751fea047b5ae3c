use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::storage::{KeyValueStore, StorageError};

/// Persistence keys, one per session field
pub const KEY_STREAMER_ID: &str = "streamer_id";
pub const KEY_PLATFORM_ID: &str = "soop_id";
pub const KEY_DISPLAY_NAME: &str = "nickname";
pub const KEY_ACCESS_TOKEN: &str = "access_token";

/// Removal order matters: without the token a leftover session is not a login
pub const SESSION_KEYS: [&str; 4] = [
    KEY_ACCESS_TOKEN,
    KEY_STREAMER_ID,
    KEY_PLATFORM_ID,
    KEY_DISPLAY_NAME,
];

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid auth payload: {field} {reason}")]
    InvalidPayload {
        field: &'static str,
        reason: &'static str,
    },

    #[error("Failed to persist session: {0}")]
    Storage(#[from] StorageError),
}

/// The streamer id as it arrives from the login exchange: the backend sends a
/// number, older callers pass a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StreamerIdValue {
    Number(u64),
    Text(String),
}

impl StreamerIdValue {
    /// Canonical decimal string form, or None if this is not an unsigned integer
    fn canonical(&self) -> Option<String> {
        match self {
            StreamerIdValue::Number(n) => Some(n.to_string()),
            StreamerIdValue::Text(s) => {
                if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                    Some(s.clone())
                } else {
                    None
                }
            }
        }
    }
}

impl From<u64> for StreamerIdValue {
    fn from(n: u64) -> Self {
        StreamerIdValue::Number(n)
    }
}

impl From<&str> for StreamerIdValue {
    fn from(s: &str) -> Self {
        StreamerIdValue::Text(s.to_string())
    }
}

impl From<String> for StreamerIdValue {
    fn from(s: String) -> Self {
        StreamerIdValue::Text(s)
    }
}

/// Result of a successful login exchange.
///
/// Every field is optional on the wire; `SessionStore::set_auth` rejects the
/// payload unless all of them are usable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthPayload {
    #[serde(default)]
    pub streamer_id: Option<StreamerIdValue>,
    #[serde(default)]
    pub soop_id: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl AuthPayload {
    pub fn new(
        streamer_id: impl Into<StreamerIdValue>,
        soop_id: impl Into<String>,
        nickname: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            streamer_id: Some(streamer_id.into()),
            soop_id: Some(soop_id.into()),
            nickname: Some(nickname.into()),
            access_token: Some(access_token.into()),
        }
    }

    fn into_snapshot(self) -> Result<SessionSnapshot, SessionError> {
        let streamer_id = self
            .streamer_id
            .ok_or(SessionError::InvalidPayload {
                field: KEY_STREAMER_ID,
                reason: "is missing",
            })?
            .canonical()
            .ok_or(SessionError::InvalidPayload {
                field: KEY_STREAMER_ID,
                reason: "is not an unsigned integer",
            })?;

        let platform_id = required_non_empty(self.soop_id, KEY_PLATFORM_ID)?;

        // The platform may not return a nickname; present-but-empty is allowed
        let display_name = self.nickname.ok_or(SessionError::InvalidPayload {
            field: KEY_DISPLAY_NAME,
            reason: "is missing",
        })?;

        let access_token = required_non_empty(self.access_token, KEY_ACCESS_TOKEN)?;

        Ok(SessionSnapshot {
            streamer_id,
            platform_id,
            display_name,
            access_token,
        })
    }
}

fn required_non_empty(value: Option<String>, field: &'static str) -> Result<String, SessionError> {
    match value {
        None => Err(SessionError::InvalidPayload {
            field,
            reason: "is missing",
        }),
        Some(v) if v.is_empty() => Err(SessionError::InvalidPayload {
            field,
            reason: "is empty",
        }),
        Some(v) => Ok(v),
    }
}

/// All session fields at one instant.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub streamer_id: String,
    pub platform_id: String,
    pub display_name: String,
    pub access_token: String,
}

impl SessionSnapshot {
    pub fn is_logged_in(&self) -> bool {
        !self.access_token.is_empty()
    }
}

// Keep the bearer token out of logs and panic messages
impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("streamer_id", &self.streamer_id)
            .field("platform_id", &self.platform_id)
            .field("display_name", &self.display_name)
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}

/// The authenticated streamer identity, mirrored to a `KeyValueStore`.
///
/// Construct one at startup with [`SessionStore::hydrate`] and hand it to the
/// code that needs it. Observers that must react to login/logout hold a
/// receiver from [`SessionStore::subscribe`]; each mutation publishes exactly
/// one snapshot after every field has changed.
pub struct SessionStore<S: KeyValueStore> {
    storage: S,
    state: SessionSnapshot,
    tx: watch::Sender<SessionSnapshot>,
}

impl<S: KeyValueStore> SessionStore<S> {
    /// Build the store from whatever is persisted. Never fails: missing keys, an
    /// unavailable storage, or a half-written session all read as logged out.
    pub fn hydrate(storage: S) -> Self {
        let stored = AuthPayload {
            streamer_id: Self::read_key(&storage, KEY_STREAMER_ID).map(StreamerIdValue::Text),
            soop_id: Self::read_key(&storage, KEY_PLATFORM_ID),
            nickname: Self::read_key(&storage, KEY_DISPLAY_NAME),
            access_token: Self::read_key(&storage, KEY_ACCESS_TOKEN),
        };

        let nothing_stored = stored.streamer_id.is_none()
            && stored.soop_id.is_none()
            && stored.nickname.is_none()
            && stored.access_token.is_none();

        let state = if nothing_stored {
            SessionSnapshot::default()
        } else {
            match stored.into_snapshot() {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "Discarding incomplete persisted session");
                    SessionSnapshot::default()
                }
            }
        };
        debug!(
            streamer_id = %state.streamer_id,
            logged_in = state.is_logged_in(),
            "Session hydrated"
        );

        let (tx, _rx) = watch::channel(state.clone());
        Self { storage, state, tx }
    }

    fn read_key(storage: &S, key: &str) -> Option<String> {
        match storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read persisted session field");
                None
            }
        }
    }

    pub fn streamer_id(&self) -> &str {
        &self.state.streamer_id
    }

    pub fn platform_id(&self) -> &str {
        &self.state.platform_id
    }

    pub fn display_name(&self) -> &str {
        &self.state.display_name
    }

    pub fn access_token(&self) -> &str {
        &self.state.access_token
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.is_logged_in()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.clone()
    }

    /// Receiver that always holds the latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Replace the whole session with a login result and persist it.
    ///
    /// A malformed payload is rejected before anything changes. If persisting
    /// fails the in-memory session is already replaced and the error is returned.
    ///
    /// The old token is removed first and the new one written last, so storage
    /// that fails partway never holds a token next to another login's fields.
    pub fn set_auth(&mut self, payload: AuthPayload) -> Result<(), SessionError> {
        let next = payload.into_snapshot()?;
        self.state = next;
        self.publish();
        debug!(streamer_id = %self.state.streamer_id, "Session replaced");

        self.storage.remove(KEY_ACCESS_TOKEN)?;
        self.storage.set_many(&[
            (KEY_STREAMER_ID, self.state.streamer_id.as_str()),
            (KEY_PLATFORM_ID, self.state.platform_id.as_str()),
            (KEY_DISPLAY_NAME, self.state.display_name.as_str()),
            (KEY_ACCESS_TOKEN, self.state.access_token.as_str()),
        ])?;
        Ok(())
    }

    /// Reset every field and delete the session keys from storage.
    /// Other keys in the same storage are left alone. The token goes first.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        self.state = SessionSnapshot::default();
        self.publish();
        debug!("Session cleared");

        if let Err(e) = self.storage.remove_many(&SESSION_KEYS) {
            warn!(error = %e, "Failed to remove persisted session");
            return Err(e.into());
        }
        Ok(())
    }

    /// Logout, then wipe the entire storage including keys this store does not own.
    /// Succeeds whenever the wipe does, even if removing the session keys failed.
    pub fn purge(&mut self) -> Result<(), SessionError> {
        if let Err(e) = self.logout() {
            debug!(error = %e, "Session keys not removed, clearing storage anyway");
        }
        self.storage.clear()?;
        Ok(())
    }

    fn publish(&self) {
        self.tx.send_replace(self.state.clone());
    }
}

// ============================================================================
// Tests
// ============================================================================
