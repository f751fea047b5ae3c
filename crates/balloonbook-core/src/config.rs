//! Application configuration.
//!
//! Values are resolved once at startup from the environment (the binary loads
//! a `.env` file first). Nothing here is required: every unset value falls back
//! to a documented default.

use std::path::PathBuf;

/// Application name used for the data directory path
const APP_NAME: &str = "balloonbook";

/// Origin assumed when `APP_ORIGIN` is unset (the local dev server)
const DEFAULT_ORIGIN: &str = "http://localhost:5173";

/// Path appended to the origin for the OAuth redirect
const REDIRECT_PATH: &str = "/redirect";

pub const ENV_CLIENT_ID: &str = "SOOP_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "SOOP_CLIENT_SECRET";
pub const ENV_REDIRECT_URI: &str = "SOOP_REDIRECT_URI";
pub const ENV_API_BASE: &str = "API_BASE";
pub const ENV_ORIGIN: &str = "APP_ORIGIN";
pub const ENV_DATA_DIR: &str = "BALLOONBOOK_DATA_DIR";
pub const ENV_CHAT_SDK: &str = "SOOP_CHAT_SDK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub api_base: String,
    pub origin: String,
    pub data_dir: PathBuf,
    pub chat_sdk_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let origin = get(ENV_ORIGIN)
            .map(|o| o.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());

        let redirect_uri = get(ENV_REDIRECT_URI)
            .unwrap_or_else(|| format!("{}{}", origin, REDIRECT_PATH));

        let data_dir = get(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_data_dir);

        Self {
            client_id: get(ENV_CLIENT_ID).unwrap_or_default(),
            client_secret: get(ENV_CLIENT_SECRET).unwrap_or_default(),
            redirect_uri,
            api_base: get(ENV_API_BASE)
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            origin,
            data_dir,
            chat_sdk_path: get(ENV_CHAT_SDK).map(PathBuf::from),
        }
    }

    /// Backend root for API requests. An unset `API_BASE` means same-origin.
    pub fn api_root(&self) -> &str {
        if self.api_base.is_empty() {
            &self.origin
        } else {
            &self.api_base
        }
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join(APP_NAME))
            .unwrap_or_else(|| PathBuf::from(format!("./.{}", APP_NAME)))
    }
}
