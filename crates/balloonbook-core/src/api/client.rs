//! API client for the balloonbook backend.
//!
//! This module provides the `ApiClient` struct for the login code exchange and
//! for authenticated requests against balloon records.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::auth::{AuthPayload, KeyValueStore, SessionStore};
use crate::models::{BalloonPage, NewBalloonRecord};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Page size the backend uses when none is given
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Serialize)]
struct CodeExchangeRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct MemoRequest<'a> {
    record_id: i64,
    memo: &'a str,
}

#[derive(Debug, Serialize)]
struct SaveRequest<'a> {
    streamer_id: u64,
    records: &'a [NewBalloonRecord],
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    inserted: u64,
}

#[derive(Debug, Deserialize)]
struct OkResponse {
    #[serde(default)]
    ok: bool,
}

/// Which sheet `/api/export` builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportKind {
    #[default]
    Records,
    Summary,
}

impl ExportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Records => "records",
            ExportKind::Summary => "summary",
        }
    }
}

/// xlsx files are zip archives
fn is_xlsx(body: &[u8]) -> bool {
    body.starts_with(b"PK\x03\x04")
}

/// Query parameters shared by the listing and export endpoints
fn record_filter(streamer_id: &str, tag: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("streamer_id", streamer_id.to_string())];
    if let Some(tag) = tag.filter(|t| !t.is_empty()) {
        query.push(("tag", tag.to_string()));
    }
    query
}

/// Pull the authorization code out of the OAuth redirect URL.
pub fn extract_code(redirect_url: &str) -> Result<String> {
    let url = Url::parse(redirect_url).context("Invalid redirect URL")?;

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error_description" => error = Some(value.into_owned()),
            "error" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(anyhow::anyhow!("Authorization was denied: {}", error));
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Redirect URL has no authorization code"))
}

/// API client for the balloonbook backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    /// Client carrying the session's bearer token, or no token when logged out
    pub fn from_session<S: KeyValueStore>(&self, session: &SessionStore<S>) -> Self {
        if session.is_logged_in() {
            self.with_token(session.access_token().to_string())
        } else {
            Self {
                client: self.client.clone(),
                base_url: self.base_url.clone(),
                token: None,
            }
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> Result<reqwest::RequestBuilder>,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build()?
                .send()
                .await
                .with_context(|| format!("Failed to send request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn get_response(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        self.send_with_retry(url, || {
            Ok(self.client.get(url).headers(self.auth_headers()?).query(query))
        })
        .await
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        self.get_response(url, query)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T> {
        self.send_with_retry(url, || {
            Ok(self.client.post(url).headers(self.auth_headers()?).json(body))
        })
        .await?
        .json()
        .await
        .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    fn require_token(&self) -> Result<()> {
        if self.token.is_none() {
            return Err(ApiError::Unauthorized.into());
        }
        Ok(())
    }

    // ===== Endpoints =====

    /// Trade an OAuth authorization code for the streamer's identity and token.
    /// The result is unvalidated; hand it to `SessionStore::set_auth`.
    pub async fn exchange_code(&self, code: &str) -> Result<AuthPayload> {
        let code = code.trim();
        if code.is_empty() {
            return Err(anyhow::anyhow!("Authorization code is empty"));
        }

        debug!("Exchanging authorization code");
        self.post(&self.url("/api/auth"), &CodeExchangeRequest { code })
            .await
            .context("Login code exchange failed")
    }

    /// Fetch one page of balloon records and the per-donor summary
    pub async fn fetch_balloons(
        &self,
        streamer_id: &str,
        tag: Option<&str>,
        page: u32,
        limit: u32,
    ) -> Result<BalloonPage> {
        self.require_token()?;
        if streamer_id.is_empty() {
            return Err(anyhow::anyhow!("streamer_id is required"));
        }

        let mut query = record_filter(streamer_id, tag);
        query.push(("page", page.max(1).to_string()));
        query.push(("limit", limit.max(1).to_string()));

        self.get(&self.url("/api/balloon"), &query)
            .await
            .context("Failed to fetch balloon records")
    }

    /// Store new balloon donations; returns how many the backend inserted
    pub async fn save_balloons(&self, streamer_id: &str, records: &[NewBalloonRecord]) -> Result<u64> {
        self.require_token()?;
        let streamer_id: u64 = streamer_id
            .parse()
            .with_context(|| format!("Invalid streamer_id: {:?}", streamer_id))?;
        if records.is_empty() {
            return Err(anyhow::anyhow!("No records to save"));
        }

        let response: SaveResponse = self
            .post(&self.url("/api/balloon"), &SaveRequest { streamer_id, records })
            .await
            .context("Failed to save balloon records")?;

        if !response.ok {
            return Err(ApiError::InvalidResponse("save was not acknowledged".to_string()).into());
        }
        debug!(inserted = response.inserted, "Balloon records saved");
        Ok(response.inserted)
    }

    /// Download the records or the per-donor summary as an xlsx workbook
    pub async fn export(&self, streamer_id: &str, tag: Option<&str>, kind: ExportKind) -> Result<Vec<u8>> {
        self.require_token()?;
        if streamer_id.is_empty() {
            return Err(anyhow::anyhow!("streamer_id is required"));
        }

        let mut query = record_filter(streamer_id, tag);
        query.push(("type", kind.as_str().to_string()));

        let url = self.url("/api/export");
        let body = self
            .get_response(&url, &query)
            .await
            .context("Failed to export balloon records")?
            .bytes()
            .await
            .context("Failed to read export download")?;

        if !is_xlsx(&body) {
            return Err(ApiError::InvalidResponse("export is not an xlsx workbook".to_string()).into());
        }
        Ok(body.to_vec())
    }

    /// Replace the memo on a balloon record
    pub async fn update_memo(&self, record_id: i64, memo: &str) -> Result<()> {
        self.require_token()?;

        let response: OkResponse = self
            .post(&self.url("/api/memo"), &MemoRequest { record_id, memo })
            .await
            .context("Failed to update memo")?;

        if !response.ok {
            return Err(ApiError::InvalidResponse("memo update was not acknowledged".to_string()).into());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;

    #[test]
    fn test_extract_code() {
        assert_eq!(
            extract_code("http://localhost:5173/redirect?code=abc123&state=x").unwrap(),
            "abc123"
        );
        assert!(extract_code("http://localhost:5173/redirect").is_err());
        assert!(extract_code("http://localhost:5173/redirect?code=").is_err());
        assert!(extract_code("not a url").is_err());

        let denied = extract_code("http://localhost:5173/redirect?error=access_denied").unwrap_err();
        assert!(denied.to_string().contains("access_denied"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ApiClient::new("https://api.example.com/").unwrap();
        assert_eq!(client.url("/api/auth"), "https://api.example.com/api/auth");
    }

    #[test]
    fn test_from_session_attaches_token_only_when_logged_in() {
        let client = ApiClient::new("https://api.example.com").unwrap();
        let mut session = SessionStore::hydrate(MemoryStore::new());
        assert!(!client.from_session(&session).has_token());

        session
            .set_auth(AuthPayload::new(1u64, "abc", "Foo", "tok"))
            .unwrap();
        let authed = client.from_session(&session);
        assert!(authed.has_token());
        let headers = authed.auth_headers().unwrap();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer tok");

        session.logout().unwrap();
        assert!(!client.from_session(&session).has_token());
    }

    #[tokio::test]
    async fn test_authenticated_calls_need_token() {
        let client = ApiClient::new("https://api.example.com").unwrap();
        let err = client.fetch_balloons("1", None, 1, 10).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));

        let err = client.update_memo(1, "hi").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));
    }

    #[test]
    fn test_record_filter() {
        assert_eq!(record_filter("42", None), vec![("streamer_id", "42".to_string())]);
        assert_eq!(record_filter("42", Some("")), vec![("streamer_id", "42".to_string())]);
        assert_eq!(
            record_filter("42", Some("mission")),
            vec![("streamer_id", "42".to_string()), ("tag", "mission".to_string())]
        );
    }

    #[test]
    fn test_export_kind_and_xlsx_check() {
        assert_eq!(ExportKind::default().as_str(), "records");
        assert_eq!(ExportKind::Summary.as_str(), "summary");
        assert!(is_xlsx(b"PK\x03\x04rest-of-zip"));
        assert!(!is_xlsx(br#"{"error": "streamer_id is required"}"#));
        assert!(!is_xlsx(b""));
    }

    #[test]
    fn test_save_request_body() {
        let records = vec![NewBalloonRecord {
            user_id: "fan01".to_string(),
            user_nickname: "Fan".to_string(),
            count: 100,
            tag: "mission".to_string(),
            recorded_at: None,
        }];
        let body = serde_json::to_value(SaveRequest { streamer_id: 42, records: &records }).unwrap();
        assert_eq!(body["streamer_id"], 42);
        assert_eq!(body["records"][0]["user_id"], "fan01");
        assert_eq!(body["records"][0]["count"], 100);
        assert!(body["records"][0].get("recorded_at").is_none());

        let response: SaveResponse = serde_json::from_str(r#"{"ok": true, "inserted": 1}"#).unwrap();
        assert!(response.ok);
        assert_eq!(response.inserted, 1);
    }

    #[tokio::test]
    async fn test_save_and_export_validate_locally() {
        let anonymous = ApiClient::new("https://api.example.com").unwrap();
        let err = anonymous.export("42", None, ExportKind::Records).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));
        let err = anonymous.save_balloons("42", &[]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));

        let client = anonymous.with_token("tok".to_string());
        assert!(client.export("", None, ExportKind::Summary).await.is_err());
        assert!(client.save_balloons("42", &[]).await.is_err());
        assert!(client.save_balloons("abc", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_code_rejected_locally() {
        let client = ApiClient::new("https://api.example.com").unwrap();
        assert!(client.exchange_code("  ").await.is_err());
    }
}
