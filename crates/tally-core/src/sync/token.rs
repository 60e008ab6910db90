//! Exchange of the signed-in user's bearer token for partition database credentials.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::util::{compact_text, is_http_url, normalize_text_option, unix_timestamp_now};

/// Short-lived credentials for the user's partition database.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncToken {
    pub token: String,
    /// Expiry (Unix seconds)
    pub expires_at: i64,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for SyncToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("database_url", &self.database_url)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum SyncAuthError {
    #[error("Invalid sync auth configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync auth HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync auth API error: {0}")]
    Api(String),
    #[error("Invalid sync token payload: {0}")]
    InvalidPayload(String),
}

pub type SyncAuthResult<T> = Result<T, SyncAuthError>;

/// HTTP client for the sync token endpoint.
#[derive(Clone)]
pub struct SyncTokenClient {
    endpoint: String,
    client: reqwest::Client,
}

impl SyncTokenClient {
    pub fn new(endpoint: impl Into<String>) -> SyncAuthResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn exchange_token(&self, access_token: &str) -> SyncAuthResult<SyncToken> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(SyncAuthError::InvalidConfiguration(
                "access token must not be empty".to_string(),
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncAuthError::Api(parse_api_error(status, &body)));
        }

        let payload = response.json::<SyncTokenResponse>().await?;
        payload.try_into()
    }
}

#[derive(Debug, Deserialize)]
struct SyncTokenResponse {
    auth_token: Option<String>,
    token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    database_url: Option<String>,
}

impl TryFrom<SyncTokenResponse> for SyncToken {
    type Error = SyncAuthError;

    fn try_from(value: SyncTokenResponse) -> SyncAuthResult<Self> {
        let token = value
            .auth_token
            .or(value.token)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                SyncAuthError::InvalidPayload(
                    "response did not include auth_token/token".to_string(),
                )
            })?;

        let expires_at = value
            .expires_at
            .or_else(|| {
                value
                    .expires_in
                    .map(|expires_in| unix_timestamp_now().saturating_add(expires_in))
            })
            .ok_or_else(|| {
                SyncAuthError::InvalidPayload(
                    "response did not include expires_at/expires_in".to_string(),
                )
            })?;

        Ok(Self {
            token,
            expires_at,
            database_url: normalize_text_option(value.database_url),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SyncAuthErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SyncAuthErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

pub(crate) fn normalize_endpoint(raw: String) -> SyncAuthResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        SyncAuthError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(SyncAuthError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> SyncTokenResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = SyncTokenClient::new(" https://api.example.com/v1/sync/token/ ").unwrap();
        assert_eq!(client.endpoint(), "https://api.example.com/v1/sync/token");
    }

    #[test]
    fn sync_token_debug_redacts_token() {
        let token = SyncToken {
            token: "secret".to_string(),
            expires_at: 123,
            database_url: Some("libsql://tally-user.turso.io".to_string()),
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn payload_accepts_either_token_field() {
        let token: SyncToken = response(
            r#"{"token": " abc ", "expires_at": 99, "database_url": "libsql://db.turso.io"}"#,
        )
        .try_into()
        .unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_at, 99);
        assert_eq!(token.database_url.as_deref(), Some("libsql://db.turso.io"));
    }

    #[test]
    fn payload_derives_expiry_from_expires_in() {
        let before = unix_timestamp_now();
        let token: SyncToken = response(r#"{"auth_token": "abc", "expires_in": 3600}"#)
            .try_into()
            .unwrap();
        assert!(token.expires_at >= before + 3600);
        assert_eq!(token.database_url, None);
    }

    #[test]
    fn payload_without_token_is_rejected() {
        let result: SyncAuthResult<SyncToken> =
            response(r#"{"auth_token": "  ", "expires_at": 1}"#).try_into();
        assert!(matches!(result, Err(SyncAuthError::InvalidPayload(_))));
    }

    #[test]
    fn api_error_prefers_message_field() {
        let message = parse_api_error(StatusCode::UNAUTHORIZED, r#"{"message": " expired "}"#);
        assert_eq!(message, "expired (401)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}
