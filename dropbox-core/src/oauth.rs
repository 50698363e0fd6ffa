use std::fmt;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.dropboxapi.com";
const TOKEN_PATH: &str = "/oauth2/token";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid oauth base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("token endpoint returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Exchanges a long-lived refresh token for short-lived access tokens.
#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    token_url: Url,
    app_key: String,
    app_secret: String,
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("token_url", &self.token_url.as_str())
            .field("app_key", &self.app_key)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_base_url(DEFAULT_BASE_URL, app_key, app_secret)
    }

    pub fn with_base_url(
        base_url: &str,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        let token_url = Url::parse(base_url)?.join(TOKEN_PATH)?;
        Ok(Self {
            http: Client::new(),
            token_url,
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        })
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.app_key),
            ("client_secret", &self.app_secret),
        ];
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;
        read_token(response).await
    }
}

async fn read_token(response: Response) -> Result<OAuthToken, OAuthError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::Api { status, body });
    }
    Ok(response.json().await?)
}

/// Token endpoint payload. Dropbox omits `refresh_token` unless it rotated,
/// and a body without `access_token` still parses so callers can reject it.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
