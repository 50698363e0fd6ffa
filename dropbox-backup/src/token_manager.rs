use std::fmt;

use dropbox_core::{DropboxClient, OAuthClient, OAuthError};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("oauth refresh failed: {0}")]
    OAuth(#[from] OAuthError),
    #[error("token endpoint returned no usable access token")]
    MissingAccessToken,
}

/// App credentials plus the token pair they were issued.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Credential {
    pub fn oauth_client(&self, base_url: Option<&str>) -> Result<OAuthClient, OAuthError> {
        match base_url {
            Some(url) => OAuthClient::with_base_url(url, &self.client_id, &self.client_secret),
            None => OAuthClient::new(&self.client_id, &self.client_secret),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &redacted(&self.access_token))
            .field("refresh_token", &redacted(&self.refresh_token))
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

/// Access token handed out by [`TokenManager`], tagged with the refresh
/// generation it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    generation: u64,
}

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.secret
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &redacted(&self.secret))
            .field("generation", &self.generation)
            .finish()
    }
}

struct TokenState {
    access_token: String,
    refresh_token: String,
    generation: u64,
}

/// Shared owner of the token pair. Expiry is only ever discovered by a 401,
/// so every privileged call goes through [`TokenManager::ensure_valid`] first.
///
/// Refreshes are serialized by `refresh_gate`. A caller that saw a rejected
/// token compares generations after taking the gate and reuses a refresh that
/// completed while it was waiting.
pub struct TokenManager {
    api: DropboxClient,
    oauth: OAuthClient,
    state: RwLock<TokenState>,
    refresh_gate: Mutex<()>,
}

impl TokenManager {
    pub fn new(credential: Credential, api: DropboxClient, oauth: OAuthClient) -> Self {
        Self {
            api,
            oauth,
            state: RwLock::new(TokenState {
                access_token: credential.access_token,
                refresh_token: credential.refresh_token,
                generation: 0,
            }),
            refresh_gate: Mutex::new(()),
        }
    }

    pub async fn current(&self) -> AccessToken {
        let state = self.state.read().await;
        AccessToken {
            secret: state.access_token.clone(),
            generation: state.generation,
        }
    }

    pub async fn ensure_valid(&self) -> Result<AccessToken, TokenError> {
        let current = self.current().await;
        if current.secret.is_empty() {
            debug!("no access token on hand, refreshing");
            return self.refresh_if_current(current.generation).await;
        }
        match self.api.get_current_account(&current.secret).await {
            Ok(_) => Ok(current),
            Err(err) if err.is_auth() => {
                info!(
                    generation = current.generation,
                    "access token rejected by probe"
                );
                self.refresh_if_current(current.generation).await
            }
            Err(err) => {
                warn!(error = %err, "token probe failed, keeping current access token");
                Ok(current)
            }
        }
    }

    /// Unconditional refresh exchange.
    pub async fn refresh(&self) -> Result<AccessToken, TokenError> {
        let _gate = self.refresh_gate.lock().await;
        self.exchange().await
    }

    /// Refresh after a privileged call rejected `rejected`, unless another
    /// caller has already replaced it.
    pub async fn refresh_rejected(&self, rejected: &AccessToken) -> Result<AccessToken, TokenError> {
        self.refresh_if_current(rejected.generation).await
    }

    async fn refresh_if_current(&self, observed: u64) -> Result<AccessToken, TokenError> {
        let _gate = self.refresh_gate.lock().await;
        let current = self.current().await;
        if current.generation != observed {
            debug!(
                generation = current.generation,
                "access token already refreshed by another caller"
            );
            return Ok(current);
        }
        self.exchange().await
    }

    // Caller holds `refresh_gate`.
    async fn exchange(&self) -> Result<AccessToken, TokenError> {
        let refresh_token = self.state.read().await.refresh_token.clone();
        info!("refreshing access token");
        let token = self.oauth.refresh_token(&refresh_token).await?;
        if token.access_token.trim().is_empty() {
            return Err(TokenError::MissingAccessToken);
        }

        let mut state = self.state.write().await;
        state.access_token = token.access_token;
        if let Some(rotated) = token.refresh_token.filter(|t| !t.is_empty()) {
            state.refresh_token = rotated;
            info!("refresh token rotated");
        }
        state.generation += 1;
        info!(generation = state.generation, "access token refreshed");
        Ok(AccessToken {
            secret: state.access_token.clone(),
            generation: state.generation,
        })
    }
}
