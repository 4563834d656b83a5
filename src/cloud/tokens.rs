use crate::error::CloudError;
use crate::store::SessionStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Config-slot key under which the credential is persisted.
pub const TOKENS_CONFIG_KEY: &str = "cloud.tokens";

/// Refresh this long before the recorded expiry to absorb clock skew.
const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth-style bearer credential for the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CloudTokens {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_SKEW_SECS) <= now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    14_400
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Bearer-token lifecycle: exchange on connect, transparent refresh on
/// expiry or 401, cleared on disconnect or irrecoverable refresh failure.
///
/// Concurrent refresh attempts are tolerated rather than serialized: the
/// provider's refresh endpoint is idempotent per refresh token, so the
/// occasional duplicate call is cheaper than a lock across a network round
/// trip.
pub struct TokenManager {
    store: Arc<dyn SessionStore>,
    http: reqwest::Client,
    token_url: Url,
    app_key: String,
    current: RwLock<Option<CloudTokens>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn SessionStore>, token_url: Url, app_key: impl Into<String>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            token_url,
            app_key: app_key.into(),
            current: RwLock::new(None),
        }
    }

    /// Load any persisted credential from the store's config slot.
    pub async fn load(&self) -> anyhow::Result<()> {
        let raw = self.store.get_config(TOKENS_CONFIG_KEY).await?;
        let tokens = raw
            .as_deref()
            .map(serde_json::from_str::<CloudTokens>)
            .transpose()
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "stored cloud tokens unreadable, discarding");
                None
            });
        *self.current.write().await = tokens;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Exchange an authorization code for a fresh credential and persist it.
    pub async fn connect(&self, auth_code: &str) -> Result<(), CloudError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", auth_code),
                ("client_id", self.app_key.as_str()),
            ])
            .send()
            .await
            .map_err(|error| CloudError::Transport(error.to_string()))?;
        let tokens = Self::tokens_from_response(response).await?;
        self.install(Some(tokens)).await;
        self.persist().await;
        Ok(())
    }

    /// Valid bearer token, refreshing first when within the expiry skew.
    pub async fn ensure_valid(&self) -> Result<String, CloudError> {
        let snapshot = self.current.read().await.clone();
        let Some(tokens) = snapshot else {
            return Err(CloudError::AuthRequired("no cloud credential".to_string()));
        };
        if !tokens.is_expired(Utc::now()) {
            return Ok(tokens.access_token);
        }
        self.refresh().await
    }

    /// Refresh the credential once. An `invalid_grant` rejection clears the
    /// stored credential and surfaces as auth-required.
    pub async fn refresh(&self) -> Result<String, CloudError> {
        let snapshot = self.current.read().await.clone();
        let Some(tokens) = snapshot else {
            return Err(CloudError::AuthRequired("no cloud credential".to_string()));
        };
        let Some(refresh_token) = tokens.refresh_token.clone() else {
            self.invalidate_and_clear().await;
            return Err(CloudError::AuthRequired(
                "credential expired and no refresh token held".to_string(),
            ));
        };

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.app_key.as_str()),
            ])
            .send()
            .await
            .map_err(|error| CloudError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body: TokenErrorBody = response.json().await.unwrap_or(TokenErrorBody {
                error: String::new(),
                error_description: None,
            });
            if body.error == "invalid_grant" || status == reqwest::StatusCode::UNAUTHORIZED {
                self.invalidate_and_clear().await;
                return Err(CloudError::AuthRequired(
                    body.error_description.unwrap_or(body.error),
                ));
            }
            return Err(CloudError::Rejected {
                path: self.token_url.path().to_string(),
                message: format!("{status}: {}", body.error),
            });
        }
        if !status.is_success() {
            return Err(CloudError::Transport(format!(
                "token refresh returned {status}"
            )));
        }

        let refreshed: TokenResponse = response
            .json()
            .await
            .map_err(|error| CloudError::Transport(error.to_string()))?;
        let tokens = CloudTokens {
            access_token: refreshed.access_token.clone(),
            // Rotation: the provider may or may not issue a new refresh token.
            refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
            expires_at: Utc::now() + Duration::seconds(refreshed.expires_in),
        };
        self.install(Some(tokens)).await;
        self.persist().await;
        Ok(refreshed.access_token)
    }

    /// Drop the credential from memory and from the store.
    pub async fn invalidate_and_clear(&self) {
        self.install(None).await;
        if let Err(error) = self.store.set_config(TOKENS_CONFIG_KEY, "").await {
            tracing::warn!(%error, "failed to clear persisted cloud tokens");
        }
    }

    /// Re-write the in-memory credential to the store. Called after a
    /// destructive restore wipes the config collection.
    pub async fn persist(&self) {
        let snapshot = self.current.read().await.clone();
        let Some(tokens) = snapshot else { return };
        match serde_json::to_string(&tokens) {
            Ok(encoded) => {
                if let Err(error) = self.store.set_config(TOKENS_CONFIG_KEY, &encoded).await {
                    tracing::warn!(%error, "failed to persist cloud tokens");
                }
            }
            Err(error) => tracing::warn!(%error, "failed to encode cloud tokens"),
        }
    }

    async fn install(&self, tokens: Option<CloudTokens>) {
        *self.current.write().await = tokens;
    }

    async fn tokens_from_response(response: reqwest::Response) -> Result<CloudTokens, CloudError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CloudError::AuthRequired(format!(
                "code exchange failed with {status}: {text}"
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|error| CloudError::Transport(error.to_string()))?;
        Ok(CloudTokens {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
        })
    }

    #[cfg(test)]
    pub(crate) async fn install_for_tests(&self, tokens: CloudTokens) {
        self.install(Some(tokens)).await;
        self.persist().await;
    }
}
