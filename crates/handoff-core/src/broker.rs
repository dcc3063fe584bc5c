//! Client for the external authentication broker.
//!
//! The broker holds the long-lived user session. For each granted tool call we
//! exchange the caller's session token for a credential scoped to one resource
//! (RFC 8693 token exchange). Exchanges are never cached or retried: each call gets
//! its own credential, and a failure surfaces to the caller as-is.

use crate::audit::reason_codes;
use crate::config::Settings;
use crate::credential::{DelegatedCredential, Resource, SessionToken};
use crate::endpoint::{self, EndpointError, EndpointPolicy};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::{Duration, Instant};
use url::Url;

pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker refused the exchange (4xx).
    #[error("token exchange rejected ({status}): {error}{}", description.as_deref().map(|d| format!(" - {d}")).unwrap_or_default())]
    Rejected {
        status: u16,
        error: String,
        description: Option<String>,
    },

    #[error("token exchange timed out after {0:?}")]
    Timeout(Duration),

    #[error("broker unavailable: {message}")]
    Unavailable { message: String },

    #[error("invalid broker response: {message}")]
    InvalidResponse { message: String },

    #[error("invalid broker endpoint: {0}")]
    Endpoint(#[from] EndpointError),
}

impl BrokerError {
    /// Stable audit reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => reason_codes::A_EXCHANGE_REJECTED,
            Self::Timeout(_) => reason_codes::A_EXCHANGE_TIMEOUT,
            Self::Unavailable { .. } | Self::InvalidResponse { .. } | Self::Endpoint(_) => {
                reason_codes::A_BROKER_UNAVAILABLE
            }
        }
    }
}

/// Exchanges a session identity for a resource-scoped credential.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(
        &self,
        subject: &SessionToken,
        resource: &Resource,
    ) -> Result<DelegatedCredential, BrokerError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Keycard token-exchange client.
pub struct KeycardBroker {
    client: reqwest::Client,
    token_endpoint: Url,
    client_id: String,
    client_secret: SecretString,
    timeout: Duration,
}

impl KeycardBroker {
    pub fn new(
        token_endpoint: Url,
        client_id: impl Into<String>,
        client_secret: SecretString,
        timeout: Duration,
        policy: EndpointPolicy,
    ) -> Result<Self, BrokerError> {
        endpoint::validate(&token_endpoint, policy)?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(crate::headers::USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| BrokerError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            token_endpoint,
            client_id: client_id.into(),
            client_secret,
            timeout,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, BrokerError> {
        Self::new(
            settings.token_endpoint(),
            settings.client_id.clone(),
            SecretString::from(settings.client_secret.expose_secret().to_string()),
            settings.exchange_timeout,
            settings.endpoint_policy,
        )
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    async fn request(
        &self,
        subject: &SessionToken,
        resource: &Resource,
    ) -> Result<DelegatedCredential, BrokerError> {
        let form = [
            ("grant_type", GRANT_TYPE_TOKEN_EXCHANGE),
            ("subject_token", subject.expose()),
            ("subject_token_type", TOKEN_TYPE_ACCESS_TOKEN),
            ("resource", resource.as_str()),
        ];

        let response = self
            .client
            .post(self.token_endpoint.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .header("accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrokerError::Timeout(self.timeout)
                } else {
                    BrokerError::Unavailable {
                        message: e.without_url().to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            let (error, description) = match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(b) => (b.error, b.error_description),
                Err(_) => ("invalid_request".to_string(), None),
            };
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
                error,
                description,
            });
        }
        if !status.is_success() {
            return Err(BrokerError::Unavailable {
                message: format!("HTTP {status}"),
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| BrokerError::InvalidResponse {
                    message: format!("failed to parse token response: {}", e.without_url()),
                })?;

        if token.access_token.is_empty() {
            return Err(BrokerError::InvalidResponse {
                message: "empty access_token".to_string(),
            });
        }

        let expires_at = match token.expires_in {
            None => None,
            Some(secs) => Some(expiry_after(secs).ok_or_else(|| {
                BrokerError::InvalidResponse {
                    message: format!("expires_in out of range: {secs}"),
                }
            })?),
        };

        Ok(DelegatedCredential::new(
            token.access_token,
            token.token_type,
            resource.clone(),
            expires_at,
        ))
    }
}

/// `now + secs`, or `None` when the lifetime is negative or unrepresentable.
fn expiry_after(secs: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    if secs < 0 {
        return None;
    }
    chrono::Duration::try_seconds(secs).and_then(|d| chrono::Utc::now().checked_add_signed(d))
}

#[async_trait]
impl TokenExchanger for KeycardBroker {
    async fn exchange(
        &self,
        subject: &SessionToken,
        resource: &Resource,
    ) -> Result<DelegatedCredential, BrokerError> {
        let start = Instant::now();
        let result = self.request(subject, resource).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(cred) => tracing::info!(
                event = "token_exchange",
                resource = %resource,
                outcome = "granted",
                token_type = cred.token_type(),
                expires_at = ?cred.expires_at(),
                latency_ms,
            ),
            Err(e) => tracing::warn!(
                event = "token_exchange",
                resource = %resource,
                outcome = "failed",
                reason = e.reason_code(),
                error = %e,
                latency_ms,
            ),
        }
        result
    }
}
