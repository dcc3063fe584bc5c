use super::validation::AuthError;
use handoff_core::endpoint::{self, EndpointPolicy};
use jsonwebtoken::DecodingKey;
use moka::sync::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const MAX_JWKS_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    crv: Option<String>,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

impl Jwk {
    fn decoding_key(&self) -> Option<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let (n, e) = (self.n.as_deref()?, self.e.as_deref()?);
                DecodingKey::from_rsa_components(n, e).ok()
            }
            "EC" if self.crv.as_deref() == Some("P-256") => {
                let (x, y) = (self.x.as_deref()?, self.y.as_deref()?);
                DecodingKey::from_ec_components(x, y).ok()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Broker signing keys, cached by `kid`.
#[derive(Clone)]
pub struct JwksProvider {
    cache: Cache<String, Arc<DecodingKey>>,
    client: Client,
    jwks_uri: Url,
}

impl JwksProvider {
    pub fn new(jwks_uri: Url, policy: EndpointPolicy) -> Result<Self, AuthError> {
        endpoint::validate(&jwks_uri, policy).map_err(|e| AuthError::Jwks(e.to_string()))?;

        Ok(Self {
            cache: Cache::builder()
                .max_capacity(100)
                .time_to_live(Duration::from_secs(3600))
                .build(),
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .user_agent(handoff_core::headers::USER_AGENT)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| AuthError::Jwks(e.to_string()))?,
            jwks_uri,
        })
    }

    pub async fn get_key(&self, kid: &str) -> Result<Arc<DecodingKey>, AuthError> {
        if let Some(key) = self.cache.get(kid) {
            return Ok(key);
        }

        // Unknown kid: the broker may have rotated keys.
        self.refresh().await?;

        self.cache
            .get(kid)
            .ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        tracing::info!(event = "jwks_refresh", uri = %self.jwks_uri);
        let resp = self
            .client
            .get(self.jwks_uri.clone())
            .send()
            .await
            .map_err(|e| AuthError::Jwks(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthError::Jwks(format!("JWKS fetch returned {}", resp.status())));
        }
        if resp.content_length().is_some_and(|len| len as usize > MAX_JWKS_BYTES) {
            return Err(AuthError::Jwks("JWKS response too large".to_string()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| AuthError::Jwks(e.without_url().to_string()))?;
        if body.len() > MAX_JWKS_BYTES {
            return Err(AuthError::Jwks("JWKS response too large".to_string()));
        }

        let jwks: JwksResponse = serde_json::from_slice(&body)
            .map_err(|e| AuthError::Jwks(format!("failed to parse JWKS: {e}")))?;

        let mut loaded = 0usize;
        for key in &jwks.keys {
            let (Some(kid), Some(decoding_key)) = (&key.kid, key.decoding_key()) else {
                continue;
            };
            self.cache.insert(kid.clone(), Arc::new(decoding_key));
            loaded += 1;
        }
        tracing::debug!(event = "jwks_loaded", keys = loaded);

        Ok(())
    }
}
