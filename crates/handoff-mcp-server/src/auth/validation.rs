use super::config::AuthConfig;
use super::jwks::JwksProvider;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use handoff_core::SessionToken;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token rejected: {0}")]
    Header(String),
    #[error("signing key not found for kid '{0}'")]
    KeyNotFound(String),
    #[error("JWKS unavailable: {0}")]
    Jwks(String),
    #[error("JWT validation failed: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: Option<String>,
    pub aud: Option<serde_json::Value>,
    pub exp: u64,
    pub nbf: Option<u64>,
    pub iat: Option<u64>,
    pub client_id: Option<String>,
    pub azp: Option<String>,
}

/// A validated caller session. The raw token is kept only so the grant guard can
/// present it to the broker as the exchange subject.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub subject: String,
    pub client_id: Option<String>,
    pub token: SessionToken,
}

pub struct TokenValidator {
    jwks: Option<JwksProvider>,
    static_key: Option<Arc<DecodingKey>>,
}

impl TokenValidator {
    pub fn new(jwks: JwksProvider) -> Self {
        Self {
            jwks: Some(jwks),
            static_key: None,
        }
    }

    pub fn new_with_static_key(key_pem: &[u8]) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(key_pem)
            .map_err(|e| AuthError::Malformed(format!("RSA PEM: {e}")))?;
        Ok(Self {
            jwks: None,
            static_key: Some(Arc::new(key)),
        })
    }

    pub async fn validate(
        &self,
        token: &str,
        config: &AuthConfig,
    ) -> Result<SessionIdentity, AuthError> {
        // Inspect the raw header JSON: jsonwebtoken's Header drops fields it does not model.
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(AuthError::Malformed("invalid JWT format".to_string()));
        }
        let header_json = URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|e| AuthError::Malformed(format!("header base64: {e}")))?;
        let header_value: serde_json::Value = serde_json::from_slice(&header_json)
            .map_err(|e| AuthError::Malformed(format!("header JSON: {e}")))?;

        if let Some(obj) = header_value.as_object() {
            if obj.contains_key("crit") {
                return Err(AuthError::Header(
                    "token contains critical extensions which are not understood".to_string(),
                ));
            }
            if ["jku", "jwk", "x5u", "x5c"]
                .iter()
                .any(|k| obj.contains_key(*k))
            {
                return Err(AuthError::Header(
                    "token contains dangerous headers (jku, jwk, x5u, x5c)".to_string(),
                ));
            }
        }

        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;

        match header.alg {
            Algorithm::RS256 | Algorithm::ES256 => {}
            other => {
                return Err(AuthError::Header(format!(
                    "algorithm {other:?} not allowed (only RS256, ES256)"
                )))
            }
        }

        if let Some(typ) = &header.typ {
            let t = typ.to_ascii_lowercase();
            if t != "jwt" && t != "at+jwt" && t != "application/at+jwt" {
                return Err(AuthError::Header(format!("token type '{typ}' not accepted")));
            }
        }

        let key = match (&self.static_key, &self.jwks) {
            (Some(k), _) => k.clone(),
            (None, Some(provider)) => {
                let kid = header
                    .kid
                    .as_deref()
                    .ok_or_else(|| AuthError::Malformed("missing kid".to_string()))?;
                provider.get_key(kid).await?
            }
            (None, None) => return Err(AuthError::Jwks("no key source configured".to_string())),
        };

        let mut validation = Validation::new(header.alg);
        validation.leeway = config.clock_skew_leeway.as_secs();
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if !config.issuers.is_empty() {
            validation.set_issuer(&config.issuers);
        }
        if !config.audience.is_empty() {
            validation.set_audience(&config.audience);
        }

        let claims = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?
            .claims;

        Ok(SessionIdentity {
            subject: claims.sub,
            client_id: claims.client_id.or(claims.azp),
            token: SessionToken::new(token),
        })
    }
}
