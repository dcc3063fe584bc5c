//! Session and delegated credential types.
//!
//! A [`DelegatedCredential`] is minted by the broker for exactly one tool call. It is
//! neither `Clone` nor `Serialize`, its `Debug` output is redacted, and the only
//! accessor that exposes the token is [`DelegatedCredential::bearer_header`], used when
//! building the outbound Resource API request. The [`AccessContext`] that carries it is
//! moved into the tool invocation and dropped when the call returns.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Resource URI a delegated credential is scoped to (RFC 8707).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resource(String);

impl Resource {
    pub fn parse(uri: &str) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(uri)?;
        // Url normalises "https://api.github.com" to "https://api.github.com/"; the
        // broker matches resources verbatim, so keep the caller's spelling.
        if parsed.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
        }
        Ok(Self(uri.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bearer token presented by the caller for the current MCP session.
pub struct SessionToken(SecretString);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for SessionToken {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Short-lived, resource-scoped token obtained from the broker for one tool call.
pub struct DelegatedCredential {
    access_token: SecretString,
    token_type: String,
    resource: Resource,
    expires_at: Option<DateTime<Utc>>,
}

impl DelegatedCredential {
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        resource: Resource,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            token_type: token_type.into(),
            resource,
            expires_at,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| t <= Utc::now())
    }

    /// `Authorization` header value for the Resource API request.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }

    /// Remove every occurrence of the token from `text`.
    pub fn scrub(&self, text: &str) -> String {
        let secret = self.access_token.expose_secret();
        if secret.is_empty() || !text.contains(secret) {
            return text.to_string();
        }
        text.replace(secret, "[REDACTED]")
    }
}

impl fmt::Debug for DelegatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedCredential")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("resource", &self.resource)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Per-call view of the credentials the grant guard obtained.
#[derive(Debug, Default)]
pub struct AccessContext {
    granted: BTreeMap<Resource, DelegatedCredential>,
}

impl AccessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, credential: DelegatedCredential) {
        self.granted
            .insert(credential.resource().clone(), credential);
    }

    pub fn access(&self, resource: &Resource) -> Option<&DelegatedCredential> {
        self.granted.get(resource)
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }

    /// Scrub every held credential from `text`.
    pub fn scrub(&self, text: &str) -> String {
        self.granted
            .values()
            .fold(text.to_string(), |acc, c| c.scrub(&acc))
    }
}
