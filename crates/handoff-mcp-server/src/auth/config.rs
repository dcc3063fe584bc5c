use handoff_core::config::{SessionAuthMode, Settings};
use std::time::Duration;
use url::Url;

pub use handoff_core::config::SessionAuthMode as SessionAuth;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: SessionAuth,
    pub jwks_uri: Url,
    /// Accepted `iss` values.
    pub issuers: Vec<String>,
    /// Accepted `aud` values: the tool host's resource identifier.
    pub audience: Vec<String>,
    pub resource_metadata: Url,
    pub clock_skew_leeway: Duration,
}

impl AuthConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mode: settings.session_auth,
            jwks_uri: settings.jwks_uri(),
            issuers: slash_variants(settings.issuer.as_str()),
            audience: slash_variants(settings.resource_id()),
            resource_metadata: settings.protected_resource_metadata_url(),
            clock_skew_leeway: Duration::from_secs(30),
        }
    }

    pub fn is_required(&self) -> bool {
        self.mode == SessionAuthMode::Required
    }

    /// `WWW-Authenticate` value for a 401 on the MCP endpoint.
    pub fn challenge(&self) -> String {
        format!(
            "Bearer error=\"invalid_token\", resource_metadata=\"{}\"",
            self.resource_metadata
        )
    }
}

/// Url normalisation adds a trailing slash to bare origins; tokens may carry either form.
fn slash_variants(v: &str) -> Vec<String> {
    let trimmed = v.trim_end_matches('/');
    let mut out = vec![v.to_string()];
    if trimmed != v {
        out.push(trimmed.to_string());
    } else {
        out.push(format!("{v}/"));
    }
    out
}
