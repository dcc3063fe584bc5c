//! Environment configuration and bootstrap validation.
//!
//! Validation collects every problem before returning so the operator sees all
//! missing variables at once. Nothing here touches the network.

use crate::endpoint::EndpointPolicy;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const ZONE_ID: &str = "KEYCARD_ZONE_ID";
pub const CLIENT_ID: &str = "KEYCARD_CLIENT_ID";
pub const CLIENT_SECRET: &str = "KEYCARD_CLIENT_SECRET";
pub const BASE_URL: &str = "MCP_BASE_URL";
pub const ISSUER_URL: &str = "KEYCARD_ISSUER_URL";
pub const SESSION_AUTH: &str = "HANDOFF_SESSION_AUTH";
pub const AUDIT_LOG: &str = "HANDOFF_AUDIT_LOG";
pub const GITHUB_API_URL: &str = "HANDOFF_GITHUB_API_URL";
pub const ALLOW_PRIVATE_ENDPOINTS: &str = "HANDOFF_ALLOW_PRIVATE_ENDPOINTS";
pub const EXCHANGE_TIMEOUT_SECS: &str = "HANDOFF_EXCHANGE_TIMEOUT_SECS";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Variables the tool host refuses to start without, in report order.
pub const REQUIRED: &[&str] = &[ZONE_ID, CLIENT_ID, CLIENT_SECRET, BASE_URL];

/// Every variable `RawEnv::capture` reads.
pub const KNOWN: &[&str] = &[
    ZONE_ID,
    CLIENT_ID,
    CLIENT_SECRET,
    BASE_URL,
    ISSUER_URL,
    SESSION_AUTH,
    AUDIT_LOG,
    GITHUB_API_URL,
    ALLOW_PRIVATE_ENDPOINTS,
    EXCHANGE_TIMEOUT_SECS,
];

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a `.env` file into the process environment. Existing variables win.
pub fn load_dotenv(path: Option<&Path>) {
    let loaded = match path {
        Some(p) => dotenvy::from_path(p).map(|_| p.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(p) => tracing::debug!(event = "dotenv_loaded", path = %p.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(event = "dotenv_error", error = %e, "ignoring unreadable .env"),
    }
}

/// Snapshot of the configuration variables.
#[derive(Clone, Default)]
pub struct RawEnv {
    vars: BTreeMap<&'static str, String>,
}

impl RawEnv {
    pub fn capture(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = KNOWN
            .iter()
            .filter_map(|k| lookup(k).map(|v| (*k, v)))
            .collect();
        Self { vars }
    }

    pub fn from_process() -> Self {
        Self::capture(|k| std::env::var(k).ok())
    }

    pub fn set(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.vars.insert(key, value.into());
        self
    }

    /// Trimmed value, `None` when unset or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

impl fmt::Debug for RawEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for (k, v) in &self.vars {
            if *k == CLIENT_SECRET {
                m.entry(k, &"[REDACTED]");
            } else {
                m.entry(k, v);
            }
        }
        m.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionAuthMode {
    /// `initialize` and every later request need a valid bearer token.
    #[default]
    Required,
    /// No session-level check; granted tools fail without a session.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    BaseUrlMissingTrailingSlash(String),
    InsecureIssuer(String),
    PrivateEndpointsAllowed,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaseUrlMissingTrailingSlash(v) => write!(
                f,
                "{BASE_URL} '{v}' does not end with '/'; using '{v}/'. OAuth resource matching is exact, so set it with the trailing slash"
            ),
            Self::InsecureIssuer(v) => write!(f, "broker issuer '{v}' is not HTTPS"),
            Self::PrivateEndpointsAllowed => write!(
                f,
                "{ALLOW_PRIVATE_ENDPOINTS} is set; loopback and private broker endpoints are accepted"
            ),
        }
    }
}

/// All errors found during validation. Printed before the server binds.
#[derive(Debug, Clone, Default)]
pub struct ConfigReport {
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<ConfigWarning>,
}

impl fmt::Display for ConfigReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.errors {
            writeln!(f, "error: {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigReport {}

/// Validated tool host settings.
#[derive(Debug)]
pub struct Settings {
    pub zone_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Always ends with `/`.
    pub base_url: Url,
    pub issuer: Url,
    pub session_auth: SessionAuthMode,
    pub audit_log: Option<PathBuf>,
    pub github_api_url: Url,
    pub endpoint_policy: EndpointPolicy,
    pub exchange_timeout: Duration,
}

impl Settings {
    /// Validate a snapshot. On success also returns the warnings to show the operator.
    pub fn from_raw(raw: &RawEnv) -> Result<(Self, Vec<ConfigWarning>), ConfigReport> {
        let mut report = ConfigReport::default();

        for key in REQUIRED {
            if raw.get(key).is_none() {
                report.errors.push(ConfigError::Missing(key));
            }
        }

        let base_url = raw.get(BASE_URL).and_then(|v| {
            let normalised = if v.ends_with('/') {
                v.to_string()
            } else {
                report
                    .warnings
                    .push(ConfigWarning::BaseUrlMissingTrailingSlash(v.to_string()));
                format!("{v}/")
            };
            parse_http_url(BASE_URL, &normalised, &mut report)
        });

        let zone_id = raw.get(ZONE_ID).map(str::to_string);
        if let Some(zone) = &zone_id {
            if !zone
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
            {
                report.errors.push(ConfigError::Invalid {
                    var: ZONE_ID,
                    reason: "expected the bare zone id, not a URL".to_string(),
                });
            }
        }

        let issuer = match (raw.get(ISSUER_URL), &zone_id) {
            (Some(v), _) => parse_http_url(ISSUER_URL, v, &mut report),
            (None, Some(zone)) => Url::parse(&format!("https://{zone}.keycard.cloud")).ok(),
            (None, None) => None,
        };
        if let Some(iss) = &issuer {
            if iss.scheme() != "https" {
                report
                    .warnings
                    .push(ConfigWarning::InsecureIssuer(iss.to_string()));
            }
        }

        let session_auth = match raw.get(SESSION_AUTH).map(str::to_ascii_lowercase) {
            None => SessionAuthMode::Required,
            Some(v) if v == "required" => SessionAuthMode::Required,
            Some(v) if v == "disabled" => SessionAuthMode::Disabled,
            Some(v) => {
                report.errors.push(ConfigError::Invalid {
                    var: SESSION_AUTH,
                    reason: format!("'{v}' (expected 'required' or 'disabled')"),
                });
                SessionAuthMode::Required
            }
        };

        let github_api_url = parse_http_url(
            GITHUB_API_URL,
            raw.get(GITHUB_API_URL).unwrap_or(DEFAULT_GITHUB_API_URL),
            &mut report,
        );

        let endpoint_policy = if is_truthy(raw.get(ALLOW_PRIVATE_ENDPOINTS)) {
            report.warnings.push(ConfigWarning::PrivateEndpointsAllowed);
            EndpointPolicy::AllowPrivate
        } else {
            EndpointPolicy::PublicOnly
        };

        let exchange_timeout = match raw.get(EXCHANGE_TIMEOUT_SECS) {
            None => DEFAULT_EXCHANGE_TIMEOUT,
            Some(v) => match v.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    report.errors.push(ConfigError::Invalid {
                        var: EXCHANGE_TIMEOUT_SECS,
                        reason: format!("'{v}' (expected a positive number of seconds)"),
                    });
                    DEFAULT_EXCHANGE_TIMEOUT
                }
            },
        };

        if !report.errors.is_empty() {
            return Err(report);
        }

        // Every required value was present and parsed, otherwise we returned above.
        let (Some(zone_id), Some(client_id), Some(client_secret), Some(base_url), Some(issuer), Some(github_api_url)) = (
            zone_id,
            raw.get(CLIENT_ID),
            raw.get(CLIENT_SECRET),
            base_url,
            issuer,
            github_api_url,
        ) else {
            return Err(report);
        };

        let settings = Self {
            zone_id,
            client_id: client_id.to_string(),
            client_secret: SecretString::from(client_secret.to_string()),
            base_url,
            issuer,
            session_auth,
            audit_log: raw.get(AUDIT_LOG).map(PathBuf::from),
            github_api_url,
            endpoint_policy,
            exchange_timeout,
        };
        Ok((settings, report.warnings))
    }

    /// RFC 8693 token endpoint of the broker.
    pub fn token_endpoint(&self) -> Url {
        join(&self.issuer, "oauth/2/token")
    }

    pub fn jwks_uri(&self) -> Url {
        join(&self.issuer, "openidconnect/jwks")
    }

    /// Resource identifier of this tool host, as carried in session token audiences.
    pub fn resource_id(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn protected_resource_metadata_url(&self) -> Url {
        join(&self.base_url, ".well-known/oauth-protected-resource")
    }
}

fn join(base: &Url, path: &str) -> Url {
    let mut s = base.as_str().trim_end_matches('/').to_string();
    s.push('/');
    s.push_str(path);
    Url::parse(&s).unwrap_or_else(|_| base.clone())
}

fn parse_http_url(var: &'static str, value: &str, report: &mut ConfigReport) -> Option<Url> {
    match Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Some(u),
        Ok(u) => {
            report.errors.push(ConfigError::Invalid {
                var,
                reason: format!("unsupported scheme '{}'", u.scheme()),
            });
            None
        }
        Err(e) => {
            report.errors.push(ConfigError::Invalid {
                var,
                reason: e.to_string(),
            });
            None
        }
    }
}

fn is_truthy(v: Option<&str>) -> bool {
    v.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> RawEnv {
        RawEnv::default()
            .set(ZONE_ID, "abc123")
            .set(CLIENT_ID, "client-1")
            .set(CLIENT_SECRET, "s3cret")
            .set(BASE_URL, "http://localhost:8000/")
    }

    #[test]
    fn complete_env_validates_without_warnings() {
        let (s, warnings) = Settings::from_raw(&complete()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(s.issuer.as_str(), "https://abc123.keycard.cloud/");
        assert_eq!(
            s.token_endpoint().as_str(),
            "https://abc123.keycard.cloud/oauth/2/token"
        );
        assert_eq!(
            s.jwks_uri().as_str(),
            "https://abc123.keycard.cloud/openidconnect/jwks"
        );
        assert_eq!(s.session_auth, SessionAuthMode::Required);
        assert_eq!(s.exchange_timeout, DEFAULT_EXCHANGE_TIMEOUT);
        assert_eq!(
            s.protected_resource_metadata_url().as_str(),
            "http://localhost:8000/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn every_missing_variable_is_reported() {
        let raw = RawEnv::default().set(ZONE_ID, "abc123").set(CLIENT_ID, "   ");
        let report = Settings::from_raw(&raw).unwrap_err();
        assert_eq!(
            report.errors,
            vec![
                ConfigError::Missing(CLIENT_ID),
                ConfigError::Missing(CLIENT_SECRET),
                ConfigError::Missing(BASE_URL),
            ]
        );
        let text = report.to_string();
        assert!(text.contains("error: KEYCARD_CLIENT_SECRET is not set"));
    }

    #[test]
    fn base_url_without_slash_warns_and_normalises() {
        let raw = complete().set(BASE_URL, "https://tunnel.example.com");
        let (s, warnings) = Settings::from_raw(&raw).unwrap();
        assert_eq!(s.base_url.as_str(), "https://tunnel.example.com/");
        assert!(matches!(
            warnings.as_slice(),
            [ConfigWarning::BaseUrlMissingTrailingSlash(_)]
        ));
        assert!(warnings[0].to_string().contains("does not end with '/'"));
    }

    #[test]
    fn zone_given_as_url_is_rejected() {
        let raw = complete().set(ZONE_ID, "https://abc123.keycard.cloud");
        let report = Settings::from_raw(&raw).unwrap_err();
        assert!(matches!(
            report.errors.as_slice(),
            [ConfigError::Invalid { var: ZONE_ID, .. }]
        ));
    }

    #[test]
    fn overrides_are_applied() {
        let raw = complete()
            .set(ISSUER_URL, "http://127.0.0.1:9000")
            .set(SESSION_AUTH, "Disabled")
            .set(ALLOW_PRIVATE_ENDPOINTS, "1")
            .set(EXCHANGE_TIMEOUT_SECS, "3")
            .set(AUDIT_LOG, "/tmp/audit.ndjson");
        let (s, warnings) = Settings::from_raw(&raw).unwrap();
        assert_eq!(s.session_auth, SessionAuthMode::Disabled);
        assert_eq!(s.endpoint_policy, EndpointPolicy::AllowPrivate);
        assert_eq!(s.exchange_timeout, Duration::from_secs(3));
        assert_eq!(s.audit_log, Some(PathBuf::from("/tmp/audit.ndjson")));
        assert_eq!(s.token_endpoint().as_str(), "http://127.0.0.1:9000/oauth/2/token");
        assert!(warnings.contains(&ConfigWarning::PrivateEndpointsAllowed));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::InsecureIssuer(_))));
    }

    #[test]
    fn bad_optional_values_are_errors() {
        let raw = complete()
            .set(SESSION_AUTH, "sometimes")
            .set(EXCHANGE_TIMEOUT_SECS, "0");
        let report = Settings::from_raw(&raw).unwrap_err();
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn debug_redacts_client_secret() {
        let dbg = format!("{:?}", complete());
        assert!(!dbg.contains("s3cret"));
        let (s, _) = Settings::from_raw(&complete()).unwrap();
        assert!(!format!("{:?}", s).contains("s3cret"));
    }
}
