//! No pass-through of inbound auth to the Resource API.
//!
//! Outbound requests are built from [`build_downstream_headers`] plus, for granted
//! tools, the delegated credential. Inbound request headers are never copied.
//! [`redact_sensitive_keys`] applies the same denylist to JSON values before they
//! reach the audit trail.

use serde_json::Value;

/// Header names that must never be forwarded from inbound to downstream (case-insensitive).
pub const SENSITIVE_HEADER_NAMES: &[&str] = &[
    "authorization",
    "x-api-key",
    "proxy-authorization",
    "cookie",
    "cookie2",
    "x-auth-token",
    "x-access-token",
    "x-forwarded-authorization",
    "set-cookie",
];

/// Argument keys masked in audit records, in addition to the header names.
const SENSITIVE_ARGUMENT_KEYS: &[&str] = &[
    "token",
    "access_token",
    "refresh_token",
    "password",
    "secret",
    "client_secret",
];

pub const USER_AGENT: &str = concat!("handoff/", env!("CARGO_PKG_VERSION"));

#[inline]
pub fn is_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_HEADER_NAMES.contains(&lower.as_str())
}

/// Headers for a Resource API request, from the allowlist only.
#[inline]
pub fn build_downstream_headers() -> Vec<(&'static str, String)> {
    vec![
        ("accept", "application/vnd.github.v3+json".to_string()),
        ("user-agent", USER_AGENT.to_string()),
    ]
}

/// Copy of `value` with sensitive object keys replaced by `"[REDACTED]"`, at any depth.
pub fn redact_sensitive_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let lower = k.to_ascii_lowercase();
                    if is_sensitive(&lower) || SENSITIVE_ARGUMENT_KEYS.contains(&lower.as_str()) {
                        (k.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (k.clone(), redact_sensitive_keys(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_keys).collect()),
        other => other.clone(),
    }
}
