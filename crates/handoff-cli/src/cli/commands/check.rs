//! Configuration self-test. Secrets are masked and no file or socket is opened.

use super::super::args::CheckArgs;
use crate::exit_codes;
use handoff_core::config::{self, RawEnv, Settings};
use handoff_mcp_server::AppState;

const SECRETS: &[&str] = &[config::CLIENT_SECRET];

pub fn run(args: CheckArgs) -> anyhow::Result<i32> {
    let raw = super::capture_env(args.env_file.as_deref());
    let mut out = String::new();
    let ok = report(&raw, &mut out);
    print!("{out}");
    Ok(if ok {
        exit_codes::SUCCESS
    } else {
        exit_codes::COMMAND_FAILED
    })
}

/// Append the human-readable check to `out`; `true` when the tool host would start.
pub(crate) fn report(raw: &RawEnv, out: &mut String) -> bool {
    use std::fmt::Write as _;

    out.push_str("Configuration:\n");
    for key in config::KNOWN {
        let required = config::REQUIRED.contains(key);
        let line = match raw.get(key) {
            Some(v) if SECRETS.contains(key) => format!("set ({})", mask(v)),
            Some(v) => format!("set ({v})"),
            None if required => "MISSING (required)".to_string(),
            None => "not set (optional)".to_string(),
        };
        let _ = writeln!(out, "  {key:<34} {line}");
    }

    let settings = match Settings::from_raw(raw) {
        Ok((settings, warnings)) => {
            for w in warnings {
                let _ = writeln!(out, "warning: {w}");
            }
            settings
        }
        Err(report) => {
            out.push_str(&report.to_string());
            return false;
        }
    };

    let _ = writeln!(out, "Token endpoint: {}", settings.token_endpoint());
    let _ = writeln!(out, "JWKS:           {}", settings.jwks_uri());
    let _ = writeln!(out, "Resource:       {}", settings.resource_id());
    match AppState::preflight(&settings) {
        Ok(_) => {
            out.push_str("Broker client and token validator: ok\n");
            true
        }
        Err(e) => {
            let _ = writeln!(out, "error: {e}");
            false
        }
    }
}

/// Keep only the last four characters of long values.
fn mask(v: &str) -> String {
    let n = v.chars().count();
    if n <= 8 {
        return "****".to_string();
    }
    let tail: String = v.chars().skip(n - 4).collect();
    format!("****{tail}")
}
