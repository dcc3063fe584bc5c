//! Process-wide tracing setup. Logs go to stderr so stdout stays free for command output.

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "HANDOFF_LOG_FORMAT";

/// Install the global subscriber. `RUST_LOG` filters (default `info`);
/// `HANDOFF_LOG_FORMAT=json` switches to one JSON object per line.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
