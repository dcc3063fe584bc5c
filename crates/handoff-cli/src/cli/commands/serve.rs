use super::super::args::ServeArgs;
use crate::exit_codes;
use anyhow::Context;
use handoff_core::config::Settings;
use handoff_mcp_server::AppState;

/// Validate, then bind and serve until ctrl-c. Configuration errors are all
/// printed and exit with `CONFIG_ERROR` before any socket is opened.
pub async fn run(args: ServeArgs) -> anyhow::Result<i32> {
    let raw = super::capture_env(args.env_file.as_deref());
    let settings = match Settings::from_raw(&raw) {
        Ok((settings, warnings)) => {
            for w in warnings {
                eprintln!("warning: {w}");
            }
            settings
        }
        Err(report) => {
            eprint!("{report}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let state = AppState::from_settings(&settings).context("failed to build tool host")?;
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    handoff_mcp_server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(event = "shutdown", "shutting down");
    })
    .await?;
    Ok(exit_codes::SUCCESS)
}
