use clap::Parser;
use handoff_core::config::{load_dotenv, RawEnv, Settings};
use handoff_mcp_server::{logging, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "handoff-mcp-server", version, about = "handoff MCP tool host")]
struct Args {
    /// Listen address
    #[arg(long, env = "HANDOFF_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// .env file to load before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    // RUST_LOG and HANDOFF_LOG_FORMAT may come from the .env file.
    load_dotenv(args.env_file.as_deref());
    logging::init();

    let settings = match Settings::from_raw(&RawEnv::from_process()) {
        Ok((settings, warnings)) => {
            for w in warnings {
                eprintln!("warning: {w}");
            }
            settings
        }
        Err(report) => {
            eprint!("{report}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args.bind, &settings).await {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(bind: SocketAddr, settings: &Settings) -> anyhow::Result<()> {
    let state = AppState::from_settings(settings)?;
    let listener = tokio::net::TcpListener::bind(bind).await?;
    handoff_mcp_server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}
