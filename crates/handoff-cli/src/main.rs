use clap::Parser;

mod cli;
mod crew;
pub mod exit_codes;
mod session;

use cli::args::Cli;
use cli::commands::dispatch;
use handoff_core::config::load_dotenv;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();
    // RUST_LOG and HANDOFF_LOG_FORMAT may come from the .env file.
    load_dotenv(cli.cmd.env_file());
    handoff_mcp_server::logging::init();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            exit_codes::COMMAND_FAILED
        }
    };
    std::process::exit(code);
}
