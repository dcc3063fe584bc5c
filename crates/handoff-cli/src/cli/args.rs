use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

#[derive(Parser)]
#[command(
    name = "handoff",
    version,
    about = "MCP tool host with delegated GitHub access, plus the client side that drives it"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate configuration and run the tool host
    Serve(ServeArgs),
    /// Report configuration and try to build the broker client and token validator
    Check(CheckArgs),
    /// Print the tool host's HTTP routes
    Routes,
    /// Obtain a session token for a tool host (browser consent, PKCE)
    Login(LoginArgs),
    /// Run a PR crew against a tool host
    Crew(CrewArgs),
    Version,
}

impl Command {
    /// The `--env-file` of commands that read configuration from the environment.
    pub fn env_file(&self) -> Option<&std::path::Path> {
        match self {
            Command::Serve(a) => a.env_file.as_deref(),
            Command::Check(a) => a.env_file.as_deref(),
            Command::Crew(CrewArgs {
                kind: CrewKind::Summarize(a) | CrewKind::Analyze(a),
            }) => a.env_file.as_deref(),
            Command::Routes | Command::Login(_) | Command::Version => None,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address
    #[arg(long, env = "HANDOFF_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// .env file to load before reading the environment
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Tool host base URL
    #[arg(long, env = "HANDOFF_SERVER", default_value = "http://127.0.0.1:8000/")]
    pub server: Url,

    /// Seconds to wait for the browser callback
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// OAuth client id; registered dynamically when omitted and the
    /// authorization server supports it
    #[arg(long, env = "HANDOFF_LOGIN_CLIENT_ID")]
    pub client_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct CrewArgs {
    #[command(subcommand)]
    pub kind: CrewKind,
}

#[derive(Subcommand, Debug)]
pub enum CrewKind {
    /// Single researcher agent summarizing the PR
    Summarize(CrewRunArgs),
    /// Overview, code review and community analysis, then an executive summary
    Analyze(CrewRunArgs),
}

#[derive(Args, Debug)]
pub struct CrewRunArgs {
    /// Repository (owner/name)
    #[arg(long)]
    pub repo: String,

    /// Pull request number
    #[arg(long)]
    pub pr: u64,

    /// Tool host base URL [env: HANDOFF_SERVER] (defaults to the server of the stored session)
    #[arg(long)]
    pub server: Option<Url>,

    /// OpenAI-compatible API base [env: OPENAI_BASE_URL] [default: https://api.openai.com/v1/]
    #[arg(long)]
    pub llm_base: Option<Url>,

    /// Environment file loaded before OPENAI_API_KEY, HANDOFF_SERVER and OPENAI_BASE_URL are read
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Upper bound on LLM round trips per task
    #[arg(long, default_value_t = crate::crew::agent::DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn crew_run_flags() {
        let cli = Cli::try_parse_from([
            "handoff", "crew", "analyze", "--repo", "acme/widgets", "--pr", "42",
        ])
        .unwrap();
        let Command::Crew(CrewArgs {
            kind: CrewKind::Analyze(args),
        }) = cli.cmd
        else {
            panic!("expected crew analyze");
        };
        assert_eq!(args.repo, "acme/widgets");
        assert_eq!(args.pr, 42);
        assert_eq!(args.max_iterations, 8);
        assert!(args.llm_base.is_none());
        assert!(args.env_file.is_none());
    }

    #[test]
    fn env_file_is_found_under_crew_subcommands() {
        let cli = Cli::try_parse_from([
            "handoff", "crew", "summarize", "--repo", "a/b", "--pr", "1", "--env-file", "x.env",
        ])
        .unwrap();
        assert_eq!(cli.cmd.env_file(), Some(std::path::Path::new("x.env")));
        let cli = Cli::try_parse_from(["handoff", "routes"]).unwrap();
        assert!(cli.cmd.env_file().is_none());
    }

    #[test]
    fn login_defaults() {
        let cli = Cli::try_parse_from(["handoff", "login"]).unwrap();
        let Command::Login(args) = cli.cmd else {
            panic!("expected login");
        };
        assert_eq!(args.timeout, 300);
    }
}
