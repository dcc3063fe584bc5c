use super::super::args::{CrewArgs, CrewKind, CrewRunArgs};
use crate::crew::agent::Crew;
use crate::crew::crews;
use crate::crew::llm::OpenAiClient;
use crate::crew::mcp_client::McpClient;
use crate::exit_codes;
use crate::session::SessionStore;
use anyhow::Context;
use handoff_core::config::{load_dotenv, OPENAI_API_KEY};
use handoff_core::github::RepoSlug;
use handoff_core::jsonrpc::ToolDescriptor;
use secrecy::SecretString;
use url::Url;

const HANDOFF_SERVER: &str = "HANDOFF_SERVER";
const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
const DEFAULT_LLM_BASE: &str = "https://api.openai.com/v1/";

type CrewBuilder = fn(&str, u64, Vec<ToolDescriptor>) -> Result<Crew, crate::crew::agent::CrewError>;

pub async fn run(args: CrewArgs) -> anyhow::Result<i32> {
    let (build, run): (CrewBuilder, CrewRunArgs) = match args.kind {
        CrewKind::Summarize(a) => (crews::pr_summary as CrewBuilder, a),
        CrewKind::Analyze(a) => (crews::pr_analysis as CrewBuilder, a),
    };

    load_dotenv(run.env_file.as_deref());
    let Some(api_key) = env_value(OPENAI_API_KEY) else {
        eprintln!("error: {OPENAI_API_KEY} is not set");
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let (server_flag, llm_base) = match resolve_urls(run.server.clone(), run.llm_base.clone()) {
        Ok(urls) => urls,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    if let Err(e) = RepoSlug::parse(&run.repo) {
        eprintln!("error: {e}");
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let session = SessionStore::from_env()?.load()?;
    let server = match (server_flag, &session) {
        (Some(s), _) => s,
        (None, Some(sess)) => sess.server.clone(),
        (None, None) => {
            eprintln!("error: no stored session; run `handoff login` or pass --server");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    // A stored token is only ever sent to the server it was issued for.
    let token = session
        .filter(|s| s.server == server)
        .map(|s| {
            if s.is_expired() {
                tracing::warn!(event = "session_expired", "stored session has expired; the tool host will ask for a new login");
            }
            s.token().clone()
        });

    let mcp = McpClient::new(&server, token)?;
    mcp.initialize()
        .await
        .with_context(|| format!("failed to initialize MCP session with {}", mcp.endpoint()))?;
    let tools = mcp.list_tools().await.context("failed to list tools")?;
    let delegated = tools.iter().filter(|t| !t.grants().is_empty()).count();
    tracing::info!(event = "tools_listed", count = tools.len(), delegated);

    let crew = build(&run.repo, run.pr, tools)?.with_max_iterations(run.max_iterations);
    let llm = OpenAiClient::new(&llm_base, SecretString::from(api_key))?;
    let output = crew.kickoff(&llm, &mcp).await?;

    println!("{}", output.final_output());
    Ok(exit_codes::SUCCESS)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Flags win over the environment; the environment is read after `.env` is loaded.
fn resolve_urls(server: Option<Url>, llm_base: Option<Url>) -> anyhow::Result<(Option<Url>, Url)> {
    let server = match server {
        Some(s) => Some(s),
        None => env_value(HANDOFF_SERVER)
            .map(|v| Url::parse(&v).with_context(|| format!("{HANDOFF_SERVER} is not a URL: {v}")))
            .transpose()?,
    };
    let llm_base = match llm_base {
        Some(u) => u,
        None => {
            let raw = env_value(OPENAI_BASE_URL).unwrap_or_else(|| DEFAULT_LLM_BASE.to_string());
            Url::parse(&raw).with_context(|| format!("{OPENAI_BASE_URL} is not a URL: {raw}"))?
        }
    };
    Ok((server, llm_base))
}
