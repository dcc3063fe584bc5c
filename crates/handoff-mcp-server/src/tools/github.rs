//! Pull request tools: one public variant and four that run under a delegated credential.

use super::{parse_args, Tool, ToolError};
use async_trait::async_trait;
use handoff_core::github::{self, GithubClient, PullSummary, RepoSlug};
use handoff_core::jsonrpc::ToolResultBody;
use handoff_core::{AccessContext, Resource};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct PrArgs {
    repo: String,
    pr_number: u64,
}

impl PrArgs {
    fn parse(args: &Value) -> Result<(RepoSlug, u64), ToolError> {
        let a: PrArgs = parse_args(args)?;
        Ok((RepoSlug::parse(&a.repo)?, a.pr_number))
    }
}

fn pr_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "repo": { "type": "string", "description": "Repository (owner/name)" },
            "pr_number": { "type": "integer", "description": "PR number", "minimum": 1 }
        },
        "required": ["repo", "pr_number"]
    })
}

/// Public API call without any credential. A private repository answers 404.
pub struct FetchPrSimple {
    client: Arc<GithubClient>,
}

impl FetchPrSimple {
    pub fn new(client: Arc<GithubClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for FetchPrSimple {
    fn name(&self) -> &'static str {
        "fetch_pr_simple"
    }

    fn description(&self) -> &'static str {
        "Fetch PR (no auth)"
    }

    fn input_schema(&self) -> Value {
        pr_schema()
    }

    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        PrArgs::parse(args).map(|_| ())
    }

    async fn call(
        &self,
        args: &Value,
        _access: &AccessContext,
    ) -> Result<ToolResultBody, ToolError> {
        let (repo, number) = PrArgs::parse(args)?;
        let pr = self.client.pull(&repo, number, None).await?;
        let summary = json!(PullSummary::from(&pr));
        Ok(ToolResultBody::text(summary.to_string()).with_structured(summary))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrView {
    Overview,
    Files,
    Comments,
    Commits,
}

impl PrView {
    pub const ALL: [PrView; 4] = [Self::Overview, Self::Files, Self::Comments, Self::Commits];

    fn name(self) -> &'static str {
        match self {
            Self::Overview => "fetch_pr",
            Self::Files => "fetch_pr_files",
            Self::Comments => "fetch_pr_comments",
            Self::Commits => "fetch_pr_commits",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Overview => "Fetch PR details from GitHub using your delegated GitHub access",
            Self::Files => "Fetch list of files changed in a PR with diffs",
            Self::Comments => "Fetch review comments and discussions on a PR",
            Self::Commits => "Fetch list of commits in a PR",
        }
    }
}

/// GitHub tool that runs only after the grant guard obtained a credential for `resource`.
pub struct GrantedPrTool {
    view: PrView,
    client: Arc<GithubClient>,
    resource: [Resource; 1],
}

impl GrantedPrTool {
    pub fn new(view: PrView, client: Arc<GithubClient>, resource: Resource) -> Self {
        Self {
            view,
            client,
            resource: [resource],
        }
    }
}

#[async_trait]
impl Tool for GrantedPrTool {
    fn name(&self) -> &'static str {
        self.view.name()
    }

    fn description(&self) -> &'static str {
        self.view.description()
    }

    fn input_schema(&self) -> Value {
        pr_schema()
    }

    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        PrArgs::parse(args).map(|_| ())
    }

    fn grants(&self) -> &[Resource] {
        &self.resource
    }

    async fn call(&self, args: &Value, access: &AccessContext) -> Result<ToolResultBody, ToolError> {
        let (repo, number) = PrArgs::parse(args)?;
        let resource = &self.resource[0];
        let credential = access
            .access(resource)
            .ok_or_else(|| ToolError::MissingGrant(resource.clone()))?;
        let cred = Some(credential);

        let text = match self.view {
            PrView::Overview => github::format_pull(&self.client.pull(&repo, number, cred).await?),
            PrView::Files => {
                github::format_files(&self.client.pull_files(&repo, number, cred).await?)
            }
            PrView::Comments => {
                github::format_comments(&self.client.pull_comments(&repo, number, cred).await?)
            }
            PrView::Commits => {
                github::format_commits(&self.client.pull_commits(&repo, number, cred).await?)
            }
        };
        Ok(ToolResultBody::text(text))
    }
}
