//! Tool set exposed over `tools/list` and `tools/call`.

pub mod echo;
pub mod github;

use async_trait::async_trait;
use handoff_core::github::{GithubClient, GithubError};
use handoff_core::jsonrpc::{ToolDescriptor, ToolResultBody};
use handoff_core::{AccessContext, Resource};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Resource every GitHub tool requests a delegated credential for.
pub const GITHUB_RESOURCE: &str = "https://api.github.com";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("no credential was granted for {0}")]
    MissingGrant(Resource),

    #[error(transparent)]
    Github(GithubError),
}

impl From<GithubError> for ToolError {
    fn from(e: GithubError) -> Self {
        match e {
            GithubError::InvalidRepo(_) => Self::InvalidArgs(e.to_string()),
            other => Self::Github(other),
        }
    }
}

/// Deserialize tool arguments into their typed form.
pub fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::InvalidArgs(e.to_string()))
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> Value;

    /// Resources the grant guard must obtain credentials for before `call` runs.
    fn grants(&self) -> &[Resource] {
        &[]
    }

    /// Argument check run before any credential is requested.
    fn validate(&self, _args: &Value) -> Result<(), ToolError> {
        Ok(())
    }

    async fn call(&self, args: &Value, access: &AccessContext)
        -> Result<ToolResultBody, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        let grants = self.grants();
        let meta = (!grants.is_empty()).then(|| {
            serde_json::json!({ "grants": grants.iter().map(Resource::as_str).collect::<Vec<_>>() })
        });
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            meta,
        }
    }
}

/// Ordered tool set; `tools/list` returns tools in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed tool set of the tool host.
    pub fn standard(github: Arc<GithubClient>) -> Result<Self, url::ParseError> {
        let resource = Resource::parse(GITHUB_RESOURCE)?;
        let mut registry = Self::new();
        registry.register(Arc::new(echo::EchoTool));
        registry.register(Arc::new(github::FetchPrSimple::new(github.clone())));
        for view in github::PrView::ALL {
            registry.register(Arc::new(github::GrantedPrTool::new(
                view,
                github.clone(),
                resource.clone(),
            )));
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
