//! Streamable-HTTP MCP client for the tool host.

use super::agent::ToolInvoker;
use async_trait::async_trait;
use handoff_core::headers::USER_AGENT;
use handoff_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse, ToolDescriptor, ToolResultBody};
use handoff_core::SessionToken;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use url::Url;

pub const PROTOCOL_VERSION: &str = "2025-06-18";
const SESSION_ID_HEADER: &str = "mcp-session-id";

#[derive(Debug, thiserror::Error)]
pub enum McpClientError {
    #[error("tool host requires authorization{}; run `handoff login`", .resource_metadata.as_deref().map(|m| format!(" (see {m})")).unwrap_or_default())]
    AuthorizationRequired { resource_metadata: Option<String> },
    #[error("tool host returned HTTP {status}")]
    Http { status: u16 },
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i32, message: String },
    #[error("invalid response from tool host: {0}")]
    InvalidResponse(String),
    #[error("request to tool host failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct McpClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<SessionToken>,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl McpClient {
    /// `server` is the tool host base URL; requests go to `{server}mcp`.
    pub fn new(server: &Url, token: Option<SessionToken>) -> Result<Self, McpClientError> {
        let base = format!("{}/", server.as_str().trim_end_matches('/'));
        let endpoint = Url::parse(&base)
            .and_then(|b| b.join("mcp"))
            .map_err(|e| McpClientError::InvalidResponse(format!("bad server url: {e}")))?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            token,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Handshake; returns the server's `initialize` result.
    pub async fn initialize(&self) -> Result<Value, McpClientError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "handoff", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;
        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpClientError> {
        let result = self.request("tools/list", json!({})).await?;
        serde_json::from_value(result["tools"].clone())
            .map_err(|e| McpClientError::InvalidResponse(format!("tools/list: {e}")))
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResultBody, McpClientError> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| McpClientError::InvalidResponse(format!("tools/call: {e}")))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self.send(&JsonRpcRequest::new(id, method, params)).await?;

        if let Some(sid) = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.write() {
                *slot = Some(sid.to_string());
            }
        }

        let is_sse = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = resp.text().await?;
        let parsed = parse_response(&text, is_sse)?;

        if let Some(err) = parsed.error {
            return Err(McpClientError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| McpClientError::InvalidResponse("response has neither result nor error".into()))
    }

    async fn notify(&self, method: &str) -> Result<(), McpClientError> {
        self.send(&JsonRpcRequest::notification(method)).await?;
        Ok(())
    }

    async fn send(&self, body: &JsonRpcRequest) -> Result<reqwest::Response, McpClientError> {
        let mut req = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose());
        }
        let sid = self.session_id.read().ok().and_then(|s| s.clone());
        if let Some(sid) = sid {
            req = req.header(SESSION_ID_HEADER, sid);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let resource_metadata = resp
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(resource_metadata_from_challenge);
            return Err(McpClientError::AuthorizationRequired { resource_metadata });
        }
        if !status.is_success() {
            return Err(McpClientError::Http {
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ToolInvoker for McpClient {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResultBody, McpClientError> {
        McpClient::call_tool(self, name, arguments).await
    }
}

/// `resource_metadata="..."` parameter of a Bearer challenge.
fn resource_metadata_from_challenge(header: &str) -> Option<String> {
    let start = header.find("resource_metadata=\"")? + "resource_metadata=\"".len();
    let rest = &header[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// JSON body, or the last `data:` event of an SSE body.
fn parse_response(text: &str, is_sse: bool) -> Result<JsonRpcResponse, McpClientError> {
    let payload = if is_sse {
        text.lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| McpClientError::InvalidResponse("empty event stream".into()))?
    } else {
        text
    };
    serde_json::from_str(payload).map_err(|e| McpClientError::InvalidResponse(e.to_string()))
}
