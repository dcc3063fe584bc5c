//! Client-side orchestration: agents driven by an LLM that can only reach
//! GitHub through the tool host's MCP tools.
//!
//! The session token stays inside [`mcp_client::McpClient`]; agents see tool
//! descriptors and tool results, never credentials.

pub mod agent;
pub mod crews;
pub mod llm;
pub mod mcp_client;
