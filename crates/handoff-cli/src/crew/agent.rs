//! Agents, tasks and the sequential crew runner.

use super::llm::{ChatMessage, LlmClient, LlmError};
use super::mcp_client::McpClientError;
use async_trait::async_trait;
use handoff_core::jsonrpc::{ToolDescriptor, ToolResultBody};
use serde_json::Value;
use std::fmt::Write as _;

pub const DEFAULT_MAX_ITERATIONS: usize = 8;

/// Where tool calls go. The MCP client in production, scripted in tests.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value)
        -> Result<ToolResultBody, McpClientError>;
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub model: String,
    pub tools: Vec<ToolDescriptor>,
}

impl Agent {
    fn system_prompt(&self) -> String {
        format!(
            "You are {}. {}\nYour goal: {}",
            self.role, self.backstory, self.goal
        )
    }

    fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub description: String,
    pub expected_output: String,
    /// Index into the crew's agents.
    pub agent: usize,
    /// Indices of earlier tasks whose outputs are given as context.
    pub context: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub role: String,
    pub output: String,
    pub tool_calls: usize,
}

#[derive(Debug, Clone)]
pub struct CrewOutput {
    pub tasks: Vec<TaskOutput>,
}

impl CrewOutput {
    /// Output of the last task.
    pub fn final_output(&self) -> &str {
        self.tasks.last().map(|t| t.output.as_str()).unwrap_or("")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrewError {
    #[error("invalid crew: {0}")]
    Invalid(String),
    #[error("{role}: {source}")]
    Llm {
        role: String,
        #[source]
        source: LlmError,
    },
    #[error("{role}: calling {tool} failed: {source}")]
    Tool {
        role: String,
        tool: String,
        #[source]
        source: McpClientError,
    },
    #[error("{role}: no final answer after {limit} iterations")]
    MaxIterations { role: String, limit: usize },
}

pub struct Crew {
    agents: Vec<Agent>,
    tasks: Vec<Task>,
    max_iterations: usize,
}

impl Crew {
    pub fn new(agents: Vec<Agent>, tasks: Vec<Task>) -> Result<Self, CrewError> {
        for (i, task) in tasks.iter().enumerate() {
            if task.agent >= agents.len() {
                return Err(CrewError::Invalid(format!(
                    "task {i} refers to agent {} of {}",
                    task.agent,
                    agents.len()
                )));
            }
            if let Some(c) = task.context.iter().find(|&&c| c >= i) {
                return Err(CrewError::Invalid(format!(
                    "task {i} takes context from task {c}, which has not run yet"
                )));
            }
        }
        Ok(Self {
            agents,
            tasks,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Run every task in order.
    pub async fn kickoff(
        &self,
        llm: &dyn LlmClient,
        tools: &dyn ToolInvoker,
    ) -> Result<CrewOutput, CrewError> {
        let mut outputs: Vec<TaskOutput> = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let agent = &self.agents[task.agent];
            tracing::info!(event = "task_started", role = %agent.role, model = %agent.model);

            let context: Vec<&TaskOutput> = task.context.iter().map(|&i| &outputs[i]).collect();
            let prompt = task_prompt(task, &context);
            let out = self.perform(agent, prompt, llm, tools).await?;

            tracing::info!(
                event = "task_completed",
                role = %agent.role,
                tool_calls = out.tool_calls,
            );
            outputs.push(out);
        }
        Ok(CrewOutput { tasks: outputs })
    }

    /// Reasoning loop: offer the agent's tools, run requested calls, feed the
    /// results back until the model answers without tool calls.
    async fn perform(
        &self,
        agent: &Agent,
        prompt: String,
        llm: &dyn LlmClient,
        tools: &dyn ToolInvoker,
    ) -> Result<TaskOutput, CrewError> {
        let mut messages = vec![
            ChatMessage::system(agent.system_prompt()),
            ChatMessage::user(prompt),
        ];
        let mut tool_calls = 0;

        for _ in 0..self.max_iterations {
            let reply = llm
                .complete(&agent.model, &messages, &agent.tools)
                .await
                .map_err(|source| CrewError::Llm {
                    role: agent.role.clone(),
                    source,
                })?;

            if reply.tool_calls.is_empty() {
                return Ok(TaskOutput {
                    role: agent.role.clone(),
                    output: reply.content.unwrap_or_default(),
                    tool_calls,
                });
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in calls {
                tool_calls += 1;
                let name = call.function.name.as_str();
                let text = if !agent.has_tool(name) {
                    format!("Error: tool {name} is not available to this agent")
                } else {
                    match serde_json::from_str::<Value>(&call.function.arguments) {
                        Err(e) => format!("Error: arguments are not valid JSON: {e}"),
                        Ok(args) => {
                            let result = tools.call_tool(name, args).await.map_err(|source| {
                                CrewError::Tool {
                                    role: agent.role.clone(),
                                    tool: name.to_string(),
                                    source,
                                }
                            })?;
                            tracing::debug!(
                                event = "tool_result",
                                role = %agent.role,
                                tool = name,
                                is_error = result.is_error,
                            );
                            result.joined_text()
                        }
                    }
                };
                messages.push(ChatMessage::tool_result(call.id, text));
            }
        }

        Err(CrewError::MaxIterations {
            role: agent.role.clone(),
            limit: self.max_iterations,
        })
    }
}

fn task_prompt(task: &Task, context: &[&TaskOutput]) -> String {
    let mut p = task.description.clone();
    if !context.is_empty() {
        p.push_str("\n\nContext from earlier work:\n");
        for c in context {
            let _ = write!(p, "\n## {}\n{}\n", c.role, c.output);
        }
    }
    let _ = write!(p, "\n\nExpected output: {}", task.expected_output);
    p
}
