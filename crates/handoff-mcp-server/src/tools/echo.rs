use super::{parse_args, Tool, ToolError};
use async_trait::async_trait;
use handoff_core::jsonrpc::ToolResultBody;
use handoff_core::AccessContext;
use serde::Deserialize;
use serde_json::{json, Value};

/// Liveness check for the tool path. Needs no session.
pub struct EchoTool;

#[derive(Deserialize)]
struct EchoArgs {
    message: String,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Echo test tool"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }

    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        parse_args::<EchoArgs>(args).map(|_| ())
    }

    async fn call(
        &self,
        args: &Value,
        _access: &AccessContext,
    ) -> Result<ToolResultBody, ToolError> {
        let args: EchoArgs = parse_args(args)?;
        Ok(ToolResultBody::text(format!("Echo: {}", args.message)))
    }
}
