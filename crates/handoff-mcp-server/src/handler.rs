//! `tools/call` handling: audit guard, argument check, grant, tool body, output scrubbing.
//!
//! Every call that reaches this handler emits exactly one audit record, including
//! calls to unknown tools and calls whose grant fails.

use crate::auth::SessionIdentity;
use crate::grant::GrantGuard;
use crate::tools::{ToolError, ToolRegistry};
use handoff_core::audit::{reason_codes, AuditEmitter, AuditGuard};
use handoff_core::jsonrpc::{error_codes, CallToolParams, ContentItem, JsonRpcError, ToolResultBody};
use handoff_core::AccessContext;
use serde_json::Value;
use std::sync::Arc;

/// Tool name recorded when the request does not carry one.
pub const UNKNOWN_TOOL: &str = "<unknown>";

pub struct ToolCallHandler {
    registry: Arc<ToolRegistry>,
    grant: GrantGuard,
    emitter: Arc<dyn AuditEmitter>,
    /// Audit record source; the tool host's resource identifier.
    source: String,
}

impl ToolCallHandler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        grant: GrantGuard,
        emitter: Arc<dyn AuditEmitter>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            grant,
            emitter,
            source: source.into(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// A `tools/call` whose params carry no tool name. Still leaves an audit record.
    pub fn reject_unnamed(
        &self,
        request_id: Option<Value>,
        params: &Value,
        session: Option<&SessionIdentity>,
    ) -> JsonRpcError {
        let arguments = params.get("arguments").unwrap_or(&Value::Null);
        let mut guard = AuditGuard::new(
            self.emitter.clone(),
            self.source.clone(),
            UNKNOWN_TOOL,
            arguments,
        );
        guard.set_identity(session.map(|s| s.subject.clone()));
        guard.set_request_id(request_id);
        let msg = "tools/call requires params.name".to_string();
        guard.emit_tool_error(reason_codes::T_INVALID_ARGS, msg.clone());
        invalid_params(msg)
    }

    /// Run one tool call. `Err` is a JSON-RPC protocol error; tool and
    /// authorization failures come back as `Ok` with `isError: true`.
    pub async fn handle(
        &self,
        request_id: Option<Value>,
        params: CallToolParams,
        session: Option<&SessionIdentity>,
    ) -> Result<ToolResultBody, JsonRpcError> {
        let mut guard = AuditGuard::new(
            self.emitter.clone(),
            self.source.clone(),
            params.name.clone(),
            &params.arguments,
        );
        guard.set_identity(session.map(|s| s.subject.clone()));
        guard.set_request_id(request_id);

        let Some(tool) = self.registry.get(&params.name) else {
            let msg = format!("Unknown tool: {}", params.name);
            guard.emit_tool_error(reason_codes::T_INVALID_ARGS, msg.clone());
            return Err(invalid_params(msg));
        };
        guard.set_resource(tool.grants().first().map(|r| r.to_string()));

        if let Err(e) = tool.validate(&params.arguments) {
            let msg = match e {
                ToolError::InvalidArgs(msg) => msg,
                other => other.to_string(),
            };
            guard.emit_tool_error(reason_codes::T_INVALID_ARGS, msg.clone());
            return Err(invalid_params(format!("Invalid arguments for {}: {msg}", tool.name())));
        }

        let access = match self.grant.acquire(session, tool.grants()).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(
                    event = "grant_denied",
                    tool = tool.name(),
                    resource = %e.resource(),
                    reason = e.reason_code(),
                );
                let msg = format!("Authorization failed: {e}");
                guard.emit_unauthorized(e.reason_code(), msg.clone());
                return Ok(ToolResultBody::error(msg));
            }
        };

        let result = tool.call(&params.arguments, &access).await;
        let outcome = match result {
            Ok(body) => {
                guard.emit_success();
                Ok(scrub_body(body, &access))
            }
            Err(ToolError::InvalidArgs(msg)) => {
                guard.emit_tool_error(reason_codes::T_INVALID_ARGS, msg.clone());
                Err(invalid_params(format!("Invalid arguments for {}: {msg}", tool.name())))
            }
            Err(ToolError::Github(e)) => {
                let msg = access.scrub(&e.to_string());
                guard.emit_tool_error(e.reason_code(), msg.clone());
                Ok(ToolResultBody::error(msg))
            }
            Err(e @ ToolError::MissingGrant(_)) => {
                guard.emit_error(reason_codes::S_INTERNAL_ERROR, e.to_string());
                Ok(ToolResultBody::error(e.to_string()))
            }
        };

        // The delegated credential ends with the call.
        drop(access);
        outcome
    }
}

fn invalid_params(message: String) -> JsonRpcError {
    JsonRpcError {
        code: error_codes::INVALID_PARAMS,
        message,
        data: None,
    }
}

fn scrub_body(mut body: ToolResultBody, access: &AccessContext) -> ToolResultBody {
    if access.is_empty() {
        return body;
    }
    for item in &mut body.content {
        match item {
            ContentItem::Text { text } => *text = access.scrub(text),
        }
    }
    if let Some(structured) = body.structured_content.take() {
        let scrubbed = access.scrub(&structured.to_string());
        body.structured_content = serde_json::from_str(&scrubbed).ok();
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use handoff_core::audit::{AuditRecord, Outcome};
    use handoff_core::{BrokerError, DelegatedCredential, Resource, SessionToken, TokenExchanger};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingEmitter {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl AuditEmitter for CapturingEmitter {
        fn emit(&self, record: &AuditRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    #[derive(Default)]
    struct FixedBroker {
        exchanges: AtomicUsize,
    }

    #[async_trait]
    impl TokenExchanger for FixedBroker {
        async fn exchange(
            &self,
            _subject: &SessionToken,
            resource: &Resource,
        ) -> Result<DelegatedCredential, BrokerError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            Ok(DelegatedCredential::new("gho_leaky", "Bearer", resource.clone(), None))
        }
    }

    /// Granted tool that echoes its credential back, to prove the handler scrubs it.
    struct LeakyTool([Resource; 1]);

    #[async_trait]
    impl Tool for LeakyTool {
        fn name(&self) -> &'static str {
            "leaky"
        }
        fn description(&self) -> &'static str {
            "returns its own token"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn grants(&self) -> &[Resource] {
            &self.0
        }
        fn validate(&self, args: &Value) -> Result<(), ToolError> {
            match args.get("reject") {
                Some(_) => Err(ToolError::InvalidArgs("reject is not accepted".into())),
                None => Ok(()),
            }
        }
        async fn call(
            &self,
            _args: &Value,
            access: &AccessContext,
        ) -> Result<ToolResultBody, ToolError> {
            let header = access.access(&self.0[0]).unwrap().bearer_header();
            Ok(ToolResultBody::text(header.clone()).with_structured(json!({ "auth": header })))
        }
    }

    fn handler() -> (ToolCallHandler, Arc<CapturingEmitter>) {
        let (h, emitter, _broker) = handler_with_broker();
        (h, emitter)
    }

    fn handler_with_broker() -> (ToolCallHandler, Arc<CapturingEmitter>, Arc<FixedBroker>) {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(crate::tools::echo::EchoTool));
        registry.register(Arc::new(LeakyTool([
            Resource::parse("https://api.github.com").unwrap()
        ])));
        let emitter = Arc::new(CapturingEmitter::default());
        let broker = Arc::new(FixedBroker::default());
        let h = ToolCallHandler::new(
            Arc::new(registry),
            GrantGuard::new(broker.clone()),
            emitter.clone(),
            "http://localhost:8000/",
        );
        (h, emitter, broker)
    }

    fn session() -> SessionIdentity {
        SessionIdentity {
            subject: "user-1".into(),
            client_id: None,
            token: SessionToken::new("session-token"),
        }
    }

    fn params(name: &str, arguments: Value) -> CallToolParams {
        CallToolParams {
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn credential_is_scrubbed_from_result() {
        let (h, emitter) = handler();
        let body = h
            .handle(Some(json!(1)), params("leaky", json!({})), Some(&session()))
            .await
            .unwrap();
        let wire = serde_json::to_string(&body).unwrap();
        assert!(!wire.contains("gho_leaky"), "{wire}");
        assert!(wire.contains("[REDACTED]"));

        let records = emitter.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.outcome, Outcome::Success);
        assert_eq!(records[0].data.identity.as_deref(), Some("user-1"));
        assert_eq!(records[0].data.resource.as_deref(), Some("https://api.github.com"));
    }

    #[tokio::test]
    async fn no_session_is_tool_level_unauthorized() {
        let (h, emitter) = handler();
        let body = h.handle(None, params("leaky", json!({})), None).await.unwrap();
        assert!(body.is_error);
        assert!(body.joined_text().contains("Authorization failed"));

        let records = emitter.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.outcome, Outcome::Unauthorized);
        assert_eq!(records[0].data.reason_code, reason_codes::A_NO_SESSION);
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_args_are_protocol_errors() {
        let (h, emitter) = handler();
        let err = h.handle(None, params("nope", json!({})), None).await.unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
        assert!(err.message.contains("Unknown tool: nope"));

        let err = h.handle(None, params("echo", json!({"msg": 1})), None).await.unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);

        let records = emitter.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.data.reason_code == reason_codes::T_INVALID_ARGS));
    }

    #[tokio::test]
    async fn bad_arguments_fail_before_any_exchange() {
        let (h, emitter, broker) = handler_with_broker();
        let err = h
            .handle(Some(json!(4)), params("leaky", json!({"reject": true})), Some(&session()))
            .await
            .unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
        assert_eq!(broker.exchanges.load(Ordering::SeqCst), 0);

        let records = emitter.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.reason_code, reason_codes::T_INVALID_ARGS);
        assert_eq!(records[0].data.resource.as_deref(), Some("https://api.github.com"));
    }

    #[tokio::test]
    async fn valid_arguments_exchange_once() {
        let (h, _emitter, broker) = handler_with_broker();
        h.handle(None, params("leaky", json!({})), Some(&session()))
            .await
            .unwrap();
        assert_eq!(broker.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unnamed_call_is_audited_as_unknown() {
        let (h, emitter) = handler();
        let err = h.reject_unnamed(
            Some(json!(9)),
            &json!({"arguments": {"token": "t0ps3cret"}}),
            Some(&session()),
        );
        assert_eq!(err.code, error_codes::INVALID_PARAMS);

        let records = emitter.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.tool, UNKNOWN_TOOL);
        assert_eq!(records[0].data.identity.as_deref(), Some("user-1"));
        assert_eq!(records[0].data.reason_code, reason_codes::T_INVALID_ARGS);
        assert!(!records[0].data.arguments.to_string().contains("t0ps3cret"));
    }
}
