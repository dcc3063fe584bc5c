//! Tool call audit records and the always-emit guard.
//!
//! Every `tools/call` that reaches a tool emits exactly one [`AuditRecord`], whether
//! it succeeds, fails at the grant step, fails in the tool, or unwinds.

use crate::headers::redact_sensitive_keys;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const RECORD_TYPE: &str = "handoff.tool.call";

/// Stable machine-readable reason codes.
pub mod reason_codes {
    pub const OK: &str = "OK";

    // Authorization (A_*)
    pub const A_NO_SESSION: &str = "A_NO_SESSION";
    pub const A_EXCHANGE_REJECTED: &str = "A_EXCHANGE_REJECTED";
    pub const A_EXCHANGE_TIMEOUT: &str = "A_EXCHANGE_TIMEOUT";
    pub const A_BROKER_UNAVAILABLE: &str = "A_BROKER_UNAVAILABLE";

    // Resource API (R_*)
    pub const R_NOT_FOUND: &str = "R_NOT_FOUND";
    pub const R_FORBIDDEN: &str = "R_FORBIDDEN";
    pub const R_UPSTREAM: &str = "R_UPSTREAM";

    // Tool input (T_*)
    pub const T_INVALID_ARGS: &str = "T_INVALID_ARGS";

    // System (S_*)
    pub const S_INTERNAL_ERROR: &str = "S_INTERNAL_ERROR";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// The tool ran but the Resource API or the arguments made it fail.
    ToolError,
    /// No session, or the broker refused the exchange.
    Unauthorized,
    Error,
}

/// CloudEvents-shaped audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub specversion: String,
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub source: String,
    pub time: String,
    pub data: AuditData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditData {
    /// Session subject, `None` when the call carried no session.
    pub identity: Option<String>,
    pub tool: String,
    /// Call arguments with sensitive keys redacted.
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub outcome: Outcome,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl AuditRecord {
    pub fn new(source: impl Into<String>, tool: impl Into<String>, arguments: &Value) -> Self {
        Self {
            specversion: "1.0".to_string(),
            id: format!("evt_call_{}", uuid::Uuid::new_v4()),
            record_type: RECORD_TYPE.to_string(),
            source: source.into(),
            time: chrono::Utc::now().to_rfc3339(),
            data: AuditData {
                identity: None,
                tool: tool.into(),
                arguments: redact_sensitive_keys(arguments),
                resource: None,
                outcome: Outcome::Error,
                reason_code: reason_codes::S_INTERNAL_ERROR.to_string(),
                reason: Some("audit record not finalized".to_string()),
                request_id: None,
                latency_ms: None,
            },
        }
    }

    fn finish(mut self, outcome: Outcome, reason_code: &str, reason: Option<String>) -> Self {
        self.data.outcome = outcome;
        self.data.reason_code = reason_code.to_string();
        self.data.reason = reason;
        self
    }
}

pub trait AuditEmitter: Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Appends one JSON line per record.
pub struct FileAuditEmitter {
    file: Mutex<std::fs::File>,
}

impl FileAuditEmitter {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditEmitter for FileAuditEmitter {
    fn emit(&self, record: &AuditRecord) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(event = "audit_serialize_failed", error = %e);
                return;
            }
        };
        match self.file.lock() {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}").and_then(|_| f.flush()) {
                    tracing::error!(event = "audit_write_failed", error = %e);
                }
            }
            Err(_) => tracing::error!(event = "audit_write_failed", error = "poisoned lock"),
        }
    }
}

/// Emits each record as a structured `tracing` event on the `audit` target.
pub struct TracingAuditEmitter;

impl AuditEmitter for TracingAuditEmitter {
    fn emit(&self, record: &AuditRecord) {
        let d = &record.data;
        tracing::info!(
            target: "audit",
            event = RECORD_TYPE,
            id = %record.id,
            identity = d.identity.as_deref().unwrap_or("-"),
            tool = %d.tool,
            resource = d.resource.as_deref().unwrap_or("-"),
            outcome = ?d.outcome,
            reason_code = %d.reason_code,
            latency_ms = d.latency_ms,
            arguments = %d.arguments,
        );
    }
}

pub struct NullAuditEmitter;

impl AuditEmitter for NullAuditEmitter {
    fn emit(&self, _record: &AuditRecord) {}
}

/// Sends every record to each inner emitter.
pub struct FanoutAuditEmitter {
    inner: Vec<Arc<dyn AuditEmitter>>,
}

impl FanoutAuditEmitter {
    pub fn new(inner: Vec<Arc<dyn AuditEmitter>>) -> Self {
        Self { inner }
    }
}

impl AuditEmitter for FanoutAuditEmitter {
    fn emit(&self, record: &AuditRecord) {
        for e in &self.inner {
            e.emit(record);
        }
    }
}

/// RAII guard that emits exactly one record per tool call.
///
/// ```ignore
/// let mut guard = AuditGuard::new(emitter, source, "fetch_pr", &args);
/// guard.set_identity(Some(subject));
/// // ... grant and tool work ...
/// guard.emit_success();
/// ```
///
/// Dropping the guard without an explicit emit records `error` / `S_INTERNAL_ERROR`.
pub struct AuditGuard {
    emitter: Arc<dyn AuditEmitter>,
    record: Option<AuditRecord>,
    started: std::time::Instant,
}

impl AuditGuard {
    pub fn new(
        emitter: Arc<dyn AuditEmitter>,
        source: impl Into<String>,
        tool: impl Into<String>,
        arguments: &Value,
    ) -> Self {
        Self {
            emitter,
            record: Some(AuditRecord::new(source, tool, arguments)),
            started: std::time::Instant::now(),
        }
    }

    pub fn set_identity(&mut self, identity: Option<String>) {
        if let Some(r) = self.record.as_mut() {
            r.data.identity = identity;
        }
    }

    pub fn set_resource(&mut self, resource: Option<String>) {
        if let Some(r) = self.record.as_mut() {
            r.data.resource = resource;
        }
    }

    pub fn set_request_id(&mut self, id: Option<Value>) {
        if let Some(r) = self.record.as_mut() {
            r.data.request_id = id;
        }
    }

    pub fn emit_success(self) {
        self.emit(Outcome::Success, reason_codes::OK, None);
    }

    pub fn emit_tool_error(self, reason_code: &str, reason: impl Into<String>) {
        self.emit(Outcome::ToolError, reason_code, Some(reason.into()));
    }

    pub fn emit_unauthorized(self, reason_code: &str, reason: impl Into<String>) {
        self.emit(Outcome::Unauthorized, reason_code, Some(reason.into()));
    }

    pub fn emit_error(self, reason_code: &str, reason: impl Into<String>) {
        self.emit(Outcome::Error, reason_code, Some(reason.into()));
    }

    fn emit(mut self, outcome: Outcome, reason_code: &str, reason: Option<String>) {
        if let Some(record) = self.record.take() {
            let mut record = record.finish(outcome, reason_code, reason);
            record.data.latency_ms = Some(self.started.elapsed().as_millis() as u64);
            self.emitter.emit(&record);
        }
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            let mut record = record.finish(
                Outcome::Error,
                reason_codes::S_INTERNAL_ERROR,
                Some("tool call ended without an audit outcome (panic or early return)".to_string()),
            );
            record.data.latency_ms = Some(self.started.elapsed().as_millis() as u64);
            self.emitter.emit(&record);
        }
    }
}
