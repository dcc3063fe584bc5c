//! HTTP surface of the tool host.

use crate::auth::{AuthConfig, AuthError, JwksProvider, SessionIdentity, TokenValidator};
use crate::grant::GrantGuard;
use crate::handler::ToolCallHandler;
use crate::tools::ToolRegistry;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use handoff_core::audit::{AuditEmitter, FanoutAuditEmitter, FileAuditEmitter, TracingAuditEmitter};
use handoff_core::config::{SessionAuthMode, Settings};
use handoff_core::github::{GithubClient, GithubError};
use handoff_core::jsonrpc::{error_codes, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use handoff_core::{BrokerError, KeycardBroker, TokenExchanger};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];
pub const SERVER_NAME: &str = "handoff GitHub tools";
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Route table, in the order the router registers them.
pub const ROUTES: &[(&str, &str, &str)] = &[
    ("POST", "/mcp", "MCP JSON-RPC endpoint (session auth)"),
    ("GET", "/health", "liveness"),
    (
        "GET",
        "/.well-known/oauth-protected-resource",
        "RFC 9728 protected resource metadata",
    ),
    (
        "GET",
        "/.well-known/oauth-protected-resource/mcp",
        "RFC 9728 protected resource metadata (path-suffixed)",
    ),
];

pub fn routes() -> &'static [(&'static str, &'static str, &'static str)] {
    ROUTES
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("broker client: {0}")]
    Broker(#[from] BrokerError),
    #[error("session auth: {0}")]
    Auth(#[from] AuthError),
    #[error("GitHub client: {0}")]
    Github(#[from] GithubError),
    #[error("audit log {path}: {source}")]
    AuditLog {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid resource URI: {0}")]
    Resource(#[from] url::ParseError),
}

/// Shared, immutable per-process state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    auth: AuthConfig,
    validator: Option<TokenValidator>,
    handler: ToolCallHandler,
    resource: String,
    authorization_servers: Vec<String>,
}

impl AppState {
    pub fn new(
        auth: AuthConfig,
        validator: Option<TokenValidator>,
        handler: ToolCallHandler,
        resource: impl Into<String>,
        authorization_server: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                auth,
                validator,
                handler,
                resource: resource.into(),
                authorization_servers: vec![authorization_server.into()],
            }),
        }
    }

    /// Wire the production components from validated settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, ServerError> {
        let Components {
            auth,
            validator,
            broker,
            registry,
        } = Components::build(settings)?;

        let mut emitters: Vec<Arc<dyn AuditEmitter>> = vec![Arc::new(TracingAuditEmitter)];
        if let Some(path) = &settings.audit_log {
            let file = FileAuditEmitter::open(path).map_err(|source| ServerError::AuditLog {
                path: path.display().to_string(),
                source,
            })?;
            emitters.push(Arc::new(file));
        }
        let emitter: Arc<dyn AuditEmitter> = Arc::new(FanoutAuditEmitter::new(emitters));

        let handler = ToolCallHandler::new(
            registry,
            GrantGuard::new(broker),
            emitter,
            settings.resource_id(),
        );

        Ok(Self::new(
            auth,
            validator,
            handler,
            settings.resource_id(),
            settings.issuer.as_str().trim_end_matches('/'),
        ))
    }

    /// Everything [`AppState::from_settings`] checks, without touching the filesystem:
    /// the audit log is not opened, only its directory is required to exist.
    pub fn preflight(settings: &Settings) -> Result<(), ServerError> {
        Components::build(settings)?;
        if let Some(path) = &settings.audit_log {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => std::path::Path::new("."),
            };
            if !dir.is_dir() {
                return Err(ServerError::AuditLog {
                    path: path.display().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("directory {} does not exist", dir.display()),
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The parts of the tool host that have no side effects to build.
struct Components {
    auth: AuthConfig,
    validator: Option<TokenValidator>,
    broker: Arc<dyn TokenExchanger>,
    registry: Arc<ToolRegistry>,
}

impl Components {
    fn build(settings: &Settings) -> Result<Self, ServerError> {
        let auth = AuthConfig::from_settings(settings);
        let validator = match settings.session_auth {
            SessionAuthMode::Required => Some(TokenValidator::new(JwksProvider::new(
                auth.jwks_uri.clone(),
                settings.endpoint_policy,
            )?)),
            SessionAuthMode::Disabled => None,
        };
        let broker: Arc<dyn TokenExchanger> = Arc::new(KeycardBroker::from_settings(settings)?);
        let github = Arc::new(GithubClient::new(&settings.github_api_url)?);
        let registry = Arc::new(ToolRegistry::standard(github)?);
        Ok(Self {
            auth,
            validator,
            broker,
            registry,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(mcp_post))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            session_auth,
        ))
        // Unauthenticated routes (added after the layer).
        .route("/health", get(health))
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource/mcp",
            get(protected_resource_metadata),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(event = "listening", %addr, "listening on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> &'static str {
    "ok"
}

async fn protected_resource_metadata(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "resource": state.inner.resource,
        "authorization_servers": state.inner.authorization_servers,
        "bearer_methods_supported": ["header"],
        "resource_name": SERVER_NAME,
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

async fn session_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let auth = &state.inner.auth;
    if !auth.is_required() {
        return next.run(req).await;
    }

    let token = bearer_token(req.headers()).map(str::to_owned);
    let result = match (token, &state.inner.validator) {
        (None, _) => Err(AuthError::Missing),
        (Some(token), Some(validator)) => validator.validate(&token, auth).await,
        (Some(_), None) => Err(AuthError::Jwks("no validator configured".to_string())),
    };

    match result {
        Ok(identity) => {
            tracing::debug!(event = "session_authenticated", subject = %identity.subject);
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => {
            tracing::info!(event = "session_rejected", reason = %e);
            unauthorized(auth, &e)
        }
    }
}

fn unauthorized(auth: &AuthConfig, err: &AuthError) -> Response {
    let mut resp = (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "invalid_token",
            "error_description": err.to_string(),
        })),
    )
        .into_response();
    if let Ok(v) = HeaderValue::from_str(&auth.challenge()) {
        resp.headers_mut().insert(header::WWW_AUTHENTICATE, v);
    }
    resp
}

async fn mcp_post(
    State(state): State<AppState>,
    session: Option<Extension<SessionIdentity>>,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return rpc_error(Value::Null, error_codes::PARSE_ERROR, format!("Parse error: {e}"))
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return rpc_error(
                Value::Null,
                error_codes::INVALID_REQUEST,
                format!("Invalid request: {e}"),
            )
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return rpc_error(
            request.id.unwrap_or(Value::Null),
            error_codes::INVALID_REQUEST,
            "jsonrpc must be \"2.0\"".to_string(),
        );
    }

    if request.is_notification() {
        tracing::debug!(event = "notification", method = %request.method);
        return StatusCode::ACCEPTED.into_response();
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let session = session.map(|Extension(s)| s);
    let handler = &state.inner.handler;

    match request.method.as_str() {
        "initialize" => initialize(id, &request.params),
        "ping" => rpc_ok(id, json!({})),
        "tools/list" => rpc_ok(id, json!({ "tools": handler.registry().list() })),
        "tools/call" => {
            let Some(params) = request.tool_params() else {
                let e = handler.reject_unnamed(request.id.clone(), &request.params, session.as_ref());
                return rpc_error(id, e.code, e.message);
            };
            match handler.handle(request.id.clone(), params, session.as_ref()).await {
                Ok(body) => match serde_json::to_value(&body) {
                    Ok(v) => rpc_ok(id, v),
                    Err(e) => rpc_error(id, error_codes::INTERNAL_ERROR, e.to_string()),
                },
                Err(e) => Json(JsonRpcResponse {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    result: None,
                    error: Some(e),
                })
                .into_response(),
            }
        }
        other => rpc_error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}

fn initialize(id: Value, params: &Value) -> Response {
    let requested = params.get("protocolVersion").and_then(Value::as_str);
    let version = requested
        .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
        .unwrap_or(LATEST_PROTOCOL_VERSION);

    let mut resp = rpc_ok(
        id,
        json!({
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            "instructions": "Use fetch_pr_simple for public pull requests. If it fails with 404 or 403, \
                             use fetch_pr and related tools, which act with your delegated GitHub access.",
        }),
    );
    let session_id = uuid::Uuid::new_v4().to_string();
    if let Ok(v) = HeaderValue::from_str(&session_id) {
        resp.headers_mut().insert(SESSION_ID_HEADER, v);
    }
    resp
}

fn rpc_ok(id: Value, result: Value) -> Response {
    Json(JsonRpcResponse::success(id, result)).into_response()
}

fn rpc_error(id: Value, code: i32, message: String) -> Response {
    Json(JsonRpcResponse::failure(id, code, message)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionAuth;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use handoff_core::audit::NullAuditEmitter;
    use std::time::Duration;
    use tower::ServiceExt;
    use url::Url;

    struct NoBroker;

    #[async_trait::async_trait]
    impl TokenExchanger for NoBroker {
        async fn exchange(
            &self,
            _subject: &handoff_core::SessionToken,
            _resource: &handoff_core::Resource,
        ) -> Result<handoff_core::DelegatedCredential, BrokerError> {
            Err(BrokerError::Unavailable {
                message: "offline".into(),
            })
        }
    }

    fn state(mode: SessionAuth) -> AppState {
        let auth = AuthConfig {
            mode,
            jwks_uri: Url::parse("https://zone.keycard.cloud/openidconnect/jwks").unwrap(),
            issuers: vec!["https://zone.keycard.cloud".into()],
            audience: vec!["http://localhost:8000/".into()],
            resource_metadata: Url::parse(
                "http://localhost:8000/.well-known/oauth-protected-resource",
            )
            .unwrap(),
            clock_skew_leeway: Duration::from_secs(30),
        };
        let github = Arc::new(
            GithubClient::new(&Url::parse("https://api.github.com").unwrap()).unwrap(),
        );
        let handler = ToolCallHandler::new(
            Arc::new(ToolRegistry::standard(github).unwrap()),
            GrantGuard::new(Arc::new(NoBroker)),
            Arc::new(NullAuditEmitter),
            "http://localhost:8000/",
        );
        AppState::new(
            auth,
            None,
            handler,
            "http://localhost:8000/",
            "https://zone.keycard.cloud",
        )
    }

    fn rpc(body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn initialize_without_bearer_gets_challenge() {
        let router = router(state(SessionAuth::Required));
        let resp = router
            .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let challenge = resp.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
        assert!(challenge.starts_with("Bearer error=\"invalid_token\""));
        assert!(challenge.contains(
            "resource_metadata=\"http://localhost:8000/.well-known/oauth-protected-resource\""
        ));
    }

    #[tokio::test]
    async fn metadata_and_health_are_public() {
        let router = router(state(SessionAuth::Required));
        let resp = router
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/.well-known/oauth-protected-resource")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let meta = json_body(resp).await;
        assert_eq!(meta["resource"], "http://localhost:8000/");
        assert_eq!(meta["authorization_servers"][0], "https://zone.keycard.cloud");

        let resp = router
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn initialize_negotiates_version_and_sets_session_header() {
        let router = router(state(SessionAuth::Disabled));
        let resp = router
            .oneshot(rpc(json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": { "protocolVersion": "2025-03-26", "capabilities": {} }
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(SESSION_ID_HEADER));
        let body = json_body(resp).await;
        assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(body["result"]["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn notification_is_accepted_without_body() {
        let router = router(state(SessionAuth::Disabled));
        let resp = router
            .oneshot(rpc(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn tools_list_and_unknown_method() {
        let router = router(state(SessionAuth::Disabled));
        let resp = router
            .clone()
            .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})))
            .await
            .unwrap();
        let body = json_body(resp).await;
        let tools = body["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 6);
        assert_eq!(tools[0]["name"], "echo");
        assert!(tools[2]["inputSchema"]["required"].is_array());

        let resp = router
            .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"})))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn granted_tool_without_session_is_is_error() {
        let router = router(state(SessionAuth::Disabled));
        let resp = router
            .oneshot(rpc(json!({
                "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                "params": { "name": "fetch_pr", "arguments": { "repo": "acme/widgets", "pr_number": 1 } }
            })))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["result"]["isError"], true);
        assert!(body["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("no authenticated session"));
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let router = router(state(SessionAuth::Disabled));
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/mcp")
            .body(Body::from("{not json"))
            .unwrap();
        let body = json_body(router.oneshot(req).await.unwrap()).await;
        assert_eq!(body["error"]["code"], error_codes::PARSE_ERROR);
        assert!(body["id"].is_null());
    }

    #[test]
    fn bearer_parsing() {
        let mut h = HeaderMap::new();
        assert!(bearer_token(&h).is_none());
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&h), Some("abc"));
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&h).is_none());
    }

    #[test]
    fn route_table_lists_mcp_first() {
        assert_eq!(routes()[0], ("POST", "/mcp", "MCP JSON-RPC endpoint (session auth)"));
    }

    fn settings_with_audit_log(path: &std::path::Path) -> Settings {
        use handoff_core::config::{self, RawEnv};
        let raw = RawEnv::default()
            .set(config::ZONE_ID, "zone1")
            .set(config::CLIENT_ID, "tool-host")
            .set(config::CLIENT_SECRET, "secret")
            .set(config::BASE_URL, "http://localhost:8000/")
            .set(config::AUDIT_LOG, path.display().to_string());
        Settings::from_raw(&raw).unwrap().0
    }

    #[test]
    fn preflight_leaves_audit_log_alone() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.ndjson");
        AppState::preflight(&settings_with_audit_log(&log)).unwrap();
        assert!(!log.exists());

        AppState::from_settings(&settings_with_audit_log(&log)).unwrap();
        assert!(log.exists());
    }

    #[test]
    fn preflight_reports_missing_audit_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("absent").join("audit.ndjson");
        let err = AppState::preflight(&settings_with_audit_log(&log)).unwrap_err();
        assert!(matches!(err, ServerError::AuditLog { .. }), "{err}");
        assert!(!dir.path().join("absent").exists());
    }
}
