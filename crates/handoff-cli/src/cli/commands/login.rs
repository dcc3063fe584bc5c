//! `handoff login`: authorization code + PKCE against the tool host's
//! authorization server, with a one-shot loopback callback listener.

use super::super::args::LoginArgs;
use crate::exit_codes;
use crate::session::{Session, SessionStore};
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use handoff_core::headers::USER_AGENT;
use handoff_core::SessionToken;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("discovery failed at {url}: {message}")]
    Discovery { url: String, message: String },
    #[error("no client id given and the authorization server offers no registration endpoint")]
    NoClientId,
    #[error("client registration failed: {0}")]
    Registration(String),
    #[error("authorization denied: {error} {}", .description.as_deref().unwrap_or(""))]
    Denied {
        error: String,
        description: Option<String>,
    },
    #[error("callback state does not match; possible cross-site request")]
    StateMismatch,
    #[error("callback carried no authorization code")]
    MissingCode,
    #[error("no browser callback within {0}s")]
    Timeout(u64),
    #[error("token endpoint returned HTTP {status}: {message}")]
    Token { status: u16, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("callback listener failed: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(args: LoginArgs) -> anyhow::Result<i32> {
    let store = SessionStore::from_env()?;
    let http = http_client()?;

    let result = login(&http, &args, |url| {
        eprintln!("Open this URL in your browser to grant access:\n\n  {url}\n");
    })
    .await;

    match result {
        Ok(session) => {
            store.save(&session)?;
            eprintln!(
                "Logged in to {}. Session saved to {}",
                session.server,
                store.path().display()
            );
            Ok(exit_codes::SUCCESS)
        }
        Err(e @ LoginError::Timeout(_)) => {
            eprintln!("error: {e}; re-run `handoff login`");
            Ok(exit_codes::COMMAND_FAILED)
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(exit_codes::COMMAND_FAILED)
        }
    }
}

fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
}

#[derive(Debug, Deserialize)]
struct ProtectedResourceMetadata {
    resource: String,
    authorization_servers: Vec<Url>,
}

#[derive(Debug, Deserialize)]
struct AuthorizationServerMetadata {
    authorization_endpoint: Url,
    token_endpoint: Url,
    #[serde(default)]
    registration_endpoint: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub(crate) struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// S256 challenge for `verifier`.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Run the whole flow. `open` receives the authorization URL; the caller
/// shows it to the user.
pub(crate) async fn login(
    http: &reqwest::Client,
    args: &LoginArgs,
    open: impl FnOnce(&Url),
) -> Result<Session, LoginError> {
    let resource = fetch_resource_metadata(http, &args.server).await?;
    let issuer = resource
        .authorization_servers
        .first()
        .ok_or_else(|| LoginError::Discovery {
            url: args.server.to_string(),
            message: "no authorization_servers advertised".into(),
        })?;
    let as_meta = fetch_as_metadata(http, issuer).await?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let redirect_uri = format!("http://{}/callback", listener.local_addr()?);

    let client_id = match &args.client_id {
        Some(id) => id.clone(),
        None => register_client(http, &as_meta, &redirect_uri).await?,
    };

    let pkce = Pkce::generate();
    let state = uuid::Uuid::new_v4().simple().to_string();
    let mut authorize = as_meta.authorization_endpoint.clone();
    authorize
        .query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &client_id)
        .append_pair("redirect_uri", &redirect_uri)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", &state)
        .append_pair("resource", &resource.resource);

    tracing::info!(event = "login_started", issuer = %issuer, resource = %resource.resource);
    open(&authorize);

    let params = wait_for_callback(listener, Duration::from_secs(args.timeout)).await?;
    if let Some(error) = params.error {
        return Err(LoginError::Denied {
            error,
            description: params.error_description,
        });
    }
    if params.state.as_deref() != Some(state.as_str()) {
        return Err(LoginError::StateMismatch);
    }
    let code = params.code.ok_or(LoginError::MissingCode)?;

    let resp = http
        .post(as_meta.token_endpoint.clone())
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", client_id.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
            ("resource", resource.resource.as_str()),
        ])
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(LoginError::Token {
            status: status.as_u16(),
            message: oauth_error_message(&body),
        });
    }
    let token: TokenResponse = resp.json().await?;
    let expires_at = token.expires_in.and_then(expiry_after);

    tracing::info!(event = "login_completed", resource = %resource.resource);
    Ok(Session::new(
        args.server.clone(),
        SessionToken::new(token.access_token),
        expires_at,
    ))
}

/// A lifetime that cannot be represented is stored as "no expiry"; the server
/// still rejects the token once it lapses.
fn expiry_after(secs: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_seconds(secs).and_then(|d| Utc::now().checked_add_signed(d))
}

async fn fetch_resource_metadata(
    http: &reqwest::Client,
    server: &Url,
) -> Result<ProtectedResourceMetadata, LoginError> {
    let url = format!(
        "{}/.well-known/oauth-protected-resource",
        server.as_str().trim_end_matches('/')
    );
    get_json(http, &url).await
}

async fn fetch_as_metadata(
    http: &reqwest::Client,
    issuer: &Url,
) -> Result<AuthorizationServerMetadata, LoginError> {
    let url = format!(
        "{}/.well-known/oauth-authorization-server",
        issuer.as_str().trim_end_matches('/')
    );
    get_json(http, &url).await
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
) -> Result<T, LoginError> {
    let discovery = |message: String| LoginError::Discovery {
        url: url.to_string(),
        message,
    };
    let resp = http.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(discovery(format!("HTTP {}", resp.status().as_u16())));
    }
    resp.json().await.map_err(|e| discovery(e.to_string()))
}

/// RFC 7591 registration of a public client for this loopback redirect.
async fn register_client(
    http: &reqwest::Client,
    meta: &AuthorizationServerMetadata,
    redirect_uri: &str,
) -> Result<String, LoginError> {
    let endpoint = meta
        .registration_endpoint
        .clone()
        .ok_or(LoginError::NoClientId)?;
    let resp = http
        .post(endpoint)
        .json(&json!({
            "client_name": "handoff CLI",
            "redirect_uris": [redirect_uri],
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        }))
        .send()
        .await?;
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(LoginError::Registration(format!(
            "HTTP {status}: {}",
            oauth_error_message(&body)
        )));
    }

    #[derive(Deserialize)]
    struct Registered {
        client_id: String,
    }
    let reg: Registered = resp
        .json()
        .await
        .map_err(|e| LoginError::Registration(e.to_string()))?;
    Ok(reg.client_id)
}

fn oauth_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct OAuthError {
        error: String,
        error_description: Option<String>,
    }
    match serde_json::from_str::<OAuthError>(body) {
        Ok(e) => match e.error_description {
            Some(d) => format!("{}: {d}", e.error),
            None => e.error,
        },
        Err(_) => body.chars().take(200).collect(),
    }
}

type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// Accept exactly one `/callback` request, or give up after `timeout`.
async fn wait_for_callback(
    listener: TcpListener,
    timeout: Duration,
) -> Result<CallbackParams, LoginError> {
    let (tx, rx) = oneshot::channel();
    let slot: CallbackSlot = Arc::new(Mutex::new(Some(tx)));
    let app = Router::new()
        .route("/callback", get(callback))
        .with_state(slot);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let received = tokio::time::timeout(timeout, rx).await;
    let _ = stop_tx.send(());
    // Let the confirmation page go out, but a kept-alive browser connection must not block us.
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;

    match received {
        Ok(Ok(params)) => Ok(params),
        Ok(Err(_)) => Err(LoginError::MissingCode),
        Err(_) => Err(LoginError::Timeout(timeout.as_secs())),
    }
}

async fn callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let sender = slot.lock().ok().and_then(|mut s| s.take());
    if let Some(tx) = sender {
        let _ = tx.send(params);
    }
    Html("<html><body><p>handoff: login complete. You can close this tab.</p></body></html>")
}
