//! Full tool host on an ephemeral port, with wiremock standing in for the broker
//! (JWKS + token endpoint) and the GitHub API.

#![allow(dead_code)]

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use handoff_core::config::{self, RawEnv, Settings};
use handoff_mcp_server::{serve, AppState};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const KID: &str = "test-key-1";

pub struct SigningKey {
    private_pem: String,
    jwk: Value,
}

impl SigningKey {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("failed to generate key");
        let public = private.to_public_key();
        let jwk = json!({
            "kid": KID,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        });
        Self {
            private_pem: private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
            jwk,
        }
    }

    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KID.to_string());
        header.typ = Some("at+jwt".to_string());
        encode(
            &header,
            claims,
            &EncodingKey::from_rsa_pem(self.private_pem.as_bytes()).unwrap(),
        )
        .unwrap()
    }
}

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

pub struct Harness {
    pub base_url: String,
    pub broker: MockServer,
    pub github: MockServer,
    pub audit_log: PathBuf,
    pub key: SigningKey,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Harness {
    pub async fn start() -> Self {
        let broker = MockServer::start().await;
        let github = MockServer::start().await;
        let key = SigningKey::generate();

        Mock::given(method("GET"))
            .and(path("/openidconnect/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [key.jwk] })))
            .mount(&broker)
            .await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/", listener.local_addr().unwrap());

        let dir = tempfile::tempdir().unwrap();
        let audit_log = dir.path().join("audit.ndjson");

        let raw = RawEnv::default()
            .set(config::ZONE_ID, "testzone")
            .set(config::CLIENT_ID, "mcp-client")
            .set(config::CLIENT_SECRET, "client-secret")
            .set(config::BASE_URL, base_url.clone())
            .set(config::ISSUER_URL, broker.uri())
            .set(config::GITHUB_API_URL, github.uri())
            .set(config::ALLOW_PRIVATE_ENDPOINTS, "1")
            .set(config::EXCHANGE_TIMEOUT_SECS, "2")
            .set(config::AUDIT_LOG, audit_log.display().to_string());
        let (settings, _warnings) = Settings::from_raw(&raw).unwrap();
        let state = AppState::from_settings(&settings).unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(serve(listener, state, async {
            let _ = rx.await;
        }));

        Self {
            base_url,
            broker,
            github,
            audit_log,
            key,
            client: reqwest::Client::new(),
            _dir: dir,
            shutdown: Some(tx),
        }
    }

    pub fn issuer(&self) -> String {
        self.broker.uri()
    }

    /// Session token as the broker would issue it for this tool host.
    pub fn session_token(&self, subject: &str) -> String {
        self.key.sign(&json!({
            "sub": subject,
            "iss": self.issuer(),
            "aud": self.base_url,
            "exp": now() + 600,
            "iat": now(),
            "client_id": "crew-orchestrator"
        }))
    }

    pub async fn post(&self, bearer: Option<&str>, body: Value) -> reqwest::Response {
        let mut req = self
            .client
            .post(format!("{}mcp", self.base_url))
            .header("accept", "application/json, text/event-stream")
            .json(&body);
        if let Some(t) = bearer {
            req = req.bearer_auth(t);
        }
        req.send().await.unwrap()
    }

    pub async fn call_tool(&self, bearer: Option<&str>, name: &str, arguments: Value) -> Value {
        let resp = self
            .post(
                bearer,
                json!({
                    "jsonrpc": "2.0",
                    "id": 7,
                    "method": "tools/call",
                    "params": { "name": name, "arguments": arguments }
                }),
            )
            .await;
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    pub fn audit_records(&self) -> Vec<Value> {
        std::fs::read_to_string(&self.audit_log)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    pub fn audit_text(&self) -> String {
        std::fs::read_to_string(&self.audit_log).unwrap_or_default()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
