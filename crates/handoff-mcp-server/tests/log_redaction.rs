//! Everything the tool host logs during a delegated call, captured and searched
//! for the session token and the exchanged credential.

mod common;

use common::Harness;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const DELEGATED: &str = "gho_logged_nowhere_token";

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// current_thread: the server task is polled on this thread, so the scoped
// subscriber sees its events too.
#[tokio::test(flavor = "current_thread")]
async fn tokens_never_reach_the_log() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": DELEGATED,
            "token_type": "Bearer",
            "expires_in": 300
        })))
        .expect(1)
        .mount(&h.broker)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/pulls/42/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&h.github)
        .await;

    let token = h.session_token("user-logs");
    let resp = h
        .call_tool(
            Some(&token),
            "fetch_pr_files",
            json!({"repo": "acme/widgets", "pr_number": 42}),
        )
        .await;
    assert_eq!(resp["result"]["isError"], false, "{resp}");

    let logs = captured.text();
    // The call was logged at all, otherwise the search below proves nothing.
    assert!(logs.contains("token_exchange"), "{logs}");
    assert!(logs.contains("granted"), "{logs}");
    assert!(!logs.contains(DELEGATED), "{logs}");
    assert!(!logs.contains(&token), "{logs}");
    // The signature part alone must not appear either.
    let signature = token.rsplit('.').next().unwrap();
    assert!(!logs.contains(signature), "{logs}");
}
