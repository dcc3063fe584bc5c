use handoff_core::audit::reason_codes;
use handoff_core::endpoint::EndpointPolicy;
use handoff_core::{BrokerError, KeycardBroker, Resource, SessionToken, TokenExchanger};
use secrecy::SecretString;
use serde_json::json;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{basic_auth, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn broker(server: &MockServer, timeout: Duration) -> KeycardBroker {
    let endpoint = Url::parse(&format!("{}/oauth/2/token", server.uri())).unwrap();
    KeycardBroker::new(
        endpoint,
        "mcp-client",
        SecretString::from("client-secret".to_string()),
        timeout,
        EndpointPolicy::AllowPrivate,
    )
    .unwrap()
}

fn github() -> Resource {
    Resource::parse("https://api.github.com").unwrap()
}

#[tokio::test]
async fn exchange_posts_rfc8693_form_with_client_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/2/token"))
        .and(basic_auth("mcp-client", "client-secret"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange",
        ))
        .and(body_string_contains("subject_token=session-abc"))
        .and(body_string_contains(
            "subject_token_type=urn%3Aietf%3Aparams%3Aoauth%3Atoken-type%3Aaccess_token",
        ))
        .and(body_string_contains("resource=https%3A%2F%2Fapi.github.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gho_delegated",
            "token_type": "Bearer",
            "expires_in": 300,
            "issued_token_type": "urn:ietf:params:oauth:token-type:access_token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cred = broker(&server, Duration::from_secs(5))
        .exchange(&SessionToken::new("session-abc"), &github())
        .await
        .unwrap();

    assert_eq!(cred.resource(), &github());
    assert_eq!(cred.bearer_header(), "Bearer gho_delegated");
    assert!(!cred.is_expired());
    assert!(!format!("{cred:?}").contains("gho_delegated"));
}

#[tokio::test]
async fn rejection_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "user has not granted access to github"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = broker(&server, Duration::from_secs(5))
        .exchange(&SessionToken::new("session-abc"), &github())
        .await
        .unwrap_err();

    match &err {
        BrokerError::Rejected { status, error, description } => {
            assert_eq!(*status, 400);
            assert_eq!(error, "invalid_grant");
            assert!(description.as_deref().unwrap().contains("not granted"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
    assert_eq!(err.reason_code(), reason_codes::A_EXCHANGE_REJECTED);
    // MockServer verifies expect(1) on drop.
}

#[tokio::test]
async fn server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = broker(&server, Duration::from_secs(5))
        .exchange(&SessionToken::new("s"), &github())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Unavailable { .. }));
    assert_eq!(err.reason_code(), reason_codes::A_BROKER_UNAVAILABLE);
}

#[tokio::test]
async fn slow_broker_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "late", "token_type": "Bearer"}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = broker(&server, Duration::from_millis(200))
        .exchange(&SessionToken::new("s"), &github())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn malformed_success_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token_type": "Bearer"})))
        .mount(&server)
        .await;

    let err = broker(&server, Duration::from_secs(5))
        .exchange(&SessionToken::new("s"), &github())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::InvalidResponse { .. }));
}

#[tokio::test]
async fn unrepresentable_lifetime_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "x",
            "token_type": "Bearer",
            "expires_in": 9_000_000_000_000_i64
        })))
        .mount(&server)
        .await;

    let err = broker(&server, Duration::from_secs(5))
        .exchange(&SessionToken::new("s"), &github())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::InvalidResponse { .. }), "got {err:?}");
}
