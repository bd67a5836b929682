// crates/acceptance-harness/src/api/tests.rs
// ============================================================================
// Module: Management API Client Tests
// Description: Request, decode, and failure classification coverage.
// Purpose: Validate the client against a local stub server.
// Dependencies: tiny_http, tokio
// ============================================================================

//! ## Overview
//! A one-shot `tiny_http` server answers each test's request and hands the
//! observed request back to the test for inspection.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    reason = "Test-only assertions favor direct unwrap/expect for clarity."
)]

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

use super::ApiClient;
use super::ApiError;
use super::MAX_TRANSCRIPT_ENTRIES;
use super::Method;
use super::QueryResponse;
use crate::events::EventRecorder;
use crate::identity::IdentityContext;
use crate::identity::Principal;
use crate::identity::PrincipalScope;
use crate::test_support::FakeCli;
use crate::test_support::test_policy;

/// Request observed by the stub server.
struct Observed {
    method: String,
    url: String,
    authorization: Option<String>,
    body: String,
}

/// Serves exactly one request with `status` and `body`.
fn serve_once(status: u16, body: &'static str) -> (String, thread::JoinHandle<Observed>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let handle = thread::spawn(move || {
        let mut request = server.recv().unwrap();
        let authorization = request
            .headers()
            .iter()
            .find(|header| header.field.equiv("Authorization"))
            .map(|header| header.value.as_str().to_string());
        let mut received = String::new();
        request.as_reader().read_to_string(&mut received).unwrap();
        let observed = Observed {
            method: request.method().to_string(),
            url: request.url().to_string(),
            authorization,
            body: received,
        };
        let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
        let response = Response::from_string(body).with_status_code(status).with_header(header);
        let _ = request.respond(response);
        observed
    });
    (format!("http://{addr}"), handle)
}

fn client(base_url: &str) -> ApiClient {
    ApiClient::new(base_url, Duration::from_secs(5), false).expect("client")
}

async fn logged_in(cli: &FakeCli) -> IdentityContext {
    let mut ctx = IdentityContext::new(cli.path(), cli.runner(EventRecorder::noop()), test_policy())
        .expect("identity context");
    ctx.authenticate(&Principal::new("admin", "admin", "admin-pw", PrincipalScope::Admin))
        .await
        .expect("login");
    ctx
}

#[derive(Debug, Deserialize)]
struct BuildpackEntity {
    name: String,
    enabled: bool,
}

#[test]
fn rejects_invalid_base_urls() {
    assert!(matches!(
        ApiClient::new("not a url", Duration::from_secs(1), false),
        Err(ApiError::Config(_))
    ));
    assert!(matches!(
        ApiClient::new("ftp://api.example.test", Duration::from_secs(1), false),
        Err(ApiError::Config(_))
    ));
}

#[tokio::test]
async fn query_sends_bearer_token_and_decodes_resources() {
    let cli = FakeCli::install();
    let ctx = logged_in(&cli).await;
    let (base, server) = serve_once(
        200,
        r#"{"total_results":1,"resources":[{"metadata":{"guid":"bp-1"},"entity":{"name":"simple","enabled":true}}]}"#,
    );
    let api = client(&format!("{base}/"));

    let page: QueryResponse<BuildpackEntity> = api
        .request(&ctx, Method::GET, "/v2/buildpacks?q=name:simple", None)
        .await
        .expect("query");

    let observed = server.join().unwrap();
    assert_eq!(observed.method, "GET");
    assert_eq!(observed.url, "/v2/buildpacks?q=name:simple");
    assert_eq!(observed.authorization.as_deref(), Some("bearer token-admin"));
    assert_eq!(page.total_results, 1);
    assert_eq!(page.resources[0].guid(), "bp-1");
    assert_eq!(page.resources[0].entity.name, "simple");
    assert!(page.resources[0].entity.enabled);
}

#[tokio::test]
async fn put_sends_json_body() {
    let cli = FakeCli::install();
    let ctx = logged_in(&cli).await;
    let (base, server) = serve_once(201, r#"{"metadata":{"guid":"bp-1"},"entity":{}}"#);
    let api = client(&base);

    let _: Value = api
        .request(&ctx, Method::PUT, "/v2/buildpacks/bp-1", Some(&json!({"enabled": false})))
        .await
        .expect("update");

    let observed = server.join().unwrap();
    assert_eq!(observed.method, "PUT");
    let sent: Value = serde_json::from_str(&observed.body).unwrap();
    assert_eq!(sent, json!({"enabled": false}));
}

#[tokio::test]
async fn non_success_status_is_classified() {
    let cli = FakeCli::install();
    let ctx = logged_in(&cli).await;
    let (base, server) = serve_once(403, r#"{"description":"forbidden"}"#);
    let api = client(&base);

    let err = api.request::<Value>(&ctx, Method::GET, "/v2/info", None).await.unwrap_err();

    server.join().unwrap();
    match err {
        ApiError::Status {
            status,
            body,
            ..
        } => {
            assert_eq!(status, 403);
            assert!(body.contains("forbidden"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let transcript = api.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].status, Some(403));
    assert!(transcript[0].error.is_some());
}

#[tokio::test]
async fn unexpected_shape_is_a_decode_error() {
    let cli = FakeCli::install();
    let ctx = logged_in(&cli).await;
    let (base, server) = serve_once(200, r#"{"unexpected":true}"#);
    let api = client(&base);

    let err = api
        .request::<QueryResponse<BuildpackEntity>>(&ctx, Method::GET, "/v2/buildpacks", None)
        .await
        .unwrap_err();

    server.join().unwrap();
    assert!(matches!(err, ApiError::Decode { .. }));
    assert!(api.transcript()[0].error.is_some());
}

#[tokio::test]
async fn missing_token_fails_without_sending() {
    let cli = FakeCli::install();
    let ctx = IdentityContext::new(cli.path(), cli.runner(EventRecorder::noop()), test_policy())
        .expect("identity context");
    let api = client("http://127.0.0.1:9");

    let err = api.request_empty(&ctx, Method::DELETE, "/v2/buildpacks/bp-1").await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthenticated { .. }));
    assert_eq!(api.transcript()[0].status, None);
}

#[tokio::test]
async fn connection_failure_is_transport() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let api = client(&format!("http://{addr}"));

    let err = api
        .request_with_token::<Value>("bearer x", Method::GET, "/v2/info", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Transport { .. }));
}

#[tokio::test]
async fn decode_failure_annotates_its_own_exchange() {
    let api = client("http://127.0.0.1:9");
    let own = api.record("GET", "/v2/buildpacks", Some(200), None);
    let other = api.clone();
    other.record("GET", "/v2/info", Some(200), None);

    api.annotate(
        own,
        &ApiError::Decode {
            method: "GET".to_string(),
            path: "/v2/buildpacks".to_string(),
            detail: "missing field `resources`".to_string(),
        },
    );

    let transcript = api.transcript();
    assert_eq!(transcript.len(), 2);
    assert!(transcript[0].error.as_deref().unwrap().contains("missing field"));
    assert!(transcript[1].error.is_none());
}

#[tokio::test]
async fn transcript_keeps_only_recent_exchanges() {
    let api = client("http://127.0.0.1:9");
    for _ in 0 .. MAX_TRANSCRIPT_ENTRIES + 3 {
        api.record("GET", "/v2/info", Some(200), None);
    }

    let transcript = api.transcript();
    assert_eq!(transcript.len(), MAX_TRANSCRIPT_ENTRIES);
    assert_eq!(transcript[0].sequence, 4);
    assert_eq!(
        transcript.last().unwrap().sequence,
        u64::try_from(MAX_TRANSCRIPT_ENTRIES + 3).unwrap()
    );
}
