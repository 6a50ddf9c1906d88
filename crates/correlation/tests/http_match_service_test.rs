//! HTTP match service client against a mock server
//!
//! Run with: cargo test -p govrun-correlation --test http_match_service_test

use std::time::Duration;

use serde_json::{json, Map, Value};
use wiremock::matchers::{basic_auth, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use govrun_correlation::match_service::{
    HttpMatchService, MatchRequest, MatchService, MatchServiceConfig,
};
use govrun_correlation::CorrelationError;

fn request() -> MatchRequest {
    let mut attributes = Map::new();
    attributes.insert("given_name".into(), Value::from("Ann"));
    attributes.insert("family_name".into(), Value::from("Doe"));
    MatchRequest {
        sor_label: "hr".into(),
        sor_id: "42".into(),
        attributes,
    }
}

fn client(server: &MockServer) -> HttpMatchService {
    HttpMatchService::new(
        MatchServiceConfig::new(server.uri())
            .with_credentials("administrator", "5ecr3t")
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

#[test_log::test(tokio::test)]
async fn test_definite_answer() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/people/hr/42"))
        .and(basic_auth("administrator", "5ecr3t"))
        .and(body_partial_json(json!({"sorAttributes": {"given_name": "Ann"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"referenceId": "ref-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).execute_match(&request()).await.unwrap();

    assert_eq!(response.reference_id.as_deref(), Some("ref-1"));
    assert!(response.match_request_id.is_none());
}

#[test_log::test(tokio::test)]
async fn test_fuzzy_answer() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/people/hr/42"))
        .respond_with(ResponseTemplate::new(300).set_body_json(json!({
            "matchRequest": "mr-9",
            "candidates": [
                {"referenceId": "ref-1", "confidence": 0.8, "attributes": {"given_name": "Ann"}},
                {"referenceId": "ref-2", "confidence": 0.5}
            ]
        })))
        .mount(&server)
        .await;

    let response = client(&server).execute_match(&request()).await.unwrap();

    assert!(response.reference_id.is_none());
    assert_eq!(response.match_request_id.as_deref(), Some("mr-9"));
    assert_eq!(response.candidates.len(), 2);
    assert_eq!(response.candidates[0].confidence, Some(0.8));
    assert!(!response.candidates[1].is_new_identity());
}

#[test_log::test(tokio::test)]
async fn test_resolve_sends_decision() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/people/hr/42"))
        .and(body_partial_json(json!({"referenceId": "new", "matchRequest": "mr-9"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"referenceId": "ref-3"})))
        .expect(1)
        .mount(&server)
        .await;

    let reference_id = client(&server)
        .resolve(&request(), "mr-9", None)
        .await
        .unwrap();

    assert_eq!(reference_id.as_deref(), Some("ref-3"));
}

#[test_log::test(tokio::test)]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server).execute_match(&request()).await.unwrap_err();

    assert!(matches!(err, CorrelationError::MatchService { status: Some(503), .. }));
    assert!(err.is_transient());
}

#[test_log::test(tokio::test)]
async fn test_client_errors_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(400).set_body_string("missing sorAttributes"))
        .mount(&server)
        .await;

    let err = client(&server).execute_match(&request()).await.unwrap_err();

    assert!(!err.is_transient());
    assert!(err.to_string().contains("missing sorAttributes"));
}

#[test_log::test(tokio::test)]
async fn test_fuzzy_answer_without_request_id_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let err = client(&server).execute_match(&request()).await.unwrap_err();
    assert!(matches!(err, CorrelationError::MatchService { status: Some(202), .. }));
}
