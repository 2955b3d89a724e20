//! Mandrill API client tests.

use std::net::TcpListener;
use std::time::Duration;

use mandrill_mailer::{ApiErrorKind, MandrillClient, MandrillError, Message};
use serde_json::{json, Map};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helper Functions
// ============================================================================

fn valid_message() -> Message {
    let mut message = Message::new();
    message
        .from("\"Tony Stark\" <tony.stark@example.com>")
        .to("steve.rogers@example.com")
        .subject("Hello, Avengers!")
        .text("Assemble");
    message
}

fn client_for(server: &MockServer) -> MandrillClient {
    MandrillClient::new("jarvis").base_url(server.uri())
}

fn sent_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!([{
        "email": "steve.rogers@example.com",
        "status": "sent",
        "_id": "abc123",
        "reject_reason": null
    }]))
}

fn error_response(status: u16, name: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "status": "error",
        "code": 12,
        "name": name,
        "message": "boom"
    }))
}

/// A local address nothing listens on.
fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

// ============================================================================
// Request Shape
// ============================================================================

#[tokio::test]
async fn posts_message_and_key_as_json() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages/send.json"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "key": "jarvis",
            "message": {
                "from_email": "tony.stark@example.com",
                "from_name": "Tony Stark",
                "subject": "Hello, Avengers!",
                "text": "Assemble",
                "to": [{"email": "steve.rogers@example.com", "name": "steve.rogers@example.com", "type": "to"}]
            }
        })))
        .respond_with(sent_response())
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server)
        .call("/messages/send", &valid_message())
        .await
        .unwrap();

    assert_eq!(result[0]["status"], json!("sent"));
    assert_eq!(result[0]["_id"], json!("abc123"));
}

#[tokio::test]
async fn call_document_sends_prebuilt_document() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages/search.json"))
        .and(body_partial_json(json!({"key": "jarvis", "message": {"query": "*"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let mut document = Map::new();
    document.insert("query".into(), json!("*"));

    let result = client_for(&server)
        .call_document("/messages/search", document)
        .await
        .unwrap();
    assert_eq!(result, json!([]));
}

#[tokio::test]
async fn extra_params_reach_the_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "message": {"merge_language": "handlebars", "track_opens": true}
        })))
        .respond_with(sent_response())
        .expect(1)
        .mount(&server)
        .await;

    let mut message = valid_message();
    message.track_opens(true).param("merge_language", "handlebars");

    client_for(&server)
        .call("/messages/send", &message)
        .await
        .unwrap();
}

#[tokio::test]
async fn recipients_from_param_and_setter_are_all_sent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "message": {
                "subject": "typed",
                "to": [
                    {"email": "a@example.com", "name": "A", "type": "to"},
                    {"email": "b@example.com", "name": "b@example.com", "type": "to"}
                ]
            }
        })))
        .respond_with(sent_response())
        .expect(1)
        .mount(&server)
        .await;

    let mut message = Message::new();
    message
        .from("shop@example.com")
        .param("to", json!([{"email": "a@example.com", "name": "A", "type": "to"}]))
        .param("subject", "raw")
        .to("b@example.com")
        .subject("typed");

    client_for(&server)
        .call("/messages/send", &message)
        .await
        .unwrap();
}

// ============================================================================
// Error Mapping
// ============================================================================

#[tokio::test]
async fn error_payload_becomes_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(error_response(500, "GeneralError"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call("/messages/send", &valid_message())
        .await
        .unwrap_err();

    match err {
        MandrillError::Api { kind, name, code, message, status } => {
            assert_eq!(kind, ApiErrorKind::Generic);
            assert_eq!(name, "GeneralError");
            assert_eq!(code, 12);
            assert_eq!(message, "boom");
            assert_eq!(status, 500);
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn registered_error_name_maps_to_kind() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(error_response(401, "Invalid_Key"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .register_error("Invalid_Key", ApiErrorKind::InvalidKey)
        .call("/messages/send", &valid_message())
        .await
        .unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::InvalidKey));
}

#[tokio::test]
async fn unexpected_error_payload_is_generic() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({"oops": true})))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call("/messages/send", &valid_message())
        .await
        .unwrap_err();

    match err {
        MandrillError::Api { kind, name, code, message, status } => {
            assert_eq!(kind, ApiErrorKind::Generic);
            assert!(name.is_empty());
            assert_eq!(code, 0);
            assert!(message.starts_with("We received an unexpected error: "));
            assert_eq!(status, 502);
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_body_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call("/messages/send", &valid_message())
        .await
        .unwrap_err();

    match err {
        MandrillError::Decode { body } => assert_eq!(body, "<html>maintenance</html>"),
        other => panic!("expected Decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_error_status_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call("/messages/send", &valid_message())
        .await
        .unwrap_err();

    assert!(matches!(err, MandrillError::Decode { .. }));
}

#[tokio::test]
async fn null_body_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call("/messages/send", &valid_message())
        .await
        .unwrap_err();

    assert!(matches!(err, MandrillError::Decode { .. }));
}

#[tokio::test]
async fn connection_refused_is_transport_error() {
    let client = MandrillClient::new("jarvis").base_url(closed_port_url());

    let err = client
        .call("/messages/send", &valid_message())
        .await
        .unwrap_err();

    match err {
        MandrillError::Transport { endpoint, .. } => assert_eq!(endpoint, "/messages/send"),
        other => panic!("expected Transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_is_transport_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(sent_response().set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let client = MandrillClient::with_client("jarvis", http).base_url(server.uri());

    let err = client
        .call("/messages/send", &valid_message())
        .await
        .unwrap_err();

    assert!(matches!(err, MandrillError::Transport { .. }));
}

// ============================================================================
// Diagnostics
// ============================================================================

#[tokio::test]
async fn verbose_call_records_diagnostics() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(sent_response())
        .mount(&server)
        .await;

    let client = client_for(&server).verbose(true);
    client
        .call("/messages/send", &valid_message())
        .await
        .unwrap();

    let record = client.diagnostics().unwrap();
    assert_eq!(record.target_url, format!("{}/messages/send.json", server.uri()));
    assert!(record.request_body.contains(r#""key":"jarvis""#));
    assert!(record.response_body.as_deref().unwrap().contains("abc123"));
    assert!(record.elapsed_millis().ends_with("ms"));

    let log = record.transport_log.unwrap();
    assert!(log.contains("> POST"));
    assert!(log.contains("< HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn quiet_call_records_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(sent_response())
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .call("/messages/send", &valid_message())
        .await
        .unwrap();

    assert!(client.diagnostics().is_none());
}

#[tokio::test]
async fn diagnostics_describe_latest_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages/send.json"))
        .respond_with(sent_response())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users/ping.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"PONG!\""))
        .mount(&server)
        .await;

    let client = client_for(&server).verbose(true);
    client
        .call("/messages/send", &valid_message())
        .await
        .unwrap();
    let pong = client
        .call_document("/users/ping", Map::new())
        .await
        .unwrap();

    assert_eq!(pong, json!("PONG!"));
    let record = client.diagnostics().unwrap();
    assert!(record.target_url.ends_with("/users/ping.json"));
    assert_eq!(record.response_body.as_deref(), Some("\"PONG!\""));
}

#[tokio::test]
async fn diagnostics_recorded_for_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(error_response(500, "GeneralError"))
        .mount(&server)
        .await;

    let client = client_for(&server).verbose(true);
    assert!(client.call("/messages/send", &valid_message()).await.is_err());

    let record = client.diagnostics().unwrap();
    assert!(record.response_body.unwrap().contains("boom"));
}

#[tokio::test]
async fn diagnostics_recorded_for_transport_errors() {
    let client = MandrillClient::new("jarvis")
        .base_url(closed_port_url())
        .verbose(true);

    assert!(client.call("/messages/send", &valid_message()).await.is_err());

    let record = client.diagnostics().unwrap();
    assert!(record.target_url.ends_with("/messages/send.json"));
    assert!(record.response_body.is_none());
}
