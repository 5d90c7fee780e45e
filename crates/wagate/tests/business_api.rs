//! Business API client against a mock Graph API.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wagate::business::CloudApiClient;
use wagate::protocol::{MediaKind, OutboundBody, OutboundMessage};
use wagate::selector::BusinessApiSettings;
use wagate::{ClientError, ConnectorConfig, create_client};

const PHONE_ID: &str = "106540352242922";

fn settings(server: &MockServer) -> BusinessApiSettings {
    BusinessApiSettings {
        access_token: "EAAG-test".to_string(),
        phone_number_id: PHONE_ID.to_string(),
        webhook_verify_token: None,
        business_account_id: None,
        api_version: "v17.0".to_string(),
        api_base_url: server.uri(),
    }
}

fn messages_path() -> String {
    format!("/v17.0/{PHONE_ID}/messages")
}

fn accepted(id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "messaging_product": "whatsapp",
        "contacts": [{ "input": "15551234567", "wa_id": "15551234567" }],
        "messages": [{ "id": id }]
    }))
}

#[tokio::test]
async fn sends_text_with_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(messages_path()))
        .and(header("authorization", "Bearer EAAG-test"))
        .and(body_partial_json(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": "15551234567",
            "type": "text",
            "text": { "body": "hello" }
        })))
        .respond_with(accepted("wamid.HBgLMTU1NTEyMzQ1NjcVAgARGBI"))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudApiClient::new(settings(&server)).unwrap();
    let receipt = client
        .send(&OutboundMessage::text("15551234567", "hello"))
        .await
        .unwrap();
    assert_eq!(receipt.message_id, "wamid.HBgLMTU1NTEyMzQ1NjcVAgARGBI");
}

#[tokio::test]
async fn sends_media_by_link() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(messages_path()))
        .and(body_partial_json(json!({
            "type": "image",
            "image": { "link": "https://example.com/cat.jpg", "caption": "cat" }
        })))
        .respond_with(accepted("wamid.IMG"))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudApiClient::new(settings(&server)).unwrap();
    let msg = OutboundMessage {
        to: "15551234567".to_string(),
        body: OutboundBody::Media {
            kind: MediaKind::Image,
            id: None,
            link: Some("https://example.com/cat.jpg".to_string()),
            caption: Some("cat".to_string()),
        },
    };
    assert_eq!(client.send(&msg).await.unwrap().message_id, "wamid.IMG");
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(messages_path()))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let client = CloudApiClient::new(settings(&server)).unwrap();
    let err = client
        .send(&OutboundMessage::text("15551234567", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RateLimit { retry_after: Some(7) }));
}

#[tokio::test]
async fn api_error_surfaces_graph_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(messages_path()))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {
                "message": "Invalid OAuth access token - Cannot parse access token",
                "type": "OAuthException",
                "code": 190
            }
        })))
        .mount(&server)
        .await;

    let client = CloudApiClient::new(settings(&server)).unwrap();
    match client.send(&OutboundMessage::text("15551234567", "hi")).await {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.starts_with("Invalid OAuth access token"));
            assert!(message.ends_with("(code 190)"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_media_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(accepted("never"))
        .expect(0)
        .mount(&server)
        .await;

    let client = CloudApiClient::new(settings(&server)).unwrap();
    let msg = OutboundMessage {
        to: "15551234567".to_string(),
        body: OutboundBody::Media {
            kind: MediaKind::Document,
            id: None,
            link: None,
            caption: None,
        },
    };
    assert!(matches!(
        client.send(&msg).await,
        Err(ClientError::Normalize(_))
    ));
}

#[tokio::test]
async fn facade_sends_without_start() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(messages_path()))
        .respond_with(accepted("wamid.FACADE"))
        .expect(1)
        .mount(&server)
        .await;

    let config = ConnectorConfig {
        access_token: Some("EAAG-test".to_string()),
        phone_number_id: Some(PHONE_ID.to_string()),
        api_base_url: Some(server.uri()),
        ..Default::default()
    };
    let client = create_client(&config).unwrap();
    let receipt = client
        .send_message(&OutboundMessage::text("15551234567", "no start needed"))
        .await
        .unwrap();
    assert_eq!(receipt.message_id, "wamid.FACADE");
}
