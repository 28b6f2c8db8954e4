mod common;

use axum::body::{ to_bytes, Body };
use axum::http::{ header, Method, Request, StatusCode };
use axum::Router;
use serde_json::{ json, Value };
use tower::ServiceExt;

use common::seeded_store;
use messaging_hub::models::{ ConversationSummary, Message, Page };
use messaging_hub::server::api::{ router, AppState };
use messaging_hub::server::auth::SessionSigner;
use messaging_hub::server::registry::ConnectionRegistry;
use messaging_hub::server::service::MessagingService;

fn app(signer: SessionSigner) -> Router {
    let service = MessagingService::new(seeded_store(), ConnectionRegistry::new(), 20);
    router(AppState { service, signer })
}

fn open_app() -> Router {
    app(SessionSigner::new(None, 3600))
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) =>
            builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn health_needs_no_session() {
    let (status, body) = call(&open_app(), request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let app = open_app();
    let (status, body) = call(
        &app,
        request(Method::POST, "/api/messages/direct/bob", None, Some(json!({ "content": "hi" })))
    ).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn send_then_page_a_direct_conversation() {
    let app = open_app();
    for text in ["one", "two", "three"] {
        let (status, body) = call(
            &app,
            request(Method::POST, "/api/messages/direct/bob", Some("alice"), Some(json!({ "content": text })))
        ).await;
        assert_eq!(status, StatusCode::CREATED);
        let message: Message = serde_json::from_value(body).unwrap();
        assert_eq!(message.content, text);
        assert_eq!(message.sender.id, "alice");
        assert!(!message.id.is_temporary());
    }

    // bob sees the same conversation from his side.
    let (status, body) = call(&app, request(Method::GET, "/api/messages/direct/alice?limit=2", Some("bob"), None)).await;
    assert_eq!(status, StatusCode::OK);
    let page: Page = serde_json::from_value(body).unwrap();
    let texts: Vec<&str> = page.messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(texts, vec!["two", "three"]);

    let cursor = page.next_cursor.unwrap();
    let uri = format!("/api/messages/direct/alice?limit=2&cursor={}", cursor.as_str());
    let (_, body) = call(&app, request(Method::GET, &uri, Some("bob"), None)).await;
    let older: Page = serde_json::from_value(body).unwrap();
    assert_eq!(older.messages.len(), 1);
    assert_eq!(older.messages[0].content, "one");
    assert!(older.next_cursor.is_none());
}

#[tokio::test]
async fn validation_and_membership_errors_map_to_statuses() {
    let app = open_app();

    let (status, body) = call(
        &app,
        request(Method::POST, "/api/messages/group/g1", Some("dave"), Some(json!({ "content": "hi" })))
    ).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_a_member");
    assert_eq!(body["details"]["group_id"], "g1");

    let (status, body) = call(
        &app,
        request(Method::POST, "/api/messages/group/g1", Some("alice"), Some(json!({ "content": "  " })))
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "empty_content");

    let (status, body) = call(
        &app,
        request(Method::POST, "/api/messages/direct/alice", Some("alice"), Some(json!({ "content": "me" })))
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_target");

    let (status, body) = call(&app, request(Method::GET, "/api/messages/group/nope", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_group");

    let (status, body) = call(
        &app,
        request(Method::GET, "/api/messages/group/g1?cursor=garbage", Some("alice"), None)
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_cursor");
}

#[tokio::test]
async fn mark_read_resets_the_unread_count() {
    let app = open_app();
    call(
        &app,
        request(Method::POST, "/api/messages/group/g1", Some("alice"), Some(json!({ "content": "hello all" })))
    ).await;

    let (_, body) = call(&app, request(Method::GET, "/api/conversations", Some("carol"), None)).await;
    let list: Vec<ConversationSummary> = serde_json::from_value(body).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].unread_count, 1);
    assert_eq!(list[0].preview.as_ref().unwrap().content, "hello all");

    let (status, _) = call(&app, request(Method::POST, "/api/messages/group/g1/read", Some("carol"), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = call(&app, request(Method::GET, "/api/conversations", Some("carol"), None)).await;
    let list: Vec<ConversationSummary> = serde_json::from_value(body).unwrap();
    assert_eq!(list[0].unread_count, 0);
}

#[tokio::test]
async fn group_lookup_returns_members() {
    let app = open_app();
    let (status, body) = call(&app, request(Method::GET, "/api/groups/g1", Some("bob"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Beach Cleanup");
    assert_eq!(body["member_ids"], json!(["alice", "bob", "carol"]));
}

#[tokio::test]
async fn signed_sessions_reject_plain_user_ids() {
    let signer = SessionSigner::new(Some("s3cret".into()), 3600);
    let token = signer.issue("bob").unwrap();
    let app = app(signer);

    let (status, _) = call(&app, request(Method::GET, "/api/conversations", Some("bob"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, request(Method::GET, "/api/conversations", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}
