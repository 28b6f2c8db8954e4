mod common;

use futures::StreamExt;
use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter };
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use common::{ contents, eventually, seeded_store, user };
use messaging_hub::client::{ ChannelStatus, MessagingClient, PushChannel, PushChannelConfig };
use messaging_hub::models::{ PushEvent, Target };
use messaging_hub::server::api::{ router, AppState };
use messaging_hub::server::auth::SessionSigner;
use messaging_hub::server::registry::ConnectionRegistry;
use messaging_hub::server::service::MessagingService;
use messaging_hub::server::websocket::{ serve_push_channel, PushContext };
use messaging_hub::store::RemoteMessageStore;

fn limiter() -> Arc<DefaultDirectRateLimiter> {
    Arc::new(RateLimiter::direct(Quota::per_second(NonZeroU32::new(100).unwrap())))
}

async fn start_push_server(registry: Arc<ConnectionRegistry>, signer: SessionSigner) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let context = PushContext { registry, signer };
    tokio::spawn(async move {
        let _ = serve_push_channel(listener, context, None, limiter()).await;
    });
    addr
}

async fn start_http_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[tokio::test]
async fn committed_messages_are_pushed_to_connected_sockets() {
    let registry = ConnectionRegistry::new();
    let service = MessagingService::new(seeded_store(), registry.clone(), 20);
    let addr = start_push_server(registry.clone(), SessionSigner::new(None, 3600)).await;

    let (mut socket, _) = connect_async(format!("ws://{}/?token=bob", addr)).await.unwrap();
    assert!(eventually(|| registry.connection_count("bob") == 1).await);

    let stored = service.send("alice", &Target::Direct("bob".into()), "are you coming?").await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next()).await
        .expect("frame in time")
        .expect("socket open")
        .unwrap();
    let text = match frame {
        WsMessage::Text(text) => text,
        other => panic!("expected a text frame, got {:?}", other),
    };
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["type"], "new_message");
    match serde_json::from_str::<PushEvent>(&text).unwrap() {
        PushEvent::NewMessage { message } => assert_eq!(message.id, stored.id),
        other => panic!("unexpected event {:?}", other),
    }

    socket.close(None).await.unwrap();
    assert!(eventually(|| registry.connection_count("bob") == 0).await);
}

#[tokio::test]
async fn handshakes_without_a_valid_session_are_refused() {
    let registry = ConnectionRegistry::new();
    let signer = SessionSigner::new(Some("s3cret".into()), 3600);
    let token = signer.issue("carol").unwrap();
    let addr = start_push_server(registry.clone(), signer).await;

    assert!(connect_async(format!("ws://{}/", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/?token=carol", addr)).await.is_err());

    let (_socket, _) = connect_async(format!("ws://{}/?token={}", addr, token)).await.unwrap();
    assert!(eventually(|| registry.connection_count("carol") == 1).await);
}

#[tokio::test]
async fn remote_client_follows_pushes_from_the_server() {
    let registry = ConnectionRegistry::new();
    let signer = SessionSigner::new(None, 3600);
    let service = MessagingService::new(seeded_store(), registry.clone(), 20);
    let http = start_http_server(AppState { service: service.clone(), signer: signer.clone() }).await;
    let push = start_push_server(registry.clone(), signer).await;

    let store = Arc::new(RemoteMessageStore::new(&format!("http://{}", http), "bob", "bob"));
    let bob = Arc::new(MessagingClient::new(store, user("bob"), 20));
    let mut channel = PushChannel::spawn(PushChannelConfig::new(&format!("ws://{}", push), "bob"), bob.clone());
    assert!(tokio::time::timeout(Duration::from_secs(5), channel.wait_for(ChannelStatus::Connected)).await.unwrap());
    assert!(eventually(|| registry.connection_count("bob") == 1).await);

    let group = Target::Group("g1".into());
    bob.open_conversation(&group).await.unwrap();

    service.send("alice", &group, "bring gloves").await.unwrap();
    service.send("carol", &group, "and bags").await.unwrap();

    assert!(eventually(|| contents(&bob.get_cached_messages(&group)) == vec!["bring gloves", "and bags"]).await);
    assert!(
        eventually(|| {
            bob.conversation_list()
                .first()
                .map_or(false, |s| s.unread_count == 2)
        }).await
    );

    // Sending through the client goes over HTTP and comes back as a push.
    let stored = bob.send_message(&group, "on my way").await.unwrap();
    assert!(eventually(|| bob.get_cached_messages(&group).last().map(|m| m.id.clone()) == Some(stored.id.clone())).await);
    assert_eq!(channel.status(), ChannelStatus::Connected);
}

#[tokio::test]
async fn dropped_channels_reconnect_and_catch_up() {
    let registry = ConnectionRegistry::new();
    let signer = SessionSigner::new(None, 3600);
    let service = MessagingService::new(seeded_store(), registry.clone(), 20);
    let http = start_http_server(AppState { service: service.clone(), signer: signer.clone() }).await;
    let push = start_push_server(registry.clone(), signer).await;

    let store = Arc::new(RemoteMessageStore::new(&format!("http://{}", http), "bob", "bob"));
    let bob = Arc::new(MessagingClient::new(store, user("bob"), 20));
    let mut config = PushChannelConfig::new(&format!("ws://{}", push), "bob");
    config.initial_backoff = Duration::from_millis(400);
    let mut channel = PushChannel::spawn(config, bob.clone());
    assert!(tokio::time::timeout(Duration::from_secs(5), channel.wait_for(ChannelStatus::Connected)).await.unwrap());
    assert!(eventually(|| registry.connection_count("bob") == 1).await);

    let group = Target::Group("g1".into());
    bob.open_conversation(&group).await.unwrap();

    assert_eq!(registry.disconnect_user("bob"), 1);
    assert!(tokio::time::timeout(Duration::from_secs(2), channel.wait_for(ChannelStatus::Disconnected)).await.unwrap());

    // Nobody is listening for bob, so this one is never pushed to him.
    assert_eq!(registry.connection_count("bob"), 0);
    service.send("alice", &group, "sent while away").await.unwrap();

    assert!(tokio::time::timeout(Duration::from_secs(5), channel.wait_for(ChannelStatus::Connected)).await.unwrap());
    assert!(eventually(|| registry.connection_count("bob") == 1).await);
    assert!(eventually(|| contents(&bob.get_cached_messages(&group)) == vec!["sent while away"]).await);
    assert!(
        eventually(|| {
            bob.conversation_list()
                .first()
                .map_or(false, |s| s.unread_count == 1)
        }).await
    );
}
