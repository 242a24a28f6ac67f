//! Full-loop test: a page-side provider wired to the background relay
//! through envelope channels, the way a content-script bridge connects
//! the two in a browser.

mod common;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_test::assert_ok;

use bananokit_core::{
    engine::{MessageDisplay, WalletEngine},
    error::WalletError,
    provider::Provider,
    relay::{RelayRequest, RequestRelay},
    wire::RequestEnvelope,
};

const ORIGIN: &str = "https://game.example";

/// Wires a provider to the relay: requests flow through the channel with
/// the bridge-stamped origin, responses and events flow back through
/// `handle_message`.
fn bridge(relay: Arc<RequestRelay>) -> Arc<Provider> {
    let (tx, mut rx) = mpsc::unbounded_channel::<RequestEnvelope>();
    let provider = Arc::new(Provider::new(tx));

    let request_side = provider.clone();
    let request_relay = relay.clone();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let request = RelayRequest::from_envelope(envelope, ORIGIN);
            let response = request_relay.handle(request).await;
            let value = serde_json::to_value(&response).expect("serialize response");
            request_side.handle_message(&value);
        }
    });

    let event_side = provider.clone();
    tokio::spawn(async move {
        let mut events = relay.subscribe(ORIGIN).await;
        while let Ok(event) = events.recv().await {
            let value = serde_json::to_value(&event).expect("serialize event");
            event_side.handle_message(&value);
        }
    });

    provider
}

#[tokio::test]
async fn test_connect_sign_verify_round_trip() {
    common::init_tracing();
    let server = mockito::Server::new_async().await;
    let (engine, storage) = common::engine_with_endpoint(&server.url());
    let relay = common::relay_over(engine, storage);
    common::auto_approve(relay.clone());

    let provider = bridge(relay.clone());
    assert!(!provider.is_connected());

    let accounts = tokio_test::assert_ok!(provider.connect(false).await);
    assert_eq!(accounts.len(), 1);
    assert!(provider.is_connected());
    assert_eq!(provider.public_key(), Some(accounts[0].clone()));

    let signature = provider
        .sign_message(&accounts[0], "attack at dawn", MessageDisplay::Utf8)
        .await
        .expect("sign");
    assert!(WalletEngine::verify_signed_message(
        &accounts[0],
        "attack at dawn",
        MessageDisplay::Utf8,
        ORIGIN,
        &signature,
    ));
    // The signature is bound to the origin the bridge stamped; another
    // site cannot replay it.
    assert!(!WalletEngine::verify_signed_message(
        &accounts[0],
        "attack at dawn",
        MessageDisplay::Utf8,
        "https://evil.example",
        &signature,
    ));
}

#[tokio::test]
async fn test_only_if_trusted_connect_fails_closed() {
    let server = mockito::Server::new_async().await;
    let (engine, storage) = common::engine_with_endpoint(&server.url());
    let relay = common::relay_over(engine, storage);

    let provider = bridge(relay);
    match provider.connect(true).await {
        Err(WalletError::Unauthorized) => {}
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!provider.is_connected());
}

#[tokio::test]
async fn test_disconnect_event_reaches_page() {
    let server = mockito::Server::new_async().await;
    let (engine, storage) = common::engine_with_endpoint(&server.url());
    let relay = common::relay_over(engine, storage);
    common::auto_approve(relay.clone());

    let provider = bridge(relay.clone());
    provider.connect(false).await.expect("connect");
    assert!(provider.is_connected());

    // The wallet side revokes the grant; the page learns via the
    // disconnect event.
    relay.revoke_permission(ORIGIN).await.expect("revoke");
    for _ in 0..500 {
        if !provider.is_connected() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    assert!(!provider.is_connected());

    match provider.get_accounts().await {
        Err(WalletError::Unauthorized) => {}
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnect_after_approval_skips_prompt() {
    let server = mockito::Server::new_async().await;
    let (engine, storage) = common::engine_with_endpoint(&server.url());
    let relay = common::relay_over(engine, storage);
    common::auto_approve(relay.clone());

    let provider = bridge(relay.clone());
    let first = provider.connect(false).await.expect("connect");

    // A fresh page context for the same origin auto-connects off the
    // stored grant, even with prompting forbidden.
    let fresh = bridge(relay);
    let second = fresh.connect(true).await.expect("reconnect");
    assert_eq!(first, second);
}
