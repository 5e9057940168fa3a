//! Client flows against a live relay on a loopback port.

use std::sync::Arc;
use std::time::Duration;

use mibiri_cli::flows::{self, ListenConfig};
use mibiri_cli::{OpenError, RelayClient, SendError};
use mibiri_common::helpers::ServerAddr;
use mibiri_common::Request;
use mibiri_crypto::{encrypt, CryptoError, Profile};
use mibiri_relay::{Relay, RelayConfig, Store};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestRelay {
    addr: ServerAddr,
    store: Arc<RwLock<Store>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<mibiri_common::Result<()>>,
}

impl TestRelay {
    async fn start(strict_sender: bool) -> Self {
        let config = RelayConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            strict_sender,
            ..RelayConfig::default()
        };
        let relay = Relay::bind(&config).await.unwrap();
        let local = relay.local_addr().unwrap();
        let store = relay.store();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(relay.run(rx));

        Self {
            addr: ServerAddr {
                host: local.ip().to_string(),
                port: local.port(),
            },
            store,
            shutdown: Some(tx),
            handle,
        }
    }

    async fn client(&self) -> RelayClient {
        RelayClient::connect(&self.addr, TIMEOUT).await.unwrap()
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

async fn registered(relay: &TestRelay, username: &str) -> Profile {
    let profile = Profile::generate(username).unwrap();
    let mut client = relay.client().await;
    flows::register(&mut client, &profile).await.unwrap();
    profile
}

#[tokio::test]
async fn test_alice_sends_bob_hi() {
    let relay = TestRelay::start(false).await;
    let alice = registered(&relay, "alice").await;
    let bob = registered(&relay, "bob").await;

    let mut client = relay.client().await;
    flows::send(&mut client, &alice, "bob", "hi").await.unwrap();
    assert_eq!(relay.store.read().await.pending("bob"), 1);

    let mut client = relay.client().await;
    let entries = flows::inbox(&mut client, &bob).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].from, "alice");
    assert_eq!(
        entries[0].sender_public_key,
        alice.keypair.public_key().to_base64()
    );
    assert_eq!(entries[0].result.as_deref().ok(), Some("hi"));
    assert_eq!(entries[0].to_string(), "alice: hi");

    let entries = flows::inbox(&mut client, &bob).await.unwrap();
    assert!(entries.is_empty());

    relay.stop().await;
}

#[tokio::test]
async fn test_send_to_unknown_recipient() {
    let relay = TestRelay::start(false).await;
    let alice = registered(&relay, "alice").await;

    let mut client = relay.client().await;
    let err = flows::send(&mut client, &alice, "ghost", "hello?")
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::RecipientUnknown(ref name) if name == "ghost"));

    let store = relay.store.read().await;
    assert!(store.lookup("ghost").is_none());
    assert_eq!(store.pending("ghost"), 0);
    assert_eq!(store.stats().queued, 0);
    drop(store);

    relay.stop().await;
}

#[tokio::test]
async fn test_reregister_replaces_key() {
    let relay = TestRelay::start(false).await;
    let alice = registered(&relay, "alice").await;
    let old_bob = registered(&relay, "bob").await;
    let new_bob = registered(&relay, "bob").await;

    let mut client = relay.client().await;
    let key = client.get_pubkey("bob").await.unwrap().unwrap();
    assert_eq!(key, new_bob.keypair.public_key());
    assert_ne!(key, old_bob.keypair.public_key());

    flows::send(&mut client, &alice, "bob", "new key").await.unwrap();

    // The old key can no longer read what arrives
    let entries = flows::inbox(&mut client, &old_bob).await.unwrap();
    assert!(matches!(
        entries[0].result,
        Err(OpenError::Crypto(CryptoError::DecryptionFailed))
    ));

    flows::send(&mut client, &alice, "bob", "again").await.unwrap();
    let entries = flows::inbox(&mut client, &new_bob).await.unwrap();
    assert_eq!(entries[0].result.as_deref().ok(), Some("again"));

    relay.stop().await;
}

#[tokio::test]
async fn test_ping() {
    let relay = TestRelay::start(false).await;

    let mut client = relay.client().await;
    let rtt = flows::ping(&mut client).await.unwrap();
    assert!(rtt < TIMEOUT);

    let response = client.request(&Request::Ping).await.unwrap();
    assert!(response.ok);
    assert_eq!(response.pong, Some(true));

    relay.stop().await;
}

#[tokio::test]
async fn test_one_bad_message_does_not_spoil_batch() {
    let relay = TestRelay::start(false).await;
    let alice = registered(&relay, "alice").await;
    let bob = registered(&relay, "bob").await;
    let eve = Profile::generate("eve").unwrap();

    let mut client = relay.client().await;
    flows::send(&mut client, &alice, "bob", "one").await.unwrap();

    // Eve seals with her own key but claims to be alice
    let forged = encrypt(&eve.keypair, &bob.keypair.public_key(), "two").unwrap();
    let response = client
        .send_ciphertext("alice", "bob", forged, &alice.keypair.public_key())
        .await
        .unwrap();
    assert!(response.ok);

    flows::send(&mut client, &alice, "bob", "three").await.unwrap();

    let entries = flows::inbox(&mut client, &bob).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].result.as_deref().ok(), Some("one"));
    assert!(entries[1].result.is_err());
    assert!(entries[1]
        .to_string()
        .starts_with("Failed to decrypt from alice"));
    assert_eq!(entries[2].result.as_deref().ok(), Some("three"));

    relay.stop().await;
}

#[tokio::test]
async fn test_listen_delivers_then_stops() {
    let relay = TestRelay::start(false).await;
    let alice = registered(&relay, "alice").await;
    let bob = registered(&relay, "bob").await;

    let (entry_tx, mut entry_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();
    let addr = relay.addr.clone();
    let config = ListenConfig {
        interval: Duration::from_millis(50),
        request_timeout: TIMEOUT,
    };
    let listener = tokio::spawn(async move {
        flows::listen(&addr, &bob, config, stop_rx, |entry| {
            let _ = entry_tx.send(entry);
        })
        .await
    });

    let mut client = relay.client().await;
    flows::send(&mut client, &alice, "bob", "are you there").await.unwrap();

    let entry = tokio::time::timeout(TIMEOUT, entry_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.from, "alice");
    assert_eq!(entry.result.as_deref().ok(), Some("are you there"));

    stop_tx.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, listener)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(relay.store.read().await.pending("bob"), 0);

    relay.stop().await;
}

#[tokio::test]
async fn test_listen_fails_when_relay_unreachable() {
    let relay = TestRelay::start(false).await;
    let addr = relay.addr.clone();
    relay.stop().await;

    let bob = Profile::generate("bob").unwrap();
    let (_stop_tx, stop_rx) = oneshot::channel();
    let result = flows::listen(
        &addr,
        &bob,
        ListenConfig {
            interval: Duration::from_millis(50),
            request_timeout: TIMEOUT,
        },
        stop_rx,
        |_| {},
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_strict_sender_rejects_impersonation() {
    let relay = TestRelay::start(true).await;
    let alice = registered(&relay, "alice").await;
    registered(&relay, "bob").await;

    let mallory = Profile::generate("alice").unwrap();
    let mut client = relay.client().await;
    let err = flows::send(&mut client, &mallory, "bob", "trust me")
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::Rejected(ref code) if code == "sender_key_mismatch"));
    assert_eq!(relay.store.read().await.pending("bob"), 0);

    flows::send(&mut client, &alice, "bob", "really me").await.unwrap();
    assert_eq!(relay.store.read().await.pending("bob"), 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_many_requests_on_one_connection() {
    let relay = TestRelay::start(false).await;
    let alice = Profile::generate("alice").unwrap();

    let mut client = relay.client().await;
    flows::register(&mut client, &alice).await.unwrap();
    flows::ping(&mut client).await.unwrap();
    assert_eq!(
        client.get_pubkey("alice").await.unwrap(),
        Some(alice.keypair.public_key())
    );
    assert_eq!(client.get_pubkey("nobody").await.unwrap(), None);
    flows::send(&mut client, &alice, "alice", "note to self")
        .await
        .unwrap();

    let entries = flows::inbox(&mut client, &alice).await.unwrap();
    assert_eq!(entries[0].result.as_deref().ok(), Some("note to self"));

    relay.stop().await;
}

#[tokio::test]
async fn test_saved_profile_registers_and_reads() {
    let relay = TestRelay::start(false).await;
    let dir = tempfile::tempdir().unwrap();

    Profile::generate("carol").unwrap().save(dir.path()).unwrap();
    let carol = Profile::load(dir.path(), "carol").unwrap();
    let dave = registered(&relay, "dave").await;

    let mut client = relay.client().await;
    flows::register(&mut client, &carol).await.unwrap();
    flows::send(&mut client, &dave, "carol", "saved").await.unwrap();

    let reloaded = Profile::load(dir.path(), "carol").unwrap();
    let entries = flows::inbox(&mut client, &reloaded).await.unwrap();
    assert_eq!(entries[0].result.as_deref().ok(), Some("saved"));

    relay.stop().await;
}
