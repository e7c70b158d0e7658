//! Reconnect, login and subscription replay.

mod common;

use common::{snapshot_frame, test_config, wait_until, MockVenue};
use hitbtc_replica::client::ConnectionState;
use hitbtc_replica::config::Credentials;
use hitbtc_replica::{Error, ReplicaClient};
use serde_json::Value;

fn targets(frames: &[Value]) -> Vec<(String, Value)> {
    frames
        .iter()
        .map(|f| (f["method"].as_str().unwrap().to_string(), f["params"].clone()))
        .collect()
}

fn ids(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_replay_after_disconnect() {
    let venue = MockVenue::new();
    let client = ReplicaClient::new(test_config()).unwrap();
    client.run(venue.connector()).unwrap();
    wait_until(|| client.state() == ConnectionState::Connected).await;

    client.subscribe_book("ETHBTC").await.unwrap();
    client.subscribe_ticker("BTCUSD").await.unwrap();
    client.subscribe_reports().await.unwrap();
    wait_until(|| venue.sent(0).len() == 3).await;

    venue.disconnect();
    wait_until(|| venue.connections() == 2 && venue.sent(1).len() == 3).await;
    wait_until(|| client.state() == ConnectionState::Connected).await;

    let first = venue.sent(0);
    let second = venue.sent(1);
    assert_eq!(targets(&first), targets(&second));
    for (a, b) in ids(&first).iter().zip(ids(&second).iter()) {
        assert_ne!(a, b);
        assert_eq!(b.len(), 32);
    }

    client.shutdown().await;
}

#[tokio::test]
async fn test_books_survive_reconnect() {
    let venue = MockVenue::new();
    let client = ReplicaClient::new(test_config()).unwrap();
    client.run(venue.connector()).unwrap();
    wait_until(|| client.state() == ConnectionState::Connected).await;

    venue.push(snapshot_frame("ETHBTC", 7, &[("1", "1")], &[("0.9", "1")]));
    wait_until(|| client.book("ETHBTC").is_some()).await;

    venue.disconnect();
    wait_until(|| venue.connections() == 2).await;
    // Last known book stays readable until a new snapshot replaces it
    assert_eq!(client.books().sequence("ETHBTC"), Some(7));

    wait_until(|| client.state() == ConnectionState::Connected).await;
    venue.push(snapshot_frame("ETHBTC", 3, &[("2", "1")], &[("1.9", "1")]));
    wait_until(|| client.books().sequence("ETHBTC") == Some(3)).await;

    client.shutdown().await;
}

#[tokio::test]
async fn test_login_precedes_replay() {
    let venue = MockVenue::new();
    let config = test_config().with_credentials(Credentials::new("api-key", "secret"));
    let client = ReplicaClient::new(config).unwrap();

    // Recorded before the first connect
    client.subscribe_book("ETHBTC").await.unwrap();
    client.subscribe_book("LTCBTC").await.unwrap();
    client.run(venue.connector()).unwrap();

    wait_until(|| client.state() == ConnectionState::Connected).await;
    wait_until(|| venue.sent(0).len() >= 3).await;
    // Give any duplicate sends a chance to show up
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let sent = venue.sent(0);
    assert_eq!(sent.len(), 3, "queued subscriptions must not be sent twice");
    assert_eq!(sent[0]["method"], "login");
    assert_eq!(sent[0]["params"]["algo"], "HS256");
    assert_eq!(sent[0]["params"]["pKey"], "api-key");
    assert_eq!(sent[1]["params"]["symbol"], "ETHBTC");
    assert_eq!(sent[2]["params"]["symbol"], "LTCBTC");

    venue.disconnect();
    wait_until(|| venue.sent(1).len() == 3).await;
    let again = venue.sent(1);
    assert_eq!(again[0]["method"], "login");
    // Fresh nonce per login
    assert_ne!(again[0]["params"]["nonce"], sent[0]["params"]["nonce"]);

    client.shutdown().await;
}

#[tokio::test]
async fn test_replay_failure_restarts_cycle() {
    let venue = MockVenue::new();
    let client = ReplicaClient::new(test_config()).unwrap();
    for symbol in ["A", "B", "C"] {
        client.subscribe_book(symbol).await.unwrap();
    }
    client.run(venue.connector()).unwrap();
    wait_until(|| venue.sent(0).len() == 3).await;

    // Next connection dies after one replayed subscription
    venue.fail_next_session_after(1);
    venue.disconnect();

    wait_until(|| venue.connections() == 3 && venue.sent(2).len() == 3).await;
    wait_until(|| client.state() == ConnectionState::Connected).await;

    assert_eq!(venue.sent(1).len(), 1);
    let symbols: Vec<Value> = venue
        .sent(2)
        .iter()
        .map(|f| f["params"]["symbol"].clone())
        .collect();
    assert_eq!(symbols, vec!["A", "B", "C"]);

    client.shutdown().await;
}

#[tokio::test]
async fn test_refused_connects_are_retried() {
    let venue = MockVenue::new();
    venue.refuse_next_connects(3);

    let client = ReplicaClient::new(test_config()).unwrap();
    let mut states = client.state_changes();
    client.run(venue.connector()).unwrap();

    wait_until(|| client.state() == ConnectionState::Connected).await;
    assert_eq!(venue.attempts(), 4);
    assert_eq!(venue.connections(), 1);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let venue = MockVenue::new();
    let client = ReplicaClient::new(test_config()).unwrap();
    client.run(venue.connector()).unwrap();
    wait_until(|| client.state() == ConnectionState::Connected).await;

    client.shutdown().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.subscribe_book("ETHBTC").await,
        Err(Error::NotRunning)
    ));
    // A second start is refused
    assert!(matches!(
        client.run(venue.connector()),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_many_subscriptions_before_run_replay_once() {
    let venue = MockVenue::new();
    let config = test_config().with_queue_capacities(200, 100, 16);
    let client = ReplicaClient::new(config).unwrap();

    let symbols: Vec<String> = (0..300).map(|i| format!("SYM{i}")).collect();
    let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
    tokio::time::timeout(std::time::Duration::from_secs(2), client.subscribe_books(&refs))
        .await
        .expect("subscribe_books blocked before run")
        .unwrap();

    client.run(venue.connector()).unwrap();
    wait_until(|| client.state() == ConnectionState::Connected).await;
    wait_until(|| venue.sent(0).len() >= 300).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let sent: Vec<Value> = venue
        .sent(0)
        .iter()
        .map(|f| f["params"]["symbol"].clone())
        .collect();
    let expected: Vec<Value> = symbols.iter().map(|s| Value::from(s.as_str())).collect();
    assert_eq!(sent, expected);

    // Added while connected: sent once, under the id the caller got back
    let id = client.subscribe_book("LATE").await.unwrap();
    wait_until(|| venue.sent(0).len() == 301).await;
    assert_eq!(venue.sent(0)[300]["id"], id.as_str());

    client.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_during_outage_does_not_block() {
    let venue = MockVenue::new();
    let config = test_config().with_queue_capacities(200, 100, 4);
    let client = ReplicaClient::new(config).unwrap();
    client.run(venue.connector()).unwrap();
    wait_until(|| client.state() == ConnectionState::Connected).await;

    venue.refuse_next_connects(5);
    venue.disconnect();
    wait_until(|| client.state() != ConnectionState::Connected).await;

    let symbols: Vec<String> = (0..20).map(|i| format!("SYM{i}")).collect();
    let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
    tokio::time::timeout(std::time::Duration::from_secs(1), client.subscribe_books(&refs))
        .await
        .expect("subscribe_books blocked during an outage")
        .unwrap();

    wait_until(|| venue.connections() == 2 && venue.sent(1).len() == 20).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(venue.sent(1).len(), 20);

    client.shutdown().await;
}
