//! METADATA set/get/list/clear and away interactions.

mod common;

use common::{TestClient, TestServer};

#[tokio::test]
async fn set_then_get_roundtrip() -> anyhow::Result<()> {
    let server = TestServer::spawn(16861).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    alice.register("alice").await?;

    alice.send_raw("METADATA * SET url :https://example.org").await?;
    let set = alice.recv_until(|m| m.verb == "762").await?;
    let kv = set.iter().find(|m| m.verb == "761").expect("761");
    assert_eq!(kv.params[1], "*");
    assert_eq!(kv.params[2], "url");
    assert_eq!(kv.params[3], "*");
    assert_eq!(kv.params[4], "https://example.org");

    alice.send_raw("METADATA * GET url").await?;
    let get = alice.recv_until(|m| m.verb == "762").await?;
    let kv = get.iter().find(|m| m.verb == "761").expect("761");
    assert_eq!(kv.params[4], "https://example.org");

    // unsetting: SET with no value
    alice.send_raw("METADATA * SET url").await?;
    alice.recv_until(|m| m.verb == "762").await?;
    alice.send_raw("METADATA * GET url").await?;
    let gone = alice.recv_until(|m| m.verb == "762").await?;
    assert!(gone.iter().any(|m| m.verb == "766"));
    Ok(())
}

#[tokio::test]
async fn invalid_keys_and_targets_are_rejected() -> anyhow::Result<()> {
    let server = TestServer::spawn(16862).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    alice.register("alice").await?;

    alice.send_raw("METADATA * SET bad-key value").await?;
    alice.recv_until(|m| m.verb == "767").await?;

    alice.send_raw("METADATA nobody GET url").await?;
    alice.recv_until(|m| m.verb == "765").await?;

    // editing someone else without a role grant
    let mut bob = TestClient::connect(&server.addr()).await?;
    bob.register("bob").await?;
    alice.send_raw("METADATA bob SET url :x").await?;
    alice.recv_until(|m| m.verb == "769").await?;
    Ok(())
}

#[tokio::test]
async fn clear_erases_listed_keys() -> anyhow::Result<()> {
    let server = TestServer::spawn(16863).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    alice.register("alice").await?;

    alice.send_raw("METADATA * SET url :https://example.org").await?;
    alice.recv_until(|m| m.verb == "762").await?;
    alice.send_raw("METADATA * SET status :around").await?;
    alice.recv_until(|m| m.verb == "762").await?;

    alice.send_raw("METADATA * LIST").await?;
    let listed = alice.recv_until(|m| m.verb == "762").await?;
    assert_eq!(listed.iter().filter(|m| m.verb == "761").count(), 2);

    alice.send_raw("METADATA * CLEAR").await?;
    let cleared = alice.recv_until(|m| m.verb == "762").await?;
    assert_eq!(cleared.iter().filter(|m| m.verb == "761").count(), 2);

    alice.send_raw("METADATA * LIST").await?;
    let empty = alice.recv_until(|m| m.verb == "762").await?;
    assert_eq!(empty.iter().filter(|m| m.verb == "761").count(), 0);
    Ok(())
}

#[tokio::test]
async fn away_sets_metadata_and_replies_to_privmsg() -> anyhow::Result<()> {
    let server = TestServer::spawn(16864).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    let mut bob = TestClient::connect(&server.addr()).await?;
    alice.register("alice").await?;
    bob.register("bob").await?;

    alice.send_raw("AWAY :gone for lunch").await?;
    alice.recv_until(|m| m.verb == "306").await?;

    bob.send_raw("PRIVMSG alice :ping").await?;
    let reply = bob.recv_until(|m| m.verb == "301").await?;
    let away = reply.last().unwrap();
    assert_eq!(away.params[1], "alice");
    assert_eq!(away.params[2], "gone for lunch");

    // the away message is plain metadata
    bob.send_raw("METADATA alice GET away").await?;
    let get = bob.recv_until(|m| m.verb == "762").await?;
    assert_eq!(get.iter().find(|m| m.verb == "761").unwrap().params[4], "gone for lunch");

    alice.send_raw("AWAY").await?;
    alice.recv_until(|m| m.verb == "305").await?;
    Ok(())
}
