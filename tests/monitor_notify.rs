//! MONITOR list maintenance and presence notifications.

mod common;

use common::{TestClient, TestServer};

#[tokio::test]
async fn watcher_sees_target_come_online_and_go_offline() -> anyhow::Result<()> {
    let server = TestServer::spawn(16831).await?;
    let mut bob = TestClient::connect(&server.addr()).await?;
    bob.register("bob").await?;

    bob.send_raw("MONITOR + alice").await?;
    let reply = bob.recv_until(|m| m.verb == "731").await?;
    assert_eq!(reply.last().unwrap().params, vec!["bob".to_string(), "alice".into()]);

    let mut alice = TestClient::connect(&server.addr()).await?;
    alice.register("alice").await?;

    let online = bob.recv_until(|m| m.verb == "730").await?;
    let notify = online.last().unwrap();
    assert_eq!(notify.source.as_deref(), Some("irc.example"));
    assert_eq!(notify.params, vec!["bob".to_string(), "alice".into()]);

    alice.send_raw("QUIT :done").await?;
    let offline = bob.recv_until(|m| m.verb == "731").await?;
    assert_eq!(offline.last().unwrap().params[1], "alice");
    Ok(())
}

#[tokio::test]
async fn list_and_status_subcommands() -> anyhow::Result<()> {
    let server = TestServer::spawn(16832).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    let mut bob = TestClient::connect(&server.addr()).await?;
    alice.register("alice").await?;
    bob.register("bob").await?;

    bob.send_raw("MONITOR + alice,carol").await?;
    let added = bob.recv_until(|m| m.verb == "731").await?;
    assert!(added.iter().any(|m| m.verb == "730" && m.params[1] == "alice"));
    assert!(added.iter().any(|m| m.verb == "731" && m.params[1] == "carol"));

    bob.send_raw("MONITOR L").await?;
    let listed = bob.recv_until(|m| m.verb == "733").await?;
    let entries = &listed.iter().find(|m| m.verb == "732").unwrap().params[1];
    assert!(entries.contains("alice") && entries.contains("carol"));

    bob.send_raw("MONITOR S").await?;
    let status = bob.recv_until(|m| m.verb == "731").await?;
    assert!(status.iter().any(|m| m.verb == "730" && m.params[1] == "alice"));

    // removal stops notifications
    bob.send_raw("MONITOR - alice").await?;
    bob.send_raw("MONITOR L").await?;
    let listed = bob.recv_until(|m| m.verb == "733").await?;
    let entries = &listed.iter().find(|m| m.verb == "732").unwrap().params[1];
    assert!(!entries.contains("alice"));
    Ok(())
}
