//! CAP negotiation: LS, atomic REQ, LIST, END gating registration.

mod common;

use common::{TestClient, TestServer};

#[tokio::test]
async fn ls_advertises_the_registry() -> anyhow::Result<()> {
    let server = TestServer::spawn(16821).await?;
    let mut cli = TestClient::connect(&server.addr()).await?;

    cli.send_raw("CAP LS 302").await?;
    let reply = cli.recv_until(|m| m.verb == "CAP").await?;
    let ls = reply.last().unwrap();
    assert_eq!(ls.params[1], "LS");
    let tokens = ls.params.last().unwrap();
    for expected in ["sasl=PLAIN", "away-notify", "echo-message", "server-time"] {
        assert!(tokens.contains(expected), "missing {expected} in {tokens}");
    }
    Ok(())
}

#[tokio::test]
async fn req_is_atomic_and_nak_echoes_batch() -> anyhow::Result<()> {
    let server = TestServer::spawn(16822).await?;
    let mut cli = TestClient::connect(&server.addr()).await?;

    cli.send_raw("CAP REQ :away-notify no-such-cap").await?;
    let reply = cli.recv_until(|m| m.verb == "CAP").await?;
    let nak = reply.last().unwrap();
    assert_eq!(nak.params[1], "NAK");
    // the original argument comes back, trailing space preserved
    assert_eq!(nak.params[2], "away-notify no-such-cap ");

    // nothing applied: LIST is empty
    cli.send_raw("CAP LIST").await?;
    let reply = cli.recv_until(|m| m.verb == "CAP" && m.params[1] == "LIST").await?;
    assert_eq!(reply.last().unwrap().params[2], "");
    Ok(())
}

#[tokio::test]
async fn req_ack_applies_batch_with_trailing_space() -> anyhow::Result<()> {
    let server = TestServer::spawn(16823).await?;
    let mut cli = TestClient::connect(&server.addr()).await?;

    cli.send_raw("CAP REQ :away-notify echo-message").await?;
    let reply = cli.recv_until(|m| m.verb == "CAP").await?;
    let ack = reply.last().unwrap();
    assert_eq!(ack.params[1], "ACK");
    assert_eq!(ack.params[2], "away-notify echo-message ");

    cli.send_raw("CAP LIST").await?;
    let reply = cli.recv_until(|m| m.verb == "CAP" && m.params[1] == "LIST").await?;
    let listed = reply.last().unwrap().params[2].clone();
    assert!(listed.contains("away-notify"));
    assert!(listed.contains("echo-message"));

    // removal with the - prefix
    cli.send_raw("CAP REQ :-away-notify").await?;
    let reply = cli.recv_until(|m| m.verb == "CAP").await?;
    assert_eq!(reply.last().unwrap().params[1], "ACK");
    cli.send_raw("CAP LIST").await?;
    let reply = cli.recv_until(|m| m.verb == "CAP" && m.params[1] == "LIST").await?;
    assert!(!reply.last().unwrap().params[2].contains("away-notify"));
    Ok(())
}

#[tokio::test]
async fn negotiation_holds_registration_until_end() -> anyhow::Result<()> {
    let server = TestServer::spawn(16824).await?;
    let mut cli = TestClient::connect(&server.addr()).await?;

    cli.send_raw("CAP LS 302").await?;
    cli.send_raw("NICK alice").await?;
    cli.send_raw("USER a 0 * :Alice").await?;

    // no 001 while CAP is open
    let pre_end = cli
        .recv_until(|m| m.verb == "CAP")
        .await?;
    assert!(pre_end.iter().all(|m| m.verb != "001"));

    cli.send_raw("CAP END").await?;
    cli.recv_until(|m| m.verb == "001").await?;
    Ok(())
}

#[tokio::test]
async fn echo_message_returns_copy_to_sender() -> anyhow::Result<()> {
    let server = TestServer::spawn(16825).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    let mut bob = TestClient::connect(&server.addr()).await?;

    alice.send_raw("CAP REQ :echo-message").await?;
    alice.recv_until(|m| m.verb == "CAP").await?;
    alice.send_raw("CAP END").await?;
    alice.register_and_join("alice", "#chan").await?;
    bob.register_and_join("bob", "#chan").await?;
    alice.recv_until(|m| m.verb == "JOIN").await?;

    alice.send_raw("PRIVMSG #chan :echoed").await?;
    let echoed = alice.recv_until(|m| m.verb == "PRIVMSG").await?;
    assert_eq!(echoed.last().unwrap().params[1], "echoed");

    let relayed = bob.recv_until(|m| m.verb == "PRIVMSG").await?;
    assert_eq!(relayed.last().unwrap().params[1], "echoed");
    Ok(())
}
