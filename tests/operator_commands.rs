//! OPER, KILL, and the user-visible queries around them.

mod common;

use common::{TestClient, TestServer};

#[tokio::test]
async fn oper_auth_and_kill() -> anyhow::Result<()> {
    let server = TestServer::spawn(16881).await?;
    let mut root = TestClient::connect(&server.addr()).await?;
    let mut victim = TestClient::connect(&server.addr()).await?;
    root.register("root").await?;
    victim.register("victim").await?;

    // wrong password: indistinguishable 464
    root.send_raw("OPER root wrongpass").await?;
    root.recv_until(|m| m.verb == "464").await?;

    // KILL before opering is refused
    root.send_raw("KILL victim :abuse").await?;
    root.recv_until(|m| m.verb == "481").await?;

    root.send_raw("OPER root opersecret").await?;
    let opered = root.recv_until(|m| m.verb == "381").await?;
    assert_eq!(
        opered.last().unwrap().params[1],
        "You are now an IRC operator"
    );

    root.send_raw("KILL irc.example :server").await?;
    root.recv_until(|m| m.verb == "483").await?;

    root.send_raw("KILL victim :abuse").await?;
    let killed = victim.recv_until(|m| m.verb == "KILL").await?;
    assert_eq!(killed.last().unwrap().params[1], "abuse");

    // the victim is gone from the nick index
    root.send_raw("WHOIS victim").await?;
    root.recv_until(|m| m.verb == "401").await?;
    Ok(())
}

#[tokio::test]
async fn whois_shows_oper_role_and_who_filters_opers() -> anyhow::Result<()> {
    let server = TestServer::spawn(16882).await?;
    let mut root = TestClient::connect(&server.addr()).await?;
    let mut bob = TestClient::connect(&server.addr()).await?;
    root.register("root").await?;
    bob.register("bob").await?;

    root.send_raw("OPER root opersecret").await?;
    root.recv_until(|m| m.verb == "381").await?;

    bob.send_raw("WHOIS root").await?;
    let whois = bob.recv_until(|m| m.verb == "318").await?;
    let oper_line = whois.iter().find(|m| m.verb == "313").expect("313");
    assert_eq!(oper_line.params[2], "is a server administrator.");

    // WHO with the o flag only lists opers
    bob.send_raw("JOIN #ops").await?;
    bob.recv_until(|m| m.verb == "366").await?;
    root.send_raw("JOIN #ops").await?;
    root.recv_until(|m| m.verb == "366").await?;
    bob.recv_until(|m| m.verb == "JOIN").await?;

    bob.send_raw("WHO #ops o").await?;
    let who = bob.recv_until(|m| m.verb == "315").await?;
    let rows: Vec<_> = who.iter().filter(|m| m.verb == "352").collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].params[5], "root");
    assert!(rows[0].params[6].contains('*'), "oper status flag");
    Ok(())
}

#[tokio::test]
async fn ison_and_user_modes() -> anyhow::Result<()> {
    let server = TestServer::spawn(16883).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    let mut bob = TestClient::connect(&server.addr()).await?;
    alice.register("alice").await?;
    bob.register("bob").await?;

    alice.send_raw("ISON bob nosuch alice").await?;
    let ison = alice.recv_until(|m| m.verb == "303").await?;
    assert_eq!(ison.last().unwrap().params[1], "bob alice ");

    alice.send_raw("MODE alice +iw").await?;
    let echo = alice.recv_until(|m| m.verb == "MODE").await?;
    assert_eq!(echo.last().unwrap().params[1], "+iw");

    alice.send_raw("MODE alice").await?;
    let modes = alice.recv_until(|m| m.verb == "221").await?;
    assert_eq!(modes.last().unwrap().params[1], "+iw");

    // setting +o by hand is ignored, unknown flags draw 501
    alice.send_raw("MODE alice +oz").await?;
    alice.recv_until(|m| m.verb == "501").await?;
    alice.send_raw("MODE alice").await?;
    let modes = alice.recv_until(|m| m.verb == "221").await?;
    assert_eq!(modes.last().unwrap().params[1], "+iw");

    alice.send_raw("MODE bob +i").await?;
    alice.recv_until(|m| m.verb == "502").await?;
    Ok(())
}
