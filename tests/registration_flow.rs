//! Registration lifecycle: welcome burst, ISUPPORT, MOTD, nick collisions.

mod common;

use common::{TestClient, TestServer};

#[tokio::test]
async fn welcome_burst_in_order() -> anyhow::Result<()> {
    let server = TestServer::spawn(16801).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;

    let burst = alice.register("alice").await?;

    let welcome = burst
        .iter()
        .find(|m| m.verb == "001")
        .expect("001 received");
    assert_eq!(welcome.source.as_deref(), Some("irc.example"));
    assert_eq!(welcome.params[0], "alice");
    assert!(
        welcome.params[1].starts_with("Welcome to the ExampleNet IRC Network, alice!a@"),
        "unexpected welcome text: {}",
        welcome.params[1]
    );

    // 001..005 arrive in ascending order before the MOTD
    let order: Vec<&str> = burst
        .iter()
        .filter(|m| matches!(m.verb.as_str(), "001" | "002" | "003" | "004" | "005"))
        .map(|m| m.verb.as_str())
        .collect();
    assert_eq!(&order[..5], &["001", "002", "003", "004", "005"]);

    let isupport = burst.iter().find(|m| m.verb == "005").expect("005");
    let tokens = isupport.params.join(" ");
    for expected in [
        "NETWORK=ExampleNet",
        "CLIENTVER=3.2",
        "CASEMAPPING=ascii",
        "CHARSET=utf-8",
        "SAFELIST",
        "CHANTYPES=#",
        "REGCOMMANDS=CREATE,VERIFY",
    ] {
        assert!(tokens.contains(expected), "missing {expected} in {tokens}");
    }

    assert!(burst.iter().any(|m| m.verb == "375"), "MOTD start");
    assert!(burst.iter().any(|m| m.verb == "376"), "MOTD end");
    Ok(())
}

#[tokio::test]
async fn nickname_in_use_and_erroneous() -> anyhow::Result<()> {
    let server = TestServer::spawn(16802).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    alice.register("alice").await?;

    let mut bob = TestClient::connect(&server.addr()).await?;
    bob.send_raw("NICK alice").await?;
    let reply = bob.recv_until(|m| m.verb == "433").await?;
    assert_eq!(reply.last().unwrap().params[1], "alice");

    bob.send_raw("NICK 1badnick").await?;
    bob.recv_until(|m| m.verb == "432").await?;

    // a valid nick still registers afterwards
    bob.send_raw("NICK bob").await?;
    bob.send_raw("USER b 0 * :Bob").await?;
    bob.recv_until(|m| m.verb == "001").await?;
    Ok(())
}

#[tokio::test]
async fn commands_require_registration() -> anyhow::Result<()> {
    let server = TestServer::spawn(16803).await?;
    let mut cli = TestClient::connect(&server.addr()).await?;

    cli.send_raw("PRIVMSG alice :hi").await?;
    let replies = cli.recv_until(|m| m.verb == "451").await?;
    assert!(replies.iter().any(|m| m.verb == "451"));

    cli.send_raw("BOGUSVERB").await?;
    let replies = cli.recv_until(|m| m.verb == "421").await?;
    assert_eq!(replies.last().unwrap().params[1], "BOGUSVERB");
    Ok(())
}

#[tokio::test]
async fn nick_change_broadcasts_and_updates_whois() -> anyhow::Result<()> {
    let server = TestServer::spawn(16804).await?;
    let mut alice = TestClient::connect(&server.addr()).await?;
    let mut bob = TestClient::connect(&server.addr()).await?;
    alice.register_and_join("alice", "#chan").await?;
    bob.register_and_join("bob", "#chan").await?;
    alice.recv_until(|m| m.verb == "JOIN").await?;

    alice.send_raw("NICK alicia").await?;
    let seen = bob.recv_until(|m| m.verb == "NICK").await?;
    let nick_msg = seen.last().unwrap();
    assert!(nick_msg
        .source
        .as_deref()
        .is_some_and(|s| s.starts_with("alice!")));
    assert_eq!(nick_msg.params[0], "alicia");

    bob.send_raw("WHOIS alicia").await?;
    let whois = bob.recv_until(|m| m.verb == "318").await?;
    assert!(whois.iter().any(|m| m.verb == "311" && m.params[1] == "alicia"));
    Ok(())
}
