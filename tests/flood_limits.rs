//! Receive-queue overflow handling.

mod common;

use std::time::Duration;

use common::{TestClient, TestServer};

#[tokio::test]
async fn excess_flood_disconnects_with_one_quit() -> anyhow::Result<()> {
    let server = TestServer::spawn(16871).await?;
    let mut cli = TestClient::connect(&server.addr()).await?;
    cli.register("flooder").await?;

    // well past the configured recvq depth of 20, in a single write
    let burst: String = (0..100)
        .map(|i| format!("PING {i}\r\n"))
        .collect();
    cli.send_raw(&burst).await?;

    // the server answers with exactly one QUIT carrying the flood reason,
    // then closes the transport
    let mut quits = 0;
    loop {
        match cli.recv_timeout(Duration::from_secs(5)).await {
            Ok(msg) if msg.verb == "QUIT" => {
                assert_eq!(msg.params[0], "Excess flood");
                quits += 1;
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    assert_eq!(quits, 1);
    Ok(())
}

#[tokio::test]
async fn normal_burst_under_the_limit_survives() -> anyhow::Result<()> {
    let server = TestServer::spawn(16872).await?;
    let mut cli = TestClient::connect(&server.addr()).await?;
    cli.register("steady").await?;

    let burst: String = (0..10).map(|i| format!("PING {i}\r\n")).collect();
    cli.send_raw(&burst).await?;

    let pongs = cli
        .recv_until(|m| m.verb == "PONG" && m.params[0] == "9")
        .await?;
    assert_eq!(pongs.iter().filter(|m| m.verb == "PONG").count(), 10);

    // still connected and responsive
    cli.send_raw("VERSION").await?;
    cli.recv_until(|m| m.verb == "351").await?;
    Ok(())
}
