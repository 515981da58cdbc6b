//! Test IRC client.

#![allow(dead_code)]

use std::time::Duration;

use rook_proto::Message;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A line-oriented IRC client for driving the server under test.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Send one raw line; CRLF is appended when missing.
    pub async fn send_raw(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with("\r\n") {
            self.writer.write_all(b"\r\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive a single message (15 s default timeout).
    pub async fn recv(&mut self) -> anyhow::Result<Message> {
        self.recv_timeout(Duration::from_secs(15)).await
    }

    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<Message> {
        let mut line = String::new();
        let n = timeout(dur, self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("connection closed");
        }
        Ok(Message::parse(line.trim_end()))
    }

    /// Receive until the predicate matches, returning everything read.
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Vec<Message>>
    where
        F: FnMut(&Message) -> bool,
    {
        let mut messages = Vec::new();
        loop {
            let msg = self.recv().await?;
            let done = predicate(&msg);
            messages.push(msg);
            if done {
                return Ok(messages);
            }
        }
    }

    /// Assert that nothing arrives for `dur` (used for negative delivery checks).
    pub async fn expect_silence(&mut self, dur: Duration) -> anyhow::Result<()> {
        match self.recv_timeout(dur).await {
            Ok(msg) => anyhow::bail!("expected silence, got {msg}"),
            Err(_) => Ok(()),
        }
    }

    /// Register with NICK + USER and read through the welcome burst.
    pub async fn register(&mut self, nick: &str) -> anyhow::Result<Vec<Message>> {
        self.send_raw(&format!("NICK {nick}")).await?;
        self.send_raw(&format!("USER {} 0 * :Test User {nick}", &nick[..1]))
            .await?;
        // consume through the end of the MOTD
        self.recv_until(|msg| matches!(msg.verb.as_str(), "376" | "422"))
            .await
    }

    /// Register and join a channel, reading through the NAMES burst.
    pub async fn register_and_join(&mut self, nick: &str, chan: &str) -> anyhow::Result<()> {
        self.register(nick).await?;
        self.send_raw(&format!("JOIN {chan}")).await?;
        self.recv_until(|msg| msg.verb == "366").await?;
        Ok(())
    }
}
