//! The per-connection task.
//!
//! Owns the socket for the connection's lifetime: frames CRLF lines in,
//! enforces the receive-queue depth, drains the outbound queue, and runs the
//! ping-cookie keepalive. Messages from one connection are processed in
//! arrival order, one at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rook_proto::{Message, MAX_LINE_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::state::{ClientRef, Outbound, ServerContext};

/// Keepalive cadence and patience.
const PING_CHECK_INTERVAL: Duration = Duration::from_secs(15);
const PING_IDLE_SECS: i64 = 120;
const PING_TIMEOUT_SECS: i64 = 60;

enum PingAction {
    None,
    SendPing(u64),
    TimedOut,
}

/// Decide whether to ping or give up, based on the cookie bookkeeping.
/// The cookie doubles as the send timestamp; at most one is outstanding.
fn check_ping(cli: &Arc<ClientRef>, now: i64) -> PingAction {
    let mut state = cli.state.write();
    match state.ping_cookie {
        Some(cookie) if now - cookie as i64 >= PING_TIMEOUT_SECS => PingAction::TimedOut,
        Some(_) => PingAction::None,
        None if now - state.last_pong >= PING_IDLE_SECS => {
            state.ping_cookie = Some(now as u64);
            PingAction::SendPing(now as u64)
        }
        None => PingAction::None,
    }
}

/// Serialize with the 512-byte output cap (CRLF included), never splitting a
/// UTF-8 codepoint.
fn encode_line(msg: &Message) -> Vec<u8> {
    let mut line = msg.to_string();
    let mut max = MAX_LINE_LEN - 2;
    while !line.is_char_boundary(max.min(line.len())) {
        max -= 1;
    }
    line.truncate(max.min(line.len()));
    let mut bytes = line.into_bytes();
    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// Split complete CRLF (or bare LF) lines out of the read buffer.
fn take_lines(buf: &mut BytesMut, lines: &mut VecDeque<String>) {
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let mut line = buf.split_to(pos + 1);
        // drop the LF and any preceding CR
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if !line.is_empty() {
            lines.push_back(String::from_utf8_lossy(&line).into_owned());
        }
    }
    buf.reserve(1024);
}

/// Drive one client connection to completion.
pub async fn run<S>(ctx: Arc<ServerContext>, stream: S, peer_ip: String, tls: bool)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn_id = ctx.allocate_conn_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let cli = ClientRef::new(
        conn_id,
        ctx.server_name().to_string(),
        ctx.current_ts.clone(),
        tx,
        peer_ip.clone(),
        tls,
    );
    ctx.clients.insert(conn_id, cli.clone());
    info!(conn = conn_id, peer = %peer_ip, tls, "inbound connection");

    {
        let ctx = ctx.clone();
        let cli = cli.clone();
        tokio::spawn(crate::network::dns::run_rdns_check(ctx, cli));
    }

    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut read_buf = BytesMut::with_capacity(4096);
    let mut byte_buf = [0u8; 4096];
    let mut recvq: VecDeque<String> = VecDeque::new();
    let mut ping_timer = tokio::time::interval(PING_CHECK_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_timer.tick().await;

    'outer: loop {
        tokio::select! {
            read = reader.read(&mut byte_buf) => {
                match read {
                    Ok(0) => {
                        ctx.quit_client(&cli, "Connection closed").await;
                        break 'outer;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&byte_buf[..n]);
                        take_lines(&mut read_buf, &mut recvq);
                        if recvq.len() > ctx.conf.limits.recvq {
                            ctx.quit_client(&cli, "Excess flood").await;
                            break 'outer;
                        }
                        // drain the queue in arrival order
                        while let Some(line) = recvq.pop_front() {
                            debug!(conn = conn_id, line = %line, "recv");
                            let msg = Message::parse(&line);
                            if msg.verb.is_empty() {
                                continue;
                            }
                            ctx.commands.dispatch(&ctx, &cli, &msg).await;
                            if !cli.is_connected() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        ctx.quit_client(&cli, &format!("Connection error: {e}")).await;
                        break 'outer;
                    }
                }
            }

            out = rx.recv() => {
                match out {
                    Some(Outbound::Line(msg)) => {
                        if writer.write_all(&encode_line(&msg)).await.is_err() {
                            ctx.quit_client(&cli, "Connection closed").await;
                            break 'outer;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        // flush whatever is already queued, then hang up
                        while let Ok(Outbound::Line(msg)) = rx.try_recv() {
                            if writer.write_all(&encode_line(&msg)).await.is_err() {
                                break;
                            }
                        }
                        let _ = writer.shutdown().await;
                        break 'outer;
                    }
                }
            }

            _ = ping_timer.tick() => {
                match check_ping(&cli, ctx.now()) {
                    PingAction::None => {}
                    PingAction::SendPing(cookie) => {
                        cli.send_verb("PING", vec![cookie.to_string()]);
                    }
                    PingAction::TimedOut => {
                        ctx.quit_client(&cli, "Ping timeout").await;
                        break 'outer;
                    }
                }
            }
        }
    }

    // Drain-and-close for the paths that broke out after quit_client: the
    // QUIT echo and any trailing replies still get flushed.
    while let Ok(out) = rx.try_recv() {
        if let Outbound::Line(msg) = out {
            if writer.write_all(&encode_line(&msg)).await.is_err() {
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
    info!(conn = conn_id, "connection task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_lines_splits_crlf_and_lf() {
        let mut buf = BytesMut::from(&b"NICK alice\r\nUSER a 0 * :A\npartial"[..]);
        let mut lines = VecDeque::new();
        take_lines(&mut buf, &mut lines);
        assert_eq!(lines, VecDeque::from(["NICK alice".to_string(), "USER a 0 * :A".into()]));
        assert_eq!(&buf[..], b"partial");
    }

    #[test]
    fn take_lines_skips_empty_lines() {
        let mut buf = BytesMut::from(&b"\r\n\r\nPING x\r\n"[..]);
        let mut lines = VecDeque::new();
        take_lines(&mut buf, &mut lines);
        assert_eq!(lines, VecDeque::from(["PING x".to_string()]));
    }

    #[test]
    fn encode_line_appends_crlf() {
        let msg = Message::new("PING", vec!["token".into()]);
        assert_eq!(encode_line(&msg), b"PING token\r\n");
    }

    #[test]
    fn encode_line_caps_at_512_bytes() {
        let msg = Message::new("PRIVMSG", vec!["#c".into(), "x".repeat(600)]);
        let line = encode_line(&msg);
        assert_eq!(line.len(), MAX_LINE_LEN);
        assert!(line.ends_with(b"\r\n"));
    }

    #[test]
    fn encode_line_respects_utf8_boundaries() {
        let msg = Message::new("PRIVMSG", vec!["#c".into(), "é".repeat(300)]);
        let line = encode_line(&msg);
        assert!(line.len() <= MAX_LINE_LEN);
        assert!(std::str::from_utf8(&line[..line.len() - 2]).is_ok());
    }
}
