//! CAP capability negotiation (LS, LIST, REQ, ACK, CLEAR, END).
//!
//! REQ is atomic: the whole batch applies or none of it does. ACK and NAK
//! replies carry a trailing space; some widely deployed clients depend on it.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{
    topic, CommandHandler, CommandRegistry, CommandSpec, Event, EventBus, EventHandler, EventInfo,
};
use crate::state::{ClientRef, ServerContext};

/// Tokens per CAP LS / LIST / CLEAR reply line.
const TOKENS_PER_LINE: usize = 8;

pub fn register(commands: &mut CommandRegistry, events: &mut EventBus) {
    commands.register(
        "CAP",
        CommandSpec::new(1, Box::new(CapHandler)).allow_unregistered(),
    );
    events.register(topic::CAP_ADD, 1, Box::new(CapAddApplier));
    events.register(topic::CAP_DEL, 1, Box::new(CapDelApplier));
}

fn send_cap(cli: &Arc<ClientRef>, subcmd: &str, params: Vec<String>) {
    let mut full = vec![cli.nick(), subcmd.to_string()];
    full.extend(params);
    cli.send_verb("CAP", full);
}

/// Flush tokens in `TOKENS_PER_LINE` chunks, `*`-marking continuations.
fn send_paginated(cli: &Arc<ClientRef>, subcmd: &str, tokens: &[String]) {
    if tokens.is_empty() {
        send_cap(cli, subcmd, vec![String::new()]);
        return;
    }
    let chunks: Vec<_> = tokens.chunks(TOKENS_PER_LINE).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        let more = i + 1 < chunks.len();
        if more {
            send_cap(cli, subcmd, vec!["*".into(), chunk.join(" ")]);
        } else {
            send_cap(cli, subcmd, vec![chunk.join(" ")]);
        }
    }
}

struct CapHandler;

#[async_trait]
impl CommandHandler for CapHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let subcmd = msg.params[0].to_ascii_uppercase();

        if !matches!(subcmd.as_str(), "LS" | "LIST" | "REQ" | "ACK" | "CLEAR" | "END") {
            cli.send_numeric(
                Numeric::ERR_INVALIDCAPCMD,
                vec![subcmd, "Invalid CAP subcommand".into()],
            );
            return Ok(());
        }

        // Negotiation holds registration open until CAP END.
        if subcmd != "END" {
            cli.push_registration_lock(&["CAP"]);
        }

        match subcmd.as_str() {
            "LS" => handle_ls(ctx, cli, msg),
            "LIST" => handle_list(cli),
            "REQ" => handle_req(ctx, cli, msg).await,
            "ACK" => handle_ack(ctx, cli, msg),
            "CLEAR" => handle_clear(ctx, cli),
            "END" => {
                if cli.release_registration_lock(&["CAP"]) {
                    ctx.try_register(cli).await;
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }
}

fn handle_ls(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, msg: &Message) {
    let version: u32 = msg
        .params
        .get(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(301);
    // A later bare CAP LS keeps the highest version the client ever asked for.
    let ircv3_2 = {
        let mut state = cli.state.write();
        state.cap_version = state.cap_version.max(version);
        if state.cap_version > 301 {
            // CAP LS 302 implicitly enables cap-notify.
            state.caps.insert("cap-notify");
        }
        state.cap_version > 301
    };

    let tokens: Vec<String> = ctx.caps.iter().map(|c| c.atom(ircv3_2)).collect();
    send_paginated(cli, "LS", &tokens);
}

fn handle_list(cli: &Arc<ClientRef>) {
    let enabled: Vec<String> = cli
        .state
        .read()
        .caps
        .iter()
        .map(str::to_string)
        .collect();
    send_paginated(cli, "LIST", &enabled);
}

async fn handle_req(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, msg: &Message) {
    let args = msg.params.get(1).cloned().unwrap_or_default();

    let mut cap_add = Vec::new();
    let mut cap_del = Vec::new();

    // Left-to-right validation, all-or-nothing application.
    for arg in args.split_whitespace() {
        let (negate, name) = match arg.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, arg),
        };

        let Some(cap) = ctx.caps.get(name) else {
            send_cap(cli, "NAK", vec![format!("{args} ")]);
            return;
        };

        let enabled = cli.has_cap(name);
        if negate {
            if !enabled || cap.sticky {
                send_cap(cli, "NAK", vec![format!("{args} ")]);
                return;
            }
            cap_del.push(cap.name.clone());
        } else {
            if enabled {
                send_cap(cli, "NAK", vec![format!("{args} ")]);
                return;
            }
            cap_add.push(cap.name.clone());
        }
    }

    let mut acked: Vec<String> = cap_add.clone();
    acked.extend(cap_del.iter().map(|c| format!("-{c}")));
    send_cap(cli, "ACK", vec![format!("{} ", acked.join(" "))]);

    // The batch was accepted; apply it through the core bus.
    if !cap_add.is_empty() {
        ctx.events
            .emit(
                ctx,
                topic::CAP_ADD,
                Event::CapAdd {
                    client: cli.id,
                    caps: cap_add,
                },
            )
            .await;
    }
    if !cap_del.is_empty() {
        ctx.events
            .emit(
                ctx,
                topic::CAP_DEL,
                Event::CapDel {
                    client: cli.id,
                    caps: cap_del,
                },
            )
            .await;
    }
}

/// Client-initiated ACK is only sanity-checked; nothing deployed uses it.
fn handle_ack(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, msg: &Message) {
    let args = msg.params.get(1).cloned().unwrap_or_default();

    for arg in args.split_whitespace() {
        let (negate, name) = match arg.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, arg),
        };
        let Some(cap) = ctx.caps.get(name) else {
            send_cap(cli, "NAK", vec![format!("{args} ")]);
            return;
        };
        if negate && cap.sticky {
            send_cap(cli, "NAK", vec![format!("{args} ")]);
            return;
        }
        if !negate && !cli.has_cap(name) {
            send_cap(cli, "NAK", vec![format!("{args} ")]);
            return;
        }
    }

    send_cap(cli, "ACK", vec![format!("{args} ")]);
}

fn handle_clear(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>) {
    let removed: Vec<String> = {
        let mut state = cli.state.write();
        let names: Vec<String> = state.caps.iter().map(str::to_string).collect();
        let mut removed = Vec::new();
        for name in names {
            // sticky caps survive CLEAR
            if ctx.caps.get(&name).is_some_and(|c| c.sticky) {
                continue;
            }
            state.caps.remove(&name);
            removed.push(format!("-{name}"));
        }
        removed
    };
    send_paginated(cli, "ACK", &removed);
}

struct CapAddApplier;

#[async_trait]
impl EventHandler for CapAddApplier {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::CapAdd { client, caps } = &info.payload {
            if let Some(cli) = ctx.client(*client) {
                let mut state = cli.state.write();
                for cap in caps {
                    state.caps.insert(cap.clone());
                }
            }
        }
        Ok(())
    }
}

struct CapDelApplier;

#[async_trait]
impl EventHandler for CapDelApplier {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::CapDel { client, caps } = &info.payload {
            if let Some(cli) = ctx.client(*client) {
                let mut state = cli.state.write();
                for cap in caps {
                    state.caps.remove(cap);
                }
            }
        }
        Ok(())
    }
}
