//! Connection lifecycle commands: NICK, USER, QUIT, PING, PONG, and the
//! HTTP-probe rejections.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{casefold, is_valid_nick, Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{topic, CommandHandler, CommandRegistry, CommandSpec, Event, EventBus};
use crate::state::{ClientRef, ServerContext};

pub fn register(commands: &mut CommandRegistry, _events: &mut EventBus) {
    commands.register(
        "NICK",
        CommandSpec::new(1, Box::new(NickHandler)).allow_unregistered(),
    );
    commands.register(
        "USER",
        CommandSpec::new(4, Box::new(UserHandler)).allow_unregistered(),
    );
    commands.register(
        "QUIT",
        CommandSpec::new(0, Box::new(QuitHandler)).allow_unregistered(),
    );
    commands.register(
        "PING",
        CommandSpec::new(0, Box::new(PingHandler)).allow_unregistered(),
    );
    commands.register(
        "PONG",
        CommandSpec::new(1, Box::new(PongHandler)).allow_unregistered(),
    );
}

/// HTTP verbs sent at an IRC port mean a confused client; drop them hard.
pub fn register_nopost(commands: &mut CommandRegistry) {
    for verb in ["POST", "PUT", "PATCH", "STATUS"] {
        commands.register(
            verb,
            CommandSpec::new(0, Box::new(HttpProbeHandler { verb })).allow_unregistered(),
        );
    }
}

struct NickHandler;

#[async_trait]
impl CommandHandler for NickHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let new_nick = msg.params[0].clone();

        if !is_valid_nick(&new_nick) || new_nick.len() > ctx.conf.limits.nick {
            cli.send_numeric(
                Numeric::ERR_ERRONEUSNICKNAME,
                vec![new_nick, "Erroneous nickname".into()],
            );
            return Ok(());
        }
        if let Some(existing) = ctx.client_by_nick(&new_nick) {
            if existing.id != cli.id {
                cli.send_numeric(
                    Numeric::ERR_NICKNAMEINUSE,
                    vec![new_nick, "Nickname already in use".into()],
                );
                return Ok(());
            }
        }

        if cli.is_registered() {
            let old_nick = cli.nick();
            let old_folded = casefold(&old_nick);
            let new_folded = casefold(&new_nick);

            // The lookup above is only a fast path; two renames can race to
            // the same target, so the index swap claims the new name through
            // the entry API, mirroring the registration transition. A
            // case-only change already owns its entry.
            if new_folded != old_folded {
                match ctx.nicks.entry(new_folded) {
                    dashmap::mapref::entry::Entry::Occupied(_) => {
                        cli.send_numeric(
                            Numeric::ERR_NICKNAMEINUSE,
                            vec![new_nick, "Nickname already in use".into()],
                        );
                        return Ok(());
                    }
                    dashmap::mapref::entry::Entry::Vacant(entry) => {
                        entry.insert(cli.id);
                    }
                }
                ctx.nicks.remove(&old_folded);
            }

            let nick_msg = Message::new("NICK", vec![new_nick.clone()])
                .with_source(cli.hostmask_or_star());
            for peer in ctx.common_peers(cli, &[], None) {
                peer.send(nick_msg.clone());
            }

            // keep membership nick caches consistent
            let channels = cli.state.read().channels.clone();
            for name in channels {
                if let Some(ch) = ctx.channel(&name) {
                    if let Some(member) = ch.write().get_member_mut(cli.id) {
                        member.nickname = new_nick.clone();
                    }
                }
            }

            cli.state.write().nickname = new_nick.clone();

            ctx.events
                .emit(
                    ctx,
                    topic::CLIENT_NICK,
                    Event::ClientNick {
                        client: cli.id,
                        old: old_nick,
                        new: new_nick,
                    },
                )
                .await;
        } else {
            cli.state.write().nickname = new_nick;
            if cli.release_registration_lock(&["NICK"]) {
                ctx.try_register(cli).await;
            }
        }
        Ok(())
    }
}

struct UserHandler;

#[async_trait]
impl CommandHandler for UserHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let mut username = msg.params[0].clone();
        username.truncate(ctx.conf.limits.user);
        let realname = msg.params[3].clone();
        {
            let mut state = cli.state.write();
            state.username = username;
            state.realname = realname;
        }
        if cli.release_registration_lock(&["USER"]) {
            ctx.try_register(cli).await;
        }
        Ok(())
    }
}

struct QuitHandler;

#[async_trait]
impl CommandHandler for QuitHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let reason = msg.params.first().map(String::as_str).unwrap_or("");
        ctx.quit_client(cli, &format!("Quit: {reason}")).await;
        Ok(())
    }
}

struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let reply = msg
            .params
            .first()
            .cloned()
            .unwrap_or_else(|| ctx.server_name().to_string());
        cli.send_verb("PONG", vec![reply]);
        Ok(())
    }
}

struct PongHandler;

#[async_trait]
impl CommandHandler for PongHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let now = ctx.now();
        let mut state = cli.state.write();
        match state.ping_cookie {
            Some(cookie) if msg.params[0].parse::<u64>() == Ok(cookie) => {
                state.ping_cookie = None;
                state.last_pong = now;
            }
            Some(_) => {}
            None => state.last_pong = now,
        }
        Ok(())
    }
}

struct HttpProbeHandler {
    verb: &'static str,
}

#[async_trait]
impl CommandHandler for HttpProbeHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        _msg: &Message,
    ) -> HandlerResult {
        ctx.quit_client(
            cli,
            &format!("HTTP {} command was received from IRC connection", self.verb),
        )
        .await;
        Ok(())
    }
}
