//! PRIVMSG and NOTICE.
//!
//! PRIVMSG routes through the core bus (`client message` / `channel
//! message`) so observers can layer behavior on delivery: the away
//! auto-reply and echo-message both live there. NOTICE delivers directly
//! and never generates replies, per RFC 1459.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{Message, Numeric};

use crate::config::Config;
use crate::error::HandlerResult;
use crate::events::{
    topic, CommandHandler, CommandRegistry, CommandSpec, Event, EventBus, EventHandler, EventInfo,
};
use crate::state::{ClientRef, ServerContext};

pub fn register(commands: &mut CommandRegistry, events: &mut EventBus, conf: &Config) {
    commands.register(
        "PRIVMSG",
        CommandSpec::new(2, Box::new(PrivmsgHandler)).update_idle(),
    );
    commands.register("NOTICE", CommandSpec::new(2, Box::new(NoticeHandler)));

    events.register(topic::CLIENT_MESSAGE, 10, Box::new(ClientMessageDeliver));
    events.register(topic::CHANNEL_MESSAGE, 10, Box::new(ChannelMessageDeliver));
    if conf.extension_enabled("echo-message") {
        events.register(topic::CLIENT_MESSAGE, 10, Box::new(EchoMessage));
        events.register(topic::CHANNEL_MESSAGE, 10, Box::new(EchoMessage));
    }
}

struct PrivmsgHandler;

#[async_trait]
impl CommandHandler for PrivmsgHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let message = msg.params[1].clone();

        for target in msg.params[0].split(',') {
            if !target.starts_with('#') {
                let Some(peer) = ctx.client_by_nick(target) else {
                    cli.send_numeric(
                        Numeric::ERR_NOSUCHNICK,
                        vec![target.into(), "No such nick/channel".into()],
                    );
                    continue;
                };
                ctx.events
                    .emit(
                        ctx,
                        topic::CLIENT_MESSAGE,
                        Event::ClientMessage {
                            source: cli.id,
                            target: peer.id,
                            target_name: target.into(),
                            message: message.clone(),
                        },
                    )
                    .await;
                continue;
            }

            let Some(ch) = ctx.channel(target) else {
                cli.send_numeric(
                    Numeric::ERR_NOSUCHNICK,
                    vec![target.into(), "No such nick/channel".into()],
                );
                continue;
            };
            let (cased_name, can_send) = {
                let ch = ch.read();
                (ch.name.clone(), ch.can_send(cli.id))
            };
            if !can_send {
                cli.send_numeric(
                    Numeric::ERR_CANNOTSENDTOCHAN,
                    vec![cased_name, "Cannot send to channel".into()],
                );
                continue;
            }
            ctx.events
                .emit(
                    ctx,
                    topic::CHANNEL_MESSAGE,
                    Event::ChannelMessage {
                        source: cli.id,
                        channel: cased_name,
                        target_name: target.into(),
                        message: message.clone(),
                    },
                )
                .await;
        }
        Ok(())
    }
}

struct NoticeHandler;

#[async_trait]
impl CommandHandler for NoticeHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let message = msg.params[1].clone();

        for target in msg.params[0].split(',') {
            if !target.starts_with('#') {
                // unknown targets are dropped silently
                if let Some(peer) = ctx.client_by_nick(target) {
                    let notice =
                        Message::new("NOTICE", vec![peer.nick(), message.clone()])
                            .with_source(cli.hostmask_or_star());
                    peer.send(notice);
                }
                continue;
            }

            let Some(ch) = ctx.channel(target) else { continue };
            let (cased_name, can_send) = {
                let ch = ch.read();
                (ch.name.clone(), ch.can_send(cli.id))
            };
            if !can_send {
                continue;
            }
            let notice = Message::new("NOTICE", vec![cased_name, message.clone()])
                .with_source(cli.hostmask_or_star());
            ctx.dump_to_channel(&ch, &notice, &[cli.id], None, None);
        }
        Ok(())
    }
}

/// Default delivery for direct messages.
struct ClientMessageDeliver;

#[async_trait]
impl EventHandler for ClientMessageDeliver {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::ClientMessage {
            source,
            target,
            target_name,
            message,
        } = &info.payload
        {
            let (Some(source), Some(target)) = (ctx.client(*source), ctx.client(*target)) else {
                return Ok(());
            };
            let privmsg = Message::new("PRIVMSG", vec![target_name.clone(), message.clone()])
                .with_source(source.hostmask_or_star());
            target.send(privmsg);
        }
        Ok(())
    }
}

/// Default delivery for channel messages: everyone but the speaker.
struct ChannelMessageDeliver;

#[async_trait]
impl EventHandler for ChannelMessageDeliver {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::ChannelMessage {
            source,
            channel,
            target_name,
            message,
        } = &info.payload
        {
            let Some(source) = ctx.client(*source) else {
                return Ok(());
            };
            let Some(ch) = ctx.channel(channel) else {
                return Ok(());
            };
            let privmsg = Message::new("PRIVMSG", vec![target_name.clone(), message.clone()])
                .with_source(source.hostmask_or_star());
            ctx.dump_to_channel(&ch, &privmsg, &[source.id], None, None);
        }
        Ok(())
    }
}

/// echo-message: speakers holding the cap get their own copy back.
struct EchoMessage;

#[async_trait]
impl EventHandler for EchoMessage {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let (source, target_name, message) = match &info.payload {
            Event::ClientMessage {
                source,
                target_name,
                message,
                ..
            }
            | Event::ChannelMessage {
                source,
                target_name,
                message,
                ..
            } => (*source, target_name.clone(), message.clone()),
            _ => return Ok(()),
        };
        let Some(source) = ctx.client(source) else {
            return Ok(());
        };
        if source.has_cap("echo-message") {
            let echo = Message::new("PRIVMSG", vec![target_name, message])
                .with_source(source.hostmask_or_star());
            source.send(echo);
        }
        Ok(())
    }
}
