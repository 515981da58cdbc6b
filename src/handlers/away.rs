//! AWAY, its core-bus processing, and the away-notify / auto-reply observers.
//!
//! The away message is stored in the client's metadata under `away`, so
//! METADATA GET and WHOIS read the same value AWAY sets.

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
    commands.register("AWAY", CommandSpec::new(0, Box::new(AwayHandler)));
    events.register(topic::CLIENT_AWAY, 1, Box::new(AwayProcess));
    if conf.extension_enabled("away-notify") {
        events.register(topic::CLIENT_AWAY, 10, Box::new(AwayNotify));
    }
    events.register(topic::CLIENT_MESSAGE, 10, Box::new(AwayAutoReply));
}

struct AwayHandler;

#[async_trait]
impl CommandHandler for AwayHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let away = msg.params.first().filter(|m| !m.is_empty()).cloned();
        ctx.events
            .emit(
                ctx,
                topic::CLIENT_AWAY,
                Event::ClientAway {
                    source: cli.id,
                    away,
                },
            )
            .await;
        Ok(())
    }
}

/// Priority 1: apply the change and answer 305/306.
struct AwayProcess;

#[async_trait]
impl EventHandler for AwayProcess {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let Event::ClientAway { source, away } = &info.payload else {
            return Ok(());
        };
        let Some(cli) = ctx.client(*source) else {
            return Ok(());
        };

        match away {
            Some(message) => {
                cli.state.write().metadata.insert("away", message.clone());
                cli.send_numeric(
                    Numeric::RPL_NOWAWAY,
                    vec!["You have been marked as being away".into()],
                );
            }
            None => {
                let was_away = cli.state.write().metadata.remove("away").is_some();
                if was_away {
                    cli.send_numeric(
                        Numeric::RPL_UNAWAY,
                        vec!["You are no longer marked as being away".into()],
                    );
                }
            }
        }
        Ok(())
    }
}

/// Priority 10: propagate AWAY to common peers holding away-notify.
struct AwayNotify;

#[async_trait]
impl EventHandler for AwayNotify {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let Event::ClientAway { source, .. } = &info.payload else {
            return Ok(());
        };
        let Some(cli) = ctx.client(*source) else {
            return Ok(());
        };

        let params = match cli.state.read().away_message() {
            Some(message) => vec![message.clone()],
            None => vec![],
        };
        let away_msg = Message::new("AWAY", params).with_source(cli.hostmask_or_star());
        for peer in ctx.common_peers(&cli, &[cli.id], Some("away-notify")) {
            peer.send(away_msg.clone());
        }
        Ok(())
    }
}

/// 301 auto-reply to direct messages at away targets, once per message.
struct AwayAutoReply;

#[async_trait]
impl EventHandler for AwayAutoReply {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let Event::ClientMessage {
            source,
            target,
            target_name,
            ..
        } = &info.payload
        else {
            return Ok(());
        };
        let (Some(source), Some(target)) = (ctx.client(*source), ctx.client(*target)) else {
            return Ok(());
        };
        let away = target.state.read().away_message().cloned();
        if let Some(message) = away {
            source.send_numeric(Numeric::RPL_AWAY, vec![target_name.clone(), message]);
        }
        Ok(())
    }
}
