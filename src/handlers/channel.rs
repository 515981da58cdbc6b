//! Channel membership commands: JOIN, PART, NAMES, TOPIC, LIST.
//!
//! JOIN authorization order is key, then exempt override, then bans, then
//! invite-only; an invite-only denial is silent. The membership append and
//! the JOIN broadcast happen in the `channel join` default observer so other
//! observers can watch (or veto, by consuming) joins.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{is_valid_channel, Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{
    topic, CommandHandler, CommandRegistry, CommandSpec, Event, EventBus, EventHandler, EventInfo,
};
use crate::state::channel::JoinDenied;
use crate::state::{ClientRef, MemberFlags, ServerContext};

pub fn register(commands: &mut CommandRegistry, events: &mut EventBus) {
    commands.register("JOIN", CommandSpec::new(1, Box::new(JoinHandler)).update_idle());
    commands.register("PART", CommandSpec::new(1, Box::new(PartHandler)).update_idle());
    commands.register("NAMES", CommandSpec::new(1, Box::new(NamesHandler)));
    commands.register("TOPIC", CommandSpec::new(1, Box::new(TopicHandler)).update_idle());
    commands.register("LIST", CommandSpec::new(0, Box::new(ListHandler)));
    events.register(topic::CHANNEL_JOIN, 1, Box::new(ChannelJoinDefault));
}

struct JoinHandler;

#[async_trait]
impl CommandHandler for JoinHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let keys: Vec<&str> = msg
            .params
            .get(1)
            .map(|k| k.split(',').collect())
            .unwrap_or_default();

        for (i, chan) in msg.params[0].split(',').enumerate() {
            if !is_valid_channel(chan) || chan.len() > ctx.conf.limits.channel {
                cli.send_numeric(
                    Numeric::ERR_BADCHANNAME,
                    vec![chan.into(), "Illegal channel name".into()],
                );
                return Ok(());
            }

            let ch = ctx.channel_get_or_create(chan);
            let (cased_name, verdict) = {
                let ch = ch.read();
                if ch.has_member(cli.id) {
                    continue;
                }
                let hostmask = cli.hostmask_or_star();
                (
                    ch.name.clone(),
                    ch.authorize(&hostmask, keys.get(i).copied()),
                )
            };

            match verdict {
                Err(JoinDenied::BadKey) => {
                    cli.send_numeric(
                        Numeric::ERR_BADCHANNELKEY,
                        vec![cased_name, "Cannot join channel (+k) - bad key".into()],
                    );
                    ctx.discard_channel_if_empty(chan);
                    continue;
                }
                Err(JoinDenied::Banned) => {
                    cli.send_numeric(
                        Numeric::ERR_BANNEDFROMCHAN,
                        vec![cased_name, "Cannot join channel (+b) - you are banned".into()],
                    );
                    ctx.discard_channel_if_empty(chan);
                    continue;
                }
                // Invite-only denial carries no numeric.
                Err(JoinDenied::InviteOnly) => {
                    ctx.discard_channel_if_empty(chan);
                    continue;
                }
                Ok(()) => {}
            }

            ctx.events
                .emit(
                    ctx,
                    topic::CHANNEL_JOIN,
                    Event::ChannelJoin {
                        client: cli.id,
                        channel: cased_name,
                    },
                )
                .await;
        }
        Ok(())
    }
}

/// Default `channel join` observer: membership append, JOIN broadcast
/// (extended-join variant to capable peers), TOPIC and NAMES side effects.
struct ChannelJoinDefault;

#[async_trait]
impl EventHandler for ChannelJoinDefault {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let Event::ChannelJoin { client, channel } = &info.payload else {
            return Ok(());
        };
        let Some(cli) = ctx.client(*client) else {
            return Ok(());
        };
        let Some(ch) = ctx.channel(channel) else {
            return Ok(());
        };

        let (nick, account, realname) = {
            let state = cli.state.read();
            (
                state.nickname.clone(),
                state.account.clone().unwrap_or_else(|| "*".into()),
                state.realname.clone(),
            )
        };

        let has_topic = {
            let mut ch = ch.write();
            let flags = if ch.members.is_empty() {
                MemberFlags::founder()
            } else {
                MemberFlags::default()
            };
            ch.join(cli.id, &nick, flags);
            !ch.topic.is_empty()
        };
        cli.state.write().channels.push(channel.clone());

        let hostmask = cli.hostmask_or_star();
        let plain = Message::new("JOIN", vec![channel.clone()]).with_source(hostmask.clone());
        let extended = Message::new("JOIN", vec![channel.clone(), account, realname])
            .with_source(hostmask);
        ctx.dump_to_channel(&ch, &plain, &[], None, Some("extended-join"));
        ctx.dump_to_channel(&ch, &extended, &[], Some("extended-join"), None);

        if has_topic {
            ctx.handle_side_effect(&cli, "TOPIC", vec![channel.clone()]).await;
        }
        ctx.handle_side_effect(&cli, "NAMES", vec![channel.clone()]).await;

        Ok(())
    }
}

struct PartHandler;

#[async_trait]
impl CommandHandler for PartHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        for chan in msg.params[0].split(',') {
            if !is_valid_channel(chan) {
                cli.send_numeric(
                    Numeric::ERR_BADCHANNAME,
                    vec![chan.into(), "Illegal channel name".into()],
                );
                return Ok(());
            }
            let Some(ch) = ctx.channel(chan) else {
                cli.send_numeric(
                    Numeric::ERR_NOSUCHCHANNEL,
                    vec![chan.into(), "No such channel".into()],
                );
                return Ok(());
            };
            let cased_name = {
                let ch = ch.read();
                if !ch.has_member(cli.id) {
                    cli.send_numeric(
                        Numeric::ERR_NOTONCHANNEL,
                        vec![ch.name.clone(), "You're not on that channel".into()],
                    );
                    return Ok(());
                }
                ch.name.clone()
            };

            let mut params = vec![cased_name.clone()];
            if let Some(reason) = msg.params.get(1) {
                params.push(reason.clone());
            }
            let part_msg =
                Message::new("PART", params).with_source(cli.hostmask_or_star());
            ctx.dump_to_channel(&ch, &part_msg, &[], None, None);

            ch.write().part(cli.id);
            cli.state
                .write()
                .channels
                .retain(|name| !rook_proto::casefold_eq(name, chan));
            ctx.discard_channel_if_empty(chan);
        }
        Ok(())
    }
}

struct NamesHandler;

#[async_trait]
impl CommandHandler for NamesHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        for chan in msg.params[0].split(',') {
            if !is_valid_channel(chan) {
                cli.send_numeric(
                    Numeric::ERR_BADCHANNAME,
                    vec![chan.into(), "Illegal channel name".into()],
                );
                return Ok(());
            }
            let Some(ch) = ctx.channel(chan) else {
                cli.send_numeric(
                    Numeric::ERR_NOSUCHCHANNEL,
                    vec![chan.into(), "No such channel".into()],
                );
                return Ok(());
            };

            let userhost = cli.has_cap("userhost-in-names");
            let (classification, cased_name, members) = {
                let ch = ch.read();
                let is_member = ch.has_member(cli.id);
                let rendered: Vec<String> = ch
                    .members
                    .iter()
                    .filter_map(|m| {
                        let peer = ctx.client(m.conn)?;
                        let state = peer.state.read();
                        // invisible members hide from non-members
                        if !is_member && state.has_prop("user:invisible") {
                            return None;
                        }
                        if userhost {
                            Some(format!(
                                "{}{}!{}@{}",
                                m.flags.prefix(),
                                state.nickname,
                                state.username,
                                state.hostname
                            ))
                        } else {
                            Some(m.name())
                        }
                    })
                    .collect();
                (ch.classification(), ch.name.clone(), rendered)
            };

            cli.send_numeric(
                Numeric::RPL_NAMREPLY,
                vec![classification.into(), cased_name.clone(), members.join(" ")],
            );
            cli.send_numeric(
                Numeric::RPL_ENDOFNAMES,
                vec![cased_name, "End of /NAMES list.".into()],
            );
        }
        Ok(())
    }
}

struct TopicHandler;

#[async_trait]
impl CommandHandler for TopicHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        for chan in msg.params[0].split(',') {
            if !is_valid_channel(chan) {
                cli.send_numeric(
                    Numeric::ERR_BADCHANNAME,
                    vec![chan.into(), "Illegal channel name".into()],
                );
                return Ok(());
            }
            let Some(ch) = ctx.channel(chan) else {
                cli.send_numeric(
                    Numeric::ERR_NOSUCHCHANNEL,
                    vec![chan.into(), "No such channel".into()],
                );
                continue;
            };

            // inquiry
            if msg.params.len() == 1 {
                let (cased_name, topic, setter, ts, is_member) = {
                    let ch = ch.read();
                    (
                        ch.name.clone(),
                        ch.topic.clone(),
                        ch.topic_setter.clone(),
                        ch.topic_ts,
                        ch.has_member(cli.id),
                    )
                };
                if !is_member {
                    cli.send_numeric(
                        Numeric::ERR_NOTONCHANNEL,
                        vec![cased_name, "You're not on that channel".into()],
                    );
                    continue;
                }
                if topic.is_empty() {
                    cli.send_numeric(
                        Numeric::RPL_NOTOPIC,
                        vec![cased_name, "No topic is set".into()],
                    );
                } else {
                    cli.send_numeric(Numeric::RPL_TOPIC, vec![cased_name.clone(), topic]);
                    cli.send_numeric(
                        Numeric::RPL_TOPICWHOTIME,
                        vec![cased_name, setter, ts.to_string()],
                    );
                }
                continue;
            }

            // set
            let mut new_topic = msg.params[1].clone();
            new_topic.truncate(ctx.conf.limits.topic);
            let hostmask = cli.hostmask_or_star();
            let now = ctx.now();
            let broadcast = {
                let mut ch = ch.write();
                let Some(flags) = ch.get_member(cli.id).map(|m| m.flags) else {
                    cli.send_numeric(
                        Numeric::ERR_NOTONCHANNEL,
                        vec![ch.name.clone(), "You're not on that channel".into()],
                    );
                    continue;
                };
                if ch.props.op_topic && !flags.set_modes {
                    cli.send_numeric(
                        Numeric::ERR_CHANOPRIVSNEEDED,
                        vec![ch.name.clone(), "You're not a channel operator".into()],
                    );
                    continue;
                }
                ch.topic = new_topic.clone();
                ch.topic_setter = hostmask.clone();
                ch.topic_ts = now;
                Message::new("TOPIC", vec![ch.name.clone(), new_topic.clone()])
                    .with_source(hostmask.clone())
            };
            ctx.dump_to_channel(&ch, &broadcast, &[], None, None);
        }
        Ok(())
    }
}

struct ListHandler;

#[async_trait]
impl CommandHandler for ListHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        _msg: &Message,
    ) -> HandlerResult {
        cli.send_numeric(
            Numeric::RPL_LISTSTART,
            vec!["Channel".into(), "Users".into(), "Topic".into()],
        );
        let channels: Vec<_> = ctx
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for ch in channels {
            let (name, count, topic, visible) = {
                let ch = ch.read();
                (
                    ch.name.clone(),
                    ch.members.len(),
                    ch.topic.clone(),
                    ch.can_display(cli.id),
                )
            };
            if visible {
                cli.send_numeric(Numeric::RPL_LIST, vec![name, count.to_string(), topic]);
            }
        }
        cli.send_numeric(Numeric::RPL_LISTEND, vec!["End of /LIST".into()]);
        Ok(())
    }
}
