//! User queries: WHOIS, WHO, WHOWAS, ISON.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{CommandHandler, CommandRegistry, CommandSpec};
use crate::state::{ClientRef, ServerContext};

pub fn register(commands: &mut CommandRegistry) {
    commands.register("WHOIS", CommandSpec::new(1, Box::new(WhoisHandler)));
    commands.register("WHO", CommandSpec::new(1, Box::new(WhoHandler)));
    commands.register("WHOWAS", CommandSpec::new(1, Box::new(WhowasHandler)));
    commands.register("ISON", CommandSpec::new(1, Box::new(IsonHandler)));
}

struct WhoisHandler;

#[async_trait]
impl CommandHandler for WhoisHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let target = &msg.params[0];
        let Some(peer) = ctx.client_by_nick(target) else {
            cli.send_numeric(
                Numeric::ERR_NOSUCHNICK,
                vec![target.clone(), "No such nick/channel".into()],
            );
            return Ok(());
        };

        let (nick, username, hostname, realname, role, account, away, idle, signon, channels) = {
            let state = peer.state.read();
            (
                state.nickname.clone(),
                state.username.clone(),
                state.hostname.clone(),
                state.realname.clone(),
                state.role.clone(),
                state.account.clone(),
                state.away_message().cloned(),
                ctx.now() - state.last_event_ts,
                state.registration_ts,
                state.channels.clone(),
            )
        };

        // Shared channels, minus secret ones the asker is not on (S6).
        let mut visible_channels = Vec::new();
        for name in &channels {
            if let Some(ch) = ctx.channel(name) {
                let ch = ch.read();
                if ch.props.secret && !ch.has_member(cli.id) {
                    continue;
                }
                if let Some(member) = ch.get_member(peer.id) {
                    visible_channels.push(format!("{}{}", member.flags.prefix(), ch.name));
                }
            }
        }

        cli.send_numeric(
            Numeric::RPL_WHOISUSER,
            vec![nick.clone(), username, hostname, "*".into(), realname],
        );
        if !visible_channels.is_empty() {
            cli.send_numeric(
                Numeric::RPL_WHOISCHANNELS,
                vec![nick.clone(), format!("{} ", visible_channels.join(" "))],
            );
        }
        cli.send_numeric(
            Numeric::RPL_WHOISSERVER,
            vec![
                nick.clone(),
                ctx.server_name().to_string(),
                ctx.conf.server.description.clone(),
            ],
        );
        if let Some(role) = role.as_deref().and_then(|r| ctx.roles.get(r)) {
            cli.send_numeric(
                Numeric::RPL_WHOISOPERATOR,
                vec![nick.clone(), role.whois_line.clone()],
            );
        }
        if let Some(account) = account {
            cli.send_numeric(
                Numeric::RPL_WHOISACCOUNT,
                vec![nick.clone(), account, "is logged in as".into()],
            );
        }
        if let Some(away) = away {
            cli.send_numeric(Numeric::RPL_AWAY, vec![nick.clone(), away]);
        }
        cli.send_numeric(
            Numeric::RPL_WHOISIDLE,
            vec![
                nick.clone(),
                idle.to_string(),
                signon.to_string(),
                "seconds idle, signon time".into(),
            ],
        );
        cli.send_numeric(
            Numeric::RPL_ENDOFWHOIS,
            vec![nick, "End of /WHOIS list.".into()],
        );
        Ok(())
    }
}

struct WhoHandler;

#[async_trait]
impl CommandHandler for WhoHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let target = msg.params[0].clone();
        let oper_only = msg.params.get(1).is_some_and(|f| f.contains('o'));

        let send_line = |peer: &Arc<ClientRef>, status_suffix: &str| {
            let state = peer.state.read();
            if oper_only && !state.has_prop("special:oper") {
                return;
            }
            let status = format!("{}{}", state.status(), status_suffix);
            cli.send_numeric(
                Numeric::RPL_WHOREPLY,
                vec![
                    target.clone(),
                    state.username.clone(),
                    state.hostname.clone(),
                    state.servername.clone(),
                    state.nickname.clone(),
                    status,
                    format!("0 {}", state.realname),
                ],
            );
        };

        if target.starts_with('#') {
            if let Some(ch) = ctx.channel(&target) {
                let members: Vec<_> = ch
                    .read()
                    .members
                    .iter()
                    .map(|m| (m.conn, m.flags.prefix()))
                    .collect();
                for (conn, prefix) in members {
                    if let Some(peer) = ctx.client(conn) {
                        send_line(&peer, &prefix);
                    }
                }
            }
        } else if let Some(peer) = ctx.client_by_nick(&target) {
            send_line(&peer, "");
        }

        cli.send_numeric(
            Numeric::RPL_ENDOFWHO,
            vec![target, "End of /WHO list.".into()],
        );
        Ok(())
    }
}

struct WhowasHandler;

#[async_trait]
impl CommandHandler for WhowasHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let target = &msg.params[0];
        let entry = ctx.history.lock().get(target, ctx.now()).cloned();
        let Some(entry) = entry else {
            cli.send_numeric(
                Numeric::ERR_WASNOSUCHNICK,
                vec![target.clone(), "There was no such nickname".into()],
            );
            return Ok(());
        };

        cli.send_numeric(
            Numeric::RPL_WHOWASUSER,
            vec![
                entry.nickname.clone(),
                entry.username,
                entry.hostname,
                "*".into(),
                entry.realname,
            ],
        );
        cli.send_numeric(
            Numeric::RPL_WHOISSERVER,
            vec![
                entry.nickname.clone(),
                ctx.server_name().to_string(),
                ctx.conf.server.description.clone(),
            ],
        );
        if let Some(account) = entry.account {
            cli.send_numeric(
                Numeric::RPL_WHOISACCOUNT,
                vec![entry.nickname.clone(), account, "was logged in as".into()],
            );
        }
        cli.send_numeric(
            Numeric::RPL_ENDOFWHOWAS,
            vec![entry.nickname, "End of WHOWAS".into()],
        );
        Ok(())
    }
}

struct IsonHandler;

#[async_trait]
impl CommandHandler for IsonHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let mut matches = Vec::new();
        for chunk in &msg.params {
            for nick in chunk.split_whitespace() {
                if ctx.client_by_nick(nick).is_some() {
                    matches.push(nick.to_string());
                }
            }
        }
        // ircII derivatives require the trailing space
        cli.send_numeric(
            Numeric::RPL_ISON,
            vec![format!("{} ", matches.join(" "))],
        );
        Ok(())
    }
}
