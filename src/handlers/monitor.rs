//! MONITOR: presence notification lists.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{is_valid_nick, Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{
    topic, CommandHandler, CommandRegistry, CommandSpec, Event, EventBus, EventHandler, EventInfo,
};
use crate::state::{ClientRef, ServerContext};

pub fn register(commands: &mut CommandRegistry, events: &mut EventBus) {
    commands.register("MONITOR", CommandSpec::new(1, Box::new(MonitorHandler)));
    events.register(topic::CLIENT_CONNECT, 10, Box::new(MonitorOnConnect));
    events.register(topic::CLIENT_QUIT, 10, Box::new(MonitorOnQuit));
    events.register(topic::CLIENT_NICK, 10, Box::new(MonitorOnNickChange));
}

struct MonitorHandler;

#[async_trait]
impl CommandHandler for MonitorHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let subcmd = msg.params[0].to_ascii_lowercase();
        match subcmd.as_str() {
            "+" => handle_add(ctx, cli, msg),
            "-" => handle_remove(ctx, cli, msg),
            "c" => handle_clear(ctx, cli),
            "l" => handle_list(cli),
            "s" => handle_status(ctx, cli),
            other => {
                cli.send_numeric(
                    Numeric::ERR_UNKNOWNERROR,
                    vec![
                        "MONITOR".into(),
                        other.into(),
                        "Unknown subcommand".into(),
                    ],
                );
            }
        }
        Ok(())
    }
}

fn valid_targets(raw: Option<&String>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .filter(|t| is_valid_nick(t))
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn handle_add(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, msg: &Message) {
    let targets = valid_targets(msg.params.get(1));

    if let Some(limit) = ctx.conf.monitor.limit {
        let current = cli.state.read().monitoring.len();
        if current + targets.len() > limit {
            cli.send_numeric(
                Numeric::ERR_MONLISTFULL,
                vec![
                    limit.to_string(),
                    msg.params.get(1).cloned().unwrap_or_default(),
                    "Monitor list is full".into(),
                ],
            );
            return;
        }
    }

    let mut online = Vec::new();
    let mut offline = Vec::new();
    for target in targets {
        ctx.monitor.watch(&target, cli.id);
        cli.state.write().monitoring.insert(target.clone());
        if ctx.client_by_nick(&target).is_some() {
            online.push(target);
        } else {
            offline.push(target);
        }
    }

    if !online.is_empty() {
        cli.send_numeric(Numeric::RPL_MONONLINE, vec![online.join(",")]);
    }
    if !offline.is_empty() {
        cli.send_numeric(Numeric::RPL_MONOFFLINE, vec![offline.join(",")]);
    }
}

fn handle_remove(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, msg: &Message) {
    for target in valid_targets(msg.params.get(1)) {
        ctx.monitor.unwatch(&target, cli.id);
        cli.state.write().monitoring.remove(&target);
    }
}

fn handle_clear(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>) {
    let targets: Vec<String> = {
        let mut state = cli.state.write();
        let targets = state.monitoring.iter().map(str::to_string).collect();
        state.monitoring.clear();
        targets
    };
    ctx.monitor
        .drop_watcher(cli.id, targets.iter().map(String::as_str));
}

fn handle_list(cli: &Arc<ClientRef>) {
    let targets: Vec<String> = cli
        .state
        .read()
        .monitoring
        .iter()
        .map(str::to_string)
        .collect();
    cli.send_numeric(Numeric::RPL_MONLIST, vec![targets.join(",")]);
    cli.send_numeric(
        Numeric::RPL_ENDOFMONLIST,
        vec!["End of MONITOR list".into()],
    );
}

fn handle_status(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>) {
    let targets: Vec<String> = cli
        .state
        .read()
        .monitoring
        .iter()
        .map(str::to_string)
        .collect();
    let mut online = Vec::new();
    let mut offline = Vec::new();
    for target in targets {
        if ctx.client_by_nick(&target).is_some() {
            online.push(target);
        } else {
            offline.push(target);
        }
    }
    if !online.is_empty() {
        cli.send_numeric(Numeric::RPL_MONONLINE, vec![online.join(",")]);
    }
    if !offline.is_empty() {
        cli.send_numeric(Numeric::RPL_MONOFFLINE, vec![offline.join(",")]);
    }
}

/// Push 730/731 to every local watcher of a nickname.
fn notify_watchers(ctx: &Arc<ServerContext>, nick: &str, online: bool) {
    let numeric = if online {
        Numeric::RPL_MONONLINE
    } else {
        Numeric::RPL_MONOFFLINE
    };
    for watcher in ctx.monitor.watchers_of(nick) {
        let Some(watcher) = ctx.client(watcher) else { continue };
        // only local watchers; every client is local on a single node
        if watcher.state.read().servername == ctx.server_name() {
            watcher.send_numeric(numeric, vec![nick.to_string()]);
        }
    }
}

struct MonitorOnConnect;

#[async_trait]
impl EventHandler for MonitorOnConnect {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::ClientConnect { client } = &info.payload {
            if let Some(cli) = ctx.client(*client) {
                notify_watchers(ctx, &cli.nick(), true);
            }
        }
        Ok(())
    }
}

struct MonitorOnQuit;

#[async_trait]
impl EventHandler for MonitorOnQuit {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::ClientQuit { nick, .. } = &info.payload {
            notify_watchers(ctx, nick, false);
        }
        Ok(())
    }
}

struct MonitorOnNickChange;

#[async_trait]
impl EventHandler for MonitorOnNickChange {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::ClientNick { old, new, .. } = &info.payload {
            notify_watchers(ctx, old, false);
            notify_watchers(ctx, new, true);
        }
        Ok(())
    }
}
