//! METADATA: key-value metadata on clients and channels, with notify.
//!
//! Subcommands GET, LIST, SET, CLEAR. Restricted keys are visible and
//! settable only through role metakey grants; the per-target user-set key
//! count is capped by `metadata.limit` (restricted keys do not count).
//! Changes fan out as METADATA verbs to the target's "monitor list": its
//! MONITOR watchers plus common peers holding `metadata-notify`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rook_proto::{is_valid_metadata_key, Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{
    topic, CommandHandler, CommandRegistry, CommandSpec, Event, EventBus, EventHandler, EventInfo,
    MetadataTarget,
};
use crate::state::{Channel, ClientRef, ServerContext};

pub fn register(commands: &mut CommandRegistry, events: &mut EventBus) {
    commands.register("METADATA", CommandSpec::new(2, Box::new(MetadataHandler)));
    events.register(topic::METADATA_SET, 1, Box::new(MetadataSetApply));
    events.register(topic::METADATA_CLEAR, 1, Box::new(MetadataClearApply));
    events.register(topic::METADATA_DELETE, 1, Box::new(MetadataDeleteApply));
}

/// A resolved metadata target.
enum Resolved {
    Client(Arc<ClientRef>),
    Channel(Arc<RwLock<Channel>>),
}

impl Resolved {
    fn as_event_target(&self) -> MetadataTarget {
        match self {
            Resolved::Client(cli) => MetadataTarget::Client(cli.id),
            Resolved::Channel(ch) => MetadataTarget::Channel(ch.read().name.clone()),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        match self {
            Resolved::Client(cli) => cli.state.read().metadata.get(key).cloned(),
            Resolved::Channel(ch) => ch.read().metadata.get(key).cloned(),
        }
    }

    fn all(&self) -> Vec<(String, String)> {
        match self {
            Resolved::Client(cli) => cli
                .state
                .read()
                .metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            Resolved::Channel(ch) => ch
                .read()
                .metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn user_set_count(&self) -> usize {
        match self {
            Resolved::Client(cli) => cli.state.read().user_set_metadata.len(),
            Resolved::Channel(ch) => ch.read().user_set_metadata.len(),
        }
    }

    fn has_user_set(&self, key: &str) -> bool {
        match self {
            Resolved::Client(cli) => cli.state.read().user_set_metadata.contains(key),
            Resolved::Channel(ch) => ch.read().user_set_metadata.contains(key),
        }
    }
}

fn resolve_target(
    ctx: &Arc<ServerContext>,
    cli: &Arc<ClientRef>,
    target_name: &str,
) -> Option<Resolved> {
    if target_name == "*" {
        return Some(Resolved::Client(cli.clone()));
    }
    if let Some(ch) = ctx.channel(target_name) {
        return Some(Resolved::Channel(ch));
    }
    ctx.client_by_nick(target_name).map(Resolved::Client)
}

fn resolve_event_target(ctx: &Arc<ServerContext>, target: &MetadataTarget) -> Option<Resolved> {
    match target {
        MetadataTarget::Client(id) => ctx.client(*id).map(Resolved::Client),
        MetadataTarget::Channel(name) => ctx.channel(name).map(Resolved::Channel),
    }
}

/// Whether `cli` may edit metadata on `target` (self, `metadata:set_global`,
/// or `metadata:set_local` with a shared server).
fn able_to_edit(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, target: &Resolved) -> bool {
    if let Resolved::Client(peer) = target {
        if peer.id == cli.id {
            return true;
        }
    }
    let state = cli.state.read();
    let Some(role) = state.role.as_deref().and_then(|r| ctx.roles.get(r)) else {
        return false;
    };
    if role.has_capability("metadata:set_global") {
        return true;
    }
    if !role.has_capability("metadata:set_local") {
        return false;
    }
    // everything is local on a single node; clients carry servername anyway
    let own_server = state.servername.clone();
    drop(state);
    match target {
        Resolved::Client(peer) => peer.state.read().servername == own_server,
        Resolved::Channel(_) => true,
    }
}

fn is_restricted(ctx: &Arc<ServerContext>, key: &str) -> bool {
    ctx.conf
        .metadata
        .restricted_keys
        .iter()
        .any(|k| k.eq_ignore_ascii_case(key))
}

fn role_may_get(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, key: &str) -> bool {
    let state = cli.state.read();
    state
        .role
        .as_deref()
        .and_then(|r| ctx.roles.get(r))
        .is_some_and(|role| role.metakeys_get.contains(key))
}

fn role_may_set(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, key: &str) -> bool {
    let state = cli.state.read();
    state
        .role
        .as_deref()
        .and_then(|r| ctx.roles.get(r))
        .is_some_and(|role| role.metakeys_set.contains(key))
}

struct MetadataHandler;

#[async_trait]
impl CommandHandler for MetadataHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let target_name = msg.params[0].clone();
        let subcmd = msg.params[1].to_ascii_lowercase();

        if !matches!(subcmd.as_str(), "get" | "list" | "set" | "clear") {
            cli.send_numeric(
                Numeric::ERR_UNKNOWNERROR,
                vec!["METADATA".into(), subcmd, "Unknown subcommand".into()],
            );
            return Ok(());
        }

        let Some(target) = resolve_target(ctx, cli, &target_name) else {
            cli.send_numeric(
                Numeric::ERR_TARGETINVALID,
                vec![target_name, "invalid metadata target".into()],
            );
            return Ok(());
        };

        match subcmd.as_str() {
            "get" => handle_get(ctx, cli, msg, &target_name, &target),
            "list" => handle_list(ctx, cli, &target_name, &target),
            "set" => handle_set(ctx, cli, msg, &target_name, &target).await,
            "clear" => handle_clear(ctx, cli, &target_name, &target).await,
            _ => unreachable!(),
        }
        Ok(())
    }
}

fn handle_get(
    ctx: &Arc<ServerContext>,
    cli: &Arc<ClientRef>,
    msg: &Message,
    target_name: &str,
    target: &Resolved,
) {
    if msg.params.len() <= 2 {
        cli.send_numeric(
            Numeric::ERR_NEEDMOREPARAMS,
            vec!["METADATA".into(), "Not enough parameters".into()],
        );
        return;
    }

    for key in &msg.params[2..] {
        match target.get(key) {
            Some(value) => {
                let mut visibility = "*".to_string();
                if is_restricted(ctx, key) {
                    if role_may_get(ctx, cli, key) {
                        visibility = "server:restricted".into();
                    } else {
                        cli.send_numeric(
                            Numeric::ERR_NOMATCHINGKEY,
                            vec![key.clone(), "no matching keys".into()],
                        );
                        continue;
                    }
                }
                cli.send_numeric(
                    Numeric::RPL_KEYVALUE,
                    vec![target_name.into(), key.clone(), visibility, value],
                );
            }
            None if !is_valid_metadata_key(key) => {
                cli.send_numeric(
                    Numeric::ERR_KEYINVALID,
                    vec![key.clone(), "invalid metadata key".into()],
                );
            }
            None => {
                cli.send_numeric(
                    Numeric::ERR_NOMATCHINGKEY,
                    vec![key.clone(), "no matching keys".into()],
                );
            }
        }
    }
    cli.send_numeric(Numeric::RPL_METADATAEND, vec!["end of metadata".into()]);
}

fn handle_list(
    ctx: &Arc<ServerContext>,
    cli: &Arc<ClientRef>,
    target_name: &str,
    target: &Resolved,
) {
    for (key, value) in target.all() {
        let mut visibility = "*".to_string();
        if is_restricted(ctx, &key) {
            if role_may_get(ctx, cli, &key) {
                visibility = "server:restricted".into();
            } else {
                continue;
            }
        }
        cli.send_numeric(
            Numeric::RPL_KEYVALUE,
            vec![target_name.into(), key, visibility, value],
        );
    }
    cli.send_numeric(Numeric::RPL_METADATAEND, vec!["end of metadata".into()]);
}

async fn handle_set(
    ctx: &Arc<ServerContext>,
    cli: &Arc<ClientRef>,
    msg: &Message,
    target_name: &str,
    target: &Resolved,
) {
    let Some(key) = msg.params.get(2).cloned() else {
        cli.send_numeric(
            Numeric::ERR_NEEDMOREPARAMS,
            vec!["METADATA".into(), "Not enough parameters".into()],
        );
        return;
    };
    let value = msg.params.get(3).cloned();

    if !able_to_edit(ctx, cli, target) {
        cli.send_numeric(
            Numeric::ERR_KEYNOPERMISSION,
            vec![target_name.into(), "*".into(), "permission denied".into()],
        );
        return;
    }

    let restricted = is_restricted(ctx, &key);
    let meta_conf = &ctx.conf.metadata;
    let blacklisted = meta_conf
        .blacklist
        .iter()
        .any(|k| k.eq_ignore_ascii_case(&key));
    let whitelisted = meta_conf.whitelist.is_empty()
        || meta_conf
            .whitelist
            .iter()
            .any(|k| k.eq_ignore_ascii_case(&key))
        || restricted;
    if !is_valid_metadata_key(&key) || blacklisted || !whitelisted {
        cli.send_numeric(
            Numeric::ERR_KEYINVALID,
            vec![key, "invalid metadata key".into()],
        );
        return;
    }

    let mut visibility = "*".to_string();
    if restricted {
        if role_may_set(ctx, cli, &key) {
            visibility = "server:restricted".into();
        } else {
            cli.send_numeric(
                Numeric::ERR_KEYNOPERMISSION,
                vec![target_name.into(), key, "permission denied".into()],
            );
            return;
        }
    }

    // setting a fresh, unrestricted key counts against the limit
    if value.is_some() && !target.has_user_set(&key) && !restricted {
        if let Some(limit) = meta_conf.limit {
            if target.user_set_count() + 1 > limit {
                cli.send_numeric(
                    Numeric::ERR_METADATALIMIT,
                    vec![target_name.into(), "metadata limit reached".into()],
                );
                return;
            }
        }
    }

    ctx.events
        .emit(
            ctx,
            topic::METADATA_SET,
            Event::MetadataSet {
                source: cli.id,
                target: target.as_event_target(),
                target_name: target_name.into(),
                key,
                value,
                visibility,
            },
        )
        .await;
}

async fn handle_clear(
    ctx: &Arc<ServerContext>,
    cli: &Arc<ClientRef>,
    target_name: &str,
    target: &Resolved,
) {
    if !able_to_edit(ctx, cli, target) {
        cli.send_numeric(
            Numeric::ERR_KEYNOPERMISSION,
            vec![target_name.into(), "*".into(), "permission denied".into()],
        );
        return;
    }

    // Pre-compute per-key visibility; restricted keys the caller cannot set
    // are silently left alone (their existence is not disclosed).
    let mut keys = Vec::new();
    for (key, _) in target.all() {
        let mut visibility = "*".to_string();
        if is_restricted(ctx, &key) {
            if role_may_set(ctx, cli, &key) {
                visibility = "server:restricted".into();
            } else {
                continue;
            }
        }
        keys.push((key, visibility));
    }

    ctx.events
        .emit(
            ctx,
            topic::METADATA_CLEAR,
            Event::MetadataClear {
                source: cli.id,
                target: target.as_event_target(),
                target_name: target_name.into(),
                keys,
            },
        )
        .await;
}

/// Write or erase a key on the target, maintaining the user-set ledger.
fn set_key(ctx: &Arc<ServerContext>, target: &Resolved, key: &str, value: Option<&str>) {
    let restricted = is_restricted(ctx, key);
    match target {
        Resolved::Client(cli) => {
            let mut state = cli.state.write();
            match value {
                Some(value) => {
                    state.metadata.insert(key, value.to_string());
                    if !restricted {
                        state.user_set_metadata.insert(key);
                    }
                }
                None => {
                    state.metadata.remove(key);
                    state.user_set_metadata.remove(key);
                }
            }
        }
        Resolved::Channel(ch) => {
            let mut ch = ch.write();
            match value {
                Some(value) => {
                    ch.metadata.insert(key, value.to_string());
                    if !restricted {
                        ch.user_set_metadata.insert(key);
                    }
                }
                None => {
                    ch.metadata.remove(key);
                    ch.user_set_metadata.remove(key);
                }
            }
        }
    }
}

/// The target's monitor list: MONITOR watchers of its nick plus common peers
/// holding `metadata-notify`, source and target excluded. Channel targets
/// notify members holding the capability.
fn notify_recipients(
    ctx: &Arc<ServerContext>,
    source: &Arc<ClientRef>,
    target: &Resolved,
) -> Vec<Arc<ClientRef>> {
    let mut recipients: Vec<Arc<ClientRef>> = Vec::new();
    match target {
        Resolved::Client(peer) => {
            for watcher in ctx.monitor.watchers_of(&peer.nick()) {
                if let Some(cli) = ctx.client(watcher) {
                    if !recipients.iter().any(|r| r.id == cli.id) {
                        recipients.push(cli);
                    }
                }
            }
            for cli in ctx.common_peers(peer, &[], Some("metadata-notify")) {
                if !recipients.iter().any(|r| r.id == cli.id) {
                    recipients.push(cli);
                }
            }
            recipients.retain(|r| r.id != source.id && r.id != peer.id);
        }
        Resolved::Channel(ch) => {
            let members: Vec<_> = ch.read().members.iter().map(|m| m.conn).collect();
            for id in members {
                if id == source.id {
                    continue;
                }
                if let Some(cli) = ctx.client(id) {
                    if cli.has_cap("metadata-notify") {
                        recipients.push(cli);
                    }
                }
            }
        }
    }
    recipients
}

fn dump_notify(
    ctx: &Arc<ServerContext>,
    source: &Arc<ClientRef>,
    target: &Resolved,
    key: &str,
    args: &[String],
) {
    let restricted = is_restricted(ctx, key);
    for peer in notify_recipients(ctx, source, target) {
        if restricted && !role_may_get(ctx, &peer, key) {
            continue;
        }
        if peer.state.read().servername != ctx.server_name() {
            continue;
        }
        peer.send_verb("METADATA", args.to_vec());
    }
}

/// Default `metadata set` observer: apply, answer 761/762, fan out notify.
struct MetadataSetApply;

#[async_trait]
impl EventHandler for MetadataSetApply {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let Event::MetadataSet {
            source,
            target,
            target_name,
            key,
            value,
            visibility,
        } = &info.payload
        else {
            return Ok(());
        };
        let Some(source) = ctx.client(*source) else {
            return Ok(());
        };
        let Some(resolved) = resolve_event_target(ctx, target) else {
            return Ok(());
        };

        let mut args = vec![target_name.clone(), key.clone(), visibility.clone()];
        if let Some(value) = value {
            args.push(value.clone());
        }

        set_key(ctx, &resolved, key, value.as_deref());

        source.send_numeric(Numeric::RPL_KEYVALUE, args.clone());
        source.send_numeric(Numeric::RPL_METADATAEND, vec!["end of metadata".into()]);

        dump_notify(ctx, &source, &resolved, key, &args);
        Ok(())
    }
}

/// Default `metadata clear` observer: one 761 and one `metadata delete`
/// per key, then a single 762.
struct MetadataClearApply;

#[async_trait]
impl EventHandler for MetadataClearApply {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let (source_id, target, target_name, keys) = match &info.payload {
            Event::MetadataClear {
                source,
                target,
                target_name,
                keys,
            } => (*source, target.clone(), target_name.clone(), keys.clone()),
            _ => return Ok(()),
        };
        let Some(source) = ctx.client(source_id) else {
            return Ok(());
        };

        for (key, visibility) in keys {
            source.send_numeric(
                Numeric::RPL_KEYVALUE,
                vec![target_name.clone(), key.clone(), visibility.clone()],
            );
            ctx.events
                .emit(
                    ctx,
                    topic::METADATA_DELETE,
                    Event::MetadataDelete {
                        source: source_id,
                        target: target.clone(),
                        target_name: target_name.clone(),
                        key,
                        visibility,
                    },
                )
                .await;
        }
        source.send_numeric(Numeric::RPL_METADATAEND, vec!["end of metadata".into()]);
        Ok(())
    }
}

/// Default `metadata delete` observer: erase the key and fan out notify.
struct MetadataDeleteApply;

#[async_trait]
impl EventHandler for MetadataDeleteApply {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let Event::MetadataDelete {
            source,
            target,
            target_name,
            key,
            visibility,
        } = &info.payload
        else {
            return Ok(());
        };
        let Some(source) = ctx.client(*source) else {
            return Ok(());
        };
        let Some(resolved) = resolve_event_target(ctx, target) else {
            return Ok(());
        };

        set_key(ctx, &resolved, key, None);

        let args = vec![target_name.clone(), key.clone(), visibility.clone()];
        dump_notify(ctx, &source, &resolved, key, &args);
        Ok(())
    }
}
