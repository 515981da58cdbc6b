//! The process-wide server context.
//!
//! One value, created at boot and threaded through every handler as
//! `&Arc<ServerContext>`. Holds the client and channel tables, the role
//! table, both event buses, the capability registry, the MONITOR index, the
//! WHOWAS history and the account store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rook_proto::{casefold, ExpiringMap, IsupportBuilder, Message, Numeric};

use crate::caps::{build_registry, CapRegistry};
use crate::config::Config;
use crate::events::{topic, CommandRegistry, Event, EventBus};
use crate::state::channel::Channel;
use crate::state::client::{ClientRef, ConnId};
use crate::state::history::{HistoryEntry, HISTORY_MAX_AGE_SECS, HISTORY_MAX_LEN};
use crate::state::monitor::MonitorIndex;
use crate::state::roles::{resolve_roles, Role};
use crate::store::AccountStore;

/// Server version string used in 002/004/351.
pub const VERSION: &str = concat!("rookd-", env!("CARGO_PKG_VERSION"));

pub struct ServerContext {
    pub conf: Config,
    /// MOTD lines resolved at boot.
    pub motd: Vec<String>,
    /// Every live connection, registered or not.
    pub clients: DashMap<ConnId, Arc<ClientRef>>,
    /// Registered nicknames (casefolded) to connections.
    pub nicks: DashMap<String, ConnId>,
    /// Channels by casefolded name.
    pub channels: DashMap<String, Arc<RwLock<Channel>>>,
    pub roles: HashMap<String, Role>,
    pub caps: CapRegistry,
    pub monitor: MonitorIndex,
    pub history: Mutex<ExpiringMap<HistoryEntry>>,
    pub store: AccountStore,
    /// Wall clock, refreshed once per second by a ticker task.
    pub current_ts: Arc<AtomicI64>,
    /// Human-readable start time for 003.
    pub startstamp: String,
    pub commands: CommandRegistry,
    pub events: EventBus,
    next_conn_id: AtomicU64,
}

impl ServerContext {
    pub fn new(
        conf: Config,
        store: AccountStore,
        commands: CommandRegistry,
        events: EventBus,
    ) -> Arc<Self> {
        let now = chrono::Utc::now();
        let motd = conf.motd_lines();
        let caps = build_registry(&conf);
        let roles = resolve_roles(&conf.role);
        Arc::new(ServerContext {
            motd,
            caps,
            roles,
            conf,
            clients: DashMap::new(),
            nicks: DashMap::new(),
            channels: DashMap::new(),
            monitor: MonitorIndex::new(),
            history: Mutex::new(ExpiringMap::new(HISTORY_MAX_LEN, HISTORY_MAX_AGE_SECS)),
            store,
            current_ts: Arc::new(AtomicI64::new(now.timestamp())),
            startstamp: now.to_rfc2822(),
            commands,
            events,
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.conf.server.name
    }

    /// Wall-clock seconds, at one-second granularity.
    pub fn now(&self) -> i64 {
        self.current_ts.load(Ordering::Relaxed)
    }

    pub fn allocate_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn client(&self, id: ConnId) -> Option<Arc<ClientRef>> {
        self.clients.get(&id).map(|r| r.value().clone())
    }

    /// Look up a registered client by nickname.
    pub fn client_by_nick(&self, nick: &str) -> Option<Arc<ClientRef>> {
        let id = *self.nicks.get(&casefold(nick))?;
        self.client(id)
    }

    pub fn channel(&self, name: &str) -> Option<Arc<RwLock<Channel>>> {
        self.channels.get(&casefold(name)).map(|r| r.value().clone())
    }

    /// Fetch or create a channel; fresh channels get `props_ts = now`.
    pub fn channel_get_or_create(&self, name: &str) -> Arc<RwLock<Channel>> {
        self.channels
            .entry(casefold(name))
            .or_insert_with(|| Arc::new(RwLock::new(Channel::new(name, self.now()))))
            .value()
            .clone()
    }

    /// Drop a channel once its last member left.
    pub fn discard_channel_if_empty(&self, name: &str) {
        self.channels
            .remove_if(&casefold(name), |_, ch| ch.read().members.is_empty());
    }

    /// The union of clients sharing any channel with `cli`, in member-list
    /// order, self included unless excluded. `cap` filters recipients to
    /// holders of a capability.
    pub fn common_peers(
        &self,
        cli: &Arc<ClientRef>,
        exclude: &[ConnId],
        cap: Option<&str>,
    ) -> Vec<Arc<ClientRef>> {
        let channel_names = cli.state.read().channels.clone();
        let mut ids: Vec<ConnId> = Vec::new();
        for name in &channel_names {
            if let Some(ch) = self.channel(name) {
                for member in &ch.read().members {
                    if !ids.contains(&member.conn) {
                        ids.push(member.conn);
                    }
                }
            }
        }
        if !ids.contains(&cli.id) {
            ids.push(cli.id);
        }
        ids.retain(|id| !exclude.contains(id));

        ids.iter()
            .filter_map(|id| self.client(*id))
            .filter(|peer| cap.is_none_or(|cap| peer.has_cap(cap)))
            .collect()
    }

    /// Broadcast to a channel in member-insertion order.
    ///
    /// `exclude` connections are skipped; `cap` requires a capability on the
    /// recipient; `exclude_cap` skips recipients holding one.
    pub fn dump_to_channel(
        &self,
        channel: &Arc<RwLock<Channel>>,
        msg: &Message,
        exclude: &[ConnId],
        cap: Option<&str>,
        exclude_cap: Option<&str>,
    ) {
        let member_ids: Vec<ConnId> = channel.read().members.iter().map(|m| m.conn).collect();
        for id in member_ids {
            if exclude.contains(&id) {
                continue;
            }
            let Some(peer) = self.client(id) else { continue };
            if let Some(cap) = cap {
                if !peer.has_cap(cap) {
                    continue;
                }
            }
            if let Some(cap) = exclude_cap {
                if peer.has_cap(cap) {
                    continue;
                }
            }
            peer.send(msg.clone());
        }
    }

    /// Re-enter the protocol bus for a mandatory side effect (JOIN's TOPIC
    /// and NAMES replies, the post-registration MOTD).
    pub async fn handle_side_effect(
        self: &Arc<Self>,
        cli: &Arc<ClientRef>,
        verb: &str,
        params: Vec<String>,
    ) {
        let mut msg = Message::new(verb, params);
        if let Some(hostmask) = cli.hostmask() {
            msg = msg.with_source(hostmask);
        }
        self.commands.dispatch(self, cli, &msg).await;
    }

    /// ISUPPORT burst (005).
    pub fn send_isupport(&self, cli: &Arc<ClientRef>) {
        let mut builder = IsupportBuilder::new();
        builder
            .token("NETWORK", &self.conf.server.network)
            .token("CLIENTVER", "3.2")
            .token("CASEMAPPING", "ascii")
            .token("CHARSET", "utf-8")
            .flag("SAFELIST")
            .token("CHANTYPES", "#");
        match self.conf.metadata.limit {
            Some(limit) => builder.token("METADATA", limit),
            None => builder.flag("METADATA"),
        };
        match self.conf.monitor.limit {
            Some(limit) => builder.token("MONITOR", limit),
            None => builder.flag("MONITOR"),
        };
        if self.conf.register.enabled {
            builder.token("REGCOMMANDS", "CREATE,VERIFY");
            builder.token("REGCALLBACKS", self.conf.register.callbacks.join(","));
            builder.token("REGCREDTYPES", "passphrase");
        }
        for line in builder.lines() {
            let mut params = line;
            params.push("are supported by this server".into());
            cli.send_numeric(Numeric::RPL_ISUPPORT, params);
        }
    }

    /// Attempt the connected -> registered transition. Called whenever a
    /// registration lock is released; a no-op until the lock set is empty.
    ///
    /// Two tasks can race here (rDNS completion against CAP END), so the
    /// whole claim happens under the client's write lock.
    pub async fn try_register(self: &Arc<Self>, cli: &Arc<ClientRef>) {
        let now = self.now();
        let (tls, hostmask) = {
            let mut state = cli.state.write();
            // A connection that already quit must not claim a nickname: the
            // rDNS task releases its lock whenever the lookup settles, which
            // can be long after the exit sequence ran.
            if state.exiting
                || !state.connected
                || state.registered
                || !state.registration_lock.is_empty()
                || state.nickname == "*"
                || state.username.is_empty()
            {
                return;
            }

            // Re-check uniqueness at the transition: two unregistered clients
            // may have claimed the same name; only registered nicks occupy
            // the index.
            match self.nicks.entry(casefold(&state.nickname)) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    let nick = state.nickname.clone();
                    state.registration_lock.insert("NICK");
                    drop(state);
                    cli.send_numeric(
                        Numeric::ERR_NICKNAMEINUSE,
                        vec![nick, "Nickname already in use".into()],
                    );
                    return;
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    entry.insert(cli.id);
                }
            }

            state.registered = true;
            state.registration_ts = now;
            state.last_event_ts = now;
            (state.tls, state.hostmask().unwrap_or_default())
        };

        if tls {
            cli.send_notice("You are connected using TLS");
        }

        cli.send_numeric(
            Numeric::RPL_WELCOME,
            vec![format!(
                "Welcome to the {} IRC Network, {hostmask}",
                self.conf.server.network
            )],
        );
        cli.send_numeric(
            Numeric::RPL_YOURHOST,
            vec![format!(
                "Your host is {}, running version {VERSION}",
                self.server_name()
            )],
        );
        cli.send_numeric(
            Numeric::RPL_CREATED,
            vec![format!("This server was started at {}", self.startstamp)],
        );
        cli.send_numeric(
            Numeric::RPL_MYINFO,
            vec![self.server_name().to_string(), VERSION.into(), "iwo".into()],
        );
        self.send_isupport(cli);

        self.handle_side_effect(cli, "MOTD", vec![]).await;

        self.events
            .emit(self, topic::CLIENT_CONNECT, Event::ClientConnect { client: cli.id })
            .await;
    }

    /// Record a departed client in the WHOWAS history.
    fn record_history(&self, cli: &Arc<ClientRef>) {
        let entry = {
            let state = cli.state.read();
            HistoryEntry {
                nickname: state.nickname.clone(),
                username: state.username.clone(),
                hostname: state.hostname.clone(),
                realname: state.realname.clone(),
                account: state.account.clone(),
            }
        };
        let nickname = entry.nickname.clone();
        self.history.lock().insert(&nickname, entry, self.now());
    }

    /// The registered -> exited transition, in spec order: `client quit`
    /// event, QUIT broadcast to common peers (self included), channel
    /// cleanup, index removal, history insertion, transport close.
    pub async fn quit_client(self: &Arc<Self>, cli: &Arc<ClientRef>, message: &str) {
        // Claim the exit exactly once; KILL, flood, timeout and EOF can race.
        {
            let mut state = cli.state.write();
            if state.exiting {
                return;
            }
            state.exiting = true;
        }

        let nick = cli.nick();
        self.events
            .emit(
                self,
                topic::CLIENT_QUIT,
                Event::ClientQuit {
                    client: cli.id,
                    nick: nick.clone(),
                    message: message.to_string(),
                },
            )
            .await;

        let quit_msg = Message::new("QUIT", vec![message.to_string()])
            .with_source(cli.hostmask_or_star());
        for peer in self.common_peers(cli, &[], None) {
            peer.send(quit_msg.clone());
        }

        let (registered, channels, monitoring) = {
            let mut state = cli.state.write();
            state.connected = false;
            (
                state.registered,
                std::mem::take(&mut state.channels),
                state
                    .monitoring
                    .iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            )
        };

        for name in &channels {
            if let Some(ch) = self.channel(name) {
                ch.write().part(cli.id);
            }
            self.discard_channel_if_empty(name);
        }

        self.monitor
            .drop_watcher(cli.id, monitoring.iter().map(String::as_str));

        if registered {
            let folded = casefold(&nick);
            if self.nicks.get(&folded).map(|id| *id) == Some(cli.id) {
                self.nicks.remove(&folded);
            }
            self.record_history(cli);
        }

        self.clients.remove(&cli.id);
        cli.close();
    }

    /// Operator KILL: notify, then force the exit path.
    pub async fn kill_client(
        self: &Arc<Self>,
        source: &Arc<ClientRef>,
        target: &Arc<ClientRef>,
        reason: &str,
    ) {
        self.events
            .emit(
                self,
                topic::CLIENT_KILLED,
                Event::ClientKilled {
                    source: source.id,
                    client: target.id,
                    reason: reason.to_string(),
                },
            )
            .await;

        let kill_msg = Message::new("KILL", vec![target.nick(), reason.to_string()])
            .with_source(source.hostmask_or_star());
        target.send(kill_msg);

        let quit_reason = format!("Killed ({} ({reason}))", source.nick());
        self.quit_client(target, &quit_reason).await;
    }
}
