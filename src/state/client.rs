//! Per-connection client state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rook_proto::{format_server_time, CaseFoldMap, CaseFoldSet, Message, Numeric};
use tokio::sync::mpsc;

/// Connection identifier, stable across nick changes.
pub type ConnId = u64;

/// What the connection task pulls off a client's outbound queue.
#[derive(Debug)]
pub enum Outbound {
    /// Write one message.
    Line(Message),
    /// Flush and close the transport.
    Close,
}

/// Mutable per-connection state. Owned by a [`ClientRef`], locked briefly and
/// never across an await.
#[derive(Debug)]
pub struct Client {
    /// `*` until a valid NICK arrives.
    pub nickname: String,
    pub username: String,
    pub realname: String,
    /// rDNS-confirmed hostname, or the literal address.
    pub hostname: String,
    /// Literal peer address.
    pub realaddr: String,
    /// Always the local server's name (kept per client for the day s2s exists).
    pub servername: String,
    /// Enabled capability tokens.
    pub caps: CaseFoldSet,
    /// Flag properties: `special:oper`, `special:tls`, `user:invisible`, ...
    pub props: CaseFoldMap<bool>,
    pub metadata: CaseFoldMap<String>,
    /// Keys the user set, for the metadata limit.
    pub user_set_metadata: CaseFoldSet,
    /// Channels joined, cased names in join order.
    pub channels: Vec<String>,
    /// Nicknames this client MONITORs.
    pub monitoring: CaseFoldSet,
    /// Outstanding registration locks; empty + valid identity => registered.
    pub registration_lock: HashSet<&'static str>,
    pub registered: bool,
    pub connected: bool,
    /// Set once the exit sequence has been claimed; guards double-quit.
    pub exiting: bool,
    pub account: Option<String>,
    /// Role name; resolved against the context's role table.
    pub role: Option<String>,
    pub last_event_ts: i64,
    pub registration_ts: i64,
    /// Cookie of the one outstanding server PING, if any.
    pub ping_cookie: Option<u64>,
    pub last_pong: i64,
    pub tls: bool,
    /// CAP protocol version requested via CAP LS (301 when never negotiated).
    pub cap_version: u32,
    /// Mechanism of an in-flight AUTHENTICATE exchange.
    pub sasl_mechanism: Option<String>,
    /// Accumulated base64 chunks of the SASL payload.
    pub sasl_buffer: String,
}

impl Client {
    /// `nick!user@host`, defined exactly when registered.
    pub fn hostmask(&self) -> Option<String> {
        if !self.registered {
            return None;
        }
        Some(format!(
            "{}!{}@{}",
            self.nickname, self.username, self.hostname
        ))
    }

    /// WHO status: `H`ere or `G`one, with `*` for opers.
    pub fn status(&self) -> String {
        let mut st = String::new();
        if self.metadata.contains_key("away") {
            st.push('G');
        } else {
            st.push('H');
        }
        if self.props.get("special:oper").copied().unwrap_or(false) {
            st.push('*');
        }
        st
    }

    /// The away message lives in metadata under `away`.
    pub fn away_message(&self) -> Option<&String> {
        self.metadata.get("away")
    }

    pub fn has_prop(&self, name: &str) -> bool {
        self.props.get(name).copied().unwrap_or(false)
    }

    /// Legacy user mode rendering (`+i`, `+w`, `+o`).
    pub fn legacy_modes(&self) -> String {
        let mut out = String::from("+");
        for (prop, letter) in USER_MODE_PROPS {
            if self.has_prop(prop) {
                out.push(*letter);
            }
        }
        out
    }
}

/// Flag-prop to legacy user mode letter mapping, in emission order.
pub const USER_MODE_PROPS: &[(&str, char)] = &[
    ("user:invisible", 'i'),
    ("user:wallops", 'w'),
    ("special:oper", 'o'),
];

/// Letters accepted in a user MODE change, mapped to props.
pub fn user_mode_prop(letter: char) -> Option<&'static str> {
    match letter {
        'i' => Some("user:invisible"),
        'w' => Some("user:wallops"),
        'o' => Some("special:oper"),
        _ => None,
    }
}

/// Shared handle to one connection: identity, outbound queue, and state.
pub struct ClientRef {
    pub id: ConnId,
    server_name: String,
    clock: Arc<AtomicI64>,
    tx: mpsc::UnboundedSender<Outbound>,
    pub state: RwLock<Client>,
}

impl ClientRef {
    /// Create the client for a fresh connection.
    pub fn new(
        id: ConnId,
        server_name: String,
        clock: Arc<AtomicI64>,
        tx: mpsc::UnboundedSender<Outbound>,
        realaddr: String,
        tls: bool,
    ) -> Arc<Self> {
        let now = clock.load(Ordering::Relaxed);
        let mut props = CaseFoldMap::new();
        if tls {
            props.insert("special:tls", true);
        }
        Arc::new(ClientRef {
            id,
            server_name: server_name.clone(),
            clock,
            tx,
            state: RwLock::new(Client {
                nickname: "*".into(),
                username: String::new(),
                realname: "<unregistered>".into(),
                hostname: realaddr.clone(),
                realaddr,
                servername: server_name,
                caps: CaseFoldSet::new(),
                props,
                metadata: CaseFoldMap::new(),
                user_set_metadata: CaseFoldSet::new(),
                channels: Vec::new(),
                monitoring: CaseFoldSet::new(),
                registration_lock: HashSet::from(["NICK", "USER", "DNS"]),
                registered: false,
                connected: true,
                exiting: false,
                account: None,
                role: None,
                last_event_ts: now,
                registration_ts: 0,
                ping_cookie: None,
                last_pong: now,
                tls,
                cap_version: 301,
                sasl_mechanism: None,
                sasl_buffer: String::new(),
            }),
        })
    }

    fn now(&self) -> i64 {
        self.clock.load(Ordering::Relaxed)
    }

    pub fn nick(&self) -> String {
        self.state.read().nickname.clone()
    }

    pub fn is_registered(&self) -> bool {
        self.state.read().registered
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn has_cap(&self, name: &str) -> bool {
        self.state.read().caps.contains(name)
    }

    /// `nick!user@host` when registered.
    pub fn hostmask(&self) -> Option<String> {
        self.state.read().hostmask()
    }

    /// Hostmask, or `*` before registration (SASL 900 uses this).
    pub fn hostmask_or_star(&self) -> String {
        self.hostmask().unwrap_or_else(|| "*".into())
    }

    pub fn update_idle(&self) {
        let now = self.now();
        self.state.write().last_event_ts = now;
    }

    /// Queue a message, applying per-connection postprocessing: recipients
    /// with `server-time` get an `@time` tag on untagged messages. Writes to
    /// a closed connection are silently dropped.
    pub fn send(&self, msg: Message) {
        let out = {
            let state = self.state.read();
            if !state.connected {
                return;
            }
            if state.caps.contains("server-time") && msg.tag_value("time").is_none() {
                msg.with_tag("time", Some(format_server_time(self.now())))
            } else {
                msg
            }
        };
        let _ = self.tx.send(Outbound::Line(out));
    }

    /// Queue a numeric: source is the server, first parameter the nickname.
    pub fn send_numeric(&self, numeric: Numeric, params: Vec<String>) {
        let mut full = Vec::with_capacity(params.len() + 1);
        full.push(self.nick());
        full.extend(params);
        self.send(Message::new(numeric.to_string(), full).with_source(self.server_name.clone()));
    }

    /// Queue a server NOTICE (`*** text`).
    pub fn send_notice(&self, text: impl std::fmt::Display) {
        self.send(
            Message::new("NOTICE", vec![self.nick(), format!("*** {text}")])
                .with_source(self.server_name.clone()),
        );
    }

    /// Queue a verb sourced from the server.
    pub fn send_verb(&self, verb: &str, params: Vec<String>) {
        self.send(Message::new(verb, params).with_source(self.server_name.clone()));
    }

    /// Ask the connection task to flush and close.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Add registration locks; no-op once registered.
    pub fn push_registration_lock(&self, locks: &[&'static str]) {
        let mut state = self.state.write();
        if state.registered {
            return;
        }
        state.registration_lock.extend(locks);
    }

    /// Remove registration locks. Returns true when the set became empty and
    /// the caller should attempt the connected -> registered transition.
    pub fn release_registration_lock(&self, locks: &[&'static str]) -> bool {
        let mut state = self.state.write();
        if state.registered {
            return false;
        }
        for lock in locks {
            state.registration_lock.remove(lock);
        }
        state.registration_lock.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> (Arc<ClientRef>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock = Arc::new(AtomicI64::new(1_700_000_000));
        let cli = ClientRef::new(7, "irc.example".into(), clock, tx, "192.0.2.1".into(), false);
        (cli, rx)
    }

    #[test]
    fn starts_unregistered_with_initial_locks() {
        let (cli, _rx) = test_client();
        let state = cli.state.read();
        assert_eq!(state.nickname, "*");
        assert!(!state.registered);
        assert_eq!(
            state.registration_lock,
            HashSet::from(["NICK", "USER", "DNS"])
        );
        assert!(state.hostmask().is_none());
    }

    #[test]
    fn hostmask_defined_exactly_when_registered() {
        let (cli, _rx) = test_client();
        {
            let mut state = cli.state.write();
            state.nickname = "alice".into();
            state.username = "a".into();
            state.hostname = "alice.example".into();
            state.registered = true;
        }
        assert_eq!(cli.hostmask().as_deref(), Some("alice!a@alice.example"));
    }

    #[test]
    fn release_reports_empty_lock_set_once() {
        let (cli, _rx) = test_client();
        assert!(!cli.release_registration_lock(&["NICK"]));
        assert!(!cli.release_registration_lock(&["USER"]));
        assert!(cli.release_registration_lock(&["DNS"]));
    }

    #[test]
    fn send_numeric_prepends_nick_and_server_source() {
        let (cli, mut rx) = test_client();
        cli.state.write().nickname = "alice".into();
        cli.send_numeric(Numeric::RPL_WELCOME, vec!["Welcome".into()]);
        match rx.try_recv().unwrap() {
            Outbound::Line(msg) => {
                assert_eq!(msg.source.as_deref(), Some("irc.example"));
                assert_eq!(msg.verb, "001");
                assert_eq!(msg.params, vec!["alice", "Welcome"]);
            }
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn server_time_tag_added_for_capable_clients() {
        let (cli, mut rx) = test_client();
        cli.state.write().caps.insert("server-time");
        cli.send(Message::new("PING", vec!["x".into()]));
        match rx.try_recv().unwrap() {
            Outbound::Line(msg) => {
                assert!(msg.tag_value("time").is_some());
            }
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn sends_dropped_after_disconnect() {
        let (cli, mut rx) = test_client();
        cli.state.write().connected = false;
        cli.send(Message::new("PING", vec!["x".into()]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn status_reflects_away_and_oper() {
        let (cli, _rx) = test_client();
        {
            let mut state = cli.state.write();
            assert_eq!(state.status(), "H");
            state.metadata.insert("away", "afk".to_string());
            state.props.insert("special:oper", true);
        }
        assert_eq!(cli.state.read().status(), "G*");
    }

    #[test]
    fn legacy_modes_render() {
        let (cli, _rx) = test_client();
        {
            let mut state = cli.state.write();
            state.props.insert("user:invisible", true);
            state.props.insert("special:oper", true);
        }
        assert_eq!(cli.state.read().legacy_modes(), "+io");
    }
}
