//! The two event fabrics.
//!
//! The **protocol bus** maps an uppercased verb to its handlers and wraps
//! each with the standard checks: registration gating (451), minimum
//! parameter count (461), optional idle-stamp refresh, and the unknown-verb
//! fallback (421).
//!
//! The **core bus** maps free-form topic strings to prioritized observers.
//! Dispatch is synchronous within a topic, ascending by priority; an
//! observer that errors is logged and skipped, and the rest still run.
//! Observers share one mutable [`EventInfo`], so mutations made by an early
//! handler are visible to later ones in the same dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{CaseFoldMap, Message, Numeric};
use tracing::{debug, warn};

use crate::error::HandlerResult;
use crate::state::{ClientRef, ConnId, ServerContext};

/// A protocol-bus handler: consumes one incoming message from a client.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult;
}

/// A core-bus observer.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult;
}

/// Well-known core-bus topics. SASL and REG additionally dispatch dynamic
/// topics (`sasl authenticate plain`, `reg callback mailto`).
pub mod topic {
    pub const CLIENT_CONNECT: &str = "client connect";
    pub const CLIENT_QUIT: &str = "client quit";
    pub const CLIENT_KILLED: &str = "client killed";
    pub const CLIENT_AWAY: &str = "client away";
    pub const CLIENT_NICK: &str = "client nick";
    pub const CLIENT_MESSAGE: &str = "client message";
    pub const CHANNEL_MESSAGE: &str = "channel message";
    pub const CHANNEL_JOIN: &str = "channel join";
    pub const CAP_ADD: &str = "cap add";
    pub const CAP_DEL: &str = "cap del";
    pub const ACCOUNT_CHANGE: &str = "account change";
    pub const METADATA_SET: &str = "metadata set";
    pub const METADATA_CLEAR: &str = "metadata clear";
    pub const METADATA_DELETE: &str = "metadata delete";
}

/// Target of a metadata operation.
#[derive(Debug, Clone)]
pub enum MetadataTarget {
    Client(ConnId),
    /// Cased channel name.
    Channel(String),
}

/// Typed event payloads, one shape per topic.
#[derive(Debug)]
pub enum Event {
    ClientConnect {
        client: ConnId,
    },
    ClientQuit {
        client: ConnId,
        nick: String,
        message: String,
    },
    ClientKilled {
        source: ConnId,
        client: ConnId,
        reason: String,
    },
    ClientAway {
        source: ConnId,
        away: Option<String>,
    },
    ClientNick {
        client: ConnId,
        old: String,
        new: String,
    },
    ClientMessage {
        source: ConnId,
        target: ConnId,
        target_name: String,
        message: String,
    },
    ChannelMessage {
        source: ConnId,
        /// Cased channel name.
        channel: String,
        target_name: String,
        message: String,
    },
    ChannelJoin {
        client: ConnId,
        channel: String,
    },
    CapAdd {
        client: ConnId,
        caps: Vec<String>,
    },
    CapDel {
        client: ConnId,
        caps: Vec<String>,
    },
    AccountChange {
        source: ConnId,
        account: Option<String>,
    },
    MetadataSet {
        source: ConnId,
        target: MetadataTarget,
        target_name: String,
        key: String,
        value: Option<String>,
        visibility: String,
    },
    MetadataClear {
        source: ConnId,
        target: MetadataTarget,
        target_name: String,
        /// `(key, visibility)` pairs, visibility pre-computed per key.
        keys: Vec<(String, String)>,
    },
    MetadataDelete {
        source: ConnId,
        target: MetadataTarget,
        target_name: String,
        key: String,
        visibility: String,
    },
    SaslAuthenticate {
        source: ConnId,
        mechanism: String,
        data: Vec<u8>,
    },
    RegCallback {
        source: ConnId,
        account: String,
        namespace: String,
        callback: Option<String>,
        auth_code: String,
    },
}

/// A dispatched event: the typed payload plus a free-form sidecar observers
/// may use to pass notes to later handlers in the same dispatch.
#[derive(Debug)]
pub struct EventInfo {
    pub payload: Event,
    pub notes: CaseFoldMap<String>,
}

impl EventInfo {
    pub fn new(payload: Event) -> Self {
        EventInfo {
            payload,
            notes: CaseFoldMap::new(),
        }
    }
}

/// The core bus.
#[derive(Default)]
pub struct EventBus {
    topics: HashMap<String, Vec<(i32, Box<dyn EventHandler>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Register an observer at a priority; lower runs first.
    pub fn register(&mut self, topic: &str, priority: i32, handler: Box<dyn EventHandler>) {
        let handlers = self.topics.entry(topic.to_string()).or_default();
        handlers.push((priority, handler));
        handlers.sort_by_key(|(p, _)| *p);
    }

    /// Dispatch one event through every observer of `topic`, ascending by
    /// priority. Observer errors are logged; the rest still run.
    pub async fn dispatch(&self, ctx: &Arc<ServerContext>, topic: &str, info: &mut EventInfo) {
        let Some(handlers) = self.topics.get(topic) else {
            debug!(topic, "core event with no observers");
            return;
        };
        for (priority, handler) in handlers {
            if let Err(e) = handler.handle(ctx, info).await {
                warn!(topic, priority, error = %e, "core event handler failed");
            }
        }
    }

    /// Convenience wrapper building the envelope.
    pub async fn emit(&self, ctx: &Arc<ServerContext>, topic: &str, payload: Event) {
        let mut info = EventInfo::new(payload);
        self.dispatch(ctx, topic, &mut info).await;
    }
}

/// One registered command handler with its wrapper flags.
pub struct CommandSpec {
    pub min_params: usize,
    pub allow_unregistered: bool,
    pub update_idle: bool,
    pub priority: i32,
    pub handler: Box<dyn CommandHandler>,
}

impl CommandSpec {
    /// A well-known handler: registered-only, priority 10.
    pub fn new(min_params: usize, handler: Box<dyn CommandHandler>) -> Self {
        CommandSpec {
            min_params,
            allow_unregistered: false,
            update_idle: false,
            priority: 10,
            handler,
        }
    }

    pub fn allow_unregistered(mut self) -> Self {
        self.allow_unregistered = true;
        self
    }

    pub fn update_idle(mut self) -> Self {
        self.update_idle = true;
        self
    }
}

/// The protocol bus: uppercased verb -> prioritized handlers.
#[derive(Default)]
pub struct CommandRegistry {
    verbs: HashMap<String, Vec<CommandSpec>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry::default()
    }

    pub fn register(&mut self, verb: &str, spec: CommandSpec) {
        let handlers = self.verbs.entry(verb.to_ascii_uppercase()).or_default();
        handlers.push(spec);
        handlers.sort_by_key(|s| s.priority);
    }

    /// Dispatch an incoming message. Unknown verbs draw a 421; each handler
    /// is individually wrapped with the 451/461 checks so observer handlers
    /// on the same verb are unaffected by one another.
    pub async fn dispatch(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) {
        let verb = msg.verb_uppercase();
        let Some(specs) = self.verbs.get(&verb) else {
            cli.send_numeric(
                Numeric::ERR_UNKNOWNCOMMAND,
                vec![verb, "Unknown command".into()],
            );
            return;
        };

        for spec in specs {
            if !spec.allow_unregistered && !cli.is_registered() {
                cli.send_numeric(
                    Numeric::ERR_NOTREGISTERED,
                    vec!["You have not registered".into()],
                );
                continue;
            }
            if msg.params.len() < spec.min_params {
                cli.send_numeric(
                    Numeric::ERR_NEEDMOREPARAMS,
                    vec![verb.clone(), "Not enough parameters".into()],
                );
                continue;
            }
            if spec.update_idle {
                cli.update_idle();
            }
            if let Err(e) = spec.handler.handle(ctx, cli, msg).await {
                warn!(verb = %verb, error = %e, "command handler failed");
            }
        }
    }
}
