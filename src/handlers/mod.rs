//! Command handlers and core-bus observers.
//!
//! One module per command family. `register_all` wires the fixed RFC 1459
//! command set into the protocol bus and layers the configured extension
//! observers onto the core bus.

pub mod away;
pub mod cap;
pub mod channel;
pub mod connection;
pub mod messaging;
pub mod metadata;
pub mod mode;
pub mod monitor;
pub mod notify;
pub mod oper;
pub mod register;
pub mod sasl;
pub mod server_query;
pub mod user_query;

use crate::config::Config;
use crate::events::{CommandRegistry, EventBus};

/// Wire every handler into the buses, honoring the extensions list.
pub fn register_all(commands: &mut CommandRegistry, events: &mut EventBus, conf: &Config) {
    connection::register(commands, events);
    cap::register(commands, events);
    channel::register(commands, events);
    mode::register(commands);
    messaging::register(commands, events, conf);
    away::register(commands, events, conf);
    user_query::register(commands);
    server_query::register(commands);
    oper::register(commands);

    if conf.extension_enabled("metadata") {
        metadata::register(commands, events);
    }
    if conf.extension_enabled("monitor") {
        monitor::register(commands, events);
    }
    if conf.extension_enabled("sasl") {
        sasl::register(commands, events);
    }
    if conf.extension_enabled("register") {
        register::register(commands, events);
    }
    if conf.extension_enabled("nopost") {
        connection::register_nopost(commands);
    }
    if conf.extension_enabled("account-notify") {
        notify::register(events);
    }
}
