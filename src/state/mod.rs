//! Server state: clients, channels, roles, history, monitor index, and the
//! process-wide context that ties them together.
//!
//! # Lock order (deadlock prevention)
//!
//! 1. DashMap shard lock (held only inside `.get()` / iteration)
//! 2. Channel `RwLock`
//! 3. Client `RwLock`
//!
//! Locks are `parking_lot` and are never held across an `.await`. Fanout
//! follows collect-then-send: gather the recipient list under the channel
//! lock, drop it, then push to each client's outbound queue.
//!
//! One sanctioned exception: the registration transition claims a nick-index
//! entry while holding the client's write lock. That cannot cycle because no
//! path keeps a nick-index guard alive across any other lock acquisition.

pub mod channel;
pub mod client;
pub mod context;
pub mod history;
pub mod monitor;
pub mod roles;

pub use channel::{Channel, ChannelProps, MaskEntry, MaskList, MemberFlags, Membership};
pub use client::{Client, ClientRef, ConnId, Outbound};
pub use context::ServerContext;
pub use history::HistoryEntry;
pub use monitor::MonitorIndex;
pub use roles::{resolve_roles, Role};
