//! WHOWAS history entries.
//!
//! The bounded, aged map itself lives in rook-proto (`ExpiringMap`); the
//! context wraps it in a mutex. Capacity 1024, age 86400 s.

/// Snapshot of a departed client, keyed by its last nickname.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub nickname: String,
    pub username: String,
    pub hostname: String,
    pub realname: String,
    pub account: Option<String>,
}

/// WHOWAS retention bounds.
pub const HISTORY_MAX_LEN: usize = 1024;
pub const HISTORY_MAX_AGE_SECS: i64 = 86_400;
