//! # rook-proto
//!
//! The wire-format half of rookd: RFC 1459 framing with IRCv3 message tags,
//! plus the identifier utilities an ircd needs everywhere (ASCII casefolded
//! collections, nick/channel validators, hostmask globs, numeric tables).
//!
//! ## Quick start
//!
//! ```rust
//! use rook_proto::Message;
//!
//! let msg = Message::parse("@time=2023-01-01T12:00:00Z :nick!u@h PRIVMSG #chan :Hello!");
//! assert_eq!(msg.verb, "PRIVMSG");
//! assert_eq!(msg.params, vec!["#chan".to_string(), "Hello!".to_string()]);
//!
//! let out = Message::new("PRIVMSG", vec!["#chan".into(), "Hello there".into()]);
//! assert_eq!(out.to_string(), "PRIVMSG #chan :Hello there");
//! ```

pub mod casemap;
pub mod collections;
pub mod hostmask;
pub mod isupport;
pub mod message;
pub mod numeric;
pub mod servertime;
pub mod tags;
pub mod validate;

pub use self::casemap::{casefold, casefold_eq};
pub use self::collections::{CaseFoldMap, CaseFoldSet, ExpiringMap};
pub use self::hostmask::matches_hostmask;
pub use self::isupport::IsupportBuilder;
pub use self::message::{Message, Tag};
pub use self::numeric::Numeric;
pub use self::servertime::format_server_time;
pub use self::tags::{escape_tag_value, unescape_tag_value};
pub use self::validate::{is_valid_channel, is_valid_metadata_key, is_valid_nick};

/// Hard upper bound on a serialized IRC line, CRLF included.
pub const MAX_LINE_LEN: usize = 512;

/// At most this many middle parameters before the trailing parameter.
pub const MAX_PARAMS: usize = 15;
