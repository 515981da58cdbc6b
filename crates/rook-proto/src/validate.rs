//! Identifier validation.

const NICK_SPECIAL: &str = "_-|^{}[]`";
const CHAN_EXTRA: &str = "`~!@#$%^&*()+=|\\<>/?";

fn is_nick_first_char(c: char) -> bool {
    c.is_ascii_alphabetic() || NICK_SPECIAL.contains(c)
}

fn is_nick_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || NICK_SPECIAL.contains(c)
}

/// Validate a nickname: a letter or special first, letters/digits/specials after.
pub fn is_valid_nick(nick: &str) -> bool {
    let mut chars = nick.chars();
    match chars.next() {
        Some(first) if is_nick_first_char(first) => chars.all(is_nick_char),
        _ => false,
    }
}

fn is_chan_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || NICK_SPECIAL.contains(c) || CHAN_EXTRA.contains(c)
}

/// Validate a channel name: `#` followed by channel-safe characters.
pub fn is_valid_channel(name: &str) -> bool {
    match name.strip_prefix('#') {
        Some(rest) => !rest.is_empty() && rest.chars().all(is_chan_char),
        None => false,
    }
}

/// Validate a metadata key: one or more of `[A-Za-z0-9_.:]`.
pub fn is_valid_metadata_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_nicks() {
        for nick in ["alice", "Alice", "a1", "[away]", "^grml", "nick_-`", "x|y"] {
            assert!(is_valid_nick(nick), "should accept {nick:?}");
        }
    }

    #[test]
    fn invalid_nicks() {
        for nick in ["", "1abc", "nick name", "héllo", "nick!", "#chan", "*"] {
            assert!(!is_valid_nick(nick), "should reject {nick:?}");
        }
    }

    #[test]
    fn valid_channels() {
        for chan in ["#chan", "#a", "#rust-beginners", "#c++", "#w00t!"] {
            assert!(is_valid_channel(chan), "should accept {chan:?}");
        }
    }

    #[test]
    fn invalid_channels() {
        for chan in ["", "#", "chan", "&chan", "#with space", "#with,comma"] {
            assert!(!is_valid_channel(chan), "should reject {chan:?}");
        }
    }

    #[test]
    fn metadata_keys() {
        assert!(is_valid_metadata_key("url"));
        assert!(is_valid_metadata_key("server:example.key_1"));
        assert!(!is_valid_metadata_key(""));
        assert!(!is_valid_metadata_key("bad key"));
        assert!(!is_valid_metadata_key("bad-key"));
    }
}
