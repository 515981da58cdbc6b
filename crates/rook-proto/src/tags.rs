//! IRCv3 message tag value escaping.

/// Escape a tag value for serialization per the message-tags spec.
pub fn escape_tag_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => escaped.push_str("\\:"),
            ' ' => escaped.push_str("\\s"),
            '\\' => escaped.push_str("\\\\"),
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Unescape a tag value from wire format.
///
/// A trailing lone backslash is dropped; an unknown escape yields the
/// escaped character itself, both per the IRCv3 spec.
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_semicolon() {
        assert_eq!(unescape_tag_value("a\\:b"), "a;b");
    }

    #[test]
    fn unescape_space() {
        assert_eq!(unescape_tag_value("hello\\sworld"), "hello world");
    }

    #[test]
    fn unescape_backslash_cr_lf() {
        assert_eq!(unescape_tag_value("p\\\\q"), "p\\q");
        assert_eq!(unescape_tag_value("a\\rb\\nc"), "a\rb\nc");
    }

    #[test]
    fn unescape_trailing_backslash_dropped() {
        assert_eq!(unescape_tag_value("test\\"), "test");
    }

    #[test]
    fn unescape_unknown_escape() {
        assert_eq!(unescape_tag_value("a\\xb"), "axb");
    }

    #[test]
    fn escape_roundtrip() {
        for original in [
            "simple",
            "with space",
            "with;semicolon",
            "with\\backslash",
            "with\nnewline",
            "with\rcarriage",
            "all; \\ \n \r of them",
        ] {
            let escaped = escape_tag_value(original);
            assert_eq!(
                unescape_tag_value(&escaped),
                original,
                "roundtrip failed for {original:?} via {escaped:?}"
            );
        }
    }
}
