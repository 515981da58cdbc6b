//! RFC 1459 message framing with IRCv3 tags.
//!
//! A frame is `[ '@' tags SP ] [ ':' source SP ] verb ( SP param )* [ SP ':' trailing ]`,
//! CRLF-terminated. Parsing is deliberately forgiving: a malformed line still
//! yields a [`Message`] carrying whatever could be recovered, and the caller
//! decides what to do with an empty verb. Serialization is byte-deterministic
//! for a given field assignment.

use std::fmt;

use crate::tags::{escape_tag_value, unescape_tag_value};

/// A single message tag: a name with an optional value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag name, e.g. `time` or `account`.
    pub name: String,
    /// Optional value; `None` serializes as a bare key.
    pub value: Option<String>,
}

impl Tag {
    /// Create a new tag.
    pub fn new(name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        Tag {
            name: name.into(),
            value: value.map(Into::into),
        }
    }
}

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// IRCv3 message tags, in wire order.
    pub tags: Vec<Tag>,
    /// Optional source prefix (without the leading `:`).
    pub source: Option<String>,
    /// The verb (command or three-digit numeric), exactly as given.
    pub verb: String,
    /// Positional parameters; the last one may contain spaces.
    pub params: Vec<String>,
}

impl Message {
    /// Construct a message from a verb and parameters.
    pub fn new(verb: impl Into<String>, params: Vec<String>) -> Self {
        Message {
            tags: Vec::new(),
            source: None,
            verb: verb.into(),
            params,
        }
    }

    /// Set the source prefix.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Append a tag.
    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    /// Look up a tag value by name.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.value.as_deref())
    }

    /// The verb folded to uppercase, the form used for dispatch.
    pub fn verb_uppercase(&self) -> String {
        self.verb.to_ascii_uppercase()
    }

    /// Parse a single line (CRLF already stripped or still attached).
    ///
    /// Never fails: fields that cannot be recovered are left empty.
    pub fn parse(line: &str) -> Message {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut msg = Message::default();

        if let Some(after) = rest.strip_prefix('@') {
            let (raw_tags, tail) = match after.split_once(' ') {
                Some((t, tail)) => (t, tail),
                None => (after, ""),
            };
            msg.tags = parse_tags(raw_tags);
            rest = tail.trim_start_matches(' ');
        }

        if let Some(after) = rest.strip_prefix(':') {
            let (source, tail) = match after.split_once(' ') {
                Some((s, tail)) => (s, tail),
                None => (after, ""),
            };
            if !source.is_empty() {
                msg.source = Some(source.to_string());
            }
            rest = tail.trim_start_matches(' ');
        }

        let (verb, tail) = match rest.split_once(' ') {
            Some((v, tail)) => (v, tail),
            None => (rest, ""),
        };
        msg.verb = verb.to_string();

        let mut rest = tail;
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                msg.params.push(trailing.to_string());
                break;
            }
            let (param, tail) = match rest.split_once(' ') {
                Some((p, tail)) => (p, tail.trim_start_matches(' ')),
                None => (rest, ""),
            };
            if !param.is_empty() {
                msg.params.push(param.to_string());
            }
            rest = tail;
        }

        msg
    }
}

fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(';')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut iter = pair.splitn(2, '=');
            let name = iter.next().unwrap_or("").to_string();
            let value = iter.next().map(unescape_tag_value);
            Tag { name, value }
        })
        .collect()
}

impl fmt::Display for Message {
    /// The final parameter is always emitted as the `:`-prefixed trailing
    /// parameter, whether or not it needs to be; parameters containing a
    /// space, an empty string, or a leading `:` can only appear there.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            f.write_str("@")?;
            for (i, tag) in self.tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                f.write_str(&tag.name)?;
                if let Some(value) = &tag.value {
                    write!(f, "={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }

        if let Some(source) = &self.source {
            write!(f, ":{source} ")?;
        }

        f.write_str(&self.verb)?;

        let last = self.params.len().checked_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if Some(i) == last {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_ping() {
        let msg = Message::parse("PING :irc.example\r\n");
        assert_eq!(msg.verb, "PING");
        assert_eq!(msg.params, vec!["irc.example"]);
        assert!(msg.source.is_none());
        assert!(msg.tags.is_empty());
    }

    #[test]
    fn parse_privmsg_with_source() {
        let msg = Message::parse(":nick!user@host PRIVMSG #channel :Hello, world!");
        assert_eq!(msg.source.as_deref(), Some("nick!user@host"));
        assert_eq!(msg.verb, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello, world!"]);
    }

    #[test]
    fn parse_tags_and_escapes() {
        let msg = Message::parse("@time=2023-01-01T00:00:00Z;key=a\\sb :n PRIVMSG #c :hi");
        assert_eq!(msg.tag_value("time"), Some("2023-01-01T00:00:00Z"));
        assert_eq!(msg.tag_value("key"), Some("a b"));
    }

    #[test]
    fn parse_valueless_tag() {
        let msg = Message::parse("@solanum.chat/oper TAGMSG #c");
        assert_eq!(msg.tags[0].name, "solanum.chat/oper");
        assert!(msg.tags[0].value.is_none());
    }

    #[test]
    fn parse_colon_inside_middle_param() {
        // a colon after the first character of a middle does not start trailing
        let msg = Message::parse("MODE #chan +b nick!u@1:2:3");
        assert_eq!(msg.params, vec!["#chan", "+b", "nick!u@1:2:3"]);
    }

    #[test]
    fn parse_empty_trailing() {
        let msg = Message::parse("TOPIC #chan :");
        assert_eq!(msg.params, vec!["#chan", ""]);
    }

    #[test]
    fn parse_recovers_from_malformed_input() {
        // bare prefix with nothing after it: verb is empty but nothing panics
        let msg = Message::parse(":only-a-source");
        assert_eq!(msg.source.as_deref(), Some("only-a-source"));
        assert_eq!(msg.verb, "");

        let msg = Message::parse("");
        assert_eq!(msg.verb, "");
        assert!(msg.params.is_empty());
    }

    #[test]
    fn serialize_trailing_rules() {
        let msg = Message::new("PRIVMSG", vec!["#c".into(), "two words".into()]);
        assert_eq!(msg.to_string(), "PRIVMSG #c :two words");

        // the final parameter always gets the colon, space or not
        let msg = Message::new("PRIVMSG", vec!["#c".into(), "hi".into()]);
        assert_eq!(msg.to_string(), "PRIVMSG #c :hi");

        let msg = Message::new("TOPIC", vec!["#c".into(), String::new()]);
        assert_eq!(msg.to_string(), "TOPIC #c :");

        let msg = Message::new("PRIVMSG", vec!["#c".into(), ":)".into()]);
        assert_eq!(msg.to_string(), "PRIVMSG #c ::)");

        let msg = Message::new("QUIT", vec![]);
        assert_eq!(msg.to_string(), "QUIT");
    }

    #[test]
    fn serialize_with_tags_and_source() {
        let msg = Message::new("PRIVMSG", vec!["#c".into(), "hi there".into()])
            .with_source("nick!u@h")
            .with_tag("time", Some("2023-01-01T00:00:00.000Z"));
        assert_eq!(
            msg.to_string(),
            "@time=2023-01-01T00:00:00.000Z :nick!u@h PRIVMSG #c :hi there"
        );
    }

    #[test]
    fn verb_case_preserved_but_dispatch_form_uppercased() {
        let msg = Message::parse("privmsg #c :x");
        assert_eq!(msg.verb, "privmsg");
        assert_eq!(msg.verb_uppercase(), "PRIVMSG");
    }

    #[test]
    fn roundtrip() {
        let cases = [
            "PING :token",
            ":irc.example 001 alice :Welcome to the ExampleNet IRC Network, alice!a@host",
            "@account=alice :alice!a@host PRIVMSG #chan :hello there",
            "CAP REQ :away-notify extended-join",
            "MONITOR + alice,bob",
            "@k;m=v\\:x QUIT :bye now",
        ];
        for case in cases {
            let parsed = Message::parse(case);
            let reparsed = Message::parse(&parsed.to_string());
            assert_eq!(parsed, reparsed, "roundtrip failed for {case:?}");
        }
    }
}
