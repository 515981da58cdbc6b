//! Codec round-trip coverage: parse(serialize(m)) == m for well-formed messages.

use rook_proto::{Message, Tag};

fn roundtrip(msg: &Message) {
    let wire = msg.to_string();
    let parsed = Message::parse(&wire);
    assert_eq!(&parsed, msg, "through wire form {wire:?}");
}

#[test]
fn plain_verbs() {
    roundtrip(&Message::new("QUIT", vec![]));
    roundtrip(&Message::new("NICK", vec!["alice".into()]));
    roundtrip(&Message::new(
        "USER",
        vec!["a".into(), "0".into(), "*".into(), "Alice Example".into()],
    ));
}

#[test]
fn numerics_with_source() {
    roundtrip(
        &Message::new(
            "001",
            vec![
                "alice".into(),
                "Welcome to the ExampleNet IRC Network, alice!a@alice.example".into(),
            ],
        )
        .with_source("irc.example"),
    );
}

#[test]
fn trailing_edge_cases() {
    // empty trailing
    roundtrip(&Message::new("TOPIC", vec!["#chan".into(), String::new()]));
    // trailing starting with a colon
    roundtrip(&Message::new("PRIVMSG", vec!["#chan".into(), ":-) hello".into()]));
    // fifteen middles
    let params: Vec<String> = (0..15).map(|i| format!("p{i}")).collect();
    roundtrip(&Message::new("FOO", params));
}

#[test]
fn tags_with_escaped_values() {
    let msg = Message {
        tags: vec![
            Tag::new("time", Some("2023-01-01T00:00:00.000Z")),
            Tag::new("account", Some("alice")),
            Tag::new("weird", Some("a;b c\\d\r\n")),
            Tag::new("flag", None::<String>),
        ],
        source: Some("nick!user@host".into()),
        verb: "PRIVMSG".into(),
        params: vec!["#chan".into(), "tagged message".into()],
    };
    roundtrip(&msg);
}

#[test]
fn parse_is_total_on_junk() {
    // None of these should panic, and each keeps what was recoverable.
    for junk in ["", "@", ":", "@ :", "@a=b", ":src", "   ", "@a=b :src"] {
        let _ = Message::parse(junk);
    }
}
