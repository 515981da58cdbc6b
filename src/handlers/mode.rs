//! MODE: user modes and legacy channel modes.
//!
//! A channel MODE change is applied against a before-snapshot of channel
//! props and member flags; the broadcast then encodes exactly the symmetric
//! difference between the snapshots, additions grouped after `+`, removals
//! after `-`, one letter per list element.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{casefold_eq, is_valid_channel, Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{CommandHandler, CommandRegistry, CommandSpec};
use crate::state::channel::{ChannelProps, MemberFlags};
use crate::state::client::{user_mode_prop, USER_MODE_PROPS};
use crate::state::{ClientRef, ConnId, ServerContext};

pub fn register(commands: &mut CommandRegistry) {
    commands.register("MODE", CommandSpec::new(1, Box::new(ModeHandler)));
}

/// Accumulates one consolidated mode change.
#[derive(Debug, Default, PartialEq)]
pub struct ModeDiff {
    plus: Vec<(char, Option<String>)>,
    minus: Vec<(char, Option<String>)>,
}

impl ModeDiff {
    pub fn add(&mut self, letter: char, arg: Option<String>) {
        self.plus.push((letter, arg));
    }

    pub fn remove(&mut self, letter: char, arg: Option<String>) {
        self.minus.push((letter, arg));
    }

    pub fn is_empty(&self) -> bool {
        self.plus.is_empty() && self.minus.is_empty()
    }

    /// Render as `(+letters-letters, args)`; arguments follow letter order,
    /// additions before removals.
    pub fn render(&self) -> Option<(String, Vec<String>)> {
        if self.is_empty() {
            return None;
        }
        let mut letters = String::new();
        let mut args = Vec::new();
        if !self.plus.is_empty() {
            letters.push('+');
            for (letter, arg) in &self.plus {
                letters.push(*letter);
                if let Some(arg) = arg {
                    args.push(arg.clone());
                }
            }
        }
        if !self.minus.is_empty() {
            letters.push('-');
            for (letter, arg) in &self.minus {
                letters.push(*letter);
                if let Some(arg) = arg {
                    args.push(arg.clone());
                }
            }
        }
        Some((letters, args))
    }
}

/// Diff two channel prop snapshots plus member-flag snapshots.
pub fn diff_channel_modes(
    before: &ChannelProps,
    after: &ChannelProps,
    members_before: &HashMap<ConnId, (String, MemberFlags)>,
    members_after: &HashMap<ConnId, (String, MemberFlags)>,
) -> ModeDiff {
    let mut diff = ModeDiff::default();

    for (letter, pick) in FLAG_PROPS {
        let (was, is) = (pick(before), pick(after));
        if !was && is {
            diff.add(*letter, None);
        } else if was && !is {
            diff.remove(*letter, None);
        }
    }

    for (letter, pick) in VALUE_PROPS {
        match (pick(before), pick(after)) {
            (None, Some(new)) => diff.add(*letter, Some(new.clone())),
            (Some(old), None) => diff.remove(*letter, Some(old.clone())),
            (Some(old), Some(new)) if old != new => diff.add(*letter, Some(new.clone())),
            _ => {}
        }
    }

    for (letter, pick) in LIST_PROPS {
        let old = pick(before).masks();
        let new = pick(after).masks();
        for mask in &new {
            if !old.iter().any(|m| casefold_eq(m, mask)) {
                diff.add(*letter, Some(mask.clone()));
            }
        }
        for mask in &old {
            if !new.iter().any(|m| casefold_eq(m, mask)) {
                diff.remove(*letter, Some(mask.clone()));
            }
        }
    }

    for (conn, (nick, after_flags)) in members_after {
        let before_flags = members_before
            .get(conn)
            .map(|(_, f)| *f)
            .unwrap_or_default();
        for (letter, pick) in MEMBER_MODES {
            let (was, is) = (pick(&before_flags), pick(after_flags));
            if !was && is {
                diff.add(*letter, Some(nick.clone()));
            } else if was && !is {
                diff.remove(*letter, Some(nick.clone()));
            }
        }
    }

    diff
}

type FlagPick = fn(&ChannelProps) -> bool;
type ValuePick = fn(&ChannelProps) -> Option<&String>;
type ListPick = fn(&ChannelProps) -> &crate::state::MaskList;
type MemberPick = fn(&MemberFlags) -> bool;

/// `n` is the inverse of `allow-external`: +n forbids outside messages.
const FLAG_PROPS: &[(char, FlagPick)] = &[
    ('s', |p| p.secret),
    ('m', |p| p.moderated),
    ('n', |p| !p.allow_external),
    ('i', |p| p.invite_only),
    ('t', |p| p.op_topic),
];

const VALUE_PROPS: &[(char, ValuePick)] = &[
    ('k', |p| p.key.as_ref()),
    ('l', |p| p.limit.as_ref()),
    ('f', |p| p.forward.as_ref()),
    ('j', |p| p.join_throttle.as_ref()),
];

const LIST_PROPS: &[(char, ListPick)] = &[
    ('b', |p| &p.ban),
    ('e', |p| &p.exempt),
    ('I', |p| &p.invite_exempt),
    ('q', |p| &p.quiet),
];

const MEMBER_MODES: &[(char, MemberPick)] = &[
    ('a', |f| f.admin),
    ('o', |f| f.op),
    ('h', |f| f.halfop),
    ('v', |f| f.voice),
];

struct ModeHandler;

#[async_trait]
impl CommandHandler for ModeHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let target = &msg.params[0];

        if casefold_eq(target, &cli.nick()) {
            handle_user_mode(cli, msg);
            return Ok(());
        }
        if !target.starts_with('#') {
            cli.send_numeric(
                Numeric::ERR_USERSDONTMATCH,
                vec!["Can't change mode for other users".into()],
            );
            return Ok(());
        }

        for chan in target.split(',') {
            if !is_valid_channel(chan) {
                cli.send_numeric(
                    Numeric::ERR_BADCHANNAME,
                    vec![chan.into(), "Illegal channel name".into()],
                );
                return Ok(());
            }
            let Some(ch) = ctx.channel(chan) else {
                cli.send_numeric(
                    Numeric::ERR_NOSUCHCHANNEL,
                    vec![chan.into(), "No such channel".into()],
                );
                continue;
            };

            let is_member = ch.read().has_member(cli.id);
            if !is_member {
                cli.send_numeric(
                    Numeric::ERR_NOTONCHANNEL,
                    vec![ch.read().name.clone(), "You're not on that channel".into()],
                );
                continue;
            }

            // inquiry
            if msg.params.len() == 1 {
                let (name, modes, ts) = {
                    let ch = ch.read();
                    (ch.name.clone(), ch.props.legacy_modes(), ch.props_ts)
                };
                let mut params: Vec<String> =
                    modes.split(' ').map(str::to_string).collect();
                params.insert(0, name.clone());
                cli.send_numeric(Numeric::RPL_CHANNELMODEIS, params);
                cli.send_numeric(Numeric::RPL_CREATIONTIME, vec![name, ts.to_string()]);
                continue;
            }

            apply_channel_mode(ctx, cli, &ch, &msg.params[1], &msg.params[2..]).await;
        }
        Ok(())
    }
}

fn handle_user_mode(cli: &Arc<ClientRef>, msg: &Message) {
    if msg.params.len() == 1 {
        let modes = cli.state.read().legacy_modes();
        cli.send_numeric(Numeric::RPL_UMODEIS, vec![modes]);
        return;
    }

    let before: Vec<bool> = {
        let state = cli.state.read();
        USER_MODE_PROPS.iter().map(|(p, _)| state.has_prop(p)).collect()
    };

    let mut adding = true;
    for letter in msg.params[1].chars() {
        match letter {
            '+' => adding = true,
            '-' => adding = false,
            // nobody opers themselves up with MODE
            'o' if adding => {}
            letter => match user_mode_prop(letter) {
                Some(prop) => {
                    cli.state.write().props.insert(prop, adding);
                }
                None => {
                    cli.send_numeric(
                        Numeric::ERR_UMODEUNKNOWNFLAG,
                        vec![letter.to_string(), "Unknown MODE flag".into()],
                    );
                }
            },
        }
    }

    let mut diff = ModeDiff::default();
    {
        let state = cli.state.read();
        for (i, (prop, letter)) in USER_MODE_PROPS.iter().enumerate() {
            let is = state.has_prop(prop);
            if is && !before[i] {
                diff.add(*letter, None);
            } else if !is && before[i] {
                diff.remove(*letter, None);
            }
        }
    }
    if let Some((letters, _)) = diff.render() {
        let mode_msg = Message::new("MODE", vec![cli.nick(), letters])
            .with_source(cli.hostmask_or_star());
        cli.send(mode_msg);
    }
}

async fn apply_channel_mode(
    ctx: &Arc<ServerContext>,
    cli: &Arc<ClientRef>,
    ch: &Arc<parking_lot::RwLock<crate::state::Channel>>,
    modestring: &str,
    args: &[String],
) {
    let now = ctx.now();
    let setter = cli.hostmask_or_star();

    // A bare list letter is a query, answered outside the write path.
    if let Some(list_letter) = lone_list_query(modestring, args) {
        let (name, entries) = {
            let ch = ch.read();
            let list = match list_letter {
                'b' => &ch.props.ban,
                'e' => &ch.props.exempt,
                'I' => &ch.props.invite_exempt,
                _ => &ch.props.quiet,
            };
            (
                ch.name.clone(),
                list.iter()
                    .map(|e| (e.mask.clone(), e.setter.clone(), e.ts))
                    .collect::<Vec<_>>(),
            )
        };
        for (mask, set_by, ts) in entries {
            cli.send_numeric(
                Numeric::RPL_BANLIST,
                vec![name.clone(), mask, set_by, ts.to_string()],
            );
        }
        cli.send_numeric(
            Numeric::RPL_ENDOFBANLIST,
            vec![name, "End of channel access list".into()],
        );
        return;
    }

    let broadcast = {
        let mut ch = ch.write();
        let caller_flags = ch.get_member(cli.id).map(|m| m.flags).unwrap_or_default();

        // Everything except list edits needs the set-modes member flag.
        if touches_non_list_prop(modestring) && !caller_flags.set_modes {
            cli.send_numeric(
                Numeric::ERR_CHANOPRIVSNEEDED,
                vec![ch.name.clone(), "You're not a channel operator".into()],
            );
            return;
        }

        let props_before = ch.props.clone();
        let members_before: HashMap<ConnId, (String, MemberFlags)> = ch
            .members
            .iter()
            .map(|m| (m.conn, (m.nickname.clone(), m.flags)))
            .collect();

        let mut adding = true;
        let mut args = args.iter();
        for letter in modestring.chars() {
            match letter {
                '+' => adding = true,
                '-' => adding = false,
                's' => ch.props.secret = adding,
                'm' => ch.props.moderated = adding,
                'n' => ch.props.allow_external = !adding,
                'i' => ch.props.invite_only = adding,
                't' => ch.props.op_topic = adding,
                'k' | 'l' | 'f' | 'j' => {
                    let slot = match letter {
                        'k' => &mut ch.props.key,
                        'l' => &mut ch.props.limit,
                        'f' => &mut ch.props.forward,
                        _ => &mut ch.props.join_throttle,
                    };
                    if adding {
                        if let Some(value) = args.next() {
                            *slot = Some(value.clone());
                        }
                    } else {
                        *slot = None;
                    }
                }
                'b' | 'e' | 'I' | 'q' => {
                    let Some(mask) = args.next() else { continue };
                    let list = match letter {
                        'b' => &mut ch.props.ban,
                        'e' => &mut ch.props.exempt,
                        'I' => &mut ch.props.invite_exempt,
                        _ => &mut ch.props.quiet,
                    };
                    if adding {
                        list.add(mask, &setter, now);
                    } else {
                        list.remove(mask);
                    }
                }
                'a' | 'o' | 'h' | 'v' => {
                    let Some(nick) = args.next() else { continue };
                    let Some(member) = ch
                        .members
                        .iter_mut()
                        .find(|m| casefold_eq(&m.nickname, nick))
                    else {
                        continue;
                    };
                    match letter {
                        'a' => member.flags.admin = adding,
                        'o' => {
                            member.flags.op = adding;
                            member.flags.set_modes = adding;
                        }
                        'h' => member.flags.halfop = adding,
                        _ => member.flags.voice = adding,
                    }
                }
                other => {
                    cli.send_numeric(
                        Numeric::ERR_UNKNOWNMODE,
                        vec![other.to_string(), "is unknown mode char to me".into()],
                    );
                }
            }
        }

        let members_after: HashMap<ConnId, (String, MemberFlags)> = ch
            .members
            .iter()
            .map(|m| (m.conn, (m.nickname.clone(), m.flags)))
            .collect();
        let diff =
            diff_channel_modes(&props_before, &ch.props, &members_before, &members_after);

        diff.render().map(|(letters, mode_args)| {
            ch.props_ts = now;
            let mut params = vec![ch.name.clone(), letters];
            params.extend(mode_args);
            Message::new("MODE", params).with_source(setter.clone())
        })
    };

    if let Some(mode_msg) = broadcast {
        ctx.dump_to_channel(ch, &mode_msg, &[], None, None);
    }
}

/// `MODE #chan b` with no mask argument lists the b list. Returns the letter
/// when the modestring is a single (optionally `+`-prefixed) list letter with
/// no argument supplied.
fn lone_list_query(modestring: &str, args: &[String]) -> Option<char> {
    if !args.is_empty() {
        return None;
    }
    let stripped = modestring.strip_prefix('+').unwrap_or(modestring);
    let mut chars = stripped.chars();
    match (chars.next(), chars.next()) {
        (Some(letter @ ('b' | 'e' | 'I' | 'q')), None) => Some(letter),
        _ => None,
    }
}

/// Whether the modestring touches anything other than a list prop.
fn touches_non_list_prop(modestring: &str) -> bool {
    modestring
        .chars()
        .any(|c| !matches!(c, '+' | '-' | 'b' | 'e' | 'I' | 'q'))
}
