//! Channels, memberships and channel properties.

use rook_proto::{casefold_eq, matches_hostmask, CaseFoldMap, CaseFoldSet};

use super::client::ConnId;

/// Per-member flags. `set_modes` gates property changes (482 otherwise).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberFlags {
    pub owner: bool,
    pub admin: bool,
    pub op: bool,
    pub halfop: bool,
    pub voice: bool,
    pub set_modes: bool,
}

impl MemberFlags {
    /// Flags granted to the member that creates a channel.
    pub fn founder() -> Self {
        MemberFlags {
            op: true,
            set_modes: true,
            ..Default::default()
        }
    }

    /// Prefix letters, highest first (`~&@%+`).
    pub fn prefix(&self) -> String {
        let mut p = String::new();
        if self.owner {
            p.push('~');
        }
        if self.admin {
            p.push('&');
        }
        if self.op {
            p.push('@');
        }
        if self.halfop {
            p.push('%');
        }
        if self.voice {
            p.push('+');
        }
        p
    }

    /// Whether this member may speak on a moderated channel.
    pub fn can_speak(&self) -> bool {
        self.voice || self.halfop || self.op || self.admin || self.owner
    }
}

/// One entry in a channel's ordered member list.
///
/// The nickname is cached for rendering; the NICK handler rewrites it on
/// nick changes so the cache and the client agree.
#[derive(Debug, Clone)]
pub struct Membership {
    pub conn: ConnId,
    pub nickname: String,
    pub flags: MemberFlags,
}

impl Membership {
    /// `@nick`-style rendering for NAMES.
    pub fn name(&self) -> String {
        format!("{}{}", self.flags.prefix(), self.nickname)
    }
}

/// One mask in a ban/exempt/invite-exempt/quiet list.
#[derive(Debug, Clone)]
pub struct MaskEntry {
    pub mask: String,
    /// Hostmask of the setter.
    pub setter: String,
    pub ts: i64,
}

/// An ordered mask list with case-insensitive dedup.
#[derive(Debug, Clone, Default)]
pub struct MaskList {
    entries: Vec<MaskEntry>,
}

impl MaskList {
    /// Add a mask; returns false if it was already present.
    pub fn add(&mut self, mask: &str, setter: &str, ts: i64) -> bool {
        if self.entries.iter().any(|e| casefold_eq(&e.mask, mask)) {
            return false;
        }
        self.entries.push(MaskEntry {
            mask: mask.to_string(),
            setter: setter.to_string(),
            ts,
        });
        true
    }

    /// Remove a mask; returns false if it was absent.
    pub fn remove(&mut self, mask: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !casefold_eq(&e.mask, mask));
        self.entries.len() != before
    }

    /// Whether any entry glob-matches the given hostmask.
    pub fn matches(&self, hostmask: &str) -> bool {
        self.entries.iter().any(|e| matches_hostmask(&e.mask, hostmask))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaskEntry> {
        self.entries.iter()
    }

    pub fn masks(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.mask.clone()).collect()
    }
}

/// Channel properties: flag toggles, argumented values, and mask lists.
#[derive(Debug, Clone, Default)]
pub struct ChannelProps {
    pub secret: bool,
    pub moderated: bool,
    pub allow_external: bool,
    pub invite_only: bool,
    pub op_topic: bool,
    pub key: Option<String>,
    pub limit: Option<String>,
    pub forward: Option<String>,
    pub join_throttle: Option<String>,
    pub ban: MaskList,
    pub exempt: MaskList,
    pub invite_exempt: MaskList,
    pub quiet: MaskList,
}

impl ChannelProps {
    /// Legacy mode rendering for 324, arguments included.
    pub fn legacy_modes(&self) -> String {
        let mut letters = String::from("+");
        let mut args = Vec::new();
        if self.secret {
            letters.push('s');
        }
        if self.moderated {
            letters.push('m');
        }
        if !self.allow_external {
            letters.push('n');
        }
        if self.invite_only {
            letters.push('i');
        }
        if self.op_topic {
            letters.push('t');
        }
        if let Some(key) = &self.key {
            letters.push('k');
            args.push(key.clone());
        }
        if let Some(limit) = &self.limit {
            letters.push('l');
            args.push(limit.clone());
        }
        if let Some(forward) = &self.forward {
            letters.push('f');
            args.push(forward.clone());
        }
        if let Some(throttle) = &self.join_throttle {
            letters.push('j');
            args.push(throttle.clone());
        }
        if args.is_empty() {
            letters
        } else {
            format!("{letters} {}", args.join(" "))
        }
    }
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDenied {
    /// +k set and the supplied key does not match (475).
    BadKey,
    /// A ban mask matches and no exemption does (474).
    Banned,
    /// Invite-only and no invite-exemption matches (silent, per source).
    InviteOnly,
}

/// A channel: ordered members, topic triple, props, metadata.
#[derive(Debug)]
pub struct Channel {
    /// Cased name as first created.
    pub name: String,
    pub members: Vec<Membership>,
    pub topic: String,
    pub topic_setter: String,
    pub topic_ts: i64,
    pub props: ChannelProps,
    pub metadata: CaseFoldMap<String>,
    pub user_set_metadata: CaseFoldSet,
    /// Creation / last privileged mode-change timestamp.
    pub props_ts: i64,
}

impl Channel {
    pub fn new(name: &str, now: i64) -> Self {
        Channel {
            name: name.to_string(),
            members: Vec::new(),
            topic: String::new(),
            topic_setter: String::new(),
            topic_ts: 0,
            props: ChannelProps::default(),
            metadata: CaseFoldMap::new(),
            user_set_metadata: CaseFoldSet::new(),
            props_ts: now,
        }
    }

    pub fn has_member(&self, conn: ConnId) -> bool {
        self.members.iter().any(|m| m.conn == conn)
    }

    pub fn get_member(&self, conn: ConnId) -> Option<&Membership> {
        self.members.iter().find(|m| m.conn == conn)
    }

    pub fn get_member_mut(&mut self, conn: ConnId) -> Option<&mut Membership> {
        self.members.iter_mut().find(|m| m.conn == conn)
    }

    /// Append a membership, preserving broadcast order.
    pub fn join(&mut self, conn: ConnId, nickname: &str, flags: MemberFlags) {
        self.members.push(Membership {
            conn,
            nickname: nickname.to_string(),
            flags,
        });
    }

    /// Stable removal, preserving the order of the remaining members.
    pub fn part(&mut self, conn: ConnId) {
        self.members.retain(|m| m.conn != conn);
    }

    /// Join authorization, in spec order: key, then exempt override, then
    /// bans, then invite-only.
    pub fn authorize(&self, hostmask: &str, key: Option<&str>) -> Result<(), JoinDenied> {
        if let Some(wanted) = &self.props.key {
            if key != Some(wanted.as_str()) {
                return Err(JoinDenied::BadKey);
            }
        }
        if self.props.exempt.matches(hostmask) {
            return Ok(());
        }
        if self.props.ban.matches(hostmask) {
            return Err(JoinDenied::Banned);
        }
        if self.props.invite_only && !self.props.invite_exempt.matches(hostmask) {
            return Err(JoinDenied::InviteOnly);
        }
        Ok(())
    }

    /// Whether `conn` may send to this channel.
    pub fn can_send(&self, conn: ConnId) -> bool {
        match self.get_member(conn) {
            Some(member) => !self.props.moderated || member.flags.can_speak(),
            None => self.props.allow_external && !self.props.moderated,
        }
    }

    /// Secret channels are only displayed to members.
    pub fn can_display(&self, conn: ConnId) -> bool {
        !self.props.secret || self.has_member(conn)
    }

    /// NAMES classification: `@` secret, `=` public.
    pub fn classification(&self) -> &'static str {
        if self.props.secret { "@" } else { "=" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_flags(op: bool, voice: bool) -> MemberFlags {
        MemberFlags {
            op,
            voice,
            ..Default::default()
        }
    }

    #[test]
    fn join_part_preserve_order() {
        let mut ch = Channel::new("#chan", 0);
        ch.join(1, "alice", MemberFlags::founder());
        ch.join(2, "bob", MemberFlags::default());
        ch.join(3, "carol", MemberFlags::default());
        ch.part(2);
        let order: Vec<_> = ch.members.iter().map(|m| m.conn).collect();
        assert_eq!(order, vec![1, 3]);
    }

    #[test]
    fn authorize_checks_key_first() {
        let mut ch = Channel::new("#chan", 0);
        ch.props.key = Some("sekrit".into());
        assert_eq!(
            ch.authorize("a!a@h", None),
            Err(JoinDenied::BadKey)
        );
        assert_eq!(
            ch.authorize("a!a@h", Some("wrong")),
            Err(JoinDenied::BadKey)
        );
        assert!(ch.authorize("a!a@h", Some("sekrit")).is_ok());
    }

    #[test]
    fn exempt_overrides_ban_and_invite() {
        let mut ch = Channel::new("#chan", 0);
        ch.props.ban.add("*!*@bad.example", "op!o@h", 0);
        ch.props.invite_only = true;
        ch.props.exempt.add("good!*@bad.example", "op!o@h", 0);

        assert_eq!(
            ch.authorize("evil!x@bad.example", None),
            Err(JoinDenied::Banned)
        );
        assert!(ch.authorize("good!x@bad.example", None).is_ok());
    }

    #[test]
    fn invite_only_denies_silently_without_exemption() {
        let mut ch = Channel::new("#chan", 0);
        ch.props.invite_only = true;
        assert_eq!(
            ch.authorize("a!a@h", None),
            Err(JoinDenied::InviteOnly)
        );
        ch.props.invite_exempt.add("*!*@h", "op!o@h", 0);
        assert!(ch.authorize("a!a@h", None).is_ok());
    }

    #[test]
    fn can_send_respects_membership_and_external() {
        let mut ch = Channel::new("#chan", 0);
        ch.join(1, "alice", member_flags(false, false));
        assert!(ch.can_send(1));
        assert!(!ch.can_send(2));
        ch.props.allow_external = true;
        assert!(ch.can_send(2));
    }

    #[test]
    fn moderated_requires_a_speaking_flag() {
        let mut ch = Channel::new("#chan", 0);
        ch.props.moderated = true;
        ch.join(1, "op", member_flags(true, false));
        ch.join(2, "voiced", member_flags(false, true));
        ch.join(3, "plain", member_flags(false, false));
        assert!(ch.can_send(1));
        assert!(ch.can_send(2));
        assert!(!ch.can_send(3));
        // moderated also silences externals, allow-external or not
        ch.props.allow_external = true;
        assert!(!ch.can_send(4));
    }

    #[test]
    fn mask_list_dedup_and_match() {
        let mut list = MaskList::default();
        assert!(list.add("*!*@*.example.org", "op!o@h", 1));
        assert!(!list.add("*!*@*.EXAMPLE.org", "op!o@h", 2));
        assert!(list.matches("bob!b@irc.example.org"));
        assert!(list.remove("*!*@*.example.ORG"));
        assert!(!list.matches("bob!b@irc.example.org"));
    }

    #[test]
    fn prefix_rendering() {
        let flags = MemberFlags {
            op: true,
            voice: true,
            ..Default::default()
        };
        let m = Membership {
            conn: 1,
            nickname: "alice".into(),
            flags,
        };
        assert_eq!(m.name(), "@+alice");
    }

    #[test]
    fn legacy_mode_rendering_includes_args() {
        let mut props = ChannelProps {
            secret: true,
            op_topic: true,
            ..Default::default()
        };
        props.key = Some("k1".into());
        props.limit = Some("25".into());
        assert_eq!(props.legacy_modes(), "+sntkl k1 25");
    }
}
