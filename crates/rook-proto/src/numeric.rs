//! Numeric reply codes.
//!
//! A numeric is a three-digit verb whose first parameter is the recipient's
//! nickname; the dispatcher fills that parameter in. Only the numerics rookd
//! actually emits are listed.

use std::fmt;

/// Numeric replies, by their RFC 1459 / IRCv3 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
#[repr(u16)]
pub enum Numeric {
    RPL_WELCOME = 1,
    RPL_YOURHOST = 2,
    RPL_CREATED = 3,
    RPL_MYINFO = 4,
    RPL_ISUPPORT = 5,
    RPL_UMODEIS = 221,
    RPL_AWAY = 301,
    RPL_ISON = 303,
    RPL_UNAWAY = 305,
    RPL_NOWAWAY = 306,
    RPL_WHOISUSER = 311,
    RPL_WHOISSERVER = 312,
    RPL_WHOISOPERATOR = 313,
    RPL_WHOWASUSER = 314,
    RPL_ENDOFWHO = 315,
    RPL_WHOISIDLE = 317,
    RPL_ENDOFWHOIS = 318,
    RPL_WHOISCHANNELS = 319,
    RPL_LISTSTART = 321,
    RPL_LIST = 322,
    RPL_LISTEND = 323,
    RPL_CHANNELMODEIS = 324,
    RPL_CREATIONTIME = 329,
    RPL_WHOISACCOUNT = 330,
    RPL_NOTOPIC = 331,
    RPL_TOPIC = 332,
    RPL_TOPICWHOTIME = 333,
    RPL_VERSION = 351,
    RPL_WHOREPLY = 352,
    RPL_NAMREPLY = 353,
    RPL_ENDOFNAMES = 366,
    RPL_BANLIST = 367,
    RPL_ENDOFBANLIST = 368,
    RPL_ENDOFWHOWAS = 369,
    RPL_INFO = 371,
    RPL_MOTD = 372,
    RPL_ENDOFINFO = 374,
    RPL_MOTDSTART = 375,
    RPL_ENDOFMOTD = 376,
    RPL_YOUREOPER = 381,
    ERR_UNKNOWNERROR = 400,
    ERR_NOSUCHNICK = 401,
    ERR_NOSUCHCHANNEL = 403,
    ERR_CANNOTSENDTOCHAN = 404,
    ERR_WASNOSUCHNICK = 406,
    ERR_INVALIDCAPCMD = 410,
    ERR_UNKNOWNCOMMAND = 421,
    ERR_NOMOTD = 422,
    ERR_ERRONEUSNICKNAME = 432,
    ERR_NICKNAMEINUSE = 433,
    ERR_NOTONCHANNEL = 442,
    ERR_NOTREGISTERED = 451,
    ERR_NEEDMOREPARAMS = 461,
    ERR_PASSWDMISMATCH = 464,
    ERR_UNKNOWNMODE = 472,
    ERR_BANNEDFROMCHAN = 474,
    ERR_BADCHANNELKEY = 475,
    ERR_BADCHANNAME = 479,
    ERR_NOPRIVILEGES = 481,
    ERR_CHANOPRIVSNEEDED = 482,
    ERR_CANTKILLSERVER = 483,
    ERR_NOOPERHOST = 491,
    ERR_UMODEUNKNOWNFLAG = 501,
    ERR_USERSDONTMATCH = 502,
    RPL_MONONLINE = 730,
    RPL_MONOFFLINE = 731,
    RPL_MONLIST = 732,
    RPL_ENDOFMONLIST = 733,
    ERR_MONLISTFULL = 734,
    RPL_KEYVALUE = 761,
    RPL_METADATAEND = 762,
    ERR_METADATALIMIT = 764,
    ERR_TARGETINVALID = 765,
    ERR_NOMATCHINGKEY = 766,
    ERR_KEYINVALID = 767,
    ERR_KEYNOPERMISSION = 769,
    RPL_LOGGEDIN = 900,
    RPL_SASLSUCCESS = 903,
    ERR_SASLFAIL = 904,
    ERR_SASLTOOLONG = 905,
    ERR_SASLABORTED = 906,
    RPL_REGISTERED = 920,
    ERR_ACCOUNTEXISTS = 921,
    RPL_VERIFICATIONREQUIRED = 922,
    RPL_VERIFIED = 923,
    ERR_BADVERIFYCODE = 924,
    ERR_REGUNAVAILABLE = 927,
    ERR_REGINVALIDCREDTYPE = 928,
    ERR_REGINVALIDCALLBACK = 929,
}

impl Numeric {
    /// The numeric code.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Numeric {
    /// Numerics serialize as zero-padded three-digit verbs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_zero_padded() {
        assert_eq!(Numeric::RPL_WELCOME.to_string(), "001");
        assert_eq!(Numeric::RPL_UMODEIS.to_string(), "221");
        assert_eq!(Numeric::ERR_SASLFAIL.to_string(), "904");
    }

    #[test]
    fn code_matches_discriminant() {
        assert_eq!(Numeric::ERR_NICKNAMEINUSE.code(), 433);
        assert_eq!(Numeric::RPL_MONONLINE.code(), 730);
    }
}
