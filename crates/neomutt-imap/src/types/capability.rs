//! Server capabilities and response status.

use bitflags::bitflags;

/// Response status from a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
}

impl Status {
    /// Returns true if this is a successful status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

bitflags! {
    /// Capabilities the engine acts on.
    ///
    /// Bit positions are fixed; anything else the server advertises is only
    /// kept in the raw capability string.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        /// `IMAP4`
        const IMAP4 = 1 << 0;
        /// `IMAP4rev1`
        const IMAP4REV1 = 1 << 1;
        /// `STATUS`
        const STATUS = 1 << 2;
        /// `ACL` (RFC 2086)
        const ACL = 1 << 3;
        /// `NAMESPACE` (RFC 2342)
        const NAMESPACE = 1 << 4;
        /// `AUTH=CRAM-MD5`
        const AUTH_CRAM_MD5 = 1 << 5;
        /// `AUTH=GSSAPI`
        const AUTH_GSSAPI = 1 << 6;
        /// `AUTH=ANONYMOUS`
        const AUTH_ANONYMOUS = 1 << 7;
        /// `AUTH=OAUTHBEARER` (RFC 7628)
        const AUTH_OAUTHBEARER = 1 << 8;
        /// `AUTH=XOAUTH2`
        const AUTH_XOAUTH2 = 1 << 9;
        /// `STARTTLS`
        const STARTTLS = 1 << 10;
        /// `LOGINDISABLED`
        const LOGINDISABLED = 1 << 11;
        /// `IDLE` (RFC 2177)
        const IDLE = 1 << 12;
        /// `SASL-IR`
        const SASL_IR = 1 << 13;
        /// `ENABLE` (RFC 5161)
        const ENABLE = 1 << 14;
        /// `CONDSTORE` (RFC 7162)
        const CONDSTORE = 1 << 15;
        /// `QRESYNC` (RFC 7162)
        const QRESYNC = 1 << 16;
        /// `LIST-EXTENDED` (RFC 5258)
        const LIST_EXTENDED = 1 << 17;
        /// `COMPRESS=DEFLATE` (RFC 4978)
        const COMPRESS = 1 << 18;
        /// `X-GM-EXT-1`
        const X_GM_EXT_1 = 1 << 19;
        /// `ID` (RFC 2971)
        const ID = 1 << 20;
        /// `UIDPLUS` (RFC 4315)
        const UIDPLUS = 1 << 21;
        /// `UTF8=ACCEPT` (RFC 6855)
        const UTF8_ACCEPT = 1 << 22;
    }
}

const NAMES: &[(&str, Capabilities)] = &[
    ("IMAP4", Capabilities::IMAP4),
    ("IMAP4REV1", Capabilities::IMAP4REV1),
    ("STATUS", Capabilities::STATUS),
    ("ACL", Capabilities::ACL),
    ("NAMESPACE", Capabilities::NAMESPACE),
    ("AUTH=CRAM-MD5", Capabilities::AUTH_CRAM_MD5),
    ("AUTH=GSSAPI", Capabilities::AUTH_GSSAPI),
    ("AUTH=ANONYMOUS", Capabilities::AUTH_ANONYMOUS),
    ("AUTH=OAUTHBEARER", Capabilities::AUTH_OAUTHBEARER),
    ("AUTH=XOAUTH2", Capabilities::AUTH_XOAUTH2),
    ("STARTTLS", Capabilities::STARTTLS),
    ("LOGINDISABLED", Capabilities::LOGINDISABLED),
    ("IDLE", Capabilities::IDLE),
    ("SASL-IR", Capabilities::SASL_IR),
    ("ENABLE", Capabilities::ENABLE),
    ("CONDSTORE", Capabilities::CONDSTORE),
    ("QRESYNC", Capabilities::QRESYNC),
    ("LIST-EXTENDED", Capabilities::LIST_EXTENDED),
    ("COMPRESS=DEFLATE", Capabilities::COMPRESS),
    ("X-GM-EXT-1", Capabilities::X_GM_EXT_1),
    ("ID", Capabilities::ID),
    ("UIDPLUS", Capabilities::UIDPLUS),
    ("UTF8=ACCEPT", Capabilities::UTF8_ACCEPT),
];

impl Capabilities {
    /// Looks up a single advertised capability name.
    #[must_use]
    pub fn lookup(name: &str) -> Self {
        NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map_or_else(Self::empty, |(_, cap)| *cap)
    }

    /// Parses a space-separated capability list.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        list.split_ascii_whitespace()
            .fold(Self::empty(), |caps, name| caps | Self::lookup(name))
    }
}

/// Returns true if the raw capability string advertises `AUTH=<mech>`.
#[must_use]
pub fn advertises_auth(raw: &str, mech: &str) -> bool {
    raw.split_ascii_whitespace().any(|cap| {
        cap.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("AUTH="))
            && cap.get(5..).is_some_and(|m| m.eq_ignore_ascii_case(mech))
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let caps = Capabilities::parse("IMAP4rev1 idle AUTH=PLAIN auth=cram-md5 X-UNKNOWN QRESYNC");
        assert!(caps.contains(Capabilities::IMAP4REV1 | Capabilities::IDLE));
        assert!(caps.contains(Capabilities::AUTH_CRAM_MD5));
        assert!(caps.contains(Capabilities::QRESYNC));
        assert!(!caps.contains(Capabilities::CONDSTORE));
        assert!(!caps.contains(Capabilities::STARTTLS));
    }

    #[test]
    fn test_empty() {
        assert!(Capabilities::parse("").is_empty());
        assert_eq!(Capabilities::lookup("AUTH=PLAIN"), Capabilities::empty());
    }

    #[test]
    fn test_advertises_auth() {
        let raw = "IMAP4rev1 AUTH=PLAIN AUTH=OAUTHBEARER";
        assert!(advertises_auth(raw, "plain"));
        assert!(advertises_auth(raw, "OAUTHBEARER"));
        assert!(!advertises_auth(raw, "LOGIN"));
        assert!(!advertises_auth("AUTH=PLAINX", "PLAIN"));
    }

    #[test]
    fn test_status() {
        assert!(Status::Ok.is_ok());
        assert!(!Status::No.is_ok());
        assert!(!Status::Bad.is_ok());
    }
}
