//! Mailbox path helpers: quoting, delimiter normalisation and name munging.

use std::cmp::Ordering;

use crate::{Result, utf7};

/// Wraps `s` in double quotes, escaping `"` and `\` (and `` ` `` if asked).
#[must_use]
pub fn quote_string(s: &str, quote_backtick: bool) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' || (quote_backtick && c == '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Reverses [`quote_string`]. Unquoted input is returned unchanged.
#[must_use]
pub fn unquote_string(s: &str) -> String {
    let Some(rest) = s.strip_prefix('"') else {
        return s.to_string();
    };

    let mut out = String::with_capacity(rest.len());
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Encodes and quotes a mailbox name so it can be pasted into a command.
#[must_use]
pub fn munge(unicode: bool, name: &str) -> String {
    if unicode {
        quote_string(name, false)
    } else {
        quote_string(&utf7::encode(name), false)
    }
}

/// Unquotes and decodes a mailbox name received from the server.
///
/// # Errors
///
/// Returns [`crate::Error::Codec`] if the name isn't valid modified UTF-7.
pub fn unmunge(unicode: bool, name: &str) -> Result<String> {
    let unquoted = unquote_string(name);
    if unicode { Ok(unquoted) } else { utf7::decode(&unquoted) }
}

/// Normalises a user-typed path using the first of `delim_chars` it contains.
#[must_use]
pub fn fix_path(delim_chars: &str, mailbox: &str) -> String {
    match mailbox.chars().find(|c| delim_chars.contains(*c)) {
        Some(delim) => fix_path_with_delim(delim, mailbox),
        None => mailbox.to_string(),
    }
}

/// Rewrites `/` and `delim` to `delim`, collapses runs, and drops a trailing
/// delimiter unless it is the whole path.
#[must_use]
pub fn fix_path_with_delim(delim: char, mailbox: &str) -> String {
    let mut out = String::with_capacity(mailbox.len());
    let mut prev = None;
    for c in mailbox.chars() {
        if c == delim || c == '/' {
            if prev != Some(c) {
                out.push(delim);
            }
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    if out.len() > delim.len_utf8() && out.ends_with(delim) {
        out.pop();
    }
    out
}

/// Orders mailbox names with `INBOX` (any case, or empty) equal to itself.
#[must_use]
pub fn mxcmp(delim_chars: &str, a: &str, b: &str) -> Ordering {
    let a = if a.is_empty() { "INBOX" } else { a };
    let b = if b.is_empty() { "INBOX" } else { b };
    if a.eq_ignore_ascii_case("INBOX") && b.eq_ignore_ascii_case("INBOX") {
        return Ordering::Equal;
    }
    fix_path(delim_chars, a).cmp(&fix_path(delim_chars, b))
}

/// Maps a server mailbox name to a cache sub-path.
///
/// The server delimiter becomes `/`; a component starting with a digit is
/// prefixed with `_` so it can't be mistaken for a UID.
#[must_use]
pub fn cache_path(delim: char, mailbox: &str) -> String {
    let mut out = String::with_capacity(mailbox.len());
    let mut chars = mailbox.chars().peekable();
    while let Some(c) = chars.next() {
        if c == delim {
            out.push('/');
            if chars.peek().is_some_and(char::is_ascii_digit) {
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Returns true if a cache path could climb out of its directory.
#[must_use]
pub fn is_traversal(path: &str) -> bool {
    path == ".."
        || path.starts_with("../")
        || path.ends_with("/..")
        || path.contains("/../")
        || path.starts_with('/')
}

/// Longest common prefix of two names, respecting char boundaries.
#[must_use]
pub fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let len = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map_or_else(|| a.len().min(b.len()), |((i, _), _)| i);
    &a[..len]
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
    fn test_quote_unquote() {
        assert_eq!(quote_string(r#"a"b\c"#, false), r#""a\"b\\c""#);
        assert_eq!(quote_string("a`b", true), r#""a\`b""#);
        assert_eq!(quote_string("a`b", false), r#""a`b""#);
        assert_eq!(unquote_string(r#""a\"b\\c""#), r#"a"b\c"#);
        assert_eq!(unquote_string("plain"), "plain");
        assert_eq!(unquote_string(r#""abc" trailing"#), "abc");
    }

    #[test]
    fn test_munge() {
        assert_eq!(munge(false, "Отправленные"), "\"&BB4EQgQ,BEAEMAQyBDsENQQ9BD0ESwQ1-\"");
        assert_eq!(munge(true, "Отправленные"), "\"Отправленные\"");
        assert_eq!(unmunge(false, "\"&BB4EQgQ,BEAEMAQyBDsENQQ9BD0ESwQ1-\"").unwrap(), "Отправленные");
        assert_eq!(unmunge(true, "Отправленные").unwrap(), "Отправленные");
        assert!(unmunge(false, "\"&AEE-\"").is_err());
    }

    #[test]
    fn test_fix_path() {
        assert_eq!(fix_path("/.", "a//b/"), "a/b");
        assert_eq!(fix_path("/.", "a..b."), "a.b");
        assert_eq!(fix_path("/.", "INBOX"), "INBOX");
        assert_eq!(fix_path_with_delim('.', "a/b//c"), "a.b.c");
        assert_eq!(fix_path_with_delim('/', "/"), "/");
    }

    #[test]
    fn test_mxcmp() {
        assert_eq!(mxcmp("/.", "", "inbox"), Ordering::Equal);
        assert_eq!(mxcmp("/.", "INBOX", "Inbox"), Ordering::Equal);
        assert_eq!(mxcmp("/.", "a//b", "a/b"), Ordering::Equal);
        assert_eq!(mxcmp("/.", "a", "b"), Ordering::Less);
    }

    #[test]
    fn test_cache_path() {
        assert_eq!(cache_path('.', "INBOX.Sent"), "INBOX/Sent");
        assert_eq!(cache_path('.', "Lists.2024"), "Lists/_2024");
        assert_eq!(cache_path('/', "a/b"), "a/b");
    }

    #[test]
    fn test_traversal() {
        assert!(is_traversal(".."));
        assert!(is_traversal("../x"));
        assert!(is_traversal("x/.."));
        assert!(is_traversal("x/../y"));
        assert!(is_traversal("/etc"));
        assert!(!is_traversal("INBOX/..hidden"));
        assert!(!is_traversal("a.b"));
    }

    #[test]
    fn test_common_prefix() {
        assert_eq!(common_prefix("INBOX.Sent", "INBOX.Spam"), "INBOX.S");
        assert_eq!(common_prefix("abc", "abc"), "abc");
        assert_eq!(common_prefix("abc", "ab"), "ab");
        assert_eq!(common_prefix("é1", "é2"), "é");
    }
}
