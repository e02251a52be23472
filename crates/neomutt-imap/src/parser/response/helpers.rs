//! Parser helper functions.

use crate::parser::lexer::{Lexer, Token};
use crate::types::{Capabilities, ListEntry, ResponseCode, StatusItem};
use crate::Result;

/// Parses a response code.
pub fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;

    let atom = lexer.read_atom_string()?;
    let upper = atom.to_ascii_uppercase();

    let code = match upper.as_str() {
        "ALERT" => ResponseCode::Alert,
        "PARSE" => ResponseCode::Parse,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "NOMODSEQ" => ResponseCode::NoModSeq,
        "CLOSED" => ResponseCode::Closed,
        "UIDNEXT" => {
            lexer.expect_space()?;
            ResponseCode::UidNext(lexer.read_number()?)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            ResponseCode::UidValidity(truncate_u32(lexer.read_number64()?))
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            ResponseCode::Unseen(lexer.read_number()?)
        }
        "HIGHESTMODSEQ" => {
            lexer.expect_space()?;
            ResponseCode::HighestModSeq(lexer.read_number64()?)
        }
        "CAPABILITY" => {
            let raw = read_until(lexer, b']');
            let raw = raw.trim().to_string();
            ResponseCode::Capability {
                caps: Capabilities::parse(&raw),
                raw,
            }
        }
        "PERMANENTFLAGS" => {
            lexer.expect_space()?;
            ResponseCode::PermanentFlags(parse_flag_list(lexer)?)
        }
        _ => ResponseCode::Unknown(atom.to_string()),
    };

    // Skip whatever the code carried that we did not consume
    read_until(lexer, b']');
    lexer.expect(Token::RBracket)?;

    Ok(code)
}

/// Parses capability data following `CAPABILITY`.
///
/// Returns the recognised set and the list as sent.
pub fn parse_capability_data(lexer: &mut Lexer<'_>) -> (Capabilities, String) {
    let raw = read_text_until_crlf(lexer).trim().to_string();
    (Capabilities::parse(&raw), raw)
}

/// Parses a parenthesised flag list, keeping every flag verbatim.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Vec<String>> {
    lexer.expect(Token::LParen)?;

    let mut flags = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => flags.push(s.to_string()),
            Token::Space => continue,
            token => {
                return Err(lexer.error(&format!("Unexpected token in flag list: {token:?}")));
            }
        }
    }

    Ok(flags)
}

/// Parses a LIST or LSUB response.
///
/// The name is returned as sent; RFC 5258 extended data after it is skipped.
pub fn parse_list_response(lexer: &mut Lexer<'_>) -> Result<ListEntry> {
    let mut entry = ListEntry::default();

    lexer.expect(Token::LParen)?;
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => entry.apply_attribute(s),
            Token::Space => continue,
            token => {
                return Err(lexer.error(&format!("Unexpected token in LIST attributes: {token:?}")));
            }
        }
    }

    lexer.expect_space()?;

    entry.delim = match lexer.next_token()? {
        Token::Nil => None,
        Token::QuotedString(s) => s.chars().next(),
        Token::Atom(s) => s.chars().next(),
        token => {
            return Err(lexer.error(&format!("Expected delimiter, got {token:?}")));
        }
    };

    lexer.expect_space()?;
    entry.name = lexer.read_astring()?;

    read_text_until_crlf(lexer);

    Ok(entry)
}

/// Parses a SEARCH response.
pub fn parse_search_response(lexer: &mut Lexer<'_>) -> Result<Vec<u32>> {
    let mut nums = Vec::new();

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        if let Token::Number(n) = lexer.next_token()?
            && let Ok(n) = u32::try_from(n)
            && n > 0
        {
            nums.push(n);
        }
    }

    Ok(nums)
}

/// Parses a STATUS response.
pub fn parse_status_response(lexer: &mut Lexer<'_>) -> Result<(String, Vec<StatusItem>)> {
    let mailbox = lexer.read_astring()?;
    lexer.skip_spaces();
    lexer.expect(Token::LParen)?;

    let mut items = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen | Token::Eof => break,
            Token::Atom(name) => {
                lexer.expect_space()?;
                let value = lexer.read_number64()?;

                let item = match name.to_ascii_uppercase().as_str() {
                    "MESSAGES" => StatusItem::Messages(truncate_u32(value)),
                    "RECENT" => StatusItem::Recent(truncate_u32(value)),
                    "UIDNEXT" => StatusItem::UidNext(truncate_u32(value)),
                    "UIDVALIDITY" | "UID-VALIDITY" => StatusItem::UidValidity(truncate_u32(value)),
                    "UNSEEN" => StatusItem::Unseen(truncate_u32(value)),
                    "HIGHESTMODSEQ" => StatusItem::HighestModSeq(value),
                    _ => continue,
                };
                items.push(item);
            }
            _ => continue,
        }
    }

    Ok((mailbox, items))
}

/// Parses the space-separated atoms of an ENABLED response.
pub fn parse_atom_list(lexer: &mut Lexer<'_>) -> Vec<String> {
    read_text_until_crlf(lexer)
        .split_ascii_whitespace()
        .map(str::to_string)
        .collect()
}

/// Reads text until CRLF, consuming the CRLF.
pub fn read_text_until_crlf(lexer: &mut Lexer<'_>) -> String {
    let remaining = lexer.remaining();

    let end = remaining
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(remaining.len());

    lexer.skip(end);

    if lexer.peek() == Some(b'\r') {
        lexer.skip(2);
    }

    String::from_utf8_lossy(&remaining[..end]).to_string()
}

/// Reads raw text up to (not including) `stop` or the end of the line.
fn read_until(lexer: &mut Lexer<'_>, stop: u8) -> String {
    let remaining = lexer.remaining();
    let end = remaining
        .iter()
        .position(|&b| b == stop || b == b'\r')
        .unwrap_or(remaining.len());
    lexer.skip(end);
    String::from_utf8_lossy(&remaining[..end]).to_string()
}

/// Keeps the low 32 bits, accepting servers that send oversized values.
#[allow(clippy::cast_possible_truncation)]
const fn truncate_u32(value: u64) -> u32 {
    value as u32
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
    fn test_list_with_extended_data() {
        let mut lexer =
            Lexer::new(b"(\\HasNoChildren) \".\" \"INBOX.Sent\" (\"CHILDINFO\" (\"SUBSCRIBED\"))\r\n");
        let entry = parse_list_response(&mut lexer).unwrap();
        assert_eq!(entry.name, "INBOX.Sent");
        assert_eq!(entry.delim, Some('.'));
        assert!(entry.noinferiors);
        assert!(!entry.noselect);
        assert!(lexer.is_eof());
    }

    #[test]
    fn test_list_nil_delimiter_and_literal_name() {
        let mut lexer = Lexer::new(b"(\\NonExistent) NIL {5}\r\nfoo b\r\n");
        let entry = parse_list_response(&mut lexer).unwrap();
        assert_eq!(entry.name, "foo b");
        assert_eq!(entry.delim, None);
        assert!(entry.noselect);
    }

    #[test]
    fn test_status_truncates_uidvalidity() {
        let mut lexer =
            Lexer::new(b"INBOX (MESSAGES 3 UIDVALIDITY 4294967297 HIGHESTMODSEQ 9000000000)");
        let (mailbox, items) = parse_status_response(&mut lexer).unwrap();
        assert_eq!(mailbox, "INBOX");
        assert_eq!(
            items,
            vec![
                StatusItem::Messages(3),
                StatusItem::UidValidity(1),
                StatusItem::HighestModSeq(9_000_000_000),
            ]
        );
    }

    #[test]
    fn test_capability_code() {
        let mut lexer = Lexer::new(b"[CAPABILITY IMAP4rev1 IDLE AUTH=PLAIN] done");
        let code = parse_response_code(&mut lexer).unwrap();
        match code {
            ResponseCode::Capability { caps, raw } => {
                assert!(caps.contains(Capabilities::IDLE));
                assert_eq!(raw, "IMAP4rev1 IDLE AUTH=PLAIN");
            }
            other => panic!("Expected capability code, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_code_skipped() {
        let mut lexer = Lexer::new(b"[APPENDUID 38505 3955] APPEND completed");
        let code = parse_response_code(&mut lexer).unwrap();
        assert_eq!(code, ResponseCode::Unknown("APPENDUID".to_string()));
        assert_eq!(lexer.remaining(), b" APPEND completed");
    }

    #[test]
    fn test_permanent_flags() {
        let mut lexer = Lexer::new(b"[PERMANENTFLAGS (\\Seen \\Deleted \\*)]");
        let code = parse_response_code(&mut lexer).unwrap();
        assert_eq!(
            code,
            ResponseCode::PermanentFlags(vec![
                "\\Seen".to_string(),
                "\\Deleted".to_string(),
                "\\*".to_string()
            ])
        );
    }
}
