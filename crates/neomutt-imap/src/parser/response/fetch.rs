//! FETCH response parsing.

use crate::parser::lexer::{Lexer, Token};
use crate::Result;

use super::helpers::parse_flag_list;
use super::types::FetchItem;

/// Parses the parenthesised item list of a FETCH response.
pub fn parse_fetch_response(lexer: &mut Lexer<'_>) -> Result<Vec<FetchItem>> {
    lexer.expect(Token::LParen)?;

    let mut items = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen | Token::Eof => break,
            Token::Space => continue,
            Token::Atom(name) => {
                let upper = name.to_ascii_uppercase();
                match upper.as_str() {
                    "FLAGS" => {
                        lexer.expect_space()?;
                        items.push(FetchItem::Flags(parse_flag_list(lexer)?));
                    }
                    "UID" => {
                        lexer.expect_space()?;
                        let uid = lexer.read_number()?;
                        if uid == 0 {
                            return Err(lexer.error("invalid UID value: 0"));
                        }
                        items.push(FetchItem::Uid(uid));
                    }
                    "RFC822.SIZE" => {
                        lexer.expect_space()?;
                        items.push(FetchItem::Rfc822Size(lexer.read_number()?));
                    }
                    "INTERNALDATE" => {
                        lexer.expect_space()?;
                        if let Token::QuotedString(date) = lexer.next_token()? {
                            items.push(FetchItem::InternalDate(date));
                        }
                    }
                    "MODSEQ" => {
                        lexer.expect_space()?;
                        lexer.expect(Token::LParen)?;
                        let modseq = lexer.read_number64()?;
                        lexer.expect(Token::RParen)?;
                        items.push(FetchItem::ModSeq(modseq));
                    }
                    // BODY without a section is the body structure
                    "BODY" if lexer.peek() != Some(b'[') => skip_fetch_item(lexer)?,
                    "BODY" | "BODY.PEEK" | "RFC822" | "RFC822.HEADER" | "RFC822.TEXT" => {
                        let (mut section, origin) = parse_body_section_and_origin(lexer);
                        if section.is_none() && upper.starts_with("RFC822.") {
                            section = upper.strip_prefix("RFC822.").map(str::to_string);
                        }

                        lexer.expect_space()?;
                        let data = match lexer.next_token()? {
                            Token::Literal(d) => Some(d),
                            Token::QuotedString(s) => Some(s.into_bytes()),
                            _ => None,
                        };

                        items.push(FetchItem::Body {
                            section,
                            origin,
                            data,
                        });
                    }
                    _ => skip_fetch_item(lexer)?,
                }
            }
            token => {
                return Err(lexer.error(&format!("Unexpected token in FETCH: {token:?}")));
            }
        }
    }

    Ok(items)
}

/// Parses the optional `[section]` and `<origin>` after BODY.
fn parse_body_section_and_origin(lexer: &mut Lexer<'_>) -> (Option<String>, Option<u32>) {
    let mut section = None;
    let mut origin = None;

    if lexer.peek() == Some(b'[') {
        lexer.advance();
        let mut buf = Vec::new();
        while let Some(b) = lexer.advance() {
            if b == b']' {
                break;
            }
            buf.push(b);
        }
        if !buf.is_empty() {
            section = Some(String::from_utf8_lossy(&buf).into_owned());
        }
    }

    if lexer.peek() == Some(b'<') {
        lexer.advance();
        let mut digits = String::new();
        while let Some(b) = lexer.peek() {
            lexer.advance();
            if b == b'>' {
                break;
            }
            digits.push(char::from(b));
        }
        origin = digits.parse().ok();
    }

    (section, origin)
}

/// Skips the value of an item we do not use.
///
/// Works on tokens so that literals (which may contain parentheses) are
/// stepped over whole.
pub fn skip_fetch_item(lexer: &mut Lexer<'_>) -> Result<()> {
    if lexer.peek() == Some(b'[') {
        parse_body_section_and_origin(lexer);
    }
    if lexer.peek() == Some(b' ') {
        lexer.advance();
    }

    let mut depth = 0usize;
    loop {
        match lexer.peek() {
            None | Some(b'\r') => break,
            Some(b' ') if depth == 0 => break,
            Some(b')') if depth == 0 => break,
            _ => {}
        }
        match lexer.next_token()? {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Eof => break,
            _ => {}
        }
        if depth == 0 {
            break;
        }
    }

    Ok(())
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
    fn test_parse_fetch_uid_and_flags() {
        let mut lexer = Lexer::new(b"(UID 123 FLAGS (\\Seen $Label1))");
        let items = parse_fetch_response(&mut lexer).unwrap();

        assert_eq!(
            items,
            vec![
                FetchItem::Uid(123),
                FetchItem::Flags(vec!["\\Seen".to_string(), "$Label1".to_string()]),
            ]
        );
    }

    #[test]
    fn test_parse_fetch_uid_zero_rejected() {
        let mut lexer = Lexer::new(b"(UID 0)");
        let result = parse_fetch_response(&mut lexer);

        assert!(result.unwrap_err().to_string().contains("UID"));
    }

    #[test]
    fn test_parse_fetch_modseq() {
        let mut lexer = Lexer::new(b"(MODSEQ (12345678901) UID 4)");
        let items = parse_fetch_response(&mut lexer).unwrap();
        assert_eq!(items, vec![FetchItem::ModSeq(12_345_678_901), FetchItem::Uid(4)]);
    }

    #[test]
    fn test_parse_header_fields() {
        let mut lexer = Lexer::new(
            b"(UID 7 RFC822.SIZE 900 BODY[HEADER.FIELDS (FROM SUBJECT)] {15}\r\nFrom: a@b.c\r\n\r\n)",
        );
        let items = parse_fetch_response(&mut lexer).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[1], FetchItem::Rfc822Size(900));
        match &items[2] {
            FetchItem::Body {
                section,
                origin,
                data,
            } => {
                assert_eq!(section.as_deref(), Some("HEADER.FIELDS (FROM SUBJECT)"));
                assert_eq!(*origin, None);
                assert_eq!(data.as_deref(), Some(&b"From: a@b.c\r\n\r\n"[..]));
            }
            other => panic!("Expected body, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_partial_body() {
        let mut lexer = Lexer::new(b"(BODY[]<0> {3}\r\nabc)");
        let items = parse_fetch_response(&mut lexer).unwrap();
        assert_eq!(
            items,
            vec![FetchItem::Body {
                section: None,
                origin: Some(0),
                data: Some(b"abc".to_vec()),
            }]
        );
    }

    #[test]
    fn test_rfc822_header_section() {
        let mut lexer = Lexer::new(b"(BODY (\"text\" \"plain\" NIL) RFC822.HEADER NIL)");
        let items = parse_fetch_response(&mut lexer).unwrap();
        assert_eq!(
            items,
            vec![FetchItem::Body {
                section: Some("HEADER".to_string()),
                origin: None,
                data: None,
            }]
        );
    }

    #[test]
    fn test_skip_unknown_items() {
        let mut lexer = Lexer::new(
            b"(X-GM-LABELS (\"(odd)\" {3}\r\n)()) ENVELOPE (NIL \"s\" NIL) X-GM-MSGID 17 UID 9)",
        );
        let items = parse_fetch_response(&mut lexer).unwrap();
        assert_eq!(items, vec![FetchItem::Uid(9)]);
    }
}
