//! IMAP response parser.
//!
//! Turns one complete response (literals included) into a [`Response`].
//! Untagged keywords the engine has no use for come back as
//! [`UntaggedResponse::Ignored`] rather than as errors, so a chatty server
//! cannot break a session.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::match_same_arms)]

mod fetch;
mod helpers;
mod types;

pub use types::{FetchItem, UntaggedResponse};

use crate::parser::lexer::{Lexer, Token};
use crate::types::{ResponseCode, Status};
use crate::{Error, Result};

use helpers::{
    parse_atom_list, parse_capability_data, parse_flag_list, parse_list_response,
    parse_response_code, parse_search_response, parse_status_response, read_text_until_crlf,
};

/// A parsed IMAP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Tagged response (command completion).
    Tagged {
        /// The command tag.
        tag: String,
        /// Response status.
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Untagged response (server data).
    Untagged(UntaggedResponse),
    /// Continuation request.
    Continuation {
        /// Text or base64 challenge, possibly empty.
        text: String,
    },
}

/// Response parser.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses a complete response.
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut lexer = Lexer::new(input);

        match lexer.next_token()? {
            Token::Asterisk => Self::parse_untagged(&mut lexer),
            Token::Plus => Ok(Self::parse_continuation(&mut lexer)),
            Token::Atom(tag) => Self::parse_tagged(&mut lexer, tag),
            token => Err(Error::Parse {
                position: 0,
                message: format!("Expected *, +, or tag, got {token:?}"),
            }),
        }
    }

    fn parse_tagged(lexer: &mut Lexer<'_>, tag: &str) -> Result<Response> {
        lexer.expect_space()?;

        let status = Self::parse_status(lexer)?;
        let (code, text) = Self::parse_resp_text(lexer)?;

        Ok(Response::Tagged {
            tag: tag.to_string(),
            status,
            code,
            text,
        })
    }

    fn parse_untagged(lexer: &mut Lexer<'_>) -> Result<Response> {
        lexer.expect_space()?;

        let untagged = match lexer.next_token()? {
            Token::Atom(s) => Self::parse_keyword(lexer, s)?,
            Token::Number(n) => Self::parse_message_data(lexer, n)?,
            token => {
                return Err(lexer.error(&format!("Unexpected token in untagged response: {token:?}")));
            }
        };

        Ok(Response::Untagged(untagged))
    }

    fn parse_keyword(lexer: &mut Lexer<'_>, keyword: &str) -> Result<UntaggedResponse> {
        let upper = keyword.to_ascii_uppercase();
        let response = match upper.as_str() {
            "OK" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::Ok { code, text }
            }
            "NO" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::No { code, text }
            }
            "BAD" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::Bad { code, text }
            }
            "PREAUTH" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::PreAuth { code, text }
            }
            "BYE" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::Bye { code, text }
            }
            "CAPABILITY" => {
                let (caps, raw) = parse_capability_data(lexer);
                UntaggedResponse::Capability { caps, raw }
            }
            "ENABLED" => UntaggedResponse::Enabled(parse_atom_list(lexer)),
            "FLAGS" => {
                lexer.expect_space()?;
                UntaggedResponse::Flags(parse_flag_list(lexer)?)
            }
            "LIST" => {
                lexer.expect_space()?;
                UntaggedResponse::List(parse_list_response(lexer)?)
            }
            "LSUB" => {
                lexer.expect_space()?;
                UntaggedResponse::Lsub(parse_list_response(lexer)?)
            }
            "SEARCH" => UntaggedResponse::Search(parse_search_response(lexer)?),
            "STATUS" => {
                lexer.expect_space()?;
                let (mailbox, items) = parse_status_response(lexer)?;
                UntaggedResponse::Status { mailbox, items }
            }
            "MYRIGHTS" => {
                lexer.expect_space()?;
                let mailbox = lexer.read_astring()?;
                lexer.expect_space()?;
                let rights = lexer.read_astring()?;
                UntaggedResponse::MyRights { mailbox, rights }
            }
            "VANISHED" => {
                lexer.expect_space()?;
                let mut earlier = false;
                if lexer.peek() == Some(b'(') {
                    lexer.expect(Token::LParen)?;
                    earlier = lexer.read_atom_string()?.eq_ignore_ascii_case("EARLIER");
                    lexer.expect(Token::RParen)?;
                    lexer.expect_space()?;
                }
                let uids = read_text_until_crlf(lexer).trim().to_string();
                UntaggedResponse::Vanished { earlier, uids }
            }
            _ => {
                read_text_until_crlf(lexer);
                UntaggedResponse::Ignored(upper)
            }
        };
        Ok(response)
    }

    fn parse_message_data(lexer: &mut Lexer<'_>, n: u64) -> Result<UntaggedResponse> {
        let n = u32::try_from(n).map_err(|_| lexer.error(&format!("Number {n} exceeds 32 bits")))?;
        lexer.expect_space()?;
        let keyword = lexer.read_atom_string()?;
        let upper = keyword.to_ascii_uppercase();

        let response = match upper.as_str() {
            "EXISTS" => UntaggedResponse::Exists(n),
            "RECENT" => UntaggedResponse::Recent(n),
            "EXPUNGE" => UntaggedResponse::Expunge(n),
            "FETCH" => {
                lexer.expect_space()?;
                let items = fetch::parse_fetch_response(lexer)?;
                UntaggedResponse::Fetch { msn: n, items }
            }
            _ => {
                read_text_until_crlf(lexer);
                UntaggedResponse::Ignored(upper)
            }
        };
        Ok(response)
    }

    fn parse_continuation(lexer: &mut Lexer<'_>) -> Response {
        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }
        Response::Continuation {
            text: read_text_until_crlf(lexer),
        }
    }

    fn parse_status(lexer: &mut Lexer<'_>) -> Result<Status> {
        let s = lexer.read_atom_string()?;
        match s.to_ascii_uppercase().as_str() {
            "OK" => Ok(Status::Ok),
            "NO" => Ok(Status::No),
            "BAD" => Ok(Status::Bad),
            _ => Err(lexer.error(&format!("Invalid status: {s}"))),
        }
    }

    /// Parses `[SP] ["[" code "]"] [SP] text`.
    fn parse_resp_text(lexer: &mut Lexer<'_>) -> Result<(Option<ResponseCode>, String)> {
        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }

        let code = if lexer.peek() == Some(b'[') {
            Some(parse_response_code(lexer)?)
        } else {
            None
        };

        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }

        Ok((code, read_text_until_crlf(lexer)))
    }
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
    use crate::types::{Capabilities, StatusItem};

    use super::*;

    #[test]
    fn test_parse_greeting() {
        let response = ResponseParser::parse(b"* OK IMAP4rev1 server ready\r\n").unwrap();

        match response {
            Response::Untagged(UntaggedResponse::Ok { code, text }) => {
                assert!(code.is_none());
                assert_eq!(text, "IMAP4rev1 server ready");
            }
            _ => panic!("Expected untagged OK"),
        }
    }

    #[test]
    fn test_parse_tagged_ok() {
        let response = ResponseParser::parse(b"a0001 OK LOGIN completed\r\n").unwrap();

        assert_eq!(
            response,
            Response::Tagged {
                tag: "a0001".to_string(),
                status: Status::Ok,
                code: None,
                text: "LOGIN completed".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_tagged_no_with_trycreate() {
        let response =
            ResponseParser::parse(b"a0003 NO [TRYCREATE] Mailbox doesn't exist\r\n").unwrap();

        match response {
            Response::Tagged { status, code, .. } => {
                assert_eq!(status, Status::No);
                assert_eq!(code, Some(ResponseCode::TryCreate));
            }
            _ => panic!("Expected tagged NO"),
        }
    }

    #[test]
    fn test_parse_tagged_ok_capability() {
        let response =
            ResponseParser::parse(b"a0002 OK [CAPABILITY IMAP4rev1 IDLE] Logged in\r\n").unwrap();

        match response {
            Response::Tagged {
                code: Some(ResponseCode::Capability { caps, .. }),
                ..
            } => assert!(caps.contains(Capabilities::IMAP4REV1 | Capabilities::IDLE)),
            _ => panic!("Expected capability code"),
        }
    }

    #[test]
    fn test_parse_capability() {
        let response =
            ResponseParser::parse(b"* CAPABILITY IMAP4rev1 IDLE AUTH=CRAM-MD5 XYZZY\r\n").unwrap();

        match response {
            Response::Untagged(UntaggedResponse::Capability { caps, raw }) => {
                assert!(caps.contains(Capabilities::AUTH_CRAM_MD5));
                assert!(!caps.contains(Capabilities::QRESYNC));
                assert_eq!(raw, "IMAP4rev1 IDLE AUTH=CRAM-MD5 XYZZY");
            }
            _ => panic!("Expected capability response"),
        }
    }

    #[test]
    fn test_parse_message_data() {
        assert_eq!(
            ResponseParser::parse(b"* 23 EXISTS\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Exists(23))
        );
        assert_eq!(
            ResponseParser::parse(b"* 5 expunge\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Expunge(5))
        );
    }

    #[test]
    fn test_parse_fetch() {
        let response = ResponseParser::parse(b"* 1 FETCH (FLAGS (\\Seen) UID 12345)\r\n").unwrap();

        match response {
            Response::Untagged(UntaggedResponse::Fetch { msn, items }) => {
                assert_eq!(msn, 1);
                assert!(items.contains(&FetchItem::Uid(12345)));
            }
            _ => panic!("Expected FETCH"),
        }
    }

    #[test]
    fn test_parse_vanished() {
        assert_eq!(
            ResponseParser::parse(b"* VANISHED (EARLIER) 300:310,405\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Vanished {
                earlier: true,
                uids: "300:310,405".to_string(),
            })
        );
        assert_eq!(
            ResponseParser::parse(b"* VANISHED 7\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Vanished {
                earlier: false,
                uids: "7".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_lsub_and_myrights() {
        match ResponseParser::parse(b"* LSUB () \"/\" Lists/rust\r\n").unwrap() {
            Response::Untagged(UntaggedResponse::Lsub(entry)) => {
                assert_eq!(entry.name, "Lists/rust");
                assert_eq!(entry.delim, Some('/'));
            }
            _ => panic!("Expected LSUB"),
        }
        assert_eq!(
            ResponseParser::parse(b"* MYRIGHTS INBOX lrswipkxte\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::MyRights {
                mailbox: "INBOX".to_string(),
                rights: "lrswipkxte".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_status() {
        match ResponseParser::parse(b"* STATUS \"Sent Items\" (MESSAGES 2 UNSEEN 1)\r\n").unwrap() {
            Response::Untagged(UntaggedResponse::Status { mailbox, items }) => {
                assert_eq!(mailbox, "Sent Items");
                assert_eq!(items, vec![StatusItem::Messages(2), StatusItem::Unseen(1)]);
            }
            _ => panic!("Expected STATUS"),
        }
    }

    #[test]
    fn test_parse_enabled() {
        assert_eq!(
            ResponseParser::parse(b"* ENABLED QRESYNC UTF8=ACCEPT\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Enabled(vec![
                "QRESYNC".to_string(),
                "UTF8=ACCEPT".to_string()
            ]))
        );
    }

    #[test]
    fn test_unknown_keywords_ignored() {
        assert_eq!(
            ResponseParser::parse(b"* NAMESPACE ((\"\" \"/\")) NIL NIL\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Ignored("NAMESPACE".to_string()))
        );
        assert_eq!(
            ResponseParser::parse(b"* 3 XFOO bar\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Ignored("XFOO".to_string()))
        );
    }

    #[test]
    fn test_parse_continuation() {
        assert_eq!(
            ResponseParser::parse(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2U+\r\n").unwrap(),
            Response::Continuation {
                text: "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2U+".to_string()
            }
        );
        assert_eq!(
            ResponseParser::parse(b"+\r\n").unwrap(),
            Response::Continuation {
                text: String::new()
            }
        );
    }

    #[test]
    fn test_parse_bye() {
        match ResponseParser::parse(b"* BYE Autologout; idle for too long\r\n").unwrap() {
            Response::Untagged(UntaggedResponse::Bye { text, .. }) => {
                assert_eq!(text, "Autologout; idle for too long");
            }
            _ => panic!("Expected BYE"),
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert!(ResponseParser::parse(b"(oops\r\n").is_err());
    }
}
