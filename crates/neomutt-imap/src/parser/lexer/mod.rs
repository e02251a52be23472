//! IMAP lexer for tokenizing server responses.
//!
//! Breaks a complete response (as assembled by the framed reader, literals
//! included) into tokens for the response parser.

#![allow(clippy::missing_errors_doc)]

mod token;

pub use token::Token;

use crate::{Error, Result};

/// IMAP lexer state.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the remaining input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Returns true if at end of input.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Peeks at the byte at offset from current position.
    #[must_use]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Advances by one byte and returns it.
    pub fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Skips n bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        match byte {
            b'\r' => {
                if self.peek_at(1) == Some(b'\n') {
                    self.skip(2);
                    Ok(Token::Crlf)
                } else {
                    Err(self.error("Expected LF after CR"))
                }
            }
            b' ' => {
                self.advance();
                Ok(Token::Space)
            }
            b'(' => {
                self.advance();
                Ok(Token::LParen)
            }
            b')' => {
                self.advance();
                Ok(Token::RParen)
            }
            b'[' => {
                self.advance();
                Ok(Token::LBracket)
            }
            b']' => {
                self.advance();
                Ok(Token::RBracket)
            }
            b'*' => {
                self.advance();
                Ok(Token::Asterisk)
            }
            b'+' => {
                self.advance();
                Ok(Token::Plus)
            }
            b'"' => self.read_quoted_string(),
            b'{' => self.read_literal(),
            b'0'..=b'9' => self.read_number_or_atom(),
            // `\*` in PERMANENTFLAGS
            b'\\' if self.peek_at(1) == Some(b'*') => {
                let start = self.pos;
                self.skip(2);
                self.atom_at(start)
            }
            _ if is_atom_char(byte) => self.read_atom(),
            _ => Err(self.error(&format!("Unexpected character: {byte:#04x}"))),
        }
    }

    /// Reads a quoted string token.
    fn read_quoted_string(&mut self) -> Result<Token<'a>> {
        self.advance();

        let mut result = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(c @ (b'"' | b'\\')) => result.push(c),
                    Some(c) => return Err(self.error(&format!("Invalid escape: \\{c}"))),
                    None => return Err(self.error("Unexpected EOF in quoted string")),
                },
                Some(c) => result.push(c),
                None => return Err(self.error("Unexpected EOF in quoted string")),
            }
        }

        let s =
            String::from_utf8(result).map_err(|_| self.error("Invalid UTF-8 in quoted string"))?;
        Ok(Token::QuotedString(s))
    }

    /// Reads a literal `{n}\r\n` followed by its n bytes.
    fn read_literal(&mut self) -> Result<Token<'a>> {
        self.advance();

        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
        }
        let size: usize = std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("Invalid literal size"))?;

        if self.peek() == Some(b'+') {
            self.advance();
        }
        if self.advance() != Some(b'}') {
            return Err(self.error("Expected } after literal size"));
        }
        if self.advance() != Some(b'\r') || self.advance() != Some(b'\n') {
            return Err(self.error("Expected CRLF after literal size"));
        }

        if self.pos + size > self.input.len() {
            return Err(self.error("Incomplete literal data"));
        }
        let data = self.input[self.pos..self.pos + size].to_vec();
        self.skip(size);

        Ok(Token::Literal(data))
    }

    /// Reads a number or an atom starting with a digit (`1:4,7` is an atom).
    ///
    /// A run of digits too large for `u64` is returned as an atom.
    fn read_number_or_atom(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.advance();
        }

        let s = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("Invalid UTF-8 in atom"))?;

        if s.bytes().all(|b| b.is_ascii_digit())
            && let Ok(n) = s.parse()
        {
            return Ok(Token::Number(n));
        }
        Ok(Token::Atom(s))
    }

    /// Reads an atom token.
    fn read_atom(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.advance();
        }
        self.atom_at(start)
    }

    fn atom_at(&self, start: usize) -> Result<Token<'a>> {
        let s = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("Invalid UTF-8 in atom"))?;

        if s.eq_ignore_ascii_case("NIL") {
            Ok(Token::Nil)
        } else {
            Ok(Token::Atom(s))
        }
    }

    /// Creates a parse error at the current position.
    pub(crate) fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }

    /// Expects and consumes a specific token.
    #[allow(clippy::needless_pass_by_value)]
    pub fn expect(&mut self, expected: Token<'_>) -> Result<()> {
        let token = self.next_token()?;
        if std::mem::discriminant(&token) == std::mem::discriminant(&expected) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {expected:?}, got {token:?}")))
        }
    }

    /// Expects and consumes a space.
    pub fn expect_space(&mut self) -> Result<()> {
        self.expect(Token::Space)
    }

    /// Reads an astring (atom, number, or string).
    pub fn read_astring(&mut self) -> Result<String> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s.to_string()),
            Token::Number(n) => Ok(n.to_string()),
            Token::QuotedString(s) => Ok(s),
            Token::Nil => Ok("NIL".to_string()),
            Token::Literal(data) => {
                String::from_utf8(data).map_err(|_| self.error("Invalid UTF-8 in literal"))
            }
            token => Err(self.error(&format!("Expected astring, got {token:?}"))),
        }
    }

    /// Reads a number that must fit in 32 bits.
    pub fn read_number(&mut self) -> Result<u32> {
        let n = self.read_number64()?;
        u32::try_from(n).map_err(|_| self.error(&format!("Number {n} exceeds 32 bits")))
    }

    /// Reads a 64-bit number.
    pub fn read_number64(&mut self) -> Result<u64> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            token => Err(self.error(&format!("Expected number, got {token:?}"))),
        }
    }

    /// Reads an atom.
    pub fn read_atom_string(&mut self) -> Result<&'a str> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s),
            token => Err(self.error(&format!("Expected atom, got {token:?}"))),
        }
    }

    /// Skips optional spaces.
    pub fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.advance();
        }
    }
}

/// Returns true if the byte is a valid atom character.
///
/// Includes `\` so that flags like `\Seen` lex as one atom.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    matches!(b,
        0x21..=0x27 |
        0x2B..=0x5A |
        0x5C |
        0x5E..=0x7A |
        0x7C |
        0x7E
    ) && b != b'"'
        && b != b'%'
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
    fn test_tagged_response() {
        let mut lexer = Lexer::new(b"a0001 OK LOGIN completed\r\n");

        assert_eq!(lexer.next_token().unwrap(), Token::Atom("a0001"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("OK"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("LOGIN"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("completed"));
        assert_eq!(lexer.next_token().unwrap(), Token::Crlf);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_numbers() {
        let mut lexer = Lexer::new(b"123 18446744073709551615 99999999999999999999 1:5");

        assert_eq!(lexer.next_token().unwrap(), Token::Number(123));
        lexer.skip_spaces();
        assert_eq!(lexer.next_token().unwrap(), Token::Number(u64::MAX));
        lexer.skip_spaces();
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("99999999999999999999"));
        lexer.skip_spaces();
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("1:5"));
    }

    #[test]
    fn test_read_number_width() {
        let mut lexer = Lexer::new(b"4294967296");
        assert!(lexer.read_number().is_err());
        let mut lexer = Lexer::new(b"4294967296");
        assert_eq!(lexer.read_number64().unwrap(), 4_294_967_296);
    }

    #[test]
    fn test_quoted_string_escaped() {
        let mut lexer = Lexer::new(b"\"hello \\\"world\\\"\"");
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::QuotedString("hello \"world\"".to_string())
        );
    }

    #[test]
    fn test_nil() {
        let mut lexer = Lexer::new(b"NIL nil");
        assert_eq!(lexer.next_token().unwrap(), Token::Nil);
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Nil);
    }

    #[test]
    fn test_flag_list() {
        let mut lexer = Lexer::new(b"(\\Seen \\*)");
        assert_eq!(lexer.next_token().unwrap(), Token::LParen);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("\\Seen"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("\\*"));
        assert_eq!(lexer.next_token().unwrap(), Token::RParen);
    }

    #[test]
    fn test_literal() {
        let mut lexer = Lexer::new(b"{5}\r\nhello{2+}\r\nab");
        assert_eq!(lexer.next_token().unwrap(), Token::Literal(b"hello".to_vec()));
        assert_eq!(lexer.next_token().unwrap(), Token::Literal(b"ab".to_vec()));
    }

    #[test]
    fn test_literal_truncated() {
        let mut lexer = Lexer::new(b"{10}\r\nshort");
        assert!(matches!(lexer.next_token(), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_continuation() {
        let mut lexer = Lexer::new(b"+ Ready\r\n");
        assert_eq!(lexer.next_token().unwrap(), Token::Plus);
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("Ready"));
    }

    #[test]
    fn test_is_atom_char() {
        assert!(is_atom_char(b'A'));
        assert!(is_atom_char(b':'));
        assert!(is_atom_char(b'\\'));
        assert!(is_atom_char(b'&'));
        assert!(!is_atom_char(b' '));
        assert!(!is_atom_char(b'('));
        assert!(!is_atom_char(b'{'));
        assert!(!is_atom_char(b'%'));
        assert!(!is_atom_char(b']'));
    }
}
