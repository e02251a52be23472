//! IMAP protocol parser.
//!
//! A sans-I/O parser for server responses. The lexer turns raw bytes into
//! tokens; the response parser builds [`Response`] values from them.
//!
//! # Example
//!
//! ```
//! use neomutt_imap::parser::{Response, ResponseParser, UntaggedResponse};
//!
//! let response = ResponseParser::parse(b"* 4 EXISTS\r\n").unwrap();
//! assert_eq!(response, Response::Untagged(UntaggedResponse::Exists(4)));
//! ```

pub mod lexer;
pub mod response;

pub use lexer::{Lexer, Token};
pub use response::{FetchItem, Response, ResponseParser, UntaggedResponse};
