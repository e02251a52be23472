//! IMAP connection management.
//!
//! This module provides the byte-level side of an account:
//! - TCP, TLS, tunnel and caller-supplied transports
//! - COMPRESS=DEFLATE layering
//! - Framed I/O for the IMAP protocol

mod deflate;
mod framed;
mod stream;
mod tunnel;

pub use deflate::DeflateStream;
pub use framed::FramedStream;
pub use stream::{ImapStream, Transport, connect_plain, connect_tls, create_tls_connector};
pub use tunnel::TunnelStream;
