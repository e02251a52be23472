//! Framed I/O for the IMAP protocol.
//!
//! IMAP uses CRLF-terminated lines with support for literals. Some servers
//! end lines with a bare LF; those are normalised to CRLF so the parser only
//! ever sees one line ending.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::Result;

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Framed connection for IMAP protocol.
///
/// Handles line-based reading with literal support and buffered writing.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads a complete IMAP response, following any literals it announces.
    ///
    /// The returned bytes always end in CRLF.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();

        loop {
            let line = self.read_line().await?;
            response.extend_from_slice(&line);

            let Some(literal_len) = parse_literal_length(&line) else {
                break;
            };
            if literal_len > MAX_LITERAL_SIZE {
                return Err(crate::Error::Protocol(format!(
                    "literal too large: {literal_len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }
            let start = response.len();
            response.resize(start + literal_len, 0);
            self.reader.read_exact(&mut response[start..]).await?;
            tracing::trace!(bytes = literal_len, "< literal");
        }

        Ok(response)
    }

    /// Reads a single line, terminated by CRLF or a bare LF.
    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(crate::Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&buf[..=pos]);
                self.reader.consume(pos + 1);
                break;
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(crate::Error::Protocol("line too long".to_string()));
            }
        }

        if !line.ends_with(b"\r\n") {
            line.pop();
            line.extend_from_slice(b"\r\n");
        }
        tracing::trace!(line = %String::from_utf8_lossy(line.trim_ascii_end()), "<");
        Ok(line)
    }

    /// Waits up to `timeout` for input.
    ///
    /// Returns `Ok(true)` if a read would not block, including at EOF.
    pub async fn poll_ready(&mut self, timeout: Duration) -> Result<bool> {
        if !self.reader.buffer().is_empty() {
            return Ok(true);
        }
        match tokio::time::timeout(timeout, self.reader.fill_buf()).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(false),
        }
    }

    /// Returns true if a response is already sitting in the read buffer.
    #[must_use]
    pub fn has_buffered_input(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    /// Writes a command to the stream.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Writes raw data to the stream (for literals).
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Gets a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.reader.get_mut()
    }

    /// Consumes the framed stream, returning the inner stream and any bytes
    /// read from it but not yet consumed.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        let leftover = self.reader.buffer().to_vec();
        (self.reader.into_inner(), leftover)
    }
}

/// Parses a literal length from the end of a line.
///
/// Matches patterns like `{123}\r\n` or `{123+}\r\n` (non-synchronizing).
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let body = line.strip_suffix(b"}")?;
    let open = body.iter().rposition(|&b| b == b'{')?;
    let digits = &body[open + 1..];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
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
    use tokio_test::io::Builder;

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"BODY {123}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"BODY {123+}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(parse_literal_length(b"no literal\r\n"), None);
        assert_eq!(parse_literal_length(b"incomplete {123"), None);
        assert_eq!(parse_literal_length(b"wrong {abc}\r\n"), None);
        assert_eq!(parse_literal_length(b"empty {}\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_simple_line() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_response().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_bare_lf_is_normalised() {
        let mock = Builder::new().read(b"* OK ready\n* 3 EXISTS\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_response().await.unwrap(), b"* OK ready\r\n");
        assert_eq!(framed.read_response().await.unwrap(), b"* 3 EXISTS\r\n");
    }

    #[tokio::test]
    async fn test_crlf_split_across_reads() {
        let mock = Builder::new().read(b"* OK ready\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_response().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_with_literal() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY {5}\r\n")
            .read(b"hel")
            .read(b"lo)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(
            framed.read_response().await.unwrap(),
            b"* 1 FETCH (BODY {5}\r\nhello)\r\n"
        );
    }

    #[tokio::test]
    async fn test_literal_with_newlines_untouched() {
        let mock = Builder::new().read(b"* 1 FETCH (BODY {4}\r\na\nb\n)\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(
            framed.read_response().await.unwrap(),
            b"* 1 FETCH (BODY {4}\r\na\nb\n)\r\n"
        );
    }

    #[tokio::test]
    async fn test_write_command() {
        let mock = Builder::new().write(b"a0001 NOOP\r\n").build();
        let mut framed = FramedStream::new(mock);
        framed.write_command(b"a0001 NOOP\r\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_literal_size_validation() {
        let header = format!("* 1 FETCH (BODY {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);
        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_line_length_limit() {
        let long_line = "A".repeat(MAX_LINE_LENGTH + 100);
        let mock = Builder::new().read(long_line.as_bytes()).build();
        let mut framed = FramedStream::new(mock);
        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("line too long"));
    }

    #[tokio::test]
    async fn test_eof() {
        let mock = Builder::new().build();
        let mut framed = FramedStream::new(mock);
        assert!(matches!(framed.read_response().await, Err(crate::Error::Io(_))));
    }

    #[tokio::test]
    async fn test_into_parts_keeps_buffered_bytes() {
        let mock = Builder::new().read(b"a0001 OK go\r\n\x01\x02\x03").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_response().await.unwrap(), b"a0001 OK go\r\n");
        assert!(framed.has_buffered_input());
        let (_, leftover) = framed.into_parts();
        assert_eq!(leftover, [1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_ready_timeout() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut framed = FramedStream::new(client);
        assert!(!framed.poll_ready(Duration::from_secs(1)).await.unwrap());

        tokio::io::AsyncWriteExt::write_all(&mut server, b"* 1 EXISTS\r\n")
            .await
            .unwrap();
        assert!(framed.poll_ready(Duration::from_secs(1)).await.unwrap());
        assert_eq!(framed.read_response().await.unwrap(), b"* 1 EXISTS\r\n");
    }
}
