//! COMPRESS=DEFLATE (RFC 4978) stream wrapper.
//!
//! Both directions use raw deflate with a 32 KiB window (zlib window bits
//! −15). Incoming compressed bytes are staged in an 8 KiB buffer; outgoing
//! data is deflated with a partial flush per write so every command reaches
//! the server without waiting for more input.

use std::io;
use std::ops::Range;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Size of the compressed-input staging buffer and of each output chunk.
const STAGING_SIZE: usize = 8 * 1024;

/// A stream that inflates what it reads and deflates what it writes.
pub struct DeflateStream<S> {
    inner: S,
    decompress: Decompress,
    compress: Compress,
    staging: Vec<u8>,
    staged: Range<usize>,
    reader_eof: bool,
    stream_end: bool,
    out: Vec<u8>,
    out_pos: usize,
}

impl<S> DeflateStream<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self::with_prefix(inner, &[])
    }

    /// Wraps `inner`, treating `prefix` as compressed bytes already read from it.
    ///
    /// Used when the line reader has buffered past the tagged OK that
    /// switched compression on.
    pub fn with_prefix(inner: S, prefix: &[u8]) -> Self {
        let mut staging = vec![0; STAGING_SIZE.max(prefix.len())];
        staging[..prefix.len()].copy_from_slice(prefix);
        Self {
            inner,
            decompress: Decompress::new(false),
            compress: Compress::new(Compression::default(), false),
            staging,
            staged: 0..prefix.len(),
            reader_eof: false,
            stream_end: false,
            out: Vec::with_capacity(STAGING_SIZE),
            out_pos: 0,
        }
    }

    /// Returns true if compressed input is waiting to be inflated.
    #[must_use]
    pub fn has_staged_input(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Gets a reference to the wrapped stream.
    pub const fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped stream.
    pub const fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Compression ratios so far as `(inbound, outbound)`, each
    /// uncompressed bytes per compressed byte.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratios(&self) -> (f64, f64) {
        let ratio = |plain: u64, packed: u64| {
            if packed == 0 { 0.0 } else { plain as f64 / packed as f64 }
        };
        (
            ratio(self.decompress.total_out(), self.decompress.total_in()),
            ratio(self.compress.total_in(), self.compress.total_out()),
        )
    }

    /// Tears down both compression streams and hands back the wrapped stream.
    ///
    /// Staged input and unsent output are discarded.
    pub fn into_inner(self) -> S {
        let (read, write) = self.ratios();
        tracing::debug!(
            read_ratio = format!("{read:.2}"),
            write_ratio = format!("{write:.2}"),
            "closing compressed stream"
        );
        self.inner
    }

    fn deflate_into_out(&mut self, mut data: &[u8]) -> io::Result<()> {
        loop {
            let start = self.out.len();
            self.out.resize(start + STAGING_SIZE, 0);

            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            self.compress
                .compress(data, &mut self.out[start..], FlushCompress::Partial)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = usize::try_from(self.compress.total_in() - before_in).unwrap_or(data.len());
            let produced = usize::try_from(self.compress.total_out() - before_out).unwrap_or(0);

            self.out.truncate(start + produced);
            data = &data[consumed.min(data.len())..];

            // Spare room in the output chunk means the flush completed.
            if data.is_empty() && produced < STAGING_SIZE {
                return Ok(());
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> DeflateStream<S> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.out_pos < self.out.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.out[self.out_pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.out_pos += n;
        }
        self.out.clear();
        self.out_pos = 0;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DeflateStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.stream_end || dst.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            let before_in = this.decompress.total_in();
            let before_out = this.decompress.total_out();
            let status = this
                .decompress
                .decompress(
                    &this.staging[this.staged.clone()],
                    dst.initialize_unfilled(),
                    FlushDecompress::Sync,
                )
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = usize::try_from(this.decompress.total_in() - before_in).unwrap_or(0);
            let produced = usize::try_from(this.decompress.total_out() - before_out).unwrap_or(0);

            this.staged.start += consumed;
            if status == Status::StreamEnd {
                this.stream_end = true;
            }
            if produced > 0 {
                dst.advance(produced);
                return Poll::Ready(Ok(()));
            }
            if consumed > 0 && !this.staged.is_empty() {
                continue;
            }
            if this.reader_eof {
                return Poll::Ready(Ok(()));
            }

            // Move the unconsumed tail to the front before reading more.
            if this.staged.start > 0 {
                this.staging.copy_within(this.staged.clone(), 0);
                this.staged = 0..this.staged.len();
            }
            if this.staged.end == this.staging.len() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "inflate made no progress on a full buffer",
                )));
            }

            let mut rb = ReadBuf::new(&mut this.staging[this.staged.end..]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut rb))?;
            let n = rb.filled().len();
            if n == 0 {
                this.reader_eof = true;
            } else {
                this.staged.end += n;
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeflateStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        // Everything deflated earlier goes out before deflate runs again.
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        this.deflate_into_out(buf)?;
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
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
    clippy::similar_names,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;
    use crate::connection::FramedStream;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::io::Builder;

    fn deflate_raw(data: &[u8], flush: FlushCompress) -> Vec<u8> {
        let mut c = Compress::new(Compression::best(), false);
        let mut out = Vec::with_capacity(data.len() + 1024);
        c.compress_vec(data, &mut out, flush).unwrap();
        out
    }

    fn inflate_raw(data: &[u8]) -> Vec<u8> {
        let mut d = Decompress::new(false);
        let mut out = Vec::with_capacity(64 * 1024);
        d.decompress_vec(data, &mut out, FlushDecompress::Sync).unwrap();
        out
    }

    fn list_response() -> (Vec<u8>, Vec<u8>) {
        let literal: Vec<u8> = (0..10 * 1024).map(|i| b'a' + (i % 26) as u8).collect();
        let mut response = format!("* LIST (\\HasNoChildren) \"/\" {{{}}}\r\n", literal.len()).into_bytes();
        response.extend_from_slice(&literal);
        response.extend_from_slice(b"\r\n");
        (response, literal)
    }

    #[tokio::test]
    async fn test_literal_round_trip() {
        let (response, _) = list_response();
        let mut wire = response.clone();
        wire.extend_from_slice(b"a0001 OK LIST completed\r\n");
        let packed = deflate_raw(&wire, FlushCompress::Sync);

        let mut builder = Builder::new();
        for chunk in packed.chunks(700) {
            builder.read(chunk);
        }
        let mut framed = FramedStream::new(DeflateStream::new(builder.build()));

        assert_eq!(framed.read_response().await.unwrap(), response);
        assert_eq!(framed.read_response().await.unwrap(), b"a0001 OK LIST completed\r\n");
    }

    #[tokio::test]
    async fn test_prefix_is_inflated_first() {
        let packed = deflate_raw(b"* OK compressed hello\r\n", FlushCompress::Sync);
        let (head, tail) = packed.split_at(5);

        let mock = Builder::new().read(tail).build();
        let mut stream = DeflateStream::with_prefix(mock, head);
        assert!(stream.has_staged_input());

        let mut out = vec![0; 64];
        let mut got = Vec::new();
        while got.len() < 23 {
            let n = stream.read(&mut out).await.unwrap();
            assert!(n > 0);
            got.extend_from_slice(&out[..n]);
        }
        assert_eq!(got, b"* OK compressed hello\r\n");
    }

    #[tokio::test]
    async fn test_stream_end_is_eof() {
        let packed = deflate_raw(b"bye\r\n", FlushCompress::Finish);
        let mut stream = DeflateStream::new(&packed[..]);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"bye\r\n");
    }

    #[tokio::test]
    async fn test_write_is_flushed_per_command() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut stream = DeflateStream::new(client);

        stream.write_all(b"a0002 NOOP\r\n").await.unwrap();
        stream.flush().await.unwrap();

        let mut wire = vec![0; 1024];
        let n = server.read(&mut wire).await.unwrap();
        assert_eq!(inflate_raw(&wire[..n]), b"a0002 NOOP\r\n");
    }

    #[tokio::test]
    async fn test_into_inner_restores_plain_stream() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = DeflateStream::new(client);
        stream.write_all(b"x").await.unwrap();
        stream.flush().await.unwrap();
        let mut wire = vec![0; 64];
        let _ = server.read(&mut wire).await.unwrap();

        let mut inner = stream.into_inner();
        inner.write_all(b"plain\r\n").await.unwrap();
        let n = server.read(&mut wire).await.unwrap();
        assert_eq!(&wire[..n], b"plain\r\n");
    }

    #[tokio::test]
    async fn test_large_write() {
        let (client, mut server) = tokio::io::duplex(256 * 1024);
        let (payload, _) = list_response();
        let mut stream = DeflateStream::new(client);
        stream.write_all(&payload).await.unwrap();
        stream.flush().await.unwrap();
        let (read, write) = stream.ratios();
        assert!(write > 1.0);
        assert!(read.abs() < f64::EPSILON);

        drop(stream);
        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(inflate_raw(&wire), payload);
    }
}
