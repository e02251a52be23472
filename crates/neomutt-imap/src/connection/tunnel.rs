//! Tunnel transport: a shell command whose stdin/stdout carry the session.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::{Error, Result};

/// A running tunnel subprocess.
///
/// The child is killed when the stream is dropped.
#[derive(Debug)]
pub struct TunnelStream {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    secure: bool,
}

impl TunnelStream {
    /// Spawns `sh -c <command>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shell can't be started.
    pub fn spawn(command: &str, secure: bool) -> Result<Self> {
        tracing::debug!(command, "opening tunnel");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Protocol("tunnel has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Protocol("tunnel has no stdout".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout,
            secure,
        })
    }

    /// Whether the tunnel is trusted to be encrypted.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// Process id of the tunnel, if it is still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stdin).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_tunnel_echo() {
        let mut tunnel = TunnelStream::spawn("cat", true).unwrap();
        assert!(tunnel.is_secure());
        tunnel.write_all(b"a0001 NOOP\r\n").await.unwrap();
        tunnel.flush().await.unwrap();

        let mut reader = BufReader::new(tunnel);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "a0001 NOOP\r\n");
    }
}
