//! `AUTHENTICATE CRAM-MD5` (RFC 2195).

use std::fmt::Write as _;

use tracing::debug;

use super::{AuthResult, sasl_line};
use crate::command::{CommandState, ExecFlags};
use crate::engine::ImapAccount;
use crate::types::Capabilities;
use crate::Result;

const BLOCK: usize = 64;

/// HMAC-MD5 (RFC 2104). Keys longer than a block are hashed first.
#[must_use]
pub fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut block = [0u8; BLOCK];
    if key.len() > BLOCK {
        block[..16].copy_from_slice(&md5::compute(key).0);
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = md5::Context::new();
    inner.consume(block.map(|b| b ^ 0x36));
    inner.consume(data);
    let inner = inner.compute();

    let mut outer = md5::Context::new();
    outer.consume(block.map(|b| b ^ 0x5c));
    outer.consume(inner.0);
    outer.compute().0
}

impl ImapAccount {
    pub(super) async fn auth_cram_md5(&mut self) -> Result<AuthResult> {
        if !self.capabilities.contains(Capabilities::AUTH_CRAM_MD5) {
            return Ok(AuthResult::Unavail);
        }
        let Some(login) = self.auth_login_name().await else {
            return Ok(AuthResult::Unavail);
        };
        let Some(pass) = self.auth_pass().await else {
            return Ok(AuthResult::Unavail);
        };

        self.start(Some("AUTHENTICATE CRAM-MD5"), ExecFlags::empty()).await?;
        if self.step_until_done().await? != CommandState::Respond {
            debug!("invalid response to AUTHENTICATE CRAM-MD5");
            return Ok(AuthResult::Failure);
        }

        let Some(challenge) = self.continuation_data() else {
            debug!("error decoding base64 challenge");
            self.abort_authenticate().await?;
            return Ok(AuthResult::Failure);
        };
        let digest = hmac_md5(pass.as_bytes(), &challenge);
        let mut response = login;
        response.push(' ');
        for byte in digest {
            let _ = write!(response, "{byte:02x}");
        }
        self.send_raw(&sasl_line(response.as_bytes()), true).await?;

        match self.step_until_done().await? {
            CommandState::Ok => Ok(AuthResult::Success),
            CommandState::Respond => {
                self.abort_authenticate().await?;
                Ok(AuthResult::Failure)
            }
            _ => Ok(AuthResult::Failure),
        }
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
    use tokio_test::io::Builder;

    use super::*;
    use crate::auth::tests::account_for;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_hmac_rfc2195_example() {
        let digest = hmac_md5(b"tanstaaftanstaaf", b"<1896.697170952@postoffice.reston.mci.net>");
        assert_eq!(hex(&digest), "b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_hmac_rfc2104_long_key() {
        // RFC 2202 test case 6
        let digest = hmac_md5(&[0xaa; 80], b"Test Using Larger Than Block-Size Key - Hash Key First");
        assert_eq!(hex(&digest), "6b1ab7fe4bd7bf8f0b62e6ce61b9d0cd");
    }

    #[tokio::test]
    async fn test_cram_md5_exchange() {
        let options = crate::config::ImapOptions::builder()
            .user("tim")
            .pass("tanstaaftanstaaf")
            .poll_timeout(std::time::Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE CRAM-MD5\r\n")
            .read(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
            .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
            .read(b"a0001 OK CRAM authentication successful\r\n")
            .build();
        let mut account = account_for(mock, options, "IMAP4rev1 AUTH=CRAM-MD5", false);
        assert_eq!(account.auth_cram_md5().await.unwrap(), AuthResult::Success);
    }
}
