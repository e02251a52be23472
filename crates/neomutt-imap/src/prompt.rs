//! Questions the engine may need to ask the user.

use async_trait::async_trait;

/// Interactive collaborator.
///
/// The engine asks for credentials that neither the URL nor the options
/// supplied, and for confirmation before creating a mailbox. Every method
/// may answer "not available".
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Asks for the user name for `host`.
    async fn user(&self, host: &str) -> Option<String>;

    /// Asks for the SASL login for `host`; `None` falls back to the user.
    async fn login(&self, host: &str, user: &str) -> Option<String>;

    /// Asks for the password of `user` at `host`.
    async fn pass(&self, host: &str, user: &str) -> Option<String>;

    /// Asks a yes/no question; `default` is the answer when there is no one to ask.
    async fn confirm(&self, question: &str, default: bool) -> bool;
}

/// A prompt with no one behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

#[async_trait]
impl Prompt for NoPrompt {
    async fn user(&self, _host: &str) -> Option<String> {
        None
    }

    async fn login(&self, _host: &str, _user: &str) -> Option<String> {
        None
    }

    async fn pass(&self, _host: &str, _user: &str) -> Option<String> {
        None
    }

    async fn confirm(&self, _question: &str, default: bool) -> bool {
        default
    }
}
