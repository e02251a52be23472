#![allow(clippy::doc_markdown, clippy::uninlined_format_args)]
//! Example: log in, open a mailbox and print what is in it
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=neomutt_imap=debug \
//!     cargo run --package neomutt-imap --example imap_status -- imaps://user@imap.example.com/INBOX
//! ```
//!
//! The password is read from `IMAP_PASS`, or asked for on the terminal.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use neomutt_imap::{Collaborators, ImapOptions, ImapUrl, Prompt, Registry};
use tracing_subscriber::EnvFilter;

/// Asks on stdin/stdout.
struct Terminal;

fn ask(question: &str) -> Option<String> {
    print!("{question}");
    io::stdout().flush().ok()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer).ok()?;
    let answer = answer.trim();
    (!answer.is_empty()).then(|| answer.to_string())
}

#[async_trait]
impl Prompt for Terminal {
    async fn user(&self, host: &str) -> Option<String> {
        ask(&format!("User at {host}: "))
    }

    async fn login(&self, _host: &str, _user: &str) -> Option<String> {
        None
    }

    async fn pass(&self, host: &str, user: &str) -> Option<String> {
        ask(&format!("Password for {user}@{host}: "))
    }

    async fn confirm(&self, question: &str, default: bool) -> bool {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        match ask(&format!("{question} {hint} ")) {
            Some(answer) => answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"),
            None => default,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .context("usage: imap_status imap[s]://[user@]host[:port][/mailbox]")?;
    let url = ImapUrl::parse(&url)?;

    let mut builder = ImapOptions::builder().idle(false);
    if let Ok(pass) = std::env::var("IMAP_PASS") {
        builder = builder.pass(pass);
    }
    let options = builder.build()?;
    let collab = Collaborators {
        prompt: Arc::new(Terminal),
        ..Collaborators::default()
    }
    .with_defaults(&options);
    let mut registry = Registry::new(options).with_collaborators(collab);

    let account = registry.find_or_connect(&url).await?;
    println!("Connected to {}", account.account().url_base());
    if let Some(caps) = account.capability_string() {
        println!("Capabilities: {caps}");
    }

    for entry in account.browse("").await? {
        println!("  {}{}", entry.desc, if entry.selectable { "" } else { " (not selectable)" });
    }

    account.select(&url.mailbox, true).await?;
    if let Some(mailbox) = account.mailbox() {
        println!(
            "{}: {} messages, UIDVALIDITY {}, UIDNEXT {}",
            mailbox.name,
            mailbox.message_count(),
            mailbox.status.uidvalidity,
            mailbox.status.uid_next
        );
        let unread = mailbox.emails().filter(|e| !e.flags.read).count();
        println!("{unread} unread");
    }

    registry.logout_all().await;
    Ok(())
}
