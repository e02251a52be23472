//! Integration tests for the IMAP engine.
//!
//! Each test drives a full account through the public API against a
//! scripted server: `tokio_test` mocks for exact byte sequences, and a
//! duplex pipe with a small server task where compression is involved.

use std::sync::Arc;
use std::time::Duration;

use neomutt_hcache::{Backend, HeaderCache, MemoryBackend};
use neomutt_imap::command::ExecFlags;
use neomutt_imap::connection::{DeflateStream, ImapStream};
use neomutt_imap::mailbox::Email;
use neomutt_imap::{
    AccountState, CheckResult, Collaborators, ConnAccount, Error, ImapAccount, ImapOptions, Mechanism,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_test::io::Builder;

const GREETING: &[u8] = b"* OK [CAPABILITY IMAP4rev1] ready\r\n";

fn options() -> ImapOptions {
    ImapOptions::builder()
        .pass("secret")
        .authenticators("login")
        .poll_timeout(Duration::ZERO)
        .build()
        .unwrap()
}

fn account(options: ImapOptions) -> ImapAccount {
    let mut conn = ConnAccount::new("imap.example.com", true);
    conn.user = Some("joe".to_string());
    ImapAccount::new(conn, Arc::new(options), 'a')
}

/// Greeting, LOGIN and delimiter discovery, as tags a0001 and a0002.
fn login(builder: &mut Builder) -> &mut Builder {
    builder
        .read(GREETING)
        .write(b"a0001 LOGIN \"joe\" \"secret\"\r\n")
        .read(b"a0001 OK Logged in\r\n")
        .write(b"a0002 LIST \"\" \"\"\r\n")
        .read(b"* LIST (\\Noselect) \"/\" \"\"\r\na0002 OK done\r\n")
}

#[test]
fn test_mailbox_name_round_trip() {
    let name = "Отправленные";
    let encoded = neomutt_imap::utf7::encode(name);
    assert_eq!(encoded, "&BB4EQgQ,BEAEMAQyBDsENQQ9BD0ESwQ1-");
    assert_eq!(neomutt_imap::utf7::decode(&encoded).unwrap(), name);

    assert_eq!(
        neomutt_imap::path::munge(false, name),
        "\"&BB4EQgQ,BEAEMAQyBDsENQQ9BD0ESwQ1-\""
    );
    assert_eq!(neomutt_imap::path::munge(true, name), format!("\"{name}\""));
}

#[tokio::test]
async fn test_pipelined_fetch() {
    let mock = login(&mut Builder::new())
        .write(b"a0003 SELECT \"INBOX\"\r\n")
        .read(b"* 3 EXISTS\r\n* OK [UIDVALIDITY 5] ok\r\na0003 OK [READ-WRITE] done\r\n")
        .write(b"a0004 FETCH 1:3 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
        .read(b"* 1 FETCH (UID 1 FLAGS () BODY[HEADER] {2}\r\na\n)\r\n")
        .read(b"* 2 FETCH (UID 2 FLAGS () BODY[HEADER] {2}\r\nb\n)\r\n")
        .read(b"* 3 FETCH (UID 3 FLAGS (\\Seen) BODY[HEADER] {2}\r\nc\n)\r\n")
        .read(b"a0004 OK done\r\n")
        .write(b"a0005 UID FETCH 1 (FLAGS)\r\na0006 UID FETCH 2 (FLAGS)\r\na0007 UID FETCH 3 (FLAGS)\r\n")
        .read(b"* 1 FETCH (UID 1 FLAGS (\\Seen))\r\na0005 OK FETCH completed\r\n")
        .read(b"* 2 FETCH (UID 2 FLAGS (\\Seen \\Flagged))\r\na0006 OK FETCH completed\r\n")
        .read(b"* 3 FETCH (UID 3 FLAGS ())\r\na0007 OK FETCH completed\r\n")
        .build();
    let mut account = account(options());
    account.connect_with(ImapStream::custom(mock, true)).await.unwrap();
    account.select("INBOX", false).await.unwrap();

    for uid in 1..=3 {
        account
            .exec(Some(&format!("UID FETCH {uid} (FLAGS)")), ExecFlags::QUEUE)
            .await
            .unwrap();
    }
    assert_eq!(account.commands_in_flight(), 3);
    account.flush().await.unwrap();
    assert_eq!(account.commands_in_flight(), 0);

    let mbox = account.mailbox().unwrap();
    let first = &mbox.email(1).unwrap().flags;
    let second = &mbox.email(2).unwrap().flags;
    let third = &mbox.email(3).unwrap().flags;
    assert!(first.read && !first.flagged);
    assert!(second.read && second.flagged);
    assert!(!third.read && !third.flagged);
}

#[tokio::test]
async fn test_uidvalidity_change_between_sessions() -> anyhow::Result<()> {
    let backend = MemoryBackend::new();
    let collab = || Collaborators {
        header_cache: Some(Arc::new(backend.clone())),
        ..Collaborators::default()
    };

    let first = login(&mut Builder::new())
        .write(b"a0003 SELECT \"INBOX\"\r\n")
        .read(b"* 1 EXISTS\r\n* OK [UIDVALIDITY 100] ok\r\n* OK [UIDNEXT 11] ok\r\na0003 OK done\r\n")
        .write(b"a0004 FETCH 1:1 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
        .read(b"* 1 FETCH (UID 10 FLAGS () BODY[HEADER] {2}\r\na\n)\r\na0004 OK done\r\n")
        .write(b"a0005 LOGOUT\r\n")
        .read(b"* BYE bye\r\na0005 OK done\r\n")
        .build();
    let mut session = account(options()).with_collaborators(collab());
    session.connect_with(ImapStream::custom(first, true)).await?;
    session.select("INBOX", false).await?;
    session.logout().await;

    let file = session.account().hcache_name('/', "INBOX")?;
    let hc = HeaderCache::new(backend.open(&file).await?);
    assert_eq!(hc.fetch_u32(HeaderCache::UIDVALIDITY).await?, Some(100));
    assert!(hc.fetch::<Email>("/10", 100).await?.is_some());
    hc.close().await?;

    // the server renumbered everything
    let second = login(&mut Builder::new())
        .write(b"a0003 SELECT \"INBOX\"\r\n")
        .read(b"* 1 EXISTS\r\n* OK [UIDVALIDITY 101] ok\r\n* OK [UIDNEXT 2] ok\r\na0003 OK done\r\n")
        .write(b"a0004 FETCH 1:1 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
        .read(b"* 1 FETCH (UID 1 FLAGS (\\Seen) BODY[HEADER] {2}\r\nb\n)\r\na0004 OK done\r\n")
        .write(b"a0005 CLOSE\r\n")
        .read(b"a0005 OK closed\r\n")
        .build();
    let mut session = account(options()).with_collaborators(collab());
    session.connect_with(ImapStream::custom(second, true)).await?;
    session.select("INBOX", false).await?;
    assert_eq!(session.mailbox().map(|m| m.uids()), Some(vec![1]));
    session.close_mailbox().await?;

    let hc = HeaderCache::new(backend.open(&file).await?);
    assert_eq!(hc.fetch_u32(HeaderCache::UIDVALIDITY).await?, Some(101));
    assert!(hc.fetch::<Email>("/10", 100).await?.is_none());
    assert!(hc.fetch::<Email>("/10", 101).await?.is_none());
    assert!(hc.fetch::<Email>("/1", 101).await?.is_some_and(|e| e.flags.read));
    Ok(())
}

#[tokio::test]
async fn test_expunge_cascade() {
    let mock = login(&mut Builder::new())
        .write(b"a0003 SELECT \"INBOX\"\r\n")
        .read(b"* 4 EXISTS\r\n* OK [UIDVALIDITY 1] ok\r\na0003 OK done\r\n")
        .write(b"a0004 FETCH 1:4 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
        .read(b"* 1 FETCH (UID 10 FLAGS () BODY[HEADER] {2}\r\nA\n)\r\n")
        .read(b"* 2 FETCH (UID 11 FLAGS () BODY[HEADER] {2}\r\nB\n)\r\n")
        .read(b"* 3 FETCH (UID 12 FLAGS () BODY[HEADER] {2}\r\nC\n)\r\n")
        .read(b"* 4 FETCH (UID 13 FLAGS () BODY[HEADER] {2}\r\nD\n)\r\n")
        .read(b"a0004 OK done\r\n")
        .write(b"a0005 NOOP\r\n")
        .read(b"* 2 EXPUNGE\r\n* 2 EXPUNGE\r\na0005 OK NOOP completed\r\n")
        .build();
    let mut account = account(options());
    account.connect_with(ImapStream::custom(mock, true)).await.unwrap();
    account.select("INBOX", false).await.unwrap();
    assert_eq!(account.mailbox().unwrap().uids(), vec![10, 11, 12, 13]);

    assert_eq!(account.check_mailbox(true).await.unwrap(), CheckResult::Reopened);
    let mbox = account.mailbox().unwrap();
    assert_eq!(mbox.uids(), vec![10, 13]);
    assert!(mbox.email(11).is_none());
    assert!(mbox.email(12).is_none());
    assert_eq!(mbox.uid_at(2), Some(13));
}

#[tokio::test]
async fn test_auth_failover() {
    let mock = Builder::new()
        .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=OAUTHBEARER AUTH=PLAIN] ready\r\n")
        .write(b"a0001 AUTHENTICATE PLAIN\r\n")
        .read(b"+ \r\n")
        .write(b"am9lAGpvZQBzZWNyZXQ=\r\n")
        .read(b"a0001 OK Logged in\r\n")
        .write(b"a0002 LIST \"\" \"\"\r\n")
        .read(b"a0002 OK done\r\n")
        .build();
    let options = ImapOptions::builder()
        .pass("secret")
        .auth_try_all(false)
        .poll_timeout(Duration::ZERO)
        .build()
        .unwrap();
    let mut account = account(options);

    // try_all is off, so a single FAILURE would have ended the login
    account.connect_with(ImapStream::custom(mock, true)).await.unwrap();
    assert_eq!(account.state(), AccountState::Authenticated);
    assert!(!account.is_fatal());
    assert_eq!(Mechanism::DEFAULT_ORDER.first(), Some(&Mechanism::OAuthBearer));
}

#[tokio::test]
async fn test_fatal_account_stays_fatal() {
    let mock = login(&mut Builder::new())
        .write(b"a0003 NOOP\r\n")
        .build();
    let mut account = account(options());
    account.connect_with(ImapStream::custom(mock, true)).await.unwrap();

    assert!(account.exec(Some("NOOP"), ExecFlags::empty()).await.is_err());
    assert!(account.is_fatal());
    assert_eq!(account.state(), AccountState::Disconnected);
    assert!(matches!(account.select("INBOX", false).await, Err(Error::Fatal)));
    assert!(matches!(account.list("", "*").await, Err(Error::Fatal)));
    assert!(matches!(account.exec(Some("NOOP"), ExecFlags::empty()).await, Err(Error::Fatal)));
}

fn listing() -> (Vec<u8>, Vec<String>) {
    let literal = "Literal \"quoted\" folder";
    let mut names = vec![literal.to_string()];
    let mut out = format!("* LIST () \"/\" {{{}}}\r\n{literal}\r\n", literal.len()).into_bytes();
    for i in 0..200 {
        let name = format!("Archive/{i:04}-{}", "x".repeat(40));
        out.extend_from_slice(format!("* LIST (\\HasNoChildren) \"/\" \"{name}\"\r\n").as_bytes());
        names.push(name);
    }
    assert!(out.len() > 10 * 1024);
    (out, names)
}

async fn reply<S: AsyncWrite + Unpin>(stream: &mut S, data: &[u8]) -> std::io::Result<()> {
    stream.write_all(data).await?;
    stream.flush().await
}

/// Answers line by line until `stop` is seen; returns whether it was.
async fn serve<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut BufReader<S>, stop: &str) -> std::io::Result<bool> {
    let mut line = String::new();
    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(false);
        }
        let (tag, cmd) = line.trim_end().split_once(' ').unwrap_or_default();
        let response = match cmd {
            c if c.starts_with("LOGIN") => format!("{tag} OK logged in\r\n").into_bytes(),
            "LIST \"\" \"\"" => format!("* LIST (\\Noselect) \"/\" \"\"\r\n{tag} OK done\r\n").into_bytes(),
            "LIST \"\" \"*\"" => {
                let mut out = listing().0;
                out.extend_from_slice(format!("{tag} OK LIST completed\r\n").as_bytes());
                out
            }
            "LOGOUT" => format!("* BYE see you\r\n{tag} OK done\r\n").into_bytes(),
            c if c == stop => format!("{tag} OK go ahead\r\n").into_bytes(),
            _ => format!("{tag} BAD unexpected\r\n").into_bytes(),
        };
        reply(stream, &response).await?;
        if cmd == stop {
            return Ok(true);
        }
    }
}

#[tokio::test]
async fn test_deflate_listing() -> anyhow::Result<()> {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut plain = BufReader::new(server);
        reply(&mut plain, b"* OK [CAPABILITY IMAP4rev1 COMPRESS=DEFLATE] ready\r\n").await?;
        assert!(serve(&mut plain, "COMPRESS DEFLATE").await?);

        let mut compressed = BufReader::new(DeflateStream::new(plain.into_inner()));
        serve(&mut compressed, "").await?;
        let (compress_ratio, decompress_ratio) = compressed.get_ref().ratios();
        std::io::Result::Ok(compress_ratio > 0.0 && decompress_ratio > 0.0)
    });

    let mut account = account(options());
    account.connect_with(ImapStream::custom(client, true)).await?;

    let entries = account.list("", "*").await?;
    let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
    assert_eq!(names, listing().1);

    account.logout().await;
    drop(account);
    assert!(server.await??);
    Ok(())
}
