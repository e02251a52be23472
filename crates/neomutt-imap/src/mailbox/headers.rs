//! Header download.
//!
//! The first download after SELECT goes through the header cache when the
//! cached UIDVALIDITY still holds: messages whose UID is cached are placed
//! from the cache and only their flags are refreshed (all of them, or with
//! CONDSTORE just those changed since the cached MODSEQ). Whatever is still
//! missing from the index is fetched in chunks.

use chrono::{DateTime, Utc};
use neomutt_hcache::HeaderCache;
use tracing::{debug, trace, warn};

use super::{Email, ReopenFlags, cache_value, parse_internal_date};
use crate::command::{CommandState, ExecFlags};
use crate::engine::ImapAccount;
use crate::parser::{FetchItem, UntaggedResponse};
use crate::types::{Capabilities, MessageFlags};
use crate::{Error, Result};

/// Header fields requested when `imap_headers` adds to the list.
const WANT_HEADERS: &str = "DATE FROM SENDER SUBJECT TO CC MESSAGE-ID REFERENCES CONTENT-TYPE \
                            CONTENT-DESCRIPTION IN-REPLY-TO REPLY-TO LINES LIST-POST \
                            LIST-SUBSCRIBE LIST-UNSUBSCRIBE X-LABEL X-ORIGINAL-TO";

/// What one FETCH response said about a message.
#[derive(Debug, Default)]
struct FetchedHeader {
    uid: u32,
    flags: Option<MessageFlags>,
    received: Option<DateTime<Utc>>,
    size: u32,
    headers: Option<Vec<u8>>,
}

impl FetchedHeader {
    fn new(items: &[FetchItem], mark_old: bool) -> Self {
        let mut out = Self::default();
        for item in items {
            match item {
                FetchItem::Uid(uid) => out.uid = *uid,
                FetchItem::Flags(flags) => out.flags = Some(MessageFlags::from_server(flags, mark_old)),
                FetchItem::InternalDate(date) => out.received = parse_internal_date(date),
                FetchItem::Rfc822Size(size) => out.size = *size,
                FetchItem::Body { data: Some(data), .. } => out.headers = Some(data.clone()),
                FetchItem::ModSeq(_) | FetchItem::Body { data: None, .. } => {}
            }
        }
        out
    }
}

/// How the first download may use the header cache.
#[derive(Debug, Default)]
struct CachePlan {
    /// UIDNEXT stored with the cache; zero if the cache can't be used.
    uid_next: u32,
    /// MODSEQ stored with the cache.
    modseq: Option<u64>,
    /// The server keeps mod-sequences and CONDSTORE is on.
    has_condstore: bool,
    /// QRESYNC is enabled and the server keeps mod-sequences.
    has_qresync: bool,
    /// Trust cached flags and ask for changes with CHANGEDSINCE.
    eval_condstore: bool,
}

impl ImapAccount {
    pub(crate) fn take_hcache(&mut self) -> Option<HeaderCache> {
        self.mailbox.as_mut().and_then(|m| m.hcache.take())
    }

    pub(crate) fn restore_hcache(&mut self, hcache: Option<HeaderCache>) {
        if let Some(mbox) = self.mailbox.as_mut() {
            mbox.hcache = hcache;
        }
    }

    /// Downloads headers for MSNs `begin..=end` into the index.
    ///
    /// `initial` marks the download right after SELECT, the only one that
    /// consults the cache bookkeeping.
    pub(crate) async fn read_headers(&mut self, begin: u32, end: u32, initial: bool) -> Result<()> {
        self.read_headers_with(begin, end, initial, false).await
    }

    /// Like [`Self::read_headers`]; `preloaded` says the index was filled
    /// from `/UIDSEQSET` and brought up to date by `SELECT (QRESYNC ...)`.
    pub(crate) async fn read_headers_with(&mut self, begin: u32, end: u32, initial: bool, preloaded: bool) -> Result<()> {
        let hcache = self.take_hcache();
        let result = self.download(hcache.as_ref(), begin, end, initial, preloaded).await;
        self.restore_hcache(hcache);
        result
    }

    async fn download(
        &mut self,
        hc: Option<&HeaderCache>,
        begin: u32,
        end: u32,
        initial: bool,
        mut preloaded: bool,
    ) -> Result<()> {
        let mut plan;
        let mut maxuid = 0;
        loop {
            let Some(mbox) = self.mailbox.as_mut() else {
                return Err(Error::InvalidState("no mailbox selected".to_string()));
            };
            if initial || end > mbox.highest_msn() {
                mbox.reserve_msn(end);
            }
            mbox.reopen -= ReopenFlags::ALLOW | ReopenFlags::NEWMAIL_PENDING;
            mbox.new_mail_count = 0;

            plan = CachePlan::default();
            if initial && let Some(hc) = hc {
                plan = self.plan_cache(hc, end).await;
            }

            let mut begin = begin;
            let evalhc = plan.uid_next > 0;
            if let Some(hc) = hc.filter(|_| evalhc) {
                if preloaded {
                    self.store_touched(hc).await;
                    self.expunge_pending(hc).await;
                } else {
                    self.eval_cache(hc, end, &plan).await?;
                    if plan.eval_condstore
                        && plan.modseq != self.mailbox.as_ref().map(|m| m.status.modseq)
                    {
                        self.condstore_updates(hc, &plan).await?;
                    }
                }
                if let Some(mbox) = self.mailbox.as_ref() {
                    while begin <= end && mbox.uid_at(begin).is_some() {
                        begin += 1;
                    }
                }
            } else if preloaded {
                // the cache no longer matches the server
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.clear_messages();
                    mbox.reserve_msn(end);
                }
                preloaded = false;
            }

            self.fetch_new(hc, begin, end, evalhc, &mut maxuid).await?;

            if preloaded && initial && !self.mailbox.as_ref().is_some_and(super::ImapMailbox::verify) {
                warn!("QRESYNC index is inconsistent, downloading headers again");
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.clear_messages();
                }
                preloaded = false;
                maxuid = 0;
                if let Some(hc) = hc {
                    cache_value("resetting UIDSEQSET", hc.delete(HeaderCache::UIDSEQSET).await);
                }
                continue;
            }
            break;
        }

        let Some(mbox) = self.mailbox.as_mut() else {
            return Err(Error::Fatal);
        };
        if maxuid > 0 && mbox.status.uid_next < maxuid + 1 {
            debug!(old = mbox.status.uid_next, new = maxuid + 1, "overriding UIDNEXT");
            mbox.status.uid_next = maxuid + 1;
        }
        if let Some(hc) = hc {
            cache_value(
                "storing UIDVALIDITY",
                hc.store_u32(HeaderCache::UIDVALIDITY, mbox.status.uidvalidity).await,
            );
            if mbox.status.uid_next > 1 {
                cache_value(
                    "storing UIDNEXT",
                    hc.store_u32(HeaderCache::UIDNEXT, mbox.status.uid_next).await,
                );
            }
            if initial {
                if plan.has_condstore || plan.has_qresync {
                    cache_value("storing MODSEQ", hc.store_u64(HeaderCache::MODSEQ, mbox.status.modseq).await);
                } else {
                    cache_value("clearing MODSEQ", hc.delete(HeaderCache::MODSEQ).await);
                }
                if plan.has_qresync {
                    let seqset = mbox.uid_seqset();
                    cache_value("storing UIDSEQSET", hc.store_raw(HeaderCache::UIDSEQSET, seqset.as_bytes()).await);
                } else {
                    cache_value("clearing UIDSEQSET", hc.delete(HeaderCache::UIDSEQSET).await);
                }
            }
        }
        mbox.reopen |= ReopenFlags::ALLOW;
        debug!(messages = mbox.message_count(), "headers loaded");
        Ok(())
    }

    /// Decides how far the cache can be trusted.
    ///
    /// A UIDVALIDITY change wipes the cache and the index before anything
    /// is fetched.
    async fn plan_cache(&mut self, hc: &HeaderCache, end: u32) -> CachePlan {
        let condstore = self.capabilities.contains(Capabilities::CONDSTORE) && self.options.condstore;
        let qresync = self.qresync;
        let Some(mbox) = self.mailbox.as_mut() else {
            return CachePlan::default();
        };
        let has_modseq = mbox.status.modseq != 0;
        let mut plan = CachePlan {
            has_condstore: has_modseq && condstore,
            has_qresync: has_modseq && qresync,
            ..CachePlan::default()
        };

        let uidvalidity = mbox.status.uidvalidity;
        let stored = cache_value(
            "reading UIDVALIDITY",
            hc.fetch_u32(HeaderCache::UIDVALIDITY).await,
        )
        .flatten();
        match stored {
            Some(old) if old != uidvalidity => {
                debug!(old, new = uidvalidity, "UIDVALIDITY changed, discarding cached headers");
                cache_value("clearing header cache", hc.clear().await);
                cache_value(
                    "storing UIDVALIDITY",
                    hc.store_u32(HeaderCache::UIDVALIDITY, uidvalidity).await,
                );
                mbox.clear_messages();
                mbox.reserve_msn(end);
                return plan;
            }
            Some(_) if uidvalidity != 0 => {}
            _ => return plan,
        }

        plan.uid_next = cache_value("reading UIDNEXT", hc.fetch_u32(HeaderCache::UIDNEXT).await)
            .flatten()
            .unwrap_or(0);
        if plan.uid_next == 0 {
            return plan;
        }
        plan.modseq = cache_value("reading MODSEQ", hc.fetch_u64(HeaderCache::MODSEQ).await).flatten();
        plan.eval_condstore = plan.modseq.is_some() && (plan.has_condstore || plan.has_qresync);
        debug!(uid_next = plan.uid_next, modseq = ?plan.modseq, condstore = plan.eval_condstore, "using header cache");
        plan
    }

    /// Places cached messages by asking the server for the UID of every MSN.
    async fn eval_cache(&mut self, hc: &HeaderCache, end: u32, plan: &CachePlan) -> Result<()> {
        if plan.uid_next <= 1 {
            return Ok(());
        }
        let cmd = format!(
            "UID FETCH 1:{} (UID{})",
            plan.uid_next - 1,
            if plan.eval_condstore { "" } else { " FLAGS" }
        );
        self.start(Some(&cmd), ExecFlags::empty()).await?;

        loop {
            let state = self.step().await?;
            if let Some(UntaggedResponse::Fetch { msn, items }) = self.take_response() {
                self.place_cached(hc, msn, &items, end, plan).await;
            }
            match state {
                CommandState::Continue => {}
                CommandState::Ok => return Ok(()),
                state => return Err(self.failure(state)),
            }
        }
    }

    async fn place_cached(&mut self, hc: &HeaderCache, msn: u32, items: &[FetchItem], end: u32, plan: &CachePlan) {
        let fetched = FetchedHeader::new(items, self.options.mark_old);
        let Some(mbox) = self.mailbox.as_mut() else {
            return;
        };
        if fetched.uid == 0 {
            trace!(msn, "skipping cache FETCH response without UID");
            return;
        }
        if msn < 1 || msn > end {
            debug!(msn, "skipping cache FETCH response for unknown message number");
            return;
        }
        if mbox.uid_at(msn).is_some() {
            trace!(msn, "skipping cache FETCH response for duplicate message");
            return;
        }

        let key = HeaderCache::uid_key(fetched.uid);
        let uidvalidity = mbox.status.uidvalidity;
        let Some(mut email) = cache_value("reading header", hc.fetch::<Email>(&key, uidvalidity).await).flatten() else {
            return;
        };
        email.uid = fetched.uid;
        email.msn = msn;
        email.changed = false;
        if !plan.eval_condstore
            && let Some(flags) = fetched.flags
        {
            email.flags = flags;
        }
        email.server_flags = email.flags.clone();
        if !plan.eval_condstore && (plan.has_condstore || plan.has_qresync) {
            cache_value("storing header", hc.store(&key, uidvalidity, &email).await);
        }
        mbox.insert(email);
    }

    /// Asks for flags changed since the cached MODSEQ and writes them back.
    async fn condstore_updates(&mut self, hc: &HeaderCache, plan: &CachePlan) -> Result<()> {
        let Some(modseq) = plan.modseq else {
            return Ok(());
        };
        if plan.uid_next <= 1 {
            return Ok(());
        }
        let vanished = if plan.has_qresync { " VANISHED" } else { "" };
        let cmd = format!("UID FETCH 1:{} (FLAGS) (CHANGEDSINCE {modseq}{vanished})", plan.uid_next - 1);
        self.start(Some(&cmd), ExecFlags::empty()).await?;

        // the untagged handler applies the flags
        loop {
            match self.step().await? {
                CommandState::Continue => {}
                CommandState::Ok => break,
                state => return Err(self.failure(state)),
            }
        }

        self.store_touched(hc).await;
        if let Some(mbox) = self.mailbox.as_mut() {
            mbox.check_status -= ReopenFlags::FLAGS_PENDING;
        }
        self.expunge_pending(hc).await;
        Ok(())
    }

    /// Cleans up after VANISHED responses received while loading.
    async fn expunge_pending(&mut self, hc: &HeaderCache) {
        if self
            .mailbox
            .as_ref()
            .is_some_and(|m| m.reopen.contains(ReopenFlags::EXPUNGE_PENDING))
        {
            self.expunge_mailbox_with(Some(hc)).await;
            if let Some(mbox) = self.mailbox.as_mut() {
                mbox.reopen -= ReopenFlags::EXPUNGE_PENDING;
            }
        }
    }

    /// Writes back every message whose flags the server reported.
    pub(crate) async fn store_touched(&mut self, hc: &HeaderCache) {
        let Some(mbox) = self.mailbox.as_mut() else {
            return;
        };
        let uidvalidity = mbox.status.uidvalidity;
        let touched = std::mem::take(&mut mbox.touched);
        for uid in touched {
            if let Some(email) = mbox.email(uid) {
                cache_value(
                    "storing header",
                    hc.store(&HeaderCache::uid_key(uid), uidvalidity, email).await,
                );
            }
        }
    }

    fn header_request(&mut self) -> Result<String> {
        let fields = self.options.headers.as_ref().map(|extra| format!("{WANT_HEADERS} {extra}"));
        if self.capabilities.contains(Capabilities::IMAP4REV1) {
            return Ok(match fields {
                Some(fields) => format!("BODY.PEEK[HEADER.FIELDS ({fields})]"),
                None => "BODY.PEEK[HEADER]".to_string(),
            });
        }
        if self.capabilities.contains(Capabilities::IMAP4) {
            return Ok("RFC822.HEADER".to_string());
        }
        self.handle_fatal();
        Err(Error::Protocol("unable to fetch headers from this IMAP server version".to_string()))
    }

    /// Fetches headers for the MSNs in `begin..=end` not yet in the index.
    ///
    /// New mail announced while fetching extends `end`.
    async fn fetch_new(
        &mut self,
        hc: Option<&HeaderCache>,
        mut begin: u32,
        mut end: u32,
        evalhc: bool,
        maxuid: &mut u32,
    ) -> Result<()> {
        let request = self.header_request()?;
        let modseq = if self.capabilities.contains(Capabilities::CONDSTORE) && self.options.condstore {
            " MODSEQ"
        } else {
            ""
        };
        let chunk = self.options.fetch_chunk_size;

        let mut fetched_end = 0;
        while fetched_end < end {
            let Some((set, last)) = self
                .mailbox
                .as_ref()
                .and_then(|m| m.fetch_msn_seqset(evalhc, begin, end, chunk))
            else {
                break;
            };
            fetched_end = last;

            let cmd = format!("FETCH {set} (UID FLAGS INTERNALDATE RFC822.SIZE{modseq} {request})");
            self.start(Some(&cmd), ExecFlags::empty()).await?;
            loop {
                let state = self.step().await?;
                if let Some(UntaggedResponse::Fetch { msn, items }) = self.take_response() {
                    self.place_new(hc, msn, &items, last, maxuid).await;
                }
                match state {
                    CommandState::Continue => {}
                    CommandState::Ok => break,
                    state => return Err(self.failure(state)),
                }
            }

            if let Some(mbox) = self.mailbox.as_mut()
                && mbox.reopen.contains(ReopenFlags::NEWMAIL_PENDING)
            {
                end = mbox.new_mail_count;
                if end > mbox.highest_msn() {
                    mbox.reserve_msn(end);
                }
                mbox.reopen -= ReopenFlags::NEWMAIL_PENDING;
                mbox.new_mail_count = 0;
            }
            begin = last + 1;
        }
        Ok(())
    }

    async fn place_new(&mut self, hc: Option<&HeaderCache>, msn: u32, items: &[FetchItem], last: u32, maxuid: &mut u32) {
        let fetched = FetchedHeader::new(items, self.options.mark_old);
        let Some(headers) = fetched.headers else {
            trace!(msn, "ignoring FETCH response with no body");
            return;
        };
        let Some(mbox) = self.mailbox.as_mut() else {
            return;
        };
        if msn < 1 || msn > last {
            debug!(msn, "skipping FETCH response for unknown message number");
            return;
        }
        if mbox.uid_at(msn).is_some() {
            trace!(msn, "skipping FETCH response for duplicate message");
            return;
        }
        if fetched.uid == 0 {
            debug!(msn, "skipping FETCH response without UID");
            return;
        }

        let flags = fetched.flags.unwrap_or_default();
        let email = Email {
            uid: fetched.uid,
            msn,
            server_flags: flags.clone(),
            flags,
            changed: false,
            active: true,
            purge: false,
            received: fetched.received,
            size: fetched.size,
            headers,
        };
        *maxuid = (*maxuid).max(email.uid);
        if let Some(hc) = hc {
            cache_value(
                "storing header",
                hc.store(&HeaderCache::uid_key(email.uid), mbox.status.uidvalidity, &email).await,
            );
        }
        mbox.insert(email);
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
    use std::time::Duration;

    use neomutt_hcache::{Backend, MemoryBackend};
    use tokio_test::io::Builder;

    use super::*;
    use crate::config::ImapOptions;
    use crate::engine::tests::account_with_options;
    use crate::engine::AccountState;
    use crate::mailbox::ImapMailbox;

    fn options() -> ImapOptions {
        ImapOptions::builder().poll_timeout(Duration::ZERO).build().unwrap()
    }

    fn selected(mock: tokio_test::io::Mock, options: ImapOptions, uidvalidity: u32) -> ImapAccount {
        let mut account = account_with_options(mock, options, AccountState::Selected);
        account.capabilities = Capabilities::IMAP4REV1;
        let mut mbox = ImapMailbox::new("INBOX", "\"INBOX\"");
        mbox.status.uidvalidity = uidvalidity;
        account.mailbox = Some(mbox);
        account
    }

    #[tokio::test]
    async fn test_fetch_all_headers() {
        let mock = Builder::new()
            .write(b"a0001 FETCH 1:2 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
            .read(b"* 1 FETCH (UID 10 FLAGS (\\Seen) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" RFC822.SIZE 44 BODY[HEADER] {8}\r\nSubj: a\n)\r\n")
            .read(b"* 2 FETCH (UID 11 FLAGS () RFC822.SIZE 50 BODY[HEADER] {8}\r\nSubj: b\n)\r\n")
            .read(b"a0001 OK FETCH completed\r\n")
            .build();
        let mut account = selected(mock, options(), 5);
        account.read_headers(1, 2, true).await.unwrap();

        let mbox = account.mailbox().unwrap();
        assert_eq!(mbox.uids(), vec![10, 11]);
        let first = mbox.email(10).unwrap();
        assert!(first.flags.read);
        assert_eq!(first.size, 44);
        assert_eq!(first.headers, b"Subj: a\n");
        assert!(first.received.is_some());
        assert_eq!(mbox.status.uid_next, 12);
        assert!(mbox.reopen.contains(ReopenFlags::ALLOW));
    }

    #[tokio::test]
    async fn test_chunked_fetch_with_extra_headers() {
        let options = ImapOptions::builder()
            .fetch_chunk_size(1)
            .headers("X-SPAM")
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap();
        let request = format!("BODY.PEEK[HEADER.FIELDS ({WANT_HEADERS} X-SPAM)]");
        let first = format!("a0001 FETCH 1:1 (UID FLAGS INTERNALDATE RFC822.SIZE {request})\r\n");
        let second = format!("a0002 FETCH 2:2 (UID FLAGS INTERNALDATE RFC822.SIZE {request})\r\n");
        let mock = Builder::new()
            .write(first.as_bytes())
            .read(b"* 1 FETCH (UID 3 FLAGS () BODY[HEADER.FIELDS (X-SPAM)] {3}\r\na\r\n)\r\n")
            .read(b"a0001 OK done\r\n")
            .write(second.as_bytes())
            .read(b"* 2 FETCH (UID 4 FLAGS () BODY[HEADER.FIELDS (X-SPAM)] {3}\r\nb\r\n)\r\n")
            .read(b"a0002 OK done\r\n")
            .build();
        let mut account = selected(mock, options, 5);
        account.read_headers(1, 2, true).await.unwrap();
        assert_eq!(account.mailbox().unwrap().uids(), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_header_fetch() {
        let backend = MemoryBackend::new();
        let hc = HeaderCache::new(backend.open("INBOX").await.unwrap());
        hc.store_u32(HeaderCache::UIDVALIDITY, 7).await.unwrap();
        hc.store_u32(HeaderCache::UIDNEXT, 3).await.unwrap();
        let mut cached = Email::new(1);
        cached.headers = b"Subject: cached\n".to_vec();
        hc.store("/1", 7, &cached).await.unwrap();

        let mock = Builder::new()
            .write(b"a0001 UID FETCH 1:2 (UID FLAGS)\r\n")
            .read(b"* 1 FETCH (UID 1 FLAGS (\\Flagged))\r\n")
            .read(b"* 2 FETCH (UID 2 FLAGS ())\r\n")
            .read(b"a0001 OK done\r\n")
            .write(b"a0002 FETCH 2 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
            .read(b"* 2 FETCH (UID 2 FLAGS () BODY[HEADER] {3}\r\nb\r\n)\r\n")
            .read(b"a0002 OK done\r\n")
            .build();
        let mut account = selected(mock, options(), 7);
        account.mailbox_mut().unwrap().hcache = Some(hc);
        account.read_headers(1, 2, true).await.unwrap();

        let mbox = account.mailbox().unwrap();
        assert_eq!(mbox.uids(), vec![1, 2]);
        let email = mbox.email(1).unwrap();
        assert_eq!(email.headers, b"Subject: cached\n");
        assert!(email.flags.flagged);
        let hc = mbox.hcache.as_ref().unwrap();
        assert!(hc.fetch::<Email>("/2", 7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_uidvalidity_change_discards_cache() {
        let backend = MemoryBackend::new();
        let hc = HeaderCache::new(backend.open("INBOX").await.unwrap());
        hc.store_u32(HeaderCache::UIDVALIDITY, 100).await.unwrap();
        hc.store_u32(HeaderCache::UIDNEXT, 2).await.unwrap();
        hc.store("/1", 100, &Email::new(1)).await.unwrap();

        let mock = Builder::new()
            .write(b"a0001 FETCH 1:1 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
            .read(b"* 1 FETCH (UID 1 FLAGS () BODY[HEADER] {3}\r\nx\r\n)\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let mut account = selected(mock, options(), 101);
        account.mailbox_mut().unwrap().hcache = Some(hc);
        account.read_headers(1, 1, true).await.unwrap();

        let hc = account.mailbox().unwrap().hcache.as_ref().unwrap();
        assert_eq!(hc.fetch_u32(HeaderCache::UIDVALIDITY).await.unwrap(), Some(101));
        let refetched: Email = hc.fetch("/1", 101).await.unwrap().unwrap();
        assert_eq!(refetched.headers, b"x\r\n");
        assert!(hc.fetch::<Email>("/1", 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_mail_during_fetch_extends_range() {
        let mock = Builder::new()
            .write(b"a0001 FETCH 1:1 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
            .read(b"* 1 FETCH (UID 1 FLAGS () BODY[HEADER] {1}\r\na)\r\n")
            .read(b"* 2 EXISTS\r\n")
            .read(b"a0001 OK done\r\n")
            .write(b"a0002 FETCH 2:2 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
            .read(b"* 2 FETCH (UID 2 FLAGS () BODY[HEADER] {1}\r\nb)\r\n")
            .read(b"a0002 OK done\r\n")
            .build();
        let mut account = selected(mock, options(), 1);
        account.read_headers(1, 1, false).await.unwrap();
        assert_eq!(account.mailbox().unwrap().uids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_no_fails_download() {
        let mock = Builder::new()
            .write(b"a0001 FETCH 1:1 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
            .read(b"a0001 NO try later\r\n")
            .build();
        let mut account = selected(mock, options(), 1);
        assert!(matches!(account.read_headers(1, 1, true).await, Err(Error::No(_))));
        assert!(!account.is_fatal());
        assert!(!account.mailbox().unwrap().reopen.contains(ReopenFlags::ALLOW));
    }
}
