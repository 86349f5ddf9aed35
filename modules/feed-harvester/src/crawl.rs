// Crawl loop.
//
// AwaitingSession -> Harvesting -> (RateLimited -> AwaitingSession)
//
// One harvest pass: navigate to the feed, then repeatedly scan for the
// rate-limit banner, harvest every rendered item, scroll one viewport and
// settle. The round is re-read on every iteration, so a pass that straddles a
// round boundary tags items with whichever round was current when they were
// harvested.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use harvest_common::Record;

use crate::archiver::Archiver;
use crate::detect::PageDetector;
use crate::extractor::{Extraction, Extractor};
use crate::login::{Credentials, LoginFlow, LoginOutcome};
use crate::session::SessionManager;
use crate::traits::RoundSource;

/// Selector for one rendered feed item.
pub const ITEM_SELECTOR: &str = r#"article[data-testid="tweet"]"#;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub feed_url: String,
    pub item_selector: String,
    /// Upper bound on waiting for the first items after navigation.
    pub initial_wait: Duration,
    pub scroll_settle: Duration,
    pub pass_cooldown: Duration,
    /// Poll interval while no session can be negotiated.
    pub session_retry: Duration,
    pub max_scrolls_per_pass: u32,
    /// Consecutive page or round failures tolerated before a pass gives up.
    pub max_iteration_failures: u32,
    pub archive_attempts: u32,
    pub archive_retry_base: Duration,
}

impl CrawlConfig {
    pub fn new(feed_url: &str) -> Self {
        Self {
            feed_url: feed_url.to_string(),
            item_selector: ITEM_SELECTOR.to_string(),
            initial_wait: Duration::from_secs(15),
            scroll_settle: Duration::from_secs(2),
            pass_cooldown: Duration::from_secs(300),
            session_retry: Duration::from_secs(10),
            max_scrolls_per_pass: 50,
            max_iteration_failures: 3,
            archive_attempts: 3,
            archive_retry_base: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Scroll budget used up.
    Completed,
    /// Banner seen; session torn down.
    RateLimited,
    /// Navigation or repeated iteration failures; session kept.
    Interrupted,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    pub items_seen: u32,
    pub skipped: u32,
    pub archived: u32,
    pub duplicates: u32,
    pub failed: u32,
    pub page_errors: u32,
    pub scrolls: u32,
}

impl std::fmt::Display for PassStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seen={} skipped={} archived={} duplicates={} failed={} page_errors={} scrolls={}",
            self.items_seen,
            self.skipped,
            self.archived,
            self.duplicates,
            self.failed,
            self.page_errors,
            self.scrolls
        )
    }
}

/// Cooperative stop flag. `stop()` also wakes any pending `sleep`.
#[derive(Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless stopped first. Returns whether stopped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_stopped() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_stopped(),
            _ = notified => true,
        }
    }
}

pub struct Crawler {
    sessions: Mutex<SessionManager>,
    extractor: Extractor,
    archiver: Archiver,
    rounds: Arc<dyn RoundSource>,
    rate_limit: Box<dyn PageDetector>,
    config: CrawlConfig,
    stop: Arc<StopSignal>,
}

impl Crawler {
    pub fn new(
        sessions: SessionManager,
        extractor: Extractor,
        archiver: Archiver,
        rounds: Arc<dyn RoundSource>,
        rate_limit: Box<dyn PageDetector>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            extractor,
            archiver,
            rounds,
            rate_limit,
            config,
            stop: Arc::new(StopSignal::new()),
        }
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    pub async fn ensure_session(&self) -> Result<bool> {
        self.sessions.lock().await.ensure_session().await
    }

    pub async fn login(&self, flow: &LoginFlow, credentials: &Credentials) -> Result<LoginOutcome> {
        let mut sessions = self.sessions.lock().await;
        flow.run(&mut sessions, credentials).await
    }

    /// Run until stopped. Every modeled failure is logged and recovered from.
    pub async fn run(&self) -> Result<()> {
        info!(feed_url = %self.config.feed_url, "crawl: starting");

        loop {
            if self.stop.is_stopped() {
                break;
            }

            let ready = match self.ensure_session().await {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(error = %e, "crawl: session negotiation failed");
                    false
                }
            };
            if !ready {
                if self.stop.sleep(self.config.session_retry).await {
                    break;
                }
                continue;
            }

            match self.harvest_pass().await {
                Ok((outcome, stats)) => info!(?outcome, %stats, "crawl: pass finished"),
                Err(e) => {
                    warn!(error = %e, "crawl: pass failed, dropping session");
                    self.sessions.lock().await.invalidate().await;
                }
            }

            if self.stop.sleep(self.config.pass_cooldown).await {
                break;
            }
        }

        self.shutdown().await;
        info!("crawl: stopped");
        Ok(())
    }

    /// Release the browser, if any.
    pub async fn shutdown(&self) {
        self.sessions.lock().await.invalidate().await;
    }

    /// One harvest pass over the feed with the current session.
    ///
    /// Only a missing session is an error. Navigation, collection, scroll
    /// and round lookup failures are logged and end or skip work within the
    /// pass; the session is torn down only on the rate-limit banner.
    pub async fn harvest_pass(&self) -> Result<(PassOutcome, PassStats)> {
        let mut sessions = self.sessions.lock().await;
        let Some(page) = sessions.session() else {
            bail!("No live session for harvest pass");
        };

        let mut stats = PassStats::default();

        if let Err(e) = page.navigate(&self.config.feed_url).await {
            warn!(feed_url = %self.config.feed_url, error = %e, "crawl: navigation failed");
            stats.page_errors += 1;
            return Ok((PassOutcome::Interrupted, stats));
        }
        match page
            .wait_for(&self.config.item_selector, self.config.initial_wait)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(feed_url = %self.config.feed_url, "crawl: no items rendered after navigation")
            }
            Err(e) => debug!(error = %e, "crawl: initial wait failed"),
        }

        let mut observed = HashSet::new();
        let mut consecutive_failures = 0;

        let outcome = loop {
            if self.stop.is_stopped() {
                break PassOutcome::Stopped;
            }

            let rate_limited = match page.page_text().await {
                Ok(text) => self.rate_limit.matches(&text),
                Err(e) => {
                    debug!(error = %e, "crawl: page text unavailable");
                    false
                }
            };

            let collected = match page.outer_html_all(&self.config.item_selector).await {
                Ok(items) => match self.rounds.current_round().await {
                    Ok(round) => Ok((items, round)),
                    Err(e) => Err(e.context("round lookup failed")),
                },
                Err(e) => Err(e.context("item collection failed")),
            };

            match collected {
                Ok((items, round)) => {
                    consecutive_failures = 0;
                    for raw in &items {
                        self.harvest_item(raw, round, &mut observed, &mut stats).await;
                    }
                    match page.scroll_by_viewport().await {
                        Ok(()) => stats.scrolls += 1,
                        Err(e) => {
                            warn!(error = %e, "crawl: scroll failed");
                            stats.page_errors += 1;
                            consecutive_failures += 1;
                        }
                    }
                }
                Err(e) => {
                    // Nothing was harvested here; the next iteration sees the same items.
                    warn!(error = %e, "crawl: iteration skipped");
                    stats.page_errors += 1;
                    consecutive_failures += 1;
                }
            }

            tokio::time::sleep(self.config.scroll_settle).await;

            if rate_limited {
                break PassOutcome::RateLimited;
            }
            if consecutive_failures >= self.config.max_iteration_failures.max(1) {
                break PassOutcome::Interrupted;
            }
            if stats.scrolls >= self.config.max_scrolls_per_pass {
                break PassOutcome::Completed;
            }
        };

        if outcome == PassOutcome::RateLimited {
            warn!(detector = self.rate_limit.name(), %stats, "crawl: rate limited, tearing down session");
            sessions.invalidate().await;
        }

        Ok((outcome, stats))
    }

    async fn harvest_item(
        &self,
        raw: &str,
        round: u64,
        observed: &mut HashSet<String>,
        stats: &mut PassStats,
    ) {
        stats.items_seen += 1;

        let record = match self.extractor.extract(raw) {
            Extraction::Record(record) if !record.natural_key.is_empty() => record,
            Extraction::Record(_) => {
                stats.skipped += 1;
                return;
            }
            Extraction::Skip(reason) => {
                debug!(%reason, "crawl: skipped item");
                stats.skipped += 1;
                return;
            }
        };

        if observed.insert(record.natural_key.clone()) {
            if let Err(e) = self.archiver.observe(&record).await {
                warn!(natural_key = %record.natural_key, error = %e, "crawl: failed to log observation");
            }
        }

        match self.archive_with_retry(&record, raw, round).await {
            Ok(Some(_)) => stats.archived += 1,
            Ok(None) => stats.duplicates += 1,
            Err(e) => {
                warn!(natural_key = %record.natural_key, round, error = %e, "crawl: archive failed, moving on");
                stats.failed += 1;
            }
        }
    }

    async fn archive_with_retry(&self, record: &Record, raw: &str, round: u64) -> Result<Option<String>> {
        let attempts = self.config.archive_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.archiver.archive(record, raw, round).await {
                Ok(cid) => return Ok(cid),
                Err(e) if attempt + 1 < attempts => {
                    let backoff = self.config.archive_retry_base * 2u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                    warn!(
                        natural_key = %record.natural_key,
                        attempt = attempt + 1,
                        error = %e,
                        "crawl: archive failed, retrying"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::TextMatch;
    use crate::session::SessionConfig;
    use crate::testing::{
        promoted_html, tweet_html, FixedRound, MemoryBlobStore, MemoryRecordStore, MockBrowser,
        MockLauncher,
    };
    use crate::traits::{BlobStore, RecordStore};

    const BANNER: &str = "Something went wrong. Try reloading.";

    struct Fixture {
        crawler: Crawler,
        browser: MockBrowser,
        blobs: Arc<MemoryBlobStore>,
        records: Arc<MemoryRecordStore>,
        rounds: Arc<FixedRound>,
    }

    fn fixture(browser: MockBrowser, blobs: MemoryBlobStore, max_scrolls: u32) -> Fixture {
        let blobs = Arc::new(blobs);
        let records = Arc::new(MemoryRecordStore::new());
        let rounds = Arc::new(FixedRound::new(1));
        let mut config = CrawlConfig::new("https://x.com/home");
        config.max_scrolls_per_pass = max_scrolls;

        let crawler = Crawler::new(
            SessionManager::new(
                Arc::new(MockLauncher::new(browser.clone())),
                SessionConfig::default(),
            ),
            Extractor::new("https://x.com").unwrap(),
            Archiver::new(
                blobs.clone() as Arc<dyn BlobStore>,
                records.clone() as Arc<dyn RecordStore>,
            ),
            rounds.clone(),
            Box::new(TextMatch::new("rate_limit", BANNER)),
            config,
        );

        Fixture {
            crawler,
            browser,
            blobs,
            records,
            rounds,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pass_harvests_items_and_skips_ads() {
        let browser = MockBrowser::new()
            .with_frame(vec![tweet_html("1", "@a", "one"), promoted_html()], "")
            .with_frame(vec![tweet_html("2", "@b", "two")], "");
        let f = fixture(browser, MemoryBlobStore::new(), 2);
        assert!(f.crawler.ensure_session().await.unwrap());

        let (outcome, stats) = f.crawler.harvest_pass().await.unwrap();

        assert_eq!(outcome, PassOutcome::Completed);
        assert_eq!(stats.items_seen, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.archived, 2);
        assert_eq!(f.blobs.upload_count(), 2);
        assert_eq!(f.browser.navigations(), vec!["https://x.com/home"]);
        assert_eq!(f.browser.scroll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_twice_in_one_pass_archives_once() {
        let browser = MockBrowser::new()
            .with_frame(vec![tweet_html("123", "@a", "hi")], "")
            .with_frame(vec![tweet_html("123", "@a", "hi")], "");
        let f = fixture(browser, MemoryBlobStore::new(), 2);
        f.crawler.ensure_session().await.unwrap();

        let (_, stats) = f.crawler.harvest_pass().await.unwrap();

        assert_eq!(stats.archived, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(f.records.entry_count(), 1);
        assert_eq!(f.records.observation_count(), 1);
        assert_eq!(f.blobs.upload_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_banner_tears_down_session() {
        let browser = MockBrowser::new()
            .with_frame(vec![tweet_html("1", "@a", "one")], "")
            .with_frame(vec![tweet_html("2", "@b", "two")], BANNER)
            .with_frame(vec![tweet_html("3", "@c", "three")], "");
        let f = fixture(browser, MemoryBlobStore::new(), 10);
        f.crawler.ensure_session().await.unwrap();

        let (outcome, stats) = f.crawler.harvest_pass().await.unwrap();

        assert_eq!(outcome, PassOutcome::RateLimited);
        // Items visible alongside the banner are still harvested.
        assert_eq!(stats.archived, 2);
        assert_eq!(f.browser.close_count(), 1);
        assert!(f.records.cid_entry("3").await.unwrap().is_none());
        assert!(f.crawler.harvest_pass().await.is_err(), "no session after teardown");
    }

    /// Advances one round per read.
    struct SteppingRounds(std::sync::atomic::AtomicU64);

    #[async_trait::async_trait]
    impl RoundSource for SteppingRounds {
        async fn current_round(&self) -> Result<u64> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn round_is_read_per_iteration() {
        let browser = MockBrowser::new()
            .with_frame(vec![tweet_html("1", "@a", "one")], "")
            .with_frame(vec![tweet_html("2", "@b", "two")], "");
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let mut config = CrawlConfig::new("https://x.com/home");
        config.max_scrolls_per_pass = 2;
        let crawler = Crawler::new(
            SessionManager::new(Arc::new(MockLauncher::new(browser)), SessionConfig::default()),
            Extractor::new("https://x.com").unwrap(),
            Archiver::new(blobs, records.clone()),
            Arc::new(SteppingRounds(std::sync::atomic::AtomicU64::new(7))),
            Box::new(TextMatch::new("rate_limit", BANNER)),
            config,
        );
        crawler.ensure_session().await.unwrap();

        crawler.harvest_pass().await.unwrap();

        assert_eq!(records.cid_entry("1").await.unwrap().unwrap().round, 7);
        assert_eq!(records.cid_entry("2").await.unwrap().unwrap().round, 8);
    }

    /// Fails the first `failures` reads, then reports a fixed round.
    struct FlakyRounds {
        failures: std::sync::atomic::AtomicU32,
        round: u64,
    }

    impl FlakyRounds {
        fn new(failures: u32, round: u64) -> Self {
            Self {
                failures: std::sync::atomic::AtomicU32::new(failures),
                round,
            }
        }
    }

    #[async_trait::async_trait]
    impl RoundSource for FlakyRounds {
        async fn current_round(&self) -> Result<u64> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                bail!("round source unavailable");
            }
            Ok(self.round)
        }
    }

    fn crawler_with_rounds(
        browser: MockBrowser,
        rounds: FlakyRounds,
        max_scrolls: u32,
    ) -> (Crawler, Arc<MemoryRecordStore>) {
        let records = Arc::new(MemoryRecordStore::new());
        let mut config = CrawlConfig::new("https://x.com/home");
        config.max_scrolls_per_pass = max_scrolls;
        let crawler = Crawler::new(
            SessionManager::new(Arc::new(MockLauncher::new(browser)), SessionConfig::default()),
            Extractor::new("https://x.com").unwrap(),
            Archiver::new(Arc::new(MemoryBlobStore::new()), records.clone()),
            Arc::new(rounds),
            Box::new(TextMatch::new("rate_limit", BANNER)),
            config,
        );
        (crawler, records)
    }

    #[tokio::test(start_paused = true)]
    async fn round_lookup_hiccup_keeps_session_and_items() {
        let browser = MockBrowser::new()
            .with_frame(vec![tweet_html("1", "@a", "one")], "")
            .with_frame(vec![tweet_html("2", "@b", "two")], "");
        let (crawler, records) = crawler_with_rounds(browser.clone(), FlakyRounds::new(1, 3), 2);
        crawler.ensure_session().await.unwrap();

        let (outcome, stats) = crawler.harvest_pass().await.unwrap();

        assert_eq!(outcome, PassOutcome::Completed);
        assert_eq!(stats.page_errors, 1);
        assert_eq!(stats.archived, 2);
        assert_eq!(records.cid_entry("1").await.unwrap().unwrap().round, 3);
        assert_eq!(browser.close_count(), 0);
        assert!(crawler.harvest_pass().await.is_ok(), "session still live");
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_round_failure_interrupts_pass_without_teardown() {
        let browser = MockBrowser::new().with_frame(vec![tweet_html("1", "@a", "one")], "");
        let (crawler, records) =
            crawler_with_rounds(browser.clone(), FlakyRounds::new(u32::MAX, 0), 5);
        crawler.ensure_session().await.unwrap();

        let (outcome, stats) = crawler.harvest_pass().await.unwrap();

        assert_eq!(outcome, PassOutcome::Interrupted);
        assert_eq!(stats.page_errors, 3);
        assert_eq!(stats.scrolls, 0);
        assert_eq!(records.entry_count(), 0);
        assert_eq!(browser.close_count(), 0);
        assert!(crawler.sessions.lock().await.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn later_pass_sees_new_round_but_keeps_first_entry() {
        let browser = MockBrowser::new().with_frame(vec![tweet_html("1", "@a", "one")], "");
        let f = fixture(browser, MemoryBlobStore::new(), 1);
        f.crawler.ensure_session().await.unwrap();

        f.crawler.harvest_pass().await.unwrap();
        f.rounds.set(2);
        let (_, stats) = f.crawler.harvest_pass().await.unwrap();

        assert_eq!(stats.duplicates, 1);
        assert_eq!(f.records.cid_entry("1").await.unwrap().unwrap().round, 1);
        assert_eq!(f.blobs.upload_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_failures_are_retried() {
        let browser = MockBrowser::new().with_frame(vec![tweet_html("1", "@a", "one")], "");
        let f = fixture(browser, MemoryBlobStore::failing_first(2), 1);
        f.crawler.ensure_session().await.unwrap();

        let (_, stats) = f.crawler.harvest_pass().await.unwrap();

        assert_eq!(stats.archived, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_do_not_abort_the_pass() {
        let browser = MockBrowser::new().with_frame(
            vec![tweet_html("1", "@a", "one"), tweet_html("2", "@b", "two")],
            "",
        );
        let f = fixture(browser, MemoryBlobStore::failing_first(3), 1);
        f.crawler.ensure_session().await.unwrap();

        let (outcome, stats) = f.crawler.harvest_pass().await.unwrap();

        assert_eq!(outcome, PassOutcome::Completed);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.archived, 1);
        assert!(f.records.cid_entry("2").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_run_during_cooldown() {
        let browser = MockBrowser::new().with_frame(vec![tweet_html("1", "@a", "one")], "");
        let f = fixture(browser, MemoryBlobStore::new(), 1);
        let crawler = Arc::new(f.crawler);
        let stop = crawler.stop_signal();

        let handle = tokio::spawn({
            let crawler = crawler.clone();
            async move { crawler.run().await }
        });
        tokio::time::sleep(Duration::from_secs(30)).await;
        stop.stop();

        handle.await.unwrap().unwrap();
        assert_eq!(f.records.entry_count(), 1);
        assert_eq!(f.browser.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_short_circuits_sleep() {
        let stop = StopSignal::new();
        stop.stop();
        assert!(stop.sleep(Duration::from_secs(3600)).await);
    }
}
