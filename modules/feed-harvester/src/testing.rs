// Test doubles for the harvester capability traits.
//
// - MockBrowser / MockLauncher (BrowserSession / BrowserLauncher): scripted feed
//   frames, one per scroll position, plus a login redirect switch
// - MemoryBlobStore (BlobStore): hash-derived CIDs, optional injected failures
// - MemoryRecordStore (RecordStore): in-memory collections
// - FixedRound (RoundSource): settable round number

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use harvest_common::{CidEntry, NamedFile, Proof, Record};

use crate::traits::{
    BlobStore, BrowserLauncher, BrowserSession, LaunchConfig, RecordStore, RoundSource,
};

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

/// What the page shows at one scroll position.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub items: Vec<String>,
    pub text: String,
}

#[derive(Default)]
struct BrowserState {
    frames: Vec<Frame>,
    frame: usize,
    url: String,
    page_text: String,
    missing: HashSet<String>,
    submit_redirect: Option<String>,
    navigations: Vec<String>,
    typed: Vec<(String, String)>,
    enters: usize,
    scrolls: usize,
    closes: usize,
}

/// Scripted browser page. Clones share state so tests can inspect a session
/// after handing it to the code under test.
#[derive(Clone, Default)]
pub struct MockBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame; the page advances one frame per scroll.
    pub fn with_frame(self, items: Vec<String>, text: &str) -> Self {
        self.state.lock().unwrap().frames.push(Frame {
            items,
            text: text.to_string(),
        });
        self
    }

    /// Page text used when no frames are scripted (login pages).
    pub fn with_page_text(self, text: &str) -> Self {
        self.state.lock().unwrap().page_text = text.to_string();
        self
    }

    /// Make `wait_for(selector)` time out.
    pub fn missing(self, selector: &str) -> Self {
        self.state.lock().unwrap().missing.insert(selector.to_string());
        self
    }

    /// Pressing Enter after a password was typed moves the page to `url`.
    pub fn on_submit_redirect(self, url: &str) -> Self {
        self.state.lock().unwrap().submit_redirect = Some(url.to_string());
        self
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().typed.clone()
    }

    pub fn scroll_count(&self) -> usize {
        self.state.lock().unwrap().scrolls
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    fn current_frame(state: &BrowserState) -> Option<&Frame> {
        if state.frames.is_empty() {
            return None;
        }
        state.frames.get(state.frame.min(state.frames.len() - 1))
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        state.url = url.to_string();
        state.frame = 0;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(!self.state.lock().unwrap().missing.contains(selector))
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .typed
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn press_enter(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enters += 1;
        let password_typed = state
            .typed
            .last()
            .is_some_and(|(sel, _)| sel.contains("password"));
        if password_typed {
            if let Some(url) = state.submit_redirect.clone() {
                state.url = url;
            }
        }
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn page_text(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        Ok(match Self::current_frame(&state) {
            Some(frame) => frame.text.clone(),
            None => state.page_text.clone(),
        })
    }

    async fn outer_html_all(&self, _selector: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(Self::current_frame(&state)
            .map(|f| f.items.clone())
            .unwrap_or_default())
    }

    async fn scroll_by_viewport(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.scrolls += 1;
        state.frame += 1;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Hands out clones of one MockBrowser, or fails every launch.
pub struct MockLauncher {
    browser: Option<MockBrowser>,
    launches: AtomicUsize,
}

impl MockLauncher {
    pub fn new(browser: MockBrowser) -> Self {
        Self {
            browser: Some(browser),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            browser: None,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, _config: &LaunchConfig) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match &self.browser {
            Some(browser) => Ok(Box::new(browser.clone())),
            None => bail!("MockLauncher: launch refused"),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobStore {
    uploads: Mutex<Vec<Vec<NamedFile>>>,
    failures_left: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` uploads.
    pub fn failing_first(n: usize) -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(n),
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn uploads(&self) -> Vec<Vec<NamedFile>> {
        self.uploads.lock().unwrap().clone()
    }

    /// Deterministic CID for a file set.
    pub fn cid_for(files: &[NamedFile]) -> String {
        let mut hasher = Sha256::new();
        for f in files {
            hasher.update(f.name.as_bytes());
            hasher.update(&f.bytes);
        }
        format!("bafy{}", &hex::encode(hasher.finalize())[..32])
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, files: Vec<NamedFile>) -> Result<String> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            bail!("MemoryBlobStore: injected upload failure");
        }
        let cid = Self::cid_for(&files);
        self.uploads.lock().unwrap().push(files);
        Ok(cid)
    }
}

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRecordStore {
    observations: Mutex<Vec<Record>>,
    entries: Mutex<BTreeMap<String, CidEntry>>,
    proofs: Mutex<BTreeMap<u64, Proof>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observation_count(&self) -> usize {
        self.observations.lock().unwrap().len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_observation(&self, record: &Record) -> Result<()> {
        self.observations.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn cid_entry(&self, natural_key: &str) -> Result<Option<CidEntry>> {
        Ok(self.entries.lock().unwrap().get(natural_key).cloned())
    }

    async fn create_cid_entry(&self, entry: &CidEntry) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&entry.natural_key) {
            return Ok(false);
        }
        entries.insert(entry.natural_key.clone(), entry.clone());
        Ok(true)
    }

    async fn cid_entries_for_round(&self, round: u64) -> Result<Vec<CidEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.round == round)
            .cloned()
            .collect())
    }

    async fn put_proof(&self, proof: &Proof) -> Result<()> {
        self.proofs
            .lock()
            .unwrap()
            .insert(proof.round, proof.clone());
        Ok(())
    }

    async fn proof(&self, round: u64) -> Result<Option<Proof>> {
        Ok(self.proofs.lock().unwrap().get(&round).cloned())
    }
}

// ---------------------------------------------------------------------------
// FixedRound
// ---------------------------------------------------------------------------

pub struct FixedRound(AtomicU64);

impl FixedRound {
    pub fn new(round: u64) -> Self {
        Self(AtomicU64::new(round))
    }

    pub fn set(&self, round: u64) {
        self.0.store(round, Ordering::SeqCst);
    }
}

#[async_trait]
impl RoundSource for FixedRound {
    async fn current_round(&self) -> Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Fixture markup
// ---------------------------------------------------------------------------

/// Feed item markup in the shape the extractor expects.
pub fn tweet_html(id: &str, handle: &str, text: &str) -> String {
    format!(
        r#"<article data-testid="tweet">
  <div data-testid="User-Name">
    <a href="/{user}" role="link"><span>{user}</span></a>
    <a href="/{user}" role="link"><span>{handle}</span></a>
    <a href="/{user}/status/{id}"><time datetime="2023-05-01T12:00:00.000Z">May 1</time></a>
  </div>
  <img draggable="true" src="https://pbs.twimg.com/profile_images/{id}/a.jpg">
  <div data-testid="tweetText"><span>{text}</span></div>
  <div role="group">
    <span data-testid="app-text-transition-container"><span>3</span></span>
    <span data-testid="app-text-transition-container"><span>10</span></span>
    <span data-testid="app-text-transition-container"><span>1</span></span>
    <span data-testid="app-text-transition-container"><span>50</span></span>
  </div>
</article>"#,
        user = handle.trim_start_matches('@'),
    )
}

/// A promoted item: no status link.
pub fn promoted_html() -> String {
    r#"<article data-testid="tweet">
  <div data-testid="User-Name">
    <a href="/brand"><span>Brand</span></a>
    <a href="/brand"><span>@brand</span></a>
  </div>
  <div data-testid="tweetText"><span>Buy now</span></div>
  <span>Ad</span>
</article>"#
        .to_string()
}
