// Capability boundaries for the harvester core.
//
// BrowserLauncher/BrowserSession stand in for page control, BlobStore for the
// content-addressed upload backend, RecordStore for local bookkeeping and
// RoundSource for the externally advancing epoch. The mocks in `testing.rs`
// implement all of them so the core runs without Chrome, IPFS or Postgres.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use harvest_common::{CidEntry, NamedFile, Proof, Record};

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

/// Launch parameters for a browser session.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub headless: bool,
    pub chrome_bin: Option<String>,
    /// Persistent profile directory; keeps cookies across launches.
    pub profile_dir: Option<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1280,
            viewport_height: 2000,
            headless: true,
            chrome_bin: None,
            profile_dir: None,
        }
    }
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a browser and open a page with the configured viewport.
    async fn launch(&self, config: &LaunchConfig) -> Result<Box<dyn BrowserSession>>;
}

/// A live page in a running browser.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Wait until `selector` matches. Returns `false` on timeout instead of failing.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Focus the element matching `selector` and type `text` into it.
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    async fn press_enter(&self) -> Result<()>;

    /// Evaluate a JS expression against the rendered page.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    async fn current_url(&self) -> Result<String>;

    /// Visible text of the whole page.
    async fn page_text(&self) -> Result<String>;

    /// Outer HTML of every rendered element matching `selector`, DOM order.
    async fn outer_html_all(&self, selector: &str) -> Result<Vec<String>>;

    /// Scroll down by one viewport height.
    async fn scroll_by_viewport(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Content-addressed upload backend. Uploads are never updated or deleted.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `files` as one unit and return a single CID for the set.
    async fn put(&self, files: Vec<NamedFile>) -> Result<String>;
}

/// Append-only local bookkeeping: observations, CID entries and proofs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a raw observation. Repeated observations are kept.
    async fn create_observation(&self, record: &Record) -> Result<()>;

    async fn cid_entry(&self, natural_key: &str) -> Result<Option<CidEntry>>;

    /// Create a CID entry. Returns `false` if one already existed for the key.
    async fn create_cid_entry(&self, entry: &CidEntry) -> Result<bool>;

    /// All CID entries tagged with `round`, ordered by natural key.
    async fn cid_entries_for_round(&self, round: u64) -> Result<Vec<CidEntry>>;

    /// Store the round's proof, replacing any previous one.
    async fn put_proof(&self, proof: &Proof) -> Result<()>;

    async fn proof(&self, round: u64) -> Result<Option<Proof>>;
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RoundSource: Send + Sync {
    async fn current_round(&self) -> Result<u64>;
}
