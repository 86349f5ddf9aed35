use anyhow::Result;
use async_trait::async_trait;

use crate::crawl::Crawler;
use crate::manifest::ManifestBuilder;

/// What a feed crawler exposes to whoever schedules it.
#[async_trait]
pub trait Harvester: Send + Sync {
    /// Ensure a usable session; `false` means "not yet, retry later".
    async fn check_session(&self) -> Result<bool>;

    /// Run the crawl loop until `stop` is called.
    async fn crawl(&self) -> Result<()>;

    /// Build the round's submission proof. `None` for an empty round.
    async fn submission_cid(&self, round: u64) -> Result<Option<String>>;

    fn stop(&self);
}

pub struct FeedHarvester {
    crawler: Crawler,
    manifests: ManifestBuilder,
}

impl FeedHarvester {
    pub fn new(crawler: Crawler, manifests: ManifestBuilder) -> Self {
        Self { crawler, manifests }
    }

    pub fn crawler(&self) -> &Crawler {
        &self.crawler
    }
}

#[async_trait]
impl Harvester for FeedHarvester {
    async fn check_session(&self) -> Result<bool> {
        self.crawler.ensure_session().await
    }

    async fn crawl(&self) -> Result<()> {
        self.crawler.run().await
    }

    async fn submission_cid(&self, round: u64) -> Result<Option<String>> {
        self.manifests.build_proof(round).await
    }

    fn stop(&self) {
        self.crawler.stop_signal().stop();
    }
}
