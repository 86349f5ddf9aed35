pub mod archiver;
pub mod blobs;
pub mod browser;
pub mod crawl;
pub mod detect;
pub mod error;
pub mod extractor;
pub mod harvester;
pub mod links;
pub mod login;
pub mod manifest;
pub mod rounds;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use archiver::Archiver;
pub use blobs::IpfsBlobStore;
pub use browser::ChromeLauncher;
pub use crawl::{CrawlConfig, Crawler, PassOutcome, PassStats, StopSignal};
pub use detect::{PageDetector, PatternMatch, TextMatch};
pub use error::{HarvestError, Result};
pub use extractor::{Extraction, Extractor, SkipReason};
pub use harvester::{FeedHarvester, Harvester};
pub use login::{Credentials, LoginConfig, LoginFlow, LoginOutcome};
pub use manifest::ManifestBuilder;
pub use rounds::EpochRounds;
pub use session::{SessionConfig, SessionManager};
pub use store::PgRecordStore;
pub use traits::{BlobStore, BrowserLauncher, BrowserSession, LaunchConfig, RecordStore, RoundSource};
