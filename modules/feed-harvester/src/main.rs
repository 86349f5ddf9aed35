use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use feed_harvester::{
    Archiver, ChromeLauncher, CrawlConfig, Crawler, Credentials, EpochRounds, Extractor,
    FeedHarvester, Harvester, IpfsBlobStore, LaunchConfig, LoginConfig, LoginFlow, LoginOutcome,
    ManifestBuilder, PageDetector, PatternMatch, PgRecordStore, RoundSource, SessionConfig,
    SessionManager, TextMatch,
};
use harvest_common::Config;
use ipfs_client::IpfsClient;

#[derive(Parser)]
#[command(name = "harvester", about = "Feed harvester with content-addressed archival")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the feed until interrupted
    Crawl,
    /// Log in with FEED_USERNAME / FEED_PASSWORD and keep the profile
    Login,
    /// Build and print the submission proof for a round
    Proof {
        /// Round number; defaults to the current round
        #[arg(long)]
        round: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("feed_harvester=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let records = Arc::new(PgRecordStore::connect(&config.database_url).await?);
    records.migrate().await?;
    info!("Migrations complete");

    let blobs = Arc::new(IpfsBlobStore::new(IpfsClient::new(
        &config.ipfs_api_url,
        config.ipfs_api_token.as_deref(),
    )?));
    let rounds = Arc::new(EpochRounds::new(config.round_genesis, config.round_length)?);

    match cli.command {
        Command::Proof { round } => {
            let round = match round {
                Some(round) => round,
                None => rounds.current_round().await?,
            };
            let manifests = ManifestBuilder::new(blobs, records);
            match manifests.build_proof(round).await? {
                Some(cid) => println!("{cid}"),
                None => info!(round, "No archived items for round"),
            }
        }
        Command::Login => {
            let crawler = build_crawler(&config, blobs, records, rounds)?;
            let credentials = Credentials {
                username: config.username.clone().context("FEED_USERNAME is required for login")?,
                password: config.password.clone().context("FEED_PASSWORD is required for login")?,
                username_confirmation: config.username_confirmation.clone(),
            };
            let flow = LoginFlow::new(
                LoginConfig::for_origin(&config.feed_origin),
                Box::new(TextMatch::new("email_verification", &config.email_verification_text)),
            );

            let outcome = crawler.login(&flow, &credentials).await?;
            crawler.shutdown().await;
            match outcome {
                LoginOutcome::Valid => info!("Login succeeded, profile saved"),
                LoginOutcome::Invalid(failure) => anyhow::bail!("Login failed: {failure:?}"),
            }
        }
        Command::Crawl => {
            let crawler = build_crawler(&config, blobs.clone(), records.clone(), rounds)?;
            let harvester = Arc::new(FeedHarvester::new(
                crawler,
                ManifestBuilder::new(blobs, records),
            ));

            tokio::spawn({
                let harvester = harvester.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received, stopping");
                        harvester.stop();
                    }
                }
            });

            harvester.crawl().await?;
        }
    }

    Ok(())
}

fn build_crawler(
    config: &Config,
    blobs: Arc<IpfsBlobStore>,
    records: Arc<PgRecordStore>,
    rounds: Arc<EpochRounds>,
) -> Result<Crawler> {
    let sessions = SessionManager::new(
        Arc::new(ChromeLauncher::new()),
        SessionConfig {
            cooldown: config.session_cooldown,
            launch: LaunchConfig {
                headless: config.headless,
                chrome_bin: config.chrome_bin.clone(),
                profile_dir: config.browser_profile_dir.clone(),
                ..LaunchConfig::default()
            },
        },
    );

    let mut crawl = CrawlConfig::new(&config.feed_url);
    crawl.pass_cooldown = config.pass_cooldown;
    crawl.scroll_settle = config.scroll_settle;
    crawl.max_scrolls_per_pass = config.max_scrolls_per_pass;

    let rate_limit: Box<dyn PageDetector> = match &config.rate_limit_pattern {
        Some(pattern) => Box::new(
            PatternMatch::new("rate_limit", pattern).context("RATE_LIMIT_PATTERN is not a valid regex")?,
        ),
        None => Box::new(TextMatch::new("rate_limit", &config.rate_limit_text)),
    };

    Ok(Crawler::new(
        sessions,
        Extractor::new(&config.feed_origin)?,
        Archiver::new(blobs, records),
        rounds,
        rate_limit,
        crawl,
    ))
}
