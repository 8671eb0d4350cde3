use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tidepool_common::{Config, Cursor, FrontierItem, Provider};
use tidepool_discovery::audit::AuditRecorder;
use tidepool_discovery::control::ControlQueue;
use tidepool_discovery::feeds::FeedFetcher;
use tidepool_discovery::fetcher::{FetchOptions, RobustFetcher};
use tidepool_discovery::gate::{CollectionCriteria, RelevanceGate};
use tidepool_discovery::oracle::HeuristicOracle;
use tidepool_discovery::orchestrator::{Orchestrator, OrchestratorDeps};
use tidepool_discovery::progress::ProgressBus;
use tidepool_discovery::stores::{MemoryCitationSink, MemoryCooldowns, MemorySeenIndex};

/// Run discovery for one collection against planner-supplied seeds and
/// queries.
#[derive(Parser)]
#[command(name = "tidepool-discovery")]
struct Cli {
    /// Collection identifier discovery runs against.
    #[arg(long)]
    collection: String,

    /// Topic terms defining relevance (repeatable).
    #[arg(long = "topic", required = true)]
    topics: Vec<String>,

    /// Seed URLs to fetch directly (repeatable).
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Keyword queries to expand (repeatable).
    #[arg(long = "query")]
    queries: Vec<String>,

    /// RSS/Atom feed URLs to poll (repeatable).
    #[arg(long = "feed")]
    feeds: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tidepool=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    info!(collection = cli.collection.as_str(), "Tidepool discovery starting");

    let fetch_opts = FetchOptions::builder()
        .read_timeout(Duration::from_secs(config.fetch_timeout_secs))
        .build();
    let feed_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.fetch_timeout_secs))
        .build()
        .expect("Failed to build feed HTTP client");

    let deps = OrchestratorDeps {
        fetcher: Arc::new(RobustFetcher::new(fetch_opts)),
        feeds: Arc::new(FeedFetcher::new(feed_client)),
        oracle: Arc::new(HeuristicOracle),
        seen: Arc::new(MemorySeenIndex::new()),
        cooldowns: Arc::new(MemoryCooldowns::new()),
        sink: Arc::new(MemoryCitationSink::new()),
        recorder: Arc::new(AuditRecorder::new()),
        bus: Arc::new(ProgressBus::new()),
        controls: Arc::new(ControlQueue::new()),
    };

    let topics: Vec<&str> = cli.topics.iter().map(String::as_str).collect();
    let gate = RelevanceGate::new(CollectionCriteria::new(&cli.collection, &topics));
    let orchestrator = Orchestrator::new(config, gate, deps);

    let seeds: Vec<&str> = cli.seeds.iter().map(String::as_str).collect();
    orchestrator.seed(&seeds);

    for query in &cli.queries {
        orchestrator.enqueue(FrontierItem::new(
            Provider::WebSearch,
            Cursor::Keywords {
                keywords: vec![query.clone()],
                site_filters: Vec::new(),
            },
            5,
            "recent_coverage",
        ));
    }
    for feed in &cli.feeds {
        orchestrator.enqueue(FrontierItem::new(
            Provider::Feed,
            Cursor::raw_url(feed.clone()),
            4,
            "recent_coverage",
        ));
    }

    let stats = orchestrator.run().await?;
    info!("{stats}");

    Ok(())
}
