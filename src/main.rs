use anyhow::Context;
use clap::Parser;
use rss_broadcaster::{
    hand_off_queue, logging, Distributor, HttpFetcher, LogNotifier, PublishPool, RelayConfig, Scheduler,
    SqliteStore, StaticSubscriptions, TelegraphAccounts, TemplateRenderer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "rss-broadcaster", about = "Polls feeds and broadcasts new items to subscribers")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Seen-item database, overrides config and environment
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = RelayConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    logging::init(&config.log).context("setting up logging")?;

    info!("Starting RSS broadcaster with {} sources", config.sources.len());

    let store = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .with_context(|| format!("opening store {}", config.database_url))?,
    );
    let fetcher = Arc::new(HttpFetcher::new(config.fetch.clone())?);
    let renderer = Arc::new(TemplateRenderer::new(&config.template)?);

    let subscriptions = Arc::new(StaticSubscriptions::new());
    let sources: Vec<_> = config.sources.iter().map(|s| s.to_source()).collect();
    for (source, settings) in sources.iter().zip(&config.sources) {
        for recipient in &settings.subscribers {
            subscriptions.subscribe(source.id, recipient.clone()).await;
        }
    }

    let mut distributor = Distributor::new(
        subscriptions,
        renderer,
        Arc::new(LogNotifier::default()),
        store.clone(),
    )
    .with_workers(config.distributor_workers);

    if config.publish.enabled {
        let accounts = TelegraphAccounts::new(Duration::from_secs(config.publish.api_timeout_seconds))?
            .with_base_url(config.publish.api_url.clone());
        let pool = PublishPool::bootstrap(&accounts, &config.publish.pool_config())
            .await
            .context("bootstrapping publishing accounts")?;
        if config.publish.access_tokens.is_empty() {
            info!("Created publishing accounts, add these to publish.access_tokens to reuse them:");
            for token in pool.access_tokens() {
                info!("  {}", token);
            }
        }
        distributor = distributor.with_publisher(pool.spawn());
    }

    let (sender, receiver) = hand_off_queue(config.queue_capacity);
    let workers = distributor.start(receiver);

    let scheduler = Scheduler::new(fetcher, store.clone(), sender);
    scheduler.start(sources).await;

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutting down");

    scheduler.stop().await;
    // Drops the distributor's own publish handle and directory references
    drop(distributor);
    workers.join().await;

    match store.seen_count().await {
        Ok(count) => info!("Seen-item store holds {} keys", count),
        Err(e) => error!("Failed to read store size: {}", e),
    }
    store.close().await;
    info!("RSS broadcaster finished");
    Ok(())
}
