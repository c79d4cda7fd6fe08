use clap::{Parser, Subcommand};
use coinpulse_core::{cancellation_channel, AppConfig, SymbolOracle};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "coinpulse")]
#[command(about = "Crypto social sentiment pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline supervisor with the web API and event stream
    Server {
        /// Listen address, overriding the configured host:port
        #[arg(short, long)]
        addr: Option<String>,
    },
    /// Run one scrape pass (also the supervisor's scraper stage)
    Scrape,
    /// Run one sentiment aggregation pass
    Aggregate,
    /// Run one market enrichment pass
    Enrich,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = coinpulse_core::ConfigLoader::load()?;

    match cli.command {
        Commands::Server { addr } => run_server(config, addr).await?,
        Commands::Scrape => run_scrape(config).await?,
        Commands::Aggregate => run_aggregate(config).await?,
        Commands::Enrich => run_enrich(config).await?,
    }

    Ok(())
}

async fn run_server(config: AppConfig, addr: Option<String>) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.data.dir).await?;

    let bus = coinpulse_core::EventBus::new(config.events.buffer);
    let store = Arc::new(coinpulse_store::ScrapeStore::new(config.data.posts_path()));

    // Watch the scrape document; the downstream documents are excluded so
    // the pipeline's own writes cannot re-trigger it.
    let (watcher, changes_rx) = coinpulse_core::StoreWatcher::new(config.data.posts_path());
    tokio::spawn(async move {
        if let Err(e) = watcher.watch().await {
            tracing::error!("store watcher failed: {e}");
        }
    });

    let supervisor = coinpulse_supervisor::SupervisorActor::spawn(
        config.supervisor.clone(),
        config.data.clone(),
        bus.clone(),
        changes_rx,
    );

    let server = coinpulse_web_api::ApiServer::new(supervisor.clone(), bus, store);
    let addr = addr.unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    tokio::select! {
        result = server.serve(&addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            let _ = supervisor.shutdown().await;
        }
    }

    Ok(())
}

async fn run_scrape(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(sources = config.scraper.sources.len(), "scrape stage starting");

    let store = Arc::new(coinpulse_store::ScrapeStore::new(config.data.posts_path()));
    let (cancel_tx, cancel) = cancellation_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping workers");
            let _ = cancel_tx.send(true);
        }
    });

    let oracle = coinpulse_resolver::HttpSymbolOracle::from_env(&config.resolver)
        .map(|oracle| Arc::new(oracle) as Arc<dyn SymbolOracle>);
    let resolver = Arc::new(coinpulse_resolver::TokenResolver::new(
        Arc::clone(&store),
        oracle,
        &config.resolver,
        cancel.clone(),
    ));

    let factory = Arc::new(coinpulse_scraper::RedditFetcherFactory::new()?);
    let coordinator = coinpulse_scraper::ScrapeCoordinator::new(
        config.scraper,
        store,
        resolver,
        factory,
        cancel,
    );

    let stats = coordinator.run().await?;
    tracing::info!(
        posts = stats.posts_added,
        duplicates = stats.duplicates_skipped,
        "scrape stage complete"
    );
    Ok(())
}

async fn run_aggregate(config: AppConfig) -> anyhow::Result<()> {
    let scrape = coinpulse_store::ScrapeStore::new(config.data.posts_path());
    let sentiment = coinpulse_store::SentimentStore::new(config.data.sentiment_path());

    let aggregator = coinpulse_sentiment::SentimentAggregator::new(
        Arc::new(coinpulse_sentiment::LexiconScorer),
        config.aggregator,
    );

    let tokens = aggregator.run(&scrape, &sentiment).await?;
    tracing::info!(tokens, "aggregate stage complete");
    Ok(())
}

async fn run_enrich(config: AppConfig) -> anyhow::Result<()> {
    let sentiment = coinpulse_store::SentimentStore::new(config.data.sentiment_path());
    let coins = coinpulse_store::CoinStore::new(config.data.coins_path());

    let (cancel_tx, cancel) = cancellation_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let enricher = coinpulse_enricher::MarketEnricher::with_default_chain(config.enricher, cancel);
    let coins_written = enricher.run(&sentiment, &coins).await?;
    tracing::info!(coins = coins_written, "enrich stage complete");
    Ok(())
}
