use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use firecrawl_client::FirecrawlClient;
use promotrack_common::{Config, TargetId};
use promotrack_pipeline::classifier::OpenAiPromotionModel;
use promotrack_pipeline::{
    Acquirer, Classifier, HttpFetcher, LogNotifier, Orchestrator, PipelineDeps, RetryPolicy,
    RunSettings,
};
use promotrack_store::{FsBlobStore, PgStore, RecordStore};

#[derive(Parser)]
#[command(name = "promotrack", about = "Daily promotion tracking for retail sites")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire, classify and forecast every enabled target once.
    Run {
        /// Restrict the run to these target ids.
        #[arg(long = "target")]
        targets: Vec<String>,
    },
    /// Delete acquisition records past their retention window.
    Purge,
}

/// Used when `RUST_LOG` is unset; covers every workspace crate.
const DEFAULT_LOG_FILTER: &str = "promotrack=info,promotrack_pipeline=info,promotrack_common=info,\
promotrack_store=info,firecrawl_client=info,ai_client=info";

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();

    let config = Config::from_env().context("Invalid configuration")?;
    config.log_redacted();

    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("Failed to connect to Postgres")?,
    );
    store.migrate().await.context("Failed to run migrations")?;

    match cli.command {
        Command::Purge => {
            let purged = store.purge_expired_acquisitions(chrono::Utc::now()).await?;
            info!(purged, "Expired acquisition records purged");
            Ok(())
        }
        Command::Run { targets } => {
            let orchestrator = build_orchestrator(&config, store)?;
            let only: Vec<TargetId> = targets.into_iter().map(TargetId::new).collect();
            let summary = orchestrator.run_enabled_matching(&only).await?;
            println!("{summary}");
            Ok(())
        }
    }
}

fn build_orchestrator(config: &Config, store: Arc<PgStore>) -> Result<Orchestrator> {
    let direct = HttpFetcher::new(config.fetch_timeout, config.respect_robots_txt)
        .context("Failed to build HTTP client")?;

    let mut firecrawl = FirecrawlClient::new(&config.firecrawl_api_key, config.fallback_timeout)
        .context("Failed to build Firecrawl client")?;
    if let Some(base_url) = &config.firecrawl_base_url {
        firecrawl = firecrawl.with_base_url(base_url);
    }

    let mut openai =
        OpenAi::new(&config.openai_api_key, &config.openai_model).with_timeout(config.model_timeout);
    if let Some(base_url) = &config.openai_base_url {
        openai = openai.with_base_url(base_url);
    }
    info!(model = openai.model(), "Classification model configured");

    let settings = RunSettings::from_config(config);
    let acquirer = Acquirer::new(Arc::new(direct), Arc::new(firecrawl))
        .with_timeouts(config.fetch_timeout, config.fallback_timeout);
    let classifier = Classifier::new(Arc::new(OpenAiPromotionModel::new(openai)))
        .with_retry(RetryPolicy {
            max_attempts: config.model_max_attempts,
            ..settings.retry.clone()
        })
        .with_model_timeout(config.model_timeout);

    let deps = PipelineDeps {
        registry: store.clone(),
        records: store,
        blobs: Arc::new(FsBlobStore::new(config.data_dir.join("blobs"))),
        acquirer,
        classifier,
        notifier: Arc::new(LogNotifier),
    };

    Ok(Orchestrator::new(deps, settings))
}
