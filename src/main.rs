use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use perptrader::account::AccountTracker;
use perptrader::api::{ApiCredentials, BinanceFuturesClient, Exchange};
use perptrader::collector::{self, CollectorKind};
use perptrader::engine::{delay_until_boundary, CycleOutcome, Engine};
use perptrader::execution::OrderExecutor;
use perptrader::llm::LlmAgent;
use perptrader::persistence::JsonFileStore;
use perptrader::retry::RetryPolicy;
use perptrader::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "perptrader", about = "LLM-driven perpetual futures trading loop")]
struct Cli {
    /// Configuration file (TOML/JSON); PERPTRADER__* env vars override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the built-in BTC/ETH fixture instead of live market data
    #[arg(long)]
    mock: bool,

    /// Run a single cycle immediately and exit
    #[arg(long)]
    once: bool,

    /// Override the decision model
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        cfg.model = model;
    }

    tracing::info!("🚀 perptrader starting");
    tracing::info!("  Universe: {}", cfg.asset_universe.join(", "));
    tracing::info!("  Model: {}", cfg.model);
    tracing::info!("  Interval: {} min", cfg.decision_interval_minutes);
    tracing::info!("  Exchange: {}", cfg.exchange_url());

    let mut engine = build_engine(&cfg, cli.mock).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                cancel.cancel();
            }
        });
    }

    if cli.once {
        run_one(&mut engine, &cancel).await;
        return Ok(());
    }

    let interval = cfg.decision_interval();
    let delay = delay_until_boundary(Utc::now(), interval);
    tracing::info!("First cycle in {:?} at the next interval boundary", delay);

    let mut ticker = interval_at(Instant::now() + delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tracing::info!("🔄 [CYCLE] Tick at {}", Utc::now().format("%H:%M:%S"));
        run_one(&mut engine, &cancel).await;
    }

    tracing::info!("👋 perptrader stopped");
    Ok(())
}

// ============================================================================
// Initialization
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("perptrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_engine(cfg: &AppConfig, mock: bool) -> anyhow::Result<Engine> {
    let credentials = ApiCredentials::from_env();
    if credentials.is_none() {
        tracing::warn!(
            "BINANCE_API_KEY / BINANCE_SECRET_KEY not set, account and order calls will fail"
        );
    }

    let exchange: Arc<dyn Exchange> = Arc::new(
        BinanceFuturesClient::from_config(cfg, credentials)
            .context("Failed to build exchange client")?,
    );

    // Orders cannot be placed without precision rules
    let executor = OrderExecutor::new(exchange.clone(), RetryPolicy::from_config(cfg))
        .await
        .context("Failed to load exchange precision rules")?;

    let agent = LlmAgent::from_config(cfg).context("Failed to configure decision agent")?;

    let kind = if mock {
        CollectorKind::Mock
    } else {
        CollectorKind::Binance
    };
    let collector = collector::build(kind, exchange.clone(), cfg);
    tracing::info!("  Collector: {}", collector.name());

    let account = AccountTracker::bootstrap(exchange, cfg).await;
    let store = JsonFileStore::new(&cfg.persistence_path);

    Ok(Engine::new(
        cfg,
        collector,
        account,
        executor,
        Box::new(agent),
        Box::new(store),
    )
    .await)
}

// ============================================================================
// Cycle
// ============================================================================

async fn run_one(engine: &mut Engine, cancel: &CancellationToken) {
    let cycle = cancel.child_token();
    match engine.run_cycle(&cycle).await {
        Ok(CycleOutcome::Completed(report)) => {
            tracing::info!(
                "  ✓ {} coins, {} positions ({} orphan), {} executed, {} failed",
                report.coins.len(),
                report.positions,
                report.orphans,
                report.executed(),
                report.failed()
            );
        }
        Ok(CycleOutcome::Cancelled) => {
            tracing::warn!("  ✗ Cycle cancelled");
        }
        Err(e) => {
            tracing::error!("  ✗ Cycle aborted: {:#}", e);
        }
    }
}
