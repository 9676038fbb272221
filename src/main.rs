use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coronaboard::models::{
    Config, WorldAggregation, DEFAULT_CONFIRMED_URL, DEFAULT_DEATHS_URL, WORLD,
};
use coronaboard::scrapers::http_source;
use coronaboard::signals::DEFAULT_SICKTIME_DAYS;
use coronaboard::{create_router, AppState, SeriesStore};

/// COVID-19 dashboard server
#[derive(Parser, Debug)]
#[command(name = "coronaboard", version, about)]
struct Args {
    /// Address the HTTP server binds to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    bind_addr: String,

    /// Cumulative confirmed-cases CSV
    #[arg(long, env = "CONFIRMED_URL", default_value = DEFAULT_CONFIRMED_URL)]
    confirmed_url: String,

    /// Cumulative deaths CSV
    #[arg(long, env = "DEATHS_URL", default_value = DEFAULT_DEATHS_URL)]
    deaths_url: String,

    /// Cache age after which a request triggers a re-download
    #[arg(long, env = "STALE_AFTER_SECS", default_value_t = 3600)]
    stale_after_secs: u64,

    /// Days a case counts as active
    #[arg(long, env = "SICKTIME_DAYS", default_value_t = DEFAULT_SICKTIME_DAYS)]
    sicktime_days: u32,

    /// Region shown at `/` and for unknown names
    #[arg(long, env = "DEFAULT_REGION", default_value = WORLD)]
    default_region: String,

    /// Per-download timeout; unset waits indefinitely
    #[arg(long, env = "FETCH_TIMEOUT_SECS")]
    fetch_timeout_secs: Option<u64>,

    #[arg(long, env = "WORLD_AGGREGATION", value_enum, default_value_t = WorldAggregation::OriginalRows)]
    world_aggregation: WorldAggregation,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            bind_addr: args.bind_addr,
            confirmed_url: args.confirmed_url,
            deaths_url: args.deaths_url,
            stale_after: Duration::from_secs(args.stale_after_secs),
            sicktime_days: args.sicktime_days,
            default_region: args.default_region,
            fetch_timeout: args.fetch_timeout_secs.map(Duration::from_secs),
            world_aggregation: args.world_aggregation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config: Config = Args::parse().into();
    info!(
        bind = %config.bind_addr,
        stale_after_secs = config.stale_after.as_secs(),
        sicktime_days = config.sicktime_days,
        world = ?config.world_aggregation,
        "🦠 Starting coronaboard"
    );

    let source = http_source(&config).context("Failed to build HTTP client")?;
    let store = Arc::new(SeriesStore::new(
        source,
        config.stale_after,
        config.world_aggregation,
    ));

    // Warm the cache; a failure here is retried by the first request
    match store.refresh().await {
        Ok(snapshot) => info!(regions = snapshot.regions().len(), "📊 Initial series loaded"),
        Err(e) => warn!(error = %e, "⚠️ Initial refresh failed, serving will retry"),
    }

    let app = create_router(AppState::new(store, &config));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 Dashboard listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coronaboard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // cwd and parents first, then the crate directory when launched from elsewhere
    let _ = dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    load_env_files(&[manifest_dir.join(".env")]);
}

fn load_env_files(candidates: &[PathBuf]) {
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(p);
        }
    }
}
