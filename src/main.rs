//! market-oracle — Autonomous Prediction Market Trading Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires up venue clients and the scheduler, and runs until a
//! graceful Ctrl+C shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use tracing::info;

use market_oracle::config::AppConfig;
use market_oracle::dashboard::{self, routes::DashboardState};
use market_oracle::engine::analysis::AnalysisSettings;
use market_oracle::engine::scheduler::Scheduler;
use market_oracle::ensemble::AnalystDeps;
use market_oracle::llm::openclaw::OpenclawClient;
use market_oracle::llm::tavily::TavilyClient;
use market_oracle::platforms::kalshi::KalshiClient;
use market_oracle::platforms::polymarket::PolymarketClient;
use market_oracle::platforms::VenueClient;
use market_oracle::storage::{self, Store};
use market_oracle::types::Venue;

const BANNER: &str = r#"
  __  __             _        _    ___                 _
 |  \/  | __ _ _ __ | | _____| |_ / _ \ _ __ __ _  ___| | ___
 | |\/| |/ _` | '__|| |/ / _ \ __| | | | '__/ _` |/ __| |/ _ \
 | |  | | (_| | |   |   <  __/ |_| |_| | | | (_| | (__| |  __/
 |_|  |_|\__,_|_|   |_|\_\___|\__|\___/|_|  \__,_|\___|_|\___|

  Autonomous Prediction Market Trading Engine
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(bankroll = cfg.risk.bankroll, scanner_interval_hours = cfg.scanner.interval_hours, "market-oracle starting up");

    let pool = storage::connect(&cfg.storage.database_url).await.context("failed to connect to storage")?;
    let store = Arc::new(Store::new(pool));

    let venues = Arc::new(build_venues(&cfg)?);

    let llm = Arc::new(OpenclawClient::new(
        cfg.openclaw.base_url.clone(),
        AppConfig::resolve_env(&cfg.openclaw.api_key_env)?,
        cfg.openclaw.model.clone(),
    )?);
    let search = Arc::new(TavilyClient::new(AppConfig::resolve_env(&cfg.tavily.api_key_env)?)?);
    let analyst_deps = AnalystDeps { llm, search };

    let bankroll = Decimal::from_f64(cfg.risk.bankroll).unwrap_or_default();
    let analysis_settings = AnalysisSettings {
        bankroll,
        min_edge: Decimal::from_f64(cfg.risk.min_edge_threshold).unwrap_or_default(),
        max_position_pct: Decimal::from_f64(cfg.max_position_fraction()).unwrap_or_default(),
        max_daily_drawdown_pct: Decimal::from_f64(cfg.daily_drawdown_limit_fraction()).unwrap_or_default(),
    };

    let min_market_volume = Decimal::from_f64(cfg.scanner.min_market_volume).unwrap_or_default();

    if cfg.dashboard.enabled {
        let dashboard_state = Arc::new(DashboardState {
            store: store.clone(),
            venues: venues.clone(),
            analyst_deps,
            analysis_settings,
            min_market_volume,
            max_days_to_expiry: cfg.scanner.max_days_to_expiry,
        });
        dashboard::spawn_dashboard(dashboard_state, cfg.dashboard.port)?;
    }

    let scheduler = Scheduler::new(store.clone(), venues.clone(), cfg.scanner.interval_hours, min_market_volume, cfg.scanner.max_days_to_expiry);

    info!("entering scheduler loop; press Ctrl+C to stop");
    scheduler.run().await;

    info!("market-oracle shut down cleanly");
    Ok(())
}

fn build_venues(cfg: &AppConfig) -> Result<HashMap<Venue, Box<dyn VenueClient>>> {
    let mut venues: HashMap<Venue, Box<dyn VenueClient>> = HashMap::new();

    let kalshi_key_id = AppConfig::resolve_env(&cfg.kalshi.api_key_id_env)?;
    let kalshi_key_path = AppConfig::resolve_env(&cfg.kalshi.private_key_path_env)?;
    let kalshi_pem = std::fs::read_to_string(&kalshi_key_path)
        .with_context(|| format!("failed to read Kalshi private key at {kalshi_key_path}"))?;
    let kalshi = KalshiClient::new(kalshi_key_id, &kalshi_pem, cfg.kalshi.use_demo)?;
    venues.insert(Venue::Kalshi, Box::new(kalshi));

    let polymarket = match (
        AppConfig::resolve_env(&cfg.polymarket.private_key_env),
        AppConfig::resolve_env(&cfg.polymarket.safe_address_env),
    ) {
        (Ok(private_key), Ok(safe_address)) => PolymarketClient::new_with_credentials(private_key, safe_address)?,
        _ => PolymarketClient::new_read_only()?,
    };
    venues.insert(Venue::Polymarket, Box::new(polymarket));

    Ok(venues)
}

/// Human-readable logs by default; set `MARKET_ORACLE_LOG_JSON` for
/// structured JSON output (production).
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("market_oracle=info"));

    if std::env::var("MARKET_ORACLE_LOG_JSON").is_ok() {
        fmt().json().with_env_filter(env_filter).with_target(true).with_thread_ids(true).with_file(true).with_line_number(true).init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
