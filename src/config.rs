//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, private keys) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`. Hard safety
//! floors live in [`constants`] and are never runtime-configurable.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub openclaw: OpenclawConfig,
    pub tavily: TavilyConfig,
    pub kalshi: KalshiConfig,
    pub polymarket: PolymarketConfig,
    pub scanner: ScannerConfig,
    pub risk: RiskConfig,
    pub storage: StorageConfig,
    pub dashboard: DashboardConfig,
    pub alerts: AlertsConfig,
}

/// The text-generation backend used by all three analyst roles.
#[derive(Debug, Deserialize, Clone)]
pub struct OpenclawConfig {
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_openclaw_model")]
    pub model: String,
}

fn default_openclaw_model() -> String {
    "claude-sonnet-4-6".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TavilyConfig {
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KalshiConfig {
    pub api_key_id_env: String,
    pub private_key_path_env: String,
    #[serde(default = "default_true")]
    pub use_demo: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolymarketConfig {
    pub private_key_env: String,
    pub safe_address_env: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_scan_interval_hours")]
    pub interval_hours: u64,
    #[serde(default = "default_min_volume")]
    pub min_market_volume: f64,
    #[serde(default = "default_max_days_to_expiry")]
    pub max_days_to_expiry: i64,
}

fn default_scan_interval_hours() -> u64 {
    6
}
fn default_min_volume() -> f64 {
    200.0
}
fn default_max_days_to_expiry() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    #[serde(default = "default_min_edge_threshold")]
    pub min_edge_threshold: f64,
    /// Percent form (e.g. 5.0 = 5%), converted to a fraction at use sites.
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,
    #[serde(default = "default_daily_drawdown_limit_pct")]
    pub daily_drawdown_limit_pct: f64,
    #[serde(default = "default_bankroll")]
    pub bankroll: f64,
}

fn default_min_edge_threshold() -> f64 {
    0.05
}
fn default_max_position_pct() -> f64 {
    5.0
}
fn default_max_concurrent_positions() -> u32 {
    15
}
fn default_daily_drawdown_limit_pct() -> f64 {
    2.0
}
fn default_bankroll() -> f64 {
    10_000.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

fn default_dashboard_port() -> u16 {
    8080
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// `max_position_pct` is stored as a percent (5.0 == 5%); callers
    /// working in fractions should use this instead.
    pub fn max_position_fraction(&self) -> f64 {
        self.risk.max_position_pct / 100.0
    }

    pub fn daily_drawdown_limit_fraction(&self) -> f64 {
        self.risk.daily_drawdown_limit_pct / 100.0
    }
}

/// Hard safety floors — "the law". Never overridable from `config.toml`
/// or the environment; every caller compares against these directly.
pub mod constants {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub const STOP_LOSS_PCT: Decimal = dec!(0.05);
    pub const MAX_DAILY_DRAWDOWN_PCT: Decimal = dec!(0.02);
    pub const MAX_POSITION_PCT_CAP: Decimal = dec!(0.25);
    pub const MAX_CONCURRENT: u32 = 15;
    pub const MIN_EDGE: Decimal = dec!(0.05);
    pub const MAX_SPREAD: Decimal = dec!(0.15);
    pub const D_DEBATE: Decimal = dec!(0.10);
    pub const R_MAX: u32 = 5;
    pub const D_CONVERGED: Decimal = dec!(0.05);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        // Requires config.toml in the working directory; tolerant of
        // its absence in sandboxed test environments.
        if let Ok(cfg) = AppConfig::load("config.toml") {
            assert!(cfg.risk.bankroll > 0.0);
            assert_eq!(cfg.scanner.interval_hours, 6);
            assert!(cfg.kalshi.use_demo);
        }
    }

    #[test]
    fn test_max_position_fraction() {
        let cfg_risk = RiskConfig {
            min_edge_threshold: 0.05,
            max_position_pct: 5.0,
            max_concurrent_positions: 15,
            daily_drawdown_limit_pct: 2.0,
            bankroll: 10_000.0,
        };
        assert!((cfg_risk.max_position_pct / 100.0 - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_constants_are_the_hard_floors() {
        use constants::*;
        use rust_decimal_macros::dec;
        assert_eq!(MAX_POSITION_PCT_CAP, dec!(0.25));
        assert_eq!(MAX_CONCURRENT, 15);
        assert_eq!(R_MAX, 5);
    }
}
