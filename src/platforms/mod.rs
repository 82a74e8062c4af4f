//! Venue integrations.
//!
//! Defines the `VenueClient` trait — one uniform capability set
//! implemented by both concrete clients — plus `Kalshi` (asymmetric
//! RSA-PSS request signing) and `Polymarket` (pre-issued credential
//! headers).

pub mod kalshi;
pub mod polymarket;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::EngineError;
use crate::types::{MarketCategory, Side};

/// A market as reported by a venue, before normalization into the
/// persisted `Market` shape.
#[derive(Debug, Clone)]
pub struct VenueMarket {
    pub venue_market_id: String,
    pub venue_event_id: Option<String>,
    pub title: String,
    pub category_hint: MarketCategory,
    pub description: String,
    pub resolution_source: Option<String>,
    pub yes_price: Decimal,
    pub no_price: Decimal,
    pub spread: Decimal,
    pub volume_24h: Decimal,
    pub close_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
pub struct Orderbook {
    pub yes_bid: Decimal,
    pub yes_ask: Decimal,
    pub no_bid: Decimal,
    pub no_ask: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderState {
    Open,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub order_id: String,
    pub state: OrderState,
    pub filled_count: i64,
    pub avg_fill_price: Option<Decimal>,
}

/// Uniform capability set exposed by every venue. All orders are
/// resting limit (maker) orders — taker execution is never offered.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn name(&self) -> &str;

    /// Page through active markets. Returns the batch and a cursor
    /// for the next page, or `None` once exhausted.
    async fn list_markets(
        &self,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<(Vec<VenueMarket>, Option<String>), EngineError>;

    async fn get_market(&self, venue_market_id: &str) -> Result<VenueMarket, EngineError>;

    async fn get_orderbook(&self, venue_market_id: &str) -> Result<Orderbook, EngineError>;

    async fn place_limit_order(
        &self,
        venue_market_id: &str,
        side: Side,
        count: i64,
        price: Decimal,
    ) -> Result<String, EngineError>;

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, EngineError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError>;

    async fn get_mid_price(&self, venue_market_id: &str) -> Result<Decimal, EngineError>;

    /// `(resolved, outcome)` — `outcome` is `Some(true)` for YES,
    /// `Some(false)` for NO, `None` while unresolved.
    async fn is_resolved(&self, venue_market_id: &str) -> Result<(bool, Option<bool>), EngineError>;
}

/// Venue-side cap on a single scanner pass: 5 pages of 100.
pub const MAX_SCAN_PAGES: u32 = 5;
pub const SCAN_PAGE_SIZE: u32 = 100;

/// Deterministic keyword categorization, checked in fixed order so
/// ties go to the first match.
pub fn categorize_from_title(title: &str) -> MarketCategory {
    let t = title.to_lowercase();

    const ECONOMICS: &[&str] = &["cpi", "gdp", "fed", "inflation", "jobs", "unemployment", "interest rate", "fomc", "payroll", "ppi"];
    const POLITICS: &[&str] = &["trump", "biden", "election", "democrat", "republican", "congress", "senate", "president", "vote", "governor"];
    const WEATHER: &[&str] = &["temperature", "hurricane", "storm", "weather", "rainfall", "snowfall", "celsius", "fahrenheit"];
    const CRYPTO: &[&str] = &["bitcoin", "btc", "ethereum", "eth", "crypto", "solana", "dogecoin"];
    const SPORTS: &[&str] = &["win", "nba", "nfl", "mlb", "nhl", "match", "game", "score", "points", "team"];
    const ENTERTAINMENT: &[&str] = &["oscar", "grammy", "emmy", "movie", "box office", "tv show", "album"];

    if ECONOMICS.iter().any(|k| t.contains(k)) {
        MarketCategory::Economics
    } else if POLITICS.iter().any(|k| t.contains(k)) {
        MarketCategory::Politics
    } else if WEATHER.iter().any(|k| t.contains(k)) {
        MarketCategory::Weather
    } else if CRYPTO.iter().any(|k| t.contains(k)) {
        MarketCategory::Crypto
    } else if SPORTS.iter().any(|k| t.contains(k)) {
        MarketCategory::Sports
    } else if ENTERTAINMENT.iter().any(|k| t.contains(k)) {
        MarketCategory::Entertainment
    } else {
        MarketCategory::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_economics_beats_politics_by_order() {
        // "fed" is checked before politics keywords, so a title naming
        // both resolves to economics.
        assert_eq!(categorize_from_title("Fed decision ahead of election"), MarketCategory::Economics);
    }

    #[test]
    fn test_categorize_sports() {
        assert_eq!(categorize_from_title("Will the Lakers win the NBA title?"), MarketCategory::Sports);
    }

    #[test]
    fn test_categorize_other_fallback() {
        assert_eq!(categorize_from_title("Will aliens be discovered?"), MarketCategory::Other);
    }
}
