//! Shared types for the trading engine.
//!
//! These types form the data model used across all modules: venues,
//! the ensemble estimator, the edge gate, the executor, and the
//! lifecycle manager all depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Convert an f64 to Decimal at API boundaries (venue JSON, parsed LLM
/// numbers). Returns Decimal::ZERO for NaN/Infinity.
pub fn d(val: f64) -> Decimal {
    Decimal::from_f64_retain(val).unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Kalshi,
    Polymarket,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Kalshi => write!(f, "kalshi"),
            Venue::Polymarket => write!(f, "polymarket"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCategory {
    Economics,
    Politics,
    Weather,
    Crypto,
    Sports,
    Entertainment,
    Other,
}

impl MarketCategory {
    pub const ALL: &'static [MarketCategory] = &[
        MarketCategory::Economics,
        MarketCategory::Politics,
        MarketCategory::Weather,
        MarketCategory::Crypto,
        MarketCategory::Sports,
        MarketCategory::Entertainment,
        MarketCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCategory::Economics => "economics",
            MarketCategory::Politics => "politics",
            MarketCategory::Weather => "weather",
            MarketCategory::Crypto => "crypto",
            MarketCategory::Sports => "sports",
            MarketCategory::Entertainment => "entertainment",
            MarketCategory::Other => "other",
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    ResolvedYes,
    ResolvedNo,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Pending,
    Open,
    ClosedWin,
    ClosedLoss,
    ClosedEarly,
    Cancelled,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PositionStatus::ClosedWin
                | PositionStatus::ClosedLoss
                | PositionStatus::ClosedEarly
                | PositionStatus::Cancelled
        )
    }

    pub fn is_live(&self) -> bool {
        matches!(self, PositionStatus::Pending | PositionStatus::Open)
    }
}

/// The three independent analyst roles contributing to the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystRole {
    Research,
    BaseRate,
    Model,
}

impl fmt::Display for AnalystRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalystRole::Research => write!(f, "research"),
            AnalystRole::BaseRate => write!(f, "base_rate"),
            AnalystRole::Model => write!(f, "model"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A binary (YES/NO) contract on one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: i64,
    pub venue: Venue,
    pub venue_market_id: String,
    pub venue_event_id: Option<String>,
    pub title: String,
    pub category: MarketCategory,
    pub description: String,
    pub resolution_source: Option<String>,
    pub yes_price: Decimal,
    pub no_price: Decimal,
    pub spread: Decimal,
    pub volume_24h: Decimal,
    pub close_time: Option<DateTime<Utc>>,
    pub resolution_time: Option<DateTime<Utc>>,
    pub days_to_expiry: Option<i64>,
    pub status: MarketStatus,
    pub resolved_outcome: Option<bool>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Market {
    /// Mid-price between the YES price and the complement of the NO price.
    pub fn mid_price(&self) -> Decimal {
        (self.yes_price + (Decimal::ONE - self.no_price)) / dec!(2)
    }

    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    #[cfg(test)]
    pub fn sample() -> Self {
        Market {
            id: 1,
            venue: Venue::Kalshi,
            venue_market_id: "CPI-26Q1".to_string(),
            venue_event_id: Some("CPI-26".to_string()),
            title: "Will CPI exceed 3% in Q1 2026?".to_string(),
            category: MarketCategory::Economics,
            description: "Resolves YES if BLS reports CPI > 3% for Q1 2026.".to_string(),
            resolution_source: Some("BLS".to_string()),
            yes_price: dec!(0.45),
            no_price: dec!(0.55),
            spread: dec!(0.02),
            volume_24h: dec!(5000),
            close_time: Some(Utc::now() + chrono::Duration::days(30)),
            resolution_time: None,
            days_to_expiry: Some(30),
            status: MarketStatus::Active,
            resolved_outcome: None,
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProbabilityEstimate
// ---------------------------------------------------------------------------

/// One analyst role's independent probability estimate for one market in
/// one scan/analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilityEstimate {
    pub id: i64,
    pub market_id: i64,
    pub scan_id: String,
    pub role: AnalystRole,
    pub agent_name: String,
    pub probability: Decimal,
    pub confidence: Decimal,
    pub reasoning: String,
    pub model_kind: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProbabilityEstimate {
    pub fn is_valid(&self) -> bool {
        self.probability >= dec!(0.01) && self.probability <= dec!(0.99)
    }
}

// ---------------------------------------------------------------------------
// EdgeAnalysis
// ---------------------------------------------------------------------------

/// The edge/Kelly gate's verdict for one market in one scan/analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeAnalysis {
    pub id: i64,
    pub market_id: i64,
    pub scan_id: String,
    pub system_probability: Decimal,
    pub market_price: Decimal,
    pub edge: Decimal,
    pub expected_value: Decimal,
    pub kelly_fraction: Decimal,
    pub half_kelly_fraction: Decimal,
    pub position_size_dollars: Decimal,
    pub num_contracts: i64,
    pub recommended_side: Side,
    pub tradeable: bool,
    pub rejection_reason: Option<String>,
    pub debate_triggered: bool,
    pub debate_transcript: Option<serde_json::Value>,
    pub estimates_divergence: Decimal,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub market_id: i64,
    pub edge_analysis_id: i64,
    pub venue: Venue,
    pub side: Side,
    pub num_contracts: i64,
    pub entry_price: Decimal,
    pub total_cost: Decimal,
    pub exit_price: Option<Decimal>,
    pub pnl_dollars: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
    pub status: PositionStatus,
    pub venue_order_id: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Unrealized P&L given a current yes-price observation.
    pub fn unrealized_pnl(&self, current_yes_price: Decimal) -> Decimal {
        match self.side {
            Side::Yes => (current_yes_price - self.entry_price) * Decimal::from(self.num_contracts),
            Side::No => (self.entry_price - current_yes_price) * Decimal::from(self.num_contracts),
        }
    }
}

// ---------------------------------------------------------------------------
// CalibrationRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub id: i64,
    pub market_id: i64,
    pub system_probability: Decimal,
    pub market_price_at_entry: Decimal,
    pub actual_outcome: bool,
    pub brier_score: Decimal,
    pub research_estimate: Option<Decimal>,
    pub base_rate_estimate: Option<Decimal>,
    pub model_estimate: Option<Decimal>,
    pub category: MarketCategory,
    pub resolved_at: DateTime<Utc>,
}

impl CalibrationRecord {
    pub fn brier(system_probability: Decimal, outcome: bool) -> Decimal {
        let o = if outcome { Decimal::ONE } else { Decimal::ZERO };
        (system_probability - o) * (system_probability - o)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
