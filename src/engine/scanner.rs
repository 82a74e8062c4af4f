//! Multi-venue market scanner.
//!
//! Pages through every configured venue, normalizes raw listings into
//! `Market` rows, applies the qualification predicate, and upserts
//! qualifying markets into storage. One venue's failure is absorbed
//! into `ScanResult.errors` rather than aborting the cycle.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::constants::MAX_SPREAD;
use crate::errors::EngineError;
use crate::platforms::{categorize_from_title, VenueClient, VenueMarket, MAX_SCAN_PAGES, SCAN_PAGE_SIZE};
use crate::storage::Store;
use crate::types::{Market, MarketStatus, Venue};

/// Summary of one scan cycle, returned to callers and the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub total_fetched: u64,
    pub qualifying: u64,
    pub new: u64,
    pub updated: u64,
    pub errors: Vec<String>,
}

pub struct Scanner<'a> {
    store: &'a Store,
    venues: &'a HashMap<Venue, Box<dyn VenueClient>>,
    min_market_volume: Decimal,
    max_days_to_expiry: i64,
}

impl<'a> Scanner<'a> {
    pub fn new(
        store: &'a Store,
        venues: &'a HashMap<Venue, Box<dyn VenueClient>>,
        min_market_volume: Decimal,
        max_days_to_expiry: i64,
    ) -> Self {
        Self { store, venues, min_market_volume, max_days_to_expiry }
    }

    /// A market qualifies for tracking iff all thresholds hold.
    /// `MAX_SPREAD` is the one hard, non-configurable floor.
    fn qualifies(&self, m: &Market) -> bool {
        qualifies(m, self.min_market_volume, self.max_days_to_expiry)
    }

    /// Run one full scan cycle across every configured venue.
    pub async fn scan(&self, scan_id: String) -> ScanResult {
        info!(scan_id = %scan_id, "starting scan cycle");

        let mut total_fetched = 0u64;
        let mut qualifying = 0u64;
        let mut new_count = 0u64;
        let mut updated_count = 0u64;
        let mut errors = Vec::new();

        for (&venue, client) in self.venues.iter() {
            match self.scan_venue(venue, client.as_ref()).await {
                Ok((fetched, markets)) => {
                    total_fetched += fetched;
                    let qualifying_markets: Vec<Market> = markets
                        .into_iter()
                        .map(|raw| self.normalize(venue, raw))
                        .filter(|market| self.qualifies(market))
                        .collect();
                    qualifying += qualifying_markets.len() as u64;

                    // One transaction per venue batch: readers never see
                    // a half-applied set of upserts for this venue.
                    match self.upsert_batch(&qualifying_markets).await {
                        Ok((new, updated)) => {
                            new_count += new;
                            updated_count += updated;
                        }
                        Err(e) => {
                            warn!(venue = %venue, error = %e, "venue batch upsert failed");
                            errors.push(format!("{venue}: batch upsert failed: {e}"));
                        }
                    }
                }
                Err(e) => {
                    warn!(venue = %venue, error = %e, "venue scan failed, continuing with other venues");
                    errors.push(format!("{venue}: {e}"));
                }
            }
        }

        info!(
            scan_id = %scan_id,
            total_fetched,
            qualifying,
            new = new_count,
            updated = updated_count,
            error_count = errors.len(),
            "scan cycle complete"
        );

        ScanResult { scan_id, total_fetched, qualifying, new: new_count, updated: updated_count, errors }
    }

    /// Page through a single venue, capped at `MAX_SCAN_PAGES` pages of
    /// `SCAN_PAGE_SIZE` each.
    async fn scan_venue(&self, venue: Venue, client: &dyn VenueClient) -> Result<(u64, Vec<VenueMarket>), EngineError> {
        let mut all = Vec::new();
        let mut cursor = None;

        for page in 0..MAX_SCAN_PAGES {
            let (markets, next_cursor) = client.list_markets(cursor, SCAN_PAGE_SIZE).await?;
            debug!(venue = %venue, page, count = markets.len(), "fetched page");
            let fetched_count = markets.len();
            all.extend(markets);

            match next_cursor {
                Some(c) if fetched_count > 0 => cursor = Some(c),
                _ => break,
            }
        }

        let total = all.len() as u64;
        Ok((total, all))
    }

    /// Commit a venue's qualifying markets in one transaction, so a
    /// reader never observes a partially-applied batch. Returns
    /// (new, updated) counts.
    async fn upsert_batch(&self, markets: &[Market]) -> Result<(u64, u64), EngineError> {
        let mut new_count = 0u64;
        let mut updated_count = 0u64;

        let mut tx = self.store.begin().await?;
        for market in markets {
            let (_, is_new) = self.store.upsert_market_tx(&mut tx, market).await?;
            if is_new {
                new_count += 1;
            } else {
                updated_count += 1;
            }
        }
        tx.commit().await?;

        Ok((new_count, updated_count))
    }

    fn normalize(&self, venue: Venue, raw: VenueMarket) -> Market {
        let now = chrono::Utc::now();
        let days_to_expiry = raw.close_time.map(|t| (t - now).num_days().max(0));
        let category = if raw.category_hint == crate::types::MarketCategory::Other {
            categorize_from_title(&raw.title)
        } else {
            raw.category_hint
        };

        Market {
            id: 0,
            venue,
            venue_market_id: raw.venue_market_id,
            venue_event_id: raw.venue_event_id,
            title: raw.title,
            category,
            description: raw.description,
            resolution_source: raw.resolution_source,
            yes_price: raw.yes_price,
            no_price: raw.no_price,
            spread: raw.spread,
            volume_24h: raw.volume_24h,
            close_time: raw.close_time,
            resolution_time: None,
            days_to_expiry,
            status: MarketStatus::Active,
            resolved_outcome: None,
            first_seen: now,
            last_updated: now,
        }
    }
}

/// Standalone qualification check shared by `Scanner::qualifies` and tests.
fn qualifies(m: &Market, min_market_volume: Decimal, max_days_to_expiry: i64) -> bool {
    if m.volume_24h < min_market_volume {
        return false;
    }
    if let Some(days) = m.days_to_expiry {
        if days > max_days_to_expiry {
            return false;
        }
    }
    if m.spread > MAX_SPREAD {
        return false;
    }
    m.yes_price > dec!(0.03) && m.yes_price < dec!(0.97)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketCategory;

    const MIN_VOL: Decimal = dec!(200);
    const MAX_DAYS: i64 = 30;

    fn sample(volume: Decimal, yes_price: Decimal, spread: Decimal, days: Option<i64>) -> Market {
        let mut m = Market::sample();
        m.volume_24h = volume;
        m.yes_price = yes_price;
        m.spread = spread;
        m.days_to_expiry = days;
        m
    }

    #[test]
    fn test_qualifies_happy_path() {
        let m = sample(dec!(500), dec!(0.5), dec!(0.05), Some(10));
        assert!(qualifies(&m, MIN_VOL, MAX_DAYS));
    }

    #[test]
    fn test_rejects_low_volume() {
        let m = sample(dec!(50), dec!(0.5), dec!(0.05), Some(10));
        assert!(!qualifies(&m, MIN_VOL, MAX_DAYS));
    }

    #[test]
    fn test_rejects_wide_spread() {
        let m = sample(dec!(500), dec!(0.5), dec!(0.20), Some(10));
        assert!(!qualifies(&m, MIN_VOL, MAX_DAYS));
    }

    #[test]
    fn test_rejects_extreme_price() {
        let hi = sample(dec!(500), dec!(0.98), dec!(0.05), Some(10));
        let lo = sample(dec!(500), dec!(0.02), dec!(0.05), Some(10));
        assert!(!qualifies(&hi, MIN_VOL, MAX_DAYS));
        assert!(!qualifies(&lo, MIN_VOL, MAX_DAYS));
    }

    #[test]
    fn test_rejects_far_expiry() {
        let m = sample(dec!(500), dec!(0.5), dec!(0.05), Some(90));
        assert!(!qualifies(&m, MIN_VOL, MAX_DAYS));
    }

    #[test]
    fn test_allows_unknown_expiry() {
        let m = sample(dec!(500), dec!(0.5), dec!(0.05), None);
        assert!(qualifies(&m, MIN_VOL, MAX_DAYS));
    }

    #[test]
    fn test_categorize_fallback_on_unresolved_hint() {
        let cat = categorize_from_title("Will the Fed cut interest rates in Q2?");
        assert_eq!(cat, MarketCategory::Economics);
    }
}
