//! Mock venue for integration testing.
//!
//! A deterministic `VenueClient` implementation backed entirely by
//! in-memory state: known markets, order placement/cancellation, and
//! resolution — no network calls.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use market_oracle::errors::EngineError;
use market_oracle::platforms::{Orderbook, OrderState, OrderStatus, VenueClient, VenueMarket};
use market_oracle::types::{MarketCategory, Side};

struct OrderRecord {
    order_id: String,
    venue_market_id: String,
    side: Side,
    count: i64,
    price: Decimal,
    state: OrderState,
}

/// A mock venue client for deterministic testing.
///
/// All state is in-memory and guarded by a `Mutex` so the mock can be
/// shared across concurrent test tasks. Markets, outstanding orders,
/// and forced failures are all controllable from test code.
pub struct MockVenueClient {
    name: String,
    markets: Vec<VenueMarket>,
    orders: Mutex<Vec<OrderRecord>>,
    resolved: Mutex<Option<(bool, Option<bool>)>>,
    force_error: Mutex<Option<String>>,
}

impl MockVenueClient {
    /// A mock with a default spread of markets across categories, with
    /// known prices for deterministic edge-detection testing.
    pub fn new(name: &str) -> Self {
        Self::with_markets(name, Self::default_markets())
    }

    pub fn with_markets(name: &str, markets: Vec<VenueMarket>) -> Self {
        Self {
            name: name.to_string(),
            markets,
            orders: Mutex::new(Vec::new()),
            resolved: Mutex::new(None),
            force_error: Mutex::new(None),
        }
    }

    /// Force all subsequent calls to fail with this message.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Make `is_resolved` report a settled outcome from now on.
    pub fn resolve_as(&self, outcome: bool) {
        *self.resolved.lock().unwrap() = Some((true, Some(outcome)));
    }

    /// Mark the given order as fully filled, so the next
    /// `reconcile_fills` pass transitions its position to open.
    pub fn fill_order(&self, order_id: &str) {
        if let Some(order) = self.orders.lock().unwrap().iter_mut().find(|o| o.order_id == order_id) {
            order.state = OrderState::Filled;
        }
    }

    pub fn placed_orders(&self) -> Vec<(String, Side, i64, Decimal)> {
        self.orders.lock().unwrap().iter().map(|o| (o.venue_market_id.clone(), o.side, o.count, o.price)).collect()
    }

    fn check_forced_error(&self) -> Result<(), EngineError> {
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            return Err(EngineError::PermanentVenueError { venue: "mock".to_string(), message: msg.clone() });
        }
        Ok(())
    }

    fn default_markets() -> Vec<VenueMarket> {
        let close_time = Some(Utc::now() + Duration::days(14));

        vec![
            VenueMarket {
                venue_market_id: "MOCK-EC-001".to_string(),
                venue_event_id: Some("MOCK-EC".to_string()),
                title: "Will the RBA cut the cash rate in March 2026?".to_string(),
                category_hint: MarketCategory::Economics,
                description: "Resolves YES if RBA lowers the target cash rate.".to_string(),
                resolution_source: Some("RBA official announcement".to_string()),
                yes_price: dec!(0.40),
                no_price: dec!(0.60),
                spread: dec!(0.02),
                volume_24h: dec!(12000),
                close_time,
            },
            VenueMarket {
                venue_market_id: "MOCK-SP-001".to_string(),
                venue_event_id: None,
                title: "Will Team A win the Grand Final?".to_string(),
                category_hint: MarketCategory::Sports,
                description: "Resolves YES if Team A wins.".to_string(),
                resolution_source: Some("Official match result".to_string()),
                yes_price: dec!(0.55),
                no_price: dec!(0.45),
                spread: dec!(0.015),
                volume_24h: dec!(25000),
                close_time: close_time.map(|t| t + Duration::days(7)),
            },
            VenueMarket {
                venue_market_id: "MOCK-OT-001".to_string(),
                venue_event_id: None,
                title: "Will a specific cultural event happen?".to_string(),
                category_hint: MarketCategory::Other,
                description: "Low-volume test market, filtered out by the scanner's volume floor.".to_string(),
                resolution_source: None,
                yes_price: dec!(0.50),
                no_price: dec!(0.50),
                spread: dec!(0.08),
                volume_24h: dec!(100),
                close_time,
            },
        ]
    }
}

#[async_trait]
impl VenueClient for MockVenueClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_markets(&self, cursor: Option<String>, limit: u32) -> Result<(Vec<VenueMarket>, Option<String>), EngineError> {
        self.check_forced_error()?;
        if cursor.is_some() {
            return Ok((Vec::new(), None));
        }
        let page: Vec<VenueMarket> = self.markets.iter().take(limit as usize).cloned().collect();
        Ok((page, None))
    }

    async fn get_market(&self, venue_market_id: &str) -> Result<VenueMarket, EngineError> {
        self.check_forced_error()?;
        self.markets
            .iter()
            .find(|m| m.venue_market_id == venue_market_id)
            .cloned()
            .ok_or_else(|| EngineError::PermanentVenueError { venue: self.name.clone(), message: format!("market not found: {venue_market_id}") })
    }

    async fn get_orderbook(&self, venue_market_id: &str) -> Result<Orderbook, EngineError> {
        self.check_forced_error()?;
        let market = self.get_market(venue_market_id).await?;
        Ok(Orderbook {
            yes_bid: market.yes_price - market.spread / dec!(2),
            yes_ask: market.yes_price + market.spread / dec!(2),
            no_bid: market.no_price - market.spread / dec!(2),
            no_ask: market.no_price + market.spread / dec!(2),
        })
    }

    async fn place_limit_order(&self, venue_market_id: &str, side: Side, count: i64, price: Decimal) -> Result<String, EngineError> {
        self.check_forced_error()?;
        self.get_market(venue_market_id).await?;

        let order_id = format!("MOCK-{}", Uuid::new_v4());
        self.orders.lock().unwrap().push(OrderRecord {
            order_id: order_id.clone(),
            venue_market_id: venue_market_id.to_string(),
            side,
            count,
            price,
            state: OrderState::Open,
        });
        Ok(order_id)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, EngineError> {
        self.check_forced_error()?;
        let orders = self.orders.lock().unwrap();
        let order = orders
            .iter()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| EngineError::PermanentVenueError { venue: self.name.clone(), message: format!("order not found: {order_id}") })?;
        Ok(OrderStatus { order_id: order.order_id.clone(), state: order.state.clone(), filled_count: order.count, avg_fill_price: Some(order.price) })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        self.check_forced_error()?;
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders.iter_mut().find(|o| o.order_id == order_id) {
            order.state = OrderState::Cancelled;
        }
        Ok(())
    }

    async fn get_mid_price(&self, venue_market_id: &str) -> Result<Decimal, EngineError> {
        self.check_forced_error()?;
        let market = self.get_market(venue_market_id).await?;
        Ok((market.yes_price + (Decimal::ONE - market.no_price)) / dec!(2))
    }

    async fn is_resolved(&self, _venue_market_id: &str) -> Result<(bool, Option<bool>), EngineError> {
        self.check_forced_error()?;
        Ok(self.resolved.lock().unwrap().unwrap_or((false, None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_list_markets() {
        let venue = MockVenueClient::new("mock-exchange");
        let (markets, cursor) = venue.list_markets(None, 100).await.unwrap();
        assert_eq!(markets.len(), 3);
        assert!(cursor.is_none());
        assert!(markets.iter().any(|m| m.category_hint == MarketCategory::Economics));
        assert!(markets.iter().any(|m| m.category_hint == MarketCategory::Sports));
    }

    #[tokio::test]
    async fn test_mock_list_markets_pagination_exhausts_after_first_page() {
        let venue = MockVenueClient::new("mock-exchange");
        let (_, cursor) = venue.list_markets(None, 100).await.unwrap();
        assert!(cursor.is_none());
        let (second_page, _) = venue.list_markets(Some("ignored".to_string()), 100).await.unwrap();
        assert!(second_page.is_empty());
    }

    #[tokio::test]
    async fn test_mock_place_limit_order_tracks_order() {
        let venue = MockVenueClient::new("mock-exchange");
        let order_id = venue.place_limit_order("MOCK-EC-001", Side::Yes, 50, dec!(0.40)).await.unwrap();
        assert!(order_id.starts_with("MOCK-"));

        let placed = venue.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0], ("MOCK-EC-001".to_string(), Side::Yes, 50, dec!(0.40)));

        let status = venue.get_order(&order_id).await.unwrap();
        assert_eq!(status.state, OrderState::Open);
    }

    #[tokio::test]
    async fn test_mock_fill_order_transitions_state() {
        let venue = MockVenueClient::new("mock-exchange");
        let order_id = venue.place_limit_order("MOCK-EC-001", Side::Yes, 50, dec!(0.40)).await.unwrap();
        venue.fill_order(&order_id);
        let status = venue.get_order(&order_id).await.unwrap();
        assert_eq!(status.state, OrderState::Filled);
        assert_eq!(status.filled_count, 50);
    }

    #[tokio::test]
    async fn test_mock_cancel_order() {
        let venue = MockVenueClient::new("mock-exchange");
        let order_id = venue.place_limit_order("MOCK-EC-001", Side::Yes, 50, dec!(0.40)).await.unwrap();
        venue.cancel_order(&order_id).await.unwrap();
        let status = venue.get_order(&order_id).await.unwrap();
        assert_eq!(status.state, OrderState::Cancelled);
    }

    #[tokio::test]
    async fn test_mock_place_limit_order_unknown_market() {
        let venue = MockVenueClient::new("mock-exchange");
        let result = venue.place_limit_order("NONEXISTENT", Side::Yes, 10, dec!(0.5)).await;
        assert!(matches!(result, Err(EngineError::PermanentVenueError { .. })));
    }

    #[tokio::test]
    async fn test_mock_forced_error_blocks_every_call() {
        let venue = MockVenueClient::new("mock-exchange");
        venue.set_error("simulated venue outage");

        assert!(venue.list_markets(None, 100).await.is_err());
        assert!(venue.get_mid_price("MOCK-EC-001").await.is_err());
        assert!(venue.place_limit_order("MOCK-EC-001", Side::Yes, 10, dec!(0.4)).await.is_err());

        venue.clear_error();
        assert!(venue.list_markets(None, 100).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_resolve_as() {
        let venue = MockVenueClient::new("mock-exchange");
        assert_eq!(venue.is_resolved("MOCK-EC-001").await.unwrap(), (false, None));

        venue.resolve_as(true);
        assert_eq!(venue.is_resolved("MOCK-EC-001").await.unwrap(), (true, Some(true)));
    }

    #[tokio::test]
    async fn test_mock_custom_markets() {
        let custom = vec![VenueMarket {
            venue_market_id: "CUSTOM-001".to_string(),
            venue_event_id: None,
            title: "Custom test market".to_string(),
            category_hint: MarketCategory::Other,
            description: String::new(),
            resolution_source: None,
            yes_price: dec!(0.5),
            no_price: dec!(0.5),
            spread: dec!(0.01),
            volume_24h: dec!(1000),
            close_time: Some(Utc::now() + Duration::days(7)),
        }];

        let venue = MockVenueClient::with_markets("custom", custom);
        let (markets, _) = venue.list_markets(None, 100).await.unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].venue_market_id, "CUSTOM-001");
    }
}
