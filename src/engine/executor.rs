//! Trade executor.
//!
//! Runs the two hard safety gates ahead of every order, then places a
//! single resting limit order at the venue and records the attempt as
//! a `pending` position regardless of whether the venue call
//! succeeded — fill reconciliation (see `lifecycle`) is what confirms
//! or corrects it.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::constants::MAX_CONCURRENT;
use crate::errors::EngineError;
use crate::platforms::VenueClient;
use crate::storage::Store;
use crate::types::{EdgeAnalysis, Position, PositionStatus};

pub struct Executor<'a> {
    store: &'a Store,
    bankroll: Decimal,
    max_daily_drawdown_pct: Decimal,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a Store, bankroll: Decimal, max_daily_drawdown_pct: Decimal) -> Self {
        Self { store, bankroll, max_daily_drawdown_pct }
    }

    /// Check both hard safety gates in order against an already-open
    /// transaction. Returns `Err(SafetyBlock)` on the first failure;
    /// places no order and creates no position.
    async fn check_safety_gates(&self, tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<(), EngineError> {
        let open_count = self.store.count_open_positions_tx(tx).await?;
        if open_count >= MAX_CONCURRENT as i64 {
            return Err(EngineError::SafetyBlock(format!(
                "concurrent positions cap reached: {open_count}/{MAX_CONCURRENT}"
            )));
        }

        let realized_today = self.store.realized_pnl_today_tx(tx).await?;
        let floor = -(self.bankroll * self.max_daily_drawdown_pct);
        if realized_today <= floor {
            return Err(EngineError::SafetyBlock("daily drawdown kill-switch tripped".to_string()));
        }

        Ok(())
    }

    /// Execute one tradeable edge analysis: safety gates, then a
    /// single limit order, then a pending `Position` row. The gate
    /// reads and the position insert run inside one transaction, so a
    /// concurrent `execute` call can never observe a state in between
    /// the gates passing and the position committing.
    pub async fn execute(
        &self,
        venue: &dyn VenueClient,
        venue_identity: crate::types::Venue,
        edge: &EdgeAnalysis,
        venue_market_id: &str,
    ) -> Result<Position, EngineError> {
        if !edge.tradeable {
            return Err(EngineError::SafetyBlock("edge analysis is not tradeable".to_string()));
        }

        let mut tx = self.store.begin().await?;
        self.check_safety_gates(&mut tx).await?;

        let quote_price = match edge.recommended_side {
            crate::types::Side::Yes => edge.market_price,
            crate::types::Side::No => Decimal::ONE - edge.market_price,
        };

        let venue_order_id = match venue
            .place_limit_order(venue_market_id, edge.recommended_side, edge.num_contracts, quote_price)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(market_id = edge.market_id, error = %e, "order placement failed, recording pending attempt");
                None
            }
        };

        let total_cost = quote_price * Decimal::from(edge.num_contracts);

        let position = Position {
            id: 0,
            market_id: edge.market_id,
            edge_analysis_id: edge.id,
            venue: venue_identity,
            side: edge.recommended_side,
            num_contracts: edge.num_contracts,
            entry_price: quote_price,
            total_cost,
            exit_price: None,
            pnl_dollars: None,
            pnl_percent: None,
            status: PositionStatus::Pending,
            venue_order_id,
            opened_at: chrono::Utc::now(),
            closed_at: None,
        };

        let id = self.store.insert_position_tx(&mut tx, &position).await?;
        tx.commit().await?;
        info!(position_id = id, market_id = edge.market_id, contracts = edge.num_contracts, "position opened (pending)");

        Ok(Position { id, ..position })
    }
}

/// Whether today's realized losses have already breached the daily
/// drawdown floor. Exposed standalone so the HTTP layer can report
/// kill-switch state in error bodies without duplicating the floor math.
pub async fn kill_switch_active(store: &Store, bankroll: Decimal, max_daily_drawdown_pct: Decimal) -> Result<bool, EngineError> {
    let realized_today = store.realized_pnl_today().await?;
    let floor = -(bankroll * max_daily_drawdown_pct);
    Ok(realized_today <= floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connect;
    use crate::types::{Market, Side};
    use rust_decimal_macros::dec;

    fn sample_edge(market_id: i64, tradeable: bool) -> EdgeAnalysis {
        EdgeAnalysis {
            id: 0,
            market_id,
            scan_id: "scan-1".to_string(),
            system_probability: dec!(0.6),
            market_price: dec!(0.45),
            edge: dec!(0.15),
            expected_value: dec!(0.1),
            kelly_fraction: dec!(0.2),
            half_kelly_fraction: dec!(0.1),
            position_size_dollars: dec!(50),
            num_contracts: 100,
            recommended_side: Side::Yes,
            tradeable,
            rejection_reason: None,
            debate_triggered: false,
            debate_transcript: None,
            estimates_divergence: dec!(0.02),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_safety_gate_blocks_non_tradeable() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = Store::new(pool);
        let executor = Executor::new(&store, dec!(10000), dec!(0.02));

        struct NullVenue;
        #[async_trait::async_trait]
        impl VenueClient for NullVenue {
            fn name(&self) -> &str { "null" }
            async fn list_markets(&self, _: Option<String>, _: u32) -> Result<(Vec<crate::platforms::VenueMarket>, Option<String>), EngineError> { unimplemented!() }
            async fn get_market(&self, _: &str) -> Result<crate::platforms::VenueMarket, EngineError> { unimplemented!() }
            async fn get_orderbook(&self, _: &str) -> Result<crate::platforms::Orderbook, EngineError> { unimplemented!() }
            async fn place_limit_order(&self, _: &str, _: Side, _: i64, _: Decimal) -> Result<String, EngineError> { Ok("order-1".to_string()) }
            async fn get_order(&self, _: &str) -> Result<crate::platforms::OrderStatus, EngineError> { unimplemented!() }
            async fn cancel_order(&self, _: &str) -> Result<(), EngineError> { unimplemented!() }
            async fn get_mid_price(&self, _: &str) -> Result<Decimal, EngineError> { unimplemented!() }
            async fn is_resolved(&self, _: &str) -> Result<(bool, Option<bool>), EngineError> { unimplemented!() }
        }

        let market = Market::sample();
        let (market_id, _) = store.upsert_market(&market).await.unwrap();

        let result = executor
            .execute(&NullVenue, crate::types::Venue::Kalshi, &sample_edge(market_id, false), "CPI-26Q1")
            .await;
        assert!(matches!(result, Err(EngineError::SafetyBlock(_))));
    }

    #[tokio::test]
    async fn test_daily_drawdown_floor_computation() {
        let bankroll = dec!(10000);
        let max_pct = dec!(0.02);
        let floor = -(bankroll * max_pct);
        assert_eq!(floor, dec!(-200));
    }
}
