//! Position lifecycle: fill reconciliation, stop-loss enforcement, and
//! resolution settlement. Each sub-loop tolerates per-market/per-position
//! failure — log, skip, keep the batch's other mutations.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use crate::config::constants::STOP_LOSS_PCT;
use crate::errors::EngineError;
use crate::platforms::{OrderState, VenueClient};
use crate::storage::Store;
use crate::types::{CalibrationRecord, Position, PositionStatus, Side, Venue};

pub struct LifecycleManager<'a> {
    store: &'a Store,
    venues: &'a HashMap<Venue, Box<dyn VenueClient>>,
}

impl<'a> LifecycleManager<'a> {
    pub fn new(store: &'a Store, venues: &'a HashMap<Venue, Box<dyn VenueClient>>) -> Self {
        Self { store, venues }
    }

    fn venue_for(&self, venue: Venue) -> Option<&dyn VenueClient> {
        self.venues.get(&venue).map(|b| b.as_ref())
    }

    /// For every pending position with a `venue_order_id`, poll the venue
    /// for order status and transition accordingly.
    pub async fn reconcile_fills(&self) -> Result<usize, EngineError> {
        let pending = self.store.list_pending_positions_with_order().await?;
        let mut transitioned = 0;

        for position in pending {
            let Some(venue) = self.venue_for(position.venue) else {
                warn!(position_id = position.id, venue = %position.venue, "no venue client configured, skipping");
                continue;
            };
            let Some(order_id) = &position.venue_order_id else { continue };

            match venue.get_order(order_id).await {
                Ok(status) => match status.state {
                    OrderState::Filled | OrderState::PartiallyFilled if status.filled_count >= position.num_contracts => {
                        if let Err(e) = self.store.mark_position_open(position.id).await {
                            error!(position_id = position.id, error = %e, "failed to mark position open");
                            continue;
                        }
                        transitioned += 1;
                        info!(position_id = position.id, "position filled, now open");
                    }
                    OrderState::Cancelled | OrderState::Rejected => {
                        if let Err(e) = self.store.mark_position_cancelled(position.id, chrono::Utc::now()).await {
                            error!(position_id = position.id, error = %e, "failed to mark position cancelled");
                            continue;
                        }
                        transitioned += 1;
                        info!(position_id = position.id, "position cancelled at venue");
                    }
                    _ => {}
                },
                Err(e) => {
                    warn!(position_id = position.id, error = %e, "order status poll failed, leaving pending");
                }
            }
        }

        Ok(transitioned)
    }

    /// For every open position, check unrealized P&L against the
    /// stop-loss floor and close positions that breach it.
    pub async fn enforce_stop_loss(&self) -> Result<usize, EngineError> {
        let open = self.store.list_open_positions_only().await?;
        let mut closed = 0;

        for position in open {
            let Some(venue) = self.venue_for(position.venue) else {
                warn!(position_id = position.id, venue = %position.venue, "no venue client configured, skipping");
                continue;
            };

            let market = match self.store.get_market(position.market_id).await {
                Ok(Some(m)) => m,
                Ok(None) => {
                    warn!(position_id = position.id, "market not found, skipping stop-loss check");
                    continue;
                }
                Err(e) => {
                    error!(position_id = position.id, error = %e, "failed to load market");
                    continue;
                }
            };

            let current_yes = match venue.get_mid_price(&market.venue_market_id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(position_id = position.id, error = %e, "mid-price fetch failed, skipping");
                    continue;
                }
            };

            let unrealized = match position.side {
                Side::Yes => (current_yes - position.entry_price) * Decimal::from(position.num_contracts),
                Side::No => (position.entry_price - current_yes) * Decimal::from(position.num_contracts),
            };

            let floor = -(position.total_cost * STOP_LOSS_PCT);
            if unrealized < floor {
                let pnl_percent = if position.total_cost > Decimal::ZERO {
                    (unrealized / position.total_cost) * dec!(100)
                } else {
                    Decimal::ZERO
                };

                if let Err(e) = self
                    .store
                    .close_position(position.id, current_yes, unrealized, pnl_percent, PositionStatus::ClosedLoss, chrono::Utc::now())
                    .await
                {
                    error!(position_id = position.id, error = %e, "failed to record stop-loss close");
                    continue;
                }
                closed += 1;
                warn!(position_id = position.id, unrealized = %unrealized, "stop-loss triggered");
            }
        }

        Ok(closed)
    }

    /// For every active market with a live position, check venue
    /// resolution and settle all live positions + write a
    /// `CalibrationRecord`.
    pub async fn settle_resolutions(&self) -> Result<usize, EngineError> {
        let markets = self.store.active_markets_with_live_positions().await?;
        let mut settled = 0;

        for market in markets {
            let Some(venue) = self.venue_for(market.venue) else {
                warn!(market_id = market.id, venue = %market.venue, "no venue client configured, skipping");
                continue;
            };

            let (resolved, outcome) = match venue.is_resolved(&market.venue_market_id).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(market_id = market.id, error = %e, "resolution check failed, skipping");
                    continue;
                }
            };

            let (Some(outcome), true) = (outcome, resolved) else { continue };

            let positions = match self.store.list_positions_for_market(market.id).await {
                Ok(p) => p,
                Err(e) => {
                    error!(market_id = market.id, error = %e, "failed to load positions for settlement");
                    continue;
                }
            };

            // Market status, position settlements, and the calibration
            // record all commit together: a reader never sees a market
            // marked resolved with its positions still live.
            if let Err(e) = self.settle_market(&market, outcome, &positions).await {
                error!(market_id = market.id, error = %e, "failed to settle resolved market");
                continue;
            }

            settled += 1;
            info!(market_id = market.id, outcome, "market resolved and settled");
        }

        Ok(settled)
    }

    /// Settle one resolved market: status update, every live position's
    /// close, and the calibration record all inside a single transaction.
    async fn settle_market(&self, market: &crate::types::Market, outcome: bool, positions: &[Position]) -> Result<(), EngineError> {
        let edge = self.store.latest_edge_analysis_for_market(market.id).await?;
        let estimates = self.store.latest_estimates_by_role(market.id).await?;
        let record = build_calibration_record(market, outcome, edge, &estimates);

        let mut tx = self.store.begin().await?;

        self.store.mark_market_resolved_tx(&mut tx, market.id, outcome, chrono::Utc::now()).await?;

        for position in positions {
            settle_position_tx(self.store, &mut tx, position, outcome).await?;
        }

        self.store.insert_calibration_record_tx(&mut tx, &record).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Manually close a pending/open position at a supplied exit price.
    pub async fn close_manually(&self, position: &Position, exit_price: Decimal) -> Result<(), EngineError> {
        let pnl = match position.side {
            Side::Yes => (exit_price - position.entry_price) * Decimal::from(position.num_contracts),
            Side::No => (position.entry_price - exit_price) * Decimal::from(position.num_contracts),
        };
        let pnl_percent = if position.total_cost > Decimal::ZERO { (pnl / position.total_cost) * dec!(100) } else { Decimal::ZERO };

        self.store
            .close_position(position.id, exit_price, pnl, pnl_percent, PositionStatus::ClosedEarly, chrono::Utc::now())
            .await
    }
}

/// Settle one position within an already-open transaction.
async fn settle_position_tx(
    store: &Store,
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    position: &Position,
    outcome: bool,
) -> Result<(), EngineError> {
    let (pnl, status, exit_price) = match (outcome, position.side) {
        (true, Side::Yes) => ((Decimal::ONE - position.entry_price) * Decimal::from(position.num_contracts), PositionStatus::ClosedWin, Decimal::ONE),
        (true, Side::No) => (-position.total_cost, PositionStatus::ClosedLoss, Decimal::ZERO),
        (false, Side::No) => (position.entry_price * Decimal::from(position.num_contracts), PositionStatus::ClosedWin, Decimal::ZERO),
        (false, Side::Yes) => (-position.total_cost, PositionStatus::ClosedLoss, Decimal::ONE),
    };

    let pnl_percent = if position.total_cost > Decimal::ZERO { (pnl / position.total_cost) * dec!(100) } else { Decimal::ZERO };

    store.close_position_tx(tx, position.id, exit_price, pnl, pnl_percent, status, chrono::Utc::now()).await
}

/// Build the calibration record for a resolved market from its latest
/// edge analysis and estimates, read ahead of the settlement transaction.
fn build_calibration_record(
    market: &crate::types::Market,
    outcome: bool,
    edge: Option<crate::types::EdgeAnalysis>,
    estimates: &[crate::types::ProbabilityEstimate],
) -> CalibrationRecord {
    let find = |role: crate::types::AnalystRole| estimates.iter().find(|e| e.role == role).map(|e| e.probability);

    let system_probability = edge.as_ref().map(|e| e.system_probability).unwrap_or(market.yes_price);
    let market_price_at_entry = edge.as_ref().map(|e| e.market_price).unwrap_or(market.yes_price);
    let brier = crate::types::CalibrationRecord::brier(system_probability, outcome);

    CalibrationRecord {
        id: 0,
        market_id: market.id,
        system_probability,
        market_price_at_entry,
        actual_outcome: outcome,
        brier_score: brier,
        research_estimate: find(crate::types::AnalystRole::Research),
        base_rate_estimate: find(crate::types::AnalystRole::BaseRate),
        model_estimate: find(crate::types::AnalystRole::Model),
        category: market.category,
        resolved_at: chrono::Utc::now(),
    }
}
