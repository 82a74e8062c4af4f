//! Per-market analysis pipeline: ensemble estimation → edge/Kelly gate
//! → trade execution. The piece strategy's own orchestrator TODO
//! describes ("pipelines edge detection → Kelly sizing → risk checks →
//! bet selection"), now wired end to end against the venues and store.

use std::collections::HashMap;

use tracing::info;

use crate::ensemble::{self, AnalystDeps};
use crate::engine::executor::Executor;
use crate::errors::EngineError;
use crate::platforms::VenueClient;
use crate::storage::Store;
use crate::strategy::edge::{evaluate_edge, GateInputs};
use crate::types::{EdgeAnalysis, Market, ProbabilityEstimate, Venue};

#[derive(Clone)]
pub struct AnalysisSettings {
    pub bankroll: rust_decimal::Decimal,
    pub min_edge: rust_decimal::Decimal,
    pub max_position_pct: rust_decimal::Decimal,
    pub max_daily_drawdown_pct: rust_decimal::Decimal,
}

/// Consolidated result of analyzing one market: the ensemble's
/// estimates, the edge gate's verdict, and what (if anything) got
/// executed. Returned to the HTTP layer as a single JSON body.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MarketAnalysisReport {
    pub market_id: i64,
    pub estimates: Vec<ProbabilityEstimate>,
    pub debate_triggered: bool,
    pub debate_transcript: Option<serde_json::Value>,
    pub edge: EdgeAnalysis,
    pub executed: bool,
    pub execution_error: Option<String>,
}

/// Run the same pipeline for a single market, used by the on-demand
/// `POST /analyze/{market_id}` endpoint. `execute` gates whether a
/// tradeable verdict actually places an order.
pub async fn analyze_market(
    store: &Store,
    venues: &HashMap<Venue, Box<dyn VenueClient>>,
    deps: &AnalystDeps,
    scan_id: &str,
    market_id: i64,
    settings: &AnalysisSettings,
    execute: bool,
) -> Result<MarketAnalysisReport, EngineError> {
    let market = store
        .get_market(market_id)
        .await?
        .ok_or_else(|| EngineError::ConsistencyError(format!("market {market_id} not found")))?;
    analyze_one(store, venues, deps, scan_id, &market, settings, execute).await
}

async fn analyze_one(
    store: &Store,
    venues: &HashMap<Venue, Box<dyn VenueClient>>,
    deps: &AnalystDeps,
    scan_id: &str,
    market: &Market,
    settings: &AnalysisSettings,
    execute: bool,
) -> Result<MarketAnalysisReport, EngineError> {
    let outcome = ensemble::run_estimation(deps, &market.title, &market.description, market.yes_price, market.category).await;

    let mut estimates = Vec::with_capacity(outcome.estimates.len());
    for est in &outcome.estimates {
        let record = ProbabilityEstimate {
            id: 0,
            market_id: market.id,
            scan_id: scan_id.to_string(),
            role: est.role,
            agent_name: est.agent_name.clone(),
            probability: est.probability,
            confidence: est.confidence,
            reasoning: est.reasoning.clone(),
            model_kind: est.model_kind.clone(),
            created_at: chrono::Utc::now(),
        };
        let id = store.insert_probability_estimate(&record).await?;
        estimates.push(ProbabilityEstimate { id, ..record });
    }

    let debate_transcript =
        if outcome.transcript.is_empty() { None } else { Some(serde_json::to_value(&outcome.transcript)?) };

    let gate_inputs = GateInputs {
        scan_id: scan_id.to_string(),
        market_id: market.id,
        system_probability: outcome.system_probability,
        market_price: market.yes_price,
        bankroll: settings.bankroll,
        min_edge: settings.min_edge,
        max_position_pct: settings.max_position_pct,
        estimates_divergence: outcome.divergence,
        debate_triggered: outcome.debate_needed,
        debate_transcript: debate_transcript.clone(),
    };

    let verdict = evaluate_edge(gate_inputs);

    let edge_record = EdgeAnalysis {
        id: 0,
        market_id: market.id,
        scan_id: scan_id.to_string(),
        system_probability: verdict.system_probability,
        market_price: verdict.market_price,
        edge: verdict.edge,
        expected_value: verdict.expected_value,
        kelly_fraction: verdict.kelly_fraction,
        half_kelly_fraction: verdict.half_kelly_fraction,
        position_size_dollars: verdict.position_size_dollars,
        num_contracts: verdict.num_contracts,
        recommended_side: verdict.recommended_side,
        tradeable: verdict.tradeable,
        rejection_reason: verdict.rejection_reason.clone(),
        debate_triggered: verdict.debate_triggered,
        debate_transcript: verdict.debate_transcript.clone(),
        estimates_divergence: verdict.estimates_divergence,
        created_at: chrono::Utc::now(),
    };
    let edge_id = store.insert_edge_analysis(&edge_record).await?;
    let edge_with_id = EdgeAnalysis { id: edge_id, ..edge_record };

    if !verdict.tradeable || !execute {
        if !verdict.tradeable {
            info!(market_id = market.id, reason = ?verdict.rejection_reason, "edge gate did not clear, no trade");
        }
        return Ok(MarketAnalysisReport {
            market_id: market.id,
            estimates,
            debate_triggered: verdict.debate_triggered,
            debate_transcript,
            edge: edge_with_id,
            executed: false,
            execution_error: None,
        });
    }

    let Some(client) = venues.get(&market.venue) else {
        return Err(EngineError::ConsistencyError(format!("no venue client configured for {}", market.venue)));
    };

    let executor = Executor::new(store, settings.bankroll, settings.max_daily_drawdown_pct);
    let (executed, execution_error) = match executor.execute(client.as_ref(), market.venue, &edge_with_id, &market.venue_market_id).await {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    Ok(MarketAnalysisReport {
        market_id: market.id,
        estimates,
        debate_triggered: verdict.debate_triggered,
        debate_transcript,
        edge: edge_with_id,
        executed,
        execution_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_construction() {
        use rust_decimal_macros::dec;
        let s = AnalysisSettings {
            bankroll: dec!(10000),
            min_edge: dec!(0.05),
            max_position_pct: dec!(0.05),
            max_daily_drawdown_pct: dec!(0.02),
        };
        assert_eq!(s.bankroll, dec!(10000));
    }
}
