//! Edge detection and Kelly position sizing — the gate between a
//! probability estimate and a real order.
//!
//! A YES contract costs `market_price` and pays `$1.00` if YES. A NO
//! contract costs `1 - market_price` and pays `$1.00` if NO. This module
//! picks the underpriced side, runs the rejection taxonomy, and (if the
//! trade survives) sizes it with half-Kelly capped position sizing.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::config::constants::MAX_POSITION_PCT_CAP;
use crate::types::Side;

/// Everything the gate needs to evaluate one market.
#[derive(Debug, Clone)]
pub struct GateInputs {
    pub scan_id: String,
    pub market_id: i64,
    pub system_probability: Decimal,
    pub market_price: Decimal,
    pub bankroll: Decimal,
    pub min_edge: Decimal,
    pub max_position_pct: Decimal,
    pub estimates_divergence: Decimal,
    pub debate_triggered: bool,
    pub debate_transcript: Option<serde_json::Value>,
}

/// The gate's verdict for one market — everything `EdgeAnalysis` needs
/// except the id/timestamp the storage layer assigns on insert.
#[derive(Debug, Clone)]
pub struct EdgeVerdict {
    pub scan_id: String,
    pub market_id: i64,
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
}

/// Full-Kelly fraction: `(p_win*b - (1-p_win)) / b`, clamped to `[0,1]`.
pub fn kelly_criterion(p_win: Decimal, profit_if_win: Decimal, loss_if_lose: Decimal) -> Decimal {
    if loss_if_lose <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let b = profit_if_win / loss_if_lose;
    let raw = (p_win * b - (Decimal::ONE - p_win)) / b;
    raw.clamp(Decimal::ZERO, Decimal::ONE)
}

/// Expected value per unit stake: `p_win*profit - (1-p_win)*loss`.
pub fn expected_value(p_win: Decimal, profit_if_win: Decimal, loss_if_lose: Decimal) -> Decimal {
    p_win * profit_if_win - (Decimal::ONE - p_win) * loss_if_lose
}

/// Half-Kelly, hard-capped at `MAX_POSITION_PCT_CAP` (0.25).
pub fn half_kelly(p_win: Decimal, profit_if_win: Decimal, loss_if_lose: Decimal) -> Decimal {
    (kelly_criterion(p_win, profit_if_win, loss_if_lose) / dec!(2)).min(MAX_POSITION_PCT_CAP)
}

/// Run the full edge/Kelly gate for one market and produce its verdict.
pub fn evaluate_edge(inputs: GateInputs) -> EdgeVerdict {
    let p = inputs.system_probability;
    let m = inputs.market_price;

    let (side, p_win, profit_if_win, loss_if_lose) = if p > m {
        (Side::Yes, p, Decimal::ONE - m, m)
    } else {
        (Side::No, Decimal::ONE - p, m, Decimal::ONE - m)
    };

    let edge = (p - m).abs();

    let rejection_reason = if edge < inputs.min_edge {
        Some("edge below minimum".to_string())
    } else if p_win <= Decimal::ZERO || p_win >= Decimal::ONE {
        Some("invalid p_win".to_string())
    } else if profit_if_win <= Decimal::ZERO || loss_if_lose <= Decimal::ZERO {
        Some("invalid payoff structure".to_string())
    } else {
        None
    };

    if let Some(reason) = rejection_reason {
        debug!(
            market_id = inputs.market_id,
            scan_id = %inputs.scan_id,
            edge = %edge,
            reason = %reason,
            "edge gate rejected"
        );
        return EdgeVerdict {
            scan_id: inputs.scan_id,
            market_id: inputs.market_id,
            system_probability: p.round_dp(4),
            market_price: m.round_dp(4),
            edge: edge.round_dp(4),
            expected_value: Decimal::ZERO,
            kelly_fraction: Decimal::ZERO,
            half_kelly_fraction: Decimal::ZERO,
            position_size_dollars: Decimal::ZERO,
            num_contracts: 0,
            recommended_side: side,
            tradeable: false,
            rejection_reason: Some(reason),
            debate_triggered: inputs.debate_triggered,
            debate_transcript: inputs.debate_transcript,
            estimates_divergence: inputs.estimates_divergence.round_dp(4),
        };
    }

    let ev = expected_value(p_win, profit_if_win, loss_if_lose);
    let full_kelly = kelly_criterion(p_win, profit_if_win, loss_if_lose);
    let half_kelly_fraction = half_kelly(p_win, profit_if_win, loss_if_lose);

    let position_dollars =
        (half_kelly_fraction * inputs.bankroll).min(inputs.max_position_pct * inputs.bankroll);

    let contract_cost = if side == Side::Yes { m } else { Decimal::ONE - m };
    let num_contracts = if contract_cost > Decimal::ZERO {
        (position_dollars / contract_cost).floor().to_i64().unwrap_or(0)
    } else {
        0
    };

    let tradeable = ev > Decimal::ZERO && num_contracts > 0;
    let rejection_reason = if !tradeable {
        Some(format!("ev={ev} or contracts={num_contracts}"))
    } else {
        None
    };

    info!(
        market_id = inputs.market_id,
        scan_id = %inputs.scan_id,
        side = %side,
        edge = %edge,
        ev = %ev,
        kelly = %full_kelly,
        half_kelly = %half_kelly_fraction,
        position_dollars = %position_dollars,
        contracts = num_contracts,
        tradeable,
        "edge gate evaluated"
    );

    EdgeVerdict {
        scan_id: inputs.scan_id,
        market_id: inputs.market_id,
        system_probability: p.round_dp(4),
        market_price: m.round_dp(4),
        edge: edge.round_dp(4),
        expected_value: ev.round_dp(6),
        kelly_fraction: full_kelly.round_dp(6),
        half_kelly_fraction: half_kelly_fraction.round_dp(6),
        position_size_dollars: position_dollars.round_dp(2),
        num_contracts,
        recommended_side: side,
        tradeable,
        rejection_reason,
        debate_triggered: inputs.debate_triggered,
        debate_transcript: inputs.debate_transcript,
        estimates_divergence: inputs.estimates_divergence.round_dp(4),
    }
}

/// Max divergence between a set of probability estimates (`max - min`).
pub fn divergence(probabilities: &[Decimal]) -> Decimal {
    if probabilities.len() < 2 {
        return Decimal::ZERO;
    }
    let max = probabilities.iter().copied().fold(Decimal::MIN, Decimal::max);
    let min = probabilities.iter().copied().fold(Decimal::MAX, Decimal::min);
    max - min
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs(p: Decimal, m: Decimal, bankroll: Decimal) -> GateInputs {
        GateInputs {
            scan_id: "scan-1".to_string(),
            market_id: 1,
            system_probability: p,
            market_price: m,
            bankroll,
            min_edge: dec!(0.05),
            max_position_pct: dec!(0.05),
            estimates_divergence: Decimal::ZERO,
            debate_triggered: false,
            debate_transcript: None,
        }
    }

    #[test]
    fn test_yes_side_tradeable() {
        let verdict = evaluate_edge(base_inputs(dec!(0.70), dec!(0.55), dec!(10000)));
        assert_eq!(verdict.recommended_side, Side::Yes);
        assert_eq!(verdict.edge, dec!(0.15));
        assert!(verdict.expected_value > Decimal::ZERO);
        assert!(verdict.position_size_dollars <= dec!(500));
        assert!(verdict.tradeable);
    }

    #[test]
    fn test_no_side_tradeable() {
        let verdict = evaluate_edge(base_inputs(dec!(0.30), dec!(0.55), dec!(10000)));
        assert_eq!(verdict.recommended_side, Side::No);
        assert_eq!(verdict.edge, dec!(0.25));
        assert!(verdict.tradeable);
    }

    #[test]
    fn test_edge_too_small_rejected() {
        let verdict = evaluate_edge(base_inputs(dec!(0.52), dec!(0.50), dec!(10000)));
        assert!(!verdict.tradeable);
        assert!(verdict.rejection_reason.unwrap().contains("below minimum"));
        assert_eq!(verdict.num_contracts, 0);
        assert_eq!(verdict.position_size_dollars, Decimal::ZERO);
    }

    #[test]
    fn test_kelly_cap_limits_position_size() {
        let verdict = evaluate_edge(base_inputs(dec!(0.90), dec!(0.50), dec!(10000)));
        assert!(verdict.position_size_dollars <= dec!(500));
        assert!(verdict.half_kelly_fraction <= dec!(0.25));
    }

    #[test]
    fn test_kelly_criterion_certain_win() {
        let k = kelly_criterion(dec!(1.0), dec!(0.10), dec!(0.05));
        assert_eq!(k, Decimal::ONE);
    }

    #[test]
    fn test_kelly_criterion_never_negative() {
        let k = kelly_criterion(dec!(0.3), dec!(0.10), dec!(0.10));
        assert_eq!(k, Decimal::ZERO);
    }

    #[test]
    fn test_half_kelly_is_half_of_full() {
        let full = kelly_criterion(dec!(0.6), dec!(0.10), dec!(0.05));
        let half = half_kelly(dec!(0.6), dec!(0.10), dec!(0.05));
        assert_eq!(half, (full / dec!(2)).min(MAX_POSITION_PCT_CAP));
    }

    #[test]
    fn test_half_kelly_cap_at_25_pct() {
        let half = half_kelly(dec!(0.99), dec!(10.0), dec!(0.01));
        assert!(half <= dec!(0.25));
    }

    #[test]
    fn test_expected_value_certain_win() {
        let ev = expected_value(dec!(1.0), dec!(0.10), dec!(0.05));
        assert_eq!(ev, dec!(0.10));
    }

    #[test]
    fn test_expected_value_certain_loss() {
        let ev = expected_value(dec!(0.0), dec!(0.10), dec!(0.05));
        assert_eq!(ev, dec!(-0.05));
    }

    #[test]
    fn test_divergence_of_singleton_is_zero() {
        assert_eq!(divergence(&[dec!(0.5)]), Decimal::ZERO);
    }

    #[test]
    fn test_divergence_matches_max_minus_min() {
        let probs = vec![dec!(0.48), dec!(0.52), dec!(0.55)];
        assert_eq!(divergence(&probs), dec!(0.07));
    }

    #[test]
    fn test_rejection_carries_no_sizing() {
        let verdict = evaluate_edge(base_inputs(dec!(0.50), dec!(0.50), dec!(10000)));
        assert!(!verdict.tradeable);
        assert_eq!(verdict.num_contracts, 0);
        assert_eq!(verdict.kelly_fraction, Decimal::ZERO);
        assert_eq!(verdict.half_kelly_fraction, Decimal::ZERO);
    }
}
