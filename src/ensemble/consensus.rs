//! Consensus reducer — combines the three analyst roles' estimates into
//! a single provisional probability and decides whether a debate is
//! warranted.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use super::RoleEstimate;
use crate::strategy::edge::divergence;

#[derive(Debug, Clone)]
pub struct Reduced {
    pub system_probability: Decimal,
    pub divergence: Decimal,
    pub reasoning: String,
}

fn median(values: &[Decimal]) -> Decimal {
    let mut sorted = values.to_vec();
    sorted.sort();
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / dec!(2)
    }
}

fn confidence_weighted_mean(estimates: &[RoleEstimate]) -> Option<Decimal> {
    let total_weight: Decimal = estimates.iter().map(|e| e.confidence).sum();
    if total_weight <= Decimal::ZERO {
        return None;
    }
    let weighted: Decimal = estimates.iter().map(|e| e.probability * e.confidence).sum();
    Some(weighted / total_weight)
}

/// Reduce a set of analyst estimates to one provisional probability.
///
/// Low divergence: robust median, no debate needed. High divergence:
/// confidence-weighted mean as a provisional value pending debate
/// (falls back to median if confidences sum to zero).
pub fn reduce(estimates: &[RoleEstimate]) -> Reduced {
    if estimates.is_empty() {
        return Reduced {
            system_probability: Decimal::ZERO,
            divergence: Decimal::ZERO,
            reasoning: "No estimates produced.".to_string(),
        };
    }

    let probabilities: Vec<Decimal> = estimates.iter().map(|e| e.probability).collect();
    let div = divergence(&probabilities);

    use crate::config::constants::D_DEBATE;
    let (system_probability, method) = if div <= D_DEBATE {
        (median(&probabilities), "median")
    } else {
        let weighted = confidence_weighted_mean(estimates).unwrap_or_else(|| median(&probabilities));
        (weighted, "weighted_avg (pre-debate)")
    };

    let summary = estimates
        .iter()
        .map(|e| format!("{}: {} (conf={})", e.role, e.probability, e.confidence))
        .collect::<Vec<_>>()
        .join(", ");

    Reduced {
        system_probability: system_probability.round_dp(4),
        divergence: div.round_dp(4),
        reasoning: format!("Method: {method} | Divergence: {div} | Estimates: {summary}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnalystRole;

    fn est(role: AnalystRole, p: Decimal, c: Decimal) -> RoleEstimate {
        RoleEstimate {
            role,
            agent_name: format!("{role}"),
            probability: p,
            confidence: c,
            reasoning: String::new(),
            model_kind: None,
        }
    }

    #[test]
    fn test_low_divergence_uses_median() {
        let estimates = vec![
            est(AnalystRole::Research, dec!(0.48), dec!(0.5)),
            est(AnalystRole::BaseRate, dec!(0.52), dec!(0.5)),
            est(AnalystRole::Model, dec!(0.55), dec!(0.5)),
        ];
        let reduced = reduce(&estimates);
        assert_eq!(reduced.system_probability, dec!(0.52));
        assert_eq!(reduced.divergence, dec!(0.07));
    }

    #[test]
    fn test_high_divergence_uses_weighted_mean() {
        let estimates = vec![
            est(AnalystRole::Research, dec!(0.30), dec!(0.5)),
            est(AnalystRole::BaseRate, dec!(0.45), dec!(0.5)),
            est(AnalystRole::Model, dec!(0.60), dec!(0.5)),
        ];
        let reduced = reduce(&estimates);
        assert_eq!(reduced.divergence, dec!(0.30));
        // equal confidences -> weighted mean equals simple mean = 0.45
        assert_eq!(reduced.system_probability, dec!(0.45));
    }

    #[test]
    fn test_empty_estimates() {
        let reduced = reduce(&[]);
        assert_eq!(reduced.system_probability, Decimal::ZERO);
    }

    #[test]
    fn test_zero_confidence_falls_back_to_median() {
        let estimates = vec![
            est(AnalystRole::Research, dec!(0.30), Decimal::ZERO),
            est(AnalystRole::BaseRate, dec!(0.45), Decimal::ZERO),
            est(AnalystRole::Model, dec!(0.60), Decimal::ZERO),
        ];
        let reduced = reduce(&estimates);
        assert_eq!(reduced.system_probability, dec!(0.45));
    }

    #[test]
    fn test_consensus_idempotent_on_singleton() {
        let estimates = vec![est(AnalystRole::Model, dec!(0.6), dec!(0.5))];
        let reduced = reduce(&estimates);
        assert_eq!(reduced.system_probability, dec!(0.6));
        let reduced_again = reduce(&[est(AnalystRole::Model, reduced.system_probability, dec!(0.5))]);
        assert_eq!(reduced_again.system_probability, reduced.system_probability);
    }
}
