//! Model desk — reasons from arithmetic alone (no external tools),
//! tagged with the quantitative framework it used.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use tracing::warn;

use super::extract::{clamp_probability, parse_estimate};
use super::RoleEstimate;
use crate::llm::openclaw::OpenclawClient;
use crate::types::{AnalystRole, MarketCategory};

const SYSTEM_PROMPT: &str = "You are a quantitative analyst building a statistical model for a prediction market.";

/// Self-reported confidence is capped here regardless of what the model
/// claims — a single model is never allowed above 0.85.
const MAX_SELF_REPORTED_CONFIDENCE: Decimal = dec!(0.85);

fn build_prompt(title: &str, description: &str, yes_price: Decimal, category: MarketCategory) -> String {
    let implied_pct = (yes_price * dec!(100)).to_f64().unwrap_or(0.0);
    format!(
        "Market: \"{title}\"\n\
         Resolution criteria: \"{description}\"\n\
         Category: {category}\n\
         Current market price: {yes_price} (implies {implied_pct:.1}% probability)\n\n\
         Your job:\n\
         1. Identify what quantitative framework best applies: Bayesian (prior + evidence), \
            threshold analysis, mean reversion, or trend extrapolation\n\
         2. Produce a calibrated probability. Be honest about uncertainty.\n\
         3. Do NOT simply copy the market price. Apply your own analysis.\n\n\
         Return ONLY a JSON object with these exact keys:\n\
         {{\"probability\": 0.XX, \"confidence\": 0.XX, \"reasoning\": \"2-3 sentences\", \"model_type\": \"bayesian|threshold|trend|mean_reversion\"}}"
    )
}

pub async fn estimate(
    title: &str,
    description: &str,
    yes_price: Decimal,
    category: MarketCategory,
    llm: Arc<OpenclawClient>,
) -> RoleEstimate {
    let prompt = build_prompt(title, description, yes_price, category);

    match llm.complete(SYSTEM_PROMPT, &prompt).await {
        Ok(raw) => {
            let parsed = parse_estimate(&raw);
            let confidence = parsed.confidence.unwrap_or(dec!(0.4)).min(MAX_SELF_REPORTED_CONFIDENCE);
            RoleEstimate {
                role: AnalystRole::Model,
                agent_name: "statistical_model".to_string(),
                probability: clamp_probability(parsed.probability.unwrap_or(yes_price)),
                confidence,
                reasoning: parsed.reasoning.unwrap_or_else(|| raw.chars().take(500).collect()),
                model_kind: Some(parsed.model_kind.unwrap_or_else(|| "statistical".to_string())),
            }
        }
        Err(e) => {
            warn!(error = %e, "model desk failed");
            RoleEstimate {
                role: AnalystRole::Model,
                agent_name: "statistical_model".to_string(),
                probability: yes_price,
                confidence: dec!(0.1),
                reasoning: format!("Model desk failed: {e}"),
                model_kind: Some("fallback".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_forbids_copying_market_price() {
        let prompt = build_prompt("Will X happen?", "resolves Y", dec!(0.3), MarketCategory::Crypto);
        assert!(prompt.contains("Do NOT simply copy"));
    }
}
