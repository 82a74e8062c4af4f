//! Research desk — forms an independent estimate from current
//! information, explicitly told not to anchor on the market price.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use tracing::warn;

use super::extract::{clamp_probability, parse_estimate};
use super::{AnalystDeps, RoleEstimate};
use crate::types::{AnalystRole, MarketCategory};

const SYSTEM_PROMPT: &str = "You are a research analyst estimating probabilities for prediction markets.";

fn build_prompt(title: &str, description: &str, yes_price: Decimal, category: MarketCategory, search_results: &str) -> String {
    let implied_pct = (yes_price * dec!(100)).to_f64().unwrap_or(0.0);
    format!(
        "Market: \"{title}\"\n\
         Resolution criteria: \"{description}\"\n\
         Category: {category}\n\
         Current market price: {yes_price} (implies {implied_pct:.1}% probability)\n\n\
         Recent search results:\n{search_results}\n\n\
         Your job:\n\
         1. Use the search results to identify key factors that affect the outcome\n\
         2. Estimate the TRUE probability (0.00 to 1.00) based on your research\n\
         3. Do NOT anchor on the market price - form your own independent view\n\n\
         Return ONLY a JSON object with these exact keys:\n\
         {{\"probability\": 0.XX, \"confidence\": 0.XX, \"reasoning\": \"2-3 sentences\"}}"
    )
}

pub async fn estimate(
    deps: &AnalystDeps,
    title: &str,
    description: &str,
    yes_price: Decimal,
    category: MarketCategory,
) -> RoleEstimate {
    let search_results = match deps.search.search(title).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "research desk search failed, continuing without results");
            "No results found.".to_string()
        }
    };

    let prompt = build_prompt(title, description, yes_price, category, &search_results);

    match deps.llm.complete(SYSTEM_PROMPT, &prompt).await {
        Ok(raw) => {
            let parsed = parse_estimate(&raw);
            RoleEstimate {
                role: AnalystRole::Research,
                agent_name: "research_analyst".to_string(),
                probability: clamp_probability(parsed.probability.unwrap_or(yes_price)),
                confidence: parsed.confidence.unwrap_or(Decimal::new(5, 1)),
                reasoning: parsed.reasoning.unwrap_or_else(|| raw.chars().take(500).collect()),
                model_kind: None,
            }
        }
        Err(e) => {
            warn!(error = %e, "research desk failed");
            RoleEstimate {
                role: AnalystRole::Research,
                agent_name: "research_analyst".to_string(),
                probability: yes_price,
                confidence: Decimal::new(1, 1),
                reasoning: format!("Research desk failed: {e}"),
                model_kind: None,
            }
        }
    }
}
