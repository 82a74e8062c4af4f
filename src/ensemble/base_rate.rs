//! Base-rate desk — estimates purely from historical frequencies,
//! forbidden from using current sentiment or news.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use super::extract::{clamp_probability, parse_estimate};
use super::{AnalystDeps, RoleEstimate};
use crate::types::{AnalystRole, MarketCategory};

const SYSTEM_PROMPT: &str = "You are a statistical analyst focused on base rates and historical frequencies.";

fn build_prompt(title: &str, category: MarketCategory, search_results: &str) -> String {
    format!(
        "Market: \"{title}\"\n\
         Category: {category}\n\n\
         Historical/base-rate search results:\n{search_results}\n\n\
         Your job:\n\
         1. Find the historical base rate for this type of event\n\
         2. Adjust for any known trend or structural change\n\
         3. Produce a probability based PURELY on historical frequencies\n\n\
         Do NOT use current news or sentiment. Only historical data and frequencies.\n\n\
         Return ONLY a JSON object with these exact keys:\n\
         {{\"probability\": 0.XX, \"confidence\": 0.XX, \"reasoning\": \"2-3 sentences about the base rate\", \"sample_size\": N}}"
    )
}

pub async fn estimate(
    deps: &AnalystDeps,
    title: &str,
    _description: &str,
    yes_price: Decimal,
    category: MarketCategory,
) -> RoleEstimate {
    let search_results = match deps.search.search(&format!("historical base rate {title}")).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "base rate desk search failed, continuing without results");
            "No results found.".to_string()
        }
    };

    let prompt = build_prompt(title, category, &search_results);

    match deps.llm.complete(SYSTEM_PROMPT, &prompt).await {
        Ok(raw) => {
            let parsed = parse_estimate(&raw);
            RoleEstimate {
                role: AnalystRole::BaseRate,
                agent_name: "base_rate_analyst".to_string(),
                probability: clamp_probability(parsed.probability.unwrap_or(yes_price)),
                confidence: parsed.confidence.unwrap_or(dec!(0.4)),
                reasoning: parsed.reasoning.unwrap_or_else(|| raw.chars().take(500).collect()),
                model_kind: None,
            }
        }
        Err(e) => {
            warn!(error = %e, "base rate desk failed");
            RoleEstimate {
                role: AnalystRole::BaseRate,
                agent_name: "base_rate_analyst".to_string(),
                probability: yes_price,
                confidence: dec!(0.1),
                reasoning: format!("Base rate desk failed: {e}"),
                model_kind: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_forbids_sentiment() {
        let prompt = build_prompt("Will X happen?", MarketCategory::Weather, "no results");
        assert!(prompt.contains("Do NOT use current news"));
    }
}
