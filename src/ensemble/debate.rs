//! Multi-round debate protocol — runs only when the consensus reducer
//! flags divergence above `D_DEBATE`. Rounds converge when the spread
//! of current probabilities drops to `D_CONVERGED` or below; otherwise
//! the debate exhausts at `R_MAX` and a moderator rules by confidence-
//! weighted average pulled 10% toward 0.5.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use tracing::info;

use super::extract::extract_updated_probability;
use super::{AnalystDeps, RoleEstimate, TranscriptEntry};
use crate::config::constants::{D_CONVERGED, R_MAX};
use crate::strategy::edge::divergence;
use crate::types::MarketCategory;

pub struct DebateResult {
    pub consensus_probability: Decimal,
    pub converged: bool,
    pub rounds_used: u32,
    pub transcript: Vec<TranscriptEntry>,
}

/// Run the round-robin debate and return the final ruling.
pub async fn run_debate(
    deps: &AnalystDeps,
    title: &str,
    description: &str,
    yes_price: Decimal,
    category: MarketCategory,
    estimates: &[RoleEstimate],
) -> DebateResult {
    let mut transcript = Vec::new();
    let mut current: Vec<Decimal> = estimates.iter().map(|e| e.probability).collect();
    let initial_confidences: Vec<Decimal> = estimates.iter().map(|e| e.confidence).collect();
    let agent_names: Vec<String> = estimates.iter().map(|e| e.agent_name.clone()).collect();

    // Round 1: opening statements (no re-estimation).
    for (i, est) in estimates.iter().enumerate() {
        transcript.push(TranscriptEntry {
            round: 1,
            agent: agent_names[i].clone(),
            entry_type: "opening".to_string(),
            message: format!(
                "My estimate for '{title}' is {:.3}. Reasoning: {}",
                current[i].to_f64().unwrap_or(0.0),
                est.reasoning
            ),
            updated_probability: None,
        });
    }
    info!(title = %title, desks = estimates.len(), "debate round 1: opening statements");

    let mut rounds_used: u32 = 1;
    let mut converged = false;

    for round_num in 2..=R_MAX {
        if divergence(&current) <= D_CONVERGED {
            converged = true;
            break;
        }
        rounds_used = round_num;

        let context = build_round_context(title, description, yes_price, category, &agent_names, &current, &transcript);

        for (i, agent) in agent_names.iter().enumerate() {
            let prompt = if round_num == 2 {
                format!(
                    "{context}\n\nYou are the {agent} desk. You must critique ONE other agent's estimate.\n\
                     Pick the estimate you disagree with most and explain why their reasoning is flawed.\n\
                     Then state your UPDATED probability (it can stay the same or change).\n\n\
                     Format your response as:\n\
                     CRITIQUE: [which desk you're critiquing and why]\n\
                     UPDATED PROBABILITY: [0.XX]\n\
                     REASONING: [1-2 sentences]"
                )
            } else {
                format!(
                    "{context}\n\nYou are the {agent} desk. Based on the critiques and arguments so far:\n\
                     1. Have any valid points changed your view?\n\
                     2. What is your UPDATED probability estimate?\n\
                     3. Be willing to concede if the evidence is strong, but defend if you have data.\n\n\
                     Format your response as:\n\
                     RESPONSE: [address the strongest counter-argument]\n\
                     UPDATED PROBABILITY: [0.XX]\n\
                     REASONING: [1-2 sentences]"
                )
            };

            let entry_type = if round_num == 2 { "critique" } else { "defense" };

            match deps.llm.complete("You are a participant in a structured debate among market analysts.", &prompt).await {
                Ok(response) => {
                    if let Some(updated) = extract_updated_probability(&response) {
                        current[i] = updated;
                    }
                    transcript.push(TranscriptEntry {
                        round: round_num,
                        agent: agent.clone(),
                        entry_type: entry_type.to_string(),
                        message: response.chars().take(500).collect(),
                        updated_probability: Some(current[i]),
                    });
                }
                Err(e) => {
                    transcript.push(TranscriptEntry {
                        round: round_num,
                        agent: agent.clone(),
                        entry_type: "error".to_string(),
                        message: format!("Failed to respond: {e}"),
                        updated_probability: None,
                    });
                }
            }
        }

        info!(title = %title, round = round_num, estimates = ?current, "debate round complete");
    }

    if !converged {
        converged = divergence(&current) <= D_CONVERGED;
    }

    let consensus = if converged {
        median(&current)
    } else {
        let total_weight: Decimal = initial_confidences.iter().copied().sum();
        let weighted = if total_weight > Decimal::ZERO {
            current
                .iter()
                .zip(initial_confidences.iter())
                .map(|(p, c)| *p * *c)
                .sum::<Decimal>()
                / total_weight
        } else {
            median(&current)
        };
        let pulled = weighted * dec!(0.9) + dec!(0.5) * dec!(0.1);

        transcript.push(TranscriptEntry {
            round: R_MAX + 1,
            agent: "moderator".to_string(),
            entry_type: "final_ruling".to_string(),
            message: format!(
                "Agents did not converge after {R_MAX} rounds. Final estimates: {:?}. \
                 Using confidence-weighted average with conservative bias: {:.3}.",
                current.iter().map(|d| d.to_f64().unwrap_or(0.0)).collect::<Vec<_>>(),
                pulled.to_f64().unwrap_or(0.0)
            ),
            updated_probability: Some(pulled),
        });

        pulled
    };

    info!(
        title = %title,
        consensus = %consensus,
        converged,
        rounds = rounds_used,
        "debate complete"
    );

    DebateResult {
        consensus_probability: consensus.round_dp(4),
        converged,
        rounds_used,
        transcript,
    }
}

fn build_round_context(
    title: &str,
    description: &str,
    yes_price: Decimal,
    category: MarketCategory,
    agents: &[String],
    current: &[Decimal],
    transcript: &[TranscriptEntry],
) -> String {
    let mut ctx = format!(
        "Market: \"{title}\"\nDescription: \"{description}\"\nCategory: {category}\nCurrent market price: {yes_price}\n\nCurrent estimates:\n"
    );
    for (agent, p) in agents.iter().zip(current.iter()) {
        ctx.push_str(&format!("  {agent}: {:.3}\n", p.to_f64().unwrap_or(0.0)));
    }
    ctx.push_str("\nDebate transcript so far:\n");
    let window = agents.len() * 2;
    let start = transcript.len().saturating_sub(window);
    for entry in &transcript[start..] {
        let snippet: String = entry.message.chars().take(300).collect();
        ctx.push_str(&format!("  [{}] {snippet}\n", entry.agent));
    }
    ctx
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd() {
        assert_eq!(median(&[dec!(0.3), dec!(0.5), dec!(0.7)]), dec!(0.5));
    }

    #[test]
    fn test_median_even() {
        assert_eq!(median(&[dec!(0.3), dec!(0.5)]), dec!(0.4));
    }

    #[test]
    fn test_build_round_context_includes_all_agents() {
        let ctx = build_round_context(
            "Will X?",
            "desc",
            dec!(0.5),
            MarketCategory::Sports,
            &["research".to_string(), "model".to_string()],
            &[dec!(0.3), dec!(0.6)],
            &[],
        );
        assert!(ctx.contains("research"));
        assert!(ctx.contains("model"));
    }
}
