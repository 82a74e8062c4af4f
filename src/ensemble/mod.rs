//! Ensemble probability estimation.
//!
//! Three independent analyst roles produce a probability estimate for
//! a market in parallel; a consensus reducer combines them; a multi-round
//! debate protocol resolves sharp disagreement. Modeled as a small
//! directed graph with one shared state record, not a callback mesh:
//!
//! ```text
//! start -> {research, base_rate, model} (parallel)
//!       -> consensus
//!       -> (divergence > D_DEBATE) ? debate : end
//! debate -> end
//! ```

pub mod base_rate;
pub mod consensus;
pub mod debate;
pub mod extract;
pub mod model;
pub mod research;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::constants::D_DEBATE;
use crate::llm::openclaw::OpenclawClient;
use crate::llm::tavily::TavilyClient;
use crate::types::{AnalystRole, MarketCategory};

/// One analyst role's raw output before it is persisted as a
/// `ProbabilityEstimate`.
#[derive(Debug, Clone)]
pub struct RoleEstimate {
    pub role: AnalystRole,
    pub agent_name: String,
    pub probability: Decimal,
    pub confidence: Decimal,
    pub reasoning: String,
    pub model_kind: Option<String>,
}

/// One entry in a debate transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub round: u32,
    pub agent: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_probability: Option<Decimal>,
}

/// Full output of one market's estimation pipeline.
#[derive(Debug, Clone)]
pub struct EstimationOutcome {
    pub system_probability: Decimal,
    pub divergence: Decimal,
    pub debate_needed: bool,
    pub debate_converged: bool,
    pub debate_rounds: u32,
    pub transcript: Vec<TranscriptEntry>,
    pub consensus_reasoning: String,
    pub estimates: Vec<RoleEstimate>,
}

/// Shared backends the three analyst roles call through.
#[derive(Clone)]
pub struct AnalystDeps {
    pub llm: Arc<OpenclawClient>,
    pub search: Arc<TavilyClient>,
}

/// Run the full estimation pipeline for one market: parallel fan-out,
/// consensus reduction, and (if divergence exceeds `D_DEBATE`) a debate.
pub async fn run_estimation(
    deps: &AnalystDeps,
    title: &str,
    description: &str,
    yes_price: Decimal,
    category: MarketCategory,
) -> EstimationOutcome {
    let (research_est, base_rate_est, model_est) = tokio::join!(
        research::estimate(deps, title, description, yes_price, category),
        base_rate::estimate(deps, title, description, yes_price, category),
        model::estimate(title, description, yes_price, category, deps.llm.clone()),
    );

    let estimates = vec![research_est, base_rate_est, model_est];

    let reduced = consensus::reduce(&estimates);

    info!(
        title = %title,
        system_probability = %reduced.system_probability,
        divergence = %reduced.divergence,
        debate_needed = reduced.divergence > D_DEBATE,
        "ensemble consensus computed"
    );

    if reduced.divergence <= D_DEBATE {
        return EstimationOutcome {
            system_probability: reduced.system_probability,
            divergence: reduced.divergence,
            debate_needed: false,
            debate_converged: false,
            debate_rounds: 0,
            transcript: Vec::new(),
            consensus_reasoning: reduced.reasoning,
            estimates,
        };
    }

    let debate_result = debate::run_debate(deps, title, description, yes_price, category, &estimates).await;

    EstimationOutcome {
        system_probability: debate_result.consensus_probability,
        divergence: reduced.divergence,
        debate_needed: true,
        debate_converged: debate_result.converged,
        debate_rounds: debate_result.rounds_used,
        transcript: debate_result.transcript,
        consensus_reasoning: reduced.reasoning,
        estimates,
    }
}
