//! Best-effort extraction of structured fields from free-form LLM text.
//!
//! Every analyst role and every debate round produces text that is
//! *usually* JSON but not reliably so. These helpers try a JSON blob
//! first and fall back to labeled-number regex scans. Failure to
//! extract is never an error — callers supply their own defaults.

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::Deserialize;
use std::sync::OnceLock;

#[derive(Debug, Default, Deserialize)]
struct RawEstimateJson {
    probability: Option<f64>,
    confidence: Option<f64>,
    reasoning: Option<String>,
    sample_size: Option<i64>,
    model_type: Option<String>,
}

/// Fields pulled out of one analyst role's raw response.
#[derive(Debug, Default, Clone)]
pub struct ParsedEstimate {
    pub probability: Option<Decimal>,
    pub confidence: Option<Decimal>,
    pub reasoning: Option<String>,
    pub sample_size: Option<i64>,
    pub model_kind: Option<String>,
}

fn json_blob_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{[^{}]+\}").unwrap())
}

fn field_re(name: &str) -> Regex {
    Regex::new(&format!(r#"(?i){name}[\"']?\s*[:=]\s*([0-9.]+)"#)).unwrap()
}

/// Parse one analyst role's response into its constituent fields.
pub fn parse_estimate(raw: &str) -> ParsedEstimate {
    if let Some(m) = json_blob_re().find(raw) {
        if let Ok(parsed) = serde_json::from_str::<RawEstimateJson>(m.as_str()) {
            return ParsedEstimate {
                probability: parsed.probability.map(|p| Decimal::from_f64_retain(p).unwrap_or_default()),
                confidence: parsed.confidence.map(|c| Decimal::from_f64_retain(c).unwrap_or_default()),
                reasoning: parsed.reasoning,
                sample_size: parsed.sample_size,
                model_kind: parsed.model_type,
            };
        }
    }

    let mut out = ParsedEstimate::default();
    if let Some(caps) = field_re("probability").captures(raw) {
        out.probability = caps[1].parse::<f64>().ok().map(|v| Decimal::from_f64_retain(v).unwrap_or_default());
    }
    if let Some(caps) = field_re("confidence").captures(raw) {
        out.confidence = caps[1].parse::<f64>().ok().map(|v| Decimal::from_f64_retain(v).unwrap_or_default());
    }
    if let Some(caps) = Regex::new(r#"(?is)reasoning[\"']?\s*[:=]\s*["'](.+?)["']"#).unwrap().captures(raw) {
        out.reasoning = Some(caps[1].to_string());
    }
    if let Some(caps) = field_re("sample_size").captures(raw) {
        out.sample_size = caps[1].parse::<i64>().ok();
    }
    if let Some(caps) = Regex::new(r#"(?i)model_type[\"']?\s*[:=]\s*["'](.+?)["']"#).unwrap().captures(raw) {
        out.model_kind = Some(caps[1].to_string());
    }
    out
}

/// Clamp a probability into the valid analyst output range `[0.01, 0.99]`.
pub fn clamp_probability(p: Decimal) -> Decimal {
    p.clamp(Decimal::new(1, 2), Decimal::new(99, 2))
}

fn updated_probability_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)updated\s+(?:probability|estimate)[:\s]+([0-9]+\.?[0-9]*)").unwrap(),
            Regex::new(r"(?i)(?:my|revised|new|final)\s+(?:probability|estimate)[:\s]+([0-9]+\.?[0-9]*)").unwrap(),
            Regex::new(r"(?i)probability[:\s]+([0-9]+\.?[0-9]*)").unwrap(),
            Regex::new(r"(?i)([0-9]\.[0-9]{1,3})\s*(?:probability|chance|likelihood)").unwrap(),
        ]
    })
}

/// Extract an updated probability from a debate round response, trying
/// each labeled pattern in priority order. Percent-form numbers (1,100]
/// are divided by 100. Returns `None` if nothing matched or the parsed
/// value falls outside `(0, 100]` — the caller should leave the previous
/// round's probability unchanged in that case.
pub fn extract_updated_probability(text: &str) -> Option<Decimal> {
    for pattern in updated_probability_patterns() {
        if let Some(caps) = pattern.captures(text) {
            if let Ok(val) = caps[1].parse::<f64>() {
                if val > 0.0 && val < 1.0 {
                    return Some(Decimal::from_f64_retain(val).unwrap_or_default());
                } else if val > 1.0 && val <= 100.0 {
                    return Some(Decimal::from_f64_retain(val / 100.0).unwrap_or_default());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_json_blob() {
        let raw = r#"Some preamble {"probability": 0.62, "confidence": 0.7, "reasoning": "solid data"} trailing"#;
        let parsed = parse_estimate(raw);
        assert_eq!(parsed.probability, Some(dec!(0.62)));
        assert_eq!(parsed.confidence, Some(dec!(0.7)));
        assert_eq!(parsed.reasoning.as_deref(), Some("solid data"));
    }

    #[test]
    fn test_parse_key_value_fallback() {
        let raw = "probability: 0.4\nconfidence=0.55\nreasoning: \"uncertain outlook\"";
        let parsed = parse_estimate(raw);
        assert_eq!(parsed.probability, Some(dec!(0.4)));
        assert_eq!(parsed.confidence, Some(dec!(0.55)));
        assert_eq!(parsed.reasoning.as_deref(), Some("uncertain outlook"));
    }

    #[test]
    fn test_parse_unparseable_returns_empty() {
        let parsed = parse_estimate("the model produced no usable structure");
        assert!(parsed.probability.is_none());
    }

    #[test]
    fn test_clamp_probability() {
        assert_eq!(clamp_probability(dec!(1.5)), dec!(0.99));
        assert_eq!(clamp_probability(dec!(-0.2)), dec!(0.01));
        assert_eq!(clamp_probability(dec!(0.5)), dec!(0.5));
    }

    #[test]
    fn test_extract_updated_probability_labeled() {
        let text = "CRITIQUE: too optimistic\nUPDATED PROBABILITY: 0.42\nREASONING: adjusted for new data";
        assert_eq!(extract_updated_probability(text), Some(dec!(0.42)));
    }

    #[test]
    fn test_extract_updated_probability_percent_form() {
        let text = "my final estimate: 72";
        assert_eq!(extract_updated_probability(text), Some(dec!(0.72)));
    }

    #[test]
    fn test_extract_updated_probability_unparseable_is_none() {
        assert_eq!(extract_updated_probability("I have no numeric view to share"), None);
    }
}
