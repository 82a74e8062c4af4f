//! Polymarket venue client.
//!
//! Gamma API (market discovery, no auth) + CLOB API (orderbook, no
//! auth; order placement requires pre-issued wallet credentials sent
//! as `POLY-ADDRESS` / `POLY-SIGNATURE` / `POLY-TIMESTAMP` headers,
//! not signed per-request).

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::platforms::{categorize_from_title, OrderState, OrderStatus, Orderbook, VenueClient, VenueMarket};
use crate::types::Side;

const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
const CLOB_API_URL: &str = "https://clob.polymarket.com";
const TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Deserialize, Clone)]
#[allow(dead_code)]
struct GammaMarket {
    #[serde(default, rename = "conditionId")]
    condition_id: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    slug: String,
    #[serde(default, rename = "endDate")]
    end_date: Option<String>,
    #[serde(default, rename = "outcomePrices")]
    outcome_prices: Option<String>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default, rename = "volumeNum")]
    volume_num: Option<f64>,
    #[serde(default, rename = "bestBid")]
    best_bid: Option<f64>,
    #[serde(default, rename = "bestAsk")]
    best_ask: Option<f64>,
}

fn parse_outcome_prices(s: &str) -> Option<(Decimal, Decimal)> {
    let cleaned = s.replace(['[', ']', '"', '\\'], "");
    let parts: Vec<&str> = cleaned.split(',').map(|p| p.trim()).collect();
    if parts.len() >= 2 {
        let yes = Decimal::from_str(parts[0]).ok()?;
        let no = Decimal::from_str(parts[1]).ok()?;
        Some((yes, no))
    } else {
        None
    }
}

fn into_venue_market(gm: GammaMarket) -> Option<VenueMarket> {
    if gm.condition_id.is_empty() || gm.question.is_empty() {
        return None;
    }

    let (yes_price, no_price) = parse_outcome_prices(gm.outcome_prices.as_deref().unwrap_or(""))
        .unwrap_or((Decimal::new(5, 1), Decimal::new(5, 1)));

    let bid = gm.best_bid.and_then(Decimal::from_f64_retain).unwrap_or(yes_price);
    let ask = gm.best_ask.and_then(Decimal::from_f64_retain).unwrap_or(yes_price);
    let spread = (ask - bid).abs();

    let close_time = gm.end_date.as_deref().and_then(|d| {
        chrono::DateTime::parse_from_rfc3339(d)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
    });

    let volume = gm
        .volume
        .or(gm.volume_num)
        .and_then(Decimal::from_f64_retain)
        .unwrap_or(Decimal::ZERO);

    Some(VenueMarket {
        venue_market_id: gm.condition_id,
        venue_event_id: None,
        title: gm.question.clone(),
        category_hint: categorize_from_title(&gm.question),
        description: gm.description,
        resolution_source: None,
        yes_price,
        no_price,
        spread,
        volume_24h: volume,
        close_time,
    })
}

pub struct PolymarketClient {
    http: Client,
    private_key: Option<String>,
    safe_address: Option<String>,
}

impl PolymarketClient {
    /// Read-only client — no credentials, suitable for market scanning.
    pub fn new_read_only() -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(EngineError::Http)?;
        Ok(Self { http, private_key: None, safe_address: None })
    }

    pub fn new_with_credentials(private_key: String, safe_address: String) -> Result<Self, EngineError> {
        let mut client = Self::new_read_only()?;
        client.private_key = Some(private_key);
        client.safe_address = Some(safe_address);
        Ok(client)
    }

    fn require_credentials(&self) -> Result<(&str, &str), EngineError> {
        match (&self.private_key, &self.safe_address) {
            (Some(k), Some(a)) => Ok((k.as_str(), a.as_str())),
            _ => Err(EngineError::AuthConfigError("Polymarket credentials not configured".to_string())),
        }
    }

    /// Pre-issued credential headers — not signed per request.
    fn auth_headers(&self) -> Result<Vec<(&'static str, String)>, EngineError> {
        let (private_key, safe_address) = self.require_credentials()?;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        Ok(vec![
            ("POLY-ADDRESS", safe_address.to_string()),
            ("POLY-SIGNATURE", private_key.to_string()),
            ("POLY-TIMESTAMP", timestamp),
        ])
    }
}

#[async_trait]
impl VenueClient for PolymarketClient {
    fn name(&self) -> &str {
        "polymarket"
    }

    async fn list_markets(
        &self,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<(Vec<VenueMarket>, Option<String>), EngineError> {
        let offset = cursor.and_then(|c| c.parse::<u32>().ok()).unwrap_or(0);

        let resp = self
            .http
            .get(format!("{GAMMA_API_URL}/markets"))
            .query(&[
                ("active", "true"),
                ("closed", "false"),
                ("limit", &limit.to_string()),
                ("offset", &offset.to_string()),
            ])
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        if !resp.status().is_success() {
            return Err(EngineError::TransientVenueError {
                venue: "polymarket".to_string(),
                message: format!("list_markets HTTP {}", resp.status()),
            });
        }

        let raw: Vec<GammaMarket> = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        let fetched = raw.len() as u32;
        let markets: Vec<VenueMarket> = raw.into_iter().filter_map(into_venue_market).collect();
        let next_cursor = if fetched < limit { None } else { Some((offset + limit).to_string()) };
        Ok((markets, next_cursor))
    }

    async fn get_market(&self, venue_market_id: &str) -> Result<VenueMarket, EngineError> {
        let resp = self
            .http
            .get(format!("{GAMMA_API_URL}/markets"))
            .query(&[("condition_ids", venue_market_id)])
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        let raw: Vec<GammaMarket> = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        raw.into_iter()
            .find_map(into_venue_market)
            .ok_or_else(|| EngineError::PermanentVenueError {
                venue: "polymarket".to_string(),
                message: format!("market {venue_market_id} not found"),
            })
    }

    async fn get_orderbook(&self, venue_market_id: &str) -> Result<Orderbook, EngineError> {
        #[derive(Deserialize)]
        struct BookResp {
            bids: Vec<BookLevel>,
            asks: Vec<BookLevel>,
        }
        #[derive(Deserialize)]
        struct BookLevel {
            price: String,
            #[allow(dead_code)]
            size: String,
        }

        let resp = self
            .http
            .get(format!("{CLOB_API_URL}/book"))
            .query(&[("token_id", venue_market_id)])
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        let parsed: BookResp = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        let yes_bid = parsed.bids.first().and_then(|l| Decimal::from_str(&l.price).ok()).unwrap_or(Decimal::new(5, 1));
        let yes_ask = parsed.asks.first().and_then(|l| Decimal::from_str(&l.price).ok()).unwrap_or(Decimal::new(5, 1));

        Ok(Orderbook {
            yes_bid,
            yes_ask,
            no_bid: Decimal::ONE - yes_ask,
            no_ask: Decimal::ONE - yes_bid,
        })
    }

    async fn place_limit_order(
        &self,
        venue_market_id: &str,
        side: Side,
        count: i64,
        price: Decimal,
    ) -> Result<String, EngineError> {
        let headers = self.auth_headers()?;

        #[derive(serde::Serialize)]
        struct OrderRequest<'a> {
            token_id: &'a str,
            side: &'a str,
            price: String,
            size: i64,
            order_type: &'a str,
        }

        let body = OrderRequest {
            token_id: venue_market_id,
            side: match side {
                Side::Yes => "BUY",
                Side::No => "SELL",
            },
            price: price.to_string(),
            size: count,
            order_type: "GTC",
        };

        let mut req = self.http.post(format!("{CLOB_API_URL}/order")).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(venue = "polymarket", %status, %text, "order placement rejected");
            return Err(EngineError::PermanentVenueError {
                venue: "polymarket".to_string(),
                message: format!("order rejected {status}: {text}"),
            });
        }

        #[derive(Deserialize)]
        struct OrderResp {
            #[serde(rename = "orderID")]
            order_id: String,
        }
        let parsed: OrderResp = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;
        Ok(parsed.order_id)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, EngineError> {
        let headers = self.auth_headers()?;
        let mut req = self.http.get(format!("{CLOB_API_URL}/order/{order_id}"));
        for (k, v) in headers {
            req = req.header(k, v);
        }

        #[derive(Deserialize)]
        struct OrderDetail {
            id: String,
            status: String,
            #[serde(default, rename = "sizeMatched")]
            size_matched: Option<String>,
            price: Option<String>,
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;
        let parsed: OrderDetail = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        let state = match parsed.status.as_str() {
            "LIVE" => OrderState::Open,
            "MATCHED" => OrderState::Filled,
            "CANCELED" => OrderState::Cancelled,
            _ => OrderState::Rejected,
        };

        let filled_count = parsed
            .size_matched
            .as_deref()
            .and_then(|s| Decimal::from_str(s).ok())
            .and_then(|d| d.to_i64())
            .unwrap_or(0);

        Ok(OrderStatus {
            order_id: parsed.id,
            state,
            filled_count,
            avg_fill_price: parsed.price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        let headers = self.auth_headers()?;
        let mut req = self.http.delete(format!("{CLOB_API_URL}/order/{order_id}"));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;
        if !resp.status().is_success() {
            return Err(EngineError::PermanentVenueError {
                venue: "polymarket".to_string(),
                message: format!("cancel failed: {}", resp.status()),
            });
        }
        Ok(())
    }

    async fn get_mid_price(&self, venue_market_id: &str) -> Result<Decimal, EngineError> {
        let market = self.get_market(venue_market_id).await?;
        debug!(condition_id = %venue_market_id, price = %market.yes_price, "polymarket mid price");
        Ok((market.yes_price + (Decimal::ONE - market.no_price)) / Decimal::new(2, 0))
    }

    async fn is_resolved(&self, venue_market_id: &str) -> Result<(bool, Option<bool>), EngineError> {
        #[derive(Deserialize)]
        struct ResolvedGamma {
            closed: bool,
            #[serde(default, rename = "outcomePrices")]
            outcome_prices: Option<String>,
        }
        let resp = self
            .http
            .get(format!("{GAMMA_API_URL}/markets"))
            .query(&[("condition_ids", venue_market_id)])
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;
        let raw: Vec<ResolvedGamma> = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "polymarket".to_string(), message: e.to_string() })?;

        let Some(m) = raw.into_iter().next() else {
            return Err(EngineError::PermanentVenueError {
                venue: "polymarket".to_string(),
                message: format!("market {venue_market_id} not found"),
            });
        };

        if !m.closed {
            return Ok((false, None));
        }

        let outcome = parse_outcome_prices(m.outcome_prices.as_deref().unwrap_or("")).map(|(yes, _)| yes > Decimal::new(5, 1));
        Ok((true, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_outcome_prices_json_format() {
        let (yes, no) = parse_outcome_prices("[\"0.65\",\"0.35\"]").unwrap();
        assert_eq!(yes, dec!(0.65));
        assert_eq!(no, dec!(0.35));
    }

    #[test]
    fn test_parse_outcome_prices_empty() {
        assert!(parse_outcome_prices("").is_none());
    }

    #[test]
    fn test_into_venue_market_rejects_empty_condition() {
        let gm = GammaMarket {
            condition_id: String::new(),
            question: "Test?".to_string(),
            description: String::new(),
            slug: "test".to_string(),
            end_date: None,
            outcome_prices: Some("[\"0.5\",\"0.5\"]".to_string()),
            volume: Some(5000.0),
            volume_num: None,
            best_bid: None,
            best_ask: None,
        };
        assert!(into_venue_market(gm).is_none());
    }

    #[test]
    fn test_into_venue_market_valid() {
        let gm = GammaMarket {
            condition_id: "0xabc123".to_string(),
            question: "Will Bitcoin hit $100k?".to_string(),
            description: "Resolves YES if...".to_string(),
            slug: "bitcoin-100k".to_string(),
            end_date: Some("2026-12-31T00:00:00Z".to_string()),
            outcome_prices: Some("[\"0.72\",\"0.28\"]".to_string()),
            volume: Some(50000.0),
            volume_num: None,
            best_bid: Some(0.71),
            best_ask: Some(0.73),
        };
        let market = into_venue_market(gm).unwrap();
        assert_eq!(market.venue_market_id, "0xabc123");
        assert_eq!(market.yes_price, dec!(0.72));
    }

    #[test]
    fn test_require_credentials_errors_when_unset() {
        let client = PolymarketClient::new_read_only().unwrap();
        assert!(client.require_credentials().is_err());
    }
}
