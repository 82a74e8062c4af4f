//! Kalshi venue client.
//!
//! Public market-data endpoints need no auth. Trading and portfolio
//! endpoints sign every request with RSA-PSS/SHA-256 over
//! `timestamp_ms + METHOD + full_path` (query string stripped),
//! base64-encoded and sent as `KALSHI-ACCESS-*` headers.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::platforms::{categorize_from_title, OrderState, OrderStatus, Orderbook, VenueClient, VenueMarket};
use crate::types::Side;

const PROD_BASE: &str = "https://trading-api.kalshi.com/trade-api/v2";
const DEMO_BASE: &str = "https://demo-api.kalshi.co/trade-api/v2";
const TIMEOUT_SECS: u64 = 15;

pub struct KalshiClient {
    http: Client,
    base_url: String,
    api_key_id: String,
    private_key: RsaPrivateKey,
}

impl KalshiClient {
    pub fn new(api_key_id: String, private_key_pem: &str, use_demo: bool) -> Result<Self, EngineError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| EngineError::AuthConfigError(format!("invalid Kalshi private key: {e}")))?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(EngineError::Http)?;

        Ok(Self {
            http,
            base_url: if use_demo { DEMO_BASE.to_string() } else { PROD_BASE.to_string() },
            api_key_id,
            private_key,
        })
    }

    /// Sign `timestamp_ms + METHOD + full_path` with RSA-PSS/SHA-256
    /// (MGF1-SHA256, salt length = digest length), base64-encoded.
    fn sign_request(&self, method: &str, full_path: &str) -> Result<(String, String), EngineError> {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| EngineError::AuthConfigError(format!("system clock error: {e}")))?
            .as_millis()
            .to_string();

        let message = format!("{timestamp_ms}{method}{full_path}");
        let mut hasher = Sha256::new();
        hasher.update(message.as_bytes());
        let digest = hasher.finalize();

        let signing_key = rsa::pss::SigningKey::<Sha256>::new(self.private_key.clone());
        use rsa::signature::RandomizedSigner;
        let signature = signing_key.sign_with_rng(&mut OsRng, &digest);

        let encoded = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
        Ok((timestamp_ms, encoded))
    }

    fn auth_headers(&self, method: &str, path: &str) -> Result<Vec<(&'static str, String)>, EngineError> {
        let full_path = format!("/trade-api/v2{path}");
        let (timestamp_ms, signature) = self.sign_request(method, &full_path)?;
        Ok(vec![
            ("KALSHI-ACCESS-KEY", self.api_key_id.clone()),
            ("KALSHI-ACCESS-SIGNATURE", signature),
            ("KALSHI-ACCESS-TIMESTAMP", timestamp_ms),
        ])
    }

    /// Venue-native cents (1-99) to a `[0,1]` Decimal.
    fn cents_to_decimal(cents: i64) -> Decimal {
        Decimal::from(cents) / dec!(100)
    }

    /// `[0,1]` Decimal to venue-native cents, clamped to 1-99.
    fn decimal_to_cents(price: Decimal) -> i64 {
        (price * dec!(100))
            .round()
            .to_i64()
            .unwrap_or(50)
            .clamp(1, 99)
    }
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    markets: Vec<KalshiMarket>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KalshiMarket {
    ticker: String,
    event_ticker: Option<String>,
    title: String,
    #[serde(default)]
    subtitle: String,
    #[serde(default)]
    rules_primary: Option<String>,
    yes_bid: Option<i64>,
    yes_ask: Option<i64>,
    no_bid: Option<i64>,
    no_ask: Option<i64>,
    volume_24h: Option<i64>,
    close_time: Option<String>,
    status: Option<String>,
    result: Option<String>,
}

impl KalshiMarket {
    fn into_venue_market(self) -> VenueMarket {
        let yes_ask = self.yes_ask.unwrap_or(50);
        let yes_price = KalshiClient::cents_to_decimal(yes_ask);
        let yes_bid_dec = KalshiClient::cents_to_decimal(self.yes_bid.unwrap_or(yes_ask));
        let spread = (yes_price - yes_bid_dec).abs();

        VenueMarket {
            venue_market_id: self.ticker,
            venue_event_id: self.event_ticker,
            title: self.title,
            category_hint: categorize_from_title(&self.subtitle),
            description: self.rules_primary.unwrap_or(self.subtitle),
            resolution_source: None,
            yes_price,
            no_price: Decimal::ONE - yes_price,
            spread,
            volume_24h: Decimal::from(self.volume_24h.unwrap_or(0)),
            close_time: self.close_time.as_deref().and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&chrono::Utc))
            }),
        }
    }
}

#[async_trait]
impl VenueClient for KalshiClient {
    fn name(&self) -> &str {
        "kalshi"
    }

    async fn list_markets(
        &self,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<(Vec<VenueMarket>, Option<String>), EngineError> {
        let mut query = vec![("limit".to_string(), limit.to_string()), ("status".to_string(), "open".to_string())];
        if let Some(c) = cursor {
            query.push(("cursor".to_string(), c));
        }

        let resp = self
            .http
            .get(format!("{}/markets", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(EngineError::TransientVenueError {
                venue: "kalshi".to_string(),
                message: format!("list_markets HTTP {status}"),
            });
        }

        let parsed: MarketsResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;

        let markets = parsed.markets.into_iter().map(KalshiMarket::into_venue_market).collect();
        Ok((markets, parsed.cursor))
    }

    async fn get_market(&self, venue_market_id: &str) -> Result<VenueMarket, EngineError> {
        #[derive(Deserialize)]
        struct SingleResp {
            market: KalshiMarket,
        }
        let resp = self
            .http
            .get(format!("{}/markets/{venue_market_id}", self.base_url))
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;

        let parsed: SingleResp = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;
        Ok(parsed.market.into_venue_market())
    }

    async fn get_orderbook(&self, venue_market_id: &str) -> Result<Orderbook, EngineError> {
        #[derive(Deserialize)]
        struct BookResp {
            orderbook: BookLevels,
        }
        #[derive(Deserialize, Default)]
        struct BookLevels {
            #[serde(default)]
            yes: Vec<(i64, i64)>,
            #[serde(default)]
            no: Vec<(i64, i64)>,
        }

        let resp = self
            .http
            .get(format!("{}/markets/{venue_market_id}/orderbook", self.base_url))
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;

        let parsed: BookResp = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;

        let best_yes = parsed.orderbook.yes.first().map(|(p, _)| *p).unwrap_or(50);
        let best_no = parsed.orderbook.no.first().map(|(p, _)| *p).unwrap_or(50);

        Ok(Orderbook {
            yes_bid: Self::cents_to_decimal(best_yes),
            yes_ask: Decimal::ONE - Self::cents_to_decimal(best_no),
            no_bid: Self::cents_to_decimal(best_no),
            no_ask: Decimal::ONE - Self::cents_to_decimal(best_yes),
        })
    }

    async fn place_limit_order(
        &self,
        venue_market_id: &str,
        side: Side,
        count: i64,
        price: Decimal,
    ) -> Result<String, EngineError> {
        let path = "/portfolio/orders";
        let headers = self.auth_headers("POST", path)?;
        let cents = Self::decimal_to_cents(price);

        #[derive(serde::Serialize)]
        struct OrderRequest<'a> {
            ticker: &'a str,
            action: &'a str,
            side: &'a str,
            #[serde(rename = "type")]
            order_type: &'a str,
            count: i64,
            yes_price: Option<i64>,
            no_price: Option<i64>,
            client_order_id: String,
        }

        let (yes_price, no_price) = match side {
            Side::Yes => (Some(cents), None),
            Side::No => (None, Some(cents)),
        };

        let body = OrderRequest {
            ticker: venue_market_id,
            action: "buy",
            side: match side {
                Side::Yes => "yes",
                Side::No => "no",
            },
            order_type: "limit",
            count,
            yes_price,
            no_price,
            client_order_id: uuid::Uuid::new_v4().to_string(),
        };

        let mut req = self.http.post(format!("{}{path}", self.base_url)).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(venue = "kalshi", %status, %body, "order placement rejected");
            return Err(EngineError::PermanentVenueError {
                venue: "kalshi".to_string(),
                message: format!("order rejected {status}: {body}"),
            });
        }

        #[derive(Deserialize)]
        struct OrderResp {
            order: OrderInner,
        }
        #[derive(Deserialize)]
        struct OrderInner {
            order_id: String,
        }

        let parsed: OrderResp = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;
        Ok(parsed.order.order_id)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, EngineError> {
        let path = format!("/portfolio/orders/{order_id}");
        let headers = self.auth_headers("GET", &path)?;
        let mut req = self.http.get(format!("{}{path}", self.base_url));
        for (k, v) in headers {
            req = req.header(k, v);
        }

        #[derive(Deserialize)]
        struct OrderResp {
            order: OrderDetail,
        }
        #[derive(Deserialize)]
        struct OrderDetail {
            order_id: String,
            status: String,
            #[serde(default)]
            filled_count: i64,
            yes_price: Option<i64>,
            no_price: Option<i64>,
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;
        let parsed: OrderResp = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;

        let state = match parsed.order.status.as_str() {
            "resting" | "open" => OrderState::Open,
            "executed" => OrderState::Filled,
            "canceled" | "cancelled" => OrderState::Cancelled,
            _ => OrderState::Rejected,
        };

        let avg_fill_price = parsed.order.yes_price.or(parsed.order.no_price).map(Self::cents_to_decimal);

        Ok(OrderStatus {
            order_id: parsed.order.order_id,
            state,
            filled_count: parsed.order.filled_count,
            avg_fill_price,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        let path = format!("/portfolio/orders/{order_id}");
        let headers = self.auth_headers("DELETE", &path)?;
        let mut req = self.http.delete(format!("{}{path}", self.base_url));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;
        if !resp.status().is_success() {
            return Err(EngineError::PermanentVenueError {
                venue: "kalshi".to_string(),
                message: format!("cancel failed: {}", resp.status()),
            });
        }
        Ok(())
    }

    async fn get_mid_price(&self, venue_market_id: &str) -> Result<Decimal, EngineError> {
        let market = self.get_market(venue_market_id).await?;
        debug!(ticker = %venue_market_id, price = %market.yes_price, "kalshi mid price");
        Ok((market.yes_price + (Decimal::ONE - market.no_price)) / dec!(2))
    }

    async fn is_resolved(&self, venue_market_id: &str) -> Result<(bool, Option<bool>), EngineError> {
        #[derive(Deserialize)]
        struct SingleResp {
            market: KalshiMarket,
        }
        let resp = self
            .http
            .get(format!("{}/markets/{venue_market_id}", self.base_url))
            .send()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;
        let parsed: SingleResp = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientVenueError { venue: "kalshi".to_string(), message: e.to_string() })?;

        let resolved = matches!(parsed.market.status.as_deref(), Some("finalized") | Some("settled"));
        let outcome = match parsed.market.result.as_deref() {
            Some("yes") => Some(true),
            Some("no") => Some(false),
            _ => None,
        };
        Ok((resolved, outcome))
    }
}
