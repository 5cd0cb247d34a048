//! Price source: SOL/USD via a fallback cascade (oracle → pairs API →
//! configured constant) and token prices in bounded batches.

use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::{env_parse, Config};
use crate::types::WSOL_MINT;

/// Largest number of mints per pairs-API call.
pub const PRICE_BATCH_SIZE: usize = 30;

/// Market data for one token as reported by the pairs API.
#[derive(Debug, Clone, Default)]
pub struct TokenMarketData {
    pub price_usd: f64,
    pub fdv_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub liquidity_quote: Option<f64>,
    pub pair_created_at_ms: Option<u64>,
    pub price_change_5m: Option<f64>,
    pub symbol: Option<String>,
}

pub struct PriceSource {
    http: Client,
    pairs_url: String,
    oracle_url: String,
    oracle_feed_id: String,
    sol_price_fallback: f64,
}

impl PriceSource {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(cfg.price_timeout_secs))
                .build()
                .unwrap_or_default(),
            pairs_url: cfg.price_api_url.clone(),
            oracle_url: cfg.oracle_api_url.clone(),
            oracle_feed_id: cfg.oracle_sol_feed_id.clone(),
            sol_price_fallback: env_parse("SOL_PRICE_FALLBACK_USD", 200.0),
        }
    }

    /// SOL/USD through the cascade; always returns a usable price.
    pub async fn sol_price_usd(&self) -> f64 {
        if let Some(price) = self.oracle_sol_price().await {
            return price;
        }
        if let Some(price) = self.pairs_sol_price().await {
            return price;
        }
        debug!("price cascade exhausted; using configured constant");
        self.sol_price_fallback
    }

    async fn oracle_sol_price(&self) -> Option<f64> {
        let url = format!("{}/latest_price_feeds", self.oracle_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("ids[]", self.oracle_feed_id.as_str())])
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: Value = resp.json().await.ok()?;
        let feed = body.as_array()?.first()?;
        let price_obj = feed.get("price")?;
        let mantissa: f64 = match price_obj.get("price")? {
            Value::String(s) => s.parse().ok()?,
            Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
        let expo = price_obj.get("expo")?.as_i64()?;
        let price = mantissa * 10f64.powi(expo as i32);
        (price > 0.0).then_some(price)
    }

    async fn pairs_sol_price(&self) -> Option<f64> {
        let prices = self.token_prices(&[WSOL_MINT.to_string()]).await;
        prices.get(WSOL_MINT).copied().filter(|p| *p > 0.0)
    }

    /// Token prices keyed by mint, fetched in batches of at most
    /// `PRICE_BATCH_SIZE`. Missing or unpriced tokens are absent from the map.
    pub async fn token_prices(&self, mints: &[String]) -> HashMap<String, f64> {
        let mut prices = HashMap::new();
        for batch in mints.chunks(PRICE_BATCH_SIZE) {
            let url = format!("{}/tokens/{}", self.pairs_url, batch.join(","));
            let Ok(resp) = self.http.get(&url).send().await else { continue };
            if !resp.status().is_success() {
                continue;
            }
            let Ok(body) = resp.json::<Value>().await else { continue };
            for pair in body.get("pairs").and_then(|p| p.as_array()).into_iter().flatten() {
                let Some(mint) = pair
                    .get("baseToken")
                    .and_then(|t| t.get("address"))
                    .and_then(|a| a.as_str())
                else {
                    continue;
                };
                if !batch.iter().any(|m| m == mint) {
                    continue;
                }
                if let Some(price) = parse_price_field(pair.get("priceUsd")) {
                    if price > 0.0 {
                        prices.entry(mint.to_string()).or_insert(price);
                    }
                }
            }
        }
        prices
    }

    /// Full market view of one token (first pair reported).
    pub async fn token_market_data(&self, mint: &str) -> Option<TokenMarketData> {
        let url = format!("{}/tokens/{}", self.pairs_url, mint);
        let resp = self.http.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: Value = resp.json().await.ok()?;
        let pair = body.get("pairs")?.as_array()?.first()?;
        Some(TokenMarketData {
            price_usd: parse_price_field(pair.get("priceUsd")).unwrap_or(0.0),
            fdv_usd: pair.get("fdv").and_then(|v| v.as_f64()),
            liquidity_usd: pair
                .get("liquidity")
                .and_then(|l| l.get("usd"))
                .and_then(|v| v.as_f64()),
            liquidity_quote: pair
                .get("liquidity")
                .and_then(|l| l.get("quote"))
                .and_then(|v| v.as_f64()),
            pair_created_at_ms: pair.get("pairCreatedAt").and_then(|v| v.as_u64()),
            price_change_5m: pair
                .get("priceChange")
                .and_then(|c| c.get("m5"))
                .and_then(|v| v.as_f64()),
            symbol: pair
                .get("baseToken")
                .and_then(|t| t.get("symbol"))
                .and_then(|s| s.as_str())
                .map(|s| s.to_string()),
        })
    }
}

fn parse_price_field(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_field_parses_both_shapes() {
        assert_eq!(parse_price_field(Some(&Value::String("1.25".into()))), Some(1.25));
        assert_eq!(
            parse_price_field(Some(&serde_json::json!(0.5))),
            Some(0.5)
        );
        assert_eq!(parse_price_field(None), None);
        assert_eq!(parse_price_field(Some(&Value::Null)), None);
    }

    #[test]
    fn batching_respects_cap() {
        let mints: Vec<String> = (0..65).map(|i| format!("M{i}")).collect();
        let batches: Vec<_> = mints.chunks(PRICE_BATCH_SIZE).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 30);
        assert_eq!(batches[2].len(), 5);
    }
}
