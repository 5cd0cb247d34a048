//! Aggregator HTTP client: /v6-shaped quote and swap-build endpoints.
//!
//! The raw quote body is kept verbatim (it is echoed back to the swap-build
//! call); typed accessors read the handful of fields the engine needs.

use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use solana_sdk::transaction::VersionedTransaction;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{SniperError, SniperResult};
use crate::types::WSOL_MINT;
use crate::wallet::WalletManager;

/// A quote response, raw body retained for the swap-build round trip.
#[derive(Debug, Clone)]
pub struct Quote {
    raw: Value,
}

impl Quote {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn amount_field(&self, key: &str) -> Option<u64> {
        match self.raw.get(key) {
            Some(Value::String(s)) => s.parse::<u64>().ok(),
            Some(Value::Number(n)) => n.as_u64(),
            _ => None,
        }
    }

    pub fn in_amount(&self) -> Option<u64> {
        self.amount_field("inAmount")
    }

    pub fn out_amount(&self) -> Option<u64> {
        self.amount_field("outAmount")
    }

    pub fn input_mint(&self) -> Option<&str> {
        self.raw.get("inputMint").and_then(|v| v.as_str())
    }

    pub fn output_mint(&self) -> Option<&str> {
        self.raw.get("outputMint").and_then(|v| v.as_str())
    }

    /// Price impact as a percentage (the wire field is a decimal fraction).
    pub fn price_impact_pct(&self) -> Option<f64> {
        match self.raw.get("priceImpactPct") {
            Some(Value::String(s)) => s.parse::<f64>().ok().map(|f| f * 100.0),
            Some(Value::Number(n)) => n.as_f64().map(|f| f * 100.0),
            _ => None,
        }
    }

    pub fn route_labels(&self) -> Vec<String> {
        self.raw
            .get("routePlan")
            .and_then(|v| v.as_array())
            .map(|hops| {
                hops.iter()
                    .filter_map(|hop| {
                        hop.get("swapInfo")
                            .and_then(|i| i.get("label"))
                            .and_then(|l| l.as_str())
                            .map(|s| s.to_lowercase())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn hop_count(&self) -> usize {
        self.raw
            .get("routePlan")
            .and_then(|v| v.as_array())
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct QuoteParams {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub slippage_bps: u32,
    pub priority_fee_microlamports: u64,
    pub only_direct_routes: bool,
    pub dexes: Vec<String>,
}

impl QuoteParams {
    /// SOL -> token entry quote.
    pub fn buy(cfg: &Config, token_mint: &str, amount_lamports: u64, slippage_bps: u32, fee: u64) -> Self {
        Self {
            input_mint: WSOL_MINT.to_string(),
            output_mint: token_mint.to_string(),
            amount: amount_lamports,
            slippage_bps,
            priority_fee_microlamports: fee,
            only_direct_routes: cfg.only_direct_routes,
            dexes: cfg.dex_preference.clone(),
        }
    }

    /// token -> SOL exit quote.
    pub fn sell(cfg: &Config, token_mint: &str, token_amount: u64, slippage_bps: u32, fee: u64) -> Self {
        Self {
            input_mint: token_mint.to_string(),
            output_mint: WSOL_MINT.to_string(),
            amount: token_amount,
            slippage_bps,
            priority_fee_microlamports: fee,
            only_direct_routes: cfg.only_direct_routes,
            dexes: cfg.dex_preference.clone(),
        }
    }
}

pub struct AggregatorClient {
    http: Client,
    base_url: String,
    swap_timeout: Duration,
    require_direct_dex: bool,
    dex_preference: Vec<String>,
}

impl AggregatorClient {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(cfg.quote_timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: cfg.aggregator_url.clone(),
            swap_timeout: Duration::from_secs(cfg.swap_build_timeout_secs),
            require_direct_dex: cfg.require_direct_dex,
            dex_preference: cfg.dex_preference.iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    /// Fetch a quote. `Ok(None)` when no acceptable route exists (including a
    /// route rejected by the direct-dex requirement).
    pub async fn get_quote(&self, params: &QuoteParams) -> SniperResult<Option<Quote>> {
        let mut query: Vec<(&str, String)> = vec![
            ("inputMint", params.input_mint.clone()),
            ("outputMint", params.output_mint.clone()),
            ("amount", params.amount.to_string()),
            ("slippageBps", params.slippage_bps.to_string()),
            ("platformFeeBps", "0".to_string()),
            (
                "computeUnitPriceMicroLamports",
                params.priority_fee_microlamports.to_string(),
            ),
            ("onlyDirectRoutes", params.only_direct_routes.to_string()),
            ("swapMode", "ExactIn".to_string()),
        ];
        if !params.dexes.is_empty() {
            query.push(("dexes", params.dexes.join(",")));
        }

        let url = format!("{}/quote", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| SniperError::transport_with_source("quote request failed", e.into()))?;
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "quote endpoint returned non-success");
            return Ok(None);
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SniperError::protocol(format!("quote body unparseable: {e}")))?;
        let quote = Quote::from_value(body);

        if self.require_direct_dex && !self.route_is_direct(&quote) {
            debug!(labels = ?quote.route_labels(), "route rejected by direct-dex requirement");
            return Ok(None);
        }
        Ok(Some(quote))
    }

    /// Single-hop route whose dex label is in the preference list.
    fn route_is_direct(&self, quote: &Quote) -> bool {
        if quote.hop_count() != 1 {
            return false;
        }
        if self.dex_preference.is_empty() {
            return true;
        }
        quote
            .route_labels()
            .first()
            .map(|label| self.dex_preference.iter().any(|d| label.contains(d)))
            .unwrap_or(false)
    }

    /// Build a signed-ready swap transaction for the wallet. Returns raw
    /// transaction bytes.
    pub async fn build_swap(
        &self,
        quote: &Quote,
        user_pubkey: &str,
        priority_fee_microlamports: u64,
        compute_unit_limit: u32,
    ) -> SniperResult<Vec<u8>> {
        let mut payload = json!({
            "quoteResponse": quote.raw(),
            "userPublicKey": user_pubkey,
            "wrapAndUnwrapSol": true,
            "computeUnitPriceMicroLamports": priority_fee_microlamports,
            "asLegacyTransaction": false,
        });
        if compute_unit_limit > 0 {
            payload["computeUnitLimit"] = json!(compute_unit_limit);
        }

        let url = format!("{}/swap", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(self.swap_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SniperError::transport_with_source("swap build failed", e.into()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, body = text.as_str(), "swap build returned non-success");
            return Err(SniperError::transport(format!("swap build status {status}")));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SniperError::protocol(format!("swap body unparseable: {e}")))?;
        let tx_b64 = body
            .get("swapTransaction")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SniperError::protocol("swap response missing swapTransaction"))?;
        base64::engine::general_purpose::STANDARD
            .decode(tx_b64)
            .map_err(|e| SniperError::protocol(format!("swapTransaction not base64: {e}")))
    }

    /// Tiny reverse quote to prove the token can be sold at all.
    pub async fn probe_sellability(
        &self,
        cfg: &Config,
        token_mint: &str,
    ) -> SniperResult<bool> {
        let params = QuoteParams::sell(cfg, token_mint, 10_000_000, 800, 0);
        match self.get_quote(&params).await? {
            Some(quote) => Ok(quote.out_amount().unwrap_or(0) > 0),
            None => Ok(false),
        }
    }
}

/// Deserialize aggregator-built transaction bytes, sign, and return the
/// transaction ready for submission.
pub fn sign_swap_transaction(
    tx_bytes: &[u8],
    wallet: &WalletManager,
) -> SniperResult<VersionedTransaction> {
    let mut tx: VersionedTransaction = bincode::deserialize(tx_bytes)
        .map_err(|e| SniperError::protocol(format!("swap transaction undecodable: {e}")))?;
    wallet
        .sign_transaction(&mut tx)
        .map_err(|e| SniperError::logic(format!("signing failed: {e}")))?;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_with(raw: Value) -> Quote {
        Quote::from_value(raw)
    }

    #[test]
    fn amount_accessors_read_both_wire_shapes() {
        let q = quote_with(json!({"inAmount": "1000000000", "outAmount": 42}));
        assert_eq!(q.in_amount(), Some(1_000_000_000));
        assert_eq!(q.out_amount(), Some(42));
        let q = quote_with(json!({}));
        assert_eq!(q.in_amount(), None);
    }

    #[test]
    fn price_impact_is_percent() {
        let q = quote_with(json!({"priceImpactPct": "0.015"}));
        assert!((q.price_impact_pct().unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn route_labels_lowercased() {
        let q = quote_with(json!({
            "routePlan": [
                {"swapInfo": {"label": "Raydium"}},
                {"swapInfo": {"label": "Orca"}}
            ]
        }));
        assert_eq!(q.route_labels(), vec!["raydium", "orca"]);
        assert_eq!(q.hop_count(), 2);
    }

    #[test]
    fn direct_route_enforcement() {
        let client = AggregatorClient {
            http: Client::new(),
            base_url: String::new(),
            swap_timeout: Duration::from_secs(1),
            require_direct_dex: true,
            dex_preference: vec!["raydium".to_string()],
        };
        let single_ok = quote_with(json!({"routePlan": [{"swapInfo": {"label": "Raydium CLMM"}}]}));
        assert!(client.route_is_direct(&single_ok));
        let wrong_dex = quote_with(json!({"routePlan": [{"swapInfo": {"label": "Meteora"}}]}));
        assert!(!client.route_is_direct(&wrong_dex));
        let two_hops = quote_with(json!({"routePlan": [
            {"swapInfo": {"label": "Raydium"}},
            {"swapInfo": {"label": "Raydium"}}
        ]}));
        assert!(!client.route_is_direct(&two_hops));
    }

    #[test]
    fn quote_params_orientation() {
        let cfg = Config::default();
        let buy = QuoteParams::buy(&cfg, "Mint1", 1_000, 500, 10);
        assert_eq!(buy.input_mint, WSOL_MINT);
        assert_eq!(buy.output_mint, "Mint1");
        let sell = QuoteParams::sell(&cfg, "Mint1", 2_000, 800, 10);
        assert_eq!(sell.input_mint, "Mint1");
        assert_eq!(sell.output_mint, WSOL_MINT);
    }

    #[test]
    fn sign_swap_transaction_rejects_garbage() {
        let wallet = WalletManager::new_random();
        assert!(sign_swap_transaction(&[1, 2, 3], &wallet).is_err());
    }
}
