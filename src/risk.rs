//! External risk & intelligence sources.
//!
//! Thin HTTP adapters behind a capability interface. Adapters are best-effort:
//! transport failures yield `None` findings so a provider outage never stalls
//! the pipeline; policy decisions from returned data fail closed in the gate.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::{env_bool, env_string};

/// Risk severity lattice: low < medium < high < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Normalized findings from a single source.
#[derive(Debug, Clone, Default)]
pub struct RiskView {
    pub honeypot: bool,
    pub trading_halted: bool,
    pub mint_authority_active: bool,
    pub freeze_authority_active: bool,
    pub proxy_contract: bool,
    pub buy_tax_pct: Option<f64>,
    pub sell_tax_pct: Option<f64>,
    pub fdv_usd: Option<f64>,
    pub holder_count: Option<u64>,
    pub top10_holder_pct: Option<f64>,
    pub flagged_rug: bool,
    pub findings: Vec<String>,
}

impl RiskView {
    /// Fold this view into the lattice.
    pub fn level(&self) -> RiskLevel {
        if self.honeypot || self.flagged_rug {
            return RiskLevel::Critical;
        }
        if self.trading_halted || self.mint_authority_active || self.freeze_authority_active {
            return RiskLevel::High;
        }
        if self.top10_holder_pct.map(|p| p > 50.0).unwrap_or(false) {
            return RiskLevel::Medium;
        }
        RiskLevel::Low
    }
}

/// Capability interface for a risk source.
#[async_trait]
pub trait RiskSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Query findings for a token; `Ok(None)` means the source had nothing
    /// (or was unreachable) and must not influence the verdict.
    async fn query(&self, token_mint: &str) -> anyhow::Result<Option<RiskView>>;
}

/// Aggregate verdict across all configured sources.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub findings: Vec<String>,
    pub views: Vec<(&'static str, RiskView)>,
}

/// Compose sources and fold their outputs into one assessment.
pub struct RiskEvaluator {
    sources: Vec<Box<dyn RiskSource>>,
}

impl RiskEvaluator {
    pub fn new(sources: Vec<Box<dyn RiskSource>>) -> Self {
        Self { sources }
    }

    /// Default adapters, honoring per-source enable flags.
    pub fn from_env() -> Self {
        let mut sources: Vec<Box<dyn RiskSource>> = Vec::new();
        if env_bool("TOKEN_SECURITY_ENABLED", true) {
            sources.push(Box::new(TokenSecuritySource::from_env()));
        }
        if env_bool("RUG_REGISTRY_ENABLED", true) {
            sources.push(Box::new(RugRegistrySource::from_env()));
        }
        Self::new(sources)
    }

    pub async fn evaluate(&self, token_mint: &str) -> RiskAssessment {
        let mut level = RiskLevel::Low;
        let mut findings = Vec::new();
        let mut views = Vec::new();

        for source in &self.sources {
            match source.query(token_mint).await {
                Ok(Some(view)) => {
                    level = level.max(view.level());
                    findings.extend(view.findings.iter().cloned());
                    views.push((source.name(), view));
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(source = source.name(), error = %e, "risk source unavailable");
                }
            }
        }

        RiskAssessment { level, findings, views }
    }
}

fn http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

fn flag_is_set(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn value_as_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(x) = v.get(*key) {
            if let Some(f) = x.as_f64() {
                return Some(f);
            }
            if let Some(s) = x.as_str() {
                if let Ok(f) = s.parse::<f64>() {
                    return Some(f);
                }
            }
        }
    }
    None
}

/// Token-security style source (`/token_security/solana` shape, keyed by address).
pub struct TokenSecuritySource {
    http: Client,
    base_url: String,
}

impl TokenSecuritySource {
    pub fn from_env() -> Self {
        Self {
            http: http_client(8),
            base_url: env_string("TOKEN_SECURITY_API_URL")
                .unwrap_or_else(|| "https://api.gopluslabs.io/api/v1".to_string()),
        }
    }
}

#[async_trait]
impl RiskSource for TokenSecuritySource {
    fn name(&self) -> &'static str {
        "token_security"
    }

    async fn query(&self, token_mint: &str) -> anyhow::Result<Option<RiskView>> {
        let url = format!("{}/token_security/solana", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("contract_addresses", token_mint)])
            .send()
            .await;
        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            _ => return Ok(None),
        };
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };

        let result = match body.get("result").and_then(|r| r.as_object()) {
            Some(map) => match map.values().next() {
                Some(v) => v.clone(),
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        let mut view = RiskView {
            honeypot: flag_is_set(&result, "is_honeypot"),
            trading_halted: flag_is_set(&result, "trading_halted"),
            mint_authority_active: flag_is_set(&result, "is_mint_authority"),
            freeze_authority_active: flag_is_set(&result, "is_freeze_authority"),
            proxy_contract: flag_is_set(&result, "is_proxy"),
            buy_tax_pct: value_as_f64(&result, &["buy_tax", "buyTax"]),
            sell_tax_pct: value_as_f64(&result, &["sell_tax", "sellTax"]),
            fdv_usd: value_as_f64(&result, &["mcap", "market_cap"]),
            holder_count: result
                .get("holder_count")
                .or_else(|| result.get("holders"))
                .and_then(|v| v.as_u64()),
            top10_holder_pct: value_as_f64(&result, &["top10HolderPercent"]),
            ..Default::default()
        };
        if view.honeypot {
            view.findings.push("honeypot".to_string());
        }
        if view.trading_halted {
            view.findings.push("trading_halted".to_string());
        }
        if view.proxy_contract {
            view.findings.push("proxy_contract".to_string());
        }
        Ok(Some(view))
    }
}

/// Rug-registry style source (`/tokens/{mint}` with a status verdict).
pub struct RugRegistrySource {
    http: Client,
    base_url: String,
}

impl RugRegistrySource {
    pub fn from_env() -> Self {
        Self {
            http: http_client(8),
            base_url: env_string("RUG_REGISTRY_API_URL")
                .unwrap_or_else(|| "https://api.rugcheck.xyz/v1".to_string()),
        }
    }
}

#[async_trait]
impl RiskSource for RugRegistrySource {
    fn name(&self) -> &'static str {
        "rug_registry"
    }

    async fn query(&self, token_mint: &str) -> anyhow::Result<Option<RiskView>> {
        let url = format!("{}/tokens/{}", self.base_url, token_mint);
        let resp = match self.http.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return Ok(None),
        };
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let status = body
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .to_uppercase();
        let mut view = RiskView::default();
        if status == "RUG" || status == "SCAM" {
            view.flagged_rug = true;
            view.findings.push(format!("registry_{}", status.to_lowercase()));
        }
        Ok(Some(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_order() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::Low.max(RiskLevel::High), RiskLevel::High);
    }

    #[test]
    fn view_folding() {
        let view = RiskView { honeypot: true, ..Default::default() };
        assert_eq!(view.level(), RiskLevel::Critical);

        let view = RiskView { freeze_authority_active: true, ..Default::default() };
        assert_eq!(view.level(), RiskLevel::High);

        let view = RiskView { top10_holder_pct: Some(62.0), ..Default::default() };
        assert_eq!(view.level(), RiskLevel::Medium);

        let view = RiskView::default();
        assert_eq!(view.level(), RiskLevel::Low);
    }

    struct StaticSource(RiskView);

    #[async_trait]
    impl RiskSource for StaticSource {
        fn name(&self) -> &'static str {
            "static"
        }
        async fn query(&self, _token_mint: &str) -> anyhow::Result<Option<RiskView>> {
            Ok(Some(self.0.clone()))
        }
    }

    struct DeadSource;

    #[async_trait]
    impl RiskSource for DeadSource {
        fn name(&self) -> &'static str {
            "dead"
        }
        async fn query(&self, _token_mint: &str) -> anyhow::Result<Option<RiskView>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn evaluator_folds_max_and_ignores_dead_sources() {
        let evaluator = RiskEvaluator::new(vec![
            Box::new(StaticSource(RiskView { trading_halted: true, ..Default::default() })),
            Box::new(DeadSource),
            Box::new(StaticSource(RiskView::default())),
        ]);
        let assessment = evaluator.evaluate("Mint111").await;
        assert_eq!(assessment.level, RiskLevel::High);
        assert_eq!(assessment.views.len(), 2);
    }

    #[test]
    fn flag_parsing_shapes() {
        let v: Value = serde_json::json!({"is_honeypot": "1", "buy_tax": "12.5", "holders": 42});
        assert!(flag_is_set(&v, "is_honeypot"));
        assert!(!flag_is_set(&v, "is_proxy"));
        assert_eq!(value_as_f64(&v, &["buy_tax"]), Some(12.5));
    }
}
