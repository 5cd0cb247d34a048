//! Risk & safety gate: the sequential checks every candidate clears before
//! sizing and execution.
//!
//! Policy violations fail closed and terminate the candidate; transport
//! failures on external sources fail open so a provider outage cannot stall
//! the fast path.

use chrono::Local;
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregator::AggregatorClient;
use crate::auto_pause::{read_control_flags, AutoPauseManager};
use crate::config::Config;
use crate::errors::{ErrorCategory, SniperError, SniperResult};
use crate::metrics::metrics;
use crate::prices::{PriceSource, TokenMarketData};
use crate::risk::{RiskEvaluator, RiskLevel};
use crate::rpc_manager::RpcManager;
use crate::safety::TokenSafetyChecker;
use crate::types::{now_ms, LaunchCandidate};
use solana_sdk::pubkey::Pubkey;

/// Per-day trade counter, reset on local date change.
#[derive(Debug)]
pub struct DailyCounter {
    inner: Mutex<(String, u32)>,
}

impl DailyCounter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new((Local::now().format("%Y-%m-%d").to_string(), 0)),
        }
    }

    fn roll(&self) {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let mut inner = self.inner.lock();
        if inner.0 != today {
            *inner = (today, 0);
        }
    }

    pub fn count(&self) -> u32 {
        self.roll();
        self.inner.lock().1
    }

    pub fn increment(&self) {
        self.roll();
        self.inner.lock().1 += 1;
    }

    #[cfg(test)]
    pub(crate) fn force(&self, day: &str, count: u32) {
        *self.inner.lock() = (day.to_string(), count);
    }
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// What survives the gate alongside the candidate.
#[derive(Debug, Clone, Default)]
pub struct GateReport {
    pub market_data: Option<TokenMarketData>,
    pub safety_warnings: Vec<String>,
    pub safety_check_ms: f64,
}

pub struct RiskGate {
    cfg: Config,
    auto_pause: Arc<AutoPauseManager>,
    safety: Option<Arc<TokenSafetyChecker>>,
    risk: Arc<RiskEvaluator>,
    aggregator: Arc<AggregatorClient>,
    prices: Arc<PriceSource>,
    rpc: Arc<RpcManager>,
    daily: Arc<DailyCounter>,
}

impl RiskGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        auto_pause: Arc<AutoPauseManager>,
        safety: Option<Arc<TokenSafetyChecker>>,
        risk: Arc<RiskEvaluator>,
        aggregator: Arc<AggregatorClient>,
        prices: Arc<PriceSource>,
        rpc: Arc<RpcManager>,
        daily: Arc<DailyCounter>,
    ) -> Self {
        Self { cfg, auto_pause, safety, risk, aggregator, prices, rpc, daily }
    }

    /// Run every check in order; the first failure terminates the candidate.
    pub async fn evaluate(&self, candidate: &LaunchCandidate) -> SniperResult<GateReport> {
        let token_mint = candidate.token_mint();
        let mut report = GateReport::default();

        // 1. Pause fuse and operator flag.
        let flags = read_control_flags(&self.cfg.pause_file, &self.cfg.flatten_file);
        if flags.pause {
            return Err(SniperError::policy("paused", "pause flag present"));
        }
        let (allowed, reason) = self.auto_pause.is_trading_allowed();
        if !allowed {
            return Err(SniperError::policy(
                "paused",
                reason.unwrap_or_else(|| "auto-pause engaged".to_string()),
            ));
        }

        // 2. Score floor (coordinated candidates only).
        check_score(candidate, self.cfg.min_confidence)?;

        // Market view feeds the liquidity, age, and FDV checks.
        report.market_data = self.prices.token_market_data(token_mint).await;

        // 3. Liquidity floor (quote side).
        if let Some(data) = &report.market_data {
            let liquidity_sol = data.liquidity_quote.unwrap_or_else(|| {
                candidate_initial_liquidity(candidate).unwrap_or(0.0)
            });
            if liquidity_sol < self.cfg.min_liquidity_sol {
                return Err(SniperError::policy(
                    "liquidity",
                    format!(
                        "quote liquidity {:.3} SOL below floor {:.3}",
                        liquidity_sol, self.cfg.min_liquidity_sol
                    ),
                ));
            }

            // 4. Pool age floor.
            check_pool_age(data.pair_created_at_ms, now_ms(), self.cfg.min_pool_age_secs)?;
        }

        // 5. Freshness: latest on-chain activity within the window.
        if let Ok(mint_pubkey) = Pubkey::from_str(token_mint) {
            match self.rpc.latest_tx_age_secs(&mint_pubkey).await {
                Ok(Some(age)) if age > self.cfg.max_tx_age_secs => {
                    return Err(SniperError::policy(
                        "freshness",
                        format!("latest activity {age}s ago exceeds {}s", self.cfg.max_tx_age_secs),
                    ));
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "freshness check unavailable; continuing"),
            }
        }

        // 6. Token safety (mint authorities).
        if let Some(safety) = &self.safety {
            let started = std::time::Instant::now();
            match safety.check_token(token_mint).await {
                Ok(verdict) => {
                    report.safety_check_ms = started.elapsed().as_secs_f64() * 1_000.0;
                    report.safety_warnings = verdict.warnings.clone();
                    if !verdict.is_safe {
                        metrics().record_safety_block(verdict.warnings.len());
                        let detail = if !verdict.mint_renounced {
                            "mint_authority"
                        } else if !verdict.freeze_renounced {
                            "freeze_authority"
                        } else if verdict.is_token_2022 {
                            "token_2022"
                        } else {
                            "metadata_mutable"
                        };
                        return Err(SniperError::policy(
                            format!("token_safety:{detail}"),
                            verdict.warnings.join("; "),
                        ));
                    }
                    if !verdict.warnings.is_empty() {
                        info!(mint = token_mint, warnings = ?verdict.warnings, "safety warnings");
                    }
                }
                Err(e) if e.category() == ErrorCategory::Transport => {
                    warn!(mint = token_mint, error = %e, "safety check unreachable; continuing");
                }
                Err(e) => return Err(e),
            }
        }

        // 7. External ownership/tax flags.
        let assessment = self.risk.evaluate(token_mint).await;
        if assessment.level >= RiskLevel::High {
            return Err(SniperError::policy(
                "external_risk",
                format!(
                    "risk {} findings: {}",
                    assessment.level.as_str(),
                    assessment.findings.join(",")
                ),
            ));
        }
        for (_, view) in &assessment.views {
            check_taxes(view.buy_tax_pct, view.sell_tax_pct, &self.cfg)?;
            if view.proxy_contract && !self.cfg.allow_proxy_contracts {
                return Err(SniperError::policy("proxy_contract", "proxy contract disallowed"));
            }
        }

        // 8. Sellability probe.
        match self.aggregator.probe_sellability(&self.cfg, token_mint).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(SniperError::policy("sellability", "reverse quote returned no output"));
            }
            Err(e) if e.category() == ErrorCategory::Transport => {
                warn!(mint = token_mint, error = %e, "sellability probe unreachable; continuing");
            }
            Err(e) => return Err(e),
        }

        // 9. Daily cap.
        if self.cfg.max_daily_trades > 0 && self.daily.count() >= self.cfg.max_daily_trades {
            return Err(SniperError::policy(
                "daily_cap",
                format!("daily trade cap {} reached", self.cfg.max_daily_trades),
            ));
        }

        Ok(report)
    }
}

fn candidate_initial_liquidity(candidate: &LaunchCandidate) -> Option<f64> {
    match candidate {
        LaunchCandidate::NewPool { initial_liquidity_sol, .. } => Some(*initial_liquidity_sol),
        _ => None,
    }
}

/// Score floor: coordinated events carry a meaningful confidence; the
/// immediate trigger kinds pass trivially.
pub fn check_score(candidate: &LaunchCandidate, min_confidence: f64) -> SniperResult<()> {
    if let LaunchCandidate::CoordinatedBuy { confidence, .. } = candidate {
        if *confidence < min_confidence {
            return Err(SniperError::policy(
                "score",
                format!("confidence {confidence:.2} below floor {min_confidence:.2}"),
            ));
        }
    }
    Ok(())
}

/// Pools younger than the floor are dropped (pre-seed sandwich guard).
/// Exactly at the floor passes.
pub fn check_pool_age(
    pair_created_at_ms: Option<u64>,
    now_ms: u64,
    min_pool_age_secs: u64,
) -> SniperResult<()> {
    let Some(created_ms) = pair_created_at_ms else {
        return Ok(());
    };
    let age_secs = now_ms.saturating_sub(created_ms) / 1_000;
    if age_secs < min_pool_age_secs {
        return Err(SniperError::policy(
            "pool_age",
            format!("pool age {age_secs}s below floor {min_pool_age_secs}s"),
        ));
    }
    Ok(())
}

fn check_taxes(buy_tax: Option<f64>, sell_tax: Option<f64>, cfg: &Config) -> SniperResult<()> {
    if let Some(tax) = buy_tax {
        if tax > cfg.max_buy_tax_pct {
            return Err(SniperError::policy(
                "buy_tax",
                format!("buy tax {tax}% exceeds {}%", cfg.max_buy_tax_pct),
            ));
        }
    }
    if let Some(tax) = sell_tax {
        if tax > cfg.max_sell_tax_pct {
            return Err(SniperError::policy(
                "sell_tax",
                format!("sell tax {tax}% exceeds {}%", cfg.max_sell_tax_pct),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinated(confidence: f64) -> LaunchCandidate {
        LaunchCandidate::CoordinatedBuy {
            token_mint: "M".into(),
            signatures: vec!["s".into()],
            buyer_wallets: vec!["w".into()],
            num_buyers: 3,
            total_sol_volume: 1.0,
            first_slot: 1,
            timestamp: 0,
            confidence,
        }
    }

    #[test]
    fn score_floor_applies_to_coordinated_only() {
        assert!(check_score(&coordinated(0.4), 0.5).is_err());
        assert!(check_score(&coordinated(0.5), 0.5).is_ok());

        let pool = LaunchCandidate::NewPool {
            pool_address: None,
            token_mint: "M".into(),
            quote_mint: "Q".into(),
            initial_liquidity_sol: 0.0,
            signature: "s".into(),
            slot: 1,
            timestamp: 0,
            venue: crate::types::Venue::AmmV4,
        };
        assert!(check_score(&pool, 0.99).is_ok());
    }

    #[test]
    fn pool_age_boundaries() {
        let now = 1_000_000_000_000u64; // ms
        // exactly at the floor passes
        let created = now - 120_000;
        assert!(check_pool_age(Some(created), now, 120).is_ok());
        // one second younger fails with the pool_age label
        let created = now - 119_000;
        let err = check_pool_age(Some(created), now, 120).unwrap_err();
        assert_eq!(err.policy_check(), "pool_age");
        // unknown creation time passes (no data to act on)
        assert!(check_pool_age(None, now, 120).is_ok());
    }

    #[test]
    fn tax_limits() {
        let cfg = Config::default();
        assert!(check_taxes(Some(10.0), Some(10.0), &cfg).is_ok());
        assert_eq!(
            check_taxes(Some(20.0), None, &cfg).unwrap_err().policy_check(),
            "buy_tax"
        );
        assert_eq!(
            check_taxes(None, Some(16.0), &cfg).unwrap_err().policy_check(),
            "sell_tax"
        );
        assert!(check_taxes(None, None, &cfg).is_ok());
    }

    #[test]
    fn daily_counter_rolls_on_date_change() {
        let counter = DailyCounter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.count(), 2);
        counter.force("2001-01-01", 9);
        // reading after a date change resets the window
        assert_eq!(counter.count(), 0);
    }
}
