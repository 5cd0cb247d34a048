//! Execution engine: turns a gated candidate into a landed buy.
//!
//! Two paths, tried in order: the direct AMM path for constant-product venues
//! with a known pool, and the aggregator path otherwise. Submission is
//! bundle-first with RPC failover, retries escalate slippage and priority fee
//! against a fresh quote, and a landed buy hands a `Position` to the manager.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use solana_sdk::pubkey::Pubkey;

use crate::aggregator::{sign_swap_transaction, AggregatorClient, Quote, QuoteParams};
use crate::amm_math::swap_output;
use crate::auto_pause::AutoPauseManager;
use crate::bundle::{BundleClient, TipBand};
use crate::config::Config;
use crate::dex::cache::{CacheTier, PoolCache};
use crate::dex::market::parse_market_account;
use crate::dex::pool::{fetch_pool_for_mint, fetch_reserves, PoolState};
use crate::dex::swap_ix::{build_swap_transaction, min_out_with_slippage};
use crate::errors::{OnchainErrorKind, SniperError, SniperResult};
use crate::fee_tuner::{CongestionLevel, CongestionMonitor, PriorityFeeTuner};
use crate::gate::{DailyCounter, GateReport, RiskGate};
use crate::metrics::{metrics, TradeRecord};
use crate::observability::CorrelationId;
use crate::positions::PositionManager;
use crate::prices::PriceSource;
use crate::rpc_manager::{RpcBroadcaster, RpcManager};
use crate::sizing::{
    apply_round_trip_gate, calculate_optimal_buy_size, simulate_exit, slippage_for_fdv,
    CappedBy, SizingParams, LAMPORTS_PER_SOL,
};
use crate::types::{wsol_pubkey, CandidateReceiver, LaunchCandidate};
use crate::wallet::WalletManager;

/// Escalated slippage for a retry attempt, capped.
pub fn slippage_for_attempt(base_bps: u32, step_bps: u32, attempt: u32, cap_bps: u32) -> u32 {
    base_bps.saturating_add(step_bps.saturating_mul(attempt)).min(cap_bps)
}

/// Escalated priority fee for a retry attempt.
pub fn fee_for_attempt(base: u64, step: u64, attempt: u32) -> u64 {
    base.saturating_add(step.saturating_mul(attempt as u64))
}

/// Network-aware fee floor: under high or critical congestion the bid follows
/// at least the cluster's median recently-paid prioritization fee.
pub fn apply_network_fee_floor(
    fee: u64,
    level: CongestionLevel,
    network_p50: Option<u64>,
) -> u64 {
    match (level, network_p50) {
        (CongestionLevel::High | CongestionLevel::Critical, Some(p50)) if p50 > fee => p50,
        _ => fee,
    }
}

/// Fixed-path buy size in SOL: percentage of balance when configured,
/// otherwise the default, always capped per trade.
pub fn determine_buy_size_sol(cfg: &Config, wallet_balance_sol: Option<f64>) -> f64 {
    let mut size = cfg.default_buy_sol;
    if cfg.balance_sizing_pct > 0.0 {
        if let Some(balance) = wallet_balance_sol {
            let sized = balance * cfg.balance_sizing_pct / 100.0;
            if sized > 0.0 {
                size = sized;
            }
        }
    }
    size.min(cfg.max_per_trade_sol).max(cfg.min_buy_sol)
}

#[derive(Debug, Clone)]
pub struct BuyOutcome {
    pub signature: String,
    pub path: &'static str,
    pub amount_lamports: u64,
    pub expected_impact_bps: u32,
    pub capped_by: Option<CappedBy>,
    pub attempts: u32,
    pub priority_fee: u64,
    pub dry_run: bool,
    pub pool_cache_hit: bool,
    pub token_decimals: u8,
}

pub struct ExecutionEngine {
    cfg: Config,
    rpc: Arc<RpcManager>,
    broadcaster: Arc<dyn RpcBroadcaster>,
    wallet: Arc<WalletManager>,
    aggregator: Arc<AggregatorClient>,
    bundle: Option<BundleClient>,
    tip_band: TipBand,
    fee_tuner: Option<Arc<PriorityFeeTuner>>,
    congestion: Option<Arc<CongestionMonitor>>,
    auto_pause: Arc<AutoPauseManager>,
    pool_cache: Arc<PoolCache>,
    positions: Arc<PositionManager>,
    prices: Arc<PriceSource>,
    daily: Arc<DailyCounter>,
    /// Tokens this run has entered; no second entry is ever attempted.
    traded_tokens: Mutex<HashSet<String>>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        rpc: Arc<RpcManager>,
        broadcaster: Arc<dyn RpcBroadcaster>,
        wallet: Arc<WalletManager>,
        aggregator: Arc<AggregatorClient>,
        fee_tuner: Option<Arc<PriorityFeeTuner>>,
        congestion: Option<Arc<CongestionMonitor>>,
        auto_pause: Arc<AutoPauseManager>,
        pool_cache: Arc<PoolCache>,
        positions: Arc<PositionManager>,
        prices: Arc<PriceSource>,
        daily: Arc<DailyCounter>,
    ) -> Self {
        let bundle = cfg.enable_bundles.then(|| BundleClient::from_config(&cfg));
        let tip_band = TipBand::from_config(&cfg);
        Self {
            cfg,
            rpc,
            broadcaster,
            wallet,
            aggregator,
            bundle,
            tip_band,
            fee_tuner,
            congestion,
            auto_pause,
            pool_cache,
            positions,
            prices,
            daily,
            traded_tokens: Mutex::new(HashSet::new()),
        }
    }

    /// Candidate loop: gate, execute, feed outcomes back to the tuner and the
    /// pause fuse, and hand landed buys to the position manager.
    pub async fn run(
        self: Arc<Self>,
        mut cand_rx: CandidateReceiver,
        gate: Arc<RiskGate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("execution engine started");
        loop {
            tokio::select! {
                candidate = cand_rx.recv() => {
                    match candidate {
                        Some(candidate) => self.handle_candidate(candidate, &gate).await,
                        None => {
                            warn!("candidate channel closed; execution engine exiting");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("execution engine stopped");
                    return;
                }
            }
        }
    }

    async fn handle_candidate(&self, candidate: LaunchCandidate, gate: &Arc<RiskGate>) {
        let token_mint = candidate.token_mint().to_string();
        let ctx = CorrelationId::new();

        if !self.cfg.auto_trade_enabled {
            metrics().record_cluster_autotrade("skipped", "disabled");
            return;
        }
        if self.traded_tokens.lock().contains(&token_mint)
            || self.positions.has_open_position(&token_mint).await
        {
            metrics().record_cluster_autotrade("skipped", "already_traded");
            debug!(mint = token_mint.as_str(), "token already entered this run");
            return;
        }

        let report = match gate.evaluate(&candidate).await {
            Ok(report) => report,
            Err(SniperError::Policy { check, message }) => {
                metrics().record_cluster_autotrade("skipped", &check);
                info!(
                    mint = token_mint.as_str(),
                    check = check.as_str(),
                    message = message.as_str(),
                    correlation_id = %ctx,
                    "candidate rejected"
                );
                return;
            }
            Err(e) => {
                metrics().record_cluster_autotrade("skipped", e.category().metric_label());
                warn!(mint = token_mint.as_str(), error = %e, "gate errored; candidate dropped");
                return;
            }
        };

        // Claim the token for the attempt; the guard releases it unless the
        // buy lands (a landed buy keeps the token claimed for the whole run).
        self.traded_tokens.lock().insert(token_mint.clone());
        let claim = scopeguard::guard((), |_| {
            self.traded_tokens.lock().remove(&token_mint);
        });

        let started = Instant::now();
        let result = self.execute_buy(&candidate, &report, &ctx).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        let is_kol = matches!(candidate, LaunchCandidate::KolBuy { .. });

        match result {
            Ok(outcome) => {
                scopeguard::ScopeGuard::into_inner(claim);
                metrics().record_cluster_autotrade("executed", "none");
                if is_kol {
                    metrics().record_kol_snipe(true, latency_ms);
                } else {
                    metrics().record_snipe(true, latency_ms);
                }
                self.record_trade_metrics(&candidate, &report, Some(&outcome), latency_ms, None);
                if let Some(tuner) = &self.fee_tuner {
                    tuner.record_outcome(true, None);
                }
                self.auto_pause.record_success();
                if !outcome.dry_run {
                    self.daily.increment();
                    self.open_position(&candidate, &report, &outcome).await;
                }
                info!(
                    mint = token_mint.as_str(),
                    sig = outcome.signature.as_str(),
                    path = outcome.path,
                    latency_ms,
                    correlation_id = %ctx,
                    "buy landed"
                );
            }
            Err(e) => {
                // Policy rejections inside execution terminate cleanly: no
                // retry, no failure-fuse feedback, labeled counter only.
                if let SniperError::Policy { check, message } = &e {
                    metrics().record_cluster_autotrade("skipped", check);
                    info!(
                        mint = token_mint.as_str(),
                        check = check.as_str(),
                        message = message.as_str(),
                        correlation_id = %ctx,
                        "candidate rejected during execution"
                    );
                    return;
                }

                metrics().record_cluster_autotrade("failed", e.category().metric_label());
                if is_kol {
                    metrics().record_kol_snipe(false, latency_ms);
                } else {
                    metrics().record_snipe(false, latency_ms);
                }
                let kind = match &e {
                    SniperError::Onchain { kind, .. } => *kind,
                    _ => OnchainErrorKind::Unknown,
                };
                self.record_trade_metrics(&candidate, &report, None, latency_ms, Some(kind));
                if let Some(tuner) = &self.fee_tuner {
                    tuner.record_outcome(false, Some(kind));
                }
                self.auto_pause.record_failure(kind.as_str());
                warn!(
                    mint = token_mint.as_str(),
                    error = %e,
                    latency_ms,
                    correlation_id = %ctx,
                    "buy failed"
                );
            }
        }
    }

    /// Effective priority fee: tuner (with a congestion refresh) when enabled.
    /// The recently-paid network fee percentiles act as an auxiliary signal:
    /// under load the tuned bid is floored at the network median, clamped to
    /// the tuner's bounds.
    async fn current_priority_fee(&self) -> u64 {
        let Some(tuner) = &self.fee_tuner else {
            return self.cfg.priority_fee_microlamports;
        };
        if let Some(monitor) = &self.congestion {
            let level = monitor.congestion_level().await;
            tuner.update_congestion(level);
            let mut fee = tuner.current_fee();
            if let Some(network) = monitor.network_fee_percentiles() {
                metrics().update_network_fees(network.p50, network.p75, network.p90, network.max);
                fee = tuner.clamp_fee(apply_network_fee_floor(fee, level, Some(network.p50)));
            }
            metrics().update_fee_state(fee, level.as_str());
            return fee;
        }
        tuner.current_fee()
    }

    /// The buy itself: sizing, path choice, submission, retries.
    async fn execute_buy(
        &self,
        candidate: &LaunchCandidate,
        report: &GateReport,
        ctx: &CorrelationId,
    ) -> SniperResult<BuyOutcome> {
        let token_mint = candidate.token_mint();

        // Balance fuse.
        let wallet_pubkey = self.wallet.pubkey();
        let (balance, critical) = self.auto_pause.check_balance(&self.rpc, &wallet_pubkey).await;
        if critical {
            return Err(SniperError::policy("paused", "critical balance"));
        }
        let balance_sol = (balance > 0).then(|| balance as f64 / LAMPORTS_PER_SOL);

        let priority_fee = self.current_priority_fee().await;

        // Exposure ceilings include the prospective entry.
        let (per_token, total_exposure) = self.positions.open_exposure().await;
        let token_exposure = per_token.get(token_mint).copied().unwrap_or(0.0);

        // Dynamic sizing against the live pool when the venue allows it.
        let mut pool: Option<PoolState> = None;
        let mut pool_cache_hit = false;
        if self.cfg.enable_direct_amm && candidate.venue().supports_direct_amm() {
            (pool, pool_cache_hit) = self.lookup_pool(token_mint).await;
        }

        let amount_lamports;
        let mut expected_impact_bps = 0;
        let mut capped_by = None;
        let mut slippage_bps = slippage_for_fdv(
            self.cfg.slippage_bps_base,
            report.market_data.as_ref().and_then(|d| d.fdv_usd),
            self.cfg.low_fdv_threshold_usd,
            self.cfg.low_fdv_slippage_bps,
            self.cfg.high_fdv_threshold_usd,
            self.cfg.high_fdv_slippage_bps,
        );

        if let (true, Some(pool_state)) = (self.cfg.enable_dynamic_sizing, pool.as_ref()) {
            let params = SizingParams::from_config(&self.cfg);
            let sol_price = self.prices.sol_price_usd().await;
            let mut sizing = calculate_optimal_buy_size(
                pool_state.base_reserve,
                pool_state.quote_reserve,
                pool_state.quote_decimals,
                sol_price,
                &params,
            );
            info!(
                amount_sol = sizing.recommended_lamports as f64 / LAMPORTS_PER_SOL,
                impact_bps = sizing.expected_impact_bps,
                depth_usd = sizing.pool_depth_usd,
                capped = sizing.capped_by.as_str(),
                correlation_id = %ctx,
                "sizing computed"
            );

            if self.cfg.enable_sell_simulation {
                let expected_tokens = swap_output(
                    sizing.recommended_lamports,
                    pool_state.quote_reserve,
                    pool_state.base_reserve,
                );
                let sim = simulate_exit(
                    expected_tokens,
                    pool_state.base_reserve,
                    pool_state.quote_reserve,
                );
                if !sim.can_exit {
                    return Err(SniperError::policy(
                        "exit_simulation",
                        sim.warnings.join("; "),
                    ));
                }
                apply_round_trip_gate(
                    &mut sizing,
                    sim.expected_impact_bps,
                    self.cfg.max_round_trip_bps,
                    self.cfg.round_trip_hard_limit_bps,
                    params.min_buy_lamports,
                )?;
            }

            amount_lamports = sizing.recommended_lamports;
            expected_impact_bps = sizing.expected_impact_bps;
            capped_by = Some(sizing.capped_by);
            // Impact-derived slippage with a buffer, floor 2%.
            slippage_bps = slippage_bps.max(sizing.expected_impact_bps + 100).max(200);
        } else {
            let size_sol = determine_buy_size_sol(&self.cfg, balance_sol);
            amount_lamports = (size_sol * LAMPORTS_PER_SOL) as u64;
        }

        // Exposure clamp after sizing.
        let amount_sol = amount_lamports as f64 / LAMPORTS_PER_SOL;
        if token_exposure + amount_sol > self.cfg.max_per_token_sol {
            return Err(SniperError::policy(
                "exposure",
                format!(
                    "per-token exposure {:.3} + {:.3} exceeds {:.3} SOL",
                    token_exposure, amount_sol, self.cfg.max_per_token_sol
                ),
            ));
        }
        if total_exposure + amount_sol > self.cfg.max_global_sol {
            return Err(SniperError::policy(
                "exposure",
                format!(
                    "global exposure {:.3} + {:.3} exceeds {:.3} SOL",
                    total_exposure, amount_sol, self.cfg.max_global_sol
                ),
            ));
        }
        if amount_lamports < (self.cfg.min_buy_sol * LAMPORTS_PER_SOL) as u64 {
            return Err(SniperError::policy("min_size", "size below minimum buy"));
        }

        let token_decimals = pool.as_ref().map(|p| p.base_decimals).unwrap_or(6);

        // DCA splits the total into tranches on the aggregator path.
        if self.cfg.dca_enabled && self.cfg.dca_tranches > 1 {
            let outcome = self
                .execute_dca(token_mint, amount_lamports, slippage_bps, priority_fee)
                .await?;
            return Ok(BuyOutcome { token_decimals, pool_cache_hit, ..outcome });
        }

        // Path A: direct AMM.
        if let Some(pool_state) = pool.as_ref() {
            match self
                .execute_direct_amm(pool_state, amount_lamports, slippage_bps, priority_fee)
                .await
            {
                Ok(signature) => {
                    return Ok(BuyOutcome {
                        signature,
                        path: "direct_amm",
                        amount_lamports,
                        expected_impact_bps,
                        capped_by,
                        attempts: 1,
                        priority_fee,
                        dry_run: self.cfg.dry_run,
                        pool_cache_hit,
                        token_decimals,
                    });
                }
                Err(e) => {
                    warn!(error = %e, correlation_id = %ctx, "direct AMM path failed; falling back");
                    self.pool_cache.invalidate(token_mint);
                }
            }
        }

        // Path B: aggregator with escalation retries.
        let (signature, attempts, fee_used) = self
            .execute_aggregator_with_retry(token_mint, amount_lamports, slippage_bps, priority_fee)
            .await?;
        Ok(BuyOutcome {
            signature,
            path: "aggregator",
            amount_lamports,
            expected_impact_bps,
            capped_by,
            attempts,
            priority_fee: fee_used,
            dry_run: self.cfg.dry_run,
            pool_cache_hit,
            token_decimals,
        })
    }

    /// Pool lookup: cache first, then a chain query by mint filter.
    async fn lookup_pool(&self, token_mint: &str) -> (Option<PoolState>, bool) {
        if let Some(pool) = self.pool_cache.get(token_mint) {
            return (Some(pool), true);
        }
        let Ok(mint) = Pubkey::from_str(token_mint) else {
            return (None, false);
        };
        match fetch_pool_for_mint(&self.rpc, &self.cfg.amm_program_id, &mint).await {
            Ok(Some(mut pool)) => {
                if let Err(e) = fetch_reserves(&self.rpc, &mut pool).await {
                    warn!(error = %e, "reserve fetch failed");
                    return (None, false);
                }
                self.pool_cache.set(token_mint, pool.clone(), CacheTier::Hot);
                (Some(pool), false)
            }
            Ok(None) => (None, false),
            Err(e) => {
                debug!(error = %e, "pool lookup failed");
                (None, false)
            }
        }
    }

    /// Path A: build, sign, and submit the direct swap.
    async fn execute_direct_amm(
        &self,
        pool: &PoolState,
        amount_lamports: u64,
        slippage_bps: u32,
        priority_fee: u64,
    ) -> SniperResult<String> {
        let market_id = pool
            .market_id
            .ok_or_else(|| SniperError::protocol("pool has no paired market"))?;
        let market_program = Pubkey::from_str(&self.cfg.market_program_id)
            .map_err(|e| SniperError::logic(format!("invalid market program id: {e}")))?;
        let amm_program = Pubkey::from_str(&self.cfg.amm_program_id)
            .map_err(|e| SniperError::logic(format!("invalid AMM program id: {e}")))?;

        let market_account = self
            .rpc
            .get_account(&market_id)
            .await
            .map_err(|e| SniperError::transport_with_source("market fetch failed", e))?;
        let market = parse_market_account(&market_account.data, market_id, &market_program)?;

        let wsol = wsol_pubkey();
        let (reserve_in, reserve_out) = pool.reserves_for_input(&wsol)?;
        let expected_out = swap_output(amount_lamports, reserve_in, reserve_out);
        let min_out = min_out_with_slippage(expected_out, slippage_bps);
        if min_out == 0 {
            return Err(SniperError::onchain(
                OnchainErrorKind::SlippageExceeded,
                "zero min-out at this size",
            ));
        }

        let blockhash = self
            .rpc
            .latest_blockhash()
            .await
            .map_err(|e| SniperError::transport_with_source("blockhash fetch failed", e))?;

        let output_mint =
            if pool.base_mint == wsol { pool.quote_mint } else { pool.base_mint };
        let mut tx = build_swap_transaction(
            pool,
            &market,
            &amm_program,
            &market_program,
            &self.wallet.pubkey(),
            &wsol,
            &output_mint,
            amount_lamports,
            min_out,
            blockhash,
            self.cfg.compute_unit_limit,
            priority_fee,
        )?;
        self.wallet
            .sign_transaction(&mut tx)
            .map_err(|e| SniperError::logic(format!("signing failed: {e}")))?;

        if self.cfg.dry_run {
            return Ok("dry-run".to_string());
        }
        self.submit_transaction(tx, false).await
    }

    /// Path B retry loop: fresh quote per attempt at escalated slippage/fee.
    async fn execute_aggregator_with_retry(
        &self,
        token_mint: &str,
        amount_lamports: u64,
        base_slippage_bps: u32,
        base_fee: u64,
    ) -> SniperResult<(String, u32, u64)> {
        let mut last_error = SniperError::onchain(OnchainErrorKind::Unknown, "no attempts made");

        for attempt in 0..=self.cfg.max_swap_retries {
            let slippage = slippage_for_attempt(
                base_slippage_bps,
                self.cfg.slippage_bps_step,
                attempt,
                self.cfg.max_slippage_bps_cap,
            );
            let fee = fee_for_attempt(base_fee, self.cfg.priority_fee_step, attempt);

            match self
                .try_aggregator_once(token_mint, amount_lamports, slippage, fee)
                .await
            {
                Ok(signature) => return Ok((signature, attempt + 1, fee)),
                Err(e) => {
                    debug!(attempt, slippage, fee, error = %e, "aggregator attempt failed");
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn try_aggregator_once(
        &self,
        token_mint: &str,
        amount_lamports: u64,
        slippage_bps: u32,
        priority_fee: u64,
    ) -> SniperResult<String> {
        let params =
            QuoteParams::buy(&self.cfg, token_mint, amount_lamports, slippage_bps, priority_fee);
        let quote: Quote = self
            .aggregator
            .get_quote(&params)
            .await?
            .ok_or_else(|| SniperError::onchain(OnchainErrorKind::Unknown, "no route"))?;

        if let Some(impact_pct) = quote.price_impact_pct() {
            let max_pct = self.cfg.max_impact_bps as f64 / 100.0;
            if impact_pct > max_pct {
                return Err(SniperError::policy(
                    "price_impact",
                    format!("quoted impact {impact_pct:.2}% exceeds {max_pct:.2}%"),
                ));
            }
        }

        let tx_bytes = self
            .aggregator
            .build_swap(
                &quote,
                &self.wallet.pubkey().to_string(),
                priority_fee,
                self.cfg.compute_unit_limit,
            )
            .await?;
        let tx = sign_swap_transaction(&tx_bytes, &self.wallet)?;

        if self.cfg.dry_run {
            return Ok("dry-run".to_string());
        }
        self.submit_transaction(tx, false).await
    }

    /// DCA mode: equal tranches with an interval sleep, aggregate success when
    /// any tranche lands.
    async fn execute_dca(
        &self,
        token_mint: &str,
        total_lamports: u64,
        slippage_bps: u32,
        priority_fee: u64,
    ) -> SniperResult<BuyOutcome> {
        let tranches = self.cfg.dca_tranches.max(2);
        let tranche_lamports = (total_lamports / tranches as u64).max(100_000);
        let mut first_signature = None;
        let mut attempts = 0;

        for i in 0..tranches {
            attempts += 1;
            match self
                .try_aggregator_once(token_mint, tranche_lamports, slippage_bps, priority_fee)
                .await
            {
                Ok(sig) => {
                    info!(tranche = i, sig = sig.as_str(), "DCA tranche landed");
                    first_signature.get_or_insert(sig);
                }
                Err(e) => warn!(tranche = i, error = %e, "DCA tranche failed"),
            }
            if i + 1 < tranches {
                tokio::time::sleep(Duration::from_secs(self.cfg.dca_interval_secs)).await;
            }
        }

        match first_signature {
            Some(signature) => Ok(BuyOutcome {
                signature,
                path: "dca",
                amount_lamports: total_lamports,
                expected_impact_bps: 0,
                capped_by: None,
                attempts,
                priority_fee,
                dry_run: self.cfg.dry_run,
                pool_cache_hit: false,
                token_decimals: 6,
            }),
            None => Err(SniperError::onchain(
                OnchainErrorKind::Unknown,
                "all DCA tranches failed",
            )),
        }
    }

    /// Bundle-first submission with RPC failover.
    async fn submit_transaction(
        &self,
        tx: solana_sdk::transaction::VersionedTransaction,
        panic: bool,
    ) -> SniperResult<String> {
        if let Some(bundle) = &self.bundle {
            let tip = self.tip_band.select(panic, self.cfg.aggressive_tips);
            if let Ok(serialized) = bincode::serialize(&tx) {
                match bundle.submit(&[serialized], tip).await {
                    Ok(bundle_id) => return Ok(bundle_id),
                    Err(e) => warn!(error = %e, "bundle submit failed; falling back to RPC"),
                }
            }
        }
        match self.broadcaster.send_transaction(tx, None).await {
            Ok(sig) => Ok(sig.to_string()),
            Err(e) => {
                let kind = OnchainErrorKind::classify(&e.to_string());
                Err(SniperError::onchain(kind, e.to_string()))
            }
        }
    }

    /// Hand the landed buy to the position manager.
    async fn open_position(
        &self,
        candidate: &LaunchCandidate,
        report: &GateReport,
        outcome: &BuyOutcome,
    ) {
        let token_mint = candidate.token_mint();
        let amount_sol = outcome.amount_lamports as f64 / LAMPORTS_PER_SOL;
        let sol_price = self.prices.sol_price_usd().await;
        let market = report.market_data.clone();
        let entry_price = match market.as_ref().map(|d| d.price_usd).filter(|p| *p > 0.0) {
            Some(price) => price,
            None => self
                .prices
                .token_prices(&[token_mint.to_string()])
                .await
                .get(token_mint)
                .copied()
                .unwrap_or(0.0),
        };
        let entry_tokens = if entry_price > 0.0 && sol_price > 0.0 {
            amount_sol * sol_price / entry_price
        } else {
            0.0
        };
        let symbol = market
            .and_then(|d| d.symbol)
            .unwrap_or_else(|| token_mint.chars().take(6).collect());

        let position = self
            .positions
            .add_position(
                token_mint,
                &symbol,
                &outcome.signature,
                candidate.slot(),
                entry_price,
                amount_sol,
                entry_tokens,
                outcome.token_decimals,
                candidate.kind_label(),
                serde_json::json!({ "confidence": candidate.confidence() }),
            )
            .await;
        debug!(id = position.id.as_str(), "position handed off");
    }

    fn record_trade_metrics(
        &self,
        candidate: &LaunchCandidate,
        report: &GateReport,
        outcome: Option<&BuyOutcome>,
        latency_ms: f64,
        error: Option<OnchainErrorKind>,
    ) {
        let congestion = self
            .fee_tuner
            .as_ref()
            .map(|t| t.congestion_level().as_str())
            .unwrap_or("normal");
        metrics().record_trade(TradeRecord {
            trade_id: format!("{}-{}", candidate.token_mint(), candidate.slot()),
            token_mint: candidate.token_mint().to_string(),
            timestamp: crate::types::now_ms() as f64 / 1_000.0,
            cluster_type: Some(candidate.kind_label().to_string()),
            confidence: candidate.confidence(),
            path: outcome.map(|o| o.path.to_string()).unwrap_or_else(|| "aggregator".into()),
            requested_amount_sol: outcome
                .map(|o| o.amount_lamports as f64 / LAMPORTS_PER_SOL)
                .unwrap_or(0.0),
            actual_amount_sol: outcome
                .map(|o| o.amount_lamports as f64 / LAMPORTS_PER_SOL)
                .unwrap_or(0.0),
            sizing_method: if self.cfg.enable_dynamic_sizing { "dynamic" } else { "fixed" }
                .to_string(),
            sizing_capped_by: outcome
                .and_then(|o| o.capped_by)
                .map(|c| c.as_str().to_string()),
            pool_depth_usd: 0.0,
            expected_impact_bps: outcome.map(|o| o.expected_impact_bps).unwrap_or(0),
            safety_check_passed: true,
            safety_warnings: report.safety_warnings.clone(),
            total_latency_ms: latency_ms,
            safety_check_ms: report.safety_check_ms,
            attempts: outcome.map(|o| o.attempts).unwrap_or(0),
            success: outcome.is_some(),
            signature: outcome.map(|o| o.signature.clone()),
            error_type: error.map(|k| k.as_str().to_string()),
            priority_fee_used: outcome.map(|o| o.priority_fee).unwrap_or(0),
            congestion_level: congestion.to_string(),
            pool_cache_hit: outcome.map(|o| o.pool_cache_hit).unwrap_or(false),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_escalation_schedule() {
        assert_eq!(slippage_for_attempt(500, 200, 0, 2_000), 500);
        assert_eq!(slippage_for_attempt(500, 200, 1, 2_000), 700);
        assert_eq!(slippage_for_attempt(500, 200, 2, 2_000), 900);
        // capped
        assert_eq!(slippage_for_attempt(500, 200, 10, 2_000), 2_000);
        // panic band caps higher
        assert_eq!(slippage_for_attempt(1_500, 200, 10, 3_000), 3_000);
    }

    #[test]
    fn fee_escalation_schedule() {
        assert_eq!(fee_for_attempt(50_000, 50_000, 0), 50_000);
        assert_eq!(fee_for_attempt(50_000, 50_000, 2), 150_000);
        assert_eq!(fee_for_attempt(u64::MAX, 50_000, 1), u64::MAX);
    }

    #[test]
    fn network_fee_floor_applies_under_load_only() {
        // calm network: the tuned fee stands regardless of the percentile
        assert_eq!(apply_network_fee_floor(50_000, CongestionLevel::Normal, Some(90_000)), 50_000);
        assert_eq!(apply_network_fee_floor(50_000, CongestionLevel::Low, Some(90_000)), 50_000);
        // loaded network: bid follows the median up, never down
        assert_eq!(apply_network_fee_floor(50_000, CongestionLevel::High, Some(90_000)), 90_000);
        assert_eq!(apply_network_fee_floor(50_000, CongestionLevel::Critical, Some(90_000)), 90_000);
        assert_eq!(apply_network_fee_floor(120_000, CongestionLevel::High, Some(90_000)), 120_000);
        // no sample yet: nothing to floor against
        assert_eq!(apply_network_fee_floor(50_000, CongestionLevel::Critical, None), 50_000);
    }

    #[test]
    fn fixed_size_uses_default_and_caps() {
        let cfg = Config::default();
        // default 0.1, no balance sizing
        assert!((determine_buy_size_sol(&cfg, Some(100.0)) - 0.1).abs() < 1e-9);

        let mut cfg = Config::default();
        cfg.balance_sizing_pct = 10.0;
        assert!((determine_buy_size_sol(&cfg, Some(5.0)) - 0.5).abs() < 1e-9);
        // per-trade cap applies
        assert!((determine_buy_size_sol(&cfg, Some(100.0)) - cfg.max_per_trade_sol).abs() < 1e-9);
        // no balance available falls back to the default
        assert!((determine_buy_size_sol(&cfg, None) - 0.1).abs() < 1e-9);
        // minimum floor
        let mut cfg = Config::default();
        cfg.default_buy_sol = 0.001;
        assert!((determine_buy_size_sol(&cfg, None) - cfg.min_buy_sol).abs() < 1e-9);
    }
}
