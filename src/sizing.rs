//! Pool-depth-aware buy sizing with a price-impact target and a round-trip
//! exit gate.

use serde::Serialize;
use tracing::info;

use crate::amm_math::{price_impact_bps, swap_output};
use crate::config::Config;
use crate::errors::{SniperError, SniperResult};

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Clone)]
pub struct SizingParams {
    pub min_buy_lamports: u64,
    pub max_buy_lamports: u64,
    pub target_impact_bps: u32,
    pub max_impact_bps: u32,
    /// Never take more than this percentage of the quote reserve.
    pub max_liquidity_pct: f64,
}

impl SizingParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            min_buy_lamports: (cfg.min_buy_sol * LAMPORTS_PER_SOL) as u64,
            max_buy_lamports: (cfg.max_buy_sol * LAMPORTS_PER_SOL) as u64,
            target_impact_bps: cfg.target_impact_bps,
            max_impact_bps: cfg.max_impact_bps,
            max_liquidity_pct: cfg.max_liquidity_pct,
        }
    }
}

/// Which ceiling determined the final size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CappedBy {
    TargetImpact,
    MaxImpact,
    MaxSol,
    MaxLiqPct,
    MinSol,
}

impl CappedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CappedBy::TargetImpact => "target_impact",
            CappedBy::MaxImpact => "max_impact",
            CappedBy::MaxSol => "max_sol",
            CappedBy::MaxLiqPct => "max_liq_pct",
            CappedBy::MinSol => "min_sol",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SizingResult {
    pub recommended_lamports: u64,
    pub expected_impact_bps: u32,
    pub pool_depth_sol: f64,
    pub pool_depth_usd: f64,
    pub liquidity_pct: f64,
    pub capped_by: CappedBy,
}

/// Binary search for the largest buy within `[min, max]` whose impact stays at
/// or under the target, then apply ceilings in order: max impact, max size,
/// liquidity percentage, minimum size.
///
/// Reserves are oriented SOL-in / token-out: `quote_reserve` is the SOL side.
pub fn calculate_optimal_buy_size(
    base_reserve: u64,
    quote_reserve: u64,
    quote_decimals: u8,
    sol_price_usd: f64,
    params: &SizingParams,
) -> SizingResult {
    let pool_depth_sol = quote_reserve as f64 / 10f64.powi(quote_decimals as i32);
    let pool_depth_usd = pool_depth_sol * sol_price_usd;

    let impact_for = |lamports: u64| -> u32 {
        price_impact_bps(lamports, quote_reserve, base_reserve)
    };

    let mut low = params.min_buy_lamports;
    let mut high = params.max_buy_lamports;
    let mut target_amount = params.min_buy_lamports;

    while low <= high {
        let mid = low + (high - low) / 2;
        if impact_for(mid) <= params.target_impact_bps {
            target_amount = mid;
            low = mid + 1;
        } else {
            if mid == 0 {
                break;
            }
            high = mid - 1;
        }
    }

    let mut capped_by = CappedBy::TargetImpact;
    let mut final_amount = target_amount;

    // Hard impact ceiling; decay until under it.
    if impact_for(final_amount) > params.max_impact_bps {
        while final_amount > params.min_buy_lamports {
            if impact_for(final_amount) <= params.max_impact_bps {
                break;
            }
            final_amount = (final_amount as f64 * 0.9) as u64;
        }
        capped_by = CappedBy::MaxImpact;
    }

    if final_amount > params.max_buy_lamports {
        final_amount = params.max_buy_lamports;
        capped_by = CappedBy::MaxSol;
    }

    let max_liq_amount = (quote_reserve as f64 * params.max_liquidity_pct / 100.0) as u64;
    if max_liq_amount > 0 && final_amount > max_liq_amount {
        final_amount = max_liq_amount;
        capped_by = CappedBy::MaxLiqPct;
    }

    if final_amount < params.min_buy_lamports {
        final_amount = params.min_buy_lamports;
        capped_by = CappedBy::MinSol;
    }

    let expected_impact = impact_for(final_amount);
    let liquidity_pct = if quote_reserve > 0 {
        final_amount as f64 / quote_reserve as f64 * 100.0
    } else {
        0.0
    };

    SizingResult {
        recommended_lamports: final_amount,
        expected_impact_bps: expected_impact,
        pool_depth_sol,
        pool_depth_usd,
        liquidity_pct,
        capped_by,
    }
}

/// Outcome of simulating the immediate exit of the tokens a buy would acquire.
#[derive(Debug, Clone)]
pub struct ExitSimulation {
    pub can_exit: bool,
    pub expected_output_lamports: u64,
    pub expected_impact_bps: u32,
    pub warnings: Vec<String>,
}

/// Simulate selling `token_amount` back into the pool with the same AMM math.
/// Used to pre-validate exit viability before entering a position.
pub fn simulate_exit(token_amount: u64, base_reserve: u64, quote_reserve: u64) -> ExitSimulation {
    let mut warnings = Vec::new();

    let expected_out = swap_output(token_amount, base_reserve, quote_reserve);
    let sell_impact_bps = if token_amount == 0 {
        10_000
    } else {
        price_impact_bps(token_amount, base_reserve, quote_reserve)
    };

    if sell_impact_bps > 2_000 {
        warnings.push(format!("high sell impact: {} bps", sell_impact_bps));
    }
    if expected_out < 1_000 {
        warnings.push("near-zero exit value".to_string());
    }

    let can_exit = sell_impact_bps < 3_000 && expected_out > 10_000;

    ExitSimulation {
        can_exit,
        expected_output_lamports: expected_out,
        expected_impact_bps: sell_impact_bps,
        warnings,
    }
}

/// Apply the round-trip gate to a sizing result.
///
/// Drops the candidate when buy + sell impact exceeds the hard limit; scales
/// the size down proportionally (not below the minimum) when it exceeds the
/// soft limit.
pub fn apply_round_trip_gate(
    sizing: &mut SizingResult,
    sell_impact_bps: u32,
    max_round_trip_bps: u32,
    hard_limit_bps: u32,
    min_buy_lamports: u64,
) -> SniperResult<()> {
    let round_trip_bps = sizing.expected_impact_bps + sell_impact_bps;

    if hard_limit_bps > 0 && round_trip_bps > hard_limit_bps {
        return Err(SniperError::policy(
            "round_trip",
            format!("round trip {} bps exceeds hard limit {} bps", round_trip_bps, hard_limit_bps),
        ));
    }

    if round_trip_bps > max_round_trip_bps {
        let reduction = max_round_trip_bps as f64 / round_trip_bps as f64;
        let adjusted =
            ((sizing.recommended_lamports as f64 * reduction) as u64).max(min_buy_lamports);
        info!(
            round_trip_bps,
            max_round_trip_bps,
            from = sizing.recommended_lamports,
            to = adjusted,
            "scaling buy size for round-trip limit"
        );
        sizing.recommended_lamports = adjusted;
    }

    Ok(())
}

/// Slippage band tightened or relaxed by fully-diluted valuation.
pub fn slippage_for_fdv(
    base_slippage_bps: u32,
    fdv_usd: Option<f64>,
    low_threshold_usd: f64,
    low_slippage_bps: u32,
    high_threshold_usd: f64,
    high_slippage_bps: u32,
) -> u32 {
    match fdv_usd {
        Some(fdv) if fdv > 0.0 && fdv < low_threshold_usd => base_slippage_bps.min(low_slippage_bps),
        Some(fdv) if fdv >= high_threshold_usd && high_slippage_bps > 0 => {
            base_slippage_bps.min(high_slippage_bps)
        }
        _ => base_slippage_bps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const R_BASE: u64 = 1_000_000_000_000_000; // 1e15 token units
    const R_QUOTE: u64 = 100 * 1_000_000_000; // 100 SOL

    fn reference_params() -> SizingParams {
        SizingParams {
            min_buy_lamports: 10_000_000,        // 0.01 SOL
            max_buy_lamports: 2_000_000_000,     // 2 SOL
            target_impact_bps: 100,
            max_impact_bps: 500,
            max_liquidity_pct: 2.5,
        }
    }

    #[test]
    fn sizes_to_target_impact_on_reference_pool() {
        let result =
            calculate_optimal_buy_size(R_BASE, R_QUOTE, 9, 200.0, &reference_params());
        assert_eq!(result.capped_by, CappedBy::TargetImpact);
        assert!(result.expected_impact_bps <= 100, "impact={}", result.expected_impact_bps);
        // The target-impact size sits well under both the 2 SOL cap and the
        // 2.5% liquidity cap (2.5 SOL) on this pool.
        assert!(result.recommended_lamports >= 400_000_000);
        assert!(result.recommended_lamports < 1_000_000_000);
        assert!((result.pool_depth_sol - 100.0).abs() < 1e-9);
    }

    #[test]
    fn liquidity_cap_applies_on_deep_price_curve() {
        // A pool so deep that the target-impact size exceeds 2.5% of quote.
        let params = SizingParams {
            max_buy_lamports: u64::MAX / 4,
            ..reference_params()
        };
        let deep_quote = 10 * 1_000_000_000u64; // 10 SOL pool
        let result = calculate_optimal_buy_size(R_BASE, deep_quote, 9, 200.0, &params);
        // 2.5% of 10 SOL = 0.25 SOL; target-impact on a 10 SOL pool is below
        // that, so this pool caps by impact. Force the cap with a huge target.
        let loose = SizingParams { target_impact_bps: 9_999, max_impact_bps: 10_000, ..params };
        let result2 = calculate_optimal_buy_size(R_BASE, deep_quote, 9, 200.0, &loose);
        assert_eq!(result2.capped_by, CappedBy::MaxLiqPct);
        assert_eq!(result2.recommended_lamports, (deep_quote as f64 * 0.025) as u64);
        assert!(result.recommended_lamports <= result2.recommended_lamports);
    }

    #[test]
    fn min_floor_applies_on_dust_pools() {
        let params = reference_params();
        // 0.05 SOL pool: even the minimum buy breaches every impact bound.
        let result = calculate_optimal_buy_size(1_000_000, 50_000_000, 9, 200.0, &params);
        assert_eq!(result.capped_by, CappedBy::MinSol);
        assert_eq!(result.recommended_lamports, params.min_buy_lamports);
    }

    #[test]
    fn exit_simulation_flags_thin_pools() {
        let buy = 500_000_000u64;
        let tokens = swap_output(buy, R_QUOTE, R_BASE);
        let sim = simulate_exit(tokens, R_BASE, R_QUOTE);
        assert!(sim.can_exit);
        assert!(sim.warnings.is_empty());
        assert!(sim.expected_output_lamports < buy, "round trip must lose the fee");

        let dust = simulate_exit(100, R_BASE, R_QUOTE);
        assert!(!dust.can_exit);
        assert!(dust.warnings.iter().any(|w| w.contains("near-zero")));
    }

    #[test]
    fn round_trip_hard_limit_drops() {
        let mut sizing = SizingResult {
            recommended_lamports: 1_000_000_000,
            expected_impact_bps: 1_500,
            pool_depth_sol: 1.0,
            pool_depth_usd: 200.0,
            liquidity_pct: 1.0,
            capped_by: CappedBy::TargetImpact,
        };
        let err = apply_round_trip_gate(&mut sizing, 900, 1_000, 2_000, 10_000_000).unwrap_err();
        assert_eq!(err.policy_check(), "round_trip");
    }

    #[test]
    fn round_trip_soft_limit_scales_down() {
        let mut sizing = SizingResult {
            recommended_lamports: 1_000_000_000,
            expected_impact_bps: 800,
            pool_depth_sol: 1.0,
            pool_depth_usd: 200.0,
            liquidity_pct: 1.0,
            capped_by: CappedBy::TargetImpact,
        };
        apply_round_trip_gate(&mut sizing, 800, 1_000, 2_000, 10_000_000).unwrap();
        // 1600 bps round trip scaled by 1000/1600
        assert_eq!(sizing.recommended_lamports, 625_000_000);
    }

    #[test]
    fn round_trip_scale_respects_min() {
        let mut sizing = SizingResult {
            recommended_lamports: 12_000_000,
            expected_impact_bps: 900,
            pool_depth_sol: 1.0,
            pool_depth_usd: 200.0,
            liquidity_pct: 1.0,
            capped_by: CappedBy::TargetImpact,
        };
        apply_round_trip_gate(&mut sizing, 900, 1_000, 2_000, 10_000_000).unwrap();
        assert_eq!(sizing.recommended_lamports, 10_000_000);
    }

    #[test]
    fn fdv_slippage_bands() {
        assert_eq!(slippage_for_fdv(500, Some(100_000.0), 500_000.0, 400, 5_000_000.0, 500), 400);
        assert_eq!(slippage_for_fdv(500, Some(6_000_000.0), 500_000.0, 400, 5_000_000.0, 450), 450);
        assert_eq!(slippage_for_fdv(500, Some(1_000_000.0), 500_000.0, 400, 5_000_000.0, 450), 500);
        assert_eq!(slippage_for_fdv(500, None, 500_000.0, 400, 5_000_000.0, 450), 500);
    }
}
