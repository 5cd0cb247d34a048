//! Constant-product swap math with the venue's 0.25% fee.
//!
//! All arithmetic is integer (u128 intermediates); impact is derived from the
//! integer output so sizing and simulation cannot drift from execution.

pub const FEE_NUMERATOR: u128 = 25;
pub const FEE_DENOMINATOR: u128 = 10_000;

/// Output amount for `amount_in` against reserves, x*y=k with fee deduction.
pub fn swap_output(amount_in: u64, reserve_in: u64, reserve_out: u64) -> u64 {
    if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
        return 0;
    }
    let amount_in_with_fee = amount_in as u128 * (FEE_DENOMINATOR - FEE_NUMERATOR);
    let numerator = amount_in_with_fee * reserve_out as u128;
    let denominator = reserve_in as u128 * FEE_DENOMINATOR + amount_in_with_fee;
    if denominator == 0 {
        return 0;
    }
    (numerator / denominator) as u64
}

/// Inverse: input required to receive `amount_out`.
pub fn swap_input(amount_out: u64, reserve_in: u64, reserve_out: u64) -> u64 {
    if amount_out == 0 || reserve_in == 0 || reserve_out <= amount_out {
        return 0;
    }
    let numerator = reserve_in as u128 * amount_out as u128 * FEE_DENOMINATOR;
    let denominator =
        (reserve_out - amount_out) as u128 * (FEE_DENOMINATOR - FEE_NUMERATOR);
    if denominator == 0 {
        return 0;
    }
    (numerator / denominator + 1) as u64
}

/// Price impact in basis points for a swap of `amount_in`.
///
/// Defined as the relative worsening of the execution price against the spot
/// price: `1 − (out/a) / (R_out/R_in)`, rounded to the nearest bps, never
/// negative.
pub fn price_impact_bps(amount_in: u64, reserve_in: u64, reserve_out: u64) -> u32 {
    if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
        return 0;
    }
    let out = swap_output(amount_in, reserve_in, reserve_out);
    if out == 0 {
        // Swap too small to produce output at this depth: total impact.
        return 10_000;
    }
    let exec_over_spot =
        (out as f64 * reserve_in as f64) / (amount_in as f64 * reserve_out as f64);
    let impact = 1.0 - exec_over_spot;
    if impact <= 0.0 {
        return 0;
    }
    (impact * 10_000.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const R_IN: u64 = 100 * 1_000_000_000; // 100 SOL
    const R_OUT: u64 = 1_000_000_000_000_000; // 1e15 token base units

    #[test]
    fn output_is_bounded_by_reserve() {
        // out(a) <= R_out - 1 for all a > 0
        for a in [1u64, 1_000, 1_000_000_000, u64::MAX / 2] {
            let out = swap_output(a, R_IN, R_OUT);
            assert!(out <= R_OUT - 1, "a={a} out={out}");
        }
    }

    #[test]
    fn output_zero_on_degenerate_inputs() {
        assert_eq!(swap_output(0, R_IN, R_OUT), 0);
        assert_eq!(swap_output(100, 0, R_OUT), 0);
        assert_eq!(swap_output(100, R_IN, 0), 0);
    }

    #[test]
    fn impact_is_monotone_in_amount() {
        let mut prev = 0u32;
        for a in (1..=40u64).map(|i| i * 100_000_000) {
            let impact = price_impact_bps(a, R_IN, R_OUT);
            assert!(impact >= prev, "impact must be non-decreasing: a={a}");
            prev = impact;
        }
    }

    #[test]
    fn impact_includes_fee_floor() {
        // Even a tiny trade pays the 25 bps fee.
        let impact = price_impact_bps(1_000_000, R_IN, R_OUT);
        assert!(impact >= 25, "tiny trade impact {impact} below fee");
        assert!(impact <= 30);
    }

    #[test]
    fn swap_input_inverts_output() {
        let a = 500_000_000u64;
        let out = swap_output(a, R_IN, R_OUT);
        let back = swap_input(out, R_IN, R_OUT);
        // swap_input over-estimates by construction (+1 and floor effects)
        assert!(back >= a);
        assert!(back - a < a / 1_000, "inverse drifted more than 0.1%");
    }

    #[test]
    fn half_sol_impact_on_reference_pool() {
        // On the reference 100 SOL pool, 0.5 SOL lands around 75 bps
        // (50 bps depth + 25 bps fee).
        let impact = price_impact_bps(500_000_000, R_IN, R_OUT);
        assert!((70..=80).contains(&impact), "impact={impact}");
    }
}
