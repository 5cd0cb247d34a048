//! Adaptive priority-fee tuner and network congestion monitor.
//!
//! The tuner reacts to send outcomes (cooldown-gated); the congestion monitor
//! derives a level from recent slot times and scales the effective fee.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{env_parse, Config};
use crate::errors::OnchainErrorKind;
use crate::rpc_manager::RpcManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionLevel {
    Low,
    Normal,
    High,
    Critical,
}

impl CongestionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CongestionLevel::Low => "low",
            CongestionLevel::Normal => "normal",
            CongestionLevel::High => "high",
            CongestionLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeeConfig {
    pub base_fee_microlamports: u64,
    pub min_fee_microlamports: u64,
    pub max_fee_microlamports: u64,
    pub success_decrease_pct: f64,
    pub failure_increase_pct: f64,
    pub timeout_increase_pct: f64,
    pub high_congestion_multiplier: f64,
    pub critical_congestion_multiplier: f64,
    pub adjustment_cooldown: Duration,
}

impl FeeConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            base_fee_microlamports: cfg.priority_fee_microlamports,
            min_fee_microlamports: env_parse("MIN_PRIORITY_FEE_MICROLAMPORTS", 10_000),
            max_fee_microlamports: env_parse("MAX_PRIORITY_FEE_MICROLAMPORTS", 1_000_000),
            success_decrease_pct: env_parse("FEE_SUCCESS_DECREASE_PCT", 10.0),
            failure_increase_pct: env_parse("FEE_FAILURE_INCREASE_PCT", 50.0),
            timeout_increase_pct: env_parse("FEE_TIMEOUT_INCREASE_PCT", 25.0),
            high_congestion_multiplier: env_parse("FEE_HIGH_CONGESTION_MULTIPLIER", 2.0),
            critical_congestion_multiplier: env_parse("FEE_CRITICAL_CONGESTION_MULTIPLIER", 4.0),
            adjustment_cooldown: Duration::from_secs(env_parse(
                "FEE_ADJUSTMENT_COOLDOWN_SEC",
                30u64,
            )),
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_fee_microlamports: 50_000,
            min_fee_microlamports: 10_000,
            max_fee_microlamports: 1_000_000,
            success_decrease_pct: 10.0,
            failure_increase_pct: 50.0,
            timeout_increase_pct: 25.0,
            high_congestion_multiplier: 2.0,
            critical_congestion_multiplier: 4.0,
            adjustment_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub success: bool,
    pub error_type: Option<OnchainErrorKind>,
}

#[derive(Debug)]
struct FeeState {
    current_fee: u64,
    last_adjustment: Option<Instant>,
    consecutive_successes: u32,
    consecutive_failures: u32,
    recent_outcomes: VecDeque<Outcome>,
    congestion_level: CongestionLevel,
}

/// Priority-fee state machine. Interior-mutable, non-suspending reads.
pub struct PriorityFeeTuner {
    config: FeeConfig,
    state: Mutex<FeeState>,
}

impl PriorityFeeTuner {
    pub fn new(config: FeeConfig) -> Self {
        let current_fee = config.base_fee_microlamports;
        Self {
            config,
            state: Mutex::new(FeeState {
                current_fee,
                last_adjustment: None,
                consecutive_successes: 0,
                consecutive_failures: 0,
                recent_outcomes: VecDeque::with_capacity(20),
                congestion_level: CongestionLevel::Normal,
            }),
        }
    }

    /// Clamp a fee (tuned or externally sourced) to the configured bounds.
    pub fn clamp_fee(&self, fee: u64) -> u64 {
        fee.clamp(self.config.min_fee_microlamports, self.config.max_fee_microlamports)
    }

    /// Effective fee with the congestion multiplier applied.
    pub fn current_fee(&self) -> u64 {
        let state = self.state.lock();
        let multiplier = match state.congestion_level {
            CongestionLevel::Low => 0.75,
            CongestionLevel::Normal => 1.0,
            CongestionLevel::High => self.config.high_congestion_multiplier,
            CongestionLevel::Critical => self.config.critical_congestion_multiplier,
        };
        self.clamp_fee((state.current_fee as f64 * multiplier) as u64)
    }

    /// Base fee before the congestion multiplier.
    pub fn base_fee(&self) -> u64 {
        self.state.lock().current_fee
    }

    pub fn congestion_level(&self) -> CongestionLevel {
        self.state.lock().congestion_level
    }

    /// Feed a send outcome. Adjustments are gated by the cooldown; outcomes
    /// within the window are dropped from the schedule (not queued).
    pub fn record_outcome(&self, success: bool, error_type: Option<OnchainErrorKind>) -> u64 {
        let mut state = self.state.lock();
        if let Some(last) = state.last_adjustment {
            if last.elapsed() < self.config.adjustment_cooldown {
                return state.current_fee;
            }
        }

        state.recent_outcomes.push_back(Outcome { success, error_type });
        if state.recent_outcomes.len() > 20 {
            state.recent_outcomes.pop_front();
        }

        if success {
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
            if state.consecutive_successes >= 3 {
                let decrease = 1.0 - self.config.success_decrease_pct / 100.0;
                state.current_fee = (state.current_fee as f64 * decrease) as u64;
                state.last_adjustment = Some(Instant::now());
            }
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
            let increase = match error_type {
                Some(OnchainErrorKind::Timeout) | Some(OnchainErrorKind::BlockhashExpired) => {
                    1.0 + self.config.timeout_increase_pct / 100.0
                }
                _ => 1.0 + self.config.failure_increase_pct / 100.0,
            };
            state.current_fee = (state.current_fee as f64 * increase) as u64;
            state.last_adjustment = Some(Instant::now());
        }

        state.current_fee = self.clamp_fee(state.current_fee);
        debug!(fee = state.current_fee, success, "priority fee adjusted");
        state.current_fee
    }

    pub fn update_congestion(&self, level: CongestionLevel) {
        self.state.lock().congestion_level = level;
    }

    pub fn reset_to_base(&self) {
        let mut state = self.state.lock();
        state.current_fee = self.config.base_fee_microlamports;
        state.consecutive_successes = 0;
        state.consecutive_failures = 0;
        state.last_adjustment = None;
    }

    pub fn recent_success_rate(&self) -> f64 {
        let state = self.state.lock();
        if state.recent_outcomes.is_empty() {
            return 0.0;
        }
        state.recent_outcomes.iter().filter(|o| o.success).count() as f64
            / state.recent_outcomes.len() as f64
    }
}

/// Percentile summary of recent prioritization fees.
#[derive(Debug, Clone, Copy)]
pub struct PriorityFeePercentiles {
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
    pub max: u64,
}

impl PriorityFeePercentiles {
    /// Summarize a fee sample; `None` when the sample is empty.
    pub fn from_samples(mut fees: Vec<u64>) -> Option<Self> {
        if fees.is_empty() {
            return None;
        }
        fees.sort_unstable();
        let n = fees.len();
        let at = |p: f64| fees[((n as f64 * p) as usize).min(n - 1)];
        Some(Self {
            p50: at(0.50),
            p75: at(0.75),
            p90: at(0.90),
            max: fees[n - 1],
        })
    }
}

#[derive(Debug)]
struct MonitorState {
    checked_at: Option<Instant>,
    level: CongestionLevel,
    network_fees: Option<PriorityFeePercentiles>,
}

/// Congestion derived from recent slot times, sampled at a bounded rate.
/// Each refresh also samples the recently paid prioritization fees as an
/// auxiliary signal for the effective-fee computation.
pub struct CongestionMonitor {
    rpc: Arc<RpcManager>,
    check_interval: Duration,
    state: Mutex<MonitorState>,
}

impl CongestionMonitor {
    pub fn new(rpc: Arc<RpcManager>, check_interval: Duration) -> Self {
        Self {
            rpc,
            check_interval,
            state: Mutex::new(MonitorState {
                checked_at: None,
                level: CongestionLevel::Normal,
                network_fees: None,
            }),
        }
    }

    /// Classify an average slot time in seconds.
    pub fn classify_slot_time(avg_slot_time: f64) -> CongestionLevel {
        if avg_slot_time < 0.4 {
            CongestionLevel::Low
        } else if avg_slot_time < 0.5 {
            CongestionLevel::Normal
        } else if avg_slot_time < 0.7 {
            CongestionLevel::High
        } else {
            CongestionLevel::Critical
        }
    }

    /// Current level, refreshed from performance samples at most once per
    /// `check_interval`. Transport failures keep the previous level. A
    /// successful refresh also re-samples the network fee percentiles.
    pub async fn congestion_level(&self) -> CongestionLevel {
        {
            let state = self.state.lock();
            if let Some(checked) = state.checked_at {
                if checked.elapsed() < self.check_interval {
                    return state.level;
                }
            }
        }

        let level = match self.rpc.get_recent_performance_samples(10).await {
            Ok(samples) if !samples.is_empty() => {
                let slot_times: Vec<f64> = samples
                    .iter()
                    .filter(|s| s.num_slots > 0)
                    .map(|s| s.sample_period_secs as f64 / s.num_slots as f64)
                    .collect();
                if slot_times.is_empty() {
                    return self.state.lock().level;
                }
                let avg = slot_times.iter().sum::<f64>() / slot_times.len() as f64;
                Self::classify_slot_time(avg)
            }
            _ => return self.state.lock().level,
        };

        let network_fees = match self.rpc.get_recent_prioritization_fees().await {
            Ok(fees) => PriorityFeePercentiles::from_samples(fees),
            Err(_) => None,
        };

        let mut state = self.state.lock();
        state.checked_at = Some(Instant::now());
        state.level = level;
        if network_fees.is_some() {
            state.network_fees = network_fees;
        }
        level
    }

    /// Last sampled network fee percentiles. Non-suspending; `None` until the
    /// first successful refresh.
    pub fn network_fee_percentiles(&self) -> Option<PriorityFeePercentiles> {
        self.state.lock().network_fees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cooldown_config() -> FeeConfig {
        FeeConfig { adjustment_cooldown: Duration::from_secs(0), ..FeeConfig::default() }
    }

    #[test]
    fn three_successes_decrease_fee() {
        let tuner = PriorityFeeTuner::new(no_cooldown_config());
        assert_eq!(tuner.base_fee(), 50_000);
        tuner.record_outcome(true, None);
        tuner.record_outcome(true, None);
        assert_eq!(tuner.base_fee(), 50_000);
        tuner.record_outcome(true, None);
        assert_eq!(tuner.base_fee(), 45_000);
    }

    #[test]
    fn failure_multiplies_by_error_type() {
        let tuner = PriorityFeeTuner::new(no_cooldown_config());
        tuner.record_outcome(false, Some(OnchainErrorKind::Unknown));
        assert_eq!(tuner.base_fee(), 75_000); // ×1.5

        let tuner = PriorityFeeTuner::new(no_cooldown_config());
        tuner.record_outcome(false, Some(OnchainErrorKind::Timeout));
        assert_eq!(tuner.base_fee(), 62_500); // ×1.25

        let tuner = PriorityFeeTuner::new(no_cooldown_config());
        tuner.record_outcome(false, Some(OnchainErrorKind::BlockhashExpired));
        assert_eq!(tuner.base_fee(), 62_500);
    }

    #[test]
    fn fee_clamps_to_bounds() {
        let tuner = PriorityFeeTuner::new(no_cooldown_config());
        for _ in 0..20 {
            tuner.record_outcome(false, Some(OnchainErrorKind::Unknown));
        }
        assert_eq!(tuner.base_fee(), 1_000_000);

        for _ in 0..100 {
            tuner.record_outcome(true, None);
        }
        assert_eq!(tuner.base_fee(), 10_000);
    }

    #[test]
    fn congestion_multiplier_applied_on_read() {
        let tuner = PriorityFeeTuner::new(no_cooldown_config());
        tuner.update_congestion(CongestionLevel::Low);
        assert_eq!(tuner.current_fee(), 37_500);
        tuner.update_congestion(CongestionLevel::Normal);
        assert_eq!(tuner.current_fee(), 50_000);
        tuner.update_congestion(CongestionLevel::High);
        assert_eq!(tuner.current_fee(), 100_000);
        tuner.update_congestion(CongestionLevel::Critical);
        assert_eq!(tuner.current_fee(), 200_000);
        // multiplier never escapes the clamp
        tuner.update_congestion(CongestionLevel::Critical);
        for _ in 0..20 {
            tuner.record_outcome(false, Some(OnchainErrorKind::Unknown));
        }
        assert_eq!(tuner.current_fee(), 1_000_000);
    }

    #[test]
    fn cooldown_gates_adjustments() {
        let config = FeeConfig {
            adjustment_cooldown: Duration::from_secs(3_600),
            ..FeeConfig::default()
        };
        let tuner = PriorityFeeTuner::new(config);
        tuner.record_outcome(false, Some(OnchainErrorKind::Unknown));
        assert_eq!(tuner.base_fee(), 75_000);
        // Second failure inside the cooldown window is ignored.
        tuner.record_outcome(false, Some(OnchainErrorKind::Unknown));
        assert_eq!(tuner.base_fee(), 75_000);
    }

    #[test]
    fn reset_restores_base() {
        let tuner = PriorityFeeTuner::new(no_cooldown_config());
        tuner.record_outcome(false, Some(OnchainErrorKind::Unknown));
        tuner.reset_to_base();
        assert_eq!(tuner.base_fee(), 50_000);
    }

    #[test]
    fn clamp_fee_applies_bounds() {
        let tuner = PriorityFeeTuner::new(no_cooldown_config());
        assert_eq!(tuner.clamp_fee(5_000), 10_000);
        assert_eq!(tuner.clamp_fee(500_000), 500_000);
        assert_eq!(tuner.clamp_fee(5_000_000), 1_000_000);
    }

    #[test]
    fn priority_fee_percentiles() {
        let fees: Vec<u64> = (1..=100).collect();
        let p = PriorityFeePercentiles::from_samples(fees).unwrap();
        assert_eq!(p.p50, 51);
        assert_eq!(p.p75, 76);
        assert_eq!(p.p90, 91);
        assert_eq!(p.max, 100);
        assert!(PriorityFeePercentiles::from_samples(Vec::new()).is_none());
    }

    #[test]
    fn slot_time_classification() {
        assert_eq!(CongestionMonitor::classify_slot_time(0.35), CongestionLevel::Low);
        assert_eq!(CongestionMonitor::classify_slot_time(0.45), CongestionLevel::Normal);
        assert_eq!(CongestionMonitor::classify_slot_time(0.60), CongestionLevel::High);
        assert_eq!(CongestionMonitor::classify_slot_time(0.90), CongestionLevel::Critical);
        // boundaries
        assert_eq!(CongestionMonitor::classify_slot_time(0.4), CongestionLevel::Normal);
        assert_eq!(CongestionMonitor::classify_slot_time(0.5), CongestionLevel::High);
        assert_eq!(CongestionMonitor::classify_slot_time(0.7), CongestionLevel::Critical);
    }
}
