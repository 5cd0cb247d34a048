//! Auto-pause fuse: halts new entries on consecutive failures, hourly failure
//! budget, or low balance, with timed or manual resume. Also watches the
//! operator control-flag files (`pause.flag`, `flatten.flag`).

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{env_bool, env_parse, Config};
use crate::rpc_manager::RpcManager;
use solana_sdk::pubkey::Pubkey;

#[derive(Debug, Clone)]
pub struct PauseConfig {
    pub max_consecutive_failures: u32,
    pub max_failures_per_hour: u32,
    pub min_balance_lamports: u64,
    pub critical_balance_lamports: u64,
    pub failure_pause_duration: Duration,
    pub balance_check_interval: Duration,
    pub auto_resume_after: Duration,
    pub require_manual_resume_on_critical: bool,
}

impl PauseConfig {
    pub fn from_config(_cfg: &Config) -> Self {
        Self {
            max_consecutive_failures: env_parse("MAX_CONSECUTIVE_FAILURES", 3),
            max_failures_per_hour: env_parse("MAX_FAILURES_PER_HOUR", 10),
            min_balance_lamports: env_parse("MIN_SOL_BALANCE_LAMPORTS", 50_000_000),
            critical_balance_lamports: env_parse("CRITICAL_SOL_BALANCE_LAMPORTS", 10_000_000),
            failure_pause_duration: Duration::from_secs(env_parse(
                "FAILURE_PAUSE_DURATION_SEC",
                300u64,
            )),
            balance_check_interval: Duration::from_secs(env_parse(
                "BALANCE_CHECK_INTERVAL_SEC",
                60u64,
            )),
            auto_resume_after: Duration::from_secs(env_parse("AUTO_RESUME_AFTER_SEC", 1_800u64)),
            require_manual_resume_on_critical: env_bool("REQUIRE_MANUAL_RESUME_ON_CRITICAL", true),
        }
    }
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            max_failures_per_hour: 10,
            min_balance_lamports: 50_000_000,
            critical_balance_lamports: 10_000_000,
            failure_pause_duration: Duration::from_secs(300),
            balance_check_interval: Duration::from_secs(60),
            auto_resume_after: Duration::from_secs(1_800),
            require_manual_resume_on_critical: true,
        }
    }
}

#[derive(Debug)]
struct PauseState {
    is_paused: bool,
    pause_reason: Option<String>,
    pause_start: Option<Instant>,
    resume_at: Option<Instant>,
    requires_manual_resume: bool,
    consecutive_failures: u32,
    failures_this_hour: u32,
    hour_start: Instant,
    last_balance_check: Option<Instant>,
    last_known_balance: u64,
}

/// The fuse. Shared by the gate (reads) and the executor (records outcomes).
pub struct AutoPauseManager {
    config: PauseConfig,
    state: Mutex<PauseState>,
}

impl AutoPauseManager {
    pub fn new(config: PauseConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PauseState {
                is_paused: false,
                pause_reason: None,
                pause_start: None,
                resume_at: None,
                requires_manual_resume: false,
                consecutive_failures: 0,
                failures_this_hour: 0,
                hour_start: Instant::now(),
                last_balance_check: None,
                last_known_balance: 0,
            }),
        }
    }

    /// Is trading allowed right now? Auto-resumes expired timed pauses.
    pub fn is_trading_allowed(&self) -> (bool, Option<String>) {
        let mut state = self.state.lock();
        if !state.is_paused {
            return (true, None);
        }
        if let Some(resume_at) = state.resume_at {
            if Instant::now() >= resume_at && !state.requires_manual_resume {
                Self::resume_locked(&mut state, "auto_resume_timeout");
                return (true, None);
            }
        }
        (false, state.pause_reason.clone())
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
    }

    /// Record a failed execution; returns true when this trip paused trading.
    pub fn record_failure(&self, error_type: &str) -> bool {
        let mut state = self.state.lock();
        if state.hour_start.elapsed() > Duration::from_secs(3_600) {
            state.failures_this_hour = 0;
            state.hour_start = Instant::now();
        }
        state.consecutive_failures += 1;
        state.failures_this_hour += 1;

        if state.consecutive_failures >= self.config.max_consecutive_failures {
            let details = format!(
                "{} consecutive failures, last: {}",
                state.consecutive_failures, error_type
            );
            Self::pause_locked(
                &mut state,
                "consecutive_failures",
                Some(self.config.failure_pause_duration),
                &details,
                false,
                self.config.require_manual_resume_on_critical,
            );
            return true;
        }
        if state.failures_this_hour >= self.config.max_failures_per_hour {
            let details = format!("{} failures in the last hour", state.failures_this_hour);
            Self::pause_locked(
                &mut state,
                "hourly_failure_limit",
                Some(self.config.failure_pause_duration * 2),
                &details,
                false,
                self.config.require_manual_resume_on_critical,
            );
            return true;
        }
        false
    }

    /// Check the wallet balance and trip the appropriate fuse. Returns
    /// `(balance, tripped_critical)`. Rate-limited by the configured interval.
    pub async fn check_balance(&self, rpc: &Arc<RpcManager>, wallet: &Pubkey) -> (u64, bool) {
        {
            let state = self.state.lock();
            if let Some(last) = state.last_balance_check {
                if last.elapsed() < self.config.balance_check_interval {
                    return (state.last_known_balance, false);
                }
            }
        }

        let balance = match rpc.get_balance(wallet).await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "balance check failed");
                return (self.state.lock().last_known_balance, false);
            }
        };

        let mut state = self.state.lock();
        state.last_known_balance = balance;
        state.last_balance_check = Some(Instant::now());

        if balance < self.config.critical_balance_lamports {
            let details = format!("balance critically low: {:.4} SOL", balance as f64 / 1e9);
            Self::pause_locked(&mut state, "critical_balance", None, &details, true, true);
            return (balance, true);
        }
        if balance < self.config.min_balance_lamports {
            let details = format!("balance low: {:.4} SOL", balance as f64 / 1e9);
            Self::pause_locked(
                &mut state,
                "low_balance",
                Some(self.config.auto_resume_after),
                &details,
                false,
                self.config.require_manual_resume_on_critical,
            );
        }
        (balance, false)
    }

    pub fn manual_pause(&self, reason: &str, duration: Duration) {
        let mut state = self.state.lock();
        Self::pause_locked(&mut state, reason, Some(duration), "manual pause requested", false, false);
    }

    pub fn manual_resume(&self) -> bool {
        let mut state = self.state.lock();
        if !state.is_paused {
            return false;
        }
        Self::resume_locked(&mut state, "manual");
        true
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().is_paused
    }

    pub fn pause_reason(&self) -> Option<String> {
        self.state.lock().pause_reason.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    fn pause_locked(
        state: &mut PauseState,
        reason: &str,
        duration: Option<Duration>,
        details: &str,
        force_manual: bool,
        manual_on_critical: bool,
    ) {
        state.is_paused = true;
        state.pause_reason = Some(reason.to_string());
        state.pause_start = Some(Instant::now());
        state.resume_at = duration.map(|d| Instant::now() + d);
        state.requires_manual_resume = force_manual || (duration.is_none() && manual_on_critical);
        warn!(
            reason,
            details,
            manual = state.requires_manual_resume,
            "trading paused"
        );
    }

    fn resume_locked(state: &mut PauseState, trigger: &str) {
        state.is_paused = false;
        state.pause_reason = None;
        state.pause_start = None;
        state.resume_at = None;
        state.requires_manual_resume = false;
        state.consecutive_failures = 0;
        info!(trigger, "trading resumed");
    }
}

/// Operator control flags read from the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    pub pause: bool,
    pub flatten: bool,
}

/// Presence of `pause.flag` blocks new entries; `flatten.flag` drains all
/// positions. Checked synchronously; both files live in the working directory
/// unless overridden.
pub fn read_control_flags(pause_file: &str, flatten_file: &str) -> ControlFlags {
    ControlFlags {
        pause: Path::new(pause_file).exists(),
        flatten: Path::new(flatten_file).exists(),
    }
}

/// Remove the flatten flag after a completed drain so it fires once.
pub fn clear_flatten_flag(flatten_file: &str) {
    if Path::new(flatten_file).exists() {
        if let Err(e) = std::fs::remove_file(flatten_file) {
            warn!(file = flatten_file, error = %e, "failed to clear flatten flag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> PauseConfig {
        PauseConfig {
            failure_pause_duration: Duration::from_millis(20),
            ..PauseConfig::default()
        }
    }

    #[test]
    fn consecutive_failures_trip_fuse() {
        let mgr = AutoPauseManager::new(fast_config());
        assert!(!mgr.record_failure("timeout"));
        assert!(!mgr.record_failure("timeout"));
        assert!(mgr.record_failure("timeout"));
        assert!(mgr.is_paused());
        let (allowed, reason) = mgr.is_trading_allowed();
        assert!(!allowed);
        assert_eq!(reason.as_deref(), Some("consecutive_failures"));
    }

    #[test]
    fn success_resets_failure_streak() {
        let mgr = AutoPauseManager::new(fast_config());
        mgr.record_failure("unknown");
        mgr.record_failure("unknown");
        mgr.record_success();
        assert!(!mgr.record_failure("unknown"));
        assert!(!mgr.is_paused());
    }

    #[test]
    fn timed_pause_auto_resumes() {
        let mgr = AutoPauseManager::new(fast_config());
        for _ in 0..3 {
            mgr.record_failure("unknown");
        }
        assert!(mgr.is_paused());
        std::thread::sleep(Duration::from_millis(30));
        let (allowed, _) = mgr.is_trading_allowed();
        assert!(allowed, "timed pause must auto-resume after its duration");
        assert!(!mgr.is_paused());
    }

    #[test]
    fn hourly_budget_trips_with_double_duration() {
        let config = PauseConfig {
            max_consecutive_failures: 100, // keep the streak fuse out of the way
            max_failures_per_hour: 4,
            ..fast_config()
        };
        let mgr = AutoPauseManager::new(config);
        for _ in 0..3 {
            assert!(!mgr.record_failure("unknown"));
        }
        assert!(mgr.record_failure("unknown"));
        assert_eq!(mgr.pause_reason().as_deref(), Some("hourly_failure_limit"));
    }

    #[test]
    fn manual_pause_and_resume() {
        let mgr = AutoPauseManager::new(PauseConfig::default());
        mgr.manual_pause("manual", Duration::from_secs(3_600));
        assert!(mgr.is_paused());
        assert!(mgr.manual_resume());
        assert!(!mgr.is_paused());
        assert!(!mgr.manual_resume(), "resume on a running engine is a no-op");
    }

    #[test]
    fn control_flags_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let pause = dir.path().join("pause.flag");
        let flatten = dir.path().join("flatten.flag");
        let pause_s = pause.to_str().unwrap();
        let flatten_s = flatten.to_str().unwrap();

        assert_eq!(
            read_control_flags(pause_s, flatten_s),
            ControlFlags { pause: false, flatten: false }
        );

        std::fs::write(&pause, b"").unwrap();
        std::fs::write(&flatten, b"").unwrap();
        assert_eq!(
            read_control_flags(pause_s, flatten_s),
            ControlFlags { pause: true, flatten: true }
        );

        clear_flatten_flag(flatten_s);
        assert!(!read_control_flags(pause_s, flatten_s).flatten);
        assert!(read_control_flags(pause_s, flatten_s).pause, "pause flag is left in place");
    }
}
