//! Process-wide metrics register.
//!
//! Lock-protected counters, gauges, and latency rings written by every
//! component and rendered as a text surface for external collaborators
//! (read-only to them). Per-trade records are appended to a JSONL log.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

const LATENCY_RING_CAP: usize = 500;
const PNL_EVENTS_CAP: usize = 200;
const RECENT_TRADES_CAP: usize = 100;

/// Per-trade record for the JSONL metrics log.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TradeRecord {
    pub trade_id: String,
    pub token_mint: String,
    pub timestamp: f64,
    pub cluster_type: Option<String>,
    pub confidence: f64,
    /// Path taken: "direct_amm" | "aggregator" | "dca" | "panic_sell".
    pub path: String,
    pub requested_amount_sol: f64,
    pub actual_amount_sol: f64,
    pub sizing_method: String,
    pub sizing_capped_by: Option<String>,
    pub pool_depth_usd: f64,
    pub expected_impact_bps: u32,
    pub safety_check_passed: bool,
    pub safety_warnings: Vec<String>,
    pub total_latency_ms: f64,
    pub safety_check_ms: f64,
    pub attempts: u32,
    pub success: bool,
    pub signature: Option<String>,
    pub error_type: Option<String>,
    pub priority_fee_used: u64,
    pub congestion_level: String,
    pub pool_cache_hit: bool,
}

#[derive(Debug, Clone, Serialize)]
struct PnlEvent {
    token: String,
    symbol: String,
    in_amount_sol: f64,
    out_amount_sol: f64,
    pnl_sol: f64,
    ts: f64,
}

#[derive(Default)]
struct Inner {
    // Aggregates
    total_trades: u64,
    successful_trades: u64,
    failed_trades: u64,
    total_latency_ms: f64,
    latency_samples_ms: VecDeque<f64>,

    // Per-path
    path_sent: HashMap<String, u64>,
    path_failed: HashMap<String, HashMap<String, u64>>,
    path_latency_sum: HashMap<String, f64>,
    path_latency_count: HashMap<String, u64>,

    // PnL
    realized_pnl_sol: f64,
    realized_pnl_positive_sol: f64,
    realized_pnl_negative_sol: f64,
    pnl_wins: u64,
    pnl_losses: u64,
    pnl_events: VecDeque<PnlEvent>,
    exits_executed: u64,

    // Gauges
    open_positions: HashMap<String, f64>,
    priority_fee_current: u64,
    congestion_level: String,
    network_fee_p50: u64,
    network_fee_p75: u64,
    network_fee_p90: u64,
    network_fee_max: u64,

    // Snipes
    snipes_attempted: u64,
    snipes_successful: u64,
    snipes_latency_ms: f64,
    kol_snipes_attempted: u64,
    kol_snipes_successful: u64,
    kol_snipes_latency_ms: u64,

    // Safety / ingest
    safety_blocks: u64,
    safety_warnings: u64,
    parse_errors: u64,
    frames_received: u64,
    frames_deduped: u64,

    // Cluster detection / autotrade, labeled
    cluster_detected: HashMap<String, u64>,
    cluster_autotrade: HashMap<String, u64>,

    recent_trades: VecDeque<TradeRecord>,
}

/// The register. One per process, shared by reference.
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
    metrics_log: Option<String>,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl MetricsRegistry {
    pub fn new(metrics_log: Option<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                congestion_level: "normal".to_string(),
                ..Default::default()
            }),
            metrics_log,
        }
    }

    /// Record a completed trade attempt (any path).
    pub fn record_trade(&self, record: TradeRecord) {
        {
            let mut inner = self.inner.lock();
            inner.total_trades += 1;
            inner.total_latency_ms += record.total_latency_ms;
            if record.success {
                inner.successful_trades += 1;
            } else {
                inner.failed_trades += 1;
            }

            *inner.path_sent.entry(record.path.clone()).or_insert(0) += 1;
            if !record.success {
                let reason = record.error_type.clone().unwrap_or_else(|| "unknown".to_string());
                *inner
                    .path_failed
                    .entry(record.path.clone())
                    .or_default()
                    .entry(reason)
                    .or_insert(0) += 1;
            }
            *inner.path_latency_sum.entry(record.path.clone()).or_insert(0.0) +=
                record.total_latency_ms.max(0.0);
            *inner.path_latency_count.entry(record.path.clone()).or_insert(0) += 1;

            if record.total_latency_ms >= 0.0 {
                inner.latency_samples_ms.push_back(record.total_latency_ms);
                if inner.latency_samples_ms.len() > LATENCY_RING_CAP {
                    inner.latency_samples_ms.pop_front();
                }
            }

            inner.recent_trades.push_back(record.clone());
            if inner.recent_trades.len() > RECENT_TRADES_CAP {
                inner.recent_trades.pop_front();
            }
        }
        self.append_jsonl(&record);
    }

    fn append_jsonl(&self, record: &TradeRecord) {
        let Some(path) = &self.metrics_log else { return };
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(_) => return,
        };
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}") {
                    warn!(error = %e, "failed to append trade record");
                }
            }
            Err(e) => warn!(error = %e, path = path.as_str(), "failed to open metrics log"),
        }
    }

    /// Record a realized PnL event (position close).
    pub fn record_pnl(
        &self,
        token: &str,
        symbol: &str,
        in_amount_sol: f64,
        out_amount_sol: f64,
        pnl_sol: f64,
    ) {
        let mut inner = self.inner.lock();
        inner.realized_pnl_sol += pnl_sol;
        if pnl_sol >= 0.0 {
            inner.pnl_wins += 1;
            inner.realized_pnl_positive_sol += pnl_sol;
        } else {
            inner.pnl_losses += 1;
            inner.realized_pnl_negative_sol += pnl_sol;
        }
        inner.exits_executed += 1;
        inner.pnl_events.push_back(PnlEvent {
            token: token.to_string(),
            symbol: symbol.to_string(),
            in_amount_sol,
            out_amount_sol,
            pnl_sol,
            ts: now_secs(),
        });
        if inner.pnl_events.len() > PNL_EVENTS_CAP {
            inner.pnl_events.pop_front();
        }
    }

    pub fn record_safety_block(&self, warnings_count: usize) {
        let mut inner = self.inner.lock();
        inner.safety_blocks += 1;
        inner.safety_warnings += warnings_count as u64;
    }

    pub fn record_snipe(&self, success: bool, latency_ms: f64) {
        let mut inner = self.inner.lock();
        inner.snipes_attempted += 1;
        if success {
            inner.snipes_successful += 1;
        }
        inner.snipes_latency_ms += latency_ms.max(0.0);
    }

    pub fn record_kol_snipe(&self, success: bool, latency_ms: f64) {
        let mut inner = self.inner.lock();
        inner.kol_snipes_attempted += 1;
        if success {
            inner.kol_snipes_successful += 1;
        }
        inner.kol_snipes_latency_ms += latency_ms.max(0.0) as u64;
    }

    pub fn record_parse_error(&self) {
        self.inner.lock().parse_errors += 1;
    }

    pub fn record_frame(&self, deduped: bool) {
        let mut inner = self.inner.lock();
        inner.frames_received += 1;
        if deduped {
            inner.frames_deduped += 1;
        }
    }

    /// Labeled cluster-detection counter, bucketed by confidence decile.
    pub fn record_cluster_detected(&self, cluster_type: &str, confidence: f64) {
        let bucket = (confidence.clamp(0.0, 1.0) * 10.0).floor() / 10.0;
        let key = format!("{cluster_type}|{bucket:.1}");
        *self.inner.lock().cluster_detected.entry(key).or_insert(0) += 1;
    }

    /// Labeled autotrade-outcome counter: result ∈ {executed, skipped, failed}.
    pub fn record_cluster_autotrade(&self, result: &str, reason: &str) {
        let key = format!("{result}|{reason}");
        *self.inner.lock().cluster_autotrade.entry(key).or_insert(0) += 1;
    }

    pub fn update_fee_state(&self, priority_fee: u64, congestion: &str) {
        let mut inner = self.inner.lock();
        inner.priority_fee_current = priority_fee;
        inner.congestion_level = congestion.to_string();
    }

    /// Recently-paid network prioritization fee percentiles (micro-lamports).
    pub fn update_network_fees(&self, p50: u64, p75: u64, p90: u64, max: u64) {
        let mut inner = self.inner.lock();
        inner.network_fee_p50 = p50;
        inner.network_fee_p75 = p75;
        inner.network_fee_p90 = p90;
        inner.network_fee_max = max;
    }

    pub fn position_set(&self, token: &str, amount_sol: f64) {
        self.inner.lock().open_positions.insert(token.to_string(), amount_sol);
    }

    pub fn position_remove(&self, token: &str) {
        self.inner.lock().open_positions.remove(token);
    }

    pub fn open_positions_count(&self) -> usize {
        self.inner.lock().open_positions.len()
    }

    pub fn realized_pnl_sol(&self) -> f64 {
        self.inner.lock().realized_pnl_sol
    }

    pub fn total_trades(&self) -> u64 {
        self.inner.lock().total_trades
    }

    pub fn cluster_autotrade_count(&self, result: &str, reason: &str) -> u64 {
        self.inner
            .lock()
            .cluster_autotrade
            .get(&format!("{result}|{reason}"))
            .copied()
            .unwrap_or(0)
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() - 1) as f64 * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn pnl_24h(inner: &Inner) -> f64 {
        let cutoff = now_secs() - 86_400.0;
        inner.pnl_events.iter().filter(|e| e.ts >= cutoff).map(|e| e.pnl_sol).sum()
    }

    /// Render the text metrics surface.
    pub fn render(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::with_capacity(4_096);

        let mut sorted: Vec<f64> = inner.latency_samples_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let avg_latency = if inner.total_trades > 0 {
            inner.total_latency_ms / inner.total_trades as f64
        } else {
            0.0
        };

        fn push_line(out: &mut String, name: &str, value: String) {
            out.push_str(name);
            out.push(' ');
            out.push_str(&value);
            out.push('\n');
        }

        push_line(&mut out, "trade_total", inner.total_trades.to_string());
        push_line(&mut out, "trade_success", inner.successful_trades.to_string());
        push_line(&mut out, "trade_failed", inner.failed_trades.to_string());
        push_line(&mut out, "trade_avg_latency_ms", format!("{:.1}", avg_latency));
        push_line(&mut out, "trade_latency_p50_ms", format!("{:.1}", Self::percentile(&sorted, 0.5)));
        push_line(&mut out, "trade_latency_p90_ms", format!("{:.1}", Self::percentile(&sorted, 0.9)));
        push_line(&mut out, "trade_latency_p99_ms", format!("{:.1}", Self::percentile(&sorted, 0.99)));
        push_line(&mut out, "realized_pnl_sol", format!("{:.6}", inner.realized_pnl_sol));
        push_line(&mut out, "realized_pnl_sol_24h", format!("{:.6}", Self::pnl_24h(&inner)));
        push_line(&mut out, "realized_pnl_wins", inner.pnl_wins.to_string());
        push_line(&mut out, "realized_pnl_losses", inner.pnl_losses.to_string());
        push_line(&mut out, "exits_executed", inner.exits_executed.to_string());
        push_line(&mut out, "open_positions_count", inner.open_positions.len().to_string());
        push_line(
            &mut out,
            "open_positions_sol_total",
            format!("{:.6}", inner.open_positions.values().sum::<f64>()),
        );
        push_line(
            &mut out,
            "priority_fee_microlamports_current",
            inner.priority_fee_current.to_string(),
        );
        push_line(
            &mut out,
            "network_priority_fee_p50_microlamports",
            inner.network_fee_p50.to_string(),
        );
        push_line(
            &mut out,
            "network_priority_fee_p75_microlamports",
            inner.network_fee_p75.to_string(),
        );
        push_line(
            &mut out,
            "network_priority_fee_p90_microlamports",
            inner.network_fee_p90.to_string(),
        );
        push_line(
            &mut out,
            "network_priority_fee_max_microlamports",
            inner.network_fee_max.to_string(),
        );
        out.push_str(&format!(
            "congestion_level{{level=\"{}\"}} 1\n",
            inner.congestion_level
        ));
        push_line(&mut out, "snipe_attempts_total", inner.snipes_attempted.to_string());
        push_line(&mut out, "snipe_success_total", inner.snipes_successful.to_string());
        push_line(&mut out, "snipe_latency_ms_total", format!("{:.1}", inner.snipes_latency_ms));
        push_line(&mut out, "kol_snipe_attempts_total", inner.kol_snipes_attempted.to_string());
        push_line(&mut out, "kol_snipe_success_total", inner.kol_snipes_successful.to_string());
        push_line(&mut out, "safety_blocks_total", inner.safety_blocks.to_string());
        push_line(&mut out, "safety_warnings_total", inner.safety_warnings.to_string());
        push_line(&mut out, "ingest_frames_total", inner.frames_received.to_string());
        push_line(&mut out, "ingest_frames_deduped_total", inner.frames_deduped.to_string());
        push_line(&mut out, "ingest_parse_errors_total", inner.parse_errors.to_string());

        let mut detected: Vec<_> = inner.cluster_detected.iter().collect();
        detected.sort_by(|a, b| a.0.cmp(b.0));
        for (key, count) in detected {
            if let Some((cluster_type, bucket)) = key.split_once('|') {
                out.push_str(&format!(
                    "cluster_detected_total{{type=\"{cluster_type}\",bucket=\"{bucket}\"}} {count}\n"
                ));
            }
        }
        let mut autotrade: Vec<_> = inner.cluster_autotrade.iter().collect();
        autotrade.sort_by(|a, b| a.0.cmp(b.0));
        for (key, count) in autotrade {
            if let Some((result, reason)) = key.split_once('|') {
                out.push_str(&format!(
                    "cluster_autotrade_total{{result=\"{result}\",reason=\"{reason}\"}} {count}\n"
                ));
            }
        }

        let mut paths: Vec<_> = inner.path_sent.iter().collect();
        paths.sort_by(|a, b| a.0.cmp(b.0));
        for (path, count) in paths {
            out.push_str(&format!("trade_path_sent_total{{path=\"{path}\"}} {count}\n"));
            let sum = inner.path_latency_sum.get(path).copied().unwrap_or(0.0);
            let n = inner.path_latency_count.get(path).copied().unwrap_or(0);
            let avg = if n > 0 { sum / n as f64 } else { 0.0 };
            out.push_str(&format!(
                "trade_path_latency_ms_avg{{path=\"{path}\"}} {avg:.1}\n"
            ));
        }
        let mut failed_paths: Vec<_> = inner.path_failed.iter().collect();
        failed_paths.sort_by(|a, b| a.0.cmp(b.0));
        for (path, reasons) in failed_paths {
            let mut reasons: Vec<_> = reasons.iter().collect();
            reasons.sort_by(|a, b| a.0.cmp(b.0));
            for (reason, count) in reasons {
                out.push_str(&format!(
                    "trade_path_failed_total{{path=\"{path}\",reason=\"{reason}\"}} {count}\n"
                ));
            }
        }

        out
    }
}

static GLOBAL_METRICS: OnceCell<MetricsRegistry> = OnceCell::new();

/// Install the process-wide register (with its JSONL log path). First call wins.
pub fn init_metrics(metrics_log: Option<String>) {
    let _ = GLOBAL_METRICS.set(MetricsRegistry::new(metrics_log));
}

/// Global metrics register.
pub fn metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(|| MetricsRegistry::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, success: bool, latency: f64, error: Option<&str>) -> TradeRecord {
        TradeRecord {
            trade_id: "t".into(),
            token_mint: "M".into(),
            path: path.into(),
            success,
            total_latency_ms: latency,
            error_type: error.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn trade_counters_and_paths() {
        let reg = MetricsRegistry::new(None);
        reg.record_trade(record("aggregator", true, 100.0, None));
        reg.record_trade(record("aggregator", false, 300.0, Some("timeout")));
        reg.record_trade(record("direct_amm", true, 50.0, None));

        let text = reg.render();
        assert!(text.contains("trade_total 3"));
        assert!(text.contains("trade_success 2"));
        assert!(text.contains("trade_failed 1"));
        assert!(text.contains("trade_path_sent_total{path=\"aggregator\"} 2"));
        assert!(text.contains("trade_path_failed_total{path=\"aggregator\",reason=\"timeout\"} 1"));
        assert!(text.contains("trade_path_latency_ms_avg{path=\"direct_amm\"} 50.0"));
    }

    #[test]
    fn latency_percentiles_over_ring() {
        let reg = MetricsRegistry::new(None);
        for i in 1..=100 {
            reg.record_trade(record("aggregator", true, i as f64, None));
        }
        let text = reg.render();
        assert!(text.contains("trade_latency_p50_ms 50.0"), "{text}");
        assert!(text.contains("trade_latency_p90_ms 90.0"));
        assert!(text.contains("trade_latency_p99_ms 99.0"));
    }

    #[test]
    fn latency_ring_is_bounded() {
        let reg = MetricsRegistry::new(None);
        for i in 0..700 {
            reg.record_trade(record("aggregator", true, i as f64, None));
        }
        let inner = reg.inner.lock();
        assert_eq!(inner.latency_samples_ms.len(), LATENCY_RING_CAP);
        // oldest samples dropped
        assert_eq!(*inner.latency_samples_ms.front().unwrap(), 200.0);
    }

    #[test]
    fn pnl_split_and_24h_window() {
        let reg = MetricsRegistry::new(None);
        reg.record_pnl("M1", "AAA", 1.0, 1.5, 0.5);
        reg.record_pnl("M2", "BBB", 1.0, 0.8, -0.2);
        let text = reg.render();
        assert!(text.contains("realized_pnl_sol 0.300000"));
        assert!(text.contains("realized_pnl_sol_24h 0.300000"));
        assert!(text.contains("realized_pnl_wins 1"));
        assert!(text.contains("realized_pnl_losses 1"));
        assert!(text.contains("exits_executed 2"));
    }

    #[test]
    fn cluster_labels_render() {
        let reg = MetricsRegistry::new(None);
        reg.record_cluster_detected("coordinated_buy", 0.92);
        reg.record_cluster_detected("coordinated_buy", 0.95);
        reg.record_cluster_autotrade("skipped", "pool_age");
        let text = reg.render();
        assert!(text.contains("cluster_detected_total{type=\"coordinated_buy\",bucket=\"0.9\"} 2"));
        assert!(text.contains("cluster_autotrade_total{result=\"skipped\",reason=\"pool_age\"} 1"));
        assert_eq!(reg.cluster_autotrade_count("skipped", "pool_age"), 1);
    }

    #[test]
    fn gauges_render() {
        let reg = MetricsRegistry::new(None);
        reg.position_set("M1", 0.5);
        reg.position_set("M2", 0.7);
        reg.update_fee_state(75_000, "high");
        reg.update_network_fees(40_000, 60_000, 90_000, 500_000);
        let text = reg.render();
        assert!(text.contains("open_positions_count 2"));
        assert!(text.contains("open_positions_sol_total 1.200000"));
        assert!(text.contains("priority_fee_microlamports_current 75000"));
        assert!(text.contains("network_priority_fee_p50_microlamports 40000"));
        assert!(text.contains("network_priority_fee_p90_microlamports 90000"));
        assert!(text.contains("network_priority_fee_max_microlamports 500000"));
        reg.position_remove("M1");
        assert_eq!(reg.open_positions_count(), 1);
    }

    #[test]
    fn jsonl_log_appends(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");
        let reg = MetricsRegistry::new(Some(path.to_str().unwrap().to_string()));
        reg.record_trade(record("aggregator", true, 10.0, None));
        reg.record_trade(record("direct_amm", false, 20.0, Some("unknown")));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"path\":\"aggregator\""));
    }
}
