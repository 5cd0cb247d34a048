//! Position tracking and automated exits.
//!
//! The manager exclusively owns every `Position`. It polls prices on a fixed
//! cadence, evaluates exit predicates in a fixed order, executes sells
//! bundle-first with an aggressive tip, and persists the full book as JSON
//! lines on every state change so it survives restarts.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

use crate::aggregator::{sign_swap_transaction, AggregatorClient, QuoteParams};
use crate::auto_pause::{clear_flatten_flag, read_control_flags};
use crate::bundle::{build_tip_transaction, BundleClient, TipBand};
use crate::config::{env_bool, env_parse, Config};
use crate::metrics::metrics;
use crate::prices::PriceSource;
use crate::rpc_manager::{RpcBroadcaster, RpcManager};
use crate::wallet::WalletManager;

/// Closed set of exit reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    TimeExit,
    Manual,
    RugDetected,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TimeExit => "time_exit",
            ExitReason::Manual => "manual",
            ExitReason::RugDetected => "rug_detected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub token_mint: String,
    pub token_symbol: String,
    pub entry_signature: String,
    pub entry_slot: u64,
    pub entry_time: DateTime<Utc>,
    pub entry_price_usd: f64,
    pub entry_amount_sol: f64,
    pub entry_amount_tokens: f64,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
    pub source: String,
    #[serde(default)]
    pub source_details: serde_json::Value,
    #[serde(default)]
    pub current_price_usd: f64,
    #[serde(default)]
    pub current_value_sol: f64,
    #[serde(default)]
    pub highest_price_usd: f64,
    #[serde(default)]
    pub lowest_price_usd: f64,
    #[serde(default)]
    pub unrealized_pnl_pct: f64,
    #[serde(default)]
    pub unrealized_pnl_sol: f64,
    #[serde(default)]
    pub trailing_stop_active: bool,
    #[serde(default)]
    pub trailing_stop_price: f64,
    #[serde(default)]
    pub exit_signature: Option<String>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_price_usd: Option<f64>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub realized_pnl_sol: Option<f64>,
}

fn default_token_decimals() -> u8 {
    6
}

impl Position {
    /// Open until the exit time is set; terminal afterwards.
    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }

    pub fn hold_duration_minutes(&self) -> f64 {
        let end = self.exit_time.unwrap_or_else(Utc::now);
        (end - self.entry_time).num_seconds() as f64 / 60.0
    }

    /// Apply a price observation: extremes, unrealized PnL, SOL value.
    pub fn update_price(&mut self, price_usd: f64, sol_price_usd: f64) {
        self.current_price_usd = price_usd;
        if price_usd > self.highest_price_usd {
            self.highest_price_usd = price_usd;
        }
        if price_usd < self.lowest_price_usd || self.lowest_price_usd == 0.0 {
            self.lowest_price_usd = price_usd;
        }
        if self.entry_price_usd > 0.0 && sol_price_usd > 0.0 {
            let current_value_usd = self.entry_amount_tokens * price_usd;
            self.current_value_sol = current_value_usd / sol_price_usd;
            self.unrealized_pnl_pct = (price_usd / self.entry_price_usd - 1.0) * 100.0;
            self.unrealized_pnl_sol = self.current_value_sol - self.entry_amount_sol;
        }
    }

    /// Token amount in base units for the exit swap.
    pub fn token_amount_base_units(&self) -> u64 {
        (self.entry_amount_tokens * 10f64.powi(self.token_decimals as i32)) as u64
    }
}

#[derive(Debug, Clone)]
pub struct ExitConfig {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_stop_pct: f64,
    pub trailing_activation_pct: f64,
    pub enable_trailing_stop: bool,
    pub max_hold_minutes: f64,
    pub enable_time_exit: bool,
    pub rug_drop_pct: f64,
    pub enable_rug_protection: bool,
    pub sell_slippage_bps: u32,
    pub sell_priority_fee_multiplier: f64,
    pub price_poll_interval: Duration,
}

impl ExitConfig {
    pub fn from_env() -> Self {
        Self {
            take_profit_pct: env_parse("TAKE_PROFIT_PCT", 75.0),
            stop_loss_pct: env_parse("STOP_LOSS_PCT", 15.0),
            trailing_stop_pct: env_parse("TRAILING_STOP_PCT", 10.0),
            trailing_activation_pct: env_parse("TRAILING_STOP_ACTIVATION_PCT", 20.0),
            enable_trailing_stop: env_bool("ENABLE_TRAILING_STOP", true),
            max_hold_minutes: env_parse("MAX_HOLD_MINUTES", 60.0),
            enable_time_exit: env_bool("ENABLE_TIME_EXIT", true),
            rug_drop_pct: env_parse("RUG_DROP_PCT", 35.0),
            enable_rug_protection: env_bool("ENABLE_RUG_PROTECTION", true),
            sell_slippage_bps: env_parse("SELL_SLIPPAGE_BPS", 1_000),
            sell_priority_fee_multiplier: env_parse("SELL_PRIORITY_FEE_MULTIPLIER", 2.0),
            price_poll_interval: Duration::from_secs(env_parse("PRICE_POLL_SECONDS", 5u64)),
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: 75.0,
            stop_loss_pct: 15.0,
            trailing_stop_pct: 10.0,
            trailing_activation_pct: 20.0,
            enable_trailing_stop: true,
            max_hold_minutes: 60.0,
            enable_time_exit: true,
            rug_drop_pct: 35.0,
            enable_rug_protection: true,
            sell_slippage_bps: 1_000,
            sell_priority_fee_multiplier: 2.0,
            price_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Evaluate exit predicates in order; the first match wins. Mutates trailing
/// state (arming and ratcheting) as a side effect of evaluation.
pub fn check_exit_conditions(position: &mut Position, cfg: &ExitConfig) -> Option<ExitReason> {
    let pnl_pct = position.unrealized_pnl_pct;

    if cfg.enable_rug_protection && pnl_pct <= -cfg.rug_drop_pct {
        return Some(ExitReason::RugDetected);
    }
    if pnl_pct <= -cfg.stop_loss_pct {
        return Some(ExitReason::StopLoss);
    }
    if pnl_pct >= cfg.take_profit_pct {
        return Some(ExitReason::TakeProfit);
    }
    if cfg.enable_trailing_stop {
        if pnl_pct >= cfg.trailing_activation_pct && !position.trailing_stop_active {
            position.trailing_stop_active = true;
            position.trailing_stop_price =
                position.current_price_usd * (1.0 - cfg.trailing_stop_pct / 100.0);
        }
        if position.trailing_stop_active {
            let new_stop =
                position.highest_price_usd * (1.0 - cfg.trailing_stop_pct / 100.0);
            if new_stop > position.trailing_stop_price {
                position.trailing_stop_price = new_stop;
            }
            if position.current_price_usd <= position.trailing_stop_price {
                return Some(ExitReason::TrailingStop);
            }
        }
    }
    if cfg.enable_time_exit && position.hold_duration_minutes() >= cfg.max_hold_minutes {
        return Some(ExitReason::TimeExit);
    }
    None
}

/// Exit notification delivered to the collaborator hook, exactly once per close.
#[derive(Debug, Clone)]
pub struct ExitEvent {
    pub position: Position,
    pub reason: ExitReason,
}

#[derive(Default)]
struct Book {
    positions: HashMap<String, Position>,
    by_mint: HashMap<String, String>,
    /// Position ids with a sell in flight; claims survive the unlocked
    /// network round-trip so a racing close is a no-op.
    closing: HashSet<String>,
}

pub struct PositionManager {
    cfg: Config,
    exit_cfg: ExitConfig,
    book: Mutex<Book>,
    wallet: Arc<WalletManager>,
    broadcaster: Arc<dyn RpcBroadcaster>,
    rpc: Arc<RpcManager>,
    aggregator: Arc<AggregatorClient>,
    bundle: Option<BundleClient>,
    tip_band: TipBand,
    prices: Arc<PriceSource>,
    exit_tx: mpsc::Sender<ExitEvent>,
}

impl PositionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        exit_cfg: ExitConfig,
        wallet: Arc<WalletManager>,
        broadcaster: Arc<dyn RpcBroadcaster>,
        rpc: Arc<RpcManager>,
        aggregator: Arc<AggregatorClient>,
        prices: Arc<PriceSource>,
        exit_tx: mpsc::Sender<ExitEvent>,
    ) -> Self {
        let bundle = cfg.enable_bundles.then(|| BundleClient::from_config(&cfg));
        let tip_band = TipBand::from_config(&cfg);
        let book = load_positions_file(&cfg.positions_file);
        let open = book.values().filter(|p| p.is_open()).count();
        info!(total = book.len(), open, "positions loaded");

        let mut by_mint = HashMap::new();
        for (id, position) in &book {
            if position.is_open() {
                by_mint.insert(position.token_mint.clone(), id.clone());
                metrics().position_set(&position.token_mint, position.entry_amount_sol);
            }
        }

        Self {
            cfg,
            exit_cfg,
            book: Mutex::new(Book { positions: book, by_mint, closing: HashSet::new() }),
            wallet,
            broadcaster,
            rpc,
            aggregator,
            bundle,
            tip_band,
            prices,
            exit_tx,
        }
    }

    /// Create and take ownership of a new position (handed off by execution).
    #[allow(clippy::too_many_arguments)]
    pub async fn add_position(
        &self,
        token_mint: &str,
        token_symbol: &str,
        entry_signature: &str,
        entry_slot: u64,
        entry_price_usd: f64,
        entry_amount_sol: f64,
        entry_amount_tokens: f64,
        token_decimals: u8,
        source: &str,
        source_details: serde_json::Value,
    ) -> Position {
        let id = format!("{}-{}", &token_mint[..token_mint.len().min(8)], entry_slot);
        let position = Position {
            id: id.clone(),
            token_mint: token_mint.to_string(),
            token_symbol: token_symbol.to_string(),
            entry_signature: entry_signature.to_string(),
            entry_slot,
            entry_time: Utc::now(),
            entry_price_usd,
            entry_amount_sol,
            entry_amount_tokens,
            token_decimals,
            source: source.to_string(),
            source_details,
            current_price_usd: entry_price_usd,
            current_value_sol: entry_amount_sol,
            highest_price_usd: entry_price_usd,
            lowest_price_usd: entry_price_usd,
            unrealized_pnl_pct: 0.0,
            unrealized_pnl_sol: 0.0,
            trailing_stop_active: false,
            trailing_stop_price: 0.0,
            exit_signature: None,
            exit_time: None,
            exit_price_usd: None,
            exit_reason: None,
            realized_pnl_sol: None,
        };

        {
            let mut book = self.book.lock().await;
            book.by_mint.insert(token_mint.to_string(), id.clone());
            book.positions.insert(id.clone(), position.clone());
            save_positions_file(&self.cfg.positions_file, &book.positions);
        }
        metrics().position_set(token_mint, entry_amount_sol);
        append_jsonl(
            &self.cfg.positions_log,
            &serde_json::json!({
                "ts": Utc::now().to_rfc3339(),
                "event": "open",
                "id": id,
                "token": token_mint,
                "symbol": token_symbol,
                "in_amount_sol": entry_amount_sol,
                "entry_price_usd": entry_price_usd,
                "tx": entry_signature,
            }),
        );
        info!(id = id.as_str(), mint = token_mint, sol = entry_amount_sol, "position opened");
        position
    }

    /// Open exposure: per-mint SOL amounts and the total.
    pub async fn open_exposure(&self) -> (HashMap<String, f64>, f64) {
        let book = self.book.lock().await;
        let mut per_token = HashMap::new();
        let mut total = 0.0;
        for position in book.positions.values().filter(|p| p.is_open()) {
            *per_token.entry(position.token_mint.clone()).or_insert(0.0) +=
                position.entry_amount_sol;
            total += position.entry_amount_sol;
        }
        (per_token, total)
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        let book = self.book.lock().await;
        book.positions.values().filter(|p| p.is_open()).cloned().collect()
    }

    pub async fn has_open_position(&self, token_mint: &str) -> bool {
        let book = self.book.lock().await;
        book.by_mint.contains_key(token_mint)
    }

    /// The monitoring loop. Runs until shutdown; persists the book on exit.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.exit_cfg.price_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval = ?self.exit_cfg.price_poll_interval, "position monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let flags = read_control_flags(&self.cfg.pause_file, &self.cfg.flatten_file);
                    if flags.flatten {
                        warn!("flatten flag present; draining all positions");
                        self.flatten_all().await;
                        clear_flatten_flag(&self.cfg.flatten_file);
                        continue;
                    }
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    let book = self.book.lock().await;
                    save_positions_file(&self.cfg.positions_file, &book.positions);
                    info!("position monitor stopped; book persisted");
                    return;
                }
            }
        }
    }

    /// One polling pass: refresh prices, update books, fire exits.
    pub async fn poll_once(&self) {
        let open_mints: Vec<String> = {
            let book = self.book.lock().await;
            book.positions
                .values()
                .filter(|p| p.is_open())
                .map(|p| p.token_mint.clone())
                .collect()
        };
        if open_mints.is_empty() {
            return;
        }

        let sol_price = self.prices.sol_price_usd().await;
        let token_prices = self.prices.token_prices(&open_mints).await;

        // Decide exits under the lock, then execute them concurrently; the
        // in-flight markers in close_position keep each position single-sell.
        let mut to_close: Vec<(String, ExitReason, f64)> = Vec::new();
        {
            let mut book = self.book.lock().await;
            let mut dirty = false;
            for position in book.positions.values_mut().filter(|p| p.is_open()) {
                let Some(price) = token_prices.get(&position.token_mint) else {
                    continue;
                };
                position.update_price(*price, sol_price);
                dirty = true;
                if let Some(reason) = check_exit_conditions(position, &self.exit_cfg) {
                    to_close.push((position.id.clone(), reason, *price));
                }
            }
            if dirty {
                save_positions_file(&self.cfg.positions_file, &book.positions);
            }
        }

        join_all(to_close.into_iter().map(|(id, reason, price)| async move {
            if let Err(e) = self.close_position(&id, reason, Some(price)).await {
                error!(id = id.as_str(), reason = reason.as_str(), error = %e, "exit failed");
            }
        }))
        .await;
    }

    /// Close a position. The book lock is held only to snapshot and to commit;
    /// the sell itself runs unlocked so other positions keep trading. A close
    /// racing another close (or an already-closed position) is a no-op: the
    /// in-flight marker claims the position for the duration of the sell.
    pub async fn close_position(
        &self,
        position_id: &str,
        reason: ExitReason,
        exit_price_usd: Option<f64>,
    ) -> anyhow::Result<Option<String>> {
        let snapshot = {
            let mut book = self.book.lock().await;
            let snapshot = match book.positions.get(position_id) {
                Some(position) if position.is_open() => position.clone(),
                _ => return Ok(None),
            };
            if !book.closing.insert(position_id.to_string()) {
                return Ok(None);
            }
            snapshot
        };

        // Rug exits race the drain; they pay panic-grade slippage and fees.
        let panic = matches!(reason, ExitReason::RugDetected);
        let sell_result = self.execute_sell(&snapshot, panic).await;

        let mut book = self.book.lock().await;
        book.closing.remove(position_id);
        let sig = match sell_result {
            Some(sig) => sig,
            None => {
                warn!(id = position_id, reason = reason.as_str(), "sell failed; position stays open");
                return Ok(None);
            }
        };

        let Some(position) = book.positions.get_mut(position_id) else {
            return Ok(None);
        };
        position.exit_signature = Some(sig.clone());
        position.exit_time = Some(Utc::now());
        position.exit_price_usd = Some(exit_price_usd.unwrap_or(position.current_price_usd));
        position.exit_reason = Some(reason);
        position.realized_pnl_sol = Some(position.unrealized_pnl_sol);
        let closed = position.clone();
        book.by_mint.remove(&closed.token_mint);
        save_positions_file(&self.cfg.positions_file, &book.positions);
        drop(book);

        metrics().position_remove(&closed.token_mint);
        metrics().record_pnl(
            &closed.token_mint,
            &closed.token_symbol,
            closed.entry_amount_sol,
            closed.entry_amount_sol + closed.unrealized_pnl_sol,
            closed.unrealized_pnl_sol,
        );
        append_jsonl(
            &self.cfg.pnl_log,
            &serde_json::json!({
                "ts": Utc::now().to_rfc3339(),
                "token": closed.token_mint,
                "symbol": closed.token_symbol,
                "in_amount_sol": closed.entry_amount_sol,
                "pnl_sol": closed.realized_pnl_sol,
                "reason": reason.as_str(),
                "tx": sig,
            }),
        );
        info!(
            id = position_id,
            reason = reason.as_str(),
            pnl_sol = closed.realized_pnl_sol.unwrap_or(0.0),
            "position closed"
        );
        let _ = self
            .exit_tx
            .send(ExitEvent { position: closed, reason })
            .await;
        Ok(Some(sig))
    }

    /// Build and submit the full-size exit sell: aggregator quote path,
    /// bundle-first with an aggressive tip, RPC failover otherwise.
    async fn execute_sell(&self, position: &Position, panic: bool) -> Option<String> {
        let priority_fee = if panic {
            self.cfg.panic_priority_fee_microlamports
        } else {
            (self.cfg.priority_fee_microlamports as f64
                * self.exit_cfg.sell_priority_fee_multiplier) as u64
        };
        let slippage_bps = if panic {
            self.cfg.panic_slippage_bps.min(self.cfg.max_panic_slippage_bps_cap)
        } else {
            self.exit_cfg.sell_slippage_bps
        };
        let params = QuoteParams::sell(
            &self.cfg,
            &position.token_mint,
            position.token_amount_base_units(),
            slippage_bps,
            priority_fee,
        );
        let quote = match self.aggregator.get_quote(&params).await {
            Ok(Some(q)) => q,
            Ok(None) => {
                warn!(mint = position.token_mint.as_str(), "no exit route available");
                return None;
            }
            Err(e) => {
                warn!(mint = position.token_mint.as_str(), error = %e, "exit quote failed");
                return None;
            }
        };
        let tx_bytes = match self
            .aggregator
            .build_swap(
                &quote,
                &self.wallet.pubkey().to_string(),
                priority_fee,
                self.cfg.compute_unit_limit,
            )
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "exit swap build failed");
                return None;
            }
        };
        let tx = match sign_swap_transaction(&tx_bytes, &self.wallet) {
            Ok(tx) => tx,
            Err(e) => {
                error!(error = %e, "exit signing failed");
                return None;
            }
        };

        if let Some(bundle) = &self.bundle {
            let tip = self.tip_band.select(panic, true);
            let mut txs = Vec::with_capacity(2);
            if let Ok(serialized) = bincode::serialize(&tx) {
                txs.push(serialized);
                if let Ok(blockhash) = self.rpc.latest_blockhash().await {
                    if let Ok(tip_tx) = build_tip_transaction(&self.wallet, tip, blockhash) {
                        if let Ok(tip_bytes) = bincode::serialize(&tip_tx) {
                            txs.push(tip_bytes);
                        }
                    }
                }
                match bundle.submit(&txs, tip).await {
                    Ok(bundle_id) => return Some(bundle_id),
                    Err(e) => warn!(error = %e, "exit bundle failed; falling back to RPC"),
                }
            }
        }

        match self.broadcaster.send_transaction(tx, None).await {
            Ok(sig) => Some(sig.to_string()),
            Err(e) => {
                error!(error = %e, "exit RPC send failed");
                None
            }
        }
    }

    /// Drain every open position (operator flag or shutdown request).
    pub async fn flatten_all(&self) {
        let open_ids: Vec<String> = {
            let book = self.book.lock().await;
            book.positions
                .values()
                .filter(|p| p.is_open())
                .map(|p| p.id.clone())
                .collect()
        };
        join_all(open_ids.into_iter().map(|id| async move {
            if let Err(e) = self.close_position(&id, ExitReason::Manual, None).await {
                error!(id = id.as_str(), error = %e, "flatten close failed");
            }
        }))
        .await;
    }
}

/// Write the whole book, one JSON object per line. Crash-safe via
/// write-to-temp-then-rename.
pub fn save_positions_file(path: &str, positions: &HashMap<String, Position>) {
    let target = Path::new(path);
    if let Some(parent) = target.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let tmp = target.with_extension("tmp");
    let mut lines = String::new();
    let mut ordered: Vec<&Position> = positions.values().collect();
    ordered.sort_by(|a, b| a.entry_time.cmp(&b.entry_time));
    for position in ordered {
        match serde_json::to_string(position) {
            Ok(line) => {
                lines.push_str(&line);
                lines.push('\n');
            }
            Err(e) => error!(error = %e, "position serialization failed"),
        }
    }
    if let Err(e) = std::fs::write(&tmp, lines).and_then(|_| std::fs::rename(&tmp, target)) {
        error!(error = %e, path, "positions save failed");
    }
}

/// Load the book from a JSON-lines file. Unreadable lines are skipped.
pub fn load_positions_file(path: &str) -> HashMap<String, Position> {
    let mut positions = HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return positions;
    };
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<Position>(line) {
            Ok(position) => {
                positions.insert(position.id.clone(), position);
            }
            Err(e) => warn!(error = %e, "skipping unreadable position line"),
        }
    }
    positions
}

fn append_jsonl(path: &str, value: &serde_json::Value) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut f) => {
            let _ = writeln!(f, "{value}");
        }
        Err(e) => warn!(error = %e, path, "log append failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_position(entry_price: f64) -> Position {
        Position {
            id: "Mint1234-100".into(),
            token_mint: "Mint1234abcd".into(),
            token_symbol: "TEST".into(),
            entry_signature: "sig".into(),
            entry_slot: 100,
            entry_time: Utc::now(),
            entry_price_usd: entry_price,
            entry_amount_sol: 0.5,
            entry_amount_tokens: 1_000.0,
            token_decimals: 6,
            source: "new_pool".into(),
            source_details: serde_json::Value::Null,
            current_price_usd: entry_price,
            current_value_sol: 0.5,
            highest_price_usd: entry_price,
            lowest_price_usd: entry_price,
            unrealized_pnl_pct: 0.0,
            unrealized_pnl_sol: 0.0,
            trailing_stop_active: false,
            trailing_stop_price: 0.0,
            exit_signature: None,
            exit_time: None,
            exit_price_usd: None,
            exit_reason: None,
            realized_pnl_sol: None,
        }
    }

    fn tick(position: &mut Position, price: f64, cfg: &ExitConfig) -> Option<ExitReason> {
        position.update_price(price, 200.0);
        check_exit_conditions(position, cfg)
    }

    #[test]
    fn take_profit_fires_at_threshold() {
        let cfg = ExitConfig::default();
        let mut position = open_position(1.0);
        assert_eq!(tick(&mut position, 1.2, &cfg), None);
        assert_eq!(tick(&mut position, 1.5, &cfg), None);
        let reason = tick(&mut position, 1.76, &cfg);
        assert_eq!(reason, Some(ExitReason::TakeProfit));
        assert!((position.unrealized_pnl_pct - 76.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_fires_exactly_at_threshold() {
        let cfg = ExitConfig::default();
        let mut position = open_position(1.0);
        // price exactly at entry · (1 − sl/100)
        let reason = tick(&mut position, 0.85, &cfg);
        assert_eq!(reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn rug_outranks_stop_loss() {
        let cfg = ExitConfig::default();
        let mut position = open_position(1.0);
        let reason = tick(&mut position, 0.60, &cfg);
        assert_eq!(reason, Some(ExitReason::RugDetected));
    }

    #[test]
    fn trailing_stop_arms_ratchets_and_fires() {
        let cfg = ExitConfig::default();
        let mut position = open_position(1.0);

        assert_eq!(tick(&mut position, 1.15, &cfg), None);
        assert!(!position.trailing_stop_active, "below activation threshold");

        assert_eq!(tick(&mut position, 1.25, &cfg), None);
        assert!(position.trailing_stop_active, "armed at +25%");
        assert!((position.trailing_stop_price - 1.125).abs() < 1e-9);

        assert_eq!(tick(&mut position, 1.40, &cfg), None);
        assert!((position.trailing_stop_price - 1.26).abs() < 1e-9, "ratcheted from the peak");

        // equal to the stop triggers
        let reason = tick(&mut position, 1.26, &cfg);
        assert_eq!(reason, Some(ExitReason::TrailingStop));
    }

    #[test]
    fn trailing_never_fires_before_activation() {
        let cfg = ExitConfig::default();
        let mut position = open_position(1.0);
        // rises then falls back without ever reaching +20%
        for price in [1.10, 1.15, 1.05, 1.00, 0.95] {
            let reason = tick(&mut position, price, &cfg);
            assert_ne!(reason, Some(ExitReason::TrailingStop));
        }
        assert!(!position.trailing_stop_active);
    }

    #[test]
    fn time_exit_after_max_hold() {
        let cfg = ExitConfig::default();
        let mut position = open_position(1.0);
        position.entry_time = Utc::now() - chrono::Duration::minutes(61);
        let reason = tick(&mut position, 1.01, &cfg);
        assert_eq!(reason, Some(ExitReason::TimeExit));
    }

    #[test]
    fn update_price_tracks_extremes_and_pnl() {
        let mut position = open_position(2.0);
        position.update_price(3.0, 200.0);
        position.update_price(1.0, 200.0);
        position.update_price(2.5, 200.0);
        assert!((position.highest_price_usd - 3.0).abs() < 1e-9);
        assert!((position.lowest_price_usd - 1.0).abs() < 1e-9);
        assert!((position.unrealized_pnl_pct - 25.0).abs() < 1e-9);
        // 1000 tokens * 2.5 USD / 200 USD-per-SOL = 12.5 SOL current value
        assert!((position.current_value_sol - 12.5).abs() < 1e-9);
    }

    #[test]
    fn token_amount_base_units_uses_decimals() {
        let mut position = open_position(1.0);
        position.entry_amount_tokens = 12.5;
        position.token_decimals = 6;
        assert_eq!(position.token_amount_base_units(), 12_500_000);
        position.token_decimals = 9;
        assert_eq!(position.token_amount_base_units(), 12_500_000_000);
    }

    #[test]
    fn persistence_roundtrip_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.jsonl");
        let path_str = path.to_str().unwrap();

        let mut book = HashMap::new();
        let mut open = open_position(1.0);
        open.id = "open-1".into();
        let mut closed = open_position(2.0);
        closed.id = "closed-1".into();
        closed.exit_time = Some(Utc::now());
        closed.exit_reason = Some(ExitReason::TakeProfit);
        closed.realized_pnl_sol = Some(0.4);
        book.insert(open.id.clone(), open);
        book.insert(closed.id.clone(), closed);

        save_positions_file(path_str, &book);
        let loaded = load_positions_file(path_str);
        assert_eq!(loaded.len(), 2);
        assert!(loaded["open-1"].is_open());
        assert!(!loaded["closed-1"].is_open());
        assert_eq!(loaded["closed-1"].exit_reason, Some(ExitReason::TakeProfit));

        // closed positions are kept for audit, open ones monitored
        let open_count = loaded.values().filter(|p| p.is_open()).count();
        assert_eq!(open_count, 1);
    }

    #[test]
    fn load_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.jsonl");
        let good = serde_json::to_string(&open_position(1.0)).unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n")).unwrap();
        let loaded = load_positions_file(path.to_str().unwrap());
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn exit_reason_labels() {
        assert_eq!(ExitReason::TakeProfit.as_str(), "take_profit");
        assert_eq!(ExitReason::RugDetected.as_str(), "rug_detected");
        let json = serde_json::to_string(&ExitReason::TrailingStop).unwrap();
        assert_eq!(json, "\"trailing_stop\"");
    }
}
