use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::str::FromStr;

/// Read a boolean flag from the environment ("1", "true", "yes", "on").
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Parse a value from the environment, falling back on missing or invalid.
pub fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Read an optional string from the environment (empty treated as missing).
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Comma-separated list from the environment.
pub fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Process-wide engine configuration.
///
/// Loaded once at startup from `config.toml` when present, then every key is
/// overridable from the environment (env wins). Unknown keys are ignored;
/// every field has a documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // --- Endpoints ---
    /// RPC endpoints in failover order. First entry is the primary.
    #[serde(default = "default_rpc_endpoints")]
    pub rpc_endpoints: Vec<String>,
    /// Transaction-firehose websocket endpoints (enhanced `transactionSubscribe`).
    #[serde(default)]
    pub firehose_wss_endpoints: Vec<String>,
    /// Optional bearer token for the firehose provider.
    #[serde(default)]
    pub firehose_token: Option<String>,
    /// Aggregator HTTP base (quote + swap-build, /v6 shape).
    #[serde(default = "default_aggregator_url")]
    pub aggregator_url: String,
    /// Bundle relay submit endpoint.
    #[serde(default = "default_bundle_relay_url")]
    pub bundle_relay_url: String,
    /// Token price HTTP base (dexscreener-shaped pairs API).
    #[serde(default = "default_price_api_url")]
    pub price_api_url: String,
    /// Oracle price HTTP base (hermes-shaped), used first in the SOL price cascade.
    #[serde(default = "default_oracle_api_url")]
    pub oracle_api_url: String,
    /// Oracle feed id for SOL/USD.
    #[serde(default = "default_oracle_sol_feed_id")]
    pub oracle_sol_feed_id: String,
    /// Listen address for the text metrics endpoint.
    #[serde(default = "default_metrics_listen_addr")]
    pub metrics_listen_addr: String,

    // --- Venue program ids (environment-configured per deployment) ---
    #[serde(default = "default_launch_program_id")]
    pub launch_program_id: String,
    #[serde(default = "default_amm_program_id")]
    pub amm_program_id: String,
    #[serde(default = "default_clmm_program_id")]
    pub clmm_program_id: String,
    #[serde(default = "default_aggregator_program_id")]
    pub aggregator_program_id: String,
    #[serde(default = "default_market_program_id")]
    pub market_program_id: String,

    // --- Feature flags ---
    /// Master auto-trade switch. Off means classify-and-log only.
    #[serde(default = "default_true")]
    pub auto_trade_enabled: bool,
    /// Dry run: full pipeline, no broadcast.
    #[serde(default)]
    pub dry_run: bool,
    /// Bundle-first submission.
    #[serde(default = "default_true")]
    pub enable_bundles: bool,
    /// Direct AMM execution path for AMM venues.
    #[serde(default = "default_true")]
    pub enable_direct_amm: bool,
    /// Pool-depth-aware sizing (falls back to fixed size when the pool is unknown).
    #[serde(default = "default_true")]
    pub enable_dynamic_sizing: bool,
    /// Round-trip exit simulation before entry.
    #[serde(default = "default_true")]
    pub enable_sell_simulation: bool,
    #[serde(default = "default_true")]
    pub enable_fee_tuner: bool,
    #[serde(default = "default_true")]
    pub enable_auto_pause: bool,
    #[serde(default = "default_true")]
    pub enable_token_safety: bool,
    /// Require single-hop routes whose dex label is in `dex_preference`.
    #[serde(default)]
    pub require_direct_dex: bool,
    /// Pass onlyDirectRoutes to the aggregator.
    #[serde(default = "default_true")]
    pub only_direct_routes: bool,
    #[serde(default)]
    pub skip_preflight: bool,
    /// Pick the top of the tip band instead of the mid-point.
    #[serde(default)]
    pub aggressive_tips: bool,

    // --- Classification ---
    /// Minimum coordinated-buy confidence to pass the gate.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Distinct buyers required for a coordinated-buy emission.
    #[serde(default = "default_min_coordinated_buyers")]
    pub min_coordinated_buyers: usize,
    /// Single-buy size that triggers an immediate whale emission.
    #[serde(default = "default_whale_threshold_sol")]
    pub whale_threshold_sol: f64,
    /// Slot window W for coordinated detection.
    #[serde(default = "default_slot_window")]
    pub coordinated_slot_window: u64,
    /// KOL allow-list: wallet address -> label.
    #[serde(default)]
    pub kol_wallets: HashMap<String, String>,

    // --- Gate thresholds ---
    /// Quote-side liquidity floor in SOL.
    #[serde(default = "default_min_liquidity_sol")]
    pub min_liquidity_sol: f64,
    /// Pools younger than this are dropped (pre-seed sandwich guard).
    #[serde(default = "default_min_pool_age_secs")]
    pub min_pool_age_secs: u64,
    /// Latest on-chain activity must be within this window.
    #[serde(default = "default_max_tx_age_secs")]
    pub max_tx_age_secs: u64,
    /// Per-day trade cap; 0 = unlimited.
    #[serde(default)]
    pub max_daily_trades: u32,
    #[serde(default = "default_max_buy_tax_pct")]
    pub max_buy_tax_pct: f64,
    #[serde(default = "default_max_sell_tax_pct")]
    pub max_sell_tax_pct: f64,
    #[serde(default = "default_true")]
    pub allow_proxy_contracts: bool,
    /// Mints that bypass safety checks entirely.
    #[serde(default)]
    pub token_whitelist: Vec<String>,

    // --- Sizing ---
    #[serde(default = "default_default_buy_sol")]
    pub default_buy_sol: f64,
    #[serde(default = "default_min_buy_sol")]
    pub min_buy_sol: f64,
    #[serde(default = "default_max_buy_sol")]
    pub max_buy_sol: f64,
    #[serde(default = "default_target_impact_bps")]
    pub target_impact_bps: u32,
    #[serde(default = "default_max_impact_bps")]
    pub max_impact_bps: u32,
    #[serde(default = "default_max_liquidity_pct")]
    pub max_liquidity_pct: f64,
    #[serde(default = "default_max_round_trip_bps")]
    pub max_round_trip_bps: u32,
    #[serde(default = "default_round_trip_hard_limit_bps")]
    pub round_trip_hard_limit_bps: u32,
    /// Size as a percentage of wallet balance; 0 disables.
    #[serde(default)]
    pub balance_sizing_pct: f64,
    #[serde(default = "default_max_per_trade_sol")]
    pub max_per_trade_sol: f64,
    /// Open-exposure cap per token.
    #[serde(default = "default_max_per_token_sol")]
    pub max_per_token_sol: f64,
    /// Open-exposure cap across all positions.
    #[serde(default = "default_max_global_sol")]
    pub max_global_sol: f64,
    #[serde(default = "default_low_fdv_threshold_usd")]
    pub low_fdv_threshold_usd: f64,
    #[serde(default = "default_low_fdv_slippage_bps")]
    pub low_fdv_slippage_bps: u32,
    #[serde(default = "default_high_fdv_threshold_usd")]
    pub high_fdv_threshold_usd: f64,
    #[serde(default = "default_slippage_bps_base")]
    pub high_fdv_slippage_bps: u32,

    // --- Execution ---
    #[serde(default = "default_slippage_bps_base")]
    pub slippage_bps_base: u32,
    #[serde(default = "default_slippage_bps_step")]
    pub slippage_bps_step: u32,
    #[serde(default = "default_max_slippage_bps_cap")]
    pub max_slippage_bps_cap: u32,
    #[serde(default = "default_panic_slippage_bps")]
    pub panic_slippage_bps: u32,
    #[serde(default = "default_max_panic_slippage_bps_cap")]
    pub max_panic_slippage_bps_cap: u32,
    #[serde(default = "default_priority_fee_microlamports")]
    pub priority_fee_microlamports: u64,
    #[serde(default = "default_priority_fee_step")]
    pub priority_fee_step: u64,
    #[serde(default = "default_panic_priority_fee")]
    pub panic_priority_fee_microlamports: u64,
    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,
    #[serde(default = "default_max_swap_retries")]
    pub max_swap_retries: u32,
    #[serde(default = "default_tip_lamports")]
    pub tip_lamports: u64,
    #[serde(default = "default_tip_lamports")]
    pub tip_min_lamports: u64,
    #[serde(default = "default_tip_max_lamports")]
    pub tip_max_lamports: u64,
    #[serde(default = "default_panic_tip_lamports")]
    pub panic_tip_lamports: u64,
    #[serde(default)]
    pub dca_enabled: bool,
    #[serde(default = "default_dca_tranches")]
    pub dca_tranches: u32,
    #[serde(default = "default_dca_interval_secs")]
    pub dca_interval_secs: u64,
    /// Dex labels accepted when enforcing direct routes.
    #[serde(default = "default_dex_preference")]
    pub dex_preference: Vec<String>,

    // --- Timeouts (seconds) ---
    #[serde(default = "default_quote_timeout_secs")]
    pub quote_timeout_secs: u64,
    #[serde(default = "default_swap_build_timeout_secs")]
    pub swap_build_timeout_secs: u64,
    #[serde(default = "default_bundle_timeout_secs")]
    pub bundle_timeout_secs: u64,
    #[serde(default = "default_price_timeout_secs")]
    pub price_timeout_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    // --- Firehose reconnect / keepalive ---
    #[serde(default = "default_wss_reconnect_backoff_ms")]
    pub wss_reconnect_backoff_ms: u64,
    #[serde(default = "default_wss_reconnect_backoff_max_ms")]
    pub wss_reconnect_backoff_max_ms: u64,
    #[serde(default = "default_wss_ping_interval_secs")]
    pub wss_ping_interval_secs: u64,
    #[serde(default = "default_wss_max_silent_ms")]
    pub wss_max_silent_ms: u64,

    // --- Control flags / persistence ---
    #[serde(default = "default_pause_file")]
    pub pause_file: String,
    #[serde(default = "default_flatten_file")]
    pub flatten_file: String,
    #[serde(default = "default_positions_file")]
    pub positions_file: String,
    #[serde(default = "default_positions_log")]
    pub positions_log: String,
    #[serde(default = "default_pnl_log")]
    pub pnl_log: String,
    #[serde(default = "default_metrics_log")]
    pub metrics_log: String,
}

impl Default for Config {
    fn default() -> Self {
        // Serde fills every field from its default fn.
        toml::from_str("").expect("empty config must deserialize")
    }
}

fn default_true() -> bool {
    true
}
fn default_rpc_endpoints() -> Vec<String> {
    vec!["https://api.mainnet-beta.solana.com".to_string()]
}
fn default_aggregator_url() -> String {
    "https://quote-api.jup.ag/v6".to_string()
}
fn default_bundle_relay_url() -> String {
    "https://mainnet.block-engine.jito.wtf/api/v1/bundles".to_string()
}
fn default_price_api_url() -> String {
    "https://api.dexscreener.com/latest/dex".to_string()
}
fn default_oracle_api_url() -> String {
    "https://hermes.pyth.network/api".to_string()
}
fn default_oracle_sol_feed_id() -> String {
    "ef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d".to_string()
}
fn default_metrics_listen_addr() -> String {
    "127.0.0.1:9464".to_string()
}
fn default_launch_program_id() -> String {
    "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P".to_string()
}
fn default_amm_program_id() -> String {
    "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8".to_string()
}
fn default_clmm_program_id() -> String {
    "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc".to_string()
}
fn default_aggregator_program_id() -> String {
    "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4".to_string()
}
fn default_market_program_id() -> String {
    "srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX".to_string()
}
fn default_min_confidence() -> f64 {
    0.5
}
fn default_min_coordinated_buyers() -> usize {
    3
}
fn default_whale_threshold_sol() -> f64 {
    10.0
}
fn default_slot_window() -> u64 {
    2
}
fn default_min_liquidity_sol() -> f64 {
    1.0
}
fn default_min_pool_age_secs() -> u64 {
    120
}
fn default_max_tx_age_secs() -> u64 {
    900
}
fn default_max_buy_tax_pct() -> f64 {
    15.0
}
fn default_max_sell_tax_pct() -> f64 {
    15.0
}
fn default_default_buy_sol() -> f64 {
    0.1
}
fn default_min_buy_sol() -> f64 {
    0.01
}
fn default_max_buy_sol() -> f64 {
    2.0
}
fn default_target_impact_bps() -> u32 {
    100
}
fn default_max_impact_bps() -> u32 {
    500
}
fn default_max_liquidity_pct() -> f64 {
    2.5
}
fn default_max_round_trip_bps() -> u32 {
    1000
}
fn default_round_trip_hard_limit_bps() -> u32 {
    2000
}
fn default_max_per_trade_sol() -> f64 {
    3.0
}
fn default_max_per_token_sol() -> f64 {
    2.0
}
fn default_max_global_sol() -> f64 {
    5.0
}
fn default_low_fdv_threshold_usd() -> f64 {
    500_000.0
}
fn default_low_fdv_slippage_bps() -> u32 {
    400
}
fn default_high_fdv_threshold_usd() -> f64 {
    5_000_000.0
}
fn default_slippage_bps_base() -> u32 {
    500
}
fn default_slippage_bps_step() -> u32 {
    200
}
fn default_max_slippage_bps_cap() -> u32 {
    2000
}
fn default_panic_slippage_bps() -> u32 {
    1500
}
fn default_max_panic_slippage_bps_cap() -> u32 {
    3000
}
fn default_priority_fee_microlamports() -> u64 {
    50_000
}
fn default_priority_fee_step() -> u64 {
    50_000
}
fn default_panic_priority_fee() -> u64 {
    800_000
}
fn default_compute_unit_limit() -> u32 {
    200_000
}
fn default_max_swap_retries() -> u32 {
    2
}
fn default_tip_lamports() -> u64 {
    100_000
}
fn default_tip_max_lamports() -> u64 {
    300_000
}
fn default_panic_tip_lamports() -> u64 {
    300_000
}
fn default_dca_tranches() -> u32 {
    3
}
fn default_dca_interval_secs() -> u64 {
    10
}
fn default_dex_preference() -> Vec<String> {
    vec!["raydium".to_string(), "orca".to_string()]
}
fn default_quote_timeout_secs() -> u64 {
    8
}
fn default_swap_build_timeout_secs() -> u64 {
    8
}
fn default_bundle_timeout_secs() -> u64 {
    5
}
fn default_price_timeout_secs() -> u64 {
    5
}
fn default_rpc_timeout_secs() -> u64 {
    8
}
fn default_wss_reconnect_backoff_ms() -> u64 {
    1_000
}
fn default_wss_reconnect_backoff_max_ms() -> u64 {
    10_000
}
fn default_wss_ping_interval_secs() -> u64 {
    30
}
fn default_wss_max_silent_ms() -> u64 {
    45_000
}
fn default_pause_file() -> String {
    "pause.flag".to_string()
}
fn default_flatten_file() -> String {
    "flatten.flag".to_string()
}
fn default_positions_file() -> String {
    "data/positions.jsonl".to_string()
}
fn default_positions_log() -> String {
    "logs/positions.jsonl".to_string()
}
fn default_pnl_log() -> String {
    "logs/pnl.jsonl".to_string()
}
fn default_metrics_log() -> String {
    "logs/trade_metrics.jsonl".to_string()
}

impl Config {
    /// Load configuration from "config.toml" if present, otherwise defaults,
    /// then apply environment overrides (env wins).
    pub fn load() -> Self {
        let mut cfg = match fs::read_to_string("config.toml") {
            Ok(s) => toml::from_str::<Config>(&s).unwrap_or_default(),
            Err(_) => Config::default(),
        };
        cfg.apply_env();
        cfg.validate().expect("invalid configuration");
        cfg
    }

    /// Environment overrides. Missing or unparseable values leave the field
    /// unchanged; unknown environment keys are ignored.
    pub fn apply_env(&mut self) {
        if let Some(primary) = env_string("SOLANA_RPC_URL") {
            let mut endpoints = vec![primary];
            if let Some(mut fallbacks) = env_list("FALLBACK_RPCS") {
                endpoints.append(&mut fallbacks);
            }
            self.rpc_endpoints = endpoints;
        }
        if let Some(urls) = env_list("FIREHOSE_WS_URLS").or_else(|| env_list("GEYSER_WS_URL")) {
            self.firehose_wss_endpoints = urls;
        }
        if let Some(tok) = env_string("FIREHOSE_TOKEN").or_else(|| env_string("GEYSER_TOKEN")) {
            self.firehose_token = Some(tok);
        }
        if let Some(v) = env_string("AGGREGATOR_API_URL") {
            self.aggregator_url = v;
        }
        if let Some(v) = env_string("BUNDLE_RELAY_URL") {
            self.bundle_relay_url = v;
        }
        if let Some(v) = env_string("PRICE_API_URL") {
            self.price_api_url = v;
        }
        if let Some(v) = env_string("ORACLE_API_URL") {
            self.oracle_api_url = v;
        }
        if let Some(v) = env_string("ORACLE_SOL_FEED_ID") {
            self.oracle_sol_feed_id = v;
        }
        if let Some(v) = env_string("METRICS_LISTEN_ADDR") {
            self.metrics_listen_addr = v;
        }

        if let Some(v) = env_string("LAUNCH_PROGRAM_ID") {
            self.launch_program_id = v;
        }
        if let Some(v) = env_string("AMM_PROGRAM_ID") {
            self.amm_program_id = v;
        }
        if let Some(v) = env_string("CLMM_PROGRAM_ID") {
            self.clmm_program_id = v;
        }
        if let Some(v) = env_string("AGGREGATOR_PROGRAM_ID") {
            self.aggregator_program_id = v;
        }
        if let Some(v) = env_string("MARKET_PROGRAM_ID") {
            self.market_program_id = v;
        }

        self.auto_trade_enabled = env_bool("AUTO_TRADE_ENABLED", self.auto_trade_enabled);
        self.dry_run = env_bool("DRY_RUN", self.dry_run);
        self.enable_bundles = env_bool("ENABLE_BUNDLES", self.enable_bundles);
        self.enable_direct_amm = env_bool("ENABLE_DIRECT_AMM", self.enable_direct_amm);
        self.enable_dynamic_sizing = env_bool("ENABLE_DYNAMIC_SIZING", self.enable_dynamic_sizing);
        self.enable_sell_simulation =
            env_bool("ENABLE_SELL_SIMULATION", self.enable_sell_simulation);
        self.enable_fee_tuner = env_bool("ENABLE_FEE_TUNER", self.enable_fee_tuner);
        self.enable_auto_pause = env_bool("ENABLE_AUTO_PAUSE", self.enable_auto_pause);
        self.enable_token_safety = env_bool("ENABLE_TOKEN_SAFETY_CHECKS", self.enable_token_safety);
        self.require_direct_dex = env_bool("REQUIRE_DIRECT_DEX", self.require_direct_dex);
        self.only_direct_routes = env_bool("ONLY_DIRECT_ROUTES", self.only_direct_routes);
        self.skip_preflight = env_bool("SKIP_PREFLIGHT", self.skip_preflight);
        self.aggressive_tips = env_bool("AGGRESSIVE_TIPS", self.aggressive_tips);

        self.min_confidence = env_parse("MIN_CONFIDENCE", self.min_confidence);
        self.min_coordinated_buyers =
            env_parse("MIN_COORDINATED_BUYERS", self.min_coordinated_buyers);
        self.whale_threshold_sol = env_parse("WHALE_BUY_THRESHOLD_SOL", self.whale_threshold_sol);
        self.coordinated_slot_window =
            env_parse("COORDINATED_SLOT_WINDOW", self.coordinated_slot_window);
        if let Some(entries) = env_list("KOL_WALLETS") {
            // "address:label,address:label"; bare addresses get themselves as label
            self.kol_wallets = entries
                .into_iter()
                .map(|e| match e.split_once(':') {
                    Some((addr, label)) => (addr.trim().to_string(), label.trim().to_string()),
                    None => (e.clone(), e),
                })
                .collect();
        }

        self.min_liquidity_sol = env_parse("MIN_POOL_LIQUIDITY_SOL", self.min_liquidity_sol);
        self.min_pool_age_secs = env_parse("MIN_POOL_AGE_SECS", self.min_pool_age_secs);
        self.max_tx_age_secs = env_parse("MAX_TX_AGE_SECS", self.max_tx_age_secs);
        self.max_daily_trades = env_parse("MAX_DAILY_TRADES", self.max_daily_trades);
        self.max_buy_tax_pct = env_parse("MAX_BUY_TAX_PCT", self.max_buy_tax_pct);
        self.max_sell_tax_pct = env_parse("MAX_SELL_TAX_PCT", self.max_sell_tax_pct);
        self.allow_proxy_contracts = env_bool("ALLOW_PROXY_CONTRACT", self.allow_proxy_contracts);
        if let Some(list) = env_list("TOKEN_WHITELIST") {
            self.token_whitelist = list;
        }

        self.default_buy_sol = env_parse("DEFAULT_BUY_AMOUNT_SOL", self.default_buy_sol);
        self.min_buy_sol = env_parse("MIN_BUY_SOL", self.min_buy_sol);
        self.max_buy_sol = env_parse("MAX_BUY_SOL", self.max_buy_sol);
        self.target_impact_bps = env_parse("TARGET_IMPACT_BPS", self.target_impact_bps);
        self.max_impact_bps = env_parse("MAX_PRICE_IMPACT_BPS", self.max_impact_bps);
        self.max_liquidity_pct = env_parse("MAX_LIQ_PCT_PER_TRADE", self.max_liquidity_pct);
        self.max_round_trip_bps = env_parse("MAX_ROUND_TRIP_BPS", self.max_round_trip_bps);
        self.round_trip_hard_limit_bps =
            env_parse("ROUND_TRIP_HARD_LIMIT_BPS", self.round_trip_hard_limit_bps);
        self.balance_sizing_pct = env_parse("BALANCE_SIZING_PCT", self.balance_sizing_pct);
        self.max_per_trade_sol = env_parse("MAX_PER_TRADE_SOL", self.max_per_trade_sol);
        self.max_per_token_sol = env_parse("MAX_PER_TOKEN_SOL", self.max_per_token_sol);
        self.max_global_sol = env_parse("MAX_GLOBAL_SOL", self.max_global_sol);
        self.low_fdv_threshold_usd =
            env_parse("LOW_FDV_THRESHOLD_USD", self.low_fdv_threshold_usd);
        self.low_fdv_slippage_bps = env_parse("LOW_FDV_SLIPPAGE_BPS", self.low_fdv_slippage_bps);
        self.high_fdv_threshold_usd =
            env_parse("HIGH_FDV_THRESHOLD_USD", self.high_fdv_threshold_usd);
        self.high_fdv_slippage_bps =
            env_parse("HIGH_FDV_SLIPPAGE_BPS", self.high_fdv_slippage_bps);

        self.slippage_bps_base = env_parse("SLIPPAGE_BPS_BASE", self.slippage_bps_base);
        self.slippage_bps_step = env_parse("SLIPPAGE_BPS_STEP", self.slippage_bps_step);
        self.max_slippage_bps_cap = env_parse("MAX_SLIPPAGE_BPS_CAP", self.max_slippage_bps_cap);
        self.panic_slippage_bps = env_parse("PANIC_SLIPPAGE_BPS", self.panic_slippage_bps);
        self.max_panic_slippage_bps_cap =
            env_parse("MAX_PANIC_SLIPPAGE_BPS_CAP", self.max_panic_slippage_bps_cap);
        self.priority_fee_microlamports =
            env_parse("PRIORITY_FEE_MICROLAMPORTS", self.priority_fee_microlamports);
        self.priority_fee_step =
            env_parse("PRIORITY_FEE_STEP_MICROLAMPORTS", self.priority_fee_step);
        self.panic_priority_fee_microlamports = env_parse(
            "PANIC_PRIORITY_FEE_MICROLAMPORTS",
            self.panic_priority_fee_microlamports,
        );
        self.compute_unit_limit = env_parse("COMPUTE_UNIT_LIMIT", self.compute_unit_limit);
        self.max_swap_retries = env_parse("MAX_SWAP_RETRIES", self.max_swap_retries);
        self.tip_lamports = env_parse("TIP_LAMPORTS", self.tip_lamports);
        self.tip_min_lamports = env_parse("MIN_TIP_LAMPORTS", self.tip_min_lamports);
        self.tip_max_lamports = env_parse("MAX_TIP_LAMPORTS", self.tip_max_lamports);
        self.panic_tip_lamports = env_parse("PANIC_TIP_LAMPORTS", self.panic_tip_lamports);
        self.dca_enabled = env_bool("DCA_ENABLED", self.dca_enabled);
        self.dca_tranches = env_parse("DCA_TRANCHES", self.dca_tranches);
        self.dca_interval_secs = env_parse("DCA_INTERVAL_SEC", self.dca_interval_secs);
        if let Some(list) = env_list("DEX_PREFERENCE") {
            self.dex_preference = list;
        }

        self.quote_timeout_secs = env_parse("QUOTE_TIMEOUT_SECS", self.quote_timeout_secs);
        self.swap_build_timeout_secs =
            env_parse("SWAP_BUILD_TIMEOUT_SECS", self.swap_build_timeout_secs);
        self.bundle_timeout_secs = env_parse("BUNDLE_TIMEOUT_SECS", self.bundle_timeout_secs);
        self.price_timeout_secs = env_parse("PRICE_TIMEOUT_SECS", self.price_timeout_secs);
        self.rpc_timeout_secs = env_parse("RPC_TIMEOUT_SECS", self.rpc_timeout_secs);

        self.wss_reconnect_backoff_ms =
            env_parse("WSS_RECONNECT_BACKOFF_MS", self.wss_reconnect_backoff_ms);
        self.wss_reconnect_backoff_max_ms =
            env_parse("WSS_RECONNECT_BACKOFF_MAX_MS", self.wss_reconnect_backoff_max_ms);
        self.wss_ping_interval_secs =
            env_parse("WSS_PING_INTERVAL_SECS", self.wss_ping_interval_secs);
        self.wss_max_silent_ms = env_parse("WSS_MAX_SILENT_MS", self.wss_max_silent_ms);

        if let Some(v) = env_string("PAUSE_FILE") {
            self.pause_file = v;
        }
        if let Some(v) = env_string("FLATTEN_FILE") {
            self.flatten_file = v;
        }
        if let Some(v) = env_string("POSITIONS_FILE") {
            self.positions_file = v;
        }
        if let Some(v) = env_string("POSITIONS_LOG") {
            self.positions_log = v;
        }
        if let Some(v) = env_string("PNL_LOG") {
            self.pnl_log = v;
        }
        if let Some(v) = env_string("METRICS_LOG") {
            self.metrics_log = v;
        }
    }

    /// Validate configuration consistency and constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.rpc_endpoints.is_empty() {
            return Err("at least one RPC endpoint must be configured".to_string());
        }
        if self.min_buy_sol <= 0.0 {
            return Err("min_buy_sol must be greater than 0".to_string());
        }
        if self.max_buy_sol < self.min_buy_sol {
            return Err("max_buy_sol cannot be less than min_buy_sol".to_string());
        }
        if self.slippage_bps_base > 10_000 {
            return Err("slippage_bps_base must be <= 10000".to_string());
        }
        if self.max_slippage_bps_cap < self.slippage_bps_base {
            return Err("max_slippage_bps_cap cannot be below slippage_bps_base".to_string());
        }
        if self.tip_min_lamports > self.tip_max_lamports {
            return Err("tip_min_lamports cannot exceed tip_max_lamports".to_string());
        }
        if self.coordinated_slot_window == 0 {
            return Err("coordinated_slot_window must be greater than 0".to_string());
        }
        if self.min_coordinated_buyers == 0 {
            return Err("min_coordinated_buyers must be greater than 0".to_string());
        }
        if self.wss_reconnect_backoff_ms == 0 {
            return Err("wss_reconnect_backoff_ms must be greater than 0".to_string());
        }
        if self.wss_reconnect_backoff_ms > self.wss_reconnect_backoff_max_ms {
            return Err(
                "wss_reconnect_backoff_ms cannot be greater than wss_reconnect_backoff_max_ms"
                    .to_string(),
            );
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err("min_confidence must be within [0, 1]".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.target_impact_bps, 100);
        assert_eq!(cfg.max_impact_bps, 500);
        assert_eq!(cfg.min_pool_age_secs, 120);
        assert_eq!(cfg.max_tx_age_secs, 900);
        assert_eq!(cfg.coordinated_slot_window, 2);
        assert_eq!(cfg.min_coordinated_buyers, 3);
        assert!((cfg.whale_threshold_sol - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_ranges_rejected() {
        let mut cfg = Config::default();
        cfg.max_buy_sol = 0.001;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.tip_min_lamports = 10;
        cfg.tip_max_lamports = 5;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.rpc_endpoints.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_with_partial_file() {
        let cfg: Config = toml::from_str(
            r#"
            min_buy_sol = 0.02
            dex_preference = ["raydium"]
            "#,
        )
        .unwrap();
        assert!((cfg.min_buy_sol - 0.02).abs() < f64::EPSILON);
        assert_eq!(cfg.dex_preference, vec!["raydium".to_string()]);
        // untouched fields keep defaults
        assert_eq!(cfg.max_swap_retries, 2);
    }
}
