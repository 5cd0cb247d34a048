//! Application entry: wires the firehose, classifier, gate, execution engine,
//! and position manager together, owns the shutdown signal, and serves the
//! metrics surface.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use liquidity_sniper::aggregator::AggregatorClient;
use liquidity_sniper::auto_pause::{AutoPauseManager, PauseConfig};
use liquidity_sniper::classifier::Classifier;
use liquidity_sniper::config::Config;
use liquidity_sniper::dex::cache::default_pool_cache;
use liquidity_sniper::executor::ExecutionEngine;
use liquidity_sniper::fee_tuner::{CongestionMonitor, FeeConfig, PriorityFeeTuner};
use liquidity_sniper::firehose::{self, source::TxStreamSource};
use liquidity_sniper::gate::{DailyCounter, RiskGate};
use liquidity_sniper::metrics::init_metrics;
use liquidity_sniper::metrics_server::run_metrics_server;
use liquidity_sniper::positions::{ExitConfig, ExitEvent, PositionManager};
use liquidity_sniper::prices::PriceSource;
use liquidity_sniper::risk::RiskEvaluator;
use liquidity_sniper::rpc_manager::{RpcBroadcaster, RpcManager};
use liquidity_sniper::safety::{SafetyConfig, TokenSafetyChecker};
use liquidity_sniper::types::{CandidateReceiver, CandidateSender, RawEventReceiver, RawEventSender};
use liquidity_sniper::wallet::WalletManager;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cfg = Config::load();
    info!(endpoints = cfg.rpc_endpoints.len(), dry_run = cfg.dry_run, "configuration loaded");
    init_metrics(Some(cfg.metrics_log.clone()));

    let wallet = match WalletManager::from_env() {
        Ok(wallet) => Arc::new(wallet),
        Err(e) if cfg.dry_run => {
            warn!(error = %e, "no signing key; dry-run continues with an ephemeral key");
            Arc::new(WalletManager::new_random())
        }
        Err(e) => {
            error!(error = %e, "signing key required outside dry-run");
            return Err(e);
        }
    };

    // Leaves first: shared services.
    let rpc = Arc::new(RpcManager::from_config(&cfg));
    let broadcaster: Arc<dyn RpcBroadcaster> = rpc.clone();
    let aggregator = Arc::new(AggregatorClient::from_config(&cfg));
    let prices = Arc::new(PriceSource::from_config(&cfg));
    let pool_cache = Arc::new(default_pool_cache());
    let risk = Arc::new(RiskEvaluator::from_env());
    let daily = Arc::new(DailyCounter::new());
    let auto_pause = Arc::new(AutoPauseManager::new(PauseConfig::from_config(&cfg)));

    let safety = cfg.enable_token_safety.then(|| {
        Arc::new(TokenSafetyChecker::new(rpc.clone(), SafetyConfig::from_config(&cfg)))
    });
    let fee_tuner = cfg
        .enable_fee_tuner
        .then(|| Arc::new(PriorityFeeTuner::new(FeeConfig::from_config(&cfg))));
    let congestion = cfg.enable_fee_tuner.then(|| {
        Arc::new(CongestionMonitor::new(rpc.clone(), std::time::Duration::from_secs(30)))
    });

    // Channels between the pipeline stages.
    let (raw_tx, raw_rx): (RawEventSender, RawEventReceiver) = mpsc::channel(1_024);
    let (cand_tx, cand_rx): (CandidateSender, CandidateReceiver) = mpsc::channel(256);
    let (exit_tx, mut exit_rx) = mpsc::channel::<ExitEvent>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Position manager owns every position; started before the engine so a
    // landed buy always has an owner.
    let positions = Arc::new(PositionManager::new(
        cfg.clone(),
        ExitConfig::from_env(),
        wallet.clone(),
        broadcaster.clone(),
        rpc.clone(),
        aggregator.clone(),
        prices.clone(),
        exit_tx,
    ));
    let positions_task = tokio::spawn(positions.clone().run(shutdown_rx.clone()));

    let gate = Arc::new(RiskGate::new(
        cfg.clone(),
        auto_pause.clone(),
        safety.clone(),
        risk,
        aggregator.clone(),
        prices.clone(),
        rpc.clone(),
        daily.clone(),
    ));

    let engine = Arc::new(ExecutionEngine::new(
        cfg.clone(),
        rpc.clone(),
        broadcaster,
        wallet,
        aggregator,
        fee_tuner,
        congestion,
        auto_pause,
        pool_cache,
        positions.clone(),
        prices,
        daily,
    ));
    let engine_task = tokio::spawn(engine.run(cand_rx, gate, shutdown_rx.clone()));

    let classifier = Classifier::new(&cfg);
    let classifier_task = tokio::spawn(classifier.run(raw_rx, cand_tx));

    let ingestors = firehose::spawn_ingestors(&cfg, raw_tx);
    if ingestors.is_empty() {
        warn!("no firehose endpoints configured; detection is idle");
    }

    let metrics_task = tokio::spawn(run_metrics_server(
        cfg.metrics_listen_addr.clone(),
        shutdown_rx,
    ));

    // Exit notifications are the collaborator hook; the core just logs them.
    let exit_task = tokio::spawn(async move {
        while let Some(event) = exit_rx.recv().await {
            info!(
                id = event.position.id.as_str(),
                mint = event.position.token_mint.as_str(),
                reason = event.reason.as_str(),
                pnl_sol = event.position.realized_pnl_sol.unwrap_or(0.0),
                "exit executed"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    for (source, _handle) in &ingestors {
        source.request_stop();
    }
    // The position manager persists its book on the way out.
    let _ = positions_task.await;
    engine_task.abort();
    classifier_task.abort();
    metrics_task.abort();
    exit_task.abort();
    for (_, handle) in ingestors {
        handle.abort();
    }

    info!("shutdown complete");
    Ok(())
}
