//! Firehose ingestion: transaction-level websocket subscriptions feeding the
//! classifier with decoded raw events.

pub mod messages;
pub mod source;
pub mod wss_source;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::types::RawEventSender;
use source::{ProgramSet, TxStreamSource};
use wss_source::WssSource;

/// Spawn one ingestion task per configured firehose endpoint. Each task owns
/// its connection and reconnects independently.
pub fn spawn_ingestors(cfg: &Config, raw_tx: RawEventSender) -> Vec<(Arc<WssSource>, JoinHandle<()>)> {
    let programs = ProgramSet::from_config(cfg);
    let mut handles = Vec::new();
    for endpoint in &cfg.firehose_wss_endpoints {
        let source = Arc::new(WssSource::new(
            endpoint.clone(),
            cfg.firehose_token.clone(),
            programs.clone(),
            cfg.clone(),
        ));
        let task_source = source.clone();
        let sender = raw_tx.clone();
        info!(endpoint = endpoint.as_str(), "starting firehose ingestor");
        let handle = tokio::spawn(async move {
            task_source.run(sender).await;
        });
        handles.push((source, handle));
    }
    handles
}
