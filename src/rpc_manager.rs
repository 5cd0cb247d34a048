//! RPC access layer: pooled nonblocking clients, ordered failover broadcast,
//! and the account/balance fetch helpers the pipeline needs.

use anyhow::{anyhow, Result};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSendTransactionConfig},
    rpc_filter::{Memcmp, RpcFilterType},
    rpc_request::RpcError,
    rpc_response::RpcPerfSample,
};
use solana_account_decoder::UiAccountEncoding;
use solana_sdk::{
    account::Account,
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::observability::CorrelationId;

/// Classification of RPC errors for handling logic.
#[derive(Debug, PartialEq, Eq)]
pub enum RpcErrorType {
    AlreadyProcessed,
    DuplicateSignature,
    BlockhashNotFound,
    RateLimited,
    Other(String),
}

/// Classify a ClientError into an RpcErrorType for consistent handling.
pub fn classify_rpc_error(error: &ClientError) -> RpcErrorType {
    match error.kind() {
        ClientErrorKind::RpcError(rpc_error) => match rpc_error {
            RpcError::RpcResponseError { message, .. } => {
                let msg = message.to_lowercase();
                if msg.contains("already processed") {
                    RpcErrorType::AlreadyProcessed
                } else if msg.contains("duplicate signature") {
                    RpcErrorType::DuplicateSignature
                } else if msg.contains("blockhash not found") {
                    RpcErrorType::BlockhashNotFound
                } else if msg.contains("rate limit") || msg.contains("too many requests") {
                    RpcErrorType::RateLimited
                } else {
                    RpcErrorType::Other(message.clone())
                }
            }
            _ => RpcErrorType::Other("unknown RPC error".to_string()),
        },
        _ => RpcErrorType::Other(error.to_string()),
    }
}

/// Trait for broadcasting transactions. Allows injecting mocks in tests.
pub trait RpcBroadcaster: Send + Sync + std::fmt::Debug {
    /// Submit a signed transaction through the endpoint failover chain;
    /// returns the first accepted signature.
    fn send_transaction<'a>(
        &'a self,
        tx: VersionedTransaction,
        correlation_id: Option<CorrelationId>,
    ) -> Pin<Box<dyn Future<Output = Result<Signature>> + Send + 'a>>;
}

/// Production RPC manager over the configured endpoint list.
pub struct RpcManager {
    pub endpoints: Vec<String>,
    client_pool: Arc<RwLock<HashMap<String, Arc<RpcClient>>>>,
    send_timeout: Duration,
    skip_preflight: bool,
}

impl std::fmt::Debug for RpcManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcManager")
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl RpcManager {
    pub fn new(endpoints: Vec<String>, send_timeout: Duration, skip_preflight: bool) -> Self {
        Self {
            endpoints,
            client_pool: Arc::new(RwLock::new(HashMap::new())),
            send_timeout,
            skip_preflight,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.rpc_endpoints.clone(),
            Duration::from_secs(cfg.rpc_timeout_secs),
            cfg.skip_preflight,
        )
    }

    async fn get_or_create_client(&self, endpoint: &str) -> Arc<RpcClient> {
        {
            let pool = self.client_pool.read().await;
            if let Some(client) = pool.get(endpoint) {
                return client.clone();
            }
        }
        let client = Arc::new(RpcClient::new_with_commitment(
            endpoint.to_string(),
            CommitmentConfig::confirmed(),
        ));
        let mut pool = self.client_pool.write().await;
        if let Some(existing) = pool.get(endpoint) {
            return existing.clone();
        }
        pool.insert(endpoint.to_string(), client.clone());
        client
    }

    async fn primary(&self) -> Result<Arc<RpcClient>> {
        let endpoint = self
            .endpoints
            .first()
            .ok_or_else(|| anyhow!("no RPC endpoints configured"))?;
        Ok(self.get_or_create_client(endpoint).await)
    }

    /// Latest blockhash: short jittered retry per endpoint, then failover.
    pub async fn latest_blockhash(&self) -> Result<Hash> {
        use tokio_retry::strategy::{jitter, ExponentialBackoff};
        use tokio_retry::Retry;

        let mut last_err = None;
        for endpoint in &self.endpoints {
            let client = self.get_or_create_client(endpoint).await;
            let strategy = ExponentialBackoff::from_millis(50)
                .max_delay(Duration::from_millis(500))
                .map(jitter)
                .take(3);
            match Retry::spawn(strategy, || async {
                client.get_latest_blockhash().await
            })
            .await
            {
                Ok(hash) => return Ok(hash),
                Err(e) => {
                    debug!(endpoint = endpoint.as_str(), error = %e, "blockhash fetch failed");
                    last_err = Some(e);
                }
            }
        }
        Err(anyhow!("all blockhash fetches failed: {:?}", last_err))
    }

    pub async fn get_account(&self, pubkey: &Pubkey) -> Result<Account> {
        let client = self.primary().await?;
        Ok(client.get_account(pubkey).await?)
    }

    pub async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        let client = self.primary().await?;
        Ok(client.get_balance(pubkey).await?)
    }

    /// Token balance of a vault account in base units.
    pub async fn get_token_account_balance(&self, vault: &Pubkey) -> Result<u64> {
        let client = self.primary().await?;
        let balance = client.get_token_account_balance(vault).await?;
        balance
            .amount
            .parse::<u64>()
            .map_err(|e| anyhow!("unparseable token amount: {e}"))
    }

    /// Program accounts matching a single memcmp filter at `offset`.
    pub async fn get_program_accounts_memcmp(
        &self,
        program: &Pubkey,
        offset: usize,
        bytes: &[u8],
    ) -> Result<Vec<(Pubkey, Account)>> {
        let client = self.primary().await?;
        let config = RpcProgramAccountsConfig {
            filters: Some(vec![RpcFilterType::Memcmp(Memcmp::new_base58_encoded(
                offset, bytes,
            ))]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(client.get_program_accounts_with_config(program, config).await?)
    }

    pub async fn get_recent_performance_samples(&self, limit: usize) -> Result<Vec<RpcPerfSample>> {
        let client = self.primary().await?;
        Ok(client.get_recent_performance_samples(Some(limit)).await?)
    }

    /// Recent per-slot prioritization fees (micro-lamports per CU).
    pub async fn get_recent_prioritization_fees(&self) -> Result<Vec<u64>> {
        let client = self.primary().await?;
        let fees = client.get_recent_prioritization_fees(&[]).await?;
        Ok(fees.into_iter().map(|f| f.prioritization_fee).collect())
    }

    /// Age in seconds of the latest transaction touching `address`, when the
    /// chain reports a block time for it.
    pub async fn latest_tx_age_secs(&self, address: &Pubkey) -> Result<Option<u64>> {
        use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
        let client = self.primary().await?;
        let config = GetConfirmedSignaturesForAddress2Config {
            limit: Some(1),
            ..Default::default()
        };
        let signatures = client
            .get_signatures_for_address_with_config(address, config)
            .await?;
        let Some(latest) = signatures.first() else {
            return Ok(None);
        };
        let Some(block_time) = latest.block_time else {
            return Ok(None);
        };
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ok(Some(now.saturating_sub(block_time).max(0) as u64))
    }

    /// Simulate a signed transaction; Ok(()) when the simulation had no error.
    pub async fn simulate(&self, tx: &VersionedTransaction) -> Result<()> {
        let client = self.primary().await?;
        let result = client.simulate_transaction(tx).await?;
        match result.value.err {
            None => Ok(()),
            Some(err) => Err(anyhow!("simulation failed: {err}")),
        }
    }
}

impl RpcBroadcaster for RpcManager {
    fn send_transaction<'a>(
        &'a self,
        tx: VersionedTransaction,
        correlation_id: Option<CorrelationId>,
    ) -> Pin<Box<dyn Future<Output = Result<Signature>> + Send + 'a>> {
        Box::pin(async move {
            if self.endpoints.is_empty() {
                return Err(anyhow!("send_transaction: no endpoints configured"));
            }

            let send_cfg = RpcSendTransactionConfig {
                skip_preflight: self.skip_preflight,
                preflight_commitment: Some(CommitmentLevel::Confirmed),
                max_retries: Some(0),
                ..Default::default()
            };

            let mut last_err: Option<anyhow::Error> = None;
            for endpoint in &self.endpoints {
                let client = self.get_or_create_client(endpoint).await;
                let start = Instant::now();
                let send_fut = client.send_transaction_with_config(&tx, send_cfg.clone());
                match timeout(self.send_timeout, send_fut).await {
                    Ok(Ok(sig)) => {
                        let latency_ms = start.elapsed().as_millis() as u64;
                        info!(
                            endpoint = endpoint.as_str(),
                            sig = %sig,
                            latency_ms,
                            correlation_id = ?correlation_id,
                            "transaction accepted"
                        );
                        return Ok(sig);
                    }
                    Ok(Err(e)) => {
                        let classified = classify_rpc_error(&e);
                        warn!(endpoint = endpoint.as_str(), error = %e, ?classified, "RPC send failed");
                        // An already-processed response means an earlier
                        // endpoint landed it; treat as success if we can
                        // recover the signature from the transaction.
                        if classified == RpcErrorType::AlreadyProcessed {
                            if let Some(sig) = tx.signatures.first() {
                                return Ok(*sig);
                            }
                        }
                        last_err = Some(anyhow!(e).context("RPC send failed"));
                    }
                    Err(_elapsed) => {
                        warn!(endpoint = endpoint.as_str(), timeout = ?self.send_timeout, "RPC send timeout");
                        last_err = Some(anyhow!("RPC send timeout"));
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| anyhow!("all RPC sends failed")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_classification() {
        // Exercise the string fallback path used for transport errors.
        let err = ClientError::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "request timed out",
        ));
        match classify_rpc_error(&err) {
            RpcErrorType::Other(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected classification {other:?}"),
        }
    }
}
