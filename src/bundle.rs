//! Bundle-relay submission: atomically lands a transaction group with a tip.

use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::{v0::Message as MessageV0, VersionedMessage},
    pubkey::Pubkey,
    system_program,
    transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::errors::{SniperError, SniperResult};
use crate::wallet::WalletManager;

/// Well-known relay tip accounts; one is picked at random per bundle.
pub const TIP_ACCOUNTS: [&str; 2] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4bVxUg2gAAKJcUTW4zdBrx",
];

/// Tip selection band. Mid-point by default, top of band when aggressive or
/// panicking.
#[derive(Debug, Clone, Copy)]
pub struct TipBand {
    pub min_lamports: u64,
    pub max_lamports: u64,
    pub panic_lamports: u64,
}

impl TipBand {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            min_lamports: cfg.tip_min_lamports,
            max_lamports: cfg.tip_max_lamports.max(cfg.tip_min_lamports),
            panic_lamports: cfg.panic_tip_lamports,
        }
    }

    pub fn select(&self, panic: bool, aggressive: bool) -> u64 {
        let low = self.min_lamports;
        let high = self.max_lamports.max(low);
        if panic {
            return self.panic_lamports.clamp(low, high).max((low + high) / 2);
        }
        if aggressive {
            return high;
        }
        (low + high) / 2
    }
}

pub struct BundleClient {
    http: Client,
    url: String,
}

impl BundleClient {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(cfg.bundle_timeout_secs))
                .build()
                .unwrap_or_default(),
            url: cfg.bundle_relay_url.clone(),
        }
    }

    /// Submit serialized transactions as one bundle. Returns the relay's
    /// bundle identifier for observation.
    pub async fn submit(&self, transactions: &[Vec<u8>], tip_lamports: u64) -> SniperResult<String> {
        let encoded: Vec<String> = transactions
            .iter()
            .map(|tx| base64::engine::general_purpose::STANDARD.encode(tx))
            .collect();
        let payload = json!({
            "bundle": {
                "transactions": encoded,
                "tip": tip_lamports,
            }
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SniperError::transport_with_source("bundle submit failed", e.into()))?;
        if !resp.status().is_success() {
            return Err(SniperError::transport(format!(
                "bundle relay status {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SniperError::protocol(format!("bundle response unparseable: {e}")))?;
        let bundle_id = body
            .get("bundleId")
            .or_else(|| body.get("result"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| SniperError::protocol("bundle response missing id"))?;
        debug!(bundle_id, tip_lamports, "bundle accepted");
        Ok(bundle_id.to_string())
    }
}

/// A signed tip-transfer transaction to a randomly-picked tip account,
/// appended when a bundle needs its tip as a separate transaction.
pub fn build_tip_transaction(
    wallet: &WalletManager,
    tip_lamports: u64,
    recent_blockhash: Hash,
) -> SniperResult<VersionedTransaction> {
    let tip_account = TIP_ACCOUNTS[fastrand::usize(..TIP_ACCOUNTS.len())];
    let tip_pubkey = Pubkey::from_str(tip_account)
        .map_err(|e| SniperError::logic(format!("invalid tip account constant: {e}")))?;

    // System transfer: u32 instruction tag 2 ∥ u64 lamports.
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&tip_lamports.to_le_bytes());

    let ix = Instruction {
        program_id: system_program::id(),
        accounts: vec![
            AccountMeta::new(wallet.pubkey(), true),
            AccountMeta::new(tip_pubkey, false),
        ],
        data,
    };

    let message = MessageV0::try_compile(&wallet.pubkey(), &[ix], &[], recent_blockhash)
        .map_err(|e| SniperError::logic(format!("failed to compile tip message: {e}")))?;
    let mut tx = VersionedTransaction {
        signatures: vec![solana_sdk::signature::Signature::default()],
        message: VersionedMessage::V0(message),
    };
    wallet
        .sign_transaction(&mut tx)
        .map_err(|e| SniperError::logic(format!("tip signing failed: {e}")))?;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_band_selection() {
        let band = TipBand {
            min_lamports: 100_000,
            max_lamports: 300_000,
            panic_lamports: 250_000,
        };
        assert_eq!(band.select(false, false), 200_000); // mid-point
        assert_eq!(band.select(false, true), 300_000); // aggressive: top
        assert_eq!(band.select(true, false), 250_000); // panic: at least mid
    }

    #[test]
    fn panic_tip_clamps_into_band() {
        let band = TipBand {
            min_lamports: 100_000,
            max_lamports: 300_000,
            panic_lamports: 900_000,
        };
        assert_eq!(band.select(true, false), 300_000);
        let band_low_panic = TipBand { panic_lamports: 10, ..band };
        // a configured panic tip below the band floor still pays the mid-point
        assert_eq!(band_low_panic.select(true, false), 200_000);
    }

    #[test]
    fn degenerate_band_collapses() {
        let band = TipBand {
            min_lamports: 150_000,
            max_lamports: 150_000,
            panic_lamports: 0,
        };
        assert_eq!(band.select(false, false), 150_000);
        assert_eq!(band.select(false, true), 150_000);
    }

    #[test]
    fn tip_transaction_signs_and_encodes_transfer() {
        let wallet = WalletManager::new_random();
        let tx = build_tip_transaction(&wallet, 150_000, Hash::default()).unwrap();
        match &tx.message {
            VersionedMessage::V0(msg) => {
                assert_eq!(msg.instructions.len(), 1);
                let data = &msg.instructions[0].data;
                assert_eq!(&data[0..4], &2u32.to_le_bytes());
                assert_eq!(&data[4..12], &150_000u64.to_le_bytes());
            }
            _ => panic!("expected v0 message"),
        }
        assert_eq!(tx.signatures.len(), 1);
    }
}
