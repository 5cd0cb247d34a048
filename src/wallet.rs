//! Signing key management: loads a single keypair from the environment and
//! signs versioned transactions. The key is immutable after load.

use anyhow::{anyhow, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use std::{fs, path::Path};
use tracing::info;

#[derive(Debug)]
pub struct WalletManager {
    keypair: Keypair,
}

impl WalletManager {
    /// Load from `WALLET_PRIVATE_KEY` (base58 secret key or JSON byte array),
    /// falling back to the file at `WALLET_KEYPAIR_PATH`.
    pub fn from_env() -> Result<Self> {
        if let Ok(secret) = std::env::var("WALLET_PRIVATE_KEY") {
            let secret = secret.trim();
            if !secret.is_empty() {
                let keypair = Self::parse_keypair(secret)?;
                info!(pubkey = %keypair.pubkey(), "loaded signing key from environment");
                return Ok(Self { keypair });
            }
        }
        if let Ok(path) = std::env::var("WALLET_KEYPAIR_PATH") {
            let path = path.trim();
            if !path.is_empty() {
                return Self::from_file(path);
            }
        }
        Err(anyhow!("WALLET_PRIVATE_KEY or WALLET_KEYPAIR_PATH must be set"))
    }

    pub fn from_file<P: AsRef<Path>>(keypair_path: P) -> Result<Self> {
        let path = keypair_path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read keypair file {}: {}", path.display(), e))?;
        let keypair = Self::parse_keypair(data.trim())?;
        info!(pubkey = %keypair.pubkey(), path = %path.display(), "loaded signing key from file");
        Ok(Self { keypair })
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Random key for tests and dry runs.
    pub fn new_random() -> Self {
        Self { keypair: Keypair::new() }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Sign a compiled transaction over its serialized message.
    pub fn sign_transaction(&self, tx: &mut VersionedTransaction) -> Result<()> {
        let message_bytes = tx.message.serialize();
        let signature = self.keypair.sign_message(&message_bytes);
        let required = tx.message.header().num_required_signatures as usize;
        if tx.signatures.len() < required {
            tx.signatures.resize(required, solana_sdk::signature::Signature::default());
        }
        if tx.signatures.is_empty() {
            tx.signatures.push(signature);
        } else {
            tx.signatures[0] = signature;
        }
        Ok(())
    }

    /// Parse a secret key from base58 or a JSON byte array (CLI format).
    fn parse_keypair(data: &str) -> Result<Keypair> {
        if data.starts_with('[') && data.ends_with(']') {
            let bytes: Vec<u8> = serde_json::from_str(data)
                .map_err(|e| anyhow!("failed to parse keypair JSON array: {}", e))?;
            if bytes.len() != 64 {
                return Err(anyhow!("invalid keypair: expected 64 bytes, got {}", bytes.len()));
            }
            return Keypair::from_bytes(&bytes)
                .map_err(|e| anyhow!("failed to create keypair from bytes: {}", e));
        }

        if let Ok(bytes) = bs58::decode(data).into_vec() {
            if bytes.len() == 64 {
                if let Ok(keypair) = Keypair::from_bytes(&bytes) {
                    return Ok(keypair);
                }
            }
        }

        Err(anyhow!(
            "invalid keypair format: expected base58 secret key or JSON byte array"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_format() {
        let keypair = Keypair::new();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let parsed = WalletManager::parse_keypair(&json).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());
    }

    #[test]
    fn parses_base58_format() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let parsed = WalletManager::parse_keypair(&encoded).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());
    }

    #[test]
    fn rejects_garbage() {
        assert!(WalletManager::parse_keypair("not-a-key").is_err());
        assert!(WalletManager::parse_keypair("[1,2,3]").is_err());
    }

    #[test]
    fn loads_from_file() {
        let keypair = Keypair::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap(),
        )
        .unwrap();
        let wallet = WalletManager::from_file(file.path()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }
}
