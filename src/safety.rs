//! Ownership/upgradeability guardrails for token mints.
//!
//! Parses the raw mint account to extract mint and freeze authorities and
//! blocks tokens whose authorities are still live. Positive verdicts are
//! cached; negative ones are not (an authority can be renounced later).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::config::{env_bool, Config};
use crate::errors::{SniperError, SniperResult};
use crate::rpc_manager::RpcManager;

/// SPL mint account size.
pub const MINT_ACCOUNT_SIZE: usize = 82;

/// Option-encoded authority fields: `u32 option ∥ pubkey`.
const MINT_AUTHORITY_OFFSET: usize = 0;
const FREEZE_AUTHORITY_OFFSET: usize = 46;

/// Addresses treated as renounced.
pub const BURNED_ADDRESSES: [&str; 2] = [
    "1nc1nerator11111111111111111111111111111111",
    "11111111111111111111111111111111",
];

pub const TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";
pub const METADATA_PROGRAM: &str = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s";

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub require_mint_renounced: bool,
    pub require_freeze_renounced: bool,
    /// Stricter, optional: require the metadata update authority renounced too.
    pub require_metadata_immutable: bool,
    /// Token-2022 carries extension risk; disallowed unless opted in.
    pub allow_token_2022: bool,
    pub whitelist_mints: Vec<String>,
}

impl SafetyConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            require_mint_renounced: env_bool("REQUIRE_MINT_RENOUNCED", true),
            require_freeze_renounced: env_bool("REQUIRE_FREEZE_RENOUNCED", true),
            require_metadata_immutable: env_bool("REQUIRE_METADATA_IMMUTABLE", false),
            allow_token_2022: env_bool("ALLOW_TOKEN_2022", false),
            whitelist_mints: cfg.token_whitelist.clone(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            require_mint_renounced: true,
            require_freeze_renounced: true,
            require_metadata_immutable: false,
            allow_token_2022: false,
            whitelist_mints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
    pub mint_renounced: bool,
    pub freeze_renounced: bool,
    pub is_token_2022: bool,
    pub metadata_immutable: bool,
    pub warnings: Vec<String>,
}

/// Parse the option-encoded `(mint_authority, freeze_authority)` pair out of a
/// raw mint account. Fails `Protocol` on short accounts.
pub fn parse_mint_authorities(
    data: &[u8],
) -> SniperResult<(Option<Pubkey>, Option<Pubkey>)> {
    if data.len() < MINT_ACCOUNT_SIZE {
        return Err(SniperError::protocol(format!(
            "mint account too short: {} bytes",
            data.len()
        )));
    }

    let read_option_pubkey = |offset: usize| -> Option<Pubkey> {
        let tag = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        if tag == 1 {
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&data[offset + 4..offset + 36]);
            Some(Pubkey::new_from_array(raw))
        } else {
            None
        }
    };

    Ok((
        read_option_pubkey(MINT_AUTHORITY_OFFSET),
        read_option_pubkey(FREEZE_AUTHORITY_OFFSET),
    ))
}

/// Re-encode an authority pair with the same option encoding. Inverse of
/// `parse_mint_authorities` over the authority windows of the account.
pub fn encode_mint_authorities(
    mint_authority: Option<&Pubkey>,
    freeze_authority: Option<&Pubkey>,
) -> [u8; MINT_ACCOUNT_SIZE] {
    let mut out = [0u8; MINT_ACCOUNT_SIZE];
    let mut write_option = |offset: usize, auth: Option<&Pubkey>| {
        match auth {
            Some(pk) => {
                out[offset..offset + 4].copy_from_slice(&1u32.to_le_bytes());
                out[offset + 4..offset + 36].copy_from_slice(&pk.to_bytes());
            }
            None => {
                out[offset..offset + 4].copy_from_slice(&0u32.to_le_bytes());
            }
        }
    };
    write_option(MINT_AUTHORITY_OFFSET, mint_authority);
    write_option(FREEZE_AUTHORITY_OFFSET, freeze_authority);
    out
}

fn is_renounced(authority: &Option<Pubkey>) -> bool {
    match authority {
        None => true,
        Some(pk) => BURNED_ADDRESSES.contains(&pk.to_string().as_str()),
    }
}

/// Mint-level safety checker with a positive-result cache.
pub struct TokenSafetyChecker {
    rpc: Arc<RpcManager>,
    config: SafetyConfig,
    cache: Cache<String, SafetyVerdict>,
}

impl TokenSafetyChecker {
    pub fn new(rpc: Arc<RpcManager>, config: SafetyConfig) -> Self {
        Self {
            rpc,
            config,
            cache: Cache::builder()
                .max_capacity(4_096)
                .time_to_live(Duration::from_secs(3_600))
                .build(),
        }
    }

    /// Check whether the mint is safe to trade. Transport failures propagate
    /// so the caller can apply its fail-open/fail-closed policy.
    pub async fn check_token(&self, mint_address: &str) -> SniperResult<SafetyVerdict> {
        if let Some(cached) = self.cache.get(mint_address) {
            return Ok(cached);
        }

        if self.config.whitelist_mints.iter().any(|m| m == mint_address) {
            let verdict = SafetyVerdict {
                is_safe: true,
                mint_authority: None,
                freeze_authority: None,
                mint_renounced: true,
                freeze_renounced: true,
                is_token_2022: false,
                metadata_immutable: true,
                warnings: Vec::new(),
            };
            self.cache.insert(mint_address.to_string(), verdict.clone());
            return Ok(verdict);
        }

        let mint = Pubkey::from_str(mint_address)
            .map_err(|e| SniperError::protocol(format!("invalid mint address: {e}")))?;

        let account = self
            .rpc
            .get_account(&mint)
            .await
            .map_err(|e| SniperError::transport_with_source("mint account fetch failed", e))?;

        let (mint_authority, freeze_authority) = parse_mint_authorities(&account.data)?;

        let is_token_2022 = account.owner.to_string() == TOKEN_2022_PROGRAM;
        let mint_renounced = is_renounced(&mint_authority);
        let freeze_renounced = is_renounced(&freeze_authority);

        let mut warnings = Vec::new();
        if !mint_renounced {
            warnings.push(format!(
                "mint authority active: {}",
                mint_authority.as_ref().map(|p| p.to_string()).unwrap_or_default()
            ));
        }
        if !freeze_renounced {
            warnings.push(format!(
                "freeze authority active: {}",
                freeze_authority.as_ref().map(|p| p.to_string()).unwrap_or_default()
            ));
        }
        if is_token_2022 && !self.config.allow_token_2022 {
            warnings.push("token-2022 program".to_string());
        }

        let mut metadata_immutable = true;
        if self.config.require_metadata_immutable {
            metadata_immutable = self.check_metadata_immutable(&mint).await;
            if !metadata_immutable {
                warnings.push("metadata update authority live".to_string());
            }
        }

        let mut is_safe = true;
        if self.config.require_mint_renounced && !mint_renounced {
            is_safe = false;
        }
        if self.config.require_freeze_renounced && !freeze_renounced {
            is_safe = false;
        }
        if is_token_2022 && !self.config.allow_token_2022 {
            is_safe = false;
        }
        if self.config.require_metadata_immutable && !metadata_immutable {
            is_safe = false;
        }

        let verdict = SafetyVerdict {
            is_safe,
            mint_authority: mint_authority.map(|p| p.to_string()),
            freeze_authority: freeze_authority.map(|p| p.to_string()),
            mint_renounced,
            freeze_renounced,
            is_token_2022,
            metadata_immutable,
            warnings,
        };

        // Only cache safe verdicts; an unsafe state can become safe later.
        if verdict.is_safe {
            self.cache.insert(mint_address.to_string(), verdict.clone());
        } else {
            debug!(mint = mint_address, warnings = ?verdict.warnings, "unsafe mint");
        }

        Ok(verdict)
    }

    /// Metadata update-authority check against the metadata PDA. Fails open:
    /// missing metadata means there is nothing to mutate.
    async fn check_metadata_immutable(&self, mint: &Pubkey) -> bool {
        let program = match Pubkey::from_str(METADATA_PROGRAM) {
            Ok(p) => p,
            Err(_) => return true,
        };
        let (pda, _) = Pubkey::find_program_address(
            &[b"metadata", program.as_ref(), mint.as_ref()],
            &program,
        );
        match self.rpc.get_account(&pda).await {
            Ok(account) => {
                // update_authority sits at offset 1 (32 bytes)
                if account.data.len() < 33 {
                    return true;
                }
                let mut raw = [0u8; 32];
                raw.copy_from_slice(&account.data[1..33]);
                is_renounced(&Some(Pubkey::new_from_array(raw)))
            }
            Err(e) => {
                warn!(mint = %mint, error = %e, "metadata check unavailable; treating as immutable");
                true
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_short_accounts() {
        let err = parse_mint_authorities(&[0u8; 40]).unwrap_err();
        assert_eq!(err.category(), crate::errors::ErrorCategory::Protocol);
    }

    #[test]
    fn authorities_roundtrip_through_option_encoding() {
        let mint_auth = Pubkey::new_unique();
        let cases = [
            (Some(mint_auth), None),
            (None, Some(Pubkey::new_unique())),
            (None, None),
            (Some(Pubkey::new_unique()), Some(Pubkey::new_unique())),
        ];
        for (m, f) in cases {
            let bytes = encode_mint_authorities(m.as_ref(), f.as_ref());
            let (pm, pf) = parse_mint_authorities(&bytes).unwrap();
            assert_eq!(pm, m);
            assert_eq!(pf, f);
            // re-encoding reproduces the authority windows exactly
            let again = encode_mint_authorities(pm.as_ref(), pf.as_ref());
            assert_eq!(&again[0..36], &bytes[0..36]);
            assert_eq!(&again[46..82], &bytes[46..82]);
        }
    }

    #[test]
    fn burned_addresses_count_as_renounced() {
        for addr in BURNED_ADDRESSES {
            let pk = Pubkey::from_str(addr).unwrap();
            assert!(is_renounced(&Some(pk)), "{addr} should be renounced");
        }
        assert!(is_renounced(&None));
        assert!(!is_renounced(&Some(Pubkey::new_unique())));
    }

    #[test]
    fn live_mint_authority_parses_as_unsafe_shape() {
        // Mint bytes with mint_auth_option=1 and a live (non-burned) authority.
        let live = Pubkey::new_unique();
        let bytes = encode_mint_authorities(Some(&live), None);
        let (mint_auth, freeze_auth) = parse_mint_authorities(&bytes).unwrap();
        assert_eq!(mint_auth, Some(live));
        assert!(freeze_auth.is_none());
        assert!(!is_renounced(&mint_auth));
    }
}
