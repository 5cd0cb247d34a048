//! AMM v4 pool account layout (752 bytes).
//!
//! Field order: status(u64), nonce(u64), order_depth(u64), base_mint(32),
//! quote_mint(32), lp_mint(32), base_vault(32), quote_vault(32),
//! amm_authority(32), open_orders(32), target_orders(32), base_decimal(u8),
//! quote_decimal(u8), flags(2), four swap totals (u64 each), lp_decimal(u8),
//! padding. The paired market pubkey sits near offset 360.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::{SniperError, SniperResult};
use crate::rpc_manager::RpcManager;

pub const POOL_ACCOUNT_SIZE: usize = 752;

const STATUS_OFFSET: usize = 0;
const BASE_MINT_OFFSET: usize = 24;
const QUOTE_MINT_OFFSET: usize = 56;
const LP_MINT_OFFSET: usize = 88;
const BASE_VAULT_OFFSET: usize = 120;
const QUOTE_VAULT_OFFSET: usize = 152;
const AMM_AUTHORITY_OFFSET: usize = 184;
const OPEN_ORDERS_OFFSET: usize = 216;
const TARGET_ORDERS_OFFSET: usize = 248;
const BASE_DECIMAL_OFFSET: usize = 280;
const QUOTE_DECIMAL_OFFSET: usize = 281;
/// Best-effort offset of the paired serum/openbook market pubkey.
/// TODO: verify against an authoritative layout before mainnet use.
pub const SERUM_MARKET_OFFSET: usize = 360;

#[derive(Debug, Clone)]
pub struct PoolState {
    pub amm_id: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub amm_authority: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub status: u64,
    pub market_id: Option<Pubkey>,
    /// Refreshed on demand from vault balances; zero until fetched.
    pub base_reserve: u64,
    pub quote_reserve: u64,
}

impl PoolState {
    /// `(reserve_in, reserve_out)` ordered for a swap entering with `input_mint`.
    pub fn reserves_for_input(&self, input_mint: &Pubkey) -> SniperResult<(u64, u64)> {
        if *input_mint == self.base_mint {
            Ok((self.base_reserve, self.quote_reserve))
        } else if *input_mint == self.quote_mint {
            Ok((self.quote_reserve, self.base_reserve))
        } else {
            Err(SniperError::logic(format!(
                "input mint {} not in pool {}",
                input_mint, self.amm_id
            )))
        }
    }

    /// `(source_vault, dest_vault)` for the instruction account ordering.
    pub fn vaults_for_input(&self, input_mint: &Pubkey) -> SniperResult<(Pubkey, Pubkey)> {
        if *input_mint == self.base_mint {
            Ok((self.base_vault, self.quote_vault))
        } else if *input_mint == self.quote_mint {
            Ok((self.quote_vault, self.base_vault))
        } else {
            Err(SniperError::logic(format!(
                "input mint {} not in pool {}",
                input_mint, self.amm_id
            )))
        }
    }
}

fn read_pubkey(data: &[u8], offset: usize) -> Pubkey {
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&data[offset..offset + 32]);
    Pubkey::new_from_array(raw)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Parse a raw pool account. Fails `Protocol` on a short account.
pub fn parse_pool_account(data: &[u8], amm_id: Pubkey) -> SniperResult<PoolState> {
    if data.len() < POOL_ACCOUNT_SIZE {
        return Err(SniperError::protocol(format!(
            "pool account too short: {} bytes",
            data.len()
        )));
    }

    let market_id = {
        let pk = read_pubkey(data, SERUM_MARKET_OFFSET);
        if pk == Pubkey::default() {
            None
        } else {
            Some(pk)
        }
    };

    Ok(PoolState {
        amm_id,
        base_mint: read_pubkey(data, BASE_MINT_OFFSET),
        quote_mint: read_pubkey(data, QUOTE_MINT_OFFSET),
        lp_mint: read_pubkey(data, LP_MINT_OFFSET),
        base_vault: read_pubkey(data, BASE_VAULT_OFFSET),
        quote_vault: read_pubkey(data, QUOTE_VAULT_OFFSET),
        amm_authority: read_pubkey(data, AMM_AUTHORITY_OFFSET),
        open_orders: read_pubkey(data, OPEN_ORDERS_OFFSET),
        target_orders: read_pubkey(data, TARGET_ORDERS_OFFSET),
        base_decimals: data[BASE_DECIMAL_OFFSET],
        quote_decimals: data[QUOTE_DECIMAL_OFFSET],
        status: read_u64(data, STATUS_OFFSET),
        market_id,
        base_reserve: 0,
        quote_reserve: 0,
    })
}

/// Find a pool for `token_mint` via memcmp filters on the base- then
/// quote-mint positions against the AMM program.
pub async fn fetch_pool_for_mint(
    rpc: &Arc<RpcManager>,
    amm_program: &str,
    token_mint: &Pubkey,
) -> SniperResult<Option<PoolState>> {
    let program = Pubkey::from_str(amm_program)
        .map_err(|e| SniperError::logic(format!("invalid AMM program id: {e}")))?;

    for offset in [BASE_MINT_OFFSET, QUOTE_MINT_OFFSET] {
        let accounts = rpc
            .get_program_accounts_memcmp(&program, offset, token_mint.as_ref())
            .await
            .map_err(|e| SniperError::transport_with_source("pool lookup failed", e))?;

        if let Some((pubkey, account)) = accounts.into_iter().next() {
            match parse_pool_account(&account.data, pubkey) {
                Ok(pool) => return Ok(Some(pool)),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(None)
}

/// Refresh reserves from the current vault token balances.
pub async fn fetch_reserves(rpc: &Arc<RpcManager>, pool: &mut PoolState) -> SniperResult<()> {
    let base = rpc
        .get_token_account_balance(&pool.base_vault)
        .await
        .map_err(|e| SniperError::transport_with_source("base vault balance fetch failed", e))?;
    let quote = rpc
        .get_token_account_balance(&pool.quote_vault)
        .await
        .map_err(|e| SniperError::transport_with_source("quote vault balance fetch failed", e))?;
    pool.base_reserve = base;
    pool.quote_reserve = quote;
    Ok(())
}

#[cfg(test)]
pub(crate) fn encode_pool_account(pool: &PoolState) -> Vec<u8> {
    let mut data = vec![0u8; POOL_ACCOUNT_SIZE];
    data[STATUS_OFFSET..STATUS_OFFSET + 8].copy_from_slice(&pool.status.to_le_bytes());
    let mut write_pk = |offset: usize, pk: &Pubkey| {
        data[offset..offset + 32].copy_from_slice(&pk.to_bytes());
    };
    write_pk(BASE_MINT_OFFSET, &pool.base_mint);
    write_pk(QUOTE_MINT_OFFSET, &pool.quote_mint);
    write_pk(LP_MINT_OFFSET, &pool.lp_mint);
    write_pk(BASE_VAULT_OFFSET, &pool.base_vault);
    write_pk(QUOTE_VAULT_OFFSET, &pool.quote_vault);
    write_pk(AMM_AUTHORITY_OFFSET, &pool.amm_authority);
    write_pk(OPEN_ORDERS_OFFSET, &pool.open_orders);
    write_pk(TARGET_ORDERS_OFFSET, &pool.target_orders);
    if let Some(market) = pool.market_id {
        write_pk(SERUM_MARKET_OFFSET, &market);
    }
    data[BASE_DECIMAL_OFFSET] = pool.base_decimals;
    data[QUOTE_DECIMAL_OFFSET] = pool.quote_decimals;
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool() -> PoolState {
        PoolState {
            amm_id: Pubkey::new_unique(),
            base_mint: Pubkey::new_unique(),
            quote_mint: Pubkey::new_unique(),
            lp_mint: Pubkey::new_unique(),
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            amm_authority: Pubkey::new_unique(),
            open_orders: Pubkey::new_unique(),
            target_orders: Pubkey::new_unique(),
            base_decimals: 6,
            quote_decimals: 9,
            status: 6,
            market_id: Some(Pubkey::new_unique()),
            base_reserve: 0,
            quote_reserve: 0,
        }
    }

    #[test]
    fn parse_roundtrips_synthetic_account() {
        let pool = sample_pool();
        let data = encode_pool_account(&pool);
        assert_eq!(data.len(), POOL_ACCOUNT_SIZE);

        let parsed = parse_pool_account(&data, pool.amm_id).unwrap();
        assert_eq!(parsed.base_mint, pool.base_mint);
        assert_eq!(parsed.quote_mint, pool.quote_mint);
        assert_eq!(parsed.base_vault, pool.base_vault);
        assert_eq!(parsed.quote_vault, pool.quote_vault);
        assert_eq!(parsed.open_orders, pool.open_orders);
        assert_eq!(parsed.target_orders, pool.target_orders);
        assert_eq!(parsed.base_decimals, 6);
        assert_eq!(parsed.quote_decimals, 9);
        assert_eq!(parsed.status, 6);
        assert_eq!(parsed.market_id, pool.market_id);
    }

    #[test]
    fn parse_rejects_short_account() {
        let err = parse_pool_account(&[0u8; 100], Pubkey::new_unique()).unwrap_err();
        assert_eq!(err.category(), crate::errors::ErrorCategory::Protocol);
    }

    #[test]
    fn missing_market_reads_as_none() {
        let mut pool = sample_pool();
        pool.market_id = None;
        let data = encode_pool_account(&pool);
        let parsed = parse_pool_account(&data, pool.amm_id).unwrap();
        assert!(parsed.market_id.is_none());
    }

    #[test]
    fn reserve_and_vault_orientation() {
        let mut pool = sample_pool();
        pool.base_reserve = 111;
        pool.quote_reserve = 222;

        let (r_in, r_out) = pool.reserves_for_input(&pool.quote_mint.clone()).unwrap();
        assert_eq!((r_in, r_out), (222, 111));
        let (src, dst) = pool.vaults_for_input(&pool.quote_mint.clone()).unwrap();
        assert_eq!((src, dst), (pool.quote_vault, pool.base_vault));

        let stranger = Pubkey::new_unique();
        assert!(pool.reserves_for_input(&stranger).is_err());
    }
}
