//! Serum/OpenBook v1 market account layout (partial) and the vault-signer PDA.

use solana_sdk::pubkey::Pubkey;

use crate::errors::{SniperError, SniperResult};

const OWN_ADDRESS_OFFSET: usize = 5;
const VAULT_SIGNER_NONCE_OFFSET: usize = 37;
const BASE_MINT_OFFSET: usize = 45;
const QUOTE_MINT_OFFSET: usize = 77;
const BASE_VAULT_OFFSET: usize = 109;
const QUOTE_VAULT_OFFSET: usize = 157;
const REQUEST_QUEUE_OFFSET: usize = 213;
const EVENT_QUEUE_OFFSET: usize = 245;
const BIDS_OFFSET: usize = 277;
const ASKS_OFFSET: usize = 309;

/// Smallest account that still contains every field we read.
pub const MARKET_MIN_SIZE: usize = 341;

#[derive(Debug, Clone)]
pub struct MarketState {
    pub market_id: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub event_queue: Pubkey,
    pub request_queue: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub vault_signer: Pubkey,
    pub vault_signer_nonce: u64,
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

/// Vault-signer PDA: seeds are the market id and the stored nonce (u64 LE).
pub fn derive_vault_signer(market_id: &Pubkey, nonce: u64, program_id: &Pubkey) -> Pubkey {
    let nonce_le = nonce.to_le_bytes();
    Pubkey::find_program_address(&[market_id.as_ref(), &nonce_le], program_id).0
}

/// Parse a raw market account. Fails `Protocol` on a short account.
pub fn parse_market_account(
    data: &[u8],
    market_id: Pubkey,
    program_id: &Pubkey,
) -> SniperResult<MarketState> {
    if data.len() < MARKET_MIN_SIZE {
        return Err(SniperError::protocol(format!(
            "market account too short: {} bytes",
            data.len()
        )));
    }

    let vault_signer_nonce = read_u64(data, VAULT_SIGNER_NONCE_OFFSET);
    let vault_signer = derive_vault_signer(&market_id, vault_signer_nonce, program_id);

    Ok(MarketState {
        market_id,
        base_mint: read_pubkey(data, BASE_MINT_OFFSET),
        quote_mint: read_pubkey(data, QUOTE_MINT_OFFSET),
        bids: read_pubkey(data, BIDS_OFFSET),
        asks: read_pubkey(data, ASKS_OFFSET),
        event_queue: read_pubkey(data, EVENT_QUEUE_OFFSET),
        request_queue: read_pubkey(data, REQUEST_QUEUE_OFFSET),
        base_vault: read_pubkey(data, BASE_VAULT_OFFSET),
        quote_vault: read_pubkey(data, QUOTE_VAULT_OFFSET),
        vault_signer,
        vault_signer_nonce,
    })
}

#[cfg(test)]
pub(crate) fn encode_market_account(state: &MarketState) -> Vec<u8> {
    let mut data = vec![0u8; 388];
    let mut write_pk = |offset: usize, pk: &Pubkey| {
        data[offset..offset + 32].copy_from_slice(&pk.to_bytes());
    };
    write_pk(OWN_ADDRESS_OFFSET, &state.market_id);
    write_pk(BASE_MINT_OFFSET, &state.base_mint);
    write_pk(QUOTE_MINT_OFFSET, &state.quote_mint);
    write_pk(BASE_VAULT_OFFSET, &state.base_vault);
    write_pk(QUOTE_VAULT_OFFSET, &state.quote_vault);
    write_pk(REQUEST_QUEUE_OFFSET, &state.request_queue);
    write_pk(EVENT_QUEUE_OFFSET, &state.event_queue);
    write_pk(BIDS_OFFSET, &state.bids);
    write_pk(ASKS_OFFSET, &state.asks);
    data[VAULT_SIGNER_NONCE_OFFSET..VAULT_SIGNER_NONCE_OFFSET + 8]
        .copy_from_slice(&state.vault_signer_nonce.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_synthetic_market() {
        let program = Pubkey::new_unique();
        let market_id = Pubkey::new_unique();
        let nonce = 3u64;
        let expected = MarketState {
            market_id,
            base_mint: Pubkey::new_unique(),
            quote_mint: Pubkey::new_unique(),
            bids: Pubkey::new_unique(),
            asks: Pubkey::new_unique(),
            event_queue: Pubkey::new_unique(),
            request_queue: Pubkey::new_unique(),
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            vault_signer: derive_vault_signer(&market_id, nonce, &program),
            vault_signer_nonce: nonce,
        };
        let data = encode_market_account(&expected);
        let parsed = parse_market_account(&data, market_id, &program).unwrap();
        assert_eq!(parsed.bids, expected.bids);
        assert_eq!(parsed.asks, expected.asks);
        assert_eq!(parsed.event_queue, expected.event_queue);
        assert_eq!(parsed.base_vault, expected.base_vault);
        assert_eq!(parsed.quote_vault, expected.quote_vault);
        assert_eq!(parsed.vault_signer_nonce, nonce);
        assert_eq!(parsed.vault_signer, expected.vault_signer);
    }

    #[test]
    fn vault_signer_is_deterministic() {
        let program = Pubkey::new_unique();
        let market = Pubkey::new_unique();
        let a = derive_vault_signer(&market, 7, &program);
        let b = derive_vault_signer(&market, 7, &program);
        let c = derive_vault_signer(&market, 8, &program);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parse_rejects_short_account() {
        let err =
            parse_market_account(&[0u8; 64], Pubkey::new_unique(), &Pubkey::new_unique())
                .unwrap_err();
        assert_eq!(err.category(), crate::errors::ErrorCategory::Protocol);
    }
}
