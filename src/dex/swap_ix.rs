//! Swap instruction builder for the direct AMM path.
//!
//! The account ordering is fixed by the venue and must not change: amm id,
//! derived authority, open orders, target orders, pool base vault, pool quote
//! vault, market program, market id, bids, asks, event queue, market base
//! vault, market quote vault, market vault signer, user source ATA, user dest
//! ATA, user signer, token program.

use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::{v0::Message as MessageV0, VersionedMessage},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};

use crate::errors::{SniperError, SniperResult};

use super::market::MarketState;
use super::pool::PoolState;

/// `swap_base_in` opcode.
pub const SWAP_BASE_IN_OPCODE: u8 = 9;

/// Instruction data: `u8 opcode ∥ u64 amount_in ∥ u64 min_amount_out`.
pub fn encode_swap_data(amount_in: u64, min_amount_out: u64) -> [u8; 17] {
    let mut data = [0u8; 17];
    data[0] = SWAP_BASE_IN_OPCODE;
    data[1..9].copy_from_slice(&amount_in.to_le_bytes());
    data[9..17].copy_from_slice(&min_amount_out.to_le_bytes());
    data
}

/// Inverse of `encode_swap_data`.
pub fn decode_swap_data(data: &[u8]) -> SniperResult<(u8, u64, u64)> {
    if data.len() != 17 {
        return Err(SniperError::protocol(format!(
            "swap instruction data must be 17 bytes, got {}",
            data.len()
        )));
    }
    let mut amount_in = [0u8; 8];
    amount_in.copy_from_slice(&data[1..9]);
    let mut min_out = [0u8; 8];
    min_out.copy_from_slice(&data[9..17]);
    Ok((data[0], u64::from_le_bytes(amount_in), u64::from_le_bytes(min_out)))
}

/// Derived authority PDA for the AMM program.
pub fn derive_amm_authority(amm_id: &Pubkey, amm_program: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[amm_id.as_ref()], amm_program).0
}

/// Min-out from an expected output and a slippage tolerance in bps.
pub fn min_out_with_slippage(expected_out: u64, slippage_bps: u32) -> u64 {
    let slippage = (slippage_bps as u128).min(10_000);
    (expected_out as u128 * (10_000 - slippage) / 10_000) as u64
}

/// Build the venue swap instruction with the fixed account ordering.
pub fn build_swap_instruction(
    pool: &PoolState,
    market: &MarketState,
    amm_program: &Pubkey,
    market_program: &Pubkey,
    user_wallet: &Pubkey,
    user_source_ata: &Pubkey,
    user_dest_ata: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
) -> Instruction {
    let amm_authority = derive_amm_authority(&pool.amm_id, amm_program);
    let accounts = vec![
        AccountMeta::new(pool.amm_id, false),
        AccountMeta::new_readonly(amm_authority, false),
        AccountMeta::new(pool.open_orders, false),
        AccountMeta::new(pool.target_orders, false),
        AccountMeta::new(pool.base_vault, false),
        AccountMeta::new(pool.quote_vault, false),
        AccountMeta::new_readonly(*market_program, false),
        AccountMeta::new(market.market_id, false),
        AccountMeta::new(market.bids, false),
        AccountMeta::new(market.asks, false),
        AccountMeta::new(market.event_queue, false),
        AccountMeta::new(market.base_vault, false),
        AccountMeta::new(market.quote_vault, false),
        AccountMeta::new_readonly(market.vault_signer, false),
        AccountMeta::new(*user_source_ata, false),
        AccountMeta::new(*user_dest_ata, false),
        AccountMeta::new_readonly(*user_wallet, true),
        AccountMeta::new_readonly(spl_token::id(), false),
    ];

    Instruction {
        program_id: *amm_program,
        accounts,
        data: encode_swap_data(amount_in, min_amount_out).to_vec(),
    }
}

/// Associated token account for `(wallet, mint)` plus an idempotent
/// create instruction for the output side.
pub fn ata_with_create_ix(wallet: &Pubkey, mint: &Pubkey, payer: &Pubkey) -> (Pubkey, Instruction) {
    let ata = get_associated_token_address(wallet, mint);
    let create_ix =
        create_associated_token_account_idempotent(payer, wallet, mint, &spl_token::id());
    (ata, create_ix)
}

/// Assemble the full unsigned swap transaction: compute-budget limit and
/// price, dest-ATA create-if-missing, then the swap itself.
#[allow(clippy::too_many_arguments)]
pub fn build_swap_transaction(
    pool: &PoolState,
    market: &MarketState,
    amm_program: &Pubkey,
    market_program: &Pubkey,
    user_wallet: &Pubkey,
    input_mint: &Pubkey,
    output_mint: &Pubkey,
    amount_in: u64,
    min_amount_out: u64,
    recent_blockhash: Hash,
    compute_unit_limit: u32,
    priority_fee_microlamports: u64,
) -> SniperResult<VersionedTransaction> {
    let mut instructions: Vec<Instruction> = Vec::with_capacity(5);
    if compute_unit_limit > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(compute_unit_limit));
    }
    if priority_fee_microlamports > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
            priority_fee_microlamports,
        ));
    }

    let source_ata = get_associated_token_address(user_wallet, input_mint);
    let (dest_ata, create_dest_ix) = ata_with_create_ix(user_wallet, output_mint, user_wallet);
    instructions.push(create_dest_ix);

    instructions.push(build_swap_instruction(
        pool,
        market,
        amm_program,
        market_program,
        user_wallet,
        &source_ata,
        &dest_ata,
        amount_in,
        min_amount_out,
    ));

    let message = MessageV0::try_compile(user_wallet, &instructions, &[], recent_blockhash)
        .map_err(|e| SniperError::logic(format!("failed to compile swap message: {e}")))?;

    Ok(VersionedTransaction {
        signatures: vec![solana_sdk::signature::Signature::default()],
        message: VersionedMessage::V0(message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::market::derive_vault_signer;

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
            base_reserve: 1_000_000,
            quote_reserve: 1_000_000,
        }
    }

    fn sample_market(program: &Pubkey) -> MarketState {
        let market_id = Pubkey::new_unique();
        MarketState {
            market_id,
            base_mint: Pubkey::new_unique(),
            quote_mint: Pubkey::new_unique(),
            bids: Pubkey::new_unique(),
            asks: Pubkey::new_unique(),
            event_queue: Pubkey::new_unique(),
            request_queue: Pubkey::new_unique(),
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            vault_signer: derive_vault_signer(&market_id, 1, program),
            vault_signer_nonce: 1,
        }
    }

    #[test]
    fn swap_data_roundtrip() {
        let data = encode_swap_data(1_000_000_000, 987_654_321);
        let (opcode, amount_in, min_out) = decode_swap_data(&data).unwrap();
        assert_eq!(opcode, 9);
        assert_eq!(amount_in, 1_000_000_000);
        assert_eq!(min_out, 987_654_321);

        assert!(decode_swap_data(&data[..16]).is_err());
    }

    #[test]
    fn min_out_applies_slippage() {
        assert_eq!(min_out_with_slippage(10_000, 500), 9_500);
        assert_eq!(min_out_with_slippage(10_000, 0), 10_000);
        assert_eq!(min_out_with_slippage(10_000, 10_000), 0);
        // over-cap clamps rather than underflowing
        assert_eq!(min_out_with_slippage(10_000, 20_000), 0);
    }

    #[test]
    fn swap_instruction_account_ordering() {
        let amm_program = Pubkey::new_unique();
        let market_program = Pubkey::new_unique();
        let pool = sample_pool();
        let market = sample_market(&market_program);
        let wallet = Pubkey::new_unique();
        let src = Pubkey::new_unique();
        let dst = Pubkey::new_unique();

        let ix = build_swap_instruction(
            &pool,
            &market,
            &amm_program,
            &market_program,
            &wallet,
            &src,
            &dst,
            5,
            3,
        );

        assert_eq!(ix.program_id, amm_program);
        assert_eq!(ix.accounts.len(), 18);
        assert_eq!(ix.accounts[0].pubkey, pool.amm_id);
        assert_eq!(ix.accounts[1].pubkey, derive_amm_authority(&pool.amm_id, &amm_program));
        assert_eq!(ix.accounts[6].pubkey, market_program);
        assert_eq!(ix.accounts[7].pubkey, market.market_id);
        assert_eq!(ix.accounts[13].pubkey, market.vault_signer);
        assert_eq!(ix.accounts[14].pubkey, src);
        assert_eq!(ix.accounts[15].pubkey, dst);
        assert_eq!(ix.accounts[16].pubkey, wallet);
        assert!(ix.accounts[16].is_signer);
        assert_eq!(ix.accounts[17].pubkey, spl_token::id());

        let (opcode, amount_in, min_out) = decode_swap_data(&ix.data).unwrap();
        assert_eq!((opcode, amount_in, min_out), (9, 5, 3));
    }

    #[test]
    fn transaction_orders_budget_ata_swap() {
        let amm_program = Pubkey::new_unique();
        let market_program = Pubkey::new_unique();
        let pool = sample_pool();
        let market = sample_market(&market_program);
        let wallet = Pubkey::new_unique();
        let quote = pool.quote_mint;
        let base = pool.base_mint;

        let tx = build_swap_transaction(
            &pool,
            &market,
            &amm_program,
            &market_program,
            &wallet,
            &quote,
            &base,
            1_000,
            900,
            Hash::default(),
            200_000,
            50_000,
        )
        .unwrap();

        match &tx.message {
            VersionedMessage::V0(msg) => {
                // compute limit, compute price, create-ATA, swap
                assert_eq!(msg.instructions.len(), 4);
            }
            _ => panic!("expected v0 message"),
        }
    }
}
