use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;

/// Wrapped native mint (SOL) as string; quote asset everywhere in this engine.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

pub fn wsol_pubkey() -> Pubkey {
    WSOL_MINT.parse::<Pubkey>().expect("invalid WSOL mint constant")
}

/// Venue a transaction or pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    AmmV4,
    Clmm,
    Graduation,
    Aggregator,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::AmmV4 => "amm_v4",
            Venue::Clmm => "clmm",
            Venue::Graduation => "graduation",
            Venue::Aggregator => "aggregator",
        }
    }

    /// The direct-AMM execution path only applies to constant-product venues.
    pub fn supports_direct_amm(&self) -> bool {
        matches!(self, Venue::AmmV4 | Venue::Graduation)
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded transaction frame off the firehose, pre-classification.
#[derive(Debug, Clone)]
pub struct RawTxEvent {
    pub signature: String,
    pub slot: u64,
    pub account_keys: Vec<String>,
    pub log_messages: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
    /// Raw base64 payload kept for late decode paths; empty when the provider
    /// delivered a json-encoded transaction.
    pub raw_tx_base64: String,
    pub received_at_ms: u64,
}

/// Token balance entry from transaction meta.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBalance {
    pub account_index: u8,
    pub mint: String,
    pub owner: String,
    pub ui_amount: f64,
}

/// A classified launch candidate ready for the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchCandidate {
    NewPool {
        pool_address: Option<String>,
        token_mint: String,
        quote_mint: String,
        initial_liquidity_sol: f64,
        signature: String,
        slot: u64,
        timestamp: i64,
        venue: Venue,
    },
    Graduation {
        token_mint: String,
        signature: String,
        slot: u64,
        timestamp: i64,
    },
    KolBuy {
        wallet: String,
        wallet_label: String,
        token_mint: String,
        amount_sol: f64,
        signature: String,
        slot: u64,
        timestamp: i64,
        venue: Venue,
    },
    CoordinatedBuy {
        token_mint: String,
        signatures: Vec<String>,
        buyer_wallets: Vec<String>,
        num_buyers: usize,
        total_sol_volume: f64,
        first_slot: u64,
        timestamp: i64,
        confidence: f64,
    },
}

impl LaunchCandidate {
    pub fn token_mint(&self) -> &str {
        match self {
            LaunchCandidate::NewPool { token_mint, .. } => token_mint,
            LaunchCandidate::Graduation { token_mint, .. } => token_mint,
            LaunchCandidate::KolBuy { token_mint, .. } => token_mint,
            LaunchCandidate::CoordinatedBuy { token_mint, .. } => token_mint,
        }
    }

    pub fn first_signature(&self) -> &str {
        match self {
            LaunchCandidate::NewPool { signature, .. } => signature,
            LaunchCandidate::Graduation { signature, .. } => signature,
            LaunchCandidate::KolBuy { signature, .. } => signature,
            LaunchCandidate::CoordinatedBuy { signatures, .. } => {
                signatures.first().map(|s| s.as_str()).unwrap_or("")
            }
        }
    }

    pub fn slot(&self) -> u64 {
        match self {
            LaunchCandidate::NewPool { slot, .. } => *slot,
            LaunchCandidate::Graduation { slot, .. } => *slot,
            LaunchCandidate::KolBuy { slot, .. } => *slot,
            LaunchCandidate::CoordinatedBuy { first_slot, .. } => *first_slot,
        }
    }

    /// Detection confidence in [0, 1]. Immediate triggers carry fixed values.
    pub fn confidence(&self) -> f64 {
        match self {
            LaunchCandidate::NewPool { .. } => 0.9,
            LaunchCandidate::Graduation { .. } => 0.9,
            LaunchCandidate::KolBuy { .. } => 0.8,
            LaunchCandidate::CoordinatedBuy { confidence, .. } => *confidence,
        }
    }

    /// Preferred execution venue for this candidate.
    pub fn venue(&self) -> Venue {
        match self {
            LaunchCandidate::NewPool { venue, .. } => *venue,
            LaunchCandidate::Graduation { .. } => Venue::Graduation,
            LaunchCandidate::KolBuy { venue, .. } => *venue,
            LaunchCandidate::CoordinatedBuy { .. } => Venue::Aggregator,
        }
    }

    /// Stable label for cluster-detection metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            LaunchCandidate::NewPool { .. } => "new_pool",
            LaunchCandidate::Graduation { .. } => "graduation",
            LaunchCandidate::KolBuy { .. } => "kol_buy",
            LaunchCandidate::CoordinatedBuy { .. } => "coordinated_buy",
        }
    }
}

pub type RawEventSender = mpsc::Sender<RawTxEvent>;
pub type RawEventReceiver = mpsc::Receiver<RawTxEvent>;
pub type CandidateSender = mpsc::Sender<LaunchCandidate>;
pub type CandidateReceiver = mpsc::Receiver<LaunchCandidate>;

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_accessors() {
        let c = LaunchCandidate::CoordinatedBuy {
            token_mint: "M1".into(),
            signatures: vec!["s1".into(), "s2".into()],
            buyer_wallets: vec!["w1".into(), "w2".into()],
            num_buyers: 2,
            total_sol_volume: 1.5,
            first_slot: 42,
            timestamp: 0,
            confidence: 0.7,
        };
        assert_eq!(c.token_mint(), "M1");
        assert_eq!(c.first_signature(), "s1");
        assert_eq!(c.slot(), 42);
        assert_eq!(c.kind_label(), "coordinated_buy");
        assert_eq!(c.venue(), Venue::Aggregator);
    }

    #[test]
    fn venue_direct_amm_support() {
        assert!(Venue::AmmV4.supports_direct_amm());
        assert!(Venue::Graduation.supports_direct_amm());
        assert!(!Venue::Clmm.supports_direct_amm());
        assert!(!Venue::Aggregator.supports_direct_amm());
    }
}
