//! Stream-source contract and the venue program set a subscription filters on.

use async_trait::async_trait;

use crate::config::Config;
use crate::types::{RawEventSender, Venue};

/// A transaction stream source. Implementations own their transport and
/// reconnect until stopped.
#[async_trait]
pub trait TxStreamSource: Send + Sync {
    /// Run ingestion; returns only after `request_stop`.
    async fn run(&self, raw_tx: RawEventSender);

    /// Transport currently healthy (receiving within the silence window)?
    fn is_healthy(&self) -> bool;

    /// Cooperative cancellation.
    fn request_stop(&self);
}

/// Program identifiers for the supported venues plus the KOL allow-list.
/// Together they form the subscription's `accountInclude` filter.
#[derive(Debug, Clone)]
pub struct ProgramSet {
    pub launch_program: String,
    pub amm_program: String,
    pub clmm_program: String,
    pub aggregator_program: String,
    pub kol_wallets: Vec<String>,
}

impl ProgramSet {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            launch_program: cfg.launch_program_id.clone(),
            amm_program: cfg.amm_program_id.clone(),
            clmm_program: cfg.clmm_program_id.clone(),
            aggregator_program: cfg.aggregator_program_id.clone(),
            kol_wallets: cfg.kol_wallets.keys().cloned().collect(),
        }
    }

    /// All accounts the subscription includes.
    pub fn account_include(&self) -> Vec<String> {
        let mut accounts = vec![
            self.launch_program.clone(),
            self.amm_program.clone(),
            self.clmm_program.clone(),
            self.aggregator_program.clone(),
        ];
        accounts.extend(self.kol_wallets.iter().cloned());
        accounts
    }

    /// Match an account key to a venue program.
    pub fn venue_for_account(&self, account: &str) -> Option<Venue> {
        if account == self.launch_program {
            Some(Venue::Graduation)
        } else if account == self.amm_program {
            Some(Venue::AmmV4)
        } else if account == self.clmm_program {
            Some(Venue::Clmm)
        } else if account == self.aggregator_program {
            Some(Venue::Aggregator)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_include_covers_programs_and_kols() {
        let mut cfg = Config::default();
        cfg.kol_wallets.insert("Wallet111".to_string(), "alpha".to_string());
        let set = ProgramSet::from_config(&cfg);
        let include = set.account_include();
        assert!(include.contains(&cfg.launch_program_id));
        assert!(include.contains(&cfg.amm_program_id));
        assert!(include.contains(&"Wallet111".to_string()));
    }

    #[test]
    fn venue_matching() {
        let cfg = Config::default();
        let set = ProgramSet::from_config(&cfg);
        assert_eq!(set.venue_for_account(&cfg.amm_program_id), Some(Venue::AmmV4));
        assert_eq!(set.venue_for_account(&cfg.launch_program_id), Some(Venue::Graduation));
        assert_eq!(set.venue_for_account(&cfg.clmm_program_id), Some(Venue::Clmm));
        assert_eq!(set.venue_for_account("unknown"), None);
    }
}
