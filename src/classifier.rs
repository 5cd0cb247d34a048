//! Event classifier: turns raw firehose transactions into launch candidates.
//!
//! Stateless per message, stateful across a slot window: per-slot buy
//! accumulators close `W` slots behind the stream head and emit coordinated
//! buys. New pools, graduations, whale entries, and KOL buys are emitted
//! immediately. All internal sets are bounded with FIFO-style eviction.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::firehose::source::ProgramSet;
use crate::metrics::metrics;
use crate::types::{
    now_ms, CandidateSender, LaunchCandidate, RawEventReceiver, RawTxEvent, Venue, WSOL_MINT,
};

/// Bounded signature-dedup window. On overflow the most-recent half is kept.
#[derive(Debug)]
pub struct SignatureWindow {
    set: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl SignatureWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            set: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap: cap.max(2),
        }
    }

    /// Insert a signature; returns false when it was already present.
    pub fn insert(&mut self, signature: &str) -> bool {
        if self.set.contains(signature) {
            return false;
        }
        self.set.insert(signature.to_string());
        self.order.push_back(signature.to_string());
        if self.order.len() > self.cap {
            let keep = self.cap / 2;
            while self.order.len() > keep {
                if let Some(old) = self.order.pop_front() {
                    self.set.remove(&old);
                }
            }
        }
        true
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.set.contains(signature)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Bounded token set gating emissions to at most one event per token per run.
#[derive(Debug)]
struct SeenTokens {
    set: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl SeenTokens {
    fn new(cap: usize) -> Self {
        Self {
            set: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap: cap.max(2),
        }
    }

    fn remember(&mut self, token: &str) {
        if self.set.insert(token.to_string()) {
            self.order.push_back(token.to_string());
            if self.order.len() > self.cap {
                let keep = self.cap / 2;
                while self.order.len() > keep {
                    if let Some(old) = self.order.pop_front() {
                        self.set.remove(&old);
                    }
                }
            }
        }
    }

    fn contains(&self, token: &str) -> bool {
        self.set.contains(token)
    }
}

/// One parsed buy observation, before aggregation.
#[derive(Debug, Clone)]
struct ParsedBuy {
    signature: String,
    slot: u64,
    venue: Venue,
    graduation: bool,
    buyer: Option<String>,
    token_mint: String,
    amount_sol: f64,
    is_new_pool: bool,
}

#[derive(Debug, Default)]
struct SlotActivity {
    /// token mint -> buys observed in this slot
    token_buys: HashMap<String, Vec<ParsedBuy>>,
}

const SEEN_SIGNATURES_CAP: usize = 20_000;
const SEEN_TOKENS_CAP: usize = 2_000;
const WALLET_FIRST_SEEN_CAP: usize = 50_000;
const FRESH_WALLET_SLOTS: u64 = 100;
/// KOL match scans the leading account keys only.
const KOL_KEY_SCAN: usize = 5;

pub struct Classifier {
    programs: ProgramSet,
    kol_wallets: HashMap<String, String>,
    min_coordinated_buyers: usize,
    whale_threshold_sol: f64,
    slot_window: u64,

    seen_signatures: SignatureWindow,
    seen_tokens: SeenTokens,
    slot_activity: HashMap<u64, SlotActivity>,
    wallet_first_seen: HashMap<String, u64>,
    current_slot: u64,
}

impl Classifier {
    pub fn new(cfg: &Config) -> Self {
        Self {
            programs: ProgramSet::from_config(cfg),
            kol_wallets: cfg.kol_wallets.clone(),
            min_coordinated_buyers: cfg.min_coordinated_buyers,
            whale_threshold_sol: cfg.whale_threshold_sol,
            slot_window: cfg.coordinated_slot_window,
            seen_signatures: SignatureWindow::new(SEEN_SIGNATURES_CAP),
            seen_tokens: SeenTokens::new(SEEN_TOKENS_CAP),
            slot_activity: HashMap::new(),
            wallet_first_seen: HashMap::new(),
            current_slot: 0,
        }
    }

    /// Consume raw events until the channel closes, emitting candidates.
    pub async fn run(mut self, mut raw_rx: RawEventReceiver, cand_tx: CandidateSender) {
        info!(
            min_buyers = self.min_coordinated_buyers,
            whale_sol = self.whale_threshold_sol,
            window = self.slot_window,
            "classifier started"
        );
        while let Some(event) = raw_rx.recv().await {
            for candidate in self.process(event) {
                metrics().record_cluster_detected(candidate.kind_label(), candidate.confidence());
                if cand_tx.send(candidate).await.is_err() {
                    warn!("candidate channel closed; classifier exiting");
                    return;
                }
            }
        }
        info!("raw event channel closed; classifier exiting");
    }

    /// Process one raw transaction; returns zero or more candidates
    /// (immediate triggers plus any slot-closure emissions it unlocked).
    pub fn process(&mut self, event: RawTxEvent) -> Vec<LaunchCandidate> {
        if !self.seen_signatures.insert(&event.signature) {
            metrics().record_frame(true);
            return Vec::new();
        }
        metrics().record_frame(false);

        let mut emitted = Vec::new();

        // Slot advance closes out windows strictly older than head − W.
        if event.slot > self.current_slot {
            emitted.extend(self.close_completed_slots(event.slot));
            self.current_slot = event.slot;
        }

        let Some(parsed) = self.parse_buy(&event) else {
            return emitted;
        };

        self.accumulate(&parsed);
        if let Some(immediate) = self.immediate_trigger(&parsed, &event) {
            self.seen_tokens.remember(parsed.token_mint.as_str());
            emitted.push(immediate);
        }

        emitted
    }

    /// Venue detection plus buyer/token/amount inference.
    fn parse_buy(&mut self, event: &RawTxEvent) -> Option<ParsedBuy> {
        let mut venue = None;
        for key in &event.account_keys {
            if let Some(v) = self.programs.venue_for_account(key) {
                // A launch-venue hit outranks the aggregator's router.
                venue = match (venue, v) {
                    (Some(Venue::Aggregator), other) => Some(other),
                    (None, other) => Some(other),
                    (existing, _) => existing,
                };
            }
        }
        let mut venue = venue?;

        // Pool-initialization markers in the log messages.
        let mut is_new_pool = false;
        let mut graduation = false;
        for log in &event.log_messages {
            let lower = log.to_lowercase();
            if lower.contains("initializepool") || lower.contains("initialize") {
                is_new_pool = true;
                break;
            }
            if lower.contains("migrate") && venue == Venue::Graduation {
                is_new_pool = true;
                graduation = true;
                break;
            }
        }

        let buyer = event.account_keys.first().cloned();

        // The acquired token: a post-balance owned by the buyer, not the
        // wrapped native mint, whose amount increased.
        let mut token_mint = None;
        if let Some(buyer_key) = &buyer {
            for post in &event.post_token_balances {
                if &post.owner == buyer_key && post.mint != WSOL_MINT {
                    let pre_amount = event
                        .pre_token_balances
                        .iter()
                        .find(|pre| pre.mint == post.mint && &pre.owner == buyer_key)
                        .map(|pre| pre.ui_amount)
                        .unwrap_or(0.0);
                    if post.ui_amount > pre_amount {
                        token_mint = Some(post.mint.clone());
                        break;
                    }
                }
            }
        }
        let token_mint = token_mint?;

        // Spent quote: fee payer's lamport delta, clamped to >= 0.
        let amount_sol = match (event.pre_balances.first(), event.post_balances.first()) {
            (Some(pre), Some(post)) if pre > post => (pre - post) as f64 / 1e9,
            _ => 0.0,
        };

        if graduation {
            venue = Venue::Graduation;
        }

        if let Some(buyer_key) = &buyer {
            self.wallet_first_seen.entry(buyer_key.clone()).or_insert(event.slot);
        }

        Some(ParsedBuy {
            signature: event.signature.clone(),
            slot: event.slot,
            venue,
            graduation,
            buyer,
            token_mint,
            amount_sol,
            is_new_pool,
        })
    }

    fn accumulate(&mut self, parsed: &ParsedBuy) {
        let activity = self.slot_activity.entry(parsed.slot).or_default();
        activity
            .token_buys
            .entry(parsed.token_mint.clone())
            .or_default()
            .push(parsed.clone());
    }

    fn is_fresh_wallet(&self, wallet: &str, slot: u64) -> bool {
        self.wallet_first_seen
            .get(wallet)
            .map(|first| slot.saturating_sub(*first) < FRESH_WALLET_SLOTS)
            .unwrap_or(true)
    }

    /// New-pool, graduation, KOL, and whale triggers fire without waiting for
    /// slot closure. At most one event per token per run.
    fn immediate_trigger(
        &mut self,
        parsed: &ParsedBuy,
        event: &RawTxEvent,
    ) -> Option<LaunchCandidate> {
        if self.seen_tokens.contains(&parsed.token_mint) {
            return None;
        }
        let timestamp = (now_ms() / 1000) as i64;

        // Pool initialization outranks everything else on the same frame.
        if parsed.is_new_pool {
            if parsed.graduation {
                return Some(LaunchCandidate::Graduation {
                    token_mint: parsed.token_mint.clone(),
                    signature: parsed.signature.clone(),
                    slot: parsed.slot,
                    timestamp,
                });
            }
            return Some(LaunchCandidate::NewPool {
                pool_address: None,
                token_mint: parsed.token_mint.clone(),
                quote_mint: WSOL_MINT.to_string(),
                initial_liquidity_sol: parsed.amount_sol,
                signature: parsed.signature.clone(),
                slot: parsed.slot,
                timestamp,
                venue: parsed.venue,
            });
        }

        // KOL allow-list match on the leading keys.
        for key in event.account_keys.iter().take(KOL_KEY_SCAN) {
            if let Some(label) = self.kol_wallets.get(key) {
                debug!(wallet = key.as_str(), label = label.as_str(), "KOL buy detected");
                return Some(LaunchCandidate::KolBuy {
                    wallet: key.clone(),
                    wallet_label: label.clone(),
                    token_mint: parsed.token_mint.clone(),
                    amount_sol: parsed.amount_sol,
                    signature: parsed.signature.clone(),
                    slot: parsed.slot,
                    timestamp,
                    venue: parsed.venue,
                });
            }
        }

        if parsed.amount_sol >= self.whale_threshold_sol {
            return Some(LaunchCandidate::CoordinatedBuy {
                token_mint: parsed.token_mint.clone(),
                signatures: vec![parsed.signature.clone()],
                buyer_wallets: parsed.buyer.iter().cloned().collect(),
                num_buyers: 1,
                total_sol_volume: parsed.amount_sol,
                first_slot: parsed.slot,
                timestamp,
                confidence: 0.7,
            });
        }

        None
    }

    /// Finalize every slot older than `incoming_slot − W`: emit coordinated
    /// buys for tokens with enough distinct buyers.
    fn close_completed_slots(&mut self, incoming_slot: u64) -> Vec<LaunchCandidate> {
        let cutoff = incoming_slot.saturating_sub(self.slot_window);
        let done: Vec<u64> = self
            .slot_activity
            .keys()
            .copied()
            .filter(|slot| *slot < cutoff)
            .collect();

        let mut emitted = Vec::new();
        for slot in done {
            let Some(activity) = self.slot_activity.remove(&slot) else { continue };
            for (token, buys) in activity.token_buys {
                if self.seen_tokens.contains(&token) {
                    continue;
                }
                let unique_buyers: HashSet<&String> =
                    buys.iter().filter_map(|b| b.buyer.as_ref()).collect();
                if unique_buyers.len() < self.min_coordinated_buyers {
                    continue;
                }
                let fresh = unique_buyers
                    .iter()
                    .filter(|w| self.is_fresh_wallet(w, slot))
                    .count();
                let total_sol: f64 = buys.iter().map(|b| b.amount_sol).sum();
                let confidence = (0.5 + unique_buyers.len() as f64 * 0.1).min(0.95);
                debug!(
                    token = token.as_str(),
                    buyers = unique_buyers.len(),
                    fresh_wallets = fresh,
                    total_sol,
                    "coordinated buy closed"
                );
                self.seen_tokens.remember(&token);
                emitted.push(LaunchCandidate::CoordinatedBuy {
                    token_mint: token,
                    signatures: buys.iter().map(|b| b.signature.clone()).collect(),
                    buyer_wallets: unique_buyers.into_iter().cloned().collect(),
                    num_buyers: buys
                        .iter()
                        .filter_map(|b| b.buyer.as_ref())
                        .collect::<HashSet<_>>()
                        .len(),
                    total_sol_volume: total_sol,
                    first_slot: slot,
                    timestamp: (now_ms() / 1000) as i64,
                    confidence,
                });
            }
        }

        // Bound the first-seen map by slot cutoff.
        if self.wallet_first_seen.len() > WALLET_FIRST_SEEN_CAP {
            let prune_below = incoming_slot.saturating_sub(10_000);
            self.wallet_first_seen.retain(|_, slot| *slot > prune_below);
        }

        emitted
    }

    /// Mark a token as traded so no further entry events are emitted for it.
    pub fn remember_token(&mut self, token: &str) {
        self.seen_tokens.remember(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenBalance;

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.kol_wallets.insert("KolWallet111".to_string(), "alpha".to_string());
        cfg
    }

    fn buy_event(sig: &str, slot: u64, buyer: &str, mint: &str, sol: f64) -> RawTxEvent {
        let cfg = test_config();
        let pre = 50_000_000_000u64;
        let post = pre - (sol * 1e9) as u64;
        RawTxEvent {
            signature: sig.to_string(),
            slot,
            account_keys: vec![buyer.to_string(), cfg.amm_program_id.clone()],
            log_messages: vec!["Program log: swap".to_string()],
            pre_balances: vec![pre, 0],
            post_balances: vec![post, 0],
            pre_token_balances: vec![],
            post_token_balances: vec![TokenBalance {
                account_index: 1,
                mint: mint.to_string(),
                owner: buyer.to_string(),
                ui_amount: 1_000.0,
            }],
            raw_tx_base64: String::new(),
            received_at_ms: 0,
        }
    }

    fn pool_init_event(sig: &str, slot: u64, buyer: &str, mint: &str) -> RawTxEvent {
        let mut event = buy_event(sig, slot, buyer, mint, 1.0);
        event.log_messages = vec!["Program log: initialize2: InitializeInstruction2".to_string()];
        event
    }

    #[test]
    fn signature_window_caps_and_keeps_recent_half() {
        let mut window = SignatureWindow::new(10);
        for i in 0..11 {
            assert!(window.insert(&format!("sig{i}")));
        }
        assert!(window.len() <= 10);
        // most recent kept, oldest gone
        assert!(window.contains("sig10"));
        assert!(!window.contains("sig0"));
    }

    #[test]
    fn duplicate_signature_emits_once() {
        let mut classifier = Classifier::new(&test_config());
        let first = classifier.process(pool_init_event("AAA1", 10, "Buyer1", "MintA"));
        assert_eq!(first.len(), 1);
        let dup = classifier.process(pool_init_event("AAA1", 10, "Buyer1", "MintA"));
        assert!(dup.is_empty(), "same signature must never re-emit");
    }

    #[test]
    fn new_pool_fires_immediately() {
        let mut classifier = Classifier::new(&test_config());
        let out = classifier.process(pool_init_event("S1", 10, "Buyer1", "MintA"));
        assert_eq!(out.len(), 1);
        match &out[0] {
            LaunchCandidate::NewPool { token_mint, venue, .. } => {
                assert_eq!(token_mint, "MintA");
                assert_eq!(*venue, Venue::AmmV4);
            }
            other => panic!("expected NewPool, got {other:?}"),
        }
    }

    #[test]
    fn graduation_marker_on_launch_venue() {
        let cfg = test_config();
        let mut classifier = Classifier::new(&cfg);
        let mut event = buy_event("S1", 10, "Buyer1", "MintG", 1.0);
        event.account_keys = vec!["Buyer1".to_string(), cfg.launch_program_id.clone()];
        event.log_messages = vec!["Program log: migrate to amm".to_string()];
        let out = classifier.process(event);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], LaunchCandidate::Graduation { .. }));
    }

    #[test]
    fn kol_buy_detected_from_leading_keys() {
        let cfg = test_config();
        let mut classifier = Classifier::new(&cfg);
        let mut event = buy_event("S1", 10, "KolWallet111", "MintK", 0.8);
        event.account_keys = vec!["KolWallet111".to_string(), cfg.amm_program_id.clone()];
        let out = classifier.process(event);
        assert_eq!(out.len(), 1);
        match &out[0] {
            LaunchCandidate::KolBuy { wallet, wallet_label, amount_sol, .. } => {
                assert_eq!(wallet, "KolWallet111");
                assert_eq!(wallet_label, "alpha");
                assert!((amount_sol - 0.8).abs() < 1e-9);
            }
            other => panic!("expected KolBuy, got {other:?}"),
        }
    }

    #[test]
    fn whale_buy_triggers_without_slot_closure() {
        let mut classifier = Classifier::new(&test_config());
        let out = classifier.process(buy_event("S1", 10, "Whale1", "MintW", 12.0));
        assert_eq!(out.len(), 1);
        match &out[0] {
            LaunchCandidate::CoordinatedBuy { num_buyers, confidence, total_sol_volume, .. } => {
                assert_eq!(*num_buyers, 1);
                assert!((confidence - 0.7).abs() < 1e-9);
                assert!((total_sol_volume - 12.0).abs() < 1e-9);
            }
            other => panic!("expected whale CoordinatedBuy, got {other:?}"),
        }
    }

    #[test]
    fn coordinated_buy_emitted_on_slot_closure() {
        let mut classifier = Classifier::new(&test_config());
        // four distinct buyers of token T in slot 100, 0.5 SOL each
        for (i, buyer) in ["B1", "B2", "B3", "B4"].iter().enumerate() {
            let out = classifier.process(buy_event(&format!("S{i}"), 100, buyer, "T", 0.5));
            assert!(out.is_empty(), "sub-threshold buys must wait for closure");
        }
        // advancing to slot 103 finalizes slot 100 (103 - W(2) = 101 > 100)
        let out = classifier.process(buy_event("SX", 103, "B9", "Other", 0.1));
        assert_eq!(out.len(), 1);
        match &out[0] {
            LaunchCandidate::CoordinatedBuy {
                token_mint,
                num_buyers,
                total_sol_volume,
                confidence,
                first_slot,
                signatures,
                ..
            } => {
                assert_eq!(token_mint, "T");
                assert_eq!(*num_buyers, 4);
                assert!((total_sol_volume - 2.0).abs() < 1e-9);
                assert!((confidence - 0.9).abs() < 1e-9);
                assert_eq!(*first_slot, 100);
                assert_eq!(signatures.len(), 4);
            }
            other => panic!("expected CoordinatedBuy, got {other:?}"),
        }
    }

    #[test]
    fn too_few_buyers_never_emit() {
        let mut classifier = Classifier::new(&test_config());
        classifier.process(buy_event("S1", 100, "B1", "T", 0.5));
        classifier.process(buy_event("S2", 100, "B2", "T", 0.5));
        let out = classifier.process(buy_event("SX", 110, "B9", "Other", 0.1));
        assert!(out.is_empty());
    }

    #[test]
    fn one_event_per_token_per_run() {
        let mut classifier = Classifier::new(&test_config());
        let first = classifier.process(pool_init_event("S1", 10, "Buyer1", "MintA"));
        assert_eq!(first.len(), 1);
        // Same token again under a different signature: suppressed.
        let second = classifier.process(pool_init_event("S2", 11, "Buyer2", "MintA"));
        assert!(second.is_empty());
        // And a later coordinated accumulation for it is suppressed too.
        for (i, buyer) in ["B1", "B2", "B3"].iter().enumerate() {
            classifier.process(buy_event(&format!("T{i}"), 20, buyer, "MintA", 0.5));
        }
        let closed = classifier.process(buy_event("TX", 30, "B9", "Other", 0.1));
        assert!(closed.is_empty());
    }

    #[test]
    fn non_venue_transactions_dropped() {
        let mut classifier = Classifier::new(&test_config());
        let mut event = buy_event("S1", 10, "Buyer1", "MintA", 5.0);
        event.account_keys = vec!["Buyer1".to_string(), "SomeOtherProgram".to_string()];
        assert!(classifier.process(event).is_empty());
    }

    #[test]
    fn wsol_balance_changes_ignored() {
        let mut classifier = Classifier::new(&test_config());
        let mut event = buy_event("S1", 10, "Buyer1", WSOL_MINT, 15.0);
        event.post_token_balances[0].mint = WSOL_MINT.to_string();
        assert!(classifier.process(event).is_empty());
    }
}
