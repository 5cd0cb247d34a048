//! Direct AMM access: on-chain layout parsers, the swap instruction builder,
//! and the short-TTL pool/market cache.

pub mod cache;
pub mod market;
pub mod pool;
pub mod swap_ix;

pub use cache::PoolCache;
pub use market::MarketState;
pub use pool::PoolState;
