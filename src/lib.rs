pub mod config;
pub mod types;
pub mod errors;
pub mod observability;
pub mod firehose;
pub mod classifier;
pub mod gate;
pub mod safety;
pub mod risk;
pub mod amm_math;
pub mod sizing;
pub mod dex;
pub mod aggregator;
pub mod bundle;
pub mod rpc_manager;
pub mod wallet;
pub mod executor;
pub mod positions;
pub mod prices;
pub mod fee_tuner;
pub mod auto_pause;
pub mod metrics;
pub mod metrics_server;
