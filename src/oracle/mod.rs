//! Oracles
//!
//! - `feeds`: Chainlink-style feed registry reads with heartbeat staleness
//! - `twap`: Uniswap V3 TWAP manipulation guard

pub mod feeds;
pub mod twap;

pub use feeds::{FeedRegistry, OracleConfig, PriceFeed, PriceOracle, RoundData, USD_FEED_DECIMALS};
pub use twap::{TwapGuard, TwapVerdict};
