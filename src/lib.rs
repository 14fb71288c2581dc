//! On-chain pricer
//!
//! Multi-venue swap pricing and route selection over one block of market state:
//! - `simulator`: Uniswap V2 / SushiSwap, Uniswap V3 and Balancer V2 quote math
//! - `oracle`: Chainlink-style feeds with heartbeats, and the V3 TWAP guard
//! - `router`: best-route search, connector routing and the feed estimate
//! - `executor`: slippage-checked, all-or-nothing execution against the snapshot
//! - `snapshot`: the market state itself, from a JSON file or from the chain

pub mod config;
pub mod error;
pub mod executor;
pub mod oracle;
pub mod router;
pub mod simulator;
pub mod snapshot;
pub mod tokens;

pub use config::PricerConfig;
pub use error::{PricingError, PricingResult};
pub use executor::{ExecutionReceipt, SwapExecutor, SwapRequest};
pub use router::{OnChainPricer, Route, SwapQuote, VenueKind};
pub use snapshot::MarketSnapshot;
