//! Router / Optimizer
//!
//! Responsible for:
//! - Quoting every venue that can fill (sell, buy, amount), directly and via connectors
//! - Dropping Uniswap V3 pools that fail the TWAP guard
//! - Picking the best output, ties going to the lower venue id
//! - The oracle-only estimate path used to sanity-check quotes

mod pricer;
mod venue;

pub use pricer::{OnChainPricer, ProbeReport, RankedPool, SwapQuote, UniV3ConnectorParams, UniV3Ranking};
pub use venue::{Route, V3Leg, VenueKind};

#[cfg(test)]
pub(crate) use pricer::tests as pricer_tests;
