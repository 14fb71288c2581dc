//! Pricing Errors
//!
//! The taxonomy the router and executor surface to callers:
//! - Unsupported asset / no liquidity are NOT errors (they come back as zero)
//! - Stale oracle data is always an error ("!stale")
//! - Slippage violations abort an execution before anything is committed

use alloy_primitives::{Address, U256};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// Feed round is older than its heartbeat
    #[error("!stale: feed {base}/{quote} updated {age_secs}s ago (heartbeat {heartbeat_secs}s)")]
    StaleFeed {
        base: Address,
        quote: Address,
        age_secs: u64,
        heartbeat_secs: u64,
    },

    /// Realized output is below the caller's floor
    #[error("slippage: route returns {amount_out}, minimum is {min_amount_out}")]
    SlippageExceeded {
        amount_out: U256,
        min_amount_out: U256,
    },

    #[error("no executable route for {sell} -> {buy}")]
    NoRoute { sell: Address, buy: Address },

    #[error("unknown pool {0}")]
    UnknownPool(String),

    /// Fixed-point overflow, underflow or division by zero
    #[error("math error: {0}")]
    Math(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PricingError {
    /// Stale data must reach the caller; everything else may be folded into a zero quote
    pub fn is_stale(&self) -> bool {
        matches!(self, PricingError::StaleFeed { .. })
    }
}

pub type PricingResult<T> = std::result::Result<T, PricingError>;
