//! Venue Simulators
//!
//! Pure quote computation against a market snapshot:
//! - Uniswap V2 / SushiSwap constant-product pairs
//! - Uniswap V3 concentrated liquidity with tick crossing
//! - Balancer V2 weighted and stable pools
//!
//! Nothing here mutates the snapshot; `apply_swap` methods are only called by the executor.

pub mod balancer;
pub mod math;
pub mod uniswap_v2;
pub mod uniswap_v3;

pub use balancer::{BalancerPool, BalancerPoolKind, BalancerSettlement, BalancerSwapResult};
pub use uniswap_v2::{ConstantProductPair, V2Dex, V2SwapResult};
pub use uniswap_v3::{InRangeQuote, Observation, TickInfo, UniV3Pool, V3SwapResult};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::router::Route;

// ============================================
// GAS ESTIMATES
// ============================================

/// Constant-product swap through the router
pub const V2_SWAP_GAS: u64 = 100_000;

/// Uniswap V3 swap base cost
pub const V3_BASE_GAS: u64 = 130_000;

/// Added per swap step (tick range traversed)
pub const V3_STEP_GAS: u64 = 2_000;

/// Vault swap through a Balancer pool
pub const BALANCER_SWAP_GAS: u64 = 120_000;

/// View answers the query; Unsafe also reports what the search cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimulationMode {
    #[default]
    View,
    Unsafe,
}

/// A priced route
///
/// `amount_out == 0` iff the venue has no viable route for the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub route: Route,
    pub amount_in: U256,
    pub amount_out: U256,
    pub gas_estimate: u64,
    /// V3 fee tiers traversed, in leg order
    pub fee_tiers: Vec<u32>,
}

impl Quote {
    pub fn none(amount_in: U256) -> Self {
        Self {
            route: Route::None,
            amount_in,
            amount_out: U256::ZERO,
            gas_estimate: 0,
            fee_tiers: vec![],
        }
    }

    pub fn is_viable(&self) -> bool {
        !self.amount_out.is_zero()
    }
}
