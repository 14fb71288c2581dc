//! The Executor
//!
//! Applies a selected route to the market snapshot:
//! - re-simulates every leg against the current state right before committing
//! - enforces the caller's minimum output (slippage floor)
//! - commits all legs together or none of them
//! - returns router calldata for the route (never signed or sent)

mod calldata;

pub use calldata::{encode_route, EncodedSwap, BALANCER_VAULT, SUSHISWAP_ROUTER, UNISWAP_V2_ROUTER, UNISWAP_V3_ROUTER};

use alloy_primitives::{Address, B256, U256};
use tracing::{debug, info, warn};

use crate::config::PricerConfig;
use crate::error::{PricingError, PricingResult};
use crate::router::{OnChainPricer, Route, VenueKind};
use crate::simulator::{BalancerSettlement, BalancerSwapResult, V2SwapResult, V3SwapResult};
use crate::snapshot::MarketSnapshot;

/// What the caller wants swapped, and the worst outcome they accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub sell: Address,
    pub buy: Address,
    pub amount_in: U256,
    pub min_amount_out: U256,
    pub recipient: Address,
    /// Unix seconds; compared against the snapshot timestamp
    pub deadline: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReceipt {
    pub block_number: u64,
    pub venue: VenueKind,
    pub route: Route,
    pub amount_in: U256,
    pub amount_out: U256,
    pub gas_estimate: u64,
    pub calldata: EncodedSwap,
}

/// One simulated hop, waiting to be committed
#[derive(Debug, Clone, Copy)]
enum PendingLeg {
    ConstantProduct { pair: Address, result: V2SwapResult },
    UniswapV3 { pool: Address, result: V3SwapResult },
    Balancer { pool_id: B256, result: BalancerSwapResult, settlement: BalancerSettlement },
}

impl PendingLeg {
    fn amount_out(&self) -> U256 {
        match self {
            PendingLeg::ConstantProduct { result, .. } => result.amount_out,
            PendingLeg::UniswapV3 { result, .. } => result.amount_out,
            PendingLeg::Balancer { result, .. } => result.amount_out,
        }
    }

    fn gas_estimate(&self) -> u64 {
        match self {
            PendingLeg::ConstantProduct { result, .. } => result.gas_estimate,
            PendingLeg::UniswapV3 { result, .. } => result.gas_estimate,
            PendingLeg::Balancer { result, .. } => result.gas_estimate,
        }
    }
}

pub struct SwapExecutor {
    config: PricerConfig,
}

impl SwapExecutor {
    pub fn new(config: PricerConfig) -> Self {
        Self { config }
    }

    /// Find the best route for the request, then execute it
    pub fn execute(&self, snapshot: &mut MarketSnapshot, request: &SwapRequest) -> PricingResult<ExecutionReceipt> {
        let route = {
            let pricer = OnChainPricer::new(snapshot, &self.config);
            let quote = pricer.find_optimal_swap(&request.sell, &request.buy, request.amount_in)?;
            if !quote.is_viable() {
                return Err(PricingError::NoRoute {
                    sell: request.sell,
                    buy: request.buy,
                });
            }
            quote.quote.route
        };
        self.execute_route(snapshot, &route, request)
    }

    /// Re-simulate `route` against the snapshot and commit it if the floor holds
    pub fn execute_route(
        &self,
        snapshot: &mut MarketSnapshot,
        route: &Route,
        request: &SwapRequest,
    ) -> PricingResult<ExecutionReceipt> {
        if request.deadline < snapshot.timestamp {
            return Err(PricingError::InvalidInput(format!(
                "deadline {} already passed at {}",
                request.deadline, snapshot.timestamp
            )));
        }

        let legs = plan(snapshot, route, request)?;
        let amount_out = legs.last().map(PendingLeg::amount_out).unwrap_or(U256::ZERO);
        if amount_out.is_zero() {
            return Err(PricingError::NoRoute {
                sell: request.sell,
                buy: request.buy,
            });
        }
        if amount_out < request.min_amount_out {
            warn!(
                "⚠️ {} would return {} < minimum {}, nothing executed",
                route, amount_out, request.min_amount_out
            );
            return Err(PricingError::SlippageExceeded {
                amount_out,
                min_amount_out: request.min_amount_out,
            });
        }

        let calldata = encode_route(route, request)?;
        let gas_estimate = legs.iter().map(PendingLeg::gas_estimate).sum();
        commit(snapshot, &legs)?;

        info!(
            "✅ Executed {} -> {} via {}: {} in, {} out",
            snapshot.symbol(&request.sell),
            snapshot.symbol(&request.buy),
            route.kind(),
            request.amount_in,
            amount_out
        );

        Ok(ExecutionReceipt {
            block_number: snapshot.block_number,
            venue: route.kind(),
            route: route.clone(),
            amount_in: request.amount_in,
            amount_out,
            gas_estimate,
            calldata,
        })
    }

    pub fn config(&self) -> &PricerConfig {
        &self.config
    }
}

fn unknown(what: impl std::fmt::Debug) -> PricingError {
    PricingError::UnknownPool(format!("{:?}", what))
}

fn v2_leg(snapshot: &MarketSnapshot, pair: &Address, sell: &Address, buy: &Address, amount_in: U256) -> PricingResult<PendingLeg> {
    let state = snapshot.pair_by_address(pair).ok_or_else(|| unknown(pair))?;
    if !state.contains(buy) {
        return Err(PricingError::InvalidInput(format!("{} not in pair {:?}", buy, pair)));
    }
    let result = state.simulate_swap(sell, amount_in)?;
    Ok(PendingLeg::ConstantProduct { pair: *pair, result })
}

fn v3_leg(snapshot: &MarketSnapshot, pool: &Address, sell: &Address, buy: &Address, amount_in: U256) -> PricingResult<PendingLeg> {
    let state = snapshot.v3_pool_by_address(pool).ok_or_else(|| unknown(pool))?;
    if !state.contains(buy) {
        return Err(PricingError::InvalidInput(format!("{} not in pool {:?}", buy, pool)));
    }
    let result = state.simulate_swap(sell, amount_in)?;
    Ok(PendingLeg::UniswapV3 { pool: *pool, result })
}

fn balancer_leg(
    snapshot: &MarketSnapshot,
    pool_id: &B256,
    sell: &Address,
    buy: &Address,
    amount_in: U256,
) -> PricingResult<PendingLeg> {
    let state = snapshot.balancer_pool(pool_id).ok_or_else(|| unknown(pool_id))?;
    let result = state.simulate_swap(sell, buy, amount_in)?;
    let settlement = state.settle(&result, amount_in)?;
    Ok(PendingLeg::Balancer { pool_id: *pool_id, result, settlement })
}

/// Simulate and settle every leg against the current state; nothing is written
fn plan(snapshot: &MarketSnapshot, route: &Route, request: &SwapRequest) -> PricingResult<Vec<PendingLeg>> {
    let (sell, buy, amount_in) = (&request.sell, &request.buy, request.amount_in);

    let legs = match route {
        Route::None => {
            return Err(PricingError::NoRoute { sell: *sell, buy: *buy });
        }
        Route::UniswapV2 { pair } | Route::SushiSwap { pair } => vec![v2_leg(snapshot, pair, sell, buy, amount_in)?],
        Route::UniswapV3 { pool, .. } => vec![v3_leg(snapshot, pool, sell, buy, amount_in)?],
        Route::UniswapV3WithConnector { connector, legs } => {
            let first = v3_leg(snapshot, &legs[0].pool, sell, connector, amount_in)?;
            let second = v3_leg(snapshot, &legs[1].pool, connector, buy, first.amount_out())?;
            vec![first, second]
        }
        Route::Balancer { pool_id } => vec![balancer_leg(snapshot, pool_id, sell, buy, amount_in)?],
        Route::BalancerWithConnector { connector, pool_ids } => {
            if pool_ids[0] == pool_ids[1] {
                return Err(PricingError::InvalidInput("connector route through a single pool".to_string()));
            }
            let first = balancer_leg(snapshot, &pool_ids[0], sell, connector, amount_in)?;
            let second = balancer_leg(snapshot, &pool_ids[1], connector, buy, first.amount_out())?;
            vec![first, second]
        }
    };

    debug!("planned {} legs for {}", legs.len(), route);
    Ok(legs)
}

/// Write every planned leg; lookups are checked before the first write and no write can fail
fn commit(snapshot: &mut MarketSnapshot, legs: &[PendingLeg]) -> PricingResult<()> {
    for leg in legs {
        let present = match leg {
            PendingLeg::ConstantProduct { pair, .. } => snapshot.pair_by_address(pair).is_some(),
            PendingLeg::UniswapV3 { pool, .. } => snapshot.v3_pool_by_address(pool).is_some(),
            PendingLeg::Balancer { pool_id, .. } => snapshot.balancer_pool(pool_id).is_some(),
        };
        if !present {
            return Err(PricingError::UnknownPool("pool vanished before commit".to_string()));
        }
    }

    let timestamp = snapshot.timestamp;
    for leg in legs {
        match leg {
            PendingLeg::ConstantProduct { pair, result } => {
                if let Some(state) = snapshot.pair_by_address_mut(pair) {
                    state.apply_swap(result);
                }
            }
            PendingLeg::UniswapV3 { pool, result } => {
                if let Some(state) = snapshot.v3_pool_by_address_mut(pool) {
                    state.apply_swap(result, timestamp);
                }
            }
            PendingLeg::Balancer { pool_id, settlement, .. } => {
                if let Some(state) = snapshot.balancer_pool_mut(pool_id) {
                    state.apply_swap(settlement);
                }
            }
        }
    }
    Ok(())
}
