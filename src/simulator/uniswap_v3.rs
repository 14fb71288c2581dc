//! Uniswap V3 concentrated-liquidity pools
//!
//! The pool carries its initialized ticks as a sorted list instead of a bitmap,
//! plus the oracle observation history used by the TWAP guard.
//!
//! - `simulate_swap`: exact-input swap crossing ticks until the input is spent
//! - `check_in_range_liquidity`: whether a swap stays inside the current range
//! - `apply_swap`: commit a simulated swap, writing an observation on a new block

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::math::swap_math::compute_swap_step;
use super::math::tick_math::{
    get_sqrt_ratio_at_tick, get_tick_at_sqrt_ratio, MAX_SQRT_RATIO, MAX_TICK, MIN_SQRT_RATIO, MIN_TICK,
};
use super::math::{add_liquidity_delta, checked_add, checked_sub, Q128};
use super::{V3_BASE_GAS, V3_STEP_GAS};
use crate::error::{PricingError, PricingResult};

/// An initialized tick and the liquidity change when crossing it left to right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickInfo {
    pub index: i32,
    pub liquidity_net: i128,
}

/// One oracle checkpoint (Uniswap `Oracle.Observation`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub block_timestamp: u64,
    pub tick_cumulative: i64,
    pub seconds_per_liquidity_cumulative_x128: U256,
}

impl Observation {
    /// Extend this observation to `timestamp` assuming `tick` and `liquidity` held throughout
    pub fn transform(&self, timestamp: u64, tick: i32, liquidity: u128) -> Observation {
        let delta = timestamp.saturating_sub(self.block_timestamp);
        let divisor = U256::from(liquidity.max(1));
        Observation {
            block_timestamp: timestamp,
            tick_cumulative: self.tick_cumulative + i64::from(tick) * delta as i64,
            seconds_per_liquidity_cumulative_x128: self.seconds_per_liquidity_cumulative_x128
                + (U256::from(delta) << 128) / divisor,
        }
    }
}

fn default_cardinality() -> u16 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniV3Pool {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    /// Hundredths of a bip (500 = 0.05%)
    pub fee: u32,
    pub tick_spacing: i32,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
    /// Initialized ticks, ascending by index
    pub ticks: Vec<TickInfo>,
    /// Oldest first
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default = "default_cardinality")]
    pub observation_cardinality: u16,
}

/// Outcome of an exact-input swap simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V3SwapResult {
    /// Zero when the input could not be fully consumed
    pub amount_out: U256,
    pub sqrt_price_after: U256,
    pub tick_after: i32,
    pub liquidity_after: u128,
    pub ticks_crossed: u32,
    pub steps: u32,
    pub gas_estimate: u64,
    pub zero_for_one: bool,
}

/// Result of the single-range probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InRangeQuote {
    /// The whole input fits before the next initialized tick
    pub in_range: bool,
    pub sqrt_price_after: U256,
    /// Output if in range, zero otherwise
    pub amount_out: U256,
}

impl UniV3Pool {
    pub fn contains(&self, token: &Address) -> bool {
        self.token0 == *token || self.token1 == *token
    }

    fn direction(&self, token_in: &Address) -> PricingResult<bool> {
        if *token_in == self.token0 {
            Ok(true)
        } else if *token_in == self.token1 {
            Ok(false)
        } else {
            Err(PricingError::InvalidInput(format!(
                "token {} not in pool {}",
                token_in, self.address
            )))
        }
    }

    /// Next initialized tick in the swap direction, if any
    ///
    /// zero_for_one looks for the greatest index <= tick, otherwise the smallest index > tick.
    pub fn next_initialized_tick(&self, tick: i32, zero_for_one: bool) -> Option<&TickInfo> {
        if zero_for_one {
            self.ticks.iter().rev().find(|t| t.index <= tick)
        } else {
            self.ticks.iter().find(|t| t.index > tick)
        }
    }

    /// Exact-input swap of `amount_in` of `token_in`, crossing ticks as needed
    pub fn simulate_swap(&self, token_in: &Address, amount_in: U256) -> PricingResult<V3SwapResult> {
        let zero_for_one = self.direction(token_in)?;

        let mut result = V3SwapResult {
            amount_out: U256::ZERO,
            sqrt_price_after: self.sqrt_price_x96,
            tick_after: self.tick,
            liquidity_after: self.liquidity,
            ticks_crossed: 0,
            steps: 0,
            gas_estimate: V3_BASE_GAS,
            zero_for_one,
        };
        if amount_in.is_zero() {
            return Ok(result);
        }

        let price_limit = if zero_for_one {
            MIN_SQRT_RATIO + U256::from(1u8)
        } else {
            MAX_SQRT_RATIO - U256::from(1u8)
        };

        let mut remaining = amount_in;
        let mut sqrt_price = self.sqrt_price_x96;
        let mut tick = self.tick;
        let mut liquidity = self.liquidity;

        while !remaining.is_zero() && sqrt_price != price_limit {
            let next = self.next_initialized_tick(tick, zero_for_one).copied();
            let tick_next = match next {
                Some(info) => info.index.clamp(MIN_TICK, MAX_TICK),
                None if zero_for_one => MIN_TICK,
                None => MAX_TICK,
            };
            let sqrt_price_next = get_sqrt_ratio_at_tick(tick_next)?;

            let target = if zero_for_one {
                sqrt_price_next.max(price_limit)
            } else {
                sqrt_price_next.min(price_limit)
            };

            let step = compute_swap_step(sqrt_price, target, liquidity, remaining, self.fee)?;
            let sqrt_price_start = sqrt_price;
            sqrt_price = step.sqrt_ratio_next;
            remaining = checked_sub(remaining, checked_add(step.amount_in, step.fee_amount)?)?;
            result.amount_out = checked_add(result.amount_out, step.amount_out)?;
            result.steps += 1;

            if sqrt_price == sqrt_price_next {
                // rolled onto the boundary: cross into the next range
                if let Some(info) = next {
                    let net = if zero_for_one { -info.liquidity_net } else { info.liquidity_net };
                    liquidity = add_liquidity_delta(liquidity, net)?;
                    result.ticks_crossed += 1;
                }
                tick = if zero_for_one { tick_next - 1 } else { tick_next };
            } else if sqrt_price != sqrt_price_start {
                tick = get_tick_at_sqrt_ratio(sqrt_price)?;
            }

            trace!(
                "v3 step {} pool {:?}: tick {} liquidity {} remaining {}",
                result.steps, self.address, tick, liquidity, remaining
            );
        }

        result.sqrt_price_after = sqrt_price;
        result.tick_after = tick;
        result.liquidity_after = liquidity;
        result.gas_estimate = V3_BASE_GAS + V3_STEP_GAS * u64::from(result.steps);

        if !remaining.is_zero() {
            // ran out of liquidity before the input was spent
            result.amount_out = U256::ZERO;
        }

        Ok(result)
    }

    /// Quote the swap assuming it stays inside the current tick range
    pub fn check_in_range_liquidity(&self, token_in: &Address, amount_in: U256) -> PricingResult<InRangeQuote> {
        let zero_for_one = self.direction(token_in)?;

        let boundary = match self.next_initialized_tick(self.tick, zero_for_one) {
            Some(info) => info.index.clamp(MIN_TICK, MAX_TICK),
            None if zero_for_one => MIN_TICK,
            None => MAX_TICK,
        };
        let target = get_sqrt_ratio_at_tick(boundary)?;

        if self.liquidity == 0 || amount_in.is_zero() {
            return Ok(InRangeQuote {
                in_range: false,
                sqrt_price_after: self.sqrt_price_x96,
                amount_out: U256::ZERO,
            });
        }

        let step = compute_swap_step(self.sqrt_price_x96, target, self.liquidity, amount_in, self.fee)?;
        let spent = checked_add(step.amount_in, step.fee_amount)?;
        let in_range = step.sqrt_ratio_next != target && spent == amount_in;

        Ok(InRangeQuote {
            in_range,
            sqrt_price_after: step.sqrt_ratio_next,
            amount_out: if in_range { step.amount_out } else { U256::ZERO },
        })
    }

    /// Commit a swap result at block `timestamp`
    ///
    /// An observation with the pre-swap tick and liquidity is written first if the
    /// timestamp moved past the newest observation.
    pub fn apply_swap(&mut self, result: &V3SwapResult, timestamp: u64) {
        self.write_observation(timestamp);
        self.sqrt_price_x96 = result.sqrt_price_after;
        self.tick = result.tick_after;
        self.liquidity = result.liquidity_after;
    }

    fn write_observation(&mut self, timestamp: u64) {
        let next = match self.observations.last() {
            Some(last) if last.block_timestamp >= timestamp => return,
            Some(last) => last.transform(timestamp, self.tick, self.liquidity),
            None => Observation {
                block_timestamp: timestamp,
                tick_cumulative: 0,
                seconds_per_liquidity_cumulative_x128: U256::ZERO,
            },
        };
        self.observations.push(next);

        let capacity = usize::from(self.observation_cardinality.max(1));
        if self.observations.len() > capacity {
            let excess = self.observations.len() - capacity;
            self.observations.drain(..excess);
        }
    }

    /// Price of token0 in token1 as a float, for display only
    pub fn price_f64(&self) -> f64 {
        let sqrt: f64 = self.sqrt_price_x96.to_string().parse().unwrap_or(0.0);
        let q96 = 2f64.powi(96);
        (sqrt / q96).powi(2)
    }
}

/// seconds * 2^128 / liquidity, the per-second increment of the liquidity accumulator
pub fn seconds_per_liquidity_x128(seconds: u64, liquidity: u128) -> U256 {
    (U256::from(seconds) * Q128) / U256::from(liquidity.max(1))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::simulator::math::Q96;
    use crate::tokens::{USDC, WETH};

    pub fn e18(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18u8))
    }

    /// Full-range pool at tick 0 (price 1) with the given liquidity
    pub fn full_range_pool(token0: Address, token1: Address, liquidity: u128, fee: u32) -> UniV3Pool {
        UniV3Pool {
            address: Address::repeat_byte(0x33),
            token0,
            token1,
            fee,
            tick_spacing: 60,
            sqrt_price_x96: Q96,
            tick: 0,
            liquidity,
            ticks: vec![
                TickInfo { index: -887220, liquidity_net: liquidity as i128 },
                TickInfo { index: 887220, liquidity_net: -(liquidity as i128) },
            ],
            observations: vec![],
            observation_cardinality: 1,
        }
    }

    #[test]
    fn test_small_swap_in_full_range_pool() {
        let pool = full_range_pool(USDC, WETH, 10u128.pow(24), 3000);
        let result = pool.simulate_swap(&USDC, e18(1)).unwrap();
        // price 1, deep liquidity: output is input less 0.3% and tiny impact
        assert!(result.amount_out < e18(1));
        assert!(result.amount_out > e18(1) * U256::from(996u16) / U256::from(1000u16));
        assert!(result.tick_after <= 0);
        assert_eq!(result.ticks_crossed, 0);
        assert_eq!(result.gas_estimate, V3_BASE_GAS + V3_STEP_GAS);
    }

    #[test]
    fn test_depleting_a_range_rolls_into_the_next_tick() {
        // narrow range [-60, 60] with 1e18, wide range underneath with 1e20
        let mut pool = full_range_pool(USDC, WETH, 10u128.pow(20), 500);
        pool.liquidity = 10u128.pow(20) + 10u128.pow(18);
        pool.ticks = vec![
            TickInfo { index: -887220, liquidity_net: 10i128.pow(20) },
            TickInfo { index: -60, liquidity_net: 10i128.pow(18) },
            TickInfo { index: 60, liquidity_net: -(10i128.pow(18)) },
            TickInfo { index: 887220, liquidity_net: -(10i128.pow(20)) },
        ];

        let result = pool.simulate_swap(&WETH, e18(10)).unwrap();
        assert!(result.amount_out > U256::ZERO);
        assert_eq!(result.ticks_crossed, 1);
        assert!(result.tick_after >= 60);
        assert_eq!(result.liquidity_after, 10u128.pow(20));
        assert!(result.steps >= 2);
        assert_eq!(result.gas_estimate, V3_BASE_GAS + V3_STEP_GAS * u64::from(result.steps));
    }

    #[test]
    fn test_unfillable_input_quotes_zero() {
        // single narrow range, nothing outside
        let mut pool = full_range_pool(USDC, WETH, 10u128.pow(12), 3000);
        pool.ticks = vec![
            TickInfo { index: -60, liquidity_net: 10i128.pow(12) },
            TickInfo { index: 60, liquidity_net: -(10i128.pow(12)) },
        ];
        let result = pool.simulate_swap(&USDC, e18(1000)).unwrap();
        assert_eq!(result.amount_out, U256::ZERO);
    }

    #[test]
    fn test_in_range_probe() {
        let mut pool = full_range_pool(USDC, WETH, 10u128.pow(18), 3000);
        pool.ticks = vec![
            TickInfo { index: -60, liquidity_net: 10i128.pow(18) },
            TickInfo { index: 60, liquidity_net: -(10i128.pow(18)) },
        ];

        let small = pool.check_in_range_liquidity(&USDC, U256::from(10u64).pow(U256::from(15u8))).unwrap();
        assert!(small.in_range);
        let full = pool.simulate_swap(&USDC, U256::from(10u64).pow(U256::from(15u8))).unwrap();
        assert_eq!(small.amount_out, full.amount_out);

        let large = pool.check_in_range_liquidity(&USDC, e18(1)).unwrap();
        assert!(!large.in_range);
        assert_eq!(large.amount_out, U256::ZERO);
    }

    #[test]
    fn test_apply_swap_writes_observation_once_per_block() {
        let mut pool = full_range_pool(USDC, WETH, 10u128.pow(24), 3000);
        pool.observation_cardinality = 2;
        pool.observations = vec![Observation {
            block_timestamp: 1000,
            tick_cumulative: 0,
            seconds_per_liquidity_cumulative_x128: U256::ZERO,
        }];

        let result = pool.simulate_swap(&WETH, e18(1000)).unwrap();
        pool.apply_swap(&result, 1012);
        assert_eq!(pool.observations.len(), 2);
        // cumulative uses the pre-swap tick (0)
        assert_eq!(pool.observations[1].tick_cumulative, 0);
        assert_eq!(pool.tick, result.tick_after);

        // same block: no new observation
        let again = pool.simulate_swap(&WETH, e18(1)).unwrap();
        pool.apply_swap(&again, 1012);
        assert_eq!(pool.observations.len(), 2);

        // ring buffer keeps the newest `cardinality` entries
        let later = pool.simulate_swap(&WETH, e18(1)).unwrap();
        pool.apply_swap(&later, 1024);
        assert_eq!(pool.observations.len(), 2);
        assert_eq!(pool.observations[0].block_timestamp, 1012);
        assert_eq!(pool.observations[1].tick_cumulative, i64::from(again.tick_after) * 12);
    }

    #[test]
    fn test_transform_accumulates() {
        let obs = Observation {
            block_timestamp: 100,
            tick_cumulative: 500,
            seconds_per_liquidity_cumulative_x128: U256::ZERO,
        };
        let next = obs.transform(110, -20, 1 << 64);
        assert_eq!(next.tick_cumulative, 300);
        assert_eq!(next.seconds_per_liquidity_cumulative_x128, seconds_per_liquidity_x128(10, 1 << 64));
    }
}
