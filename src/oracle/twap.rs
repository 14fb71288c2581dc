//! TWAP Manipulation Guard
//!
//! Compares a Uniswap V3 pool's current state against its own oracle:
//! - arithmetic-mean tick over the lookback window vs the current tick
//! - harmonic-mean liquidity over the window vs the current liquidity
//!
//! A pool that moved too far from its time-weighted history in a short time is
//! treated as manipulated and its quotes are not used. Missing history is also
//! untrusted: the guard never errors.

use alloy_primitives::U256;
use tracing::{debug, warn};

use crate::config::{PricerConfig, MAX_BPS};
use crate::simulator::{Observation, UniV3Pool};

/// Outcome of one guard evaluation, kept for logging and the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwapVerdict {
    pub trusted: bool,
    pub current_tick: i32,
    pub twap_tick: Option<i32>,
    pub tick_deviation: Option<u32>,
    pub mean_liquidity: Option<u128>,
    pub liquidity_step_bps: Option<u64>,
    pub reason: &'static str,
}

impl TwapVerdict {
    fn untrusted(current_tick: i32, reason: &'static str) -> Self {
        Self {
            trusted: false,
            current_tick,
            twap_tick: None,
            tick_deviation: None,
            mean_liquidity: None,
            liquidity_step_bps: None,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwapGuard {
    pub period_secs: u32,
    pub max_tick_deviation: i32,
    pub max_liquidity_step_bps: u32,
}

impl Default for TwapGuard {
    fn default() -> Self {
        Self {
            period_secs: 1800,
            max_tick_deviation: 200,
            max_liquidity_step_bps: 5000,
        }
    }
}

impl From<&PricerConfig> for TwapGuard {
    fn from(config: &PricerConfig) -> Self {
        Self {
            period_secs: config.twap_period_secs,
            max_tick_deviation: config.max_tick_deviation,
            max_liquidity_step_bps: config.max_liquidity_step_bps,
        }
    }
}

/// Cumulative values `seconds_ago` before `now` (Uniswap `observeSingle`)
///
/// Interpolates between the surrounding observations, or extrapolates from the
/// newest one with the pool's current tick and liquidity. `None` when the target
/// time is older than the oldest observation.
pub fn observe_single(pool: &UniV3Pool, now: u64, seconds_ago: u64) -> Option<Observation> {
    let observations = &pool.observations;
    let last = *observations.last()?;
    let target = now.checked_sub(seconds_ago)?;

    if target >= last.block_timestamp {
        if target == last.block_timestamp {
            return Some(last);
        }
        return Some(last.transform(target, pool.tick, pool.liquidity));
    }

    let oldest = observations[0];
    if target < oldest.block_timestamp {
        return None;
    }

    // first observation strictly after target; oldest <= target < last guarantees 1..len
    let index = observations.partition_point(|o| o.block_timestamp <= target);
    let before = observations[index - 1];
    let after = observations[index];
    if before.block_timestamp == target {
        return Some(before);
    }

    let observation_delta = after.block_timestamp - before.block_timestamp;
    let target_delta = target - before.block_timestamp;

    let tick_cumulative = before.tick_cumulative
        + ((after.tick_cumulative - before.tick_cumulative) / observation_delta as i64) * target_delta as i64;
    let seconds_per_liquidity = before.seconds_per_liquidity_cumulative_x128
        + (after.seconds_per_liquidity_cumulative_x128 - before.seconds_per_liquidity_cumulative_x128)
            * U256::from(target_delta)
            / U256::from(observation_delta);

    Some(Observation {
        block_timestamp: target,
        tick_cumulative,
        seconds_per_liquidity_cumulative_x128: seconds_per_liquidity,
    })
}

/// Arithmetic-mean tick and harmonic-mean liquidity over the last `period` seconds
pub fn consult(pool: &UniV3Pool, now: u64, period: u32) -> Option<(i32, u128)> {
    if period == 0 {
        return None;
    }
    let past = observe_single(pool, now, u64::from(period))?;
    let current = observe_single(pool, now, 0)?;

    let tick_delta = current.tick_cumulative - past.tick_cumulative;
    let period_i = i64::from(period);
    let mut mean_tick = tick_delta / period_i;
    // round towards negative infinity
    if tick_delta < 0 && tick_delta % period_i != 0 {
        mean_tick -= 1;
    }

    let seconds_per_liquidity_delta = current
        .seconds_per_liquidity_cumulative_x128
        .checked_sub(past.seconds_per_liquidity_cumulative_x128)?;
    if seconds_per_liquidity_delta.is_zero() {
        return None;
    }
    let mean_liquidity = (U256::from(period) << 128) / seconds_per_liquidity_delta;
    let mean_liquidity = u128::try_from(mean_liquidity).unwrap_or(u128::MAX);

    Some((i32::try_from(mean_tick).ok()?, mean_liquidity))
}

impl TwapGuard {
    /// Evaluate a pool at `now` against the liquidity the caller observed
    pub fn evaluate(&self, pool: &UniV3Pool, current_liquidity: u128, now: u64) -> TwapVerdict {
        let (twap_tick, mean_liquidity) = match consult(pool, now, self.period_secs) {
            Some(values) => values,
            None => {
                debug!(
                    "pool {:?}: not enough oracle history for a {}s window",
                    pool.address, self.period_secs
                );
                return TwapVerdict::untrusted(pool.tick, "insufficient history");
            }
        };

        let tick_deviation = pool.tick.abs_diff(twap_tick);

        let liquidity_step_bps = if mean_liquidity == 0 {
            None
        } else {
            let step = U256::from(current_liquidity.abs_diff(mean_liquidity)) * U256::from(MAX_BPS)
                / U256::from(mean_liquidity);
            Some(u64::try_from(step).unwrap_or(u64::MAX))
        };

        let mut verdict = TwapVerdict {
            trusted: false,
            current_tick: pool.tick,
            twap_tick: Some(twap_tick),
            tick_deviation: Some(tick_deviation),
            mean_liquidity: Some(mean_liquidity),
            liquidity_step_bps,
            reason: "ok",
        };

        if i64::from(tick_deviation) > i64::from(self.max_tick_deviation) {
            verdict.reason = "tick deviation";
        } else {
            match liquidity_step_bps {
                None => verdict.reason = "no mean liquidity",
                Some(step) if step > u64::from(self.max_liquidity_step_bps) => {
                    verdict.reason = "liquidity step"
                }
                Some(_) => verdict.trusted = true,
            }
        }

        if !verdict.trusted {
            warn!(
                "⚠️ pool {:?} failed TWAP check ({}): tick {} vs twap {}, liquidity step {:?} bps",
                pool.address, verdict.reason, pool.tick, twap_tick, verdict.liquidity_step_bps
            );
        }
        verdict
    }

    /// `true` iff the pool is known and trusted
    pub fn check_univ3_pool_oracle(&self, pool: Option<&UniV3Pool>, current_liquidity: u128, now: u64) -> bool {
        match pool {
            Some(pool) => self.evaluate(pool, current_liquidity, now).trusted,
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::simulator::uniswap_v3::seconds_per_liquidity_x128;
    use crate::simulator::uniswap_v3::tests::{e18, full_range_pool};
    use crate::tokens::{LOOKS, WETH};

    pub const NOW: u64 = 1_700_000_000;

    /// Pool that sat at tick 0 with constant liquidity for the last hour
    pub fn steady_pool(liquidity: u128) -> UniV3Pool {
        let mut pool = full_range_pool(LOOKS, WETH, liquidity, 3000);
        pool.observation_cardinality = 10;
        pool.observations = vec![
            Observation {
                block_timestamp: NOW - 3600,
                tick_cumulative: 0,
                seconds_per_liquidity_cumulative_x128: U256::ZERO,
            },
            Observation {
                block_timestamp: NOW - 12,
                tick_cumulative: 0,
                seconds_per_liquidity_cumulative_x128: seconds_per_liquidity_x128(3588, liquidity),
            },
        ];
        pool
    }

    #[test]
    fn test_steady_pool_is_trusted() {
        let liquidity = 10u128.pow(22);
        let pool = steady_pool(liquidity);
        let verdict = TwapGuard::default().evaluate(&pool, liquidity, NOW);
        assert!(verdict.trusted, "{:?}", verdict);
        assert_eq!(verdict.twap_tick, Some(0));
        let mean = verdict.mean_liquidity.unwrap();
        assert!(mean.abs_diff(liquidity) <= liquidity / 1_000_000);
    }

    #[test]
    fn test_big_swap_fails_the_guard() {
        let liquidity = 10u128.pow(22);
        let mut pool = steady_pool(liquidity);
        let guard = TwapGuard::default();
        assert!(guard.check_univ3_pool_oracle(Some(&pool), liquidity, NOW));

        // pump: push a lot of WETH in within the current block
        let result = pool.simulate_swap(&WETH, e18(10_000)).unwrap();
        pool.apply_swap(&result, NOW);
        assert!(pool.tick > 200);

        assert!(!guard.check_univ3_pool_oracle(Some(&pool), pool.liquidity, NOW));
        let verdict = guard.evaluate(&pool, pool.liquidity, NOW);
        assert_eq!(verdict.reason, "tick deviation");
    }

    #[test]
    fn test_liquidity_yank_fails_the_guard() {
        let liquidity = 10u128.pow(22);
        let pool = steady_pool(liquidity);
        // 90% of liquidity pulled right now
        assert!(!TwapGuard::default().check_univ3_pool_oracle(Some(&pool), liquidity / 10, NOW));
    }

    #[test]
    fn test_short_history_is_untrusted() {
        let liquidity = 10u128.pow(22);
        let mut pool = steady_pool(liquidity);
        pool.observations[0].block_timestamp = NOW - 600;
        let verdict = TwapGuard::default().evaluate(&pool, liquidity, NOW);
        assert!(!verdict.trusted);
        assert_eq!(verdict.reason, "insufficient history");

        pool.observations.clear();
        assert!(!TwapGuard::default().check_univ3_pool_oracle(Some(&pool), liquidity, NOW));
        assert!(!TwapGuard::default().check_univ3_pool_oracle(None, liquidity, NOW));
    }

    #[test]
    fn test_observe_interpolates() {
        let mut pool = steady_pool(10u128.pow(18));
        pool.tick = 100;
        pool.observations = vec![
            Observation { block_timestamp: 100, tick_cumulative: 0, seconds_per_liquidity_cumulative_x128: U256::ZERO },
            Observation { block_timestamp: 200, tick_cumulative: 10_000, seconds_per_liquidity_cumulative_x128: U256::from(1000u64) },
        ];
        let mid = observe_single(&pool, 250, 100).unwrap();
        assert_eq!(mid.block_timestamp, 150);
        assert_eq!(mid.tick_cumulative, 5_000);
        assert_eq!(mid.seconds_per_liquidity_cumulative_x128, U256::from(500u64));

        // extrapolated with the current tick
        let now = observe_single(&pool, 250, 0).unwrap();
        assert_eq!(now.tick_cumulative, 15_000);

        assert!(observe_single(&pool, 250, 151).is_none());
    }

    #[test]
    fn test_mean_tick_rounds_down() {
        let liquidity = 10u128.pow(18);
        let mut pool = steady_pool(liquidity);
        pool.tick = -3;
        pool.observations = vec![Observation {
            block_timestamp: 0,
            tick_cumulative: 0,
            seconds_per_liquidity_cumulative_x128: U256::ZERO,
        }];
        // constant tick: exact mean
        let (tick, _) = consult(&pool, 7, 2).unwrap();
        assert_eq!(tick, -3);

        // -1 for one second, then -2: cumulative -5 over 3s is -1.67, floored to -2
        pool.tick = -2;
        pool.observations.push(Observation {
            block_timestamp: 1,
            tick_cumulative: -1,
            seconds_per_liquidity_cumulative_x128: seconds_per_liquidity_x128(1, liquidity),
        });
        let (tick, mean_liquidity) = consult(&pool, 3, 3).unwrap();
        assert_eq!(tick, -2);
        assert!(mean_liquidity.abs_diff(liquidity) <= 1);
    }
}
