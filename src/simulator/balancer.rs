//! Balancer V2 pools (weighted and stable)
//!
//! Balances are kept in token-native decimals and scaled to 18 decimals for the
//! math. The swap fee is taken from the input before the invariant is applied.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use super::math::balancer_math::{bmul, mul_up, stable_out_given_in, weighted_out_given_in, MAX_IN_RATIO};
use super::math::{checked_add, checked_mul, checked_sub, pow10};
use super::BALANCER_SWAP_GAS;
use crate::error::{PricingError, PricingResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BalancerPoolKind {
    /// Normalized weights, 18 decimals, summing to 1e18
    Weighted { weights: Vec<U256> },
    /// Amplification as returned by `getAmplificationParameter` (includes the 1000 precision)
    Stable { amplification: U256 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancerPool {
    pub id: B256,
    pub address: Address,
    pub kind: BalancerPoolKind,
    pub tokens: Vec<Address>,
    pub balances: Vec<U256>,
    pub decimals: Vec<u8>,
    /// 18 decimals (3e15 = 0.3%)
    pub swap_fee: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerSwapResult {
    pub amount_out: U256,
    pub index_in: usize,
    pub index_out: usize,
    pub gas_estimate: u64,
}

/// Balances a committed swap leaves behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerSettlement {
    pub index_in: usize,
    pub index_out: usize,
    pub balance_in: U256,
    pub balance_out: U256,
}

impl BalancerPool {
    pub fn index_of(&self, token: &Address) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }

    pub fn contains(&self, token: &Address) -> bool {
        self.index_of(token).is_some()
    }

    pub fn is_weighted(&self) -> bool {
        matches!(self.kind, BalancerPoolKind::Weighted { .. })
    }

    fn scaling_factor(&self, index: usize) -> PricingResult<U256> {
        let decimals = *self
            .decimals
            .get(index)
            .ok_or_else(|| PricingError::UnknownPool(format!("{} missing decimals", self.id)))?;
        if decimals > 18 {
            return Err(PricingError::Math("token decimals above 18"));
        }
        Ok(pow10(18 - decimals))
    }

    fn upscaled_balances(&self) -> PricingResult<Vec<U256>> {
        self.balances
            .iter()
            .enumerate()
            .map(|(i, b)| checked_mul(*b, self.scaling_factor(i)?))
            .collect()
    }

    /// Output for selling `amount_in` of `token_in` for `token_out`
    ///
    /// Weighted swaps above 30% of the input balance quote zero.
    pub fn simulate_swap(
        &self,
        token_in: &Address,
        token_out: &Address,
        amount_in: U256,
    ) -> PricingResult<BalancerSwapResult> {
        let (index_in, index_out) = match (self.index_of(token_in), self.index_of(token_out)) {
            (Some(i), Some(o)) if i != o => (i, o),
            _ => {
                return Err(PricingError::InvalidInput(format!(
                    "pair {}/{} not in balancer pool {}",
                    token_in, token_out, self.id
                )))
            }
        };
        if self.balances.len() != self.tokens.len() {
            return Err(PricingError::UnknownPool(format!("{} balances do not match tokens", self.id)));
        }

        let mut result = BalancerSwapResult {
            amount_out: U256::ZERO,
            index_in,
            index_out,
            gas_estimate: BALANCER_SWAP_GAS,
        };
        if amount_in.is_zero() || self.balances[index_in].is_zero() || self.balances[index_out].is_zero() {
            return Ok(result);
        }

        let fee = mul_up(amount_in, self.swap_fee)?;
        let amount_in_after_fee = checked_sub(amount_in, fee)?;

        let scale_in = self.scaling_factor(index_in)?;
        let scale_out = self.scaling_factor(index_out)?;
        let scaled_in = checked_mul(amount_in_after_fee, scale_in)?;
        let balances = self.upscaled_balances()?;

        let scaled_out = match &self.kind {
            BalancerPoolKind::Weighted { weights } => {
                if weights.len() != self.tokens.len() {
                    return Err(PricingError::UnknownPool(format!("{} weights do not match tokens", self.id)));
                }
                if scaled_in > bmul(balances[index_in], MAX_IN_RATIO)? {
                    return Ok(result);
                }
                weighted_out_given_in(
                    balances[index_in],
                    weights[index_in],
                    balances[index_out],
                    weights[index_out],
                    scaled_in,
                )?
            }
            BalancerPoolKind::Stable { amplification } => {
                stable_out_given_in(*amplification, &balances, index_in, index_out, scaled_in)?
            }
        };

        result.amount_out = scaled_out / scale_out;
        Ok(result)
    }

    /// Post-swap balances for a simulated swap; the fee stays in the pool
    pub fn settle(&self, result: &BalancerSwapResult, amount_in: U256) -> PricingResult<BalancerSettlement> {
        let (Some(balance_in), Some(balance_out)) =
            (self.balances.get(result.index_in), self.balances.get(result.index_out))
        else {
            return Err(PricingError::UnknownPool(format!("{} has no such token index", self.id)));
        };
        Ok(BalancerSettlement {
            index_in: result.index_in,
            index_out: result.index_out,
            balance_in: checked_add(*balance_in, amount_in)?,
            balance_out: checked_sub(*balance_out, result.amount_out)?,
        })
    }

    /// Write balances computed by `settle`
    pub fn apply_swap(&mut self, settlement: &BalancerSettlement) {
        if let Some(balance) = self.balances.get_mut(settlement.index_in) {
            *balance = settlement.balance_in;
        }
        if let Some(balance) = self.balances.get_mut(settlement.index_out) {
            *balance = settlement.balance_out;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::simulator::math::balancer_math::BONE;
    use crate::tokens::{AURA, DAI, USDC, USDT, WETH};

    fn units(n: u64, decimals: u8) -> U256 {
        U256::from(n) * pow10(decimals)
    }

    /// 50/50 WETH/AURA with 2k WETH and 2M AURA
    pub fn weighted_weth_aura() -> BalancerPool {
        BalancerPool {
            id: B256::repeat_byte(0x51),
            address: Address::repeat_byte(0x51),
            kind: BalancerPoolKind::Weighted {
                weights: vec![BONE / U256::from(2u8), BONE / U256::from(2u8)],
            },
            tokens: vec![WETH, AURA],
            balances: vec![units(2_000, 18), units(2_000_000, 18)],
            decimals: vec![18, 18],
            swap_fee: U256::from(3_000_000_000_000_000u64),
        }
    }

    /// DAI/USDC/USDT stable pool, amp 200
    pub fn stable_three_pool() -> BalancerPool {
        BalancerPool {
            id: B256::repeat_byte(0x52),
            address: Address::repeat_byte(0x52),
            kind: BalancerPoolKind::Stable {
                amplification: U256::from(200_000u64),
            },
            tokens: vec![DAI, USDC, USDT],
            balances: vec![units(10_000_000, 18), units(10_000_000, 6), units(10_000_000, 6)],
            decimals: vec![18, 6, 6],
            swap_fee: U256::from(100_000_000_000_000u64),
        }
    }

    #[test]
    fn test_weighted_swap() {
        let pool = weighted_weth_aura();
        let result = pool.simulate_swap(&WETH, &AURA, units(1, 18)).unwrap();
        // ~1000 AURA less 0.3% fee and impact
        assert!(result.amount_out > units(995, 18));
        assert!(result.amount_out < units(997, 18));
    }

    #[test]
    fn test_weighted_max_in_ratio_quotes_zero() {
        let pool = weighted_weth_aura();
        let result = pool.simulate_swap(&WETH, &AURA, units(700, 18)).unwrap();
        assert_eq!(result.amount_out, U256::ZERO);
    }

    #[test]
    fn test_stable_swap_scales_decimals() {
        let pool = stable_three_pool();
        let result = pool.simulate_swap(&DAI, &USDC, units(10_000, 18)).unwrap();
        // 6-decimal output within 0.1% of par
        assert!(result.amount_out > units(9_990, 6));
        assert!(result.amount_out < units(10_000, 6));
    }

    #[test]
    fn test_unknown_pair_is_an_error() {
        let pool = stable_three_pool();
        assert!(pool.simulate_swap(&DAI, &WETH, units(1, 18)).is_err());
        assert!(pool.simulate_swap(&DAI, &DAI, units(1, 18)).is_err());
    }

    #[test]
    fn test_apply_swap_moves_balances() {
        let mut pool = weighted_weth_aura();
        let amount_in = units(10, 18);
        let result = pool.simulate_swap(&WETH, &AURA, amount_in).unwrap();
        let settlement = pool.settle(&result, amount_in).unwrap();
        pool.apply_swap(&settlement);
        assert_eq!(pool.balances[0], units(2_010, 18));
        assert_eq!(pool.balances[1], units(2_000_000, 18) - result.amount_out);
    }

    #[test]
    fn test_settle_rejects_impossible_balances() {
        let pool = weighted_weth_aura();
        let result = pool.simulate_swap(&WETH, &AURA, units(10, 18)).unwrap();

        let overdrawn = BalancerSwapResult { amount_out: units(3_000_000, 18), ..result };
        assert!(pool.settle(&overdrawn, units(10, 18)).is_err());
        assert!(pool.settle(&result, U256::MAX).is_err());

        let bad_index = BalancerSwapResult { index_out: 7, ..result };
        assert!(pool.settle(&bad_index, units(10, 18)).is_err());
    }
}
