//! Constant-product pairs (Uniswap V2 and SushiSwap)
//!
//! amountOut = (amountIn * 997 * reserveOut) / (reserveIn * 1000 + amountIn * 997)

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use super::math::{checked_add, checked_mul, checked_sub};
use super::V2_SWAP_GAS;
use crate::error::{PricingError, PricingResult};

/// Which factory deployed the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum V2Dex {
    UniswapV2,
    SushiSwap,
}

impl std::fmt::Display for V2Dex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            V2Dex::UniswapV2 => write!(f, "UniswapV2"),
            V2Dex::SushiSwap => write!(f, "SushiSwap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantProductPair {
    pub address: Address,
    pub dex: V2Dex,
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
}

/// Output and post-swap reserves of a V2 swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2SwapResult {
    pub amount_out: U256,
    pub reserve0_after: U256,
    pub reserve1_after: U256,
    pub gas_estimate: u64,
}

impl ConstantProductPair {
    pub fn contains(&self, token: &Address) -> bool {
        self.token0 == *token || self.token1 == *token
    }

    fn reserves_for(&self, token_in: &Address) -> PricingResult<(U256, U256, bool)> {
        if *token_in == self.token0 {
            Ok((self.reserve0, self.reserve1, true))
        } else if *token_in == self.token1 {
            Ok((self.reserve1, self.reserve0, false))
        } else {
            Err(PricingError::InvalidInput(format!(
                "token {} not in pair {}",
                token_in, self.address
            )))
        }
    }

    /// Output for `amount_in` of `token_in`; zero reserves or zero input give zero
    pub fn get_amount_out(&self, token_in: &Address, amount_in: U256) -> PricingResult<U256> {
        let (reserve_in, reserve_out, _) = self.reserves_for(token_in)?;
        get_amount_out(amount_in, reserve_in, reserve_out)
    }

    /// Simulate the swap and report the reserves it would leave behind
    pub fn simulate_swap(&self, token_in: &Address, amount_in: U256) -> PricingResult<V2SwapResult> {
        let (reserve_in, reserve_out, zero_for_one) = self.reserves_for(token_in)?;
        let amount_out = get_amount_out(amount_in, reserve_in, reserve_out)?;

        let new_in = checked_add(reserve_in, amount_in)?;
        let new_out = checked_sub(reserve_out, amount_out)?;
        let (reserve0_after, reserve1_after) = if zero_for_one {
            (new_in, new_out)
        } else {
            (new_out, new_in)
        };

        Ok(V2SwapResult {
            amount_out,
            reserve0_after,
            reserve1_after,
            gas_estimate: V2_SWAP_GAS,
        })
    }

    /// Commit a simulated swap
    pub fn apply_swap(&mut self, result: &V2SwapResult) {
        self.reserve0 = result.reserve0_after;
        self.reserve1 = result.reserve1_after;
    }
}

/// Constant product with the 0.3% fee
pub fn get_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> PricingResult<U256> {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return Ok(U256::ZERO);
    }

    let amount_in_with_fee = checked_mul(amount_in, U256::from(997u16))?;
    let numerator = checked_mul(amount_in_with_fee, reserve_out)?;
    let denominator = checked_add(checked_mul(reserve_in, U256::from(1000u16))?, amount_in_with_fee)?;

    Ok(numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{USDC, WETH};

    fn pair() -> ConstantProductPair {
        ConstantProductPair {
            address: Address::repeat_byte(0x11),
            dex: V2Dex::UniswapV2,
            token0: USDC,
            token1: WETH,
            // 20M USDC / 10k WETH
            reserve0: U256::from(20_000_000_000_000u64),
            reserve1: U256::from(10_000u64) * U256::from(10u64).pow(U256::from(18u8)),
        }
    }

    #[test]
    fn test_constant_product_formula() {
        let out = get_amount_out(U256::from(1000u64), U256::from(10_000u64), U256::from(10_000u64)).unwrap();
        // 1000*997*10000 / (10000*1000 + 997000) = 906
        assert_eq!(out, U256::from(906u64));
    }

    #[test]
    fn test_zero_reserves_or_input_give_zero() {
        assert_eq!(get_amount_out(U256::ZERO, U256::from(1u8), U256::from(1u8)).unwrap(), U256::ZERO);
        assert_eq!(get_amount_out(U256::from(5u8), U256::ZERO, U256::from(1u8)).unwrap(), U256::ZERO);
        assert_eq!(get_amount_out(U256::from(5u8), U256::from(1u8), U256::ZERO).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_direction_and_apply() {
        let mut pair = pair();
        let one_eth = U256::from(10u64).pow(U256::from(18u8));
        let result = pair.simulate_swap(&WETH, one_eth).unwrap();
        // ~2000 USDC less fee and impact
        assert!(result.amount_out > U256::from(1_990_000_000u64));
        assert!(result.amount_out < U256::from(2_000_000_000u64));

        pair.apply_swap(&result);
        assert_eq!(pair.reserve1, U256::from(10_001u64) * one_eth);
        assert_eq!(pair.reserve0, U256::from(20_000_000_000_000u64) - result.amount_out);
    }

    #[test]
    fn test_foreign_token_rejected() {
        assert!(pair().get_amount_out(&Address::repeat_byte(0x99), U256::from(1u8)).is_err());
    }
}
