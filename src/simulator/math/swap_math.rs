//! Single swap step inside one initialized tick range (Uniswap V3 SwapMath, exact input)

use alloy_primitives::U256;

use super::sqrt_price_math::{get_amount0_delta, get_amount1_delta, get_next_sqrt_price_from_input};
use super::{checked_sub, mul_div, mul_div_rounding_up};
use crate::error::PricingResult;

/// Fee denominator: fees are in hundredths of a bip
pub const FEE_DENOMINATOR: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStep {
    /// Price after the step, never past the target
    pub sqrt_ratio_next: U256,
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_amount: U256,
}

/// Computes how much of `amount_remaining` can be swapped before reaching `sqrt_ratio_target`
///
/// The direction is inferred from the prices: `current >= target` means token0 in.
/// `amount_in + fee_amount` never exceeds `amount_remaining`.
pub fn compute_swap_step(
    sqrt_ratio_current: U256,
    sqrt_ratio_target: U256,
    liquidity: u128,
    amount_remaining: U256,
    fee_pips: u32,
) -> PricingResult<SwapStep> {
    let zero_for_one = sqrt_ratio_current >= sqrt_ratio_target;

    let amount_remaining_less_fee = mul_div(
        amount_remaining,
        U256::from(FEE_DENOMINATOR - fee_pips),
        U256::from(FEE_DENOMINATOR),
    )?;

    let max_amount_in = if zero_for_one {
        get_amount0_delta(sqrt_ratio_target, sqrt_ratio_current, liquidity, true)?
    } else {
        get_amount1_delta(sqrt_ratio_current, sqrt_ratio_target, liquidity, true)?
    };

    let sqrt_ratio_next = if amount_remaining_less_fee >= max_amount_in {
        sqrt_ratio_target
    } else {
        get_next_sqrt_price_from_input(
            sqrt_ratio_current,
            liquidity,
            amount_remaining_less_fee,
            zero_for_one,
        )?
    };

    let reached_target = sqrt_ratio_next == sqrt_ratio_target;

    let (amount_in, amount_out) = if zero_for_one {
        let amount_in = if reached_target {
            max_amount_in
        } else {
            get_amount0_delta(sqrt_ratio_next, sqrt_ratio_current, liquidity, true)?
        };
        let amount_out = get_amount1_delta(sqrt_ratio_next, sqrt_ratio_current, liquidity, false)?;
        (amount_in, amount_out)
    } else {
        let amount_in = if reached_target {
            max_amount_in
        } else {
            get_amount1_delta(sqrt_ratio_current, sqrt_ratio_next, liquidity, true)?
        };
        let amount_out = get_amount0_delta(sqrt_ratio_current, sqrt_ratio_next, liquidity, false)?;
        (amount_in, amount_out)
    };

    let fee_amount = if !reached_target {
        // the remainder of the input is taken as fee
        checked_sub(amount_remaining, amount_in)?
    } else {
        mul_div_rounding_up(
            amount_in,
            U256::from(fee_pips),
            U256::from(FEE_DENOMINATOR - fee_pips),
        )?
    };

    Ok(SwapStep {
        sqrt_ratio_next,
        amount_in,
        amount_out,
        fee_amount,
    })
}
