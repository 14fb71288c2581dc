//! Token amount deltas and price movement for a liquidity range (Uniswap V3 SqrtPriceMath)

use alloy_primitives::U256;

use super::{checked_add, div_rounding_up, mul_div, mul_div_rounding_up, Q96, U160_MAX};
use crate::error::{PricingError, PricingResult};

/// Amount of token0 between two sqrt prices for a given liquidity
///
/// `liquidity * (sqrt_b - sqrt_a) / (sqrt_a * sqrt_b)`
pub fn get_amount0_delta(
    sqrt_ratio_a: U256,
    sqrt_ratio_b: U256,
    liquidity: u128,
    round_up: bool,
) -> PricingResult<U256> {
    let (lower, upper) = if sqrt_ratio_a > sqrt_ratio_b {
        (sqrt_ratio_b, sqrt_ratio_a)
    } else {
        (sqrt_ratio_a, sqrt_ratio_b)
    };
    if lower.is_zero() {
        return Err(PricingError::Math("sqrt price is zero"));
    }

    let numerator1: U256 = U256::from(liquidity) << 96;
    let numerator2 = upper - lower;

    if round_up {
        div_rounding_up(mul_div_rounding_up(numerator1, numerator2, upper)?, lower)
    } else {
        Ok(mul_div(numerator1, numerator2, upper)? / lower)
    }
}

/// Amount of token1 between two sqrt prices for a given liquidity
///
/// `liquidity * (sqrt_b - sqrt_a)`
pub fn get_amount1_delta(
    sqrt_ratio_a: U256,
    sqrt_ratio_b: U256,
    liquidity: u128,
    round_up: bool,
) -> PricingResult<U256> {
    let (lower, upper) = if sqrt_ratio_a > sqrt_ratio_b {
        (sqrt_ratio_b, sqrt_ratio_a)
    } else {
        (sqrt_ratio_a, sqrt_ratio_b)
    };

    if round_up {
        mul_div_rounding_up(U256::from(liquidity), upper - lower, Q96)
    } else {
        mul_div(U256::from(liquidity), upper - lower, Q96)
    }
}

/// Next sqrt price after adding `amount_in` of the input token
pub fn get_next_sqrt_price_from_input(
    sqrt_price: U256,
    liquidity: u128,
    amount_in: U256,
    zero_for_one: bool,
) -> PricingResult<U256> {
    if sqrt_price.is_zero() {
        return Err(PricingError::Math("sqrt price is zero"));
    }
    if liquidity == 0 {
        return Err(PricingError::Math("no liquidity"));
    }

    if zero_for_one {
        next_sqrt_price_from_amount0_adding(sqrt_price, liquidity, amount_in)
    } else {
        next_sqrt_price_from_amount1_adding(sqrt_price, liquidity, amount_in)
    }
}

/// Price moves down when token0 is added; always rounds up
fn next_sqrt_price_from_amount0_adding(
    sqrt_price: U256,
    liquidity: u128,
    amount: U256,
) -> PricingResult<U256> {
    if amount.is_zero() {
        return Ok(sqrt_price);
    }
    let numerator1: U256 = U256::from(liquidity) << 96;

    if let Some(product) = amount.checked_mul(sqrt_price) {
        if let Some(denominator) = numerator1.checked_add(product) {
            return mul_div_rounding_up(numerator1, sqrt_price, denominator);
        }
    }

    // numerator1 / (numerator1 / sqrt_price + amount)
    div_rounding_up(numerator1, checked_add(numerator1 / sqrt_price, amount)?)
}

/// Price moves up when token1 is added; always rounds down
fn next_sqrt_price_from_amount1_adding(
    sqrt_price: U256,
    liquidity: u128,
    amount: U256,
) -> PricingResult<U256> {
    let quotient = if amount <= U160_MAX {
        (amount << 96) / U256::from(liquidity)
    } else {
        mul_div(amount, Q96, U256::from(liquidity))?
    };

    let next = checked_add(sqrt_price, quotient)?;
    if next > U160_MAX {
        return Err(PricingError::Math("sqrt price exceeds uint160"));
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::math::tick_math::get_sqrt_ratio_at_tick;

    fn e18(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18u8))
    }

    #[test]
    fn test_amount_deltas_at_unit_price() {
        // price 1 -> 1.21 (sqrt 1 -> 1.1), liquidity 1e18
        let a = Q96;
        let b = Q96 * U256::from(11u8) / U256::from(10u8);
        let amount1 = get_amount1_delta(a, b, 10u128.pow(18), true).unwrap();
        assert_eq!(amount1, e18(1) / U256::from(10u8));

        let amount0 = get_amount0_delta(a, b, 10u128.pow(18), false).unwrap();
        // 1e18 * 0.1 / 1.1 = 0.0909...e18
        assert_eq!(amount0, U256::from(90909090909090909u64));
    }

    #[test]
    fn test_delta_rounding_direction() {
        let a = get_sqrt_ratio_at_tick(-10).unwrap();
        let b = get_sqrt_ratio_at_tick(17).unwrap();
        let up = get_amount0_delta(a, b, 123_456_789, true).unwrap();
        let down = get_amount0_delta(a, b, 123_456_789, false).unwrap();
        assert!(up == down || up == down + U256::from(1u8));
        // argument order does not matter
        assert_eq!(get_amount1_delta(b, a, 777, true).unwrap(), get_amount1_delta(a, b, 777, true).unwrap());
    }

    #[test]
    fn test_next_price_from_input() {
        let liquidity = 10u128.pow(18);
        // token1 in raises the price
        let up = get_next_sqrt_price_from_input(Q96, liquidity, e18(1) / U256::from(10u8), false).unwrap();
        assert_eq!(up, Q96 * U256::from(11u8) / U256::from(10u8));

        // token0 in lowers the price
        let down = get_next_sqrt_price_from_input(Q96, liquidity, e18(1) / U256::from(10u8), true).unwrap();
        assert!(down < Q96);

        assert_eq!(get_next_sqrt_price_from_input(Q96, liquidity, U256::ZERO, true).unwrap(), Q96);
        assert!(get_next_sqrt_price_from_input(Q96, 0, U256::from(1u8), true).is_err());
    }
}
