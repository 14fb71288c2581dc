//! Fixed-point helpers shared by the venue simulators
//!
//! - `mul_div` family: 512-bit intermediate products, no silent wraparound
//! - `tick_math` / `sqrt_price_math` / `swap_math`: Uniswap V3 Q64.96 math
//! - `balancer_math`: 18-decimal fixed point for weighted and stable pools

pub mod balancer_math;
pub mod sqrt_price_math;
pub mod swap_math;
pub mod tick_math;

use alloy_primitives::{U256, U512};

use crate::error::{PricingError, PricingResult};

/// 2^96, the Q64.96 resolution
pub const Q96: U256 = U256::from_limbs([0, 1 << 32, 0, 0]);

/// 2^128
pub const Q128: U256 = U256::from_limbs([0, 0, 1, 0]);

/// Largest value representable in a uint160
pub const U160_MAX: U256 = U256::from_limbs([u64::MAX, u64::MAX, u64::MAX >> 32, 0]);

fn widen(x: U256) -> U512 {
    let l = x.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

fn narrow(x: U512) -> PricingResult<U256> {
    let l = x.as_limbs();
    if l[4..].iter().any(|limb| *limb != 0) {
        return Err(PricingError::Math("mul_div result exceeds 256 bits"));
    }
    Ok(U256::from_limbs([l[0], l[1], l[2], l[3]]))
}

/// floor(a * b / denominator) with a full-width intermediate
pub fn mul_div(a: U256, b: U256, denominator: U256) -> PricingResult<U256> {
    if denominator.is_zero() {
        return Err(PricingError::Math("mul_div by zero"));
    }
    narrow(widen(a) * widen(b) / widen(denominator))
}

/// ceil(a * b / denominator) with a full-width intermediate
pub fn mul_div_rounding_up(a: U256, b: U256, denominator: U256) -> PricingResult<U256> {
    if denominator.is_zero() {
        return Err(PricingError::Math("mul_div by zero"));
    }
    let product = widen(a) * widen(b);
    let d = widen(denominator);
    let mut result = product / d;
    if !(product % d).is_zero() {
        result += U512::from(1u8);
    }
    narrow(result)
}

/// ceil(a / b)
pub fn div_rounding_up(a: U256, b: U256) -> PricingResult<U256> {
    if b.is_zero() {
        return Err(PricingError::Math("division by zero"));
    }
    let quotient = a / b;
    if (a % b).is_zero() {
        Ok(quotient)
    } else {
        Ok(quotient + U256::from(1u8))
    }
}

pub fn checked_add(a: U256, b: U256) -> PricingResult<U256> {
    a.checked_add(b).ok_or(PricingError::Math("addition overflow"))
}

pub fn checked_sub(a: U256, b: U256) -> PricingResult<U256> {
    a.checked_sub(b).ok_or(PricingError::Math("subtraction underflow"))
}

pub fn checked_mul(a: U256, b: U256) -> PricingResult<U256> {
    a.checked_mul(b).ok_or(PricingError::Math("multiplication overflow"))
}

/// 10^exp as a U256
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u8).pow(U256::from(exp))
}

/// Apply a liquidity_net delta to the active liquidity
pub fn add_liquidity_delta(liquidity: u128, delta: i128) -> PricingResult<u128> {
    if delta < 0 {
        liquidity
            .checked_sub(delta.unsigned_abs())
            .ok_or(PricingError::Math("liquidity underflow"))
    } else {
        liquidity
            .checked_add(delta as u128)
            .ok_or(PricingError::Math("liquidity overflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_exceeds_256_bit_intermediate() {
        let result = mul_div(U256::MAX, U256::from(4u8), U256::from(8u8)).unwrap();
        assert_eq!(result, U256::MAX / U256::from(2u8));
    }

    #[test]
    fn test_mul_div_rounding() {
        let down = mul_div(U256::from(10u8), U256::from(10u8), U256::from(3u8)).unwrap();
        let up = mul_div_rounding_up(U256::from(10u8), U256::from(10u8), U256::from(3u8)).unwrap();
        assert_eq!(down, U256::from(33u8));
        assert_eq!(up, U256::from(34u8));
    }

    #[test]
    fn test_mul_div_errors_instead_of_panicking() {
        assert!(mul_div(U256::from(1u8), U256::from(1u8), U256::ZERO).is_err());
        assert!(mul_div(U256::MAX, U256::MAX, U256::from(1u8)).is_err());
        assert!(div_rounding_up(U256::from(1u8), U256::ZERO).is_err());
    }

    #[test]
    fn test_liquidity_delta() {
        assert_eq!(add_liquidity_delta(100, -40).unwrap(), 60);
        assert_eq!(add_liquidity_delta(100, 40).unwrap(), 140);
        assert!(add_liquidity_delta(10, -11).is_err());
    }
}
