//! Balancer fixed-point math
//!
//! - 18-decimal `bmul` / `bdiv` / `bpow` (BNum semantics, rounding half up)
//! - Weighted pool `calc_out_given_in`
//! - StableSwap invariant and balance solver with `AMP_PRECISION` = 1000

use alloy_primitives::U256;

use super::{checked_add, checked_mul, checked_sub, div_rounding_up};
use crate::error::{PricingError, PricingResult};

/// 1.0 in 18-decimal fixed point
pub const BONE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Balancer stable pools store amplification multiplied by this
pub const AMP_PRECISION: U256 = U256::from_limbs([1000, 0, 0, 0]);

/// Weighted pools reject swaps larger than 30% of the input balance
pub const MAX_IN_RATIO: U256 = U256::from_limbs([300_000_000_000_000_000, 0, 0, 0]);

const BPOW_PRECISION: U256 = U256::from_limbs([100_000_000, 0, 0, 0]);
const STABLE_MAX_ITERATIONS: usize = 255;

fn two() -> U256 {
    U256::from(2u8)
}

pub fn btoi(a: U256) -> U256 {
    a / BONE
}

pub fn bfloor(a: U256) -> U256 {
    btoi(a) * BONE
}

pub fn bsub_sign(a: U256, b: U256) -> (U256, bool) {
    if a >= b {
        (a - b, false)
    } else {
        (b - a, true)
    }
}

pub fn bmul(a: U256, b: U256) -> PricingResult<U256> {
    let c0 = checked_mul(a, b)?;
    let c1 = checked_add(c0, BONE / two())?;
    Ok(c1 / BONE)
}

pub fn bdiv(a: U256, b: U256) -> PricingResult<U256> {
    if b.is_zero() {
        return Err(PricingError::Math("bdiv by zero"));
    }
    let c0 = checked_mul(a, BONE)?;
    let c1 = checked_add(c0, b / two())?;
    Ok(c1 / b)
}

/// Rounds up, as the fee computation requires
pub fn mul_up(a: U256, b: U256) -> PricingResult<U256> {
    let product = checked_mul(a, b)?;
    if product.is_zero() {
        return Ok(U256::ZERO);
    }
    Ok((product - U256::from(1u8)) / BONE + U256::from(1u8))
}

pub fn bpowi(a: U256, n: U256) -> PricingResult<U256> {
    let mut z = if n % two() != U256::ZERO { a } else { BONE };
    let mut a = a;
    let mut n = n / two();
    while n != U256::ZERO {
        a = bmul(a, a)?;
        if n % two() != U256::ZERO {
            z = bmul(z, a)?;
        }
        n /= two();
    }
    Ok(z)
}

/// base^exp for fixed-point base and exponent: integer part by squaring, fraction by series
pub fn bpow(base: U256, exp: U256) -> PricingResult<U256> {
    let whole = bfloor(exp);
    let remain = exp - whole;
    let whole_pow = bpowi(base, btoi(whole))?;
    if remain.is_zero() {
        return Ok(whole_pow);
    }
    let partial = bpow_approx(base, remain, BONE / BPOW_PRECISION)?;
    bmul(whole_pow, partial)
}

fn bpow_approx(base: U256, exp: U256, precision: U256) -> PricingResult<U256> {
    let (x, xneg) = bsub_sign(base, BONE);
    let mut term = BONE;
    let mut sum = term;
    let mut negative = false;
    let mut i = U256::from(1u8);

    while term >= precision {
        let big_k = checked_mul(i, BONE)?;
        let (c, cneg) = bsub_sign(exp, big_k - BONE);
        term = bmul(term, bmul(c, x)?)?;
        term = bdiv(term, big_k)?;
        if term.is_zero() {
            break;
        }
        negative ^= xneg ^ cneg;
        sum = if negative {
            checked_sub(sum, term)?
        } else {
            checked_add(sum, term)?
        };
        i += U256::from(1u8);
    }
    Ok(sum)
}

/// Weighted pool output for an input that already had its fee removed
///
/// `aO = bO * (1 - (bI / (bI + aI)) ^ (wI / wO))`
pub fn weighted_out_given_in(
    balance_in: U256,
    weight_in: U256,
    balance_out: U256,
    weight_out: U256,
    amount_in: U256,
) -> PricingResult<U256> {
    let max_in = bmul(balance_in, MAX_IN_RATIO)?;
    if amount_in > max_in {
        return Err(PricingError::Math("weighted swap exceeds MAX_IN_RATIO"));
    }

    let weight_ratio = bdiv(weight_in, weight_out)?;
    let base = bdiv(balance_in, checked_add(balance_in, amount_in)?)?;
    let power = bpow(base, weight_ratio)?;
    let complement = checked_sub(BONE, power.min(BONE))?;
    bmul(balance_out, complement)
}

/// StableSwap invariant D for the given (18-decimal) balances
pub fn calculate_invariant(amplification: U256, balances: &[U256]) -> PricingResult<U256> {
    let num_tokens = U256::from(balances.len());
    let sum = balances
        .iter()
        .try_fold(U256::ZERO, |acc, b| checked_add(acc, *b))?;
    if sum.is_zero() {
        return Ok(U256::ZERO);
    }

    let amp_times_total = checked_mul(amplification, num_tokens)?;
    let mut invariant = sum;

    for _ in 0..STABLE_MAX_ITERATIONS {
        let mut d_p = invariant;
        for balance in balances {
            let denominator = checked_mul(*balance, num_tokens)?;
            if denominator.is_zero() {
                return Err(PricingError::Math("stable pool balance is zero"));
            }
            d_p = checked_mul(d_p, invariant)? / denominator;
        }
        let previous = invariant;

        let numerator = checked_mul(
            checked_add(
                checked_mul(amp_times_total, sum)? / AMP_PRECISION,
                checked_mul(d_p, num_tokens)?,
            )?,
            invariant,
        )?;
        let denominator = checked_add(
            checked_mul(checked_sub(amp_times_total, AMP_PRECISION)?, invariant)? / AMP_PRECISION,
            checked_mul(num_tokens + U256::from(1u8), d_p)?,
        )?;
        if denominator.is_zero() {
            return Err(PricingError::Math("stable invariant denominator is zero"));
        }
        invariant = numerator / denominator;

        let (diff, _) = bsub_sign(invariant, previous);
        if diff <= U256::from(1u8) {
            return Ok(invariant);
        }
    }

    Err(PricingError::Math("stable invariant did not converge"))
}

/// Balance of `token_index` that keeps the invariant, given every other balance
pub fn token_balance_given_invariant(
    amplification: U256,
    balances: &[U256],
    invariant: U256,
    token_index: usize,
) -> PricingResult<U256> {
    if balances.is_empty() || token_index >= balances.len() || invariant.is_zero() {
        return Err(PricingError::Math("invalid stable pool state"));
    }
    let num_tokens = U256::from(balances.len());
    let amp_times_total = checked_mul(amplification, num_tokens)?;

    let mut sum = balances[0];
    let mut p_d = checked_mul(balances[0], num_tokens)?;
    for balance in &balances[1..] {
        p_d = checked_mul(checked_mul(p_d, *balance)?, num_tokens)? / invariant;
        sum = checked_add(sum, *balance)?;
    }
    sum = checked_sub(sum, balances[token_index])?;

    let inv2 = checked_mul(invariant, invariant)?;
    let c = checked_mul(
        checked_mul(div_rounding_up(inv2, checked_mul(amp_times_total, p_d)?)?, AMP_PRECISION)?,
        balances[token_index],
    )?;
    let b = checked_add(sum, checked_mul(invariant / amp_times_total, AMP_PRECISION)?)?;

    let mut token_balance = div_rounding_up(checked_add(inv2, c)?, checked_add(invariant, b)?)?;

    for _ in 0..STABLE_MAX_ITERATIONS {
        let previous = token_balance;
        let numerator = checked_add(checked_mul(token_balance, token_balance)?, c)?;
        let denominator = checked_sub(checked_add(checked_mul(token_balance, two())?, b)?, invariant)?;
        token_balance = div_rounding_up(numerator, denominator)?;

        let (diff, _) = bsub_sign(token_balance, previous);
        if diff <= U256::from(1u8) {
            return Ok(token_balance);
        }
    }

    Err(PricingError::Math("stable balance did not converge"))
}

/// Stable pool output for an input that already had its fee removed
pub fn stable_out_given_in(
    amplification: U256,
    balances: &[U256],
    token_index_in: usize,
    token_index_out: usize,
    amount_in: U256,
) -> PricingResult<U256> {
    let invariant = calculate_invariant(amplification, balances)?;

    let mut after = balances.to_vec();
    after[token_index_in] = checked_add(after[token_index_in], amount_in)?;
    let final_balance_out = token_balance_given_invariant(amplification, &after, invariant, token_index_out)?;

    // one wei is withheld in the pool's favour
    checked_sub(
        checked_sub(balances[token_index_out], final_balance_out)?,
        U256::from(1u8),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e18(n: u64) -> U256 {
        U256::from(n) * BONE
    }

    #[test]
    fn test_bmul_bdiv() {
        assert_eq!(bmul(e18(2), e18(3)).unwrap(), e18(6));
        assert_eq!(bdiv(e18(6), e18(3)).unwrap(), e18(2));
        assert!(bdiv(e18(1), U256::ZERO).is_err());
        assert!(bmul(U256::MAX, e18(2)).is_err());
    }

    #[test]
    fn test_bpow_fractional_exponent() {
        // 0.64 ^ 0.5 = 0.8
        let base = BONE * U256::from(64u8) / U256::from(100u8);
        let result = bpow(base, BONE / U256::from(2u8)).unwrap();
        let (diff, _) = bsub_sign(result, BONE * U256::from(8u8) / U256::from(10u8));
        assert!(diff < U256::from(100_000_000_000u64));

        // 0.5 ^ 2.5 = 0.1767767
        let result = bpow(BONE / U256::from(2u8), BONE * U256::from(5u8) / U256::from(2u8)).unwrap();
        let (diff, _) = bsub_sign(result, U256::from(176_776_695_296_636_881u64));
        assert!(diff < U256::from(1_000_000_000_000u64));
    }

    #[test]
    fn test_weighted_equal_weights_matches_constant_product() {
        // 50/50 pool degenerates to x*y=k
        let out = weighted_out_given_in(e18(100), e18(1) / U256::from(2u8), e18(100), e18(1) / U256::from(2u8), e18(10)).unwrap();
        // 100 * 10 / 110 = 9.0909...
        let expected = e18(100) * e18(10) / e18(110);
        let (diff, _) = bsub_sign(out, expected);
        assert!(diff < U256::from(1_000u64));
    }

    #[test]
    fn test_weighted_rejects_large_trades() {
        let half = e18(1) / U256::from(2u8);
        assert!(weighted_out_given_in(e18(100), half, e18(100), half, e18(31)).is_err());
    }

    #[test]
    fn test_stable_invariant_of_balanced_pool() {
        let amp = U256::from(200u64) * AMP_PRECISION;
        let balances = vec![e18(1_000_000), e18(1_000_000), e18(1_000_000)];
        let invariant = calculate_invariant(amp, &balances).unwrap();
        let (diff, _) = bsub_sign(invariant, e18(3_000_000));
        assert!(diff <= U256::from(3u8));
    }

    #[test]
    fn test_stable_swap_is_near_par() {
        let amp = U256::from(200u64) * AMP_PRECISION;
        let balances = vec![e18(1_000_000), e18(1_000_000)];
        let out = stable_out_given_in(amp, &balances, 0, 1, e18(1000)).unwrap();
        assert!(out < e18(1000));
        assert!(out > e18(999));
    }
}
