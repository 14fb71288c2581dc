//! Tick <-> sqrt price conversion (Uniswap V3 TickMath)

use alloy_primitives::U256;

use crate::error::{PricingError, PricingResult};

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

/// get_sqrt_ratio_at_tick(MIN_TICK)
pub const MIN_SQRT_RATIO: U256 = U256::from_limbs([4295128739, 0, 0, 0]);

/// get_sqrt_ratio_at_tick(MAX_TICK)
pub const MAX_SQRT_RATIO: U256 =
    U256::from_limbs([0x5d951d5263988d26, 0xefd1fc6a50648849, 0xfffd8963, 0]);

/// Per-bit multipliers: 1 / sqrt(1.0001)^(2^i) as Q128.128
const TICK_FACTORS: [(u32, u128); 19] = [
    (0x2, 0xfff97272373d413259a46990580e213a),
    (0x4, 0xfff2e50f5f656932ef12357cf3c7fdcc),
    (0x8, 0xffe5caca7e10e4e61c3624eaa0941cd0),
    (0x10, 0xffcb9843d60f6159c9db58835c926644),
    (0x20, 0xff973b41fa98c081472e6896dfb254c0),
    (0x40, 0xff2ea16466c96a3843ec78b326b52861),
    (0x80, 0xfe5dee046a99a2a811c461f1969c3053),
    (0x100, 0xfcbe86c7900a88aedcffc83b479aa3a4),
    (0x200, 0xf987a7253ac413176f2b074cf7815e54),
    (0x400, 0xf3392b0822b70005940c7a398e4b70f3),
    (0x800, 0xe7159475a2c29b7443b29c7fa6e889d9),
    (0x1000, 0xd097f3bdfd2022b8845ad8f792aa5825),
    (0x2000, 0xa9f746462d870fdf8a65dc1f90e061e5),
    (0x4000, 0x70d869a156d2a1b890bb3df62baf32f7),
    (0x8000, 0x31be135f97d08fd981231505542fcfa6),
    (0x10000, 0x9aa508b5b7a84e1c677de54f3e99bc9),
    (0x20000, 0x5d6af8dedb81196699c329225ee604),
    (0x40000, 0x2216e584f5fa1ea926041bedfe98),
    (0x80000, 0x48a170391f7dc42444e8fa2),
];

/// sqrt(1.0001^tick) * 2^96, rounded up
pub fn get_sqrt_ratio_at_tick(tick: i32) -> PricingResult<U256> {
    let abs_tick = tick.unsigned_abs();
    if abs_tick > MAX_TICK as u32 {
        return Err(PricingError::Math("tick out of range"));
    }

    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(0xfffcb933bd6fad37aa2d162d1a594001u128)
    } else {
        U256::from(1u8) << 128
    };

    for (bit, factor) in TICK_FACTORS {
        if abs_tick & bit != 0 {
            ratio = (ratio * U256::from(factor)) >> 128;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up so the result never undershoots the tick
    let rounding = if (ratio & U256::from(u32::MAX)).is_zero() {
        U256::ZERO
    } else {
        U256::from(1u8)
    };
    Ok((ratio >> 32) + rounding)
}

/// Greatest tick whose sqrt ratio is <= `sqrt_price_x96`
pub fn get_tick_at_sqrt_ratio(sqrt_price_x96: U256) -> PricingResult<i32> {
    if sqrt_price_x96 < MIN_SQRT_RATIO || sqrt_price_x96 >= MAX_SQRT_RATIO {
        return Err(PricingError::Math("sqrt price out of range"));
    }

    let mut low = MIN_TICK;
    let mut high = MAX_TICK;
    while low < high {
        // upper mid so the loop always makes progress
        let mid = low + (high - low + 1) / 2;
        if get_sqrt_ratio_at_tick(mid)? <= sqrt_price_x96 {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    Ok(low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::math::Q96;

    #[test]
    fn test_bounds() {
        assert_eq!(get_sqrt_ratio_at_tick(MIN_TICK).unwrap(), MIN_SQRT_RATIO);
        assert_eq!(get_sqrt_ratio_at_tick(MAX_TICK).unwrap(), MAX_SQRT_RATIO);
        assert!(get_sqrt_ratio_at_tick(MAX_TICK + 1).is_err());
        assert!(get_sqrt_ratio_at_tick(MIN_TICK - 1).is_err());
    }

    #[test]
    fn test_tick_zero_is_one() {
        assert_eq!(get_sqrt_ratio_at_tick(0).unwrap(), Q96);
        assert_eq!(get_tick_at_sqrt_ratio(Q96).unwrap(), 0);
    }

    #[test]
    fn test_ratio_is_monotonic() {
        let mut previous = get_sqrt_ratio_at_tick(-1000).unwrap();
        for tick in -999..1000 {
            let ratio = get_sqrt_ratio_at_tick(tick).unwrap();
            assert!(ratio > previous);
            previous = ratio;
        }
    }

    #[test]
    fn test_tick_round_trip() {
        for tick in [-887000, -50000, -201, -1, 1, 60, 76012, 887000] {
            let ratio = get_sqrt_ratio_at_tick(tick).unwrap();
            assert_eq!(get_tick_at_sqrt_ratio(ratio).unwrap(), tick);
            assert_eq!(get_tick_at_sqrt_ratio(ratio + U256::from(1u8)).unwrap(), tick);
            assert_eq!(get_tick_at_sqrt_ratio(ratio - U256::from(1u8)).unwrap(), tick - 1);
        }
    }

    #[test]
    fn test_min_sqrt_ratio_maps_to_min_tick() {
        assert_eq!(get_tick_at_sqrt_ratio(MIN_SQRT_RATIO).unwrap(), MIN_TICK);
        assert!(get_tick_at_sqrt_ratio(MAX_SQRT_RATIO).is_err());
    }
}
