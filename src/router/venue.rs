//! Venue kinds and routes
//!
//! Venue ids are stable: they are what callers compare against and what the
//! router uses to break ties (lower id wins).

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VenueKind {
    None,
    UniswapV2,
    SushiSwap,
    UniswapV3,
    UniswapV3WithConnector,
    Balancer,
    BalancerWithConnector,
}

impl VenueKind {
    pub const ALL: [VenueKind; 7] = [
        VenueKind::None,
        VenueKind::UniswapV2,
        VenueKind::SushiSwap,
        VenueKind::UniswapV3,
        VenueKind::UniswapV3WithConnector,
        VenueKind::Balancer,
        VenueKind::BalancerWithConnector,
    ];

    pub fn id(&self) -> u8 {
        match self {
            VenueKind::None => 0,
            VenueKind::UniswapV2 => 1,
            VenueKind::SushiSwap => 2,
            VenueKind::UniswapV3 => 3,
            VenueKind::UniswapV3WithConnector => 4,
            VenueKind::Balancer => 5,
            VenueKind::BalancerWithConnector => 6,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.id() == id)
    }

    pub fn uses_connector(&self) -> bool {
        matches!(self, VenueKind::UniswapV3WithConnector | VenueKind::BalancerWithConnector)
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VenueKind::None => "None",
            VenueKind::UniswapV2 => "UniswapV2",
            VenueKind::SushiSwap => "SushiSwap",
            VenueKind::UniswapV3 => "UniswapV3",
            VenueKind::UniswapV3WithConnector => "UniswapV3+Connector",
            VenueKind::Balancer => "Balancer",
            VenueKind::BalancerWithConnector => "Balancer+Connector",
        };
        write!(f, "{}", name)
    }
}

/// One Uniswap V3 hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct V3Leg {
    pub pool: Address,
    pub fee: u32,
}

/// Where a quote's liquidity comes from
///
/// Connector variants always carry exactly one intermediate asset and both legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    None,
    UniswapV2 { pair: Address },
    SushiSwap { pair: Address },
    UniswapV3 { pool: Address, fee: u32 },
    UniswapV3WithConnector { connector: Address, legs: [V3Leg; 2] },
    Balancer { pool_id: B256 },
    BalancerWithConnector { connector: Address, pool_ids: [B256; 2] },
}

impl Route {
    pub fn kind(&self) -> VenueKind {
        match self {
            Route::None => VenueKind::None,
            Route::UniswapV2 { .. } => VenueKind::UniswapV2,
            Route::SushiSwap { .. } => VenueKind::SushiSwap,
            Route::UniswapV3 { .. } => VenueKind::UniswapV3,
            Route::UniswapV3WithConnector { .. } => VenueKind::UniswapV3WithConnector,
            Route::Balancer { .. } => VenueKind::Balancer,
            Route::BalancerWithConnector { .. } => VenueKind::BalancerWithConnector,
        }
    }

    pub fn connector(&self) -> Option<Address> {
        match self {
            Route::UniswapV3WithConnector { connector, .. } | Route::BalancerWithConnector { connector, .. } => {
                Some(*connector)
            }
            _ => None,
        }
    }

    /// Number of swaps the route performs
    pub fn hops(&self) -> usize {
        match self {
            Route::None => 0,
            Route::UniswapV3WithConnector { .. } | Route::BalancerWithConnector { .. } => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::None => write!(f, "none"),
            Route::UniswapV2 { pair } | Route::SushiSwap { pair } => write!(f, "{} {:?}", self.kind(), pair),
            Route::UniswapV3 { pool, fee } => write!(f, "UniswapV3 {:?} ({})", pool, fee),
            Route::UniswapV3WithConnector { connector, legs } => write!(
                f,
                "UniswapV3 {:?} ({}) -> {:?} -> {:?} ({})",
                legs[0].pool, legs[0].fee, connector, legs[1].pool, legs[1].fee
            ),
            Route::Balancer { pool_id } => write!(f, "Balancer {}", pool_id),
            Route::BalancerWithConnector { connector, pool_ids } => {
                write!(f, "Balancer {} -> {:?} -> {}", pool_ids[0], connector, pool_ids[1])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_ids_are_stable() {
        let ids: Vec<u8> = VenueKind::ALL.iter().map(|k| k.id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(VenueKind::from_id(4), Some(VenueKind::UniswapV3WithConnector));
        assert_eq!(VenueKind::from_id(7), None);
        // derive(Ord) follows declaration order, which is id order
        assert!(VenueKind::UniswapV2 < VenueKind::SushiSwap);
        assert!(VenueKind::Balancer < VenueKind::BalancerWithConnector);
    }

    #[test]
    fn test_connector_routes_have_two_hops() {
        let leg = V3Leg { pool: Address::repeat_byte(1), fee: 3000 };
        let route = Route::UniswapV3WithConnector {
            connector: Address::repeat_byte(9),
            legs: [leg, leg],
        };
        assert_eq!(route.kind(), VenueKind::UniswapV3WithConnector);
        assert_eq!(route.connector(), Some(Address::repeat_byte(9)));
        assert_eq!(route.hops(), 2);
        assert!(route.kind().uses_connector());

        assert_eq!(Route::None.hops(), 0);
        assert_eq!(Route::Balancer { pool_id: B256::ZERO }.connector(), None);
    }
}
