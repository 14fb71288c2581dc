//! Market Snapshot
//!
//! The state of every relevant pool and price feed at one block. The router
//! reads it, the executor mutates it, nothing else holds market state.
//!
//! Sources:
//! - `FileSnapshotSource`: a JSON file written by `pricer fetch` or by hand
//! - `RpcSnapshotSource`: live chain state pinned to one block via Multicall3

pub mod fetcher;
pub mod source;

pub use fetcher::RpcSnapshotSource;
pub use source::{FileSnapshotSource, SnapshotSource};

use alloy_primitives::{Address, B256};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::oracle::FeedRegistry;
use crate::simulator::{BalancerPool, ConstantProductPair, UniV3Pool, V2Dex};
use crate::tokens::{self, Token};

/// Decimals assumed for tokens nobody told us about
pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub block_number: u64,
    /// Block timestamp, the `now` of every oracle read
    pub timestamp: u64,
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub pairs: Vec<ConstantProductPair>,
    #[serde(default)]
    pub v3_pools: Vec<UniV3Pool>,
    #[serde(default)]
    pub balancer_pools: Vec<BalancerPool>,
    #[serde(default)]
    pub feeds: FeedRegistry,
}

fn same_pair(a0: &Address, a1: &Address, b0: &Address, b1: &Address) -> bool {
    (a0 == b0 && a1 == b1) || (a0 == b1 && a1 == b0)
}

impl MarketSnapshot {
    pub fn new(block_number: u64, timestamp: u64) -> Self {
        Self {
            block_number,
            timestamp,
            ..Default::default()
        }
    }

    // ============================================
    // LOOKUPS
    // ============================================

    pub fn token(&self, address: &Address) -> Option<&Token> {
        self.tokens.iter().find(|t| t.address == *address)
    }

    /// Snapshot metadata first, then the static table, then 18
    pub fn decimals(&self, address: &Address) -> u8 {
        self.token(address)
            .map(|t| t.decimals)
            .or_else(|| tokens::known_decimals(address))
            .unwrap_or(DEFAULT_DECIMALS)
    }

    pub fn symbol(&self, address: &Address) -> String {
        match self.token(address) {
            Some(token) => token.symbol.clone(),
            None => tokens::format_token(address),
        }
    }

    /// Constant-product pair for (a, b) deployed by `dex`
    pub fn pair(&self, dex: V2Dex, a: &Address, b: &Address) -> Option<&ConstantProductPair> {
        self.pairs
            .iter()
            .find(|p| p.dex == dex && same_pair(&p.token0, &p.token1, a, b))
    }

    pub fn pair_by_address(&self, address: &Address) -> Option<&ConstantProductPair> {
        self.pairs.iter().find(|p| p.address == *address)
    }

    pub fn pair_by_address_mut(&mut self, address: &Address) -> Option<&mut ConstantProductPair> {
        self.pairs.iter_mut().find(|p| p.address == *address)
    }

    /// V3 pool for (a, b) at `fee`
    pub fn v3_pool(&self, a: &Address, b: &Address, fee: u32) -> Option<&UniV3Pool> {
        self.v3_pools
            .iter()
            .find(|p| p.fee == fee && same_pair(&p.token0, &p.token1, a, b))
    }

    /// Every V3 pool for (a, b), any fee tier
    pub fn v3_pools_for<'a>(&'a self, a: &'a Address, b: &'a Address) -> impl Iterator<Item = &'a UniV3Pool> + 'a {
        self.v3_pools
            .iter()
            .filter(move |p| same_pair(&p.token0, &p.token1, a, b))
    }

    pub fn v3_pool_by_address(&self, address: &Address) -> Option<&UniV3Pool> {
        self.v3_pools.iter().find(|p| p.address == *address)
    }

    pub fn v3_pool_by_address_mut(&mut self, address: &Address) -> Option<&mut UniV3Pool> {
        self.v3_pools.iter_mut().find(|p| p.address == *address)
    }

    /// Every Balancer pool holding both tokens
    pub fn balancer_pools_for<'a>(&'a self, a: &'a Address, b: &'a Address) -> impl Iterator<Item = &'a BalancerPool> + 'a {
        self.balancer_pools
            .iter()
            .filter(move |p| a != b && p.contains(a) && p.contains(b))
    }

    pub fn balancer_pool(&self, id: &B256) -> Option<&BalancerPool> {
        self.balancer_pools.iter().find(|p| p.id == *id)
    }

    pub fn balancer_pool_mut(&mut self, id: &B256) -> Option<&mut BalancerPool> {
        self.balancer_pools.iter_mut().find(|p| p.id == *id)
    }

    // ============================================
    // PERSISTENCE
    // ============================================

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Blocking write, used by the CLI after a fetch
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// One-line inventory for logs
    pub fn summary(&self) -> String {
        format!(
            "block {} @ {}: {} tokens, {} v2 pairs, {} v3 pools, {} balancer pools, {} feeds",
            self.block_number,
            self.timestamp,
            self.tokens.len(),
            self.pairs.len(),
            self.v3_pools.len(),
            self.balancer_pools.len(),
            self.feeds.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::balancer::tests::weighted_weth_aura;
    use crate::simulator::uniswap_v3::tests::full_range_pool;
    use crate::tokens::{AURA, USDC, WETH};
    use alloy_primitives::U256;

    fn snapshot() -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::new(18_000_000, 1_700_000_000);
        snapshot.tokens.push(Token::new("MYST", Address::repeat_byte(0x77), 9));
        snapshot.pairs.push(ConstantProductPair {
            address: Address::repeat_byte(0x01),
            dex: V2Dex::SushiSwap,
            token0: USDC,
            token1: WETH,
            reserve0: U256::from(1u8),
            reserve1: U256::from(1u8),
        });
        snapshot.v3_pools.push(full_range_pool(USDC, WETH, 10u128.pow(18), 500));
        snapshot.balancer_pools.push(weighted_weth_aura());
        snapshot
    }

    #[test]
    fn test_lookups_ignore_token_order() {
        let snapshot = snapshot();
        assert!(snapshot.pair(V2Dex::SushiSwap, &WETH, &USDC).is_some());
        assert!(snapshot.pair(V2Dex::UniswapV2, &WETH, &USDC).is_none());
        assert!(snapshot.v3_pool(&WETH, &USDC, 500).is_some());
        assert!(snapshot.v3_pool(&WETH, &USDC, 3000).is_none());
        assert_eq!(snapshot.balancer_pools_for(&AURA, &WETH).count(), 1);
        assert_eq!(snapshot.balancer_pools_for(&AURA, &AURA).count(), 0);
    }

    #[test]
    fn test_decimals_fallback_chain() {
        let snapshot = snapshot();
        assert_eq!(snapshot.decimals(&Address::repeat_byte(0x77)), 9);
        assert_eq!(snapshot.decimals(&USDC), 6);
        assert_eq!(snapshot.decimals(&Address::repeat_byte(0x78)), DEFAULT_DECIMALS);
    }

    #[test]
    fn test_json_round_trip() {
        let snapshot = snapshot();
        let text = snapshot.to_json_pretty().unwrap();
        let parsed = MarketSnapshot::from_json(&text).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
