//! Chainlink-style price feeds
//!
//! Feeds are keyed by (base, quote) like the FeedRegistry: quotes are the
//! USD / ETH / BTC denominations, WETH is priced as ETH.
//!
//! - Missing feed, zero or negative answer: price 0 (not an error)
//! - `now - updated_at > heartbeat`: `PricingError::StaleFeed`

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PricerConfig;
use crate::error::{PricingError, PricingResult};
use crate::simulator::math::{checked_mul, pow10};
use crate::tokens::{feed_denomination, BTC_DENOMINATION, ETH_DENOMINATION, USD_DENOMINATION, WETH};

/// Decimals of USD-denominated feeds
pub const USD_FEED_DECIMALS: u8 = 8;

/// Latest round of one feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeed {
    pub base: Address,
    pub quote: Address,
    pub answer: i128,
    pub decimals: u8,
    pub updated_at: u64,
    /// Overrides the configured heartbeat for this feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_secs: Option<u64>,
}

/// Raw round data as the aggregator reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundData {
    pub answer: i128,
    pub decimals: u8,
    pub updated_at: u64,
}

/// Every feed known at the snapshot block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRegistry {
    pub feeds: Vec<PriceFeed>,
}

impl FeedRegistry {
    pub fn new(feeds: Vec<PriceFeed>) -> Self {
        Self { feeds }
    }

    pub fn get(&self, base: &Address, quote: &Address) -> Option<&PriceFeed> {
        self.feeds.iter().find(|f| f.base == *base && f.quote == *quote)
    }

    /// Insert or replace the feed for (base, quote)
    pub fn upsert(&mut self, feed: PriceFeed) {
        match self.feeds.iter_mut().find(|f| f.base == feed.base && f.quote == feed.quote) {
            Some(existing) => *existing = feed,
            None => self.feeds.push(feed),
        }
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

/// Heartbeats applied when a feed has no override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleConfig {
    pub eth_usd_heartbeat_secs: u64,
    pub btc_usd_heartbeat_secs: u64,
    pub asset_feed_heartbeat_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            eth_usd_heartbeat_secs: 3600,
            btc_usd_heartbeat_secs: 3600,
            asset_feed_heartbeat_secs: 86400,
        }
    }
}

impl From<&PricerConfig> for OracleConfig {
    fn from(config: &PricerConfig) -> Self {
        Self {
            eth_usd_heartbeat_secs: config.eth_usd_heartbeat_secs,
            btc_usd_heartbeat_secs: config.btc_usd_heartbeat_secs,
            asset_feed_heartbeat_secs: config.asset_feed_heartbeat_secs,
        }
    }
}

/// A price with the decimals it is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedPrice {
    pub value: U256,
    pub decimals: u8,
}

impl FeedPrice {
    pub const ZERO: FeedPrice = FeedPrice { value: U256::ZERO, decimals: USD_FEED_DECIMALS };

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }
}

/// Read-only oracle over a feed registry at a fixed `now`
pub struct PriceOracle<'a> {
    registry: &'a FeedRegistry,
    config: OracleConfig,
    now: u64,
}

impl<'a> PriceOracle<'a> {
    pub fn new(registry: &'a FeedRegistry, config: OracleConfig, now: u64) -> Self {
        Self { registry, config, now }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    fn heartbeat_for(&self, feed: &PriceFeed) -> u64 {
        if let Some(heartbeat) = feed.heartbeat_secs {
            return heartbeat;
        }
        if feed.quote != USD_DENOMINATION {
            self.config.asset_feed_heartbeat_secs
        } else if feed.base == ETH_DENOMINATION {
            self.config.eth_usd_heartbeat_secs
        } else if feed.base == BTC_DENOMINATION {
            self.config.btc_usd_heartbeat_secs
        } else {
            self.config.asset_feed_heartbeat_secs
        }
    }

    /// Raw round data without staleness or sign checks
    pub fn latest_round_data(&self, base: &Address, quote: &Address) -> Option<RoundData> {
        self.registry.get(base, quote).map(|feed| RoundData {
            answer: feed.answer,
            decimals: feed.decimals,
            updated_at: feed.updated_at,
        })
    }

    /// Checked read: zero when missing or non-positive, error when stale
    fn read(&self, base: &Address, quote: &Address) -> PricingResult<FeedPrice> {
        let feed = match self.registry.get(base, quote) {
            Some(feed) => feed,
            None => {
                debug!("no feed for {:?}/{:?}", base, quote);
                return Ok(FeedPrice::ZERO);
            }
        };

        let heartbeat = self.heartbeat_for(feed);
        let age = self.now.saturating_sub(feed.updated_at);
        if age > heartbeat {
            return Err(PricingError::StaleFeed {
                base: *base,
                quote: *quote,
                age_secs: age,
                heartbeat_secs: heartbeat,
            });
        }

        if feed.answer <= 0 {
            debug!("non-positive answer {} for {:?}/{:?}", feed.answer, base, quote);
            return Ok(FeedPrice { value: U256::ZERO, decimals: feed.decimals });
        }

        Ok(FeedPrice {
            value: U256::from(feed.answer as u128),
            decimals: feed.decimals,
        })
    }

    /// ETH/USD, 8 decimals
    pub fn get_eth_usd_price(&self) -> PricingResult<U256> {
        Ok(self.read(&ETH_DENOMINATION, &USD_DENOMINATION)?.value)
    }

    /// BTC/USD, 8 decimals
    pub fn get_btc_usd_price(&self) -> PricingResult<U256> {
        Ok(self.read(&BTC_DENOMINATION, &USD_DENOMINATION)?.value)
    }

    pub fn get_price_in_eth(&self, asset: &Address) -> PricingResult<U256> {
        Ok(self.read(&feed_denomination(asset), &ETH_DENOMINATION)?.value)
    }

    pub fn get_price_in_usd(&self, asset: &Address) -> PricingResult<U256> {
        Ok(self.read(&feed_denomination(asset), &USD_DENOMINATION)?.value)
    }

    pub fn get_price_in_btc(&self, asset: &Address) -> PricingResult<U256> {
        Ok(self.read(&feed_denomination(asset), &BTC_DENOMINATION)?.value)
    }

    /// USD price of `asset` in 8 decimals, derived through ETH or BTC when needed
    ///
    /// WETH -> ETH/USD; else direct USD feed; else ETH feed x ETH/USD; else BTC feed x BTC/USD.
    pub fn fetch_usd_feed(&self, asset: &Address) -> PricingResult<U256> {
        if *asset == WETH {
            return self.get_eth_usd_price();
        }

        let base = feed_denomination(asset);
        if self.registry.get(&base, &USD_DENOMINATION).is_some() {
            let direct = self.read(&base, &USD_DENOMINATION)?;
            return rescale(direct, USD_FEED_DECIMALS);
        }

        if self.registry.get(&base, &ETH_DENOMINATION).is_some() {
            let in_eth = self.read(&base, &ETH_DENOMINATION)?;
            let eth_usd = self.read(&ETH_DENOMINATION, &USD_DENOMINATION)?;
            return cross(in_eth, eth_usd);
        }

        if self.registry.get(&base, &BTC_DENOMINATION).is_some() {
            let in_btc = self.read(&base, &BTC_DENOMINATION)?;
            let btc_usd = self.read(&BTC_DENOMINATION, &USD_DENOMINATION)?;
            return cross(in_btc, btc_usd);
        }

        debug!("no USD path for {:?}", asset);
        Ok(U256::ZERO)
    }
}

/// asset/X * X/USD, expressed in USD feed decimals
fn cross(asset_in_x: FeedPrice, x_in_usd: FeedPrice) -> PricingResult<U256> {
    if asset_in_x.is_zero() || x_in_usd.is_zero() {
        return Ok(U256::ZERO);
    }
    let product = checked_mul(asset_in_x.value, x_in_usd.value)? / pow10(asset_in_x.decimals);
    rescale(FeedPrice { value: product, decimals: x_in_usd.decimals }, USD_FEED_DECIMALS)
}

fn rescale(price: FeedPrice, decimals: u8) -> PricingResult<U256> {
    if price.decimals == decimals {
        Ok(price.value)
    } else if price.decimals > decimals {
        Ok(price.value / pow10(price.decimals - decimals))
    } else {
        checked_mul(price.value, pow10(decimals - price.decimals))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tokens::{BADGER, CVX, DAI, USDC, WBTC};

    pub const NOW: u64 = 1_700_000_000;

    pub fn feed(base: Address, quote: Address, answer: i128, decimals: u8, updated_at: u64) -> PriceFeed {
        PriceFeed {
            base,
            quote,
            answer,
            decimals,
            updated_at,
            heartbeat_secs: None,
        }
    }

    /// ETH $2000, BTC $40000, USDC/DAI $1, BADGER 0.001 ETH, WBTC 1 BTC, BTC 19.8 ETH
    pub fn mainnet_like_registry() -> FeedRegistry {
        FeedRegistry::new(vec![
            feed(ETH_DENOMINATION, USD_DENOMINATION, 2_000_00000000, 8, NOW - 60),
            feed(BTC_DENOMINATION, USD_DENOMINATION, 40_000_00000000, 8, NOW - 60),
            feed(USDC, USD_DENOMINATION, 1_00000000, 8, NOW - 3600),
            feed(DAI, USD_DENOMINATION, 1_00010000, 8, NOW - 3600),
            feed(BADGER, ETH_DENOMINATION, 1_000_000_000_000_000, 18, NOW - 3600),
            feed(WBTC, BTC_DENOMINATION, 1_00000000, 8, NOW - 3600),
            feed(USDC, ETH_DENOMINATION, 500_000_000_000_000, 18, NOW - 3600),
            feed(BTC_DENOMINATION, ETH_DENOMINATION, 19_800_000_000_000_000_000, 18, NOW - 3600),
        ])
    }

    #[test]
    fn test_direct_and_derived_usd() {
        let registry = mainnet_like_registry();
        let oracle = PriceOracle::new(&registry, OracleConfig::default(), NOW);

        assert_eq!(oracle.get_eth_usd_price().unwrap(), U256::from(2_000_00000000u64));
        assert_eq!(oracle.fetch_usd_feed(&WETH).unwrap(), U256::from(2_000_00000000u64));
        // BADGER via ETH: 0.001 * 2000 = $2
        assert_eq!(oracle.fetch_usd_feed(&BADGER).unwrap(), U256::from(2_00000000u64));
        // WBTC via BTC
        assert_eq!(oracle.fetch_usd_feed(&WBTC).unwrap(), U256::from(40_000_00000000u64));
    }

    #[test]
    fn test_fetch_usd_feed_matches_direct_usd_feed() {
        let registry = mainnet_like_registry();
        let oracle = PriceOracle::new(&registry, OracleConfig::default(), NOW);
        for asset in [USDC, DAI] {
            assert_eq!(oracle.fetch_usd_feed(&asset).unwrap(), oracle.get_price_in_usd(&asset).unwrap());
        }
        // no feeds at all
        assert_eq!(oracle.fetch_usd_feed(&CVX).unwrap(), U256::ZERO);
        assert_eq!(oracle.get_price_in_usd(&CVX).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_btc_eth_round_agrees_with_usd_cross_rate() {
        let registry = mainnet_like_registry();
        let oracle = PriceOracle::new(&registry, OracleConfig::default(), NOW);

        let round = oracle.latest_round_data(&BTC_DENOMINATION, &ETH_DENOMINATION).unwrap();
        assert_eq!(round.decimals, 18);
        let direct = U256::from(round.answer as u128);

        // both USD feeds have 8 decimals, so the ratio only needs the 18-decimal scale
        let cross = oracle.get_btc_usd_price().unwrap() * pow10(18) / oracle.get_eth_usd_price().unwrap();
        let diff = if direct > cross { direct - cross } else { cross - direct };
        assert!(diff * U256::from(10_000u16) <= cross * U256::from(150u8), "{} vs {}", direct, cross);
    }

    #[test]
    fn test_heartbeat_boundary() {
        let registry = FeedRegistry::new(vec![feed(ETH_DENOMINATION, USD_DENOMINATION, 2_000_00000000, 8, NOW)]);

        let fresh = PriceOracle::new(&registry, OracleConfig::default(), NOW);
        assert!(fresh.get_eth_usd_price().is_ok());

        let at_heartbeat = PriceOracle::new(&registry, OracleConfig::default(), NOW + 3600);
        assert!(at_heartbeat.get_eth_usd_price().is_ok());

        let stale = PriceOracle::new(&registry, OracleConfig::default(), NOW + 3601);
        let err = stale.get_eth_usd_price().unwrap_err();
        assert!(err.is_stale());
        assert!(err.to_string().starts_with("!stale"));
    }

    #[test]
    fn test_asset_feed_has_24h_heartbeat() {
        let registry = FeedRegistry::new(vec![feed(CVX, ETH_DENOMINATION, 3_000_000_000_000_000, 18, NOW)]);
        let oracle = PriceOracle::new(&registry, OracleConfig::default(), NOW + 86400);
        assert!(oracle.get_price_in_eth(&CVX).is_ok());
        let oracle = PriceOracle::new(&registry, OracleConfig::default(), NOW + 86401);
        assert!(oracle.get_price_in_eth(&CVX).is_err());
    }

    #[test]
    fn test_heartbeat_override() {
        let mut entry = feed(CVX, USD_DENOMINATION, 5_00000000, 8, NOW);
        entry.heartbeat_secs = Some(60);
        let registry = FeedRegistry::new(vec![entry]);
        let oracle = PriceOracle::new(&registry, OracleConfig::default(), NOW + 61);
        assert!(oracle.get_price_in_usd(&CVX).unwrap_err().is_stale());
    }

    #[test]
    fn test_non_positive_answer_is_no_feed() {
        let registry = FeedRegistry::new(vec![
            feed(CVX, USD_DENOMINATION, -5, 8, NOW),
            feed(BADGER, USD_DENOMINATION, 0, 8, NOW),
        ]);
        let oracle = PriceOracle::new(&registry, OracleConfig::default(), NOW);
        assert_eq!(oracle.get_price_in_usd(&CVX).unwrap(), U256::ZERO);
        assert_eq!(oracle.fetch_usd_feed(&BADGER).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_raw_round_data_ignores_staleness() {
        let registry = FeedRegistry::new(vec![feed(BTC_DENOMINATION, ETH_DENOMINATION, 20 * 10i128.pow(18), 18, 0)]);
        let oracle = PriceOracle::new(&registry, OracleConfig::default(), NOW);
        let round = oracle.latest_round_data(&BTC_DENOMINATION, &ETH_DENOMINATION).unwrap();
        assert_eq!(round.answer, 20 * 10i128.pow(18));
        assert_eq!(round.updated_at, 0);
    }
}
