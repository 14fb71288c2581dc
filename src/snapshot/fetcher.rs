//! RPC Snapshot Fetcher - MULTICALL3 Edition
//!
//! Builds a `MarketSnapshot` from live chain state, every read pinned to one block:
//! - token metadata (decimals, symbol)
//! - Uniswap V2 / SushiSwap pairs discovered through their factories
//! - Uniswap V3 pools per fee tier, with tick bitmap words around the current tick,
//!   their initialized ticks and the oracle cumulatives over the TWAP window
//! - configured Balancer V2 pools through the Vault
//! - Chainlink FeedRegistry rounds for every token against USD / ETH / BTC
//!
//! Immutable metadata (decimals, symbols, tick spacing, Balancer pool addresses)
//! is cached for the life of the process.

use alloy_eips::BlockId;
use alloy_primitives::aliases::{I24, U24};
use alloy_primitives::{address, Address, B256, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{sol, SolCall};
use eyre::{eyre, Result};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::source::SnapshotSource;
use super::MarketSnapshot;
use crate::config::PricerConfig;
use crate::oracle::{FeedRegistry, PriceFeed};
use crate::simulator::math::tick_math::{MAX_TICK, MIN_TICK};
use crate::simulator::{
    BalancerPool, BalancerPoolKind, ConstantProductPair, Observation, TickInfo, UniV3Pool, V2Dex,
};
use crate::tokens::{self, Token, BTC_DENOMINATION, ETH_DENOMINATION, USD_DENOMINATION};

// ============================================
// MULTICALL3 INTERFACE
// ============================================

sol! {
    /// Multicall3 - deployed at same address on all EVM chains
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);

        function getCurrentBlockTimestamp() external view returns (uint256 timestamp);
    }
}

// ============================================
// VENUE INTERFACES
// ============================================

sol! {
    interface IERC20Metadata {
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }

    interface IUniswapV2Factory {
        function getPair(address tokenA, address tokenB) external view returns (address);
    }

    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }

    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address);
    }

    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function liquidity() external view returns (uint128);
        function tickSpacing() external view returns (int24);
        function tickBitmap(int16 wordPosition) external view returns (uint256);
        function ticks(int24 tick) external view returns (
            uint128 liquidityGross, int128 liquidityNet,
            uint256 feeGrowthOutside0X128, uint256 feeGrowthOutside1X128,
            int56 tickCumulativeOutside, uint160 secondsPerLiquidityOutsideX128,
            uint32 secondsOutside, bool initialized
        );
        function observe(uint32[] secondsAgos) external view returns (
            int56[] tickCumulatives, uint160[] secondsPerLiquidityCumulativeX128s
        );
    }

    interface IBalancerVault {
        function getPool(bytes32 poolId) external view returns (address, uint8);
        function getPoolTokens(bytes32 poolId) external view returns (
            address[] tokens, uint256[] balances, uint256 lastChangeBlock
        );
    }

    interface IBalancerPool {
        function getSwapFeePercentage() external view returns (uint256);
        function getNormalizedWeights() external view returns (uint256[]);
        function getAmplificationParameter() external view returns (uint256 value, bool isUpdating, uint256 precision);
    }

    interface IFeedRegistry {
        function latestRoundData(address base, address quote) external view returns (
            uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound
        );
        function decimals(address base, address quote) external view returns (uint8);
    }
}

// ============================================
// CONSTANTS
// ============================================

/// Multicall3 address (same on all EVM chains)
const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

const UNISWAP_V2_FACTORY: Address = address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f");
const SUSHISWAP_FACTORY: Address = address!("C0AEe478e3658e2610c5F7A4A2E1777cE9e4f2Ac");
const UNISWAP_V3_FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
const BALANCER_VAULT: Address = address!("BA12222222228d8Ba445958a75a0704d566BF2C8");
const FEED_REGISTRY: Address = address!("47Fb2585D2C56Fe188D0E6ec628a38b74fCeeeDf");

/// Maximum calls per batch (to avoid gas limits)
const MAX_CALLS_PER_BATCH: usize = 100;

/// Immutable V3 pool metadata
#[derive(Debug, Clone, Copy)]
struct CachedV3Data {
    tick_spacing: i32,
}

lazy_static::lazy_static! {
    static ref TOKEN_CACHE: RwLock<HashMap<Address, Token>> = RwLock::new(HashMap::new());
    static ref V3_CACHE: RwLock<HashMap<Address, CachedV3Data>> = RwLock::new(HashMap::new());
    static ref BALANCER_ADDRESS_CACHE: RwLock<HashMap<B256, Address>> = RwLock::new(HashMap::new());
}

// ============================================
// HELPERS
// ============================================

fn call3<C: SolCall>(target: Address, call: &C) -> IMulticall3::Call3 {
    IMulticall3::Call3 {
        target,
        allowFailure: true,
        callData: call.abi_encode().into(),
    }
}

fn decode<C: SolCall>(result: Option<&IMulticall3::Result>) -> Option<C::Return> {
    let result = result?;
    if !result.success {
        return None;
    }
    C::abi_decode_returns(&result.returnData).ok()
}

/// Addresses not yet in the metadata cache, in input order
fn uncached_tokens(cache: &HashMap<Address, Token>, addresses: &[Address]) -> Vec<Address> {
    addresses.iter().filter(|a| !cache.contains_key(*a)).copied().collect()
}

/// Unordered pairs of distinct tokens, each sorted (token0 < token1)
fn token_pairs(tokens: &[Address]) -> Vec<(Address, Address)> {
    let mut pairs = Vec::new();
    for (i, a) in tokens.iter().enumerate() {
        for b in &tokens[i + 1..] {
            if a == b {
                continue;
            }
            pairs.push(if a < b { (*a, *b) } else { (*b, *a) });
        }
    }
    pairs.sort();
    pairs.dedup();
    pairs
}

/// Bitmap word holding `tick` for the given spacing
fn word_position(tick: i32, tick_spacing: i32) -> i32 {
    let mut compressed = tick / tick_spacing;
    if tick < 0 && tick % tick_spacing != 0 {
        compressed -= 1;
    }
    compressed >> 8
}

/// Liquidity beyond the fetched window is unknown: bound the window with ticks
/// that take the active liquidity to zero, so swaps leaving it quote as unfillable
fn close_tick_window(
    mut ticks: Vec<TickInfo>,
    current_tick: i32,
    liquidity: u128,
    lower_edge: i32,
    upper_edge: i32,
) -> Vec<TickInfo> {
    ticks.retain(|t| t.index > lower_edge && t.index < upper_edge);
    ticks.sort_by_key(|t| t.index);

    let current = liquidity as i128;
    let below: i128 = ticks
        .iter()
        .filter(|t| t.index <= current_tick)
        .map(|t| t.liquidity_net)
        .sum();
    let above: i128 = ticks
        .iter()
        .filter(|t| t.index > current_tick)
        .map(|t| t.liquidity_net)
        .sum();

    let lower_liquidity = (current - below).max(0);
    let upper_liquidity = (current + above).max(0);

    if lower_edge > MIN_TICK {
        ticks.insert(0, TickInfo { index: lower_edge, liquidity_net: lower_liquidity });
    }
    if upper_edge < MAX_TICK {
        ticks.push(TickInfo { index: upper_edge, liquidity_net: -upper_liquidity });
    }
    ticks
}

// ============================================
// MULTICALL3 SNAPSHOT FETCHER
// ============================================

pub struct RpcSnapshotSource {
    rpc_url: String,
    tokens: Vec<Address>,
    v3_fee_tiers: Vec<u32>,
    balancer_pool_ids: Vec<B256>,
    tick_window_words: i16,
    twap_period_secs: u32,
    block: Option<u64>,
}

impl RpcSnapshotSource {
    /// Fetch state for `tokens` (plus the configured connectors) at `block` (latest if None)
    pub fn new(config: &PricerConfig, tokens: Vec<Address>, block: Option<u64>) -> Self {
        let mut universe = tokens;
        for connector in config.connector_addresses() {
            if !universe.contains(&connector) {
                universe.push(connector);
            }
        }
        Self {
            rpc_url: config.rpc_url.clone(),
            tokens: universe,
            v3_fee_tiers: config.v3_fee_tiers.clone(),
            balancer_pool_ids: config.balancer_pool_id_values(),
            tick_window_words: config.tick_window_words.max(0),
            twap_period_secs: config.twap_period_secs,
            block,
        }
    }

    /// Execute one Multicall3 batch at `block`
    async fn execute_multicall<P: Provider>(
        provider: &P,
        block: BlockId,
        calls: Vec<IMulticall3::Call3>,
    ) -> Result<Vec<IMulticall3::Result>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let calldata = IMulticall3::aggregate3Call { calls }.abi_encode();
        let tx = TransactionRequest::default()
            .to(MULTICALL3)
            .input(calldata.into());

        let result = provider
            .call(tx)
            .block(block)
            .await
            .map_err(|e| eyre!("Multicall3 failed: {}", e))?;

        IMulticall3::aggregate3Call::abi_decode_returns(&result)
            .map_err(|e| eyre!("Failed to decode multicall result: {}", e))
    }

    /// Split into batches, run them concurrently, keep call order
    async fn multicall<P: Provider>(
        provider: &P,
        block: BlockId,
        calls: Vec<IMulticall3::Call3>,
    ) -> Result<Vec<IMulticall3::Result>> {
        let batches = calls
            .chunks(MAX_CALLS_PER_BATCH)
            .map(|chunk| Self::execute_multicall(provider, block, chunk.to_vec()));
        let results = futures::future::try_join_all(batches).await?;
        Ok(results.into_iter().flatten().collect())
    }

    async fn fetch_timestamp<P: Provider>(provider: &P, block: BlockId) -> Result<u64> {
        let calls = vec![call3(MULTICALL3, &IMulticall3::getCurrentBlockTimestampCall {})];
        let results = Self::multicall(provider, block, calls).await?;
        let timestamp = decode::<IMulticall3::getCurrentBlockTimestampCall>(results.first())
            .ok_or_else(|| eyre!("Failed to read block timestamp"))?;
        Ok(timestamp.saturating_to::<u64>())
    }

    /// Token metadata, cached forever
    async fn fetch_tokens<P: Provider>(provider: &P, block: BlockId, addresses: &[Address]) -> Result<Vec<Token>> {
        let uncached: Vec<Address> = {
            let cache = TOKEN_CACHE.read().await;
            uncached_tokens(&cache, addresses)
        };

        if !uncached.is_empty() {
            let mut calls = Vec::with_capacity(uncached.len() * 2);
            for token in &uncached {
                calls.push(call3(*token, &IERC20Metadata::decimalsCall {}));
                calls.push(call3(*token, &IERC20Metadata::symbolCall {}));
            }
            let results = Self::multicall(provider, block, calls).await?;

            let mut cache = TOKEN_CACHE.write().await;
            for (i, address) in uncached.iter().enumerate() {
                let decimals = decode::<IERC20Metadata::decimalsCall>(results.get(i * 2))
                    .or_else(|| tokens::known_decimals(address));
                let symbol = decode::<IERC20Metadata::symbolCall>(results.get(i * 2 + 1))
                    .unwrap_or_else(|| tokens::format_token(address));
                match decimals {
                    Some(decimals) => {
                        cache.insert(*address, Token::new(&symbol, *address, decimals));
                    }
                    None => warn!("⚠️ No decimals for token {:?}, skipping", address),
                }
            }
        }

        let cache = TOKEN_CACHE.read().await;
        Ok(addresses.iter().filter_map(|a| cache.get(a).cloned()).collect())
    }

    /// V2 and Sushi pairs for every token pair
    async fn fetch_v2_pairs<P: Provider>(
        provider: &P,
        block: BlockId,
        pairs: &[(Address, Address)],
    ) -> Result<Vec<ConstantProductPair>> {
        let factories = [(V2Dex::UniswapV2, UNISWAP_V2_FACTORY), (V2Dex::SushiSwap, SUSHISWAP_FACTORY)];

        let mut calls = Vec::new();
        let mut keys = Vec::new();
        for (dex, factory) in factories {
            for (a, b) in pairs {
                calls.push(call3(factory, &IUniswapV2Factory::getPairCall { tokenA: *a, tokenB: *b }));
                keys.push((dex, *a, *b));
            }
        }
        let results = Self::multicall(provider, block, calls).await?;

        let found: Vec<(V2Dex, Address, Address, Address)> = keys
            .into_iter()
            .enumerate()
            .filter_map(|(i, (dex, a, b))| {
                let pair = decode::<IUniswapV2Factory::getPairCall>(results.get(i))?;
                (pair != Address::ZERO).then_some((dex, pair, a, b))
            })
            .collect();

        let calls = found
            .iter()
            .map(|(_, pair, _, _)| call3(*pair, &IUniswapV2Pair::getReservesCall {}))
            .collect();
        let results = Self::multicall(provider, block, calls).await?;

        let mut out = Vec::new();
        for (i, (dex, pair, token0, token1)) in found.into_iter().enumerate() {
            if let Some(reserves) = decode::<IUniswapV2Pair::getReservesCall>(results.get(i)) {
                out.push(ConstantProductPair {
                    address: pair,
                    dex,
                    token0,
                    token1,
                    reserve0: U256::from(reserves.reserve0),
                    reserve1: U256::from(reserves.reserve1),
                });
            }
        }
        Ok(out)
    }

    /// V3 pools per fee tier, with ticks around the price and the TWAP window cumulatives
    async fn fetch_v3_pools<P: Provider>(
        &self,
        provider: &P,
        block: BlockId,
        pairs: &[(Address, Address)],
    ) -> Result<Vec<UniV3Pool>> {
        // ---- discovery ----
        let mut calls = Vec::new();
        let mut keys = Vec::new();
        for (a, b) in pairs {
            for fee in &self.v3_fee_tiers {
                calls.push(call3(
                    UNISWAP_V3_FACTORY,
                    &IUniswapV3Factory::getPoolCall { tokenA: *a, tokenB: *b, fee: U24::from(*fee) },
                ));
                keys.push((*a, *b, *fee));
            }
        }
        let results = Self::multicall(provider, block, calls).await?;
        let found: Vec<(Address, Address, Address, u32)> = keys
            .into_iter()
            .enumerate()
            .filter_map(|(i, (a, b, fee))| {
                let pool = decode::<IUniswapV3Factory::getPoolCall>(results.get(i))?;
                (pool != Address::ZERO).then_some((pool, a, b, fee))
            })
            .collect();

        // ---- state: slot0, liquidity, spacing (cached), observe ----
        let cached = V3_CACHE.read().await.clone();
        let seconds_agos = vec![self.twap_period_secs, 0];
        let mut calls = Vec::new();
        for (pool, _, _, _) in &found {
            calls.push(call3(*pool, &IUniswapV3Pool::slot0Call {}));
            calls.push(call3(*pool, &IUniswapV3Pool::liquidityCall {}));
            calls.push(call3(*pool, &IUniswapV3Pool::tickSpacingCall {}));
            calls.push(call3(*pool, &IUniswapV3Pool::observeCall { secondsAgos: seconds_agos.clone() }));
        }
        let results = Self::multicall(provider, block, calls).await?;
        let timestamp = Self::fetch_timestamp(provider, block).await?;

        let mut pools = Vec::new();
        for (i, (address, token0, token1, fee)) in found.into_iter().enumerate() {
            let offset = i * 4;
            let slot0 = match decode::<IUniswapV3Pool::slot0Call>(results.get(offset)) {
                Some(slot0) => slot0,
                None => {
                    debug!("slot0 failed for {:?}", address);
                    continue;
                }
            };
            let liquidity = decode::<IUniswapV3Pool::liquidityCall>(results.get(offset + 1)).unwrap_or(0);
            let tick_spacing = match cached.get(&address) {
                Some(data) => data.tick_spacing,
                None => match decode::<IUniswapV3Pool::tickSpacingCall>(results.get(offset + 2)) {
                    Some(spacing) => spacing.as_i32(),
                    None => continue,
                },
            };
            if tick_spacing <= 0 {
                continue;
            }

            let observations = match decode::<IUniswapV3Pool::observeCall>(results.get(offset + 3)) {
                Some(observed)
                    if observed.tickCumulatives.len() == 2
                        && observed.secondsPerLiquidityCumulativeX128s.len() == 2 =>
                {
                    vec![
                        Observation {
                            block_timestamp: timestamp.saturating_sub(u64::from(self.twap_period_secs)),
                            tick_cumulative: observed.tickCumulatives[0].as_i64(),
                            seconds_per_liquidity_cumulative_x128: U256::from(
                                observed.secondsPerLiquidityCumulativeX128s[0],
                            ),
                        },
                        Observation {
                            block_timestamp: timestamp,
                            tick_cumulative: observed.tickCumulatives[1].as_i64(),
                            seconds_per_liquidity_cumulative_x128: U256::from(
                                observed.secondsPerLiquidityCumulativeX128s[1],
                            ),
                        },
                    ]
                }
                // observe reverts ("OLD") when the window predates the oldest observation
                _ => vec![],
            };

            pools.push(UniV3Pool {
                address,
                token0,
                token1,
                fee,
                tick_spacing,
                sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
                tick: slot0.tick.as_i32(),
                liquidity,
                ticks: vec![],
                observations,
                observation_cardinality: slot0.observationCardinality.max(2),
            });
        }

        {
            let mut cache = V3_CACHE.write().await;
            for pool in &pools {
                cache.insert(pool.address, CachedV3Data { tick_spacing: pool.tick_spacing });
            }
        }

        // ---- tick bitmap words around the current tick ----
        let window = i32::from(self.tick_window_words);
        let mut calls = Vec::new();
        let mut word_keys = Vec::new();
        for (index, pool) in pools.iter().enumerate() {
            let center = word_position(pool.tick, pool.tick_spacing);
            for word in (center - window)..=(center + window) {
                let Ok(word) = i16::try_from(word) else { continue };
                calls.push(call3(pool.address, &IUniswapV3Pool::tickBitmapCall { wordPosition: word }));
                word_keys.push((index, word));
            }
        }
        let results = Self::multicall(provider, block, calls).await?;

        let mut tick_keys = Vec::new();
        for (i, (index, word)) in word_keys.iter().enumerate() {
            let Some(bitmap) = decode::<IUniswapV3Pool::tickBitmapCall>(results.get(i)) else { continue };
            if bitmap.is_zero() {
                continue;
            }
            let spacing = pools[*index].tick_spacing;
            for bit in 0..256usize {
                if bitmap.bit(bit) {
                    let tick = (i32::from(*word) * 256 + bit as i32) * spacing;
                    tick_keys.push((*index, tick));
                }
            }
        }

        // ---- initialized ticks ----
        let mut calls = Vec::new();
        for (index, tick) in &tick_keys {
            let Ok(tick_arg) = I24::try_from(*tick) else { continue };
            calls.push(call3(pools[*index].address, &IUniswapV3Pool::ticksCall { tick: tick_arg }));
        }
        let results = Self::multicall(provider, block, calls).await?;

        let mut ticks_by_pool: HashMap<usize, Vec<TickInfo>> = HashMap::new();
        for (i, (index, tick)) in tick_keys.iter().enumerate() {
            if let Some(info) = decode::<IUniswapV3Pool::ticksCall>(results.get(i)) {
                if info.initialized {
                    ticks_by_pool
                        .entry(*index)
                        .or_default()
                        .push(TickInfo { index: *tick, liquidity_net: info.liquidityNet });
                }
            }
        }

        for (index, pool) in pools.iter_mut().enumerate() {
            let center = word_position(pool.tick, pool.tick_spacing);
            let lower_edge = ((center - window) * 256 * pool.tick_spacing).max(MIN_TICK);
            let upper_edge = (((center + window + 1) * 256 - 1) * pool.tick_spacing).min(MAX_TICK);
            let ticks = ticks_by_pool.remove(&index).unwrap_or_default();
            pool.ticks = close_tick_window(ticks, pool.tick, pool.liquidity, lower_edge, upper_edge);
        }

        Ok(pools)
    }

    /// Configured Balancer pools through the Vault
    async fn fetch_balancer_pools<P: Provider>(&self, provider: &P, block: BlockId) -> Result<Vec<BalancerPool>> {
        if self.balancer_pool_ids.is_empty() {
            return Ok(vec![]);
        }

        let cached = BALANCER_ADDRESS_CACHE.read().await.clone();
        let mut calls = Vec::new();
        for id in &self.balancer_pool_ids {
            calls.push(call3(BALANCER_VAULT, &IBalancerVault::getPoolCall { poolId: *id }));
            calls.push(call3(BALANCER_VAULT, &IBalancerVault::getPoolTokensCall { poolId: *id }));
        }
        let results = Self::multicall(provider, block, calls).await?;

        let mut partial = Vec::new();
        for (i, id) in self.balancer_pool_ids.iter().enumerate() {
            let address = match cached.get(id) {
                Some(address) => *address,
                None => match decode::<IBalancerVault::getPoolCall>(results.get(i * 2)) {
                    Some(pool) => pool._0,
                    None => {
                        warn!("⚠️ Balancer pool {} not found", id);
                        continue;
                    }
                },
            };
            if let Some(state) = decode::<IBalancerVault::getPoolTokensCall>(results.get(i * 2 + 1)) {
                partial.push((*id, address, state.tokens, state.balances));
            }
        }

        {
            let mut cache = BALANCER_ADDRESS_CACHE.write().await;
            for (id, address, _, _) in &partial {
                cache.insert(*id, *address);
            }
        }

        let mut calls = Vec::new();
        for (_, address, _, _) in &partial {
            calls.push(call3(*address, &IBalancerPool::getSwapFeePercentageCall {}));
            calls.push(call3(*address, &IBalancerPool::getNormalizedWeightsCall {}));
            calls.push(call3(*address, &IBalancerPool::getAmplificationParameterCall {}));
        }
        let results = Self::multicall(provider, block, calls).await?;

        let mut all_tokens: Vec<Address> = partial.iter().flat_map(|(_, _, t, _)| t.clone()).collect();
        all_tokens.sort();
        all_tokens.dedup();
        let metadata = Self::fetch_tokens(provider, block, &all_tokens).await?;

        let mut pools = Vec::new();
        for (i, (id, address, pool_tokens, balances)) in partial.into_iter().enumerate() {
            let offset = i * 3;
            let Some(swap_fee) = decode::<IBalancerPool::getSwapFeePercentageCall>(results.get(offset)) else {
                continue;
            };
            let kind = if let Some(weights) = decode::<IBalancerPool::getNormalizedWeightsCall>(results.get(offset + 1)) {
                BalancerPoolKind::Weighted { weights }
            } else if let Some(amp) = decode::<IBalancerPool::getAmplificationParameterCall>(results.get(offset + 2)) {
                BalancerPoolKind::Stable { amplification: amp.value }
            } else {
                debug!("Balancer pool {} is neither weighted nor stable", id);
                continue;
            };

            let decimals: Option<Vec<u8>> = pool_tokens
                .iter()
                .map(|t| metadata.iter().find(|m| m.address == *t).map(|m| m.decimals))
                .collect();
            let Some(decimals) = decimals else { continue };

            pools.push(BalancerPool {
                id,
                address,
                kind,
                tokens: pool_tokens,
                balances,
                decimals,
                swap_fee,
            });
        }
        Ok(pools)
    }

    /// FeedRegistry rounds for every token against USD/ETH/BTC, plus the reference feeds
    async fn fetch_feeds<P: Provider>(provider: &P, block: BlockId, tokens: &[Address]) -> Result<FeedRegistry> {
        let mut keys: Vec<(Address, Address)> = vec![
            (ETH_DENOMINATION, USD_DENOMINATION),
            (BTC_DENOMINATION, USD_DENOMINATION),
            (BTC_DENOMINATION, ETH_DENOMINATION),
        ];
        for token in tokens {
            let base = tokens::feed_denomination(token);
            for quote in [USD_DENOMINATION, ETH_DENOMINATION, BTC_DENOMINATION] {
                if base != quote && !keys.contains(&(base, quote)) {
                    keys.push((base, quote));
                }
            }
        }

        let mut calls = Vec::with_capacity(keys.len() * 2);
        for (base, quote) in &keys {
            calls.push(call3(FEED_REGISTRY, &IFeedRegistry::latestRoundDataCall { base: *base, quote: *quote }));
            calls.push(call3(FEED_REGISTRY, &IFeedRegistry::decimalsCall { base: *base, quote: *quote }));
        }
        let results = Self::multicall(provider, block, calls).await?;

        let mut registry = FeedRegistry::default();
        for (i, (base, quote)) in keys.into_iter().enumerate() {
            let round = decode::<IFeedRegistry::latestRoundDataCall>(results.get(i * 2));
            let decimals = decode::<IFeedRegistry::decimalsCall>(results.get(i * 2 + 1));
            if let (Some(round), Some(decimals)) = (round, decimals) {
                let Ok(answer) = round.answer.to_string().parse::<i128>() else { continue };
                registry.upsert(PriceFeed {
                    base,
                    quote,
                    answer,
                    decimals,
                    updated_at: round.updatedAt.saturating_to::<u64>(),
                    heartbeat_secs: None,
                });
            }
        }
        Ok(registry)
    }

    /// Fetch everything (main entry point)
    pub async fn fetch(&self) -> Result<MarketSnapshot> {
        let start = Instant::now();
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.parse()?);

        let block_number = match self.block {
            Some(number) => number,
            None => provider.get_block_number().await?,
        };
        let block = BlockId::number(block_number);
        let timestamp = Self::fetch_timestamp(&provider, block).await?;

        let tokens = Self::fetch_tokens(&provider, block, &self.tokens).await?;
        let pairs = token_pairs(&self.tokens);

        let v2_pairs = Self::fetch_v2_pairs(&provider, block, &pairs).await?;
        let v3_pools = self.fetch_v3_pools(&provider, block, &pairs).await?;
        let balancer_pools = self.fetch_balancer_pools(&provider, block).await?;
        let feeds = Self::fetch_feeds(&provider, block, &self.tokens).await?;

        let mut snapshot = MarketSnapshot {
            block_number,
            timestamp,
            tokens,
            pairs: v2_pairs,
            v3_pools,
            balancer_pools,
            feeds,
        };

        // Balancer pool tokens outside the query universe still need metadata
        let extra: Vec<Address> = snapshot
            .balancer_pools
            .iter()
            .flat_map(|p| p.tokens.clone())
            .filter(|t| snapshot.token(t).is_none())
            .collect();
        if !extra.is_empty() {
            let more = Self::fetch_tokens(&provider, block, &extra).await?;
            for token in more {
                if snapshot.token(&token.address).is_none() {
                    snapshot.tokens.push(token);
                }
            }
        }

        info!("⚡ Multicall3 snapshot in {:?}: {}", start.elapsed(), snapshot.summary());
        Ok(snapshot)
    }
}

impl SnapshotSource for RpcSnapshotSource {
    async fn load(&self) -> Result<MarketSnapshot> {
        self.fetch().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{USDC, WETH};

    #[test]
    fn test_uncached_tokens_skips_cached_metadata() {
        let mut cache = HashMap::new();
        cache.insert(WETH, Token::new("WETH", WETH, 18));
        assert_eq!(uncached_tokens(&cache, &[USDC, WETH]), vec![USDC]);
        assert!(uncached_tokens(&cache, &[WETH]).is_empty());
    }

    #[test]
    fn test_token_pairs_are_sorted_and_unique() {
        let pairs = token_pairs(&[WETH, USDC, WETH]);
        assert_eq!(pairs.len(), 1);
        let (a, b) = pairs[0];
        assert!(a < b);
    }

    #[test]
    fn test_word_position_rounds_down() {
        assert_eq!(word_position(0, 60), 0);
        assert_eq!(word_position(60 * 255, 60), 0);
        assert_eq!(word_position(60 * 256, 60), 1);
        assert_eq!(word_position(-1, 60), -1);
        assert_eq!(word_position(-60 * 256, 60), -1);
        assert_eq!(word_position(-60 * 256 - 1, 60), -2);
    }

    #[test]
    fn test_close_tick_window_zeroes_liquidity_outside() {
        // current tick 0 with 1000 active; one range [-120, 120] of 400 inside the window
        let ticks = vec![
            TickInfo { index: -120, liquidity_net: 400 },
            TickInfo { index: 120, liquidity_net: -400 },
            // outside the window, dropped
            TickInfo { index: 50_000, liquidity_net: 7 },
        ];
        let closed = close_tick_window(ticks, 0, 1000, -15_360, 15_300);

        assert_eq!(closed.first().map(|t| t.index), Some(-15_360));
        assert_eq!(closed.last().map(|t| t.index), Some(15_300));

        // walking down: 1000 - 400 = 600 left at the lower edge
        assert_eq!(closed[0].liquidity_net, 600);
        // walking up: 1000 - 400 = 600 left at the upper edge
        assert_eq!(closed.last().map(|t| t.liquidity_net), Some(-600));
        assert_eq!(closed.len(), 4);
    }

    #[test]
    fn test_close_tick_window_keeps_full_range_edges() {
        let closed = close_tick_window(vec![], 0, 10, MIN_TICK, MAX_TICK);
        assert!(closed.is_empty());
    }
}
