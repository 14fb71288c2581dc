//! On-chain pricer
//!
//! Quotes every venue that can fill a swap against one market snapshot and
//! keeps the best. "No liquidity" is a zero quote, never an error; the only
//! error that escapes the search is a stale feed on the cross-check path.

use alloy_primitives::{Address, B256, U256};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::venue::{Route, V3Leg, VenueKind};
use crate::config::{PricerConfig, QuoteLog, MAX_BPS};
use crate::error::{PricingError, PricingResult};
use crate::oracle::{OracleConfig, PriceOracle, TwapGuard};
use crate::simulator::math::{checked_mul, mul_div, pow10};
use crate::simulator::{BalancerSwapResult, InRangeQuote, Quote, SimulationMode, UniV3Pool, V2Dex, V3SwapResult};
use crate::snapshot::MarketSnapshot;

// ============================================
// PROBE GAS MODEL
// ============================================

/// Fixed cost of one router invocation
pub const PRICER_BASE_GAS: u64 = 10_000;

/// Factory lookup plus reserves read
pub const V2_LOOKUP_GAS: u64 = 9_000;

/// Pool lookup plus slot0/liquidity reads
pub const V3_POOL_LOOKUP_GAS: u64 = 5_000;

/// One tick range simulated
pub const V3_STEP_GAS: u64 = 6_000;

/// Oracle observations read by the TWAP guard
pub const TWAP_CHECK_GAS: u64 = 12_000;

/// Vault getPoolTokens plus pool parameters
pub const BALANCER_LOOKUP_GAS: u64 = 20_000;

pub const FEED_READ_GAS: u64 = 8_000;

/// What an unsafe probe did, and what that would roughly cost on chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub venues_queried: u32,
    pub v2_lookups: u32,
    pub v3_pools_simulated: u32,
    pub v3_steps: u64,
    pub twap_checks: u32,
    pub balancer_lookups: u32,
    pub feed_reads: u32,
}

impl ProbeReport {
    pub fn gas_equivalent(&self) -> u64 {
        PRICER_BASE_GAS
            + V2_LOOKUP_GAS * u64::from(self.v2_lookups)
            + V3_POOL_LOOKUP_GAS * u64::from(self.v3_pools_simulated)
            + V3_STEP_GAS * self.v3_steps
            + TWAP_CHECK_GAS * u64::from(self.twap_checks)
            + BALANCER_LOOKUP_GAS * u64::from(self.balancer_lookups)
            + FEED_READ_GAS * u64::from(self.feed_reads)
    }
}

// ============================================
// RESULTS
// ============================================

/// The router's answer for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapQuote {
    pub venue: VenueKind,
    /// Output after the lenient haircut (equal to `quote.amount_out` when none is configured)
    pub amount_out: U256,
    pub quote: Quote,
    /// Feed-derived estimate, when the cross-check ran
    pub oracle_estimate: Option<U256>,
}

impl SwapQuote {
    pub fn is_viable(&self) -> bool {
        !self.amount_out.is_zero()
    }
}

/// Arguments of a two-hop V3 quote; a fee of `None` or `Some(0)` searches every tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniV3ConnectorParams {
    pub sell: Address,
    pub buy: Address,
    pub amount_in: U256,
    pub connector: Address,
    pub fee_first: Option<u32>,
    pub fee_second: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedPool {
    pub pool: Address,
    pub fee: u32,
    pub amount_out: U256,
    pub trusted: bool,
}

/// V3 pools for a pair, best output first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniV3Ranking {
    pub pools: Vec<RankedPool>,
}

impl UniV3Ranking {
    pub fn best(&self) -> Option<&RankedPool> {
        self.pools.first()
    }
}

fn keep_best(best: &mut Quote, candidate: Option<Quote>) {
    if let Some(candidate) = candidate {
        // strictly greater: on a tie the earlier (lower id) venue stays
        if candidate.amount_out > best.amount_out {
            *best = candidate;
        }
    }
}

fn non_zero(fee: Option<u32>) -> Option<u32> {
    fee.filter(|f| *f != 0)
}

// ============================================
// PRICER
// ============================================

pub struct OnChainPricer<'a> {
    snapshot: &'a MarketSnapshot,
    config: &'a PricerConfig,
    guard: TwapGuard,
}

impl<'a> OnChainPricer<'a> {
    pub fn new(snapshot: &'a MarketSnapshot, config: &'a PricerConfig) -> Self {
        Self {
            snapshot,
            config,
            guard: TwapGuard::from(config),
        }
    }

    pub fn snapshot(&self) -> &MarketSnapshot {
        self.snapshot
    }

    /// Feed reader at the snapshot's block time
    pub fn oracle(&self) -> PriceOracle<'a> {
        PriceOracle::new(&self.snapshot.feeds, OracleConfig::from(self.config), self.snapshot.timestamp)
    }

    // ============================================
    // ENTRY POINTS
    // ============================================

    /// Best executable swap across all venues
    pub fn find_optimal_swap(&self, sell: &Address, buy: &Address, amount_in: U256) -> PricingResult<SwapQuote> {
        let (quote, _) = self.find_with_mode(sell, buy, amount_in, SimulationMode::View)?;
        Ok(quote)
    }

    /// Same selection, also reporting what the search touched
    pub fn unsafe_find_executable_swap(
        &self,
        sell: &Address,
        buy: &Address,
        amount_in: U256,
    ) -> PricingResult<(ProbeReport, SwapQuote)> {
        let (quote, probe) = self.find_with_mode(sell, buy, amount_in, SimulationMode::Unsafe)?;
        Ok((probe, quote))
    }

    fn find_with_mode(
        &self,
        sell: &Address,
        buy: &Address,
        amount_in: U256,
        mode: SimulationMode,
    ) -> PricingResult<(SwapQuote, ProbeReport)> {
        let mut probe = ProbeReport::default();
        let quote = self.search(sell, buy, amount_in, &mut probe);

        let mut swap = SwapQuote {
            venue: quote.route.kind(),
            amount_out: self.apply_haircut(quote.amount_out)?,
            quote,
            oracle_estimate: None,
        };

        if self.config.feed_cross_check && swap.is_viable() {
            probe.feed_reads += 2;
            let estimate = self.feed_estimate(sell, buy, amount_in)?;
            self.flag_deviation(sell, buy, &swap, estimate)?;
            swap.oracle_estimate = Some(estimate);
        }

        match mode {
            SimulationMode::View => debug!(
                "{} -> {}: {} via {} (gas {})",
                self.snapshot.symbol(sell),
                self.snapshot.symbol(buy),
                swap.amount_out,
                swap.venue,
                swap.quote.gas_estimate
            ),
            SimulationMode::Unsafe => info!(
                "🔍 Probe {} -> {}: {} via {}, {} venues, ~{} gas",
                self.snapshot.symbol(sell),
                self.snapshot.symbol(buy),
                swap.amount_out,
                swap.venue,
                probe.venues_queried,
                probe.gas_equivalent()
            ),
        }

        self.log_quote(sell, buy, &swap);
        Ok((swap, probe))
    }

    /// Candidates in venue-id order; the first maximum wins
    fn search(&self, sell: &Address, buy: &Address, amount_in: U256, probe: &mut ProbeReport) -> Quote {
        let mut best = Quote::none(amount_in);
        if sell == buy || amount_in.is_zero() {
            return best;
        }

        probe.venues_queried += 2;
        keep_best(&mut best, self.quote_v2(V2Dex::UniswapV2, sell, buy, amount_in, probe));
        keep_best(&mut best, self.quote_v2(V2Dex::SushiSwap, sell, buy, amount_in, probe));

        probe.venues_queried += 1;
        keep_best(&mut best, self.quote_univ3(sell, buy, amount_in, probe));

        let connectors = self.config.connector_addresses();
        for connector in &connectors {
            probe.venues_queried += 1;
            keep_best(
                &mut best,
                self.quote_univ3_connector(sell, buy, amount_in, connector, [None, None], probe),
            );
        }

        probe.venues_queried += 1;
        keep_best(&mut best, self.quote_balancer(sell, buy, amount_in, probe));

        for connector in &connectors {
            probe.venues_queried += 1;
            keep_best(&mut best, self.quote_balancer_connector(sell, buy, amount_in, connector, probe));
        }

        best
    }

    fn apply_haircut(&self, amount_out: U256) -> PricingResult<U256> {
        if self.config.slippage_bps == 0 || amount_out.is_zero() {
            return Ok(amount_out);
        }
        let keep = MAX_BPS.saturating_sub(self.config.slippage_bps);
        let cut = mul_div(amount_out, U256::from(keep), U256::from(MAX_BPS))?;
        // a viable route never reports a zero output
        Ok(cut.max(U256::from(1u8)))
    }

    fn flag_deviation(&self, sell: &Address, buy: &Address, swap: &SwapQuote, estimate: U256) -> PricingResult<()> {
        if estimate.is_zero() {
            return Ok(());
        }
        let diff = if swap.amount_out > estimate {
            swap.amount_out - estimate
        } else {
            estimate - swap.amount_out
        };
        let deviation_bps = mul_div(diff, U256::from(MAX_BPS), estimate)?;
        if deviation_bps > U256::from(self.config.max_feed_deviation_bps) {
            warn!(
                "⚠️ {} -> {} via {}: quote {} deviates {} bps from feed estimate {}",
                self.snapshot.symbol(sell),
                self.snapshot.symbol(buy),
                swap.venue,
                swap.amount_out,
                deviation_bps,
                estimate
            );
        }
        Ok(())
    }

    fn log_quote(&self, sell: &Address, buy: &Address, swap: &SwapQuote) {
        if !self.config.quote_log || !swap.is_viable() {
            return;
        }
        let entry = QuoteLog {
            timestamp: Utc::now(),
            block_number: self.snapshot.block_number,
            sell: self.snapshot.symbol(sell),
            buy: self.snapshot.symbol(buy),
            amount_in: swap.quote.amount_in.to_string(),
            amount_out: swap.amount_out.to_string(),
            venue: swap.venue.to_string(),
            venue_id: swap.venue.id(),
            gas_estimate: swap.quote.gas_estimate,
            oracle_estimate: swap.oracle_estimate.map(|e| e.to_string()),
        };
        if let Err(e) = entry.append_to_file(&self.config.quote_log_path) {
            warn!("Failed to write quote log: {}", e);
        }
    }

    // ============================================
    // UNISWAP V2 / SUSHISWAP
    // ============================================

    fn quote_v2(
        &self,
        dex: V2Dex,
        sell: &Address,
        buy: &Address,
        amount_in: U256,
        probe: &mut ProbeReport,
    ) -> Option<Quote> {
        probe.v2_lookups += 1;
        let pair = self.snapshot.pair(dex, sell, buy)?;
        match pair.simulate_swap(sell, amount_in) {
            Ok(result) if !result.amount_out.is_zero() => Some(Quote {
                route: match dex {
                    V2Dex::UniswapV2 => Route::UniswapV2 { pair: pair.address },
                    V2Dex::SushiSwap => Route::SushiSwap { pair: pair.address },
                },
                amount_in,
                amount_out: result.amount_out,
                gas_estimate: result.gas_estimate,
                fee_tiers: vec![],
            }),
            Ok(_) => None,
            Err(e) => {
                debug!("{} pair {:?} failed: {}", dex, pair.address, e);
                None
            }
        }
    }

    /// Output of the `dex` pair for (sell, buy), zero when there is none
    pub fn get_uni_price(&self, dex: V2Dex, sell: &Address, buy: &Address, amount_in: U256) -> U256 {
        let mut probe = ProbeReport::default();
        self.quote_v2(dex, sell, buy, amount_in, &mut probe)
            .map(|q| q.amount_out)
            .unwrap_or(U256::ZERO)
    }

    // ============================================
    // UNISWAP V3
    // ============================================

    fn pool_trusted(&self, pool: &UniV3Pool, probe: &mut ProbeReport) -> bool {
        if !self.config.twap_check {
            return true;
        }
        probe.twap_checks += 1;
        self.guard
            .check_univ3_pool_oracle(Some(pool), pool.liquidity, self.snapshot.timestamp)
    }

    /// Best trusted pool for one hop, over `fee` or every configured tier
    fn best_v3_leg(
        &self,
        sell: &Address,
        buy: &Address,
        amount_in: U256,
        fee: Option<u32>,
        probe: &mut ProbeReport,
    ) -> Option<(V3Leg, V3SwapResult)> {
        if sell == buy || amount_in.is_zero() {
            return None;
        }
        let tiers = match fee {
            Some(fee) => vec![fee],
            None => self.config.v3_fee_tiers.clone(),
        };

        let mut best: Option<(V3Leg, V3SwapResult)> = None;
        for fee in tiers {
            let Some(pool) = self.snapshot.v3_pool(sell, buy, fee) else {
                continue;
            };
            if !self.pool_trusted(pool, probe) {
                continue;
            }
            probe.v3_pools_simulated += 1;
            match pool.simulate_swap(sell, amount_in) {
                Ok(result) => {
                    probe.v3_steps += u64::from(result.steps);
                    if result.amount_out.is_zero() {
                        continue;
                    }
                    if best.as_ref().map_or(true, |(_, b)| result.amount_out > b.amount_out) {
                        best = Some((V3Leg { pool: pool.address, fee }, result));
                    }
                }
                Err(e) => debug!("v3 pool {:?} failed: {}", pool.address, e),
            }
        }
        best
    }

    fn quote_univ3(&self, sell: &Address, buy: &Address, amount_in: U256, probe: &mut ProbeReport) -> Option<Quote> {
        let (leg, result) = self.best_v3_leg(sell, buy, amount_in, None, probe)?;
        Some(Quote {
            route: Route::UniswapV3 { pool: leg.pool, fee: leg.fee },
            amount_in,
            amount_out: result.amount_out,
            gas_estimate: result.gas_estimate,
            fee_tiers: vec![leg.fee],
        })
    }

    fn quote_univ3_connector(
        &self,
        sell: &Address,
        buy: &Address,
        amount_in: U256,
        connector: &Address,
        fees: [Option<u32>; 2],
        probe: &mut ProbeReport,
    ) -> Option<Quote> {
        if connector == sell || connector == buy {
            return None;
        }
        let (first, first_result) = self.best_v3_leg(sell, connector, amount_in, fees[0], probe)?;
        let (second, second_result) = self.best_v3_leg(connector, buy, first_result.amount_out, fees[1], probe)?;
        Some(Quote {
            route: Route::UniswapV3WithConnector {
                connector: *connector,
                legs: [first, second],
            },
            amount_in,
            amount_out: second_result.amount_out,
            gas_estimate: first_result.gas_estimate + second_result.gas_estimate,
            fee_tiers: vec![first.fee, second.fee],
        })
    }

    /// Best trusted direct V3 output and its fee tier; `(0, 0)` without a pool
    pub fn get_univ3_price(&self, sell: &Address, buy: &Address, amount_in: U256) -> (U256, u32) {
        let mut probe = ProbeReport::default();
        match self.best_v3_leg(sell, buy, amount_in, None, &mut probe) {
            Some((leg, result)) => (result.amount_out, leg.fee),
            None => (U256::ZERO, 0),
        }
    }

    /// Two-hop V3 output through `params.connector` and the fee tier used per leg
    pub fn get_univ3_price_with_connector(&self, params: UniV3ConnectorParams) -> (U256, [u32; 2]) {
        let mut probe = ProbeReport::default();
        let fees = [non_zero(params.fee_first), non_zero(params.fee_second)];
        match self.quote_univ3_connector(&params.sell, &params.buy, params.amount_in, &params.connector, fees, &mut probe) {
            Some(quote) => {
                let [first, second] = match quote.route {
                    Route::UniswapV3WithConnector { legs, .. } => [legs[0].fee, legs[1].fee],
                    _ => [0, 0],
                };
                (quote.amount_out, [first, second])
            }
            None => (U256::ZERO, [0, 0]),
        }
    }

    /// Simulate one known pool without the guard: `(gas, amount_out)`
    pub fn simulate_univ3_swap(&self, pool: &Address, sell: &Address, amount_in: U256) -> PricingResult<(u64, U256)> {
        let pool = self
            .snapshot
            .v3_pool_by_address(pool)
            .ok_or_else(|| PricingError::UnknownPool(format!("{:?}", pool)))?;
        let result = pool.simulate_swap(sell, amount_in)?;
        Ok((result.gas_estimate, result.amount_out))
    }

    pub fn check_univ3_in_range_liquidity(
        &self,
        pool: &Address,
        sell: &Address,
        amount_in: U256,
    ) -> PricingResult<InRangeQuote> {
        let pool = self
            .snapshot
            .v3_pool_by_address(pool)
            .ok_or_else(|| PricingError::UnknownPool(format!("{:?}", pool)))?;
        pool.check_in_range_liquidity(sell, amount_in)
    }

    /// Every V3 pool for the pair ranked by simulated output
    pub fn sort_univ3_pools(&self, sell: &Address, amount_in: U256, buy: &Address) -> UniV3Ranking {
        let now = self.snapshot.timestamp;
        let mut pools: Vec<RankedPool> = self
            .snapshot
            .v3_pools_for(sell, buy)
            .filter_map(|pool| {
                let result = match pool.simulate_swap(sell, amount_in) {
                    Ok(result) => result,
                    Err(e) => {
                        debug!("v3 pool {:?} failed: {}", pool.address, e);
                        return None;
                    }
                };
                Some(RankedPool {
                    pool: pool.address,
                    fee: pool.fee,
                    amount_out: result.amount_out,
                    trusted: self
                        .guard
                        .check_univ3_pool_oracle(Some(pool), pool.liquidity, now),
                })
            })
            .collect();
        // stable sort keeps snapshot order among equal outputs
        pools.sort_by(|a, b| b.amount_out.cmp(&a.amount_out));
        UniV3Ranking { pools }
    }

    /// TWAP guard verdict for a pool in the snapshot; unknown pools are untrusted
    pub fn check_univ3_pool_oracle(&self, pool: &Address, current_liquidity: u128) -> bool {
        self.guard.check_univ3_pool_oracle(
            self.snapshot.v3_pool_by_address(pool),
            current_liquidity,
            self.snapshot.timestamp,
        )
    }

    // ============================================
    // BALANCER
    // ============================================

    fn best_balancer_leg(
        &self,
        sell: &Address,
        buy: &Address,
        amount_in: U256,
        exclude: Option<B256>,
        probe: &mut ProbeReport,
    ) -> Option<(B256, BalancerSwapResult)> {
        if amount_in.is_zero() {
            return None;
        }
        let mut best: Option<(B256, BalancerSwapResult)> = None;
        for pool in self.snapshot.balancer_pools_for(sell, buy) {
            if Some(pool.id) == exclude {
                continue;
            }
            probe.balancer_lookups += 1;
            match pool.simulate_swap(sell, buy, amount_in) {
                Ok(result) if !result.amount_out.is_zero() => {
                    if best.as_ref().map_or(true, |(_, b)| result.amount_out > b.amount_out) {
                        best = Some((pool.id, result));
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("balancer pool {} failed: {}", pool.id, e),
            }
        }
        best
    }

    fn quote_balancer(&self, sell: &Address, buy: &Address, amount_in: U256, probe: &mut ProbeReport) -> Option<Quote> {
        let (pool_id, result) = self.best_balancer_leg(sell, buy, amount_in, None, probe)?;
        Some(Quote {
            route: Route::Balancer { pool_id },
            amount_in,
            amount_out: result.amount_out,
            gas_estimate: result.gas_estimate,
            fee_tiers: vec![],
        })
    }

    fn quote_balancer_connector(
        &self,
        sell: &Address,
        buy: &Address,
        amount_in: U256,
        connector: &Address,
        probe: &mut ProbeReport,
    ) -> Option<Quote> {
        if connector == sell || connector == buy {
            return None;
        }
        let (first, first_result) = self.best_balancer_leg(sell, connector, amount_in, None, probe)?;
        // a pool holding all three tokens already shows up as a direct route
        let (second, second_result) =
            self.best_balancer_leg(connector, buy, first_result.amount_out, Some(first), probe)?;
        Some(Quote {
            route: Route::BalancerWithConnector {
                connector: *connector,
                pool_ids: [first, second],
            },
            amount_in,
            amount_out: second_result.amount_out,
            gas_estimate: first_result.gas_estimate + second_result.gas_estimate,
            fee_tiers: vec![],
        })
    }

    pub fn get_balancer_price(&self, sell: &Address, buy: &Address, amount_in: U256) -> U256 {
        let mut probe = ProbeReport::default();
        self.quote_balancer(sell, buy, amount_in, &mut probe)
            .map(|q| q.amount_out)
            .unwrap_or(U256::ZERO)
    }

    pub fn get_balancer_price_with_connector(
        &self,
        sell: &Address,
        buy: &Address,
        amount_in: U256,
        connector: &Address,
    ) -> U256 {
        let mut probe = ProbeReport::default();
        self.quote_balancer_connector(sell, buy, amount_in, connector, &mut probe)
            .map(|q| q.amount_out)
            .unwrap_or(U256::ZERO)
    }

    // ============================================
    // FEED ESTIMATE
    // ============================================

    /// amount * usd(sell) * 10^dec(buy) / (usd(buy) * 10^dec(sell)); stale feeds are errors
    fn feed_estimate(&self, sell: &Address, buy: &Address, amount_in: U256) -> PricingResult<U256> {
        let oracle = self.oracle();
        let sell_usd = oracle.fetch_usd_feed(sell)?;
        let buy_usd = oracle.fetch_usd_feed(buy)?;
        if sell_usd.is_zero() || buy_usd.is_zero() || amount_in.is_zero() {
            return Ok(U256::ZERO);
        }

        let numerator = checked_mul(amount_in, pow10(self.snapshot.decimals(buy)))?;
        let denominator = checked_mul(buy_usd, pow10(self.snapshot.decimals(sell)))?;
        mul_div(numerator, sell_usd, denominator)
    }

    /// Oracle-only estimate; zero when a feed is missing or stale
    pub fn try_quote_with_feed(&self, sell: &Address, buy: &Address, amount_in: U256) -> U256 {
        match self.feed_estimate(sell, buy, amount_in) {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!(
                    "⚠️ feed quote {} -> {} unavailable: {}",
                    self.snapshot.symbol(sell),
                    self.snapshot.symbol(buy),
                    e
                );
                U256::ZERO
            }
        }
    }
}
