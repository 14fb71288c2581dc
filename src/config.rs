//! Pricer Configuration
//!
//! All tunables for the router, TWAP guard and oracle adapter.
//! Loaded from environment variables (.env supported) or a TOML file.

use alloy_primitives::{Address, B256};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::PricingError;
use crate::tokens;

/// Basis-point denominator
pub const MAX_BPS: u32 = 10_000;

/// Uniswap V3 fee tiers searched by the router (hundredths of a bip)
pub const DEFAULT_V3_FEE_TIERS: [u32; 3] = [500, 3000, 10000];

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricerConfig {
    // ========== Network Settings ==========
    /// RPC URL used when building snapshots from the chain
    pub rpc_url: String,

    /// Chain ID (1 = Ethereum Mainnet)
    pub chain_id: u64,

    // ========== Routing ==========
    /// Connector assets tried for two-hop routes, in priority order
    pub connectors: Vec<String>,

    /// Uniswap V3 fee tiers searched per pair
    pub v3_fee_tiers: Vec<u32>,

    /// Haircut applied to the selected quote (lenient pricer), in bps
    pub slippage_bps: u32,

    // ========== TWAP Guard ==========
    /// Run the manipulation guard before trusting a V3 pool
    pub twap_check: bool,

    /// Lookback window of the guard in seconds
    pub twap_period_secs: u32,

    /// Maximum distance between current tick and TWAP tick
    pub max_tick_deviation: i32,

    /// Maximum relative step between current and harmonic-mean liquidity, in bps
    pub max_liquidity_step_bps: u32,

    // ========== Oracle ==========
    /// Heartbeat of the ETH/USD feed
    pub eth_usd_heartbeat_secs: u64,

    /// Heartbeat of the BTC/USD feed
    pub btc_usd_heartbeat_secs: u64,

    /// Heartbeat of asset-specific feeds
    pub asset_feed_heartbeat_secs: u64,

    /// Compare the selected quote against the feed estimate
    pub feed_cross_check: bool,

    /// Deviation from the feed estimate that gets flagged, in bps
    pub max_feed_deviation_bps: u32,

    // ========== Snapshot ==========
    /// Balancer V2 pool ids to load (the Vault has no pair lookup)
    pub balancer_pool_ids: Vec<String>,

    /// Tick bitmap words fetched on each side of the current tick
    pub tick_window_words: i16,

    // ========== Logging ==========
    /// Append every selected quote to a JSON-lines file
    pub quote_log: bool,

    /// Path of the quote log
    pub quote_log_path: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

impl PricerConfig {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            // Network
            rpc_url: env::var("RPC_URL").unwrap_or(defaults.rpc_url),
            chain_id: env_or("CHAIN_ID", defaults.chain_id),

            // Routing
            connectors: env_list("CONNECTORS").unwrap_or(defaults.connectors),
            v3_fee_tiers: env_list("V3_FEE_TIERS")
                .map(|tiers| tiers.iter().filter_map(|t| t.parse().ok()).collect())
                .unwrap_or(defaults.v3_fee_tiers),
            slippage_bps: env_or("SLIPPAGE_BPS", defaults.slippage_bps),

            // TWAP guard
            twap_check: env_or("TWAP_CHECK", defaults.twap_check),
            twap_period_secs: env_or("TWAP_PERIOD_SECS", defaults.twap_period_secs),
            max_tick_deviation: env_or("MAX_TICK_DEVIATION", defaults.max_tick_deviation),
            max_liquidity_step_bps: env_or("MAX_LIQUIDITY_STEP_BPS", defaults.max_liquidity_step_bps),

            // Oracle
            eth_usd_heartbeat_secs: env_or("ETH_USD_HEARTBEAT_SECS", defaults.eth_usd_heartbeat_secs),
            btc_usd_heartbeat_secs: env_or("BTC_USD_HEARTBEAT_SECS", defaults.btc_usd_heartbeat_secs),
            asset_feed_heartbeat_secs: env_or(
                "ASSET_FEED_HEARTBEAT_SECS",
                defaults.asset_feed_heartbeat_secs,
            ),
            feed_cross_check: env_or("FEED_CROSS_CHECK", defaults.feed_cross_check),
            max_feed_deviation_bps: env_or("MAX_FEED_DEVIATION_BPS", defaults.max_feed_deviation_bps),

            // Snapshot
            balancer_pool_ids: env_list("BALANCER_POOL_IDS").unwrap_or(defaults.balancer_pool_ids),
            tick_window_words: env_or("TICK_WINDOW_WORDS", defaults.tick_window_words),

            // Logging
            quote_log: env_or("QUOTE_LOG", defaults.quote_log),
            quote_log_path: env::var("QUOTE_LOG_PATH").unwrap_or(defaults.quote_log_path),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Default Balancer pools: WETH/AURA (bveAURA), 80BAL/20WETH, WBTC/WETH
    fn default_balancer_pool_ids() -> Vec<String> {
        vec![
            "0xa3283e3470d3cd1f18c074e3f2d3965f6d62fff2000100000000000000000267".to_string(),
            "0x5c6ee304399dbdb9c8ef030ab642b10820db8f56000200000000000000000014".to_string(),
            "0xa6f548df93de924d73be7d25dc02554c6bd66db500020000000000000000000e".to_string(),
        ]
    }

    /// Validate configuration before pricing
    pub fn validate(&self) -> std::result::Result<(), PricingError> {
        if self.slippage_bps >= MAX_BPS {
            return Err(PricingError::InvalidConfig(format!(
                "SLIPPAGE_BPS must be below {} (currently {})",
                MAX_BPS, self.slippage_bps
            )));
        }
        if self.connector_addresses().len() != self.connectors.len() {
            return Err(PricingError::InvalidConfig(
                "CONNECTORS contains an unparseable token".to_string(),
            ));
        }
        if self.v3_fee_tiers.is_empty() {
            return Err(PricingError::InvalidConfig(
                "V3_FEE_TIERS must list at least one tier".to_string(),
            ));
        }
        if self.twap_check && self.twap_period_secs == 0 {
            return Err(PricingError::InvalidConfig(
                "TWAP_PERIOD_SECS must be positive when TWAP_CHECK is on".to_string(),
            ));
        }
        if self.max_tick_deviation < 0 {
            return Err(PricingError::InvalidConfig(
                "MAX_TICK_DEVIATION cannot be negative".to_string(),
            ));
        }
        if self.balancer_pool_id_values().len() != self.balancer_pool_ids.len() {
            return Err(PricingError::InvalidConfig(
                "BALANCER_POOL_IDS contains an invalid bytes32".to_string(),
            ));
        }
        if self.eth_usd_heartbeat_secs == 0
            || self.btc_usd_heartbeat_secs == 0
            || self.asset_feed_heartbeat_secs == 0
        {
            return Err(PricingError::InvalidConfig(
                "feed heartbeats must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Connector tokens as addresses (symbols or hex accepted)
    pub fn connector_addresses(&self) -> Vec<Address> {
        self.connectors
            .iter()
            .filter_map(|s| tokens::parse_token(s))
            .collect()
    }

    pub fn balancer_pool_id_values(&self) -> Vec<B256> {
        self.balancer_pool_ids
            .iter()
            .filter_map(|s| B256::from_str(s).ok())
            .collect()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let connectors = self
            .connector_addresses()
            .iter()
            .map(tokens::format_token)
            .collect::<Vec<_>>()
            .join(", ");
        let tiers = self
            .v3_fee_tiers
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("/");

        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║               ON-CHAIN PRICER - CONFIGURATION              ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Chain ID:          {:^40} ║", self.chain_id);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ ROUTING                                                    ║");
        println!("║ • Connectors:      {:^40} ║", connectors);
        println!("║ • V3 Fee Tiers:    {:^40} ║", tiers);
        println!("║ • Slippage:        {:>37} bps ║", self.slippage_bps);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ TWAP GUARD                                                 ║");
        println!("║ • Enabled:         {:^40} ║",
            if self.twap_check { "✓ Yes" } else { "✗ No" }
        );
        println!("║ • Window:          {:>38} s ║", self.twap_period_secs);
        println!("║ • Max Tick Dev:    {:^40} ║", self.max_tick_deviation);
        println!("║ • Max Liq Step:    {:>37} bps ║", self.max_liquidity_step_bps);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ ORACLE                                                     ║");
        println!("║ • ETH/USD HB:      {:>38} s ║", self.eth_usd_heartbeat_secs);
        println!("║ • BTC/USD HB:      {:>38} s ║", self.btc_usd_heartbeat_secs);
        println!("║ • Asset HB:        {:>38} s ║", self.asset_feed_heartbeat_secs);
        println!("║ • Cross Check:     {:^40} ║",
            if self.feed_cross_check { "✓ Enabled" } else { "✗ Disabled" }
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SNAPSHOT                                                   ║");
        println!("║ • Balancer Pools:  {:^40} ║", self.balancer_pool_ids.len());
        println!("║ • Tick Words:      {:^40} ║", self.tick_window_words);
        println!("║ • Quote Log:       {:^40} ║",
            if self.quote_log { "✓ Enabled" } else { "✗ Disabled" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PricerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://eth.llamarpc.com".to_string(),
            chain_id: 1,
            connectors: vec!["WETH".to_string()],
            v3_fee_tiers: DEFAULT_V3_FEE_TIERS.to_vec(),
            slippage_bps: 0,
            twap_check: true,
            twap_period_secs: 1800,
            max_tick_deviation: 200,
            max_liquidity_step_bps: 5000,
            eth_usd_heartbeat_secs: 3600,
            btc_usd_heartbeat_secs: 3600,
            asset_feed_heartbeat_secs: 86400,
            feed_cross_check: false,
            max_feed_deviation_bps: 1000,
            balancer_pool_ids: Self::default_balancer_pool_ids(),
            tick_window_words: 2,
            quote_log: false,
            quote_log_path: "./logs/quotes.log".to_string(),
        }
    }
}

// ============================================
// QUOTE LOGGER
// ============================================

use chrono::{DateTime, Utc};
use std::io::Write;

/// One selected quote, appended as a JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteLog {
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub sell: String,
    pub buy: String,
    pub amount_in: String,
    pub amount_out: String,
    pub venue: String,
    pub venue_id: u8,
    pub gas_estimate: u64,
    pub oracle_estimate: Option<String>,
}

impl QuoteLog {
    /// Append this log to a file
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let json = serde_json::to_string(self)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}

// ============================================
// TESTS
// ============================================
