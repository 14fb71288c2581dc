//! Token definitions for the pricer
//!
//! Static mainnet token table used for:
//! - Resolving symbols on the CLI (`--sell WETH`)
//! - Decimals fallback when a snapshot does not carry token metadata
//! - Connector defaults (WETH) and feed-registry denominations

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================
// FEED REGISTRY DENOMINATIONS
// ============================================

/// Chainlink denomination for native ETH
pub const ETH_DENOMINATION: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Chainlink denomination for BTC
pub const BTC_DENOMINATION: Address = address!("bBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB");

/// Chainlink denomination for USD (ISO 4217 code 840)
pub const USD_DENOMINATION: Address = address!("0000000000000000000000000000000000000348");

// ============================================
// MAINNET TOKENS
// ============================================

pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
pub const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
pub const USDT: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
pub const DAI: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
pub const WBTC: Address = address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599");
pub const BADGER: Address = address!("3472A5A71965499acd81997a54BBA8D852C6E53d");
pub const CVX: Address = address!("4e3FBD56CD56c3e72c1403e103b45Db9da5B9D2B");
pub const CRV: Address = address!("D533a949740bb3306d119CC777fa900bA034cd52");
pub const AURA: Address = address!("C0c293ce456fF0ED870ADd98a0828Dd4d2903DBF");
pub const LOOKS: Address = address!("f4d2888d29D722226FafA5d9B24F9164c092421E");
pub const COW: Address = address!("DEf1CA1fb7FBcDC777520aa7f396b4E015F497aB");
pub const OHM: Address = address!("64aa3364F17a4D01c6f1751Fd97C2BD3D7e7f1D5");

/// A token the pricer knows about without asking the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

impl Token {
    pub fn new(symbol: &str, address: Address, decimals: u8) -> Self {
        Self {
            symbol: symbol.to_string(),
            address,
            decimals,
        }
    }

    /// 10^decimals as a U256
    pub fn unit(&self) -> alloy_primitives::U256 {
        alloy_primitives::U256::from(10u64).pow(alloy_primitives::U256::from(self.decimals))
    }
}

/// Token categories for connector selection and display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    /// Wrapped native asset, the default connector
    Connector,
    Stable,
    BtcPegged,
    DeFi,
}

const KNOWN_TOKENS: &[(&str, Address, u8, TokenCategory)] = &[
    ("WETH", WETH, 18, TokenCategory::Connector),
    ("USDC", USDC, 6, TokenCategory::Stable),
    ("USDT", USDT, 6, TokenCategory::Stable),
    ("DAI", DAI, 18, TokenCategory::Stable),
    ("WBTC", WBTC, 8, TokenCategory::BtcPegged),
    ("BADGER", BADGER, 18, TokenCategory::DeFi),
    ("CVX", CVX, 18, TokenCategory::DeFi),
    ("CRV", CRV, 18, TokenCategory::DeFi),
    ("AURA", AURA, 18, TokenCategory::DeFi),
    ("LOOKS", LOOKS, 18, TokenCategory::DeFi),
    ("COW", COW, 18, TokenCategory::DeFi),
    ("OHM", OHM, 9, TokenCategory::DeFi),
];

/// All tokens in the static table
pub fn known_tokens() -> Vec<Token> {
    KNOWN_TOKENS
        .iter()
        .map(|(symbol, address, decimals, _)| Token::new(symbol, *address, *decimals))
        .collect()
}

/// Decimals for a token in the static table
pub fn known_decimals(address: &Address) -> Option<u8> {
    KNOWN_TOKENS
        .iter()
        .find(|(_, a, _, _)| a == address)
        .map(|(_, _, d, _)| *d)
}

pub fn category(address: &Address) -> Option<TokenCategory> {
    KNOWN_TOKENS
        .iter()
        .find(|(_, a, _, _)| a == address)
        .map(|(_, _, _, c)| *c)
}

pub fn symbol_of(address: &Address) -> Option<&'static str> {
    KNOWN_TOKENS
        .iter()
        .find(|(_, a, _, _)| a == address)
        .map(|(s, _, _, _)| *s)
}

/// Short display form: symbol if known, otherwise a truncated address
pub fn format_token(address: &Address) -> String {
    match symbol_of(address) {
        Some(symbol) => symbol.to_string(),
        None => format!("0x{}...", &format!("{:?}", address)[2..8]),
    }
}

/// Resolve a CLI token argument: a known symbol (case-insensitive) or a hex address
pub fn parse_token(input: &str) -> Option<Address> {
    let upper = input.to_uppercase();
    if let Some((_, address, _, _)) = KNOWN_TOKENS.iter().find(|(s, _, _, _)| *s == upper) {
        return Some(*address);
    }
    Address::from_str(input).ok()
}

/// Wrapped tokens that are priced through a feed denomination
pub fn feed_denomination(address: &Address) -> Address {
    if *address == WETH {
        ETH_DENOMINATION
    } else {
        *address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbol_and_address() {
        assert_eq!(parse_token("weth"), Some(WETH));
        assert_eq!(parse_token("USDC"), Some(USDC));
        assert_eq!(
            parse_token("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"),
            Some(WBTC)
        );
        assert_eq!(parse_token("NOT_A_TOKEN"), None);
    }

    #[test]
    fn test_known_decimals() {
        assert_eq!(known_decimals(&USDC), Some(6));
        assert_eq!(known_decimals(&WBTC), Some(8));
        assert_eq!(known_decimals(&Address::repeat_byte(0x42)), None);
    }

    #[test]
    fn test_weth_maps_to_eth_denomination() {
        assert_eq!(feed_denomination(&WETH), ETH_DENOMINATION);
        assert_eq!(feed_denomination(&BADGER), BADGER);
    }
}
