//! Diagnostic tool - Check pricer configuration
//!
//! Run with: cargo run --bin diagnose

use std::env;

use onchain_pricer::tokens;
use onchain_pricer::PricerConfig;

/// Keep the first `head` and last `tail` characters of long values
fn shorten(value: &str, head: usize, tail: usize) -> String {
    let count = value.chars().count();
    if count <= head + tail + 5 {
        return value.to_string();
    }
    let start: String = value.chars().take(head).collect();
    let end: String = value.chars().skip(count - tail).collect();
    format!("{}...{}", start, end)
}

fn main() {
    println!("🔍 PRICER DIAGNOSTIC CHECK\n");

    dotenvy::dotenv().ok();

    println!("═══════════════════════════════════════════════════");
    println!("                  ENVIRONMENT                       ");
    println!("═══════════════════════════════════════════════════\n");

    let checks = [
        ("CONNECTORS", "Intermediate tokens for two-hop routes"),
        ("V3_FEE_TIERS", "Uniswap V3 fee tiers searched"),
        ("TWAP_CHECK", "Skip manipulated V3 pools?"),
        ("TWAP_PERIOD_SECS", "TWAP lookback window"),
        ("MAX_TICK_DEVIATION", "Allowed |tick - twap tick|"),
        ("FEED_CROSS_CHECK", "Compare quotes against Chainlink?"),
        ("BALANCER_POOL_IDS", "Balancer pools to snapshot"),
        ("QUOTE_LOG", "Append quotes to a JSONL file?"),
    ];

    for (key, desc) in checks {
        let marker = match env::var(key) {
            Ok(value) => format!("{} (from .env)", value),
            Err(_) => "(default)".to_string(),
        };
        println!("  {}: {}", key, marker);
        println!("    └─ {}\n", desc);
    }

    let rpc = env::var("RPC_URL").unwrap_or_else(|_| "NOT SET".to_string());
    println!("  RPC_URL: {}", shorten(&rpc, 30, 15));

    println!("\n═══════════════════════════════════════════════════");
    println!("                EFFECTIVE CONFIG                    ");
    println!("═══════════════════════════════════════════════════\n");

    let config = match PricerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            println!("  ❌ Failed to load configuration: {}", e);
            return;
        }
    };
    config.print_summary();

    let unknown: Vec<&String> = config
        .connectors
        .iter()
        .filter(|c| tokens::parse_token(c).is_none())
        .collect();

    println!("\n═══════════════════════════════════════════════════");
    println!("                     STATUS                         ");
    println!("═══════════════════════════════════════════════════\n");

    match config.validate() {
        Ok(()) => println!("  ✅ Configuration valid"),
        Err(e) => println!("  ❌ Invalid configuration: {}", e),
    }
    if !unknown.is_empty() {
        println!("  ⚠️  Unresolvable connectors: {:?}", unknown);
    }
    if rpc == "NOT SET" {
        println!("  📋 No RPC: only `--snapshot` files can be priced");
    }
    if !config.twap_check {
        println!("\n  ⚠️  TWAP guard disabled! Manipulated V3 pools will be quoted.");
    }

    println!("\n✅ Diagnostic complete!\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorten_counts_characters() {
        assert_eq!(shorten("https://eth.llamarpc.com", 30, 15), "https://eth.llamarpc.com");

        let long = format!("https://rpc.example/{}", "é".repeat(40));
        let short = shorten(&long, 30, 15);
        assert!(short.starts_with("https://rpc.example/éééééééééé..."));
        assert!(short.ends_with(&"é".repeat(15)));
        assert_eq!(short.chars().count(), 48);
    }
}
