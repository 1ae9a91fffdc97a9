//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (marketplace auth tokens, bot token) are referenced by
//! env-var name in the config and resolved at runtime via `std::env::var`.
//! All numeric thresholds (spread threshold, serial cutoffs, tier
//! premiums, TTLs) live here rather than in code.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub scanner: ScannerConfig,
    pub arbitrage: ArbitrageConfig,
    pub valuation: ValuationConfig,
    pub cache: CacheConfig,
    pub escrow: EscrowConfig,
    pub sources: SourcesConfig,
    pub ledger: LedgerConfig,
    pub api: ApiConfig,
    pub alerts: AlertsConfig,
    /// Catalog seed — read-only reference data, applied at startup.
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub database_url: String,
    pub currency: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    pub interval_secs: u64,
    pub global_concurrency: usize,
    pub default_source_concurrency: usize,
    pub pass_timeout_secs: u64,
    /// Per-source overrides (bulk APIs usually get 1).
    #[serde(default)]
    pub source_concurrency: HashMap<String, usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArbitrageConfig {
    /// Spread percentage at or above which the arbitrage signal fires.
    pub spread_threshold_pct: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValuationConfig {
    /// Serials strictly below this get the low-serial premium.
    pub low_serial_threshold: u32,
    /// Fractional bonus for low serials (0.20 => x1.20).
    pub low_serial_premium: Decimal,
    /// Fractional bonus for visually notable serials.
    pub notable_serial_premium: Decimal,
    /// Explicit extra notable serials beyond the pattern rules.
    #[serde(default)]
    pub notable_serials: Vec<u32>,
    /// Cap on the combined multiplier.
    pub max_premium: Decimal,
    /// Fractional bonus per rarity tier (applied scaled by scarcity).
    #[serde(default)]
    pub tier_bonus: HashMap<String, Decimal>,
    /// Trait-to-tier mapping rules.
    #[serde(default)]
    pub tiers: Vec<TierRuleEntry>,
}

/// One trait-to-tier rule. `slug = None` applies to every gift.
#[derive(Debug, Deserialize, Clone)]
pub struct TierRuleEntry {
    pub slug: Option<String>,
    pub category: String,
    pub value: String,
    pub tier: String,
    /// Fraction of total supply carrying this trait (0.0–1.0).
    pub share: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EscrowConfig {
    /// Deals still waiting for deposits past this age are cancelled.
    pub deposit_expiry_secs: u64,
    pub poll_interval_secs: u64,
    /// Backoff ceiling for ledger query retries.
    pub max_backoff_secs: u64,
    pub service_wallet_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    pub fragment: SourceConfig,
    pub getgems: SourceConfig,
    pub tonnel: SourceConfig,
    pub mrkt: SourceConfig,
    pub portals: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub enabled: bool,
    /// Env-var holding this source's credential, when one is required.
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogEntry {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub total_supply: Option<i64>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
