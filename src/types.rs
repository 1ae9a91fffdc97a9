//! Shared types for the GiftScan service.
//!
//! These types form the data model used across all modules: catalog
//! reference data, per-source price observations, derived aggregate
//! views, and escrow deals. They are designed to be stable so that
//! market, engine, and escrow modules can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Immutable reference data for one collectible gift.
///
/// Seeded at startup; the slug is globally unique and never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogItem {
    pub slug: String,
    pub name: String,
    pub image_url: Option<String>,
    pub total_supply: Option<i64>,
}

// ---------------------------------------------------------------------------
// Price quotes
// ---------------------------------------------------------------------------

/// Version tag for the structured attribute schema.
pub const ATTRIBUTE_SCHEMA_VERSION: u16 = 1;

/// Structured per-listing attributes carried by a quote.
///
/// A known schema per trait category (BTreeMap keeps serialization
/// deterministic), not an arbitrary untyped blob.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QuoteAttributes {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub serial_number: Option<u32>,
    #[serde(default)]
    pub traits: BTreeMap<String, String>,
}

fn default_schema_version() -> u16 {
    ATTRIBUTE_SCHEMA_VERSION
}

impl QuoteAttributes {
    pub fn new(serial_number: Option<u32>, traits: BTreeMap<String, String>) -> Self {
        Self {
            schema_version: ATTRIBUTE_SCHEMA_VERSION,
            serial_number,
            traits,
        }
    }

    /// Value of one trait category, if present.
    pub fn trait_value(&self, category: &str) -> Option<&str> {
        self.traits.get(category).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.serial_number.is_none() && self.traits.is_empty()
    }
}

/// One marketplace's floor-price observation for one catalog item.
///
/// Immutable once recorded; the `market_snapshots` table keeps an
/// append-only history of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    /// Source identifier: "Fragment" | "GetGems" | "Tonnel" | "MRKT" | "Portals"
    pub source: String,
    pub slug: String,
    pub price: Decimal,
    pub currency: String,
    pub scanned_at: DateTime<Utc>,
    pub attributes: Option<QuoteAttributes>,
}

impl fmt::Display for PriceQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} @ {} {}",
            self.source, self.slug, self.price, self.currency
        )
    }
}

/// Compact (source, price) pair used for best/worst price in a view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSummary {
    pub source: String,
    pub price: Decimal,
    pub currency: String,
}

// ---------------------------------------------------------------------------
// Aggregate view
// ---------------------------------------------------------------------------

/// Derived per-item view over the freshest quote per source.
///
/// Rebuilt on every scan; never stored as primary truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateView {
    pub slug: String,
    pub name: String,
    pub image_url: Option<String>,
    pub total_supply: Option<i64>,
    /// Latest quote per source, in source registration order.
    pub quotes: Vec<PriceQuote>,
    pub best_price: Option<PriceSummary>,
    pub worst_price: Option<PriceSummary>,
    pub spread_ton: Option<Decimal>,
    /// None when fewer than two priced quotes exist or best is zero.
    pub spread_pct: Option<f64>,
    pub arbitrage_signal: bool,
    /// Multiplicative rarity premium; 1.0 means no premium.
    pub rarity_premium: Decimal,
}

// ---------------------------------------------------------------------------
// Scan statistics
// ---------------------------------------------------------------------------

/// Per-source result of one scanner pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub quotes: usize,
    pub failed: bool,
    pub latency_ms: u64,
}

/// Full output of one scanner pass. Partial results are normal, not an
/// error: failed sources contribute zero quotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub quotes: Vec<PriceQuote>,
    pub stats: Vec<SourceStats>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScanOutcome {
    pub fn sources_ok(&self) -> usize {
        self.stats.iter().filter(|s| !s.failed).count()
    }

    pub fn sources_failed(&self) -> usize {
        self.stats.iter().filter(|s| s.failed).count()
    }
}

// ---------------------------------------------------------------------------
// Rarity tiers
// ---------------------------------------------------------------------------

/// Named rarity bucket sharing a valuation premium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RarityTier {
    UltraRare,
    Rare,
    Uncommon,
    Common,
}

impl RarityTier {
    /// All tiers, rarest first (useful for iteration).
    pub const ALL: &'static [RarityTier] = &[
        RarityTier::UltraRare,
        RarityTier::Rare,
        RarityTier::Uncommon,
        RarityTier::Common,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RarityTier::UltraRare => "ultra_rare",
            RarityTier::Rare => "rare",
            RarityTier::Uncommon => "uncommon",
            RarityTier::Common => "common",
        }
    }
}

impl fmt::Display for RarityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RarityTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ultra_rare" | "ultrarare" => Ok(RarityTier::UltraRare),
            "rare" => Ok(RarityTier::Rare),
            "uncommon" => Ok(RarityTier::Uncommon),
            "common" => Ok(RarityTier::Common),
            _ => Err(anyhow::anyhow!("Unknown rarity tier: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Deals
// ---------------------------------------------------------------------------

/// Kind of counter-asset required by a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetKind {
    Nft,
    Ton,
    Jetton,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Nft => "NFT",
            AssetKind::Ton => "TON",
            AssetKind::Jetton => "JETTON",
        }
    }

    pub fn is_fungible(&self) -> bool {
        matches!(self, AssetKind::Ton | AssetKind::Jetton)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AssetKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NFT" => Ok(AssetKind::Nft),
            "TON" => Ok(AssetKind::Ton),
            "JETTON" => Ok(AssetKind::Jetton),
            _ => Err(anyhow::anyhow!("Unknown asset kind: {s}")),
        }
    }
}

/// What the counterparty must deposit to settle a deal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequiredAsset {
    pub kind: AssetKind,
    /// Gift slug when kind is NFT.
    pub slug: Option<String>,
    /// Jetton master contract when kind is JETTON.
    pub token_contract: Option<String>,
    /// Fungible amount when kind is TON or JETTON.
    pub amount: Option<Decimal>,
}

/// Deal lifecycle status. Transitions are monotonic: a deal only moves
/// forward along `created → waiting_deposit → processing → completed`,
/// with `cancelled` reachable from the first two states only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Created,
    WaitingDeposit,
    Processing,
    Completed,
    Cancelled,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Created => "created",
            DealStatus::WaitingDeposit => "waiting_deposit",
            DealStatus::Processing => "processing",
            DealStatus::Completed => "completed",
            DealStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DealStatus::Completed | DealStatus::Cancelled)
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition(&self, next: DealStatus) -> bool {
        use DealStatus::*;
        matches!(
            (self, next),
            (Created, WaitingDeposit)
                | (Created, Cancelled)
                | (WaitingDeposit, Processing)
                | (WaitingDeposit, Cancelled)
                | (Processing, Completed)
        )
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DealStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(DealStatus::Created),
            "waiting_deposit" => Ok(DealStatus::WaitingDeposit),
            "processing" => Ok(DealStatus::Processing),
            "completed" => Ok(DealStatus::Completed),
            "cancelled" => Ok(DealStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Unknown deal status: {s}")),
        }
    }
}

/// A two-party escrow deal. Created on request, mutated only by the
/// escrow state machine, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: Uuid,
    pub status: DealStatus,
    pub initiator_id: i64,
    /// Gift slug the initiator is offering.
    pub offer_slug: String,
    pub required: RequiredAsset,
    /// Unique code the parties must attach to their deposit transaction.
    /// Immutable after creation.
    pub memo_code: String,
    pub initiator_deposited: bool,
    pub counterparty_deposited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    pub fn both_deposited(&self) -> bool {
        self.initiator_deposited && self.counterparty_deposited
    }
}

impl fmt::Display for Deal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deal {} [{}] {} -> {} (memo {})",
            self.id, self.status, self.offer_slug, self.required.kind, self.memo_code
        )
    }
}

/// Which party a deposit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealSide {
    Initiator,
    Counterparty,
}

impl fmt::Display for DealSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DealSide::Initiator => write!(f, "initiator"),
            DealSide::Counterparty => write!(f, "counterparty"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// One incoming transaction observed on the external ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTx {
    pub tx_hash: String,
    pub sender: String,
    pub amount: Decimal,
    /// Gift slug when the transfer carries an NFT.
    pub asset_slug: Option<String>,
    /// Jetton master contract when the transfer carries a jetton.
    pub token_contract: Option<String>,
    pub memo: String,
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
