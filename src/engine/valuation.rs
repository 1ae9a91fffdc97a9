//! Rarity valuation.
//!
//! Computes a multiplicative premium over the floor price from a
//! listing's serial number and traits. All rules and coefficients come
//! from configuration; the engine itself is pure and deterministic.
//!
//! Premium composition:
//!   - serial bonus: low serials (below the configured cutoff) or
//!     visually notable serials (round, repeated digits, palindromes,
//!     or explicitly listed)
//!   - per-trait bonus: each trait matching a configured tier rule adds
//!     the tier's bonus scaled by how scarce the trait is
//! The combined multiplier is capped at `max_premium`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::ValuationConfig as ValuationSettings;
use crate::types::{QuoteAttributes, RarityTier};

/// One trait-to-tier rule, resolved from config.
#[derive(Debug, Clone)]
struct TierRule {
    /// None applies to every gift; a slug-specific rule wins over it.
    slug: Option<String>,
    category: String,
    value: String,
    tier: RarityTier,
    /// Fraction of supply carrying this trait, 0.0-1.0.
    share: Decimal,
}

pub struct ValuationEngine {
    low_serial_threshold: u32,
    low_serial_premium: Decimal,
    notable_serial_premium: Decimal,
    notable_serials: HashSet<u32>,
    max_premium: Decimal,
    tier_bonus: HashMap<RarityTier, Decimal>,
    rules: Vec<TierRule>,
}

impl ValuationEngine {
    pub fn from_config(cfg: &ValuationSettings) -> Result<Self> {
        let mut tier_bonus = HashMap::new();
        for (name, bonus) in &cfg.tier_bonus {
            let tier: RarityTier = name
                .parse()
                .with_context(|| format!("Bad tier name in tier_bonus: {name}"))?;
            tier_bonus.insert(tier, *bonus);
        }

        let mut rules = Vec::with_capacity(cfg.tiers.len());
        for entry in &cfg.tiers {
            let tier: RarityTier = entry
                .tier
                .parse()
                .with_context(|| format!("Bad tier in rule {}={}", entry.category, entry.value))?;
            rules.push(TierRule {
                slug: entry.slug.clone(),
                category: entry.category.clone(),
                value: entry.value.clone(),
                tier,
                share: entry.share.clamp(Decimal::ZERO, Decimal::ONE),
            });
        }

        Ok(Self {
            low_serial_threshold: cfg.low_serial_threshold,
            low_serial_premium: cfg.low_serial_premium,
            notable_serial_premium: cfg.notable_serial_premium,
            notable_serials: cfg.notable_serials.iter().copied().collect(),
            max_premium: cfg.max_premium,
            tier_bonus,
            rules,
        })
    }

    /// Combined rarity premium for a listing. 1.0 when there is nothing
    /// notable about it (or no attributes at all).
    pub fn premium(&self, slug: &str, attrs: Option<&QuoteAttributes>) -> Decimal {
        let attrs = match attrs {
            Some(a) if !a.is_empty() => a,
            _ => return Decimal::ONE,
        };

        let mut multiplier = Decimal::ONE;

        if let Some(serial) = attrs.serial_number {
            if serial < self.low_serial_threshold {
                multiplier *= Decimal::ONE + self.low_serial_premium;
            } else if self.is_notable_serial(serial) {
                multiplier *= Decimal::ONE + self.notable_serial_premium;
            }
        }

        for (category, value) in &attrs.traits {
            if let Some(rule) = self.lookup(slug, category, value) {
                if rule.tier == RarityTier::Common {
                    continue;
                }
                let bonus = self.tier_bonus.get(&rule.tier).copied().unwrap_or_default();
                // Scarcer traits (smaller share) earn more of the bonus.
                multiplier *= Decimal::ONE + bonus * (Decimal::ONE - rule.share);
            }
        }

        if multiplier > self.max_premium {
            debug!(slug, %multiplier, cap = %self.max_premium, "Premium capped");
            return self.max_premium;
        }
        multiplier
    }

    /// Rarest tier any of the listing's traits maps to; `Common` when
    /// nothing matches.
    pub fn classify(&self, slug: &str, attrs: &QuoteAttributes) -> RarityTier {
        let mut best = RarityTier::Common;
        for (category, value) in &attrs.traits {
            if let Some(rule) = self.lookup(slug, category, value) {
                let rank = |t: RarityTier| RarityTier::ALL.iter().position(|x| *x == t);
                if rank(rule.tier) < rank(best) {
                    best = rule.tier;
                }
            }
        }
        best
    }

    fn is_notable_serial(&self, serial: u32) -> bool {
        if self.notable_serials.contains(&serial) {
            return true;
        }
        let digits = serial.to_string();
        let round = serial >= 100 && serial % 100 == 0;
        let repdigit = digits.len() >= 2 && {
            let first = digits.as_bytes()[0];
            digits.bytes().all(|b| b == first)
        };
        let palindrome = digits.len() >= 3 && {
            let rev: String = digits.chars().rev().collect();
            rev == digits
        };
        round || repdigit || palindrome
    }

    /// Find the rule for one trait. A slug-specific rule shadows a
    /// global one for the same (category, value).
    fn lookup(&self, slug: &str, category: &str, value: &str) -> Option<&TierRule> {
        let mut global = None;
        for rule in &self.rules {
            if rule.category != category || rule.value != value {
                continue;
            }
            match &rule.slug {
                Some(s) if s == slug => return Some(rule),
                Some(_) => {}
                None => global = Some(rule),
            }
        }
        global
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
