//! Scan and pricing engine.
//!
//! `scanner` runs concurrent marketplace passes, `aggregator` derives
//! per-item price views, `valuation` computes rarity premiums and
//! `stats` derives market statistics from quote history.

pub mod aggregator;
pub mod scanner;
pub mod stats;
pub mod valuation;
