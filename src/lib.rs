//! GiftScan — cross-marketplace gift price aggregation, arbitrage
//! detection and escrow backend.
//!
//! The scanner polls marketplace parsers concurrently, snapshots are
//! persisted and aggregated into per-item views, the cache keeps reads
//! fast between passes, and the escrow state machine drives two-party
//! deals from creation through ledger-verified deposits to settlement.

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod markets;
pub mod notify;
pub mod scheduler;
pub mod storage;
pub mod types;
