//! Periodic scan scheduler.
//!
//! Drives one scanner pass per interval. Passes never overlap: the
//! pass guard is try-locked, so a tick that arrives while the previous
//! pass is still running is skipped rather than queued. Cache
//! invalidation happens only after the pass's snapshots are persisted,
//! so readers never see quotes newer than the cached views.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::TtlCache;
use crate::engine::aggregator::aggregate;
use crate::engine::scanner::{latest_per_source, Scanner};
use crate::engine::valuation::ValuationEngine;
use crate::markets::registry::SourceRegistry;
use crate::notify::{format_arbitrage_alert, Notifier};
use crate::storage::Storage;
use crate::types::{AggregateView, PriceQuote};

pub struct ScanScheduler {
    scanner: Arc<Scanner>,
    storage: Arc<Storage>,
    cache: Arc<TtlCache<Vec<AggregateView>>>,
    registry: Arc<SourceRegistry>,
    valuation: Arc<ValuationEngine>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    spread_threshold_pct: f64,
    pass_guard: tokio::sync::Mutex<()>,
}

impl ScanScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scanner: Arc<Scanner>,
        storage: Arc<Storage>,
        cache: Arc<TtlCache<Vec<AggregateView>>>,
        registry: Arc<SourceRegistry>,
        valuation: Arc<ValuationEngine>,
        notifier: Arc<dyn Notifier>,
        interval_secs: u64,
        spread_threshold_pct: f64,
    ) -> Self {
        Self {
            scanner,
            storage,
            cache,
            registry,
            valuation,
            notifier,
            interval: Duration::from_secs(interval_secs),
            spread_threshold_pct,
            pass_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Tick until the shutdown signal flips. The first pass runs
    /// immediately so the service starts with data.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Scan scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Scan scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_pass().await {
                        warn!(error = %e, "Scan pass failed, retrying next interval");
                    }
                }
            }
        }
    }

    /// Run one pass unless another is already in flight. Returns
    /// whether a pass actually ran.
    pub async fn run_pass(&self) -> Result<bool> {
        let _guard = match self.pass_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Previous scan pass still running, skipping this tick");
                return Ok(false);
            }
        };

        let catalog = self
            .storage
            .list_catalog()
            .await
            .context("Failed to load catalog for scan")?;
        if catalog.is_empty() {
            warn!("Catalog is empty, nothing to scan");
            return Ok(true);
        }

        let outcome = self.scanner.scan(&catalog).await;
        self.storage
            .insert_quotes(&outcome.quotes, outcome.started_at)
            .await
            .context("Failed to persist scan snapshots")?;

        // Only now is it safe to drop cached views.
        self.cache.invalidate_all();

        self.send_arbitrage_alerts(&outcome.quotes).await;
        Ok(true)
    }

    async fn send_arbitrage_alerts(&self, quotes: &[PriceQuote]) {
        let catalog = match self.storage.list_catalog().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Skipping alerts, catalog unavailable");
                return;
            }
        };

        let mut by_slug: HashMap<String, Vec<PriceQuote>> = HashMap::new();
        for q in latest_per_source(quotes.to_vec()) {
            by_slug.entry(q.slug.clone()).or_default().push(q);
        }

        for item in &catalog {
            let mut item_quotes = by_slug.remove(&item.slug).unwrap_or_default();
            item_quotes.sort_by_key(|q| self.registry.position(&q.source).unwrap_or(usize::MAX));

            let premium = item_quotes
                .iter()
                .filter_map(|q| q.attributes.as_ref())
                .map(|a| self.valuation.premium(&item.slug, Some(a)))
                .max()
                .unwrap_or(Decimal::ONE);

            let view = aggregate(item, item_quotes, premium, self.spread_threshold_pct);
            if view.arbitrage_signal {
                if let Err(e) = self.notifier.send(&format_arbitrage_alert(&view)).await {
                    warn!(slug = %view.slug, error = %e, "Arbitrage alert failed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::markets::MarketplaceParser;
    use crate::notify::Notifier;
    use crate::types::CatalogItem;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FixedSource {
        name: String,
        prices: Vec<(String, Decimal)>,
        delay: Duration,
    }

    #[async_trait]
    impl MarketplaceParser for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>> {
            tokio::time::sleep(self.delay).await;
            Ok(self
                .prices
                .iter()
                .find(|(s, _)| s == slug)
                .map(|(s, p)| PriceQuote {
                    source: self.name.clone(),
                    slug: s.clone(),
                    price: *p,
                    currency: "TON".into(),
                    scanned_at: Utc::now(),
                    attributes: None,
                }))
        }
    }

    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> Result<()> {
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    async fn build(delay: Duration) -> (Arc<ScanScheduler>, Arc<Storage>, Arc<RecordingNotifier>) {
        let storage = Arc::new(Storage::connect("sqlite::memory:").await.unwrap());
        storage
            .seed_catalog(&[CatalogItem {
                slug: "blingbinky".into(),
                name: "Bling Binky".into(),
                image_url: None,
                total_supply: None,
            }])
            .await
            .unwrap();

        let registry = Arc::new(SourceRegistry::from_parsers(vec![
            Arc::new(FixedSource {
                name: "Alpha".into(),
                prices: vec![("blingbinky".into(), dec!(33))],
                delay,
            }),
            Arc::new(FixedSource {
                name: "Beta".into(),
                prices: vec![("blingbinky".into(), dec!(149))],
                delay,
            }),
        ]));
        let scanner = Arc::new(Scanner::new(
            registry.clone(),
            &ScannerConfig {
                interval_secs: 300,
                global_concurrency: 8,
                default_source_concurrency: 4,
                pass_timeout_secs: 10,
                source_concurrency: HashMap::new(),
            },
        ));
        let valuation = Arc::new(
            ValuationEngine::from_config(&crate::config::ValuationConfig {
                low_serial_threshold: 1000,
                low_serial_premium: dec!(0.2),
                notable_serial_premium: dec!(0.15),
                notable_serials: vec![],
                max_premium: dec!(3),
                tier_bonus: Default::default(),
                tiers: vec![],
            })
            .unwrap(),
        );
        let notifier = Arc::new(RecordingNotifier {
            messages: Mutex::new(Vec::new()),
        });
        let cache = Arc::new(TtlCache::new(Duration::from_secs(900)));
        cache.put("stale".into(), vec![]);

        let scheduler = Arc::new(ScanScheduler::new(
            scanner,
            storage.clone(),
            cache,
            registry,
            valuation,
            notifier.clone(),
            300,
            5.0,
        ));
        (scheduler, storage, notifier)
    }

    #[tokio::test]
    async fn test_pass_persists_invalidates_and_alerts() {
        let (scheduler, storage, notifier) = build(Duration::ZERO).await;

        assert!(scheduler.run_pass().await.unwrap());

        let latest = storage.latest_quotes("blingbinky").await.unwrap();
        assert_eq!(latest.len(), 2);

        // Pre-pass cache entry is gone and the refresh marker is set.
        assert_eq!(scheduler.cache.len(), 0);
        assert!(scheduler.cache.last_refresh().is_some());

        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Bling Binky"));
        assert!(messages[0].contains("buy at 33 on Alpha"));
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let (scheduler, _storage, _notifier) = build(Duration::from_millis(200)).await;

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_pass().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = scheduler.run_pass().await.unwrap();

        assert!(!second, "second pass must be skipped while first runs");
        assert!(first.await.unwrap());
    }
}
