//! Concurrent marketplace scanner.
//!
//! One pass fans out across every registered source under two levels of
//! admission control: a global semaphore bounding total in-flight
//! requests, and a per-source semaphore bounding pressure on any single
//! venue. Bulk-capable sources contribute one request per pass; the
//! rest get one request per catalog item.
//!
//! A pass has a hard deadline. Requests that finish before it keep
//! their results; the rest are abandoned and counted against their
//! source. A failed source never poisons the pass: partial output is
//! the normal operating mode.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::ScannerConfig;
use crate::markets::registry::SourceRegistry;
use crate::types::{CatalogItem, PriceQuote, ScanOutcome, SourceStats};

/// Result of one spawned fetch task.
struct TaskResult {
    source: String,
    quotes: Vec<PriceQuote>,
    errored: bool,
    elapsed_ms: u64,
}

pub struct Scanner {
    registry: Arc<SourceRegistry>,
    global: Arc<Semaphore>,
    source_limits: HashMap<String, usize>,
    default_limit: usize,
    pass_timeout: Duration,
}

impl Scanner {
    pub fn new(registry: Arc<SourceRegistry>, cfg: &ScannerConfig) -> Self {
        Self {
            registry,
            global: Arc::new(Semaphore::new(cfg.global_concurrency)),
            source_limits: cfg.source_concurrency.clone(),
            default_limit: cfg.default_source_concurrency,
            pass_timeout: Duration::from_secs(cfg.pass_timeout_secs),
        }
    }

    fn limit_for(&self, source: &str) -> usize {
        self.source_limits
            .get(source)
            .copied()
            .unwrap_or(self.default_limit)
            .max(1)
    }

    /// Run one full scan pass over the catalog.
    pub async fn scan(&self, catalog: &[CatalogItem]) -> ScanOutcome {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.pass_timeout;

        let known: Arc<HashSet<String>> =
            Arc::new(catalog.iter().map(|c| c.slug.clone()).collect());

        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        for parser in self.registry.parsers() {
            let source_sem = Arc::new(Semaphore::new(self.limit_for(parser.name())));

            if parser.supports_bulk() {
                let parser = parser.clone();
                let global = self.global.clone();
                let sem = source_sem.clone();
                let known = known.clone();
                tasks.spawn(async move {
                    let t0 = Instant::now();
                    let source = parser.name().to_string();
                    let fetch = async {
                        // Source permit first: a task queued behind a
                        // saturated source must not hold a global permit.
                        let _s = sem.acquire_owned().await?;
                        let _g = global.acquire_owned().await?;
                        parser.fetch_all().await
                    };
                    let (quotes, errored) = match timeout_at(deadline, fetch).await {
                        Ok(Ok(all)) => {
                            // Bulk endpoints return every collection they
                            // list; keep only catalog items.
                            let kept: Vec<PriceQuote> = all
                                .into_iter()
                                .filter(|q| known.contains(&q.slug))
                                .collect();
                            (kept, false)
                        }
                        Ok(Err(e)) => {
                            warn!(source = %source, error = %e, "Bulk fetch failed");
                            (Vec::new(), true)
                        }
                        Err(_) => {
                            warn!(source = %source, "Bulk fetch timed out");
                            (Vec::new(), true)
                        }
                    };
                    TaskResult {
                        source,
                        quotes,
                        errored,
                        elapsed_ms: t0.elapsed().as_millis() as u64,
                    }
                });
            } else {
                for item in catalog {
                    let parser = parser.clone();
                    let global = self.global.clone();
                    let sem = source_sem.clone();
                    let slug = item.slug.clone();
                    tasks.spawn(async move {
                        let t0 = Instant::now();
                        let source = parser.name().to_string();
                        let fetch = async {
                            let _s = sem.acquire_owned().await?;
                            let _g = global.acquire_owned().await?;
                            parser.fetch_floor(&slug).await
                        };
                        let (quotes, errored) = match timeout_at(deadline, fetch).await {
                            Ok(Ok(Some(q))) => (vec![q], false),
                            Ok(Ok(None)) => (Vec::new(), false),
                            Ok(Err(e)) => {
                                warn!(source = %source, slug = %slug, error = %e, "Fetch failed");
                                (Vec::new(), true)
                            }
                            Err(_) => {
                                debug!(source = %source, slug = %slug, "Fetch timed out");
                                (Vec::new(), true)
                            }
                        };
                        TaskResult {
                            source,
                            quotes,
                            errored,
                            elapsed_ms: t0.elapsed().as_millis() as u64,
                        }
                    });
                }
            }
        }

        // (quotes, errors, slowest request) per source.
        let mut per_source: BTreeMap<String, (usize, usize, u64)> = BTreeMap::new();
        for name in self.registry.names() {
            per_source.insert(name, (0, 0, 0));
        }

        let mut quotes: Vec<PriceQuote> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Scan task panicked");
                    continue;
                }
            };
            let entry = per_source.entry(result.source).or_insert((0, 0, 0));
            entry.0 += result.quotes.len();
            if result.errored {
                entry.1 += 1;
            }
            entry.2 = entry.2.max(result.elapsed_ms);
            quotes.extend(result.quotes);
        }

        let stats: Vec<SourceStats> = self
            .registry
            .names()
            .into_iter()
            .map(|source| {
                let (count, errors, latency_ms) =
                    per_source.get(&source).copied().unwrap_or((0, 0, 0));
                SourceStats {
                    source,
                    quotes: count,
                    // A source failed the pass only when it errored and
                    // contributed nothing.
                    failed: errors > 0 && count == 0,
                    latency_ms,
                }
            })
            .collect();

        let outcome = ScanOutcome {
            quotes,
            stats,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            quotes = outcome.quotes.len(),
            sources_ok = outcome.sources_ok(),
            sources_failed = outcome.sources_failed(),
            duration_ms = outcome.duration_ms,
            "Scan pass complete"
        );
        outcome
    }
}

/// Keep only the freshest quote per (slug, source) pair.
pub fn latest_per_source(quotes: Vec<PriceQuote>) -> Vec<PriceQuote> {
    let mut latest: HashMap<(String, String), PriceQuote> = HashMap::new();
    for q in quotes {
        let key = (q.slug.clone(), q.source.clone());
        match latest.get(&key) {
            Some(existing) if existing.scanned_at >= q.scanned_at => {}
            _ => {
                latest.insert(key, q);
            }
        }
    }
    let mut result: Vec<PriceQuote> = latest.into_values().collect();
    result.sort_by(|a, b| a.slug.cmp(&b.slug).then_with(|| a.source.cmp(&b.source)));
    result
}

/// Lowest positive price among a set of quotes.
pub fn floor_of(quotes: &[PriceQuote]) -> Option<Decimal> {
    quotes
        .iter()
        .filter(|q| q.price > Decimal::ZERO)
        .map(|q| q.price)
        .min()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::markets::MarketplaceParser;

    struct StaticSource {
        name: String,
        bulk: bool,
        quotes: Vec<PriceQuote>,
        fail: bool,
        delay: Duration,
    }

    impl StaticSource {
        fn quote(source: &str, slug: &str, price: Decimal) -> PriceQuote {
            PriceQuote {
                source: source.into(),
                slug: slug.into(),
                price,
                currency: "TON".into(),
                scanned_at: Utc::now(),
                attributes: None,
            }
        }
    }

    #[async_trait]
    impl MarketplaceParser for StaticSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn supports_bulk(&self) -> bool {
            self.bulk
        }

        async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("{} is down", self.name);
            }
            Ok(self.quotes.iter().find(|q| q.slug == slug).cloned())
        }

        async fn fetch_all(&self) -> Result<Vec<PriceQuote>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("{} is down", self.name);
            }
            Ok(self.quotes.clone())
        }
    }

    fn scanner_config() -> ScannerConfig {
        ScannerConfig {
            interval_secs: 300,
            global_concurrency: 4,
            default_source_concurrency: 2,
            pass_timeout_secs: 5,
            source_concurrency: HashMap::new(),
        }
    }

    fn catalog() -> Vec<CatalogItem> {
        vec![
            CatalogItem {
                slug: "plushpepe".into(),
                name: "Plush Pepe".into(),
                image_url: None,
                total_supply: None,
            },
            CatalogItem {
                slug: "swisswatch".into(),
                name: "Swiss Watch".into(),
                image_url: None,
                total_supply: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_scan_mixes_bulk_and_per_item() {
        let registry = SourceRegistry::from_parsers(vec![
            Arc::new(StaticSource {
                name: "Alpha".into(),
                bulk: false,
                quotes: vec![StaticSource::quote("Alpha", "plushpepe", dec!(33))],
                fail: false,
                delay: Duration::ZERO,
            }),
            Arc::new(StaticSource {
                name: "Beta".into(),
                bulk: true,
                quotes: vec![
                    StaticSource::quote("Beta", "plushpepe", dec!(35)),
                    StaticSource::quote("Beta", "swisswatch", dec!(120)),
                    // Not in the catalog, must be dropped.
                    StaticSource::quote("Beta", "unknowngift", dec!(1)),
                ],
                fail: false,
                delay: Duration::ZERO,
            }),
        ]);

        let scanner = Scanner::new(Arc::new(registry), &scanner_config());
        let outcome = scanner.scan(&catalog()).await;

        assert_eq!(outcome.quotes.len(), 3);
        assert!(!outcome.quotes.iter().any(|q| q.slug == "unknowngift"));
        assert_eq!(outcome.sources_ok(), 2);
        assert_eq!(outcome.sources_failed(), 0);
    }

    #[tokio::test]
    async fn test_failed_source_is_isolated() {
        let registry = SourceRegistry::from_parsers(vec![
            Arc::new(StaticSource {
                name: "Alpha".into(),
                bulk: false,
                quotes: vec![StaticSource::quote("Alpha", "plushpepe", dec!(33))],
                fail: false,
                delay: Duration::ZERO,
            }),
            Arc::new(StaticSource {
                name: "Broken".into(),
                bulk: true,
                quotes: vec![],
                fail: true,
                delay: Duration::ZERO,
            }),
        ]);

        let scanner = Scanner::new(Arc::new(registry), &scanner_config());
        let outcome = scanner.scan(&catalog()).await;

        assert_eq!(outcome.quotes.len(), 1);
        assert_eq!(outcome.sources_ok(), 1);
        assert_eq!(outcome.sources_failed(), 1);
        let broken = outcome.stats.iter().find(|s| s.source == "Broken").unwrap();
        assert!(broken.failed);
        assert_eq!(broken.quotes, 0);
    }

    #[tokio::test]
    async fn test_saturated_source_does_not_starve_others() {
        // Slow is rate-limited to one in-flight request and never
        // answers before the deadline. Its queued tasks must not pin
        // global permits, or Fast would time out too.
        let mut source_concurrency = HashMap::new();
        source_concurrency.insert("Slow".to_string(), 1);
        let cfg = ScannerConfig {
            interval_secs: 300,
            global_concurrency: 2,
            default_source_concurrency: 2,
            pass_timeout_secs: 1,
            source_concurrency,
        };

        let registry = SourceRegistry::from_parsers(vec![
            Arc::new(StaticSource {
                name: "Slow".into(),
                bulk: false,
                quotes: vec![],
                fail: false,
                delay: Duration::from_secs(30),
            }),
            Arc::new(StaticSource {
                name: "Fast".into(),
                bulk: false,
                quotes: vec![
                    StaticSource::quote("Fast", "plushpepe", dec!(33)),
                    StaticSource::quote("Fast", "swisswatch", dec!(120)),
                ],
                fail: false,
                delay: Duration::ZERO,
            }),
        ]);

        let scanner = Scanner::new(Arc::new(registry), &cfg);
        let outcome = scanner.scan(&catalog()).await;

        let fast = outcome.stats.iter().find(|s| s.source == "Fast").unwrap();
        assert_eq!(fast.quotes, 2);
        assert!(!fast.failed);
        let slow = outcome.stats.iter().find(|s| s.source == "Slow").unwrap();
        assert!(slow.failed);
    }

    #[test]
    fn test_latest_per_source_keeps_freshest() {
        let old = PriceQuote {
            source: "Alpha".into(),
            slug: "plushpepe".into(),
            price: dec!(30),
            currency: "TON".into(),
            scanned_at: Utc::now() - chrono::Duration::minutes(10),
            attributes: None,
        };
        let mut new = old.clone();
        new.price = dec!(33);
        new.scanned_at = Utc::now();

        let latest = latest_per_source(vec![old, new]);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].price, dec!(33));
    }

    #[test]
    fn test_floor_of_ignores_nonpositive() {
        let quotes = vec![
            StaticSource::quote("A", "x", dec!(0)),
            StaticSource::quote("B", "x", dec!(5)),
            StaticSource::quote("C", "x", dec!(3)),
        ];
        assert_eq!(floor_of(&quotes), Some(dec!(3)));
        assert_eq!(floor_of(&[]), None);
    }
}
