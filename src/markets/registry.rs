//! Source registry.
//!
//! Builds the set of enabled marketplace parsers from configuration.
//! Registration order is load-bearing: when two sources quote the same
//! price, the aggregator breaks the tie in favour of the earlier entry.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AppConfig, SourceConfig, SourcesConfig};
use crate::markets::fragment::FragmentParser;
use crate::markets::getgems::GetGemsParser;
use crate::markets::mrkt::MrktParser;
use crate::markets::portals::PortalsParser;
use crate::markets::tonnel::TonnelParser;
use crate::markets::MarketplaceParser;

pub struct SourceRegistry {
    parsers: Vec<Arc<dyn MarketplaceParser>>,
}

impl SourceRegistry {
    /// Build the registry from config, in fixed registration order:
    /// Fragment, GetGems, Tonnel, MRKT, Portals.
    ///
    /// Sources that require a credential are skipped with a warning when
    /// the referenced env var is unset, so one missing token never takes
    /// the whole scanner down.
    pub fn from_config(sources: &SourcesConfig) -> Result<Self> {
        let mut parsers: Vec<Arc<dyn MarketplaceParser>> = Vec::new();

        if sources.fragment.enabled {
            parsers.push(Arc::new(FragmentParser::new()?));
        }
        if sources.getgems.enabled {
            parsers.push(Arc::new(GetGemsParser::new()?));
        }
        if sources.tonnel.enabled {
            if let Some(token) = resolve_token("Tonnel", &sources.tonnel) {
                parsers.push(Arc::new(TonnelParser::new(token)?));
            }
        }
        if sources.mrkt.enabled {
            if let Some(key) = resolve_token("MRKT", &sources.mrkt) {
                parsers.push(Arc::new(MrktParser::new(key)?));
            }
        }
        if sources.portals.enabled {
            parsers.push(Arc::new(PortalsParser::new()?));
        }

        info!(
            sources = ?parsers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Source registry built"
        );
        Ok(Self { parsers })
    }

    pub fn from_parsers(parsers: Vec<Arc<dyn MarketplaceParser>>) -> Self {
        Self { parsers }
    }

    pub fn parsers(&self) -> &[Arc<dyn MarketplaceParser>] {
        &self.parsers
    }

    /// Registered source names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.parsers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Registration index of a source, used for deterministic tie-breaks.
    pub fn position(&self, source: &str) -> Option<usize> {
        self.parsers.iter().position(|p| p.name() == source)
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

/// Resolve a source credential, or None (with a warning) if unavailable.
fn resolve_token(source: &str, cfg: &SourceConfig) -> Option<String> {
    let env_name = match &cfg.auth_token_env {
        Some(name) => name,
        None => {
            warn!(source, "Source enabled but no auth_token_env configured, skipping");
            return None;
        }
    };
    match AppConfig::resolve_env(env_name) {
        Ok(token) => Some(token),
        Err(_) => {
            warn!(source, env = %env_name, "Credential env var unset, skipping source");
            None
        }
    }
}
