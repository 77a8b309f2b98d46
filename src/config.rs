use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::event_sourcing::store::DEFAULT_PAGE_SIZE;
use crate::utils::RetryConfig;

// ============================================================================
// Store Configuration
// ============================================================================
//
// Defaults target a local single-node ScyllaDB. Every field can be
// overridden from the environment:
//
//   EVENT_STORE_NODES          comma-separated contact points
//   EVENT_STORE_KEYSPACE
//   EVENT_STORE_TABLE
//   EVENT_STORE_PAGE_SIZE      records per query page
//   EVENT_STORE_CAS_ATTEMPTS   counter compare-and-set attempts
//   EVENT_STORE_CAS_INITIAL_DELAY_MS
//   EVENT_STORE_METRICS_PORT
//
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub nodes: Vec<String>,
    pub keyspace: String,
    pub table: String,
    pub page_size: u32,
    pub cas_attempts: u32,
    pub cas_initial_delay_ms: u64,
    pub metrics_port: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["127.0.0.1:9042".to_string()],
            keyspace: "event_store_ks".to_string(),
            table: "events".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            cas_attempts: 10,
            cas_initial_delay_ms: 5,
            metrics_port: 9090,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(nodes) = lookup("EVENT_STORE_NODES") {
            config.nodes = nodes
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(keyspace) = lookup("EVENT_STORE_KEYSPACE") {
            config.keyspace = keyspace;
        }
        if let Some(table) = lookup("EVENT_STORE_TABLE") {
            config.table = table;
        }
        if let Some(page_size) = lookup("EVENT_STORE_PAGE_SIZE") {
            config.page_size = page_size
                .parse()
                .with_context(|| format!("EVENT_STORE_PAGE_SIZE={page_size}"))?;
        }
        if let Some(attempts) = lookup("EVENT_STORE_CAS_ATTEMPTS") {
            config.cas_attempts = attempts
                .parse()
                .with_context(|| format!("EVENT_STORE_CAS_ATTEMPTS={attempts}"))?;
        }
        if let Some(delay) = lookup("EVENT_STORE_CAS_INITIAL_DELAY_MS") {
            config.cas_initial_delay_ms = delay
                .parse()
                .with_context(|| format!("EVENT_STORE_CAS_INITIAL_DELAY_MS={delay}"))?;
        }
        if let Some(port) = lookup("EVENT_STORE_METRICS_PORT") {
            config.metrics_port = port
                .parse()
                .with_context(|| format!("EVENT_STORE_METRICS_PORT={port}"))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("at least one ScyllaDB node is required");
        }
        for (field, value) in [("keyspace", &self.keyspace), ("table", &self.table)] {
            if !is_identifier(value) {
                bail!("{field} {value:?} is not a valid CQL identifier");
            }
        }
        if self.page_size == 0 {
            bail!("page_size must be positive");
        }
        if self.cas_attempts == 0 {
            bail!("cas_attempts must be positive");
        }
        Ok(())
    }

    pub fn cas_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.cas_attempts,
            initial_delay: Duration::from_millis(self.cas_initial_delay_ms),
            ..RetryConfig::default()
        }
    }
}

/// Table and keyspace names are spliced into CQL text.
fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
