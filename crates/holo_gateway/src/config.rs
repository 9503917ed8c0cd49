//! Runtime knobs for the UPDATE execution path.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default maximum cumulative backoff before a route-changed retry loop gives up.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Shard visits at or above this count are reported as a wide fan-out.
pub const DEFAULT_WIDE_FANOUT_WARN_SHARDS: usize = 3;

/// Runtime configuration for one gateway instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Per-RPC timeout for mutation requests.
    pub write_timeout: Duration,
    /// Per-RPC timeout for route/read requests issued by client handles.
    pub read_timeout: Duration,
    /// Backoff budget for one top-level statement.
    pub max_backoff: Duration,
    /// Idle client handles kept by the proxy pool.
    pub proxy_pool_capacity: usize,
    pub wide_fanout_warn_shards: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(3),
            max_backoff: DEFAULT_MAX_BACKOFF,
            proxy_pool_capacity: 64,
            wide_fanout_warn_shards: DEFAULT_WIDE_FANOUT_WARN_SHARDS,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from `HOLO_GATEWAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let write_timeout_ms = parse_u64(
            std::env::var("HOLO_GATEWAY_WRITE_TIMEOUT_MS").ok(),
            defaults.write_timeout.as_millis() as u64,
        )?
        .max(1);
        let read_timeout_ms = parse_u64(
            std::env::var("HOLO_GATEWAY_READ_TIMEOUT_MS").ok(),
            defaults.read_timeout.as_millis() as u64,
        )?
        .max(1);
        // Zero disables retries: the first route change surfaces as a timeout.
        let max_backoff_ms = parse_u64(
            std::env::var("HOLO_GATEWAY_MAX_BACKOFF_MS").ok(),
            defaults.max_backoff.as_millis() as u64,
        )?;
        let proxy_pool_capacity = parse_usize(
            std::env::var("HOLO_GATEWAY_PROXY_POOL_CAPACITY").ok(),
            defaults.proxy_pool_capacity,
        )?
        .max(1);
        let wide_fanout_warn_shards = parse_usize(
            std::env::var("HOLO_GATEWAY_WIDE_FANOUT_WARN_SHARDS").ok(),
            defaults.wide_fanout_warn_shards,
        )?
        .max(1);

        Ok(Self {
            write_timeout: Duration::from_millis(write_timeout_ms),
            read_timeout: Duration::from_millis(read_timeout_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            proxy_pool_capacity,
            wide_fanout_warn_shards,
        })
    }
}

fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

fn parse_u64(value: Option<String>, default_value: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid u64 value: {raw}")),
        None => Ok(default_value),
    }
}
