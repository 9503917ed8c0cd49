//! Shared helpers for integration tests.
//!
//! [`MemoryCluster`] stands in for the wire layer. Rows are individual keys;
//! an update mutates the keys inside both the shard's range and the request's
//! scope, so tests can see exactly which rows each visit touched. Faults are
//! injected per shard.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use holo_gateway::error::{STATUS_NOT_LEADER, STATUS_OK};
use holo_gateway::routing::key_in_range;
use holo_gateway::{
    FieldMutation, FieldOp, GatewayConfig, GatewayResult, HoloGateway, KeyLocation, KvTransport,
    RpcTimeouts, ShardMap, ShardRange, ShardUpdateRequest, UpdateResponse,
};
use tracing_subscriber::EnvFilter;

/// One RPC observed by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub shard_id: u64,
    pub key: Vec<u8>,
    /// Scope bounds the request carried, if any.
    pub scope: Option<(Vec<u8>, Vec<u8>)>,
    pub limit: Option<u64>,
    pub status: i32,
}

#[derive(Default)]
struct ClusterState {
    /// Row key to number of times it was mutated.
    rows: BTreeMap<Vec<u8>, u32>,
    visits: Vec<Visit>,
    /// Remaining NOT_LEADER replies per shard; `u32::MAX` never runs out.
    route_faults: HashMap<u64, u32>,
    status_faults: HashMap<u64, i32>,
    /// Topology published the first time a route fault fires.
    pending_topology: Option<(Arc<ShardMap>, Vec<ShardRange>)>,
}

/// In-memory shard cluster implementing [`KvTransport`].
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seeds rows whose keys are the given strings.
    pub fn insert_rows(&self, keys: &[&str]) {
        self.insert_row_keys(keys.iter().map(|key| key.as_bytes().to_vec()));
    }

    pub fn insert_row_keys(&self, keys: impl IntoIterator<Item = Vec<u8>>) {
        let mut state = self.lock();
        for key in keys {
            state.rows.entry(key).or_insert(0);
        }
    }

    /// How many times the row at `key` was mutated.
    pub fn times_mutated(&self, key: &[u8]) -> u32 {
        self.lock().rows.get(key).copied().unwrap_or(0)
    }

    /// Keys mutated at least once, in key order.
    pub fn mutated_keys(&self) -> Vec<Vec<u8>> {
        self.lock()
            .rows
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// True when no row was mutated more than once.
    pub fn no_row_mutated_twice(&self) -> bool {
        self.lock().rows.values().all(|count| *count <= 1)
    }

    /// Answers NOT_LEADER for the next `times` visits to `shard_id`.
    pub fn fail_route(&self, shard_id: u64, times: u32) {
        self.lock().route_faults.insert(shard_id, times);
    }

    pub fn fail_route_forever(&self, shard_id: u64) {
        self.fail_route(shard_id, u32::MAX);
    }

    /// Answers every visit to `shard_id` with `status`.
    pub fn fail_status(&self, shard_id: u64, status: i32) {
        self.lock().status_faults.insert(shard_id, status);
    }

    /// Publishes `ranges` into `map` when the next route fault fires.
    pub fn publish_on_route_fault(&self, map: Arc<ShardMap>, ranges: Vec<ShardRange>) {
        self.lock().pending_topology = Some((map, ranges));
    }

    pub fn visits(&self) -> Vec<Visit> {
        self.lock().visits.clone()
    }

    /// Successful visits only, in issue order.
    pub fn applied_shards(&self) -> Vec<u64> {
        self.lock()
            .visits
            .iter()
            .filter(|visit| visit.status == STATUS_OK)
            .map(|visit| visit.shard_id)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KvTransport for MemoryCluster {
    async fn update(
        &self,
        location: &KeyLocation,
        request: ShardUpdateRequest,
        _timeouts: RpcTimeouts,
    ) -> GatewayResult<UpdateResponse> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let shard_id = location.shard_id;
        let limit = request.limit.map(|limit| limit.row_count);

        let mut status = state.status_faults.get(&shard_id).copied().unwrap_or(STATUS_OK);
        if let Some(remaining) = state.route_faults.get_mut(&shard_id) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                status = STATUS_NOT_LEADER;
                if let Some((map, ranges)) = state.pending_topology.take() {
                    map.replace(ranges).expect("publish topology");
                }
            }
        }

        state.visits.push(Visit {
            shard_id,
            key: request.key.clone(),
            scope: request
                .scope
                .as_ref()
                .map(|scope| (scope.start().to_vec(), scope.end().to_vec())),
            limit,
            status,
        });
        if status != STATUS_OK {
            return Ok(UpdateResponse::status(status));
        }

        let budget = limit.map_or(usize::MAX, |limit| limit as usize);
        let targets: Vec<Vec<u8>> = state
            .rows
            .keys()
            .filter(|key| key_in_range(key, &location.start_key, &location.end_key))
            .filter(|key| match &request.scope {
                Some(scope) => scope.contains(key),
                None => **key == request.key,
            })
            .take(budget)
            .cloned()
            .collect();
        for key in &targets {
            if let Some(count) = state.rows.get_mut(key) {
                *count += 1;
            }
        }
        Ok(UpdateResponse::ok(targets.len() as u64))
    }
}

pub fn range(shard_id: u64, start: &[u8], end: &[u8]) -> ShardRange {
    ShardRange {
        shard_id,
        epoch: 1,
        leader: shard_id,
        start_key: start.to_vec(),
        end_key: end.to_vec(),
    }
}

/// Shards `[a,m)` and `[m,z)`.
pub fn two_shards() -> Arc<ShardMap> {
    Arc::new(ShardMap::new(vec![range(1, b"a", b"m"), range(2, b"m", b"z")]).expect("shard map"))
}

/// Shards `[a,g) [g,m) [m,s) [s,z)`.
pub fn four_shards() -> Arc<ShardMap> {
    Arc::new(
        ShardMap::new(vec![
            range(1, b"a", b"g"),
            range(2, b"g", b"m"),
            range(3, b"m", b"s"),
            range(4, b"s", b"z"),
        ])
        .expect("shard map"),
    )
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        max_backoff: Duration::from_millis(200),
        ..GatewayConfig::default()
    }
}

pub fn gateway(cluster: &Arc<MemoryCluster>) -> HoloGateway {
    init_tracing();
    HoloGateway::new(test_config(), cluster.clone())
}

pub fn set_status() -> Vec<FieldMutation> {
    vec![FieldMutation {
        column_id: 2,
        column: "status".to_string(),
        op: FieldOp::Assign,
        value: b"shipped".to_vec(),
    }]
}

/// Installs a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init();
}
