//! Pooled, topology-aware client handles.
//!
//! A [`KvProxy`] is initialized with a table's shard map and RPC timeouts,
//! resolves the current owner of a key, and forwards the mutation through the
//! [`KvTransport`]. Handles are borrowed from [`KvProxyPool`] as a
//! [`PooledProxy`] guard and go back to the pool when the guard drops, on every
//! exit path.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tracing::debug;

use crate::backoff::ReqContext;
use crate::error::{GatewayError, GatewayResult};
use crate::request::{ShardUpdateRequest, UpdateResponse};
use crate::routing::{KeyLocation, ShardMap};
use crate::transport::{KvTransport, RpcTimeouts};

/// Client handle bound to one table's shard map for the duration of a borrow.
pub struct KvProxy {
    transport: Arc<dyn KvTransport>,
    shard_map: Option<Arc<ShardMap>>,
    timeouts: RpcTimeouts,
}

impl KvProxy {
    fn new(transport: Arc<dyn KvTransport>) -> Self {
        Self {
            transport,
            shard_map: None,
            timeouts: RpcTimeouts {
                write: std::time::Duration::ZERO,
                read: std::time::Duration::ZERO,
            },
        }
    }

    fn init(&mut self, shard_map: Arc<ShardMap>, timeouts: RpcTimeouts) {
        self.shard_map = Some(shard_map);
        self.timeouts = timeouts;
    }

    fn reset(&mut self) {
        self.shard_map = None;
    }

    pub fn timeouts(&self) -> RpcTimeouts {
        self.timeouts
    }

    /// Resolves the shard owning `key` from the current topology.
    pub fn locate(&self, key: &[u8]) -> GatewayResult<KeyLocation> {
        let shard_map = self
            .shard_map
            .as_ref()
            .ok_or_else(|| GatewayError::Transport(anyhow!("kv proxy used before init")))?;
        shard_map.locate(key).ok_or_else(|| {
            GatewayError::route_changed(
                0,
                format!("no shard route found for key {}", hex::encode(key)),
            )
        })
    }

    /// Sends one UPDATE to the shard leader recorded in `location`.
    pub async fn update(
        &self,
        ctx: &ReqContext,
        location: &KeyLocation,
        request: ShardUpdateRequest,
    ) -> GatewayResult<UpdateResponse> {
        debug!(
            trace = %ctx.trace(),
            shard_id = location.shard_id,
            epoch = location.epoch,
            leader = location.leader,
            key = %hex::encode(&request.key),
            "send update rpc"
        );
        tokio::time::timeout(
            self.timeouts.round_trip(),
            self.transport.update(location, request, self.timeouts),
        )
        .await
        .map_err(|_| {
            GatewayError::Transport(anyhow!(
                "update rpc timed out for shard {} on node {}",
                location.shard_id,
                location.leader
            ))
        })?
    }
}

/// Free list of client handles shared by all in-flight statements.
pub struct KvProxyPool {
    transport: Arc<dyn KvTransport>,
    idle: Mutex<Vec<KvProxy>>,
    capacity: usize,
    in_use: AtomicUsize,
    created: AtomicU64,
}

impl KvProxyPool {
    /// Pool keeping at most `capacity` idle handles over `transport`.
    pub fn new(transport: Arc<dyn KvTransport>, capacity: usize) -> Self {
        Self {
            transport,
            idle: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            in_use: AtomicUsize::new(0),
            created: AtomicU64::new(0),
        }
    }

    /// Borrows a handle configured for `shard_map`; it is returned when the guard drops.
    pub fn acquire(&self, shard_map: Arc<ShardMap>, timeouts: RpcTimeouts) -> PooledProxy<'_> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let mut proxy = reused.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            KvProxy::new(self.transport.clone())
        });
        proxy.init(shard_map, timeouts);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        PooledProxy {
            pool: self,
            proxy: Some(proxy),
        }
    }

    fn release(&self, mut proxy: KvProxy) {
        proxy.reset();
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < self.capacity {
            idle.push(proxy);
        }
    }

    /// Handles currently borrowed.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Handles ever constructed; stays flat when reuse works.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

/// Scoped borrow of a [`KvProxy`].
///
/// The handle is held until the guard drops and then goes back to the pool.
pub struct PooledProxy<'a> {
    pool: &'a KvProxyPool,
    proxy: Option<KvProxy>,
}

impl PooledProxy<'_> {
    /// The borrowed handle; only absent while the guard is being dropped.
    pub fn handle(&self) -> GatewayResult<&KvProxy> {
        self.proxy
            .as_ref()
            .ok_or_else(|| GatewayError::Transport(anyhow!("kv proxy already released")))
    }

    /// See [`KvProxy::locate`].
    pub fn locate(&self, key: &[u8]) -> GatewayResult<KeyLocation> {
        self.handle()?.locate(key)
    }

    /// See [`KvProxy::update`].
    pub async fn update(
        &self,
        ctx: &ReqContext,
        location: &KeyLocation,
        request: ShardUpdateRequest,
    ) -> GatewayResult<UpdateResponse> {
        self.handle()?.update(ctx, location, request).await
    }
}

impl Drop for PooledProxy<'_> {
    fn drop(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            self.pool.release(proxy);
        }
    }
}
