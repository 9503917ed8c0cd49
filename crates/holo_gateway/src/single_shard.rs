//! One mutation RPC against the shard that currently owns a key.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backoff::ReqContext;
use crate::catalog::TableHandle;
use crate::error::{status_to_result, GatewayResult};
use crate::metrics::GatewayMetrics;
use crate::proxy::KvProxyPool;
use crate::request::ShardUpdateRequest;
use crate::routing::KeyLocation;
use crate::transport::RpcTimeouts;

/// Result of one shard visit.
///
/// `route` is the ownership record the RPC was sent on; range walks advance
/// their cursor to `route.end_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOutcome {
    pub affected_rows: u64,
    pub route: KeyLocation,
}

/// Issues single-shard mutations through pooled client handles.
pub struct ShardExecutor {
    pool: Arc<KvProxyPool>,
    timeouts: RpcTimeouts,
    metrics: Arc<GatewayMetrics>,
}

impl ShardExecutor {
    /// Binds the executor to a pool and the RPC timeouts handles are configured with.
    pub fn new(
        pool: Arc<KvProxyPool>,
        timeouts: RpcTimeouts,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            pool,
            timeouts,
            metrics,
        }
    }

    /// Counters shared with the coordinator.
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Sends `request` to the owner of `request.key` and classifies the reply.
    pub async fn update_shard(
        &self,
        ctx: &ReqContext,
        table: &TableHandle,
        request: ShardUpdateRequest,
    ) -> GatewayResult<ShardOutcome> {
        let proxy = self.pool.acquire(table.shard_map().clone(), self.timeouts);
        let route = proxy.locate(&request.key)?;
        self.metrics.record_shard_visit();
        let response = proxy.update(ctx, &route, request).await?;

        match status_to_result(route.shard_id, response.code, response.affected_rows) {
            Ok(affected_rows) => {
                debug!(
                    trace = %ctx.trace(),
                    shard_id = route.shard_id,
                    affected_rows,
                    "shard update applied"
                );
                Ok(ShardOutcome {
                    affected_rows,
                    route,
                })
            }
            Err(err) => {
                if !err.is_route_changed() {
                    warn!(
                        trace = %ctx.trace(),
                        table = %table.qualified_name(),
                        shard_id = route.shard_id,
                        code = response.code,
                        error = %err,
                        "shard rejected update"
                    );
                }
                Err(err)
            }
        }
    }
}
