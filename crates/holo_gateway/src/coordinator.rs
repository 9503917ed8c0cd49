//! Top-level UPDATE execution: key/scope dispatch and the route-change retry loop.
//!
//! Only a route change is retried here. Every other failure is returned after
//! a single attempt because a shard error or a transport error does not prove
//! the mutation was not applied.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backoff::{BackoffKind, ReqContext};
use crate::catalog::TableHandle;
use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::metrics::GatewayMetrics;
use crate::proxy::KvProxyPool;
use crate::range_walk::RangeWalk;
use crate::request::{ShardUpdateRequest, UpdateRequest, UpdateResult, UpdateTarget};
use crate::single_shard::ShardExecutor;
use crate::transport::RpcTimeouts;

/// Work left for one statement; a range plan keeps its progress across retries.
enum Plan<'a> {
    Key(&'a [u8]),
    Range(RangeWalk),
}

/// Drives one UPDATE to completion, retrying route changes within the backoff budget.
pub struct UpdateCoordinator {
    shards: ShardExecutor,
    max_backoff: Duration,
    wide_fanout_warn_shards: usize,
    metrics: Arc<GatewayMetrics>,
}

impl UpdateCoordinator {
    /// Builds a coordinator that borrows client handles from `pool`.
    pub fn new(
        pool: Arc<KvProxyPool>,
        config: &GatewayConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let timeouts = RpcTimeouts {
            write: config.write_timeout,
            read: config.read_timeout,
        };
        Self {
            shards: ShardExecutor::new(pool, timeouts, metrics.clone()),
            max_backoff: config.max_backoff,
            wide_fanout_warn_shards: config.wide_fanout_warn_shards,
            metrics,
        }
    }

    /// Executes `request` against `table` and returns the total affected rows.
    pub async fn execute(
        &self,
        table: &TableHandle,
        request: &UpdateRequest,
    ) -> GatewayResult<UpdateResult> {
        let mut ctx = ReqContext::new("update", self.max_backoff);
        let span = info_span!("update", trace = %ctx.trace(), table = %table.qualified_name());
        let result = self
            .execute_with_retry(&mut ctx, table, request)
            .instrument(span)
            .await;
        match &result {
            Ok(result) => self.metrics.record_success(result.affected_rows),
            Err(err) => self.metrics.record_failure(err.code()),
        }
        result
    }

    /// Attempt loop for one statement; the plan carries range progress between attempts.
    async fn execute_with_retry(
        &self,
        ctx: &mut ReqContext,
        table: &TableHandle,
        request: &UpdateRequest,
    ) -> GatewayResult<UpdateResult> {
        let mut plan = match &request.target {
            UpdateTarget::SingleKey(key) => Plan::Key(key.as_slice()),
            UpdateTarget::ScopeRange(scope) => {
                Plan::Range(RangeWalk::new(scope.clone(), self.wide_fanout_warn_shards))
            }
        };
        self.metrics.record_update(matches!(plan, Plan::Key(_)));
        if request.limit.is_some_and(|limit| limit.row_count == 0) {
            debug!(trace = %ctx.trace(), "zero limit, nothing to update");
            return Ok(UpdateResult::default());
        }

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                info!(trace = %ctx.trace(), table = %table.name(), attempt, "retry update");
            } else {
                debug!(
                    trace = %ctx.trace(),
                    table = %table.name(),
                    filters = ?request.filters.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "update"
                );
            }

            let outcome = match &mut plan {
                Plan::Key(key) => self
                    .shards
                    .update_shard(ctx, table, single_key_request(key, request))
                    .await
                    .map(|outcome| outcome.affected_rows),
                Plan::Range(walk) => walk.run(&self.shards, ctx, table, request).await,
            };

            match outcome {
                Ok(affected_rows) => {
                    debug!(trace = %ctx.trace(), affected_rows, "execute finish");
                    return Ok(UpdateResult { affected_rows });
                }
                Err(err) if err.is_route_changed() => {
                    warn!(
                        trace = %ctx.trace(),
                        table = %table.name(),
                        error = %err,
                        "route change, retry"
                    );
                    if let Err(timeout) = ctx.backoff(BackoffKind::RouteChange, &err).await {
                        error!(trace = %ctx.trace(), error = %timeout, "execute timeout");
                        return Err(timeout);
                    }
                    self.metrics.record_route_change_retry();
                    attempt += 1;
                }
                Err(err) => {
                    debug!(trace = %ctx.trace(), error = %err, "execute failed");
                    return Err(err);
                }
            }
        }
    }
}

/// Wire payload for a primary-key update: no scope, the request's full limit.
fn single_key_request(key: &[u8], request: &UpdateRequest) -> ShardUpdateRequest {
    ShardUpdateRequest {
        key: key.to_vec(),
        scope: None,
        fields: request.fields.clone(),
        filters: request.filters.clone(),
        limit: request.limit,
    }
}
