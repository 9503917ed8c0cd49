//! Shard-by-shard execution of a scope UPDATE.
//!
//! The walk visits shards in increasing key order, one at a time, and carries
//! two pieces of state between visits: the cursor (first key not yet covered)
//! and the running affected-row total. With a limit, each shard receives only
//! the budget the earlier shards left over.
//!
//! The state survives a failed visit, so a retry after a route change resumes
//! at the shard that failed instead of re-applying shards already done.

use tracing::{debug, warn};

use crate::backoff::ReqContext;
use crate::catalog::TableHandle;
use crate::error::{GatewayError, GatewayResult};
use crate::request::{Limit, Scope, ShardUpdateRequest, UpdateRequest};
use crate::routing::KeyLocation;
use crate::single_shard::ShardExecutor;

/// Progress of one scope UPDATE across shards.
#[derive(Debug, Clone)]
pub struct RangeWalk {
    scope: Scope,
    cursor: Vec<u8>,
    affected: u64,
    visits: usize,
    done: bool,
    wide_fanout_warn_shards: usize,
}

impl RangeWalk {
    /// Starts a walk at `scope.start`; a degenerate scope is already done.
    pub fn new(scope: Scope, wide_fanout_warn_shards: usize) -> Self {
        Self {
            cursor: scope.start().to_vec(),
            done: scope.is_degenerate(),
            scope,
            affected: 0,
            visits: 0,
            wide_fanout_warn_shards,
        }
    }

    /// First key of the scope not yet covered by a completed visit.
    pub fn cursor(&self) -> &[u8] {
        &self.cursor
    }

    /// Rows mutated by completed visits, after clamping to each sub-limit.
    pub fn affected(&self) -> u64 {
        self.affected
    }

    /// Completed shard visits.
    pub fn visits(&self) -> usize {
        self.visits
    }

    /// True once the scope end, an unbounded route, or the limit stopped the walk.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Part of the scope still to be mutated: `[cursor, scope.end)`.
    pub fn remaining_scope(&self) -> GatewayResult<Scope> {
        Scope::new(self.cursor.clone(), self.scope.end().to_vec())
    }

    /// Budget for the next shard; `None` inside `Some` means unbounded.
    fn next_limit(&self, limit: Option<Limit>) -> Option<Option<Limit>> {
        match limit {
            None => Some(None),
            Some(limit) => limit.remaining(self.affected).map(Some),
        }
    }

    /// Runs (or resumes) the walk until the scope or the limit is exhausted.
    pub async fn run(
        &mut self,
        shards: &ShardExecutor,
        ctx: &ReqContext,
        table: &TableHandle,
        request: &UpdateRequest,
    ) -> GatewayResult<u64> {
        while !self.done {
            let Some(sub_limit) = self.next_limit(request.limit) else {
                debug!(trace = %ctx.trace(), affected = self.affected, "limit reached");
                self.done = true;
                break;
            };

            let shard_request = ShardUpdateRequest {
                key: self.cursor.clone(),
                scope: Some(self.remaining_scope()?),
                fields: request.fields.clone(),
                filters: request.filters.clone(),
                limit: sub_limit,
            };
            let outcome = shards.update_shard(ctx, table, shard_request).await?;

            let mut affected = outcome.affected_rows;
            if let Some(sub_limit) = sub_limit {
                if affected > sub_limit.row_count {
                    warn!(
                        trace = %ctx.trace(),
                        shard_id = outcome.route.shard_id,
                        affected,
                        limit = sub_limit.row_count,
                        "shard reported more rows than its limit"
                    );
                    affected = sub_limit.row_count;
                }
            }
            self.affected = self.affected.saturating_add(affected);
            self.visits += 1;
            self.advance(&outcome.route)?;
        }

        if self.visits >= self.wide_fanout_warn_shards {
            shards.metrics().record_wide_fanout();
            warn!(
                trace = %ctx.trace(),
                table = %table.qualified_name(),
                shards = self.visits,
                scope = ?self.scope,
                "update touched too many ranges"
            );
        }
        Ok(self.affected)
    }

    /// Moves the cursor past the shard just visited.
    ///
    /// A route that ends at or before the cursor is stale; the cursor stays put
    /// so the retry re-resolves the same key against a fresh topology.
    fn advance(&mut self, route: &KeyLocation) -> GatewayResult<()> {
        if route.is_last() {
            self.done = true;
            return Ok(());
        }
        let next = route.end_key.as_slice();
        if next <= self.cursor.as_slice() {
            return Err(GatewayError::route_changed(
                route.shard_id,
                format!(
                    "range walk stalled: route ends at {} which does not pass cursor {}",
                    hex::encode(next),
                    hex::encode(&self.cursor)
                ),
            ));
        }
        if next >= self.scope.end() || next < self.scope.start() {
            self.done = true;
        }
        self.cursor = next.to_vec();
        Ok(())
    }
}
