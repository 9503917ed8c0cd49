//! UPDATE execution layer of the HoloGateway SQL-to-key/value gateway.
//!
//! The gateway sits in front of a range-partitioned HoloStore cluster. An
//! upstream SQL front-end hands it a parsed UPDATE; this crate resolves the
//! table, translates the statement into a structured request, and drives it
//! against the owning shard(s):
//! - a primary-key update is one shard visit,
//! - a scope update walks shards in key order with a shared row-limit budget,
//! - a stale shard route is retried under a bounded backoff budget.
//!
//! [`HoloGateway`] is the composition root that wires configuration, the
//! catalog, the proxy pool, metrics, and the transport together.

use std::sync::Arc;

use tracing::{debug, error, info};

pub mod backoff;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod range_walk;
pub mod request;
pub mod routing;
pub mod single_shard;
pub mod statement;
pub mod transport;

pub use catalog::{Catalog, ColumnDef, TableHandle};
pub use config::GatewayConfig;
pub use coordinator::UpdateCoordinator;
pub use error::{GatewayError, GatewayErrorCode, GatewayResult, MutationErrorKind};
pub use metrics::{GatewayMetrics, GatewayMetricsSnapshot};
pub use proxy::KvProxyPool;
pub use request::{
    FieldMutation, FieldOp, Filter, Limit, MatchOp, Scope, ShardUpdateRequest, UpdateRequest,
    UpdateResponse, UpdateResult, UpdateTarget,
};
pub use routing::{KeyLocation, ShardMap, ShardRange};
pub use statement::{prepare_update, Assignment, LimitClause, Match, UpdateStatement};
pub use transport::{KvTransport, RpcTimeouts};

/// One gateway instance: shared catalog, proxy pool and metrics over a transport.
pub struct HoloGateway {
    config: GatewayConfig,
    catalog: Arc<Catalog>,
    pool: Arc<KvProxyPool>,
    metrics: Arc<GatewayMetrics>,
    coordinator: UpdateCoordinator,
}

impl HoloGateway {
    /// Wires a gateway over `transport` with an empty catalog.
    pub fn new(config: GatewayConfig, transport: Arc<dyn KvTransport>) -> Self {
        let pool = Arc::new(KvProxyPool::new(transport, config.proxy_pool_capacity));
        let metrics = Arc::new(GatewayMetrics::default());
        let coordinator = UpdateCoordinator::new(pool.clone(), &config, metrics.clone());
        Self {
            config,
            catalog: Arc::new(Catalog::new()),
            pool,
            metrics,
            coordinator,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Tables known to this gateway; register handles here before routing to them.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Client handle pool shared by all in-flight statements.
    pub fn pool(&self) -> &Arc<KvProxyPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Publishes a cluster-state document as the shard layout of `db.table`.
    pub fn apply_cluster_state(&self, db: &str, table: &str, raw: &str) -> GatewayResult<()> {
        let handle = self
            .catalog
            .find_table(db, table)
            .ok_or_else(|| GatewayError::TableNotFound {
                db: db.to_string(),
                table: table.to_string(),
            })?;
        handle
            .shard_map()
            .apply_cluster_state_json(raw)
            .map_err(GatewayError::Transport)?;
        info!(
            table = %handle.qualified_name(),
            shards = handle.shard_map().len(),
            "shard topology published"
        );
        Ok(())
    }

    /// Runs an already-translated request.
    pub async fn execute_update(
        &self,
        table: &TableHandle,
        request: &UpdateRequest,
    ) -> GatewayResult<UpdateResult> {
        self.coordinator.execute(table, request).await
    }

    /// Resolves, validates and executes one UPDATE statement against `db`.
    ///
    /// Every validation failure is raised before a shard is contacted.
    pub async fn handle_update(
        &self,
        db: &str,
        statement: UpdateStatement,
    ) -> GatewayResult<UpdateResult> {
        let Some(table) = self.catalog.find_table(db, &statement.table) else {
            let err = GatewayError::TableNotFound {
                db: db.to_string(),
                table: statement.table.clone(),
            };
            error!(db, table = %statement.table, error = %err, "find table failed");
            self.metrics.record_failure(err.code());
            return Err(err);
        };

        let request = match prepare_update(&table, &statement) {
            Ok(request) => request,
            Err(err) => {
                debug!(table = %table.qualified_name(), error = %err, "prepare update failed");
                self.metrics.record_failure(err.code());
                return Err(err);
            }
        };
        self.execute_update(&table, &request).await
    }
}
