//! Seam to the wire layer that actually delivers mutation RPCs to shards.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::request::{ShardUpdateRequest, UpdateResponse};
use crate::routing::KeyLocation;

/// Timeouts a client handle was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTimeouts {
    pub write: Duration,
    pub read: Duration,
}

impl RpcTimeouts {
    /// Upper bound for one request/response round trip.
    pub fn round_trip(self) -> Duration {
        self.write.saturating_add(self.read)
    }
}

/// Delivers one UPDATE to the leader of the shard described by `location`.
///
/// Implementations return the shard's status code untouched; network-level
/// failures are reported as [`crate::GatewayError::Transport`].
#[async_trait]
pub trait KvTransport: Send + Sync + 'static {
    async fn update(
        &self,
        location: &KeyLocation,
        request: ShardUpdateRequest,
        timeouts: RpcTimeouts,
    ) -> GatewayResult<UpdateResponse>;
}
