//! Classified error vocabulary for UPDATE execution.
//!
//! Every failure that leaves the gateway is one [`GatewayError`]. Shard status
//! codes are mapped through one fixed table ([`status_to_result`]) so the same
//! code always yields the same classification.

use thiserror::Error;

/// Status code returned by a shard for a successful mutation.
pub const STATUS_OK: i32 = 0;
// Codes 1-4 mean the addressed shard no longer owns the key.
pub const STATUS_NOT_LEADER: i32 = 1;
pub const STATUS_STALE_EPOCH: i32 = 2;
pub const STATUS_KEY_NOT_IN_RANGE: i32 = 3;
pub const STATUS_RANGE_NOT_FOUND: i32 = 4;
// Codes 10 and up are shard-side mutation failures.
pub const STATUS_SERVER_BUSY: i32 = 10;
pub const STATUS_NO_SPACE_LEFT: i32 = 11;
pub const STATUS_UNKNOWN_COLUMN: i32 = 20;
pub const STATUS_TYPE_MISMATCH: i32 = 21;
pub const STATUS_VALUE_TOO_LARGE: i32 = 22;
pub const STATUS_STORAGE_INTERNAL: i32 = 30;
pub const STATUS_CHECKSUM_MISMATCH: i32 = 31;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Stable machine-readable error class, used in logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCode {
    Validation,
    TableNotFound,
    Translation,
    RouteChanged,
    Mutation,
    Timeout,
    Transport,
}

impl GatewayErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayErrorCode::Validation => "validation",
            GatewayErrorCode::TableNotFound => "table_not_found",
            GatewayErrorCode::Translation => "translation",
            GatewayErrorCode::RouteChanged => "route_changed",
            GatewayErrorCode::Mutation => "mutation",
            GatewayErrorCode::Timeout => "timeout",
            GatewayErrorCode::Transport => "transport",
        }
    }
}

/// Domain meaning of a non-zero, non-routing shard status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationErrorKind {
    ServerBusy,
    NoSpaceLeft,
    UnknownColumn,
    TypeMismatch,
    ValueTooLarge,
    StorageInternal,
    ChecksumMismatch,
    Unknown(i32),
}

impl std::fmt::Display for MutationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationErrorKind::ServerBusy => write!(f, "server is busy"),
            MutationErrorKind::NoSpaceLeft => write!(f, "no space left on shard"),
            MutationErrorKind::UnknownColumn => write!(f, "unknown column"),
            MutationErrorKind::TypeMismatch => write!(f, "column type mismatch"),
            MutationErrorKind::ValueTooLarge => write!(f, "value too large"),
            MutationErrorKind::StorageInternal => write!(f, "storage internal error"),
            MutationErrorKind::ChecksumMismatch => write!(f, "checksum mismatch"),
            MutationErrorKind::Unknown(code) => write!(f, "unknown status code {code}"),
        }
    }
}

/// Classified failure of one UPDATE statement.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("Table '{db}.{table}' doesn't exist")]
    TableNotFound { db: String, table: String },
    #[error("translation error: {0}")]
    Translation(String),
    #[error("route changed for shard {shard_id}: {reason}")]
    RouteChanged { shard_id: u64, reason: String },
    #[error("mutation failed with status {code}: {kind}")]
    Mutation { code: i32, kind: MutationErrorKind },
    #[error("{trace} execute timeout after {attempts} retries ({slept_ms}ms backoff)")]
    Timeout {
        trace: String,
        attempts: u32,
        slept_ms: u64,
    },
    #[error("transport error: {0:#}")]
    Transport(#[source] anyhow::Error),
}

impl GatewayError {
    /// Class of this error for logs and metrics.
    pub fn code(&self) -> GatewayErrorCode {
        match self {
            GatewayError::Validation(_) => GatewayErrorCode::Validation,
            GatewayError::TableNotFound { .. } => GatewayErrorCode::TableNotFound,
            GatewayError::Translation(_) => GatewayErrorCode::Translation,
            GatewayError::RouteChanged { .. } => GatewayErrorCode::RouteChanged,
            GatewayError::Mutation { .. } => GatewayErrorCode::Mutation,
            GatewayError::Timeout { .. } => GatewayErrorCode::Timeout,
            GatewayError::Transport(_) => GatewayErrorCode::Transport,
        }
    }

    /// Only stale routing is retried, and only by the coordinator.
    pub fn is_route_changed(&self) -> bool {
        matches!(self, GatewayError::RouteChanged { .. })
    }

    pub fn route_changed(shard_id: u64, reason: impl Into<String>) -> Self {
        GatewayError::RouteChanged {
            shard_id,
            reason: reason.into(),
        }
    }
}

/// Maps a shard response status to the affected-row count or a classified error.
pub fn status_to_result(shard_id: u64, code: i32, affected_rows: u64) -> GatewayResult<u64> {
    let kind = match code {
        STATUS_OK => return Ok(affected_rows),
        STATUS_NOT_LEADER => return Err(GatewayError::route_changed(shard_id, "not leader")),
        STATUS_STALE_EPOCH => return Err(GatewayError::route_changed(shard_id, "stale epoch")),
        STATUS_KEY_NOT_IN_RANGE => {
            return Err(GatewayError::route_changed(shard_id, "key not in range"))
        }
        STATUS_RANGE_NOT_FOUND => {
            return Err(GatewayError::route_changed(shard_id, "range not found"))
        }
        STATUS_SERVER_BUSY => MutationErrorKind::ServerBusy,
        STATUS_NO_SPACE_LEFT => MutationErrorKind::NoSpaceLeft,
        STATUS_UNKNOWN_COLUMN => MutationErrorKind::UnknownColumn,
        STATUS_TYPE_MISMATCH => MutationErrorKind::TypeMismatch,
        STATUS_VALUE_TOO_LARGE => MutationErrorKind::ValueTooLarge,
        STATUS_STORAGE_INTERNAL => MutationErrorKind::StorageInternal,
        STATUS_CHECKSUM_MISMATCH => MutationErrorKind::ChecksumMismatch,
        other => MutationErrorKind::Unknown(other),
    };
    Err(GatewayError::Mutation { code, kind })
}
