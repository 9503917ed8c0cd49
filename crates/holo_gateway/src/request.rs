//! Structured UPDATE request model and the per-shard wire payload.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Half-open key interval `[start, end)` over the shard key space.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    start: Vec<u8>,
    end: Vec<u8>,
}

impl Scope {
    /// Builds a scope, rejecting `start > end` in byte order.
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> GatewayResult<Self> {
        let start = start.into();
        let end = end.into();
        if start > end {
            return Err(GatewayError::Validation(format!(
                "scope start {} is after end {}",
                hex::encode(&start),
                hex::encode(&end)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> &[u8] {
        &self.start
    }

    pub fn end(&self) -> &[u8] {
        &self.end
    }

    /// A point scope covers no keys and must not be walked.
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && key < self.end.as_slice()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", hex::encode(&self.start), hex::encode(&self.end))
    }
}

/// Row-count budget shared by every shard a request touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub row_count: u64,
}

impl Limit {
    pub fn new(row_count: u64) -> Self {
        Self { row_count }
    }

    /// Budget left after `consumed` rows, or `None` once exhausted.
    pub fn remaining(self, consumed: u64) -> Option<Limit> {
        (self.row_count > consumed).then(|| Limit::new(self.row_count - consumed))
    }
}

/// What a request mutates: one primary-key row or a key range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateTarget {
    SingleKey(Vec<u8>),
    ScopeRange(Scope),
}

/// How a `SET` assignment combines with the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOp {
    Assign,
    Increment,
    Decrement,
}

/// One compiled `SET column = ...` assignment, forwarded unchanged to shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMutation {
    pub column_id: u64,
    pub column: String,
    pub op: FieldOp,
    pub value: Vec<u8>,
}

/// Comparison applied by a compiled filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOp {
    Eq,
    NotEq,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl MatchOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            MatchOp::Eq => "=",
            MatchOp::NotEq => "<>",
            MatchOp::Less => "<",
            MatchOp::LessOrEqual => "<=",
            MatchOp::Greater => ">",
            MatchOp::GreaterOrEqual => ">=",
        }
    }
}

/// Compiled `WHERE` predicate evaluated by the shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column_id: u64,
    pub column: String,
    pub op: MatchOp,
    pub threshold: Vec<u8>,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} 0x{}",
            self.column,
            self.op.as_sql(),
            hex::encode(&self.threshold)
        )
    }
}

/// Fully resolved UPDATE handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub target: UpdateTarget,
    pub fields: Vec<FieldMutation>,
    pub filters: Vec<Filter>,
    pub limit: Option<Limit>,
}

impl UpdateRequest {
    pub fn single_key(key: impl Into<Vec<u8>>, fields: Vec<FieldMutation>) -> Self {
        Self {
            target: UpdateTarget::SingleKey(key.into()),
            fields,
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn scope(scope: Scope, fields: Vec<FieldMutation>) -> Self {
        Self {
            target: UpdateTarget::ScopeRange(scope),
            fields,
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Payload of one mutation RPC against one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardUpdateRequest {
    pub key: Vec<u8>,
    pub scope: Option<Scope>,
    pub fields: Vec<FieldMutation>,
    pub filters: Vec<Filter>,
    pub limit: Option<Limit>,
}

/// Shard reply: status code plus rows actually mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub code: i32,
    pub affected_rows: u64,
}

impl UpdateResponse {
    pub fn ok(affected_rows: u64) -> Self {
        Self {
            code: crate::error::STATUS_OK,
            affected_rows,
        }
    }

    pub fn status(code: i32) -> Self {
        Self {
            code,
            affected_rows: 0,
        }
    }
}

/// Outcome of a whole statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub affected_rows: u64,
}
