//! Validation and translation of an upstream-parsed UPDATE statement.
//!
//! Everything here runs before any shard is contacted: column names are
//! resolved to ids, `LIMIT` offsets are rejected, and the target defaults to
//! the table's whole key span when upstream did not narrow it.

use crate::catalog::TableHandle;
use crate::error::{GatewayError, GatewayResult};
use crate::request::{
    FieldMutation, FieldOp, Filter, Limit, MatchOp, Scope, UpdateRequest, UpdateTarget,
};

/// `SET column <op> value`, with the value already encoded for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub column: String,
    pub op: FieldOp,
    pub value: Vec<u8>,
}

/// One conjunct of the `WHERE` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub column: String,
    pub op: MatchOp,
    pub value: Vec<u8>,
}

/// `LIMIT offset, count`; only a zero offset is executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitClause {
    pub offset: u64,
    pub count: u64,
}

/// Parsed UPDATE as produced by the SQL front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub matches: Vec<Match>,
    pub limit: Option<LimitClause>,
    /// Primary-key key or scope derived upstream from `matches`, if any.
    pub target: Option<UpdateTarget>,
}

impl UpdateStatement {
    pub fn new(table: impl Into<String>, assignments: Vec<Assignment>) -> Self {
        Self {
            table: table.into(),
            assignments,
            matches: Vec::new(),
            limit: None,
            target: None,
        }
    }
}

/// Builds the executable request for `statement` against `table`.
pub fn prepare_update(table: &TableHandle, statement: &UpdateStatement) -> GatewayResult<UpdateRequest> {
    let fields = translate_fields(table, &statement.assignments)?;
    let filters = translate_matches(table, &statement.matches)?;
    let limit = statement.limit.map(translate_limit).transpose()?;
    let target = resolve_target(table, statement.target.as_ref())?;
    Ok(UpdateRequest {
        target,
        fields,
        filters,
        limit,
    })
}

fn translate_fields(table: &TableHandle, assignments: &[Assignment]) -> GatewayResult<Vec<FieldMutation>> {
    if assignments.is_empty() {
        return Err(GatewayError::Validation(
            "update requires at least one assignment".to_string(),
        ));
    }
    assignments
        .iter()
        .map(|assignment| {
            let column = table.find_column(&assignment.column).ok_or_else(|| {
                GatewayError::Translation(format!(
                    "parse update exprs failed: unknown column '{}' in table {}",
                    assignment.column,
                    table.qualified_name()
                ))
            })?;
            Ok(FieldMutation {
                column_id: column.id,
                column: column.name.clone(),
                op: assignment.op,
                value: assignment.value.clone(),
            })
        })
        .collect()
}

fn translate_matches(table: &TableHandle, matches: &[Match]) -> GatewayResult<Vec<Filter>> {
    matches
        .iter()
        .map(|item| {
            let column = table.find_column(&item.column).ok_or_else(|| {
                GatewayError::Translation(format!(
                    "convert filter failed: unknown column '{}' in table {}",
                    item.column,
                    table.qualified_name()
                ))
            })?;
            Ok(Filter {
                column_id: column.id,
                column: column.name.clone(),
                op: item.op,
                threshold: item.value.clone(),
            })
        })
        .collect()
}

fn translate_limit(clause: LimitClause) -> GatewayResult<Limit> {
    if clause.offset != 0 {
        return Err(GatewayError::Validation(
            "parse update limit failed: unsupported limit offset".to_string(),
        ));
    }
    Ok(Limit::new(clause.count))
}

/// Confines the upstream target to the table's key span.
fn resolve_target(table: &TableHandle, target: Option<&UpdateTarget>) -> GatewayResult<UpdateTarget> {
    let table_span = Scope::new(table.key_start(), table.key_end())?;
    match target {
        None => Ok(UpdateTarget::ScopeRange(table_span)),
        Some(UpdateTarget::SingleKey(key)) => {
            if !table_span.contains(key) {
                return Err(GatewayError::Validation(format!(
                    "key {} is outside table {}",
                    hex::encode(key),
                    table.qualified_name()
                )));
            }
            Ok(UpdateTarget::SingleKey(key.clone()))
        }
        Some(UpdateTarget::ScopeRange(scope)) => {
            let start = scope.start().max(table_span.start());
            let end = scope.end().min(table_span.end());
            // An empty intersection collapses to a point scope, which visits nothing.
            let scope = if start < end {
                Scope::new(start.to_vec(), end.to_vec())?
            } else {
                Scope::new(start.to_vec(), start.to_vec())?
            };
            Ok(UpdateTarget::ScopeRange(scope))
        }
    }
}
