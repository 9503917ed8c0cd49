//! Table handles resolved by `(database, table)` name.
//!
//! A handle carries what the execution layer needs from the schema side:
//! identity for logs, column ids for field/filter translation, the table's
//! key span, and the shard map used to initialize client handles.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::routing::ShardMap;

const DATA_PREFIX_PRIMARY_ROW: u8 = 0x20;

/// Column identity as the shards know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub id: u64,
    pub name: String,
}

impl ColumnDef {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Resolved table: identity, columns, key span and the shard map rows live on.
#[derive(Debug)]
pub struct TableHandle {
    db_name: String,
    table_name: String,
    table_id: u64,
    columns: Vec<ColumnDef>,
    shard_map: Arc<ShardMap>,
}

impl TableHandle {
    /// Builds a handle; the key span is derived from `table_id`.
    pub fn new(
        db_name: impl Into<String>,
        table_name: impl Into<String>,
        table_id: u64,
        columns: Vec<ColumnDef>,
        shard_map: Arc<ShardMap>,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            table_name: table_name.into(),
            table_id,
            columns,
            shard_map,
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn name(&self) -> &str {
        &self.table_name
    }

    pub fn table_id(&self) -> u64 {
        self.table_id
    }

    /// `db.table`, as used in log lines and error messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.db_name, self.table_name)
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Case-insensitive column lookup.
    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Shared, replaceable topology for this table's rows.
    pub fn shard_map(&self) -> &Arc<ShardMap> {
        &self.shard_map
    }

    /// Inclusive first key of the table's row space.
    pub fn key_start(&self) -> Vec<u8> {
        table_key_prefix(self.table_id)
    }

    /// Exclusive end of the table's row space.
    pub fn key_end(&self) -> Vec<u8> {
        prefix_end(&self.key_start()).unwrap_or_default()
    }

    /// Encodes a raw primary-key suffix into a row key of this table.
    pub fn row_key(&self, primary_key: &[u8]) -> Vec<u8> {
        let mut out = self.key_start();
        out.extend_from_slice(primary_key);
        out
    }
}

/// Registry of table handles known to the gateway.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<BTreeMap<(String, String), Arc<TableHandle>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a table handle.
    pub fn register(&self, table: TableHandle) -> Arc<TableHandle> {
        let table = Arc::new(table);
        let key = (
            table.db_name().to_ascii_lowercase(),
            table.name().to_ascii_lowercase(),
        );
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, table.clone());
        table
    }

    /// Case-insensitive lookup by database and table name.
    pub fn find_table(&self, db: &str, table: &str) -> Option<Arc<TableHandle>> {
        let key = (db.to_ascii_lowercase(), table.to_ascii_lowercase());
        self.tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned()
    }
}

fn table_key_prefix(table_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8);
    out.push(DATA_PREFIX_PRIMARY_ROW);
    out.extend_from_slice(&table_id.to_be_bytes());
    out
}

fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    for idx in (0..out.len()).rev() {
        if out[idx] != 0xFF {
            out[idx] = out[idx].saturating_add(1);
            out.truncate(idx + 1);
            return Some(out);
        }
    }
    None
}
