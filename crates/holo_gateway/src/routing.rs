//! Shard ownership map used to route keys to the range that owns them.
//!
//! The map holds sorted, non-overlapping `[start_key, end_key)` ranges. An
//! empty `start_key` means unbounded below and an empty `end_key` unbounded
//! above. Publishing a new topology swaps the whole snapshot, so a lookup never
//! sees a half-applied change.

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// One range and the node that currently leads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRange {
    pub shard_id: u64,
    /// Bumped by the cluster on every split, merge, or leader move.
    pub epoch: u64,
    pub leader: u64,
    /// Inclusive start key.
    pub start_key: Vec<u8>,
    /// Exclusive end key, empty means unbounded.
    pub end_key: Vec<u8>,
}

/// Ownership record for one key at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLocation {
    pub shard_id: u64,
    pub epoch: u64,
    pub leader: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl KeyLocation {
    /// Returns `true` when the owning range has no upper bound.
    pub fn is_last(&self) -> bool {
        self.end_key.is_empty()
    }
}

impl From<&ShardRange> for KeyLocation {
    fn from(range: &ShardRange) -> Self {
        Self {
            shard_id: range.shard_id,
            epoch: range.epoch,
            leader: range.leader,
            start_key: range.start_key.clone(),
            end_key: range.end_key.clone(),
        }
    }
}

/// Shared, replaceable view of a table's shard layout.
#[derive(Debug, Default)]
pub struct ShardMap {
    ranges: RwLock<Arc<Vec<ShardRange>>>,
}

impl ShardMap {
    /// Builds a map from unsorted ranges, rejecting overlaps.
    pub fn new(ranges: Vec<ShardRange>) -> Result<Self> {
        let ranges = validate_ranges(ranges)?;
        Ok(Self {
            ranges: RwLock::new(Arc::new(ranges)),
        })
    }

    /// Publishes the `shards` section of a cluster-state JSON document.
    ///
    /// The whole document is validated before the swap, so a malformed
    /// payload leaves the previous topology in place.
    pub fn apply_cluster_state_json(&self, raw: &str) -> Result<()> {
        let parsed: ClusterStateView =
            serde_json::from_str(raw).context("parse cluster state json")?;
        let ranges = parsed
            .shards
            .into_iter()
            .map(|shard| ShardRange {
                shard_id: shard.shard_id,
                epoch: shard.epoch,
                leader: shard.leaseholder,
                start_key: shard.start_key,
                end_key: shard.end_key,
            })
            .collect();
        self.replace(ranges)
    }

    /// Current topology snapshot.
    pub fn snapshot(&self) -> Arc<Vec<ShardRange>> {
        self.ranges
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Publishes a new topology, e.g. after a split or merge.
    pub fn replace(&self, ranges: Vec<ShardRange>) -> Result<()> {
        let ranges = Arc::new(validate_ranges(ranges)?);
        *self
            .ranges
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = ranges;
        Ok(())
    }

    /// Finds the range owning `key`.
    pub fn locate(&self, key: &[u8]) -> Option<KeyLocation> {
        let ranges = self.snapshot();
        // Ranges are sorted by start key; the owner is the last range starting at or before `key`.
        let idx = ranges.partition_point(|range| range.start_key.as_slice() <= key);
        let range = ranges.get(idx.checked_sub(1)?)?;
        key_in_range(key, &range.start_key, &range.end_key).then(|| KeyLocation::from(range))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Sorts ranges and rejects overlaps and inverted bounds.
fn validate_ranges(mut ranges: Vec<ShardRange>) -> Result<Vec<ShardRange>> {
    ranges.sort_by(|left, right| left.start_key.cmp(&right.start_key));
    for range in &ranges {
        if !range.end_key.is_empty() && range.start_key >= range.end_key {
            return Err(anyhow!(
                "shard {} has empty or inverted range [{}, {})",
                range.shard_id,
                hex::encode(&range.start_key),
                hex::encode(&range.end_key)
            ));
        }
    }
    for pair in ranges.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        if left.end_key.is_empty() || left.end_key > right.start_key {
            return Err(anyhow!(
                "shard {} overlaps shard {} at {}",
                left.shard_id,
                right.shard_id,
                hex::encode(&right.start_key)
            ));
        }
    }
    Ok(ranges)
}

/// Checks whether `key` is within `[start, end)` where empty bounds are open.
pub fn key_in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    let in_start = start.is_empty() || key >= start;
    let in_end = end.is_empty() || key < end;
    in_start && in_end
}

/// Wire model for cluster state JSON payload.
#[derive(Debug, Deserialize)]
struct ClusterStateView {
    #[serde(default)]
    shards: Vec<ShardView>,
}

/// Wire model for shard entries in cluster state JSON.
#[derive(Debug, Deserialize)]
struct ShardView {
    shard_id: u64,
    #[serde(default)]
    epoch: u64,
    leaseholder: u64,
    #[serde(default)]
    start_key: Vec<u8>,
    #[serde(default)]
    end_key: Vec<u8>,
}
