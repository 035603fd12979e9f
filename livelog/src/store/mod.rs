//! Store - day-sharded storage of log records.
//!
//! One active shard receives appends; older days live in read-only archived
//! shards. Two backends implement [`ShardStore`]: [`SqlShardStore`] keeps each
//! shard in a DuckDB file, [`MemoryShardStore`] keeps everything in memory.

mod atomic;
mod memory;
pub mod partition;
mod sql;

use std::path::PathBuf;

use crate::schema::LogRecord;
use crate::Result;

pub use memory::MemoryShardStore;
pub use sql::{QueryResult, SqlShardStore};

/// Description of one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    /// File identity (the shard's path, or its name for in-memory shards).
    pub file: PathBuf,
    /// True for sealed shards.
    pub archived: bool,
    /// Inclusive lower bound, epoch seconds.
    pub lower: i64,
    /// Exclusive upper bound; `None` for the open-ended active shard.
    pub upper: Option<i64>,
    /// Number of records in the shard.
    pub record_count: usize,
}

impl ShardInfo {
    /// Whether `[lower, upper)` intersects the closed range `[start, end]`.
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        self.lower <= end && self.upper.map_or(true, |upper| upper > start)
    }

    /// Whether an archived shard lies entirely before `cutoff`.
    pub fn is_expired(&self, cutoff: i64) -> bool {
        self.archived && self.upper.is_some_and(|upper| upper < cutoff)
    }
}

/// Result of an archival run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Day shards written or extended.
    pub days_archived: usize,
    /// Records moved out of the active shard.
    pub records_archived: usize,
    /// Archived shards deleted by retention pruning.
    pub shards_pruned: usize,
}

/// A consistent view of the shards relevant to one time range.
///
/// Archival and pruning wait until every snapshot is dropped, so the shards
/// listed here stay readable for the snapshot's lifetime.
pub trait ShardSnapshot {
    /// Relevant shards: archived ones in window order, then the active one.
    fn shards(&self) -> &[ShardInfo];

    /// Stream the records of `shard` with `start <= time <= end` in insertion
    /// order. The visitor returns `false` to stop; the return value tells
    /// whether the scan ran to completion.
    fn scan_shard(
        &self,
        shard: &ShardInfo,
        start: i64,
        end: i64,
        visit: &mut dyn FnMut(LogRecord) -> Result<bool>,
    ) -> Result<bool>;
}

/// Storage engine for the `log` table.
pub trait ShardStore: Send + Sync {
    /// Acquire the active shard. Opening an open store is a no-op.
    fn open(&self) -> Result<()>;

    /// Commit pending writes and release every resource.
    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Append a record to the active shard.
    fn append(&self, record: &LogRecord) -> Result<()>;

    /// Make appended records visible to other readers of the store.
    fn commit(&self) -> Result<()>;

    /// Seal the active shard if `now` crossed its rotation boundary, then
    /// prune. Returns `None` when the boundary was not crossed.
    fn rotate_and_archive(&self, now: i64) -> Result<Option<ArchiveStats>>;

    /// Move every record older than the local day of `now` into its day's
    /// archived shard, prune, and restart the rotation clock at `now`.
    fn archive(&self, now: i64) -> Result<ArchiveStats>;

    /// Delete archived shards older than the retention policy allows.
    /// Returns the number of shards deleted.
    fn prune(&self, now: i64) -> Result<usize>;

    /// Take a consistent view of the shards intersecting `[start, end]`.
    fn snapshot(&self, start: i64, end: i64) -> Result<Box<dyn ShardSnapshot + '_>>;

    /// Shards intersecting `[start, end]`.
    fn relevant_shards(&self, start: i64, end: i64) -> Result<Vec<ShardInfo>> {
        Ok(self.snapshot(start, end)?.shards().to_vec())
    }

    /// Every shard, archived ones first.
    fn historic_contents(&self) -> Result<Vec<ShardInfo>> {
        self.relevant_shards(i64::MIN, i64::MAX)
    }

    /// Number of records in the active shard.
    fn count(&self) -> Result<usize>;
}

/// Pick the shards intersecting `[start, end]` from an ordered layout.
pub(crate) fn select_relevant<'a>(
    archived: impl IntoIterator<Item = &'a ShardInfo>,
    active: ShardInfo,
    start: i64,
    end: i64,
) -> Vec<ShardInfo> {
    let mut shards: Vec<ShardInfo> = archived
        .into_iter()
        .filter(|s| s.intersects(start, end))
        .cloned()
        .collect();
    if active.lower <= end {
        shards.push(active);
    }
    shards
}
