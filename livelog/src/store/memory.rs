//! In-memory shard store.
//!
//! Same day partitioning and locking discipline as the DuckDB backend, with
//! shards kept as vectors. Data survives `close()`/`open()` for the lifetime
//! of the value.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use super::partition::{self, archive_file_name};
use super::{select_relevant, ArchiveStats, ShardInfo, ShardSnapshot, ShardStore};
use crate::config::{Config, RetentionPolicy};
use crate::schema::LogRecord;
use crate::{Error, Result};

struct ArchivedShard {
    info: ShardInfo,
    records: Vec<LogRecord>,
}

struct ActiveShard {
    open: bool,
    records: Vec<LogRecord>,
    since: i64,
    next_rotation: i64,
}

/// Shard store keeping every shard in memory.
pub struct MemoryShardStore {
    config: Config,
    layout: RwLock<BTreeMap<NaiveDate, ArchivedShard>>,
    active: Mutex<ActiveShard>,
}

impl MemoryShardStore {
    /// Create a closed store; shard names are derived from `config`.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            layout: RwLock::new(BTreeMap::new()),
            active: Mutex::new(ActiveShard {
                open: false,
                records: Vec::new(),
                since: 0,
                next_rotation: 0,
            }),
        }
    }

    /// Create and open a store.
    pub fn open_new(config: Config) -> Result<Self> {
        let store = Self::new(config);
        store.open()?;
        Ok(store)
    }

    fn not_open(&self) -> Error {
        Error::NotOpen(self.config.database_file.clone())
    }

    fn archive_locked(
        &self,
        layout: &mut BTreeMap<NaiveDate, ArchivedShard>,
        active: &mut ActiveShard,
        now: i64,
    ) -> ArchiveStats {
        let today = partition::start_of_day(now);
        let mut by_day: BTreeMap<NaiveDate, Vec<LogRecord>> = BTreeMap::new();
        let mut keep = Vec::new();
        for record in active.records.drain(..) {
            match partition::local_date(record.time) {
                Some(date) if record.time < today => by_day.entry(date).or_default().push(record),
                _ => keep.push(record),
            }
        }

        let mut stats = ArchiveStats {
            records_archived: by_day.values().map(Vec::len).sum(),
            ..Default::default()
        };
        stats.days_archived = by_day.len();

        for (date, records) in by_day {
            let shard = layout.entry(date).or_insert_with(|| {
                let (lower, upper) = partition::day_window(date);
                let name = archive_file_name(
                    &self.config.archive_stem(),
                    &self.config.archive_extension(),
                    date,
                );
                ArchivedShard {
                    info: ShardInfo {
                        file: self.config.archive_path.join(name),
                        archived: true,
                        lower,
                        upper: Some(upper),
                        record_count: 0,
                    },
                    records: Vec::new(),
                }
            });
            shard.records.extend(records);
            shard.info.record_count = shard.records.len();
        }

        active.records = keep;
        active.since = today;
        active.next_rotation = partition::next_midnight(now);
        stats.shards_pruned = self.prune_locked(layout, now);

        if stats.records_archived > 0 {
            tracing::info!(
                days = stats.days_archived,
                records = stats.records_archived,
                "archived in-memory log shards"
            );
        }
        stats
    }

    fn prune_locked(&self, layout: &mut BTreeMap<NaiveDate, ArchivedShard>, now: i64) -> usize {
        let Some(cutoff) = self.config.max_logs_age.cutoff(now) else {
            if let RetentionPolicy::Invalid(raw) = &self.config.max_logs_age {
                tracing::warn!(max_logs_age = %raw, "retention policy is invalid, not pruning");
            }
            return 0;
        };
        let before = layout.len();
        layout.retain(|_, shard| !shard.info.is_expired(cutoff));
        before - layout.len()
    }
}

impl ShardStore for MemoryShardStore {
    fn open(&self) -> Result<()> {
        let mut active = self.active.lock();
        if !active.open {
            let now = Utc::now().timestamp();
            active.open = true;
            let oldest = active.records.iter().map(|r| r.time).min().unwrap_or(now);
            active.since = partition::start_of_day(now);
            active.next_rotation = partition::next_midnight(oldest.min(now));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.active.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.active.lock().open
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let mut active = self.active.lock();
        if !active.open {
            return Err(self.not_open());
        }
        active.records.push(record.clone());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if !self.active.lock().open {
            return Err(self.not_open());
        }
        Ok(())
    }

    fn rotate_and_archive(&self, now: i64) -> Result<Option<ArchiveStats>> {
        let mut layout = self.layout.write();
        let mut active = self.active.lock();
        if !active.open {
            return Err(self.not_open());
        }
        if now < active.next_rotation {
            return Ok(None);
        }
        Ok(Some(self.archive_locked(&mut layout, &mut active, now)))
    }

    fn archive(&self, now: i64) -> Result<ArchiveStats> {
        let mut layout = self.layout.write();
        let mut active = self.active.lock();
        if !active.open {
            return Err(self.not_open());
        }
        Ok(self.archive_locked(&mut layout, &mut active, now))
    }

    fn prune(&self, now: i64) -> Result<usize> {
        let mut layout = self.layout.write();
        Ok(self.prune_locked(&mut layout, now))
    }

    fn snapshot(&self, start: i64, end: i64) -> Result<Box<dyn ShardSnapshot + '_>> {
        let layout = self.layout.read();
        let active = self.active.lock();
        if !active.open {
            return Err(self.not_open());
        }

        let lower = active
            .records
            .iter()
            .map(|r| r.time)
            .min()
            .map_or(active.since, |t| t.min(active.since));
        let active_info = ShardInfo {
            file: self.config.database_file.clone(),
            archived: false,
            lower,
            upper: None,
            record_count: active.records.len(),
        };

        let shards = select_relevant(layout.values().map(|s| &s.info), active_info, start, end);
        let active_records = if shards.last().is_some_and(|s| !s.archived) {
            active.records.clone()
        } else {
            Vec::new()
        };

        Ok(Box::new(MemorySnapshot {
            layout,
            active_records,
            active_file: self.config.database_file.clone(),
            shards,
        }))
    }

    fn count(&self) -> Result<usize> {
        let active = self.active.lock();
        if !active.open {
            return Err(self.not_open());
        }
        Ok(active.records.len())
    }
}

struct MemorySnapshot<'a> {
    layout: RwLockReadGuard<'a, BTreeMap<NaiveDate, ArchivedShard>>,
    active_records: Vec<LogRecord>,
    active_file: PathBuf,
    shards: Vec<ShardInfo>,
}

impl ShardSnapshot for MemorySnapshot<'_> {
    fn shards(&self) -> &[ShardInfo] {
        &self.shards
    }

    fn scan_shard(
        &self,
        shard: &ShardInfo,
        start: i64,
        end: i64,
        visit: &mut dyn FnMut(LogRecord) -> Result<bool>,
    ) -> Result<bool> {
        let records = if shard.archived {
            self.layout
                .values()
                .find(|s| s.info.file == shard.file)
                .map(|s| s.records.as_slice())
        } else if shard.file == self.active_file {
            Some(self.active_records.as_slice())
        } else {
            None
        };
        let records = records
            .ok_or_else(|| Error::Storage(format!("Unknown shard: {}", shard.file.display())))?;

        for record in records.iter().filter(|r| r.time >= start && r.time <= end) {
            if !visit(record.clone())? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::partition::{day_window, local_date};
    use chrono::Days;

    fn record(time: i64, log_type: &str) -> LogRecord {
        LogRecord {
            time,
            log_type: log_type.to_string(),
            host_name: "test_host_0".to_string(),
            ..Default::default()
        }
    }

    fn store(policy: RetentionPolicy) -> MemoryShardStore {
        let config = Config::with_root("/tmp/livelog-memory").with_max_logs_age(policy);
        MemoryShardStore::open_new(config).unwrap()
    }

    fn today_start() -> i64 {
        partition::start_of_day(Utc::now().timestamp())
    }

    fn days_ago(n: u64) -> NaiveDate {
        local_date(Utc::now().timestamp())
            .unwrap()
            .checked_sub_days(Days::new(n))
            .unwrap()
    }

    #[test]
    fn test_append_requires_open() {
        let store = MemoryShardStore::new(Config::with_root("/tmp/x"));
        assert!(matches!(store.append(&record(1, "HOST ALERT")), Err(Error::NotOpen(_))));
        store.open().unwrap();
        store.append(&record(1, "HOST ALERT")).unwrap();
        store.close().unwrap();
        assert!(!store.is_open());
        store.open().unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_archive_splits_by_day() {
        let store = store(RetentionPolicy::Days(30));
        for (n, count) in [(4u64, 2usize), (3, 4), (2, 6), (1, 8)] {
            let (start, _) = day_window(days_ago(n));
            for i in 0..count {
                store.append(&record(start + 43_200 + i as i64, "HOST ALERT")).unwrap();
            }
        }
        store.append(&record(today_start() + 1, "HOST ALERT")).unwrap();

        let stats = store.archive(Utc::now().timestamp()).unwrap();
        assert_eq!(stats.days_archived, 4);
        assert_eq!(stats.records_archived, 20);

        let contents = store.historic_contents().unwrap();
        let counts: Vec<usize> = contents.iter().map(|s| s.record_count).collect();
        assert_eq!(counts, vec![2, 4, 6, 8, 1]);
        assert!(contents[..4].iter().all(|s| s.archived));
        assert!(!contents[4].archived);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_archive_keeps_undated_records_active() {
        let store = store(RetentionPolicy::Days(30));
        let (yesterday, _) = day_window(days_ago(1));
        store.append(&record(-9_000_000_000_000_000, "HOST ALERT")).unwrap();
        store.append(&record(yesterday + 60, "HOST ALERT")).unwrap();
        store.append(&record(Utc::now().timestamp(), "HOST ALERT")).unwrap();

        let stats = store.archive(Utc::now().timestamp()).unwrap();
        assert_eq!(stats.days_archived, 1);
        assert_eq!(stats.records_archived, 1);
        assert_eq!(store.count().unwrap(), 2);

        let contents = store.historic_contents().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].lower, yesterday);
        assert_eq!(contents[0].record_count, 1);
    }

    #[test]
    fn test_rotate_before_boundary_is_noop() {
        let store = store(RetentionPolicy::Days(7));
        store.append(&record(today_start() - 10, "HOST ALERT")).unwrap();
        assert_eq!(store.rotate_and_archive(Utc::now().timestamp()).unwrap(), None);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_prune_respects_policy() {
        let store = store(RetentionPolicy::Days(2));
        let (old, _) = day_window(days_ago(5));
        let (recent, _) = day_window(days_ago(1));
        store.append(&record(old + 60, "HOST ALERT")).unwrap();
        store.append(&record(recent + 60, "HOST ALERT")).unwrap();

        let stats = store.archive(Utc::now().timestamp()).unwrap();
        assert_eq!(stats.shards_pruned, 1);
        let archived: Vec<ShardInfo> = store
            .historic_contents()
            .unwrap()
            .into_iter()
            .filter(|s| s.archived)
            .collect();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].lower, recent);
    }

    #[test]
    fn test_invalid_policy_never_prunes() {
        let store = store(RetentionPolicy::Invalid("XxX".to_string()));
        let (old, _) = day_window(days_ago(400));
        store.append(&record(old + 60, "HOST ALERT")).unwrap();
        let stats = store.archive(Utc::now().timestamp()).unwrap();
        assert_eq!(stats.shards_pruned, 0);
        assert_eq!(store.prune(Utc::now().timestamp()).unwrap(), 0);
        assert_eq!(store.historic_contents().unwrap().len(), 2);
    }

    #[test]
    fn test_snapshot_scan_stops_on_request() {
        let store = store(RetentionPolicy::Days(7));
        for t in 0..5 {
            store.append(&record(t, "HOST ALERT")).unwrap();
        }
        let snapshot = store.snapshot(0, 10).unwrap();
        let shard = snapshot.shards()[0].clone();
        let mut seen = Vec::new();
        let complete = snapshot
            .scan_shard(&shard, 1, 10, &mut |r| {
                seen.push(r.time);
                Ok(seen.len() < 2)
            })
            .unwrap();
        assert!(!complete);
        assert_eq!(seen, vec![1, 2]);
    }
}
