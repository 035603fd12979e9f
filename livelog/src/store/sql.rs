//! DuckDB shard store.
//!
//! The active shard is the configured database file. Archived shards are
//! one DuckDB file per local day in the archive directory, written once by
//! archival and opened read-only by queries.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use duckdb::{params, types::ValueRef, AccessMode, Connection};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use super::partition::{self, archive_file_name};
use super::{atomic, select_relevant, ArchiveStats, ShardInfo, ShardSnapshot, ShardStore};
use crate::config::{Config, RetentionPolicy};
use crate::schema::LogRecord;
use crate::{Error, Result};

const CREATE_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    seq BIGINT,
    time BIGINT,
    class BIGINT,
    type VARCHAR,
    options VARCHAR,
    message VARCHAR,
    host_name VARCHAR,
    service_description VARCHAR,
    state BIGINT,
    state_type VARCHAR,
    attempt BIGINT,
    plugin_output VARCHAR,
    contact_name VARCHAR,
    command_name VARCHAR,
    comment VARCHAR,
    current_host_groups VARCHAR,
    current_service_groups VARCHAR
)
"#;

const SELECT_RECORDS: &str = r#"
SELECT time, class, type, options, message, host_name, service_description,
       state, state_type, attempt, plugin_output, contact_name, command_name,
       comment, current_host_groups, current_service_groups
FROM logs
WHERE time >= ? AND time <= ?
ORDER BY seq
"#;

/// A day shard written under its temp name, waiting to be sealed.
struct DayFile {
    temp: PathBuf,
    final_path: PathBuf,
    lower: i64,
    upper: i64,
    record_count: usize,
    /// Records taken from the active shard.
    added: usize,
}

struct ActiveShard {
    conn: Connection,
    /// Start of the local day the shard was opened or last rotated.
    since: i64,
    next_rotation: i64,
    next_seq: i64,
    in_txn: bool,
}

impl ActiveShard {
    fn commit(&mut self) -> Result<()> {
        if self.in_txn {
            self.conn.execute_batch("COMMIT")?;
            self.in_txn = false;
        }
        Ok(())
    }

    fn min_time(&self) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT MIN(time) FROM logs", [], |row| row.get(0))?)
    }

    fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// Shard store backed by DuckDB files.
pub struct SqlShardStore {
    config: Config,
    layout: RwLock<Vec<ShardInfo>>,
    active: Mutex<Option<ActiveShard>>,
}

impl SqlShardStore {
    /// Create a closed store.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            layout: RwLock::new(Vec::new()),
            active: Mutex::new(None),
        }
    }

    /// Create and open a store.
    pub fn open_new(config: Config) -> Result<Self> {
        let store = Self::new(config);
        store.open()?;
        Ok(store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run ad-hoc SQL against the active shard, rendering every value as text.
    pub fn query_sql(&self, sql: &str) -> Result<QueryResult> {
        let guard = self.active.lock();
        let active = guard.as_ref().ok_or_else(|| self.not_open())?;
        let mut stmt = active.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;

        let columns: Vec<String> = rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default();

        let mut result = QueryResult {
            columns,
            rows: Vec::new(),
        };
        while let Some(row) = rows.next()? {
            let values = (0..result.columns.len())
                .map(|i| row.get_ref(i).map(sql_text))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result.rows.push(values);
        }
        Ok(result)
    }

    fn not_open(&self) -> Error {
        Error::NotOpen(self.config.database_file.clone())
    }

    fn archive_file(&self, date: NaiveDate) -> PathBuf {
        let name = archive_file_name(
            &self.config.archive_stem(),
            &self.config.archive_extension(),
            date,
        );
        self.config.archive_path.join(name)
    }

    /// Read the archived shards found on disk.
    fn load_layout(&self) -> Result<Vec<ShardInfo>> {
        let dates = partition::list_archive_dates(
            &self.config.archive_path,
            &self.config.archive_stem(),
            &self.config.archive_extension(),
        )?;

        let mut layout = Vec::with_capacity(dates.len());
        for date in dates {
            let file = self.archive_file(date);
            let record_count = match open_read_only(&file).and_then(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
                Ok(n as usize)
            }) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "skipping unreadable archive file");
                    continue;
                }
            };
            let (lower, upper) = partition::day_window(date);
            layout.push(ShardInfo {
                file,
                archived: true,
                lower,
                upper: Some(upper),
                record_count,
            });
        }
        Ok(layout)
    }

    /// Local days with records older than `before`, oldest first.
    ///
    /// Records outside [`partition::dated_range`] have no day and are skipped.
    fn days_before(conn: &Connection, before: i64) -> Result<Vec<NaiveDate>> {
        let (min, max) = partition::dated_range();
        let before = before.min(max);
        let mut days = Vec::new();
        let mut cursor = min;
        loop {
            let first: Option<i64> = conn.query_row(
                "SELECT MIN(time) FROM logs WHERE time >= ? AND time < ?",
                params![cursor, before],
                |row| row.get(0),
            )?;
            let Some(first) = first else { break };
            let Some(date) = partition::local_date(first) else { break };
            let (_, upper) = partition::day_window(date);
            days.push(date);
            if upper <= first {
                break;
            }
            cursor = upper;
        }
        Ok(days)
    }

    /// Write the day shard for `date` under a temp name, merged with the
    /// existing archive file if there is one.
    fn write_day(&self, conn: &Connection, date: NaiveDate, final_path: &Path) -> Result<DayFile> {
        let (lower, upper) = partition::day_window(date);
        let temp = atomic::temp_path(final_path);
        let merge = final_path.exists();

        conn.execute_batch(&format!("ATTACH '{}' AS archive_new", sql_quote(&temp)))?;
        if merge {
            if let Err(e) = conn.execute_batch(&format!(
                "ATTACH '{}' AS archive_old (READ_ONLY)",
                sql_quote(final_path)
            )) {
                let _ = conn.execute_batch("DETACH archive_new");
                atomic::discard(&temp);
                return Err(e.into());
            }
        }

        let existing = if merge {
            "SELECT 0 AS src, * FROM archive_old.logs UNION ALL "
        } else {
            ""
        };
        let result = conn
            .query_row(
                if merge { "SELECT COUNT(*) FROM archive_old.logs" } else { "SELECT 0" },
                [],
                |row| row.get::<_, i64>(0),
            )
            .and_then(|before| {
                conn.execute_batch(&format!(
                    "CREATE TABLE archive_new.logs AS \
                     SELECT ROW_NUMBER() OVER (ORDER BY src, seq) AS seq, * EXCLUDE (src, seq) \
                     FROM ({existing}SELECT 1 AS src, * FROM main.logs WHERE time >= {lower} AND time < {upper}); \
                     CHECKPOINT archive_new"
                ))?;
                let total = conn.query_row("SELECT COUNT(*) FROM archive_new.logs", [], |row| {
                    row.get::<_, i64>(0)
                })?;
                Ok((total, total - before))
            });

        if merge {
            let _ = conn.execute_batch("DETACH archive_old");
        }
        let _ = conn.execute_batch("DETACH archive_new");

        match result {
            Ok((total, added)) => Ok(DayFile {
                temp,
                final_path: final_path.to_path_buf(),
                lower,
                upper,
                record_count: total as usize,
                added: added as usize,
            }),
            Err(e) => {
                atomic::discard(&temp);
                Err(e.into())
            }
        }
    }

    /// Delete the archived windows from the active table and move the day
    /// files into place. Either every file lands and the delete commits, or
    /// the archive directory and the active table are left as they were.
    fn seal(active: &ActiveShard, written: &[DayFile]) -> Result<usize> {
        let discard_from = |from: usize| {
            for day in &written[from..] {
                atomic::discard(&day.temp);
            }
        };

        if let Err(e) = active.conn.execute_batch("BEGIN TRANSACTION") {
            discard_from(0);
            return Err(e.into());
        }
        let mut moved = 0;
        for day in written {
            match active.conn.execute(
                "DELETE FROM logs WHERE time >= ? AND time < ?",
                params![day.lower, day.upper],
            ) {
                Ok(n) => moved += n,
                Err(e) => {
                    let _ = active.conn.execute_batch("ROLLBACK");
                    discard_from(0);
                    return Err(e.into());
                }
            }
        }
        let added: usize = written.iter().map(|d| d.added).sum();
        if moved != added {
            let _ = active.conn.execute_batch("ROLLBACK");
            discard_from(0);
            return Err(Error::Storage(format!(
                "Archive copied {} records but would remove {}",
                added, moved
            )));
        }

        let mut swap = atomic::Swap::new();
        for (i, day) in written.iter().enumerate() {
            if let Err(e) = swap.place(&day.temp, &day.final_path) {
                let _ = active.conn.execute_batch("ROLLBACK");
                swap.restore();
                discard_from(i + 1);
                return Err(Error::Storage(format!(
                    "Failed to seal {}: {}",
                    day.final_path.display(),
                    e
                )));
            }
        }

        if let Err(e) = active.conn.execute_batch("COMMIT") {
            let _ = active.conn.execute_batch("ROLLBACK");
            swap.restore();
            return Err(e.into());
        }
        swap.commit();

        if let Err(e) = active.conn.execute_batch("CHECKPOINT") {
            tracing::warn!(error = %e, "checkpoint after archival failed");
        }
        Ok(moved)
    }

    fn archive_locked(
        &self,
        layout: &mut Vec<ShardInfo>,
        active: &mut ActiveShard,
        now: i64,
    ) -> Result<ArchiveStats> {
        // DuckDB refuses to write to an attached database while a
        // transaction touches the main one.
        active.commit()?;

        let today = partition::start_of_day(now);
        let days = Self::days_before(&active.conn, today)?;
        let mut stats = ArchiveStats::default();

        if !days.is_empty() {
            fs::create_dir_all(&self.config.archive_path)?;

            let mut written: Vec<DayFile> = Vec::new();
            for date in days {
                let final_path = self.archive_file(date);
                match self.write_day(&active.conn, date, &final_path) {
                    Ok(day) => written.push(day),
                    Err(e) => {
                        for day in &written {
                            atomic::discard(&day.temp);
                        }
                        return Err(e);
                    }
                }
            }

            stats.records_archived = Self::seal(active, &written)?;
            stats.days_archived = written.len();
            for day in written {
                layout.retain(|s| s.file != day.final_path);
                layout.push(ShardInfo {
                    file: day.final_path,
                    archived: true,
                    lower: day.lower,
                    upper: Some(day.upper),
                    record_count: day.record_count,
                });
            }
            layout.sort_by_key(|s| s.lower);

            tracing::info!(
                days = stats.days_archived,
                records = stats.records_archived,
                archive = %self.config.archive_path.display(),
                "archived log shards"
            );
        }

        active.since = today;
        active.next_rotation = partition::next_midnight(now);
        stats.shards_pruned = self.prune_locked(layout, now)?;
        Ok(stats)
    }

    fn prune_locked(&self, layout: &mut Vec<ShardInfo>, now: i64) -> Result<usize> {
        let Some(cutoff) = self.config.max_logs_age.cutoff(now) else {
            if let RetentionPolicy::Invalid(raw) = &self.config.max_logs_age {
                tracing::warn!(max_logs_age = %raw, "retention policy is invalid, not pruning");
            }
            return Ok(0);
        };

        let mut pruned = 0;
        let mut failure = None;
        layout.retain(|shard| {
            if failure.is_some() || !shard.is_expired(cutoff) {
                return true;
            }
            match fs::remove_file(&shard.file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    failure = Some(e);
                    return true;
                }
            }
            let _ = fs::remove_file(wal_path(&shard.file));
            tracing::info!(file = %shard.file.display(), "pruned archived shard");
            pruned += 1;
            false
        });
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(pruned),
        }
    }
}

impl ShardStore for SqlShardStore {
    fn open(&self) -> Result<()> {
        let mut layout = self.layout.write();
        let mut active = self.active.lock();
        if active.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.config.database_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.config.database_file)?;
        conn.execute_batch(CREATE_LOGS)?;
        let next_seq: i64 =
            conn.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM logs", [], |row| row.get(0))?;

        let now = Utc::now().timestamp();
        let mut shard = ActiveShard {
            conn,
            since: partition::start_of_day(now),
            next_rotation: partition::next_midnight(now),
            next_seq,
            in_txn: false,
        };
        // Records left over from an earlier day are sealed by the next rotation.
        if let Some(oldest) = shard.min_time()? {
            shard.next_rotation = shard.next_rotation.min(partition::next_midnight(oldest));
        }

        *layout = self.load_layout()?;
        tracing::debug!(
            database = %self.config.database_file.display(),
            archived = layout.len(),
            "opened log store"
        );
        *active = Some(shard);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut active = self.active.lock();
        if let Some(mut shard) = active.take() {
            shard.commit()?;
            shard.conn.execute_batch("CHECKPOINT")?;
            shard
                .conn
                .close()
                .map_err(|(_, e)| Error::DuckDb(e))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.active.lock().is_some()
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let mut guard = self.active.lock();
        let active = guard.as_mut().ok_or_else(|| self.not_open())?;
        if !active.in_txn {
            active.conn.execute_batch("BEGIN TRANSACTION")?;
            active.in_txn = true;
        }

        let host_groups = serde_json::to_string(&record.current_host_groups)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let service_groups = serde_json::to_string(&record.current_service_groups)
            .map_err(|e| Error::Storage(e.to_string()))?;

        active.conn.execute(
            r#"INSERT INTO logs VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                active.next_seq,
                record.time,
                record.class,
                record.log_type,
                record.options,
                record.message,
                record.host_name,
                record.service_description,
                record.state,
                record.state_type,
                record.attempt,
                record.plugin_output,
                record.contact_name,
                record.command_name,
                record.comment,
                host_groups,
                service_groups,
            ],
        )?;
        active.next_seq += 1;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut guard = self.active.lock();
        let active = guard.as_mut().ok_or_else(|| self.not_open())?;
        active.commit()
    }

    fn rotate_and_archive(&self, now: i64) -> Result<Option<ArchiveStats>> {
        let mut layout = self.layout.write();
        let mut guard = self.active.lock();
        let active = guard.as_mut().ok_or_else(|| self.not_open())?;
        if now < active.next_rotation {
            return Ok(None);
        }
        self.archive_locked(&mut layout, active, now).map(Some)
    }

    fn archive(&self, now: i64) -> Result<ArchiveStats> {
        let mut layout = self.layout.write();
        let mut guard = self.active.lock();
        let active = guard.as_mut().ok_or_else(|| self.not_open())?;
        self.archive_locked(&mut layout, active, now)
    }

    fn prune(&self, now: i64) -> Result<usize> {
        let mut layout = self.layout.write();
        self.prune_locked(&mut layout, now)
    }

    fn snapshot(&self, start: i64, end: i64) -> Result<Box<dyn ShardSnapshot + '_>> {
        let layout = self.layout.read();
        let active_info = {
            let guard = self.active.lock();
            let active = guard.as_ref().ok_or_else(|| self.not_open())?;
            let lower = active
                .min_time()?
                .map_or(active.since, |t| t.min(active.since));
            ShardInfo {
                file: self.config.database_file.clone(),
                archived: false,
                lower,
                upper: None,
                record_count: active.count()?,
            }
        };

        let shards = select_relevant(layout.iter(), active_info, start, end);
        tracing::debug!(start, end, shards = shards.len(), "resolved relevant shards");
        Ok(Box::new(SqlSnapshot {
            _layout: layout,
            store: self,
            shards,
        }))
    }

    fn count(&self) -> Result<usize> {
        let guard = self.active.lock();
        guard.as_ref().ok_or_else(|| self.not_open())?.count()
    }
}

impl Drop for SqlShardStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close log store");
        }
    }
}

struct SqlSnapshot<'a> {
    _layout: RwLockReadGuard<'a, Vec<ShardInfo>>,
    store: &'a SqlShardStore,
    shards: Vec<ShardInfo>,
}

impl ShardSnapshot for SqlSnapshot<'_> {
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
        if shard.archived {
            let conn = open_read_only(&shard.file)?;
            return scan(&conn, start, end, visit);
        }

        let guard = self.store.active.lock();
        let active = guard.as_ref().ok_or_else(|| self.store.not_open())?;
        scan(&active.conn, start, end, visit)
    }
}

fn scan(
    conn: &Connection,
    start: i64,
    end: i64,
    visit: &mut dyn FnMut(LogRecord) -> Result<bool>,
) -> Result<bool> {
    let mut stmt = conn.prepare(SELECT_RECORDS)?;
    let mut rows = stmt.query(params![start, end])?;
    while let Some(row) = rows.next()? {
        if !visit(record_from_row(row)?)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn record_from_row(row: &duckdb::Row<'_>) -> Result<LogRecord> {
    let host_groups: Option<String> = row.get(14)?;
    let service_groups: Option<String> = row.get(15)?;
    Ok(LogRecord {
        time: row.get(0)?,
        class: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
        log_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        options: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        message: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        host_name: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        service_description: row.get(6)?,
        state: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
        state_type: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        attempt: row.get::<_, Option<i64>>(9)?.unwrap_or_default(),
        plugin_output: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        contact_name: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        command_name: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
        comment: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
        current_host_groups: parse_groups(host_groups.as_deref()),
        current_service_groups: parse_groups(service_groups.as_deref()),
    })
}

fn parse_groups(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

fn open_read_only(path: &Path) -> Result<Connection> {
    let config = duckdb::Config::default().access_mode(AccessMode::ReadOnly)?;
    Ok(Connection::open_with_flags(path, config)?)
}

/// Text form of a column value; `logs` only holds integers, text and NULL,
/// aggregates add doubles and wide integers.
fn sql_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Boolean(b) => b.to_string(),
        ValueRef::Int(n) => n.to_string(),
        ValueRef::BigInt(n) => n.to_string(),
        ValueRef::HugeInt(n) => n.to_string(),
        ValueRef::Double(f) => f.to_string(),
        ValueRef::Text(s) => String::from_utf8_lossy(s).to_string(),
        other => format!("{:?}", other),
    }
}

fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".wal");
    PathBuf::from(name)
}

fn sql_quote(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

/// Result of a SQL query.
#[derive(Debug)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}
