//! Day partitioning: local-midnight boundaries and archive file names.
//!
//! Archived shards are named `<stem>-YYYY-MM-DD<ext>`, so sorting file names
//! sorts shards chronologically and the window of a shard can be recovered
//! from its name alone.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Days, Local, NaiveDate, TimeZone, Utc};

use crate::Result;

/// Epoch seconds whose local day can be named and bounded, as `[min, max)`.
///
/// Records outside this range never leave the active shard.
pub fn dated_range() -> (i64, i64) {
    (
        DateTime::<Utc>::MIN_UTC.timestamp() + 2 * 86_400,
        DateTime::<Utc>::MAX_UTC.timestamp() - 2 * 86_400,
    )
}

/// Local calendar date of an epoch second, `None` outside [`dated_range`].
pub fn local_date(ts: i64) -> Option<NaiveDate> {
    let (min, max) = dated_range();
    if ts < min || ts >= max {
        return None;
    }
    DateTime::from_timestamp(ts, 0).map(|utc| utc.with_timezone(&Local).date_naive())
}

/// Epoch second of local midnight starting `date`.
///
/// When midnight does not exist locally (DST gap) the first valid instant of
/// the day is used.
pub fn day_start(date: NaiveDate) -> i64 {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    match Local.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt.timestamp(),
        None => (1..=3)
            .filter_map(|h| date.and_hms_opt(h, 0, 0))
            .find_map(|t| Local.from_local_datetime(&t).earliest())
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| midnight.and_utc().timestamp()),
    }
}

/// `[start, end)` of the local day `date`.
pub fn day_window(date: NaiveDate) -> (i64, i64) {
    let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
    (day_start(date), day_start(next))
}

/// Local midnight at or before `ts`; `ts` itself when it has no date.
pub fn start_of_day(ts: i64) -> i64 {
    local_date(ts).map_or(ts, day_start)
}

/// First local midnight strictly after `ts`; `ts + 1` when it has no date.
pub fn next_midnight(ts: i64) -> i64 {
    local_date(ts).map_or(ts.saturating_add(1), |date| day_window(date).1)
}

/// File name of the archived shard for `date`.
pub fn archive_file_name(stem: &str, ext: &str, date: NaiveDate) -> String {
    format!("{}-{}{}", stem, date.format("%Y-%m-%d"), ext)
}

/// Recover the date of an archived shard from its file name.
pub fn parse_archive_file_name(stem: &str, ext: &str, name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(stem)?.strip_prefix('-')?.strip_suffix(ext)?;
    if date.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Archived shard dates found in `dir`, oldest first.
///
/// Journals, temp files and foreign files are skipped.
pub fn list_archive_dates(dir: &Path, stem: &str, ext: &str) -> Result<Vec<NaiveDate>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut dates: Vec<NaiveDate> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            parse_archive_file_name(stem, ext, &name)
        })
        .collect();
    dates.sort();
    dates.dedup();
    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_file_name_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let name = archive_file_name("livelogs", ".db", date);
        assert_eq!(name, "livelogs-2024-03-09.db");
        assert_eq!(parse_archive_file_name("livelogs", ".db", &name), Some(date));
    }

    #[test]
    fn test_parse_archive_file_name_rejects_others() {
        assert_eq!(parse_archive_file_name("livelogs", ".db", "livelogs.db"), None);
        assert_eq!(parse_archive_file_name("livelogs", ".db", "livelogs-2024-03-09.db.wal"), None);
        assert_eq!(parse_archive_file_name("livelogs", ".db", "other-2024-03-09.db"), None);
        assert_eq!(parse_archive_file_name("livelogs", ".db", "livelogs-2024-13-09.db"), None);
    }

    #[test]
    fn test_names_sort_chronologically() {
        let a = archive_file_name("l", ".db", NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        let b = archive_file_name("l", ".db", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let c = archive_file_name("l", ".db", NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert!(a < b && b < c);
    }

    #[test]
    fn test_day_boundaries() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let (start, end) = day_window(date);
        assert!(start < end);
        assert_eq!(local_date(start), Some(date));
        assert_eq!(local_date(end - 1), Some(date));
        assert_eq!(start_of_day(start + 3600), start);
        assert_eq!(next_midnight(start), end);
        assert_eq!(next_midnight(end - 1), end);
    }

    #[test]
    fn test_undated_timestamps() {
        assert_eq!(local_date(-9_000_000_000_000_000), None);
        assert_eq!(local_date(i64::MAX), None);
        assert_eq!(start_of_day(i64::MIN), i64::MIN);
        assert_eq!(next_midnight(i64::MAX), i64::MAX);

        let (min, max) = dated_range();
        assert!(local_date(min).is_some());
        assert!(local_date(max - 1).is_some());
        assert!(local_date(0).is_some());
    }

    #[test]
    fn test_list_archive_dates() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("livelogs-2024-01-02.db"), b"").unwrap();
        fs::write(tmp.path().join("livelogs-2024-01-01.db"), b"").unwrap();
        fs::write(tmp.path().join("livelogs-2024-01-01.db.wal"), b"").unwrap();
        fs::write(tmp.path().join(".tmp.0011.livelogs-2024-01-03.db"), b"").unwrap();

        let dates = list_archive_dates(tmp.path(), "livelogs", ".db").unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            ]
        );

        let missing = tmp.path().join("nope");
        assert!(list_archive_dates(&missing, "livelogs", ".db").unwrap().is_empty());
    }
}
