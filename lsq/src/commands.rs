//! CLI command implementations.

use std::fs;
use std::io::{self, Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};

use livelog::config::resolve_root;
use livelog::{
    split_requests, Config, LogRecord, QueryEngine, RetentionPolicy, ShardStore, SqlShardStore,
};

fn open_store() -> livelog::Result<SqlShardStore> {
    let config = Config::load()?;
    SqlShardStore::open_new(config)
}

fn now_or(now: Option<i64>) -> i64 {
    now.unwrap_or_else(|| Utc::now().timestamp())
}

fn read_input(file: Option<&str>) -> livelog::Result<String> {
    match file {
        Some(path) => Ok(fs::read_to_string(path)?),
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn format_time(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn init(
    database_file: Option<&str>,
    archive_path: Option<&str>,
    max_logs_age: Option<&str>,
) -> livelog::Result<()> {
    let root = resolve_root()?;
    let config = match database_file {
        Some(_) => Config::from_settings(database_file, archive_path, max_logs_age),
        None => {
            let mut config = Config::with_root(&root)
                .with_max_logs_age(RetentionPolicy::parse(max_logs_age));
            if let Some(path) = archive_path {
                config.archive_path = path.into();
            }
            config
        }
    };
    config.save_to(&root)?;

    let store = SqlShardStore::open_new(config)?;
    store.close()?;

    let config = store.config();
    println!("livelog initialized at {}", root.display());
    println!("Database: {}", config.database_file.display());
    println!("Archives: {}", config.archive_path.display());
    println!("Max logs age: {}", config.max_logs_age);
    Ok(())
}

pub fn append(file: Option<&str>) -> livelog::Result<()> {
    let text = read_input(file)?;
    let store = open_store()?;

    let mut appended = 0;
    let mut skipped = 0;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match LogRecord::parse_line(line) {
            Some(record) => {
                store.append(&record)?;
                appended += 1;
            }
            None => {
                tracing::warn!(line, "skipping line without [timestamp] prefix");
                skipped += 1;
            }
        }
    }
    store.commit()?;

    if let Some(stats) = store.rotate_and_archive(Utc::now().timestamp())? {
        tracing::info!(days = stats.days_archived, "rotated active shard");
    }
    store.close()?;

    println!("Appended {} records", appended);
    if skipped > 0 {
        println!("Skipped {} unparseable lines", skipped);
    }
    Ok(())
}

pub fn query(request: Option<&str>) -> livelog::Result<()> {
    let text = match request {
        Some(r) => r.to_string(),
        None => read_input(None)?,
    };
    let store = Arc::new(open_store()?);
    let engine = QueryEngine::new(store.clone());

    let mut stdout = io::stdout().lock();
    for request in split_requests(&text) {
        let response = engine.handle_request(&request)?;
        stdout.write_all(&response.to_bytes())?;
        if !response.keepalive {
            break;
        }
    }
    stdout.flush()?;

    store.close()
}

pub fn rotate(now: Option<i64>) -> livelog::Result<()> {
    let store = open_store()?;
    match store.rotate_and_archive(now_or(now))? {
        Some(stats) => println!(
            "Sealed active shard: {} days, {} records archived, {} shards pruned",
            stats.days_archived, stats.records_archived, stats.shards_pruned
        ),
        None => println!("Rotation boundary not reached."),
    }
    store.close()
}

pub fn archive(now: Option<i64>) -> livelog::Result<()> {
    let store = open_store()?;
    let stats = store.archive(now_or(now))?;
    if stats.records_archived > 0 {
        println!(
            "Archived {} records into {} day files",
            stats.records_archived, stats.days_archived
        );
    } else {
        println!("Nothing to archive.");
    }
    if stats.shards_pruned > 0 {
        println!("Pruned {} archived shards", stats.shards_pruned);
    }
    store.close()
}

pub fn prune(now: Option<i64>) -> livelog::Result<()> {
    let store = open_store()?;
    let pruned = store.prune(now_or(now))?;
    println!("Pruned {} archived shards", pruned);
    store.close()
}

pub fn contents() -> livelog::Result<()> {
    let store = open_store()?;
    for shard in store.historic_contents()? {
        let upper = shard
            .upper
            .map(format_time)
            .unwrap_or_else(|| "open".to_string());
        println!(
            "{:8} {:>8}  {} .. {}  {}",
            if shard.archived { "archived" } else { "active" },
            shard.record_count,
            format_time(shard.lower),
            upper,
            shard.file.display()
        );
    }
    store.close()
}

pub fn count() -> livelog::Result<()> {
    let store = open_store()?;
    println!("{}", store.count()?);
    store.close()
}

pub fn sql(query: &str) -> livelog::Result<()> {
    let store = open_store()?;
    let result = store.query_sql(query)?;
    store.close()?;

    if result.rows.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| clip(v, MAX_CELL)).collect())
        .collect();
    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .fold(name.chars().count(), usize::max)
        })
        .collect();

    println!("{}", table_line(&result.columns, &widths));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in &cells {
        println!("{}", table_line(row, &widths));
    }
    println!("\n({} rows)", result.rows.len());
    Ok(())
}

const MAX_CELL: usize = 50;

fn clip(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut clipped: String = value.chars().take(max - 3).collect();
    clipped.push_str("...");
    clipped
}

fn table_line(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}
