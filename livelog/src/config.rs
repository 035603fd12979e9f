//! Configuration for the log store.
//!
//! LIVELOG_ROOT resolution order:
//! 1. Explicit path passed to `Config::with_root()` / `Config::load_from()`
//! 2. LIVELOG_ROOT environment variable
//! 3. Default: the platform data directory for `livelog`

use std::fmt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Database file used when none is configured.
pub const DEFAULT_DATABASE_FILE: &str = "/tmp/livelogs.db";

/// Retention in days used when `max_logs_age` is unset.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Name of the config file inside LIVELOG_ROOT.
const CONFIG_FILE: &str = "livelog.toml";

/// Maximum age of archived shards.
///
/// Accepted forms are a bare day count or a count with a `d`, `w` (7 days),
/// `m` (31 days) or `y` (365 days) suffix. Anything else is kept verbatim as
/// `Invalid`; pruning is then disabled instead of guessing a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RetentionPolicy {
    Days(u32),
    Invalid(String),
}

impl RetentionPolicy {
    /// Parse a configured `max_logs_age` value. `None` and blank values
    /// select the default of 7 days.
    pub fn parse(value: Option<&str>) -> Self {
        let raw = match value.map(str::trim) {
            None | Some("") => return Self::Days(DEFAULT_RETENTION_DAYS),
            Some(raw) => raw,
        };

        let (digits, factor) = match raw.char_indices().last() {
            Some((idx, 'd')) => (&raw[..idx], 1),
            Some((idx, 'w')) => (&raw[..idx], 7),
            Some((idx, 'm')) => (&raw[..idx], 31),
            Some((idx, 'y')) => (&raw[..idx], 365),
            _ => (raw, 1),
        };

        match digits.parse::<u32>().ok().and_then(|n| n.checked_mul(factor)) {
            Some(days) if digits.bytes().all(|b| b.is_ascii_digit()) => Self::Days(days),
            _ => {
                tracing::warn!(
                    max_logs_age = raw,
                    "invalid max_logs_age, archived logs will never be pruned"
                );
                Self::Invalid(raw.to_string())
            }
        }
    }

    /// Number of days, or `None` when the policy is invalid.
    pub fn days(&self) -> Option<u32> {
        match self {
            Self::Days(days) => Some(*days),
            Self::Invalid(_) => None,
        }
    }

    /// Epoch second before which archived shards expire, relative to `now`.
    pub fn cutoff(&self, now: i64) -> Option<i64> {
        self.days().map(|days| now - i64::from(days) * 86_400)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::Days(DEFAULT_RETENTION_DAYS)
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(days) => write!(f, "{}d", days),
            Self::Invalid(raw) => f.write_str(raw),
        }
    }
}

impl From<String> for RetentionPolicy {
    fn from(value: String) -> Self {
        Self::parse(Some(&value))
    }
}

impl From<RetentionPolicy> for String {
    fn from(policy: RetentionPolicy) -> Self {
        policy.to_string()
    }
}

/// Log store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the active shard database.
    pub database_file: PathBuf,

    /// Directory holding archived day shards.
    pub archive_path: PathBuf,

    /// Maximum age of archived shards.
    #[serde(default)]
    pub max_logs_age: RetentionPolicy,
}

impl Config {
    /// Create a config keeping everything below `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            database_file: root.join("livelogs.db"),
            archive_path: root.join("archives"),
            max_logs_age: RetentionPolicy::default(),
        }
    }

    /// Build a config from loosely specified module settings.
    ///
    /// An unset database file falls back to `/tmp/livelogs.db`, an unset
    /// archive path to an `archives` directory next to the database file.
    pub fn from_settings(
        database_file: Option<&str>,
        archive_path: Option<&str>,
        max_logs_age: Option<&str>,
    ) -> Self {
        let database_file = PathBuf::from(database_file.unwrap_or(DEFAULT_DATABASE_FILE));
        let archive_path = match archive_path {
            Some(path) => PathBuf::from(path),
            None => database_file
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join("archives"),
        };
        Self {
            database_file,
            archive_path,
            max_logs_age: RetentionPolicy::parse(max_logs_age),
        }
    }

    /// Set the retention policy.
    pub fn with_max_logs_age(mut self, policy: RetentionPolicy) -> Self {
        self.max_logs_age = policy;
        self
    }

    /// Load config from LIVELOG_ROOT/livelog.toml, or create default.
    pub fn load() -> Result<Self> {
        let root = resolve_root()?;
        Self::load_from(&root)
    }

    /// Load config from a specific root directory.
    pub fn load_from(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
        } else {
            Ok(Self::with_root(root))
        }
    }

    /// Save config to `<root>/livelog.toml`.
    pub fn save_to(&self, root: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::create_dir_all(root)?;
        std::fs::write(root.join(CONFIG_FILE), contents)?;
        Ok(())
    }

    /// Stem used to name archived shards (`livelogs` for `livelogs.db`).
    pub fn archive_stem(&self) -> String {
        self.database_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "livelogs".to_string())
    }

    /// Extension of archived shards, including the dot.
    pub fn archive_extension(&self) -> String {
        self.database_file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".db".to_string())
    }

    /// Path of DuckDB's write-ahead journal for the active shard.
    pub fn journal_path(&self) -> PathBuf {
        let mut name = self.database_file.as_os_str().to_owned();
        name.push(".wal");
        PathBuf::from(name)
    }
}

/// Resolve LIVELOG_ROOT using the standard resolution order.
pub fn resolve_root() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("LIVELOG_ROOT") {
        return Ok(PathBuf::from(path));
    }

    if let Some(proj_dirs) = ProjectDirs::from("", "", "livelog") {
        return Ok(proj_dirs.data_dir().to_path_buf());
    }

    let home = std::env::var("HOME")
        .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(".local/share/livelog"))
}
