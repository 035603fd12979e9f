//! Atomic replacement of archived shard files.
//!
//! Archive files are built under a temp name in the archive directory and
//! renamed over their final name, so a reader never opens a half-written
//! shard.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Generate a temp path next to `final_path`.
/// Format: {dir}/.tmp.{random}.{filename}
pub fn temp_path(final_path: &Path) -> PathBuf {
    let filename = final_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("shard");
    let random: u64 = rand::random();
    let temp_name = format!(".tmp.{:016x}.{}", random, filename);
    final_path.with_file_name(temp_name)
}

/// Generate the name an existing file is parked under while it is replaced.
/// Format: {dir}/.bak.{random}.{filename}
fn backup_path(final_path: &Path) -> PathBuf {
    let filename = final_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("shard");
    let random: u64 = rand::random();
    final_path.with_file_name(format!(".bak.{:016x}.{}", random, filename))
}

/// Files moved into place that can still be put back.
///
/// Each replaced file is parked under a backup name until [`Swap::commit`];
/// [`Swap::restore`] undoes every placement in reverse order.
#[derive(Debug, Default)]
pub struct Swap {
    placed: Vec<(PathBuf, Option<PathBuf>)>,
}

impl Swap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `temp_path` over `final_path`, parking any existing file.
    ///
    /// On failure nothing of this placement remains and the temp file is
    /// discarded; earlier placements are untouched.
    pub fn place(&mut self, temp_path: &Path, final_path: &Path) -> io::Result<()> {
        let backup = if final_path.exists() {
            let backup = backup_path(final_path);
            if let Err(e) = fs::rename(final_path, &backup) {
                discard(temp_path);
                return Err(e);
            }
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(temp_path, final_path) {
            if let Some(backup) = &backup {
                let _ = fs::rename(backup, final_path);
            }
            discard(temp_path);
            return Err(e);
        }
        self.placed.push((final_path.to_path_buf(), backup));
        Ok(())
    }

    /// Put every replaced file back and remove files that did not exist.
    pub fn restore(self) {
        for (final_path, backup) in self.placed.into_iter().rev() {
            let restored = match &backup {
                Some(backup) => fs::rename(backup, &final_path),
                None => fs::remove_file(&final_path),
            };
            if let Err(e) = restored {
                tracing::error!(
                    file = %final_path.display(),
                    error = %e,
                    "failed to restore archive file"
                );
            }
        }
    }

    /// Keep the placed files and drop the backups.
    pub fn commit(self) {
        for backup in self.placed.into_iter().filter_map(|(_, backup)| backup) {
            let _ = fs::remove_file(backup);
        }
    }
}

/// Remove a temp file and any journal DuckDB left next to it.
pub fn discard(temp_path: &Path) {
    let _ = fs::remove_file(temp_path);
    let mut wal = temp_path.as_os_str().to_owned();
    wal.push(".wal");
    let _ = fs::remove_file(PathBuf::from(wal));
}
