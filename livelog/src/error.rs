//! Error types for livelog operations.

use std::path::PathBuf;

use crate::query::QueryError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Log store is not open: {0}")]
    NotOpen(PathBuf),

    #[error(transparent)]
    Query(#[from] QueryError),
}

pub type Result<T> = std::result::Result<T, Error>;
