//! livelog: historical log store for a Livestatus broker
//!
//! Day-sharded storage of monitoring log events using DuckDB, and a query
//! engine answering `GET log` requests against it.

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod query;
pub mod schema;
pub mod store;

pub use config::{Config, RetentionPolicy};
pub use engine::{QueryEngine, Response};
pub use error::{Error, Result};
pub use format::{OutputFormat, ResponseHeader, Separators};
pub use query::{parse_request, split_requests, Filter, Op, QueryError, Request};
pub use schema::{Column, LogClass, LogRecord, Value};
pub use store::{
    ArchiveStats, MemoryShardStore, QueryResult, ShardInfo, ShardSnapshot, ShardStore,
    SqlShardStore,
};
