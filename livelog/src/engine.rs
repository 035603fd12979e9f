//! Query engine: runs one request end to end against a shard store.

use std::sync::Arc;

use crate::format::{self, ResponseHeader};
use crate::query::{parse_request, Request};
use crate::schema::{Column, Value, DEFAULT_COLUMNS};
use crate::store::ShardStore;
use crate::Result;

/// Status code of a successful response.
pub const STATUS_OK: u16 = 200;

/// An encoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub header: ResponseHeader,
    pub body: Vec<u8>,
    /// Whether the client asked to keep the connection open.
    pub keepalive: bool,
}

impl Response {
    /// Response bytes as sent on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        format::frame(self.header, self.status, self.body.clone())
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Answers `GET log` requests from a shard store.
pub struct QueryEngine {
    store: Arc<dyn ShardStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn ShardStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ShardStore> {
        &self.store
    }

    /// Handle one request.
    ///
    /// Malformed requests produce an error response carrying the status code
    /// and message; storage failures are returned as errors.
    pub fn handle_request(&self, text: &str) -> Result<Response> {
        let request = match parse_request(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "rejected request");
                let (header, keepalive) = Request::framing(text);
                return Ok(Response {
                    status: e.status_code(),
                    header,
                    body: format!("{}\n", e).into_bytes(),
                    keepalive,
                });
            }
        };

        let rows = self.execute(&request)?;
        let headers = request.column_headers.then(|| column_names(&request));
        let body = format::render(
            request.output_format,
            request.separators,
            headers.as_deref(),
            &rows,
        );
        Ok(Response {
            status: STATUS_OK,
            header: request.response_header,
            body,
            keepalive: request.keepalive,
        })
    }

    /// Matching rows projected onto the requested columns.
    pub fn execute(&self, request: &Request) -> Result<Vec<Vec<Value>>> {
        let columns: Vec<Option<Column>> = if request.columns.is_empty() {
            DEFAULT_COLUMNS.iter().copied().map(Some).collect()
        } else {
            request.columns.iter().map(|c| Column::from_name(c)).collect()
        };

        let mut rows = Vec::new();
        if request.limit == Some(0) {
            return Ok(rows);
        }

        let (start, end) = request.filter.time_bounds();
        let snapshot = self.store.snapshot(start, end)?;
        tracing::debug!(start, end, shards = snapshot.shards().len(), "scanning shards");

        for shard in snapshot.shards() {
            let complete = snapshot.scan_shard(shard, start, end, &mut |record| {
                if request.filter.matches(&record) {
                    rows.push(
                        columns
                            .iter()
                            .map(|c| match c {
                                Some(column) => record.value(*column),
                                None => Value::Text(String::new()),
                            })
                            .collect(),
                    );
                }
                Ok(request.limit.map_or(true, |limit| rows.len() < limit))
            })?;
            if !complete {
                break;
            }
        }
        Ok(rows)
    }
}

fn column_names(request: &Request) -> Vec<String> {
    if request.columns.is_empty() {
        DEFAULT_COLUMNS.iter().map(|c| c.name().to_string()).collect()
    } else {
        request.columns.clone()
    }
}
