//! The `GET log` request language.
//!
//! # Syntax Overview
//!
//! A request is a block of header lines ended by a blank line:
//!
//! - **Table**: `GET log`
//! - **Projection**: `Columns: time type host_name`
//! - **Predicates**: `Filter: <column> <op> <value>`
//! - **Combinators**: `And: N`, `Or: N`, `Negate:`
//! - **Output**: `OutputFormat:`, `ColumnHeaders:`, `Separators:`, `Limit:`
//! - **Framing**: `ResponseHeader: fixed16`, `KeepAlive: on`

mod filter;
mod parser;

pub use filter::{Filter, FilterStack, Op, Predicate};
pub use parser::{parse_request, split_requests, Request, LOG_TABLE};

/// A malformed request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Empty request")]
    Empty,

    #[error("Invalid GET request, missing tablename")]
    MissingTable,

    #[error("Invalid GET request, no such table '{0}'")]
    UnknownTable(String),

    #[error("Undefined request header '{0}'")]
    UnknownHeader(String),

    #[error("Invalid value for {header}: '{value}'")]
    InvalidHeaderValue { header: &'static str, value: String },

    #[error("Invalid filter '{0}'")]
    MalformedFilter(String),

    #[error("Unknown filter operator '{0}'")]
    UnknownOperator(String),

    #[error("Invalid count for {header}: '{value}'")]
    InvalidArity { header: &'static str, value: String },

    #[error("Cannot combine {wanted} filters for {header}, only {available} on stack")]
    StackUnderflow {
        header: &'static str,
        wanted: usize,
        available: usize,
    },

    #[error("Invalid regular expression '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

impl QueryError {
    /// Livestatus status code of the error response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownTable(_) => 404,
            Self::InvalidHeaderValue { .. } => 452,
            _ => 400,
        }
    }
}

#[cfg(test)]
mod tests;
