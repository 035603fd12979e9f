//! Parser for `GET` requests.

use super::filter::{Filter, FilterStack, Op};
use super::QueryError;
use crate::format::{OutputFormat, ResponseHeader, Separators};

/// The only table served by this engine.
pub const LOG_TABLE: &str = "log";

/// A parsed request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Target table (always `log` once parsed).
    pub table: String,
    /// Requested columns in order; empty selects the default columns.
    pub columns: Vec<String>,
    /// Root of the filter tree.
    pub filter: Filter,
    pub output_format: OutputFormat,
    pub response_header: ResponseHeader,
    /// Connection reuse hint for the transport.
    pub keepalive: bool,
    pub column_headers: bool,
    pub limit: Option<usize>,
    pub separators: Separators,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            table: LOG_TABLE.to_string(),
            columns: Vec::new(),
            filter: Filter::default(),
            output_format: OutputFormat::default(),
            response_header: ResponseHeader::default(),
            keepalive: false,
            column_headers: false,
            limit: None,
            separators: Separators::default(),
        }
    }
}

impl Request {
    /// Framing headers of a request, read leniently so that error
    /// responses can be framed the way the client asked for.
    pub fn framing(text: &str) -> (ResponseHeader, bool) {
        let mut header = ResponseHeader::Off;
        let mut keepalive = false;
        for (name, value) in request_lines(text).filter_map(|l| l.split_once(':')) {
            match name {
                "ResponseHeader" => {
                    header = ResponseHeader::parse(value.trim()).unwrap_or(header)
                }
                "KeepAlive" => keepalive = value.trim() == "on",
                _ => {}
            }
        }
        (header, keepalive)
    }
}

/// Lines of the first request in `text`, without leading whitespace.
fn request_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.trim_start().trim_end_matches('\r'))
        .skip_while(|line| line.is_empty())
        .take_while(|line| !line.is_empty())
}

/// Parse one request.
pub fn parse_request(text: &str) -> Result<Request, QueryError> {
    let mut lines = request_lines(text);
    let first = lines.next().ok_or(QueryError::Empty)?;

    let table = match first.strip_prefix("GET") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
        _ => return Err(QueryError::UnknownHeader(first.to_string())),
    };
    if table.is_empty() {
        return Err(QueryError::MissingTable);
    }
    if table != LOG_TABLE {
        return Err(QueryError::UnknownTable(table.to_string()));
    }

    let mut request = Request::default();
    let mut stack = FilterStack::new();

    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| QueryError::UnknownHeader(line.to_string()))?;
        let value = value.trim();

        match name {
            "Columns" => {
                request.columns = value.split_whitespace().map(str::to_string).collect();
            }
            "Filter" => stack.push(parse_filter(value)?),
            "And" => stack.and(parse_arity("And", value)?)?,
            "Or" => stack.or(parse_arity("Or", value)?)?,
            "Negate" => stack.negate()?,
            "OutputFormat" => {
                request.output_format =
                    OutputFormat::parse(value).ok_or_else(|| QueryError::InvalidHeaderValue {
                        header: "OutputFormat",
                        value: value.to_string(),
                    })?;
            }
            "ResponseHeader" => {
                request.response_header =
                    ResponseHeader::parse(value).ok_or_else(|| QueryError::InvalidHeaderValue {
                        header: "ResponseHeader",
                        value: value.to_string(),
                    })?;
            }
            "KeepAlive" => request.keepalive = parse_flag("KeepAlive", value)?,
            "ColumnHeaders" => request.column_headers = parse_flag("ColumnHeaders", value)?,
            "Limit" => {
                request.limit =
                    Some(value.parse().map_err(|_| QueryError::InvalidHeaderValue {
                        header: "Limit",
                        value: value.to_string(),
                    })?);
            }
            "Separators" => {
                request.separators =
                    Separators::parse(value).ok_or_else(|| QueryError::InvalidHeaderValue {
                        header: "Separators",
                        value: value.to_string(),
                    })?;
            }
            _ => return Err(QueryError::UnknownHeader(name.to_string())),
        }
    }

    request.filter = stack.finish();
    Ok(request)
}

/// Parse `<column> <op> <value>`; the value runs to the end of the line and
/// may be empty.
fn parse_filter(text: &str) -> Result<Filter, QueryError> {
    let mut parts = text.splitn(3, ' ');
    let column = parts.next().filter(|c| !c.is_empty());
    let op = parts.next().filter(|o| !o.is_empty());
    let (Some(column), Some(op)) = (column, op) else {
        return Err(QueryError::MalformedFilter(text.to_string()));
    };
    let op = Op::parse(op).ok_or_else(|| QueryError::UnknownOperator(op.to_string()))?;
    Filter::predicate(column, op, parts.next().unwrap_or(""))
}

fn parse_arity(header: &'static str, value: &str) -> Result<usize, QueryError> {
    value.parse().map_err(|_| QueryError::InvalidArity {
        header,
        value: value.to_string(),
    })
}

fn parse_flag(header: &'static str, value: &str) -> Result<bool, QueryError> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(QueryError::InvalidHeaderValue {
            header,
            value: value.to_string(),
        }),
    }
}

/// Split a stream of requests on blank lines.
pub fn split_requests(input: &str) -> Vec<String> {
    let mut requests = Vec::new();
    let mut current = String::new();
    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                requests.push(std::mem::take(&mut current));
            }
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.is_empty() {
        requests.push(current);
    }
    requests
}
