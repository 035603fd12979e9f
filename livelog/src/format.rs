//! Output encodings and response framing.

use std::fmt::Write as _;

use crate::schema::Value;

/// Body encoding selected by `OutputFormat:`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Python,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "python" => Some(Self::Python),
            _ => None,
        }
    }
}

/// Response framing selected by `ResponseHeader:`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseHeader {
    #[default]
    Off,
    Fixed16,
}

impl ResponseHeader {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(Self::Off),
            "fixed16" => Some(Self::Fixed16),
            _ => None,
        }
    }
}

/// Separators of the csv encoding, as byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Separators {
    pub line: u8,
    pub field: u8,
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            line: b'\n',
            field: b';',
        }
    }
}

impl Separators {
    /// Parse `Separators: <line> <field> <list> <host/service>`.
    ///
    /// All given values must be decimal bytes; list columns always render
    /// space-joined, so only the first two take effect.
    pub fn parse(value: &str) -> Option<Self> {
        let bytes: Vec<u8> = value
            .split_whitespace()
            .map(|v| v.parse::<u8>().ok())
            .collect::<Option<_>>()?;
        match bytes.as_slice() {
            [line, field, ..] if bytes.len() <= 4 => Some(Self {
                line: *line,
                field: *field,
            }),
            _ => None,
        }
    }
}

/// Encode rows; `headers` becomes the first row when given.
pub fn render(
    format: OutputFormat,
    separators: Separators,
    headers: Option<&[String]>,
    rows: &[Vec<Value>],
) -> Vec<u8> {
    let header_row: Option<Vec<Value>> =
        headers.map(|h| h.iter().map(|name| Value::Text(name.clone())).collect());
    let all_rows = header_row.iter().chain(rows.iter());

    match format {
        OutputFormat::Csv => {
            let mut out = Vec::new();
            for row in all_rows {
                for (i, value) in row.iter().enumerate() {
                    if i > 0 {
                        out.push(separators.field);
                    }
                    out.extend_from_slice(value.as_text().as_bytes());
                }
                out.push(separators.line);
            }
            out
        }
        OutputFormat::Json => {
            let rows: Vec<Vec<serde_json::Value>> = all_rows
                .map(|row| row.iter().map(json_value).collect())
                .collect();
            let mut out = serde_json::Value::from(rows).to_string();
            out.push('\n');
            out.into_bytes()
        }
        OutputFormat::Python => {
            let mut out = String::from("[");
            for (i, row) in all_rows.enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('[');
                for (j, value) in row.iter().enumerate() {
                    if j > 0 {
                        out.push_str(", ");
                    }
                    match value {
                        Value::Int(n) => {
                            let _ = write!(out, "{}", n);
                        }
                        Value::Text(s) => push_python_str(&mut out, s),
                    }
                }
                out.push(']');
            }
            out.push_str("]\n");
            out.into_bytes()
        }
    }
}

/// Prefix `body` with the 16-byte `fixed16` header when requested.
pub fn frame(header: ResponseHeader, status: u16, body: Vec<u8>) -> Vec<u8> {
    match header {
        ResponseHeader::Off => body,
        ResponseHeader::Fixed16 => {
            let mut out = format!("{:3} {:11}\n", status, body.len()).into_bytes();
            out.extend(body);
            out
        }
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Text(s) => serde_json::Value::from(s.as_str()),
    }
}

/// Single-quoted Python string literal.
fn push_python_str(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}
