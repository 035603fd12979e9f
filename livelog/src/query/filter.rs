//! Filter trees and their evaluation against log records.

use std::fmt;

use regex::Regex;

use super::QueryError;
use crate::schema::{Column, ColumnType, LogRecord};

/// Comparison operators of `Filter:` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `=~` case-insensitive equality
    EqIgnoreCase,
    /// `!=~`
    NotEqIgnoreCase,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `~` regex search
    Match,
    /// `!~`
    NotMatch,
    /// `~~` case-insensitive literal containment
    ContainsIgnoreCase,
    /// `!~~`
    NotContainsIgnoreCase,
}

impl Op {
    pub fn parse(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "=" => Self::Eq,
            "!=" => Self::NotEq,
            "=~" => Self::EqIgnoreCase,
            "!=~" => Self::NotEqIgnoreCase,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "<=" => Self::Le,
            ">=" => Self::Ge,
            "~" => Self::Match,
            "!~" => Self::NotMatch,
            "~~" => Self::ContainsIgnoreCase,
            "!~~" => Self::NotContainsIgnoreCase,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::EqIgnoreCase => "=~",
            Self::NotEqIgnoreCase => "!=~",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Match => "~",
            Self::NotMatch => "!~",
            Self::ContainsIgnoreCase => "~~",
            Self::NotContainsIgnoreCase => "!~~",
        }
    }

    /// The operator testing the complement, for the `!` forms.
    fn positive(self) -> Option<Self> {
        match self {
            Self::NotEq => Some(Self::Eq),
            Self::NotEqIgnoreCase => Some(Self::EqIgnoreCase),
            Self::NotMatch => Some(Self::Match),
            Self::NotContainsIgnoreCase => Some(Self::ContainsIgnoreCase),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single `column op value` test.
#[derive(Debug, Clone)]
pub struct Predicate {
    column_name: String,
    column: Option<Column>,
    op: Op,
    value: String,
    int_value: Option<i64>,
    folded: String,
    regex: Option<Regex>,
}

impl Predicate {
    /// Build a predicate. Unknown columns are accepted and never match.
    pub fn new(column_name: &str, op: Op, value: &str) -> Result<Self, QueryError> {
        let column = Column::from_name(column_name);
        let regex = match op {
            Op::Match | Op::NotMatch => Some(Regex::new(value).map_err(|e| {
                QueryError::InvalidRegex {
                    pattern: value.to_string(),
                    message: e.to_string(),
                }
            })?),
            _ => None,
        };
        Ok(Self {
            column_name: column_name.to_string(),
            column,
            op,
            value: value.to_string(),
            int_value: value.trim().parse().ok(),
            folded: value.to_lowercase(),
            regex,
        })
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Evaluate against `record`. Unknown columns evaluate to false.
    pub fn matches(&self, record: &LogRecord) -> bool {
        let Some(column) = self.column else {
            return false;
        };
        if let Some(positive) = self.op.positive() {
            return !self.test(positive, column, record);
        }
        self.test(self.op, column, record)
    }

    fn test(&self, op: Op, column: Column, record: &LogRecord) -> bool {
        match column.column_type() {
            ColumnType::Int => {
                let actual = record.int(column).unwrap_or_default();
                match op {
                    Op::Match | Op::ContainsIgnoreCase => self.test_text(op, &actual.to_string()),
                    _ => match self.int_value {
                        Some(expected) => match op {
                            Op::Eq | Op::EqIgnoreCase => actual == expected,
                            Op::Lt => actual < expected,
                            Op::Gt => actual > expected,
                            Op::Le => actual <= expected,
                            Op::Ge => actual >= expected,
                            _ => false,
                        },
                        None => false,
                    },
                }
            }
            ColumnType::Text => self.test_text(op, record.text(column)),
            ColumnType::List => {
                let items = record.list(column);
                match op {
                    Op::Eq if self.value.is_empty() => items.is_empty(),
                    Op::Eq => items.join(" ") == self.value,
                    Op::Ge => items.iter().any(|i| *i == self.value),
                    Op::Lt => !items.iter().any(|i| *i == self.value),
                    Op::Le => items.iter().any(|i| i.to_lowercase() == self.folded),
                    Op::Gt => !items.iter().any(|i| i.to_lowercase() == self.folded),
                    _ => items.iter().any(|i| self.test_text(op, i)),
                }
            }
        }
    }

    fn test_text(&self, op: Op, actual: &str) -> bool {
        match op {
            Op::Eq => actual == self.value,
            Op::EqIgnoreCase => actual.to_lowercase() == self.folded,
            Op::Lt => actual < self.value.as_str(),
            Op::Gt => actual > self.value.as_str(),
            Op::Le => actual <= self.value.as_str(),
            Op::Ge => actual >= self.value.as_str(),
            Op::Match => self.regex.as_ref().is_some_and(|re| re.is_match(actual)),
            Op::ContainsIgnoreCase => actual.to_lowercase().contains(&self.folded),
            _ => false,
        }
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.column_name == other.column_name && self.op == other.op && self.value == other.value
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column_name, self.op, self.value)
    }
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Predicate(Predicate),
    /// True when every child is; an empty `And` is true.
    And(Vec<Filter>),
    /// True when any child is; an empty `Or` is false.
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Self::And(Vec::new())
    }
}

impl Filter {
    /// Convenience constructor for a leaf.
    pub fn predicate(column: &str, op: Op, value: &str) -> Result<Self, QueryError> {
        Predicate::new(column, op, value).map(Self::Predicate)
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        match self {
            Self::Predicate(p) => p.matches(record),
            Self::And(children) => children.iter().all(|c| c.matches(record)),
            Self::Or(children) => children.iter().any(|c| c.matches(record)),
            Self::Not(inner) => !inner.matches(record),
        }
    }

    /// Tightest closed `[start, end]` range of `time` implied by the filter.
    ///
    /// Only `time` predicates reachable through `And` nodes narrow the range;
    /// anything under `Or` or `Not` leaves it open.
    pub fn time_bounds(&self) -> (i64, i64) {
        let mut bounds = (i64::MIN, i64::MAX);
        self.narrow_time(&mut bounds);
        bounds
    }

    fn narrow_time(&self, bounds: &mut (i64, i64)) {
        match self {
            Self::And(children) => {
                for child in children {
                    child.narrow_time(bounds);
                }
            }
            Self::Predicate(p) if p.column == Some(Column::Time) => {
                let Some(v) = p.int_value else { return };
                let (start, end) = bounds;
                match p.op {
                    Op::Ge => *start = (*start).max(v),
                    Op::Gt => *start = (*start).max(v.saturating_add(1)),
                    Op::Le => *end = (*end).min(v),
                    Op::Lt => *end = (*end).min(v.saturating_sub(1)),
                    Op::Eq => {
                        *start = (*start).max(v);
                        *end = (*end).min(v);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

/// Parse-time stack of filter nodes.
///
/// `Filter:` pushes a leaf; `And:`/`Or:` replace the top N nodes with one
/// combinator holding them in push order; `Negate:` wraps the top node.
#[derive(Debug, Default)]
pub struct FilterStack {
    nodes: Vec<Filter>,
}

impl FilterStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: Filter) {
        self.nodes.push(filter);
    }

    pub fn and(&mut self, n: usize) -> Result<(), QueryError> {
        let children = self.pop_n("And", n)?;
        self.nodes.push(Filter::And(children));
        Ok(())
    }

    pub fn or(&mut self, n: usize) -> Result<(), QueryError> {
        let children = self.pop_n("Or", n)?;
        self.nodes.push(Filter::Or(children));
        Ok(())
    }

    pub fn negate(&mut self) -> Result<(), QueryError> {
        let top = self.nodes.pop().ok_or(QueryError::StackUnderflow {
            header: "Negate",
            wanted: 1,
            available: 0,
        })?;
        self.nodes.push(Filter::Not(Box::new(top)));
        Ok(())
    }

    /// AND together whatever is left on the stack.
    pub fn finish(mut self) -> Filter {
        if self.nodes.len() == 1 {
            self.nodes.pop().unwrap_or_default()
        } else {
            Filter::And(self.nodes)
        }
    }

    fn pop_n(&mut self, header: &'static str, n: usize) -> Result<Vec<Filter>, QueryError> {
        if n > self.nodes.len() {
            return Err(QueryError::StackUnderflow {
                header,
                wanted: n,
                available: self.nodes.len(),
            });
        }
        Ok(self.nodes.split_off(self.nodes.len() - n))
    }
}
