//! Schema of the `log` table.

use std::fmt;

/// Livestatus log classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogClass {
    Info,
    Alert,
    Program,
    Notification,
    Passive,
    Command,
    State,
}

impl LogClass {
    pub fn code(self) -> i64 {
        match self {
            Self::Info => 0,
            Self::Alert => 1,
            Self::Program => 2,
            Self::Notification => 3,
            Self::Passive => 4,
            Self::Command => 5,
            Self::State => 6,
        }
    }
}

/// One logged occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogRecord {
    /// Epoch seconds.
    pub time: i64,

    /// Category code, see [`LogClass::code`].
    pub class: i64,

    /// Event type, e.g. "HOST ALERT".
    pub log_type: String,

    /// Raw field list following the type (`host;DOWN;SOFT;1;output`).
    pub options: String,

    /// The complete log line.
    pub message: String,

    pub host_name: String,
    pub service_description: Option<String>,
    pub state: i64,
    pub state_type: String,
    pub attempt: i64,
    pub plugin_output: String,
    pub contact_name: String,
    pub command_name: String,
    pub comment: String,
    pub current_host_groups: Vec<String>,
    pub current_service_groups: Vec<String>,
}

/// Value type of a column, deciding how comparisons work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Text,
    List,
}

/// Columns of the `log` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Attempt,
    Class,
    CommandName,
    Comment,
    ContactName,
    CurrentHostGroups,
    CurrentServiceGroups,
    HostName,
    Message,
    Options,
    PluginOutput,
    ServiceDescription,
    State,
    StateType,
    Time,
    Type,
}

/// Columns in the order used when a request has no `Columns:` header.
pub const DEFAULT_COLUMNS: [Column; 16] = [
    Column::Attempt,
    Column::Class,
    Column::CommandName,
    Column::Comment,
    Column::ContactName,
    Column::CurrentHostGroups,
    Column::CurrentServiceGroups,
    Column::HostName,
    Column::Message,
    Column::Options,
    Column::PluginOutput,
    Column::ServiceDescription,
    Column::State,
    Column::StateType,
    Column::Time,
    Column::Type,
];

impl Column {
    pub fn from_name(name: &str) -> Option<Self> {
        DEFAULT_COLUMNS.iter().copied().find(|c| c.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Attempt => "attempt",
            Self::Class => "class",
            Self::CommandName => "command_name",
            Self::Comment => "comment",
            Self::ContactName => "contact_name",
            Self::CurrentHostGroups => "current_host_groups",
            Self::CurrentServiceGroups => "current_service_groups",
            Self::HostName => "host_name",
            Self::Message => "message",
            Self::Options => "options",
            Self::PluginOutput => "plugin_output",
            Self::ServiceDescription => "service_description",
            Self::State => "state",
            Self::StateType => "state_type",
            Self::Time => "time",
            Self::Type => "type",
        }
    }

    pub fn column_type(self) -> ColumnType {
        match self {
            Self::Attempt | Self::Class | Self::State | Self::Time => ColumnType::Int,
            Self::CurrentHostGroups | Self::CurrentServiceGroups => ColumnType::List,
            _ => ColumnType::Text,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_text(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl LogRecord {
    /// Borrow the textual content of a non-integer column.
    pub fn text(&self, column: Column) -> &str {
        match column {
            Column::CommandName => &self.command_name,
            Column::Comment => &self.comment,
            Column::ContactName => &self.contact_name,
            Column::HostName => &self.host_name,
            Column::Message => &self.message,
            Column::Options => &self.options,
            Column::PluginOutput => &self.plugin_output,
            Column::ServiceDescription => self.service_description.as_deref().unwrap_or(""),
            Column::StateType => &self.state_type,
            Column::Type => &self.log_type,
            _ => "",
        }
    }

    /// Integer content of an integer column.
    pub fn int(&self, column: Column) -> Option<i64> {
        match column {
            Column::Attempt => Some(self.attempt),
            Column::Class => Some(self.class),
            Column::State => Some(self.state),
            Column::Time => Some(self.time),
            _ => None,
        }
    }

    /// Elements of a list column.
    pub fn list(&self, column: Column) -> &[String] {
        match column {
            Column::CurrentHostGroups => &self.current_host_groups,
            Column::CurrentServiceGroups => &self.current_service_groups,
            _ => &[],
        }
    }

    /// Render a column for output. List columns are space-joined.
    pub fn value(&self, column: Column) -> Value {
        match column.column_type() {
            ColumnType::Int => Value::Int(self.int(column).unwrap_or_default()),
            ColumnType::List => Value::Text(self.list(column).join(" ")),
            ColumnType::Text => Value::Text(self.text(column).to_string()),
        }
    }

    /// Parse a Nagios-style log line: `[<epoch>] <TYPE>: <options>`.
    ///
    /// Lines without a recognised type become class `Info` records that keep
    /// the whole text in `message`. Returns `None` when the timestamp prefix
    /// is missing.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let rest = line.strip_prefix('[')?;
        let (stamp, rest) = rest.split_once(']')?;
        let time = stamp.trim().parse::<i64>().ok()?;
        let text = rest.trim_start();

        let mut record = LogRecord {
            time,
            class: LogClass::Info.code(),
            message: line.to_string(),
            ..Default::default()
        };

        let Some((log_type, options)) = text.split_once(": ") else {
            record.log_type = text.to_string();
            if is_program_message(text) {
                record.class = LogClass::Program.code();
            }
            return Some(record);
        };

        record.log_type = log_type.to_string();
        record.options = options.to_string();
        let fields: Vec<&str> = options.split(';').collect();
        let field = |i: usize| fields.get(i).map(|s| s.to_string()).unwrap_or_default();

        match log_type {
            "HOST ALERT" | "INITIAL HOST STATE" | "CURRENT HOST STATE" => {
                record.class = if log_type == "HOST ALERT" {
                    LogClass::Alert.code()
                } else {
                    LogClass::State.code()
                };
                record.host_name = field(0);
                record.state = host_state_code(&field(1));
                record.state_type = field(2);
                record.attempt = field(3).parse().unwrap_or_default();
                record.plugin_output = field(4);
            }
            "SERVICE ALERT" | "INITIAL SERVICE STATE" | "CURRENT SERVICE STATE" => {
                record.class = if log_type == "SERVICE ALERT" {
                    LogClass::Alert.code()
                } else {
                    LogClass::State.code()
                };
                record.host_name = field(0);
                record.service_description = Some(field(1));
                record.state = service_state_code(&field(2));
                record.state_type = field(3);
                record.attempt = field(4).parse().unwrap_or_default();
                record.plugin_output = field(5);
            }
            "HOST DOWNTIME ALERT" | "HOST FLAPPING ALERT" => {
                record.class = LogClass::Alert.code();
                record.host_name = field(0);
                record.state_type = field(1);
                record.comment = field(2);
            }
            "SERVICE DOWNTIME ALERT" | "SERVICE FLAPPING ALERT" => {
                record.class = LogClass::Alert.code();
                record.host_name = field(0);
                record.service_description = Some(field(1));
                record.state_type = field(2);
                record.comment = field(3);
            }
            "HOST NOTIFICATION" => {
                record.class = LogClass::Notification.code();
                record.contact_name = field(0);
                record.host_name = field(1);
                record.state = host_state_code(&field(2));
                record.command_name = field(3);
                record.plugin_output = field(4);
            }
            "SERVICE NOTIFICATION" => {
                record.class = LogClass::Notification.code();
                record.contact_name = field(0);
                record.host_name = field(1);
                record.service_description = Some(field(2));
                record.state = service_state_code(&field(3));
                record.command_name = field(4);
                record.plugin_output = field(5);
            }
            "PASSIVE HOST CHECK" => {
                record.class = LogClass::Passive.code();
                record.host_name = field(0);
                record.state = field(1).parse().unwrap_or_default();
                record.plugin_output = field(2);
            }
            "PASSIVE SERVICE CHECK" => {
                record.class = LogClass::Passive.code();
                record.host_name = field(0);
                record.service_description = Some(field(1));
                record.state = field(2).parse().unwrap_or_default();
                record.plugin_output = field(3);
            }
            "EXTERNAL COMMAND" => {
                record.class = LogClass::Command.code();
                record.command_name = field(0);
            }
            "TIMEPERIOD TRANSITION" => {
                record.class = LogClass::State.code();
            }
            _ => {
                if is_program_message(text) {
                    record.class = LogClass::Program.code();
                }
            }
        }

        Some(record)
    }
}

fn is_program_message(text: &str) -> bool {
    text.contains("starting...") || text.contains("shutting down...") || text.contains("restarting...")
}

fn host_state_code(state: &str) -> i64 {
    match state {
        "UP" => 0,
        "DOWN" => 1,
        "UNREACHABLE" => 2,
        _ => state.parse().unwrap_or(3),
    }
}

fn service_state_code(state: &str) -> i64 {
    match state {
        "OK" => 0,
        "WARNING" => 1,
        "CRITICAL" => 2,
        "UNKNOWN" => 3,
        _ => state.parse().unwrap_or(3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_lookup() {
        assert_eq!(Column::from_name("host_name"), Some(Column::HostName));
        assert_eq!(Column::from_name("type"), Some(Column::Type));
        assert_eq!(Column::from_name("no_such_column"), None);
        for column in DEFAULT_COLUMNS {
            assert_eq!(Column::from_name(column.name()), Some(column));
        }
    }

    #[test]
    fn test_parse_host_alert() {
        let record =
            LogRecord::parse_line("[1234567890] HOST ALERT: test_host_0;DOWN;SOFT;1;I am DOWN")
                .unwrap();
        assert_eq!(record.time, 1234567890);
        assert_eq!(record.log_type, "HOST ALERT");
        assert_eq!(record.class, 1);
        assert_eq!(record.host_name, "test_host_0");
        assert_eq!(record.state, 1);
        assert_eq!(record.state_type, "SOFT");
        assert_eq!(record.attempt, 1);
        assert_eq!(record.plugin_output, "I am DOWN");
        assert_eq!(record.options, "test_host_0;DOWN;SOFT;1;I am DOWN");
        assert!(record.service_description.is_none());
    }

    #[test]
    fn test_parse_service_alert() {
        let record = LogRecord::parse_line(
            "[1234567890] SERVICE ALERT: test_host_0;test_ok_0;CRITICAL;HARD;3;disk full",
        )
        .unwrap();
        assert_eq!(record.service_description.as_deref(), Some("test_ok_0"));
        assert_eq!(record.state, 2);
        assert_eq!(record.state_type, "HARD");
        assert_eq!(record.attempt, 3);
    }

    #[test]
    fn test_parse_notification() {
        let record = LogRecord::parse_line(
            "[100] SERVICE NOTIFICATION: admin;host1;http;WARNING;notify-by-email;slow",
        )
        .unwrap();
        assert_eq!(record.class, 3);
        assert_eq!(record.contact_name, "admin");
        assert_eq!(record.command_name, "notify-by-email");
        assert_eq!(record.state, 1);
    }

    #[test]
    fn test_parse_program_and_info() {
        let record = LogRecord::parse_line("[100] Shinken starting... (version 2.4)").unwrap();
        assert_eq!(record.class, 2);

        let record = LogRecord::parse_line("[100] Warning: something odd").unwrap();
        assert_eq!(record.class, 0);
        assert_eq!(record.log_type, "Warning");

        let record = LogRecord::parse_line("[100] TIMEPERIOD TRANSITION: 24x7;-1;1").unwrap();
        assert_eq!(record.log_type, "TIMEPERIOD TRANSITION");
        assert_eq!(record.options, "24x7;-1;1");
    }

    #[test]
    fn test_parse_rejects_missing_timestamp() {
        assert!(LogRecord::parse_line("HOST ALERT: a;UP;HARD;1;ok").is_none());
        assert!(LogRecord::parse_line("[abc] HOST ALERT: a;UP;HARD;1;ok").is_none());
    }

    #[test]
    fn test_list_columns_render_space_joined() {
        let record = LogRecord {
            current_host_groups: vec!["linux".to_string(), "web".to_string()],
            ..Default::default()
        };
        assert_eq!(
            record.value(Column::CurrentHostGroups),
            Value::Text("linux web".to_string())
        );
        assert_eq!(record.value(Column::CurrentServiceGroups), Value::Text(String::new()));
    }
}
