//! Tests for the request parser and filter evaluation.

use super::*;
use crate::format::{OutputFormat, ResponseHeader, Separators};
use crate::schema::LogRecord;

fn record(time: i64, log_type: &str, host: &str, service: Option<&str>) -> LogRecord {
    LogRecord {
        time,
        class: 1,
        log_type: log_type.to_string(),
        host_name: host.to_string(),
        service_description: service.map(str::to_string),
        options: format!("{};DOWN;HARD;1;down", host),
        current_host_groups: vec!["allhosts".to_string(), "Linux".to_string()],
        ..Default::default()
    }
}

fn records() -> Vec<LogRecord> {
    vec![
        record(10, "HOST ALERT", "test_host_0", None),
        record(20, "SERVICE ALERT", "test_host_0", Some("test_ok_0")),
        record(30, "HOST ALERT", "test_host_1", None),
        record(40, "SERVICE ALERT", "test_host_1", Some("test_ok_1")),
        record(50, "TIMEPERIOD TRANSITION", "", None),
    ]
}

fn count(filter: &Filter) -> usize {
    records().iter().filter(|r| filter.matches(r)).count()
}

fn filter(text: &str) -> Filter {
    parse_request(&format!("GET log\n{}", text)).unwrap().filter
}

#[test]
fn test_minimal_request() {
    let request = parse_request("GET log").unwrap();
    assert_eq!(request, Request::default());
    assert_eq!(request.filter, Filter::And(vec![]));
    assert_eq!(count(&request.filter), 5);
}

#[test]
fn test_headers() {
    let request = parse_request(
        "GET log\n\
         Columns: time type state host_name\n\
         OutputFormat: json\n\
         ResponseHeader: fixed16\n\
         KeepAlive: on\n\
         ColumnHeaders: on\n\
         Limit: 3\n\
         Separators: 10 124 44 124\n",
    )
    .unwrap();
    assert_eq!(request.columns, vec!["time", "type", "state", "host_name"]);
    assert_eq!(request.output_format, OutputFormat::Json);
    assert_eq!(request.response_header, ResponseHeader::Fixed16);
    assert!(request.keepalive);
    assert!(request.column_headers);
    assert_eq!(request.limit, Some(3));
    assert_eq!(request.separators, Separators { line: 10, field: 124 });
}

#[test]
fn test_indented_request_lines() {
    let request = parse_request(
        "GET log
        OutputFormat: python
        Columns: time type options state host_name",
    )
    .unwrap();
    assert_eq!(request.output_format, OutputFormat::Python);
    assert_eq!(request.columns.len(), 5);
}

#[test]
fn test_blank_line_ends_request() {
    let request = parse_request("GET log\nColumns: time\n\nBogus: header\n").unwrap();
    assert_eq!(request.columns, vec!["time"]);
}

#[test]
fn test_filter_value_with_spaces() {
    let f = filter("Filter: type = HOST ALERT");
    match &f {
        Filter::Predicate(p) => {
            assert_eq!(p.op(), Op::Eq);
            assert_eq!(p.value(), "HOST ALERT");
        }
        other => panic!("expected predicate, got {:?}", other),
    }
    assert_eq!(count(&f), 2);
}

#[test]
fn test_empty_filter_value() {
    let f = filter("Filter: service_description =");
    assert_eq!(count(&f), 3);
}

#[test]
fn test_implicit_and() {
    let f = filter("Filter: type = HOST ALERT\nFilter: host_name = test_host_1");
    assert!(matches!(f, Filter::And(ref children) if children.len() == 2));
    assert_eq!(count(&f), 1);
}

#[test]
fn test_or_takes_top_nodes_in_push_order() {
    let f = filter(
        "Filter: time >= 20\n\
         Filter: type = HOST ALERT\n\
         Filter: type = TIMEPERIOD TRANSITION\n\
         Or: 2",
    );
    let Filter::And(children) = &f else {
        panic!("expected implicit and, got {:?}", f);
    };
    assert_eq!(children.len(), 2);
    let Filter::Or(alternatives) = &children[1] else {
        panic!("expected or, got {:?}", children[1]);
    };
    assert_eq!(alternatives[0], Filter::predicate("type", Op::Eq, "HOST ALERT").unwrap());
    assert_eq!(count(&f), 2);
}

#[test]
fn test_and_or_negate_algebra() {
    let host = "Filter: type = HOST ALERT\n";
    let service = "Filter: host_name = test_host_0\n";

    let and = filter(&format!("{}{}And: 2", host, service));
    let not_and = filter(&format!("{}{}And: 2\nNegate:", host, service));
    let or = filter(&format!("{}{}Or: 2", host, service));

    assert_eq!(count(&and), 1);
    assert_eq!(count(&or), 3);
    assert_eq!(count(&and) + count(&not_and), records().len());
}

#[test]
fn test_negate_is_exact_complement() {
    let f = filter("Filter: type = HOST ALERT");
    let n = filter("Filter: type = HOST ALERT\nNegate:");
    for r in records() {
        assert_ne!(f.matches(&r), n.matches(&r));
    }
}

#[test]
fn test_and_one_wraps_single_node() {
    let f = filter("Filter: type = SERVICE ALERT\nAnd: 1\nFilter: type = HOST ALERT\nAnd: 1\nOr: 2");
    assert_eq!(count(&f), 4);
}

#[test]
fn test_nested_livestatus_request() {
    let request = parse_request(
        "GET log
Columns: class time type state host_name service_description plugin_output message options contact_name command_name state_type current_host_groups current_service_groups
Filter: time >= 5
Filter: time <= 55
And: 2
Filter: host_name = test_host_0
Filter: type = HOST ALERT
Filter: options ~ ;HARD;
Filter: type = INITIAL HOST STATE
Filter: options ~ ;HARD;
Filter: type = CURRENT HOST STATE
Filter: options ~ ;HARD;
Filter: type = HOST DOWNTIME ALERT
Or: 7
And: 2
Filter: host_name = test_host_0
Filter: type = SERVICE ALERT
Filter: options ~ ;HARD;
Filter: type = INITIAL SERVICE STATE
Filter: options ~ ;HARD;
Filter: type = CURRENT SERVICE STATE
Filter: options ~ ;HARD;
Filter: type = SERVICE DOWNTIME ALERT
Or: 7
And: 2
Filter: class = 2
Filter: type ~~ TIMEPERIOD TRANSITION
Or: 4
OutputFormat: json
ResponseHeader: fixed16
",
    )
    .unwrap();
    assert_eq!(request.columns.len(), 14);
    assert_eq!(request.filter.time_bounds(), (5, 55));
    // Every record carries ;HARD; in its options, so the host_name branches
    // match both records of test_host_0, and the ~~ branch the transition.
    assert_eq!(count(&request.filter), 3);
}

#[test]
fn test_regex_and_literal_containment_differ() {
    let regex = filter("Filter: type ~ ^HOST");
    assert_eq!(count(&regex), 2);

    let literal = filter("Filter: type ~~ ^host");
    assert_eq!(count(&literal), 0);

    let literal = filter("Filter: type ~~ timeperiod transition");
    assert_eq!(count(&literal), 1);

    let dots = filter("Filter: message ~ starting...");
    assert_eq!(count(&dots), 0);
}

#[test]
fn test_negated_operators() {
    assert_eq!(count(&filter("Filter: type != HOST ALERT")), 3);
    assert_eq!(count(&filter("Filter: type !~ ALERT$")), 1);
    assert_eq!(count(&filter("Filter: type !~~ alert")), 1);
    assert_eq!(count(&filter("Filter: type =~ host alert")), 2);
    assert_eq!(count(&filter("Filter: type !=~ host alert")), 3);
}

#[test]
fn test_numeric_and_lexicographic_ordering() {
    assert_eq!(count(&filter("Filter: time >= 30")), 3);
    assert_eq!(count(&filter("Filter: time < 30")), 2);
    assert_eq!(count(&filter("Filter: time > 30")), 2);
    assert_eq!(count(&filter("Filter: time <= 9")), 0);
    // 9 < 10 numerically but "9" > "10" as text
    assert_eq!(count(&filter("Filter: time >= 9")), 5);
    assert_eq!(count(&filter("Filter: time = abc")), 0);

    assert_eq!(count(&filter("Filter: host_name >= test_host_1")), 2);
    assert_eq!(count(&filter("Filter: host_name < test_host_1")), 3);
}

#[test]
fn test_list_column_operators() {
    assert_eq!(count(&filter("Filter: current_host_groups >= allhosts")), 5);
    assert_eq!(count(&filter("Filter: current_host_groups < allhosts")), 0);
    assert_eq!(count(&filter("Filter: current_host_groups >= linux")), 0);
    assert_eq!(count(&filter("Filter: current_host_groups <= linux")), 5);
    assert_eq!(count(&filter("Filter: current_service_groups =")), 5);
    assert_eq!(count(&filter("Filter: current_host_groups =")), 0);
}

#[test]
fn test_unknown_column_fails_closed() {
    assert_eq!(count(&filter("Filter: no_such_column = x")), 0);
    assert_eq!(count(&filter("Filter: no_such_column != x")), 0);
    assert_eq!(count(&filter("Filter: no_such_column = x\nNegate:")), 5);
}

#[test]
fn test_time_bounds() {
    assert_eq!(filter("").time_bounds(), (i64::MIN, i64::MAX));
    assert_eq!(filter("Filter: time >= 0\nFilter: time <= 3600").time_bounds(), (0, 3600));
    assert_eq!(filter("Filter: time > 0\nFilter: time < 3600").time_bounds(), (1, 3599));
    assert_eq!(filter("Filter: time = 7").time_bounds(), (7, 7));
    assert_eq!(
        filter("Filter: time >= 0\nFilter: time >= 100\nFilter: time <= 50").time_bounds(),
        (100, 50)
    );
    assert_eq!(
        filter("Filter: time >= 10\nFilter: time <= 20\nOr: 2").time_bounds(),
        (i64::MIN, i64::MAX)
    );
    assert_eq!(
        filter("Filter: time >= 10\nNegate:").time_bounds(),
        (i64::MIN, i64::MAX)
    );
}

#[test]
fn test_errors() {
    assert_eq!(parse_request(""), Err(QueryError::Empty));
    assert_eq!(parse_request("GET"), Err(QueryError::MissingTable));
    assert_eq!(
        parse_request("GET hosts"),
        Err(QueryError::UnknownTable("hosts".to_string()))
    );
    assert_eq!(
        parse_request("GET log\nFrobnicate: 1"),
        Err(QueryError::UnknownHeader("Frobnicate".to_string()))
    );
    assert_eq!(
        parse_request("GET log\nFilter: type <> x"),
        Err(QueryError::UnknownOperator("<>".to_string()))
    );
    assert_eq!(
        parse_request("GET log\nFilter: type"),
        Err(QueryError::MalformedFilter("type".to_string()))
    );
    assert!(matches!(
        parse_request("GET log\nFilter: type = x\nAnd: two"),
        Err(QueryError::InvalidArity { header: "And", .. })
    ));
    assert_eq!(
        parse_request("GET log\nFilter: type = x\nOr: 2"),
        Err(QueryError::StackUnderflow {
            header: "Or",
            wanted: 2,
            available: 1
        })
    );
    assert!(matches!(
        parse_request("GET log\nNegate:"),
        Err(QueryError::StackUnderflow { header: "Negate", .. })
    ));
    assert!(matches!(
        parse_request("GET log\nFilter: type ~ ("),
        Err(QueryError::InvalidRegex { .. })
    ));
    assert!(matches!(
        parse_request("GET log\nOutputFormat: xml"),
        Err(QueryError::InvalidHeaderValue { header: "OutputFormat", .. })
    ));
}

#[test]
fn test_status_codes() {
    assert_eq!(QueryError::UnknownTable("x".to_string()).status_code(), 404);
    assert_eq!(QueryError::UnknownHeader("x".to_string()).status_code(), 400);
    assert_eq!(
        QueryError::InvalidHeaderValue {
            header: "Limit",
            value: "x".to_string()
        }
        .status_code(),
        452
    );
}

#[test]
fn test_framing_is_read_even_from_bad_requests() {
    let (header, keepalive) =
        Request::framing("GET hosts\nResponseHeader: fixed16\nKeepAlive: on\n");
    assert_eq!(header, ResponseHeader::Fixed16);
    assert!(keepalive);
    assert_eq!(Request::framing("GET log"), (ResponseHeader::Off, false));
}

#[test]
fn test_split_requests() {
    let requests = split_requests("GET log\nColumns: time\n\n\nGET log\nLimit: 1\n\n");
    assert_eq!(requests, vec!["GET log\nColumns: time\n", "GET log\nLimit: 1\n"]);
    assert!(split_requests("\n\n").is_empty());
}
