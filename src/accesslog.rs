//! Access log line grammar and `key=value` extras.

use crate::date::{parse_date, DateError};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static ACCESSLOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"^(?P<remote_addr>[^ ]+)"#,
        r#" - "#,
        r#"(?P<ident>.*?) "#,
        r#"\[(?P<date>.*?)\] "#,
        r#""(?P<method>[^ ]+) (?P<path>.*?) HTTP/(?P<http_version>1\.[01])" "#,
        r#"(?P<status_code>[0-9]{3}) "#,
        r#"(?P<bytes_sent>[0-9]+) "#,
        r#""(?P<referer>[^"]+)" "#,
        r#""(?P<user_agent>[^"]+)" "#,
        r#""(?P<forwarded_for>[^"]+)""#,
        r#"(?: (?P<extra>.*))?$"#,
    ))
    .expect("access log pattern is valid")
});

/// A line did not match the access log grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line does not match the access log format")]
pub struct ParseError;

/// One parsed access log line.
///
/// Only the fields the counters need are kept; `date` stays in its raw form
/// until [`AccessLogRecord::timestamp`] is asked for it.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct AccessLogRecord {
    pub remote_addr: String,
    /// Raw `DD/Mon/YYYY:HH:MM:SS ±HHMM` value from between the brackets.
    pub date: String,
    pub method: String,
    pub path: String,
    /// `"1.0"` or `"1.1"`.
    pub http_version: String,
    /// Three-digit status code, kept as text.
    pub status_code: String,
    /// Trailing `key=value` fields; `-` values are already dropped.
    pub extra: HashMap<String, String>,
}

impl AccessLogRecord {
    /// Decode `date` into seconds since the Unix epoch.
    pub fn timestamp(&self) -> Result<i64, DateError> {
        parse_date(&self.date)
    }
}

/// Parse one raw log line.
///
/// Surrounding whitespace (including the line terminator) is ignored.
///
/// # Examples
///
/// ```
/// use wwwatch::parse_line;
///
/// let line = r#"10.0.0.1 - - [29/Jul/2014:13:07:06 +0000] "GET /index.html HTTP/1.1" 200 612 "-" "curl/7.35" "-" rt=0.004 cs=HIT"#;
/// let record = parse_line(line).unwrap();
/// assert_eq!(record.method, "GET");
/// assert_eq!(record.status_code, "200");
/// assert_eq!(record.extra["cs"], "HIT");
/// ```
pub fn parse_line(line: &str) -> Result<AccessLogRecord, ParseError> {
    let caps = ACCESSLOG_RE.captures(line.trim()).ok_or(ParseError)?;
    let field = |name| caps.name(name).map_or("", |m| m.as_str()).to_string();

    let extra = caps
        .name("extra")
        .map(|m| parse_extra(m.as_str()))
        .unwrap_or_default();

    Ok(AccessLogRecord {
        remote_addr: field("remote_addr"),
        date: field("date"),
        method: field("method"),
        path: field("path"),
        http_version: field("http_version"),
        status_code: field("status_code"),
        extra,
    })
}

/// Parse the trailing `key=value` section of a log line.
///
/// Values may be double-quoted to include whitespace (no escapes; an
/// unterminated quote runs to the end). A `-` value means "absent" and is
/// omitted. Parsing stops quietly at the first token without `=`.
///
/// # Examples
///
/// ```
/// use wwwatch::parse_extra;
///
/// let extra = parse_extra(r#"ua="hello world" up=- cs=MISS"#);
/// assert_eq!(extra.len(), 2);
/// assert_eq!(extra["ua"], "hello world");
/// assert_eq!(extra["cs"], "MISS");
/// ```
pub fn parse_extra(text: &str) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    let mut rest = text;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let Some(eq) = rest.find('=') else {
            break;
        };
        // A bare word before the next `=` is not a key; stop there.
        if rest[..eq].contains(char::is_whitespace) {
            break;
        }
        let key = &rest[..eq];
        rest = &rest[eq + 1..];

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = &quoted[..end];
            rest = quoted.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            value = &rest[..end];
            rest = &rest[end..];
        }

        if value != "-" {
            mapping.insert(key.to_string(), value.to_string());
        }
    }

    mapping
}
