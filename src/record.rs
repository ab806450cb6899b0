//! Normalized log records and their template groups.

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

use std::fmt;
use std::sync::LazyLock;

/// Placeholder for component fields a log line does not carry.
pub const NOT_AVAILABLE: &str = "N/A";

const TEMPLATE_PREFIX_CHARS: usize = 30;
const TEMPLATE_PREFIX_WORDS: usize = 5;

static STATUS_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""status":(\d+)"#).expect("status field pattern"));
static HTTP_STATUS_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)http status code (\d+)").expect("http status pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Other(String),
}

impl LogLevel {
    pub const KNOWN: [LogLevel; 6] = [
        LogLevel::Fatal,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "FATAL" => Self::Fatal,
            "ERROR" => Self::Error,
            "WARN" => Self::Warn,
            "INFO" => Self::Info,
            "DEBUG" => Self::Debug,
            "TRACE" => Self::Trace,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Case-insensitive match against a selector value such as `"warn"`.
    pub fn matches(&self, selector: &str) -> bool {
        match self {
            Self::Other(raw) => raw.eq_ignore_ascii_case(selector),
            known => known.as_str().eq_ignore_ascii_case(selector.trim()),
        }
    }
}

impl From<String> for LogLevel {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<LogLevel> for String {
    fn from(value: LogLevel) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Component {
    pub fn new(id: Option<&str>, kind: Option<&str>) -> Self {
        Self {
            id: or_not_available(id),
            kind: or_not_available(kind),
        }
    }
}

impl Default for Component {
    fn default() -> Self {
        Self::new(None, None)
    }
}

fn or_not_available(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// One parsed line of a log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "@timestamp", with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "log.level")]
    pub level: LogLevel,
    pub message: String,
    pub component: Component,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    /// Archive entry the line was read from.
    pub source: String,
}

impl LogRecord {
    pub fn template_key(&self) -> String {
        template_key(&self.message)
    }

    pub fn day(&self) -> time::Date {
        self.timestamp.to_offset(time::UtcOffset::UTC).date()
    }
}

/// Records sharing a template key, with the first member's fields as representative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogGroup {
    pub key: String,
    #[serde(rename = "@timestamp", with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_timestamp: OffsetDateTime,
    #[serde(rename = "log.level")]
    pub level: LogLevel,
    pub component: Component,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    pub count: usize,
    pub nested_logs: Vec<LogRecord>,
}

impl LogGroup {
    pub fn new(key: String, first: LogRecord) -> Self {
        Self {
            key,
            timestamp: first.timestamp,
            last_timestamp: first.timestamp,
            level: first.level.clone(),
            component: first.component.clone(),
            message: first.message.clone(),
            status: first.status,
            count: 1,
            nested_logs: vec![first],
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        self.timestamp = self.timestamp.min(record.timestamp);
        self.last_timestamp = self.last_timestamp.max(record.timestamp);
        self.count += 1;
        self.nested_logs.push(record);
    }

    /// Folds another group with the same key into this one, keeping this group's representative.
    pub fn absorb(&mut self, other: LogGroup) {
        self.timestamp = self.timestamp.min(other.timestamp);
        self.last_timestamp = self.last_timestamp.max(other.last_timestamp);
        self.count += other.count;
        self.nested_logs.extend(other.nested_logs);
    }
}

/// Grouping fingerprint: the first 30 characters or the first 5 words, whichever is longer.
pub fn template_key(message: &str) -> String {
    let prefix: String = message.chars().take(TEMPLATE_PREFIX_CHARS).collect();
    let words = message
        .split_whitespace()
        .take(TEMPLATE_PREFIX_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    if words.chars().count() > prefix.chars().count() {
        words
    } else {
        prefix
    }
}

/// Status code embedded in a message body, if one of the known shapes is present.
pub fn extract_status(message: &str) -> Option<u32> {
    [&*STATUS_FIELD, &*HTTP_STATUS_CODE]
        .into_iter()
        .find_map(|re| {
            re.captures(message)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        })
}

pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(raw, &Iso8601::DEFAULT))
        .ok()
        .or_else(|| {
            PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT)
                .ok()
                .map(PrimitiveDateTime::assume_utc)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn level_is_canonicalized() {
        assert_eq!(LogLevel::parse("error"), LogLevel::Error);
        assert_eq!(LogLevel::parse(" Warn "), LogLevel::Warn);
        assert_eq!(LogLevel::parse("notice"), LogLevel::Other("notice".to_string()));
        assert_eq!(LogLevel::parse("notice").as_str(), "notice");
        assert!(LogLevel::Warn.matches("warn"));
        assert!(!LogLevel::Warn.matches("ERROR"));
    }

    #[test]
    fn template_key_prefers_longer_candidate() {
        // Five short words are shorter than the 30 character prefix.
        assert_eq!(
            template_key("a b c d e f g h i j k l m n o p q r s t"),
            "a b c d e f g h i j k l m n o "
        );
        // Five long words beat the prefix.
        assert_eq!(
            template_key("connection refused while dialing upstream.elastic.co:443 retrying"),
            "connection refused while dialing upstream.elastic.co:443"
        );
        assert_eq!(template_key("disk full on /var"), "disk full on /var");
    }

    #[test]
    fn status_patterns_in_order() {
        assert_eq!(extract_status(r#"request failed {"status":503,"x":1}"#), Some(503));
        assert_eq!(extract_status("fleet checkin: HTTP Status Code 401 returned"), Some(401));
        assert_eq!(
            extract_status(r#"http status code 500 then "status":404"#),
            Some(404)
        );
        assert_eq!(extract_status("status 500"), None);
    }

    #[test]
    fn out_of_range_status_falls_through() {
        assert_eq!(
            extract_status(r#"{"status":99999999999} http status code 502"#),
            Some(502)
        );
        assert_eq!(extract_status(r#"{"status":99999999999}"#), None);
    }

    #[test]
    fn timestamps_accept_common_iso_shapes() {
        assert_eq!(
            parse_timestamp("2024-01-01T00:05:00.123Z"),
            Some(datetime!(2024-01-01 00:05:00.123 UTC))
        );
        assert_eq!(
            parse_timestamp("2024-01-01T02:00:00+02:00").map(|t| t.unix_timestamp()),
            Some(datetime!(2024-01-01 00:00:00 UTC).unix_timestamp())
        );
        assert_eq!(
            parse_timestamp("2024-01-01T00:00:00"),
            Some(datetime!(2024-01-01 00:00:00 UTC))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn component_defaults_to_not_available() {
        let c = Component::new(Some(""), None);
        assert_eq!(c.id, NOT_AVAILABLE);
        assert_eq!(c.kind, NOT_AVAILABLE);
    }
}
