//! NDJSON log ingestion: flat record list plus template groups in one pass.

use serde::{Deserialize, Serialize};

use std::collections::HashMap;

use crate::{BundleArchive, Component, DiagResult, LogGroup, LogLevel, LogRecord};

/// Shape of one log line as emitted by the agent. Only the fields the views use are typed.
#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    #[serde(rename = "log.level")]
    level: String,
    message: String,
    #[serde(default)]
    component: Option<LogLineComponent>,
    #[serde(rename = "component.id", default)]
    flat_component_id: Option<String>,
    #[serde(rename = "component.type", default)]
    flat_component_type: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct LogLineComponent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub files: usize,
    pub lines: usize,
    pub blank_lines: usize,
    pub dropped_lines: usize,
}

impl IngestStats {
    fn merge(&mut self, other: IngestStats) {
        self.files += other.files;
        self.lines += other.lines;
        self.blank_lines += other.blank_lines;
        self.dropped_lines += other.dropped_lines;
    }
}

/// Result of ingesting every log file in a bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogIngest {
    pub records: Vec<LogRecord>,
    pub groups: Vec<LogGroup>,
    pub stats: IngestStats,
}

#[derive(Debug, Default)]
struct GroupAccumulator {
    index: HashMap<String, usize>,
    groups: Vec<LogGroup>,
}

impl GroupAccumulator {
    fn add(&mut self, record: LogRecord) {
        let key = record.template_key();
        match self.index.get(&key) {
            Some(&i) => self.groups[i].push(record),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push(LogGroup::new(key, record));
            }
        }
    }

    fn absorb(&mut self, group: LogGroup) {
        match self.index.get(&group.key) {
            Some(&i) => self.groups[i].absorb(group),
            None => {
                self.index.insert(group.key.clone(), self.groups.len());
                self.groups.push(group);
            }
        }
    }
}

struct FileIngest {
    records: Vec<LogRecord>,
    groups: GroupAccumulator,
    stats: IngestStats,
}

pub fn ingest_archive(archive: &BundleArchive, patterns: &[String]) -> DiagResult<LogIngest> {
    let names = archive.entries_matching(patterns)?;
    let sources = names
        .into_iter()
        .filter_map(|name| archive.read_text_optional(name).map(|text| (name.to_string(), text)));
    Ok(ingest_sources(sources))
}

/// Ingests `(file name, contents)` pairs. Files are parsed independently and merged.
pub fn ingest_sources<I>(sources: I) -> LogIngest
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut out = LogIngest::default();
    let mut groups = GroupAccumulator::default();
    for (name, text) in sources {
        let file = ingest_file(&name, &text);
        out.records.extend(file.records);
        for group in file.groups.groups {
            groups.absorb(group);
        }
        out.stats.merge(file.stats);
    }
    out.groups = groups.groups;
    tracing::debug!(
        records = out.records.len(),
        groups = out.groups.len(),
        dropped = out.stats.dropped_lines,
        "log ingestion complete"
    );
    out
}

fn ingest_file(name: &str, text: &str) -> FileIngest {
    let mut file = FileIngest {
        records: Vec::new(),
        groups: GroupAccumulator::default(),
        stats: IngestStats {
            files: 1,
            ..IngestStats::default()
        },
    };
    for (line_no, line) in text.lines().enumerate() {
        file.stats.lines += 1;
        if line.trim().is_empty() {
            file.stats.blank_lines += 1;
            continue;
        }
        match parse_line(name, line) {
            Ok(record) => {
                file.groups.add(record.clone());
                file.records.push(record);
            }
            Err(reason) => {
                file.stats.dropped_lines += 1;
                tracing::warn!("dropping {name}:{}: {reason}", line_no + 1);
            }
        }
    }
    file
}

pub fn parse_line(source: &str, line: &str) -> Result<LogRecord, String> {
    let parsed: LogLine = serde_json::from_str(line.trim()).map_err(|e| e.to_string())?;
    let timestamp = crate::parse_timestamp(&parsed.timestamp)
        .ok_or_else(|| format!("unparseable @timestamp {:?}", parsed.timestamp))?;
    let nested = parsed.component.unwrap_or_default();
    let id = nested.id.or(parsed.flat_component_id);
    let kind = nested.kind.or(parsed.flat_component_type);
    Ok(LogRecord {
        timestamp,
        level: LogLevel::parse(&parsed.level),
        status: crate::extract_status(&parsed.message),
        message: parsed.message,
        component: Component::new(id.as_deref(), kind.as_deref()),
        error: parsed.error.filter(|e| !e.is_null()),
        source: source.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::zip_bytes;
    use time::macros::datetime;

    const DISK_FULL_A: &str = r#"{"@timestamp":"2024-01-01T00:00:00Z","log.level":"ERROR","message":"disk full on /var","component":{"id":"filebeat","type":"input"}}"#;
    const DISK_FULL_B: &str = r#"{"@timestamp":"2024-01-01T00:05:00Z","log.level":"ERROR","message":"disk full on /var","component":{"id":"filebeat","type":"input"}}"#;

    fn src(name: &str, text: &str) -> (String, String) {
        (name.to_string(), text.to_string())
    }

    #[test]
    fn identical_messages_collapse_into_one_group() {
        let out = ingest_sources([src("a.ndjson", &format!("{DISK_FULL_A}\n{DISK_FULL_B}\n"))]);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.groups.len(), 1);
        let group = &out.groups[0];
        assert_eq!(group.count, 2);
        assert_eq!(group.nested_logs.len(), 2);
        assert_eq!(group.timestamp, datetime!(2024-01-01 00:00:00 UTC));
        assert_eq!(group.last_timestamp, datetime!(2024-01-01 00:05:00 UTC));
        assert_eq!(group.component.id, "filebeat");
        assert_eq!(group.component.kind, "input");
    }

    #[test]
    fn bad_lines_are_dropped_without_aborting() {
        let text = format!(
            "{DISK_FULL_A}\n\n   \nnot json at all\n{{\"message\":\"no timestamp\"}}\n{{\"@timestamp\":\"never\",\"log.level\":\"info\",\"message\":\"x\"}}\n{DISK_FULL_B}"
        );
        let out = ingest_sources([src("a.ndjson", &text)]);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.stats.blank_lines, 2);
        assert_eq!(out.stats.dropped_lines, 3);
        assert_eq!(out.stats.lines, 7);
    }

    #[test]
    fn group_counts_sum_to_record_count_across_files() {
        let a = format!(
            "{DISK_FULL_A}\n{}\n",
            r#"{"@timestamp":"2024-01-02T00:00:00Z","log.level":"info","message":"Component state changed for unit filestream-default (STARTING->HEALTHY)"}"#
        );
        let b = format!(
            "{DISK_FULL_B}\n{}\n{}\n",
            r#"{"@timestamp":"2024-01-03T00:00:00Z","log.level":"warn","message":"Component state changed for unit filestream-default (HEALTHY->DEGRADED)","component":{"id":"filestream-default"}}"#,
            r#"{"@timestamp":"2024-01-03T00:00:01Z","log.level":"debug","message":"checkin ok"}"#
        );
        let out = ingest_sources([src("a.ndjson", &a), src("b.ndjson", &b)]);
        assert_eq!(out.records.len(), 5);
        let total: usize = out.groups.iter().map(|g| g.count).sum();
        assert_eq!(total, out.records.len());
        for group in &out.groups {
            assert_eq!(group.count, group.nested_logs.len());
            assert!(group.timestamp <= group.last_timestamp);
        }
        // Both state-change lines share the 5-word key.
        let unit = out
            .groups
            .iter()
            .find(|g| g.key == "Component state changed for unit")
            .expect("unit group");
        assert_eq!(unit.count, 2);
        assert_eq!(unit.level, LogLevel::Info);
        assert_eq!(out.groups.iter().find(|g| g.key == "disk full on /var").map(|g| g.count), Some(2));
    }

    #[test]
    fn normalizes_fields_at_the_boundary() {
        let record = parse_line(
            "logs/x.ndjson",
            r#"{"@timestamp":"2024-01-01T00:00:00Z","log.level":"warn","message":"fleet: http status code 503","component.id":"fleet-server","error":{"message":"boom"}}"#,
        )
        .expect("record");
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.status, Some(503));
        assert_eq!(record.component.id, "fleet-server");
        assert_eq!(record.component.kind, crate::NOT_AVAILABLE);
        assert_eq!(record.source, "logs/x.ndjson");
        assert!(record.error.is_some());
    }

    #[test]
    fn ingests_matching_archive_entries_only() {
        let bytes = zip_bytes(&[
            ("logs/elastic-agent.ndjson", DISK_FULL_A.as_bytes()),
            ("logs/elastic-agent.log", DISK_FULL_B.as_bytes()),
        ]);
        let archive = BundleArchive::from_bytes(&bytes).expect("archive");
        let out = ingest_archive(&archive, &["*.ndjson".to_string()]).expect("ingest");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.stats.files, 1);
    }
}
