//! Log query engine: filtering, sorting, paging and the aggregations the log view renders.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::window::ResolvedWindow;
use crate::{Component, DiagError, DiagResult, LogGroup, LogLevel, LogRecord, TimeWindow};

/// A dropdown choice: either no constraint (`ALL`) or one value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Selection {
    #[default]
    All,
    Only(String),
}

impl Selection {
    pub const ALL_TOKEN: &'static str = "ALL";

    pub fn parse(raw: &str) -> Self {
        if raw.trim() == Self::ALL_TOKEN {
            Self::All
        } else {
            Self::Only(raw.to_string())
        }
    }

    pub fn only(value: impl Into<String>) -> Self {
        Self::Only(value.into())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    fn matches_text(&self, value: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(want) => want == value,
        }
    }
}

impl From<String> for Selection {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Selection> for String {
    fn from(value: Selection) -> Self {
        match value {
            Selection::All => Selection::ALL_TOKEN.to_string(),
            Selection::Only(v) => v,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(Self::ALL_TOKEN),
            Self::Only(v) => f.write_str(v),
        }
    }
}

/// Filter state owned by the caller. The default constrains nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(default)]
    pub component_id: Selection,
    #[serde(default)]
    pub level: Selection,
    #[serde(default)]
    pub component_type: Selection,
    #[serde(default)]
    pub status: Selection,
    #[serde(default)]
    pub window: TimeWindow,
}

enum StatusMatch {
    Any,
    Code(u32),
    Never,
}

struct Predicate<'a> {
    spec: &'a FilterSpec,
    status: StatusMatch,
    window: ResolvedWindow,
}

impl<'a> Predicate<'a> {
    fn new(spec: &'a FilterSpec, now: OffsetDateTime) -> Self {
        let status = match &spec.status {
            Selection::All => StatusMatch::Any,
            Selection::Only(raw) => match raw.trim().parse::<u32>() {
                Ok(code) => StatusMatch::Code(code),
                Err(_) => StatusMatch::Never,
            },
        };
        Self {
            spec,
            status,
            window: ResolvedWindow::new(&spec.window, now),
        }
    }

    fn matches(
        &self,
        timestamp: OffsetDateTime,
        level: &LogLevel,
        component: &Component,
        status: Option<u32>,
    ) -> bool {
        let level_ok = match &self.spec.level {
            Selection::All => true,
            Selection::Only(want) => level.matches(want),
        };
        let status_ok = match self.status {
            StatusMatch::Any => true,
            StatusMatch::Code(code) => status == Some(code),
            StatusMatch::Never => false,
        };
        self.spec.component_id.matches_text(&component.id)
            && level_ok
            && self.spec.component_type.matches_text(&component.kind)
            && status_ok
            && self.window.contains(timestamp)
    }
}

pub fn filter<'a, I>(records: I, spec: &FilterSpec) -> Vec<&'a LogRecord>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    filter_at(records, spec, OffsetDateTime::now_utc())
}

/// Like [`filter`] with an explicit "now" for relative windows.
pub fn filter_at<'a, I>(records: I, spec: &FilterSpec, now: OffsetDateTime) -> Vec<&'a LogRecord>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let predicate = Predicate::new(spec, now);
    records
        .into_iter()
        .filter(|r| predicate.matches(r.timestamp, &r.level, &r.component, r.status))
        .collect()
}

/// Same predicate as [`filter_at`], applied to each group's representative fields.
pub fn filter_groups_at<'a, I>(groups: I, spec: &FilterSpec, now: OffsetDateTime) -> Vec<&'a LogGroup>
where
    I: IntoIterator<Item = &'a LogGroup>,
{
    let predicate = Predicate::new(spec, now);
    groups
        .into_iter()
        .filter(|g| predicate.matches(g.timestamp, &g.level, &g.component, g.status))
        .collect()
}

pub fn filter_groups<'a, I>(groups: I, spec: &FilterSpec) -> Vec<&'a LogGroup>
where
    I: IntoIterator<Item = &'a LogGroup>,
{
    filter_groups_at(groups, spec, OffsetDateTime::now_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    #[serde(rename = "@timestamp")]
    Timestamp,
    #[serde(rename = "log.level")]
    Level,
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "component.id")]
    ComponentId,
    #[serde(rename = "component.type")]
    ComponentType,
    #[serde(rename = "status")]
    Status,
}

impl SortKey {
    pub fn parse(column: &str) -> DiagResult<Self> {
        match column.trim() {
            "@timestamp" | "timestamp" => Ok(Self::Timestamp),
            "log.level" | "level" => Ok(Self::Level),
            "message" => Ok(Self::Message),
            "component.id" => Ok(Self::ComponentId),
            "component.type" => Ok(Self::ComponentType),
            "status" => Ok(Self::Status),
            other => Err(DiagError::InvalidArgument(format!("unknown sort column {other:?}"))),
        }
    }

    fn compare(self, a: &LogRecord, b: &LogRecord) -> Ordering {
        match self {
            Self::Timestamp => a.timestamp.cmp(&b.timestamp),
            Self::Level => a.level.as_str().cmp(b.level.as_str()),
            Self::Message => a.message.cmp(&b.message),
            Self::ComponentId => a.component.id.cmp(&b.component.id),
            Self::ComponentType => a.component.kind.cmp(&b.component.kind),
            Self::Status => a.status.cmp(&b.status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::Timestamp,
            direction: SortDirection::Desc,
        }
    }
}

impl SortSpec {
    /// Header click: ascending on a new column, flips to descending on a repeat click.
    pub fn toggle(self, key: SortKey) -> Self {
        let direction = if self.key == key && self.direction == SortDirection::Asc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        Self { key, direction }
    }
}

/// Stable sort; ties keep their incoming order in both directions.
pub fn sort_records(records: &mut [&LogRecord], sort: SortSpec) {
    records.sort_by(|a, b| {
        let ord = sort.key.compare(a, b);
        match sort.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
    pub items: Vec<T>,
}

/// 1-based paging; out-of-range pages clamp to the nearest valid one.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let total = items.len();
    let total_pages = total.div_ceil(per_page);
    let page = page.clamp(1, total_pages.max(1));
    let start = (page - 1) * per_page;
    let end = (start + per_page).min(total);
    Page {
        page,
        per_page,
        total,
        total_pages,
        items: items.get(start..end).map(<[T]>::to_vec).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub total: usize,
    pub fatal: usize,
    pub error: usize,
    pub warn: usize,
    pub info: usize,
    pub debug: usize,
    pub trace: usize,
    pub other: usize,
}

pub fn summarize<'a, I>(records: I) -> LevelSummary
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let mut s = LevelSummary::default();
    for record in records {
        s.total += 1;
        match record.level {
            LogLevel::Fatal => s.fatal += 1,
            LogLevel::Error => s.error += 1,
            LogLevel::Warn => s.warn += 1,
            LogLevel::Info => s.info += 1,
            LogLevel::Debug => s.debug += 1,
            LogLevel::Trace => s.trace += 1,
            LogLevel::Other(_) => s.other += 1,
        }
    }
    s
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopTemplateOptions {
    pub limit: usize,
    /// The log view has not been interacted with yet.
    pub initial_view: bool,
    /// The user picked a level (including `ALL`) at some point.
    pub level_selected: bool,
}

impl Default for TopTemplateOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            initial_view: true,
            level_selected: false,
        }
    }
}

impl TopTemplateOptions {
    fn severity_restricted(&self) -> bool {
        self.initial_view && !self.level_selected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRow {
    pub key: String,
    pub message: String,
    #[serde(rename = "log.level")]
    pub level: LogLevel,
    pub component: Component,
    pub total: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub first_timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_timestamp: OffsetDateTime,
    /// Occurrences per day, aligned with [`TemplateHeatmap::days`].
    pub counts: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateHeatmap {
    /// Distinct UTC calendar days (`YYYY-MM-DD`) of the ranked records, ascending.
    pub days: Vec<String>,
    pub rows: Vec<TemplateRow>,
    pub candidates: usize,
    pub severity_restricted: bool,
}

struct TemplateAcc {
    row: TemplateRow,
    per_day: BTreeMap<time::Date, usize>,
}

/// Ranks ad hoc template groups of `records` by count and lays them out per day.
pub fn top_templates<'a, I>(records: I, options: TopTemplateOptions) -> TemplateHeatmap
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let restricted = options.severity_restricted();
    let mut index = HashMap::<String, usize>::new();
    let mut accs = Vec::<TemplateAcc>::new();
    let mut days = BTreeSet::<time::Date>::new();
    let mut candidates = 0usize;

    for record in records {
        if restricted && !matches!(record.level, LogLevel::Error | LogLevel::Warn) {
            continue;
        }
        candidates += 1;
        let day = record.day();
        days.insert(day);
        let key = record.template_key();
        let i = *index.entry(key.clone()).or_insert_with(|| {
            accs.push(TemplateAcc {
                row: TemplateRow {
                    key,
                    message: record.message.clone(),
                    level: record.level.clone(),
                    component: record.component.clone(),
                    total: 0,
                    first_timestamp: record.timestamp,
                    last_timestamp: record.timestamp,
                    counts: Vec::new(),
                },
                per_day: BTreeMap::new(),
            });
            accs.len() - 1
        });
        let acc = &mut accs[i];
        acc.row.total += 1;
        acc.row.first_timestamp = acc.row.first_timestamp.min(record.timestamp);
        acc.row.last_timestamp = acc.row.last_timestamp.max(record.timestamp);
        *acc.per_day.entry(day).or_insert(0) += 1;
    }

    accs.sort_by(|a, b| b.row.total.cmp(&a.row.total));
    let rows = accs
        .into_iter()
        .take(options.limit)
        .map(|acc| {
            let mut row = acc.row;
            row.counts = days
                .iter()
                .map(|d| acc.per_day.get(d).copied().unwrap_or(0))
                .collect();
            row
        })
        .collect();

    TemplateHeatmap {
        days: days.iter().map(ToString::to_string).collect(),
        rows,
        candidates,
        severity_restricted: restricted,
    }
}

/// Distinct values for the filter dropdowns, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facets {
    pub component_ids: Vec<String>,
    pub levels: Vec<String>,
    pub component_types: Vec<String>,
    pub statuses: Vec<u32>,
}

pub fn facets<'a, I>(records: I) -> Facets
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    fn push_unique<T: Clone + Eq + std::hash::Hash>(seen: &mut HashSet<T>, out: &mut Vec<T>, v: &T) {
        if seen.insert(v.clone()) {
            out.push(v.clone());
        }
    }

    let mut out = Facets::default();
    let (mut ids, mut levels, mut kinds, mut statuses) =
        (HashSet::new(), HashSet::new(), HashSet::new(), HashSet::new());
    for r in records {
        push_unique(&mut ids, &mut out.component_ids, &r.component.id);
        push_unique(&mut levels, &mut out.levels, &r.level.as_str().to_string());
        push_unique(&mut kinds, &mut out.component_types, &r.component.kind);
        if let Some(status) = r.status {
            push_unique(&mut statuses, &mut out.statuses, &status);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenEvent {
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelEvents {
    pub level: LogLevel,
    pub events: Vec<OpenEvent>,
}

/// Per-level event lists for the known severities, in the order the panel shows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenEvents {
    pub levels: Vec<LevelEvents>,
}

const OPEN_EVENT_LEVELS: [LogLevel; 6] = [
    LogLevel::Error,
    LogLevel::Warn,
    LogLevel::Info,
    LogLevel::Debug,
    LogLevel::Trace,
    LogLevel::Fatal,
];

pub fn open_events<'a, I>(records: I) -> OpenEvents
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let mut levels: Vec<LevelEvents> = OPEN_EVENT_LEVELS
        .iter()
        .map(|level| LevelEvents {
            level: level.clone(),
            events: Vec::new(),
        })
        .collect();
    for r in records {
        if let Some(slot) = levels.iter_mut().find(|l| l.level == r.level) {
            slot.events.push(OpenEvent {
                message: r.message.clone(),
                time: r.timestamp,
            });
        }
    }
    OpenEvents { levels }
}

impl OpenEvents {
    /// Pages run in lockstep across levels; the longest list sets the page count.
    pub fn total_pages(&self, per_page: usize) -> usize {
        let longest = self.levels.iter().map(|l| l.events.len()).max().unwrap_or(0);
        longest.div_ceil(per_page.max(1))
    }

    pub fn page(&self, page: usize, per_page: usize) -> OpenEvents {
        let per_page = per_page.max(1);
        let start = page.saturating_sub(1) * per_page;
        OpenEvents {
            levels: self
                .levels
                .iter()
                .map(|l| LevelEvents {
                    level: l.level.clone(),
                    events: l.events.iter().skip(start).take(per_page).cloned().collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentErrorRate {
    pub id: String,
    pub error_count: usize,
    pub total_count: usize,
    pub error_percentage: f64,
}

pub fn component_error_rates<'a, I>(records: I) -> Vec<ComponentErrorRate>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let mut index = HashMap::<&str, usize>::new();
    let mut rates = Vec::<ComponentErrorRate>::new();
    for r in records {
        let i = *index.entry(r.component.id.as_str()).or_insert_with(|| {
            rates.push(ComponentErrorRate {
                id: r.component.id.clone(),
                error_count: 0,
                total_count: 0,
                error_percentage: 0.0,
            });
            rates.len() - 1
        });
        rates[i].total_count += 1;
        if r.level == LogLevel::Error {
            rates[i].error_count += 1;
        }
    }
    for rate in &mut rates {
        rate.error_percentage = (rate.error_count as f64 / rate.total_count as f64) * 100.0;
    }
    rates.sort_by(|a, b| b.error_percentage.total_cmp(&a.error_percentage));
    rates
}
