//! Log view commands (`diagscope logs ...`).

use clap::{Args, Subcommand};
use time::OffsetDateTime;

use std::path::PathBuf;

use crate::{
    Config, DiagError, DiagResult, FilterSpec, LogGroup, Selection, SortDirection, SortKey,
    SortSpec, TimeRange, TimeWindow, TopTemplateOptions, component_error_rates, facets,
    filter_at, filter_groups_at, open_events, open_logs, paginate, parse_timestamp,
    sort_records, summarize, top_templates,
};

const RANGE_HELP: &str = "Relative range: 1d, 7d, 30d, 3m, 6m, 1y, 3y, 5y, or all.";

/// Token that disables the time window entirely.
pub const ALL_TIME: &str = "all";

#[derive(Debug, Clone, Args)]
pub struct LogFilterArgs {
    #[arg(value_name = "BUNDLE")]
    pub bundle: PathBuf,
    /// Component id, or ALL.
    #[arg(long)]
    pub component: Option<String>,
    /// Log level, or ALL.
    #[arg(long)]
    pub level: Option<String>,
    /// Component type, or ALL.
    #[arg(long = "type")]
    pub component_type: Option<String>,
    /// Status code embedded in the message, or ALL.
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, help = RANGE_HELP)]
    pub range: Option<String>,
    /// Inclusive start of an absolute window (RFC 3339).
    #[arg(long)]
    pub start: Option<String>,
    /// Inclusive end of an absolute window (RFC 3339).
    #[arg(long)]
    pub end: Option<String>,
    /// Evaluate relative ranges against this instant instead of the current time.
    #[arg(long)]
    pub now: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// List matching log records, sorted and paged
    Show {
        #[command(flatten)]
        filter: LogFilterArgs,
        /// Sort column: @timestamp, log.level, message, component.id, component.type, status
        #[arg(long, default_value = "@timestamp")]
        sort: String,
        #[arg(long, conflicts_with = "desc")]
        asc: bool,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        per_page: Option<usize>,
    },
    /// List template groups whose representative matches the filters
    Groups {
        #[command(flatten)]
        filter: LogFilterArgs,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        per_page: Option<usize>,
        /// Include member records of each group
        #[arg(long)]
        members: bool,
    },
    /// Count matching records per level
    Summary {
        #[command(flatten)]
        filter: LogFilterArgs,
    },
    /// Rank message templates and lay out their daily counts
    Top {
        #[command(flatten)]
        filter: LogFilterArgs,
        /// Show the longer ranking
        #[arg(long)]
        expanded: bool,
        /// Rank only ERROR and WARN records unless a level is chosen
        #[arg(long)]
        initial_view: bool,
    },
    /// Distinct component ids, levels, types and statuses
    Facets {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
    /// Per-level event lists
    Events {
        #[command(flatten)]
        filter: LogFilterArgs,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        per_page: Option<usize>,
    },
    /// Error percentage per component
    Components {
        #[command(flatten)]
        filter: LogFilterArgs,
    },
}

impl LogFilterArgs {
    pub fn to_spec(&self, config: &Config) -> DiagResult<FilterSpec> {
        Ok(FilterSpec {
            component_id: selection(self.component.as_deref()),
            level: selection(self.level.as_deref()),
            component_type: selection(self.component_type.as_deref()),
            status: selection(self.status.as_deref()),
            window: self.window(config)?,
        })
    }

    /// An explicit `--start`/`--end` pair switches to absolute mode; otherwise the
    /// relative range (or the configured default) applies.
    fn window(&self, config: &Config) -> DiagResult<TimeWindow> {
        let start = self.start.as_deref().map(parse_instant).transpose()?;
        let end = self.end.as_deref().map(parse_instant).transpose()?;
        let absolute = start.is_some() || end.is_some();
        if absolute && (start.is_none() || end.is_none()) {
            return Err(DiagError::InvalidArgument(
                "--start and --end must be given together".to_string(),
            ));
        }
        let token = self
            .range
            .clone()
            .unwrap_or_else(|| config.default_time_range.clone());
        let range = if token.trim().eq_ignore_ascii_case(ALL_TIME) {
            None
        } else {
            Some(TimeRange::parse(&token))
        };
        Ok(TimeWindow::select(range, absolute, start, end))
    }

    fn now(&self) -> DiagResult<OffsetDateTime> {
        match self.now.as_deref() {
            Some(raw) => parse_instant(raw),
            None => Ok(OffsetDateTime::now_utc()),
        }
    }
}

fn selection(raw: Option<&str>) -> Selection {
    raw.map(Selection::parse).unwrap_or_default()
}

fn parse_instant(raw: &str) -> DiagResult<OffsetDateTime> {
    parse_timestamp(raw).ok_or_else(|| DiagError::InvalidArgument(format!("invalid timestamp {raw:?}")))
}

pub fn logs_command(config: &Config, command: &LogsCommand) -> DiagResult<serde_json::Value> {
    match command {
        LogsCommand::Show {
            filter,
            sort,
            asc,
            desc,
            page,
            per_page,
        } => {
            let spec = filter.to_spec(config)?;
            let logs = open_logs(config, &filter.bundle)?;
            let mut rows = filter_at(&logs.records, &spec, filter.now()?);
            let direction = if *asc && !*desc {
                SortDirection::Asc
            } else {
                SortDirection::Desc
            };
            let sort = SortSpec {
                key: SortKey::parse(sort)?,
                direction,
            };
            sort_records(&mut rows, sort);
            let page = paginate(&rows, *page, per_page.unwrap_or(config.logs_per_page));
            Ok(serde_json::json!({
                "filter": spec,
                "sort": sort,
                "page": page,
            }))
        }
        LogsCommand::Groups {
            filter,
            page,
            per_page,
            members,
        } => {
            let spec = filter.to_spec(config)?;
            let logs = open_logs(config, &filter.bundle)?;
            let groups = filter_groups_at(&logs.groups, &spec, filter.now()?);
            let rows: Vec<LogGroup> = groups
                .into_iter()
                .map(|g| {
                    let mut group = g.clone();
                    if !*members {
                        group.nested_logs.clear();
                    }
                    group
                })
                .collect();
            let page = paginate(&rows, *page, per_page.unwrap_or(config.logs_per_page));
            Ok(serde_json::json!({
                "filter": spec,
                "page": page,
            }))
        }
        LogsCommand::Summary { filter } => {
            let spec = filter.to_spec(config)?;
            let logs = open_logs(config, &filter.bundle)?;
            let rows = filter_at(&logs.records, &spec, filter.now()?);
            Ok(serde_json::json!({
                "filter": spec,
                "ingest": logs.stats,
                "levels": summarize(rows.iter().copied()),
            }))
        }
        LogsCommand::Top {
            filter,
            expanded,
            initial_view,
        } => {
            let spec = filter.to_spec(config)?;
            let logs = open_logs(config, &filter.bundle)?;
            let rows = filter_at(&logs.records, &spec, filter.now()?);
            let options = TopTemplateOptions {
                limit: config.top_limit(*expanded),
                initial_view: *initial_view,
                level_selected: filter.level.is_some(),
            };
            Ok(serde_json::json!({
                "filter": spec,
                "heatmap": top_templates(rows.iter().copied(), options),
            }))
        }
        LogsCommand::Facets { bundle } => {
            let logs = open_logs(config, bundle)?;
            Ok(serde_json::to_value(facets(&logs.records))?)
        }
        LogsCommand::Events {
            filter,
            page,
            per_page,
        } => {
            let spec = filter.to_spec(config)?;
            let logs = open_logs(config, &filter.bundle)?;
            let rows = filter_at(&logs.records, &spec, filter.now()?);
            let per_page = per_page.unwrap_or(config.events_per_page);
            let events = open_events(rows.iter().copied());
            Ok(serde_json::json!({
                "filter": spec,
                "page": page,
                "perPage": per_page,
                "totalPages": events.total_pages(per_page),
                "events": events.page(*page, per_page),
            }))
        }
        LogsCommand::Components { filter } => {
            let spec = filter.to_spec(config)?;
            let logs = open_logs(config, &filter.bundle)?;
            let rows = filter_at(&logs.records, &spec, filter.now()?);
            Ok(serde_json::json!({
                "filter": spec,
                "components": component_error_rates(rows.iter().copied()),
            }))
        }
    }
}
