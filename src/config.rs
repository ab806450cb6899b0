//! `diagscope.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::TimeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reporter {
    Pretty,
    Json,
}

impl clap::ValueEnum for Reporter {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Pretty, Self::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Pretty => clap::builder::PossibleValue::new("pretty"),
            Self::Json => clap::builder::PossibleValue::new("json"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Glob patterns selecting log entries inside a bundle.
    #[serde(default = "default_log_patterns")]
    pub log_patterns: Vec<String>,

    /// Rows per page in the log table.
    #[serde(default = "default_logs_per_page")]
    pub logs_per_page: usize,

    /// Rows per page in the per-level open events lists.
    #[serde(default = "default_events_per_page")]
    pub events_per_page: usize,

    /// Number of templates in the collapsed top-template ranking.
    #[serde(default = "default_top_templates")]
    pub top_templates: usize,

    /// Number of templates once the ranking is expanded.
    #[serde(default = "default_top_templates_expanded")]
    pub top_templates_expanded: usize,

    /// Relative range applied when the caller does not pick one.
    #[serde(default = "default_time_range")]
    pub default_time_range: String,

    /// Default reporter for CLI commands.
    #[serde(default = "default_reporter")]
    pub reporter: Reporter,
}

fn default_log_patterns() -> Vec<String> {
    vec!["*.ndjson".to_string()]
}

fn default_logs_per_page() -> usize {
    15
}

fn default_events_per_page() -> usize {
    5
}

fn default_top_templates() -> usize {
    5
}

fn default_top_templates_expanded() -> usize {
    10
}

fn default_time_range() -> String {
    "30d".to_string()
}

fn default_reporter() -> Reporter {
    Reporter::Pretty
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_patterns: default_log_patterns(),
            logs_per_page: default_logs_per_page(),
            events_per_page: default_events_per_page(),
            top_templates: default_top_templates(),
            top_templates_expanded: default_top_templates_expanded(),
            default_time_range: default_time_range(),
            reporter: default_reporter(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::parse(&self.default_time_range)
    }

    pub fn top_limit(&self, expanded: bool) -> usize {
        if expanded {
            self.top_templates_expanded
        } else {
            self.top_templates
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: Config = toml::from_str("logs_per_page = 50\nreporter = \"json\"").expect("config");
        assert_eq!(cfg.logs_per_page, 50);
        assert_eq!(cfg.reporter, Reporter::Json);
        assert_eq!(cfg.log_patterns, vec!["*.ndjson".to_string()]);
        assert_eq!(cfg.top_limit(false), 5);
        assert_eq!(cfg.top_limit(true), 10);
    }

    #[test]
    fn missing_config_file_is_default() {
        let path = std::env::temp_dir().join(format!("diagscope-missing-{}.toml", uuid::Uuid::new_v4()));
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.events_per_page, 5);
        assert_eq!(cfg.time_range(), TimeRange::Days30);
    }

    #[test]
    fn unparseable_config_falls_back_to_default() {
        let path = std::env::temp_dir().join(format!("diagscope-bad-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "logs_per_page = \"many\"").expect("write config");
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.logs_per_page, 15);
    }
}
