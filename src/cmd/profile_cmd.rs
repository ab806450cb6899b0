//! Profile commands (`diagscope profile ...`).

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::path::PathBuf;

use crate::{
    CallTreeNode, Config, DiagError, DiagResult, Expansion, Metric, PROFILE_FILES, ProfileOutcome,
    SortDirection, TreeSortKey, flatten, folded_stacks, folded_to_speedscope, folded_to_text,
    open_bundle,
};

const FILE_HELP: &str = "Profile file or its short name (allocs, block, goroutine, heap, mutex, threadcreate).";

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// Show decode status of every profile file in the bundle
    List {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
    /// Show the call tree as table rows
    Tree {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
        #[arg(long, default_value = "heap", help = FILE_HELP)]
        file: String,
        /// Case-insensitive frame name filter
        #[arg(long, default_value = "")]
        search: String,
        /// Sort column: name or a metric such as alloc_space_inc
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        /// Limit rows to this many levels below the root
        #[arg(long)]
        depth: Option<usize>,
        /// Expand only these frames (repeatable)
        #[arg(long = "expand")]
        expand: Vec<String>,
    },
    /// Export flamegraph-compatible data
    Flame {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
        #[arg(long, default_value = "heap", help = FILE_HELP)]
        file: String,
        #[arg(long, default_value = "alloc_objects_inc")]
        metric: Metric,
        #[arg(long, default_value = "folded")]
        format: ProfileFlameFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFlameFormat {
    Folded,
    Speedscope,
}

impl clap::ValueEnum for ProfileFlameFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Folded, Self::Speedscope]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Folded => clap::builder::PossibleValue::new("folded"),
            Self::Speedscope => clap::builder::PossibleValue::new("speedscope"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileListRow {
    pub file: String,
    pub kind: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn profile_command(config: &Config, command: &ProfileCommand) -> DiagResult<serde_json::Value> {
    match command {
        ProfileCommand::List { bundle } => {
            let bundle = open_bundle(config, bundle)?;
            let rows: Vec<ProfileListRow> = bundle
                .profiles
                .profiles
                .iter()
                .map(|(file, outcome)| list_row(file, outcome))
                .collect();
            Ok(serde_json::to_value(rows)?)
        }
        ProfileCommand::Tree {
            bundle,
            file,
            search,
            sort,
            desc,
            depth,
            expand,
        } => {
            let bundle = open_bundle(config, bundle)?;
            let file = resolve_file(file)?;
            let tree = parsed_tree(bundle.profiles.get(file), file)?;
            let tree = match sort {
                Some(column) => {
                    let direction = if *desc {
                        SortDirection::Desc
                    } else {
                        SortDirection::Asc
                    };
                    tree.sorted_by(TreeSortKey::parse(column)?, direction)
                }
                None => tree.clone(),
            };
            let expansion = if !expand.is_empty() {
                Expansion::Names(expand.iter().cloned().collect::<HashSet<_>>())
            } else {
                depth.map(Expansion::Depth).unwrap_or(Expansion::All)
            };
            let rows = flatten(&tree, search, &expansion);
            Ok(serde_json::json!({
                "file": file,
                "root": {
                    "value": tree.value,
                    "metrics": tree.metrics,
                },
                "rows": rows,
            }))
        }
        ProfileCommand::Flame {
            bundle,
            file,
            metric,
            format,
            out,
        } => {
            let bundle = open_bundle(config, bundle)?;
            let file = resolve_file(file)?;
            let tree = parsed_tree(bundle.profiles.get(file), file)?;
            let folded = folded_stacks(tree, *metric);
            let payload = match format {
                ProfileFlameFormat::Folded => serde_json::json!({
                    "file": file,
                    "metric": metric,
                    "format": "folded",
                    "stacks": folded,
                }),
                ProfileFlameFormat::Speedscope => {
                    folded_to_speedscope(&format!("{file} {}", metric.as_str()), "none", &folded)
                }
            };
            if let Some(out_path) = out {
                match format {
                    ProfileFlameFormat::Folded => super::write_text(out_path, &folded_to_text(&folded))?,
                    ProfileFlameFormat::Speedscope => super::write_json(out_path, &payload)?,
                }
                return Ok(serde_json::json!({
                    "file": file,
                    "format": format,
                    "out": out_path.display().to_string(),
                    "stacks": folded.len(),
                }));
            }
            Ok(payload)
        }
    }
}

fn list_row(file: &str, outcome: &ProfileOutcome) -> ProfileListRow {
    match outcome {
        ProfileOutcome::Parsed {
            kind,
            sample_types,
            samples,
            tree,
        } => ProfileListRow {
            file: file.to_string(),
            kind: kind.label().to_string(),
            status: "parsed".to_string(),
            samples: Some(*samples),
            nodes: Some(tree.node_count()),
            sample_types: sample_types.clone(),
            error: None,
        },
        ProfileOutcome::Failed { kind, error } => ProfileListRow {
            file: file.to_string(),
            kind: kind.label().to_string(),
            status: "failed".to_string(),
            samples: None,
            nodes: None,
            sample_types: Vec::new(),
            error: Some(error.clone()),
        },
    }
}

/// `heap` and `heap.pprof.gz` both resolve to `heap.pprof.gz`.
fn resolve_file(raw: &str) -> DiagResult<&'static str> {
    let raw = raw.trim();
    PROFILE_FILES
        .iter()
        .copied()
        .find(|f| *f == raw || f.strip_suffix(".pprof.gz") == Some(raw))
        .ok_or_else(|| DiagError::InvalidArgument(format!("unknown profile file {raw:?}")))
}

fn parsed_tree<'a>(outcome: Option<&'a ProfileOutcome>, file: &str) -> DiagResult<&'a CallTreeNode> {
    match outcome {
        Some(ProfileOutcome::Parsed { tree, .. }) => Ok(tree),
        Some(ProfileOutcome::Failed { error, .. }) => Err(DiagError::decode(file, error)),
        None => Err(DiagError::MissingEntry(file.to_string())),
    }
}
