//! Aggregates pprof samples into a call tree with inclusive and exclusive weights.

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::pprof::{Function, Location, Profile};
use crate::{DiagError, DiagResult, SortDirection};

pub const ROOT_NAME: &str = "root";
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub alloc_objects_inc: i64,
    pub alloc_objects_exc: i64,
    pub alloc_space_inc: i64,
    pub alloc_space_exc: i64,
    pub inuse_objects_inc: i64,
    pub inuse_objects_exc: i64,
    pub inuse_space_inc: i64,
    pub inuse_space_exc: i64,
}

impl NodeMetrics {
    /// Sample values are untrusted; totals saturate at `i64::MAX`.
    fn add_inclusive(&mut self, v: &[i64; 4]) {
        self.alloc_objects_inc = self.alloc_objects_inc.saturating_add(v[0]);
        self.alloc_space_inc = self.alloc_space_inc.saturating_add(v[1]);
        self.inuse_objects_inc = self.inuse_objects_inc.saturating_add(v[2]);
        self.inuse_space_inc = self.inuse_space_inc.saturating_add(v[3]);
    }

    fn add_exclusive(&mut self, v: &[i64; 4]) {
        self.alloc_objects_exc = self.alloc_objects_exc.saturating_add(v[0]);
        self.alloc_space_exc = self.alloc_space_exc.saturating_add(v[1]);
        self.inuse_objects_exc = self.inuse_objects_exc.saturating_add(v[2]);
        self.inuse_space_exc = self.inuse_space_exc.saturating_add(v[3]);
    }

    pub fn get(&self, metric: Metric) -> i64 {
        match metric {
            Metric::AllocObjectsInc => self.alloc_objects_inc,
            Metric::AllocObjectsExc => self.alloc_objects_exc,
            Metric::AllocSpaceInc => self.alloc_space_inc,
            Metric::AllocSpaceExc => self.alloc_space_exc,
            Metric::InuseObjectsInc => self.inuse_objects_inc,
            Metric::InuseObjectsExc => self.inuse_objects_exc,
            Metric::InuseSpaceInc => self.inuse_space_inc,
            Metric::InuseSpaceExc => self.inuse_space_exc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    AllocObjectsInc,
    AllocObjectsExc,
    AllocSpaceInc,
    AllocSpaceExc,
    InuseObjectsInc,
    InuseObjectsExc,
    InuseSpaceInc,
    InuseSpaceExc,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Self::AllocObjectsInc,
        Self::AllocObjectsExc,
        Self::AllocSpaceInc,
        Self::AllocSpaceExc,
        Self::InuseObjectsInc,
        Self::InuseObjectsExc,
        Self::InuseSpaceInc,
        Self::InuseSpaceExc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllocObjectsInc => "alloc_objects_inc",
            Self::AllocObjectsExc => "alloc_objects_exc",
            Self::AllocSpaceInc => "alloc_space_inc",
            Self::AllocSpaceExc => "alloc_space_exc",
            Self::InuseObjectsInc => "inuse_objects_inc",
            Self::InuseObjectsExc => "inuse_objects_exc",
            Self::InuseSpaceInc => "inuse_space_inc",
            Self::InuseSpaceExc => "inuse_space_exc",
        }
    }

    /// Accepts column headers too, e.g. `"Alloc Space Inc"`.
    pub fn parse(raw: &str) -> DiagResult<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(' ', "_");
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| DiagError::InvalidArgument(format!("unknown metric {raw:?}")))
    }

    /// Self-weight counterpart used for folded stacks.
    pub fn exclusive(self) -> Self {
        match self {
            Self::AllocObjectsInc | Self::AllocObjectsExc => Self::AllocObjectsExc,
            Self::AllocSpaceInc | Self::AllocSpaceExc => Self::AllocSpaceExc,
            Self::InuseObjectsInc | Self::InuseObjectsExc => Self::InuseObjectsExc,
            Self::InuseSpaceInc | Self::InuseSpaceExc => Self::InuseSpaceExc,
        }
    }

    /// Percentages are taken against the root's inclusive total of the same family.
    pub fn inclusive(self) -> Self {
        match self {
            Self::AllocObjectsInc | Self::AllocObjectsExc => Self::AllocObjectsInc,
            Self::AllocSpaceInc | Self::AllocSpaceExc => Self::AllocSpaceInc,
            Self::InuseObjectsInc | Self::InuseObjectsExc => Self::InuseObjectsInc,
            Self::InuseSpaceInc | Self::InuseSpaceExc => Self::InuseSpaceInc,
        }
    }
}

impl clap::ValueEnum for Metric {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTreeNode {
    pub name: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    /// Flame-graph width; mirrors `metrics.alloc_objects_inc`.
    pub value: i64,
    #[serde(flatten)]
    pub metrics: NodeMetrics,
    pub children: Vec<CallTreeNode>,
}

impl CallTreeNode {
    pub fn is_root(&self) -> bool {
        self.name == ROOT_NAME && self.file_name.is_empty()
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Self::depth).max().unwrap_or(0)
    }

    /// Copy of the tree with every level's children ordered by `key`.
    /// The sort is stable, so equal keys keep insertion order.
    pub fn sorted_by(&self, key: TreeSortKey, direction: SortDirection) -> CallTreeNode {
        let mut children: Vec<CallTreeNode> = self
            .children
            .iter()
            .map(|c| c.sorted_by(key, direction))
            .collect();
        children.sort_by(|a, b| {
            let ord = match key {
                TreeSortKey::Name => a.name.cmp(&b.name),
                TreeSortKey::Metric(m) => a.metrics.get(m).cmp(&b.metrics.get(m)),
            };
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        CallTreeNode {
            children,
            ..self.shallow_clone()
        }
    }

    fn shallow_clone(&self) -> CallTreeNode {
        CallTreeNode {
            name: self.name.clone(),
            full_name: self.full_name.clone(),
            file_name: self.file_name.clone(),
            value: self.value,
            metrics: self.metrics,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSortKey {
    Name,
    Metric(Metric),
}

impl TreeSortKey {
    pub fn parse(raw: &str) -> DiagResult<Self> {
        if raw.trim().eq_ignore_ascii_case("name") {
            return Ok(Self::Name);
        }
        Metric::parse(raw).map(Self::Metric)
    }
}

struct Frame {
    name: String,
    full_name: String,
    file_name: String,
}

struct ArenaNode {
    frame: Frame,
    metrics: NodeMetrics,
    children: Vec<usize>,
    index: HashMap<String, usize>,
}

impl ArenaNode {
    fn new(frame: Frame) -> Self {
        Self {
            frame,
            metrics: NodeMetrics::default(),
            children: Vec::new(),
            index: HashMap::new(),
        }
    }
}

/// Builds the call tree for every sample in `profile`.
///
/// Stacks are walked root first. A location or function that cannot be resolved ends the
/// walk; the deepest resolved frame (or the root) receives the exclusive weight.
pub fn build_call_tree(profile: &Profile) -> CallTreeNode {
    let locations: HashMap<u64, &Location> = profile.location.iter().map(|l| (l.id, l)).collect();
    let functions: HashMap<u64, &Function> = profile.function.iter().map(|f| (f.id, f)).collect();

    let mut arena = vec![ArenaNode::new(Frame {
        name: ROOT_NAME.to_string(),
        full_name: ROOT_NAME.to_string(),
        file_name: String::new(),
    })];
    let mut truncated = 0usize;

    for sample in &profile.sample {
        let values = sample_values(&sample.value);
        arena[0].metrics.add_inclusive(&values);
        let mut current = 0usize;
        for loc_id in sample.location_id.iter().rev() {
            let Some(frame) = resolve_frame(profile, &locations, &functions, *loc_id) else {
                truncated += 1;
                break;
            };
            current = child_for(&mut arena, current, frame);
            arena[current].metrics.add_inclusive(&values);
        }
        arena[current].metrics.add_exclusive(&values);
    }

    if truncated > 0 {
        tracing::debug!(truncated, "samples with unresolved frames");
    }
    into_tree(&mut arena, 0)
}

fn sample_values(raw: &[i64]) -> [i64; 4] {
    let mut v = [0i64; 4];
    for (slot, value) in v.iter_mut().zip(raw) {
        *slot = *value;
    }
    v
}

fn resolve_frame(
    profile: &Profile,
    locations: &HashMap<u64, &Location>,
    functions: &HashMap<u64, &Function>,
    loc_id: u64,
) -> Option<Frame> {
    let line = locations.get(&loc_id)?.line.first()?;
    let function = functions.get(&line.function_id)?;
    let full_name = profile.string(function.name).unwrap_or(UNKNOWN);
    let file = profile.string(function.filename).unwrap_or(UNKNOWN);
    let line_label = if line.line == 0 {
        UNKNOWN.to_string()
    } else {
        line.line.to_string()
    };
    Some(Frame {
        name: format!("{}:L{line_label}", short_function_name(full_name)),
        full_name: full_name.to_string(),
        file_name: basename(file).to_string(),
    })
}

/// `github.com/x/pipeline.(*client).Publish` -> `(*client).Publish`, `main.foo` -> `foo`.
pub fn short_function_name(full: &str) -> &str {
    let last = basename(full);
    match last.split_once('.') {
        Some((_, rest)) if !rest.is_empty() => rest,
        _ => last,
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn child_for(arena: &mut Vec<ArenaNode>, parent: usize, frame: Frame) -> usize {
    if let Some(&idx) = arena[parent].index.get(&frame.name) {
        return idx;
    }
    let idx = arena.len();
    let key = frame.name.clone();
    arena.push(ArenaNode::new(frame));
    arena[parent].index.insert(key, idx);
    arena[parent].children.push(idx);
    idx
}

fn into_tree(arena: &mut [ArenaNode], idx: usize) -> CallTreeNode {
    let child_ids = std::mem::take(&mut arena[idx].children);
    let children = child_ids.into_iter().map(|c| into_tree(arena, c)).collect();
    let node = &mut arena[idx];
    CallTreeNode {
        name: std::mem::take(&mut node.frame.name),
        full_name: std::mem::take(&mut node.frame.full_name),
        file_name: std::mem::take(&mut node.frame.file_name),
        value: node.metrics.alloc_objects_inc,
        metrics: node.metrics,
        children,
    }
}

/// Which rows of a tree table are open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    All,
    /// Rows down to this depth (1 = top-level frames only) are listed.
    Depth(usize),
    /// Only the named rows show their children.
    Names(HashSet<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPercents {
    pub alloc_objects_inc: f64,
    pub alloc_objects_exc: f64,
    pub alloc_space_inc: f64,
    pub alloc_space_exc: f64,
    pub inuse_objects_inc: f64,
    pub inuse_objects_exc: f64,
    pub inuse_space_inc: f64,
    pub inuse_space_exc: f64,
}

impl MetricPercents {
    fn of(metrics: &NodeMetrics, root: &NodeMetrics) -> Self {
        let pct = |m: Metric| {
            let total = root.get(m.inclusive());
            if total == 0 {
                0.0
            } else {
                metrics.get(m) as f64 / total as f64 * 100.0
            }
        };
        Self {
            alloc_objects_inc: pct(Metric::AllocObjectsInc),
            alloc_objects_exc: pct(Metric::AllocObjectsExc),
            alloc_space_inc: pct(Metric::AllocSpaceInc),
            alloc_space_exc: pct(Metric::AllocSpaceExc),
            inuse_objects_inc: pct(Metric::InuseObjectsInc),
            inuse_objects_exc: pct(Metric::InuseObjectsExc),
            inuse_space_inc: pct(Metric::InuseSpaceInc),
            inuse_space_exc: pct(Metric::InuseSpaceExc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRow {
    pub depth: usize,
    pub name: String,
    pub full_name: String,
    pub file_name: String,
    pub has_children: bool,
    pub expanded: bool,
    pub metrics: NodeMetrics,
    pub percent: MetricPercents,
}

/// Tree-table rows below `tree`, depth first.
///
/// A row whose name does not contain `search` (case-insensitive) is hidden together with its
/// subtree. Depth starts at 0 for the root's children.
pub fn flatten(tree: &CallTreeNode, search: &str, expanded: &Expansion) -> Vec<TreeRow> {
    let needle = search.trim().to_lowercase();
    let mut rows = Vec::new();
    for child in &tree.children {
        flatten_into(child, 0, &needle, expanded, &tree.metrics, &mut rows);
    }
    rows
}

fn flatten_into(
    node: &CallTreeNode,
    depth: usize,
    needle: &str,
    expanded: &Expansion,
    root: &NodeMetrics,
    rows: &mut Vec<TreeRow>,
) {
    if !needle.is_empty() && !node.name.to_lowercase().contains(needle) {
        return;
    }
    let open = match expanded {
        Expansion::All => true,
        Expansion::Depth(max) => depth + 1 < *max,
        Expansion::Names(names) => names.contains(&node.name),
    };
    rows.push(TreeRow {
        depth,
        name: node.name.clone(),
        full_name: node.full_name.clone(),
        file_name: node.file_name.clone(),
        has_children: !node.children.is_empty(),
        expanded: open,
        metrics: node.metrics,
        percent: MetricPercents::of(&node.metrics, root),
    });
    if open {
        for child in &node.children {
            flatten_into(child, depth + 1, needle, expanded, root, rows);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldedStack {
    pub stack: String,
    pub weight: u64,
}

/// Brendan Gregg style folded stacks weighted by the self weight of `metric`'s family.
/// Heaviest first; ties ordered by stack text.
pub fn folded_stacks(tree: &CallTreeNode, metric: Metric) -> Vec<FoldedStack> {
    let metric = metric.exclusive();
    let mut acc = BTreeMap::<String, u64>::new();
    let mut path = Vec::<&str>::new();
    for child in &tree.children {
        fold_into(child, metric, &mut path, &mut acc);
    }
    let mut out: Vec<FoldedStack> = acc
        .into_iter()
        .map(|(stack, weight)| FoldedStack { stack, weight })
        .collect();
    out.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.stack.cmp(&b.stack)));
    out
}

fn fold_into<'a>(
    node: &'a CallTreeNode,
    metric: Metric,
    path: &mut Vec<&'a str>,
    acc: &mut BTreeMap<String, u64>,
) {
    path.push(&node.name);
    match u64::try_from(node.metrics.get(metric)) {
        Ok(weight) if weight > 0 => {
            let slot = acc.entry(path.join(";")).or_insert(0);
            *slot = slot.saturating_add(weight);
        }
        _ => {}
    }
    for child in &node.children {
        fold_into(child, metric, path, acc);
    }
    path.pop();
}

pub fn folded_to_text(folded: &[FoldedStack]) -> String {
    if folded.is_empty() {
        return "# empty profile: no samples".to_string();
    }
    let mut out = String::new();
    for row in folded {
        out.push_str(&format!("{} {}\n", row.stack, row.weight));
    }
    out.trim_end().to_string()
}

pub fn folded_to_speedscope(name: &str, unit: &str, folded: &[FoldedStack]) -> serde_json::Value {
    let mut frames: Vec<serde_json::Value> = vec![];
    let mut frame_index = BTreeMap::<String, usize>::new();
    let mut samples = Vec::<Vec<usize>>::new();
    let mut weights = Vec::<u64>::new();

    for row in folded {
        let mut stack = Vec::<usize>::new();
        for frame in row.stack.split(';') {
            let idx = if let Some(i) = frame_index.get(frame) {
                *i
            } else {
                let i = frames.len();
                frames.push(serde_json::json!({"name": frame}));
                frame_index.insert(frame.to_string(), i);
                i
            };
            stack.push(idx);
        }
        samples.push(stack);
        weights.push(row.weight);
    }

    serde_json::json!({
        "$schema": "https://www.speedscope.app/file-format-schema.json",
        "shared": {"frames": frames},
        "profiles": [{
            "type": "sampled",
            "name": name,
            "unit": unit,
            "startValue": 0,
            "endValue": weights.iter().fold(0u64, |acc, w| acc.saturating_add(*w)),
            "samples": samples,
            "weights": weights,
        }],
        "activeProfileIndex": 0,
        "exporter": "diagscope",
    })
}
