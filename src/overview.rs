//! Agent overview (version, state, components) and the configuration documents of a bundle.

use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;

use std::collections::BTreeMap;

use crate::archive::{COMPONENTS_ACTUAL_FILE, STATE_FILE, VERSION_FILE};
use crate::{BundleArchive, DiagResult};

/// YAML documents shown in the configuration view, in display order.
pub const CONFIG_FILES: [&str; 7] = [
    "local-config.yaml",
    "pre-config.yaml",
    "variables.yaml",
    "computed-config.yaml",
    "components-expected.yaml",
    COMPONENTS_ACTUAL_FILE,
    STATE_FILE,
];

const UNKNOWN_STATE: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: Option<String>,
    pub commit: Option<String>,
    pub build_time: Option<String>,
    pub snapshot: Option<String>,
    /// Any other `key: value` pairs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Parses `version.txt`: one `key: value` pair per line, anything else ignored.
pub fn parse_version_txt(text: &str) -> VersionInfo {
    let mut info = VersionInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            continue;
        }
        let slot = match key.to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "version" => &mut info.version,
            "commit" => &mut info.commit,
            "build_time" | "buildtime" => &mut info.build_time,
            "snapshot" => &mut info.snapshot,
            _ => {
                info.extra.insert(key.to_string(), value.to_string());
                continue;
            }
        };
        *slot = Some(value.to_string());
    }
    info
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersion {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub id: String,
    pub state: String,
    pub message: String,
    pub units: Yaml,
    pub version_info: ComponentVersion,
}

impl ComponentState {
    pub fn is_healthy(&self) -> bool {
        self.message.trim_start().to_ascii_lowercase().starts_with("healthy")
    }

    fn from_yaml(value: &Yaml) -> Self {
        let nested = value.get("state");
        let version = nested.and_then(|s| s.get("version_info"));
        Self {
            id: text_at(value, "id").unwrap_or_else(|| crate::NOT_AVAILABLE.to_string()),
            state: nested
                .and_then(|s| text_at(s, "state"))
                .unwrap_or_else(|| UNKNOWN_STATE.to_string()),
            message: nested.and_then(|s| text_at(s, "message")).unwrap_or_default(),
            units: nested
                .and_then(|s| s.get("units"))
                .cloned()
                .unwrap_or_else(|| Yaml::Mapping(Default::default())),
            version_info: ComponentVersion {
                name: version.and_then(|v| text_at(v, "name")),
                version: version.and_then(|v| text_at(v, "version")),
            },
        }
    }
}

/// Top-level agent status from `state.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub state: String,
    pub message: String,
    pub fleet_state: Option<String>,
    pub fleet_message: Option<String>,
    pub log_level: Option<String>,
    pub components: Vec<ComponentState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_errors: Vec<String>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            state: UNKNOWN_STATE.to_string(),
            message: String::new(),
            fleet_state: None,
            fleet_message: None,
            log_level: None,
            components: Vec::new(),
            parse_errors: Vec::new(),
        }
    }
}

impl AgentState {
    /// Never fails: a malformed document yields the default state with the error recorded.
    pub fn from_yaml(text: &str) -> Self {
        let doc: Yaml = match serde_yaml::from_str(text) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("{STATE_FILE}: {e}");
                return Self {
                    parse_errors: vec![format!("{STATE_FILE}: {e}")],
                    ..Self::default()
                };
            }
        };
        let components = doc
            .get("components")
            .and_then(Yaml::as_sequence)
            .map(|list| list.iter().map(ComponentState::from_yaml).collect())
            .unwrap_or_default();
        Self {
            state: text_at(&doc, "state").unwrap_or_else(|| UNKNOWN_STATE.to_string()),
            message: text_at(&doc, "message").unwrap_or_default(),
            fleet_state: text_at(&doc, "fleet_state"),
            fleet_message: text_at(&doc, "fleet_message"),
            log_level: text_at(&doc, "log_level"),
            components,
            parse_errors: Vec::new(),
        }
    }

    pub fn healthy_components(&self) -> usize {
        self.components.iter().filter(|c| c.is_healthy()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub version: Option<String>,
}

/// Input/output wiring of one running component, from `components-actual.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentIo {
    pub id: String,
    pub input_type: Option<String>,
    pub output_type: Option<String>,
    pub units: Vec<UnitConfig>,
}

impl ComponentIo {
    /// Accepts either a list of components or a map keyed by anything.
    pub fn from_yaml(text: &str) -> DiagResult<Vec<ComponentIo>> {
        let doc: Yaml = serde_yaml::from_str(text)?;
        let items: Vec<&Yaml> = match &doc {
            Yaml::Sequence(list) => list.iter().collect(),
            Yaml::Mapping(map) => map.values().collect(),
            _ => Vec::new(),
        };
        Ok(items
            .into_iter()
            .filter(|v| v.is_mapping())
            .map(Self::from_value)
            .collect())
    }

    fn from_value(value: &Yaml) -> Self {
        let units = value
            .get("units")
            .and_then(Yaml::as_sequence)
            .map(|list| {
                list.iter()
                    .map(|unit| {
                        let config = unit.get("config");
                        UnitConfig {
                            id: config.and_then(|c| text_at(c, "id")),
                            kind: config.and_then(|c| text_at(c, "type")),
                            version: config
                                .and_then(|c| c.get("meta"))
                                .and_then(|m| m.get("package"))
                                .and_then(|p| text_at(p, "version")),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: text_at(value, "id").unwrap_or_else(|| crate::NOT_AVAILABLE.to_string()),
            input_type: text_at(value, "input_type")
                .or_else(|| value.get("input_spec").and_then(|s| text_at(s, "input_type"))),
            output_type: text_at(value, "output_type"),
            units,
        }
    }
}

/// Scalar at `key` rendered as text; numbers and booleans are stringified.
fn text_at(value: &Yaml, key: &str) -> Option<String> {
    match value.get(key)? {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOverview {
    pub version: VersionInfo,
    pub agent: AgentState,
    pub components_io: Vec<ComponentIo>,
}

impl BundleOverview {
    pub fn io_for(&self, component_id: &str) -> Option<&ComponentIo> {
        self.components_io.iter().find(|c| c.id == component_id)
    }
}

/// Builds the overview. The three overview files are required; YAML errors are recorded, not fatal.
pub fn load_overview(archive: &BundleArchive) -> DiagResult<BundleOverview> {
    let version = parse_version_txt(&archive.read_text(VERSION_FILE)?);
    let mut agent = AgentState::from_yaml(&archive.read_text(STATE_FILE)?);
    let components_io = match ComponentIo::from_yaml(&archive.read_text(COMPONENTS_ACTUAL_FILE)?) {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!("{COMPONENTS_ACTUAL_FILE}: {e}");
            agent.parse_errors.push(format!("{COMPONENTS_ACTUAL_FILE}: {e}"));
            Vec::new()
        }
    };
    Ok(BundleOverview {
        version,
        agent,
        components_io,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum ConfigDocument {
    Parsed(serde_json::Value),
    /// Kept verbatim because it did not parse.
    Raw { text: String, error: String },
}

impl ConfigDocument {
    pub fn parse(text: &str) -> Self {
        match serde_yaml::from_str::<serde_json::Value>(text) {
            Ok(value) => Self::Parsed(value),
            Err(e) => Self::Raw {
                text: text.to_string(),
                error: e.to_string(),
            },
        }
    }

    /// Text the search runs over: compact JSON for parsed documents, the raw text otherwise.
    pub fn searchable_text(&self) -> String {
        match self {
            Self::Parsed(value) => value.to_string(),
            Self::Raw { text, .. } => text.clone(),
        }
    }

    pub fn to_yaml_text(&self) -> String {
        match self {
            Self::Parsed(value) => serde_yaml::to_string(value).unwrap_or_else(|_| value.to_string()),
            Self::Raw { text, .. } => text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub name: String,
    pub document: ConfigDocument,
}

/// Present configuration documents in display order. Empty files are skipped.
pub fn read_config_files(archive: &BundleArchive) -> Vec<ConfigFile> {
    CONFIG_FILES
        .iter()
        .filter_map(|&name| {
            let text = archive.read_text_optional(name)?;
            if text.trim().is_empty() {
                return None;
            }
            let document = ConfigDocument::parse(&text);
            if let ConfigDocument::Raw { error, .. } = &document {
                tracing::warn!("{name} kept as raw text: {error}");
            }
            Some(ConfigFile {
                name: name.to_string(),
                document,
            })
        })
        .collect()
}

/// Case-insensitive match on file name or content. An empty term matches everything.
pub fn search_configs<'a>(configs: &'a [ConfigFile], term: &str) -> Vec<&'a ConfigFile> {
    let needle = term.trim().to_lowercase();
    configs
        .iter()
        .filter(|c| {
            needle.is_empty()
                || c.name.to_lowercase().contains(&needle)
                || c.document.searchable_text().to_lowercase().contains(&needle)
        })
        .collect()
}
