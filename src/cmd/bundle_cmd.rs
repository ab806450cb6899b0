//! Overview and configuration commands (`diagscope overview|config ...`).

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::{
    AgentState, ComponentIo, Config, DiagResult, IngestStats, ProfileKind, VersionInfo,
    open_bundle, search_configs,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStatus {
    pub file: String,
    pub kind: ProfileKind,
    pub parsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewReport {
    pub bundle: String,
    pub bundle_id: String,
    pub digest: String,
    pub entries: usize,
    pub version: VersionInfo,
    pub agent: AgentState,
    pub components_io: Vec<ComponentIo>,
    pub logs: IngestStats,
    pub profiles: Vec<ProfileStatus>,
}

pub fn overview_command(config: &Config, bundle_path: &Path) -> DiagResult<OverviewReport> {
    let bundle = open_bundle(config, bundle_path)?;
    let profiles = bundle
        .profiles
        .profiles
        .iter()
        .map(|(file, outcome)| ProfileStatus {
            file: file.clone(),
            kind: outcome.kind(),
            parsed: outcome.tree().is_some(),
            error: outcome.error().map(str::to_string),
        })
        .collect();
    Ok(OverviewReport {
        bundle: bundle_path.display().to_string(),
        bundle_id: bundle.id.to_string(),
        digest: bundle.archive.digest().to_string(),
        entries: bundle.archive.len(),
        version: bundle.overview.version.clone(),
        agent: bundle.overview.agent.clone(),
        components_io: bundle.overview.components_io.clone(),
        logs: bundle.logs.stats,
        profiles,
    })
}

/// Lists the bundle's configuration documents, optionally narrowed by a search term.
/// With `raw` each document is rendered back to YAML text instead of structured JSON.
pub fn config_command(
    config: &Config,
    bundle_path: &Path,
    search: Option<&str>,
    raw: bool,
) -> DiagResult<serde_json::Value> {
    let bundle = open_bundle(config, bundle_path)?;
    let term = search.unwrap_or("");
    let matched = search_configs(&bundle.configs, term);
    let files = matched
        .iter()
        .map(|file| {
            if raw {
                serde_json::json!({
                    "name": file.name,
                    "yaml": file.document.to_yaml_text(),
                })
            } else {
                serde_json::json!({
                    "name": file.name,
                    "document": file.document,
                })
            }
        })
        .collect::<Vec<_>>();
    Ok(serde_json::json!({
        "bundle": bundle_path.display().to_string(),
        "search": term,
        "total": bundle.configs.len(),
        "matched": files.len(),
        "files": files,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::write_sample_bundle;

    #[test]
    fn overview_reports_every_profile_slot() {
        let path = write_sample_bundle("overview");
        let report = overview_command(&Config::default(), &path).expect("overview");
        assert_eq!(report.version.commit.as_deref(), Some("abc123"));
        assert_eq!(report.logs.files, 1);
        assert_eq!(report.profiles.len(), 6);
        assert_eq!(report.profiles.iter().filter(|p| p.parsed).count(), 1);
        assert!(
            report
                .profiles
                .iter()
                .filter(|p| !p.parsed)
                .all(|p| p.error.as_deref() == Some(crate::FILE_NOT_FOUND))
        );
    }

    #[test]
    fn config_search_narrows_files() {
        let path = write_sample_bundle("config");
        let all = config_command(&Config::default(), &path, None, false).expect("config");
        assert_eq!(all["total"], 3);
        let hit = config_command(&Config::default(), &path, Some("DEBUG"), true).expect("config");
        assert_eq!(hit["matched"], 1);
        assert_eq!(hit["files"][0]["name"], "local-config.yaml");
        assert!(hit["files"][0]["yaml"].as_str().is_some_and(|y| y.contains("level: debug")));
    }

    #[test]
    fn missing_bundle_file_is_io_error() {
        let path = crate::cmd::temp_workspace("missing").join("nope.zip");
        assert!(matches!(
            overview_command(&Config::default(), &path),
            Err(crate::DiagError::Io(_))
        ));
    }
}
