//! The currently loaded bundle and everything derived from it.

use uuid::Uuid;

use std::sync::Arc;

use crate::{
    BundleArchive, BundleOverview, Config, ConfigFile, DiagResult, LogIngest, ProfileSet,
    collect_profile_inputs, ingest_archive, load_overview, process_profiles, read_config_files,
};

/// Fully derived state of one bundle. Never mutated after construction.
#[derive(Debug)]
pub struct LoadedBundle {
    /// Fresh per load; callers key memoized query results on it.
    pub id: Uuid,
    pub archive: BundleArchive,
    pub overview: BundleOverview,
    pub configs: Vec<ConfigFile>,
    pub logs: LogIngest,
    pub profiles: ProfileSet,
}

impl LoadedBundle {
    pub fn build(bytes: &[u8], config: &Config) -> DiagResult<Self> {
        Self::build_with_progress(bytes, config, |_| {})
    }

    pub fn build_with_progress<F>(bytes: &[u8], config: &Config, on_progress: F) -> DiagResult<Self>
    where
        F: FnMut(u8),
    {
        let archive = BundleArchive::from_bytes(bytes)?;
        archive.ensure_required()?;
        let overview = load_overview(&archive)?;
        let configs = read_config_files(&archive);
        let logs = ingest_archive(&archive, &config.log_patterns)?;
        let profiles = process_profiles(collect_profile_inputs(&archive), on_progress);
        let id = Uuid::new_v4();
        tracing::info!(
            %id,
            digest = archive.digest(),
            entries = archive.len(),
            records = logs.records.len(),
            profiles = profiles.parsed_count(),
            "bundle loaded"
        );
        Ok(Self {
            id,
            archive,
            overview,
            configs,
            logs,
            profiles,
        })
    }
}

/// Holder for at most one loaded bundle, replaced wholesale on every successful load.
#[derive(Debug, Default)]
pub struct Session {
    config: Config,
    current: Option<Arc<LoadedBundle>>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            current: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// On error the previously loaded bundle, if any, stays current.
    pub fn load(&mut self, bytes: &[u8]) -> DiagResult<Arc<LoadedBundle>> {
        let bundle = Arc::new(LoadedBundle::build(bytes, &self.config)?);
        self.current = Some(Arc::clone(&bundle));
        Ok(bundle)
    }

    pub fn current(&self) -> Option<Arc<LoadedBundle>> {
        self.current.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::zip_bytes;
    use crate::pprof::tests::{gzip, single_sample_profile};
    use prost::Message as _;

    pub(crate) fn sample_bundle() -> Vec<u8> {
        let heap = gzip(&single_sample_profile().encode_to_vec());
        let logs = concat!(
            r#"{"@timestamp":"2024-01-01T00:00:00Z","log.level":"ERROR","message":"disk full on /var","component":{"id":"filebeat","type":"input"}}"#,
            "\n",
            r#"{"@timestamp":"2024-01-01T00:05:00Z","log.level":"ERROR","message":"disk full on /var","component":{"id":"filebeat","type":"input"}}"#,
            "\n",
        );
        zip_bytes(&[
            ("version.txt", b"version: 8.14.0\ncommit: abc123\n"),
            ("state.yaml", b"state: 2\nmessage: Running\ncomponents: []\n"),
            ("components-actual.yaml", b"[]\n"),
            ("local-config.yaml", b"agent:\n  logging:\n    level: debug\n"),
            ("logs/elastic-agent-20240101.ndjson", logs.as_bytes()),
            ("heap.pprof.gz", &heap),
        ])
    }

    #[test]
    fn load_derives_everything() {
        let mut session = Session::default();
        assert!(!session.is_loaded());
        let bundle = session.load(&sample_bundle()).expect("load");
        assert_eq!(bundle.overview.version.version.as_deref(), Some("8.14.0"));
        assert_eq!(bundle.logs.records.len(), 2);
        assert_eq!(bundle.logs.groups.len(), 1);
        assert_eq!(bundle.configs.len(), 3);
        assert_eq!(bundle.profiles.profiles.len(), 6);
        assert_eq!(bundle.profiles.parsed_count(), 1);
        assert!(session.is_loaded());
    }

    #[test]
    fn failed_load_keeps_previous_bundle() {
        let mut session = Session::default();
        let first = session.load(&sample_bundle()).expect("load");
        assert!(session.load(b"not a zip").is_err());

        let missing_state = zip_bytes(&[("version.txt", b"version: 1\n")]);
        assert!(session.load(&missing_state).is_err());

        let current = session.current().expect("still loaded");
        assert_eq!(current.id, first.id);

        let second = session.load(&sample_bundle()).expect("reload");
        assert_ne!(second.id, first.id);
        session.clear();
        assert!(session.current().is_none());
    }
}
