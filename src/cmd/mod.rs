mod bundle_cmd;
mod logs_cmd;
mod profile_cmd;

pub use bundle_cmd::*;
pub use logs_cmd::*;
pub use profile_cmd::*;

use serde::Serialize;

use std::path::Path;
use std::sync::Arc;

use crate::{BundleArchive, Config, DiagResult, LoadedBundle, LogIngest, Session, ingest_archive};

/// Reads a bundle from disk and derives everything the commands need.
pub fn open_bundle(config: &Config, path: &Path) -> DiagResult<Arc<LoadedBundle>> {
    let bytes = std::fs::read(path)?;
    let mut session = Session::new(config.clone());
    session.load(&bytes)
}

/// Reads a bundle from disk and ingests only its logs. Profiles are left undecoded.
pub fn open_logs(config: &Config, path: &Path) -> DiagResult<LogIngest> {
    let bytes = std::fs::read(path)?;
    let archive = BundleArchive::from_bytes(&bytes)?;
    archive.ensure_required()?;
    ingest_archive(&archive, &config.log_patterns)
}

fn write_json(path: &Path, value: &impl Serialize) -> DiagResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

fn write_text(path: &Path, value: &str) -> DiagResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, value)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn temp_workspace(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("diagscope-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("workspace");
    dir
}

#[cfg(test)]
pub(crate) fn write_sample_bundle(name: &str) -> std::path::PathBuf {
    let path = temp_workspace(name).join("bundle.zip");
    std::fs::write(&path, crate::session::tests::sample_bundle()).expect("write bundle");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::zip_bytes;

    #[test]
    fn logs_load_without_profiles() {
        let path = write_sample_bundle("open-logs");
        let logs = open_logs(&Config::default(), &path).expect("logs");
        assert_eq!(logs.records.len(), 2);
        assert_eq!(logs.groups.len(), 1);
        assert_eq!(logs.stats.files, 1);

        let bundle = open_bundle(&Config::default(), &path).expect("bundle");
        assert_eq!(bundle.logs.records, logs.records);
    }

    #[test]
    fn logs_load_requires_bundle_layout() {
        let path = temp_workspace("open-logs-bad").join("bundle.zip");
        std::fs::write(&path, zip_bytes(&[("heap.pprof.gz", &b"not a profile"[..])])).expect("write");
        assert!(open_logs(&Config::default(), &path).is_err());
    }
}
