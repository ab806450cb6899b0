//! In-memory view over an uploaded diagnostic bundle (`*.zip`).

use globset::{Glob, GlobSet, GlobSetBuilder};

use std::collections::BTreeMap;
use std::io::{Cursor, Read as _};

use crate::{DiagError, DiagResult};

pub const VERSION_FILE: &str = "version.txt";
pub const STATE_FILE: &str = "state.yaml";
pub const COMPONENTS_ACTUAL_FILE: &str = "components-actual.yaml";

/// Entries a bundle must carry for the overview to load.
pub const REQUIRED_ENTRIES: [&str; 3] = [VERSION_FILE, STATE_FILE, COMPONENTS_ACTUAL_FILE];

/// Decompressed bundle contents keyed by entry name.
#[derive(Debug, Clone)]
pub struct BundleArchive {
    entries: BTreeMap<String, Vec<u8>>,
    digest: String,
}

impl BundleArchive {
    pub fn from_bytes(bytes: &[u8]) -> DiagResult<Self> {
        let digest = blake3::hash(bytes).to_hex().to_string();
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = BTreeMap::new();
        for i in 0..zip.len() {
            let mut f = zip.by_index(i)?;
            if f.is_dir() {
                continue;
            }
            let name = f.name().to_string();
            let mut buf = Vec::with_capacity(usize::try_from(f.size()).unwrap_or(0));
            f.read_to_end(&mut buf)?;
            entries.insert(name, buf);
        }
        tracing::debug!(entries = entries.len(), %digest, "bundle archive opened");
        Ok(Self { entries, digest })
    }

    pub fn from_entries<I, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: Into<String>,
    {
        let entries: BTreeMap<String, Vec<u8>> =
            entries.into_iter().map(|(n, b)| (n.into(), b)).collect();
        let mut hasher = blake3::Hasher::new();
        for (name, bytes) in &entries {
            hasher.update(name.as_bytes());
            hasher.update(bytes);
        }
        Self {
            entries,
            digest: hasher.finalize().to_hex().to_string(),
        }
    }

    pub fn entries(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn read_bytes(&self, name: &str) -> DiagResult<&[u8]> {
        self.get(name)
            .ok_or_else(|| DiagError::MissingEntry(name.to_string()))
    }

    pub fn read_text(&self, name: &str) -> DiagResult<String> {
        let bytes = self.read_bytes(name)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn read_text_optional(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn entries_matching(&self, patterns: &[String]) -> DiagResult<Vec<&str>> {
        let set = compile_globset(patterns)?;
        Ok(self
            .entries
            .keys()
            .filter(|name| set.is_match(name.as_str()))
            .map(String::as_str)
            .collect())
    }

    pub fn ensure_required(&self) -> DiagResult<()> {
        for name in REQUIRED_ENTRIES {
            if !self.contains(name) {
                return Err(DiagError::MissingEntry(name.to_string()));
            }
        }
        Ok(())
    }
}

fn compile_globset(patterns: &[String]) -> DiagResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p)
            .map_err(|e| DiagError::InvalidArgument(format!("invalid glob {p:?}: {e}")))?;
        b.add(g);
    }
    b.build()
        .map_err(|e| DiagError::InvalidArgument(format!("invalid globset: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write as _;

    pub(crate) fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);
        for (name, bytes) in files {
            zip.start_file(*name, options).expect("start file");
            zip.write_all(bytes).expect("write entry");
        }
        zip.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn reads_text_and_bytes() {
        let bytes = zip_bytes(&[
            ("version.txt", b"version: 8.14.0\n"),
            ("logs/agent-1.ndjson", b"{}\n"),
        ]);
        let archive = BundleArchive::from_bytes(&bytes).expect("archive");
        assert_eq!(archive.entries(), vec!["logs/agent-1.ndjson", "version.txt"]);
        assert_eq!(archive.read_text("version.txt").expect("text"), "version: 8.14.0\n");
        assert_eq!(archive.read_bytes("logs/agent-1.ndjson").expect("bytes"), b"{}\n");
        assert_eq!(archive.digest().len(), 64);
    }

    #[test]
    fn missing_entry_is_reported() {
        let archive = BundleArchive::from_entries([("state.yaml", b"a: 1".to_vec())]);
        match archive.read_text("version.txt") {
            Err(DiagError::MissingEntry(name)) => assert_eq!(name, "version.txt"),
            other => panic!("expected missing entry, got {other:?}"),
        }
        assert!(archive.ensure_required().is_err());
    }

    #[test]
    fn corrupt_zip_is_an_error() {
        let err = BundleArchive::from_bytes(b"definitely not a zip").expect_err("must fail");
        assert!(matches!(err, DiagError::Zip(_)), "got {err:?}");
    }

    #[test]
    fn glob_matches_nested_log_entries() {
        let archive = BundleArchive::from_entries([
            ("logs/elastic-agent-20240101.ndjson", Vec::new()),
            ("top.ndjson", Vec::new()),
            ("state.yaml", Vec::new()),
        ]);
        let matched = archive
            .entries_matching(&["*.ndjson".to_string()])
            .expect("patterns");
        assert_eq!(matched, vec!["logs/elastic-agent-20240101.ndjson", "top.ndjson"]);
    }
}
