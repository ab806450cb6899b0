//! Batch decoding of the bundle's profile files off the caller's thread.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

use crate::{BundleArchive, CallTreeNode, DiagError, DiagResult, ProfileKind, build_call_tree, decode_profile};

pub const PROFILE_FILES: [&str; 6] = [
    "allocs.pprof.gz",
    "block.pprof.gz",
    "goroutine.pprof.gz",
    "heap.pprof.gz",
    "mutex.pprof.gz",
    "threadcreate.pprof.gz",
];

pub const FILE_NOT_FOUND: &str = "File not found";

/// One profile file, already gunzipped, or the reason it could not be read.
#[derive(Debug, Clone)]
pub struct ProfileInput {
    pub file: String,
    pub kind: ProfileKind,
    pub data: Result<Vec<u8>, String>,
}

impl ProfileInput {
    pub fn new(file: impl Into<String>, data: Result<Vec<u8>, String>) -> Self {
        let file = file.into();
        Self {
            kind: ProfileKind::from_file_name(&file),
            file,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProfileOutcome {
    Parsed {
        kind: ProfileKind,
        #[serde(rename = "sampleTypes")]
        sample_types: Vec<String>,
        samples: usize,
        tree: CallTreeNode,
    },
    Failed {
        kind: ProfileKind,
        error: String,
    },
}

impl ProfileOutcome {
    pub fn kind(&self) -> ProfileKind {
        match self {
            Self::Parsed { kind, .. } | Self::Failed { kind, .. } => *kind,
        }
    }

    pub fn tree(&self) -> Option<&CallTreeNode> {
        match self {
            Self::Parsed { tree, .. } => Some(tree),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Parsed { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSet {
    pub profiles: BTreeMap<String, ProfileOutcome>,
}

impl ProfileSet {
    pub fn get(&self, file: &str) -> Option<&ProfileOutcome> {
        self.profiles.get(file)
    }

    pub fn parsed_count(&self) -> usize {
        self.profiles.values().filter(|p| p.tree().is_some()).count()
    }
}

#[derive(Debug)]
pub enum WorkerMessage {
    Progress(u8),
    Result(ProfileSet),
}

/// Reads and gunzips the fixed profile files. Absent files become inputs carrying `File not found`.
pub fn collect_profile_inputs(archive: &BundleArchive) -> Vec<ProfileInput> {
    PROFILE_FILES
        .iter()
        .map(|&file| {
            let data = match archive.get(file) {
                None => {
                    tracing::warn!("profile {file} not present in bundle");
                    Err(FILE_NOT_FOUND.to_string())
                }
                Some(bytes) => crate::inflate(file, bytes).map_err(|e| e.to_string()),
            };
            ProfileInput::new(file, data)
        })
        .collect()
}

fn process_one(input: ProfileInput) -> ProfileOutcome {
    let kind = input.kind;
    let bytes = match input.data {
        Ok(bytes) => bytes,
        Err(error) => return ProfileOutcome::Failed { kind, error },
    };
    match decode_profile(&input.file, &bytes) {
        Ok(profile) => ProfileOutcome::Parsed {
            kind,
            sample_types: profile.sample_type_labels(),
            samples: profile.sample.len(),
            tree: build_call_tree(&profile),
        },
        Err(e) => {
            tracing::warn!("{e}");
            ProfileOutcome::Failed {
                kind,
                error: e.to_string(),
            }
        }
    }
}

fn percent(done: usize, total: usize) -> u8 {
    u8::try_from((done * 100 + total / 2) / total.max(1)).unwrap_or(100)
}

/// Decodes every input on its own scoped thread. `on_progress` receives the completed
/// percentage each time a file finishes, in completion order.
pub fn process_profiles<F>(inputs: Vec<ProfileInput>, on_progress: F) -> ProfileSet
where
    F: FnMut(u8),
{
    process_with(inputs, on_progress, process_one)
}

fn process_with<F>(
    inputs: Vec<ProfileInput>,
    mut on_progress: F,
    work: fn(ProfileInput) -> ProfileOutcome,
) -> ProfileSet
where
    F: FnMut(u8),
{
    let total = inputs.len();
    let mut profiles = BTreeMap::new();
    std::thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        for input in inputs {
            let tx = tx.clone();
            scope.spawn(move || {
                let file = input.file.clone();
                let kind = input.kind;
                let outcome = isolated(&file, kind, || work(input));
                let _ = tx.send((file, outcome));
            });
        }
        drop(tx);
        for (done, (file, outcome)) in rx.iter().enumerate() {
            profiles.insert(file, outcome);
            on_progress(percent(done + 1, total));
        }
    });
    tracing::debug!(files = total, "profiles processed");
    ProfileSet { profiles }
}

/// A panic while processing one file fails that file only.
fn isolated<W>(file: &str, kind: ProfileKind, work: W) -> ProfileOutcome
where
    W: FnOnce() -> ProfileOutcome,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let error = DiagError::decode(file, format!("panicked: {reason}"));
            tracing::warn!("{error}");
            ProfileOutcome::Failed {
                kind,
                error: error.to_string(),
            }
        }
    }
}

/// Runs [`process_profiles`] on a background thread. The receiver yields progress
/// messages followed by exactly one `Result`.
pub fn spawn_profile_worker(inputs: Vec<ProfileInput>) -> DiagResult<mpsc::Receiver<WorkerMessage>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("profile-worker".to_string())
        .spawn(move || {
            let progress = tx.clone();
            let set = process_profiles(inputs, |p| {
                let _ = progress.send(WorkerMessage::Progress(p));
            });
            let _ = tx.send(WorkerMessage::Result(set));
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pprof::tests::{gzip, single_sample_profile};
    use prost::Message as _;

    fn bundle_with(files: &[(&str, Vec<u8>)]) -> BundleArchive {
        BundleArchive::from_entries(files.iter().map(|(n, b)| (n.to_string(), b.clone())))
    }

    #[test]
    fn missing_and_corrupt_files_fail_independently() {
        let good = gzip(&single_sample_profile().encode_to_vec());
        let archive = bundle_with(&[
            ("heap.pprof.gz", good.clone()),
            ("allocs.pprof.gz", good),
            ("mutex.pprof.gz", gzip(b"\xff\xff\xff")),
            ("block.pprof.gz", vec![0x1f, 0x8b, 0x08]),
        ]);
        let inputs = collect_profile_inputs(&archive);
        assert_eq!(inputs.len(), PROFILE_FILES.len());

        let mut seen = Vec::new();
        let set = process_profiles(inputs, |p| seen.push(p));
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(set.parsed_count(), 2);
        let heap = set.get("heap.pprof.gz").expect("heap");
        assert_eq!(heap.kind(), ProfileKind::Heap);
        assert_eq!(heap.tree().map(|t| t.metrics.alloc_objects_inc), Some(5));

        let goroutine = set.get("goroutine.pprof.gz").expect("goroutine");
        assert_eq!(goroutine.error(), Some(FILE_NOT_FOUND));
        assert_eq!(goroutine.kind(), ProfileKind::Goroutine);

        let mutex = set.get("mutex.pprof.gz").expect("mutex");
        assert!(mutex.error().is_some_and(|e| e.contains("mutex.pprof.gz")));
        assert!(set.get("block.pprof.gz").and_then(ProfileOutcome::error).is_some());
    }

    #[test]
    fn worker_reports_progress_then_result() {
        let good = gzip(&single_sample_profile().encode_to_vec());
        let inputs = vec![
            ProfileInput::new("heap.pprof.gz", crate::inflate("heap.pprof.gz", &good).map_err(|e| e.to_string())),
            ProfileInput::new("threadcreate.pprof.gz", Err(FILE_NOT_FOUND.to_string())),
        ];
        let rx = spawn_profile_worker(inputs).expect("spawn");
        let messages: Vec<WorkerMessage> = rx.iter().collect();
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], WorkerMessage::Progress(50)));
        assert!(matches!(messages[1], WorkerMessage::Progress(100)));
        match &messages[2] {
            WorkerMessage::Result(set) => {
                assert_eq!(set.profiles.len(), 2);
                assert_eq!(
                    set.get("threadcreate.pprof.gz").map(ProfileOutcome::kind),
                    Some(ProfileKind::ThreadCreate)
                );
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    fn overflowing_heap() -> Vec<u8> {
        let mut profile = single_sample_profile();
        let mut extra = profile.sample[0].clone();
        profile.sample[0].value = vec![i64::MAX, 0, 0, 0];
        extra.value = vec![1, 0, 0, 0];
        profile.sample.push(extra);
        profile.encode_to_vec()
    }

    #[test]
    fn saturating_profile_keeps_the_batch_intact() {
        let good = single_sample_profile().encode_to_vec();
        let inputs = vec![
            ProfileInput::new("heap.pprof.gz", Ok(overflowing_heap())),
            ProfileInput::new("allocs.pprof.gz", Ok(good)),
        ];
        let rx = spawn_profile_worker(inputs).expect("spawn");
        let set = rx
            .iter()
            .find_map(|m| match m {
                WorkerMessage::Result(set) => Some(set),
                WorkerMessage::Progress(_) => None,
            })
            .expect("worker sends a result");
        assert_eq!(set.parsed_count(), 2);
        let heap = set.get("heap.pprof.gz").and_then(ProfileOutcome::tree).expect("heap tree");
        assert_eq!(heap.metrics.alloc_objects_inc, i64::MAX);
    }

    fn panics_on_heap(input: ProfileInput) -> ProfileOutcome {
        if input.kind == ProfileKind::Heap {
            panic!("corrupt heap profile");
        }
        process_one(input)
    }

    #[test]
    fn panicking_file_fails_alone() {
        let good = single_sample_profile().encode_to_vec();
        let inputs = vec![
            ProfileInput::new("heap.pprof.gz", Ok(good.clone())),
            ProfileInput::new("allocs.pprof.gz", Ok(good)),
        ];
        let mut seen = Vec::new();
        let set = process_with(inputs, |p| seen.push(p), panics_on_heap);
        assert_eq!(seen, vec![50, 100]);
        assert_eq!(set.profiles.len(), 2);
        assert!(set.get("allocs.pprof.gz").and_then(ProfileOutcome::tree).is_some());

        let heap = set.get("heap.pprof.gz").expect("heap");
        assert_eq!(heap.kind(), ProfileKind::Heap);
        let error = heap.error().expect("heap failed");
        assert!(error.contains("heap.pprof.gz"), "{error}");
        assert!(error.contains("corrupt heap profile"), "{error}");
    }

    #[test]
    fn empty_batch_is_empty_set() {
        let mut calls = 0;
        let set = process_profiles(Vec::new(), |_| calls += 1);
        assert!(set.profiles.is_empty());
        assert_eq!(calls, 0);
    }
}
