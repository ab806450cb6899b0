//! `perftools.profiles` wire format and the gzip framing bundles store it in.

use flate2::read::GzDecoder;
use prost::Message as _;
use serde::{Deserialize, Serialize};

use std::io::Read as _;

use crate::{DiagError, DiagResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Clone, PartialEq, prost::Message)]
pub struct Profile {
    #[prost(message, repeated, tag = "1")]
    pub sample_type: Vec<ValueType>,
    #[prost(message, repeated, tag = "2")]
    pub sample: Vec<Sample>,
    #[prost(message, repeated, tag = "3")]
    pub mapping: Vec<Mapping>,
    #[prost(message, repeated, tag = "4")]
    pub location: Vec<Location>,
    #[prost(message, repeated, tag = "5")]
    pub function: Vec<Function>,
    /// Index 0 is always the empty string.
    #[prost(string, repeated, tag = "6")]
    pub string_table: Vec<String>,
    #[prost(int64, tag = "7")]
    pub drop_frames: i64,
    #[prost(int64, tag = "8")]
    pub keep_frames: i64,
    #[prost(int64, tag = "9")]
    pub time_nanos: i64,
    #[prost(int64, tag = "10")]
    pub duration_nanos: i64,
    #[prost(message, optional, tag = "11")]
    pub period_type: Option<ValueType>,
    #[prost(int64, tag = "12")]
    pub period: i64,
    #[prost(int64, repeated, tag = "13")]
    pub comment: Vec<i64>,
    #[prost(int64, tag = "14")]
    pub default_sample_type: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ValueType {
    #[prost(int64, tag = "1")]
    pub r#type: i64,
    #[prost(int64, tag = "2")]
    pub unit: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Sample {
    /// Leaf first.
    #[prost(uint64, repeated, tag = "1")]
    pub location_id: Vec<u64>,
    #[prost(int64, repeated, tag = "2")]
    pub value: Vec<i64>,
    #[prost(message, repeated, tag = "3")]
    pub label: Vec<Label>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Label {
    #[prost(int64, tag = "1")]
    pub key: i64,
    #[prost(int64, tag = "2")]
    pub str: i64,
    #[prost(int64, tag = "3")]
    pub num: i64,
    #[prost(int64, tag = "4")]
    pub num_unit: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Mapping {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub memory_start: u64,
    #[prost(uint64, tag = "3")]
    pub memory_limit: u64,
    #[prost(uint64, tag = "4")]
    pub file_offset: u64,
    #[prost(int64, tag = "5")]
    pub filename: i64,
    #[prost(int64, tag = "6")]
    pub build_id: i64,
    #[prost(bool, tag = "7")]
    pub has_functions: bool,
    #[prost(bool, tag = "8")]
    pub has_filenames: bool,
    #[prost(bool, tag = "9")]
    pub has_line_numbers: bool,
    #[prost(bool, tag = "10")]
    pub has_inline_frames: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Location {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub mapping_id: u64,
    #[prost(uint64, tag = "3")]
    pub address: u64,
    #[prost(message, repeated, tag = "4")]
    pub line: Vec<Line>,
    #[prost(bool, tag = "5")]
    pub is_folded: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Line {
    #[prost(uint64, tag = "1")]
    pub function_id: u64,
    #[prost(int64, tag = "2")]
    pub line: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Function {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(int64, tag = "2")]
    pub name: i64,
    #[prost(int64, tag = "3")]
    pub system_name: i64,
    #[prost(int64, tag = "4")]
    pub filename: i64,
    #[prost(int64, tag = "5")]
    pub start_line: i64,
}

impl Profile {
    /// String-table lookup. Negative, out-of-range and empty entries are `None`.
    pub fn string(&self, idx: i64) -> Option<&str> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.string_table.get(i))
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// `type/unit` label per sample value column, e.g. `alloc_space/bytes`.
    pub fn sample_type_labels(&self) -> Vec<String> {
        self.sample_type
            .iter()
            .map(|vt| {
                format!(
                    "{}/{}",
                    self.string(vt.r#type).unwrap_or("unknown"),
                    self.string(vt.unit).unwrap_or("unknown")
                )
            })
            .collect()
    }
}

/// Decodes an uncompressed profile. `file` only labels the error.
pub fn decode_profile(file: &str, bytes: &[u8]) -> DiagResult<Profile> {
    Profile::decode(bytes).map_err(|e| DiagError::decode(file, e.to_string()))
}

/// Gunzips `bytes` when they carry the gzip magic; anything else is returned as is.
pub fn inflate(file: &str, bytes: &[u8]) -> DiagResult<Vec<u8>> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes.to_vec());
    }
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| DiagError::decode(file, format!("gzip: {e}")))?;
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileKind {
    #[serde(rename = "Allocations")]
    Allocations,
    #[serde(rename = "Blocking profile")]
    Block,
    #[serde(rename = "Goroutine profile")]
    Goroutine,
    #[serde(rename = "Heap profile")]
    Heap,
    #[serde(rename = "Mutex profile")]
    Mutex,
    #[serde(rename = "Thread creation")]
    ThreadCreate,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl ProfileKind {
    pub fn from_file_name(name: &str) -> Self {
        const MARKERS: [(&str, ProfileKind); 6] = [
            ("allocs", ProfileKind::Allocations),
            ("block", ProfileKind::Block),
            ("goroutine", ProfileKind::Goroutine),
            ("heap", ProfileKind::Heap),
            ("mutex", ProfileKind::Mutex),
            ("threadcreate", ProfileKind::ThreadCreate),
        ];
        MARKERS
            .iter()
            .find(|(marker, _)| name.contains(marker))
            .map(|(_, kind)| *kind)
            .unwrap_or(Self::Unknown)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Allocations => "Allocations",
            Self::Block => "Blocking profile",
            Self::Goroutine => "Goroutine profile",
            Self::Heap => "Heap profile",
            Self::Mutex => "Mutex profile",
            Self::ThreadCreate => "Thread creation",
            Self::Unknown => "Unknown",
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use prost::Message as _;
    use std::io::Write as _;

    pub(crate) fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).expect("gzip write");
        enc.finish().expect("gzip finish")
    }

    /// One sample at `main.foo` line 10 with values `[5, 100, 0, 0]`.
    pub(crate) fn single_sample_profile() -> Profile {
        Profile {
            sample_type: vec![
                ValueType { r#type: 1, unit: 2 },
                ValueType { r#type: 3, unit: 4 },
            ],
            sample: vec![Sample {
                location_id: vec![1],
                value: vec![5, 100, 0, 0],
                label: Vec::new(),
            }],
            location: vec![Location {
                id: 1,
                line: vec![Line { function_id: 7, line: 10 }],
                ..Location::default()
            }],
            function: vec![Function {
                id: 7,
                name: 5,
                system_name: 5,
                filename: 6,
                start_line: 1,
            }],
            string_table: [
                "",
                "alloc_objects",
                "count",
                "alloc_space",
                "bytes",
                "main.foo",
                "/src/app/main.go",
            ]
            .map(String::from)
            .to_vec(),
            ..Profile::default()
        }
    }

    #[test]
    fn decodes_gzipped_profile() {
        let profile = single_sample_profile();
        let packed = gzip(&profile.encode_to_vec());
        let raw = inflate("heap.pprof.gz", &packed).expect("inflate");
        let decoded = decode_profile("heap.pprof.gz", &raw).expect("decode");
        assert_eq!(decoded, profile);
        assert_eq!(
            decoded.sample_type_labels(),
            vec!["alloc_objects/count", "alloc_space/bytes"]
        );
        assert_eq!(decoded.string(0), None);
        assert_eq!(decoded.string(99), None);
        assert_eq!(decoded.string(-1), None);
    }

    #[test]
    fn plain_bytes_pass_through_inflate() {
        let raw = single_sample_profile().encode_to_vec();
        assert_eq!(inflate("heap.pprof", &raw).expect("inflate"), raw);
    }

    #[test]
    fn truncated_input_reports_file() {
        let mut raw = single_sample_profile().encode_to_vec();
        raw.truncate(raw.len() - 1);
        match decode_profile("mutex.pprof.gz", &raw) {
            Err(DiagError::Decode { file, .. }) => assert_eq!(file, "mutex.pprof.gz"),
            other => panic!("expected decode error, got {other:?}"),
        }
        let bad_gzip = [0x1f, 0x8b, 0x00, 0x01];
        assert!(matches!(
            inflate("block.pprof.gz", &bad_gzip),
            Err(DiagError::Decode { .. })
        ));
    }

    #[test]
    fn kinds_from_fixed_names() {
        assert_eq!(ProfileKind::from_file_name("allocs.pprof.gz").label(), "Allocations");
        assert_eq!(ProfileKind::from_file_name("block.pprof.gz"), ProfileKind::Block);
        assert_eq!(
            ProfileKind::from_file_name("threadcreate.pprof.gz").label(),
            "Thread creation"
        );
        assert_eq!(ProfileKind::from_file_name("cpu.pprof"), ProfileKind::Unknown);
    }
}
