//! Content comparison algorithms, selected by name.

use engine_core::{
    error::AlgorithmError,
    props::{Props, positive_u64},
};
use model::records::row::RowData;
use std::{fmt::Debug, sync::Arc};
use xxhash_rust::xxh3::xxh3_64_with_seed;

pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// Compares one chunk of primary-key ordered rows from each side.
pub trait ContentCheckAlgorithm: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Rows read per side and chunk.
    fn chunk_size(&self) -> usize;

    /// Count-only algorithms skip the content scan and report it matched.
    fn checks_content(&self) -> bool {
        true
    }

    fn chunk_matches(&self, source: &[RowData], target: &[RowData]) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct CountOnly;

impl ContentCheckAlgorithm for CountOnly {
    fn name(&self) -> &'static str {
        "COUNT"
    }

    fn chunk_size(&self) -> usize {
        DEFAULT_CHUNK_SIZE as usize
    }

    fn checks_content(&self) -> bool {
        false
    }

    fn chunk_matches(&self, _source: &[RowData], _target: &[RowData]) -> bool {
        true
    }
}

/// Row-by-row comparison of column names and values.
#[derive(Debug, Clone, Copy)]
pub struct DataMatch {
    chunk_size: usize,
}

impl DataMatch {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl ContentCheckAlgorithm for DataMatch {
    fn name(&self) -> &'static str {
        "DATA_MATCH"
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn chunk_matches(&self, source: &[RowData], target: &[RowData]) -> bool {
        source.len() == target.len()
            && source
                .iter()
                .zip(target.iter())
                .all(|(s, t)| s.same_content(t))
    }
}

/// Compares one xxh3 digest per chunk instead of individual rows.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumMatch {
    chunk_size: usize,
}

impl ChecksumMatch {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    pub fn digest(rows: &[RowData]) -> u64 {
        rows.iter().fold(rows.len() as u64, |seed, row| {
            xxh3_64_with_seed(&row.canonical_bytes(), seed)
        })
    }
}

impl ContentCheckAlgorithm for ChecksumMatch {
    fn name(&self) -> &'static str {
        "CHECKSUM_MATCH"
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn chunk_matches(&self, source: &[RowData], target: &[RowData]) -> bool {
        Self::digest(source) == Self::digest(target)
    }
}

pub struct CheckAlgorithmRegistry;

impl CheckAlgorithmRegistry {
    pub const NAMES: [&'static str; 3] = ["COUNT", "DATA_MATCH", "CHECKSUM_MATCH"];

    pub fn create(
        name: &str,
        props: &Props,
    ) -> Result<Arc<dyn ContentCheckAlgorithm>, AlgorithmError> {
        let upper = name.to_ascii_uppercase();
        let chunk_size =
            || positive_u64(&upper, props, "chunk-size", Some(DEFAULT_CHUNK_SIZE)).map(|v| v as usize);

        match upper.as_str() {
            "COUNT" => Ok(Arc::new(CountOnly)),
            "DATA_MATCH" => Ok(Arc::new(DataMatch::new(chunk_size()?))),
            "CHECKSUM_MATCH" => Ok(Arc::new(ChecksumMatch::new(chunk_size()?))),
            _ => Err(AlgorithmError::Unknown {
                kind: "consistency check",
                name: name.to_string(),
            }),
        }
    }
}
