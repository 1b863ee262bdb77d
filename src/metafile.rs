use std::fs;
use std::path::Path;

use nom::{
    IResult, Parser,
    character::complete::{digit1, newline, not_line_ending},
    combinator::{eof, map_res},
    multi::count,
    sequence::terminated,
};
use thiserror::Error;

use crate::hashing;
use crate::peer::PeerAddr;

/// Segment size used when none is given.
pub const DEFAULT_SEGMENT_SIZE: usize = 256;

/// Parsed metadata describing one transfer: segmentation, expected hashes,
/// and the tracker coordinating it.
///
/// Immutable once built; per-segment completion state lives in the
/// [`SegmentStore`](crate::storage::SegmentStore).
#[derive(Debug, Clone)]
pub struct TorrentDescriptor {
    pub file_name: String,
    pub tracker: PeerAddr,
    pub file_size: u64,
    pub segment_count: usize,
    pub segment_size: usize,
    pub segment_hashes: Vec<String>,
}

#[derive(Error, Debug)]
pub enum MetafileError {
    #[error("malformed metadata file: {0}")]
    Syntax(String),

    #[error("invalid tracker address: {0}")]
    Tracker(String),

    #[error("segment count {count} does not cover {file_size} bytes at {segment_size} per segment")]
    CountMismatch {
        count: usize,
        file_size: u64,
        segment_size: usize,
    },

    #[error("segment hash {0} is not hex")]
    BadHash(usize),

    #[error("segment size must be non-zero")]
    ZeroSegmentSize,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TorrentDescriptor {
    /// Exact byte length of segment `index`; only the final segment may be
    /// shorter than `segment_size`.
    pub fn segment_len(&self, index: usize) -> usize {
        let start = index as u64 * self.segment_size as u64;
        (self.file_size - start.min(self.file_size)).min(self.segment_size as u64) as usize
    }

    /// Identifier this transfer is registered under at the tracker: the
    /// digest of the concatenated segment hashes. Every client derives the
    /// same id from the same metadata; the tracker treats it as opaque.
    pub fn content_id(&self) -> String {
        hashing::digest(self.segment_hashes.concat().as_bytes())
    }

    /// Builds a descriptor by segmenting and hashing an existing local file.
    pub fn from_source_file(
        path: &Path,
        tracker: PeerAddr,
        segment_size: usize,
    ) -> Result<Self, MetafileError> {
        if segment_size == 0 {
            return Err(MetafileError::ZeroSegmentSize);
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MetafileError::Syntax(format!("unusable file name: {}", path.display())))?
            .to_string();

        let data = fs::read(path)?;
        let segment_hashes: Vec<String> = data.chunks(segment_size).map(hashing::digest).collect();

        Ok(Self {
            file_name,
            tracker,
            file_size: data.len() as u64,
            segment_count: segment_hashes.len(),
            segment_size,
            segment_hashes,
        })
    }

    fn validate(self) -> Result<Self, MetafileError> {
        if self.segment_size == 0 {
            return Err(MetafileError::ZeroSegmentSize);
        }
        let expected = self.file_size.div_ceil(self.segment_size as u64) as usize;
        if expected != self.segment_count || self.segment_hashes.len() != self.segment_count {
            return Err(MetafileError::CountMismatch {
                count: self.segment_count,
                file_size: self.file_size,
                segment_size: self.segment_size,
            });
        }
        for (i, hash) in self.segment_hashes.iter().enumerate() {
            if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(MetafileError::BadHash(i));
            }
        }
        Ok(self)
    }
}

fn text_line(input: &str) -> IResult<&str, &str> {
    terminated(not_line_ending, newline).parse(input)
}

fn number_line(input: &str) -> IResult<&str, u64> {
    map_res(terminated(digit1, newline), str::parse).parse(input)
}

/// Parses the line-oriented metadata format:
///
/// ```text
/// <fileName>
/// <trackerHost:port>
/// <fileSize>
/// <segmentCount>
/// <segmentSize>
/// <hash 0>
/// ...
/// <hash N-1>
/// ```
pub fn parse_metafile(source: &str) -> Result<TorrentDescriptor, MetafileError> {
    let (rest, (file_name, tracker, file_size, segment_count, segment_size)) =
        (text_line, text_line, number_line, number_line, number_line)
            .parse(source)
            .map_err(|e| MetafileError::Syntax(e.to_string()))?;

    let (rest, hashes) = count(text_line, segment_count as usize)
        .parse(rest)
        .map_err(|e| MetafileError::Syntax(e.to_string()))?;

    eof::<&str, nom::error::Error<&str>>(rest)
        .map_err(|_| MetafileError::Syntax("trailing data after hash list".to_string()))?;

    let tracker: PeerAddr = tracker
        .parse()
        .map_err(|_| MetafileError::Tracker(tracker.to_string()))?;

    TorrentDescriptor {
        file_name: file_name.to_string(),
        tracker,
        file_size,
        segment_count: segment_count as usize,
        segment_size: segment_size as usize,
        segment_hashes: hashes.into_iter().map(str::to_string).collect(),
    }
    .validate()
}

/// Renders a descriptor back into the metadata text format.
pub fn format_metafile(descriptor: &TorrentDescriptor) -> String {
    let mut out = format!(
        "{}\n{}\n{}\n{}\n{}\n",
        descriptor.file_name,
        descriptor.tracker,
        descriptor.file_size,
        descriptor.segment_count,
        descriptor.segment_size,
    );
    for hash in &descriptor.segment_hashes {
        out.push_str(hash);
        out.push('\n');
    }
    out
}

/// Loads and parses a metadata file from disk.
pub fn load_metafile(path: &Path) -> Result<TorrentDescriptor, MetafileError> {
    let source = fs::read_to_string(path)?;
    parse_metafile(&source)
}

/// Writes a descriptor to `path` in the metadata text format.
pub fn write_metafile(descriptor: &TorrentDescriptor, path: &Path) -> Result<(), MetafileError> {
    fs::write(path, format_metafile(descriptor))?;
    Ok(())
}
