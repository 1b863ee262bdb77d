use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::hashing;
use crate::metafile::TorrentDescriptor;

/// On-disk state for one transfer: the assembled file under its final name,
/// standalone segments as `<name>.seg<i>`, and in-flight assembly output as
/// `<name>.partial`.
///
/// `complete[i]` is true exactly when a verified copy of segment `i` exists
/// locally, either inside the assembled file or as a standalone segment
/// file. Opening the store rescans the directory and re-verifies whatever it
/// finds, so an interrupted download resumes where it left off.
pub struct SegmentStore {
    descriptor: TorrentDescriptor,
    dir: PathBuf,
    complete: Mutex<Vec<bool>>,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("segment file {index} missing during assembly")]
    MissingSegment { index: usize },

    #[error("segment index {index} out of range")]
    OutOfRange { index: usize },

    #[error("segment {index} has {got} bytes, expected {expected}")]
    LengthMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },
}

impl SegmentStore {
    /// Opens (or creates) the store directory and rescans it for verified
    /// segment data.
    pub fn open(
        descriptor: TorrentDescriptor,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut store = Self {
            complete: Mutex::new(Vec::new()),
            descriptor,
            dir,
        };
        let flags = store.scan_existing()?;
        store.complete = Mutex::new(flags);
        Ok(store)
    }

    pub fn descriptor(&self) -> &TorrentDescriptor {
        &self.descriptor
    }

    fn assembled_path(&self) -> PathBuf {
        self.dir.join(&self.descriptor.file_name)
    }

    fn partial_path(&self) -> PathBuf {
        self.dir.join(format!("{}.partial", self.descriptor.file_name))
    }

    fn segment_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}.seg{}", self.descriptor.file_name, index))
    }

    /// True when the fully assembled file is present under its final name.
    pub fn is_assembled(&self) -> bool {
        fs::metadata(self.assembled_path())
            .map(|m| m.is_file() && m.len() == self.descriptor.file_size)
            .unwrap_or(false)
    }

    fn scan_existing(&self) -> Result<Vec<bool>, StorageError> {
        let count = self.descriptor.segment_count;
        if self.is_assembled() && self.verify_assembled()? {
            return Ok(vec![true; count]);
        }

        let mut flags = vec![false; count];
        for (index, flag) in flags.iter_mut().enumerate() {
            let path = self.segment_path(index);
            if !path.exists() {
                continue;
            }
            let data = fs::read(&path)?;
            if data.len() == self.descriptor.segment_len(index)
                && hashing::digest(&data) == self.descriptor.segment_hashes[index]
            {
                *flag = true;
            } else {
                warn!(segment = index, "discarding corrupt segment file");
                fs::remove_file(&path)?;
            }
        }
        let found = flags.iter().filter(|&&f| f).count();
        if found > 0 {
            info!(
                segments = found,
                total = count,
                "resuming with previously fetched segments"
            );
        }
        Ok(flags)
    }

    fn verify_assembled(&self) -> Result<bool, StorageError> {
        let mut file = File::open(self.assembled_path())?;
        for index in 0..self.descriptor.segment_count {
            let mut data = vec![0u8; self.descriptor.segment_len(index)];
            file.seek(SeekFrom::Start(
                index as u64 * self.descriptor.segment_size as u64,
            ))?;
            file.read_exact(&mut data)?;
            if hashing::digest(&data) != self.descriptor.segment_hashes[index] {
                warn!(segment = index, "assembled file failed verification");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn is_complete(&self) -> bool {
        self.complete.lock().await.iter().all(|&c| c)
    }

    pub async fn completed_count(&self) -> usize {
        self.complete.lock().await.iter().filter(|&&c| c).count()
    }

    /// Segment indices still lacking a verified local copy, in index order.
    pub async fn missing_indices(&self) -> Vec<u32> {
        self.complete
            .lock()
            .await
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Reads a verified local copy of segment `index`: from the assembled
    /// file image at its offset if present, else from the standalone
    /// segment store. `None` when the segment is not held.
    pub async fn read_segment(&self, index: usize) -> Result<Option<Vec<u8>>, StorageError> {
        if index >= self.descriptor.segment_count {
            return Ok(None);
        }
        if self.is_assembled() {
            let mut file = File::open(self.assembled_path())?;
            let mut data = vec![0u8; self.descriptor.segment_len(index)];
            file.seek(SeekFrom::Start(
                index as u64 * self.descriptor.segment_size as u64,
            ))?;
            file.read_exact(&mut data)?;
            return Ok(Some(data));
        }
        if !self.complete.lock().await[index] {
            return Ok(None);
        }
        Ok(Some(fs::read(self.segment_path(index))?))
    }

    /// Persists a segment and marks it complete. Callers must already have
    /// verified `data` against the descriptor's hash for `index`.
    pub async fn write_segment(&self, index: usize, data: &[u8]) -> Result<(), StorageError> {
        if index >= self.descriptor.segment_count {
            return Err(StorageError::OutOfRange { index });
        }
        let expected = self.descriptor.segment_len(index);
        if data.len() != expected {
            return Err(StorageError::LengthMismatch {
                index,
                expected,
                got: data.len(),
            });
        }
        fs::write(self.segment_path(index), data)?;
        self.complete.lock().await[index] = true;
        Ok(())
    }

    /// Concatenates all segment files, in index order, into the final file.
    ///
    /// Every segment file must exist; a missing one means a worker reported
    /// success without persisting, and the error is fatal to the download.
    /// Output is written under a partial name and renamed at the end, so the
    /// final name never exposes an incomplete file. Segment files are
    /// deleted only after the rename succeeds.
    pub async fn assemble(&self) -> Result<(), StorageError> {
        if self.is_assembled() {
            return Ok(());
        }

        let partial = self.partial_path();
        let mut out = File::create(&partial)?;
        for index in 0..self.descriptor.segment_count {
            let path = self.segment_path(index);
            if !path.exists() {
                return Err(StorageError::MissingSegment { index });
            }
            out.write_all(&fs::read(&path)?)?;
        }
        out.flush()?;
        drop(out);
        fs::rename(&partial, self.assembled_path())?;

        for index in 0..self.descriptor.segment_count {
            fs::remove_file(self.segment_path(index))?;
        }
        info!(
            file = %self.descriptor.file_name,
            bytes = self.descriptor.file_size,
            "assembly complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerAddr;
    use assert_matches::assert_matches;

    fn test_data() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 251) as u8).collect()
    }

    fn test_descriptor(data: &[u8]) -> TorrentDescriptor {
        let segment_hashes: Vec<String> = data.chunks(256).map(hashing::digest).collect();
        TorrentDescriptor {
            file_name: "payload.bin".to_string(),
            tracker: PeerAddr::new("localhost", 4000),
            file_size: data.len() as u64,
            segment_count: segment_hashes.len(),
            segment_size: 256,
            segment_hashes,
        }
    }

    fn write_all_segments(store: &SegmentStore, data: &[u8]) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            for (i, chunk) in data.chunks(256).enumerate() {
                store.write_segment(i, chunk).await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn test_fresh_store_has_no_segments() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let store = SegmentStore::open(test_descriptor(&data), dir.path()).unwrap();

        assert!(!store.is_complete().await);
        assert!(!store.is_assembled());
        assert_eq!(store.missing_indices().await, vec![0, 1, 2, 3]);
        assert_eq!(store.read_segment(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_read_segment() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let store = SegmentStore::open(test_descriptor(&data), dir.path()).unwrap();

        store.write_segment(1, &data[256..512]).await.unwrap();
        assert_eq!(
            store.read_segment(1).await.unwrap().as_deref(),
            Some(&data[256..512])
        );
        assert_eq!(store.missing_indices().await, vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn test_write_rejects_bad_length() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let store = SegmentStore::open(test_descriptor(&data), dir.path()).unwrap();

        assert_matches!(
            store.write_segment(0, &data[..100]).await,
            Err(StorageError::LengthMismatch { index: 0, expected: 256, got: 100 })
        );
        assert_matches!(
            store.write_segment(9, &data[..256]).await,
            Err(StorageError::OutOfRange { index: 9 })
        );
    }

    #[tokio::test]
    async fn test_assemble_produces_identical_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let store = SegmentStore::open(test_descriptor(&data), dir.path()).unwrap();

        for (i, chunk) in data.chunks(256).enumerate() {
            store.write_segment(i, chunk).await.unwrap();
        }
        store.assemble().await.unwrap();

        assert!(store.is_assembled());
        assert_eq!(fs::read(dir.path().join("payload.bin")).unwrap(), data);
        // segment files are gone once assembly succeeded
        for i in 0..4 {
            assert!(!dir.path().join(format!("payload.bin.seg{i}")).exists());
        }
    }

    #[tokio::test]
    async fn test_assemble_fails_on_missing_segment() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let store = SegmentStore::open(test_descriptor(&data), dir.path()).unwrap();

        store.write_segment(0, &data[..256]).await.unwrap();
        store.write_segment(1, &data[256..512]).await.unwrap();
        store.write_segment(3, &data[768..]).await.unwrap();

        assert_matches!(
            store.assemble().await,
            Err(StorageError::MissingSegment { index: 2 })
        );
        // nothing appears under the final name on failure
        assert!(!dir.path().join("payload.bin").exists());
    }

    #[tokio::test]
    async fn test_reopen_resumes_from_segment_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let descriptor = test_descriptor(&data);
        {
            let store = SegmentStore::open(descriptor.clone(), dir.path()).unwrap();
            store.write_segment(0, &data[..256]).await.unwrap();
            store.write_segment(2, &data[512..768]).await.unwrap();
        }

        let store = SegmentStore::open(descriptor, dir.path()).unwrap();
        assert_eq!(store.missing_indices().await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_reopen_discards_corrupt_segment_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let descriptor = test_descriptor(&data);
        {
            let store = SegmentStore::open(descriptor.clone(), dir.path()).unwrap();
            store.write_segment(0, &data[..256]).await.unwrap();
        }
        // corrupt the persisted segment behind the store's back
        fs::write(dir.path().join("payload.bin.seg0"), vec![0xFFu8; 256]).unwrap();

        let store = SegmentStore::open(descriptor, dir.path()).unwrap();
        assert_eq!(store.missing_indices().await, vec![0, 1, 2, 3]);
        assert!(!dir.path().join("payload.bin.seg0").exists());
    }

    #[tokio::test]
    async fn test_open_over_assembled_file_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let descriptor = test_descriptor(&data);
        fs::write(dir.path().join("payload.bin"), &data).unwrap();

        let store = SegmentStore::open(descriptor, dir.path()).unwrap();
        assert!(store.is_complete().await);
        assert!(store.is_assembled());
        assert_eq!(
            store.read_segment(3).await.unwrap().as_deref(),
            Some(&data[768..])
        );
    }

    #[test]
    fn test_all_segments_then_reopen_then_assemble() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data();
        let descriptor = test_descriptor(&data);
        {
            let store = SegmentStore::open(descriptor.clone(), dir.path()).unwrap();
            write_all_segments(&store, &data);
        }

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let store = SegmentStore::open(descriptor, dir.path()).unwrap();
        rt.block_on(async {
            assert!(store.is_complete().await);
            assert!(!store.is_assembled());
            store.assemble().await.unwrap();
        });
        assert_eq!(fs::read(dir.path().join("payload.bin")).unwrap(), data);
    }
}
