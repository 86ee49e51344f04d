//! Persistent download state and helpers.
//!
//! The structures in this module are serialized to a JSON sidecar next to the
//! output file so that an interrupted job can resume. The sidecar is always
//! checked against the real size of each chunk's temporary file, which is the
//! ground truth for how many bytes of a chunk are on disk.
use crate::error::DownloadError;
use crate::planner::plan_chunks;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// A range of bytes within the remote resource.
///
/// The range is inclusive, meaning `start` and `end` are both part of the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    /// Index of the chunk
    pub index: usize,
    /// The starting byte index (0-based).
    pub start: u64,
    /// The ending byte index.
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes covered by this range.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

/// Progress of a single chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkState {
    #[serde(flatten)]
    pub range: ChunkRange,
    /// Number of bytes already downloaded and written for this chunk.
    #[serde(default)]
    pub bytes_written: u64,
    pub status: ChunkStatus,
}

impl ChunkState {
    pub fn new(range: ChunkRange) -> Self {
        Self {
            range,
            bytes_written: 0,
            status: ChunkStatus::Pending,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ChunkStatus::Complete
    }
}

/// Represents the persistent state of a download job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    /// The source URL of the file.
    pub url: String,
    /// Total size of the remote resource in bytes.
    pub size: u64,
    /// ETag or Last-Modified reported when the job was planned.
    #[serde(default)]
    pub validator: Option<String>,
    /// A list of all chunks and their current status.
    pub chunks: Vec<ChunkState>,
}

impl JobState {
    pub fn new(url: &str, size: u64, validator: Option<String>, ranges: Vec<ChunkRange>) -> Self {
        Self {
            url: url.to_string(),
            size,
            validator,
            chunks: ranges.into_iter().map(ChunkState::new).collect(),
        }
    }

    /// Indices of chunks that still need downloading.
    pub fn resume_set(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| !c.is_complete())
            .map(|c| c.range.index)
            .collect()
    }

    pub fn bytes_on_disk(&self) -> u64 {
        self.chunks.iter().map(|c| c.bytes_written).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(ChunkState::is_complete)
    }

    /// True if the chunk ranges are exactly what planning `size` into
    /// `chunks.len()` pieces produces, in index order.
    pub fn matches_plan(&self) -> bool {
        match plan_chunks(self.size, self.chunks.len()) {
            Ok(ranges) => ranges.iter().eq(self.chunks.iter().map(|c| &c.range)),
            Err(_) => false,
        }
    }
}

/// Stores job state in a sidecar file derived from the output path.
///
/// Naming is deterministic: the sidecar is `<output>.state.json` and the
/// temporary file of chunk `i` is `<output>.part<i>`.
#[derive(Debug, Clone)]
pub struct StateStore {
    output: PathBuf,
}

impl StateStore {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn sidecar_path(&self) -> PathBuf {
        suffixed(&self.output, ".state.json")
    }

    pub fn part_path(&self, index: usize) -> PathBuf {
        suffixed(&self.output, &format!(".part{}", index))
    }

    /// Loads the sidecar, returning `None` when it is missing, unreadable, or
    /// describes ranges that do not tile its recorded size.
    pub async fn load(&self) -> Option<JobState> {
        let path = self.sidecar_path();
        let json = fs::read_to_string(&path).await.ok()?;

        match serde_json::from_str::<JobState>(&json) {
            Ok(state) if state.matches_plan() => Some(state),
            Ok(state) => {
                warn!(
                    path = %path.display(),
                    size = state.size,
                    chunks = state.chunks.len(),
                    "Ignoring corrupt state file: chunk ranges do not match the size"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt state file");
                None
            }
        }
    }

    /// Saves the state by writing a temporary file and renaming it over the sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Persist`] if the file cannot be written or renamed.
    pub async fn save(&self, state: &JobState) -> Result<(), DownloadError> {
        let path = self.sidecar_path();
        let tmp = suffixed(&path, ".tmp");
        let persist_err = |source| DownloadError::Persist {
            path: path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(state).map_err(|e| persist_err(e.into()))?;
        fs::write(&tmp, json).await.map_err(persist_err)?;
        fs::rename(&tmp, &path).await.map_err(persist_err)?;
        Ok(())
    }

    /// Removes the sidecar. A missing sidecar is not an error.
    pub async fn clear(&self) -> Result<(), DownloadError> {
        match fs::remove_file(self.sidecar_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Length of a chunk's temporary file, 0 if it does not exist.
    pub async fn part_len(&self, index: usize) -> u64 {
        fs::metadata(self.part_path(index))
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Brings the claimed progress of every chunk in line with its temporary file.
    ///
    /// A part file of the full chunk length marks the chunk complete, a shorter
    /// one resumes from its length, and an oversized one is deleted so the
    /// chunk restarts from its first byte.
    pub async fn reconcile(&self, state: &mut JobState) -> Result<(), DownloadError> {
        for chunk in state.chunks.iter_mut() {
            let index = chunk.range.index;
            let expected = chunk.range.length();
            let mut on_disk = self.part_len(index).await;

            if on_disk > expected {
                warn!(
                    chunk = index,
                    on_disk, expected, "Part file is larger than its chunk, restarting it"
                );
                fs::remove_file(self.part_path(index)).await?;
                on_disk = 0;
            }

            if chunk.bytes_written != on_disk {
                debug!(
                    chunk = index,
                    claimed = chunk.bytes_written,
                    on_disk,
                    "State disagrees with part file, trusting the file"
                );
            }

            chunk.bytes_written = on_disk;
            chunk.status = if on_disk == expected {
                ChunkStatus::Complete
            } else {
                ChunkStatus::Pending
            };
        }

        Ok(())
    }

    /// Deletes any temporary files for chunk indices `0..count`.
    pub async fn discard_parts(&self, count: usize) -> Result<(), DownloadError> {
        for index in 0..count {
            match fs::remove_file(self.part_path(index)).await {
                Ok(()) => debug!(chunk = index, "Removed stale part file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn two_chunk_state() -> JobState {
        JobState::new(
            "http://example.com/file.bin",
            21,
            Some("\"abc\"".to_string()),
            vec![
                ChunkRange {
                    index: 0,
                    start: 0,
                    end: 10,
                },
                ChunkRange {
                    index: 1,
                    start: 11,
                    end: 20,
                },
            ],
        )
    }

    #[tokio::test]
    async fn test_save_and_load_state() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("file.bin"));

        let mut state = two_chunk_state();
        state.chunks[0].status = ChunkStatus::Complete;
        state.chunks[0].bytes_written = 11;

        store.save(&state).await?;
        let loaded = store.load().await.expect("state should load");

        assert_eq!(loaded, state);
        assert!(!suffixed(&store.sidecar_path(), ".tmp").exists());

        // Sidecar uses the flat chunk layout
        let json = tokio::fs::read_to_string(store.sidecar_path()).await?;
        assert!(json.contains("\"bytes_written\": 11"));
        assert!(json.contains("\"status\": \"complete\""));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_sidecar_loads_as_none() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("file.bin"));
        tokio::fs::write(store.sidecar_path(), "{ not json").await?;

        assert!(store.load().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn sidecar_with_inconsistent_ranges_loads_as_none() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("file.bin"));

        // Second range runs backwards
        let backwards = JobState::new(
            "http://example.com/file.bin",
            100,
            None,
            vec![
                ChunkRange { index: 0, start: 0, end: 49 },
                ChunkRange { index: 1, start: 60, end: 10 },
            ],
        );
        store.save(&backwards).await?;
        assert!(store.load().await.is_none());

        // Right ranges, wrong order
        let mut shuffled = JobState::new(
            "http://example.com/file.bin",
            100,
            None,
            plan_chunks(100, 2)?,
        );
        shuffled.chunks.swap(0, 1);
        store.save(&shuffled).await?;
        assert!(store.load().await.is_none());

        // Ranges that stop short of the size
        let short = JobState::new("http://example.com/file.bin", 120, None, plan_chunks(100, 2)?);
        store.save(&short).await?;
        assert!(store.load().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn clear_tolerates_missing_sidecar() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("file.bin"));
        store.clear().await?;

        store.save(&two_chunk_state()).await?;
        store.clear().await?;
        assert!(!store.sidecar_path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_trusts_part_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("file.bin"));

        let mut state = two_chunk_state();
        // Claimed complete, but only 4 bytes are on disk
        state.chunks[0].status = ChunkStatus::Complete;
        state.chunks[0].bytes_written = 11;
        tokio::fs::write(store.part_path(0), b"abcd").await?;
        // Claimed nothing, but the whole chunk is on disk
        tokio::fs::write(store.part_path(1), vec![7u8; 10]).await?;

        store.reconcile(&mut state).await?;

        assert_eq!(state.chunks[0].bytes_written, 4);
        assert_eq!(state.chunks[0].status, ChunkStatus::Pending);
        assert_eq!(state.chunks[1].bytes_written, 10);
        assert_eq!(state.chunks[1].status, ChunkStatus::Complete);
        assert_eq!(state.resume_set(), vec![0]);
        assert_eq!(state.bytes_on_disk(), 14);
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_restarts_oversized_parts() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("file.bin"));
        let mut state = two_chunk_state();
        tokio::fs::write(store.part_path(1), vec![1u8; 25]).await?;

        store.reconcile(&mut state).await?;

        assert_eq!(state.chunks[1].bytes_written, 0);
        assert_eq!(state.chunks[1].status, ChunkStatus::Pending);
        assert!(!store.part_path(1).exists());
        Ok(())
    }

    #[test]
    fn paths_are_derived_from_output() {
        let store = StateStore::new("/tmp/movie.mkv");
        assert_eq!(store.sidecar_path(), PathBuf::from("/tmp/movie.mkv.state.json"));
        assert_eq!(store.part_path(3), PathBuf::from("/tmp/movie.mkv.part3"));
    }
}
