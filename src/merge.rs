//! Reassembling chunk temporaries into the output file.
use crate::error::DownloadError;
use crate::state::{JobState, StateStore};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

const MERGE_BUFFER: usize = 1024 * 1024;

/// Concatenates every part file in index order into the output path.
///
/// Temporaries and the state sidecar are removed only after the output has
/// been flushed and synced. If anything fails the partial output is deleted
/// and the parts are left in place, so the merge can simply be run again.
///
/// Returns the number of bytes written.
pub async fn merge_parts(state: &JobState, store: &StateStore) -> Result<u64, DownloadError> {
    let output = store.output_path();

    let written = match concat_parts(state, store, output).await {
        Ok(n) => n,
        Err(reason) => {
            if let Err(e) = fs::remove_file(output).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %output.display(), error = %e, "Could not remove partial output");
            }
            return Err(DownloadError::Merge {
                path: output.to_path_buf(),
                reason,
            });
        }
    };

    for chunk in &state.chunks {
        let part = store.part_path(chunk.range.index);
        if let Err(e) = fs::remove_file(&part).await {
            warn!(path = %part.display(), error = %e, "Could not remove part file");
        }
    }
    if let Err(e) = store.clear().await {
        warn!(error = %e, "Could not remove state file");
    }

    info!(path = %output.display(), bytes = written, "Merged {} parts", state.chunks.len());
    Ok(written)
}

async fn concat_parts(state: &JobState, store: &StateStore, output: &Path) -> Result<u64, String> {
    // Check every part before touching the output
    for chunk in &state.chunks {
        let index = chunk.range.index;
        let expected = chunk.range.length();
        let actual = store.part_len(index).await;
        if actual != expected {
            return Err(format!(
                "part {} has {} bytes, expected {}",
                index, actual, expected
            ));
        }
    }

    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }

    let file = File::create(output)
        .await
        .map_err(|e| format!("cannot create output: {}", e))?;
    let mut writer = BufWriter::with_capacity(MERGE_BUFFER, file);
    let mut buffer = vec![0u8; MERGE_BUFFER];
    let mut total = 0u64;

    for chunk in &state.chunks {
        let part = store.part_path(chunk.range.index);
        let mut reader = File::open(&part)
            .await
            .map_err(|e| format!("cannot open {}: {}", part.display(), e))?;

        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| format!("cannot read {}: {}", part.display(), e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .await
                .map_err(|e| format!("write failed: {}", e))?;
            total += n as u64;
        }
        debug!(chunk = chunk.range.index, "Appended part");
    }

    writer
        .flush()
        .await
        .map_err(|e| format!("flush failed: {}", e))?;
    writer
        .get_mut()
        .sync_all()
        .await
        .map_err(|e| format!("sync failed: {}", e))?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_chunks;
    use tempfile::tempdir;

    async fn write_parts(store: &StateStore, data: &[u8], state: &JobState) {
        for c in &state.chunks {
            let slice = &data[c.range.start as usize..=c.range.end as usize];
            fs::write(store.part_path(c.range.index), slice)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn merge_reproduces_downloaded_bytes() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/out.bin"));
        fs::create_dir_all(dir.path().join("nested")).await.unwrap();

        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let state = JobState::new("http://x/out.bin", 2500, None, plan_chunks(2500, 7).unwrap());
        write_parts(&store, &data, &state).await;
        store.save(&state).await.unwrap();

        let written = merge_parts(&state, &store).await.unwrap();

        assert_eq!(written, 2500);
        assert_eq!(fs::read(store.output_path()).await.unwrap(), data);
        for i in 0..7 {
            assert!(!store.part_path(i).exists());
        }
        assert!(!store.sidecar_path().exists());
    }

    #[tokio::test]
    async fn merge_failure_keeps_parts_and_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("out.bin"));

        let data = vec![9u8; 100];
        let state = JobState::new("http://x/out.bin", 100, None, plan_chunks(100, 4).unwrap());
        write_parts(&store, &data, &state).await;
        store.save(&state).await.unwrap();
        // Part 2 is short
        fs::write(store.part_path(2), &data[..10]).await.unwrap();

        let err = merge_parts(&state, &store).await.unwrap_err();

        assert!(matches!(err, DownloadError::Merge { .. }));
        assert!(err.to_string().contains("part 2"));
        assert!(!store.output_path().exists());
        assert!(store.part_path(0).exists());
        assert!(store.sidecar_path().exists());
    }
}
