//! Splitting a resource into byte ranges.
use crate::error::DownloadError;
use crate::state::ChunkRange;

/// Divides `total_size` bytes into `num_chunks` contiguous ranges.
///
/// The first `total_size % num_chunks` chunks receive one extra byte, so no two
/// chunks differ in length by more than one byte. The result depends only on
/// the two arguments, which is what lets a restarted job find its old chunks.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidPlan`] when `num_chunks` is zero or larger
/// than `total_size`, since that would produce empty chunks.
pub fn plan_chunks(total_size: u64, num_chunks: usize) -> Result<Vec<ChunkRange>, DownloadError> {
    let n = num_chunks as u64;
    if n == 0 || total_size < n {
        return Err(DownloadError::InvalidPlan {
            size: total_size,
            chunks: num_chunks,
        });
    }

    let base = total_size / n;
    let remainder = total_size % n;

    let mut chunks = Vec::with_capacity(num_chunks);
    let mut start = 0;

    for i in 0..n {
        let length = if i < remainder { base + 1 } else { base };
        let end = start + length - 1;

        chunks.push(ChunkRange {
            index: i as usize,
            start,
            end,
        });
        start = end + 1;
    }

    Ok(chunks)
}
