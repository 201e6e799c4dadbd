//! Startup warmup: models big enough to fault noticeably get their weights
//! pinned and the page cache pre-walked, unless a flag or environment
//! variable says otherwise.

use std::io::Read;
use std::path::Path;

/// Auto threshold: warmup pays off from roughly a gigabyte of weights.
pub const LARGE_MODEL_BYTES: u64 = 1 << 30;

/// Model file size, 0 when the file cannot be inspected (the loader will
/// produce the real diagnostic shortly after).
pub fn model_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read the model file once, start to end, so the subsequent mmap faults hit
/// a warm page cache. Best-effort.
pub fn prefetch(path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::open(path)?;
    let mut sink = vec![0u8; 1 << 20];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut sink)?;
        if n == 0 {
            break;
        }
        total += n as u64;
    }
    tracing::debug!("prefetched {total} bytes of model data");
    Ok(())
}
