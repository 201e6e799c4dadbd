//! Coalescing output writer: the parent process picks the latency/bandwidth
//! tradeoff through `stream_bytes`.

use std::io::Write;

mod tests;

/// Forwards token pieces to `sink`, either flush-through (`coalesce == 0`)
/// or batched until `coalesce` bytes have accumulated. Pieces are never
/// reordered; an explicit `flush` drains everything.
pub struct StreamWriter<W: Write> {
    sink: W,
    pending: Vec<u8>,
    coalesce: usize,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(sink: W, coalesce: usize) -> Self {
        Self {
            sink,
            pending: Vec::with_capacity(coalesce),
            coalesce,
        }
    }

    pub fn write_piece(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.coalesce == 0 {
            self.sink.write_all(bytes)?;
            return self.sink.flush();
        }
        self.pending.extend_from_slice(bytes);
        if self.pending.len() >= self.coalesce {
            return self.flush();
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        if !self.pending.is_empty() {
            self.sink.write_all(&self.pending)?;
            self.pending.clear();
        }
        self.sink.flush()
    }
}
