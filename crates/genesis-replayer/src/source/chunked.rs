//! Chunked byte source
//!
//! Stitches an ordered sequence of bounded chunks into one logical stream.
//! The chunk count is small (at most 255), so seeks locate the target chunk
//! with a linear scan.

use super::Source;
use crate::error::Result;

/// Random-access source over a sequence of byte chunks.
#[derive(Debug, Default)]
pub struct ChunkedSource {
    chunks: Vec<Vec<u8>>,
    total_len: u32,
    pos: u32,
    current_chunk: usize,
    pos_in_chunk: usize,
    data_start: u32,
    open: bool,
}

impl ChunkedSource {
    /// Create a source over `chunks`, preserving their order.
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        let total_len = chunks.iter().map(|c| c.len() as u32).sum();
        ChunkedSource {
            chunks,
            total_len,
            pos: 0,
            current_chunk: 0,
            pos_in_chunk: 0,
            data_start: 0,
            open: false,
        }
    }

    /// Number of chunks in this source.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Absolute offset of the first byte of chunk `index`, or `None` if the
    /// index is out of range. Used to resolve `(chunk, offset)` loop targets.
    pub fn chunk_offset(&self, index: usize) -> Option<u32> {
        if index >= self.chunks.len() {
            return None;
        }
        Some(
            self.chunks[..index]
                .iter()
                .map(|c| c.len() as u32)
                .sum(),
        )
    }

    // Step past exhausted chunks so `read` always sees a valid cursor.
    fn normalize_cursor(&mut self) {
        while self.current_chunk < self.chunks.len()
            && self.pos_in_chunk >= self.chunks[self.current_chunk].len()
        {
            self.current_chunk += 1;
            self.pos_in_chunk = 0;
        }
    }
}

impl Source for ChunkedSource {
    fn open(&mut self) -> Result<()> {
        if self.chunks.is_empty() {
            return Err("no chunks".into());
        }
        self.pos = 0;
        self.current_chunk = 0;
        self.pos_in_chunk = 0;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.pos = 0;
        self.current_chunk = 0;
        self.pos_in_chunk = 0;
        self.data_start = 0;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self) -> Option<u8> {
        if !self.open || self.pos >= self.total_len {
            return None;
        }
        self.normalize_cursor();
        let b = self.chunks[self.current_chunk][self.pos_in_chunk];
        self.pos += 1;
        self.pos_in_chunk += 1;
        Some(b)
    }

    fn peek(&mut self) -> Option<u8> {
        if !self.open || self.pos >= self.total_len {
            return None;
        }
        self.normalize_cursor();
        Some(self.chunks[self.current_chunk][self.pos_in_chunk])
    }

    fn has_more(&mut self) -> bool {
        self.open && self.pos < self.total_len
    }

    fn seek(&mut self, pos: u32) -> bool {
        let Some(absolute) = self.data_start.checked_add(pos) else {
            return false;
        };
        if absolute > self.total_len {
            return false;
        }

        // Linear scan for the chunk containing the target position.
        let mut offset = 0u32;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let len = chunk.len() as u32;
            if absolute < offset + len {
                self.current_chunk = i;
                self.pos_in_chunk = (absolute - offset) as usize;
                self.pos = absolute;
                return true;
            }
            offset += len;
        }

        // Position is exactly at the end of the stream.
        self.current_chunk = self.chunks.len().saturating_sub(1);
        self.pos_in_chunk = self.chunks.last().map_or(0, |c| c.len());
        self.pos = absolute;
        true
    }

    fn position(&self) -> u32 {
        self.pos
    }

    fn size(&self) -> u32 {
        self.total_len
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn set_data_start(&mut self, offset: u32) {
        self.data_start = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_chunks() -> ChunkedSource {
        ChunkedSource::new(vec![vec![1, 2, 3], vec![4, 5], vec![6, 7, 8, 9]])
    }

    #[test]
    fn reads_across_chunk_boundaries() {
        let mut src = three_chunks();
        src.open().unwrap();
        let mut out = Vec::new();
        while let Some(b) = src.read() {
            out.push(b);
        }
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn seek_lands_in_correct_chunk() {
        let mut src = three_chunks();
        src.open().unwrap();
        assert!(src.seek(4));
        assert_eq!(src.read(), Some(5));
        assert_eq!(src.read(), Some(6));
        assert!(src.seek(0));
        assert_eq!(src.read(), Some(1));
    }

    #[test]
    fn seek_to_total_length_succeeds_at_end() {
        let mut src = three_chunks();
        src.open().unwrap();
        assert!(src.seek(9));
        assert_eq!(src.position(), 9);
        assert_eq!(src.read(), None);
        assert!(!src.seek(10));
    }

    #[test]
    fn chunk_offsets() {
        let src = three_chunks();
        assert_eq!(src.chunk_offset(0), Some(0));
        assert_eq!(src.chunk_offset(1), Some(3));
        assert_eq!(src.chunk_offset(2), Some(5));
        assert_eq!(src.chunk_offset(3), None);
    }

    #[test]
    fn empty_chunks_are_skipped() {
        let mut src = ChunkedSource::new(vec![vec![], vec![1], vec![], vec![2]]);
        src.open().unwrap();
        assert_eq!(src.read(), Some(1));
        assert_eq!(src.read(), Some(2));
        assert_eq!(src.read(), None);
    }
}
