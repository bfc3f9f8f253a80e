//! File-backed byte source

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;

use super::Source;
use crate::error::Result;

const BLOCK_SIZE: usize = 512;

/// Random-access source over a block-addressable file.
///
/// Reads go through a small block buffer so the byte-at-a-time access
/// pattern of the interpreters does not translate into one syscall per byte.
pub struct FileSource {
    path: PathBuf,
    file: Option<File>,
    file_size: u32,
    pos: u32,
    block: [u8; BLOCK_SIZE],
    block_start: u32,
    block_len: usize,
    data_start: u32,
}

impl FileSource {
    /// Create a source for the file at `path`. The file is opened by
    /// [`Source::open`].
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileSource {
            path: path.as_ref().to_path_buf(),
            file: None,
            file_size: 0,
            pos: 0,
            block: [0; BLOCK_SIZE],
            block_start: 0,
            block_len: 0,
            data_start: 0,
        }
    }

    /// File name portion of the path, for display.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    // Load the block containing `pos`. Returns false at end of file or on
    // IO error.
    fn fill_block(&mut self, pos: u32) -> bool {
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        if pos >= self.file_size {
            return false;
        }
        let block_start = pos - (pos % BLOCK_SIZE as u32);
        if file.seek(SeekFrom::Start(u64::from(block_start))).is_err() {
            return false;
        }
        match file.read(&mut self.block) {
            Ok(n) if n > 0 => {
                self.block_start = block_start;
                self.block_len = n;
                true
            }
            _ => false,
        }
    }

    fn byte_at(&mut self, pos: u32) -> Option<u8> {
        if self.file.is_none() || pos >= self.file_size {
            return None;
        }
        let in_block = self.block_len > 0
            && pos >= self.block_start
            && pos < self.block_start + self.block_len as u32;
        if !in_block && !self.fill_block(pos) {
            return None;
        }
        Some(self.block[(pos - self.block_start) as usize])
    }
}

impl Source for FileSource {
    fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len > u64::from(u32::MAX - 1) {
            return Err(format!("file too large: {} bytes", len).into());
        }
        self.file_size = len as u32;
        self.file = Some(file);
        self.pos = 0;
        self.block_len = 0;
        debug!("opened {:?} ({} bytes)", self.path, self.file_size);
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
        self.pos = 0;
        self.block_len = 0;
        self.data_start = 0;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn read(&mut self) -> Option<u8> {
        let b = self.byte_at(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn peek(&mut self) -> Option<u8> {
        self.byte_at(self.pos)
    }

    fn has_more(&mut self) -> bool {
        self.file.is_some() && self.pos < self.file_size
    }

    fn seek(&mut self, pos: u32) -> bool {
        let Some(absolute) = self.data_start.checked_add(pos) else {
            return false;
        };
        if absolute > self.file_size {
            return false;
        }
        self.pos = absolute;
        true
    }

    fn position(&self) -> u32 {
        self.pos
    }

    fn size(&self) -> u32 {
        self.file_size
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
    use std::io::Write;

    fn temp_file(bytes: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "genesis-replayer-filesource-{}-{}.bin",
            std::process::id(),
            bytes.len()
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn reads_across_block_boundary() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1300).collect();
        let path = temp_file(&data);
        let mut src = FileSource::new(&path);
        src.open().unwrap();
        assert_eq!(src.size(), 1300);
        let mut out = Vec::new();
        while let Some(b) = src.read() {
            out.push(b);
        }
        assert_eq!(out, data);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn seek_backwards_and_reread() {
        let data: Vec<u8> = (0..100u8).collect();
        let path = temp_file(&data);
        let mut src = FileSource::new(&path);
        src.open().unwrap();
        src.skip(60);
        assert!(src.seek(10));
        assert_eq!(src.read(), Some(10));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_fails_open() {
        let mut src = FileSource::new("/nonexistent/genesis-replayer-test.vgm");
        assert!(src.open().is_err());
        assert!(!src.is_open());
    }
}
