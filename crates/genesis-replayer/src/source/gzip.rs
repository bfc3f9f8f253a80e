//! Streaming gzip source with loop-point snapshots
//!
//! Decompresses a gzip file on the fly through a 32 KiB output ring. The
//! ring is used in the wrapping fashion the inflate core expects, so it
//! doubles as the LZ77 sliding window: byte `p` of the decompressed stream
//! lives at `ring[p % RING_SIZE]` for the most recent 32 KiB.
//!
//! The stream is forward-only, with three seekable cases:
//!
//! 1. anywhere within the 32 KiB window still held in the ring,
//! 2. strictly forward, by decompressing and discarding,
//! 3. backward to a pre-declared loop offset, by restoring a snapshot of the
//!    inflate state captured the first time that offset was read.
//!
//! The snapshot is possible because `DecompressorOxide` is a plain value:
//! cloning it, together with a copy of the ring and the compressed-input
//! position, freezes the whole decompression at a byte boundary.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, warn};
use miniz_oxide::inflate::core::inflate_flags::TINFL_FLAG_HAS_MORE_INPUT;
use miniz_oxide::inflate::core::{decompress, DecompressorOxide};
use miniz_oxide::inflate::TINFLStatus;

use super::{Source, UNKNOWN_SIZE};
use crate::error::{ReplayerError, Result};

/// Decompressed output ring; power of two, doubles as the LZ77 window.
const RING_SIZE: usize = 32 * 1024;
/// Compressed input buffer.
const INPUT_SIZE: usize = 4 * 1024;
/// Smallest possible gzip file: 10-byte header + 8-byte trailer.
const MIN_GZIP_SIZE: u64 = 18;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

/// Everything needed to resume decompression at the loop point.
struct LoopSnapshot {
    /// File offset of the first unconsumed compressed byte.
    compressed_pos: u64,
    /// Decompressed bytes produced at capture time.
    total_out: u64,
    /// Decompressed bytes consumed at capture time (the loop position).
    read_pos: u64,
    /// Inflate control block, frozen by value.
    decomp: Box<DecompressorOxide>,
    /// Ring contents: window plus the unread output tail.
    ring: Box<[u8]>,
    stream_done: bool,
}

/// Forward-only source over a gzip-compressed stream.
pub struct GzipStreamSource<R: Read + Seek> {
    reader: Option<R>,
    decomp: Box<DecompressorOxide>,
    ring: Box<[u8]>,
    input: Box<[u8]>,
    in_pos: usize,
    in_len: usize,
    /// File offset just past the last byte currently in `input`.
    in_file_pos: u64,
    /// Total decompressed bytes produced (write cursor).
    total_out: u64,
    /// Total decompressed bytes consumed (read cursor).
    read_pos: u64,
    stream_done: bool,
    failed: bool,
    open: bool,
    data_start: u32,
    loop_offset: Option<u32>,
    snapshot: Option<LoopSnapshot>,
}

impl GzipStreamSource<File> {
    /// Create a source reading from the file at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read + Seek> GzipStreamSource<R> {
    /// Create a source over any seekable reader of gzip data.
    pub fn new(reader: R) -> Self {
        GzipStreamSource {
            reader: Some(reader),
            decomp: Box::new(DecompressorOxide::new()),
            ring: vec![0u8; RING_SIZE].into_boxed_slice(),
            input: vec![0u8; INPUT_SIZE].into_boxed_slice(),
            in_pos: 0,
            in_len: 0,
            in_file_pos: 0,
            total_out: 0,
            read_pos: 0,
            stream_done: false,
            failed: false,
            open: false,
            data_start: 0,
            loop_offset: None,
            snapshot: None,
        }
    }

    /// Whether the loop snapshot has been captured yet.
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    fn parse_gzip_header(reader: &mut R) -> Result<()> {
        let mut fixed = [0u8; 10];
        reader.read_exact(&mut fixed)?;
        if fixed[0] != 0x1f || fixed[1] != 0x8b {
            return Err(ReplayerError::BadFormat("not a gzip stream".into()));
        }
        if fixed[2] != 8 {
            return Err(ReplayerError::BadFormat(format!(
                "unsupported gzip compression method {}",
                fixed[2]
            )));
        }
        let flags = fixed[3];
        if flags & FEXTRA != 0 {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            reader.seek(SeekFrom::Current(i64::from(u16::from_le_bytes(len))))?;
        }
        if flags & FNAME != 0 {
            Self::skip_zero_terminated(reader)?;
        }
        if flags & FCOMMENT != 0 {
            Self::skip_zero_terminated(reader)?;
        }
        if flags & FHCRC != 0 {
            reader.seek(SeekFrom::Current(2))?;
        }
        Ok(())
    }

    fn skip_zero_terminated(reader: &mut R) -> Result<()> {
        let mut byte = [0u8; 1];
        loop {
            reader.read_exact(&mut byte)?;
            if byte[0] == 0 {
                return Ok(());
            }
        }
    }

    // Pull the next batch of compressed bytes. Returns false at end of file.
    fn refill_input(&mut self) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };
        match reader.read(&mut self.input) {
            Ok(0) | Err(_) => false,
            Ok(n) => {
                self.in_pos = 0;
                self.in_len = n;
                self.in_file_pos += n as u64;
                true
            }
        }
    }

    // Decompress more data into the ring. Only called when the read cursor
    // has fully drained the produced output, so nothing unread is ever
    // overwritten. Returns false when no further bytes can be produced.
    fn pump(&mut self) -> bool {
        if self.stream_done || self.failed || !self.open {
            return false;
        }
        loop {
            if self.in_pos == self.in_len && !self.refill_input() {
                warn!("gzip stream truncated at {} bytes out", self.total_out);
                self.failed = true;
                return false;
            }
            let out_start = (self.total_out % RING_SIZE as u64) as usize;
            let (status, in_read, out_written) = decompress(
                &mut self.decomp,
                &self.input[self.in_pos..self.in_len],
                &mut self.ring,
                out_start,
                TINFL_FLAG_HAS_MORE_INPUT,
            );
            self.in_pos += in_read;
            self.total_out += out_written as u64;
            match status {
                TINFLStatus::Done => {
                    self.stream_done = true;
                    return out_written > 0;
                }
                TINFLStatus::HasMoreOutput => return true,
                TINFLStatus::NeedsMoreInput => {
                    if out_written > 0 {
                        return true;
                    }
                }
                _ => {
                    warn!("inflate error {:?} at {} bytes out", status, self.total_out);
                    self.failed = true;
                    return false;
                }
            }
        }
    }

    // Make sure at least one unread byte is available in the ring.
    fn ensure_available(&mut self) -> bool {
        while self.read_pos >= self.total_out {
            if !self.pump() {
                return false;
            }
        }
        true
    }

    fn loop_position(&self) -> Option<u64> {
        let off = self.loop_offset?;
        if off == 0 {
            return None;
        }
        Some(u64::from(self.data_start) + u64::from(off))
    }

    // Capture the loop snapshot if the read cursor is about to consume the
    // byte at the declared loop offset.
    fn maybe_capture(&mut self) {
        if self.snapshot.is_some() {
            return;
        }
        let Some(target) = self.loop_position() else {
            return;
        };
        if self.read_pos != target {
            return;
        }
        self.snapshot = Some(LoopSnapshot {
            compressed_pos: self.in_file_pos - (self.in_len - self.in_pos) as u64,
            total_out: self.total_out,
            read_pos: self.read_pos,
            decomp: self.decomp.clone(),
            ring: self.ring.clone(),
            stream_done: self.stream_done,
        });
        debug!("captured loop snapshot at decompressed offset {}", target);
    }

    fn restore_snapshot(&mut self) -> bool {
        let Some(snap) = self.snapshot.as_ref() else {
            return false;
        };
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };
        if reader.seek(SeekFrom::Start(snap.compressed_pos)).is_err() {
            return false;
        }
        self.in_pos = 0;
        self.in_len = 0;
        self.in_file_pos = snap.compressed_pos;
        self.decomp = snap.decomp.clone();
        self.ring.copy_from_slice(&snap.ring);
        self.total_out = snap.total_out;
        self.read_pos = snap.read_pos;
        self.stream_done = snap.stream_done;
        self.failed = false;
        debug!("restored loop snapshot at decompressed offset {}", snap.read_pos);
        true
    }
}

impl<R: Read + Seek> Source for GzipStreamSource<R> {
    fn open(&mut self) -> Result<()> {
        let reader = self.reader.as_mut().ok_or("source already closed")?;
        let len = reader.seek(SeekFrom::End(0))?;
        if len < MIN_GZIP_SIZE {
            return Err(ReplayerError::BadFormat(format!(
                "gzip file too small: {} bytes",
                len
            )));
        }
        reader.seek(SeekFrom::Start(0))?;
        Self::parse_gzip_header(reader)?;
        self.in_file_pos = reader.stream_position()?;
        self.in_pos = 0;
        self.in_len = 0;
        self.total_out = 0;
        self.read_pos = 0;
        self.stream_done = false;
        self.failed = false;
        self.data_start = 0;
        self.snapshot = None;
        self.decomp = Box::new(DecompressorOxide::new());
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
        self.snapshot = None;
        self.open = false;
        self.in_pos = 0;
        self.in_len = 0;
        self.total_out = 0;
        self.read_pos = 0;
        self.loop_offset = None;
        self.data_start = 0;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self) -> Option<u8> {
        if !self.open || !self.ensure_available() {
            return None;
        }
        self.maybe_capture();
        let b = self.ring[(self.read_pos % RING_SIZE as u64) as usize];
        self.read_pos += 1;
        Some(b)
    }

    fn peek(&mut self) -> Option<u8> {
        if !self.open || !self.ensure_available() {
            return None;
        }
        Some(self.ring[(self.read_pos % RING_SIZE as u64) as usize])
    }

    fn has_more(&mut self) -> bool {
        self.open && self.ensure_available()
    }

    fn seek(&mut self, pos: u32) -> bool {
        if !self.open {
            return false;
        }
        let Some(absolute) = self.data_start.checked_add(pos) else {
            return false;
        };
        let target = u64::from(absolute);

        // Within the window still buffered in the ring.
        let window = self.total_out.min(RING_SIZE as u64);
        if target <= self.total_out && self.total_out - target <= window {
            self.read_pos = target;
            return true;
        }

        // Strictly forward: decompress and discard. Going through `read`
        // keeps the loop-snapshot capture on this path too.
        if target > self.read_pos {
            while self.read_pos < target {
                if self.read().is_none() {
                    return false;
                }
            }
            return true;
        }

        // Backward to the declared loop offset via the snapshot.
        if Some(target) == self.loop_position() && self.snapshot.is_some() {
            return self.restore_snapshot();
        }

        warn!(
            "cannot seek backward to {} in compressed stream (at {})",
            target, self.read_pos
        );
        false
    }

    fn position(&self) -> u32 {
        self.read_pos as u32
    }

    fn size(&self) -> u32 {
        UNKNOWN_SIZE
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn set_data_start(&mut self, offset: u32) {
        self.data_start = offset;
    }

    fn declare_loop_offset(&mut self, offset_in_data: u32) {
        self.loop_offset = Some(offset_in_data);
    }
}
