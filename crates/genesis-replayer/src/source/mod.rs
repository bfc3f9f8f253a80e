//! Byte sources for command streams
//!
//! A [`Source`] is a byte-oriented, possibly seekable stream of VGM/GEP
//! command data. Four implementations are provided:
//!
//! - [`MemSource`]: an immutable in-memory blob
//! - [`ChunkedSource`]: an ordered sequence of bounded chunks stitched into
//!   one logical stream
//! - [`FileSource`]: a block-buffered random-access file
//! - [`GzipStreamSource`]: forward-only streaming inflate over a gzip file,
//!   with one supported backward seek (to a pre-declared loop offset)
//!
//! Positions are `u32` byte offsets. A source that cannot know its length
//! (streaming decompression) reports [`UNKNOWN_SIZE`].

mod chunked;
mod file;
mod gzip;
mod mem;

pub use chunked::ChunkedSource;
pub use file::FileSource;
pub use gzip::GzipStreamSource;
pub use mem::MemSource;

use crate::error::Result;

/// Sentinel size for sources whose total length is unknown.
pub const UNKNOWN_SIZE: u32 = 0xFFFF_FFFF;

/// A byte-oriented stream of command data.
///
/// After header parsing, callers may register a data-start offset via
/// [`set_data_start`](Source::set_data_start); from then on, `seek(x)` is
/// treated as `seek(data_start + x)`. This matches the loop-offset
/// convention of the stream formats, whose loop points are relative to the
/// start of command data.
pub trait Source {
    /// Prepare the source for reading. Position is reset to the beginning.
    fn open(&mut self) -> Result<()>;

    /// Release any held resources. Reads after `close` return `None`.
    fn close(&mut self);

    /// Whether the source has been opened and not yet closed.
    fn is_open(&self) -> bool;

    /// Read one byte, advancing the position. `None` at end of stream.
    fn read(&mut self) -> Option<u8>;

    /// Read up to `buf.len()` bytes. Returns the number of bytes read.
    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.read() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Look at the next byte without consuming it.
    fn peek(&mut self) -> Option<u8>;

    /// Whether at least one more byte can be read.
    fn has_more(&mut self) -> bool;

    /// Seek to `pos` (relative to the registered data start, if any).
    /// Returns `false` if the position cannot be reached.
    fn seek(&mut self, pos: u32) -> bool;

    /// Current absolute position in the stream.
    fn position(&self) -> u32;

    /// Total size in bytes, or [`UNKNOWN_SIZE`] for streaming sources.
    fn size(&self) -> u32;

    /// Whether this source supports seeking at all. Note that a `true`
    /// answer does not guarantee every `seek` succeeds (see
    /// [`GzipStreamSource`]).
    fn can_seek(&self) -> bool;

    /// Register the data-start offset; subsequent seeks are relative to it.
    /// Pass 0 to restore absolute seeking.
    fn set_data_start(&mut self, offset: u32);

    /// Declare the loop target (relative to data start) ahead of time.
    ///
    /// Random-access sources ignore this; [`GzipStreamSource`] uses it to
    /// know where to capture its inflate-state snapshot.
    fn declare_loop_offset(&mut self, _offset_in_data: u32) {}

    /// Read a little-endian 16-bit value.
    fn read_u16_le(&mut self) -> Option<u16> {
        let lo = self.read()?;
        let hi = self.read()?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    /// Read a little-endian 32-bit value.
    fn read_u32_le(&mut self) -> Option<u32> {
        let b0 = self.read()?;
        let b1 = self.read()?;
        let b2 = self.read()?;
        let b3 = self.read()?;
        Some(u32::from_le_bytes([b0, b1, b2, b3]))
    }

    /// Skip `count` bytes (stopping early at end of stream).
    fn skip(&mut self, count: u32) {
        for _ in 0..count {
            if self.read().is_none() {
                break;
            }
        }
    }
}
