//! VGM header parsing

use crate::error::{ReplayerError, Result};
use crate::source::{Source, UNKNOWN_SIZE};

// Absolute field offsets in the VGM header, all little-endian.
const OFF_VERSION: u32 = 0x08;
const OFF_SN76489_CLOCK: u32 = 0x0C;
const OFF_TOTAL_SAMPLES: u32 = 0x18;
const OFF_LOOP: u32 = 0x1C;
const OFF_LOOP_SAMPLES: u32 = 0x20;
const OFF_YM2612_CLOCK: u32 = 0x2C;
const OFF_DATA: u32 = 0x34;

/// Default data start for files older than v1.50.
const DEFAULT_DATA_OFFSET: u32 = 0x40;

/// Parsed VGM header fields relevant to Genesis hardware.
///
/// Chip presence is derived from the clock fields: a non-zero clock enables
/// that chip. Offsets stored here are absolute file offsets (the on-disk
/// loop and data offsets are relative to their own field positions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgmHeader {
    /// File version in BCD (0x150 = v1.50).
    pub version: u32,
    /// Total length of the song in samples.
    pub total_samples: u32,
    /// Length of the loop section in samples (0 if no loop).
    pub loop_samples: u32,
    /// Absolute offset of the first command byte.
    pub data_offset: u32,
    /// Absolute loop offset; 0 means the file does not loop.
    pub loop_offset: u32,
    /// File contains YM2612 (FM) data.
    pub has_ym2612: bool,
    /// File contains SN76489 (PSG) data.
    pub has_sn76489: bool,
}

impl VgmHeader {
    /// Parse the header from the start of `source`.
    ///
    /// Fails if the magic is wrong, neither supported chip is present, or
    /// the offsets are out of bounds. The source is left positioned at
    /// `data_offset` with no data-start registered.
    pub fn parse<S: Source + ?Sized>(source: &mut S) -> Result<Self> {
        // Header offsets are absolute; make sure no stale data-start skews
        // the seeks (re-parsing after a previous playback is allowed).
        source.set_data_start(0);
        if !source.seek(0) {
            return Err(ReplayerError::SeekUnsupported(0));
        }

        let magic = Self::read_u32_at(source, 0)?;
        if magic != u32::from_le_bytes(*b"Vgm ") {
            return Err(ReplayerError::BadFormat("invalid VGM magic".into()));
        }

        let version = Self::read_u32_at(source, OFF_VERSION)?;
        let sn_clock = Self::read_u32_at(source, OFF_SN76489_CLOCK)?;
        let total_samples = Self::read_u32_at(source, OFF_TOTAL_SAMPLES)?;
        let loop_offset_rel = Self::read_u32_at(source, OFF_LOOP)?;
        let loop_samples = Self::read_u32_at(source, OFF_LOOP_SAMPLES)?;

        // YM2612 clock field exists from v1.10 on.
        let has_ym2612 = if version >= 0x110 {
            Self::read_u32_at(source, OFF_YM2612_CLOCK)? != 0
        } else {
            false
        };
        let has_sn76489 = sn_clock != 0;

        if !has_ym2612 && !has_sn76489 {
            return Err(ReplayerError::BadFormat(
                "no supported chips in VGM".into(),
            ));
        }

        // Data offset field exists from v1.50 on; earlier files start at 0x40.
        let data_offset = if version >= 0x150 {
            let rel = Self::read_u32_at(source, OFF_DATA)?;
            if rel != 0 {
                OFF_DATA + rel
            } else {
                DEFAULT_DATA_OFFSET
            }
        } else {
            DEFAULT_DATA_OFFSET
        };
        if data_offset < DEFAULT_DATA_OFFSET {
            return Err(ReplayerError::BadFormat(format!(
                "data offset 0x{:X} inside header",
                data_offset
            )));
        }

        let loop_offset = if loop_offset_rel != 0 {
            let absolute = OFF_LOOP + loop_offset_rel;
            if absolute < data_offset {
                return Err(ReplayerError::BadFormat(format!(
                    "loop offset 0x{:X} before data start 0x{:X}",
                    absolute, data_offset
                )));
            }
            if source.size() != UNKNOWN_SIZE && absolute >= source.size() {
                return Err(ReplayerError::BadFormat(format!(
                    "loop offset 0x{:X} past end of file",
                    absolute
                )));
            }
            absolute
        } else {
            0
        };

        if !source.seek(data_offset) {
            return Err(ReplayerError::SeekUnsupported(data_offset));
        }

        Ok(VgmHeader {
            version,
            total_samples,
            loop_samples,
            data_offset,
            loop_offset,
            has_ym2612,
            has_sn76489,
        })
    }

    /// Whether the file declares a loop point.
    pub fn has_loop(&self) -> bool {
        self.loop_offset != 0
    }

    /// Loop offset relative to the data start.
    pub fn loop_offset_in_data(&self) -> u32 {
        self.loop_offset.saturating_sub(self.data_offset)
    }

    fn read_u32_at<S: Source + ?Sized>(source: &mut S, offset: u32) -> Result<u32> {
        if !source.seek(offset) {
            return Err(ReplayerError::BadFormat("truncated VGM header".into()));
        }
        source
            .read_u32_le()
            .ok_or_else(|| ReplayerError::BadFormat("truncated VGM header".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemSource;

    fn minimal_header() -> Vec<u8> {
        let mut h = vec![0u8; 0x42];
        h[0..4].copy_from_slice(b"Vgm ");
        h[0x08..0x0C].copy_from_slice(&0x0150u32.to_le_bytes());
        h[0x0C..0x10].copy_from_slice(&3_579_545u32.to_le_bytes());
        h[0x18..0x1C].copy_from_slice(&735u32.to_le_bytes());
        h[0x34..0x38].copy_from_slice(&0x0Cu32.to_le_bytes());
        h[0x40] = 0x66;
        h
    }

    fn parse(bytes: Vec<u8>) -> Result<VgmHeader> {
        let mut src = MemSource::new(bytes);
        src.open().unwrap();
        VgmHeader::parse(&mut src)
    }

    #[test]
    fn parses_minimal_v150_file() {
        let header = parse(minimal_header()).unwrap();
        assert_eq!(header.version, 0x150);
        assert!(header.has_sn76489);
        assert!(!header.has_ym2612);
        assert_eq!(header.total_samples, 735);
        assert_eq!(header.data_offset, 0x40);
        assert!(!header.has_loop());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_header();
        bytes[0] = b'X';
        assert!(matches!(parse(bytes), Err(ReplayerError::BadFormat(_))));
    }

    #[test]
    fn rejects_chipless_file() {
        let mut bytes = minimal_header();
        bytes[0x0C..0x10].copy_from_slice(&0u32.to_le_bytes());
        assert!(parse(bytes).is_err());
    }

    #[test]
    fn rejects_loop_before_data() {
        let mut bytes = minimal_header();
        // Loop at absolute 0x20, inside the header.
        bytes[0x1C..0x20].copy_from_slice(&4u32.to_le_bytes());
        assert!(parse(bytes).is_err());
    }

    #[test]
    fn rejects_loop_past_end() {
        let mut bytes = minimal_header();
        bytes[0x1C..0x20].copy_from_slice(&0x10000u32.to_le_bytes());
        assert!(parse(bytes).is_err());
    }

    #[test]
    fn accepts_valid_loop() {
        let mut bytes = minimal_header();
        bytes.push(0x66);
        // Loop to absolute 0x41 (= 0x1C + 0x25).
        bytes[0x1C..0x20].copy_from_slice(&0x25u32.to_le_bytes());
        let header = parse(bytes).unwrap();
        assert!(header.has_loop());
        assert_eq!(header.loop_offset, 0x41);
        assert_eq!(header.loop_offset_in_data(), 1);
    }

    #[test]
    fn parsing_twice_yields_identical_state() {
        let mut src = MemSource::new(minimal_header());
        src.open().unwrap();
        let first = VgmHeader::parse(&mut src).unwrap();
        src.set_data_start(first.data_offset);
        let second = VgmHeader::parse(&mut src).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn pre_v150_files_use_default_data_offset() {
        let mut bytes = minimal_header();
        bytes[0x08..0x0C].copy_from_slice(&0x0110u32.to_le_bytes());
        bytes[0x34..0x38].copy_from_slice(&0u32.to_le_bytes());
        let header = parse(bytes).unwrap();
        assert_eq!(header.data_offset, 0x40);
    }
}
