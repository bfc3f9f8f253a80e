//! 4-bit differential PCM decoder
//!
//! The GEP PCM pool may be DPCM-compressed: the first byte is the initial
//! 8-bit sample, and every following byte packs two 4-bit indices into a
//! fixed delta table (high nibble first). Each index steps the running
//! sample, clamped to the 8-bit range.

use crate::pcm_bank::PcmBank;

/// Delta step table. Must match the encoder's table exactly.
const DPCM_STEPS: [i8; 16] = [
    -34, -21, -13, -8, -5, -3, -1, 0, 1, 3, 5, 8, 13, 21, 34, 55,
];

/// Streaming DPCM decoder over a [`PcmBank`] pool.
///
/// The decoder itself only holds the running sample value; the caller
/// tracks the output-sample cursor and passes it to
/// [`decode_next`](DpcmDecoder::decode_next). Seeking is decode-forward:
/// reset to the pool's seed byte and decode up to the target.
#[derive(Debug, Clone, Copy)]
pub struct DpcmDecoder {
    current: u8,
}

impl Default for DpcmDecoder {
    fn default() -> Self {
        DpcmDecoder { current: 0x80 }
    }
}

impl DpcmDecoder {
    /// Reset to the initial sample (byte 0 of the pool).
    pub fn reset(&mut self, seed: u8) {
        self.current = seed;
    }

    /// The current running sample value.
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Decode output sample `index` (0-based, counted from the seed byte)
    /// and return it. Must be called with consecutive indices; use
    /// [`reset`](DpcmDecoder::reset) before starting over.
    pub fn decode_next(&mut self, pool: &PcmBank, index: u32) -> u8 {
        // Nibbles are packed two per byte after the seed byte, high first.
        let byte_index = 1 + index / 2;
        let packed = pool.byte_at(byte_index);
        let step_index = if index % 2 == 0 {
            packed >> 4
        } else {
            packed & 0x0F
        };
        let stepped = i16::from(self.current) + i16::from(DPCM_STEPS[step_index as usize]);
        self.current = stepped.clamp(0, 255) as u8;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemSource, Source};

    fn pool_from(bytes: Vec<u8>) -> PcmBank {
        let mut bank = PcmBank::new();
        let mut src = MemSource::new(bytes.clone());
        src.open().unwrap();
        bank.load_data_block(bytes.len() as u32, &mut src);
        bank
    }

    fn decode_all(pool: &PcmBank, seed: u8, count: u32) -> Vec<u8> {
        let mut dec = DpcmDecoder::default();
        dec.reset(seed);
        (0..count).map(|i| dec.decode_next(pool, i)).collect()
    }

    #[test]
    fn steps_follow_the_table() {
        // Seed 0x80, nibbles: 8 (+1), F (+55), 0 (-34), 7 (0).
        let pool = pool_from(vec![0x80, 0x8F, 0x07]);
        let out = decode_all(&pool, 0x80, 4);
        assert_eq!(out, vec![0x81, 0x81 + 55, 0x81 + 55 - 34, 0x81 + 55 - 34]);
    }

    #[test]
    fn output_clamps_to_byte_range() {
        // Repeatedly step up by 55 from 0xF0: must stick at 255.
        let pool = pool_from(vec![0xF0, 0xFF, 0xFF]);
        let out = decode_all(&pool, 0xF0, 4);
        assert_eq!(out, vec![255, 255, 255, 255]);

        // And down by -34 from 0x10: must stick at 0.
        let pool = pool_from(vec![0x10, 0x00, 0x00]);
        let out = decode_all(&pool, 0x10, 4);
        assert_eq!(out, vec![0, 0, 0, 0]);
    }

    #[test]
    fn seek_by_redecode_matches_straight_decode() {
        let bytes: Vec<u8> = std::iter::once(0x80)
            .chain((0..64u32).map(|i| ((i * 37) % 256) as u8))
            .collect();
        let pool = pool_from(bytes);
        let reference = decode_all(&pool, 0x80, 128);

        for k in [0u32, 1, 7, 63, 127] {
            let mut dec = DpcmDecoder::default();
            dec.reset(pool.byte_at(0));
            let mut last = 0;
            for i in 0..=k {
                last = dec.decode_next(&pool, i);
            }
            assert_eq!(last, reference[k as usize], "sample {}", k);
        }
    }
}
