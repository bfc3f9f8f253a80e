//! PCM sample bank with best-effort allocation
//!
//! Holds the PCM pool that DAC commands read from. Memory is obtained
//! opportunistically: the full block size is tried first, then half, then a
//! quarter, downsampling the data on load to fit. Playback compensates by
//! repeating each stored byte, so real-time duration is preserved at reduced
//! fidelity. If no allocation succeeds the bank is disabled and every read
//! yields DAC silence (0x80).

use log::{debug, warn};

use crate::source::Source;

/// DAC center value, returned when no sample data is available.
const SILENCE: u8 = 0x80;

/// Allocator hook for extended (off-chip) memory.
///
/// Returns a zero-filled buffer of exactly the requested length, or `None`
/// if the memory is not present. Buffers are verified with a write/read-back
/// test before use, since extended memory may be absent or faulty on some
/// boards.
pub type ExtMemAlloc = Box<dyn FnMut(usize) -> Option<Vec<u8>>>;

/// Memory policy for the bank.
#[derive(Debug, Default)]
pub struct BankConfig {
    /// Cap the effective free-memory estimate (testing aid).
    pub simulate_max_ram: Option<usize>,
    /// Never use the extended-memory hook even when one is installed.
    pub disable_extended_memory: bool,
}

/// Dynamic PCM sample storage for DAC playback.
pub struct PcmBank {
    data: Vec<u8>,
    allocated: usize,
    original: usize,
    pos: usize,
    ratio: u8,
    read_count: u8,
    using_extmem: bool,
    disabled: bool,
    config: BankConfig,
    extmem: Option<ExtMemAlloc>,
}

impl Default for PcmBank {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmBank {
    /// Create an empty bank with default memory policy.
    pub fn new() -> Self {
        Self::with_config(BankConfig::default())
    }

    /// Create an empty bank with the given memory policy.
    pub fn with_config(config: BankConfig) -> Self {
        PcmBank {
            data: Vec::new(),
            allocated: 0,
            original: 0,
            pos: 0,
            ratio: 1,
            read_count: 0,
            using_extmem: false,
            disabled: false,
            config,
            extmem: None,
        }
    }

    /// Install an extended-memory allocator hook.
    pub fn set_extended_memory(&mut self, alloc: ExtMemAlloc) {
        self.extmem = Some(alloc);
    }

    /// Load a PCM data block of `original_size` bytes from `source`.
    ///
    /// Only the first block establishes the pool; later blocks are drained
    /// from the source and ignored. On allocation pressure the data is
    /// downsampled 2x or 4x; if nothing can be allocated the bank is
    /// disabled and the block is still drained. Returns `true` if data was
    /// stored (possibly downsampled).
    pub fn load_data_block<S: Source + ?Sized>(
        &mut self,
        original_size: u32,
        source: &mut S,
    ) -> bool {
        // Some files carry empty data blocks; nothing to do.
        if original_size == 0 {
            return true;
        }

        if !self.data.is_empty() {
            debug!("skipping additional PCM data block ({} bytes)", original_size);
            source.skip(original_size);
            return true;
        }

        let try_sizes = [
            original_size as usize,
            original_size as usize / 2,
            original_size as usize / 4,
        ];
        let ratios = [1u8, 2, 4];

        for (try_size, ratio) in try_sizes.into_iter().zip(ratios) {
            if try_size == 0 {
                continue;
            }
            let Some((buffer, from_extmem)) = self.try_allocate(try_size) else {
                continue;
            };

            self.data = buffer;
            self.data.clear();
            self.allocated = try_size;
            self.original = original_size as usize;
            self.ratio = ratio;
            self.using_extmem = from_extmem;
            self.disabled = false;

            // Store every ratio-th byte; drain the rest.
            let mut stored = 0usize;
            for i in 0..original_size {
                let Some(b) = source.read() else { break };
                if i % u32::from(ratio) == 0 && stored < self.allocated {
                    self.data.push(b);
                    stored += 1;
                }
            }
            self.pos = 0;
            self.read_count = 0;

            debug!(
                "PCM bank: {} bytes stored ({}x downsample from {}) in {}",
                stored,
                ratio,
                original_size,
                if from_extmem { "extended memory" } else { "heap" }
            );
            return true;
        }

        // Nothing could be allocated. Drain the block so the command stream
        // stays in sync, and silence the DAC for this file.
        self.disabled = true;
        source.skip(original_size);
        warn!(
            "PCM bank: no memory for {} byte DAC block, DAC disabled",
            original_size
        );
        false
    }

    fn try_allocate(&mut self, size: usize) -> Option<(Vec<u8>, bool)> {
        if !self.config.disable_extended_memory {
            if let Some(alloc) = self.extmem.as_mut() {
                if let Some(mut buf) = alloc(size) {
                    if buf.len() == size && Self::verify_buffer(&mut buf) {
                        return Some((buf, true));
                    }
                    debug!("extended memory failed verification, falling back");
                }
            }
        }

        if let Some(limit) = self.config.simulate_max_ram {
            if size > limit {
                return None;
            }
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        Some((buf, false))
    }

    // Write/read-back check on the first and last byte.
    fn verify_buffer(buf: &mut [u8]) -> bool {
        let last = buf.len() - 1;
        buf[0] = 0xAA;
        buf[last] = 0x55;
        buf[0] == 0xAA && buf[last] == 0x55
    }

    /// Drop the pool and reset all state.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.allocated = 0;
        self.original = 0;
        self.pos = 0;
        self.ratio = 1;
        self.read_count = 0;
        self.using_extmem = false;
        self.disabled = false;
    }

    /// Read the byte at the cursor and advance.
    ///
    /// When downsampled, each stored byte is returned `ratio` times so that
    /// the wall-clock duration of the sample stays correct. Returns silence
    /// past the end of data or when the bank is disabled.
    pub fn read_byte(&mut self) -> u8 {
        if self.disabled || self.pos >= self.data.len() {
            return SILENCE;
        }
        let sample = self.data[self.pos];
        self.read_count += 1;
        if self.read_count >= self.ratio {
            self.read_count = 0;
            self.pos += 1;
        }
        sample
    }

    /// Move the cursor to `position` in original (pre-downsampling) space.
    pub fn seek(&mut self, position: u32) {
        let stored_pos = (position / u32::from(self.ratio)) as usize;
        self.pos = stored_pos.min(self.data.len());
        self.read_count = 0;
    }

    /// Random-access read at `position` in original space, without moving
    /// the cursor. Returns silence out of range.
    pub fn byte_at(&self, position: u32) -> u8 {
        if self.disabled {
            return SILENCE;
        }
        let stored_pos = (position / u32::from(self.ratio)) as usize;
        if stored_pos >= self.data.len() {
            return SILENCE;
        }
        self.data[stored_pos]
    }

    /// Current cursor position in original space.
    pub fn position(&self) -> u32 {
        (self.pos as u32) * u32::from(self.ratio)
    }

    /// Whether any sample data is stored.
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// Whether allocation failed and the DAC is silenced.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Bytes actually stored (after downsampling).
    pub fn stored_size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Size the stream declared before downsampling.
    pub fn original_size(&self) -> u32 {
        self.original as u32
    }

    /// Downsample divisor: 1, 2 or 4.
    pub fn downsample_ratio(&self) -> u8 {
        self.ratio
    }

    /// Whether the pool lives in extended memory.
    pub fn is_extended_memory(&self) -> bool {
        self.using_extmem
    }

    pub(crate) fn force_disable(&mut self) {
        self.data = Vec::new();
        self.disabled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemSource;

    fn open_mem(data: Vec<u8>) -> MemSource {
        let mut src = MemSource::new(data);
        src.open().unwrap();
        src
    }

    #[test]
    fn loads_full_block_at_ratio_one() {
        let mut bank = PcmBank::new();
        let mut src = open_mem(vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(bank.load_data_block(4, &mut src));
        assert_eq!(bank.stored_size(), 4);
        assert_eq!(bank.original_size(), 4);
        assert_eq!(bank.downsample_ratio(), 1);
        assert_eq!(bank.read_byte(), 0xAA);
        assert_eq!(bank.read_byte(), 0xBB);
    }

    #[test]
    fn downsamples_under_memory_pressure() {
        let mut bank = PcmBank::with_config(BankConfig {
            simulate_max_ram: Some(2500),
            disable_extended_memory: false,
        });
        let data: Vec<u8> = (0..4000u32).map(|i| (i % 256) as u8).collect();
        let mut src = open_mem(data.clone());
        assert!(bank.load_data_block(4000, &mut src));
        assert_eq!(bank.downsample_ratio(), 2);
        assert_eq!(bank.stored_size(), 2000);

        // Each stored byte comes back twice so timing is preserved.
        for i in 0..64 {
            assert_eq!(bank.read_byte(), data[(i / 2) * 2], "read {}", i);
        }
        // Source is fully drained even though half the bytes were dropped.
        assert!(!src.has_more());
    }

    #[test]
    fn disables_and_drains_when_nothing_fits() {
        let mut bank = PcmBank::with_config(BankConfig {
            simulate_max_ram: Some(100),
            disable_extended_memory: false,
        });
        let mut src = open_mem(vec![1; 4000]);
        assert!(!bank.load_data_block(4000, &mut src));
        assert!(bank.is_disabled());
        assert_eq!(bank.stored_size(), 0);
        assert_eq!(bank.read_byte(), 0x80);
        assert!(!src.has_more());
    }

    #[test]
    fn second_block_is_ignored_but_drained() {
        let mut bank = PcmBank::new();
        let mut src = open_mem(vec![1, 2, 3, 9, 9, 9]);
        assert!(bank.load_data_block(3, &mut src));
        assert!(bank.load_data_block(3, &mut src));
        assert_eq!(bank.stored_size(), 3);
        assert_eq!(bank.read_byte(), 1);
        assert!(!src.has_more());
    }

    #[test]
    fn empty_block_is_ignored() {
        let mut bank = PcmBank::new();
        let mut src = open_mem(vec![]);
        assert!(bank.load_data_block(0, &mut src));
        assert_eq!(bank.stored_size(), 0);
        assert!(!bank.is_disabled());
    }

    #[test]
    fn seek_maps_original_space_through_ratio() {
        let mut bank = PcmBank::with_config(BankConfig {
            simulate_max_ram: Some(2500),
            disable_extended_memory: false,
        });
        let data: Vec<u8> = (0..4000u32).map(|i| (i % 256) as u8).collect();
        let mut src = open_mem(data.clone());
        bank.load_data_block(4000, &mut src);

        bank.seek(100);
        assert_eq!(bank.position(), 100);
        assert_eq!(bank.read_byte(), data[100]);

        // Past-the-end seeks clamp and read silence.
        bank.seek(1_000_000);
        assert_eq!(bank.read_byte(), 0x80);
    }

    #[test]
    fn extended_memory_preferred_and_verified() {
        let mut bank = PcmBank::new();
        bank.set_extended_memory(Box::new(|size| Some(vec![0; size])));
        let mut src = open_mem(vec![5; 64]);
        assert!(bank.load_data_block(64, &mut src));
        assert!(bank.is_extended_memory());
        assert_eq!(bank.read_byte(), 5);
    }

    #[test]
    fn failing_extended_memory_falls_back_to_heap() {
        let mut bank = PcmBank::new();
        bank.set_extended_memory(Box::new(|_| None));
        let mut src = open_mem(vec![7; 16]);
        assert!(bank.load_data_block(16, &mut src));
        assert!(!bank.is_extended_memory());
        assert_eq!(bank.read_byte(), 7);
    }

    #[test]
    fn disabled_extended_memory_is_not_consulted() {
        let mut bank = PcmBank::with_config(BankConfig {
            simulate_max_ram: None,
            disable_extended_memory: true,
        });
        bank.set_extended_memory(Box::new(|_| panic!("extmem must not be used")));
        let mut src = open_mem(vec![3; 8]);
        assert!(bank.load_data_block(8, &mut src));
        assert!(!bank.is_extended_memory());
    }
}
