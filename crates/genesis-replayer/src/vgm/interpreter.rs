//! VGM command dispatch

use log::{debug, warn};

use super::VgmHeader;
use crate::bus::ChipBus;
use crate::error::Result;
use crate::pcm_bank::{BankConfig, PcmBank};
use crate::source::Source;

/// Observer for writes to chips this hardware does not carry
/// (YM2413/YM2151/YM2203). Receives `(command, register, value)`.
pub type UnsupportedChipCallback = Box<dyn FnMut(u8, u8, u8)>;

const CMD_GG_STEREO: u8 = 0x4F;
const CMD_PSG: u8 = 0x50;
const CMD_YM2413: u8 = 0x51;
const CMD_YM2612_P0: u8 = 0x52;
const CMD_YM2612_P1: u8 = 0x53;
const CMD_YM2151: u8 = 0x54;
const CMD_YM2203: u8 = 0x55;
const CMD_WAIT: u8 = 0x61;
const CMD_WAIT_NTSC: u8 = 0x62;
const CMD_WAIT_PAL: u8 = 0x63;
const CMD_END: u8 = 0x66;
const CMD_DATA_BLOCK: u8 = 0x67;
const CMD_PCM_SEEK: u8 = 0xE0;

const WAIT_NTSC_FRAME: u32 = 735;
const WAIT_PAL_FRAME: u32 = 882;

/// Data block type for YM2612 PCM.
const DATA_TYPE_YM2612_PCM: u8 = 0x00;

/// Operand byte counts for commands handled generically, per the VGM
/// specification. Indexed by command byte; zero means nothing to skip.
const SKIP_TABLE: [u8; 256] = build_skip_table();

const fn build_skip_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0x30;
    while i <= 0x3F {
        table[i] = 1;
        i += 1;
    }
    let mut i = 0x40;
    while i <= 0x4E {
        table[i] = 2;
        i += 1;
    }
    table[0x4F] = 1;
    let mut i = 0x51;
    while i <= 0x5F {
        table[i] = 2;
        i += 1;
    }
    table[0x90] = 4;
    table[0x91] = 4;
    table[0x92] = 5;
    table[0x93] = 10;
    table[0x94] = 1;
    table[0x95] = 4;
    let mut i = 0xA0;
    while i <= 0xBF {
        table[i] = 2;
        i += 1;
    }
    let mut i = 0xC0;
    while i <= 0xDF {
        table[i] = 3;
        i += 1;
    }
    let mut i = 0xE1;
    while i <= 0xFF {
        table[i] = 4;
        i += 1;
    }
    table
}

/// Outcome of a single command dispatch.
enum Step {
    /// Keep processing; `Wait(0)` also continues.
    Wait(u32),
    Continue,
    End,
}

/// Byte-level VGM opcode interpreter.
///
/// Owns the PCM data bank; reads commands from a [`Source`] and emits
/// register writes to a [`ChipBus`]. The caller drives it through
/// [`process_until_wait`](VgmInterpreter::process_until_wait), which runs
/// until the stream asks for a delay.
pub struct VgmInterpreter {
    header: Option<VgmHeader>,
    pcm: PcmBank,
    finished: bool,
    unsupported: Option<UnsupportedChipCallback>,
}

impl Default for VgmInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl VgmInterpreter {
    /// Create an interpreter with default PCM memory policy.
    pub fn new() -> Self {
        Self::with_bank_config(BankConfig::default())
    }

    /// Create an interpreter with the given PCM memory policy.
    pub fn with_bank_config(config: BankConfig) -> Self {
        VgmInterpreter {
            header: None,
            pcm: PcmBank::with_config(config),
            finished: true,
            unsupported: None,
        }
    }

    /// Install the observer for unsupported chip writes.
    pub fn set_unsupported_callback(&mut self, callback: UnsupportedChipCallback) {
        self.unsupported = Some(callback);
    }

    /// Parse the VGM header and position the source at the first command.
    ///
    /// On success the source has its data start registered (so loop seeks
    /// are relative) and, if the file loops, its loop offset declared.
    pub fn parse_header<S: Source + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        let header = VgmHeader::parse(source)?;
        source.set_data_start(header.data_offset);
        if header.has_loop() {
            source.declare_loop_offset(header.loop_offset_in_data());
        }
        debug!(
            "VGM v{:X}: ym2612={} sn76489={} samples={} loop={}",
            header.version,
            header.has_ym2612,
            header.has_sn76489,
            header.total_samples,
            header.has_loop()
        );
        self.header = Some(header);
        self.finished = false;
        Ok(())
    }

    /// Reset playback state and drop any loaded PCM data.
    pub fn reset(&mut self) {
        self.finished = true;
        self.pcm.clear();
    }

    /// Process commands until a nonzero wait is requested.
    ///
    /// Returns the wait in samples, or 0 at end of stream (in which case
    /// [`is_finished`](VgmInterpreter::is_finished) turns true).
    pub fn process_until_wait<S, B>(&mut self, source: &mut S, bus: &mut B) -> u32
    where
        S: Source + ?Sized,
        B: ChipBus + ?Sized,
    {
        if self.finished {
            return 0;
        }
        while source.has_more() {
            match self.process_command(source, bus) {
                Step::Wait(0) | Step::Continue => continue,
                Step::Wait(samples) => return samples,
                Step::End => {
                    self.finished = true;
                    return 0;
                }
            }
        }
        self.finished = true;
        0
    }

    /// Whether the end of the stream has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the file declares a loop point.
    pub fn has_loop(&self) -> bool {
        self.header.as_ref().is_some_and(VgmHeader::has_loop)
    }

    /// Seek the source back to the loop point, if possible.
    pub fn seek_to_loop<S: Source + ?Sized>(&mut self, source: &mut S) -> bool {
        let Some(header) = self.header.as_ref() else {
            return false;
        };
        if !header.has_loop() || !source.can_seek() {
            return false;
        }
        if source.seek(header.loop_offset_in_data()) {
            self.finished = false;
            return true;
        }
        false
    }

    /// Total song length in samples (0 before header parse).
    pub fn total_samples(&self) -> u32 {
        self.header.as_ref().map_or(0, |h| h.total_samples)
    }

    /// Loop section length in samples.
    pub fn loop_samples(&self) -> u32 {
        self.header.as_ref().map_or(0, |h| h.loop_samples)
    }

    /// File version in BCD.
    pub fn version(&self) -> u32 {
        self.header.as_ref().map_or(0, |h| h.version)
    }

    /// Whether the file carries YM2612 data.
    pub fn has_ym2612(&self) -> bool {
        self.header.as_ref().is_some_and(|h| h.has_ym2612)
    }

    /// Whether the file carries SN76489 data.
    pub fn has_sn76489(&self) -> bool {
        self.header.as_ref().is_some_and(|h| h.has_sn76489)
    }

    /// The PCM data bank (for status queries).
    pub fn pcm_bank(&self) -> &PcmBank {
        &self.pcm
    }

    fn process_command<S, B>(&mut self, source: &mut S, bus: &mut B) -> Step
    where
        S: Source + ?Sized,
        B: ChipBus + ?Sized,
    {
        let Some(cmd) = source.read() else {
            return Step::End;
        };

        match cmd {
            CMD_GG_STEREO => {
                // Game Gear stereo latch, irrelevant on Genesis hardware.
                source.skip(1);
                Step::Continue
            }
            CMD_PSG => {
                let Some(val) = source.read() else {
                    return Step::End;
                };
                bus.write_psg(val);
                Step::Continue
            }
            CMD_YM2612_P0 | CMD_YM2612_P1 => {
                let Some(reg) = source.read() else {
                    return Step::End;
                };
                let Some(val) = source.read() else {
                    return Step::End;
                };
                bus.write_ym(cmd - CMD_YM2612_P0, reg, val);
                Step::Continue
            }
            CMD_YM2413 | CMD_YM2151 | CMD_YM2203 => {
                let Some(reg) = source.read() else {
                    return Step::End;
                };
                let Some(val) = source.read() else {
                    return Step::End;
                };
                if let Some(callback) = self.unsupported.as_mut() {
                    callback(cmd, reg, val);
                }
                Step::Continue
            }
            CMD_WAIT => {
                let Some(samples) = source.read_u16_le() else {
                    return Step::End;
                };
                Step::Wait(u32::from(samples))
            }
            CMD_WAIT_NTSC => Step::Wait(WAIT_NTSC_FRAME),
            CMD_WAIT_PAL => Step::Wait(WAIT_PAL_FRAME),
            CMD_END => Step::End,
            CMD_DATA_BLOCK => {
                self.handle_data_block(source);
                Step::Continue
            }
            0x70..=0x7F => Step::Wait(u32::from(cmd & 0x0F) + 1),
            0x80..=0x8F => {
                bus.write_dac(self.pcm.read_byte());
                Step::Wait(u32::from(cmd & 0x0F))
            }
            CMD_PCM_SEEK => {
                let Some(pos) = source.read_u32_le() else {
                    return Step::End;
                };
                self.pcm.seek(pos);
                Step::Continue
            }
            _ => {
                self.skip_command(cmd, source);
                Step::Continue
            }
        }
    }

    // Data block: 0x67 0x66 tt ss ss ss ss [data]. Type 0x00 is YM2612 PCM
    // and goes into the bank; everything else is drained.
    fn handle_data_block<S: Source + ?Sized>(&mut self, source: &mut S) {
        match source.read() {
            Some(0x66) => {}
            other => {
                warn!("malformed data block marker {:?}", other);
                return;
            }
        }
        let Some(data_type) = source.read() else {
            return;
        };
        let Some(size) = source.read_u32_le() else {
            return;
        };

        if data_type == DATA_TYPE_YM2612_PCM {
            self.pcm.load_data_block(size, source);
        } else {
            debug!("skipping data block type 0x{:02X} ({} bytes)", data_type, size);
            source.skip(size);
        }
    }

    fn skip_command<S: Source + ?Sized>(&self, cmd: u8, source: &mut S) {
        let skip = SKIP_TABLE[cmd as usize];
        if skip == 0 {
            warn!("unknown VGM command 0x{:02X}", cmd);
            return;
        }
        source.skip(u32::from(skip));
    }
}
