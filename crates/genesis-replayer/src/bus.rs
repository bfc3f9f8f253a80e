//! Chip bus abstraction
//!
//! The engine never touches hardware directly. Every register write and DAC
//! byte goes through the [`ChipBus`] trait, so the same interpreter can drive
//! real silicon behind a shift register, an emulator core, or a recording
//! sink in tests.

/// Write sink for the Genesis chip pair.
///
/// Implementations must make each operation atomic from the caller's
/// perspective. An implementation may coalesce a run of consecutive
/// [`write_dac`](ChipBus::write_dac) calls by latching the YM2612 DAC address
/// register (0x2A on port 0) once, but it must restore normal addressing
/// before servicing any non-DAC write.
pub trait ChipBus {
    /// Write a YM2612 register. `port` is 0 (channels 1-3, global) or 1
    /// (channels 4-6).
    fn write_ym(&mut self, port: u8, reg: u8, val: u8);

    /// Write a byte to the SN76489 PSG.
    fn write_psg(&mut self, val: u8);

    /// Write one 8-bit sample to the YM2612 channel-6 DAC.
    fn write_dac(&mut self, sample: u8);

    /// Silence everything: PSG attenuation 0xF on all four channels, key-off
    /// on all six FM channels. Leaves register state otherwise intact.
    fn mute_all(&mut self);

    /// Full chip reset, including disabling the DAC. Used on stop so no
    /// notes hang between songs.
    fn reset(&mut self);
}

/// A [`ChipBus`] that discards every write.
///
/// Useful for headless runs and for timing tests where the register traffic
/// itself is irrelevant.
#[derive(Debug, Default)]
pub struct NullBus;

impl ChipBus for NullBus {
    fn write_ym(&mut self, _port: u8, _reg: u8, _val: u8) {}
    fn write_psg(&mut self, _val: u8) {}
    fn write_dac(&mut self, _sample: u8) {}
    fn mute_all(&mut self) {}
    fn reset(&mut self) {}
}
