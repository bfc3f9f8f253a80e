//! GEP command dispatch

use log::{debug, warn};

use super::dpcm::DpcmDecoder;
use super::{flags, GepSong};
use crate::bus::ChipBus;
use crate::pcm_bank::{BankConfig, PcmBank};
use crate::source::{MemSource, Source};

const CMD_DICT_EXT: u8 = 0xB0;
const CMD_YM_RAW_P0: u8 = 0xB1;
const CMD_YM_RAW_P1: u8 = 0xB2;
const CMD_PSG_RAW: u8 = 0xB3;
const CMD_WAIT_LONG: u8 = 0xB4;
const CMD_LOOP_MARK: u8 = 0xB5;
const CMD_DAC_WRITE: u8 = 0xB6;
const CMD_DAC_SEEK: u8 = 0xB7;
const CMD_DAC_BLOCK: u8 = 0xB8;
const CMD_DAC_RUN: u8 = 0xB9;
const CMD_SAMPLE_PLAY: u8 = 0xBB;
const CMD_DAC_START: u8 = 0xBC;
const CMD_CHUNK_END: u8 = 0xFE;
const CMD_END: u8 = 0xFF;

/// Samples per 60 Hz frame at 44 100 Hz.
const SAMPLES_PER_FRAME: u32 = 735;

enum Step {
    Wait(u32),
    Continue,
    End,
}

/// Byte-level GEP opcode interpreter.
///
/// Owns the song assets and the PCM bank. Commands are read from a
/// [`Source`]; in multi-chunk mode the chunk start offsets must be supplied
/// via [`set_chunk_offsets`](GepInterpreter::set_chunk_offsets) so `0xFE`
/// terminators and `(chunk, offset)` loop targets can be resolved.
pub struct GepInterpreter {
    song: GepSong,
    pcm: PcmBank,
    chunk_offsets: Vec<u32>,
    current_chunk: usize,
    // PCM cursor in output-sample space; for DPCM pools this counts decoded
    // samples, not pool bytes.
    pcm_pos: u32,
    dpcm: DpcmDecoder,
    use_dpcm: bool,
    // Software sample stream, serviced while wait credit is consumed.
    sample_playing: bool,
    sample_end: u32,
    sample_rate: u32,
    wait_accum: u32,
    finished: bool,
}

impl GepInterpreter {
    /// Create an interpreter for `song` with default PCM memory policy.
    pub fn new(song: GepSong) -> Self {
        Self::with_bank_config(song, BankConfig::default())
    }

    /// Create an interpreter for `song` with the given PCM memory policy.
    pub fn with_bank_config(song: GepSong, config: BankConfig) -> Self {
        let mut pcm = PcmBank::with_config(config);
        let use_dpcm = song.header.uses_dpcm() && !song.pcm.is_empty();
        if !song.pcm.is_empty() {
            let mut pool = MemSource::from_slice(&song.pcm);
            // MemSource::open on a fresh blob cannot fail.
            let _ = pool.open();
            pcm.load_data_block(song.pcm.len() as u32, &mut pool);
            // DPCM nibble streams do not survive decimation; better silence
            // than noise if the pool could not be stored whole.
            if use_dpcm && pcm.downsample_ratio() != 1 {
                warn!("DPCM pool could not be stored undownsampled, DAC disabled");
                pcm.force_disable();
            }
        }
        let mut interpreter = GepInterpreter {
            song,
            pcm,
            chunk_offsets: Vec::new(),
            current_chunk: 0,
            pcm_pos: 0,
            dpcm: DpcmDecoder::default(),
            use_dpcm,
            sample_playing: false,
            sample_end: 0,
            sample_rate: 0,
            wait_accum: 0,
            finished: true,
        };
        interpreter.reset_playback();
        interpreter
    }

    /// Register the chunk start offsets for a multi-chunk stream.
    pub fn set_chunk_offsets(&mut self, offsets: Vec<u32>) {
        self.chunk_offsets = offsets;
    }

    /// Rewind all playback state (keeps the loaded PCM pool).
    pub fn reset_playback(&mut self) {
        self.current_chunk = 0;
        self.pcm_pos = 0;
        self.dpcm.reset(if self.use_dpcm {
            self.pcm.byte_at(0)
        } else {
            0x80
        });
        self.sample_playing = false;
        self.sample_end = 0;
        self.sample_rate = 0;
        self.wait_accum = 0;
        self.finished = false;
    }

    /// Whether the end of the stream has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the song declares a loop target.
    pub fn has_loop(&self) -> bool {
        self.song.header.has_loop()
    }

    /// Total song length in samples.
    pub fn total_samples(&self) -> u32 {
        self.song.header.total_samples
    }

    /// Whether the stream carries YM2612 writes.
    pub fn has_ym2612(&self) -> bool {
        self.song.header.flags & flags::YM2612 != 0
    }

    /// Whether the stream carries SN76489 writes.
    pub fn has_sn76489(&self) -> bool {
        self.song.header.flags & flags::PSG != 0
    }

    /// The PCM data bank (for status queries).
    pub fn pcm_bank(&self) -> &PcmBank {
        &self.pcm
    }

    /// Seek the source to the loop target, if possible.
    pub fn seek_to_loop<S: Source + ?Sized>(&mut self, source: &mut S) -> bool {
        let header = &self.song.header;
        if !header.has_loop() || !source.can_seek() {
            return false;
        }
        let chunk = usize::from(header.loop_chunk);
        let base = if self.chunk_offsets.is_empty() {
            // Single-blob stream: the loop offset is relative to the data
            // start the source already knows about.
            if chunk != 0 {
                return false;
            }
            0
        } else {
            match self.chunk_offsets.get(chunk) {
                Some(&offset) => offset,
                None => return false,
            }
        };
        if source.seek(base + u32::from(header.loop_offset)) {
            self.current_chunk = chunk;
            self.finished = false;
            return true;
        }
        false
    }

    /// Service the software DAC stream while `samples` of wait credit are
    /// consumed. Emits at most one DAC byte per call; the accumulator is
    /// reset to zero on emission rather than carrying a remainder.
    pub fn advance<B: ChipBus + ?Sized>(&mut self, samples: u32, bus: &mut B) {
        if !self.sample_playing || !self.pcm.has_data() {
            return;
        }
        self.wait_accum += samples;
        if self.wait_accum >= self.sample_rate {
            let sample = self.read_pcm_sample();
            bus.write_dac(sample);
            self.wait_accum = 0;
            if self.pcm_pos >= self.sample_end {
                self.sample_playing = false;
            }
        }
    }

    /// Process commands until a nonzero wait is requested.
    ///
    /// Returns the wait in samples, or 0 at end of stream (in which case
    /// [`is_finished`](GepInterpreter::is_finished) turns true).
    pub fn process_until_wait<S, B>(&mut self, source: &mut S, bus: &mut B) -> u32
    where
        S: Source + ?Sized,
        B: ChipBus + ?Sized,
    {
        if self.finished {
            return 0;
        }
        loop {
            match self.process_command(source, bus) {
                Step::Wait(0) | Step::Continue => continue,
                Step::Wait(samples) => return samples,
                Step::End => {
                    self.finished = true;
                    return 0;
                }
            }
        }
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
            // Short wait: 1-64 samples.
            0x00..=0x3F => Step::Wait(u32::from(cmd & 0x3F) + 1),

            // One-byte dictionary write, entries 0-63.
            0x40..=0x7F => {
                self.write_dict_entry(cmd & 0x3F, bus);
                Step::Continue
            }

            // Burst of 1-16 PSG writes.
            0x80..=0x8F => {
                let count = (cmd & 0x0F) + 1;
                for _ in 0..count {
                    let Some(val) = source.read() else {
                        return Step::End;
                    };
                    bus.write_psg(val);
                }
                Step::Continue
            }

            // Wait 1-16 frames.
            0x90..=0x9F => Step::Wait((u32::from(cmd & 0x0F) + 1) * SAMPLES_PER_FRAME),

            // FM key on/off shortcut.
            0xA0..=0xAB => {
                self.write_key_event(cmd & 0x0F, bus);
                Step::Continue
            }

            CMD_DICT_EXT => {
                let Some(index) = source.read() else {
                    return Step::End;
                };
                self.write_dict_entry(index, bus);
                Step::Continue
            }

            CMD_YM_RAW_P0 | CMD_YM_RAW_P1 => {
                let Some(reg) = source.read() else {
                    return Step::End;
                };
                let Some(val) = source.read() else {
                    return Step::End;
                };
                bus.write_ym(cmd - CMD_YM_RAW_P0, reg, val);
                Step::Continue
            }

            CMD_PSG_RAW => {
                let Some(val) = source.read() else {
                    return Step::End;
                };
                bus.write_psg(val);
                Step::Continue
            }

            CMD_WAIT_LONG => {
                let Some(samples) = source.read_u16_le() else {
                    return Step::End;
                };
                Step::Wait(u32::from(samples))
            }

            // Loop marker carries no play-time effect; the loop target
            // comes from the header.
            CMD_LOOP_MARK => Step::Continue,

            CMD_DAC_WRITE => {
                let sample = self.read_pcm_sample();
                bus.write_dac(sample);
                Step::Continue
            }

            CMD_DAC_SEEK => {
                let Some(pos) = source.read_u16_le() else {
                    return Step::End;
                };
                self.seek_pcm(u32::from(pos));
                Step::Continue
            }

            // Fixed-rate DAC block: count samples, then count*wait samples
            // of delay.
            CMD_DAC_BLOCK => {
                let Some(count) = source.read() else {
                    return Step::End;
                };
                let Some(wait) = source.read() else {
                    return Step::End;
                };
                for _ in 0..count {
                    let sample = self.read_pcm_sample();
                    bus.write_dac(sample);
                }
                Step::Wait(u32::from(count) * u32::from(wait))
            }

            // Packed DAC run: per-sample 4-bit waits, two per byte, high
            // nibble first.
            CMD_DAC_RUN => {
                let Some(count) = source.read() else {
                    return Step::End;
                };
                let mut total_wait = 0u32;
                let mut emitted = 0u32;
                while emitted < u32::from(count) {
                    let Some(packed) = source.read() else {
                        return Step::End;
                    };
                    let sample = self.read_pcm_sample();
                    bus.write_dac(sample);
                    total_wait += u32::from(packed >> 4);
                    emitted += 1;
                    if emitted < u32::from(count) {
                        let sample = self.read_pcm_sample();
                        bus.write_dac(sample);
                        total_wait += u32::from(packed & 0x0F);
                        emitted += 1;
                    }
                }
                Step::Wait(total_wait)
            }

            CMD_SAMPLE_PLAY => {
                let Some(id) = source.read() else {
                    return Step::End;
                };
                let Some(rate) = source.read() else {
                    return Step::End;
                };
                self.trigger_sample(id, rate);
                Step::Continue
            }

            CMD_DAC_START => {
                let Some(pos) = source.read_u16_le() else {
                    return Step::End;
                };
                let Some(rate) = source.read() else {
                    return Step::End;
                };
                self.seek_pcm(u32::from(pos));
                self.sample_end = self.pcm.original_size();
                self.sample_rate = u32::from(rate).max(1);
                self.wait_accum = 0;
                self.sample_playing = true;
                Step::Continue
            }

            // DAC byte plus 0-15 samples of wait.
            0xC0..=0xCF => {
                let sample = self.read_pcm_sample();
                bus.write_dac(sample);
                Step::Wait(u32::from(cmd & 0x0F))
            }

            // Quick sample trigger, ids 0-15, one rate operand.
            0xD0..=0xDF => {
                let Some(rate) = source.read() else {
                    return Step::End;
                };
                self.trigger_sample(cmd & 0x0F, rate);
                Step::Continue
            }

            CMD_CHUNK_END => {
                let chunk_count = self.chunk_offsets.len().max(1);
                if self.current_chunk + 1 >= chunk_count {
                    return Step::End;
                }
                self.current_chunk += 1;
                // Chunks are stitched in order, but the seek keeps the
                // stream aligned even if the terminator sat mid-chunk.
                if let Some(&offset) = self.chunk_offsets.get(self.current_chunk) {
                    if !source.seek(offset) {
                        return Step::End;
                    }
                }
                Step::Continue
            }

            CMD_END => Step::End,

            // Unassigned opcodes (0xAC-0xAF, 0xBA, 0xBD-0xBF, 0xE0-0xFD)
            // carry no operands; skip the byte alone.
            _ => {
                debug!("unknown GEP command 0x{:02X}", cmd);
                Step::Continue
            }
        }
    }

    fn write_dict_entry<B: ChipBus + ?Sized>(&mut self, index: u8, bus: &mut B) {
        let Some(entry) = self.song.dictionary.get(usize::from(index)) else {
            warn!("dictionary index {} out of range", index);
            return;
        };
        bus.write_ym(entry.port, entry.reg, entry.value);
    }

    // Key codes 0-5 are key-off, 6-11 key-on, channel = code mod 6. The
    // key register wants channel bits 0-2 for port-0 channels and 4-6 for
    // port-1 channels, always written through port 0 register 0x28.
    fn write_key_event<B: ChipBus + ?Sized>(&mut self, code: u8, bus: &mut B) {
        let channel = code % 6;
        let key_on = code >= 6;
        let ch_bits = if channel < 3 { channel } else { channel + 1 };
        let value = ch_bits | if key_on { 0xF0 } else { 0x00 };
        bus.write_ym(0, 0x28, value);
    }

    fn read_pcm_sample(&mut self) -> u8 {
        if self.use_dpcm {
            let sample = self.dpcm.decode_next(&self.pcm, self.pcm_pos);
            self.pcm_pos += 1;
            sample
        } else {
            let sample = self.pcm.byte_at(self.pcm_pos);
            self.pcm_pos += 1;
            sample
        }
    }

    // Position the PCM cursor at output sample `pos`. DPCM has no random
    // access, so the decoder re-runs from the seed byte up to the target.
    fn seek_pcm(&mut self, pos: u32) {
        if self.use_dpcm {
            self.dpcm.reset(self.pcm.byte_at(0));
            self.pcm_pos = 0;
            for _ in 0..pos {
                self.read_pcm_sample();
            }
        } else {
            self.pcm_pos = pos;
        }
    }

    fn trigger_sample(&mut self, id: u8, rate: u8) {
        let Some(entry) = self.song.samples.get(usize::from(id)).copied() else {
            warn!("sample id {} out of range", id);
            return;
        };
        if !self.pcm.has_data() {
            return;
        }
        self.seek_pcm(u32::from(entry.start));
        self.sample_end = u32::from(entry.start) + u32::from(entry.length);
        self.sample_rate = u32::from(rate).max(1);
        // Zero accumulated credit: the first byte goes out on the next
        // advance that reaches the rate threshold.
        self.wait_accum = 0;
        self.sample_playing = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gep::{GepSong, GEP_MAGIC};
    use crate::source::MemSource;

    #[derive(Default)]
    struct TraceBus {
        writes: Vec<(u8, u8, u8)>,
        psg: Vec<u8>,
        dac: Vec<u8>,
    }

    impl ChipBus for TraceBus {
        fn write_ym(&mut self, port: u8, reg: u8, val: u8) {
            self.writes.push((port, reg, val));
        }
        fn write_psg(&mut self, val: u8) {
            self.psg.push(val);
        }
        fn write_dac(&mut self, sample: u8) {
            self.dac.push(sample);
        }
        fn mute_all(&mut self) {}
        fn reset(&mut self) {}
    }

    fn header(flag_bits: u16, dict_count: u8, loop_chunk: u16, loop_offset: u16) -> [u8; 16] {
        let mut h = [0u8; 16];
        h[0..4].copy_from_slice(&GEP_MAGIC);
        h[4..6].copy_from_slice(&flag_bits.to_le_bytes());
        h[6] = dict_count;
        h[8..12].copy_from_slice(&1000u32.to_le_bytes());
        h[12..14].copy_from_slice(&loop_chunk.to_le_bytes());
        h[14..16].copy_from_slice(&loop_offset.to_le_bytes());
        h
    }

    fn song_with(dict: &[u8], samples: &[u8], pcm: Vec<u8>, flag_bits: u16) -> GepSong {
        // The header's dict-count byte can't represent zero entries (0 is
        // the sentinel for 256), so an empty dict is padded up to the full
        // 256-entry dictionary the sentinel implies; those padding entries
        // are never referenced by the test streams.
        let count = dict.len() / 3;
        let (dict_count, padded_dict) = if count == 0 {
            (0u8, vec![0u8; 256 * 3])
        } else {
            ((count as u8), dict.to_vec())
        };
        GepSong::from_parts(
            &header(flag_bits, dict_count, 0xFFFF, 0xFFFF),
            &padded_dict,
            samples,
            pcm,
        )
        .unwrap()
    }

    fn stream(bytes: &[u8]) -> MemSource {
        let mut src = MemSource::from_slice(bytes);
        src.open().unwrap();
        src
    }

    #[test]
    fn dictionary_and_frame_waits_and_dac_run() {
        // Dictionary entry 3 = key-on channel 1.
        let mut dict = vec![0u8; 4 * 3];
        dict[9..12].copy_from_slice(&[0, 0x28, 0xF0]);
        let song = song_with(&dict, &[], vec![0x10, 0x20, 0x30, 0x40], flags::YM2612);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();

        // 0x43 = dict #3, 0x91 = wait 2 frames, DAC run of 4 with nibble
        // waits [2,1,4,3], then end.
        let mut src = stream(&[0x43, 0x91, 0xB9, 0x04, 0x21, 0x43, 0xFF]);

        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 1470);
        assert_eq!(bus.writes, vec![(0, 0x28, 0xF0)]);

        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 10);
        assert_eq!(bus.dac, vec![0x10, 0x20, 0x30, 0x40]);

        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 0);
        assert!(interp.is_finished());
    }

    #[test]
    fn short_waits_cover_full_range() {
        let song = song_with(&[], &[], vec![], 0);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[0x00, 0x3F, 0xFF]);
        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 1);
        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 64);
    }

    #[test]
    fn psg_burst_writes_all_bytes() {
        let song = song_with(&[], &[], vec![], flags::PSG);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        // 0x82 = three PSG writes.
        let mut src = stream(&[0x82, 0x9F, 0xBF, 0xDF, 0x01, 0xFF]);
        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 2);
        assert_eq!(bus.psg, vec![0x9F, 0xBF, 0xDF]);
    }

    #[test]
    fn key_events_encode_channel_bits() {
        let song = song_with(&[], &[], vec![], flags::YM2612);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        // Key-off ch 0, key-off ch 4, key-on ch 2, key-on ch 5.
        let mut src = stream(&[0xA0, 0xA4, 0xA8, 0xAB, 0xFF]);
        interp.process_until_wait(&mut src, &mut bus);
        assert_eq!(
            bus.writes,
            vec![
                (0, 0x28, 0x00),
                (0, 0x28, 0x05),
                (0, 0x28, 0xF2),
                (0, 0x28, 0xF6),
            ]
        );
    }

    #[test]
    fn raw_writes_and_long_wait() {
        let song = song_with(&[], &[], vec![], flags::PSG | flags::YM2612);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[
            0xB1, 0x22, 0x08, 0xB2, 0xB6, 0xC0, 0xB3, 0x9F, 0xB4, 0x34, 0x12, 0xFF,
        ]);
        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 0x1234);
        assert_eq!(bus.writes, vec![(0, 0x22, 0x08), (1, 0xB6, 0xC0)]);
        assert_eq!(bus.psg, vec![0x9F]);
    }

    #[test]
    fn dac_block_emits_and_waits() {
        let song = song_with(&[], &[], vec![1, 2, 3, 4, 5], flags::DAC);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[0xB8, 0x03, 0x05, 0xFF]);
        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 15);
        assert_eq!(bus.dac, vec![1, 2, 3]);
    }

    #[test]
    fn dac_write_with_seek() {
        let song = song_with(&[], &[], vec![9, 8, 7, 6], flags::DAC);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[0xB6, 0xB7, 0x02, 0x00, 0xB6, 0xC3, 0xFF]);
        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 3);
        assert_eq!(bus.dac, vec![9, 7, 6]);
    }

    #[test]
    fn triggered_sample_streams_during_waits() {
        // Sample 0: start 1, length 3, rate ignored at table level.
        let samples = [0x01, 0x00, 0x03, 0x00, 0x00];
        let song = song_with(
            &[],
            &samples,
            vec![10, 11, 12, 13, 14],
            flags::DAC | flags::SAMPLES,
        );
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        // Trigger sample 0 at rate 2 via the quick form.
        let mut src = stream(&[0xD0, 0x02, 0x20, 0xFF]);
        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 33);

        // One byte per 2 samples of credit, accumulator resets on emit.
        interp.advance(1, &mut bus);
        assert!(bus.dac.is_empty());
        interp.advance(1, &mut bus);
        assert_eq!(bus.dac, vec![11]);
        interp.advance(2, &mut bus);
        assert_eq!(bus.dac, vec![11, 12]);
        interp.advance(5, &mut bus);
        assert_eq!(bus.dac, vec![11, 12, 13]);
        // Sample exhausted; no further emissions.
        interp.advance(10, &mut bus);
        assert_eq!(bus.dac, vec![11, 12, 13]);
    }

    #[test]
    fn accumulator_drops_overflow_instead_of_carrying() {
        let samples = [0x00, 0x00, 0x04, 0x00, 0x00];
        let song = song_with(&[], &samples, vec![1, 2, 3, 4], flags::DAC | flags::SAMPLES);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[0xD0, 0x03, 0x10, 0xFF]);
        interp.process_until_wait(&mut src, &mut bus);

        // 5 samples of credit at rate 3: one emission, overflow discarded.
        interp.advance(5, &mut bus);
        assert_eq!(bus.dac, vec![1]);
        // 2 more: accumulator was reset to 0, not 2, so no emission yet.
        interp.advance(2, &mut bus);
        assert_eq!(bus.dac, vec![1]);
        interp.advance(1, &mut bus);
        assert_eq!(bus.dac, vec![1, 2]);
    }

    #[test]
    fn zero_rate_is_clamped() {
        let samples = [0x00, 0x00, 0x02, 0x00, 0x00];
        let song = song_with(&[], &samples, vec![1, 2], flags::DAC | flags::SAMPLES);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[0xBB, 0x00, 0x00, 0xFF]);
        interp.process_until_wait(&mut src, &mut bus);
        interp.advance(1, &mut bus);
        assert_eq!(bus.dac, vec![1]);
    }

    #[test]
    fn dpcm_stream_decodes_through_dac_commands() {
        // Seed 0x80, nibbles 8 (+1), 8 (+1).
        let song = song_with(&[], &[], vec![0x80, 0x88], flags::DAC | flags::DPCM);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[0xB6, 0xB6, 0xFF]);
        interp.process_until_wait(&mut src, &mut bus);
        assert_eq!(bus.dac, vec![0x81, 0x82]);
    }

    #[test]
    fn dpcm_seek_redecodes_from_start() {
        // Seed 0x80, then +1 steps: outputs 0x81, 0x82, 0x83, 0x84.
        let song = song_with(&[], &[], vec![0x80, 0x88, 0x88], flags::DAC | flags::DPCM);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[0xB6, 0xB6, 0xB6, 0xB7, 0x01, 0x00, 0xB6, 0xFF]);
        interp.process_until_wait(&mut src, &mut bus);
        assert_eq!(bus.dac, vec![0x81, 0x82, 0x83, 0x82]);
    }

    #[test]
    fn chunk_end_is_stream_end_for_single_blob() {
        let song = song_with(&[], &[], vec![], 0);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        let mut src = stream(&[0xFE, 0xB3, 0x00]);
        assert_eq!(interp.process_until_wait(&mut src, &mut bus), 0);
        assert!(interp.is_finished());
        assert!(bus.psg.is_empty());
    }

    #[test]
    fn unknown_opcode_is_skipped_without_operands() {
        let song = song_with(&[], &[], vec![], flags::PSG);
        let mut interp = GepInterpreter::new(song);
        let mut bus = TraceBus::default();
        // 0xBA is unassigned; the byte after it must execute as a command.
        let mut src = stream(&[0xBA, 0xB3, 0x42, 0xFF]);
        interp.process_until_wait(&mut src, &mut bus);
        assert_eq!(bus.psg, vec![0x42]);
    }
}
