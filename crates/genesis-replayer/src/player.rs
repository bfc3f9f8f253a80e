//! Wall-clock-driven playback scheduler
//!
//! [`TimedPlayer`] ties a [`Source`], an interpreter and a [`ChipBus`]
//! together. An external loop calls [`tick`](TimedPlayer::tick) as often as
//! possible; each tick converts the elapsed wall-clock microseconds into a
//! target sample count (44 100 Hz, integer math only) and pulls commands
//! until the stream's virtual time has caught up.

use std::time::Instant;

use log::debug;

use crate::bus::ChipBus;
use crate::error::Result;
use crate::gep::GepInterpreter;
use crate::pcm_bank::PcmBank;
use crate::source::Source;
use crate::vgm::VgmInterpreter;

/// Elapsed values above this are treated as a counter rollover.
const ROLLOVER_THRESHOLD: u32 = 0x8000_0000;

/// Falling this many samples behind real time counts as an overrun
/// (one 60 Hz frame).
const OVERRUN_THRESHOLD: u64 = 735;

/// Monotonic microsecond clock.
///
/// The player only ever looks at differences between readings, so the
/// epoch is arbitrary and wrapping at 2^32 is expected (that is the
/// rollover the tick loop re-anchors on).
pub trait Clock {
    /// Current time in microseconds.
    fn now_us(&mut self) -> u32;
}

/// [`Clock`] backed by [`std::time::Instant`].
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_us(&mut self) -> u32 {
        // Truncation gives the 2^32 wrap the rollover handling expects.
        self.origin.elapsed().as_micros() as u32
    }
}

/// Player state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// Not playing; position reset.
    #[default]
    Stopped,
    /// Actively consuming the stream.
    Playing,
    /// Suspended; position preserved.
    Paused,
    /// Reached end of stream (and not looping).
    Finished,
}

/// The command interpreter driving playback: VGM or GEP.
pub enum Interpreter {
    /// VGM byte-stream interpreter.
    Vgm(VgmInterpreter),
    /// GEP byte-stream interpreter.
    Gep(GepInterpreter),
}

impl Interpreter {
    fn process_until_wait<S, B>(&mut self, source: &mut S, bus: &mut B) -> u32
    where
        S: Source + ?Sized,
        B: ChipBus + ?Sized,
    {
        match self {
            Interpreter::Vgm(interp) => interp.process_until_wait(source, bus),
            Interpreter::Gep(interp) => interp.process_until_wait(source, bus),
        }
    }

    fn advance<B: ChipBus + ?Sized>(&mut self, samples: u32, bus: &mut B) {
        match self {
            // VGM DAC traffic is command-driven; nothing to service during
            // waits.
            Interpreter::Vgm(_) => {}
            Interpreter::Gep(interp) => interp.advance(samples, bus),
        }
    }

    fn seek_to_loop<S: Source + ?Sized>(&mut self, source: &mut S) -> bool {
        match self {
            Interpreter::Vgm(interp) => interp.seek_to_loop(source),
            Interpreter::Gep(interp) => interp.seek_to_loop(source),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Interpreter::Vgm(interp) => interp.is_finished(),
            Interpreter::Gep(interp) => interp.is_finished(),
        }
    }

    fn has_loop(&self) -> bool {
        match self {
            Interpreter::Vgm(interp) => interp.has_loop(),
            Interpreter::Gep(interp) => interp.has_loop(),
        }
    }

    fn total_samples(&self) -> u32 {
        match self {
            Interpreter::Vgm(interp) => interp.total_samples(),
            Interpreter::Gep(interp) => interp.total_samples(),
        }
    }

    fn pcm_bank(&self) -> &PcmBank {
        match self {
            Interpreter::Vgm(interp) => interp.pcm_bank(),
            Interpreter::Gep(interp) => interp.pcm_bank(),
        }
    }
}

/// Convert elapsed microseconds to elapsed samples at 44 100 Hz.
///
/// `(us / 10000) * 441 + (us % 10000) * 441 / 10000` is exact in 32-bit
/// integer math; the error is bounded at one sample per conversion.
/// Alternatives drift at minute scale.
fn samples_for_micros(us: u32) -> u32 {
    (us / 10_000) * 441 + (us % 10_000) * 441 / 10_000
}

/// Wall-clock-driven player for one VGM or GEP stream.
pub struct TimedPlayer<S: Source, B: ChipBus, C: Clock = MonotonicClock> {
    source: S,
    bus: B,
    clock: C,
    interpreter: Interpreter,
    state: PlayerState,
    looping: bool,
    start_time_us: u32,
    samples_played: u64,
    current_sample: u32,
    wait_credit: u32,
    loop_count: u16,
    overruns: u32,
}

impl<S: Source, B: ChipBus> TimedPlayer<S, B, MonotonicClock> {
    /// Create a VGM player over `source`, writing to `bus`.
    pub fn vgm(source: S, bus: B) -> Self {
        Self::with_clock(
            source,
            bus,
            Interpreter::Vgm(VgmInterpreter::new()),
            MonotonicClock::default(),
        )
    }

    /// Create a GEP player for a prepared interpreter.
    pub fn gep(source: S, bus: B, interpreter: GepInterpreter) -> Self {
        Self::with_clock(
            source,
            bus,
            Interpreter::Gep(interpreter),
            MonotonicClock::default(),
        )
    }
}

impl<S: Source, B: ChipBus, C: Clock> TimedPlayer<S, B, C> {
    /// Create a player with an explicit interpreter and clock.
    pub fn with_clock(source: S, bus: B, interpreter: Interpreter, clock: C) -> Self {
        TimedPlayer {
            source,
            bus,
            clock,
            interpreter,
            state: PlayerState::Stopped,
            looping: false,
            start_time_us: 0,
            samples_played: 0,
            current_sample: 0,
            wait_credit: 0,
            loop_count: 0,
            overruns: 0,
        }
    }

    /// Start playback from the beginning.
    ///
    /// Opens the source, parses the header (VGM) or rewinds the stream
    /// (GEP), silences the chips and transitions to `Playing`.
    pub fn play(&mut self) -> Result<()> {
        self.stop();
        self.source.open()?;

        match &mut self.interpreter {
            Interpreter::Vgm(interp) => interp.parse_header(&mut self.source)?,
            Interpreter::Gep(interp) => interp.reset_playback(),
        }

        self.current_sample = 0;
        self.wait_credit = 0;
        self.samples_played = 0;
        self.loop_count = 0;
        self.overruns = 0;
        self.start_time_us = self.clock.now_us();

        self.bus.mute_all();
        self.state = PlayerState::Playing;
        debug!("playback started");
        Ok(())
    }

    /// Stop playback and fully reset the chips.
    pub fn stop(&mut self) {
        if self.state == PlayerState::Stopped {
            return;
        }
        self.bus.reset();
        match &mut self.interpreter {
            Interpreter::Vgm(interp) => interp.reset(),
            Interpreter::Gep(interp) => interp.reset_playback(),
        }
        self.state = PlayerState::Stopped;
        self.current_sample = 0;
        self.wait_credit = 0;
        self.samples_played = 0;
        debug!("playback stopped");
    }

    /// Pause playback, silencing the chips. Position is preserved.
    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.state = PlayerState::Paused;
            self.bus.mute_all();
            debug!("playback paused");
        }
    }

    /// Resume from pause with sample accuracy.
    ///
    /// The start time is re-derived from the samples already played, so the
    /// stream continues exactly where it left off.
    pub fn resume(&mut self) {
        if self.state == PlayerState::Paused {
            let elapsed_us = (self.samples_played * 10_000 / 441) as u32;
            self.start_time_us = self.clock.now_us().wrapping_sub(elapsed_us);
            self.state = PlayerState::Playing;
            debug!("playback resumed");
        }
    }

    /// Advance the stream to the current wall-clock time.
    ///
    /// Call this as often as possible (thousands of times per second). It
    /// returns once the stream is ahead of real time again, or when
    /// playback leaves the `Playing` state.
    pub fn tick(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }

        let now = self.clock.now_us();
        let mut elapsed = now.wrapping_sub(self.start_time_us);
        if elapsed > ROLLOVER_THRESHOLD {
            // Counter rollover (or a start time in the future): re-anchor.
            // The elapsed-sample counter restarts with the anchor; the
            // stream position in current_sample is unaffected.
            self.start_time_us = now;
            self.samples_played = 0;
            elapsed = 0;
        }
        let target = u64::from(samples_for_micros(elapsed));

        if target.saturating_sub(self.samples_played) > OVERRUN_THRESHOLD {
            self.overruns += 1;
        }

        while self.state == PlayerState::Playing {
            if self.wait_credit == 0 {
                self.process_commands();
                continue;
            }
            if self.samples_played >= target {
                return;
            }
            let advance = self
                .wait_credit
                .min((target - self.samples_played) as u32);
            self.interpreter.advance(advance, &mut self.bus);
            self.wait_credit -= advance;
            self.samples_played += u64::from(advance);
            self.current_sample = self.current_sample.wrapping_add(advance);
        }
    }

    // Pull commands until the interpreter hands out wait credit; handle end
    // of stream by looping or finishing.
    fn process_commands(&mut self) {
        self.wait_credit = self
            .interpreter
            .process_until_wait(&mut self.source, &mut self.bus);

        if !self.interpreter.is_finished() {
            return;
        }

        if self.looping && self.interpreter.has_loop() {
            if self.interpreter.seek_to_loop(&mut self.source) {
                self.loop_count = self.loop_count.wrapping_add(1);
                debug!("looping (count {})", self.loop_count);
                self.wait_credit = self
                    .interpreter
                    .process_until_wait(&mut self.source, &mut self.bus);
                if self.wait_credit > 0 {
                    return;
                }
                // A loop body with no waits would spin forever; fall
                // through and finish instead.
            }
        }

        self.bus.mute_all();
        self.state = PlayerState::Finished;
        debug!("playback finished");
    }

    /// Current player state.
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Whether the player is actively playing.
    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    /// Whether the player is paused.
    pub fn is_paused(&self) -> bool {
        self.state == PlayerState::Paused
    }

    /// Whether playback has reached the end of the stream.
    pub fn is_finished(&self) -> bool {
        self.state == PlayerState::Finished
    }

    /// Enable or disable looping at end of stream.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Whether looping is enabled.
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Total song length in samples, per the stream header.
    pub fn total_samples(&self) -> u32 {
        self.interpreter.total_samples()
    }

    /// Current position in samples (grows across loops).
    pub fn current_sample(&self) -> u32 {
        self.current_sample
    }

    /// How many times playback has wrapped to the loop point.
    pub fn loop_count(&self) -> u16 {
        self.loop_count
    }

    /// Ticks that found playback more than a frame behind real time.
    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    /// Whether the stream drives the YM2612.
    pub fn has_ym(&self) -> bool {
        match &self.interpreter {
            Interpreter::Vgm(interp) => interp.has_ym2612(),
            Interpreter::Gep(interp) => interp.has_ym2612(),
        }
    }

    /// Whether the stream drives the SN76489.
    pub fn has_psg(&self) -> bool {
        match &self.interpreter {
            Interpreter::Vgm(interp) => interp.has_sn76489(),
            Interpreter::Gep(interp) => interp.has_sn76489(),
        }
    }

    /// Whether the stream declares a loop point.
    pub fn has_loop(&self) -> bool {
        self.interpreter.has_loop()
    }

    /// The interpreter's PCM bank, for status queries.
    pub fn pcm_bank(&self) -> &PcmBank {
        self.interpreter.pcm_bank()
    }

    /// Song duration in seconds.
    pub fn duration_seconds(&self) -> f32 {
        self.total_samples() as f32 / crate::SAMPLE_RATE as f32
    }

    /// Current position in seconds.
    pub fn position_seconds(&self) -> f32 {
        self.current_sample as f32 / crate::SAMPLE_RATE as f32
    }

    /// The bus, for inspection.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable access to the bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}
