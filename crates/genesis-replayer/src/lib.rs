//! Timed VGM/GEP Playback Engine for Genesis-class Sound Hardware
//!
//! This crate drives a YM2612 FM synthesizer and an SN76489 PSG (the Sega
//! Genesis / Mega Drive chip pair) from pre-recorded register-write logs.
//! Commands come either in the industry-standard VGM format or in GEP, a
//! compact re-encoding with a write dictionary, packed DAC runs and optional
//! 4-bit DPCM sample compression.
//!
//! The engine is a wall-clock-driven command interpreter: an external loop
//! calls [`TimedPlayer::tick`] as often as possible, and the player advances
//! the stream's virtual time (44 100 Hz sample units, integer math only)
//! until it has caught up with real time, emitting chip writes through a
//! [`ChipBus`] implementation along the way.
//!
//! # Features
//!
//! - VGM header parsing and full opcode dispatch, including PCM data banks
//!   with graceful downsampling on allocation pressure
//! - GEP dictionary writes, packed DAC runs, software-triggered samples and
//!   a 4-bit DPCM decoder
//! - Pluggable byte sources: in-memory, chunked, file-backed, and streaming
//!   gzip decompression with loop support via inflate-state snapshots
//! - Sample-accurate pause/resume and loop handling
//!
//! # Example
//!
//! ```no_run
//! use genesis_replayer::{MemSource, NullBus, TimedPlayer};
//!
//! let data = std::fs::read("song.vgm").unwrap();
//! let mut player = TimedPlayer::vgm(MemSource::new(data), NullBus);
//! player.play().unwrap();
//! loop {
//!     player.tick();
//!     if !player.is_playing() {
//!         break;
//!     }
//! }
//! ```

#![warn(missing_docs)]

pub mod bus;
pub mod error;
pub mod gep;
pub mod pcm_bank;
pub mod player;
pub mod source;
pub mod vgm;

pub use bus::{ChipBus, NullBus};
pub use error::{ReplayerError, Result};
pub use gep::{DictEntry, GepHeader, GepInterpreter, GepSong, SampleEntry};
pub use pcm_bank::{BankConfig, PcmBank};
pub use player::{Clock, Interpreter, MonotonicClock, PlayerState, TimedPlayer};
pub use source::{
    ChunkedSource, FileSource, GzipStreamSource, MemSource, Source, UNKNOWN_SIZE,
};
pub use vgm::{VgmHeader, VgmInterpreter};

/// Playback sample rate in Hz. All timing in this crate is expressed in
/// units of one sample at this rate.
pub const SAMPLE_RATE: u32 = 44_100;
