//! Shared helpers for integration tests: a recording bus and a manually
//! advanced clock.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use genesis_replayer::{ChipBus, Clock};

/// Everything a stream can emit, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Ym(u8, u8, u8),
    Psg(u8),
    Dac(u8),
}

/// A [`ChipBus`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingBus {
    pub events: Vec<BusEvent>,
    pub mute_calls: usize,
    pub reset_calls: usize,
}

impl RecordingBus {
    pub fn psg_writes(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Psg(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn dac_writes(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Dac(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn ym_writes(&self) -> Vec<(u8, u8, u8)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Ym(p, r, v) => Some((*p, *r, *v)),
                _ => None,
            })
            .collect()
    }
}

impl ChipBus for RecordingBus {
    fn write_ym(&mut self, port: u8, reg: u8, val: u8) {
        self.events.push(BusEvent::Ym(port, reg, val));
    }

    fn write_psg(&mut self, val: u8) {
        self.events.push(BusEvent::Psg(val));
    }

    fn write_dac(&mut self, sample: u8) {
        self.events.push(BusEvent::Dac(sample));
    }

    fn mute_all(&mut self) {
        self.mute_calls += 1;
    }

    fn reset(&mut self) {
        self.reset_calls += 1;
    }
}

/// A [`Clock`] whose time is set by the test.
///
/// Clones share the same cell, so the test can keep a handle while the
/// player owns its copy.
#[derive(Clone, Default)]
pub struct ManualClock(Rc<Cell<u32>>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, us: u32) {
        self.0.set(us);
    }

    pub fn advance(&self, us: u32) {
        self.0.set(self.0.get().wrapping_add(us));
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl Clock for ManualClock {
    fn now_us(&mut self) -> u32 {
        self.0.get()
    }
}

/// Build a minimal VGM file: a 0x40-byte v1.50 header followed by `body`.
///
/// `sn_clock` / `ym_clock` control chip presence; `loop_rel` is the raw
/// value of the loop-offset field (relative to 0x1C, zero for no loop).
pub fn build_vgm(sn_clock: u32, ym_clock: u32, total_samples: u32, loop_rel: u32, body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x40];
    bytes[0..4].copy_from_slice(b"Vgm ");
    let eof = (0x40 + body.len() as u32).saturating_sub(4);
    bytes[0x04..0x08].copy_from_slice(&eof.to_le_bytes());
    bytes[0x08..0x0C].copy_from_slice(&0x0150u32.to_le_bytes());
    bytes[0x0C..0x10].copy_from_slice(&sn_clock.to_le_bytes());
    bytes[0x18..0x1C].copy_from_slice(&total_samples.to_le_bytes());
    bytes[0x1C..0x20].copy_from_slice(&loop_rel.to_le_bytes());
    bytes[0x2C..0x30].copy_from_slice(&ym_clock.to_le_bytes());
    bytes[0x34..0x38].copy_from_slice(&0x0Cu32.to_le_bytes());
    bytes.extend_from_slice(body);
    bytes
}
