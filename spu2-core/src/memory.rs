//! Sound RAM and IRQ address watching
//!
//! Sound RAM is 2MB addressed in 16-bit words, so every address in the unit is 20 bits wide.

use crate::boxedarray::BoxedArray;
use bincode::{Decode, Encode};
use std::collections::TryReserveError;

pub const RAM_WORDS: usize = 0x10_0000;
pub const RAM_MASK: u32 = (RAM_WORDS - 1) as u32;

// Words below this address are rewritten continuously by the mixer (output taps, input rings) and
// so are never eligible for ADPCM caching
pub const DYNAMIC_REGION_END: u32 = 0x2800;

// Per-core mixer taps, indexed by the 0x200-word output position
pub const CORE0_OUTPUT_L: u32 = 0x0800;
pub const CORE0_OUTPUT_R: u32 = 0x0A00;

pub const fn voice1_tap(core: usize) -> u32 {
    if core == 0 { 0x0400 } else { 0x0C00 }
}

pub const fn voice3_tap(core: usize) -> u32 {
    if core == 0 { 0x0600 } else { 0x0E00 }
}

// [dry L, dry R, wet L, wet R]
pub const fn mix_taps(core: usize) -> [u32; 4] {
    if core == 0 { [0x1000, 0x1200, 0x1400, 0x1600] } else { [0x1800, 0x1A00, 0x1C00, 0x1E00] }
}

pub const fn input_ring_l(core: usize) -> u32 {
    0x2000 + ((core as u32) << 10)
}

pub const fn input_ring_r(core: usize) -> u32 {
    0x2200 + ((core as u32) << 10)
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct SoundRam {
    words: BoxedArray<u16, RAM_WORDS>,
}

impl SoundRam {
    pub fn try_new() -> Result<Self, TryReserveError> {
        Ok(Self { words: BoxedArray::try_new()? })
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    #[inline]
    pub fn read(&self, address: u32) -> u16 {
        self.words[(address & RAM_MASK) as usize]
    }

    #[inline]
    pub fn read_i16(&self, address: u32) -> i16 {
        self.read(address) as i16
    }

    #[inline]
    pub fn write(&mut self, address: u32, value: u16) {
        self.words[(address & RAM_MASK) as usize] = value;
    }

    #[inline]
    pub fn write_i16(&mut self, address: u32, value: i16) {
        self.write(address, value as u16);
    }

    // 8-word ADPCM block containing the given address
    pub fn block(&self, address: u32) -> [u16; 8] {
        let start = (address & RAM_MASK & !7) as usize;
        let mut block = [0; 8];
        block.copy_from_slice(&self.words[start..start + 8]);
        block
    }

    // Callers split transfers at the end of RAM; these never wrap
    pub fn copy_in(&mut self, address: u32, data: &[u16]) {
        let start = address as usize;
        self.words[start..start + data.len()].copy_from_slice(data);
    }

    pub fn copy_out(&self, address: u32, out: &mut [u16]) {
        let start = address as usize;
        out.copy_from_slice(&self.words[start..start + out.len()]);
    }
}

/// Snapshot of both cores' IRQ addresses for the duration of one memory operation.
///
/// Any sound RAM access is checked against the IRQ address of both cores, regardless of which
/// core performed the access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqMonitor {
    watched: [Option<u32>; 2],
    raised: [bool; 2],
}

impl IrqMonitor {
    pub fn new(watched: [Option<u32>; 2]) -> Self {
        Self { watched, raised: [false; 2] }
    }

    pub fn watched(&self) -> [Option<u32>; 2] {
        self.watched
    }

    pub fn raised(&self) -> [bool; 2] {
        self.raised
    }

    pub fn test(&mut self, address: u32) {
        let address = address & RAM_MASK;
        for core in 0..2 {
            if self.watched[core] == Some(address) {
                self.raise(core);
            }
        }
    }

    // Compare with some IRQA bits ignored; the input rings match on both L and R halves
    pub fn test_ignoring(&mut self, address: u32, ignored_bits: u32) {
        let address = address & RAM_MASK;
        for core in 0..2 {
            if self.watched[core].is_some_and(|irqa| irqa & !ignored_bits == address) {
                self.raise(core);
            }
        }
    }

    // [start, end)
    pub fn test_range(&mut self, start: u32, end: u32) {
        for core in 0..2 {
            if self.watched[core].is_some_and(|irqa| irqa >= start && irqa < end) {
                self.raise(core);
            }
        }
    }

    fn raise(&mut self, core: usize) {
        if !self.raised[core] {
            log::debug!("Core {core} IRQ address hit");
        }
        self.raised[core] = true;
    }
}
