//! ADSR envelopes and volume slides
//!
//! Both operate on a 31-bit level stored in an `i32`, where `0x7FFF_FFFF` is full volume. A step
//! that overflows the level is detected as the sign bit flipping.

use bincode::{Decode, Encode};
use proc_bitfield::bitfield;

pub const MAX_LEVEL: i32 = i32::MAX;

const fn build_rate_table() -> [i32; 160] {
    let mut table = [0; 160];

    let mut i = 0;
    while i < table.len() {
        let shift = (i as i32 - 32) >> 2;
        let mut rate = (i as i64 & 3) + 4;
        if shift < 0 {
            rate >>= -shift;
        } else {
            rate <<= shift;
        }

        table[i] = if rate > 0x3FFF_FFFF { 0x3FFF_FFFF } else { rate as i32 };
        i += 1;
    }

    table
}

// Step sizes indexed by rate; index 0 corresponds to table entry 32
const RATE_TABLE: [i32; 160] = build_rate_table();

// Exponential decrease steps get faster as the level gets higher
const INVERSE_EXP_OFFSETS: [i32; 8] = [0, 4, 6, 8, 9, 10, 11, 12];

fn rate(index: i32) -> i32 {
    RATE_TABLE[(index + 32).clamp(0, RATE_TABLE.len() as i32 - 1) as usize]
}

fn exp_offset(level: i32) -> i32 {
    INVERSE_EXP_OFFSETS[((level >> 28) & 7) as usize]
}

fn increase_step(rate_7bit: u16, exponential: bool, level: i32) -> i32 {
    let base = i32::from(rate_7bit ^ 0x7F);
    if exponential && level >= 0x6000_0000 { rate(base - 0x18) } else { rate(base - 0x10) }
}

fn decrease_step(rate_7bit: u16, exponential: bool, level: i32) -> i32 {
    let base = i32::from(rate_7bit ^ 0x7F);
    if exponential { rate(base - 0x1B + exp_offset(level)) } else { rate(base - 0xF) }
}

// Decay and exponential release use a 5-bit rate scaled by 4
fn decrease_step_5bit(rate_5bit: u16, level: i32) -> i32 {
    rate((i32::from(rate_5bit ^ 0x1F) * 4) - 0x18 + exp_offset(level))
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
    pub struct Adsr1(pub u16): Debug, FromStorage, IntoStorage {
        pub sustain_level: u16 @ 0..=3,
        pub decay_rate: u16 @ 4..=7,
        pub attack_rate: u16 @ 8..=14,
        pub attack_exponential: bool @ 15,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
    pub struct Adsr2(pub u16): Debug, FromStorage, IntoStorage {
        pub release_rate: u16 @ 0..=4,
        pub release_exponential: bool @ 5,
        pub sustain_rate: u16 @ 6..=12,
        pub sustain_decreasing: bool @ 14,
        pub sustain_exponential: bool @ 15,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum AdsrPhase {
    #[default]
    Off,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct AdsrEnvelope {
    pub level: i32,
    pub phase: AdsrPhase,
    pub adsr1: Adsr1,
    pub adsr2: Adsr2,
}

impl AdsrEnvelope {
    pub fn key_on(&mut self) {
        self.phase = AdsrPhase::Attack;
        self.level = 0;
    }

    pub fn key_off(&mut self) {
        if self.phase != AdsrPhase::Off {
            self.phase = AdsrPhase::Release;
        }
    }

    pub fn stop(&mut self) {
        self.phase = AdsrPhase::Off;
        self.level = 0;
    }

    pub fn is_off(&self) -> bool {
        self.phase == AdsrPhase::Off
    }

    // ENVX
    pub fn read_level(&self) -> u16 {
        (self.level >> 16) as u16
    }

    // Bit 15 is masked so the level can never start out negative
    pub fn write_level(&mut self, value: u16) {
        let value = i32::from(value & 0x7FFF);
        self.level = (value << 16) | value;
    }

    /// Step the envelope by one tick. Returns `false` exactly when the envelope has just reached
    /// Off, at which point the voice must stop producing samples.
    pub fn calculate(&mut self) -> bool {
        match self.phase {
            AdsrPhase::Off => return false,
            AdsrPhase::Attack => {
                if self.level == MAX_LEVEL {
                    self.phase = AdsrPhase::Decay;
                } else {
                    let step = increase_step(
                        self.adsr1.attack_rate(),
                        self.adsr1.attack_exponential(),
                        self.level,
                    );
                    match self.level.checked_add(step) {
                        Some(level) => self.level = level,
                        None => {
                            self.level = MAX_LEVEL;
                            self.phase = AdsrPhase::Decay;
                        }
                    }
                }
            }
            AdsrPhase::Decay => {
                self.level = self
                    .level
                    .saturating_sub(decrease_step_5bit(self.adsr1.decay_rate(), self.level));

                let sustain_level =
                    (MAX_LEVEL / 0x10) * (i32::from(self.adsr1.sustain_level()) + 1);
                if self.level <= sustain_level {
                    self.level = self.level.max(0);
                    self.phase = AdsrPhase::Sustain;
                }
            }
            AdsrPhase::Sustain => {
                let sustain_rate = self.adsr2.sustain_rate();
                if sustain_rate == 0x7F {
                    return true;
                }

                if self.adsr2.sustain_decreasing() {
                    let step =
                        decrease_step(sustain_rate, self.adsr2.sustain_exponential(), self.level);
                    self.level = self.level.saturating_sub(step);
                    if self.level <= 0 {
                        self.stop();
                        return false;
                    }
                } else {
                    let step =
                        increase_step(sustain_rate, self.adsr2.sustain_exponential(), self.level);
                    self.level = self.level.saturating_add(step);
                }
            }
            AdsrPhase::Release => {
                let release_rate = self.adsr2.release_rate();
                if self.adsr2.release_exponential() {
                    let step = decrease_step_5bit(release_rate, self.level);
                    self.level = self.level.saturating_sub(step);
                } else if release_rate != 0x1F {
                    let step = 1_i64 << (0x1F - release_rate);
                    self.level = (i64::from(self.level) - step).max(0) as i32;
                }

                if self.level <= 0 {
                    self.stop();
                    return false;
                }
            }
        }

        true
    }
}

const SLIDE_REVERSE_PHASE: u16 = 1 << 12;
const SLIDE_DECREMENT: u16 = 1 << 13;
const SLIDE_EXPONENTIAL: u16 = 1 << 14;
const SLIDE_ENABLE: u16 = 1 << 15;

/// Expand a signed 16-bit volume register to a 32-bit level, filling the low half so that
/// `0x7FFF` maps close to full scale.
pub fn expand_level(value: u16) -> i32 {
    ((u32::from(value) << 16) | (u32::from(value << 1) & 0xFFFF)) as i32
}

fn expand_fixed_volume(value: u16) -> i32 {
    // Bit 14 is the sign; shifting left once moves it into the halfword sign bit
    expand_level(value << 1)
}

/// A single channel volume: either a fixed level or a ramp driven by the same rate encoding as
/// the ADSR envelope.
#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct VolumeSlide {
    pub level: i32,
    pub register: u16,
    sliding: bool,
}

impl VolumeSlide {
    pub fn write(&mut self, value: u16) {
        self.register = value;
        self.sliding = value & SLIDE_ENABLE != 0;

        if self.sliding {
            // Slides operate on the magnitude, the phase bit restores the sign on output
            self.level = self.level.saturating_abs();
        } else {
            self.level = expand_fixed_volume(value);
        }
    }

    #[cfg(test)]
    pub fn is_sliding(&self) -> bool {
        self.sliding
    }

    pub fn update(&mut self) {
        if !self.sliding {
            return;
        }

        let increment = self.register & 0x7F;
        if increment == 0x7F {
            return;
        }

        let exponential = self.register & SLIDE_EXPONENTIAL != 0;
        if self.register & SLIDE_DECREMENT != 0 {
            let step = decrease_step(increment, exponential, self.level);
            self.level = self.level.saturating_sub(step);
            if self.level <= 0 {
                self.level = 0;
                self.sliding = false;
            }
        } else {
            let step = increase_step(increment, exponential, self.level);
            match self.level.checked_add(step) {
                Some(level) => self.level = level,
                None => {
                    self.level = MAX_LEVEL;
                    self.sliding = false;
                }
            }
        }
    }

    pub fn value(&self) -> i32 {
        let reversed = self.register & (SLIDE_ENABLE | SLIDE_REVERSE_PHASE)
            == SLIDE_ENABLE | SLIDE_REVERSE_PHASE;
        if reversed { -self.level } else { self.level }
    }

    // VOLX
    pub fn read_current(&self) -> u16 {
        (self.value() >> 16) as u16
    }
}

/// Left/right pair of volume slides.
#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct StereoVolume {
    pub left: VolumeSlide,
    pub right: VolumeSlide,
}

impl StereoVolume {
    pub fn update(&mut self) {
        self.left.update();
        self.right.update();
    }
}
