//! SPU2 voice: decode pointer, pitch counter, envelope, and volume

use crate::config::SilentVoicePolicy;
use crate::memory;
use crate::num::{mul_shr32, I32Ext};
use crate::spu2::adpcm::{AdpcmHistory, BlockFlags, SAMPLES_PER_BLOCK};
use crate::spu2::envelope::{AdsrEnvelope, StereoVolume};
use crate::spu2::interpolate::SampleHistory;
use crate::spu2::MixContext;
use bincode::{Decode, Encode};

pub const VOICES_PER_CORE: usize = 24;

const SAMPLE_STEP: i32 = 0x1000;
const MAX_PITCH: i64 = 0x3FFF;

/// Per-voice path masks, each either 0 (blocked) or -1 (passed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct VoiceGates {
    pub dry_l: i16,
    pub dry_r: i16,
    pub wet_l: i16,
    pub wet_r: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct StereoSample {
    pub l: i32,
    pub r: i32,
}

impl StereoSample {
    pub const ZERO: Self = Self { l: 0, r: 0 };

    pub fn new(l: i32, r: i32) -> Self {
        Self { l, r }
    }

    pub fn gate(self, l: i16, r: i16) -> Self {
        Self { l: self.l & i32::from(l), r: self.r & i32::from(r) }
    }

    pub fn clamp(self) -> Self {
        Self { l: self.l.clamp_to_i16().into(), r: self.r.clamp_to_i16().into() }
    }

    pub fn apply_volume(self, volume: &StereoVolume) -> Self {
        Self {
            l: mul_shr32(self.l << 1, volume.left.value()),
            r: mul_shr32(self.r << 1, volume.right.value()),
        }
    }

    pub fn apply_levels(self, l: i32, r: i32) -> Self {
        Self { l: mul_shr32(self.l << 1, l), r: mul_shr32(self.r << 1, r) }
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self { l: self.l + rhs.l, r: self.r + rhs.r }
    }
}

impl std::ops::AddAssign for StereoSample {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Voice {
    pub volume: StereoVolume,
    pub pitch: u16,
    pub envelope: AdsrEnvelope,
    pub start_address: u32,
    pub loop_address: u32,
    pub next_address: u32,
    // Set by a LSAX write; stops loop start flags from overriding the loop address
    pub explicit_loop: bool,
    pub loop_flags: BlockFlags,
    pub pitch_modulation: bool,
    pub noise: bool,
    pub gates: VoiceGates,
    pub output: i32,
    sample_position: i32,
    history: SampleHistory,
    adpcm: AdpcmHistory,
    buffer: [i16; SAMPLES_PER_BLOCK],
    buffer_idx: u8,
}

impl Voice {
    pub fn new() -> Self {
        Self {
            volume: StereoVolume::default(),
            pitch: 0,
            envelope: AdsrEnvelope::default(),
            start_address: 0,
            loop_address: 0,
            next_address: 0,
            explicit_loop: false,
            loop_flags: BlockFlags::default(),
            pitch_modulation: false,
            noise: false,
            gates: VoiceGates::default(),
            output: 0,
            sample_position: 0,
            history: SampleHistory::default(),
            adpcm: AdpcmHistory::default(),
            buffer: [0; SAMPLES_PER_BLOCK],
            buffer_idx: SAMPLES_PER_BLOCK as u8,
        }
    }

    pub fn key_on(&mut self) {
        self.buffer_idx = SAMPLES_PER_BLOCK as u8;
        self.next_address = (self.start_address | 1) & memory::RAM_MASK;
        self.sample_position = 0;
        self.adpcm = AdpcmHistory::default();
        self.history = SampleHistory::default();
        self.loop_flags = BlockFlags::default();
        self.explicit_loop = false;
        self.envelope.key_on();
    }

    pub fn key_off(&mut self) {
        self.envelope.key_off();
    }

    pub fn write_loop_address_high(&mut self, value: u16) {
        self.loop_address = crate::num::set_address_high(self.loop_address, value);
        self.explicit_loop = true;
    }

    pub fn write_loop_address_low(&mut self, value: u16) {
        self.loop_address = crate::num::set_address_low(self.loop_address, value);
        self.explicit_loop = true;
    }

    fn step_pitch(&mut self, modulator: Option<i32>) {
        let pitch = match modulator {
            Some(modulator) if self.pitch_modulation => {
                ((i64::from(self.pitch) * (32768 + i64::from(modulator))) >> 15).clamp(0, MAX_PITCH)
            }
            _ => i64::from(self.pitch).min(MAX_PITCH),
        };
        self.sample_position += pitch as i32;
    }

    fn next_data_word(&mut self, voice_idx: usize, endx: &mut u32, ctx: &mut MixContext<'_>) {
        ctx.irqs.test(self.next_address);
        self.next_address = (self.next_address + 1) & memory::RAM_MASK;

        if self.next_address & 7 != 0 {
            return;
        }

        // Ran off the end of a block; the flags are the ones read from its header
        if self.loop_flags.loop_end {
            *endx |= 1 << voice_idx;
            self.next_address = (self.loop_address | 1) & memory::RAM_MASK;

            if !self.loop_flags.loop_repeat && !self.envelope.is_off() {
                log::debug!("Voice {voice_idx} reached loop end without repeat, stopping");
                self.envelope.stop();
            }
        } else {
            // Skip the header of the next block
            self.next_address = (self.next_address + 1) & memory::RAM_MASK;
        }
    }

    fn enter_block(&mut self, ctx: &mut MixContext<'_>) -> u32 {
        let block_address = self.next_address & !7;
        ctx.irqs.test(block_address);

        self.loop_flags = BlockFlags::from_header(ctx.ram.read(block_address));
        if self.loop_flags.loop_start && !self.explicit_loop {
            self.loop_address = block_address;
        }

        block_address
    }

    fn next_sample(&mut self, voice_idx: usize, endx: &mut u32, ctx: &mut MixContext<'_>) -> i16 {
        if self.buffer_idx & 3 == 0 {
            self.next_data_word(voice_idx, endx, ctx);
        }

        if usize::from(self.buffer_idx) == SAMPLES_PER_BLOCK {
            self.buffer_idx = 0;
            let block_address = self.enter_block(ctx);
            ctx.cache.decode(ctx.ram, block_address, &mut self.adpcm, &mut self.buffer);
        }

        let sample = self.buffer[usize::from(self.buffer_idx)];
        self.buffer_idx += 1;
        sample
    }

    // Same addressing and IRQ side effects as next_sample, without decoding
    fn skip_sample(&mut self, voice_idx: usize, endx: &mut u32, ctx: &mut MixContext<'_>) {
        if self.buffer_idx & 3 == 0 {
            self.next_data_word(voice_idx, endx, ctx);
        }

        if usize::from(self.buffer_idx) == SAMPLES_PER_BLOCK {
            self.buffer_idx = 0;
            self.enter_block(ctx);
        }

        self.buffer_idx += 1;
    }

    fn is_idle_loop(&self, voice_idx: usize, endx: u32, ctx: &MixContext<'_>) -> bool {
        let block_address = self.next_address & !7;
        let flags = BlockFlags::from_header(ctx.ram.read(block_address));

        endx & (1 << voice_idx) != 0
            && flags.loop_end
            && flags.loop_repeat
            && self.loop_address == block_address
            && !ctx.irqs.watched().into_iter().flatten().any(|irqa| irqa & !7 == block_address)
    }

    fn write_taps(&self, voice_idx: usize, core: usize, value: i16, ctx: &mut MixContext<'_>) {
        let tap = match voice_idx {
            1 => memory::voice1_tap(core),
            3 => memory::voice3_tap(core),
            _ => return,
        };
        ctx.ram.write_i16(tap + ctx.output_pos, value);
    }

    /// Run this voice for one tick and return its output after envelope and volume.
    pub fn mix(
        &mut self,
        core: usize,
        voice_idx: usize,
        endx: &mut u32,
        modulator: Option<i32>,
        noise: i32,
        ctx: &mut MixContext<'_>,
    ) -> StereoSample {
        self.volume.update();

        if self.envelope.is_off() {
            let advance = match ctx.config.silent_voices {
                SilentVoicePolicy::AlwaysAdvance => true,
                SilentVoicePolicy::SkipIdleLoops => !self.is_idle_loop(voice_idx, *endx, ctx),
            };

            if advance {
                self.step_pitch(modulator);
                while self.sample_position > 0 {
                    self.skip_sample(voice_idx, endx, ctx);
                    self.sample_position -= SAMPLE_STEP;
                }
            }

            self.output = 0;
            self.write_taps(voice_idx, core, 0, ctx);
            return StereoSample::ZERO;
        }

        self.step_pitch(modulator);

        let raw = if self.noise {
            // The decode pointer holds still, whole samples are dropped
            while self.sample_position > 0 {
                self.sample_position -= SAMPLE_STEP;
            }
            noise
        } else {
            while self.sample_position > 0 {
                let sample = self.next_sample(voice_idx, endx, ctx);
                self.history.push(sample.into());
                self.sample_position -= SAMPLE_STEP;
            }
            self.history.interpolate(ctx.config.interpolation, self.sample_position)
        };

        let value = if self.envelope.calculate() { mul_shr32(raw, self.envelope.level) } else { 0 };
        self.output = value;
        self.write_taps(voice_idx, core, value.clamp_to_i16(), ctx);

        StereoSample::new(value, value).apply_volume(&self.volume)
    }
}
