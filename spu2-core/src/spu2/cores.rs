//! Per-core state and the core mixer
//!
//! Each core mixes its 24 voices into dry and wet sums, gates those together with the auto-DMA
//! input and the external input, and runs the wet sum through its reverb unit. Core 0's output is
//! the external input of core 1.

use crate::memory;
use crate::num::U32Ext;
use crate::spu2::dma::DmaChannel;
use crate::spu2::envelope::{expand_level, StereoVolume};
use crate::spu2::noise::NoiseGenerator;
use crate::spu2::reverb::ReverbUnit;
use crate::spu2::voice::{StereoSample, Voice, VoiceGates, VOICES_PER_CORE};
use crate::spu2::MixContext;
use bincode::{Decode, Encode};
use proc_bitfield::bitfield;
use std::array;

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
    // Only the bits the mixer acts on; the rest read back through the raw value
    pub struct Attr(pub u16): Debug, FromStorage, IntoStorage {
        pub irq_enable: bool @ 6,
        pub effects_enable: bool @ 7,
        pub mute: bool @ 14,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
    pub struct Mmix(pub u16): Debug, FromStorage, IntoStorage {
        pub wet_ext_r: bool @ 0,
        pub wet_ext_l: bool @ 1,
        pub dry_ext_r: bool @ 2,
        pub dry_ext_l: bool @ 3,
        pub wet_input_r: bool @ 4,
        pub wet_input_l: bool @ 5,
        pub dry_input_r: bool @ 6,
        pub dry_input_l: bool @ 7,
        pub wet_voice_r: bool @ 8,
        pub wet_voice_l: bool @ 9,
        pub dry_voice_r: bool @ 10,
        pub dry_voice_l: bool @ 11,
    }
}

// Core 0 has nothing attached to its external input
const CORE0_MMIX_MASK: u16 = 0x0FF0;

fn mask(enabled: bool) -> i16 {
    -i16::from(enabled)
}

/// Voice output accumulated over one tick, before clamping.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceMix {
    pub dry: StereoSample,
    pub wet: StereoSample,
}

/// A raw left/right pair of 16-bit volume registers (EVOL, AVOL, BVOL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct VolumePair {
    pub left: u16,
    pub right: u16,
}

impl VolumePair {
    pub fn apply(self, sample: StereoSample) -> StereoSample {
        sample.apply_levels(expand_level(self.left), expand_level(self.right))
    }
}

/// Which per-voice bitmask register a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceMask {
    PitchModulation,
    Noise,
    DryLeft,
    WetLeft,
    DryRight,
    WetRight,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Core {
    pub id: usize,
    pub voices: [Voice; VOICES_PER_CORE],
    pub attr: Attr,
    pub mmix: Mmix,
    pub irq_address: u32,
    pub endx: u32,
    pub pitch_modulation: u32,
    pub noise_enabled: u32,
    pub dry_left: u32,
    pub wet_left: u32,
    pub dry_right: u32,
    pub wet_right: u32,
    pub admas: u16,
    // STATX bit 6, set when this core's IRQ is delivered
    pub irq_flag: bool,
    pub master_volume: StereoVolume,
    pub effects_volume: VolumePair,
    pub input_volume: VolumePair,
    pub external_volume: VolumePair,
    pub reverb: ReverbUnit,
    pub noise: NoiseGenerator,
    pub dma: DmaChannel,
}

impl Core {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            voices: array::from_fn(|_| Voice::new()),
            attr: Attr::default(),
            mmix: Mmix::default(),
            irq_address: 0,
            endx: 0,
            pitch_modulation: 0,
            noise_enabled: 0,
            dry_left: 0,
            wet_left: 0,
            dry_right: 0,
            wet_right: 0,
            admas: 0,
            irq_flag: false,
            master_volume: StereoVolume::default(),
            effects_volume: VolumePair::default(),
            input_volume: VolumePair::default(),
            external_volume: VolumePair::default(),
            reverb: ReverbUnit::new(),
            noise: NoiseGenerator::new(),
            dma: DmaChannel::new(),
        }
    }

    /// The address this core's IRQ watches, if its IRQ is enabled.
    pub fn watched_irq_address(&self) -> Option<u32> {
        self.attr.irq_enable().then_some(self.irq_address)
    }

    pub fn adma_enabled(&self) -> bool {
        self.admas & (1 << self.id) != 0
    }

    /// Returns whether this write turned the IRQ off.
    pub fn write_attr(&mut self, value: u16) -> bool {
        if value & 1 != 0 {
            log::warn!("Core {} ATTR write with unknown bit 0 set: {value:04X}", self.id);
        }

        let irq_was_enabled = self.attr.irq_enable();
        self.attr = Attr(value);

        log::trace!("Core {} ATTR write: {:?}", self.id, self.attr);

        irq_was_enabled && !self.attr.irq_enable()
    }

    pub fn write_mmix(&mut self, value: u16) {
        let value = if self.id == 0 { value & CORE0_MMIX_MASK } else { value };
        self.mmix = Mmix(value);

        log::trace!("Core {} MMIX write: {:?}", self.id, self.mmix);
    }

    pub fn key_on(&mut self, mask: u32) {
        for (voice_idx, voice) in self.voices.iter_mut().enumerate() {
            if mask.bit(voice_idx as u8) {
                log::debug!(
                    "Core {} keying on voice {voice_idx} at {:05X}",
                    self.id,
                    voice.start_address
                );
                voice.key_on();
                self.endx &= !(1 << voice_idx);
            }
        }
    }

    pub fn key_off(&mut self, mask: u32) {
        for (voice_idx, voice) in self.voices.iter_mut().enumerate() {
            if mask.bit(voice_idx as u8) {
                log::debug!("Core {} keying off voice {voice_idx}", self.id);
                voice.key_off();
            }
        }
    }

    pub fn voice_mask(&self, which: VoiceMask) -> u32 {
        match which {
            VoiceMask::PitchModulation => self.pitch_modulation,
            VoiceMask::Noise => self.noise_enabled,
            VoiceMask::DryLeft => self.dry_left,
            VoiceMask::WetLeft => self.wet_left,
            VoiceMask::DryRight => self.dry_right,
            VoiceMask::WetRight => self.wet_right,
        }
    }

    pub fn set_voice_mask(&mut self, which: VoiceMask, value: u32) {
        match which {
            // Voice 0 has no previous voice to modulate it
            VoiceMask::PitchModulation => self.pitch_modulation = value & !1,
            VoiceMask::Noise => self.noise_enabled = value,
            VoiceMask::DryLeft => self.dry_left = value,
            VoiceMask::WetLeft => self.wet_left = value,
            VoiceMask::DryRight => self.dry_right = value,
            VoiceMask::WetRight => self.wet_right = value,
        }

        for (voice_idx, voice) in self.voices.iter_mut().enumerate() {
            let bit = voice_idx as u8;
            voice.pitch_modulation = self.pitch_modulation.bit(bit);
            voice.noise = self.noise_enabled.bit(bit);
            voice.gates = VoiceGates {
                dry_l: mask(self.dry_left.bit(bit)),
                dry_r: mask(self.dry_right.bit(bit)),
                wet_l: mask(self.wet_left.bit(bit)),
                wet_r: mask(self.wet_right.bit(bit)),
            };
        }
    }

    /// Run every voice for one tick and accumulate the gated dry and wet sums.
    pub fn mix_voices(&mut self, ctx: &mut MixContext<'_>) -> VoiceMix {
        self.noise.clock();
        let noise = self.noise.output();

        let mut mix = VoiceMix::default();
        let mut modulator = None;
        for (voice_idx, voice) in self.voices.iter_mut().enumerate() {
            let sample = voice.mix(self.id, voice_idx, &mut self.endx, modulator, noise, ctx);

            let gates = voice.gates;
            mix.dry += sample.gate(gates.dry_l, gates.dry_r);
            mix.wet += sample.gate(gates.wet_l, gates.wet_r);

            modulator = Some(voice.output);
        }

        mix
    }

    /// Combine voices, input, and external audio into this core's output for one tick.
    pub fn mix(
        &mut self,
        voices: VoiceMix,
        input: StereoSample,
        external: StereoSample,
        ctx: &mut MixContext<'_>,
    ) -> StereoSample {
        self.master_volume.update();

        let dry = voices.dry.clamp();
        let wet = voices.wet.clamp();

        let [dry_l, dry_r, wet_l, wet_r] = memory::mix_taps(self.id);
        for (tap, value) in [(dry_l, dry.l), (dry_r, dry.r), (wet_l, wet.l), (wet_r, wet.r)] {
            ctx.ram.write_i16(tap + ctx.output_pos, value as i16);
        }

        let m = self.mmix;
        let dry_sum = input.gate(mask(m.dry_input_l()), mask(m.dry_input_r()))
            + dry.gate(mask(m.dry_voice_l()), mask(m.dry_voice_r()))
            + external.gate(mask(m.dry_ext_l()), mask(m.dry_ext_r()));

        // The work area keeps moving even while effects are off
        self.reverb.advance(ctx.cycles);

        let wet_sum = input.gate(mask(m.wet_input_l()), mask(m.wet_input_r()))
            + wet.gate(mask(m.wet_voice_l()), mask(m.wet_voice_r()))
            + external.gate(mask(m.wet_ext_l()), mask(m.wet_ext_r()));

        let writes_enabled = self.attr.effects_enable() && !ctx.config.effects_disabled;
        let reverb = self.reverb.process(wet_sum, writes_enabled, ctx);

        if ctx.config.effects_disabled {
            return dry_sum;
        }

        dry_sum + self.effects_volume.apply(reverb)
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.id);
    }
}
