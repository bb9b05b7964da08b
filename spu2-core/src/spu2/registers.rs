//! SPU2 register dispatch
//!
//! Register addresses are byte offsets within the 0x800-byte SPU2 window. Core 0's registers
//! start at $000 and core 1's at $400, except for the volume and reverb coefficient block at
//! $760 + core * $28 and the shared IRQINFO register at $7C2.

use crate::num::{set_address_high, set_address_low, set_mask_high, set_mask_low};
use crate::spu2::cores::{Core, VoiceMask};
use crate::spu2::envelope::{Adsr1, Adsr2};
use crate::spu2::Spu2;
use bincode::{Decode, Encode};

const WINDOW_MASK: u32 = 0x7FF;

const CORE_REGISTERS_END: u32 = 0x75F;

const MIXER_BLOCK_START: u32 = 0x760;
const MIXER_BLOCK_LEN: u32 = 0x28;
const MIXER_BLOCK_END: u32 = MIXER_BLOCK_START + 2 * MIXER_BLOCK_LEN - 1;

const IRQINFO: u32 = 0x7C2;

/// Last value written to every halfword in the register window. Registers with no side effects
/// read back from here.
#[derive(Debug, Clone, Encode, Decode)]
pub struct RegisterMirror([u16; (WINDOW_MASK as usize + 1) / 2]);

impl RegisterMirror {
    pub fn new() -> Self {
        Self([0; (WINDOW_MASK as usize + 1) / 2])
    }

    fn read(&self, address: u32) -> u16 {
        self.0[((address & WINDOW_MASK) >> 1) as usize]
    }

    fn write(&mut self, address: u32, value: u16) {
        self.0[((address & WINDOW_MASK) >> 1) as usize] = value;
    }
}

fn split_mask(mask: u32, high: bool) -> u16 {
    if high { (mask >> 16) as u16 } else { mask as u16 }
}

fn update_mask(mask: u32, high: bool, value: u16) -> u32 {
    if high { set_mask_high(mask, value) } else { set_mask_low(mask, value) }
}

fn update_address(address: u32, high: bool, value: u16) -> u32 {
    if high { set_address_high(address, value) } else { set_address_low(address, value) }
}

fn split_address(address: u32, high: bool) -> u16 {
    if high { ((address >> 16) & 0xF) as u16 } else { address as u16 }
}

// PMON/NON/VMIX* at +$180-$197, in register order
fn voice_mask_register(offset: u32) -> Option<VoiceMask> {
    match offset {
        0x180..=0x183 => Some(VoiceMask::PitchModulation),
        0x184..=0x187 => Some(VoiceMask::Noise),
        0x188..=0x18B => Some(VoiceMask::DryLeft),
        0x18C..=0x18F => Some(VoiceMask::WetLeft),
        0x190..=0x193 => Some(VoiceMask::DryRight),
        0x194..=0x197 => Some(VoiceMask::WetRight),
        _ => None,
    }
}

fn read_statx(core: &Core) -> u16 {
    let busy = core.dma.is_busy();
    (u16::from(!busy) << 10) | (u16::from(busy) << 7) | (u16::from(core.irq_flag) << 6)
}

impl Spu2 {
    pub(super) fn read_register(&mut self, address: u32) -> u16 {
        let address = address & WINDOW_MASK & !1;

        let value = match address {
            MIXER_BLOCK_START..=MIXER_BLOCK_END => {
                let core = ((address - MIXER_BLOCK_START) / MIXER_BLOCK_LEN) as usize;
                let offset = (address - MIXER_BLOCK_START) % MIXER_BLOCK_LEN;
                self.read_mixer_register(core, address, offset)
            }
            IRQINFO => self.irq_info,
            0x000..=CORE_REGISTERS_END => {
                let core = ((address >> 10) & 1) as usize;
                self.read_core_register(core, address, address & 0x3FF)
            }
            _ => self.registers.read(address),
        };

        log::trace!("SPU2 register read: {address:03X} = {value:04X}");

        value
    }

    pub(super) fn write_register(&mut self, address: u32, value: u16) {
        let address = address & WINDOW_MASK & !1;
        log::trace!("SPU2 register write: {address:03X} {value:04X}");

        self.registers.write(address, value);

        match address {
            MIXER_BLOCK_START..=MIXER_BLOCK_END => {
                let core = ((address - MIXER_BLOCK_START) / MIXER_BLOCK_LEN) as usize;
                let offset = (address - MIXER_BLOCK_START) % MIXER_BLOCK_LEN;
                self.write_mixer_register(core, offset, value);
            }
            IRQINFO => {
                // +$7C2: IRQINFO; software acknowledges interrupts by clearing bits
                self.irq_info = value;
            }
            0x000..=CORE_REGISTERS_END => {
                let core = ((address >> 10) & 1) as usize;
                self.write_core_register(core, address & 0x3FF, value);
            }
            _ => {}
        }
    }

    fn read_core_register(&mut self, core_idx: usize, address: u32, offset: u32) -> u16 {
        let core = &self.cores[core_idx];

        match offset {
            0x000..=0x17F => read_voice_register(core, offset),
            0x180..=0x197 => {
                let Some(which) = voice_mask_register(offset) else {
                    return self.registers.read(address);
                };
                split_mask(core.voice_mask(which), offset & 2 != 0)
            }
            // +$198: MMIX
            0x198 => core.mmix.0,
            // +$19A: ATTR
            0x19A => core.attr.0,
            // +$19C/$19E: IRQA
            0x19C | 0x19E => split_address(core.irq_address, offset == 0x19C),
            // +$1A8/$1AA: TSA
            0x1A8 | 0x1AA => split_address(core.dma.transfer_address, offset == 0x1A8),
            // +$1AC: Data port
            0x1AC => {
                let mut irqs = self.irq_monitor();
                let value = self.cores[core_idx].dma.read_data_port(&self.ram, &mut irqs);
                self.collect_irqs(&irqs);
                value
            }
            // +$1B0: ADMAS
            0x1B0 => core.admas,
            0x1C0..=0x2DF => read_voice_address_register(core, offset),
            // +$2E0/$2E2: ESA
            0x2E0 | 0x2E2 => split_address(core.reverb.start_address(), offset == 0x2E0),
            0x2E4..=0x33B => {
                let idx = ((offset - 0x2E4) / 4) as usize;
                core.reverb.read_address_register(idx, offset & 2 == 0)
            }
            // +$33C: EEA
            0x33C => (core.reverb.end_address() >> 16) as u16,
            // +$340/$342: ENDX
            0x340 | 0x342 => split_mask(core.endx, offset == 0x342),
            // +$344: STATX
            0x344 => read_statx(core),
            // KON, KOFF, CTRL, and anything unmapped read back the last write
            _ => self.registers.read(address),
        }
    }

    fn write_core_register(&mut self, core_idx: usize, offset: u32, value: u16) {
        match offset {
            0x000..=0x17F => self.write_voice_register(core_idx, offset, value),
            0x180..=0x197 => {
                let core = &mut self.cores[core_idx];
                if let Some(which) = voice_mask_register(offset) {
                    let mask = update_mask(core.voice_mask(which), offset & 2 != 0, value);
                    core.set_voice_mask(which, mask);
                    log::trace!("Core {core_idx} {which:?} mask: {mask:06X}");
                }
            }
            // +$198: MMIX
            0x198 => self.cores[core_idx].write_mmix(value),
            // +$19A: ATTR
            0x19A => {
                if self.cores[core_idx].write_attr(value) {
                    // Disabling the IRQ acknowledges it
                    self.irq_info &= !(4 << core_idx);
                    self.cores[core_idx].irq_flag = false;
                    self.pending_irqs[core_idx] = false;
                }
            }
            // +$19C/$19E: IRQA
            0x19C | 0x19E => {
                let core = &mut self.cores[core_idx];
                core.irq_address = update_address(core.irq_address, offset == 0x19C, value);
                log::trace!("Core {core_idx} IRQA: {:05X}", core.irq_address);
            }
            // +$1A0/$1A2: KON
            0x1A0 | 0x1A2 => {
                let mask = update_mask(0, offset == 0x1A2, value);
                self.cores[core_idx].key_on(mask);
            }
            // +$1A4/$1A6: KOFF
            0x1A4 | 0x1A6 => {
                let mask = update_mask(0, offset == 0x1A6, value);
                self.cores[core_idx].key_off(mask);
            }
            // +$1A8/$1AA: TSA
            0x1A8 | 0x1AA => {
                let dma = &mut self.cores[core_idx].dma;
                dma.transfer_address = update_address(dma.transfer_address, offset == 0x1A8, value);
                log::trace!("Core {core_idx} TSA: {:05X}", dma.transfer_address);
            }
            // +$1AC: Data port
            0x1AC => {
                let mut irqs = self.irq_monitor();
                self.cores[core_idx].dma.write_data_port(
                    value,
                    &mut self.ram,
                    &mut self.cache,
                    &mut irqs,
                );
                self.collect_irqs(&irqs);
            }
            // +$1B0: ADMAS
            0x1B0 => {
                let core = &mut self.cores[core_idx];
                core.admas = value;
                if !core.adma_enabled() {
                    core.dma.stop_adma(core_idx);
                }
                log::trace!("Core {core_idx} ADMAS: {value:04X}");
            }
            0x1C0..=0x2DF => self.write_voice_address_register(core_idx, offset, value),
            // +$2E0/$2E2: ESA
            0x2E0 => self.cores[core_idx].reverb.write_start_address_high(value),
            0x2E2 => self.cores[core_idx].reverb.write_start_address_low(value),
            0x2E4..=0x33B => {
                let idx = ((offset - 0x2E4) / 4) as usize;
                self.cores[core_idx].reverb.write_address_register(idx, offset & 2 == 0, value);
            }
            // +$33C: EEA
            0x33C => self.cores[core_idx].reverb.write_end_address(value),
            // +$340/$342: ENDX; any write clears that half
            0x340 => self.cores[core_idx].endx &= !0xFFFF,
            0x342 => self.cores[core_idx].endx &= 0xFFFF,
            // +$344: STATX
            0x344 => log::warn!("Core {core_idx} write to read-only STATX: {value:04X}"),
            // +$1AE CTRL and unmapped registers only go to the mirror
            _ => {}
        }
    }

    // +$000-$17F: Per-voice parameters, $10 bytes per voice
    fn write_voice_register(&mut self, core_idx: usize, offset: u32, value: u16) {
        let voice_idx = (offset >> 4) as usize;
        let Some(voice) = self.cores[core_idx].voices.get_mut(voice_idx) else {
            log::error!("Invalid voice register write: core {core_idx} +{offset:03X} {value:04X}");
            return;
        };

        match offset & 0xF {
            0x0 => voice.volume.left.write(value),
            0x2 => voice.volume.right.write(value),
            0x4 => voice.pitch = value,
            0x6 => voice.envelope.adsr1 = Adsr1(value),
            0x8 => voice.envelope.adsr2 = Adsr2(value),
            0xA => voice.envelope.write_level(value),
            0xC | 0xE => {
                log::warn!("Core {core_idx} voice {voice_idx} VOLX write: {value:04X}");
            }
            _ => unreachable!("offset & 0xF is always even"),
        }

        log::trace!("Core {core_idx} voice {voice_idx} +{:X} write: {value:04X}", offset & 0xF);
    }

    // +$1C0-$2DF: Per-voice addresses, $C bytes per voice
    fn write_voice_address_register(&mut self, core_idx: usize, offset: u32, value: u16) {
        let voice_idx = ((offset - 0x1C0) / 0xC) as usize;
        let Some(voice) = self.cores[core_idx].voices.get_mut(voice_idx) else {
            log::error!("Invalid voice address write: core {core_idx} +{offset:03X} {value:04X}");
            return;
        };

        let register = (offset - 0x1C0) % 0xC;
        let high = register & 2 == 0;
        match register {
            // SSA
            0x0 | 0x2 => voice.start_address = update_address(voice.start_address, high, value),
            // LSAX
            0x4 => voice.write_loop_address_high(value),
            0x6 => voice.write_loop_address_low(value),
            // NAX
            0x8 | 0xA => voice.next_address = update_address(voice.next_address, high, value),
            _ => unreachable!("offset % 0xC is always even"),
        }

        log::trace!(
            "Core {core_idx} voice {voice_idx} SSA={:05X} LSAX={:05X} NAX={:05X}",
            voice.start_address,
            voice.loop_address,
            voice.next_address
        );
    }

    fn read_mixer_register(&self, core_idx: usize, address: u32, offset: u32) -> u16 {
        let core = &self.cores[core_idx];
        let coefficients = &core.reverb.coefficients;

        match offset {
            0x00 => core.master_volume.left.register,
            0x02 => core.master_volume.right.register,
            0x04 => core.effects_volume.left,
            0x06 => core.effects_volume.right,
            0x08 => core.input_volume.left,
            0x0A => core.input_volume.right,
            0x0C => core.external_volume.left,
            0x0E => core.external_volume.right,
            0x10 => core.master_volume.left.read_current(),
            0x12 => core.master_volume.right.read_current(),
            0x14 => coefficients.iir_alpha as u16,
            0x16..=0x1D => coefficients.acc_coef[((offset - 0x16) / 2) as usize] as u16,
            0x1E => coefficients.iir_coef as u16,
            0x20 => coefficients.fb_alpha as u16,
            0x22 => coefficients.fb_x as u16,
            0x24 => coefficients.in_coef_l as u16,
            0x26 => coefficients.in_coef_r as u16,
            _ => self.registers.read(address),
        }
    }

    // $760 + core * $28: Volumes and reverb coefficients
    fn write_mixer_register(&mut self, core_idx: usize, offset: u32, value: u16) {
        let core = &mut self.cores[core_idx];
        let coefficient = i32::from(value as i16);
        let coefficients = &mut core.reverb.coefficients;

        match offset {
            0x00 => core.master_volume.left.write(value),
            0x02 => core.master_volume.right.write(value),
            0x04 => core.effects_volume.left = value,
            0x06 => core.effects_volume.right = value,
            0x08 => core.input_volume.left = value,
            0x0A => core.input_volume.right = value,
            0x0C => core.external_volume.left = value,
            0x0E => core.external_volume.right = value,
            0x10 | 0x12 => {
                log::warn!("Core {core_idx} write to read-only MVOLX: {value:04X}");
            }
            0x14 => coefficients.iir_alpha = coefficient,
            0x16..=0x1D => coefficients.acc_coef[((offset - 0x16) / 2) as usize] = coefficient,
            0x1E => coefficients.iir_coef = coefficient,
            0x20 => coefficients.fb_alpha = coefficient,
            0x22 => coefficients.fb_x = coefficient,
            0x24 => coefficients.in_coef_l = coefficient,
            0x26 => coefficients.in_coef_r = coefficient,
            _ => {}
        }

        log::trace!("Core {core_idx} mixer register +{offset:02X} write: {value:04X}");
    }
}

// +$000-$17F: Per-voice parameters, $10 bytes per voice
fn read_voice_register(core: &Core, offset: u32) -> u16 {
    let voice_idx = (offset >> 4) as usize;
    let Some(voice) = core.voices.get(voice_idx) else {
        log::error!("Invalid voice register read: core {} +{offset:03X}", core.id);
        return 0;
    };

    match offset & 0xF {
        0x0 => voice.volume.left.register,
        0x2 => voice.volume.right.register,
        0x4 => voice.pitch,
        0x6 => voice.envelope.adsr1.0,
        0x8 => voice.envelope.adsr2.0,
        // ENVX
        0xA => voice.envelope.read_level(),
        // VOLXL/VOLXR
        0xC => voice.volume.left.read_current(),
        0xE => voice.volume.right.read_current(),
        _ => unreachable!("offset & 0xF is always even"),
    }
}

// +$1C0-$2DF: Per-voice addresses, $C bytes per voice
fn read_voice_address_register(core: &Core, offset: u32) -> u16 {
    let voice_idx = ((offset - 0x1C0) / 0xC) as usize;
    let Some(voice) = core.voices.get(voice_idx) else {
        log::error!("Invalid voice address read: core {} +{offset:03X}", core.id);
        return 0;
    };

    let register = (offset - 0x1C0) % 0xC;
    let high = register & 2 == 0;
    match register {
        0x0 | 0x2 => split_address(voice.start_address, high),
        0x4 | 0x6 => split_address(voice.loop_address, high),
        0x8 | 0xA => split_address(voice.next_address, high),
        _ => unreachable!("offset % 0xC is always even"),
    }
}
