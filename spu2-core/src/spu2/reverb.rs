//! SPU2 reverb
//!
//! Each core owns a feedback-delay network whose buffers live in sound RAM between the effects
//! start address (ESA) and effects end address (EEA). All buffer registers are offsets relative to
//! ESA. The unit processes one channel per tick, alternating left and right, and the shared buffer
//! position only moves forward after a right-channel tick.

use crate::num::{mul_q15, set_address_high, set_address_low, I32Ext};
use crate::spu2::voice::StereoSample;
use crate::spu2::MixContext;
use bincode::{Decode, Encode};

pub const NUM_ADDRESS_REGISTERS: usize = 22;

// Address register order matches the register map
const FB_SRC_A: usize = 0;
const FB_SRC_B: usize = 1;
const IIR_DEST_A0: usize = 2;
const IIR_DEST_A1: usize = 3;
const ACC_SRC_A0: usize = 4;
const ACC_SRC_A1: usize = 5;
const ACC_SRC_B0: usize = 6;
const ACC_SRC_B1: usize = 7;
const IIR_SRC_A0: usize = 8;
const IIR_SRC_A1: usize = 9;
const IIR_DEST_B0: usize = 10;
const IIR_DEST_B1: usize = 11;
const ACC_SRC_C0: usize = 12;
const ACC_SRC_C1: usize = 13;
const ACC_SRC_D0: usize = 14;
const ACC_SRC_D1: usize = 15;
const IIR_SRC_B1: usize = 16;
const IIR_SRC_B0: usize = 17;
const MIX_DEST_A0: usize = 18;
const MIX_DEST_A1: usize = 19;
const MIX_DEST_B0: usize = 20;
const MIX_DEST_B1: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReverbClock {
    Left,
    Right,
}

impl ReverbClock {
    fn from_cycles(cycles: u64) -> Self {
        if cycles & 1 != 0 { Self::Right } else { Self::Left }
    }

    // Picks the register for this channel out of a (left, right) pair
    fn select(self, left: usize, right: usize) -> usize {
        match self {
            Self::Left => left,
            Self::Right => right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct ReverbCoefficients {
    pub iir_alpha: i32,
    pub acc_coef: [i32; 4],
    pub iir_coef: i32,
    pub fb_alpha: i32,
    pub fb_x: i32,
    pub in_coef_l: i32,
    pub in_coef_r: i32,
}

// Computed addresses for one tick
#[derive(Debug, Clone, Copy)]
struct TickAddresses {
    same_src: u32,
    same_dst: u32,
    same_prv: u32,
    diff_src: u32,
    diff_dst: u32,
    diff_prv: u32,
    comb: [u32; 4],
    apf1_src: u32,
    apf1_dst: u32,
    apf2_src: u32,
    apf2_dst: u32,
}

impl TickAddresses {
    fn all(&self) -> [u32; 14] {
        [
            self.same_src,
            self.same_dst,
            self.same_prv,
            self.diff_src,
            self.diff_dst,
            self.diff_prv,
            self.comb[0],
            self.comb[1],
            self.comb[2],
            self.comb[3],
            self.apf1_src,
            self.apf1_dst,
            self.apf2_src,
            self.apf2_dst,
        ]
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct ReverbUnit {
    start_address: u32,
    end_address: u32,
    registers: [u32; NUM_ADDRESS_REGISTERS],
    pub coefficients: ReverbCoefficients,
    // Register offsets reduced modulo the buffer size; rebuilt lazily after any address write
    offsets: [u32; NUM_ADDRESS_REGISTERS],
    offsets_dirty: bool,
    buffer_size: u32,
    buffer_position: u32,
    last_output: StereoSample,
}

impl ReverbUnit {
    pub fn new() -> Self {
        Self {
            start_address: 0,
            end_address: 0,
            registers: [0; NUM_ADDRESS_REGISTERS],
            coefficients: ReverbCoefficients::default(),
            offsets: [0; NUM_ADDRESS_REGISTERS],
            offsets_dirty: true,
            buffer_size: 0,
            buffer_position: 0,
            last_output: StereoSample::ZERO,
        }
    }

    fn buffer_len(&self) -> i64 {
        i64::from(self.end_address) - i64::from(self.start_address) + 1
    }

    fn rebuild_offsets(&mut self) {
        let len = self.buffer_len();
        if len <= 0 {
            self.buffer_size = 0;
        } else {
            self.buffer_size = len as u32;
            for (offset, &register) in self.offsets.iter_mut().zip(&self.registers) {
                *offset = register % self.buffer_size;
            }
        }

        self.offsets_dirty = false;
        log::debug!(
            "Rebuilt reverb work area: {:05X}-{:05X} ({} words)",
            self.start_address,
            self.end_address,
            self.buffer_size
        );
    }

    /// Move the buffer position forward; only odd (right channel) ticks advance it.
    pub fn advance(&mut self, cycles: u64) {
        if self.offsets_dirty {
            self.rebuild_offsets();
        }

        if cycles & 1 == 0 {
            return;
        }

        self.buffer_position += 1;
        if self.buffer_position >= self.buffer_size {
            self.buffer_position = 0;
        }
    }

    /// Map a buffer offset to an absolute address. The result is always inside `[ESA, EEA]`.
    fn buffer_address(&self, offset: i64) -> u32 {
        let size = i64::from(self.buffer_size);
        let relative = (offset + i64::from(self.buffer_position)).rem_euclid(size);
        self.start_address + relative as u32
    }

    fn tick_addresses(&self, clock: ReverbClock) -> TickAddresses {
        let offset = |register: usize| i64::from(self.offsets[register]);
        let address = |register: usize| self.buffer_address(offset(register));
        let previous = |register: usize| self.buffer_address(offset(register) - 1);

        let same_dst = clock.select(IIR_DEST_A0, IIR_DEST_A1);
        let diff_dst = clock.select(IIR_DEST_B0, IIR_DEST_B1);
        let mix_dest_a = clock.select(MIX_DEST_A0, MIX_DEST_A1);
        let mix_dest_b = clock.select(MIX_DEST_B0, MIX_DEST_B1);

        TickAddresses {
            same_src: address(clock.select(IIR_SRC_A0, IIR_SRC_A1)),
            same_dst: address(same_dst),
            same_prv: previous(same_dst),
            diff_src: address(clock.select(IIR_SRC_B1, IIR_SRC_B0)),
            diff_dst: address(diff_dst),
            // Previous sample of the opposite side's destination
            diff_prv: previous(clock.select(IIR_DEST_B1, IIR_DEST_B0)),
            comb: [
                address(clock.select(ACC_SRC_A0, ACC_SRC_A1)),
                address(clock.select(ACC_SRC_B0, ACC_SRC_B1)),
                address(clock.select(ACC_SRC_C0, ACC_SRC_C1)),
                address(clock.select(ACC_SRC_D0, ACC_SRC_D1)),
            ],
            apf1_src: self.buffer_address(offset(mix_dest_a) - offset(FB_SRC_A)),
            apf1_dst: address(mix_dest_a),
            apf2_src: self.buffer_address(offset(mix_dest_b) - offset(FB_SRC_B)),
            apf2_dst: address(mix_dest_b),
        }
    }

    /// Run one channel of the network. Buffer writes only happen when `writes_enabled` is set, but
    /// every computed address is still checked against the IRQ addresses.
    pub fn process(
        &mut self,
        input: StereoSample,
        writes_enabled: bool,
        ctx: &mut MixContext<'_>,
    ) -> StereoSample {
        if self.offsets_dirty {
            self.rebuild_offsets();
        }

        if self.buffer_size == 0 {
            return StereoSample::ZERO;
        }

        let clock = ReverbClock::from_cycles(ctx.cycles);
        let addresses = self.tick_addresses(clock);

        for address in addresses.all() {
            ctx.irqs.test(address);
        }

        let read = |address: u32| -> i32 { ctx.ram.read_i16(address).into() };
        let c = self.coefficients;

        let (in_coef, input) = match clock {
            ReverbClock::Left => (c.in_coef_l, input.l),
            ReverbClock::Right => (c.in_coef_r, input.r),
        };
        let input = mul_q15(in_coef, input);

        let same_prv = read(addresses.same_prv);
        let same = mul_q15(
            c.iir_alpha,
            input + mul_q15(c.iir_coef, read(addresses.same_src)) - same_prv,
        ) + same_prv;

        let diff_prv = read(addresses.diff_prv);
        let diff = mul_q15(
            c.iir_alpha,
            input + mul_q15(c.iir_coef, read(addresses.diff_src)) - diff_prv,
        ) + diff_prv;

        let mut out = addresses
            .comb
            .iter()
            .zip(c.acc_coef)
            .map(|(&address, coef)| mul_q15(coef, read(address)))
            .sum::<i32>();

        let apf1_src = read(addresses.apf1_src);
        let apf1 = out - mul_q15(c.fb_alpha, apf1_src);
        out = apf1_src + mul_q15(c.fb_alpha, apf1);

        let apf2_src = read(addresses.apf2_src);
        let apf2 = out - mul_q15(c.fb_x, apf2_src);
        out = apf2_src + mul_q15(c.fb_x, apf2);

        if writes_enabled {
            for (address, value) in [
                (addresses.same_dst, same),
                (addresses.diff_dst, diff),
                (addresses.apf1_dst, apf1),
                (addresses.apf2_dst, apf2),
            ] {
                ctx.ram.write_i16(address, value.clamp_to_i16());
                ctx.cache.invalidate_address(address);
            }
        }

        let output = -i32::from(out.clamp_to_i16());
        match clock {
            ReverbClock::Left => self.last_output.l = output,
            ReverbClock::Right => self.last_output.r = output,
        }

        self.last_output
    }

    // +$2E0: Effects start address, high halfword
    pub fn write_start_address_high(&mut self, value: u16) {
        self.start_address = set_address_high(self.start_address, value);
        self.reset_work_area();
    }

    // +$2E2: Effects start address, low halfword
    pub fn write_start_address_low(&mut self, value: u16) {
        self.start_address = set_address_low(self.start_address, value);
        self.reset_work_area();
    }

    pub fn start_address(&self) -> u32 {
        self.start_address
    }

    // +$33C: Effects end address; only the top 4 bits are writable
    pub fn write_end_address(&mut self, value: u16) {
        self.end_address = (u32::from(value & 0xF) << 16) | 0xFFFF;
        self.reset_work_area();
    }

    pub fn end_address(&self) -> u32 {
        self.end_address
    }

    fn reset_work_area(&mut self) {
        self.offsets_dirty = true;
        self.buffer_position = 0;
        log::trace!("Reverb work area: {:05X}-{:05X}", self.start_address, self.end_address);
    }

    // +$2E4-$33B: Buffer offset registers, high halfword first
    pub fn write_address_register(&mut self, idx: usize, high: bool, value: u16) {
        let Some(register) = self.registers.get_mut(idx) else {
            log::error!("Invalid reverb address register index {idx}");
            return;
        };

        *register = if high {
            set_address_high(*register, value)
        } else {
            set_address_low(*register, value)
        };
        self.offsets_dirty = true;

        log::trace!("Reverb address register {idx} write: {:05X}", *register);
    }

    pub fn read_address_register(&self, idx: usize, high: bool) -> u16 {
        let register = self.registers.get(idx).copied().unwrap_or(0);
        if high { (register >> 16) as u16 } else { register as u16 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Spu2Config;
    use crate::memory::{IrqMonitor, SoundRam};
    use crate::spu2::adpcm::AdpcmCache;

    fn unit(start: u32, end_high: u16) -> ReverbUnit {
        let mut unit = ReverbUnit::new();
        unit.write_start_address_high((start >> 16) as u16);
        unit.write_start_address_low(start as u16);
        unit.write_end_address(end_high);
        unit
    }

    fn random_registers(unit: &mut ReverbUnit) {
        for idx in 0..NUM_ADDRESS_REGISTERS {
            unit.write_address_register(idx, true, rand::random());
            unit.write_address_register(idx, false, rand::random());
        }
    }

    #[test]
    fn buffer_addresses_stay_in_window() {
        for _ in 0..100 {
            let start = rand::random::<u32>() & 0x7_FFFF;
            let mut unit = unit(start, 0x7 + (rand::random::<u16>() % 8));
            random_registers(&mut unit);

            for cycles in 0..=rand::random::<u64>() % 50 {
                unit.advance(cycles);
            }

            for _ in 0..100 {
                let offset = i64::from(rand::random::<i32>());
                let address = unit.buffer_address(offset);
                assert!(
                    (unit.start_address()..=unit.end_address()).contains(&address),
                    "{address:05X} outside {:05X}-{:05X}",
                    unit.start_address(),
                    unit.end_address()
                );
            }

            for clock in [ReverbClock::Left, ReverbClock::Right] {
                for address in unit.tick_addresses(clock).all() {
                    assert!((unit.start_address()..=unit.end_address()).contains(&address));
                }
            }
        }
    }

    #[test]
    fn position_advances_every_other_tick_and_wraps() {
        let mut unit = unit(0xF_FFF0, 0xF);
        assert_eq!(unit.buffer_len(), 0x10);

        for cycles in 0..0x20 {
            unit.advance(cycles);
        }
        assert_eq!(unit.buffer_position, 0);

        unit.advance(1);
        assert_eq!(unit.buffer_position, 1);
        unit.advance(2);
        assert_eq!(unit.buffer_position, 1);
    }

    #[test]
    fn inverted_window_is_silent() {
        let mut ram = SoundRam::try_new().unwrap();
        let mut cache = AdpcmCache::default();
        let mut irqs = IrqMonitor::new([Some(0x3_0000), None]);
        let mut ctx = MixContext {
            ram: &mut ram,
            cache: &mut cache,
            irqs: &mut irqs,
            config: Spu2Config::default(),
            output_pos: 0,
            cycles: 0,
        };

        let mut unit = unit(0x3_0000, 0x1);
        unit.advance(0);
        let output = unit.process(StereoSample::new(1000, 1000), true, &mut ctx);
        assert_eq!(output, StereoSample::ZERO);
        assert_eq!(irqs.raised(), [false, false]);
    }

    #[test]
    fn disabled_writes_still_raise_irqs() {
        let mut ram = SoundRam::try_new().unwrap();
        let before = ram.clone();
        let mut cache = AdpcmCache::default();

        let mut unit = unit(0x8_0000, 0x8);
        random_registers(&mut unit);
        unit.coefficients = ReverbCoefficients {
            iir_alpha: 0x7000,
            acc_coef: [0x4000; 4],
            iir_coef: 0x4000,
            fb_alpha: 0x5000,
            fb_x: 0x4000,
            in_coef_l: 0x7FFF,
            in_coef_r: 0x7FFF,
        };
        unit.advance(0);

        let target = unit.tick_addresses(ReverbClock::Left).same_dst;
        let mut irqs = IrqMonitor::new([None, Some(target)]);
        let mut ctx = MixContext {
            ram: &mut ram,
            cache: &mut cache,
            irqs: &mut irqs,
            config: Spu2Config::default(),
            output_pos: 0,
            cycles: 0,
        };

        unit.process(StereoSample::new(0x4000, 0x4000), false, &mut ctx);
        assert_eq!(irqs.raised(), [false, true]);

        for address in 0x8_0000..=0x8_FFFF {
            assert_eq!(ram.read(address), before.read(address));
        }
    }

    #[test]
    fn writes_clamp_and_output_is_negated() {
        let mut ram = SoundRam::try_new().unwrap();
        let mut cache = AdpcmCache::default();
        let mut irqs = IrqMonitor::default();

        let mut unit = unit(0x9_0000, 0x9);
        unit.write_address_register(IIR_DEST_A0, false, 0x100);
        unit.write_address_register(MIX_DEST_A0, false, 0x200);
        unit.write_address_register(MIX_DEST_B0, false, 0x300);
        unit.coefficients = ReverbCoefficients {
            iir_alpha: 0x7FFF,
            acc_coef: [0x7FFF, 0, 0, 0],
            in_coef_l: 0x7FFF,
            ..ReverbCoefficients::default()
        };
        unit.advance(0);

        // Comb A reads offset 0, all-pass 2 reads offset 0x300
        ram.write_i16(0x9_0000, 1000);
        ram.write_i16(0x9_0300, 1234);

        let mut ctx = MixContext {
            ram: &mut ram,
            cache: &mut cache,
            irqs: &mut irqs,
            config: Spu2Config::default(),
            output_pos: 0,
            cycles: 0,
        };
        let output = unit.process(StereoSample::new(0x7FFF * 4, 0), true, &mut ctx);

        assert_eq!(ram.read_i16(0x9_0100), i16::MAX);
        // All-pass 1 stores the comb sum
        assert_eq!(ram.read_i16(0x9_0200), 999);
        // With zero feedback coefficients the last all-pass stage outputs its delayed source
        assert_eq!(output.l, -1234);
        assert_eq!(output.r, 0);
    }
}
