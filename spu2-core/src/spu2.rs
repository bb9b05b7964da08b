//! PS2 SPU2 (Sound Processing Unit 2)
//!
//! The SPU2 is two PS1-style SPU cores sharing 2MB of sound RAM. Each core has 24 ADPCM voices, a
//! reverb unit, and its own DMA channel. Core 0's output feeds core 1's external input, and core
//! 1's output is the final output of the chip.

mod adpcm;
mod cores;
mod dma;
mod envelope;
mod interpolate;
mod noise;
mod registers;
mod reverb;
mod timing;
mod voice;


use crate::api::{AudioOutput, InterruptHandler, InterruptKind, Spu2Error, Spu2Result};
use crate::config::Spu2Config;
use crate::memory::{self, IrqMonitor, SoundRam, RAM_WORDS};
use crate::spu2::adpcm::AdpcmCache;
use crate::spu2::cores::Core;
use crate::spu2::registers::RegisterMirror;
use crate::spu2::timing::ClockAccumulator;
use crate::spu2::voice::StereoSample;
use bincode::{Decode, Encode};
use proc_macros::SaveState;
use std::array;
use std::convert::Infallible;
use std::mem;

const OUTPUT_BUFFER_MASK: u32 = 0x1FF;

const SAVE_STATE_MAGIC: [u8; 4] = *b"SPU2";
const SAVE_STATE_VERSION: u32 = 1;

/// Shared state borrowed by everything that touches sound RAM during a tick.
pub struct MixContext<'a> {
    pub ram: &'a mut SoundRam,
    pub cache: &'a mut AdpcmCache,
    pub irqs: &'a mut IrqMonitor,
    pub config: Spu2Config,
    // Index into the 0x200-word output taps and input rings
    pub output_pos: u32,
    pub cycles: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct SaveStateHeader {
    magic: [u8; 4],
    version: u32,
    ram_words: u32,
}

impl SaveStateHeader {
    const CURRENT: Self =
        Self { magic: SAVE_STATE_MAGIC, version: SAVE_STATE_VERSION, ram_words: RAM_WORDS as u32 };

    fn verify<AErr>(self) -> Spu2Result<(), AErr> {
        let checks = [
            ("magic", u32::from_le_bytes(Self::CURRENT.magic), u32::from_le_bytes(self.magic)),
            ("version", Self::CURRENT.version, self.version),
            ("RAM size", Self::CURRENT.ram_words, self.ram_words),
        ];

        for (field, expected, actual) in checks {
            if expected != actual {
                return Err(Spu2Error::SaveStateMismatch { field, expected, actual });
            }
        }

        Ok(())
    }
}

#[derive(Debug, SaveState)]
pub struct Spu2 {
    #[save_state(skip)]
    config: Spu2Config,
    ram: SoundRam,
    #[save_state(skip)]
    cache: AdpcmCache,
    cores: [Core; 2],
    registers: RegisterMirror,
    // IRQINFO; bit 2 + core is set while that core's IRQ is pending acknowledgement
    irq_info: u16,
    pending_irqs: [bool; 2],
    output_pos: u32,
    cycles: u64,
    clock: ClockAccumulator,
}

impl Spu2 {
    /// Create a new sound unit with zeroed sound RAM.
    ///
    /// # Errors
    ///
    /// Returns an error if sound RAM or the decode cache cannot be allocated.
    pub fn new(config: Spu2Config) -> Spu2Result<Self> {
        let ram = SoundRam::try_new().map_err(|_| Spu2Error::Allocation {
            what: "sound RAM",
            bytes: RAM_WORDS * mem::size_of::<u16>(),
        })?;
        let cache = AdpcmCache::try_new().map_err(|_| Spu2Error::Allocation {
            what: "ADPCM cache",
            bytes: AdpcmCache::ENTRIES * mem::size_of::<[i16; adpcm::SAMPLES_PER_BLOCK]>(),
        })?;

        Ok(Self {
            config,
            ram,
            cache,
            cores: array::from_fn(Core::new),
            registers: RegisterMirror::new(),
            irq_info: 0,
            pending_irqs: [false; 2],
            output_pos: 0,
            cycles: 0,
            clock: ClockAccumulator::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> Spu2Config {
        self.config
    }

    pub fn set_config(&mut self, config: Spu2Config) {
        self.config = config;
    }

    /// Return every core, voice, and register to its power-on state and clear sound RAM.
    pub fn reset(&mut self) {
        log::debug!("SPU2 reset");

        self.ram.clear();
        self.cache.clear();
        for core in &mut self.cores {
            core.reset();
        }
        self.registers = RegisterMirror::new();
        self.irq_info = 0;
        self.pending_irqs = [false; 2];
        self.output_pos = 0;
        self.cycles = 0;
        self.clock = ClockAccumulator::default();
    }

    /// Advance the unit by `clocks` external clock cycles, producing one output sample for every
    /// full tick interval that has elapsed.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the audio output.
    pub fn advance<A: AudioOutput, I: InterruptHandler>(
        &mut self,
        clocks: i64,
        audio_output: &mut A,
        interrupts: &mut I,
    ) -> Spu2Result<(), A::Err> {
        self.clock.add(clocks);
        self.run_pending_ticks(audio_output, interrupts)
    }

    fn run_pending_ticks<A: AudioOutput, I: InterruptHandler>(
        &mut self,
        audio_output: &mut A,
        interrupts: &mut I,
    ) -> Spu2Result<(), A::Err> {
        for _ in 0..self.clock.take_ticks() {
            self.tick(audio_output, interrupts)?;
        }

        Ok(())
    }

    fn irq_monitor(&self) -> IrqMonitor {
        IrqMonitor::new([self.cores[0].watched_irq_address(), self.cores[1].watched_irq_address()])
    }

    fn collect_irqs(&mut self, monitor: &IrqMonitor) {
        for (pending, raised) in self.pending_irqs.iter_mut().zip(monitor.raised()) {
            *pending |= raised;
        }
    }

    // Memory-access IRQs are delivered at the start of the tick after the access. A core only
    // interrupts again once its IRQINFO bit has been cleared.
    fn dispatch_irqs<I: InterruptHandler>(&mut self, interrupts: &mut I) {
        for (core_idx, core) in self.cores.iter_mut().enumerate() {
            if !mem::take(&mut self.pending_irqs[core_idx]) {
                continue;
            }

            let info_bit = 4 << core_idx;
            if self.irq_info & info_bit == 0 && core.attr.irq_enable() {
                log::debug!("Delivering core {core_idx} IRQ (IRQA={:05X})", core.irq_address);

                self.irq_info |= info_bit;
                core.irq_flag = true;
                interrupts.raise(core_idx, InterruptKind::MemoryAccess);
            }
        }
    }

    fn tick<A: AudioOutput, I: InterruptHandler>(
        &mut self,
        audio_output: &mut A,
        interrupts: &mut I,
    ) -> Spu2Result<(), A::Err> {
        self.dispatch_irqs(interrupts);

        let mut irqs = self.irq_monitor();

        for (core_idx, core) in self.cores.iter_mut().enumerate() {
            if core.dma.clock(core_idx, &self.ram, &mut irqs) {
                interrupts.raise(core_idx, InterruptKind::DmaComplete);
            }
        }

        self.cycles += 1;

        let output = {
            let [core0, core1] = &mut self.cores;
            let mut ctx = MixContext {
                ram: &mut self.ram,
                cache: &mut self.cache,
                irqs: &mut irqs,
                config: self.config,
                output_pos: self.output_pos,
                cycles: self.cycles,
            };

            let mut inputs = [StereoSample::ZERO; 2];
            for (input, core) in inputs.iter_mut().zip([&mut *core0, &mut *core1]) {
                let sample = core.dma.read_input(core.id, ctx.output_pos, ctx.ram, ctx.irqs);
                *input = core.input_volume.apply(sample);
            }

            let voices0 = core0.mix_voices(&mut ctx);
            let voices1 = core1.mix_voices(&mut ctx);

            let core0_output = core0.mix(voices0, inputs[0], StereoSample::ZERO, &mut ctx);
            let external = if core0.attr.mute() {
                StereoSample::ZERO
            } else {
                core0_output.apply_volume(&core0.master_volume).clamp()
            };

            ctx.ram.write_i16(memory::CORE0_OUTPUT_L + ctx.output_pos, external.l as i16);
            ctx.ram.write_i16(memory::CORE0_OUTPUT_R + ctx.output_pos, external.r as i16);

            let external = core1.external_volume.apply(external);
            let core1_output = core1.mix(voices1, inputs[1], external, &mut ctx);

            if core1.attr.mute() {
                StereoSample::ZERO
            } else {
                core1_output.clamp().apply_volume(&core1.master_volume).clamp()
            }
        };

        self.collect_irqs(&irqs);
        self.output_pos = (self.output_pos + 1) & OUTPUT_BUFFER_MASK;

        audio_output
            .queue_sample((output.l as i16, output.r as i16))
            .map_err(Spu2Error::AudioOutput)
    }

    /// Read a 16-bit register at `address` within the SPU2 register window.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the audio output while catching up.
    pub fn read16<A: AudioOutput, I: InterruptHandler>(
        &mut self,
        address: u32,
        audio_output: &mut A,
        interrupts: &mut I,
    ) -> Spu2Result<u16, A::Err> {
        self.run_pending_ticks(audio_output, interrupts)?;
        Ok(self.read_register(address))
    }

    /// Write a 16-bit register at `address` within the SPU2 register window.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the audio output while catching up.
    pub fn write16<A: AudioOutput, I: InterruptHandler>(
        &mut self,
        address: u32,
        value: u16,
        audio_output: &mut A,
        interrupts: &mut I,
    ) -> Spu2Result<(), A::Err> {
        self.run_pending_ticks(audio_output, interrupts)?;
        self.write_register(address, value);
        Ok(())
    }

    /// DMA a block of halfwords into the given core. With auto-DMA enabled for the core, the data
    /// is queued for the input ring instead of being written at TSA.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the audio output while catching up.
    pub fn write_block<A: AudioOutput, I: InterruptHandler>(
        &mut self,
        core: usize,
        data: &[u16],
        audio_output: &mut A,
        interrupts: &mut I,
    ) -> Spu2Result<(), A::Err> {
        self.run_pending_ticks(audio_output, interrupts)?;

        let core = core & 1;
        if self.cores[core].adma_enabled() {
            self.cores[core].dma.start_adma(core, data);
            return Ok(());
        }

        let mut irqs = self.irq_monitor();
        self.cores[core].dma.write(core, data, &mut self.ram, &mut self.cache, &mut irqs);
        self.collect_irqs(&irqs);

        Ok(())
    }

    /// Start a DMA read of `len` halfwords from the given core. The data becomes available through
    /// [`Spu2::take_read_data`] once the transfer completes.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the audio output while catching up.
    pub fn read_block<A: AudioOutput, I: InterruptHandler>(
        &mut self,
        core: usize,
        len: usize,
        audio_output: &mut A,
        interrupts: &mut I,
    ) -> Spu2Result<(), A::Err> {
        self.run_pending_ticks(audio_output, interrupts)?;
        self.cores[core & 1].dma.start_read(core & 1, len);
        Ok(())
    }

    pub fn take_read_data(&mut self, core: usize) -> Option<Vec<u16>> {
        self.cores[core & 1].dma.take_read_data()
    }

    #[must_use]
    pub fn dma_address(&self, core: usize) -> u32 {
        self.cores[core & 1].dma.memory_address
    }

    pub fn set_dma_address(&mut self, core: usize, address: u32) {
        self.cores[core & 1].dma.memory_address = address;
    }

    /// Serialize the complete unit state, including sound RAM.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn save_state(&self) -> Spu2Result<Vec<u8>> {
        let config = bincode::config::standard();

        let mut bytes = bincode::encode_to_vec(SaveStateHeader::CURRENT, config)?;
        bytes.extend(bincode::encode_to_vec(self.to_state(), config)?);

        log::debug!("Saved SPU2 state ({} bytes)", bytes.len());

        Ok(bytes)
    }

    /// Replace the unit state with one produced by [`Spu2::save_state`]. The configuration is
    /// kept and the decode cache starts out empty. On error the current state is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the header does not match or the state cannot be decoded.
    pub fn load_state(&mut self, bytes: &[u8]) -> Spu2Result<()> {
        let config = bincode::config::standard();

        let (header, header_len): (SaveStateHeader, _) =
            bincode::decode_from_slice(bytes, config)?;
        header.verify::<Infallible>()?;

        let (state, _): (Spu2State, _) = bincode::decode_from_slice(&bytes[header_len..], config)?;

        let mut loaded = Self::from_state(state);
        loaded.config = self.config;
        loaded.cache = mem::take(&mut self.cache);
        loaded.cache.clear();
        *self = loaded;

        log::debug!("Loaded SPU2 state");

        Ok(())
    }
}
