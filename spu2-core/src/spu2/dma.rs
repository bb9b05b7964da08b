//! SPU2 transfers between host memory and sound RAM
//!
//! Plain DMA copies a block at the transfer start address (TSA) and signals completion after a
//! delay proportional to its length. Auto-DMA instead streams PCM into the per-core input ring in
//! 0x200-word chunks, one 0x100-word left half and one 0x100-word right half per chunk.

use crate::config::HardwareProfile;
use crate::memory::{self, IrqMonitor, SoundRam, RAM_MASK, RAM_WORDS};
use crate::spu2::adpcm::AdpcmCache;
use crate::spu2::voice::StereoSample;
use bincode::{Decode, Encode};

// Clocks per transferred halfword
const CLOCKS_PER_WORD: i64 = 4;

// Reads fetch this many words past the end of the requested range
const READ_PREFETCH: u32 = 0x20;

const INPUT_HALF_LEN: usize = 0x100;
const ADMA_CHUNK_LEN: usize = 2 * INPUT_HALF_LEN;

// Bit 9 of IRQA selects between the L and R input rings; input reads match either
const INPUT_RING_SELECT_BIT: u32 = 0x200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct PendingRead {
    address: u32,
    len: u32,
}

/// Streaming source for the input ring.
#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct AutoDma {
    queue: Vec<u16>,
    position: usize,
    in_progress: bool,
}

impl AutoDma {
    pub fn remaining(&self) -> usize {
        self.queue.len() - self.position
    }

    #[cfg(test)]
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    fn push(&mut self, data: &[u16]) {
        self.queue.drain(..self.position);
        self.position = 0;
        self.queue.extend_from_slice(data);
        self.in_progress = true;
    }

    fn stop(&mut self) {
        self.queue.clear();
        self.position = 0;
        self.in_progress = false;
    }

    // Missing data past the end of the queue reads as silence
    fn next_chunk(&mut self) -> [u16; ADMA_CHUNK_LEN] {
        let mut chunk = [0; ADMA_CHUNK_LEN];
        let available = self.remaining().min(ADMA_CHUNK_LEN);
        chunk[..available].copy_from_slice(&self.queue[self.position..self.position + available]);
        self.position += available;
        chunk
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaChannel {
    pub transfer_address: u32,
    // Host-side address (MADR) and the address it moves to once the transfer finishes (TADR)
    pub memory_address: u32,
    target_address: u32,
    countdown: i64,
    pending_read: Option<PendingRead>,
    read_data: Option<Vec<u16>>,
    adma: AutoDma,
}

impl DmaChannel {
    pub fn new() -> Self {
        Self {
            transfer_address: 0,
            memory_address: 0,
            target_address: 0,
            countdown: 0,
            pending_read: None,
            read_data: None,
            adma: AutoDma::default(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.countdown > 0 || self.pending_read.is_some() || self.adma.in_progress
    }

    #[cfg(test)]
    pub fn adma(&self) -> &AutoDma {
        &self.adma
    }

    pub fn take_read_data(&mut self) -> Option<Vec<u16>> {
        self.read_data.take()
    }

    fn schedule_completion(&mut self, len: usize) {
        self.target_address = self.memory_address.wrapping_add((len as u32) << 1);
        self.countdown = (len as i64 * CLOCKS_PER_WORD).max(1);
    }

    /// Copy a block into sound RAM at TSA, wrapping at the end of RAM.
    pub fn write(
        &mut self,
        core: usize,
        data: &[u16],
        ram: &mut SoundRam,
        cache: &mut AdpcmCache,
        irqs: &mut IrqMonitor,
    ) {
        let data = if data.len() > RAM_WORDS {
            log::warn!("Core {core} DMA write of {} words truncated to RAM size", data.len());
            &data[..RAM_WORDS]
        } else {
            data
        };

        let start = self.transfer_address & RAM_MASK;
        log::debug!("Core {core} DMA write: {} words at {start:05X}", data.len());

        let (first, second) = data.split_at(data.len().min(RAM_WORDS - start as usize));
        for (address, part) in [(start, first), (0, second)] {
            if part.is_empty() {
                continue;
            }

            let end = address + part.len() as u32;
            ram.copy_in(address, part);
            cache.invalidate_range(address, end);
            irqs.test_range(address, end);
        }

        self.transfer_address = (start + data.len() as u32) & RAM_MASK;
        self.schedule_completion(data.len());
    }

    /// Queue a read of `len` words from TSA. The data is copied out when the transfer completes.
    pub fn start_read(&mut self, core: usize, len: usize) {
        let len = len.min(RAM_WORDS) as u32;
        let address = self.transfer_address & RAM_MASK;
        log::debug!("Core {core} DMA read: {len} words at {address:05X}");

        self.pending_read = Some(PendingRead { address, len });
        self.schedule_completion(len as usize);
    }

    fn finish_read(&mut self, read: PendingRead, ram: &SoundRam, irqs: &mut IrqMonitor) {
        let PendingRead { address, len } = read;

        // The prefetched words count as accessed too
        let span = len + READ_PREFETCH;
        let first_span = span.min(RAM_WORDS as u32 - address);
        irqs.test_range(address, address + first_span);
        if span > first_span {
            irqs.test_range(0, span - first_span);
        }

        let mut data = vec![0; len as usize];
        let first_len = (len as usize).min(RAM_WORDS - address as usize);
        let (first, second) = data.split_at_mut(first_len);
        ram.copy_out(address, first);
        ram.copy_out(0, second);

        if len != 0 {
            self.transfer_address = (address + len - 1 + READ_PREFETCH) & RAM_MASK;
        }
        self.read_data = Some(data);
    }

    /// Advance the completion countdown by one tick. Returns `true` when a transfer completes on
    /// this tick.
    pub fn clock(&mut self, core: usize, ram: &SoundRam, irqs: &mut IrqMonitor) -> bool {
        if self.countdown <= 0 {
            return false;
        }

        self.countdown -= HardwareProfile::TICK_INTERVAL as i64;
        if self.countdown > 0 {
            return false;
        }
        self.countdown = 0;

        if let Some(read) = self.pending_read.take() {
            self.finish_read(read, ram, irqs);
        }

        if self.adma.in_progress && self.adma.remaining() == 0 {
            self.adma.stop();
        }

        self.memory_address = self.target_address;
        log::debug!("Core {core} DMA complete, MADR={:08X}", self.memory_address);

        true
    }

    // Data port (+$1AC) writes go straight to RAM at TSA
    pub fn write_data_port(
        &mut self,
        value: u16,
        ram: &mut SoundRam,
        cache: &mut AdpcmCache,
        irqs: &mut IrqMonitor,
    ) {
        let address = self.transfer_address & RAM_MASK;
        irqs.test(address);
        ram.write(address, value);
        cache.invalidate_address(address);
        self.transfer_address = (address + 1) & RAM_MASK;
    }

    pub fn read_data_port(&mut self, ram: &SoundRam, irqs: &mut IrqMonitor) -> u16 {
        let address = self.transfer_address & RAM_MASK;
        irqs.test(address);
        self.transfer_address = (address + 1) & RAM_MASK;
        ram.read(address)
    }

    /// Start or extend an auto-DMA stream.
    pub fn start_adma(&mut self, core: usize, data: &[u16]) {
        log::debug!(
            "Core {core} auto-DMA: {} words queued, {} already pending",
            data.len(),
            self.adma.remaining()
        );

        self.adma.push(data);
        self.target_address = self.memory_address.wrapping_add((data.len() as u32) << 1);
        if self.adma.remaining() < ADMA_CHUNK_LEN {
            self.countdown = 1;
        }
    }

    pub fn stop_adma(&mut self, core: usize) {
        if self.adma.in_progress {
            log::debug!("Core {core} auto-DMA stopped with {} words left", self.adma.remaining());
        }
        self.adma.stop();
    }

    /// Read this tick's input sample from the input ring and refill the ring when the read
    /// position crosses into a new half.
    pub fn read_input(
        &mut self,
        core: usize,
        position: u32,
        ram: &mut SoundRam,
        irqs: &mut IrqMonitor,
    ) -> StereoSample {
        let position = position & 0x1FF;
        let address_l = memory::input_ring_l(core) + position;
        let address_r = memory::input_ring_r(core) + position;

        irqs.test_ignoring(address_l, INPUT_RING_SELECT_BIT);

        let sample =
            StereoSample::new(ram.read_i16(address_l).into(), ram.read_i16(address_r).into());

        if self.adma.in_progress && position & 0xFF == 0 {
            // Fill the half that the read position just left
            let half = (position + 0x100) & 0x100;
            let chunk = self.adma.next_chunk();
            let (left, right) = chunk.split_at(INPUT_HALF_LEN);
            ram.copy_in(memory::input_ring_l(core) + half, left);
            ram.copy_in(memory::input_ring_r(core) + half, right);

            // Not enough data for another chunk; signal completion now so the next block arrives
            // before the ring runs dry
            if self.adma.remaining() < ADMA_CHUNK_LEN && self.countdown == 0 {
                log::debug!("Core {core} auto-DMA running low, signalling completion early");
                self.countdown = 1;
            }
        }

        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> (SoundRam, AdpcmCache, IrqMonitor) {
        (SoundRam::try_new().unwrap(), AdpcmCache::try_new().unwrap(), IrqMonitor::default())
    }

    fn clock_until_complete(dma: &mut DmaChannel, ram: &SoundRam, irqs: &mut IrqMonitor) -> u32 {
        for ticks in 1..10_000 {
            if dma.clock(0, ram, irqs) {
                return ticks;
            }
        }
        panic!("transfer never completed");
    }

    #[test]
    fn write_advances_tsa_and_completes() {
        let (mut ram, mut cache, mut irqs) = memory();
        let mut dma = DmaChannel::new();
        dma.transfer_address = 0x3000;
        dma.memory_address = 0x10_0000;

        let data: Vec<u16> = (0..0x400).collect();
        dma.write(0, &data, &mut ram, &mut cache, &mut irqs);

        assert_eq!(ram.read(0x3000), 0);
        assert_eq!(ram.read(0x33FF), 0x3FF);
        assert_eq!(dma.transfer_address, 0x3400);
        assert!(dma.is_busy());

        // 0x400 words at 4 clocks each is 0x1000 clocks, just over 5 ticks
        assert_eq!(clock_until_complete(&mut dma, &ram, &mut irqs), 6);
        assert!(!dma.is_busy());
        assert_eq!(dma.memory_address, 0x10_0800);
    }

    #[test]
    fn write_wraps_and_invalidates_both_halves() {
        let (mut ram, mut cache, _) = memory();
        let mut out = [0; 28];
        for address in [0xF_FFF0, 0xF_FFF8, 0x0_4000, 0x0_4008] {
            cache.decode(&ram, address, &mut Default::default(), &mut out);
        }
        assert!(cache.is_valid(0xF_FFF8));
        assert!(cache.is_valid(0x4000));

        let mut irqs = IrqMonitor::new([Some(0xF_FFFC), Some(0x2)]);
        let mut dma = DmaChannel::new();
        dma.transfer_address = 0xF_FFFA;
        dma.write(1, &[0xAAAA; 12], &mut ram, &mut cache, &mut irqs);

        assert_eq!(ram.read(0xF_FFFF), 0xAAAA);
        assert_eq!(ram.read(0x5), 0xAAAA);
        assert_eq!(ram.read(0x6), 0);
        assert_eq!(dma.transfer_address, 0x6);

        assert!(cache.is_valid(0xF_FFF0));
        assert!(!cache.is_valid(0xF_FFF8));
        assert_eq!(irqs.raised(), [true, true]);
    }

    #[test]
    fn read_includes_prefetch_in_irq_range() {
        let (mut ram, _, _) = memory();
        ram.copy_in(0x8000, &[1, 2, 3, 4]);

        let mut dma = DmaChannel::new();
        dma.transfer_address = 0x8000;
        dma.start_read(0, 4);
        assert!(dma.take_read_data().is_none());

        let mut irqs = IrqMonitor::new([Some(0x8010), Some(0x8030)]);
        clock_until_complete(&mut dma, &ram, &mut irqs);

        assert_eq!(dma.take_read_data(), Some(vec![1, 2, 3, 4]));
        assert_eq!(dma.take_read_data(), None);
        assert_eq!(irqs.raised(), [true, false]);
        assert_eq!(dma.transfer_address, 0x8023);
    }

    #[test]
    fn read_wraps_at_end_of_ram() {
        let (mut ram, _, _) = memory();
        ram.copy_in(0xF_FFFE, &[7, 8]);
        ram.copy_in(0, &[9]);

        let mut dma = DmaChannel::new();
        dma.transfer_address = 0xF_FFFE;
        dma.start_read(0, 3);

        let mut irqs = IrqMonitor::new([Some(0x1F), None]);
        clock_until_complete(&mut dma, &ram, &mut irqs);
        assert_eq!(dma.take_read_data(), Some(vec![7, 8, 9]));
        assert_eq!(irqs.raised(), [true, false]);
    }

    #[test]
    fn data_port_post_increments() {
        let (mut ram, mut cache, mut irqs) = memory();
        let mut dma = DmaChannel::new();
        dma.transfer_address = RAM_MASK;

        dma.write_data_port(0x1234, &mut ram, &mut cache, &mut irqs);
        dma.write_data_port(0x5678, &mut ram, &mut cache, &mut irqs);
        assert_eq!(ram.read(RAM_MASK), 0x1234);
        assert_eq!(ram.read(0), 0x5678);
        assert_eq!(dma.transfer_address, 1);

        dma.transfer_address = RAM_MASK;
        assert_eq!(dma.read_data_port(&ram, &mut irqs), 0x1234);
        assert_eq!(dma.read_data_port(&ram, &mut irqs), 0x5678);
    }

    #[test]
    fn adma_fills_opposite_half_and_fires_early() {
        let (mut ram, _, _) = memory();
        let mut irqs = IrqMonitor::default();
        let mut dma = DmaChannel::new();

        // Two chunks; the second refill leaves nothing for a third
        let data: Vec<u16> = (0..0x400).collect();
        dma.start_adma(1, &data);
        assert!(dma.is_busy());

        dma.read_input(1, 0, &mut ram, &mut irqs);
        assert_eq!(ram.read(memory::input_ring_l(1) + 0x100), 0);
        assert_eq!(ram.read(memory::input_ring_r(1) + 0x1FF), 0x1FF);
        assert!(!dma.clock(1, &ram, &mut irqs));

        dma.read_input(1, 0x100, &mut ram, &mut irqs);
        assert_eq!(ram.read(memory::input_ring_l(1)), 0x200);
        assert_eq!(dma.adma().remaining(), 0);

        assert!(dma.clock(1, &ram, &mut irqs));
        assert!(!dma.adma().in_progress());
        assert!(!dma.is_busy());
    }

    #[test]
    fn input_reads_match_irqa_on_either_ring() {
        let (mut ram, _, _) = memory();
        let mut dma = DmaChannel::new();

        let mut irqs = IrqMonitor::new([Some(memory::input_ring_r(0) + 0x42), None]);
        dma.read_input(0, 0x41, &mut ram, &mut irqs);
        assert_eq!(irqs.raised(), [false, false]);
        dma.read_input(0, 0x42, &mut ram, &mut irqs);
        assert_eq!(irqs.raised(), [true, false]);
    }
}
