//! SPU2 ADPCM decoding
//!
//! Each 8-halfword ADPCM block contains 28 compressed PCM samples.
//!
//! The first halfword is the block header: the low byte holds the shift (bits 0-3) and the filter
//! (bits 4-7), and the high byte holds the loop flags. The remaining 7 halfwords contain 4-bit
//! ADPCM sample values, lowest nibble first.

use crate::memory::{SoundRam, DYNAMIC_REGION_END, RAM_MASK, RAM_WORDS};
use crate::num::I32Ext;
use bincode::{Decode, Encode};
use std::collections::TryReserveError;

pub const SAMPLES_PER_BLOCK: usize = 28;

const FILTER_0_TABLE: [i32; 5] = [0, 60, 115, 98, 122];
const FILTER_1_TABLE: [i32; 5] = [0, 0, -52, -55, -60];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct BlockFlags {
    pub loop_end: bool,
    pub loop_repeat: bool,
    pub loop_start: bool,
}

impl BlockFlags {
    pub fn from_header(header: u16) -> Self {
        Self {
            loop_end: header & (1 << 8) != 0,
            loop_repeat: header & (1 << 9) != 0,
            loop_start: header & (1 << 10) != 0,
        }
    }
}

/// The two most recently decoded samples, which seed the prediction filter for the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct AdpcmHistory {
    pub prev1: i32,
    pub prev2: i32,
}

pub fn decode_block(
    block: &[u16; 8],
    history: &mut AdpcmHistory,
    out: &mut [i16; SAMPLES_PER_BLOCK],
) {
    let header = block[0];
    let shift = u32::from(header & 0xF) + 16;

    let mut filter = usize::from((header >> 4) & 0xF);
    if filter > 4 {
        log::warn!("Invalid ADPCM filter value, using 4 instead: {filter}");
        filter = 4;
    }
    let filter_0 = FILTER_0_TABLE[filter];
    let filter_1 = FILTER_1_TABLE[filter];

    for (sample_idx, sample) in out.iter_mut().enumerate() {
        let word = block[1 + sample_idx / 4];
        let nibble = (word >> (4 * (sample_idx % 4))) & 0xF;

        // Place the nibble in the top 4 bits so the arithmetic shift sign extends it
        let data = ((u32::from(nibble) << 28) as i32) >> shift;
        let prediction = (filter_0 * history.prev1 + filter_1 * history.prev2 + 32) >> 6;
        let pcm = (data + prediction).clamp_to_i16();

        *sample = pcm;
        history.prev2 = history.prev1;
        history.prev1 = pcm.into();
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    valid: bool,
    seed: AdpcmHistory,
    samples: [i16; SAMPLES_PER_BLOCK],
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self { valid: false, seed: AdpcmHistory::default(), samples: [0; SAMPLES_PER_BLOCK] }
    }
}

/// Decoded-block cache with one entry per 8-halfword block of sound RAM.
///
/// An entry remembers the history it was decoded with and only hits when decoding from that same
/// history. Blocks in the dynamic region are always decoded fresh.
///
/// The default cache has no storage and never hits; [`AdpcmCache::try_new`] allocates the table.
#[derive(Debug, Clone, Default)]
pub struct AdpcmCache {
    entries: Vec<CacheEntry>,
}

impl AdpcmCache {
    pub const ENTRIES: usize = RAM_WORDS / 8;

    pub fn try_new() -> Result<Self, TryReserveError> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(Self::ENTRIES)?;
        entries.resize(Self::ENTRIES, CacheEntry::default());
        Ok(Self { entries })
    }

    pub fn decode(
        &mut self,
        ram: &SoundRam,
        block_address: u32,
        history: &mut AdpcmHistory,
        out: &mut [i16; SAMPLES_PER_BLOCK],
    ) {
        let block_address = block_address & RAM_MASK & !7;
        let idx = (block_address / 8) as usize;

        let hit = self.entries.get(idx).filter(|entry| entry.valid && entry.seed == *history);
        if let Some(entry) = hit {
            *out = entry.samples;
            history.prev1 = entry.samples[27].into();
            history.prev2 = entry.samples[26].into();
            return;
        }

        let seed = *history;
        decode_block(&ram.block(block_address), history, out);

        if block_address >= DYNAMIC_REGION_END {
            if let Some(entry) = self.entries.get_mut(idx) {
                *entry = CacheEntry { valid: true, seed, samples: *out };
            }
        }
    }

    /// Invalidate every block overlapping the word range `[start, end)`.
    pub fn invalidate_range(&mut self, start: u32, end: u32) {
        if start >= end {
            return;
        }

        let first = (start / 8) as usize;
        let last = (((end - 1) / 8) as usize).min(self.entries.len().saturating_sub(1));
        for entry in self.entries.iter_mut().take(last + 1).skip(first) {
            entry.valid = false;
        }
    }

    pub fn invalidate_address(&mut self, address: u32) {
        let address = address & RAM_MASK;
        self.invalidate_range(address, address + 1);
    }

    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            entry.valid = false;
        }
    }

    #[cfg(test)]
    pub(crate) fn is_valid(&self, block_address: u32) -> bool {
        self.entries
            .get(((block_address & RAM_MASK) / 8) as usize)
            .is_some_and(|entry| entry.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_block() -> [u16; 8] {
        let mut block: [u16; 8] = rand::random();
        // Valid filter 0-4, any shift
        block[0] = (block[0] & 0xFF0F) | ((rand::random::<u16>() % 5) << 4);
        block
    }

    #[test]
    fn filter_0_shift_0_is_nibble_times_4096() {
        let block = [0x0000, 0x7F18, 0, 0, 0, 0, 0, 0];
        let mut history = AdpcmHistory::default();
        let mut out = [0; SAMPLES_PER_BLOCK];
        decode_block(&block, &mut history, &mut out);

        assert_eq!(&out[..4], &[-0x8000, 0x1000, -0x1000, 0x7000]);
        assert!(out[4..].iter().all(|&sample| sample == 0));
        assert_eq!(history, AdpcmHistory::default());
    }

    #[test]
    fn prediction_filter_uses_history() {
        // Filter 1, shift 12: data is nibble, prediction is (60 * prev1 + 32) >> 6
        let block = [0x001C, 0x0001, 0, 0, 0, 0, 0, 0];
        let mut history = AdpcmHistory { prev1: 640, prev2: -5 };
        let mut out = [0; SAMPLES_PER_BLOCK];
        decode_block(&block, &mut history, &mut out);

        assert_eq!(out[0], 1 + 600);
        assert_eq!(out[1], ((60 * 601 + 32) >> 6) as i16);
        assert_eq!(history.prev1, out[27].into());
        assert_eq!(history.prev2, out[26].into());
    }

    #[test]
    fn invalid_filter_clamped() {
        let mut history_a = AdpcmHistory { prev1: 1000, prev2: 2000 };
        let mut history_b = history_a;
        let mut out_a = [0; SAMPLES_PER_BLOCK];
        let mut out_b = [0; SAMPLES_PER_BLOCK];

        decode_block(&[0x00F4, 0x1234, 0, 0, 0, 0, 0, 0], &mut history_a, &mut out_a);
        decode_block(&[0x0044, 0x1234, 0, 0, 0, 0, 0, 0], &mut history_b, &mut out_b);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn decode_is_deterministic() {
        for _ in 0..100 {
            let block = random_block();
            let seed = AdpcmHistory {
                prev1: rand::random::<i16>().into(),
                prev2: rand::random::<i16>().into(),
            };

            let (mut history_a, mut history_b) = (seed, seed);
            let mut out_a = [0; SAMPLES_PER_BLOCK];
            let mut out_b = [0; SAMPLES_PER_BLOCK];
            decode_block(&block, &mut history_a, &mut out_a);
            decode_block(&block, &mut history_b, &mut out_b);

            assert_eq!(out_a, out_b);
            assert_eq!(history_a, history_b);
        }
    }

    #[test]
    fn cached_decode_matches_fresh_decode() {
        let mut ram = SoundRam::try_new().unwrap();
        let mut cache = AdpcmCache::try_new().unwrap();
        let address = 0x4000;

        let block = random_block();
        ram.copy_in(address, &block);

        for _ in 0..200 {
            // Small seed pool so that hits actually happen
            let seed = AdpcmHistory {
                prev1: i32::from(rand::random::<i16>() % 4),
                prev2: i32::from(rand::random::<i16>() % 4),
            };

            let mut cached_history = seed;
            let mut cached = [0; SAMPLES_PER_BLOCK];
            cache.decode(&ram, address, &mut cached_history, &mut cached);

            let mut fresh_history = seed;
            let mut fresh = [0; SAMPLES_PER_BLOCK];
            decode_block(&block, &mut fresh_history, &mut fresh);

            assert_eq!(cached, fresh);
            assert_eq!(cached_history, fresh_history);
        }

        assert!(cache.is_valid(address));
    }

    #[test]
    fn dynamic_region_never_cached() {
        let ram = SoundRam::try_new().unwrap();
        let mut cache = AdpcmCache::try_new().unwrap();
        let mut out = [0; SAMPLES_PER_BLOCK];

        cache.decode(&ram, DYNAMIC_REGION_END - 8, &mut AdpcmHistory::default(), &mut out);
        assert!(!cache.is_valid(DYNAMIC_REGION_END - 8));

        cache.decode(&ram, DYNAMIC_REGION_END, &mut AdpcmHistory::default(), &mut out);
        assert!(cache.is_valid(DYNAMIC_REGION_END));
    }

    #[test]
    fn invalidate_range_covers_partial_blocks() {
        let ram = SoundRam::try_new().unwrap();
        let mut cache = AdpcmCache::try_new().unwrap();
        let mut out = [0; SAMPLES_PER_BLOCK];

        for address in [0x3000, 0x3008, 0x3010, 0x3018] {
            cache.decode(&ram, address, &mut AdpcmHistory::default(), &mut out);
        }

        cache.invalidate_range(0x300F, 0x3011);
        assert!(cache.is_valid(0x3000));
        assert!(!cache.is_valid(0x3008));
        assert!(!cache.is_valid(0x3010));
        assert!(cache.is_valid(0x3018));
    }

    #[test]
    fn unallocated_cache_always_decodes() {
        let mut ram = SoundRam::try_new().unwrap();
        ram.copy_in(0x5000, &[0x0000, 0x0007, 0, 0, 0, 0, 0, 0]);

        let mut cache = AdpcmCache::default();
        let mut out = [0; SAMPLES_PER_BLOCK];
        cache.decode(&ram, 0x5000, &mut AdpcmHistory::default(), &mut out);
        assert_eq!(out[0], 0x7000);
        assert!(!cache.is_valid(0x5000));
    }
}
