use bincode::{Decode, Encode};

#[derive(Debug, Clone, Encode, Decode)]
pub struct NoiseGenerator {
    lfsr: u16,
}

impl NoiseGenerator {
    const SEED: u16 = 0xC0FE;

    pub fn new() -> Self {
        Self { lfsr: Self::SEED }
    }

    // Advanced once per tick whether or not any voice is in noise mode
    pub fn clock(&mut self) {
        let feedback = self.lfsr ^ (self.lfsr << 3) ^ (self.lfsr << 4) ^ (self.lfsr << 5);
        self.lfsr = (self.lfsr << 1) | (feedback >> 15);
    }

    // Same scale as the interpolator output
    pub fn output(&self) -> i32 {
        i32::from(self.lfsr as i16) << 1
    }
}
