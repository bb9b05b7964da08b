//! Embedder-facing configuration

/// Clock domains the sound unit can be attached to.
///
/// Both profiles divide the external clock by the same tick interval; they only differ in which
/// console clock drives the unit and therefore in the output sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HardwareProfile {
    // 36.864 MHz IOP clock, 48000 Hz output
    #[default]
    Ps2,
    // 33.8688 MHz IOP clock, 44100 Hz output
    Ps1Compat,
}

impl HardwareProfile {
    pub const TICK_INTERVAL: u64 = 768;

    #[must_use]
    pub const fn clock_rate(self) -> u64 {
        match self {
            Self::Ps2 => 36_864_000,
            Self::Ps1Compat => 33_868_800,
        }
    }

    #[must_use]
    pub const fn sample_rate(self) -> u64 {
        self.clock_rate() / Self::TICK_INTERVAL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterpolationMode {
    Nearest,
    Linear,
    #[default]
    Cubic,
    Hermite,
    CatmullRom,
}

/// What to do with voices whose envelope has reached Off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SilentVoicePolicy {
    /// Keep advancing the decode pointer of every voice on every tick. Interrupts raised by the
    /// voice address reaching IRQA fire exactly as on hardware.
    #[default]
    AlwaysAdvance,
    /// Stop advancing a silent voice once it is parked in a block that loops onto itself with its
    /// ENDX bit set, unless either core's IRQA points into that block.
    SkipIdleLoops,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Spu2Config {
    pub profile: HardwareProfile,
    pub interpolation: InterpolationMode,
    pub silent_voices: SilentVoicePolicy,
    // Bypass the wet path entirely; reverb addressing still runs so that IRQs are not lost
    pub effects_disabled: bool,
}

/// Upper bound on how many ticks a single clock advance will run. Anything beyond this is
/// dropped rather than mixed.
pub const SANITY_TICK_LIMIT: u64 = 4800;
