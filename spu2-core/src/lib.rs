//! Emulation of the PS2 sound processor (SPU2)
//!
//! [`Spu2`] owns both cores and the 2MB of sound RAM. The embedder drives it with
//! [`Spu2::advance`] and services register and DMA traffic through the other entry points; mixed
//! samples and interrupts come back out through the [`AudioOutput`] and [`InterruptHandler`]
//! traits.

pub mod api;
mod boxedarray;
pub mod config;
mod memory;
mod num;
mod spu2;

pub use api::{AudioOutput, InterruptHandler, InterruptKind, Spu2Error, Spu2Result};
pub use config::{HardwareProfile, InterpolationMode, SilentVoicePolicy, Spu2Config};
pub use spu2::{Spu2, Spu2State};
