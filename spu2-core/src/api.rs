use std::convert::Infallible;
use thiserror::Error;

/// Sink for the mixed output, one stereo sample per tick.
pub trait AudioOutput {
    type Err;

    /// Queue a sample. Called from inside the tick loop, so this must not block and must not call
    /// back into the sound unit.
    ///
    /// # Errors
    ///
    /// Any error is propagated out of the current [`Spu2::advance`](crate::Spu2::advance) call.
    fn queue_sample(&mut self, sample: (i16, i16)) -> Result<(), Self::Err>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// A sound RAM access matched the core's IRQ address.
    MemoryAccess,
    /// A DMA transfer on the core finished (or an auto-DMA stream is about to run dry).
    DmaComplete,
}

pub trait InterruptHandler {
    fn raise(&mut self, core: usize, kind: InterruptKind);
}

#[derive(Debug, Error)]
pub enum Spu2Error<AudioErr = Infallible> {
    #[error("Unable to allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },
    #[error("Audio output error: {0}")]
    AudioOutput(AudioErr),
    #[error("Error encoding save state: {0}")]
    SaveStateEncode(#[from] bincode::error::EncodeError),
    #[error("Error decoding save state: {0}")]
    SaveStateDecode(#[from] bincode::error::DecodeError),
    #[error("Save state {field} mismatch; expected {expected:X}, was {actual:X}")]
    SaveStateMismatch { field: &'static str, expected: u32, actual: u32 },
}

pub type Spu2Result<T, AudioErr = Infallible> = Result<T, Spu2Error<AudioErr>>;
