//! Heap-allocated fixed-size array
//!
//! Sound RAM is 2MB, which is too large to build on the stack, so this wrapper always allocates
//! directly on the heap. Allocation is fallible so that the embedder can be told about a failure
//! at startup instead of aborting.
//!
//! The bincode implementations write halfwords as raw little-endian bytes, which keeps sound RAM
//! at a fixed 2MB in save states and lets decoding go straight into heap memory.

use bincode::de::read::Reader;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::write::Writer;
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use std::collections::TryReserveError;
use std::ops::{Deref, DerefMut};

#[repr(transparent)]
#[derive(Debug, Clone)]
pub struct BoxedArray<T, const LEN: usize>(Box<[T; LEN]>);

impl<T: Copy + Default, const LEN: usize> BoxedArray<T, LEN> {
    pub fn try_new() -> Result<Self, TryReserveError> {
        let mut values = Vec::new();
        values.try_reserve_exact(LEN)?;
        values.resize(LEN, T::default());

        match values.into_boxed_slice().try_into() {
            Ok(array) => Ok(Self(array)),
            Err(_) => unreachable!("vec was resized to exactly LEN elements"),
        }
    }
}

impl<T, const LEN: usize> Deref for BoxedArray<T, LEN> {
    type Target = [T; LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T, const LEN: usize> DerefMut for BoxedArray<T, LEN> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<const LEN: usize> Encode for BoxedArray<u16, LEN> {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        for halfword in self.0.iter() {
            encoder.writer().write(&halfword.to_le_bytes())?;
        }
        Ok(())
    }
}

fn decode_halfwords<R: Reader, const LEN: usize>(
    reader: &mut R,
) -> Result<BoxedArray<u16, LEN>, DecodeError> {
    let mut array = BoxedArray::<u16, LEN>::try_new().map_err(|err| {
        DecodeError::OtherString(format!("unable to allocate {LEN} halfwords: {err}"))
    })?;

    let mut bytes = [0; 2];
    for halfword in array.iter_mut() {
        reader.read(&mut bytes)?;
        *halfword = u16::from_le_bytes(bytes);
    }

    Ok(array)
}

impl<Context, const LEN: usize> Decode<Context> for BoxedArray<u16, LEN> {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        decode_halfwords(decoder.reader())
    }
}

impl<'de, Context, const LEN: usize> BorrowDecode<'de, Context> for BoxedArray<u16, LEN> {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        decode_halfwords(decoder.reader())
    }
}
