//! A heap-allocated fixed-size array with a `bincode::Decode` implementation
//! that fills the heap allocation in place.
//!
//! The derived `Decode` for `Box<[T; LEN]>` materializes the array on the
//! stack before boxing it, which blows the stack for the memory-sized arrays
//! used here (128KB WRAM, 64KB ARAM, 32K-word VRAM).

use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Encode)]
pub struct BoxedArray<T, const LEN: usize>(Box<[T; LEN]>);

impl<T: Default + Copy, const LEN: usize> BoxedArray<T, LEN> {
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn new() -> Self {
        Self(vec![T::default(); LEN].into_boxed_slice().try_into().unwrap_or_else(|_| unreachable!()))
    }
}

impl<T: Default + Copy, const LEN: usize> Default for BoxedArray<T, LEN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const LEN: usize> From<Box<[T; LEN]>> for BoxedArray<T, LEN> {
    fn from(value: Box<[T; LEN]>) -> Self {
        Self(value)
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

impl<T, Context, const LEN: usize> Decode<Context> for BoxedArray<T, LEN>
where
    T: Default + Copy + Decode<Context>,
{
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let mut array = Self::new();
        for value in array.iter_mut() {
            *value = T::decode(decoder)?;
        }
        Ok(array)
    }
}

impl<'de, T, Context, const LEN: usize> BorrowDecode<'de, Context> for BoxedArray<T, LEN>
where
    T: Default + Copy + Decode<Context>,
{
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Self::decode(decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut array: BoxedArray<u16, 64> = BoxedArray::new();
        for (i, value) in array.iter_mut().enumerate() {
            *value = (i as u16) * 3;
        }

        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&array, config).unwrap();
        let (decoded, _): (BoxedArray<u16, 64>, usize) =
            bincode::decode_from_slice(&bytes, config).unwrap();

        assert_eq!(*array, *decoded);
    }
}
