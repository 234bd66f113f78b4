/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

/// Bit-mask helpers for slot and component masks
///
/// Liveness masks are plain integers of a few different widths so these are
/// implemented for every unsigned type through a macro.
pub trait BitMask: Copy {
    /// Number of set bits strictly below `bit`
    fn count_below(&self, bit: u32) -> u32;

    fn has_bit(&self, bit: u32) -> bool;

    fn iter_set_bits(&self) -> SetBits;

    /// Index of the highest set bit plus one, or zero for an empty mask
    fn last_bit(&self) -> u32;
}

pub struct SetBits {
    bits: u128,
}

impl Iterator for SetBits {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.bits == 0 {
            None
        } else {
            let b = self.bits.trailing_zeros();
            self.bits &= self.bits - 1;
            Some(b)
        }
    }
}

macro_rules! impl_uint_bit_mask {
    ($ty: ty) => {
        impl BitMask for $ty {
            fn count_below(&self, bit: u32) -> u32 {
                if bit >= <$ty>::BITS {
                    self.count_ones()
                } else {
                    (*self & ((1 as $ty) << bit).wrapping_sub(1)).count_ones()
                }
            }

            fn has_bit(&self, bit: u32) -> bool {
                bit < <$ty>::BITS && (*self >> bit) & 1 != 0
            }

            fn iter_set_bits(&self) -> SetBits {
                SetBits {
                    bits: (*self).into(),
                }
            }

            fn last_bit(&self) -> u32 {
                <$ty>::BITS - self.leading_zeros()
            }
        }
    };
}

impl_uint_bit_mask!(u8);
impl_uint_bit_mask!(u16);
impl_uint_bit_mask!(u32);
impl_uint_bit_mask!(u64);
