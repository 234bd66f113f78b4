/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Slot-to-index mapping and I/O offset computation
//!
//! Every lowered I/O access ends up as `stride * mapped + stride * offset +
//! component * component_stride` relative to some outer base.  Linked
//! shaders pack the layout densely by taking the prefix sum of the mask of
//! slots the consumer actually reads.  Unlinked shaders cannot know that
//! mask, so the driver supplies a fixed mapping instead.

use crate::util::BitMask;
use crate::vtg_ir::*;

/// Maps a varying slot to a compact index in a record layout
pub trait LocationMapper {
    fn map_location(&self, slot: u32, mask: u64) -> u32;

    /// Maps a per-patch slot.  Tess levels come first, followed by the
    /// generic per-patch slots.
    fn map_patch_location(&self, slot: u32, tf_mask: u64, patch_mask: u32) -> u32 {
        if is_tess_level_slot(slot) {
            prefix_sum_location(slot, tf_mask)
        } else {
            assert!(is_patch_slot(slot));
            let patch_slot = slot - VARYING_SLOT_PATCH0;
            tf_mask.count_ones()
                + prefix_sum_location(patch_slot, patch_mask.into())
        }
    }
}

/// Returns the number of slots in `mask` below `slot`
///
/// The slot must be present in the mask.
pub fn prefix_sum_location(slot: u32, mask: u64) -> u32 {
    assert!(mask.has_bit(slot), "Slot {} is not in {:#x}", slot, mask);
    mask.count_below(slot)
}

/// Mapping for linked shaders where the consumer's reads are known
pub struct PrefixSumMapper;

impl LocationMapper for PrefixSumMapper {
    fn map_location(&self, slot: u32, mask: u64) -> u32 {
        prefix_sum_location(slot, mask)
    }
}

/// Mapping supplied by the driver for unlinked shaders
pub struct DriverMapper<F: Fn(u32) -> u32> {
    map: F,
}

impl<F: Fn(u32) -> u32> DriverMapper<F> {
    pub fn new(map: F) -> Self {
        DriverMapper { map: map }
    }
}

impl<F: Fn(u32) -> u32> LocationMapper for DriverMapper<F> {
    fn map_location(&self, slot: u32, _mask: u64) -> u32 {
        (self.map)(slot)
    }

    fn map_patch_location(&self, slot: u32, _tf: u64, _patch: u32) -> u32 {
        (self.map)(slot)
    }
}

/// Maps `slot` with an optional driver callback, falling back to the
/// prefix sum over `mask`
pub fn map_io_location(
    slot: u32,
    mask: u64,
    driver: Option<&dyn Fn(u32) -> u32>,
) -> u32 {
    match driver {
        Some(map) => map(slot),
        None => prefix_sum_location(slot, mask),
    }
}

/// Constant form of [`calc_io_offset`]
///
/// Overflow is a contract violation and panics rather than wrapping.
pub fn calc_offset(
    base_stride: u32,
    component_stride: u32,
    mapped: u32,
    component: u32,
    array_index: u32,
) -> u32 {
    let base = base_stride.checked_mul(mapped);
    let offset = base_stride.checked_mul(array_index);
    let comp = component.checked_mul(component_stride);
    base.zip(offset)
        .and_then(|(b, o)| b.checked_add(o))
        .zip(comp)
        .and_then(|(bo, c)| bo.checked_add(c))
        .expect("I/O offset overflows")
}

/// Emits the offset of an I/O intrinsic relative to its record base
pub fn calc_io_offset(
    b: &mut impl SSABuilder,
    intrin: &OpIntrinsic,
    base_stride: Src,
    component_stride: u32,
    mapped: u32,
) -> Src {
    let base_op = b.imul_imm(base_stride, mapped);
    let offset_op = b.imul(base_stride, *intrin.io_offset_src());
    let const_op = u32::from(intrin.idx.component) * component_stride;
    let off = b.iadd_nuw(base_op, offset_op);
    b.iadd_nuw(off, Src::new_imm_u32(const_op))
}

/// Stores a possibly 16-bit value into 32-bit I/O slots
///
/// 32-bit and wider values go out in one store with the original write
/// mask.  Narrower values are stored one component at a time at their byte
/// position within the slot, with the high half at +2.
pub fn store_io<B: SSABuilder>(
    b: &mut B,
    value: Src,
    const_offset: u32,
    write_mask: u8,
    high_16bits: bool,
    mut store: impl FnMut(&mut B, Src, u8, u32),
) {
    if value.bit_size() >= 32 {
        store(b, value, write_mask, const_offset);
    } else {
        for c in write_mask.iter_set_bits() {
            let comp = b.channel(value, c.try_into().unwrap());
            let off = const_offset + c * 4 + if high_16bits { 2 } else { 0 };
            store(b, comp, 0x1, off);
        }
    }
}

/// Loads a possibly 16-bit value from 32-bit I/O slots
pub fn load_io<B: SSABuilder>(
    b: &mut B,
    comps: u8,
    bit_size: u8,
    high_16bits: bool,
    load: impl FnOnce(&mut B, u8, u8) -> Src,
) -> Src {
    let load_bit_size = bit_size.max(32);
    let val = load(b, comps, load_bit_size);
    if bit_size >= load_bit_size {
        return val;
    }

    let mut unpacked = Vec::new();
    for c in 0..comps {
        let dw = b.channel(val, c);
        unpacked.push(if high_16bits {
            b.unpack_32_2x16_split_y(dw)
        } else {
            b.unpack_32_2x16_split_x(dw)
        });
    }
    b.vec(&unpacked)
}
