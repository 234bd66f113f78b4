/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::vtg_ir::ShaderInfo;

pub const VARYING_SLOT_POS: u32 = 0;
pub const VARYING_SLOT_COL0: u32 = 1;
pub const VARYING_SLOT_COL1: u32 = 2;
pub const VARYING_SLOT_FOGC: u32 = 3;
pub const VARYING_SLOT_TEX0: u32 = 4;
pub const VARYING_SLOT_PSIZ: u32 = 12;
pub const VARYING_SLOT_BFC0: u32 = 13;
pub const VARYING_SLOT_BFC1: u32 = 14;
pub const VARYING_SLOT_EDGE: u32 = 15;
pub const VARYING_SLOT_CLIP_VERTEX: u32 = 16;
pub const VARYING_SLOT_CLIP_DIST0: u32 = 17;
pub const VARYING_SLOT_CLIP_DIST1: u32 = 18;
pub const VARYING_SLOT_CULL_DIST0: u32 = 19;
pub const VARYING_SLOT_CULL_DIST1: u32 = 20;
pub const VARYING_SLOT_PRIMITIVE_ID: u32 = 21;
pub const VARYING_SLOT_LAYER: u32 = 22;
pub const VARYING_SLOT_VIEWPORT: u32 = 23;
pub const VARYING_SLOT_FACE: u32 = 24;
/// Shares a location with FACE, which is fragment-only
pub const VARYING_SLOT_PRIMITIVE_SHADING_RATE: u32 = 24;
pub const VARYING_SLOT_TESS_LEVEL_OUTER: u32 = 26;
pub const VARYING_SLOT_TESS_LEVEL_INNER: u32 = 27;
pub const VARYING_SLOT_VAR0: u32 = 32;
pub const VARYING_SLOT_MAX: u32 = 64;
pub const VARYING_SLOT_PATCH0: u32 = 64;
pub const VARYING_SLOT_VAR0_16BIT: u32 = 96;
pub const VARYING_SLOT_16BIT_COUNT: u32 = 16;

pub const TESS_LEVEL_MASK: u64 = (1 << VARYING_SLOT_TESS_LEVEL_OUTER)
    | (1 << VARYING_SLOT_TESS_LEVEL_INNER);

pub fn slot_bit(slot: u32) -> u64 {
    assert!(slot < VARYING_SLOT_MAX);
    1_u64 << slot
}

pub fn is_patch_slot(slot: u32) -> bool {
    (VARYING_SLOT_PATCH0..VARYING_SLOT_VAR0_16BIT).contains(&slot)
}

pub fn is_16bit_slot(slot: u32) -> bool {
    (VARYING_SLOT_VAR0_16BIT
        ..VARYING_SLOT_VAR0_16BIT + VARYING_SLOT_16BIT_COUNT)
        .contains(&slot)
}

pub fn is_tess_level_slot(slot: u32) -> bool {
    slot == VARYING_SLOT_TESS_LEVEL_OUTER
        || slot == VARYING_SLOT_TESS_LEVEL_INNER
}

/// Index of a dedicated 16-bit slot in the 16-bit masks
pub fn index_16bit(slot: u32) -> u32 {
    assert!(is_16bit_slot(slot));
    slot - VARYING_SLOT_VAR0_16BIT
}

/// Legacy color outputs which are clamped when vertex color clamping is on
pub fn is_color_slot(slot: u32) -> bool {
    matches!(
        slot,
        VARYING_SLOT_COL0
            | VARYING_SLOT_COL1
            | VARYING_SLOT_BFC0
            | VARYING_SLOT_BFC1
    )
}

/// Which outputs a stage writes and reads
///
/// This is computed once when a pass starts and threaded explicitly through
/// its helpers.  Passes that add or drop outputs derive a new value rather
/// than mutating the one they were handed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IoLiveness {
    pub outputs_written: u64,
    pub outputs_written_16bit: u16,
    pub outputs_read: u64,
    pub patch_outputs_written: u32,
    pub patch_outputs_read: u32,
}

impl IoLiveness {
    pub fn from_info(info: &ShaderInfo) -> IoLiveness {
        IoLiveness {
            outputs_written: info.outputs_written,
            outputs_written_16bit: info.outputs_written_16bit,
            outputs_read: info.outputs_read,
            patch_outputs_written: info.patch_outputs_written,
            patch_outputs_read: info.patch_outputs_read,
        }
    }

    pub fn writes(&self, slot: u32) -> bool {
        if is_16bit_slot(slot) {
            self.outputs_written_16bit & (1 << index_16bit(slot)) != 0
        } else if is_patch_slot(slot) {
            self.patch_outputs_written & (1 << (slot - VARYING_SLOT_PATCH0))
                != 0
        } else {
            self.outputs_written & slot_bit(slot) != 0
        }
    }

    pub fn with_output(self, slot: u32) -> IoLiveness {
        IoLiveness {
            outputs_written: self.outputs_written | slot_bit(slot),
            ..self
        }
    }

    pub fn without_outputs(self, mask: u64) -> IoLiveness {
        IoLiveness {
            outputs_written: self.outputs_written & !mask,
            ..self
        }
    }

    pub fn apply_to(&self, info: &mut ShaderInfo) {
        info.outputs_written = self.outputs_written;
        info.outputs_written_16bit = self.outputs_written_16bit;
        info.outputs_read = self.outputs_read;
        info.patch_outputs_written = self.patch_outputs_written;
        info.patch_outputs_read = self.patch_outputs_read;
    }
}
