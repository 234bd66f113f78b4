/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use thiserror::Error;

/// Hardware generations with distinct vertex-pipeline behavior
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum GfxLevel {
    Gfx6,
    Gfx7,
    Gfx8,
    Gfx9,
    Gfx10,
    Gfx10_3,
    Gfx11,
    Gfx12,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("unsupported wave size {0}, expected 32 or 64")]
    InvalidWaveSize(u32),
    #[error("wave size {wave_size} is not supported on {gfx_level:?}")]
    WaveSizeUnsupported {
        gfx_level: GfxLevel,
        wave_size: u32,
    },
}

/// Per-generation decisions, resolved once per compile
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HardwareProfile {
    pub gfx_level: GfxLevel,
    pub wave_size: u32,
}

impl HardwareProfile {
    pub fn new(
        gfx_level: GfxLevel,
        wave_size: u32,
    ) -> Result<HardwareProfile, ConfigError> {
        if wave_size != 32 && wave_size != 64 {
            return Err(ConfigError::InvalidWaveSize(wave_size));
        }
        if wave_size == 32 && gfx_level < GfxLevel::Gfx10 {
            return Err(ConfigError::WaveSizeUnsupported {
                gfx_level: gfx_level,
                wave_size: wave_size,
            });
        }
        Ok(HardwareProfile {
            gfx_level: gfx_level,
            wave_size: wave_size,
        })
    }

    /// Only GFX10 needs the valid-mask bit on the first position export
    pub fn pos0_needs_valid_mask(&self) -> bool {
        self.gfx_level == GfxLevel::Gfx10
    }

    /// The viewport index shares the layer channel in the misc export
    pub fn viewport_in_layer_export(&self) -> bool {
        self.gfx_level >= GfxLevel::Gfx9
    }

    pub fn needs_release_before_final_export(&self) -> bool {
        self.gfx_level >= GfxLevel::Gfx10
    }

    /// Byte offset of the first tess factor after the dynamic control word
    pub fn tess_factor_ring_const_offset(&self) -> u32 {
        if self.stores_dynamic_hs_control_word() {
            4
        } else {
            0
        }
    }

    pub fn stores_dynamic_hs_control_word(&self) -> bool {
        self.gfx_level <= GfxLevel::Gfx8
    }

    /// Whether a whole output patch lives in a single wave so barriers
    /// between its invocations can narrow to subgroup scope
    pub fn tcs_out_patch_fits_subgroup(&self, tcs_vertices_out: u32) -> bool {
        tcs_vertices_out != 0 && self.wave_size % tcs_vertices_out == 0
    }
}
