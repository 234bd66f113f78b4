/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::dump_after_pass;
use crate::vtg_export::*;
use crate::vtg_hw::HardwareProfile;
use crate::vtg_ir::*;
use crate::vtg_prerast_out::{gather_outputs, PrerastOutputs};
use crate::vtg_streamout::emit_streamout;

use log::debug;

/// How the last pre-rasterization stage exports its outputs
#[derive(Clone, Debug)]
pub struct LegacyExportOptions {
    pub clip_cull_mask: u8,
    pub param_offsets: [u8; PARAM_OFFSETS_LEN],
    pub has_param_exports: bool,
    pub disable_streamout: bool,
    pub kill_pointsize: bool,
    pub kill_layer: bool,
    pub force_vrs: bool,
}

impl Default for LegacyExportOptions {
    fn default() -> Self {
        LegacyExportOptions {
            clip_cull_mask: 0,
            param_offsets: [PARAM_OFFSET_31 + 1; PARAM_OFFSETS_LEN],
            has_param_exports: false,
            disable_streamout: false,
            kill_pointsize: false,
            kill_layer: false,
            force_vrs: false,
        }
    }
}

/// Emits the final position and parameter exports of a hardware VS
pub fn export_vs_outputs(
    b: &mut impl SSABuilder,
    hw: &HardwareProfile,
    opts: &LegacyExportOptions,
    live: &IoLiveness,
    writes_memory: bool,
    out: &PrerastOutputs,
) {
    let mut export_outputs = live.outputs_written | slot_bit(VARYING_SLOT_POS);
    if opts.kill_pointsize {
        export_outputs &= !slot_bit(VARYING_SLOT_PSIZ);
    }
    if opts.kill_layer {
        export_outputs &= !slot_bit(VARYING_SLOT_LAYER);
    }

    let pos_opts = PosExportOptions {
        clip_cull_mask: opts.clip_cull_mask,
        no_param_export: !opts.has_param_exports,
        force_vrs: opts.force_vrs,
        done: true,
        writes_memory: writes_memory,
    };
    export_position(b, hw, &pos_opts, export_outputs, out);

    if opts.has_param_exports {
        export_parameters(
            b,
            &opts.param_offsets,
            live.outputs_written,
            live.outputs_written_16bit,
            out,
        );
    }
}

/// Lowers the outputs of a VS or TES running as a hardware VS
///
/// If `export_primitive_id` is set, the primitive ID becomes an extra
/// output since the fragment shader may read it.
pub fn lower_legacy_vs(
    s: &mut Shader,
    hw: &HardwareProfile,
    opts: &LegacyExportOptions,
    export_primitive_id: bool,
) {
    let mut out = gather_outputs(s, None);
    let mut live = IoLiveness::from_info(&s.info);
    let writes_memory = s.info.writes_memory;
    let xfb = if opts.disable_streamout {
        None
    } else {
        s.xfb.clone()
    };

    s.func.build_at_end(|b| {
        if export_primitive_id {
            let prim_id = b.sysval(Intrinsic::LoadPrimitiveId);
            out.set_u32(VARYING_SLOT_PRIMITIVE_ID, 0, prim_id);
            live = live.with_output(VARYING_SLOT_PRIMITIVE_ID);
        }

        if let Some(xfb) = &xfb {
            emit_streamout(b, 0, xfb, &out);
        }

        export_vs_outputs(b, hw, opts, &live, writes_memory, &out);
    });

    live.apply_to(&mut s.info);

    debug!(
        "{}: legacy VS exports {:#x}, streamout {}",
        s.name,
        live.outputs_written,
        xfb.is_some()
    );
    dump_after_pass("lower_legacy_vs", s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtg_hw::GfxLevel;
    use crate::vtg_interp::Interp;
    use crate::vtg_prerast_out::build_store_output;

    fn vs_shader() -> Shader {
        let mut s = Shader::new(ShaderStage::Vertex, "vs");
        s.info.outputs_written = slot_bit(VARYING_SLOT_POS)
            | slot_bit(VARYING_SLOT_PSIZ)
            | slot_bit(VARYING_SLOT_VAR0);
        s.func.build_at_end(|b| {
            let one = Src::new_imm_f32(1.0);
            let two = Src::new_imm_f32(2.0);
            let pos = b.vec(&[one, two]);
            build_store_output(
                b,
                pos,
                VARYING_SLOT_POS,
                0,
                AluType::FLOAT32,
                false,
                0,
            );
            build_store_output(
                b,
                Src::new_imm_f32(8.0),
                VARYING_SLOT_PSIZ,
                0,
                AluType::FLOAT32,
                false,
                0,
            );
            build_store_output(
                b,
                two,
                VARYING_SLOT_VAR0,
                3,
                AluType::FLOAT32,
                false,
                0,
            );
        });
        s
    }

    #[test]
    fn test_legacy_vs_exports() {
        let hw = HardwareProfile::new(GfxLevel::Gfx9, 64).unwrap();
        let mut opts = LegacyExportOptions {
            has_param_exports: true,
            ..Default::default()
        };
        opts.param_offsets[VARYING_SLOT_VAR0 as usize] = 0;
        opts.param_offsets[VARYING_SLOT_PRIMITIVE_ID as usize] = 1;

        let mut s = vs_shader();
        lower_legacy_vs(&mut s, &hw, &opts, true);
        assert!(!s.has_intrinsic(Intrinsic::StoreOutput));
        assert!(s.info.outputs_written & slot_bit(VARYING_SLOT_PRIMITIVE_ID) != 0);

        let mut interp = Interp::new();
        interp.set_sysval(Intrinsic::LoadPrimitiveId, &[9]);
        interp.run(&s.func);

        let bases: Vec<i32> = interp.exports.iter().map(|e| e.base).collect();
        /* Parameters go out in slot order */
        assert_eq!(bases, [EXP_POS, EXP_POS + 1, EXP_PARAM + 1, EXP_PARAM]);

        let pos = &interp.exports[0];
        assert_eq!((pos.f32(0), pos.f32(1), pos.f32(3)), (1.0, 2.0, 1.0));
        assert_eq!(interp.exports[1].f32(0), 8.0);
        assert!(interp.exports[1].flags.contains(ExportFlags::DONE));
        assert_eq!(interp.exports[2].values[0], 9);
        assert_eq!(interp.exports[3].write_mask, 0x8);
        assert_eq!(interp.exports[3].f32(3), 2.0);
    }

    #[test]
    fn test_kill_pointsize() {
        let hw = HardwareProfile::new(GfxLevel::Gfx9, 64).unwrap();
        let opts = LegacyExportOptions {
            kill_pointsize: true,
            ..Default::default()
        };
        let mut s = vs_shader();
        lower_legacy_vs(&mut s, &hw, &opts, false);

        let mut interp = Interp::new();
        interp.run(&s.func);
        assert_eq!(interp.exports.len(), 1);
        assert!(interp.exports[0].flags.contains(ExportFlags::DONE));
    }
}
