/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Position, parameter and primitive exports

use crate::util::BitMask;
use crate::vtg_hw::HardwareProfile;
use crate::vtg_ir::*;
use crate::vtg_prerast_out::{OutputSlot, PrerastOutputs};

use log::debug;

pub const EXP_POS: i32 = 12;
pub const EXP_PRIM: i32 = 20;
pub const EXP_PARAM: i32 = 32;

/// Highest parameter offset which is actually exported.  Larger offsets
/// mark outputs which the fragment shader gets some other way.
pub const PARAM_OFFSET_31: u8 = 31;

/// Number of entries in a parameter offset table
pub const PARAM_OFFSETS_LEN: usize =
    (VARYING_SLOT_VAR0_16BIT + VARYING_SLOT_16BIT_COUNT) as usize;

const MISC_SLOTS: [u32; 5] = [
    VARYING_SLOT_PSIZ,
    VARYING_SLOT_EDGE,
    VARYING_SLOT_LAYER,
    VARYING_SLOT_VIEWPORT,
    VARYING_SLOT_PRIMITIVE_SHADING_RATE,
];

#[derive(Clone, Copy, Debug, Default)]
pub struct PosExportOptions {
    /// One bit per enabled clip or cull plane
    pub clip_cull_mask: u8,
    pub no_param_export: bool,
    pub force_vrs: bool,
    /// This is the last export of the shader
    pub done: bool,
    pub writes_memory: bool,
}

struct PendingExport {
    value: Src,
    base: i32,
    write_mask: u8,
    flags: ExportFlags,
}

/// Widens present components to 32 bits, leaving the rest undefined
fn export_output(b: &mut impl SSABuilder, comps: [Option<Src>; 4]) -> Src {
    let mut vec = Vec::new();
    for comp in comps {
        vec.push(match comp {
            Some(val) => b.u2u32(val),
            None => b.undef(1, 32),
        });
    }
    b.vec(&vec)
}

/// Position with unwritten components defaulting to (0, 0, 0, 1)
fn pos0_output(b: &mut impl SSABuilder, comps: [Option<Src>; 4]) -> Src {
    let mut vec = Vec::new();
    for (c, comp) in comps.into_iter().enumerate() {
        vec.push(match comp {
            Some(val) => b.u2u32(val),
            None => Src::new_imm_f32(if c == 3 { 1.0 } else { 0.0 }),
        });
    }
    b.vec(&vec)
}

pub fn export_primitive(b: &mut impl SSABuilder, prim: Src) {
    let write_mask = comp_mask(prim.comps());
    let prim = b.pad_vec4(prim);
    b.export_amd(prim, EXP_PRIM, write_mask, ExportFlags::DONE);
}

/// Emits the position exports and returns how many were emitted
///
/// Position always goes out first.  The misc export follows only if one of
/// its slots has a value or VRS is forced, and clip distances come last.
/// Export indices stay dense.
pub fn export_position(
    b: &mut impl SSABuilder,
    hw: &HardwareProfile,
    opts: &PosExportOptions,
    outputs_written: u64,
    outputs: &PrerastOutputs,
) -> u32 {
    let mut exps: Vec<PendingExport> = Vec::new();

    let pos_flags = if hw.pos0_needs_valid_mask() {
        ExportFlags::VALID_MASK
    } else {
        ExportFlags::empty()
    };
    let pos = pos0_output(b, outputs.slot_values(VARYING_SLOT_POS));
    exps.push(PendingExport {
        value: pos,
        base: EXP_POS,
        write_mask: 0xf,
        flags: pos_flags,
    });

    let mut outputs_written = outputs_written;
    for slot in MISC_SLOTS {
        if outputs.slot_value(slot, 0).is_none() {
            outputs_written &= !slot_bit(slot);
        }
    }
    let misc_written = |slot: u32| outputs_written & slot_bit(slot) != 0;
    let misc_value = |slot: u32| outputs.slot_value(slot, 0).unwrap();

    let has_misc = MISC_SLOTS.iter().any(|&slot| misc_written(slot));
    if has_misc || opts.force_vrs {
        let mut vec = [Src::new_imm_f32(0.0); 4];
        let mut write_mask = 0_u8;

        if misc_written(VARYING_SLOT_PSIZ) {
            vec[0] = misc_value(VARYING_SLOT_PSIZ);
            write_mask |= 1 << 0;
        }

        if misc_written(VARYING_SLOT_EDGE) {
            let edge = misc_value(VARYING_SLOT_EDGE);
            vec[1] = b.umin(edge, Src::new_imm_u32(1));
            write_mask |= 1 << 1;
        }

        let rates = if misc_written(VARYING_SLOT_PRIMITIVE_SHADING_RATE) {
            Some(misc_value(VARYING_SLOT_PRIMITIVE_SHADING_RATE))
        } else if opts.force_vrs {
            /* Coarse shading unless W is 1, as it is for most UI */
            let pos_w = match outputs.slot_value(VARYING_SLOT_POS, 3) {
                Some(w) => b.u2u32(w),
                None => Src::new_imm_f32(1.0),
            };
            let cond = b.fneu(pos_w, Src::new_imm_f32(1.0));
            let force = b.sysval(Intrinsic::LoadForceVrsRatesAmd);
            Some(b.bcsel(cond, force, Src::new_zero()))
        } else {
            None
        };

        if let Some(rates) = rates {
            vec[1] = b.ior(vec[1], rates);
            write_mask |= 1 << 1;
        }

        if misc_written(VARYING_SLOT_LAYER) {
            vec[2] = misc_value(VARYING_SLOT_LAYER);
            write_mask |= 1 << 2;
        }

        if misc_written(VARYING_SLOT_VIEWPORT) {
            let vp = misc_value(VARYING_SLOT_VIEWPORT);
            if hw.viewport_in_layer_export() {
                /* Layer in [10:0], viewport index in [19:16] */
                let vp = b.ishl_imm(vp, 16);
                vec[2] = b.ior(vec[2], vp);
                write_mask |= 1 << 2;
            } else {
                vec[3] = vp;
                write_mask |= 1 << 3;
            }
        }

        let value = b.vec(&vec);
        exps.push(PendingExport {
            value: value,
            base: EXP_POS + exps.len() as i32,
            write_mask: write_mask,
            flags: ExportFlags::empty(),
        });
    }

    let ccm = opts.clip_cull_mask;
    for i in 0..2 {
        let slot = VARYING_SLOT_CLIP_DIST0 + i;
        let plane_mask = (ccm >> (i * 4)) & 0xf;
        if outputs_written & slot_bit(slot) != 0 && plane_mask != 0 {
            let value = export_output(b, outputs.slot_values(slot));
            exps.push(PendingExport {
                value: value,
                base: EXP_POS + exps.len() as i32,
                write_mask: plane_mask,
                flags: ExportFlags::empty(),
            });
        }
    }

    if outputs_written & slot_bit(VARYING_SLOT_CLIP_VERTEX) != 0 {
        let vtx =
            export_output(b, outputs.slot_values(VARYING_SLOT_CLIP_VERTEX));

        let mut clip_dist = [None; 8];
        for i in ccm.iter_set_bits() {
            let ucp = b.intrin(
                Intrinsic::LoadUserClipPlane,
                4,
                32,
                &[],
                IntrinsicIndices {
                    ucp_id: i as u8,
                    ..Default::default()
                },
            );
            clip_dist[i as usize] = Some(b.fdot4(vtx, ucp));
        }

        for i in 0..2 {
            let plane_mask = (ccm >> (i * 4)) & 0xf;
            if plane_mask != 0 {
                let mut dists = [None; 4];
                dists.copy_from_slice(&clip_dist[i * 4..i * 4 + 4]);
                let value = export_output(b, dists);
                exps.push(PendingExport {
                    value: value,
                    base: EXP_POS + exps.len() as i32,
                    write_mask: plane_mask,
                    flags: ExportFlags::empty(),
                });
            }
        }
    }

    let num_exps = exps.len();
    let last = exps.last_mut().unwrap();
    if opts.done {
        last.flags |= ExportFlags::DONE;
    }

    debug!(
        "{} position exports, clip/cull mask {:#x}",
        num_exps, opts.clip_cull_mask
    );

    for (i, exp) in exps.iter().enumerate() {
        /* Without parameter exports rasterization may start before memory
         * writes land.
         */
        if i == num_exps - 1
            && hw.needs_release_before_final_export()
            && opts.no_param_export
            && opts.writes_memory
        {
            b.barrier(
                Scope::None,
                Scope::Device,
                MemorySemantics::RELEASE,
                MemoryModes::MEM_SSBO
                    | MemoryModes::MEM_GLOBAL
                    | MemoryModes::IMAGE,
            );
        }
        b.export_amd(exp.value, exp.base, exp.write_mask, exp.flags);
    }

    num_exps as u32
}

/// Emits one parameter export per distinct parameter offset
///
/// Several slots may share an offset, in which case the first one with a
/// value wins.
pub fn export_parameters(
    b: &mut impl SSABuilder,
    param_offsets: &[u8],
    outputs_written: u64,
    outputs_written_16bit: u16,
    outputs: &PrerastOutputs,
) {
    assert!(param_offsets.len() >= PARAM_OFFSETS_LEN);
    let mut exported_params = 0_u32;

    for slot in outputs_written.iter_set_bits() {
        let offset = param_offsets[slot as usize];
        if offset > PARAM_OFFSET_31 {
            continue;
        }

        let comps = outputs.slot_values(slot);
        let mut write_mask = 0_u8;
        for (c, comp) in comps.iter().enumerate() {
            if comp.is_some() {
                write_mask |= 1 << c;
            }
        }
        if write_mask == 0 || exported_params.has_bit(offset.into()) {
            continue;
        }

        let value = export_output(b, comps);
        b.export_amd(
            value,
            EXP_PARAM + i32::from(offset),
            write_mask,
            ExportFlags::empty(),
        );
        exported_params |= 1 << offset;
    }

    for idx in outputs_written_16bit.iter_set_bits() {
        let offset = param_offsets[(VARYING_SLOT_VAR0_16BIT + idx) as usize];
        if offset > PARAM_OFFSET_31 {
            continue;
        }

        let lo = |c| outputs.value(OutputSlot::Lo16(idx), c);
        let hi = |c| outputs.value(OutputSlot::Hi16(idx), c);

        let mut write_mask = 0_u8;
        for c in 0..4 {
            if lo(c).is_some() || hi(c).is_some() {
                write_mask |= 1 << c;
            }
        }
        if write_mask == 0 || exported_params.has_bit(offset.into()) {
            continue;
        }

        let undef = b.undef(1, 16);
        let mut vec = Vec::new();
        for c in 0..4 {
            let l = lo(c).unwrap_or(undef);
            let h = hi(c).unwrap_or(undef);
            vec.push(b.pack_32_2x16_split(l, h));
        }
        let value = b.vec(&vec);
        b.export_amd(
            value,
            EXP_PARAM + i32::from(offset),
            write_mask,
            ExportFlags::empty(),
        );
        exported_params |= 1 << offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtg_hw::GfxLevel;
    use crate::vtg_interp::Interp;
    use crate::vtg_prerast_out::{build_store_output, gather_outputs};

    fn gfx(level: GfxLevel) -> HardwareProfile {
        HardwareProfile::new(level, 64).unwrap()
    }

    fn run_exports(
        hw: &HardwareProfile,
        opts: &PosExportOptions,
        stores: impl FnOnce(&mut SSAInstrBuilder),
    ) -> Interp {
        let mut s = Shader::new(ShaderStage::Vertex, "exports");
        s.func.build_at_end(stores);
        let out = gather_outputs(&mut s, None);
        let mut written = slot_bit(VARYING_SLOT_POS);
        for (slot, _) in out.iter() {
            if let OutputSlot::Normal(loc) = slot {
                written |= slot_bit(*loc);
            }
        }
        s.func.build_at_end(|b| {
            export_position(b, hw, opts, written, &out);
        });
        let mut interp = Interp::new();
        interp.set_sysval(Intrinsic::LoadForceVrsRatesAmd, &[0x28]);
        for i in 0..8 {
            let plane = [1.0_f32, 0.0, 0.0, i as f32];
            let plane: Vec<u64> =
                plane.iter().map(|f| u64::from(f.to_bits())).collect();
            interp.set_sysval_idx(Intrinsic::LoadUserClipPlane, i, &plane);
        }
        interp.run(&s.func);
        interp
    }

    fn store_f32(b: &mut SSAInstrBuilder, slot: u32, vals: &[f32]) {
        let comps: Vec<Src> = vals.iter().map(|f| Src::new_imm_f32(*f)).collect();
        let v = b.vec(&comps);
        build_store_output(b, v, slot, 0, AluType::FLOAT32, false, 0);
    }

    #[test]
    fn test_unwritten_position_defaults() {
        let hw = gfx(GfxLevel::Gfx10_3);
        let opts = PosExportOptions {
            done: true,
            ..Default::default()
        };
        let interp = run_exports(&hw, &opts, |b| {
            store_f32(b, VARYING_SLOT_POS, &[0.5, -0.25]);
        });

        assert_eq!(interp.exports.len(), 1);
        let pos = &interp.exports[0];
        assert_eq!(pos.base, EXP_POS);
        assert_eq!(pos.write_mask, 0xf);
        assert_eq!(pos.f32(0), 0.5);
        assert_eq!(pos.f32(1), -0.25);
        assert_eq!(pos.f32(2), 0.0);
        assert_eq!(pos.f32(3), 1.0);
        assert_eq!(pos.flags, ExportFlags::DONE);
    }

    #[test]
    fn test_gfx10_pos0_valid_mask() {
        let hw = gfx(GfxLevel::Gfx10);
        let interp = run_exports(&hw, &Default::default(), |_| ());
        assert_eq!(interp.exports[0].flags, ExportFlags::VALID_MASK);
    }

    #[test]
    fn test_misc_export_packing() {
        let stores = |b: &mut SSAInstrBuilder| {
            store_f32(b, VARYING_SLOT_POS, &[0.0, 0.0, 0.0, 1.0]);
            store_f32(b, VARYING_SLOT_PSIZ, &[4.0]);
            let layer = Src::new_imm_u32(3);
            build_store_output(
                b,
                layer,
                VARYING_SLOT_LAYER,
                0,
                AluType::UINT32,
                false,
                0,
            );
            let vp = Src::new_imm_u32(2);
            build_store_output(
                b,
                vp,
                VARYING_SLOT_VIEWPORT,
                0,
                AluType::UINT32,
                false,
                0,
            );
        };

        let interp =
            run_exports(&gfx(GfxLevel::Gfx9), &Default::default(), stores);
        assert_eq!(interp.exports.len(), 2);
        let misc = &interp.exports[1];
        assert_eq!(misc.base, EXP_POS + 1);
        assert_eq!(misc.write_mask, 0x5);
        assert_eq!(misc.f32(0), 4.0);
        assert_eq!(misc.values[2], 3 | (2 << 16));

        let interp =
            run_exports(&gfx(GfxLevel::Gfx8), &Default::default(), stores);
        let misc = &interp.exports[1];
        assert_eq!(misc.write_mask, 0xd);
        assert_eq!(misc.values[2], 3);
        assert_eq!(misc.values[3], 2);
    }

    #[test]
    fn test_forced_vrs_uses_pos_w() {
        let opts = PosExportOptions {
            force_vrs: true,
            ..Default::default()
        };
        let hw = gfx(GfxLevel::Gfx10_3);
        let interp = run_exports(&hw, &opts, |b| {
            store_f32(b, VARYING_SLOT_POS, &[0.0, 0.0, 0.0, 2.0]);
        });
        assert_eq!(interp.exports.len(), 2);
        assert_eq!(interp.exports[1].write_mask, 0x2);
        assert_eq!(interp.exports[1].values[1], 0x28);

        let interp = run_exports(&hw, &opts, |b| {
            store_f32(b, VARYING_SLOT_POS, &[0.0, 0.0, 0.0, 1.0]);
        });
        assert_eq!(interp.exports[1].values[1], 0);
    }

    #[test]
    fn test_clip_vertex_distances() {
        let opts = PosExportOptions {
            clip_cull_mask: 0x11,
            done: true,
            ..Default::default()
        };
        let interp = run_exports(&gfx(GfxLevel::Gfx11), &opts, |b| {
            store_f32(b, VARYING_SLOT_CLIP_VERTEX, &[3.0, 0.0, 0.0, 1.0]);
        });

        assert_eq!(interp.exports.len(), 3);
        let d0 = &interp.exports[1];
        assert_eq!(d0.base, EXP_POS + 1);
        assert_eq!(d0.write_mask, 0x1);
        assert_eq!(d0.f32(0), 3.0);
        let d1 = &interp.exports[2];
        assert_eq!(d1.base, EXP_POS + 2);
        assert_eq!(d1.f32(0), 7.0);
        assert!(d1.flags.contains(ExportFlags::DONE));
        assert!(!interp.exports[0].flags.contains(ExportFlags::DONE));
    }

    #[test]
    fn test_release_before_final_export() {
        let opts = PosExportOptions {
            no_param_export: true,
            writes_memory: true,
            done: true,
            ..Default::default()
        };
        let mut s = Shader::new(ShaderStage::Vertex, "release");
        let out = PrerastOutputs::new();
        s.func.build_at_end(|b| {
            export_position(b, &gfx(GfxLevel::Gfx10_3), &opts, 0, &out);
        });
        let body = &s.func.body;
        let Node::Instr(barrier) = &body[body.len() - 2] else {
            panic!("Expected an instruction");
        };
        let barrier = barrier.as_intrinsic().unwrap();
        assert_eq!(barrier.intrinsic, Intrinsic::Barrier);
        assert_eq!(barrier.idx.memory_scope, Scope::Device);
        assert_eq!(barrier.idx.memory_semantics, MemorySemantics::RELEASE);

        let mut s = Shader::new(ShaderStage::Vertex, "no_release");
        s.func.build_at_end(|b| {
            export_position(b, &gfx(GfxLevel::Gfx9), &opts, 0, &out);
        });
        assert!(!s.has_intrinsic(Intrinsic::Barrier));
    }

    #[test]
    fn test_aliased_params_export_once() {
        let mut s = Shader::new(ShaderStage::Vertex, "params");
        s.func.build_at_end(|b| {
            store_f32(b, VARYING_SLOT_VAR0, &[1.0, 2.0]);
            store_f32(b, VARYING_SLOT_VAR0 + 1, &[3.0]);
            store_f32(b, VARYING_SLOT_VAR0 + 2, &[4.0]);
            let h = b.u2u(Src::new_imm_u32(0x1234), 16);
            build_store_output(
                b,
                h,
                VARYING_SLOT_VAR0_16BIT + 1,
                2,
                AluType::FLOAT16,
                true,
                0,
            );
        });
        let out = gather_outputs(&mut s, None);

        let mut offsets = [0xff_u8; PARAM_OFFSETS_LEN];
        offsets[VARYING_SLOT_VAR0 as usize] = 0;
        offsets[VARYING_SLOT_VAR0 as usize + 1] = 0;
        offsets[VARYING_SLOT_VAR0 as usize + 2] = 40;
        offsets[VARYING_SLOT_VAR0_16BIT as usize + 1] = 1;
        let written = 0x7 << VARYING_SLOT_VAR0;
        s.func.build_at_end(|b| {
            export_parameters(b, &offsets, written, 0x2, &out);
        });

        let mut interp = Interp::new();
        interp.run(&s.func);
        assert_eq!(interp.exports.len(), 2);
        assert_eq!(interp.exports[0].base, EXP_PARAM);
        assert_eq!(interp.exports[0].write_mask, 0x3);
        assert_eq!(interp.exports[0].f32(1), 2.0);
        assert_eq!(interp.exports[1].base, EXP_PARAM + 1);
        assert_eq!(interp.exports[1].write_mask, 0x4);
        assert_eq!(interp.exports[1].values[2] >> 16, 0x1234);
    }

    #[test]
    fn test_primitive_export() {
        let mut s = Shader::new(ShaderStage::Geometry, "prim");
        s.func.build_at_end(|b| {
            export_primitive(b, Src::new_imm_u32(0x42));
        });
        let mut interp = Interp::new();
        interp.run(&s.func);
        let prim = &interp.exports[0];
        assert_eq!(prim.base, EXP_PRIM);
        assert_eq!(prim.write_mask, 0x1);
        assert_eq!(prim.flags, ExportFlags::DONE);
        assert_eq!(prim.values.len(), 4);
        assert_eq!(prim.values[0], 0x42);
    }
}
