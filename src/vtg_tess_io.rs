/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Tessellation I/O lowering
//!
//! The VS runs as the hardware LS and passes its outputs to the TCS through
//! LDS.  The TCS runs as the hardware HS.  It keeps the outputs it reads
//! itself in LDS and writes the outputs the TES reads to the off-chip ring
//! in VRAM, where the TES picks them up.
//!
//! LDS layout, per workgroup:
//!
//! ```text
//!    TCS per-vertex inputs for patch 0     <- 0
//!    TCS per-vertex inputs for patch 1
//!    ...
//!    TCS per-vertex outputs for patch 0    <- output patch 0
//!    TCS per-patch outputs for patch 0
//!    TCS per-vertex outputs for patch 1
//!    ...
//! ```
//!
//! Off-chip ring layout: every attribute is stored for all vertices of all
//! patches before the next attribute starts.  The per-patch attributes
//! follow at the per-patch data offset, again one attribute for all
//! patches at a time.

use crate::dump_after_pass;
use crate::util::BitMask;
use crate::vtg_hw::HardwareProfile;
use crate::vtg_io_map::*;
use crate::vtg_ir::*;
use crate::{GetDebugFlags, DEBUG};

use log::debug;
use std::collections::HashSet;

/// Sizes of the TCS output area of one patch in LDS, in bytes
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HsOutputLayout {
    pub num_reserved_outputs: u32,
    pub num_reserved_patch_outputs: u32,
    pub output_vertex_size: u32,
    pub pervertex_output_patch_size: u32,
    pub output_patch_stride: u32,
}

fn is_per_vertex_output(intrin: &OpIntrinsic) -> bool {
    matches!(
        intrin.intrinsic,
        Intrinsic::StorePerVertexOutput | Intrinsic::LoadPerVertexOutput
    )
}

fn patch_bit(slot: u32) -> u32 {
    assert!(is_patch_slot(slot));
    1 << (slot - VARYING_SLOT_PATCH0)
}

fn store_shared_masked(
    b: &mut impl SSABuilder,
    value: Src,
    offset: Src,
    write_mask: u8,
    base: u32,
) {
    b.intrin_nodst(
        Intrinsic::StoreShared,
        &[value, offset],
        IntrinsicIndices {
            base: base as i32,
            write_mask: write_mask,
            ..Default::default()
        },
    );
}

fn zero_vec(b: &mut impl SSABuilder, comps: u32) -> Src {
    let zeros = vec![Src::new_zero(); comps as usize];
    b.vec(&zeros)
}

struct TessIoState<'a> {
    mapper: &'a dyn LocationMapper,
    stage: ShaderStage,
    live: IoLiveness,
    tcs_vertices_out: u32,

    tcs_in_out_eq: bool,
    /// TCS inputs which only ever live in registers
    tcs_temp_only_inputs: u64,
    tcs_inputs_read: u64,

    tes_inputs_read: u64,
    tes_patch_inputs_read: u32,

    tcs_out_patch_fits_subgroup: bool,
    tcs_pass_tessfactors_by_reg: bool,

    tess_level_outer: Option<VarId>,
    tess_level_inner: Option<VarId>,
    tess_level_outer_mask: u8,
    tess_level_inner_mask: u8,
}

impl<'a> TessIoState<'a> {
    fn new(s: &Shader, mapper: &'a dyn LocationMapper) -> TessIoState<'a> {
        TessIoState {
            mapper: mapper,
            stage: s.info.stage,
            live: IoLiveness::from_info(&s.info),
            tcs_vertices_out: s.info.tess.tcs_vertices_out.into(),
            tcs_in_out_eq: false,
            tcs_temp_only_inputs: 0,
            tcs_inputs_read: 0,
            tes_inputs_read: 0,
            tes_patch_inputs_read: 0,
            tcs_out_patch_fits_subgroup: false,
            tcs_pass_tessfactors_by_reg: false,
            tess_level_outer: None,
            tess_level_inner: None,
            tess_level_outer_mask: 0,
            tess_level_inner_mask: 0,
        }
    }

    /* Masks of the VRAM layout, decided by what the TES reads */

    fn vram_per_vtx_out_mask(&self) -> u64 {
        self.tes_inputs_read & !TESS_LEVEL_MASK
    }

    fn vram_tf_out_mask(&self) -> u64 {
        self.tes_inputs_read & TESS_LEVEL_MASK
    }

    fn vram_per_patch_out_mask(&self) -> u32 {
        self.tes_patch_inputs_read
    }

    /* Masks of the LDS layout, decided by what the TCS reads back */

    fn lds_per_vtx_out_mask(&self) -> u64 {
        self.live.outputs_read & self.live.outputs_written & !TESS_LEVEL_MASK
    }

    fn lds_tf_out_mask(&self) -> u64 {
        if self.tcs_pass_tessfactors_by_reg {
            0
        } else {
            self.live.outputs_written & TESS_LEVEL_MASK
        }
    }

    fn lds_per_patch_out_mask(&self) -> u32 {
        self.live.patch_outputs_read & self.live.patch_outputs_written
    }

    fn tcs_in_lds_mask(&self) -> u64 {
        self.tcs_inputs_read & !self.tcs_temp_only_inputs
    }

    fn output_needs_vmem(&self, intrin: &OpIntrinsic) -> bool {
        let sem = intrin.io_semantics();
        if sem.no_varying {
            return false;
        }

        if is_per_vertex_output(intrin) {
            self.vram_per_vtx_out_mask().has_bit(sem.location)
        } else if is_tess_level_slot(sem.location) {
            false
        } else {
            self.vram_per_patch_out_mask() & patch_bit(sem.location) != 0
        }
    }

    fn output_needs_lds(&self, intrin: &OpIntrinsic) -> bool {
        let loc = intrin.io_semantics().location;
        if is_per_vertex_output(intrin) {
            self.lds_per_vtx_out_mask().has_bit(loc)
        } else if is_tess_level_slot(loc) {
            self.lds_tf_out_mask().has_bit(loc)
        } else {
            self.lds_per_patch_out_mask() & patch_bit(loc) != 0
        }
    }

    fn hs_output_layout(&self) -> HsOutputLayout {
        let num_reserved_outputs = self.lds_per_vtx_out_mask().count_ones();
        let num_reserved_patch_outputs = self.lds_tf_out_mask().count_ones()
            + self.lds_per_patch_out_mask().count_ones();
        let output_vertex_size = num_reserved_outputs * 16;
        let pervertex_output_patch_size =
            self.tcs_vertices_out * output_vertex_size;
        HsOutputLayout {
            num_reserved_outputs: num_reserved_outputs,
            num_reserved_patch_outputs: num_reserved_patch_outputs,
            output_vertex_size: output_vertex_size,
            pervertex_output_patch_size: pervertex_output_patch_size,
            output_patch_stride: pervertex_output_patch_size
                + num_reserved_patch_outputs * 16,
        }
    }

    /// LDS is private to the linked pair, so it is always packed densely
    fn hs_output_lds_location(&self, per_vertex: bool, loc: u32) -> u32 {
        if per_vertex {
            prefix_sum_location(loc, self.lds_per_vtx_out_mask())
        } else {
            PrefixSumMapper.map_patch_location(
                loc,
                self.lds_tf_out_mask(),
                self.lds_per_patch_out_mask(),
            )
        }
    }

    fn hs_output_vram_location(&self, per_vertex: bool, loc: u32) -> u32 {
        if per_vertex {
            self.mapper.map_location(loc, self.vram_per_vtx_out_mask())
        } else {
            self.mapper.map_patch_location(
                loc,
                self.vram_tf_out_mask(),
                self.vram_per_patch_out_mask(),
            )
        }
    }

    fn hs_per_vertex_input_lds_offset(
        &self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
    ) -> Src {
        let tcs_in_vtxcnt = b.sysval(Intrinsic::LoadPatchVerticesIn);
        let rel_patch_id = b.sysval(Intrinsic::LoadTessRelPatchIdAmd);
        let vertex_index = *intrin.io_arrayed_index_src();

        let stride = b.sysval(Intrinsic::LoadLshsVertexStrideAmd);
        let tcs_in_patch_stride = b.imul(tcs_in_vtxcnt, stride);
        let vertex_index_off = b.imul(vertex_index, stride);
        let cur_patch_off = b.imul(rel_patch_id, tcs_in_patch_stride);

        let loc = intrin.io_semantics().location;
        let mapped = self.mapper.map_location(loc, self.tcs_in_lds_mask());
        let io_off =
            calc_io_offset(b, intrin, Src::new_imm_u32(16), 4, mapped);

        let off = b.iadd_nuw(cur_patch_off, vertex_index_off);
        b.iadd_nuw(off, io_off)
    }

    fn hs_output_lds_offset(
        &self,
        b: &mut impl SSABuilder,
        intrin: Option<&OpIntrinsic>,
    ) -> Src {
        let layout = self.hs_output_layout();
        let per_vertex = intrin.is_some_and(is_per_vertex_output);

        let mut off = match intrin {
            Some(intrin) => {
                let loc = intrin.io_semantics().location;
                let mapped = self.hs_output_lds_location(per_vertex, loc);
                calc_io_offset(b, intrin, Src::new_imm_u32(16), 4, mapped)
            }
            None => Src::new_zero(),
        };

        let rel_patch_id = b.sysval(Intrinsic::LoadTessRelPatchIdAmd);
        let patch_offset = b.imul_imm(rel_patch_id, layout.output_patch_stride);

        let tcs_in_vtxcnt = b.sysval(Intrinsic::LoadPatchVerticesIn);
        let tcs_num_patches = b.sysval(Intrinsic::LoadTcsNumPatchesAmd);
        let stride = b.sysval(Intrinsic::LoadLshsVertexStrideAmd);
        let input_patch_size = b.imul(tcs_in_vtxcnt, stride);
        let output_patch0_offset = b.imul(input_patch_size, tcs_num_patches);
        let output_patch_offset = b.iadd_nuw(patch_offset, output_patch0_offset);

        if let (true, Some(intrin)) = (per_vertex, intrin) {
            let vertex_index = *intrin.io_arrayed_index_src();
            let vertex_index_off =
                b.imul_imm(vertex_index, layout.output_vertex_size);
            off = b.iadd_nuw(off, vertex_index_off);
        } else {
            let pervertex = Src::new_imm_u32(layout.pervertex_output_patch_size);
            off = b.iadd_nuw(off, pervertex);
        }
        b.iadd_nuw(off, output_patch_offset)
    }

    fn hs_per_vertex_output_vmem_offset(
        &self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
    ) -> Src {
        let out_vertices_per_patch = if self.stage == ShaderStage::TessCtrl {
            Src::new_imm_u32(self.tcs_vertices_out)
        } else {
            b.sysval(Intrinsic::LoadPatchVerticesIn)
        };

        let tcs_num_patches = b.sysval(Intrinsic::LoadTcsNumPatchesAmd);
        let patch_size = b.imul_imm(out_vertices_per_patch, 16);
        let attr_stride = b.imul(tcs_num_patches, patch_size);
        let loc = intrin.io_semantics().location;
        let mapped = self.hs_output_vram_location(true, loc);
        let io_offset = calc_io_offset(b, intrin, attr_stride, 4, mapped);

        let rel_patch_id = b.sysval(Intrinsic::LoadTessRelPatchIdAmd);
        let patch_offset = b.imul(rel_patch_id, patch_size);

        let vertex_index = *intrin.io_arrayed_index_src();
        let vertex_index_off = b.imul_imm(vertex_index, 16);

        let off = b.iadd_nuw(patch_offset, vertex_index_off);
        b.iadd_nuw(off, io_offset)
    }

    fn hs_per_patch_output_vmem_offset(
        &self,
        b: &mut impl SSABuilder,
        intrin: Option<&OpIntrinsic>,
        const_base_offset: u32,
    ) -> Src {
        let tcs_num_patches = b.sysval(Intrinsic::LoadTcsNumPatchesAmd);
        let per_patch_data_offset =
            b.sysval(Intrinsic::LoadHsOutPatchDataOffsetAmd);

        let mut off = match intrin {
            Some(intrin) => {
                let loc = intrin.io_semantics().location;
                let mapped = self.hs_output_vram_location(false, loc);
                let attr_stride = b.imul_imm(tcs_num_patches, 16);
                calc_io_offset(b, intrin, attr_stride, 4, mapped)
            }
            None => Src::new_zero(),
        };

        if const_base_offset != 0 {
            let base = b.imul_imm(tcs_num_patches, const_base_offset);
            off = b.iadd_nuw(off, base);
        }

        let rel_patch_id = b.sysval(Intrinsic::LoadTessRelPatchIdAmd);
        let patch_offset = b.imul_imm(rel_patch_id, 16);
        let off = b.iadd_nuw(off, per_patch_data_offset);
        b.iadd_nuw(off, patch_offset)
    }

    fn lower_ls_output_store(
        &self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
    ) {
        let sem = intrin.io_semantics();
        let vertex_idx = b.sysval(Intrinsic::LoadLocalInvocationIndex);
        let stride = b.sysval(Intrinsic::LoadLshsVertexStrideAmd);
        let base_off = b.imul(vertex_idx, stride);

        let mapped =
            self.mapper.map_location(sem.location, self.tcs_in_lds_mask());
        let io_off =
            calc_io_offset(b, intrin, Src::new_imm_u32(16), 4, mapped);
        let off = b.iadd_nuw(base_off, io_off);

        store_io(
            b,
            intrin.srcs[0],
            0,
            intrin.idx.write_mask,
            sem.high_16bits,
            |b, v, mask, base| store_shared_masked(b, v, off, mask, base),
        );
    }

    fn lower_hs_output_store(
        &mut self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
    ) {
        let sem = *intrin.io_semantics();
        let store_val = intrin.srcs[0];
        let write_mask = intrin.idx.write_mask;

        if self.output_needs_vmem(intrin) {
            let vmem_off = if is_per_vertex_output(intrin) {
                self.hs_per_vertex_output_vmem_offset(b, intrin)
            } else {
                self.hs_per_patch_output_vmem_offset(b, Some(intrin), 0)
            };

            let ring = b.sysval_sized(Intrinsic::LoadRingTessOffchipAmd, 4, 32);
            let offchip_offset =
                b.sysval(Intrinsic::LoadRingTessOffchipOffsetAmd);
            store_io(
                b,
                store_val,
                0,
                write_mask,
                sem.high_16bits,
                |b, v, mask, base| {
                    b.intrin_nodst(
                        Intrinsic::StoreBufferAmd,
                        &[v, ring, vmem_off, offchip_offset, Src::new_zero()],
                        IntrinsicIndices {
                            base: base as i32,
                            write_mask: mask,
                            memory_modes: MemoryModes::SHADER_OUT,
                            access: Access::COHERENT,
                            ..Default::default()
                        },
                    );
                },
            );
        }

        if self.output_needs_lds(intrin) {
            let lds_off = self.hs_output_lds_offset(b, Some(intrin));
            store_io(
                b,
                store_val,
                0,
                write_mask,
                sem.high_16bits,
                |b, v, mask, base| store_shared_masked(b, v, lds_off, mask, base),
            );
        }

        /* Keep the tess factors around for the finale */
        if is_tess_level_slot(sem.location) {
            let component = intrin.idx.component;
            let (mask, var) = if sem.location == VARYING_SLOT_TESS_LEVEL_INNER
            {
                (&mut self.tess_level_inner_mask, self.tess_level_inner)
            } else {
                (&mut self.tess_level_outer_mask, self.tess_level_outer)
            };
            *mask |= write_mask << component;

            if let Some(var) = var {
                b.store_var_components(var, store_val, component, write_mask);
            }
        }
    }

    fn lower_hs_output_load(
        &self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
    ) -> Src {
        let sem = intrin.io_semantics();
        let dst = intrin.dst.as_ssa().expect("Output load without a def");
        let (comps, bit_size) = (dst.comps(), dst.bit_size());

        if is_tess_level_slot(sem.location) && self.tcs_pass_tessfactors_by_reg
        {
            assert!(bit_size == 32);
            let var = if sem.location == VARYING_SLOT_TESS_LEVEL_OUTER {
                self.tess_level_outer
            } else {
                self.tess_level_inner
            };
            let Some(var) = var else {
                unreachable!("Tess level variables are created up front");
            };
            let levels = b.load_var(var, 4, 32);
            return b.channels(levels, comp_mask(comps) << intrin.idx.component);
        }

        /* Outputs the shader never stores read as undefined */
        if !self.output_needs_lds(intrin) {
            return b.undef(comps, bit_size);
        }

        let off = self.hs_output_lds_offset(b, Some(intrin));
        load_io(b, comps, bit_size, sem.high_16bits, |b, c, bits| {
            b.load_shared(c, bits, off, 0)
        })
    }

    fn update_hs_barrier(&self, idx: &mut IntrinsicIndices) {
        if idx.memory_modes.contains(MemoryModes::SHADER_OUT) {
            idx.memory_modes.remove(MemoryModes::SHADER_OUT);
            idx.memory_modes.insert(MemoryModes::MEM_SHARED);
        }

        if self.tcs_out_patch_fits_subgroup {
            if idx.execution_scope == Scope::Workgroup {
                idx.execution_scope = Scope::Subgroup;
            }
            if idx.memory_scope == Scope::Workgroup {
                idx.memory_scope = Scope::Subgroup;
            }
        }
    }

    fn lower_tes_input_load(
        &self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
    ) -> Src {
        let sem = intrin.io_semantics();
        let dst = intrin.dst.as_ssa().expect("Input load without a def");

        let ring = b.sysval_sized(Intrinsic::LoadRingTessOffchipAmd, 4, 32);
        let offchip_offset = b.sysval(Intrinsic::LoadRingTessOffchipOffsetAmd);
        let off = if intrin.intrinsic == Intrinsic::LoadPerVertexInput {
            self.hs_per_vertex_output_vmem_offset(b, intrin)
        } else {
            self.hs_per_patch_output_vmem_offset(b, Some(intrin), 0)
        };

        load_io(
            b,
            dst.comps(),
            dst.bit_size(),
            sem.high_16bits,
            |b, c, bits| {
                b.load_buffer_amd(
                    c,
                    bits,
                    ring,
                    off,
                    offchip_offset,
                    0,
                    Access::COHERENT,
                )
            },
        )
    }
}

/// Lowers the outputs of a VS running as the hardware LS to LDS stores
///
/// Outputs the TCS doesn't read are dropped, and so are the layer and
/// viewport since only the last pre-rasterization stage may set them.
/// With `tcs_in_out_eq`, the `store_output`s stay in place so the TCS can
/// read same-invocation inputs straight from registers.
pub fn lower_ls_outputs_to_mem(
    s: &mut Shader,
    mapper: &dyn LocationMapper,
    tcs_in_out_eq: bool,
    tcs_inputs_read: u64,
    tcs_temp_only_inputs: u64,
) {
    assert!(s.info.stage == ShaderStage::Vertex);

    let st = TessIoState {
        tcs_in_out_eq: tcs_in_out_eq,
        tcs_inputs_read: tcs_inputs_read,
        tcs_temp_only_inputs: if tcs_in_out_eq {
            tcs_temp_only_inputs
        } else {
            0
        },
        ..TessIoState::new(s, mapper)
    };

    let mut num_stores = 0;
    s.map_instrs(|instr, ssa_alloc| {
        let Some(intrin) = instr.as_intrinsic() else {
            return MappedInstrs::One(instr);
        };
        if intrin.intrinsic != Intrinsic::StoreOutput {
            return MappedInstrs::One(instr);
        }

        let sem = intrin.io_semantics();
        if sem.location == VARYING_SLOT_LAYER
            || sem.location == VARYING_SLOT_VIEWPORT
        {
            return MappedInstrs::None;
        }

        if sem.no_varying || !st.tcs_inputs_read.has_bit(sem.location) {
            return MappedInstrs::None;
        }

        if st.tcs_temp_only_inputs.has_bit(sem.location) {
            return MappedInstrs::One(instr);
        }

        let mut b = SSAInstrBuilder::new(ssa_alloc);
        st.lower_ls_output_store(&mut b, intrin);
        num_stores += 1;
        if st.tcs_in_out_eq {
            b.push_instr(instr);
        }
        b.as_mapped_instrs()
    });

    debug!(
        "{}: LS outputs, {} LDS stores, inputs read {:#x}, temp only {:#x}",
        s.name, num_stores, st.tcs_inputs_read, st.tcs_temp_only_inputs
    );
    dump_after_pass("lower_ls_outputs_to_mem", s);
}

/// Lowers TCS per-vertex input loads to LDS loads
///
/// With `tcs_in_out_eq`, loads of temp-only inputs read the VS output
/// register of the same invocation instead.
pub fn lower_hs_inputs_to_mem(
    s: &mut Shader,
    mapper: &dyn LocationMapper,
    tcs_in_out_eq: bool,
    tcs_temp_only_inputs: u64,
) {
    assert!(s.info.stage == ShaderStage::TessCtrl);

    let st = TessIoState {
        tcs_in_out_eq: tcs_in_out_eq,
        tcs_inputs_read: s.info.inputs_read,
        tcs_temp_only_inputs: if tcs_in_out_eq {
            tcs_temp_only_inputs
        } else {
            0
        },
        ..TessIoState::new(s, mapper)
    };

    let mut invocation_ids = HashSet::new();
    s.map_instrs(|instr, ssa_alloc| {
        let Some(intrin) = instr.as_intrinsic() else {
            return MappedInstrs::One(instr);
        };

        if intrin.intrinsic == Intrinsic::LoadInvocationId {
            if let Some(ssa) = intrin.dst.as_ssa() {
                invocation_ids.insert(ssa.idx());
            }
            return MappedInstrs::One(instr);
        }
        if intrin.intrinsic != Intrinsic::LoadPerVertexInput {
            return MappedInstrs::One(instr);
        }

        let sem = intrin.io_semantics();
        let dst = *intrin.dst.as_ssa().expect("Input load without a def");
        let mut b = SSAInstrBuilder::new(ssa_alloc);

        if st.tcs_temp_only_inputs.has_bit(sem.location) {
            let same_invocation = intrin
                .io_arrayed_index_src()
                .as_ssa()
                .is_some_and(|ssa| invocation_ids.contains(&ssa.idx()));
            assert!(
                same_invocation && intrin.io_offset_src().is_const(),
                "Temp-only TCS input read from another invocation"
            );

            let val = b.intrin(
                Intrinsic::LoadInputReg,
                dst.comps(),
                dst.bit_size(),
                &[],
                IntrinsicIndices {
                    component: intrin.idx.component,
                    io_semantics: *sem,
                    ..Default::default()
                },
            );
            b.copy_to(dst, val);
            return b.as_mapped_instrs();
        }

        let off = st.hs_per_vertex_input_lds_offset(&mut b, intrin);
        let val = load_io(
            &mut b,
            dst.comps(),
            dst.bit_size(),
            sem.high_16bits,
            |b, c, bits| b.load_shared(c, bits, off, 0),
        );
        b.copy_to(dst, val);
        b.as_mapped_instrs()
    });

    debug!(
        "{}: HS inputs, LDS mask {:#x}",
        s.name,
        st.tcs_in_lds_mask()
    );
    dump_after_pass("lower_hs_inputs_to_mem", s);
}

struct TessLevels {
    outer: Src,
    inner: Option<Src>,
}

fn hs_resize_tess_factor(
    b: &mut impl SSABuilder,
    tf: Option<Src>,
    comps: u32,
) -> Option<Src> {
    if comps == 0 {
        return None;
    }
    let Some(tf) = tf else {
        return Some(zero_vec(b, comps));
    };

    let tf_comps = u32::from(tf.comps());
    if comps == tf_comps {
        return Some(tf);
    }

    let mut v = Vec::new();
    for c in 0..comps {
        v.push(if c < tf_comps {
            b.channel(tf, c as u8)
        } else {
            Src::new_zero()
        });
    }
    Some(b.vec(&v))
}

impl<'a> TessIoState<'a> {
    fn hs_load_tess_levels(
        &self,
        b: &mut impl SSABuilder,
        prim_mode: TessPrimitiveMode,
    ) -> TessLevels {
        let (outer_comps, inner_comps) = prim_mode.tess_level_components();

        let mut outer = None;
        let mut inner = None;

        if self.tcs_pass_tessfactors_by_reg {
            if let (true, Some(var)) =
                (self.tess_level_outer_mask != 0, self.tess_level_outer)
            {
                let v = b.load_var(var, 4, 32);
                outer = Some(b.channels(v, comp_mask(outer_comps as u8)));
            }
            if let (true, Some(var)) = (
                inner_comps > 0 && self.tess_level_inner_mask != 0,
                self.tess_level_inner,
            ) {
                let v = b.load_var(var, 4, 32);
                inner = Some(b.channels(v, comp_mask(inner_comps as u8)));
            }
        } else {
            let lds_base = self.hs_output_lds_offset(b, None);

            if self.tess_level_outer_mask != 0 {
                let mapped = self.hs_output_lds_location(
                    false,
                    VARYING_SLOT_TESS_LEVEL_OUTER,
                );
                outer = Some(b.load_shared(
                    outer_comps as u8,
                    32,
                    lds_base,
                    (mapped * 16) as i32,
                ));
            }
            if inner_comps > 0 && self.tess_level_inner_mask != 0 {
                let mapped = self.hs_output_lds_location(
                    false,
                    VARYING_SLOT_TESS_LEVEL_INNER,
                );
                inner = Some(b.load_shared(
                    inner_comps as u8,
                    32,
                    lds_base,
                    (mapped * 16) as i32,
                ));
            }
        }

        /* Unwritten tess factors are zero */
        TessLevels {
            outer: match outer {
                Some(o) => o,
                None => zero_vec(b, outer_comps),
            },
            inner: match inner {
                Some(i) => Some(i),
                None if inner_comps > 0 => Some(zero_vec(b, inner_comps)),
                None => None,
            },
        }
    }

    fn hs_store_tess_factors_for_tes<B: SSABuilder>(
        &self,
        b: &mut B,
        levels: &TessLevels,
    ) {
        let ring = b.sysval_sized(Intrinsic::LoadRingTessOffchipAmd, 4, 32);
        let offchip_offset = b.sysval(Intrinsic::LoadRingTessOffchipOffsetAmd);

        /* Only what the TES reads has room in the ring */
        let tes_reads_outer = self
            .tes_inputs_read
            .has_bit(VARYING_SLOT_TESS_LEVEL_OUTER);
        let tes_reads_inner = self
            .tes_inputs_read
            .has_bit(VARYING_SLOT_TESS_LEVEL_INNER);

        let store = |b: &mut B, slot: u32, value: Src| {
            let loc = self.hs_output_vram_location(false, slot);
            let off = self.hs_per_patch_output_vmem_offset(b, None, loc * 16);
            b.store_buffer_amd(
                value,
                ring,
                off,
                offchip_offset,
                0,
                Access::COHERENT,
                MemoryModes::SHADER_OUT,
            );
        };

        if self.tess_level_outer_mask != 0 && tes_reads_outer {
            store(b, VARYING_SLOT_TESS_LEVEL_OUTER, levels.outer);
        }
        if let Some(inner) = levels.inner {
            if self.tess_level_inner_mask != 0 && tes_reads_inner {
                store(b, VARYING_SLOT_TESS_LEVEL_INNER, inner);
            }
        }
    }
}

fn hs_store_dynamic_control_word(b: &mut impl SSABuilder) {
    let rel_patch_id = b.sysval(Intrinsic::LoadTessRelPatchIdAmd);
    let ring = b.sysval_sized(Intrinsic::LoadRingTessFactorsAmd, 4, 32);
    let tess_factors_base = b.sysval(Intrinsic::LoadRingTessFactorsOffsetAmd);

    let first = b.ieq_imm(rel_patch_id, 0);
    b.push_if(first);
    b.store_buffer_amd(
        Src::new_imm_u32(0x8000_0000),
        ring,
        Src::new_zero(),
        tess_factors_base,
        0,
        Access::COHERENT,
        MemoryModes::empty(),
    );
    b.pop_if();
}

fn hs_store_tess_factors_for_tessellator<B: SSABuilder>(
    b: &mut B,
    hw: &HardwareProfile,
    prim_mode: TessPrimitiveMode,
    levels: &TessLevels,
) {
    let rel_patch_id = b.sysval(Intrinsic::LoadTessRelPatchIdAmd);
    let ring = b.sysval_sized(Intrinsic::LoadRingTessFactorsAmd, 4, 32);
    let tess_factors_base = b.sysval(Intrinsic::LoadRingTessFactorsOffsetAmd);

    let const_offset = hw.tess_factor_ring_const_offset();
    let (outer_comps, inner_comps) = prim_mode.tess_level_components();
    let tess_factors_offset =
        b.imul_imm(rel_patch_id, (outer_comps + inner_comps) * 4);

    let tf_outer = hs_resize_tess_factor(b, Some(levels.outer), outer_comps);
    let tf_inner = hs_resize_tess_factor(b, levels.inner, inner_comps);
    let Some(tf_outer) = tf_outer else {
        unreachable!("Every primitive mode has outer tess levels");
    };

    let access = Access::COHERENT | Access::CP_GE_COHERENT_AMD;
    let store = |b: &mut B, value: Src, base: u32| {
        b.store_buffer_amd(
            value,
            ring,
            tess_factors_offset,
            tess_factors_base,
            base as i32,
            access,
            MemoryModes::empty(),
        );
    };

    match prim_mode {
        TessPrimitiveMode::Isolines => {
            /* Lines are reversed */
            let o1 = b.channel(tf_outer, 1);
            let o0 = b.channel(tf_outer, 0);
            let t = b.vec(&[o1, o0]);
            store(b, t, const_offset);
        }
        TessPrimitiveMode::Triangles => {
            let Some(tf_inner) = tf_inner else {
                unreachable!("Triangles have an inner tess level");
            };
            let o0 = b.channel(tf_outer, 0);
            let o1 = b.channel(tf_outer, 1);
            let o2 = b.channel(tf_outer, 2);
            let i0 = b.channel(tf_inner, 0);
            let t = b.vec(&[o0, o1, o2, i0]);
            store(b, t, const_offset);
        }
        TessPrimitiveMode::Quads => {
            let Some(tf_inner) = tf_inner else {
                unreachable!("Quads have inner tess levels");
            };
            store(b, tf_outer, const_offset);
            store(b, tf_inner, const_offset + 4 * outer_comps);
        }
        TessPrimitiveMode::Unspecified => {
            panic!("Unknown tess primitive mode");
        }
    }
}

fn hs_finale(s: &mut Shader, st: &TessIoState, hw: &HardwareProfile) {
    let prim_mode = s.info.tess.primitive_mode;
    let tcs_vertices_out = st.tcs_vertices_out;

    s.func.build_at_end(|b| {
        /* Tess factors in LDS need the stores of all invocations */
        if !st.tcs_pass_tessfactors_by_reg {
            let scope = if st.tcs_out_patch_fits_subgroup {
                Scope::Subgroup
            } else {
                Scope::Workgroup
            };
            b.barrier(
                scope,
                scope,
                MemorySemantics::ACQ_REL,
                MemoryModes::MEM_SHARED,
            );
        }

        /* Only the first invocation of each patch writes the factors.  Up
         * to 32 vertices, every wave has one of those.
         */
        let invocation_id = b.sysval(Intrinsic::LoadInvocationId);
        let first = b.ieq_imm(invocation_id, 0);
        let control = if tcs_vertices_out <= 32 {
            SelectionControl::DivergentAlwaysTaken
        } else {
            SelectionControl::None
        };
        b.push_if_ctrl(first, control);

        let levels = st.hs_load_tess_levels(b, prim_mode);

        if hw.stores_dynamic_hs_control_word() {
            hs_store_dynamic_control_word(b);
        }

        let mode = b.sysval(Intrinsic::LoadTcsPrimitiveModeAmd);
        let is_tris = b.ieq_imm(mode, TessPrimitiveMode::Triangles as u32);
        b.push_if(is_tris);
        hs_store_tess_factors_for_tessellator(
            b,
            hw,
            TessPrimitiveMode::Triangles,
            &levels,
        );
        b.push_else();
        let is_lines = b.ieq_imm(mode, TessPrimitiveMode::Isolines as u32);
        b.push_if(is_lines);
        hs_store_tess_factors_for_tessellator(
            b,
            hw,
            TessPrimitiveMode::Isolines,
            &levels,
        );
        b.push_else();
        hs_store_tess_factors_for_tessellator(
            b,
            hw,
            TessPrimitiveMode::Quads,
            &levels,
        );
        b.pop_if();
        b.pop_if();

        let to_tes = b.sysval_sized(Intrinsic::LoadTcsTessLevelsToTesAmd, 1, 1);
        b.push_if(to_tes);
        st.hs_store_tess_factors_for_tes(b, &levels);
        b.pop_if();

        b.pop_if();
    });
}

/// Lowers TCS outputs to LDS and off-chip ring accesses and appends the
/// tess factor writes
///
/// Returns the LDS layout of one output patch.
pub fn lower_hs_outputs_to_mem(
    s: &mut Shader,
    mapper: &dyn LocationMapper,
    hw: &HardwareProfile,
    tes_inputs_read: u64,
    tes_patch_inputs_read: u32,
    pass_tessfactors_by_reg: bool,
) -> HsOutputLayout {
    assert!(s.info.stage == ShaderStage::TessCtrl);

    let (outer_var, inner_var) = if pass_tessfactors_by_reg {
        (
            Some(s.func.create_var("tess outer", 4, 32)),
            Some(s.func.create_var("tess inner", 4, 32)),
        )
    } else {
        (None, None)
    };

    let tcs_vertices_out = u32::from(s.info.tess.tcs_vertices_out);
    let mut st = TessIoState {
        tes_inputs_read: tes_inputs_read,
        tes_patch_inputs_read: tes_patch_inputs_read,
        tcs_out_patch_fits_subgroup: hw
            .tcs_out_patch_fits_subgroup(tcs_vertices_out),
        tcs_pass_tessfactors_by_reg: pass_tessfactors_by_reg,
        tess_level_outer: outer_var,
        tess_level_inner: inner_var,
        ..TessIoState::new(s, mapper)
    };
    let layout = st.hs_output_layout();

    s.map_instrs(|mut instr, ssa_alloc| {
        let Some(intrin) = instr.as_intrinsic_mut() else {
            return MappedInstrs::One(instr);
        };

        match intrin.intrinsic {
            Intrinsic::StoreOutput | Intrinsic::StorePerVertexOutput => {
                let mut b = SSAInstrBuilder::new(ssa_alloc);
                st.lower_hs_output_store(&mut b, intrin);
                b.as_mapped_instrs()
            }
            Intrinsic::LoadOutput | Intrinsic::LoadPerVertexOutput => {
                let dst = *intrin.dst.as_ssa().expect("Output load without a def");
                let mut b = SSAInstrBuilder::new(ssa_alloc);
                let val = st.lower_hs_output_load(&mut b, intrin);
                b.copy_to(dst, val);
                b.as_mapped_instrs()
            }
            Intrinsic::Barrier => {
                st.update_hs_barrier(&mut intrin.idx);
                MappedInstrs::One(instr)
            }
            _ => MappedInstrs::One(instr),
        }
    });

    hs_finale(s, &st, hw);

    debug!(
        "{}: HS outputs, LDS stride {} ({} per vertex), VRAM per-vertex {:#x} \
         per-patch {:#x}, fits subgroup {}, factors by reg {}",
        s.name,
        layout.output_patch_stride,
        layout.output_vertex_size,
        st.vram_per_vtx_out_mask(),
        st.vram_per_patch_out_mask(),
        st.tcs_out_patch_fits_subgroup,
        st.tcs_pass_tessfactors_by_reg
    );
    if DEBUG.verbose() {
        for slot in st.lds_per_vtx_out_mask().iter_set_bits() {
            debug!(
                "  slot {} -> LDS {}",
                slot,
                st.hs_output_lds_location(true, slot)
            );
        }
        for slot in st.vram_per_vtx_out_mask().iter_set_bits() {
            debug!(
                "  slot {} -> VRAM {}",
                slot,
                st.hs_output_vram_location(true, slot)
            );
        }
    }
    dump_after_pass("lower_hs_outputs_to_mem", s);

    layout
}

/// Lowers TES input loads to off-chip ring loads
pub fn lower_tes_inputs_to_mem(s: &mut Shader, mapper: &dyn LocationMapper) {
    assert!(s.info.stage == ShaderStage::TessEval);

    let st = TessIoState {
        tes_inputs_read: s.info.inputs_read,
        tes_patch_inputs_read: s.info.patch_inputs_read,
        ..TessIoState::new(s, mapper)
    };

    s.map_instrs(|instr, ssa_alloc| {
        let Some(intrin) = instr.as_intrinsic() else {
            return MappedInstrs::One(instr);
        };
        if !matches!(
            intrin.intrinsic,
            Intrinsic::LoadInput | Intrinsic::LoadPerVertexInput
        ) {
            return MappedInstrs::One(instr);
        }

        let dst = *intrin.dst.as_ssa().expect("Input load without a def");
        let mut b = SSAInstrBuilder::new(ssa_alloc);
        let val = st.lower_tes_input_load(&mut b, intrin);
        b.copy_to(dst, val);
        b.as_mapped_instrs()
    });

    debug!(
        "{}: TES inputs {:#x}, patch inputs {:#x}",
        s.name, st.tes_inputs_read, st.tes_patch_inputs_read
    );
    dump_after_pass("lower_tes_inputs_to_mem", s);
}
