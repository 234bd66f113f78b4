/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Geometry shaders on hardware without a geometry stage
//!
//! A GS becomes a handful of kernels dispatched for every draw:
//!
//!  1. The count kernel runs the GS over all input primitives and instances
//!     and writes the vertex and primitive counts not known at compile
//!     time.  A prefix sum over each count column follows.
//!  2. The pre-GS kernel turns the totals into an indexed indirect draw,
//!     clamps transform feedback and bumps statistics.
//!  3. The main GS runs the GS again, writing the index buffer and
//!     transform feedback.
//!  4. The rasterization shader is a vertex shader that re-runs the GS for
//!     a single output vertex and keeps only that vertex's outputs.
//!
//! Unrolled invocations are numbered `instance * gs_grid[0] + primitive`
//! in the count buffer.  Vertex IDs of the rasterization shader use
//! `(instance << primitives_log2) + primitive` instead, times a
//! power-of-two number of vertices per invocation, so that they are cheap
//! to decode.

use crate::dump_after_pass;
use crate::util::BitMask;
use crate::vtg_gs_query::gs_output_prim_vertices;
use crate::vtg_ir::*;
use crate::vtg_sw_gs_lib::*;
use crate::vtg_sw_gs_pre::{
    create_pre_gs, create_prefix_sum_kernel, PreGsOptions,
};

use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::mem::offset_of;

/// Vertex IDs reserved for each unrolled invocation in the rasterization
/// shader
pub fn output_vertex_id_stride(vertices_out: u16) -> u32 {
    u32::from(vertices_out.max(1)).next_power_of_two()
}

fn is_scalar_slot(slot: u32) -> bool {
    matches!(
        slot,
        VARYING_SLOT_PSIZ | VARYING_SLOT_LAYER | VARYING_SLOT_VIEWPORT
    )
}

fn output_location(intrin: &OpIntrinsic) -> u32 {
    let Some(offset) = intrin.io_offset_src().as_u32() else {
        panic!("Indirect output in {}", intrin);
    };
    intrin.io_semantics().location + offset
}

fn unrolled_id(b: &mut impl SSABuilder) -> Src {
    let (prim, instance) = global_invocation_id(b);
    let prims = load_geometry_param(b, GeometryParam::GsGrid(0));
    let instance_base = b.imul(instance, prims);
    b.iadd(instance_base, prim)
}

fn unrolled_index_id(b: &mut impl SSABuilder, max_verts: u32) -> Src {
    let (prim, instance) = global_invocation_id(b);
    let primitives_log2 = load_geometry_param(b, GeometryParam::PrimitivesLog2);
    let instance_base = b.ishl(instance, primitives_log2);
    let id = b.iadd(instance_base, prim);
    b.imul_imm(id, max_verts)
}

fn rewrite_invocation_id(s: &mut Shader, index: Src) {
    s.map_instrs(|instr, ssa_alloc| {
        let dst = match instr.as_intrinsic() {
            Some(intrin) if intrin.intrinsic == Intrinsic::LoadInvocationId => {
                *intrin.dst.as_ssa().unwrap()
            }
            _ => return MappedInstrs::One(instr),
        };
        let mut b = SSAInstrBuilder::new(ssa_alloc);
        let id = b.u2u(index, dst.bit_size());
        b.copy_to(dst, id);
        b.as_mapped_instrs()
    });
}

/// Runs all GS invocations of an input primitive in a loop in one
/// invocation
///
/// Must run before vertex and primitive counters are added so that the
/// counts cover every invocation.  The primitive is ended after each
/// iteration.  Each invocation may emit up to `vertices_out` vertices, so
/// the limit is scaled by the invocation count.  With a single invocation
/// the invocation ID is simply zero.
pub fn lower_gs_instancing(s: &mut Shader) {
    assert!(s.info.stage == ShaderStage::Geometry);
    let invocations = s.info.gs.invocations;
    if invocations <= 1 {
        rewrite_invocation_id(s, Src::new_zero());
        return;
    }

    let index = s.func.ssa_alloc.alloc(1, 16);
    rewrite_invocation_id(s, index.into());

    let counter = s.func.create_var("gs_invocation", 1, 16);
    let body = std::mem::take(&mut s.func.body);
    s.func.build_at_end(|b| {
        b.store_var(counter, Src::new_imm_u16(0), 0x1);
        b.push_loop();
        b.push_op(OpLoadVar {
            dst: index.into(),
            var: counter,
        });
        let done = b.uge(index.into(), Src::new_imm_u16(invocations.into()));
        b.push_if(done);
        b.jump(JumpKind::Break);
        b.pop_if();

        for node in body {
            b.push_node(node);
        }

        let next = b.iadd(index.into(), Src::new_imm_u16(1));
        b.store_var(counter, next, 0x1);
        b.intrin_nodst(Intrinsic::EndPrimitive, &[], Default::default());
        b.pop_loop();
    });

    s.info.gs.vertices_out *= u16::from(invocations);

    debug!("{}: unrolled {} GS invocations", s.name, invocations);
    dump_after_pass("lower_gs_instancing", s);
}

/// Reads GS inputs from the buffer written by the stage before
fn lower_gs_inputs(s: &mut Shader) {
    let class = s.info.gs.input_primitive;
    s.map_instrs(|instr, ssa_alloc| {
        let intrin = match instr.as_intrinsic() {
            Some(intrin)
                if intrin.intrinsic == Intrinsic::LoadPerVertexInput =>
            {
                intrin
            }
            _ => return MappedInstrs::One(instr),
        };
        let Some(offset) = intrin.io_offset_src().as_u32() else {
            panic!("Indirect GS input in {}", intrin);
        };
        let location = intrin.io_semantics().location + offset;
        let dst = *intrin.dst.as_ssa().unwrap();
        assert!(dst.bit_size() == 32, "GS inputs are 32-bit");
        let component = u32::from(intrin.idx.component);
        let vert_in_prim = *intrin.io_arrayed_index_src();

        let mut b = SSAInstrBuilder::new(ssa_alloc);
        let topology = b.sysval(Intrinsic::LoadInputTopology);
        let prim = b.sysval(Intrinsic::LoadPrimitiveId);
        let provoking_last = b.sysval(Intrinsic::LoadProvokingLast);
        let flatshade_first = b.ieq_imm(provoking_last, 0);
        let nr = load_geometry_param(&mut b, GeometryParam::VsGrid(0));
        let vertex = vertex_id_for_topology(
            &mut b,
            class,
            topology,
            prim,
            vert_in_prim,
            nr,
            flatshade_first,
        );

        let instance = b.sysval(Intrinsic::LoadInstanceId);
        let instance_base = b.imul(instance, nr);
        let unrolled = b.iadd(instance_base, vertex);

        let addr = geometry_input_address(&mut b, unrolled, location);
        let addr = b.iadd_addr(addr, Src::new_imm_u32(component * 4));
        let value = b.load_global_constant(dst.comps(), 32, addr);
        b.copy_to(dst, value);
        b.as_mapped_instrs()
    });
}

/// Lowers the IDs that differ between the GS kernels and the original GS
fn gs_param_sysval(
    b: &mut impl SSABuilder,
    intrinsic: Intrinsic,
) -> Option<Src> {
    match intrinsic {
        Intrinsic::LoadFlatMask => {
            Some(load_geometry_param(b, GeometryParam::FlatOutputs))
        }
        Intrinsic::LoadInputTopology => {
            Some(load_geometry_param(b, GeometryParam::InputTopology))
        }
        _ => None,
    }
}

/// Rewrites system values of a GS running as a compute-like grid
fn lower_gs_ids(s: &mut Shader) {
    s.map_instrs(|instr, ssa_alloc| {
        let (intrinsic, dst) = match instr.as_intrinsic() {
            Some(intrin) => match intrin.dst.as_ssa() {
                Some(dst) => (intrin.intrinsic, *dst),
                None => return MappedInstrs::One(instr),
            },
            None => return MappedInstrs::One(instr),
        };

        let mut b = SSAInstrBuilder::new(ssa_alloc);
        let value = match intrinsic {
            Intrinsic::LoadPrimitiveId => global_invocation_id(&mut b).0,
            Intrinsic::LoadInstanceId => global_invocation_id(&mut b).1,
            _ => match gs_param_sysval(&mut b, intrinsic) {
                Some(value) => value,
                None => return MappedInstrs::One(instr),
            },
        };
        let value = b.u2u(value, dst.bit_size());
        b.copy_to(dst, value);
        b.as_mapped_instrs()
    });
}

/// Finds the counts that are the same constant in every invocation
///
/// Streams the shader never sets counts for produce nothing.
fn static_counts(
    s: &Shader,
) -> [[Option<u32>; MAX_VERTEX_STREAMS]; GS_NUM_COUNTERS] {
    let mut seen = [false; MAX_VERTEX_STREAMS];
    let mut counts = [[Some(0); MAX_VERTEX_STREAMS]; GS_NUM_COUNTERS];
    for intrin in s.intrinsics(Intrinsic::SetVertexAndPrimitiveCount) {
        let stream = usize::from(intrin.idx.stream_id);
        for (counter, src) in intrin.srcs.iter().enumerate() {
            let count = &mut counts[counter][stream];
            if !seen[stream] {
                *count = src.as_u32();
            } else if *count != src.as_u32() {
                *count = None;
            }
        }
        seen[stream] = true;
    }
    counts
}

fn create_count_shader(gs: &Shader, layout: &GsCountLayout) -> Shader {
    let mut s = gs.clone();
    s.name = format!("{}_count", gs.name);
    s.info.stage = ShaderStage::Compute;
    s.info.has_transform_feedback_varyings = false;
    s.xfb = None;

    s.map_instrs(|instr, ssa_alloc| {
        let Some(intrin) = instr.as_intrinsic() else {
            return MappedInstrs::One(instr);
        };
        match intrin.intrinsic {
            Intrinsic::EmitVertexWithCounter
            | Intrinsic::EndPrimitiveWithCounter
            | Intrinsic::StoreOutput => MappedInstrs::None,
            Intrinsic::SetVertexAndPrimitiveCount => {
                let stream = usize::from(intrin.idx.stream_id);
                let mut b = SSAInstrBuilder::new(ssa_alloc);
                let id = unrolled_id(&mut b);
                for counter in 0..GS_NUM_COUNTERS {
                    let addr = layout.count_address(&mut b, id, stream, counter);
                    if let Some(addr) = addr {
                        let count = intrin.srcs[counter];
                        b.store_global(count, addr, Access::empty());
                    }
                }
                b.as_mapped_instrs()
            }
            _ => MappedInstrs::One(instr),
        }
    });
    s.opt_dce();

    dump_after_pass("create_gs_count_shader", &s);
    s
}

fn collect_used_ssa(body: &[Node], used: &mut HashSet<u32>) {
    for node in body {
        match node {
            Node::Instr(instr) => {
                for src in instr.srcs() {
                    used.extend(src.iter_ssa().map(|ssa| ssa.idx()));
                }
            }
            Node::If(nif) => {
                used.extend(nif.cond.iter_ssa().map(|ssa| ssa.idx()));
                collect_used_ssa(&nif.then_body, used);
                collect_used_ssa(&nif.else_body, used);
            }
            Node::Loop(nloop) => collect_used_ssa(&nloop.body, used),
        }
    }
}

fn is_memory_write(instr: &Instr) -> bool {
    instr.as_intrinsic().is_some_and(|intrin| {
        matches!(
            intrin.intrinsic,
            Intrinsic::StoreGlobal
                | Intrinsic::GlobalAtomic
                | Intrinsic::GlobalAtomicSwap
        )
    })
}

/// Removes global atomics whose results are unused and, unless
/// `atomics_only`, all global stores
fn strip_unused_writes(s: &mut Shader, atomics_only: bool) -> bool {
    let mut used = HashSet::new();
    collect_used_ssa(&s.func.body, &mut used);

    let mut progress = false;
    s.map_instrs(|instr, _| {
        let strip = match instr.as_intrinsic() {
            Some(intrin) => match intrin.intrinsic {
                Intrinsic::StoreGlobal => !atomics_only,
                Intrinsic::GlobalAtomic | Intrinsic::GlobalAtomicSwap => intrin
                    .dst
                    .as_ssa()
                    .map_or(true, |ssa| !used.contains(&ssa.idx())),
                _ => false,
            },
            None => false,
        };
        if strip {
            progress = true;
            MappedInstrs::None
        } else {
            MappedInstrs::One(instr)
        }
    });
    progress
}

fn instr_count(s: &Shader) -> usize {
    let mut count = 0;
    s.func.for_each_instr(|_| count += 1);
    count
}

/// Strips unused memory writes until nothing changes
///
/// Removing one write can make another one's result unused, and dead
/// control flow can hide writes nothing depends on.
fn strip_writes_to_fixed_point(s: &mut Shader, atomics_only: bool) {
    loop {
        let before = instr_count(s);
        let mut progress = strip_unused_writes(s, atomics_only);
        s.opt_dce();
        progress |= s.opt_dead_cf();
        progress |= instr_count(s) != before;
        if !progress {
            break;
        }
    }
}

/// Strips all memory writes from a shader if none of them is needed
///
/// Returns true, leaving the shader untouched, if some write's result feeds
/// the rest of the shader.
fn strip_side_effects(s: &mut Shader) -> bool {
    let mut stripped = s.clone();
    strip_writes_to_fixed_point(&mut stripped, false);

    let mut remaining = false;
    stripped
        .func
        .for_each_instr(|instr| remaining |= is_memory_write(instr));
    if !remaining {
        *s = stripped;
    }
    remaining
}

struct RastOutput {
    comps: u8,
    temp: VarId,
    selected: VarId,
}

fn store_rast_output(
    b: &mut impl SSABuilder,
    value: Src,
    location: u32,
    offset: u32,
    ty: AluType,
) {
    let mut sem = IoSemantics::new(location);
    sem.num_slots = (offset + 1).try_into().unwrap();
    b.intrin_nodst(
        Intrinsic::StoreOutput,
        &[value, Src::new_imm_u32(offset)],
        IntrinsicIndices {
            write_mask: comp_mask(value.comps()),
            io_semantics: sem,
            src_type: ty,
            ..Default::default()
        },
    );
}

/// Builds the vertex shader that rasterizes the GS output
///
/// Each vertex ID selects one output vertex of one unrolled invocation.
/// The GS runs in full and every emit on stream 0 keeps the outputs if it
/// is the selected vertex.  Returns the shader and whether it kept memory
/// writes because some of them are needed.
fn create_rast_shader(gs: &Shader, max_verts: u32) -> (Shader, bool) {
    assert!(max_verts.is_power_of_two());
    let mut s = gs.clone();
    s.name = format!("{}_rast", gs.name);
    s.info.stage = ShaderStage::Vertex;
    s.info.has_transform_feedback_varyings = false;
    s.xfb = None;

    let side_effects = strip_side_effects(&mut s);

    let points = gs.info.gs.output_primitive == Prim::Points;
    if !points {
        s.info.outputs_written &= !slot_bit(VARYING_SLOT_PSIZ);
    }

    let mut outputs = BTreeMap::new();
    for slot in s.info.outputs_written.iter_set_bits() {
        assert!(
            slot != VARYING_SLOT_CULL_DIST1,
            "Cull distances must be compact"
        );
        let comps = if is_scalar_slot(slot) { 1 } else { 4 };
        let temp = s.func.create_var(&format!("out{}_temp", slot), comps, 32);
        let selected =
            s.func
                .create_var(&format!("out{}_selected", slot), comps, 32);
        outputs.insert(
            slot,
            RastOutput {
                comps: comps,
                temp: temp,
                selected: selected,
            },
        );
    }

    let (output_id, instance_id, primitive_id) = s.func.build_at_start(|b| {
        let raw_id = b.sysval(Intrinsic::LoadVertexId);
        let output_id = b.iand_imm(raw_id, max_verts - 1);
        let unrolled = b.ushr_imm(raw_id, max_verts.trailing_zeros());

        let primitives_log2 =
            load_geometry_param(b, GeometryParam::PrimitivesLog2);
        let instance_id = b.ushr(unrolled, primitives_log2);
        let prims = b.ishl(Src::new_imm_u32(1), primitives_log2);
        let prim_mask = b.isub(prims, Src::new_imm_u32(1));
        let primitive_id = b.iand(unrolled, prim_mask);
        (output_id, instance_id, primitive_id)
    });

    s.map_instrs(|instr, ssa_alloc| {
        let Some(intrin) = instr.as_intrinsic() else {
            return MappedInstrs::One(instr);
        };
        let mut b = SSAInstrBuilder::new(ssa_alloc);
        match intrin.intrinsic {
            Intrinsic::StoreOutput => {
                let location = output_location(intrin);
                match outputs.get(&location) {
                    Some(out) => {
                        assert!(intrin.srcs[0].bit_size() == 32);
                        b.store_var_components(
                            out.temp,
                            intrin.srcs[0],
                            intrin.idx.component,
                            intrin.idx.write_mask,
                        );
                    }
                    None => assert!(
                        location == VARYING_SLOT_PSIZ,
                        "Output {} is not in outputs_written",
                        location
                    ),
                }
            }
            Intrinsic::EmitVertexWithCounter => {
                /* Only stream 0 is rasterized */
                if intrin.idx.stream_id == 0 {
                    let this_vertex = b.ieq(intrin.srcs[0], output_id);
                    for out in outputs.values() {
                        let data = b.load_var(out.temp, out.comps, 32);
                        let orig = b.load_var(out.selected, out.comps, 32);
                        let value = b.bcsel(this_vertex, data, orig);
                        b.store_var(out.selected, value, comp_mask(out.comps));
                    }
                }
            }
            Intrinsic::EndPrimitiveWithCounter
            | Intrinsic::SetVertexAndPrimitiveCount => (),
            Intrinsic::LoadPrimitiveId | Intrinsic::LoadInstanceId => {
                let dst = *intrin.dst.as_ssa().unwrap();
                let id = if intrin.intrinsic == Intrinsic::LoadPrimitiveId {
                    primitive_id
                } else {
                    instance_id
                };
                let id = b.u2u(id, dst.bit_size());
                b.copy_to(dst, id);
            }
            other => match gs_param_sysval(&mut b, other) {
                Some(value) => {
                    let dst = *intrin.dst.as_ssa().unwrap();
                    let value = b.u2u(value, dst.bit_size());
                    b.copy_to(dst, value);
                }
                None => return MappedInstrs::One(instr),
            },
        }
        b.as_mapped_instrs()
    });

    let has_psiz = outputs.contains_key(&VARYING_SLOT_PSIZ);
    s.func.build_at_end(|b| {
        for (slot, out) in &outputs {
            let value = b.load_var(out.selected, out.comps, 32);

            /* Clip distances are one compact array starting at DIST0 */
            let (location, offset) = if *slot == VARYING_SLOT_CLIP_DIST1 {
                (VARYING_SLOT_CLIP_DIST0, 1)
            } else {
                (*slot, 0)
            };
            store_rast_output(b, value, location, offset, AluType::UINT32);
        }

        /* Points without a point size have size 1 */
        if points && !has_psiz {
            store_rast_output(
                b,
                Src::new_imm_f32(1.0),
                VARYING_SLOT_PSIZ,
                0,
                AluType::FLOAT32,
            );
        }
    });
    if points {
        s.info.outputs_written |= slot_bit(VARYING_SLOT_PSIZ);
    }

    debug!(
        "{}: {} rasterized outputs, memory writes kept {}",
        s.name,
        outputs.len(),
        side_effects
    );
    dump_after_pass("create_gs_rast_shader", &s);
    (s, side_effects)
}

/// The last few vertices of a strip, newest first
struct OutputRing {
    comps: u8,
    vars: Vec<VarId>,
}

struct MainGsPass<'a> {
    layout: &'a GsCountLayout,
    xfb: Option<XfbInfo>,
    outputs: BTreeMap<u32, OutputRing>,
    output_primitive: Prim,
    verts_in_prim: u32,
    max_verts: u32,
    rasterizer_discard: bool,
    counter: VarId,
}

impl MainGsPass<'_> {
    /// Only the rasterization stream has an index buffer, and nothing reads
    /// it if rasterization is off
    fn writes_indices(&self, stream: u8) -> bool {
        stream == 0 && !self.rasterizer_discard
    }

    fn lower_end_primitive(&self, b: &mut impl SSABuilder, intrin: &OpIntrinsic) {
        if !self.writes_indices(intrin.idx.stream_id) {
            return;
        }

        let unrolled = unrolled_id(b);
        let index_offset = self.layout.previous_vertices(b, 0, unrolled);
        let prim_offset = if self.output_primitive != Prim::Points {
            Some(self.layout.previous_primitives(b, 0, unrolled))
        } else {
            None
        };
        let geometry_base = unrolled_index_id(b, self.max_verts);
        let index_buffer =
            load_geometry_param(b, GeometryParam::OutputIndexBuffer);
        end_primitive(
            b,
            self.counter,
            index_buffer,
            intrin.srcs[0],
            intrin.srcs[1],
            intrin.srcs[2],
            index_offset,
            prim_offset,
            geometry_base,
        );
    }

    fn write_xfb(
        &self,
        b: &mut impl SSABuilder,
        xfb: &XfbInfo,
        stream: u8,
        index_in_strip: Src,
        prim_in_invocation: Src,
    ) {
        let verts = self.verts_in_prim;

        let unrolled = unrolled_id(b);
        let invocation_base =
            self.layout
                .previous_xfb_primitives(b, usize::from(stream), unrolled);
        let prim_index = b.iadd(invocation_base, prim_in_invocation);
        let base_index = b.imul_imm(prim_index, verts);

        let xfb_prims =
            load_geometry_param(b, GeometryParam::XfbPrims(stream.into()));
        let fits = b.ult(prim_index, xfb_prims);
        b.push_if(fits);

        for output in &xfb.outputs {
            let buffer = usize::from(output.buffer);
            if xfb.buffer_to_stream[buffer] != stream
                || output.component_mask == 0
            {
                continue;
            }
            let stride = xfb.buffers[buffer].stride;

            for vert in 0..verts {
                /* Ring entry 0 is the newest vertex, the last one of the
                 * primitive
                 */
                let v = (verts - 1 - vert) as usize;
                let value = match self.outputs.get(&output.location) {
                    Some(ring) => b.load_var(ring.vars[v], ring.comps, 32),
                    None => b.undef(4, 32),
                };

                /* Components the shader never wrote are captured as zero */
                let mut comps = [Src::new_zero(); 4];
                for (c, comp) in comps.iter_mut().enumerate() {
                    if c < usize::from(value.comps()) {
                        *comp = b.channel(value, c as u8);
                    }
                }
                let value = b.vec(&comps);

                let rotated = if verts == 3 {
                    let provoking_last =
                        b.sysval(Intrinsic::LoadProvokingLast);
                    let flatshade_first = b.ieq_imm(provoking_last, 0);
                    map_vertex_in_tri_strip(
                        b,
                        index_in_strip,
                        vert,
                        flatshade_first,
                    )
                } else {
                    Src::new_imm_u32(vert)
                };

                let addr = xfb_vertex_address(
                    b,
                    buffer,
                    base_index,
                    rotated,
                    stride,
                    output.offset,
                );
                let data = b.channels(value, output.component_mask);
                b.store_global(data, addr, Access::XFB);
            }
        }

        b.pop_if();
    }

    /// Captures every primitive completed by this vertex, then shifts the
    /// ring to make room for the next vertex
    fn lower_emit_vertex_xfb(
        &self,
        b: &mut impl SSABuilder,
        xfb: &XfbInfo,
        intrin: &OpIntrinsic,
    ) {
        let index_in_strip = intrin.srcs[1];
        let first_prim = Src::new_imm_u32(self.verts_in_prim - 1);
        let complete = b.uge(index_in_strip, first_prim);
        b.push_if(complete);
        self.write_xfb(
            b,
            xfb,
            intrin.idx.stream_id,
            index_in_strip,
            intrin.srcs[3],
        );
        b.pop_if();

        for ring in self.outputs.values() {
            for v in (1..ring.vars.len()).rev() {
                let value = b.load_var(ring.vars[v - 1], ring.comps, 32);
                b.store_var(ring.vars[v], value, comp_mask(ring.comps));
            }
        }
    }

    fn lower_intrin(
        &self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
    ) -> bool {
        match intrin.intrinsic {
            Intrinsic::StoreOutput => {
                let location = output_location(intrin);
                if let Some(ring) = self.outputs.get(&location) {
                    assert!(intrin.srcs[0].bit_size() == 32);
                    b.store_var_components(
                        ring.vars[0],
                        intrin.srcs[0],
                        intrin.idx.component,
                        intrin.idx.write_mask,
                    );
                }
            }
            Intrinsic::SetVertexAndPrimitiveCount => {
                /* Points have no strips to end, so write their indices
                 * once per invocation
                 */
                if self.output_primitive == Prim::Points {
                    self.lower_end_primitive(b, intrin);
                }
            }
            Intrinsic::EndPrimitiveWithCounter => {
                if self.output_primitive != Prim::Points
                    && self.writes_indices(intrin.idx.stream_id)
                {
                    /* Only complete primitives are drawn */
                    let verts = Src::new_imm_u32(self.verts_in_prim);
                    let complete = b.uge(intrin.srcs[1], verts);
                    b.push_if(complete);
                    self.lower_end_primitive(b, intrin);
                    b.pop_if();
                }
            }
            Intrinsic::EmitVertexWithCounter => {
                if let Some(xfb) = &self.xfb {
                    self.lower_emit_vertex_xfb(b, xfb, intrin);
                }
            }
            _ => return false,
        }
        true
    }
}

/// Component count of every output, from the widest store to it
fn output_components(s: &Shader) -> BTreeMap<u32, u8> {
    let mut comps = BTreeMap::new();
    for intrin in s.intrinsics(Intrinsic::StoreOutput) {
        let location = output_location(intrin);
        let end = u32::from(intrin.idx.component)
            + intrin.idx.write_mask.last_bit();
        let count = comps.entry(location).or_insert(0_u8);
        *count = (*count).max(end.try_into().unwrap());
    }
    comps
}

/// The kernels a software geometry shader is split into
pub struct SwGsShaders {
    /// Writes the index buffer and transform feedback, dispatched over
    /// `gs_grid`
    pub gs: Shader,
    /// Writes the counts not known at compile time, if there are any
    pub count: Option<Shader>,
    /// Prefix-sums the count buffer, one workgroup per count word
    pub prefix_sum: Option<Shader>,
    pub pre_gs: Shader,
    pub rast: Shader,
    /// Topology of the rasterization shader's indexed draw
    pub out_prim: Prim,
    /// Dwords per unrolled invocation in the count buffer
    pub count_words: u32,
}

/// Splits a geometry shader into the kernels of the software geometry
/// pipeline
///
/// Instancing must already be lowered and the emits must carry their
/// counters.  With `rasterizer_discard` no index buffer is written.
pub fn lower_sw_gs(mut gs: Shader, rasterizer_discard: bool) -> SwGsShaders {
    assert!(gs.info.stage == ShaderStage::Geometry);
    assert!(
        !gs.has_intrinsic(Intrinsic::LoadInvocationId),
        "GS instancing must be lowered first"
    );

    lower_gs_inputs(&mut gs);

    let layout = GsCountLayout::new(static_counts(&gs));
    let output_primitive = gs.info.gs.output_primitive;
    let verts_in_prim = gs_output_prim_vertices(output_primitive);
    let max_verts = output_vertex_id_stride(gs.info.gs.vertices_out);

    let (rast, side_effects_for_rast) = create_rast_shader(&gs, max_verts);

    lower_gs_ids(&mut gs);

    let count = if layout.count_stride_el > 0 {
        Some(create_count_shader(&gs, &layout))
    } else {
        None
    };

    let components = output_components(&gs);
    let mut outputs = BTreeMap::new();
    for slot in gs.info.outputs_written.iter_set_bits() {
        let comps = components.get(&slot).copied().unwrap_or(0);
        if comps == 0 {
            gs.info.outputs_written &= !slot_bit(slot);
            continue;
        }
        let vars = (0..verts_in_prim)
            .map(|v| gs.func.create_var(&format!("out{}_{}", slot, v), comps, 32))
            .collect();
        outputs.insert(
            slot,
            OutputRing {
                comps: comps,
                vars: vars,
            },
        );
    }

    let pass = MainGsPass {
        layout: &layout,
        xfb: gs.xfb.clone(),
        outputs: outputs,
        output_primitive: output_primitive,
        verts_in_prim: verts_in_prim,
        max_verts: max_verts,
        rasterizer_discard: rasterizer_discard,
        counter: gs.func.create_var("index", 1, 32),
    };
    gs.map_instrs(|instr, ssa_alloc| {
        let Some(intrin) = instr.as_intrinsic() else {
            return MappedInstrs::One(instr);
        };
        let mut b = SSAInstrBuilder::new(ssa_alloc);
        if pass.lower_intrin(&mut b, intrin) {
            b.as_mapped_instrs()
        } else {
            MappedInstrs::One(instr)
        }
    });
    gs.opt_dce();

    /* If at least one vertex is always rasterized, the rasterization shader
     * runs the writes it kept, so the unused ones can go from here.
     */
    let rasterizes_a_vertex = !rasterizer_discard
        && matches!(layout.static_count[GS_COUNTER_VERTICES][0], Some(n) if n > 0);
    if rasterizes_a_vertex && side_effects_for_rast {
        strip_writes_to_fixed_point(&mut gs, true);
    }

    let pre_gs = create_pre_gs(&PreGsOptions {
        layout: &layout,
        rasterizer_discard: rasterizer_discard,
        restart: output_primitive != Prim::Points,
        xfb: gs.xfb.as_ref(),
        vertices_per_prim: verts_in_prim,
        streams: gs.info.gs.active_stream_mask,
        invocations: gs.info.gs.invocations.max(1).into(),
    });
    let prefix_sum = count
        .as_ref()
        .map(|_| create_prefix_sum_kernel(layout.count_stride_el));

    debug!(
        "{}: software GS, {} count words, {} vertex IDs per invocation",
        gs.name, layout.count_stride_el, max_verts
    );
    dump_after_pass("lower_sw_gs", &gs);

    SwGsShaders {
        gs: gs,
        count: count,
        prefix_sum: prefix_sum,
        pre_gs: pre_gs,
        rast: rast,
        out_prim: output_primitive,
        count_words: layout.count_stride_el,
    }
}

/// Turns the outputs of a VS or TES feeding a software GS into stores to
/// its vertex output buffer
///
/// The stage runs as a (vertices, instances) grid, so the vertex written is
/// `instance * vertices + vertex`.  Tessellation unrolls instancing, so a
/// TES only uses its vertex index.
pub fn lower_vs_before_gs(s: &mut Shader) -> bool {
    let stage = s.info.stage;
    let mask = Src::new_imm_u64(s.info.outputs_written);

    let mut progress = false;
    s.map_instrs(|instr, ssa_alloc| {
        let intrin = match instr.as_intrinsic() {
            Some(intrin) if intrin.intrinsic == Intrinsic::StoreOutput => {
                intrin
            }
            _ => return MappedInstrs::One(instr),
        };
        progress = true;

        let location = output_location(intrin);
        let value = intrin.srcs[0];
        assert!(value.bit_size() == 32, "Vertex outputs are 32-bit");

        let mut b = SSAInstrBuilder::new(ssa_alloc);
        let (buffer, nr_verts) = match stage {
            ShaderStage::Vertex => {
                let buffer =
                    b.sysval_sized(Intrinsic::LoadVsOutputBufferAgx, 1, 64);
                let ia =
                    b.sysval_sized(Intrinsic::LoadInputAssemblyBufferAgx, 1, 64);
                let field = offset_of!(InputAssemblyParams, verts_per_instance);
                let addr = b.iadd(ia, Src::new_imm_u64(field as u64));
                (buffer, b.load_global_constant(1, 32, addr))
            }
            ShaderStage::TessEval => {
                let params =
                    b.sysval_sized(Intrinsic::LoadTessParamBufferAgx, 1, 64);
                let field = offset_of!(TessParams, tes_buffer);
                let addr = b.iadd(params, Src::new_imm_u64(field as u64));
                (b.load_global_constant(1, 64, addr), Src::new_zero())
            }
            _ => panic!("{:?} cannot feed a software GS", stage),
        };

        let (vertex, instance) = global_invocation_id(&mut b);
        let instance_base = b.imul(instance, nr_verts);
        let linear_id = b.iadd(instance_base, vertex);

        let addr =
            vertex_output_address(&mut b, buffer, mask, linear_id, location);
        let component = u32::from(intrin.idx.component);
        let addr = b.iadd_addr(addr, Src::new_imm_u32(component * 4));
        b.intrin_nodst(
            Intrinsic::StoreGlobal,
            &[value, addr],
            IntrinsicIndices {
                write_mask: intrin.idx.write_mask,
                ..Default::default()
            },
        );
        b.as_mapped_instrs()
    });

    if progress {
        debug!(
            "{}: outputs {:#x} to the GS input buffer",
            s.name, s.info.outputs_written
        );
        dump_after_pass("lower_vs_before_gs", s);
    }
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtg_interp::{Event, Interp};
    use crate::vtg_prerast_out::build_store_output;

    const PARAMS: u64 = 0x10000;
    const IB: u64 = 0x20000;
    const XFB_BUF: u64 = 0x30000;
    const COUNT_BUF: u64 = 0x40000;

    fn emit(b: &mut impl SSABuilder, srcs: [u32; 4]) {
        let srcs = srcs.map(Src::new_imm_u32);
        b.intrin_nodst(
            Intrinsic::EmitVertexWithCounter,
            &srcs,
            Default::default(),
        );
    }

    fn end_prim(b: &mut impl SSABuilder, srcs: [u32; 3]) {
        let srcs = srcs.map(Src::new_imm_u32);
        b.intrin_nodst(
            Intrinsic::EndPrimitiveWithCounter,
            &srcs,
            Default::default(),
        );
    }

    fn set_counts(b: &mut impl SSABuilder, srcs: [Src; 3]) {
        b.intrin_nodst(
            Intrinsic::SetVertexAndPrimitiveCount,
            &srcs,
            Default::default(),
        );
    }

    fn store_u32x4(b: &mut impl SSABuilder, slot: u32, vals: [u32; 4]) {
        let comps = vals.map(Src::new_imm_u32);
        let v = b.vec(&comps);
        build_store_output(b, v, slot, 0, AluType::UINT32, false, 0);
    }

    /// A GS drawing one triangle, vertex `i` at x = 10 + i
    fn triangle_gs() -> Shader {
        let mut s = Shader::new(ShaderStage::Geometry, "tri");
        s.info.outputs_written = slot_bit(VARYING_SLOT_POS);
        s.info.gs.vertices_out = 3;
        s.info.gs.input_primitive = Prim::Triangles;
        s.info.gs.output_primitive = Prim::TriangleStrip;
        s.info.gs.active_stream_mask = 0x1;
        s.info.gs.invocations = 1;
        s.func.build_at_end(|b| {
            for i in 0..3 {
                store_u32x4(b, VARYING_SLOT_POS, [10 + i, 0, 0, 1]);
                emit(b, [i, i, 0, 0]);
            }
            end_prim(b, [3, 3, 1]);
            let [v, p, x] = [3, 1, 1].map(Src::new_imm_u32);
            set_counts(b, [v, p, x]);
        });
        s
    }

    /// A GS emitting a single point with a vec4 varying
    fn point_gs() -> Shader {
        let mut s = Shader::new(ShaderStage::Geometry, "point");
        s.info.outputs_written =
            slot_bit(VARYING_SLOT_POS) | slot_bit(VARYING_SLOT_VAR0);
        s.info.gs.vertices_out = 1;
        s.info.gs.input_primitive = Prim::Points;
        s.info.gs.output_primitive = Prim::Points;
        s.info.gs.active_stream_mask = 0x1;
        s.info.gs.invocations = 1;
        s.func.build_at_end(|b| {
            store_u32x4(b, VARYING_SLOT_POS, [0, 0, 0, 1]);
            store_u32x4(b, VARYING_SLOT_VAR0, [1, 2, 3, 4]);
            emit(b, [0, 0, 0, 0]);
            let [v, p, x] = [1, 1, 1].map(Src::new_imm_u32);
            set_counts(b, [v, p, x]);
        });
        s
    }

    fn gs_interp(gid: [u64; 3], params: &[(GeometryParam, u64)]) -> Interp {
        let mut interp = Interp::new();
        interp.set_sysval(Intrinsic::LoadGeometryParamBufferAgx, &[PARAMS]);
        interp.set_sysval(Intrinsic::LoadGlobalInvocationId, &gid);
        interp.set_sysval(Intrinsic::LoadProvokingLast, &[0]);
        write_geometry_params(&mut interp.global, PARAMS, params);
        interp
    }

    fn count_intrinsics(s: &Shader, intrinsic: Intrinsic) -> usize {
        s.intrinsics(intrinsic).len()
    }

    #[test]
    fn test_static_counts_need_no_count_shader() {
        let out = lower_sw_gs(triangle_gs(), false);
        assert_eq!(out.count_words, 0);
        assert!(out.count.is_none());
        assert!(out.prefix_sum.is_none());
        assert_eq!(out.out_prim, Prim::TriangleStrip);
        assert!(!out.gs.has_intrinsic(Intrinsic::EmitVertexWithCounter));
        assert!(!out.gs.has_intrinsic(Intrinsic::StoreOutput));
    }

    #[test]
    fn test_main_gs_writes_strip_indices() {
        let out = lower_sw_gs(triangle_gs(), false);

        let mut interp = gs_interp(
            [1, 0, 0],
            &[
                (GeometryParam::GsGrid(0), 2),
                (GeometryParam::PrimitivesLog2, 1),
                (GeometryParam::OutputIndexBuffer, IB),
            ],
        );
        interp.run(&out.gs.func);

        /* Invocation 1 starts after three vertices and one restart, and
         * its vertex IDs start at 4
         */
        let ib: Vec<u32> =
            (0..8).map(|i| interp.global.read_u32(IB + 4 * i)).collect();
        assert_eq!(ib[4..], [4, 5, 6, u32::MAX]);
        assert!(!interp.global.is_written(IB));
    }

    #[test]
    fn test_rasterizer_discard_skips_indices() {
        let out = lower_sw_gs(triangle_gs(), true);
        assert!(!out.gs.has_intrinsic(Intrinsic::StoreGlobal));
    }

    #[test]
    fn test_rast_selects_emitted_vertex() {
        let out = lower_sw_gs(triangle_gs(), false);
        assert_eq!(out.rast.info.stage, ShaderStage::Vertex);
        assert_eq!(out.rast.name, "tri_rast");

        let mut interp = gs_interp(
            [0, 0, 0],
            &[(GeometryParam::PrimitivesLog2, 1)],
        );
        /* Vertex 2 of primitive 1 */
        interp.set_sysval(Intrinsic::LoadVertexId, &[4 + 2]);
        interp.run(&out.rast.func);

        let pos: Vec<u64> = interp
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Output {
                    location: VARYING_SLOT_POS,
                    value,
                    ..
                } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(pos, [12, 0, 0, 1]);
        assert!(!interp.events.iter().any(|e| matches!(e, Event::Emit { .. })));
    }

    #[test]
    fn test_rast_points_get_point_size() {
        let out = lower_sw_gs(point_gs(), false);
        assert!(out.rast.info.outputs_written & slot_bit(VARYING_SLOT_PSIZ) != 0);

        let mut interp = gs_interp([0, 0, 0], &[]);
        interp.set_sysval(Intrinsic::LoadVertexId, &[0]);
        interp.run(&out.rast.func);

        let psiz = interp.events.iter().find_map(|e| match e {
            Event::Output {
                location: VARYING_SLOT_PSIZ,
                value,
                ..
            } => Some(*value),
            _ => None,
        });
        assert_eq!(psiz, Some(u64::from(1.0_f32.to_bits())));
    }

    #[test]
    fn test_rast_clip_dist1_goes_to_dist0() {
        let mut gs = point_gs();
        gs.info.outputs_written |= slot_bit(VARYING_SLOT_CLIP_DIST1);
        gs.func.build_at_start(|b| {
            store_u32x4(b, VARYING_SLOT_CLIP_DIST1, [5, 6, 7, 8]);
        });
        let out = lower_sw_gs(gs, false);

        let stores = out.rast.intrinsics(Intrinsic::StoreOutput);
        let clip = stores
            .iter()
            .find(|i| i.io_semantics().location == VARYING_SLOT_CLIP_DIST0)
            .unwrap();
        assert_eq!(clip.srcs[1].as_u32(), Some(1));
        assert!(!stores
            .iter()
            .any(|i| i.io_semantics().location == VARYING_SLOT_CLIP_DIST1));
    }

    #[test]
    #[should_panic]
    fn test_rast_rejects_cull_dist1() {
        let mut gs = point_gs();
        gs.info.outputs_written |= slot_bit(VARYING_SLOT_CULL_DIST1);
        lower_sw_gs(gs, false);
    }

    #[test]
    fn test_used_atomics_stay_in_rast() {
        const ATOMIC: u64 = 0x50000;
        const VAR1: u32 = VARYING_SLOT_VAR0 + 1;
        let mut gs = point_gs();
        gs.info.outputs_written |= slot_bit(VAR1);
        gs.func.build_at_start(|b| {
            let addr = Src::new_imm_u64(ATOMIC);
            let old = b.global_atomic_add(addr, Src::new_imm_u32(1));
            b.store_global(old, Src::new_imm_u64(ATOMIC + 8), Access::empty());
            build_store_output(
                b,
                old,
                VAR1,
                0,
                AluType::UINT32,
                false,
                0,
            );
            b.global_atomic_add(addr, Src::new_imm_u32(2));
        });
        let out = lower_sw_gs(gs, false);

        /* The rasterization shader needs the first atomic's result, so it
         * keeps every write.  The main GS keeps only what is still used.
         */
        assert_eq!(count_intrinsics(&out.rast, Intrinsic::GlobalAtomic), 2);
        assert_eq!(count_intrinsics(&out.rast, Intrinsic::StoreGlobal), 1);
        assert_eq!(count_intrinsics(&out.gs, Intrinsic::GlobalAtomic), 1);
    }

    #[test]
    fn test_unused_writes_leave_rast() {
        let mut gs = point_gs();
        gs.func.build_at_start(|b| {
            let addr = Src::new_imm_u64(0x50000);
            b.global_atomic_add(addr, Src::new_imm_u32(1));
            b.store_global(Src::new_zero(), addr, Access::empty());
        });
        let out = lower_sw_gs(gs, false);
        assert!(!out.rast.has_intrinsic(Intrinsic::GlobalAtomic));
        assert!(!out.rast.has_intrinsic(Intrinsic::StoreGlobal));
        /* Nothing moved to the rasterization shader, so the GS keeps its
         * writes
         */
        assert_eq!(count_intrinsics(&out.gs, Intrinsic::GlobalAtomic), 1);
    }

    #[test]
    fn test_point_xfb_and_indices() {
        let mut gs = point_gs();
        gs.info.has_transform_feedback_varyings = true;
        gs.xfb = Some(XfbInfo {
            buffers: [XfbBuffer { stride: 16 }; 4],
            buffers_written: 0x1,
            streams_written: 0x1,
            buffer_to_stream: [0; 4],
            outputs: vec![XfbOutput {
                buffer: 0,
                offset: 0,
                location: VARYING_SLOT_VAR0,
                component_mask: 0xf,
                ..Default::default()
            }],
        });
        let out = lower_sw_gs(gs, false);
        assert!(out
            .gs
            .intrinsics(Intrinsic::StoreGlobal)
            .iter()
            .any(|i| i.idx.access.contains(Access::XFB)));

        let mut interp = gs_interp(
            [2, 0, 0],
            &[
                (GeometryParam::GsGrid(0), 4),
                (GeometryParam::PrimitivesLog2, 2),
                (GeometryParam::OutputIndexBuffer, IB),
                (GeometryParam::XfbBase(0), XFB_BUF),
                (GeometryParam::XfbPrims(0), 10),
            ],
        );
        interp.run(&out.gs.func);

        let captured: Vec<u32> = (0..4)
            .map(|c| interp.global.read_u32(XFB_BUF + 2 * 16 + 4 * c))
            .collect();
        assert_eq!(captured, [1, 2, 3, 4]);
        assert_eq!(interp.global.read_u32(IB + 2 * 4), 2);
        /* Points need no restart index */
        assert!(!interp.global.is_written(IB + 3 * 4));
    }

    #[test]
    fn test_xfb_beyond_capacity_is_dropped() {
        let mut gs = point_gs();
        gs.xfb = Some(XfbInfo {
            buffers: [XfbBuffer { stride: 16 }; 4],
            buffers_written: 0x1,
            streams_written: 0x1,
            buffer_to_stream: [0; 4],
            outputs: vec![XfbOutput {
                buffer: 0,
                location: VARYING_SLOT_VAR0,
                component_mask: 0xf,
                ..Default::default()
            }],
        });
        let out = lower_sw_gs(gs, true);

        let mut interp = gs_interp(
            [2, 0, 0],
            &[
                (GeometryParam::GsGrid(0), 4),
                (GeometryParam::XfbBase(0), XFB_BUF),
                (GeometryParam::XfbPrims(0), 2),
            ],
        );
        interp.run(&out.gs.func);
        assert!(interp.global.read_u32(XFB_BUF + 2 * 16) == 0);
        assert!(!interp.global.is_written(XFB_BUF + 2 * 16));
    }

    #[test]
    fn test_dynamic_counts_use_count_shader() {
        const DATA: u64 = 0x60000;
        let mut gs = Shader::new(ShaderStage::Geometry, "dyn");
        gs.info.outputs_written = slot_bit(VARYING_SLOT_POS);
        gs.info.gs.vertices_out = 8;
        gs.info.gs.input_primitive = Prim::Points;
        gs.info.gs.output_primitive = Prim::Points;
        gs.info.gs.active_stream_mask = 0x1;
        gs.func.build_at_end(|b| {
            store_u32x4(b, VARYING_SLOT_POS, [0, 0, 0, 1]);
            emit(b, [0, 0, 0, 0]);
            let n = b.load_global(1, 32, Src::new_imm_u64(DATA));
            set_counts(b, [n, n, n]);
        });

        let out = lower_sw_gs(gs, false);
        assert_eq!(out.count_words, 3);
        assert!(out.prefix_sum.is_some());
        let count = out.count.unwrap();
        assert_eq!(count.name, "dyn_count");
        assert!(!count.has_intrinsic(Intrinsic::EmitVertexWithCounter));
        assert!(!count.has_intrinsic(Intrinsic::StoreOutput));

        let mut interp = gs_interp(
            [2, 1, 0],
            &[
                (GeometryParam::GsGrid(0), 4),
                (GeometryParam::CountBuffer, COUNT_BUF),
            ],
        );
        interp.global.write_u32(DATA, 5);
        interp.run(&count.func);

        /* Unrolled invocation 1 * 4 + 2 owns dwords 18..21 */
        for c in 0..3 {
            assert_eq!(interp.global.read_u32(COUNT_BUF + 4 * (18 + c)), 5);
        }
        assert!(!interp.global.is_written(COUNT_BUF + 4 * 21));
    }

    #[test]
    fn test_gs_instancing_loops() {
        let mut s = Shader::new(ShaderStage::Geometry, "inst");
        s.info.gs.invocations = 3;
        s.info.gs.vertices_out = 2;
        s.func.build_at_end(|b| {
            let id = b.sysval(Intrinsic::LoadInvocationId);
            build_store_output(
                b,
                id,
                VARYING_SLOT_VAR0,
                0,
                AluType::UINT32,
                false,
                0,
            );
            b.intrin_nodst(Intrinsic::EmitVertex, &[], Default::default());
        });

        lower_gs_instancing(&mut s);
        assert_eq!(s.info.gs.vertices_out, 6);
        assert!(!s.has_intrinsic(Intrinsic::LoadInvocationId));

        let mut interp = Interp::new();
        interp.run(&s.func);
        let mut expected = Vec::new();
        for i in 0..3 {
            expected.push(Event::Output {
                location: VARYING_SLOT_VAR0,
                high_16bits: false,
                component: 0,
                value: i,
            });
            expected.push(Event::Emit {
                stream: 0,
                srcs: Vec::new(),
            });
            expected.push(Event::EndPrimitive {
                stream: 0,
                srcs: Vec::new(),
            });
        }
        assert_eq!(interp.events, expected);
    }

    #[test]
    fn test_single_invocation_id_is_zero() {
        let mut s = Shader::new(ShaderStage::Geometry, "one");
        s.info.gs.invocations = 1;
        let id = s.func.build_at_end(|b| b.sysval(Intrinsic::LoadInvocationId));
        lower_gs_instancing(&mut s);
        assert!(!s.has_intrinsic(Intrinsic::LoadInvocationId));

        let mut interp = Interp::new();
        interp.run(&s.func);
        assert_eq!(interp.src(&id), [0]);
    }

    #[test]
    fn test_gs_inputs_from_vertex_buffer() {
        const INPUTS: u64 = 0x70000;
        let mut s = Shader::new(ShaderStage::Geometry, "inputs");
        s.info.gs.input_primitive = Prim::Triangles;
        let value = s.func.build_at_end(|b| {
            let mut idx = IntrinsicIndices {
                io_semantics: IoSemantics::new(VARYING_SLOT_VAR0),
                ..Default::default()
            };
            idx.component = 1;
            b.intrin(
                Intrinsic::LoadPerVertexInput,
                1,
                32,
                &[Src::new_imm_u32(1), Src::new_zero()],
                idx,
            )
        });
        lower_gs_inputs(&mut s);
        assert!(!s.has_intrinsic(Intrinsic::LoadPerVertexInput));

        let mut interp = gs_interp(
            [0, 0, 0],
            &[
                (GeometryParam::VsGrid(0), 12),
                (GeometryParam::InputBuffer, INPUTS),
                (
                    GeometryParam::InputMask,
                    slot_bit(VARYING_SLOT_POS) | slot_bit(VARYING_SLOT_VAR0),
                ),
            ],
        );
        interp.set_sysval(Intrinsic::LoadInputTopology, &[Prim::Triangles as u64]);
        interp.set_sysval(Intrinsic::LoadPrimitiveId, &[2]);
        interp.set_sysval(Intrinsic::LoadInstanceId, &[1]);

        /* Vertex 1 of triangle 2 in instance 1 is 12 + 7, second slot */
        let addr = INPUTS + (19 * 2 + 1) * 16 + 4;
        interp.global.write_u32(addr, 0xabc);
        interp.run(&s.func);
        assert_eq!(interp.src(&value), [0xabc]);
    }

    #[test]
    fn test_vs_before_gs_stores_outputs() {
        const OUT_BUF: u64 = 0x80000;
        const IA: u64 = 0x90000;
        let mut s = Shader::new(ShaderStage::Vertex, "vs");
        s.info.outputs_written =
            slot_bit(VARYING_SLOT_POS) | slot_bit(VARYING_SLOT_VAR0);
        s.func.build_at_end(|b| {
            store_u32x4(b, VARYING_SLOT_POS, [1, 2, 3, 4]);
            let v = b.vec(&[Src::new_imm_u32(7), Src::new_imm_u32(8)]);
            build_store_output(b, v, VARYING_SLOT_VAR0, 1, AluType::UINT32, false, 0);
        });
        assert!(lower_vs_before_gs(&mut s));
        assert!(!s.has_intrinsic(Intrinsic::StoreOutput));

        let mut interp = Interp::new();
        interp.set_sysval(Intrinsic::LoadGlobalInvocationId, &[5, 1, 0]);
        interp.set_sysval(Intrinsic::LoadVsOutputBufferAgx, &[OUT_BUF]);
        interp.set_sysval(Intrinsic::LoadInputAssemblyBufferAgx, &[IA]);
        interp.global.write_u32(IA + 8, 10);
        interp.run(&s.func);

        /* Vertex 1 * 10 + 5, two vec4 slots per vertex */
        let pos = OUT_BUF + 15 * 2 * 16;
        let var0 = pos + 16;
        assert_eq!(interp.global.read_u32(pos), 1);
        assert_eq!(interp.global.read_u32(pos + 12), 4);
        assert!(!interp.global.is_written(var0));
        assert_eq!(interp.global.read_u32(var0 + 4), 7);
        assert_eq!(interp.global.read_u32(var0 + 8), 8);
        assert!(!interp.global.is_written(var0 + 12));
    }

    #[test]
    fn test_output_vertex_id_stride() {
        assert_eq!(output_vertex_id_stride(0), 1);
        assert_eq!(output_vertex_id_stride(3), 4);
        assert_eq!(output_vertex_id_stride(8), 8);
        assert_eq!(output_vertex_id_stride(9), 16);
    }
}
