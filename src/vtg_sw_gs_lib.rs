/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Device-side routines shared by the software geometry pipeline
//!
//! The count, main, rasterization and pre-GS kernels all talk to the same
//! per-draw parameter block and agree on a few encodings: where the counts
//! of an unrolled GS invocation live, how input vertices are found for a
//! given input topology, how strips become indexed draws and where a
//! captured vertex lands in a transform feedback buffer.  This module emits
//! those routines inline into whichever kernel needs them.

use crate::util::BitMask;
use crate::vtg_ir::*;

use std::mem::offset_of;

pub const MAX_VERTEX_STREAMS: usize = 4;

/// Per-draw state of the software geometry pipeline, as laid out in memory
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct GeometryParams {
    /// Counts written by the count kernel, one record per unrolled invocation
    pub count_buffer: u64,
    pub output_index_buffer: u64,
    /// Outputs of the stage feeding the GS, see [`vertex_output_address`]
    pub input_buffer: u64,
    /// Varyings present for each vertex of `input_buffer`
    pub input_mask: u64,
    pub xfb_base_original: [u64; MAX_VERTEX_STREAMS],
    pub xfb_base: [u64; MAX_VERTEX_STREAMS],
    /// Where the current byte offset of each XFB buffer is kept, or null
    pub xfb_offs_ptrs: [u64; MAX_VERTEX_STREAMS],
    pub prims_generated_counter: [u64; MAX_VERTEX_STREAMS],
    pub xfb_prims_generated_counter: [u64; MAX_VERTEX_STREAMS],
    pub xfb_overflow: [u64; MAX_VERTEX_STREAMS],
    pub xfb_any_overflow: u64,
    /// An [`IndexedIndirectDraw`] filled in by the pre-GS kernel
    pub indirect_desc: u64,
    /// Points to the [`GeometryHeap`] index buffers are carved from
    pub heap: u64,
    pub xfb_size: [u32; MAX_VERTEX_STREAMS],
    /// Primitives each stream may capture this draw, set by the pre-GS kernel
    pub xfb_prims: [u32; MAX_VERTEX_STREAMS],
    pub vs_grid: [u32; 3],
    pub gs_grid: [u32; 3],
    /// Log2 of the padded number of input primitives per instance
    pub primitives_log2: u32,
    pub input_primitives: u32,
    pub input_topology: u32,
    pub flat_outputs: u32,
}

/// Scratch memory for generated index buffers
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct GeometryHeap {
    pub base: u64,
    pub bottom: u32,
    pub size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexedIndirectDraw {
    pub count: u32,
    pub instance_count: u32,
    pub start: u32,
    pub index_bias: i32,
    pub start_instance: u32,
}

/// Input assembly state visible to a vertex shader feeding a GS
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct InputAssemblyParams {
    pub index_buffer: u64,
    pub verts_per_instance: u32,
}

/// Tessellation state visible to an evaluation shader feeding a GS
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TessParams {
    pub tcs_buffer: u64,
    pub tes_buffer: u64,
}

/// Pipeline statistics counters, numbered like the driver's query slots
#[repr(i32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineStat {
    IaPrimitives = 1,
    GsInvocations = 3,
    GsPrimitives = 4,
    CInvocations = 5,
    CPrimitives = 6,
}

fn elem(i: usize, len: usize) -> usize {
    assert!(i < len, "Parameter index {} out of range", i);
    i
}

/// A field of [`GeometryParams`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GeometryParam {
    CountBuffer,
    OutputIndexBuffer,
    InputBuffer,
    InputMask,
    XfbBaseOriginal(usize),
    XfbBase(usize),
    XfbOffsPtr(usize),
    PrimsGeneratedCounter(usize),
    XfbPrimsGeneratedCounter(usize),
    XfbOverflow(usize),
    XfbAnyOverflow,
    IndirectDesc,
    Heap,
    XfbSize(usize),
    XfbPrims(usize),
    VsGrid(usize),
    GsGrid(usize),
    PrimitivesLog2,
    InputPrimitives,
    InputTopology,
    FlatOutputs,
}

impl GeometryParam {
    /// Returns the byte offset and bit size of the field
    pub fn layout(&self) -> (u32, u8) {
        use GeometryParam as P;
        const S: usize = MAX_VERTEX_STREAMS;
        let (offset, bytes, i) = match *self {
            P::CountBuffer => (offset_of!(GeometryParams, count_buffer), 8, 0),
            P::OutputIndexBuffer => {
                (offset_of!(GeometryParams, output_index_buffer), 8, 0)
            }
            P::InputBuffer => (offset_of!(GeometryParams, input_buffer), 8, 0),
            P::InputMask => (offset_of!(GeometryParams, input_mask), 8, 0),
            P::XfbBaseOriginal(i) => {
                (offset_of!(GeometryParams, xfb_base_original), 8, elem(i, S))
            }
            P::XfbBase(i) => {
                (offset_of!(GeometryParams, xfb_base), 8, elem(i, S))
            }
            P::XfbOffsPtr(i) => {
                (offset_of!(GeometryParams, xfb_offs_ptrs), 8, elem(i, S))
            }
            P::PrimsGeneratedCounter(i) => (
                offset_of!(GeometryParams, prims_generated_counter),
                8,
                elem(i, S),
            ),
            P::XfbPrimsGeneratedCounter(i) => (
                offset_of!(GeometryParams, xfb_prims_generated_counter),
                8,
                elem(i, S),
            ),
            P::XfbOverflow(i) => {
                (offset_of!(GeometryParams, xfb_overflow), 8, elem(i, S))
            }
            P::XfbAnyOverflow => {
                (offset_of!(GeometryParams, xfb_any_overflow), 8, 0)
            }
            P::IndirectDesc => (offset_of!(GeometryParams, indirect_desc), 8, 0),
            P::Heap => (offset_of!(GeometryParams, heap), 8, 0),
            P::XfbSize(i) => {
                (offset_of!(GeometryParams, xfb_size), 4, elem(i, S))
            }
            P::XfbPrims(i) => {
                (offset_of!(GeometryParams, xfb_prims), 4, elem(i, S))
            }
            P::VsGrid(i) => (offset_of!(GeometryParams, vs_grid), 4, elem(i, 3)),
            P::GsGrid(i) => (offset_of!(GeometryParams, gs_grid), 4, elem(i, 3)),
            P::PrimitivesLog2 => {
                (offset_of!(GeometryParams, primitives_log2), 4, 0)
            }
            P::InputPrimitives => {
                (offset_of!(GeometryParams, input_primitives), 4, 0)
            }
            P::InputTopology => (offset_of!(GeometryParams, input_topology), 4, 0),
            P::FlatOutputs => (offset_of!(GeometryParams, flat_outputs), 4, 0),
        };
        ((offset + bytes * i) as u32, (bytes * 8) as u8)
    }
}

fn geometry_param_address(b: &mut impl SSABuilder, param: GeometryParam) -> Src {
    let (offset, _) = param.layout();
    let params = b.sysval_sized(Intrinsic::LoadGeometryParamBufferAgx, 1, 64);
    b.iadd(params, Src::new_imm_u64(offset.into()))
}

pub fn load_geometry_param(b: &mut impl SSABuilder, param: GeometryParam) -> Src {
    let (_, bit_size) = param.layout();
    let addr = geometry_param_address(b, param);
    b.load_global_constant(1, bit_size, addr)
}

pub fn store_geometry_param(
    b: &mut impl SSABuilder,
    param: GeometryParam,
    value: Src,
) {
    let (_, bit_size) = param.layout();
    assert!(value.bit_size() == bit_size && value.comps() == 1);
    let addr = geometry_param_address(b, param);
    b.store_global(value, addr, Access::empty());
}

/// Bumps a 32-bit counter in memory unless its address is null
pub fn add_counter(b: &mut impl SSABuilder, counter: Src, increment: Src) {
    assert!(counter.bit_size() == 64);
    let enabled = b.ine(counter, Src::new_imm_u64(0));
    b.push_if(enabled);
    let old = b.load_global(1, 32, counter);
    let new = b.iadd(old, increment);
    b.store_global(new, counter, Access::empty());
    b.pop_if();
}

/// Runs `body` for `i` in `0..count`, using `counter` as the loop variable
pub fn counted_loop<B: SSABuilder>(
    b: &mut B,
    counter: VarId,
    count: Src,
    body: impl FnOnce(&mut B, Src),
) {
    b.store_var(counter, Src::new_zero(), 0x1);
    b.push_loop();
    let i = b.load_var(counter, 1, 32);
    let done = b.uge(i, count);
    b.push_if(done);
    b.jump(JumpKind::Break);
    b.pop_if();
    body(b, i);
    let next = b.iadd_imm(i, 1);
    b.store_var(counter, next, 0x1);
    b.pop_loop();
}

/// The (primitive, instance) pair a GS or hardware-VS-like kernel is
/// dispatched for
pub fn global_invocation_id(b: &mut impl SSABuilder) -> (Src, Src) {
    let id = b.sysval_sized(Intrinsic::LoadGlobalInvocationId, 3, 32);
    (b.channel(id, 0), b.channel(id, 1))
}

/* Topology decoding.  All the run-time topologies of a class share the GS
 * input primitive, so the class is known at compile time and the topology is
 * picked with selects.
 */

fn select_topology(
    b: &mut impl SSABuilder,
    topology: Src,
    cases: &[(Prim, Src)],
) -> Src {
    if let Some(t) = topology.as_u32() {
        return match cases.iter().find(|(p, _)| *p as u32 == t) {
            Some((_, v)) => *v,
            None => cases[cases.len() - 1].1,
        };
    }

    let mut result = cases[cases.len() - 1].1;
    for (prim, value) in cases.iter().rev().skip(1) {
        let is_prim = b.ieq_imm(topology, *prim as u32);
        result = b.bcsel(is_prim, *value, result);
    }
    result
}

fn select_vertex(b: &mut impl SSABuilder, vert: Src, ids: &[Src]) -> Src {
    if let Some(v) = vert.as_u32() {
        return ids[v as usize];
    }

    let mut result = ids[ids.len() - 1];
    for (i, id) in ids.iter().enumerate().rev().skip(1) {
        let is_vert = b.ieq_imm(vert, i as u32);
        result = b.bcsel(is_vert, *id, result);
    }
    result
}

fn line_class_vertex(
    b: &mut impl SSABuilder,
    topology: Src,
    prim: Src,
    vert: Src,
    nr: Src,
) -> Src {
    let list_base = b.imul_imm(prim, 2);
    let list = b.iadd(list_base, vert);
    let strip = b.iadd(prim, vert);

    /* The closing line of a loop goes back to the first vertex */
    let wraps = b.ieq(strip, nr);
    let line_loop = b.bcsel(wraps, Src::new_zero(), strip);

    select_topology(
        b,
        topology,
        &[
            (Prim::Lines, list),
            (Prim::LineLoop, line_loop),
            (Prim::LineStrip, strip),
        ],
    )
}

fn tri_class_vertex(
    b: &mut impl SSABuilder,
    topology: Src,
    prim: Src,
    vert: Src,
    flatshade_first: Src,
) -> Src {
    let list_base = b.imul_imm(prim, 3);
    let list = b.iadd(list_base, vert);

    /* Odd triangles of a strip swap two vertices to keep the winding, and
     * which two depends on the provoking vertex.
     */
    let odd = b.iand_imm(prim, 1);
    let one_plus_odd = b.iadd_imm(odd, 1);
    let two_minus_odd = b.isub(Src::new_imm_u32(2), odd);
    let one_minus_odd = b.isub(Src::new_imm_u32(1), odd);
    let first_offs =
        select_vertex(b, vert, &[Src::new_zero(), one_plus_odd, two_minus_odd]);
    let last_offs =
        select_vertex(b, vert, &[odd, one_minus_odd, Src::new_imm_u32(2)]);
    let strip_offs = b.bcsel(flatshade_first, first_offs, last_offs);
    let strip = b.iadd(prim, strip_offs);

    let p1 = b.iadd_imm(prim, 1);
    let p2 = b.iadd_imm(prim, 2);
    let fan_first = select_vertex(b, vert, &[p1, p2, Src::new_zero()]);
    let fan_last = select_vertex(b, vert, &[Src::new_zero(), p1, p2]);
    let fan = b.bcsel(flatshade_first, fan_first, fan_last);

    select_topology(
        b,
        topology,
        &[
            (Prim::Triangles, list),
            (Prim::TriangleFan, fan),
            (Prim::TriangleStrip, strip),
        ],
    )
}

fn line_adj_class_vertex(
    b: &mut impl SSABuilder,
    topology: Src,
    prim: Src,
    vert: Src,
) -> Src {
    let list_base = b.imul_imm(prim, 4);
    let list = b.iadd(list_base, vert);
    let strip = b.iadd(prim, vert);

    select_topology(
        b,
        topology,
        &[
            (Prim::LinesAdjacency, list),
            (Prim::LineStripAdjacency, strip),
        ],
    )
}

fn tri_adj_class_vertex(
    b: &mut impl SSABuilder,
    topology: Src,
    prim: Src,
    vert: Src,
    nr: Src,
) -> Src {
    let list_base = b.imul_imm(prim, 6);
    let list = b.iadd(list_base, vert);

    /* A strip with adjacency of n vertices has (n - 4) / 2 triangles.  The
     * first and last ones reach for different adjacent vertices and odd
     * triangles flip their winding.
     */
    let two_i = b.imul_imm(prim, 2);
    let odd = b.iand_imm(prim, 1);
    let even = b.ieq_imm(odd, 0);
    let first = b.ieq_imm(prim, 0);
    let last_bound = b.iadd_imm(two_i, 8);
    let last = b.ult(nr, last_bound);

    let i_m2 = b.isub(two_i, Src::new_imm_u32(2));
    let i_p2 = b.iadd_imm(two_i, 2);
    let i_p3 = b.iadd_imm(two_i, 3);
    let i_p4 = b.iadd_imm(two_i, 4);
    let i_p5 = b.iadd_imm(two_i, 5);
    let i_p6 = b.iadd_imm(two_i, 6);

    let far = b.bcsel(last, i_p5, i_p6);
    let v0 = b.bcsel(even, two_i, i_p2);
    let v1 = b.bcsel(first, Src::new_imm_u32(1), i_m2);
    let v2 = b.bcsel(even, i_p2, two_i);
    let v3 = b.bcsel(even, far, i_p3);
    let v5 = b.bcsel(even, i_p3, far);
    let strip = select_vertex(b, vert, &[v0, v1, v2, v3, i_p4, v5]);

    select_topology(
        b,
        topology,
        &[
            (Prim::TrianglesAdjacency, list),
            (Prim::TriangleStripAdjacency, strip),
        ],
    )
}

/// Finds the index of vertex `vert` of input primitive `prim`
///
/// `class` is the GS input primitive, which fixes the number of vertices per
/// primitive, while `topology` is the draw's actual topology.  `nr` is the
/// number of vertices in the draw, needed to close line loops and to find
/// the last triangle of a strip with adjacency.
pub fn vertex_id_for_topology(
    b: &mut impl SSABuilder,
    class: Prim,
    topology: Src,
    prim: Src,
    vert: Src,
    nr: Src,
    flatshade_first: Src,
) -> Src {
    match class {
        Prim::Points => prim,
        Prim::Lines => line_class_vertex(b, topology, prim, vert, nr),
        Prim::Triangles => {
            tri_class_vertex(b, topology, prim, vert, flatshade_first)
        }
        Prim::LinesAdjacency => line_adj_class_vertex(b, topology, prim, vert),
        Prim::TrianglesAdjacency => {
            tri_adj_class_vertex(b, topology, prim, vert, nr)
        }
        _ => panic!("{:?} is not a GS input primitive", class),
    }
}

/// Maps a vertex of a captured strip triangle so that odd triangles keep
/// the winding of even ones without moving the provoking vertex
pub fn map_vertex_in_tri_strip(
    b: &mut impl SSABuilder,
    prim: Src,
    vert: u32,
    flatshade_first: Src,
) -> Src {
    assert!(vert < 3);
    let pv = b.bcsel(flatshade_first, Src::new_zero(), Src::new_imm_u32(2));
    let odd = b.iand_imm(prim, 1);
    let even = b.ieq_imm(odd, 0);
    let provoking = b.ieq(pv, Src::new_imm_u32(vert));
    let keep = b.ior(provoking, even);
    let three_minus_pv = b.isub(Src::new_imm_u32(3), pv);
    let swapped = b.isub(three_minus_pv, Src::new_imm_u32(vert));
    b.bcsel(keep, Src::new_imm_u32(vert), swapped)
}

/// Writes the indices of a finished strip into the output index buffer
///
/// Indices encode `geometry_base + vertex` where the base identifies the
/// unrolled invocation in the rasterization shader's vertex numbering.
/// Previous strips of this invocation are found by subtracting this strip
/// from the running totals.  With `prim_offset` set, each strip is followed
/// by a restart index and earlier strips' restarts are skipped over.
pub fn end_primitive(
    b: &mut impl SSABuilder,
    counter: VarId,
    index_buffer: Src,
    total_verts: Src,
    verts_in_prim: Src,
    total_prims: Src,
    index_offset: Src,
    prim_offset: Option<Src>,
    geometry_base: Src,
) {
    let previous_verts_in_invoc = b.isub(total_verts, verts_in_prim);
    let previous_verts = b.iadd(index_offset, previous_verts_in_invoc);
    let previous_prims = match prim_offset {
        Some(prim_offset) => {
            let prims = b.iadd(prim_offset, total_prims);
            b.isub(prims, Src::new_imm_u32(1))
        }
        None => Src::new_zero(),
    };

    let index_base = b.iadd(geometry_base, previous_verts_in_invoc);
    let first = b.iadd(previous_verts, previous_prims);
    let first_off = b.imul_imm(first, 4);
    let out = b.iadd_addr(index_buffer, first_off);

    counted_loop(b, counter, verts_in_prim, |b, i| {
        let index = b.iadd(index_base, i);
        let offset = b.imul_imm(i, 4);
        let addr = b.iadd_addr(out, offset);
        b.store_global(index, addr, Access::empty());
    });

    if prim_offset.is_some() {
        let offset = b.imul_imm(verts_in_prim, 4);
        let addr = b.iadd_addr(out, offset);
        b.store_global(Src::new_imm_u32(u32::MAX), addr, Access::empty());
    }
}

/// Allocates the output index buffer from the heap and fills in the
/// indexed indirect draw of the rasterization shader
///
/// Strips take one index per vertex plus one restart index per primitive.
/// If the heap cannot hold them, nothing is drawn.
pub fn build_gs_draw(b: &mut impl SSABuilder, vertices: Src, primitives: Src) {
    let desc = load_geometry_param(b, GeometryParam::IndirectDesc);
    let heap = load_geometry_param(b, GeometryParam::Heap);

    let indices = b.iadd(vertices, primitives);

    let heap_field = |field: usize| Src::new_imm_u64(field as u64);
    let base_addr = b.iadd(heap, heap_field(offset_of!(GeometryHeap, base)));
    let bottom_addr =
        b.iadd(heap, heap_field(offset_of!(GeometryHeap, bottom)));
    let size_addr = b.iadd(heap, heap_field(offset_of!(GeometryHeap, size)));
    let heap_base = b.load_global(1, 64, base_addr);
    let bottom = b.load_global(1, 32, bottom_addr);
    let heap_size = b.load_global(1, 32, size_addr);

    let index_buffer = b.iadd_addr(heap_base, bottom);
    store_geometry_param(b, GeometryParam::OutputIndexBuffer, index_buffer);

    let indices_size = b.imul_imm(indices, 4);
    let new_bottom = b.iadd(bottom, indices_size);
    b.store_global(new_bottom, bottom_addr, Access::empty());

    let fits = b.uge(heap_size, new_bottom);
    let count = b.bcsel(fits, indices, Src::new_zero());
    let start = b.ushr_imm(bottom, 2);
    let draw = b.vec(&[count, Src::new_imm_u32(1), start, Src::new_zero()]);
    b.store_global(draw, desc, Access::empty());

    let start_instance_off = offset_of!(IndexedIndirectDraw, start_instance);
    let start_instance_addr =
        b.iadd(desc, Src::new_imm_u64(start_instance_off as u64));
    b.store_global(Src::new_zero(), start_instance_addr, Access::empty());
}

/// Points XFB buffer `i` at its current offset and returns that offset
///
/// Buffers without an offset pointer start at their original base.
pub fn setup_xfb_buffer(b: &mut impl SSABuilder, result: VarId, i: usize) -> Src {
    b.store_var(result, Src::new_zero(), 0x1);

    let off_ptr = load_geometry_param(b, GeometryParam::XfbOffsPtr(i));
    let has_ptr = b.ine(off_ptr, Src::new_imm_u64(0));
    b.push_if(has_ptr);
    let off = b.load_global(1, 32, off_ptr);
    let base = load_geometry_param(b, GeometryParam::XfbBaseOriginal(i));
    let moved = b.iadd_addr(base, off);
    store_geometry_param(b, GeometryParam::XfbBase(i), moved);
    b.store_var(result, off, 0x1);
    b.pop_if();

    b.load_var(result, 1, 32)
}

/// Address of one output of one captured vertex in XFB buffer `buffer`
pub fn xfb_vertex_address(
    b: &mut impl SSABuilder,
    buffer: usize,
    base_index: Src,
    vert: Src,
    stride: u32,
    output_offset: u32,
) -> Src {
    let base = load_geometry_param(b, GeometryParam::XfbBase(buffer));
    let index = b.iadd(base_index, vert);
    let vertex_off = b.imul_imm(index, stride);
    let byte_offset = b.iadd_imm(vertex_off, output_offset);
    b.iadd_addr(base, byte_offset)
}

/// Address of varying `location` of vertex `vtx` in a vertex output buffer
///
/// Each vertex stores a vec4 for every varying in `mask`, in slot order.
/// The mask may be a 64-bit constant or a run-time value.
pub fn vertex_output_address(
    b: &mut impl SSABuilder,
    buffer: Src,
    mask: Src,
    vtx: Src,
    location: u32,
) -> Src {
    assert!(location < 64 && mask.bit_size() == 64);
    let (stride, index) = match mask.as_uint() {
        Some(mask) => (
            Src::new_imm_u32(mask.count_ones()),
            Src::new_imm_u32(mask.count_below(location)),
        ),
        None => {
            let below = Src::new_imm_u64((1_u64 << location) - 1);
            let mask_below = b.iand(mask, below);
            (b.bit_count(mask), b.bit_count(mask_below))
        }
    };
    let vtx_base = b.imul(vtx, stride);
    let slot = b.iadd(vtx_base, index);
    let byte_offset = b.imul_imm(slot, 16);
    b.iadd_addr(buffer, byte_offset)
}

/// Address of an input varying of vertex `vtx` of the stage feeding the GS
pub fn geometry_input_address(
    b: &mut impl SSABuilder,
    vtx: Src,
    location: u32,
) -> Src {
    let buffer = load_geometry_param(b, GeometryParam::InputBuffer);
    let mask = load_geometry_param(b, GeometryParam::InputMask);
    vertex_output_address(b, buffer, mask, vtx, location)
}

/* Counts.  Every unrolled GS invocation produces a vertex, primitive and
 * captured primitive count per stream.  The ones known at compile time are
 * never stored, the rest are written by the count kernel and prefix-summed
 * so each invocation can find where its output starts.
 */

pub const GS_COUNTER_VERTICES: usize = 0;
pub const GS_COUNTER_PRIMITIVES: usize = 1;
pub const GS_COUNTER_XFB_PRIMITIVES: usize = 2;
pub const GS_NUM_COUNTERS: usize = 3;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GsCountLayout {
    /// Count per invocation, by counter and stream, when it is a constant
    pub static_count: [[Option<u32>; MAX_VERTEX_STREAMS]; GS_NUM_COUNTERS],
    /// Dword of each unknown count within an invocation's record, by stream
    /// and counter
    pub count_index: [[Option<u32>; GS_NUM_COUNTERS]; MAX_VERTEX_STREAMS],
    /// Dwords per invocation in the count buffer
    pub count_stride_el: u32,
}

impl GsCountLayout {
    pub fn new(
        static_count: [[Option<u32>; MAX_VERTEX_STREAMS]; GS_NUM_COUNTERS],
    ) -> GsCountLayout {
        let mut count_index = [[None; GS_NUM_COUNTERS]; MAX_VERTEX_STREAMS];
        let mut count_stride_el = 0;
        for stream in 0..MAX_VERTEX_STREAMS {
            for counter in 0..GS_NUM_COUNTERS {
                if static_count[counter][stream].is_none() {
                    count_index[stream][counter] = Some(count_stride_el);
                    count_stride_el += 1;
                }
            }
        }
        GsCountLayout {
            static_count: static_count,
            count_index: count_index,
            count_stride_el: count_stride_el,
        }
    }

    /// Address of a stored count, or `None` if the count is static
    pub fn count_address(
        &self,
        b: &mut impl SSABuilder,
        unrolled_id: Src,
        stream: usize,
        counter: usize,
    ) -> Option<Src> {
        let index = self.count_index[stream][counter]?;
        let record = b.imul_imm(unrolled_id, self.count_stride_el);
        let el = b.iadd_imm(record, index);
        let byte_offset = b.imul_imm(el, 4);
        let count_buffer = load_geometry_param(b, GeometryParam::CountBuffer);
        Some(b.iadd_addr(count_buffer, byte_offset))
    }

    /// Sum of a count over all invocations before `unrolled_id`
    ///
    /// Stored counts are inclusive prefix sums, so this reads the previous
    /// invocation's entry.
    pub fn previous_count(
        &self,
        b: &mut impl SSABuilder,
        stream: usize,
        unrolled_id: Src,
        counter: usize,
    ) -> Src {
        assert!(stream < MAX_VERTEX_STREAMS && counter < GS_NUM_COUNTERS);
        if let Some(count) = self.static_count[counter][stream] {
            return b.imul_imm(unrolled_id, count);
        }

        let prev_id = b.usub_sat(unrolled_id, Src::new_imm_u32(1));
        let addr = self.count_address(b, prev_id, stream, counter);
        let Some(addr) = addr else {
            unreachable!("Dynamic count without a count buffer slot");
        };
        let prev = b.load_global_constant(1, 32, addr);
        let is_first = b.ieq_imm(unrolled_id, 0);
        b.bcsel(is_first, Src::new_zero(), prev)
    }

    pub fn previous_vertices(
        &self,
        b: &mut impl SSABuilder,
        stream: usize,
        unrolled_id: Src,
    ) -> Src {
        self.previous_count(b, stream, unrolled_id, GS_COUNTER_VERTICES)
    }

    pub fn previous_primitives(
        &self,
        b: &mut impl SSABuilder,
        stream: usize,
        unrolled_id: Src,
    ) -> Src {
        self.previous_count(b, stream, unrolled_id, GS_COUNTER_PRIMITIVES)
    }

    pub fn previous_xfb_primitives(
        &self,
        b: &mut impl SSABuilder,
        stream: usize,
        unrolled_id: Src,
    ) -> Src {
        self.previous_count(b, stream, unrolled_id, GS_COUNTER_XFB_PRIMITIVES)
    }
}

#[cfg(test)]
pub(crate) fn write_geometry_params(
    mem: &mut crate::vtg_interp::Memory,
    base: u64,
    fields: &[(GeometryParam, u64)],
) {
    for (param, value) in fields {
        let (offset, bit_size) = param.layout();
        mem.write(base + u64::from(offset), u32::from(bit_size / 8), *value);
    }
}
