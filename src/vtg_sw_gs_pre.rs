/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Kernels run between the software GS dispatches

use crate::dump_after_pass;
use crate::util::BitMask;
use crate::vtg_ir::*;
use crate::vtg_sw_gs_lib::*;

use log::debug;

pub const PREFIX_SUM_WORKGROUP_SIZE: u32 = 1024;

/// What the pre-GS kernel needs to know about its geometry shader
#[derive(Clone, Debug)]
pub struct PreGsOptions<'a> {
    pub layout: &'a GsCountLayout,
    pub rasterizer_discard: bool,
    /// Output strips are separated by restart indices
    pub restart: bool,
    pub xfb: Option<&'a XfbInfo>,
    pub vertices_per_prim: u32,
    pub streams: u8,
    pub invocations: u32,
}

fn stat_query_address(b: &mut impl SSABuilder, stat: PipelineStat) -> Src {
    let idx = IntrinsicIndices {
        base: stat as i32,
        ..Default::default()
    };
    b.intrin(Intrinsic::LoadStatQueryAddressAgx, 1, 64, &[], idx)
}

fn add_param_counter(
    b: &mut impl SSABuilder,
    param: GeometryParam,
    increment: Src,
) {
    let counter = load_geometry_param(b, param);
    add_counter(b, counter, increment);
}

/// Clamps the captured primitives of every stream to what its XFB buffers
/// can still hold, then advances the buffer offsets
fn clamp_xfb(
    b: &mut impl SSABuilder,
    opts: &PreGsOptions,
    xfb: &XfbInfo,
    offset_vars: &[VarId],
    generated: &[Src; MAX_VERTEX_STREAMS],
) {
    let mut offsets = [Src::new_zero(); 4];
    for i in xfb.buffers_written.iter_set_bits() {
        let i = i as usize;
        offsets[i] = setup_xfb_buffer(b, offset_vars[i], i);
    }

    let mut prims = *generated;
    for output in &xfb.outputs {
        let buffer = usize::from(output.buffer);
        let stream = usize::from(xfb.buffer_to_stream[buffer]);
        let stride = xfb.buffers[buffer].stride;
        let prim_stride = stride * opts.vertices_per_prim;
        assert!(prim_stride > 0, "XFB buffer {} has no stride", buffer);
        let bytes = output.component_mask.count_ones() * 4;

        /* Primitive P writes this output up to
         *
         *    offset + (P - 1) * prim_stride + (verts - 1) * stride
         *           + output.offset + bytes
         *
         * so at most (size + stride - output.offset - bytes - offset) /
         * prim_stride primitives fit.
         */
        let size = load_geometry_param(b, GeometryParam::XfbSize(buffer));
        let slack = stride.wrapping_sub(output.offset).wrapping_sub(bytes);
        let room = b.iadd(size, Src::new_imm_u32(slack));
        let room = b.isub(room, offsets[buffer]);
        let room = b.imax(room, Src::new_zero());
        let max_prims = b.udiv(room, Src::new_imm_u32(prim_stride));
        prims[stream] = b.umin(prims[stream], max_prims);
    }

    let mut any_overflow = Src::False;
    for i in opts.streams.iter_set_bits() {
        let i = i as usize;
        let overflow = b.ult(prims[i], generated[i]);
        any_overflow = b.ior(any_overflow, overflow);

        store_geometry_param(b, GeometryParam::XfbPrims(i), prims[i]);

        let overflowed = b.b2i32(overflow);
        add_param_counter(b, GeometryParam::XfbOverflow(i), overflowed);
        add_param_counter(
            b,
            GeometryParam::XfbPrimsGeneratedCounter(i),
            prims[i],
        );
    }

    let any_overflowed = b.b2i32(any_overflow);
    add_param_counter(b, GeometryParam::XfbAnyOverflow, any_overflowed);

    for i in xfb.buffers_written.iter_set_bits() {
        let i = i as usize;
        let stream = usize::from(xfb.buffer_to_stream[i]);
        let prim_stride = xfb.buffers[i].stride * opts.vertices_per_prim;
        let size = b.imul_imm(prims[stream], prim_stride);
        add_param_counter(b, GeometryParam::XfbOffsPtr(i), size);
    }
}

/// Builds the single-invocation kernel run after the counts are known and
/// before the main GS
///
/// It allocates the index buffer and writes the indirect draw of the
/// rasterization shader, clamps transform feedback and bumps the
/// primitive and pipeline statistics queries.
pub fn create_pre_gs(opts: &PreGsOptions) -> Shader {
    let mut s = Shader::new(ShaderStage::Compute, "pre_gs");
    s.info.workgroup_size = [1, 1, 1];
    let offset_vars: Vec<VarId> = (0..4)
        .map(|i| s.func.create_var(&format!("xfb_offset{}", i), 1, 32))
        .collect();

    let layout = opts.layout;
    s.func.build_at_end(|b| {
        let in_prims = load_geometry_param(b, GeometryParam::InputPrimitives);

        if !opts.rasterizer_discard {
            let vertices = layout.previous_vertices(b, 0, in_prims);
            let primitives = if opts.restart {
                layout.previous_primitives(b, 0, in_prims)
            } else {
                Src::new_zero()
            };
            build_gs_draw(b, vertices, primitives);
        }

        let mut generated = [Src::new_zero(); MAX_VERTEX_STREAMS];
        for i in opts.streams.iter_set_bits() {
            let i = i as usize;
            generated[i] = layout.previous_xfb_primitives(b, i, in_prims);
            add_param_counter(
                b,
                GeometryParam::PrimsGeneratedCounter(i),
                generated[i],
            );
        }

        if let Some(xfb) = opts.xfb {
            clamp_xfb(b, opts, xfb, &offset_vars, &generated);
        }

        let ia = stat_query_address(b, PipelineStat::IaPrimitives);
        add_counter(b, ia, in_prims);

        /* Every instanced invocation counts */
        let invocations = b.imul_imm(in_prims, opts.invocations);
        let gs_invocations = stat_query_address(b, PipelineStat::GsInvocations);
        add_counter(b, gs_invocations, invocations);

        let mut emitted = Src::new_zero();
        for i in opts.streams.iter_set_bits() {
            emitted = b.iadd(emitted, generated[i as usize]);
        }

        /* Every emitted primitive is assumed to reach the clipper */
        for stat in [
            PipelineStat::GsPrimitives,
            PipelineStat::CPrimitives,
            PipelineStat::CInvocations,
        ] {
            let addr = stat_query_address(b, stat);
            add_counter(b, addr, emitted);
        }
    });

    debug!(
        "pre-GS: {} count words, streams {:#x}, xfb {}",
        layout.count_stride_el,
        opts.streams,
        opts.xfb.is_some()
    );
    dump_after_pass("create_pre_gs", &s);
    s
}

fn scan_element<B: SSABuilder>(
    b: &mut B,
    buffer: Src,
    words: u32,
    word: Src,
    i: Src,
    count: VarId,
) -> Src {
    let record = b.imul_imm(i, words);
    let el = b.iadd(record, word);
    let byte_offset = b.imul_imm(el, 4);
    let addr = b.iadd_addr(buffer, byte_offset);

    let value = b.load_global(1, 32, addr);
    let scan = b.intrin(
        Intrinsic::WorkgroupScanInclusiveAdd,
        1,
        32,
        &[value],
        Default::default(),
    );
    let base = b.load_var(count, 1, 32);
    let sum = b.iadd(base, scan);
    b.store_global(sum, addr, Access::empty());
    scan
}

/// Builds the kernel that turns one word column of the count buffer into an
/// inclusive prefix sum
///
/// Workgroup `w` scans word `w` of every `words`-dword record.  Records are
/// scanned 1024 at a time with the running total carried between chunks,
/// and the partial chunk at the end is handled on its own.
pub fn create_prefix_sum_kernel(words: u32) -> Shader {
    assert!(words > 0);
    let mut s = Shader::new(ShaderStage::Compute, "prefix_sum");
    s.info.workgroup_size = [PREFIX_SUM_WORKGROUP_SIZE as u16, 1, 1];
    let count = s.func.create_var("count", 1, 32);
    let index = s.func.create_var("i", 1, 32);

    s.func.build_at_end(|b| {
        let buffer = load_geometry_param(b, GeometryParam::CountBuffer);
        let len = load_geometry_param(b, GeometryParam::InputPrimitives);
        let wg_id = b.sysval_sized(Intrinsic::LoadWorkgroupId, 3, 32);
        let word = b.channel(wg_id, 0);
        let local = b.sysval(Intrinsic::LoadLocalInvocationIndex);

        let tail = b.iand_imm(len, PREFIX_SUM_WORKGROUP_SIZE - 1);
        let full_len = b.isub(len, tail);

        b.store_var(count, Src::new_zero(), 0x1);
        b.store_var(index, local, 0x1);
        b.push_loop();
        let i = b.load_var(index, 1, 32);
        let done = b.uge(i, full_len);
        b.push_if(done);
        b.jump(JumpKind::Break);
        b.pop_if();

        let scan = scan_element(b, buffer, words, word, i, count);
        let chunk_total = b.intrin(
            Intrinsic::WorkgroupBroadcast,
            1,
            32,
            &[scan, Src::new_imm_u32(PREFIX_SUM_WORKGROUP_SIZE - 1)],
            Default::default(),
        );
        let old = b.load_var(count, 1, 32);
        let carried = b.iadd(old, chunk_total);
        b.store_var(count, carried, 0x1);

        let next = b.iadd_imm(i, PREFIX_SUM_WORKGROUP_SIZE);
        b.store_var(index, next, 0x1);
        b.pop_loop();

        let tail_i = b.iadd(full_len, local);
        let in_tail = b.ult(tail_i, len);
        b.push_if(in_tail);
        scan_element(b, buffer, words, word, tail_i, count);
        b.pop_if();
    });

    dump_after_pass("create_prefix_sum_kernel", &s);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtg_interp::Interp;

    const PARAMS: u64 = 0x10000;
    const STATS: u64 = 0x20000;
    const COUNTERS: u64 = 0x30000;

    fn stat_addr(stat: PipelineStat) -> u64 {
        STATS + 8 * stat as u64
    }

    fn interp_with_stats() -> Interp {
        let mut interp = Interp::new();
        interp.set_sysval(Intrinsic::LoadGeometryParamBufferAgx, &[PARAMS]);
        for stat in [
            PipelineStat::IaPrimitives,
            PipelineStat::GsInvocations,
            PipelineStat::GsPrimitives,
            PipelineStat::CInvocations,
            PipelineStat::CPrimitives,
        ] {
            interp.set_sysval_idx(
                Intrinsic::LoadStatQueryAddressAgx,
                stat as u32,
                &[stat_addr(stat)],
            );
        }
        interp
    }

    fn static_layout(verts: u32, prims: u32) -> GsCountLayout {
        let mut static_count = [[Some(0); MAX_VERTEX_STREAMS]; GS_NUM_COUNTERS];
        static_count[GS_COUNTER_VERTICES][0] = Some(verts);
        static_count[GS_COUNTER_PRIMITIVES][0] = Some(prims);
        static_count[GS_COUNTER_XFB_PRIMITIVES][0] = Some(prims);
        GsCountLayout::new(static_count)
    }

    #[test]
    fn test_xfb_overflow_clamps_primitives() {
        const CAPACITY: u64 = 4;
        let layout = static_layout(1, 1);
        let xfb = XfbInfo {
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
        };
        let s = create_pre_gs(&PreGsOptions {
            layout: &layout,
            rasterizer_discard: true,
            restart: false,
            xfb: Some(&xfb),
            vertices_per_prim: 1,
            streams: 0x1,
            invocations: 2,
        });

        let overflow = COUNTERS;
        let any_overflow = COUNTERS + 4;
        let generated = COUNTERS + 8;
        let xfb_generated = COUNTERS + 12;
        let mut interp = interp_with_stats();
        write_geometry_params(
            &mut interp.global,
            PARAMS,
            &[
                (GeometryParam::InputPrimitives, CAPACITY + 5),
                (GeometryParam::XfbSize(0), CAPACITY * 16),
                (GeometryParam::XfbOverflow(0), overflow),
                (GeometryParam::XfbAnyOverflow, any_overflow),
                (GeometryParam::PrimsGeneratedCounter(0), generated),
                (GeometryParam::XfbPrimsGeneratedCounter(0), xfb_generated),
            ],
        );
        interp.run(&s.func);

        let (prims_off, _) = GeometryParam::XfbPrims(0).layout();
        let mem = &interp.global;
        assert_eq!(u64::from(mem.read_u32(PARAMS + u64::from(prims_off))), CAPACITY);
        assert_eq!(mem.read_u32(overflow), 1);
        assert_eq!(mem.read_u32(any_overflow), 1);
        assert_eq!(u64::from(mem.read_u32(generated)), CAPACITY + 5);
        assert_eq!(u64::from(mem.read_u32(xfb_generated)), CAPACITY);

        assert_eq!(mem.read_u32(stat_addr(PipelineStat::IaPrimitives)), 9);
        assert_eq!(mem.read_u32(stat_addr(PipelineStat::GsInvocations)), 18);
        assert_eq!(mem.read_u32(stat_addr(PipelineStat::GsPrimitives)), 9);
        assert_eq!(mem.read_u32(stat_addr(PipelineStat::CInvocations)), 9);
    }

    #[test]
    fn test_xfb_offset_advances() {
        let layout = static_layout(3, 1);
        let xfb = XfbInfo {
            buffers: [XfbBuffer { stride: 8 }; 4],
            buffers_written: 0x1,
            streams_written: 0x1,
            buffer_to_stream: [0; 4],
            outputs: vec![XfbOutput {
                buffer: 0,
                offset: 0,
                location: VARYING_SLOT_VAR0,
                component_mask: 0x3,
                ..Default::default()
            }],
        };
        let s = create_pre_gs(&PreGsOptions {
            layout: &layout,
            rasterizer_discard: true,
            restart: true,
            xfb: Some(&xfb),
            vertices_per_prim: 3,
            streams: 0x1,
            invocations: 1,
        });

        const OFF_PTR: u64 = 0x40000;
        const XFB_BUF: u64 = 0x50000;
        let mut interp = interp_with_stats();
        interp.global.write_u32(OFF_PTR, 24);
        write_geometry_params(
            &mut interp.global,
            PARAMS,
            &[
                (GeometryParam::InputPrimitives, 2),
                (GeometryParam::XfbSize(0), 1024),
                (GeometryParam::XfbOffsPtr(0), OFF_PTR),
                (GeometryParam::XfbBaseOriginal(0), XFB_BUF),
            ],
        );
        interp.run(&s.func);

        let (base_off, _) = GeometryParam::XfbBase(0).layout();
        let mem = &interp.global;
        assert_eq!(mem.read_u64(PARAMS + u64::from(base_off)), XFB_BUF + 24);
        /* Two triangles of three 8-byte vertices */
        assert_eq!(mem.read_u32(OFF_PTR), 24 + 2 * 3 * 8);
    }

    #[test]
    fn test_pre_gs_builds_draw() {
        let layout = static_layout(3, 1);
        let s = create_pre_gs(&PreGsOptions {
            layout: &layout,
            rasterizer_discard: false,
            restart: true,
            xfb: None,
            vertices_per_prim: 3,
            streams: 0x1,
            invocations: 1,
        });

        const HEAP: u64 = 0x60000;
        const HEAP_BASE: u64 = 0x100000;
        const DESC: u64 = 0x70000;
        let mut interp = interp_with_stats();
        interp.global.write_u64(HEAP, HEAP_BASE);
        interp.global.write_u32(HEAP + 8, 64);
        interp.global.write_u32(HEAP + 12, 4096);
        write_geometry_params(
            &mut interp.global,
            PARAMS,
            &[
                (GeometryParam::InputPrimitives, 2),
                (GeometryParam::Heap, HEAP),
                (GeometryParam::IndirectDesc, DESC),
            ],
        );
        interp.run(&s.func);

        let (ib_off, _) = GeometryParam::OutputIndexBuffer.layout();
        let mem = &interp.global;
        assert_eq!(mem.read_u64(PARAMS + u64::from(ib_off)), HEAP_BASE + 64);
        /* Six vertices and two restarts */
        let draw: Vec<u32> = (0..5).map(|i| mem.read_u32(DESC + 4 * i)).collect();
        assert_eq!(draw, [8, 1, 16, 0, 0]);
        assert_eq!(mem.read_u32(HEAP + 8), 64 + 8 * 4);
    }

    #[test]
    fn test_prefix_sum_carries_across_chunks() {
        const COUNT: u64 = 0x80000;
        const WORDS: u64 = 2;
        let s = create_prefix_sum_kernel(WORDS as u32);
        assert_eq!(s.info.workgroup_size, [1024, 1, 1]);

        let mut interp = Interp::new();
        interp.set_sysval(Intrinsic::LoadGeometryParamBufferAgx, &[PARAMS]);
        interp.set_sysval(Intrinsic::LoadWorkgroupId, &[1, 0, 0]);
        interp.set_sysval(Intrinsic::LoadLocalInvocationIndex, &[0]);
        write_geometry_params(
            &mut interp.global,
            PARAMS,
            &[
                (GeometryParam::CountBuffer, COUNT),
                (GeometryParam::InputPrimitives, 1025),
            ],
        );
        let el = |i: u64, w: u64| COUNT + 4 * (i * WORDS + w);
        interp.global.write_u32(el(0, 1), 5);
        interp.global.write_u32(el(1024, 1), 7);
        interp.global.write_u32(el(1024, 0), 100);
        interp.run(&s.func);

        assert_eq!(interp.global.read_u32(el(0, 1)), 5);
        assert_eq!(interp.global.read_u32(el(1024, 1)), 12);
        /* Other words are left alone */
        assert_eq!(interp.global.read_u32(el(1024, 0)), 100);
    }
}
