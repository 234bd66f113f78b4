/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::util::BitMask;
use crate::vtg_ir::*;

use log::debug;

/// Which geometry queries the pipeline may have active
#[derive(Clone, Copy, Debug, Default)]
pub struct GsQueries {
    pub gen_prim: bool,
    pub gs_invocations: bool,
    pub gs_primitives: bool,
}

impl GsQueries {
    fn has_pipeline_stats(&self) -> bool {
        self.gs_invocations || self.gs_primitives
    }
}

/// Number of vertices in a primitive of a GS output topology
pub fn gs_output_prim_vertices(prim: Prim) -> u32 {
    match prim {
        Prim::Points => 1,
        Prim::LineStrip => 2,
        Prim::TriangleStrip => 3,
        _ => panic!("Invalid GS output primitive {:?}", prim),
    }
}

fn accum_ior(b: &mut impl SSABuilder, accum: Option<Src>, term: Src) -> Src {
    match accum {
        Some(accum) => b.ior(accum, term),
        None => term,
    }
}

/// Adds this wave's primitives and invocations to the enabled query
/// counters
///
/// Each query is tested at run time since it can be toggled per draw, and
/// the atomics are done by a single elected lane.  Returns false and emits
/// nothing if no query kind is possible.
pub fn gs_shader_query(
    b: &mut impl SSABuilder,
    queries: &GsQueries,
    active_stream_mask: u8,
    num_vertices_per_primitive: u32,
    wave_size: u32,
    vertex_count: &[Option<Src>; 4],
    primitive_count: &[Option<Src>; 4],
) -> bool {
    assert!(num_vertices_per_primitive >= 1);
    let mut any_query_enabled = None;

    let prim_gen_query_enabled = if queries.gen_prim {
        let en = b.sysval_sized(Intrinsic::LoadPrimGenQueryEnabledAmd, 1, 1);
        any_query_enabled = Some(accum_ior(b, any_query_enabled, en));
        Some(en)
    } else {
        None
    };

    let pipeline_query_enabled = if queries.has_pipeline_stats() {
        let en =
            b.sysval_sized(Intrinsic::LoadPipelineStatQueryEnabledAmd, 1, 1);
        any_query_enabled = Some(accum_ior(b, any_query_enabled, en));
        Some(en)
    } else {
        None
    };

    let Some(any_query_enabled) = any_query_enabled else {
        return false;
    };

    b.push_if(any_query_enabled);

    let wave_bits = wave_size.try_into().unwrap();
    let active_threads_mask =
        b.intrin(Intrinsic::Ballot, 1, wave_bits, &[Src::True], Default::default());
    let num_active_threads = b.bit_count(active_threads_mask);

    /* Strips count vertices and restarts, queries count real primitives */
    let mut num_prims_in_wave = [None; 4];
    for i in active_stream_mask.iter_set_bits() {
        let i = i as usize;
        let (Some(vtx_cnt), Some(prm_cnt)) = (vertex_count[i], primitive_count[i])
        else {
            panic!("Missing vertex and primitive counts for stream {}", i);
        };

        if let (Some(vtx), Some(prm)) = (vtx_cnt.as_u32(), prm_cnt.as_u32()) {
            let restarts = prm.wrapping_mul(num_vertices_per_primitive - 1);
            let total = vtx.wrapping_sub(restarts);
            if total == 0 {
                continue;
            }
            num_prims_in_wave[i] = Some(b.imul_imm(num_active_threads, total));
        } else {
            let mut prims = prm_cnt;
            if num_vertices_per_primitive > 1 {
                let neg = 0_u32.wrapping_sub(num_vertices_per_primitive - 1);
                let scaled = b.imul_imm(prm_cnt, neg);
                prims = b.iadd(scaled, vtx_cnt);
            }
            num_prims_in_wave[i] = Some(b.intrin(
                Intrinsic::Reduce,
                1,
                32,
                &[prims],
                IntrinsicIndices {
                    reduction_op: AluOp::IAdd,
                    ..Default::default()
                },
            ));
        }
    }

    let elect = b.sysval_sized(Intrinsic::Elect, 1, 1);
    b.push_if(elect);

    if let Some(pipeline_query_enabled) = pipeline_query_enabled {
        b.push_if(pipeline_query_enabled);

        /* All streams go to the same counter */
        let mut count = None;
        for n in num_prims_in_wave.iter().flatten() {
            count = Some(match count {
                Some(c) => b.iadd(c, *n),
                None => *n,
            });
        }

        if let (true, Some(count)) = (queries.gs_primitives, count) {
            b.intrin_nodst(
                Intrinsic::AtomicAddGsEmitPrimCountAmd,
                &[count],
                Default::default(),
            );
        }

        if queries.gs_invocations {
            b.intrin_nodst(
                Intrinsic::AtomicAddShaderInvocationCountAmd,
                &[num_active_threads],
                Default::default(),
            );
        }

        b.pop_if();
    }

    if let Some(prim_gen_query_enabled) = prim_gen_query_enabled {
        b.push_if(prim_gen_query_enabled);
        for (i, n) in num_prims_in_wave.iter().enumerate() {
            if let Some(n) = n {
                b.intrin_nodst(
                    Intrinsic::AtomicAddGenPrimCountAmd,
                    &[*n],
                    IntrinsicIndices {
                        stream_id: i as u8,
                        ..Default::default()
                    },
                );
            }
        }
        b.pop_if();
    }

    b.pop_if();
    b.pop_if();

    debug!(
        "GS query for streams {:#x}, {} vertices per primitive",
        active_stream_mask, num_vertices_per_primitive
    );

    true
}
