/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Legacy geometry shaders and their copy shader
//!
//! The GS writes each emitted vertex to the GSVS ring and signals the
//! hardware with messages.  A separate copy shader, running as the hardware
//! VS, reads the vertices back and does the exports and stream-out.

use crate::dump_after_pass;
use crate::util::BitMask;
use crate::vtg_gs_query::{gs_output_prim_vertices, gs_shader_query, GsQueries};
use crate::vtg_hw::HardwareProfile;
use crate::vtg_ir::*;
use crate::vtg_legacy_vs::{export_vs_outputs, LegacyExportOptions};
use crate::vtg_prerast_out::{OutputSlot, PrerastOutputs};
use crate::vtg_streamout::emit_streamout;

use log::debug;
use std::collections::BTreeMap;

pub const SENDMSG_GS: i32 = 2;
pub const SENDMSG_GS_DONE: i32 = 3;

pub const SENDMSG_GS_OP_NOP: i32 = 0 << 4;
pub const SENDMSG_GS_OP_CUT: i32 = 1 << 4;
pub const SENDMSG_GS_OP_EMIT: i32 = 2 << 4;
pub const SENDMSG_GS_OP_EMIT_CUT: i32 = 3 << 4;

/// Which components of an output slot are written, and on which streams
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GsSlotUsage {
    pub usage_mask: u8,
    /// Two bits of stream per component
    pub streams: u8,
    pub types: [AluType; 4],
}

impl GsSlotUsage {
    pub fn in_stream(&self, c: u32, stream: u8) -> bool {
        self.usage_mask.has_bit(c) && (self.streams >> (c * 2)) & 0x3 == stream
    }
}

/// Output usage of a geometry shader, shared by the GS and its copy shader
#[derive(Clone, Debug, Default)]
pub struct GsOutputInfo {
    slots: BTreeMap<OutputSlot, GsSlotUsage>,
}

impl GsOutputInfo {
    pub fn usage(&self, slot: OutputSlot) -> GsSlotUsage {
        self.slots.get(&slot).copied().unwrap_or_default()
    }

    pub fn set_usage(&mut self, slot: OutputSlot, usage: GsSlotUsage) {
        self.slots.insert(slot, usage);
    }

    /// Collects output usage from the `store_output`s of a geometry shader
    pub fn gather(s: &Shader) -> GsOutputInfo {
        let mut info = GsOutputInfo::default();
        for intrin in s.intrinsics(Intrinsic::StoreOutput) {
            let sem = intrin.io_semantics();
            let slot = OutputSlot::new(sem.location, sem.high_16bits);
            let usage = info.slots.entry(slot).or_default();
            for i in intrin.idx.write_mask.iter_set_bits() {
                let c = u32::from(intrin.idx.component) + i;
                usage.usage_mask |= 1 << c;
                usage.streams |= sem.stream(i as u8) << (c * 2);
                usage.types[c as usize] = intrin.idx.src_type;
            }
        }
        info
    }
}

/// One dword of a vertex in the GSVS ring
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RingComponent {
    Normal { slot: u32, comp: u8 },
    Packed16 { index: u32, comp: u8, lo: bool, hi: bool },
}

/// Lists the ring dwords of one stream in ring order
///
/// Both the GS and the copy shader walk this list, so their layouts match.
fn gsvs_ring_layout(
    info: &GsOutputInfo,
    outputs_written: u64,
    outputs_written_16bit: u16,
    stream: u8,
) -> Vec<RingComponent> {
    let mut layout = Vec::new();
    for slot in outputs_written.iter_set_bits() {
        let usage = info.usage(OutputSlot::Normal(slot));
        for c in 0..4 {
            if usage.in_stream(c, stream) {
                layout.push(RingComponent::Normal {
                    slot: slot,
                    comp: c as u8,
                });
            }
        }
    }
    for index in outputs_written_16bit.iter_set_bits() {
        let lo_usage = info.usage(OutputSlot::Lo16(index));
        let hi_usage = info.usage(OutputSlot::Hi16(index));
        for c in 0..4 {
            let lo = lo_usage.in_stream(c, stream);
            let hi = hi_usage.in_stream(c, stream);
            if lo || hi {
                layout.push(RingComponent::Packed16 {
                    index: index,
                    comp: c as u8,
                    lo: lo,
                    hi: hi,
                });
            }
        }
    }
    layout
}

struct LegacyGsPass<'a> {
    info: &'a GsOutputInfo,
    outputs_written: u64,
    outputs_written_16bit: u16,
    vertices_out: u32,
    outputs: PrerastOutputs,
    vertex_count: [Option<Src>; 4],
    primitive_count: [Option<Src>; 4],
}

impl<'a> LegacyGsPass<'a> {
    fn emit_vertex(&mut self, b: &mut impl SSABuilder, intrin: &OpIntrinsic) {
        let stream = intrin.idx.stream_id;
        let vtxidx = intrin.srcs[0];

        let gsvs_ring = b.intrin(
            Intrinsic::LoadRingGsvsAmd,
            4,
            32,
            &[],
            IntrinsicIndices {
                stream_id: stream,
                ..Default::default()
            },
        );
        let soffset = b.sysval(Intrinsic::LoadRingGs2vsOffsetAmd);

        /* Every emit needs fresh values */
        let outputs = std::mem::take(&mut self.outputs);

        let access = Access::COHERENT
            | Access::NON_TEMPORAL
            | Access::IS_SWIZZLED_AMD;
        let layout = gsvs_ring_layout(
            self.info,
            self.outputs_written,
            self.outputs_written_16bit,
            stream,
        );
        for (offset, rc) in layout.into_iter().enumerate() {
            let offset = offset as u32;
            match rc {
                RingComponent::Normal { slot, comp } => {
                    let base = offset * self.vertices_out * 4;
                    let Some(output) = outputs.slot_value(slot, comp.into())
                    else {
                        continue;
                    };
                    let voffset = b.ishl_imm(vtxidx, 2);
                    let data = b.u2u32(output);
                    b.store_buffer_amd(
                        data,
                        gsvs_ring,
                        voffset,
                        soffset,
                        base as i32,
                        access,
                        MemoryModes::SHADER_OUT,
                    );
                }
                RingComponent::Packed16 { index, comp, lo, hi } => {
                    let base = offset * self.vertices_out;
                    let c = usize::from(comp);
                    let out_lo = outputs
                        .value(OutputSlot::Lo16(index), c)
                        .filter(|_| lo);
                    let out_hi = outputs
                        .value(OutputSlot::Hi16(index), c)
                        .filter(|_| hi);
                    if out_lo.is_none() && out_hi.is_none() {
                        continue;
                    }

                    let out_lo = match out_lo {
                        Some(v) => v,
                        None => b.undef(1, 16),
                    };
                    let out_hi = match out_hi {
                        Some(v) => v,
                        None => b.undef(1, 16),
                    };

                    let voffset = b.iadd_imm(vtxidx, base);
                    let voffset = b.ishl_imm(voffset, 2);
                    let data = b.pack_32_2x16_split(out_lo, out_hi);
                    b.store_buffer_amd(
                        data,
                        gsvs_ring,
                        voffset,
                        soffset,
                        0,
                        access,
                        MemoryModes::SHADER_OUT,
                    );
                }
            }
        }

        let wave_id = b.sysval(Intrinsic::LoadGsWaveIdAmd);
        let msg = SENDMSG_GS_OP_EMIT | SENDMSG_GS | (i32::from(stream) << 8);
        b.sendmsg_amd(wave_id, msg);
    }

    fn end_primitive(&mut self, b: &mut impl SSABuilder, intrin: &OpIntrinsic) {
        let stream = intrin.idx.stream_id;
        let wave_id = b.sysval(Intrinsic::LoadGsWaveIdAmd);
        let msg = SENDMSG_GS_OP_CUT | SENDMSG_GS | (i32::from(stream) << 8);
        b.sendmsg_amd(wave_id, msg);
    }

    fn lower_intrin(
        &mut self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
    ) -> bool {
        match intrin.intrinsic {
            Intrinsic::StoreOutput => {
                assert!(intrin.srcs[0].bit_size() <= 32);
                self.outputs.gather_store_output(b, intrin, None);
            }
            Intrinsic::EmitVertexWithCounter => self.emit_vertex(b, intrin),
            Intrinsic::EndPrimitiveWithCounter => self.end_primitive(b, intrin),
            Intrinsic::SetVertexAndPrimitiveCount => {
                let stream = usize::from(intrin.idx.stream_id);
                self.vertex_count[stream] = Some(intrin.srcs[0]);
                self.primitive_count[stream] = Some(intrin.srcs[1]);
            }
            _ => return false,
        }
        true
    }
}

/// Lowers a geometry shader running on the legacy hardware GS stage
pub fn lower_legacy_gs(
    s: &mut Shader,
    has_gen_prim_query: bool,
    has_pipeline_stats_query: bool,
    info: &GsOutputInfo,
) {
    let num_vertices_per_primitive =
        gs_output_prim_vertices(s.info.gs.output_primitive);

    let mut pass = LegacyGsPass {
        info: info,
        outputs_written: s.info.outputs_written,
        outputs_written_16bit: s.info.outputs_written_16bit,
        vertices_out: s.info.gs.vertices_out.into(),
        outputs: PrerastOutputs::new(),
        vertex_count: [None; 4],
        primitive_count: [None; 4],
    };

    s.map_instrs(|instr, ssa_alloc| {
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

    let queries = GsQueries {
        gen_prim: has_gen_prim_query,
        gs_invocations: has_pipeline_stats_query,
        gs_primitives: has_pipeline_stats_query,
    };
    let active_stream_mask = s.info.gs.active_stream_mask;
    let progress = s.func.build_at_end(|b| {
        let progress = gs_shader_query(
            b,
            &queries,
            active_stream_mask,
            num_vertices_per_primitive,
            64,
            &pass.vertex_count,
            &pass.primitive_count,
        );

        /* Wait for all stores to finish */
        b.barrier(
            Scope::Invocation,
            Scope::Device,
            MemorySemantics::RELEASE,
            MemoryModes::SHADER_OUT
                | MemoryModes::MEM_SSBO
                | MemoryModes::MEM_GLOBAL
                | MemoryModes::IMAGE,
        );

        let wave_id = b.sysval(Intrinsic::LoadGsWaveIdAmd);
        b.sendmsg_amd(wave_id, SENDMSG_GS_OP_NOP | SENDMSG_GS_DONE);
        progress
    });

    debug!(
        "{}: legacy GS, {} vertices out, query {}",
        s.name, s.info.gs.vertices_out, progress
    );
    dump_after_pass("lower_legacy_gs", s);
}

/// Builds the hardware VS which copies GS output vertices from the GSVS
/// ring to the rasterizer
pub fn create_gs_copy_shader(
    gs: &Shader,
    hw: &HardwareProfile,
    opts: &LegacyExportOptions,
    info: &GsOutputInfo,
) -> Shader {
    let mut s = Shader::new(ShaderStage::Vertex, "gs_copy");
    s.info.outputs_written = gs.info.outputs_written;
    s.info.outputs_written_16bit = gs.info.outputs_written_16bit;
    s.info.clip_distance_array_size = gs.info.clip_distance_array_size;
    s.info.cull_distance_array_size = gs.info.cull_distance_array_size;

    let live = IoLiveness::from_info(&s.info);
    let xfb = if opts.disable_streamout {
        None
    } else {
        gs.xfb.as_ref()
    };
    let vertices_out = u32::from(gs.info.gs.vertices_out);
    let writes_memory = s.info.writes_memory;

    s.func.build_at_end(|b| {
        let gsvs_ring = b.sysval_sized(Intrinsic::LoadRingGsvsAmd, 4, 32);

        let stream_id = xfb.map(|_| {
            let config = b.sysval(Intrinsic::LoadStreamoutConfigAmd);
            b.ubfe_imm(config, 24, 2)
        });

        let vtx_id = b.sysval(Intrinsic::LoadVertexIdZeroBase);
        let vtx_offset = b.imul_imm(vtx_id, 4);
        let access = Access::COHERENT | Access::NON_TEMPORAL;

        let mut num_ifs = 0;
        for stream in 0..4_u8 {
            let streams_written = xfb.map(|x| x.streams_written).unwrap_or(0);
            if stream > 0 && !streams_written.has_bit(stream.into()) {
                continue;
            }

            if let Some(stream_id) = stream_id {
                let cond = b.ieq_imm(stream_id, stream.into());
                b.push_if(cond);
                num_ifs += 1;
            }

            let mut out = PrerastOutputs::new();
            let layout = gsvs_ring_layout(
                info,
                live.outputs_written,
                live.outputs_written_16bit,
                stream,
            );
            for (i, rc) in layout.into_iter().enumerate() {
                let base = i as u32 * vertices_out * 16 * 4;
                let data = b.load_buffer_amd(
                    1,
                    32,
                    gsvs_ring,
                    vtx_offset,
                    Src::new_zero(),
                    base as i32,
                    access,
                );

                match rc {
                    RingComponent::Normal { slot, comp } => {
                        let data = if is_color_slot(slot) {
                            let clamp = b.sysval_sized(
                                Intrinsic::LoadClampVertexColorAmd,
                                1,
                                1,
                            );
                            let sat = b.fsat(data);
                            b.bcsel(clamp, sat, data)
                        } else {
                            data
                        };
                        out.set_u32(slot, comp.into(), data);
                    }
                    RingComponent::Packed16 { index, comp, lo, hi } => {
                        let c = usize::from(comp);
                        if lo {
                            let slot = OutputSlot::Lo16(index);
                            let ty = info.usage(slot).types[c];
                            let v = b.unpack_32_2x16_split_x(data);
                            out.set(slot, c, v, ty);
                        }
                        if hi {
                            let slot = OutputSlot::Hi16(index);
                            let ty = info.usage(slot).types[c];
                            let v = b.unpack_32_2x16_split_y(data);
                            out.set(slot, c, v, ty);
                        }
                    }
                }
            }

            if let (Some(_), Some(xfb)) = (stream_id, xfb) {
                emit_streamout(b, stream, xfb, &out);
            }

            if stream == 0 {
                export_vs_outputs(b, hw, opts, &live, writes_memory, &out);
            }

            if stream_id.is_some() {
                b.push_else();
            }
        }

        for _ in 0..num_ifs {
            b.pop_if();
        }
    });

    debug!(
        "{}: copy shader for {} outputs, streamout {}",
        gs.name,
        gs.info.outputs_written.count_ones(),
        xfb.is_some()
    );
    dump_after_pass("create_gs_copy_shader", &s);
    s
}
