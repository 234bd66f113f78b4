/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::util::BitMask;
use crate::vtg_ir::*;
use crate::vtg_prerast_out::PrerastOutputs;

use log::debug;

pub const MAX_XFB_BUFFERS: usize = 4;

/// Writes the captured outputs of `stream` to the transform feedback
/// buffers
///
/// Only the first `so_vtx_count` lanes of the wave capture anything.  Each
/// lane writes at `(write_index + lane) * stride` past the buffer's current
/// offset.
pub fn emit_streamout(
    b: &mut impl SSABuilder,
    stream: u8,
    xfb: &XfbInfo,
    outputs: &PrerastOutputs,
) {
    let config = b.sysval(Intrinsic::LoadStreamoutConfigAmd);
    let so_vtx_count = b.ubfe_imm(config, 16, 7);
    let tid = b.sysval(Intrinsic::LoadSubgroupInvocation);

    let cond = b.ilt(tid, so_vtx_count);
    b.push_if(cond);

    let so_write_index = b.sysval(Intrinsic::LoadStreamoutWriteIndexAmd);

    let mut so_buffers = [None; MAX_XFB_BUFFERS];
    let mut so_write_offset = [None; MAX_XFB_BUFFERS];
    for i in xfb.buffers_written.iter_set_bits() {
        let i = i as usize;
        let idx = IntrinsicIndices {
            base: i as i32,
            ..Default::default()
        };
        so_buffers[i] = Some(b.intrin(
            Intrinsic::LoadStreamoutBufferAmd,
            4,
            32,
            &[],
            idx,
        ));

        let stride = xfb.buffers[i].stride;
        let offset = b.sysval_base(Intrinsic::LoadStreamoutOffsetAmd, i as i32);
        let vtx = b.iadd(so_write_index, tid);
        let vtx_off = b.imul_imm(vtx, stride);
        let buf_off = b.imul_imm(offset, 4);
        so_write_offset[i] = Some(b.iadd(vtx_off, buf_off));
    }

    let mut num_stores = 0;
    for output in &xfb.outputs {
        let buffer = usize::from(output.buffer);
        if xfb.buffer_to_stream[buffer] != stream {
            continue;
        }

        let undef = b.undef(1, 32);
        let mut vec = [undef; 4];
        let mut mask = 0_u8;
        for j in output.component_mask.iter_set_bits() {
            let Some(oc) = outputs.output_and_type(
                output.location,
                output.high_16bits,
                j as usize,
            ) else {
                continue;
            };

            let data = if oc.value.bit_size() < 32 {
                b.convert_to_bit_size(oc.value, oc.ty, 32)
            } else {
                oc.value
            };

            let comp = j - u32::from(output.component_offset);
            vec[comp as usize] = data;
            mask |= 1 << comp;
        }

        if mask == 0 {
            continue;
        }

        let (Some(desc), Some(offset)) =
            (so_buffers[buffer], so_write_offset[buffer])
        else {
            panic!("Output captured to unwritten buffer {}", buffer);
        };

        let data = b.vec(&vec[..mask.last_bit() as usize]);
        b.intrin_nodst(
            Intrinsic::StoreBufferAmd,
            &[data, desc, offset, Src::new_zero(), Src::new_zero()],
            IntrinsicIndices {
                base: output.offset as i32,
                write_mask: mask,
                access: Access::COHERENT | Access::NON_TEMPORAL,
                ..Default::default()
            },
        );
        num_stores += 1;
    }

    b.pop_if();

    debug!("Stream {} captures {} outputs", stream, num_stores);
}
