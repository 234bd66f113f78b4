/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Output gathering for the last pre-rasterization stage
//!
//! The shader is expected to have its outputs lowered to temporaries, so
//! every output is stored once at the end with a constant offset of zero.

use crate::util::BitMask;
use crate::vtg_ir::*;

use std::collections::BTreeMap;

/// Where a gathered output component lives
///
/// Dedicated 16-bit slots are tracked per half.  A 16-bit value stored into
/// a normal slot is packed into that slot instead.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OutputSlot {
    Normal(u32),
    Lo16(u32),
    Hi16(u32),
}

impl OutputSlot {
    pub fn new(location: u32, high_16bits: bool) -> OutputSlot {
        if is_16bit_slot(location) {
            let index = index_16bit(location);
            if high_16bits {
                OutputSlot::Hi16(index)
            } else {
                OutputSlot::Lo16(index)
            }
        } else {
            assert!(location < VARYING_SLOT_MAX);
            OutputSlot::Normal(location)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputComponent {
    pub value: Src,
    /// Declared type of the value, needed to widen it later
    pub ty: AluType,
}

#[derive(Clone, Debug, Default)]
pub struct PerOutput {
    pub comps: [Option<OutputComponent>; 4],
    pub components_mask: u8,
    /// Two bits of stream per component
    pub stream: u8,
}

impl PerOutput {
    pub fn value(&self, c: usize) -> Option<Src> {
        self.comps[c].map(|oc| oc.value)
    }

    pub fn ty(&self, c: usize) -> Option<AluType> {
        self.comps[c].map(|oc| oc.ty)
    }

    pub fn written_mask(&self) -> u8 {
        let mut mask = 0;
        for c in 0..4 {
            if self.comps[c].is_some() {
                mask |= 1 << c;
            }
        }
        mask
    }

    pub fn stream_of(&self, c: u32) -> u8 {
        (self.stream >> (c * 2)) & 0x3
    }
}

/// The outputs of one shader invocation, keyed by slot
///
/// Absent slots and components simply have no entry.
#[derive(Clone, Debug, Default)]
pub struct PrerastOutputs {
    outputs: BTreeMap<OutputSlot, PerOutput>,
}

impl PrerastOutputs {
    pub fn new() -> PrerastOutputs {
        Default::default()
    }

    pub fn get(&self, slot: OutputSlot) -> Option<&PerOutput> {
        self.outputs.get(&slot)
    }

    pub fn value(&self, slot: OutputSlot, c: usize) -> Option<Src> {
        self.outputs.get(&slot).and_then(|o| o.value(c))
    }

    pub fn slot_value(&self, location: u32, c: usize) -> Option<Src> {
        self.value(OutputSlot::Normal(location), c)
    }

    /// Returns the four components of a normal slot
    pub fn slot_values(&self, location: u32) -> [Option<Src>; 4] {
        let mut vals = [None; 4];
        for (c, val) in vals.iter_mut().enumerate() {
            *val = self.slot_value(location, c);
        }
        vals
    }

    pub fn set(&mut self, slot: OutputSlot, c: usize, value: Src, ty: AluType) {
        let out = self.outputs.entry(slot).or_default();
        out.comps[c] = Some(OutputComponent { value: value, ty: ty });
        out.components_mask |= 1 << c;
    }

    pub fn set_u32(&mut self, location: u32, c: usize, value: Src) {
        self.set(OutputSlot::Normal(location), c, value, AluType::UINT32);
    }

    pub fn remove(&mut self, slot: OutputSlot) {
        self.outputs.remove(&slot);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutputSlot, &PerOutput)> {
        self.outputs.iter()
    }

    /// Looks up an output component for capture along with its declared
    /// type
    pub fn output_and_type(
        &self,
        location: u32,
        high_16bits: bool,
        c: usize,
    ) -> Option<OutputComponent> {
        let slot = OutputSlot::new(location, high_16bits);
        self.outputs.get(&slot).and_then(|o| o.comps[c])
    }

    /// Records the components of a `store_output`
    ///
    /// Outputs of inactive geometry streams are dropped when
    /// `active_stream_mask` is given.
    pub fn gather_store_output(
        &mut self,
        b: &mut impl SSABuilder,
        intrin: &OpIntrinsic,
        active_stream_mask: Option<u8>,
    ) {
        assert!(intrin.intrinsic == Intrinsic::StoreOutput);
        assert!(intrin.io_offset_src().is_zero());

        let sem = *intrin.io_semantics();
        let store_val = intrin.srcs[0];
        assert!(store_val.bit_size() == 16 || store_val.bit_size() == 32);
        assert!(intrin.idx.src_type.bit_size == store_val.bit_size());

        let slot = OutputSlot::new(sem.location, sem.high_16bits);
        let non_dedicated_16bit =
            matches!(slot, OutputSlot::Normal(_)) && store_val.bit_size() == 16;

        for i in intrin.idx.write_mask.iter_set_bits() {
            let stream = sem.stream(i as u8);
            if let Some(active) = active_stream_mask {
                if active & (1 << stream) == 0 {
                    continue;
                }
            }

            let c = usize::from(intrin.idx.component) + i as usize;
            let out = self.outputs.entry(slot).or_default();

            assert!(
                out.components_mask & (1 << c) == 0
                    || out.stream_of(c as u32) == stream,
                "Output component changed streams"
            );
            out.stream |= stream << (c * 2);
            out.components_mask |= 1 << c;

            let comp = b.channel(store_val, i as u8);
            let prev = out.value(c);

            let (value, ty) = if non_dedicated_16bit {
                let packed = if sem.high_16bits {
                    let lo = match prev {
                        Some(p) => b.unpack_32_2x16_split_x(p),
                        None => Src::new_imm_u16(0),
                    };
                    b.pack_32_2x16_split(lo, comp)
                } else {
                    let hi = match prev {
                        Some(p) => b.unpack_32_2x16_split_y(p),
                        None => Src::new_imm_u16(0),
                    };
                    b.pack_32_2x16_split(comp, hi)
                };
                (packed, AluType::UINT32)
            } else {
                (comp, intrin.idx.src_type)
            };

            let out = self.outputs.entry(slot).or_default();
            out.comps[c] = Some(OutputComponent { value: value, ty: ty });
        }
    }
}

/// Removes every `store_output` from the shader and collects its values
pub fn gather_outputs(
    s: &mut Shader,
    active_stream_mask: Option<u8>,
) -> PrerastOutputs {
    let mut out = PrerastOutputs::new();
    s.map_instrs(|instr, ssa_alloc| {
        match instr.as_intrinsic() {
            Some(intrin) if intrin.intrinsic == Intrinsic::StoreOutput => {
                let mut b = SSAInstrBuilder::new(ssa_alloc);
                out.gather_store_output(&mut b, intrin, active_stream_mask);
                b.as_mapped_instrs()
            }
            _ => MappedInstrs::One(instr),
        }
    });
    out
}

/// Builds a `store_output` the way a front-end would emit one
pub fn build_store_output(
    b: &mut impl SSABuilder,
    value: Src,
    location: u32,
    component: u8,
    ty: AluType,
    high_16bits: bool,
    gs_streams: u8,
) {
    let sem = IoSemantics {
        high_16bits: high_16bits,
        gs_streams: gs_streams,
        ..IoSemantics::new(location)
    };
    b.intrin_nodst(
        Intrinsic::StoreOutput,
        &[value, Src::new_zero()],
        IntrinsicIndices {
            component: component,
            write_mask: comp_mask(value.comps()),
            io_semantics: sem,
            src_type: ty,
            ..Default::default()
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtg_interp::Interp;

    fn store_halves(hi_first: bool) -> u32 {
        let mut s = Shader::new(ShaderStage::Vertex, "halves");
        s.func.build_at_end(|b| {
            let lo = b.u2u(Src::new_imm_u32(0x3c00), 16);
            let hi = b.u2u(Src::new_imm_u32(0xbeef), 16);
            let order = if hi_first {
                [(hi, true), (lo, false)]
            } else {
                [(lo, false), (hi, true)]
            };
            for (val, high) in order {
                build_store_output(
                    b,
                    val,
                    VARYING_SLOT_VAR0,
                    1,
                    AluType::FLOAT16,
                    high,
                    0,
                );
            }
        });

        let out = gather_outputs(&mut s, None);
        assert!(!s.has_intrinsic(Intrinsic::StoreOutput));

        let oc = out.output_and_type(VARYING_SLOT_VAR0, false, 1).unwrap();
        assert_eq!(oc.ty, AluType::UINT32);
        assert_eq!(oc.value.bit_size(), 32);
        s.func.build_at_end(|b| {
            let lo = b.unpack_32_2x16_split_x(oc.value);
            let hi = b.unpack_32_2x16_split_y(oc.value);
            b.store_shared(lo, Src::new_zero(), 0);
            b.store_shared(hi, Src::new_zero(), 4);
            b.store_shared(oc.value, Src::new_zero(), 8);
        });

        let mut interp = Interp::new();
        interp.run(&s.func);
        assert_eq!(interp.shared.read(0, 2), 0x3c00);
        assert_eq!(interp.shared.read(4, 2), 0xbeef);
        interp.shared.read_u32(8)
    }

    #[test]
    fn test_16bit_packing_is_order_independent() {
        assert_eq!(store_halves(false), 0xbeef_3c00);
        assert_eq!(store_halves(true), 0xbeef_3c00);
    }

    #[test]
    fn test_inactive_streams_are_dropped() {
        let mut s = Shader::new(ShaderStage::Geometry, "streams");
        s.func.build_at_end(|b| {
            let x = Src::new_imm_f32(1.0);
            let v = b.vec(&[x, x]);
            /* component 0 on stream 0, component 1 on stream 2 */
            build_store_output(
                b,
                v,
                VARYING_SLOT_VAR0 + 2,
                0,
                AluType::FLOAT32,
                false,
                0b10_00,
            );
        });
        let out = gather_outputs(&mut s, Some(0x1));
        let o = out.get(OutputSlot::Normal(VARYING_SLOT_VAR0 + 2)).unwrap();
        assert_eq!(o.written_mask(), 0x1);
        assert_eq!(o.ty(0), Some(AluType::FLOAT32));

        let out = gather_outputs_of_copy(0b10_00, 0x5);
        let o = out.get(OutputSlot::Normal(VARYING_SLOT_VAR0)).unwrap();
        assert_eq!(o.written_mask(), 0x3);
        assert_eq!(o.stream_of(1), 2);
    }

    fn gather_outputs_of_copy(streams: u8, active: u8) -> PrerastOutputs {
        let mut s = Shader::new(ShaderStage::Geometry, "streams");
        s.func.build_at_end(|b| {
            let x = Src::new_imm_u32(7);
            let v = b.vec(&[x, x]);
            build_store_output(
                b,
                v,
                VARYING_SLOT_VAR0,
                0,
                AluType::UINT32,
                false,
                streams,
            );
        });
        gather_outputs(&mut s, Some(active))
    }

    #[test]
    #[should_panic]
    fn test_stream_change_is_fatal() {
        let mut s = Shader::new(ShaderStage::Geometry, "streams");
        s.func.build_at_end(|b| {
            let x = Src::new_imm_u32(7);
            build_store_output(
                b,
                x,
                VARYING_SLOT_VAR0,
                0,
                AluType::UINT32,
                false,
                0,
            );
            build_store_output(
                b,
                x,
                VARYING_SLOT_VAR0,
                0,
                AluType::UINT32,
                false,
                1,
            );
        });
        gather_outputs(&mut s, Some(0xf));
    }
}
