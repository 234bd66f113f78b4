/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! A single-invocation reference interpreter for lowered shaders
//!
//! System values and driver arguments are injected up front.  Memory is
//! byte addressed so narrow stores at odd halves behave like hardware.
//! Cross-lane operations act as if the invocation ran alone in its wave.

use crate::vtg_ir::*;

use std::collections::HashMap;

#[derive(Default)]
pub struct Memory {
    bytes: HashMap<u64, u8>,
}

impl Memory {
    pub fn read(&self, addr: u64, bytes: u32) -> u64 {
        let mut v = 0_u64;
        for i in 0..bytes {
            let byte = self.bytes.get(&(addr + u64::from(i))).copied();
            v |= u64::from(byte.unwrap_or(0)) << (i * 8);
        }
        v
    }

    pub fn write(&mut self, addr: u64, bytes: u32, val: u64) {
        for i in 0..bytes {
            self.bytes.insert(addr + u64::from(i), (val >> (i * 8)) as u8);
        }
    }

    pub fn read_u32(&self, addr: u64) -> u32 {
        self.read(addr, 4) as u32
    }

    pub fn write_u32(&mut self, addr: u64, val: u32) {
        self.write(addr, 4, val.into());
    }

    pub fn read_u64(&self, addr: u64) -> u64 {
        self.read(addr, 8)
    }

    pub fn write_u64(&mut self, addr: u64, val: u64) {
        self.write(addr, 8, val);
    }

    pub fn is_written(&self, addr: u64) -> bool {
        self.bytes.contains_key(&addr)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Export {
    pub base: i32,
    pub write_mask: u8,
    pub flags: ExportFlags,
    pub values: Vec<u64>,
}

impl Export {
    pub fn f32(&self, c: usize) -> f32 {
        f32::from_bits(self.values[c] as u32)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Emit { stream: u8, srcs: Vec<u64> },
    EndPrimitive { stream: u8, srcs: Vec<u64> },
    SetCounts { stream: u8, srcs: Vec<u64> },
    Output { location: u32, high_16bits: bool, component: u8, value: u64 },
}

enum Flow {
    Normal,
    Break,
    Continue,
}

/// Booleans live in memory as dwords
fn bytes_for(bit_size: u8) -> u32 {
    if bit_size == 1 {
        4
    } else {
        u32::from(bit_size) / 8
    }
}

fn mask_bits(v: u64, bit_size: u8) -> u64 {
    if bit_size >= 64 {
        v
    } else {
        v & ((1_u64 << bit_size) - 1)
    }
}

fn sext(v: u64, bit_size: u8) -> i64 {
    if bit_size >= 64 {
        v as i64
    } else {
        let shift = 64 - u32::from(bit_size);
        ((v << shift) as i64) >> shift
    }
}

fn f16_to_f32(h: u16) -> f32 {
    let sign = u32::from(h >> 15) << 31;
    let exp = u32::from((h >> 10) & 0x1f);
    let mant = u32::from(h & 0x3ff);
    let bits = if exp == 0 {
        if mant == 0 {
            sign
        } else {
            let v = (mant as f32) * 2.0_f32.powi(-24);
            return if sign != 0 { -v } else { v };
        }
    } else if exp == 0x1f {
        sign | 0x7f80_0000 | (mant << 13)
    } else {
        sign | ((exp + 112) << 23) | (mant << 13)
    };
    f32::from_bits(bits)
}

pub struct Interp {
    values: HashMap<u32, Vec<u64>>,
    vars: HashMap<VarId, Vec<u64>>,
    sysvals: HashMap<(Intrinsic, u32), Vec<u64>>,
    pub shared: Memory,
    pub global: Memory,
    pub buffers: HashMap<u64, Memory>,
    pub exports: Vec<Export>,
    pub sendmsgs: Vec<i32>,
    pub events: Vec<Event>,
    pub counters: HashMap<(Intrinsic, u8), u64>,
    pub barriers: Vec<IntrinsicIndices>,
    pub undef_value: u64,
}

impl Interp {
    pub fn new() -> Interp {
        Interp {
            values: HashMap::new(),
            vars: HashMap::new(),
            sysvals: HashMap::new(),
            shared: Memory::default(),
            global: Memory::default(),
            buffers: HashMap::new(),
            exports: Vec::new(),
            sendmsgs: Vec::new(),
            events: Vec::new(),
            counters: HashMap::new(),
            barriers: Vec::new(),
            undef_value: 0,
        }
    }

    pub fn set_sysval(&mut self, intrinsic: Intrinsic, vals: &[u64]) {
        self.sysvals.insert((intrinsic, 0), vals.to_vec());
    }

    /// Sets a system value selected by an index such as a buffer, stream
    /// or clip plane number
    pub fn set_sysval_idx(
        &mut self,
        intrinsic: Intrinsic,
        key: u32,
        vals: &[u64],
    ) {
        self.sysvals.insert((intrinsic, key), vals.to_vec());
    }

    pub fn buffer(&mut self, desc: u64) -> &mut Memory {
        self.buffers.entry(desc).or_default()
    }

    pub fn src(&self, src: &Src) -> Vec<u64> {
        match src {
            Src::SSA(ssa) => match self.values.get(&ssa.idx()) {
                Some(v) => v.clone(),
                None => panic!("{} used before it was defined", ssa),
            },
            Src::Imm16(u) => vec![(*u).into()],
            Src::Imm32(u) => vec![(*u).into()],
            Src::Imm64(u) => vec![*u],
            Src::True => vec![1],
            Src::False => vec![0],
        }
    }

    fn src1(&self, src: &Src) -> u64 {
        self.src(src)[0]
    }

    fn def(&mut self, dst: &Dst, vals: Vec<u64>) {
        if let Dst::SSA(ssa) = dst {
            let vals = vals
                .into_iter()
                .map(|v| mask_bits(v, ssa.bit_size()))
                .collect::<Vec<_>>();
            assert!(vals.len() == usize::from(ssa.comps()));
            self.values.insert(ssa.idx(), vals);
        }
    }

    pub fn value(&self, ssa: &SSAValue) -> &[u64] {
        &self.values[&ssa.idx()]
    }

    fn sysval(&self, intrin: &OpIntrinsic) -> Vec<u64> {
        let key = intrin.idx.base as u32
            + u32::from(intrin.idx.ucp_id)
            + u32::from(intrin.idx.stream_id);
        match self.sysvals.get(&(intrin.intrinsic, key)) {
            Some(v) => v.clone(),
            None => panic!("No value for {} ({})", intrin.intrinsic, key),
        }
    }

    fn eval_alu(&self, alu: &OpAlu) -> Vec<u64> {
        let dst = alu.dst.as_ssa().expect("ALU without destination");
        let srcs: Vec<Vec<u64>> = alu.srcs.iter().map(|s| self.src(s)).collect();
        let src_bits: Vec<u8> = alu.srcs.iter().map(|s| s.bit_size()).collect();

        match alu.op {
            AluOp::Mov => return srcs[0].clone(),
            AluOp::Vec => return srcs.iter().map(|s| s[0]).collect(),
            AluOp::Channel(c) => return vec![srcs[0][usize::from(c)]],
            AluOp::FDot4 => {
                let mut sum = 0.0_f32;
                for c in 0..4 {
                    let x = f32::from_bits(srcs[0][c] as u32);
                    let y = f32::from_bits(srcs[1][c] as u32);
                    sum += x * y;
                }
                return vec![sum.to_bits().into()];
            }
            _ => (),
        }

        let get = |s: usize, c: usize| -> u64 {
            let v = &srcs[s];
            v[c.min(v.len() - 1)]
        };
        let f = |v: u64| f32::from_bits(v as u32);
        let fb = |x: f32| u64::from(x.to_bits());
        let bits = dst.bit_size();
        let in_bits = alu
            .srcs
            .iter()
            .find_map(|s| s.as_ssa().map(|ssa| ssa.bit_size()))
            .unwrap_or(src_bits[0]);

        (0..usize::from(dst.comps()))
            .map(|c| {
                let x = get(0, c);
                match alu.op {
                    AluOp::IAdd => x.wrapping_add(get(1, c)),
                    AluOp::ISub => x.wrapping_sub(get(1, c)),
                    AluOp::IMul => x.wrapping_mul(get(1, c)),
                    AluOp::UDiv => x.checked_div(get(1, c)).unwrap_or(0),
                    AluOp::UMod => x.checked_rem(get(1, c)).unwrap_or(0),
                    AluOp::IShl => {
                        x.wrapping_shl((get(1, c) % u64::from(bits)) as u32)
                    }
                    AluOp::UShr => mask_bits(x, bits)
                        .wrapping_shr((get(1, c) % u64::from(bits)) as u32),
                    AluOp::IAnd => x & get(1, c),
                    AluOp::IOr => x | get(1, c),
                    AluOp::IXor => x ^ get(1, c),
                    AluOp::INot => !x,
                    AluOp::UMin => x.min(get(1, c)),
                    AluOp::UMax => x.max(get(1, c)),
                    AluOp::IMin => {
                        if sext(x, bits) < sext(get(1, c), bits) {
                            x
                        } else {
                            get(1, c)
                        }
                    }
                    AluOp::IMax => {
                        if sext(x, bits) > sext(get(1, c), bits) {
                            x
                        } else {
                            get(1, c)
                        }
                    }
                    AluOp::USubSat => x.saturating_sub(get(1, c)),
                    AluOp::IEq => (x == get(1, c)).into(),
                    AluOp::INe => (x != get(1, c)).into(),
                    AluOp::ULt => (x < get(1, c)).into(),
                    AluOp::UGe => (x >= get(1, c)).into(),
                    AluOp::ILt => {
                        (sext(x, in_bits) < sext(get(1, c), in_bits)).into()
                    }
                    AluOp::IGe => {
                        (sext(x, in_bits) >= sext(get(1, c), in_bits)).into()
                    }
                    AluOp::FEq => (f(x) == f(get(1, c))).into(),
                    AluOp::FNeu => (f(x) != f(get(1, c))).into(),
                    AluOp::FAdd => fb(f(x) + f(get(1, c))),
                    AluOp::FMul => fb(f(x) * f(get(1, c))),
                    AluOp::FSat => fb(f(x).clamp(0.0, 1.0)),
                    AluOp::BCsel => {
                        if x != 0 {
                            get(1, c)
                        } else {
                            get(2, c)
                        }
                    }
                    AluOp::U2U => x,
                    AluOp::I2I => sext(x, in_bits) as u64,
                    AluOp::F2F => match (in_bits, bits) {
                        (16, 32) => fb(f16_to_f32(x as u16)),
                        (a, b) if a == b => x,
                        _ => panic!("Unsupported f2f {} -> {}", in_bits, bits),
                    },
                    AluOp::B2I => (x != 0).into(),
                    AluOp::Pack32_2x16Split => (x & 0xffff) | (get(1, c) << 16),
                    AluOp::Unpack32_2x16SplitX => x & 0xffff,
                    AluOp::Unpack32_2x16SplitY => (x >> 16) & 0xffff,
                    AluOp::Ubfe => {
                        let off = get(1, c) & 31;
                        let n = get(2, c) & 31;
                        (mask_bits(x, 32) >> off) & ((1 << n) - 1)
                    }
                    AluOp::BitCount => x.count_ones().into(),
                    AluOp::Mov
                    | AluOp::Vec
                    | AluOp::Channel(_)
                    | AluOp::FDot4 => unreachable!(),
                }
            })
            .collect()
    }

    fn load_mem(mem: &Memory, addr: u64, comps: u8, bit_size: u8) -> Vec<u64> {
        let bytes = bytes_for(bit_size);
        (0..u64::from(comps))
            .map(|c| mem.read(addr + c * u64::from(bytes), bytes))
            .collect()
    }

    fn store_mem(
        mem: &mut Memory,
        addr: u64,
        vals: &[u64],
        bit_size: u8,
        write_mask: u8,
    ) {
        let bytes = bytes_for(bit_size);
        for (c, v) in vals.iter().enumerate() {
            if write_mask & (1 << c) != 0 {
                mem.write(addr + (c as u64) * u64::from(bytes), bytes, *v);
            }
        }
    }

    fn exec_intrinsic(&mut self, intrin: &OpIntrinsic) {
        let idx = &intrin.idx;
        let dst_shape = intrin.dst.as_ssa().map(|s| (s.comps(), s.bit_size()));
        let srcs: Vec<Vec<u64>> =
            intrin.srcs.iter().map(|s| self.src(s)).collect();
        let base = idx.base as i64 as u64;

        let result: Option<Vec<u64>> = match intrin.intrinsic {
            Intrinsic::StoreOutput | Intrinsic::StorePerVertexOutput => {
                let sem = idx.io_semantics;
                for (c, v) in srcs[0].iter().enumerate() {
                    if idx.write_mask & (1 << c) != 0 {
                        self.events.push(Event::Output {
                            location: sem.location,
                            high_16bits: sem.high_16bits,
                            component: idx.component + c as u8,
                            value: *v,
                        });
                    }
                }
                None
            }
            Intrinsic::EmitVertex | Intrinsic::EmitVertexWithCounter => {
                self.events.push(Event::Emit {
                    stream: idx.stream_id,
                    srcs: srcs.iter().map(|s| s[0]).collect(),
                });
                None
            }
            Intrinsic::EndPrimitive | Intrinsic::EndPrimitiveWithCounter => {
                self.events.push(Event::EndPrimitive {
                    stream: idx.stream_id,
                    srcs: srcs.iter().map(|s| s[0]).collect(),
                });
                None
            }
            Intrinsic::SetVertexAndPrimitiveCount => {
                self.events.push(Event::SetCounts {
                    stream: idx.stream_id,
                    srcs: srcs.iter().map(|s| s[0]).collect(),
                });
                None
            }
            Intrinsic::Barrier => {
                self.barriers.push(*idx);
                None
            }
            Intrinsic::LoadShared => {
                let (comps, bits) = dst_shape.unwrap();
                let addr = srcs[0][0].wrapping_add(base);
                Some(Self::load_mem(&self.shared, addr, comps, bits))
            }
            Intrinsic::StoreShared => {
                let addr = srcs[1][0].wrapping_add(base);
                let bits = intrin.srcs[0].bit_size();
                Self::store_mem(
                    &mut self.shared,
                    addr,
                    &srcs[0],
                    bits,
                    idx.write_mask,
                );
                None
            }
            Intrinsic::LoadBufferAmd => {
                let (comps, bits) = dst_shape.unwrap();
                let addr = srcs[1][0] + srcs[2][0] + base;
                let mem = self.buffers.entry(srcs[0][0]).or_default();
                Some(Self::load_mem(mem, addr, comps, bits))
            }
            Intrinsic::StoreBufferAmd => {
                let addr = srcs[2][0] + srcs[3][0] + base;
                let bits = intrin.srcs[0].bit_size();
                let mem = self.buffers.entry(srcs[1][0]).or_default();
                Self::store_mem(mem, addr, &srcs[0], bits, idx.write_mask);
                None
            }
            Intrinsic::LoadGlobal | Intrinsic::LoadGlobalConstant => {
                let (comps, bits) = dst_shape.unwrap();
                Some(Self::load_mem(&self.global, srcs[0][0], comps, bits))
            }
            Intrinsic::StoreGlobal => {
                let bits = intrin.srcs[0].bit_size();
                Self::store_mem(
                    &mut self.global,
                    srcs[1][0],
                    &srcs[0],
                    bits,
                    idx.write_mask,
                );
                None
            }
            Intrinsic::GlobalAtomic => {
                let bytes = bytes_for(intrin.srcs[1].bit_size());
                let addr = srcs[0][0];
                let old = self.global.read(addr, bytes);
                let data = srcs[1][0];
                let new = match idx.atomic_op {
                    AtomicOp::IAdd => old.wrapping_add(data),
                    AtomicOp::UMin => old.min(data),
                    AtomicOp::UMax => old.max(data),
                    AtomicOp::Xchg => data,
                    AtomicOp::CmpXchg => panic!("Use global_atomic_swap"),
                };
                self.global.write(addr, bytes, new);
                Some(vec![old])
            }
            Intrinsic::GlobalAtomicSwap => {
                let bytes = bytes_for(intrin.srcs[2].bit_size());
                let addr = srcs[0][0];
                let old = self.global.read(addr, bytes);
                if old == srcs[1][0] {
                    self.global.write(addr, bytes, srcs[2][0]);
                }
                Some(vec![old])
            }
            Intrinsic::Ballot => Some(vec![srcs[0][0] & 1]),
            Intrinsic::Elect => Some(vec![1]),
            Intrinsic::Reduce
            | Intrinsic::WorkgroupScanInclusiveAdd
            | Intrinsic::WorkgroupBroadcast => Some(srcs[0].clone()),
            Intrinsic::ExportAmd => {
                self.exports.push(Export {
                    base: idx.base,
                    write_mask: idx.write_mask,
                    flags: idx.flags,
                    values: srcs[0].clone(),
                });
                None
            }
            Intrinsic::SendMsgAmd => {
                self.sendmsgs.push(idx.base);
                None
            }
            Intrinsic::AtomicAddGsEmitPrimCountAmd
            | Intrinsic::AtomicAddShaderInvocationCountAmd
            | Intrinsic::AtomicAddGenPrimCountAmd => {
                *self
                    .counters
                    .entry((intrin.intrinsic, idx.stream_id))
                    .or_default() += srcs[0][0];
                None
            }
            _ => {
                assert!(intrin.srcs.is_empty(), "Unhandled {}", intrin);
                Some(self.sysval(intrin))
            }
        };

        if let Some(vals) = result {
            self.def(&intrin.dst, vals);
        }
    }

    fn exec_instr(&mut self, instr: &Instr) -> Flow {
        match &instr.op {
            Op::Alu(alu) => {
                let vals = self.eval_alu(alu);
                self.def(&alu.dst, vals);
            }
            Op::Intrinsic(intrin) => self.exec_intrinsic(intrin),
            Op::Undef(undef) => {
                let ssa = undef.dst.as_ssa().unwrap();
                let vals = vec![self.undef_value; usize::from(ssa.comps())];
                self.def(&undef.dst, vals);
            }
            Op::LoadVar(load) => {
                let vals = self.vars[&load.var].clone();
                self.def(&load.dst, vals);
            }
            Op::StoreVar(store) => {
                let vals = self.src(&store.src);
                let var = self.vars.get_mut(&store.var).unwrap();
                for (c, v) in vals.iter().enumerate() {
                    if store.write_mask & (1 << c) != 0 {
                        var[c] = *v;
                    }
                }
            }
            Op::Jump(jump) => {
                return match jump.kind {
                    JumpKind::Break => Flow::Break,
                    JumpKind::Continue => Flow::Continue,
                };
            }
        }
        Flow::Normal
    }

    fn exec_body(&mut self, body: &[Node]) -> Flow {
        for node in body {
            let flow = match node {
                Node::Instr(instr) => self.exec_instr(instr),
                Node::If(nif) => {
                    if self.src1(&nif.cond) != 0 {
                        self.exec_body(&nif.then_body)
                    } else {
                        self.exec_body(&nif.else_body)
                    }
                }
                Node::Loop(nloop) => {
                    let mut iters = 0;
                    loop {
                        iters += 1;
                        assert!(iters < 1 << 20, "Runaway loop");
                        match self.exec_body(&nloop.body) {
                            Flow::Break => break,
                            Flow::Normal | Flow::Continue => (),
                        }
                    }
                    Flow::Normal
                }
            };
            match flow {
                Flow::Normal => (),
                other => return other,
            }
        }
        Flow::Normal
    }

    pub fn run(&mut self, func: &Function) {
        for (i, var) in func.vars.iter().enumerate() {
            let id = VarId(i.try_into().unwrap());
            self.vars.insert(id, vec![0; usize::from(var.comps)]);
        }
        self.exec_body(&func.body);
    }

    pub fn var(&self, id: VarId) -> &[u64] {
        &self.vars[&id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_and_shared_memory() {
        let mut s = Shader::new(ShaderStage::Compute, "interp");
        let i = s.func.create_var("i", 1, 32);
        s.func.build_at_end(|b| {
            b.store_var(i, Src::new_zero(), 0x1);
            b.push_loop();
            let iv = b.load_var(i, 1, 32);
            let done = b.uge(iv, Src::new_imm_u32(4));
            b.push_if(done);
            b.jump(JumpKind::Break);
            b.pop_if();
            let off = b.imul_imm(iv, 4);
            let v = b.iadd_imm(iv, 10);
            b.store_shared(v, off, 0);
            let next = b.iadd_imm(iv, 1);
            b.store_var(i, next, 0x1);
            b.pop_loop();
        });

        let mut interp = Interp::new();
        interp.run(&s.func);
        for k in 0..4 {
            assert_eq!(interp.shared.read_u32(k * 4), 10 + k as u32);
        }
        assert!(!interp.shared.is_written(16));
    }

    #[test]
    fn test_16bit_halves_share_a_dword() {
        let mut s = Shader::new(ShaderStage::Vertex, "halves");
        s.func.build_at_end(|b| {
            let lo = b.u2u(Src::new_imm_u32(0x1234), 16);
            let hi = b.u2u(Src::new_imm_u32(0xabcd), 16);
            b.store_shared(hi, Src::new_zero(), 2);
            b.store_shared(lo, Src::new_zero(), 0);
        });
        let mut interp = Interp::new();
        interp.run(&s.func);
        assert_eq!(interp.shared.read_u32(0), 0xabcd_1234);
    }
}
