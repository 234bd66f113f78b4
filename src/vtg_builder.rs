/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::util::BitMask;
use crate::vtg_ir::*;

pub trait Builder {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr;

    fn push_op(&mut self, op: impl Into<Op>) -> &mut Instr {
        self.push_instr(Instr::new_boxed(op))
    }

    fn push_if_ctrl(&mut self, cond: Src, control: SelectionControl);
    fn push_else(&mut self);
    fn pop_if(&mut self);
    fn push_loop(&mut self);
    fn pop_loop(&mut self);

    fn push_if(&mut self, cond: Src) {
        self.push_if_ctrl(cond, SelectionControl::None);
    }

    fn jump(&mut self, kind: JumpKind) {
        self.push_op(OpJump { kind: kind });
    }

    fn store_var(&mut self, var: VarId, src: Src, write_mask: u8) {
        self.push_op(OpStoreVar {
            src: src,
            var: var,
            write_mask: write_mask,
        });
    }

    fn intrin_nodst(
        &mut self,
        intrinsic: Intrinsic,
        srcs: &[Src],
        idx: IntrinsicIndices,
    ) {
        let mut op = OpIntrinsic::new(intrinsic, Dst::None, srcs.to_vec());
        op.idx = idx;
        self.push_op(op);
    }

    fn store_shared(&mut self, value: Src, offset: Src, base: i32) {
        self.intrin_nodst(
            Intrinsic::StoreShared,
            &[value, offset],
            IntrinsicIndices {
                base: base,
                write_mask: comp_mask(value.comps()),
                ..Default::default()
            },
        );
    }

    fn store_buffer_amd(
        &mut self,
        value: Src,
        desc: Src,
        voffset: Src,
        soffset: Src,
        base: i32,
        access: Access,
        memory_modes: MemoryModes,
    ) {
        self.intrin_nodst(
            Intrinsic::StoreBufferAmd,
            &[value, desc, voffset, soffset, Src::new_zero()],
            IntrinsicIndices {
                base: base,
                write_mask: comp_mask(value.comps()),
                access: access,
                memory_modes: memory_modes,
                ..Default::default()
            },
        );
    }

    fn store_global(&mut self, value: Src, addr: Src, access: Access) {
        self.intrin_nodst(
            Intrinsic::StoreGlobal,
            &[value, addr],
            IntrinsicIndices {
                write_mask: comp_mask(value.comps()),
                access: access,
                ..Default::default()
            },
        );
    }

    fn export_amd(
        &mut self,
        value: Src,
        base: i32,
        write_mask: u8,
        flags: ExportFlags,
    ) {
        self.intrin_nodst(
            Intrinsic::ExportAmd,
            &[value],
            IntrinsicIndices {
                base: base,
                write_mask: write_mask,
                flags: flags,
                ..Default::default()
            },
        );
    }

    fn sendmsg_amd(&mut self, wave_id: Src, base: i32) {
        self.intrin_nodst(
            Intrinsic::SendMsgAmd,
            &[wave_id],
            IntrinsicIndices {
                base: base,
                ..Default::default()
            },
        );
    }

    fn barrier(
        &mut self,
        execution_scope: Scope,
        memory_scope: Scope,
        memory_semantics: MemorySemantics,
        memory_modes: MemoryModes,
    ) {
        self.intrin_nodst(
            Intrinsic::Barrier,
            &[],
            IntrinsicIndices {
                execution_scope: execution_scope,
                memory_scope: memory_scope,
                memory_semantics: memory_semantics,
                memory_modes: memory_modes,
                ..Default::default()
            },
        );
    }
}

pub fn comp_mask(comps: u8) -> u8 {
    ((1_u32 << comps) - 1) as u8
}

fn fold_u32(op: AluOp, srcs: &[Src]) -> Option<u32> {
    let mut c = [0_u32; 2];
    if srcs.len() != 2 {
        return None;
    }
    for (i, src) in srcs.iter().enumerate() {
        match src {
            Src::Imm32(u) => c[i] = *u,
            _ => return None,
        }
    }
    let [x, y] = c;
    match op {
        AluOp::IAdd => Some(x.wrapping_add(y)),
        AluOp::ISub => Some(x.wrapping_sub(y)),
        AluOp::IMul => Some(x.wrapping_mul(y)),
        AluOp::IShl => Some(x.wrapping_shl(y & 31)),
        AluOp::UShr => Some(x.wrapping_shr(y & 31)),
        AluOp::IAnd => Some(x & y),
        AluOp::IOr => Some(x | y),
        AluOp::UMin => Some(x.min(y)),
        AluOp::UMax => Some(x.max(y)),
        AluOp::UDiv if y != 0 => Some(x / y),
        AluOp::UMod if y != 0 => Some(x % y),
        _ => None,
    }
}

fn alu_bit_size(srcs: &[Src]) -> u8 {
    srcs.iter()
        .find_map(|s| s.as_ssa().map(|ssa| ssa.bit_size()))
        .unwrap_or_else(|| srcs[0].bit_size())
}

pub trait SSABuilder: Builder {
    fn alloc_ssa(&mut self, comps: u8, bit_size: u8) -> SSAValue;

    fn alu_to(&mut self, dst: SSAValue, op: AluOp, srcs: &[Src], nuw: bool) {
        if let Some(n) = op.num_srcs() {
            assert!(srcs.len() == n, "{} takes {} sources", op, n);
        }
        self.push_op(OpAlu {
            dst: dst.into(),
            op: op,
            srcs: srcs.to_vec(),
            nuw: nuw,
        });
    }

    fn alu_sized(
        &mut self,
        op: AluOp,
        comps: u8,
        bit_size: u8,
        srcs: &[Src],
    ) -> Src {
        if bit_size == 32 && comps == 1 {
            if let Some(u) = fold_u32(op, srcs) {
                return Src::Imm32(u);
            }
        }
        let dst = self.alloc_ssa(comps, bit_size);
        self.alu_to(dst, op, srcs, false);
        dst.into()
    }

    fn alu2(&mut self, op: AluOp, x: Src, y: Src) -> Src {
        let bits = alu_bit_size(&[x, y]);
        self.alu_sized(op, 1, bits, &[x, y])
    }

    fn cmp(&mut self, op: AluOp, x: Src, y: Src) -> Src {
        assert!(op.is_comparison());
        self.alu_sized(op, 1, 1, &[x, y])
    }

    fn mov(&mut self, src: Src) -> Src {
        self.alu_sized(AluOp::Mov, src.comps(), src.bit_size(), &[src])
    }

    /// Redefines the destination of a replaced instruction as `src`
    fn copy_to(&mut self, dst: SSAValue, src: Src) {
        assert!(dst.comps() == src.comps());
        assert!(dst.bit_size() == src.bit_size());
        self.alu_to(dst, AluOp::Mov, &[src], false);
    }

    /// Builds a vector from scalars, which must all share a bit size
    fn vec(&mut self, srcs: &[Src]) -> Src {
        assert!(!srcs.is_empty() && srcs.len() <= 4);
        if srcs.len() == 1 {
            return srcs[0];
        }
        let bits = alu_bit_size(srcs);
        let comps = srcs.len().try_into().unwrap();
        self.alu_sized(AluOp::Vec, comps, bits, srcs)
    }

    fn channel(&mut self, src: Src, c: u8) -> Src {
        if src.comps() == 1 {
            assert!(c == 0);
            return src;
        }
        assert!(c < src.comps());
        self.alu_sized(AluOp::Channel(c), 1, src.bit_size(), &[src])
    }

    /// Extracts the components selected by `mask` into a packed vector
    fn channels(&mut self, src: Src, mask: u8) -> Src {
        let mut comps = Vec::new();
        for c in 0..src.comps() {
            if mask & (1 << c) != 0 {
                comps.push(self.channel(src, c));
            }
        }
        self.vec(&comps)
    }

    fn pad_vec4(&mut self, src: Src) -> Src {
        if src.comps() == 4 {
            return src;
        }
        let mut comps = Vec::new();
        for c in 0..4 {
            if c < src.comps() {
                comps.push(self.channel(src, c));
            } else {
                comps.push(self.undef(1, src.bit_size()));
            }
        }
        self.vec(&comps)
    }

    fn undef(&mut self, comps: u8, bit_size: u8) -> Src {
        let dst = self.alloc_ssa(comps, bit_size);
        self.push_op(OpUndef { dst: dst.into() });
        dst.into()
    }

    fn iadd(&mut self, x: Src, y: Src) -> Src {
        if y.is_zero() {
            return x;
        }
        if x.is_zero() {
            return y;
        }
        self.alu2(AluOp::IAdd, x, y)
    }

    /// An add known not to overflow
    fn iadd_nuw(&mut self, x: Src, y: Src) -> Src {
        if y.is_zero() {
            return x;
        }
        if x.is_zero() {
            return y;
        }
        if let Some(u) = fold_u32(AluOp::IAdd, &[x, y]) {
            return Src::Imm32(u);
        }
        let dst = self.alloc_ssa(1, alu_bit_size(&[x, y]));
        self.alu_to(dst, AluOp::IAdd, &[x, y], true);
        dst.into()
    }

    fn iadd_imm(&mut self, x: Src, y: u32) -> Src {
        self.iadd(x, Src::new_imm_u32(y))
    }

    fn isub(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::ISub, x, y)
    }

    fn imul(&mut self, x: Src, y: Src) -> Src {
        if x.is_zero() || y.is_zero() {
            return Src::new_zero();
        }
        if y.as_uint() == Some(1) {
            return x;
        }
        if x.as_uint() == Some(1) {
            return y;
        }
        self.alu2(AluOp::IMul, x, y)
    }

    fn imul_imm(&mut self, x: Src, y: u32) -> Src {
        self.imul(x, Src::new_imm_u32(y))
    }

    fn udiv(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::UDiv, x, y)
    }

    fn umod(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::UMod, x, y)
    }

    fn ishl(&mut self, x: Src, y: Src) -> Src {
        if y.is_zero() {
            return x;
        }
        self.alu2(AluOp::IShl, x, y)
    }

    fn ishl_imm(&mut self, x: Src, y: u32) -> Src {
        self.ishl(x, Src::new_imm_u32(y))
    }

    fn ushr(&mut self, x: Src, y: Src) -> Src {
        if y.is_zero() {
            return x;
        }
        self.alu2(AluOp::UShr, x, y)
    }

    fn ushr_imm(&mut self, x: Src, y: u32) -> Src {
        self.ushr(x, Src::new_imm_u32(y))
    }

    fn iand(&mut self, x: Src, y: Src) -> Src {
        match (x.bit_size(), x, y) {
            (1, _, Src::True) => x,
            (1, Src::True, _) => y,
            _ => self.alu2(AluOp::IAnd, x, y),
        }
    }

    fn iand_imm(&mut self, x: Src, y: u32) -> Src {
        self.iand(x, Src::new_imm_u32(y))
    }

    fn ior(&mut self, x: Src, y: Src) -> Src {
        if y.is_zero() && y.bit_size() != 1 {
            return x;
        }
        self.alu2(AluOp::IOr, x, y)
    }

    fn ixor(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::IXor, x, y)
    }

    fn inot(&mut self, x: Src) -> Src {
        match x {
            Src::True => Src::False,
            Src::False => Src::True,
            _ => self.alu_sized(AluOp::INot, 1, x.bit_size(), &[x]),
        }
    }

    fn umin(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::UMin, x, y)
    }

    fn umax(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::UMax, x, y)
    }

    fn imin(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::IMin, x, y)
    }

    fn imax(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::IMax, x, y)
    }

    fn usub_sat(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::USubSat, x, y)
    }

    fn ieq(&mut self, x: Src, y: Src) -> Src {
        self.cmp(AluOp::IEq, x, y)
    }

    fn ieq_imm(&mut self, x: Src, y: u32) -> Src {
        self.cmp(AluOp::IEq, x, Src::new_imm_u32(y))
    }

    fn ine(&mut self, x: Src, y: Src) -> Src {
        self.cmp(AluOp::INe, x, y)
    }

    fn ult(&mut self, x: Src, y: Src) -> Src {
        self.cmp(AluOp::ULt, x, y)
    }

    fn uge(&mut self, x: Src, y: Src) -> Src {
        self.cmp(AluOp::UGe, x, y)
    }

    fn ilt(&mut self, x: Src, y: Src) -> Src {
        self.cmp(AluOp::ILt, x, y)
    }

    fn ige(&mut self, x: Src, y: Src) -> Src {
        self.cmp(AluOp::IGe, x, y)
    }

    fn fneu(&mut self, x: Src, y: Src) -> Src {
        self.cmp(AluOp::FNeu, x, y)
    }

    fn fadd(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::FAdd, x, y)
    }

    fn fmul(&mut self, x: Src, y: Src) -> Src {
        self.alu2(AluOp::FMul, x, y)
    }

    fn fdot4(&mut self, x: Src, y: Src) -> Src {
        assert!(x.comps() == 4 && y.comps() == 4);
        self.alu_sized(AluOp::FDot4, 1, 32, &[x, y])
    }

    fn fsat(&mut self, x: Src) -> Src {
        self.alu_sized(AluOp::FSat, x.comps(), x.bit_size(), &[x])
    }

    fn bcsel(&mut self, cond: Src, x: Src, y: Src) -> Src {
        match cond {
            Src::True => x,
            Src::False => y,
            _ => {
                assert!(cond.bit_size() == 1);
                let comps = x.comps().max(y.comps());
                let bits = alu_bit_size(&[x, y]);
                self.alu_sized(AluOp::BCsel, comps, bits, &[cond, x, y])
            }
        }
    }

    fn u2u(&mut self, x: Src, bit_size: u8) -> Src {
        if x.bit_size() == bit_size {
            return x;
        }
        self.alu_sized(AluOp::U2U, x.comps(), bit_size, &[x])
    }

    fn u2u32(&mut self, x: Src) -> Src {
        self.u2u(x, 32)
    }

    fn u2u64(&mut self, x: Src) -> Src {
        self.u2u(x, 64)
    }

    fn i2i(&mut self, x: Src, bit_size: u8) -> Src {
        if x.bit_size() == bit_size {
            return x;
        }
        self.alu_sized(AluOp::I2I, x.comps(), bit_size, &[x])
    }

    fn f2f(&mut self, x: Src, bit_size: u8) -> Src {
        if x.bit_size() == bit_size {
            return x;
        }
        self.alu_sized(AluOp::F2F, x.comps(), bit_size, &[x])
    }

    /// Converts a value of declared type `ty` to `bit_size` bits
    fn convert_to_bit_size(
        &mut self,
        x: Src,
        ty: AluType,
        bit_size: u8,
    ) -> Src {
        match ty.base {
            BaseType::Int => self.i2i(x, bit_size),
            BaseType::Float => self.f2f(x, bit_size),
            BaseType::Uint | BaseType::Bool => self.u2u(x, bit_size),
        }
    }

    fn b2i32(&mut self, x: Src) -> Src {
        match x {
            Src::True => Src::new_imm_u32(1),
            Src::False => Src::new_zero(),
            _ => self.alu_sized(AluOp::B2I, 1, 32, &[x]),
        }
    }

    fn pack_32_2x16_split(&mut self, lo: Src, hi: Src) -> Src {
        assert!(lo.bit_size() == 16 && hi.bit_size() == 16);
        self.alu_sized(AluOp::Pack32_2x16Split, 1, 32, &[lo, hi])
    }

    fn unpack_32_2x16_split_x(&mut self, x: Src) -> Src {
        self.alu_sized(AluOp::Unpack32_2x16SplitX, 1, 16, &[x])
    }

    fn unpack_32_2x16_split_y(&mut self, x: Src) -> Src {
        self.alu_sized(AluOp::Unpack32_2x16SplitY, 1, 16, &[x])
    }

    fn ubfe_imm(&mut self, x: Src, offset: u32, bits: u32) -> Src {
        let srcs = [x, Src::new_imm_u32(offset), Src::new_imm_u32(bits)];
        self.alu_sized(AluOp::Ubfe, 1, 32, &srcs)
    }

    fn bit_count(&mut self, x: Src) -> Src {
        self.alu_sized(AluOp::BitCount, 1, 32, &[x])
    }

    /// Stores the `write_mask` channels of `value` to the variable,
    /// starting at `component`
    fn store_var_components(
        &mut self,
        var: VarId,
        value: Src,
        component: u8,
        write_mask: u8,
    ) {
        let undef = self.undef(1, value.bit_size());
        let mut comps = [undef; 4];
        for i in write_mask.iter_set_bits() {
            comps[usize::from(component) + i as usize] =
                self.channel(value, i as u8);
        }
        let vec = self.vec(&comps);
        self.store_var(var, vec, write_mask << component);
    }

    fn load_var(&mut self, var: VarId, comps: u8, bit_size: u8) -> Src {
        let dst = self.alloc_ssa(comps, bit_size);
        self.push_op(OpLoadVar {
            dst: dst.into(),
            var: var,
        });
        dst.into()
    }

    fn intrin(
        &mut self,
        intrinsic: Intrinsic,
        comps: u8,
        bit_size: u8,
        srcs: &[Src],
        idx: IntrinsicIndices,
    ) -> Src {
        let dst = self.alloc_ssa(comps, bit_size);
        let mut op = OpIntrinsic::new(intrinsic, dst.into(), srcs.to_vec());
        op.idx = idx;
        self.push_op(op);
        dst.into()
    }

    /// Loads a scalar 32-bit system value or driver argument
    fn sysval(&mut self, intrinsic: Intrinsic) -> Src {
        self.intrin(intrinsic, 1, 32, &[], Default::default())
    }

    fn sysval_sized(
        &mut self,
        intrinsic: Intrinsic,
        comps: u8,
        bit_size: u8,
    ) -> Src {
        self.intrin(intrinsic, comps, bit_size, &[], Default::default())
    }

    fn sysval_base(&mut self, intrinsic: Intrinsic, base: i32) -> Src {
        let idx = IntrinsicIndices {
            base: base,
            ..Default::default()
        };
        self.intrin(intrinsic, 1, 32, &[], idx)
    }

    fn load_shared(
        &mut self,
        comps: u8,
        bit_size: u8,
        offset: Src,
        base: i32,
    ) -> Src {
        let idx = IntrinsicIndices {
            base: base,
            ..Default::default()
        };
        self.intrin(Intrinsic::LoadShared, comps, bit_size, &[offset], idx)
    }

    fn load_buffer_amd(
        &mut self,
        comps: u8,
        bit_size: u8,
        desc: Src,
        voffset: Src,
        soffset: Src,
        base: i32,
        access: Access,
    ) -> Src {
        let idx = IntrinsicIndices {
            base: base,
            access: access,
            ..Default::default()
        };
        let srcs = [desc, voffset, soffset, Src::new_zero()];
        self.intrin(Intrinsic::LoadBufferAmd, comps, bit_size, &srcs, idx)
    }

    fn load_global(&mut self, comps: u8, bit_size: u8, addr: Src) -> Src {
        self.intrin(
            Intrinsic::LoadGlobal,
            comps,
            bit_size,
            &[addr],
            Default::default(),
        )
    }

    fn load_global_constant(
        &mut self,
        comps: u8,
        bit_size: u8,
        addr: Src,
    ) -> Src {
        self.intrin(
            Intrinsic::LoadGlobalConstant,
            comps,
            bit_size,
            &[addr],
            Default::default(),
        )
    }

    fn global_atomic_add(&mut self, addr: Src, data: Src) -> Src {
        let idx = IntrinsicIndices {
            atomic_op: AtomicOp::IAdd,
            ..Default::default()
        };
        let bits = data.bit_size();
        self.intrin(Intrinsic::GlobalAtomic, 1, bits, &[addr, data], idx)
    }

    /// Computes `base + offset` for a 64-bit address and a 32-bit offset
    fn iadd_addr(&mut self, base: Src, offset: Src) -> Src {
        let offset = self.u2u64(offset);
        self.iadd(base, offset)
    }
}

enum Frame {
    Block(Vec<Node>),
    Then {
        cond: Src,
        control: SelectionControl,
        then_body: Vec<Node>,
    },
    Else {
        cond: Src,
        control: SelectionControl,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    Loop(Vec<Node>),
}

pub struct InstrBuilder {
    frames: Vec<Frame>,
}

impl InstrBuilder {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::Block(Vec::new())],
        }
    }

    fn cur_body(&mut self) -> &mut Vec<Node> {
        match self.frames.last_mut() {
            Some(Frame::Block(v)) | Some(Frame::Loop(v)) => v,
            Some(Frame::Then { then_body, .. }) => then_body,
            Some(Frame::Else { else_body, .. }) => else_body,
            None => panic!("Builder has no open block"),
        }
    }

    pub fn push_node(&mut self, node: Node) {
        self.cur_body().push(node);
    }

    pub fn as_nodes(mut self) -> Vec<Node> {
        assert!(self.frames.len() == 1, "Unterminated control flow");
        match self.frames.pop() {
            Some(Frame::Block(v)) => v,
            _ => panic!("Unterminated control flow"),
        }
    }

    pub fn as_mapped_instrs(self) -> MappedInstrs {
        let mut mapped = MappedInstrs::None;
        for node in self.as_nodes() {
            mapped.push(node);
        }
        mapped
    }
}

impl Builder for InstrBuilder {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr {
        let body = self.cur_body();
        body.push(Node::Instr(instr));
        match body.last_mut() {
            Some(Node::Instr(i)) => i.as_mut(),
            _ => unreachable!(),
        }
    }

    fn push_if_ctrl(&mut self, cond: Src, control: SelectionControl) {
        assert!(cond.bit_size() == 1);
        self.frames.push(Frame::Then {
            cond: cond,
            control: control,
            then_body: Vec::new(),
        });
    }

    fn push_else(&mut self) {
        match self.frames.pop() {
            Some(Frame::Then {
                cond,
                control,
                then_body,
            }) => self.frames.push(Frame::Else {
                cond: cond,
                control: control,
                then_body: then_body,
                else_body: Vec::new(),
            }),
            _ => panic!("push_else() without push_if()"),
        }
    }

    fn pop_if(&mut self) {
        let nif = match self.frames.pop() {
            Some(Frame::Then {
                cond,
                control,
                then_body,
            }) => IfNode {
                cond: cond,
                control: control,
                then_body: then_body,
                else_body: Vec::new(),
            },
            Some(Frame::Else {
                cond,
                control,
                then_body,
                else_body,
            }) => IfNode {
                cond: cond,
                control: control,
                then_body: then_body,
                else_body: else_body,
            },
            _ => panic!("pop_if() without push_if()"),
        };
        self.push_node(Node::If(Box::new(nif)));
    }

    fn push_loop(&mut self) {
        self.frames.push(Frame::Loop(Vec::new()));
    }

    fn pop_loop(&mut self) {
        match self.frames.pop() {
            Some(Frame::Loop(body)) => {
                self.push_node(Node::Loop(Box::new(LoopNode { body: body })))
            }
            _ => panic!("pop_loop() without push_loop()"),
        }
    }
}

pub struct SSAInstrBuilder<'a> {
    b: InstrBuilder,
    alloc: &'a mut SSAValueAllocator,
}

impl<'a> SSAInstrBuilder<'a> {
    pub fn new(alloc: &'a mut SSAValueAllocator) -> Self {
        Self {
            b: InstrBuilder::new(),
            alloc: alloc,
        }
    }

    pub fn push_node(&mut self, node: Node) {
        self.b.push_node(node);
    }

    pub fn as_nodes(self) -> Vec<Node> {
        self.b.as_nodes()
    }

    pub fn as_mapped_instrs(self) -> MappedInstrs {
        self.b.as_mapped_instrs()
    }
}

impl<'a> Builder for SSAInstrBuilder<'a> {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr {
        self.b.push_instr(instr)
    }

    fn push_if_ctrl(&mut self, cond: Src, control: SelectionControl) {
        self.b.push_if_ctrl(cond, control);
    }

    fn push_else(&mut self) {
        self.b.push_else();
    }

    fn pop_if(&mut self) {
        self.b.pop_if();
    }

    fn push_loop(&mut self) {
        self.b.push_loop();
    }

    fn pop_loop(&mut self) {
        self.b.pop_loop();
    }
}

impl<'a> SSABuilder for SSAInstrBuilder<'a> {
    fn alloc_ssa(&mut self, comps: u8, bit_size: u8) -> SSAValue {
        self.alloc.alloc(comps, bit_size)
    }
}
