/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::vtg_ir::*;

use std::collections::HashMap;

struct CopyPropPass {
    ssa_map: HashMap<SSAValue, Vec<Src>>,
}

impl CopyPropPass {
    pub fn new() -> CopyPropPass {
        CopyPropPass {
            ssa_map: HashMap::new(),
        }
    }

    fn add_copy(&mut self, dst: &SSAValue, src_vec: Vec<Src>) {
        self.ssa_map.insert(*dst, src_vec);
    }

    fn get_copy(&self, dst: &SSAValue) -> Option<&Vec<Src>> {
        self.ssa_map.get(dst)
    }

    fn prop_src(&self, src: &mut Src) {
        if let Src::SSA(src_ssa) = src {
            if let Some(src_vec) = self.get_copy(src_ssa) {
                if src_vec.len() == 1 && src_vec[0].comps() == src_ssa.comps()
                {
                    *src = src_vec[0];
                }
            }
        }
    }

    fn record_instr(&mut self, instr: &Instr) {
        let Op::Alu(alu) = &instr.op else {
            return;
        };
        let Dst::SSA(dst) = &alu.dst else {
            return;
        };
        match alu.op {
            AluOp::Vec => {
                self.add_copy(dst, alu.srcs.clone());
            }
            AluOp::Mov => {
                let src = alu.srcs[0];
                let copy = match src.as_ssa().and_then(|s| self.get_copy(s)) {
                    Some(src_vec) => src_vec.clone(),
                    None => vec![src],
                };
                self.add_copy(dst, copy);
            }
            AluOp::Channel(c) => {
                if let Some(src_ssa) = alu.srcs[0].as_ssa() {
                    if let Some(src_vec) = self.get_copy(src_ssa) {
                        if src_vec.len() > 1 {
                            let comp = src_vec[usize::from(c)];
                            self.add_copy(dst, vec![comp]);
                        }
                    }
                }
            }
            _ => (),
        }
    }

    fn run_body(&mut self, body: &mut [Node]) {
        for node in body {
            match node {
                Node::Instr(instr) => {
                    for src in instr.srcs_mut() {
                        self.prop_src(src);
                    }
                    self.record_instr(instr);
                }
                Node::If(nif) => {
                    self.prop_src(&mut nif.cond);
                    self.run_body(&mut nif.then_body);
                    self.run_body(&mut nif.else_body);
                }
                Node::Loop(nloop) => self.run_body(&mut nloop.body),
            }
        }
    }

    pub fn run(&mut self, f: &mut Function) {
        self.run_body(&mut f.body);
    }
}

impl Shader {
    pub fn opt_copy_prop(&mut self) {
        CopyPropPass::new().run(&mut self.func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_of_vec() {
        let mut s = Shader::new(ShaderStage::Vertex, "copy_prop");
        s.func.build_at_end(|b| {
            let id = b.sysval(Intrinsic::LoadVertexId);
            let inst = b.sysval(Intrinsic::LoadInstanceId);
            let v = b.vec(&[id, inst]);
            let y = b.channel(v, 1);
            let y = b.mov(y);
            b.store_shared(y, Src::new_zero(), 0);
        });
        s.opt_copy_prop();
        s.opt_dce();

        let stores = s.intrinsics(Intrinsic::StoreShared);
        assert_eq!(stores.len(), 1);
        let inst = s.intrinsics(Intrinsic::LoadInstanceId)[0].dst;
        assert_eq!(stores[0].srcs[0].as_ssa(), inst.as_ssa());
    }
}
