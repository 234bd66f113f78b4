/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::vtg_ir::*;

use std::collections::HashSet;

struct DeadCodePass {
    any_dead: bool,
    new_live: bool,
    live_ssa: HashSet<SSAValue>,
    live_var: HashSet<VarId>,
}

impl DeadCodePass {
    pub fn new() -> DeadCodePass {
        DeadCodePass {
            any_dead: false,
            new_live: false,
            live_ssa: HashSet::new(),
            live_var: HashSet::new(),
        }
    }

    fn mark_ssa_live(&mut self, ssa: &SSAValue) {
        self.new_live |= self.live_ssa.insert(*ssa);
    }

    fn mark_src_live(&mut self, src: &Src) {
        for ssa in src.iter_ssa() {
            self.mark_ssa_live(ssa);
        }
    }

    fn is_dst_live(&self, dst: &Dst) -> bool {
        match dst {
            Dst::SSA(ssa) => self.live_ssa.contains(ssa),
            Dst::None => false,
        }
    }

    fn is_instr_live(&self, instr: &Instr) -> bool {
        if let Op::StoreVar(store) = &instr.op {
            return self.live_var.contains(&store.var);
        }

        if !instr.can_eliminate() {
            return true;
        }

        for dst in instr.dsts() {
            if self.is_dst_live(dst) {
                return true;
            }
        }

        false
    }

    fn mark_instr(&mut self, instr: &Instr) {
        if self.is_instr_live(instr) {
            if let Op::LoadVar(load) = &instr.op {
                self.new_live |= self.live_var.insert(load.var);
            }
            for src in instr.srcs() {
                self.mark_src_live(src);
            }
        } else {
            self.any_dead = true;
        }
    }

    fn mark_body(&mut self, body: &[Node]) {
        for node in body.iter().rev() {
            match node {
                Node::Instr(instr) => self.mark_instr(instr),
                Node::If(nif) => {
                    self.mark_src_live(&nif.cond);
                    self.mark_body(&nif.then_body);
                    self.mark_body(&nif.else_body);
                }
                Node::Loop(nloop) => self.mark_body(&nloop.body),
            }
        }
    }

    pub fn run(&mut self, f: &mut Function) {
        loop {
            self.new_live = false;
            self.any_dead = false;

            self.mark_body(&f.body);

            if !self.new_live {
                break;
            }
        }

        if self.any_dead {
            f.map_instrs(|instr, _| {
                if self.is_instr_live(&instr) {
                    MappedInstrs::One(instr)
                } else {
                    MappedInstrs::None
                }
            });
        }
    }
}

fn is_break(node: &Node) -> bool {
    match node {
        Node::Instr(instr) => matches!(
            instr.op,
            Op::Jump(OpJump {
                kind: JumpKind::Break
            })
        ),
        _ => false,
    }
}

fn opt_dead_cf_body(body: &mut Vec<Node>) -> bool {
    let mut progress = false;
    body.retain_mut(|node| match node {
        Node::Instr(_) => true,
        Node::If(nif) => {
            progress |= opt_dead_cf_body(&mut nif.then_body);
            progress |= opt_dead_cf_body(&mut nif.else_body);
            if nif.then_body.is_empty() && nif.else_body.is_empty() {
                progress = true;
                false
            } else {
                true
            }
        }
        Node::Loop(nloop) => {
            progress |= opt_dead_cf_body(&mut nloop.body);
            if nloop.body.first().map_or(true, is_break) {
                progress = true;
                false
            } else {
                true
            }
        }
    });
    progress
}

impl Shader {
    pub fn opt_dce(&mut self) {
        DeadCodePass::new().run(&mut self.func);
    }

    /// Removes ifs with empty branches and loops that exit immediately
    pub fn opt_dead_cf(&mut self) -> bool {
        opt_dead_cf_body(&mut self.func.body)
    }
}
