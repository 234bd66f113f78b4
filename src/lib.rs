/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Vertex, tessellation and geometry I/O lowering
//!
//! Rewrites the abstract per-stage input/output operations of pre-fragment
//! shaders into the memory, ring and export traffic a GPU backend expects:
//! LDS and off-chip rings for tessellation, the GSVS ring and copy shader
//! for legacy geometry shaders, position and parameter exports, stream-out
//! and, for hardware without a fixed-function geometry stage, a complete
//! software geometry pipeline built from compute-style kernels.

mod util;
pub mod vtg_builder;
pub mod vtg_export;
pub mod vtg_gs_query;
pub mod vtg_hw;
#[cfg(test)]
mod vtg_interp;
pub mod vtg_io_map;
pub mod vtg_ir;
pub mod vtg_legacy_gs;
pub mod vtg_legacy_vs;
pub mod vtg_opt_copy_prop;
pub mod vtg_opt_dce;
pub mod vtg_prerast_out;
pub mod vtg_slots;
pub mod vtg_streamout;
pub mod vtg_sw_gs;
pub mod vtg_sw_gs_lib;
pub mod vtg_sw_gs_pre;
pub mod vtg_tess_io;

use crate::vtg_ir::Shader;

use log::info;
use std::env;
use std::sync::OnceLock;

#[repr(u8)]
enum DebugFlags {
    Print,
    Verbose,
}

pub struct Debug {
    flags: u32,
}

impl Debug {
    fn new() -> Debug {
        let debug_var = "VTG_DEBUG";
        let debug_str = match env::var(debug_var) {
            Ok(s) => s,
            Err(_) => {
                return Debug { flags: 0 };
            }
        };

        let mut flags = 0;
        for flag in debug_str.split(',') {
            match flag.trim() {
                "print" => flags |= 1 << DebugFlags::Print as u8,
                "verbose" => flags |= 1 << DebugFlags::Verbose as u8,
                "" => (),
                unk => eprintln!("Unknown {} flag \"{}\"", debug_var, unk),
            }
        }
        Debug { flags: flags }
    }
}

pub trait GetDebugFlags {
    fn debug_flags(&self) -> u32;

    fn print(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Print as u8) != 0
    }

    fn verbose(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Verbose as u8) != 0
    }
}

pub static DEBUG: OnceLock<Debug> = OnceLock::new();

impl GetDebugFlags for OnceLock<Debug> {
    fn debug_flags(&self) -> u32 {
        self.get_or_init(Debug::new).flags
    }
}

/// Dumps the IR after a pass when `VTG_DEBUG=print` is set
pub(crate) fn dump_after_pass(pass: &str, s: &Shader) {
    if DEBUG.print() {
        info!("{} after {}:\n{}", s.name, pass, s);
    }
}
