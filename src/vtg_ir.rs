/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

pub use crate::vtg_builder::*;
pub use crate::vtg_slots::*;

use bitflags::bitflags;
use vtg_ir_proc::*;

use std::fmt;
use std::slice;

/// An SSA value
///
/// Unlike a register-level IR, an SSA value here is a whole NIR-style
/// definition: it has a component count between 1 and 4 and a bit size of
/// 1, 8, 16, 32 or 64.  Index 0 is reserved and never handed out by the
/// allocator so it can be used as a sentinel.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SSAValue {
    idx: u32,
    comps: u8,
    bit_size: u8,
}

impl SSAValue {
    pub fn new(idx: u32, comps: u8, bit_size: u8) -> SSAValue {
        assert!(idx > 0);
        assert!(comps > 0 && comps <= 4);
        assert!(matches!(bit_size, 1 | 8 | 16 | 32 | 64));
        SSAValue {
            idx: idx,
            comps: comps,
            bit_size: bit_size,
        }
    }

    pub fn idx(&self) -> u32 {
        self.idx
    }

    pub fn comps(&self) -> u8 {
        self.comps
    }

    pub fn bit_size(&self) -> u8 {
        self.bit_size
    }
}

impl fmt::Display for SSAValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.idx)
    }
}

#[derive(Clone)]
pub struct SSAValueAllocator {
    count: u32,
}

impl SSAValueAllocator {
    pub fn new() -> SSAValueAllocator {
        SSAValueAllocator { count: 0 }
    }

    pub fn alloc(&mut self, comps: u8, bit_size: u8) -> SSAValue {
        self.count += 1;
        SSAValue::new(self.count, comps, bit_size)
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Src {
    SSA(SSAValue),
    Imm16(u16),
    Imm32(u32),
    Imm64(u64),
    True,
    False,
}

impl Src {
    pub fn new_zero() -> Src {
        Src::Imm32(0)
    }

    pub fn new_imm_u32(u: u32) -> Src {
        Src::Imm32(u)
    }

    pub fn new_imm_f32(f: f32) -> Src {
        Src::Imm32(f.to_bits())
    }

    pub fn new_imm_u16(u: u16) -> Src {
        Src::Imm16(u)
    }

    pub fn new_imm_u64(u: u64) -> Src {
        Src::Imm64(u)
    }

    pub fn as_ssa(&self) -> Option<&SSAValue> {
        match self {
            Src::SSA(ssa) => Some(ssa),
            _ => None,
        }
    }

    /// Returns the constant value of this source, if it has one
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Src::SSA(_) => None,
            Src::Imm16(u) => Some((*u).into()),
            Src::Imm32(u) => Some((*u).into()),
            Src::Imm64(u) => Some(*u),
            Src::True => Some(1),
            Src::False => Some(0),
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_uint().map(|u| u as u32)
    }

    pub fn is_const(&self) -> bool {
        !matches!(self, Src::SSA(_))
    }

    pub fn is_zero(&self) -> bool {
        self.as_uint() == Some(0)
    }

    pub fn comps(&self) -> u8 {
        match self {
            Src::SSA(ssa) => ssa.comps(),
            _ => 1,
        }
    }

    pub fn bit_size(&self) -> u8 {
        match self {
            Src::SSA(ssa) => ssa.bit_size(),
            Src::Imm16(_) => 16,
            Src::Imm32(_) => 32,
            Src::Imm64(_) => 64,
            Src::True | Src::False => 1,
        }
    }

    pub fn iter_ssa(&self) -> slice::Iter<'_, SSAValue> {
        match self {
            Src::SSA(ssa) => slice::from_ref(ssa),
            _ => &[],
        }
        .iter()
    }
}

impl From<SSAValue> for Src {
    fn from(ssa: SSAValue) -> Src {
        Src::SSA(ssa)
    }
}

impl fmt::Display for Src {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Src::SSA(ssa) => write!(f, "{}", ssa),
            Src::Imm16(u) => write!(f, "{:#x}s", u),
            Src::Imm32(u) => write!(f, "{:#x}", u),
            Src::Imm64(u) => write!(f, "{:#x}l", u),
            Src::True => write!(f, "true"),
            Src::False => write!(f, "false"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Dst {
    None,
    SSA(SSAValue),
}

impl Dst {
    pub fn as_ssa(&self) -> Option<&SSAValue> {
        match self {
            Dst::None => None,
            Dst::SSA(ssa) => Some(ssa),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Dst::None)
    }
}

impl From<SSAValue> for Dst {
    fn from(ssa: SSAValue) -> Dst {
        Dst::SSA(ssa)
    }
}

impl fmt::Display for Dst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dst::None => write!(f, "null"),
            Dst::SSA(ssa) => write!(f, "{}", ssa),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BaseType {
    Int,
    #[default]
    Uint,
    Float,
    Bool,
}

/// The declared type of a stored value, tracked next to the value so that
/// narrow outputs can be widened correctly later
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AluType {
    pub base: BaseType,
    pub bit_size: u8,
}

impl AluType {
    pub const UINT16: AluType = AluType::new(BaseType::Uint, 16);
    pub const UINT32: AluType = AluType::new(BaseType::Uint, 32);
    pub const INT16: AluType = AluType::new(BaseType::Int, 16);
    pub const INT32: AluType = AluType::new(BaseType::Int, 32);
    pub const FLOAT16: AluType = AluType::new(BaseType::Float, 16);
    pub const FLOAT32: AluType = AluType::new(BaseType::Float, 32);

    pub const fn new(base: BaseType, bit_size: u8) -> AluType {
        AluType {
            base: base,
            bit_size: bit_size,
        }
    }
}

impl Default for AluType {
    fn default() -> AluType {
        AluType::UINT32
    }
}

impl fmt::Display for AluType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.base {
            BaseType::Int => "i",
            BaseType::Uint => "u",
            BaseType::Float => "f",
            BaseType::Bool => "b",
        };
        write!(f, "{}{}", prefix, self.bit_size)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AluOp {
    Mov,
    Vec,
    Channel(u8),
    #[default]
    IAdd,
    ISub,
    IMul,
    UDiv,
    UMod,
    IShl,
    UShr,
    IAnd,
    IOr,
    IXor,
    INot,
    UMin,
    UMax,
    IMin,
    IMax,
    USubSat,
    IEq,
    INe,
    ULt,
    UGe,
    ILt,
    IGe,
    FEq,
    FNeu,
    FAdd,
    FMul,
    FDot4,
    FSat,
    BCsel,
    U2U,
    I2I,
    F2F,
    B2I,
    Pack32_2x16Split,
    Unpack32_2x16SplitX,
    Unpack32_2x16SplitY,
    Ubfe,
    BitCount,
}

impl AluOp {
    pub fn num_srcs(&self) -> Option<usize> {
        match self {
            AluOp::Vec => None,
            AluOp::Mov
            | AluOp::Channel(_)
            | AluOp::INot
            | AluOp::FSat
            | AluOp::U2U
            | AluOp::I2I
            | AluOp::F2F
            | AluOp::B2I
            | AluOp::Unpack32_2x16SplitX
            | AluOp::Unpack32_2x16SplitY
            | AluOp::BitCount => Some(1),
            AluOp::BCsel | AluOp::Ubfe => Some(3),
            _ => Some(2),
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            AluOp::IEq
                | AluOp::INe
                | AluOp::ULt
                | AluOp::UGe
                | AluOp::ILt
                | AluOp::IGe
                | AluOp::FEq
                | AluOp::FNeu
        )
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AluOp::Mov => write!(f, "mov"),
            AluOp::Vec => write!(f, "vec"),
            AluOp::Channel(c) => write!(f, "channel.{}", c),
            AluOp::IAdd => write!(f, "iadd"),
            AluOp::ISub => write!(f, "isub"),
            AluOp::IMul => write!(f, "imul"),
            AluOp::UDiv => write!(f, "udiv"),
            AluOp::UMod => write!(f, "umod"),
            AluOp::IShl => write!(f, "ishl"),
            AluOp::UShr => write!(f, "ushr"),
            AluOp::IAnd => write!(f, "iand"),
            AluOp::IOr => write!(f, "ior"),
            AluOp::IXor => write!(f, "ixor"),
            AluOp::INot => write!(f, "inot"),
            AluOp::UMin => write!(f, "umin"),
            AluOp::UMax => write!(f, "umax"),
            AluOp::IMin => write!(f, "imin"),
            AluOp::IMax => write!(f, "imax"),
            AluOp::USubSat => write!(f, "usub_sat"),
            AluOp::IEq => write!(f, "ieq"),
            AluOp::INe => write!(f, "ine"),
            AluOp::ULt => write!(f, "ult"),
            AluOp::UGe => write!(f, "uge"),
            AluOp::ILt => write!(f, "ilt"),
            AluOp::IGe => write!(f, "ige"),
            AluOp::FEq => write!(f, "feq"),
            AluOp::FNeu => write!(f, "fneu"),
            AluOp::FAdd => write!(f, "fadd"),
            AluOp::FMul => write!(f, "fmul"),
            AluOp::FDot4 => write!(f, "fdot4"),
            AluOp::FSat => write!(f, "fsat"),
            AluOp::BCsel => write!(f, "bcsel"),
            AluOp::U2U => write!(f, "u2u"),
            AluOp::I2I => write!(f, "i2i"),
            AluOp::F2F => write!(f, "f2f"),
            AluOp::B2I => write!(f, "b2i"),
            AluOp::Pack32_2x16Split => write!(f, "pack_32_2x16_split"),
            AluOp::Unpack32_2x16SplitX => write!(f, "unpack_32_2x16_split_x"),
            AluOp::Unpack32_2x16SplitY => write!(f, "unpack_32_2x16_split_y"),
            AluOp::Ubfe => write!(f, "ubfe"),
            AluOp::BitCount => write!(f, "bit_count"),
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct Access: u16 {
        const COHERENT = 1 << 0;
        const NON_TEMPORAL = 1 << 1;
        const CAN_REORDER = 1 << 2;
        const IS_SWIZZLED_AMD = 1 << 3;
        const CP_GE_COHERENT_AMD = 1 << 4;
        /// Transform feedback store, which must stay in the pre-pass
        const XFB = 1 << 5;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct MemoryModes: u16 {
        const SHADER_IN = 1 << 0;
        const SHADER_OUT = 1 << 1;
        const MEM_SHARED = 1 << 2;
        const MEM_SSBO = 1 << 3;
        const MEM_GLOBAL = 1 << 4;
        const IMAGE = 1 << 5;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct MemorySemantics: u8 {
        const ACQUIRE = 1 << 0;
        const RELEASE = 1 << 1;
        const ACQ_REL = Self::ACQUIRE.bits() | Self::RELEASE.bits();
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct ExportFlags: u8 {
        const DONE = 1 << 0;
        const VALID_MASK = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Scope {
    #[default]
    None,
    Invocation,
    Subgroup,
    Workgroup,
    QueueFamily,
    Device,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::None => write!(f, "none"),
            Scope::Invocation => write!(f, "invocation"),
            Scope::Subgroup => write!(f, "subgroup"),
            Scope::Workgroup => write!(f, "workgroup"),
            Scope::QueueFamily => write!(f, "queue_family"),
            Scope::Device => write!(f, "device"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AtomicOp {
    #[default]
    IAdd,
    UMin,
    UMax,
    Xchg,
    CmpXchg,
}

/// Where a varying lives and how it is used
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct IoSemantics {
    pub location: u32,
    pub num_slots: u8,
    pub high_16bits: bool,
    /// The next stage never reads this output
    pub no_varying: bool,
    /// Two bits of vertex stream per component
    pub gs_streams: u8,
}

impl IoSemantics {
    pub fn new(location: u32) -> IoSemantics {
        IoSemantics {
            location: location,
            num_slots: 1,
            ..Default::default()
        }
    }

    pub fn stream(&self, comp: u8) -> u8 {
        (self.gs_streams >> (comp * 2)) & 0x3
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IntrinsicIndices {
    pub base: i32,
    pub component: u8,
    pub write_mask: u8,
    pub io_semantics: IoSemantics,
    pub src_type: AluType,
    pub stream_id: u8,
    pub access: Access,
    pub flags: ExportFlags,
    pub memory_modes: MemoryModes,
    pub execution_scope: Scope,
    pub memory_scope: Scope,
    pub memory_semantics: MemorySemantics,
    pub ucp_id: u8,
    pub reduction_op: AluOp,
    pub atomic_op: AtomicOp,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Intrinsic {
    /* Stage I/O as produced by the front-end.  Source layouts:
     *
     *    load_input                  (offset)
     *    load_per_vertex_input       (vertex, offset)
     *    load_output                 (offset)
     *    load_per_vertex_output      (vertex, offset)
     *    store_output                (value, offset)
     *    store_per_vertex_output     (value, vertex, offset)
     *    emit_vertex_with_counter    (vtx_cnt, vtx_in_prim, prim_cnt, xfb_prim_cnt)
     *    end_primitive_with_counter  (vtx_cnt, vtx_in_prim, prim_cnt)
     *    set_vertex_and_primitive_count (vtx_cnt, prim_cnt, xfb_prim_cnt)
     */
    LoadInput,
    LoadPerVertexInput,
    LoadOutput,
    LoadPerVertexOutput,
    StoreOutput,
    StorePerVertexOutput,
    EmitVertex,
    EndPrimitive,
    EmitVertexWithCounter,
    EndPrimitiveWithCounter,
    SetVertexAndPrimitiveCount,
    Barrier,

    LoadInvocationId,
    LoadPrimitiveId,
    LoadInstanceId,
    LoadVertexId,
    LoadVertexIdZeroBase,
    LoadLocalInvocationIndex,
    LoadLocalInvocationId,
    LoadWorkgroupId,
    LoadGlobalInvocationId,
    LoadSubgroupInvocation,
    LoadPatchVerticesIn,
    LoadProvokingLast,
    LoadFlatMask,
    LoadInputTopology,

    /* Memory.  Source layouts:
     *
     *    load_shared          (offset)
     *    store_shared         (value, offset)
     *    load_buffer_amd      (desc, voffset, soffset, vindex)
     *    store_buffer_amd     (value, desc, voffset, soffset, vindex)
     *    load_global          (addr)
     *    store_global         (value, addr)
     *    global_atomic        (addr, data)
     *    global_atomic_swap   (addr, cmp, data)
     */
    LoadShared,
    StoreShared,
    LoadBufferAmd,
    StoreBufferAmd,
    LoadGlobal,
    LoadGlobalConstant,
    StoreGlobal,
    GlobalAtomic,
    GlobalAtomicSwap,

    Ballot,
    Elect,
    Reduce,
    WorkgroupScanInclusiveAdd,
    WorkgroupBroadcast,

    ExportAmd,
    SendMsgAmd,
    LoadRingTessOffchipAmd,
    LoadRingTessOffchipOffsetAmd,
    LoadRingTessFactorsAmd,
    LoadRingTessFactorsOffsetAmd,
    LoadRingGsvsAmd,
    LoadRingGs2vsOffsetAmd,
    LoadLshsVertexStrideAmd,
    LoadTessRelPatchIdAmd,
    LoadTcsNumPatchesAmd,
    LoadHsOutPatchDataOffsetAmd,
    LoadTcsPrimitiveModeAmd,
    LoadTcsTessLevelsToTesAmd,
    LoadStreamoutConfigAmd,
    LoadStreamoutWriteIndexAmd,
    LoadStreamoutBufferAmd,
    LoadStreamoutOffsetAmd,
    LoadUserClipPlane,
    LoadForceVrsRatesAmd,
    LoadClampVertexColorAmd,
    LoadGsWaveIdAmd,
    LoadPrimGenQueryEnabledAmd,
    LoadPipelineStatQueryEnabledAmd,
    AtomicAddGsEmitPrimCountAmd,
    AtomicAddShaderInvocationCountAmd,
    AtomicAddGenPrimCountAmd,
    LoadInputReg,

    LoadGeometryParamBufferAgx,
    LoadVsOutputBufferAgx,
    LoadInputAssemblyBufferAgx,
    LoadTessParamBufferAgx,
    LoadStatQueryAddressAgx,
}

impl Intrinsic {
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Intrinsic::StoreOutput
                | Intrinsic::StorePerVertexOutput
                | Intrinsic::EmitVertex
                | Intrinsic::EndPrimitive
                | Intrinsic::EmitVertexWithCounter
                | Intrinsic::EndPrimitiveWithCounter
                | Intrinsic::SetVertexAndPrimitiveCount
                | Intrinsic::Barrier
                | Intrinsic::StoreShared
                | Intrinsic::StoreBufferAmd
                | Intrinsic::StoreGlobal
                | Intrinsic::GlobalAtomic
                | Intrinsic::GlobalAtomicSwap
                | Intrinsic::ExportAmd
                | Intrinsic::SendMsgAmd
                | Intrinsic::AtomicAddGsEmitPrimCountAmd
                | Intrinsic::AtomicAddShaderInvocationCountAmd
                | Intrinsic::AtomicAddGenPrimCountAmd
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Intrinsic::LoadInput => "load_input",
            Intrinsic::LoadPerVertexInput => "load_per_vertex_input",
            Intrinsic::LoadOutput => "load_output",
            Intrinsic::LoadPerVertexOutput => "load_per_vertex_output",
            Intrinsic::StoreOutput => "store_output",
            Intrinsic::StorePerVertexOutput => "store_per_vertex_output",
            Intrinsic::EmitVertex => "emit_vertex",
            Intrinsic::EndPrimitive => "end_primitive",
            Intrinsic::EmitVertexWithCounter => "emit_vertex_with_counter",
            Intrinsic::EndPrimitiveWithCounter => "end_primitive_with_counter",
            Intrinsic::SetVertexAndPrimitiveCount => {
                "set_vertex_and_primitive_count"
            }
            Intrinsic::Barrier => "barrier",
            Intrinsic::LoadInvocationId => "load_invocation_id",
            Intrinsic::LoadPrimitiveId => "load_primitive_id",
            Intrinsic::LoadInstanceId => "load_instance_id",
            Intrinsic::LoadVertexId => "load_vertex_id",
            Intrinsic::LoadVertexIdZeroBase => "load_vertex_id_zero_base",
            Intrinsic::LoadLocalInvocationIndex => {
                "load_local_invocation_index"
            }
            Intrinsic::LoadLocalInvocationId => "load_local_invocation_id",
            Intrinsic::LoadWorkgroupId => "load_workgroup_id",
            Intrinsic::LoadGlobalInvocationId => "load_global_invocation_id",
            Intrinsic::LoadSubgroupInvocation => "load_subgroup_invocation",
            Intrinsic::LoadPatchVerticesIn => "load_patch_vertices_in",
            Intrinsic::LoadProvokingLast => "load_provoking_last",
            Intrinsic::LoadFlatMask => "load_flat_mask",
            Intrinsic::LoadInputTopology => "load_input_topology",
            Intrinsic::LoadShared => "load_shared",
            Intrinsic::StoreShared => "store_shared",
            Intrinsic::LoadBufferAmd => "load_buffer_amd",
            Intrinsic::StoreBufferAmd => "store_buffer_amd",
            Intrinsic::LoadGlobal => "load_global",
            Intrinsic::LoadGlobalConstant => "load_global_constant",
            Intrinsic::StoreGlobal => "store_global",
            Intrinsic::GlobalAtomic => "global_atomic",
            Intrinsic::GlobalAtomicSwap => "global_atomic_swap",
            Intrinsic::Ballot => "ballot",
            Intrinsic::Elect => "elect",
            Intrinsic::Reduce => "reduce",
            Intrinsic::WorkgroupScanInclusiveAdd => {
                "workgroup_scan_inclusive_add"
            }
            Intrinsic::WorkgroupBroadcast => "workgroup_broadcast",
            Intrinsic::ExportAmd => "export_amd",
            Intrinsic::SendMsgAmd => "sendmsg_amd",
            Intrinsic::LoadRingTessOffchipAmd => "load_ring_tess_offchip_amd",
            Intrinsic::LoadRingTessOffchipOffsetAmd => {
                "load_ring_tess_offchip_offset_amd"
            }
            Intrinsic::LoadRingTessFactorsAmd => "load_ring_tess_factors_amd",
            Intrinsic::LoadRingTessFactorsOffsetAmd => {
                "load_ring_tess_factors_offset_amd"
            }
            Intrinsic::LoadRingGsvsAmd => "load_ring_gsvs_amd",
            Intrinsic::LoadRingGs2vsOffsetAmd => "load_ring_gs2vs_offset_amd",
            Intrinsic::LoadLshsVertexStrideAmd => {
                "load_lshs_vertex_stride_amd"
            }
            Intrinsic::LoadTessRelPatchIdAmd => "load_tess_rel_patch_id_amd",
            Intrinsic::LoadTcsNumPatchesAmd => "load_tcs_num_patches_amd",
            Intrinsic::LoadHsOutPatchDataOffsetAmd => {
                "load_hs_out_patch_data_offset_amd"
            }
            Intrinsic::LoadTcsPrimitiveModeAmd => {
                "load_tcs_primitive_mode_amd"
            }
            Intrinsic::LoadTcsTessLevelsToTesAmd => {
                "load_tcs_tess_levels_to_tes_amd"
            }
            Intrinsic::LoadStreamoutConfigAmd => "load_streamout_config_amd",
            Intrinsic::LoadStreamoutWriteIndexAmd => {
                "load_streamout_write_index_amd"
            }
            Intrinsic::LoadStreamoutBufferAmd => "load_streamout_buffer_amd",
            Intrinsic::LoadStreamoutOffsetAmd => "load_streamout_offset_amd",
            Intrinsic::LoadUserClipPlane => "load_user_clip_plane",
            Intrinsic::LoadForceVrsRatesAmd => "load_force_vrs_rates_amd",
            Intrinsic::LoadClampVertexColorAmd => {
                "load_clamp_vertex_color_amd"
            }
            Intrinsic::LoadGsWaveIdAmd => "load_gs_wave_id_amd",
            Intrinsic::LoadPrimGenQueryEnabledAmd => {
                "load_prim_gen_query_enabled_amd"
            }
            Intrinsic::LoadPipelineStatQueryEnabledAmd => {
                "load_pipeline_stat_query_enabled_amd"
            }
            Intrinsic::AtomicAddGsEmitPrimCountAmd => {
                "atomic_add_gs_emit_prim_count_amd"
            }
            Intrinsic::AtomicAddShaderInvocationCountAmd => {
                "atomic_add_shader_invocation_count_amd"
            }
            Intrinsic::AtomicAddGenPrimCountAmd => {
                "atomic_add_gen_prim_count_amd"
            }
            Intrinsic::LoadInputReg => "load_input_reg",
            Intrinsic::LoadGeometryParamBufferAgx => {
                "load_geometry_param_buffer_agx"
            }
            Intrinsic::LoadVsOutputBufferAgx => "load_vs_output_buffer_agx",
            Intrinsic::LoadInputAssemblyBufferAgx => {
                "load_input_assembly_buffer_agx"
            }
            Intrinsic::LoadTessParamBufferAgx => "load_tess_param_buffer_agx",
            Intrinsic::LoadStatQueryAddressAgx => {
                "load_stat_query_address_agx"
            }
        }
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub trait SrcsAsSlice {
    fn srcs_as_slice(&self) -> &[Src];
    fn srcs_as_mut_slice(&mut self) -> &mut [Src];
}

pub trait DstsAsSlice {
    fn dsts_as_slice(&self) -> &[Dst];
    fn dsts_as_mut_slice(&mut self) -> &mut [Dst];
}

#[derive(Clone, SrcsAsSlice, DstsAsSlice)]
pub struct OpAlu {
    pub dst: Dst,
    pub op: AluOp,
    pub srcs: Vec<Src>,

    /// No unsigned wrap: the result is known not to overflow
    pub nuw: bool,
}

impl fmt::Display for OpAlu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dst, self.op)?;
        if self.nuw {
            write!(f, ".nuw")?;
        }
        for (i, src) in self.srcs.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", src)?;
            } else {
                write!(f, ", {}", src)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, SrcsAsSlice, DstsAsSlice)]
pub struct OpIntrinsic {
    pub dst: Dst,
    pub intrinsic: Intrinsic,
    pub srcs: Vec<Src>,
    pub idx: IntrinsicIndices,
}

impl OpIntrinsic {
    pub fn new(intrinsic: Intrinsic, dst: Dst, srcs: Vec<Src>) -> OpIntrinsic {
        OpIntrinsic {
            dst: dst,
            intrinsic: intrinsic,
            srcs: srcs,
            idx: Default::default(),
        }
    }

    pub fn io_semantics(&self) -> &IoSemantics {
        &self.idx.io_semantics
    }

    /// The indirect slot offset of an I/O intrinsic, always the last source
    pub fn io_offset_src(&self) -> &Src {
        match self.intrinsic {
            Intrinsic::LoadInput
            | Intrinsic::LoadPerVertexInput
            | Intrinsic::LoadOutput
            | Intrinsic::LoadPerVertexOutput
            | Intrinsic::StoreOutput
            | Intrinsic::StorePerVertexOutput => {
                self.srcs.last().expect("I/O intrinsic without offset")
            }
            _ => panic!("{} has no I/O offset", self.intrinsic),
        }
    }

    /// The vertex index of a per-vertex I/O intrinsic
    pub fn io_arrayed_index_src(&self) -> &Src {
        match self.intrinsic {
            Intrinsic::LoadPerVertexInput | Intrinsic::LoadPerVertexOutput => {
                &self.srcs[0]
            }
            Intrinsic::StorePerVertexOutput => &self.srcs[1],
            _ => panic!("{} is not arrayed", self.intrinsic),
        }
    }
}

impl fmt::Display for OpIntrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.dst.is_none() {
            write!(f, "{} = ", self.dst)?;
        }
        write!(f, "{} (", self.intrinsic)?;
        for (i, src) in self.srcs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", src)?;
        }
        write!(f, ")")?;

        let idx = &self.idx;
        if idx.base != 0 {
            write!(f, " base={}", idx.base)?;
        }
        if idx.component != 0 {
            write!(f, " component={}", idx.component)?;
        }
        if idx.write_mask != 0 {
            write!(f, " wrmask={:04b}", idx.write_mask)?;
        }
        if idx.io_semantics.num_slots != 0 {
            let sem = &idx.io_semantics;
            write!(f, " io location={}", sem.location)?;
            if sem.high_16bits {
                write!(f, " high_16bits")?;
            }
            if sem.no_varying {
                write!(f, " no_varying")?;
            }
            if sem.gs_streams != 0 {
                write!(f, " gs_streams={:#x}", sem.gs_streams)?;
            }
        }
        if idx.stream_id != 0 {
            write!(f, " stream_id={}", idx.stream_id)?;
        }
        if !idx.access.is_empty() {
            write!(f, " access={:?}", idx.access)?;
        }
        if !idx.flags.is_empty() {
            write!(f, " flags={:?}", idx.flags)?;
        }
        if self.intrinsic == Intrinsic::Barrier {
            write!(
                f,
                " exec={} mem={} sem={:?} modes={:?}",
                idx.execution_scope,
                idx.memory_scope,
                idx.memory_semantics,
                idx.memory_modes
            )?;
        } else if !idx.memory_modes.is_empty() {
            write!(f, " modes={:?}", idx.memory_modes)?;
        }
        Ok(())
    }
}

#[derive(Clone, SrcsAsSlice, DstsAsSlice)]
pub struct OpUndef {
    pub dst: Dst,
}

impl fmt::Display for OpUndef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = undef", self.dst)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub comps: u8,
    pub bit_size: u8,
}

#[derive(Clone, SrcsAsSlice, DstsAsSlice)]
pub struct OpLoadVar {
    pub dst: Dst,
    pub var: VarId,
}

impl fmt::Display for OpLoadVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = load_var {}", self.dst, self.var)
    }
}

#[derive(Clone, SrcsAsSlice, DstsAsSlice)]
pub struct OpStoreVar {
    pub src: Src,
    pub var: VarId,
    pub write_mask: u8,
}

impl fmt::Display for OpStoreVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "store_var {} {} wrmask={:04b}",
            self.var, self.src, self.write_mask
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JumpKind {
    Break,
    Continue,
}

#[derive(Clone, SrcsAsSlice, DstsAsSlice)]
pub struct OpJump {
    pub kind: JumpKind,
}

impl fmt::Display for OpJump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            JumpKind::Break => write!(f, "break"),
            JumpKind::Continue => write!(f, "continue"),
        }
    }
}

#[derive(Clone, Display, DstsAsSlice, SrcsAsSlice, FromVariants)]
pub enum Op {
    Alu(OpAlu),
    Intrinsic(OpIntrinsic),
    Undef(OpUndef),
    LoadVar(OpLoadVar),
    StoreVar(OpStoreVar),
    Jump(OpJump),
}

#[derive(Clone)]
pub struct Instr {
    pub op: Op,
}

impl Instr {
    pub fn new(op: impl Into<Op>) -> Instr {
        Instr { op: op.into() }
    }

    pub fn new_boxed(op: impl Into<Op>) -> Box<Self> {
        Box::new(Instr::new(op))
    }

    pub fn dsts(&self) -> &[Dst] {
        self.op.dsts_as_slice()
    }

    pub fn srcs(&self) -> &[Src] {
        self.op.srcs_as_slice()
    }

    pub fn srcs_mut(&mut self) -> &mut [Src] {
        self.op.srcs_as_mut_slice()
    }

    pub fn as_intrinsic(&self) -> Option<&OpIntrinsic> {
        match &self.op {
            Op::Intrinsic(intrin) => Some(intrin),
            _ => None,
        }
    }

    pub fn as_intrinsic_mut(&mut self) -> Option<&mut OpIntrinsic> {
        match &mut self.op {
            Op::Intrinsic(intrin) => Some(intrin),
            _ => None,
        }
    }

    pub fn can_eliminate(&self) -> bool {
        match &self.op {
            Op::Intrinsic(intrin) => !intrin.intrinsic.has_side_effects(),
            Op::StoreVar(_) | Op::Jump(_) => false,
            _ => true,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)
    }
}

impl<T: Into<Op>> From<T> for Instr {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SelectionControl {
    #[default]
    None,
    /// At least one invocation of every wave takes the branch
    DivergentAlwaysTaken,
}

#[derive(Clone)]
pub struct IfNode {
    pub cond: Src,
    pub control: SelectionControl,
    pub then_body: Vec<Node>,
    pub else_body: Vec<Node>,
}

#[derive(Clone)]
pub struct LoopNode {
    pub body: Vec<Node>,
}

#[derive(Clone)]
pub enum Node {
    Instr(Box<Instr>),
    If(Box<IfNode>),
    Loop(Box<LoopNode>),
}

impl From<Box<Instr>> for Node {
    fn from(instr: Box<Instr>) -> Node {
        Node::Instr(instr)
    }
}

/// The result of map() done on a Box<Instr>. A Vec is only allocated if the
/// mapping results in multiple nodes. Mapped results may contain control
/// flow.
pub enum MappedInstrs {
    None,
    One(Box<Instr>),
    Many(Vec<Node>),
}

impl MappedInstrs {
    pub fn push(&mut self, n: Node) {
        match self {
            MappedInstrs::None => {
                *self = match n {
                    Node::Instr(i) => MappedInstrs::One(i),
                    n => MappedInstrs::Many(vec![n]),
                };
            }
            MappedInstrs::One(_) => {
                *self = match std::mem::replace(self, MappedInstrs::None) {
                    MappedInstrs::One(o) => {
                        MappedInstrs::Many(vec![Node::Instr(o), n])
                    }
                    _ => panic!("Not a One"),
                };
            }
            MappedInstrs::Many(v) => {
                v.push(n);
            }
        }
    }
}

fn map_body<F>(
    body: &mut Vec<Node>,
    map: &mut F,
    ssa_alloc: &mut SSAValueAllocator,
) where
    F: FnMut(Box<Instr>, &mut SSAValueAllocator) -> MappedInstrs,
{
    let mut nodes = Vec::with_capacity(body.len());
    for node in body.drain(..) {
        match node {
            Node::Instr(i) => match map(i, ssa_alloc) {
                MappedInstrs::None => (),
                MappedInstrs::One(i) => nodes.push(Node::Instr(i)),
                MappedInstrs::Many(mut v) => nodes.append(&mut v),
            },
            Node::If(mut nif) => {
                map_body(&mut nif.then_body, map, ssa_alloc);
                map_body(&mut nif.else_body, map, ssa_alloc);
                nodes.push(Node::If(nif));
            }
            Node::Loop(mut nloop) => {
                map_body(&mut nloop.body, map, ssa_alloc);
                nodes.push(Node::Loop(nloop));
            }
        }
    }
    *body = nodes;
}

fn for_each_instr_in<'a>(body: &'a [Node], f: &mut impl FnMut(&'a Instr)) {
    for node in body {
        match node {
            Node::Instr(i) => f(i),
            Node::If(nif) => {
                for_each_instr_in(&nif.then_body, f);
                for_each_instr_in(&nif.else_body, f);
            }
            Node::Loop(nloop) => for_each_instr_in(&nloop.body, f),
        }
    }
}

fn fmt_body(
    f: &mut fmt::Formatter<'_>,
    body: &[Node],
    indent: usize,
) -> fmt::Result {
    for node in body {
        match node {
            Node::Instr(i) => writeln!(f, "{:indent$}{}", "", i)?,
            Node::If(nif) => {
                write!(f, "{:indent$}if {}", "", nif.cond)?;
                if nif.control == SelectionControl::DivergentAlwaysTaken {
                    write!(f, " (divergent_always_taken)")?;
                }
                writeln!(f, " {{")?;
                fmt_body(f, &nif.then_body, indent + 4)?;
                if !nif.else_body.is_empty() {
                    writeln!(f, "{:indent$}}} else {{", "")?;
                    fmt_body(f, &nif.else_body, indent + 4)?;
                }
                writeln!(f, "{:indent$}}}", "")?;
            }
            Node::Loop(nloop) => {
                writeln!(f, "{:indent$}loop {{", "")?;
                fmt_body(f, &nloop.body, indent + 4)?;
                writeln!(f, "{:indent$}}}", "")?;
            }
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct Function {
    pub ssa_alloc: SSAValueAllocator,
    pub vars: Vec<Variable>,
    pub body: Vec<Node>,
}

impl Function {
    pub fn new() -> Function {
        Function {
            ssa_alloc: SSAValueAllocator::new(),
            vars: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn create_var(&mut self, name: &str, comps: u8, bit_size: u8) -> VarId {
        let id = VarId(self.vars.len().try_into().unwrap());
        self.vars.push(Variable {
            name: name.to_string(),
            comps: comps,
            bit_size: bit_size,
        });
        id
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.0 as usize]
    }

    pub fn map_instrs<F>(&mut self, mut map: F)
    where
        F: FnMut(Box<Instr>, &mut SSAValueAllocator) -> MappedInstrs,
    {
        map_body(&mut self.body, &mut map, &mut self.ssa_alloc);
    }

    pub fn for_each_instr<'a>(&'a self, mut f: impl FnMut(&'a Instr)) {
        for_each_instr_in(&self.body, &mut f);
    }

    pub fn prepend(&mut self, mut nodes: Vec<Node>) {
        nodes.append(&mut self.body);
        self.body = nodes;
    }

    pub fn append(&mut self, mut nodes: Vec<Node>) {
        self.body.append(&mut nodes);
    }

    /// Runs `f` with a builder whose output lands at the end of the function
    pub fn build_at_end<R>(
        &mut self,
        f: impl FnOnce(&mut SSAInstrBuilder) -> R,
    ) -> R {
        let mut b = SSAInstrBuilder::new(&mut self.ssa_alloc);
        let r = f(&mut b);
        let nodes = b.as_nodes();
        self.append(nodes);
        r
    }

    /// Runs `f` with a builder whose output lands at the start of the function
    pub fn build_at_start<R>(
        &mut self,
        f: impl FnOnce(&mut SSAInstrBuilder) -> R,
    ) -> R {
        let mut b = SSAInstrBuilder::new(&mut self.ssa_alloc);
        let r = f(&mut b);
        let nodes = b.as_nodes();
        self.prepend(nodes);
        r
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, var) in self.vars.iter().enumerate() {
            writeln!(
                f,
                "decl_var @{} {}x{} {}",
                i, var.comps, var.bit_size, var.name
            )?;
        }
        fmt_body(f, &self.body, 0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ShaderStage {
    #[default]
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

/// Primitive topologies, numbered like the driver-visible topology enum
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Prim {
    #[default]
    Points = 0,
    Lines = 1,
    LineLoop = 2,
    LineStrip = 3,
    Triangles = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
    LinesAdjacency = 10,
    LineStripAdjacency = 11,
    TrianglesAdjacency = 12,
    TriangleStripAdjacency = 13,
    Patches = 14,
}

impl Prim {
    pub fn vertices_per_prim(&self) -> u32 {
        match self {
            Prim::Points => 1,
            Prim::Lines | Prim::LineLoop | Prim::LineStrip => 2,
            Prim::Triangles | Prim::TriangleStrip | Prim::TriangleFan => 3,
            Prim::LinesAdjacency | Prim::LineStripAdjacency => 4,
            Prim::TrianglesAdjacency | Prim::TriangleStripAdjacency => 6,
            Prim::Patches => panic!("Patches have no fixed vertex count"),
        }
    }
}

impl TryFrom<u32> for Prim {
    type Error = &'static str;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Prim::Points),
            1 => Ok(Prim::Lines),
            2 => Ok(Prim::LineLoop),
            3 => Ok(Prim::LineStrip),
            4 => Ok(Prim::Triangles),
            5 => Ok(Prim::TriangleStrip),
            6 => Ok(Prim::TriangleFan),
            10 => Ok(Prim::LinesAdjacency),
            11 => Ok(Prim::LineStripAdjacency),
            12 => Ok(Prim::TrianglesAdjacency),
            13 => Ok(Prim::TriangleStripAdjacency),
            14 => Ok(Prim::Patches),
            _ => Err("Invalid primitive topology"),
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum TessPrimitiveMode {
    #[default]
    Unspecified = 0,
    Triangles = 1,
    Quads = 2,
    Isolines = 3,
}

impl TessPrimitiveMode {
    /// Returns the number of (outer, inner) tess level components
    ///
    /// A mode only known at draw time may be quads, so it gets all of them.
    pub fn tess_level_components(&self) -> (u32, u32) {
        match self {
            TessPrimitiveMode::Triangles => (3, 1),
            TessPrimitiveMode::Isolines => (2, 0),
            TessPrimitiveMode::Quads | TessPrimitiveMode::Unspecified => (4, 2),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TessInfo {
    pub tcs_vertices_out: u8,
    pub primitive_mode: TessPrimitiveMode,
}

#[derive(Clone, Debug, Default)]
pub struct GsInfo {
    pub vertices_in: u8,
    pub vertices_out: u16,
    pub invocations: u8,
    pub input_primitive: Prim,
    pub output_primitive: Prim,
    pub active_stream_mask: u8,
}

#[derive(Clone, Debug, Default)]
pub struct ShaderInfo {
    pub stage: ShaderStage,
    pub outputs_written: u64,
    pub outputs_read: u64,
    pub outputs_written_16bit: u16,
    pub inputs_read: u64,
    pub patch_inputs_read: u32,
    pub patch_outputs_read: u32,
    pub patch_outputs_written: u32,
    pub writes_memory: bool,
    pub clip_distance_array_size: u8,
    pub cull_distance_array_size: u8,
    pub workgroup_size: [u16; 3],
    pub has_transform_feedback_varyings: bool,
    pub tess: TessInfo,
    pub gs: GsInfo,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct XfbBuffer {
    pub stride: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct XfbOutput {
    pub buffer: u8,
    /// Byte offset of this output within a captured vertex
    pub offset: u32,
    pub location: u32,
    pub high_16bits: bool,
    pub component_mask: u8,
    pub component_offset: u8,
}

#[derive(Clone, Debug, Default)]
pub struct XfbInfo {
    pub buffers: [XfbBuffer; 4],
    pub buffers_written: u8,
    pub streams_written: u8,
    pub buffer_to_stream: [u8; 4],
    pub outputs: Vec<XfbOutput>,
}

#[derive(Clone)]
pub struct Shader {
    pub name: String,
    pub info: ShaderInfo,
    pub xfb: Option<XfbInfo>,
    pub func: Function,
}

impl Shader {
    pub fn new(stage: ShaderStage, name: &str) -> Shader {
        Shader {
            name: name.to_string(),
            info: ShaderInfo {
                stage: stage,
                ..Default::default()
            },
            xfb: None,
            func: Function::new(),
        }
    }

    pub fn map_instrs<F>(&mut self, map: F)
    where
        F: FnMut(Box<Instr>, &mut SSAValueAllocator) -> MappedInstrs,
    {
        self.func.map_instrs(map);
    }

    /// Collects every intrinsic of the given kind, in program order
    pub fn intrinsics(&self, intrinsic: Intrinsic) -> Vec<&OpIntrinsic> {
        let mut v = Vec::new();
        self.func.for_each_instr(|instr| {
            if let Some(intrin) = instr.as_intrinsic() {
                if intrin.intrinsic == intrinsic {
                    v.push(intrin);
                }
            }
        });
        v
    }

    pub fn has_intrinsic(&self, intrinsic: Intrinsic) -> bool {
        !self.intrinsics(intrinsic).is_empty()
    }
}

impl fmt::Display for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "shader: {} ({:?})", self.name, self.info.stage)?;
        write!(f, "{}", self.func)
    }
}
