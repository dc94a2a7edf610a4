//! Decoded program interface.
//!
//! Binary decoding is done by the caller; the compiler starts from basic blocks of already
//! decoded instructions. Operand fields keep the Maxwell encoding where it matters to lowering
//! (attribute byte addresses, constant buffer byte offsets, consecutive register ranges).

use crate::attribute::{self, AttributeTarget};
use crate::attribute_usage::AttributeUsage;
use crate::features::FeatureFlags;
use crate::ir::{CompareOp, IoVariable, Predicate, Register, SamplerType};
use crate::types::ShaderStage;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedProgram {
    pub blocks: Vec<DecodedBlock>,
    /// Thread-local memory declared by the program header, in bytes.
    pub local_memory_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    pub address: u64,
    pub instructions: Vec<DecodedInstruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub address: u64,
    /// Guard predicate; `PT` when the instruction always executes.
    pub predicate: Predicate,
    pub predicate_inverted: bool,
    pub op: DecodedOp,
}

impl DecodedInstruction {
    pub fn new(address: u64, op: DecodedOp) -> Self {
        Self {
            address,
            predicate: Predicate::PT,
            predicate_inverted: false,
            op,
        }
    }

    pub fn predicated(mut self, predicate: Predicate, inverted: bool) -> Self {
        self.predicate = predicate;
        self.predicate_inverted = inverted;
        self
    }

    pub fn is_predicated(&self) -> bool {
        !self.predicate.is_pt() || self.predicate_inverted
    }
}

/// Second source of most ALU instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Register(Register),
    Immediate(u32),
    /// Constant buffer word; `offset` is in bytes.
    ConstantBuffer { slot: u32, offset: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemRegister {
    LaneId,
    InvocationId,
    TidX,
    TidY,
    TidZ,
    CtaIdX,
    CtaIdY,
    CtaIdZ,
    EqMask,
    LtMask,
    LeMask,
    GtMask,
    GeMask,
}

impl SystemRegister {
    /// IO variable and component backing the register.
    pub fn io_variable(self) -> (IoVariable, Option<u32>) {
        match self {
            SystemRegister::LaneId => (IoVariable::SubgroupLaneId, None),
            SystemRegister::InvocationId => (IoVariable::InvocationId, None),
            SystemRegister::TidX => (IoVariable::LocalInvocationId, Some(0)),
            SystemRegister::TidY => (IoVariable::LocalInvocationId, Some(1)),
            SystemRegister::TidZ => (IoVariable::LocalInvocationId, Some(2)),
            SystemRegister::CtaIdX => (IoVariable::WorkgroupId, Some(0)),
            SystemRegister::CtaIdY => (IoVariable::WorkgroupId, Some(1)),
            SystemRegister::CtaIdZ => (IoVariable::WorkgroupId, Some(2)),
            SystemRegister::EqMask => (IoVariable::SubgroupEqMask, Some(0)),
            SystemRegister::LtMask => (IoVariable::SubgroupLtMask, Some(0)),
            SystemRegister::LeMask => (IoVariable::SubgroupLeMask, Some(0)),
            SystemRegister::GtMask => (IoVariable::SubgroupGtMask, Some(0)),
            SystemRegister::GeMask => (IoVariable::SubgroupGeMask, Some(0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleMode {
    Index,
    Up,
    Down,
    Butterfly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    Local,
    Shared,
    /// Global memory reached through the guest storage buffer `slot`.
    Global { slot: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedOp {
    Nop,
    Mov {
        dest: Register,
        src: Src,
    },
    Sel {
        dest: Register,
        a: Register,
        b: Src,
        pred: Predicate,
        pred_inverted: bool,
    },
    FAdd {
        dest: Register,
        a: Register,
        b: Src,
        negate_b: bool,
    },
    FMul {
        dest: Register,
        a: Register,
        b: Src,
    },
    FFma {
        dest: Register,
        a: Register,
        b: Src,
        c: Register,
    },
    FMnMx {
        dest: Register,
        a: Register,
        b: Src,
        min: bool,
    },
    IAdd {
        dest: Register,
        a: Register,
        b: Src,
        negate_b: bool,
    },
    IMul {
        dest: Register,
        a: Register,
        b: Src,
    },
    IMulHi {
        dest: Register,
        a: Register,
        b: Src,
        signed: bool,
    },
    Lop {
        dest: Register,
        a: Register,
        b: Src,
        op: LogicOp,
    },
    Shl {
        dest: Register,
        a: Register,
        b: Src,
    },
    Shr {
        dest: Register,
        a: Register,
        b: Src,
        signed: bool,
    },
    Popc {
        dest: Register,
        src: Src,
    },
    I2F {
        dest: Register,
        src: Src,
        signed: bool,
    },
    F2I {
        dest: Register,
        src: Src,
        signed: bool,
    },
    ISetP {
        dest: Predicate,
        a: Register,
        b: Src,
        cmp: CompareOp,
        signed: bool,
    },
    FSetP {
        dest: Predicate,
        a: Register,
        b: Src,
        cmp: CompareOp,
    },
    /// Attribute load of `count` consecutive words starting at byte `address`.
    ///
    /// `vertex` selects the vertex of an arrayed input; `offset` adds a dynamic byte offset.
    Ald {
        dest: Register,
        count: u8,
        address: u32,
        vertex: Option<Register>,
        offset: Option<Register>,
        per_patch: bool,
        output: bool,
    },
    Ast {
        src: Register,
        count: u8,
        address: u32,
        vertex: Option<Register>,
        offset: Option<Register>,
        per_patch: bool,
    },
    /// Fragment input interpolation.
    Ipa {
        dest: Register,
        address: u32,
        offset: Option<Register>,
    },
    S2R {
        dest: Register,
        system: SystemRegister,
    },
    Ld {
        dest: Register,
        count: u8,
        space: MemorySpace,
        address: Register,
        offset: i32,
    },
    St {
        src: Register,
        count: u8,
        space: MemorySpace,
        address: Register,
        offset: i32,
    },
    /// Texture sample writing one register per component enabled in `mask`.
    Tex {
        dest: Register,
        mask: u8,
        handle: u32,
        sampler_type: SamplerType,
        coords: Vec<Register>,
        lod: Option<Register>,
        fetch: bool,
    },
    Suld {
        dest: Register,
        mask: u8,
        handle: u32,
        sampler_type: SamplerType,
        coords: Vec<Register>,
    },
    /// Image store of the four registers starting at `values`.
    Sust {
        values: Register,
        handle: u32,
        sampler_type: SamplerType,
        coords: Vec<Register>,
    },
    Shfl {
        dest: Register,
        value: Register,
        index: Src,
        mask: Src,
        mode: ShuffleMode,
    },
    FSwzAdd {
        dest: Register,
        a: Register,
        b: Register,
        mask: u32,
    },
    Bar,
    Bra {
        target: u64,
    },
    Exit,
    Kil,
    Out {
        emit: bool,
        cut: bool,
    },
}

impl DecodedOp {
    pub fn name(&self) -> &'static str {
        match self {
            DecodedOp::Nop => "NOP",
            DecodedOp::Mov { .. } => "MOV",
            DecodedOp::Sel { .. } => "SEL",
            DecodedOp::FAdd { .. } => "FADD",
            DecodedOp::FMul { .. } => "FMUL",
            DecodedOp::FFma { .. } => "FFMA",
            DecodedOp::FMnMx { .. } => "FMNMX",
            DecodedOp::IAdd { .. } => "IADD",
            DecodedOp::IMul { .. } => "IMUL",
            DecodedOp::IMulHi { .. } => "IMUL.HI",
            DecodedOp::Lop { .. } => "LOP",
            DecodedOp::Shl { .. } => "SHL",
            DecodedOp::Shr { .. } => "SHR",
            DecodedOp::Popc { .. } => "POPC",
            DecodedOp::I2F { .. } => "I2F",
            DecodedOp::F2I { .. } => "F2I",
            DecodedOp::ISetP { .. } => "ISETP",
            DecodedOp::FSetP { .. } => "FSETP",
            DecodedOp::Ald { .. } => "ALD",
            DecodedOp::Ast { .. } => "AST",
            DecodedOp::Ipa { .. } => "IPA",
            DecodedOp::S2R { .. } => "S2R",
            DecodedOp::Ld { .. } => "LD",
            DecodedOp::St { .. } => "ST",
            DecodedOp::Tex { .. } => "TEX",
            DecodedOp::Suld { .. } => "SULD",
            DecodedOp::Sust { .. } => "SUST",
            DecodedOp::Shfl { .. } => "SHFL",
            DecodedOp::FSwzAdd { .. } => "FSWZADD",
            DecodedOp::Bar => "BAR",
            DecodedOp::Bra { .. } => "BRA",
            DecodedOp::Exit => "EXIT",
            DecodedOp::Kil => "KIL",
            DecodedOp::Out { .. } => "OUT",
        }
    }
}

/// Interface facts gathered from a decoded program before any IR exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramUsage {
    pub attributes: AttributeUsage,
    pub features: FeatureFlags,
    /// Bit `n` set when clip distance `n` is written.
    pub clip_distances_written: u8,
}

impl DecodedProgram {
    pub fn instructions(&self) -> impl Iterator<Item = &DecodedInstruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Scans attribute and memory accesses of the program as run on `stage`.
    pub fn scan_usage(&self, stage: ShaderStage) -> ProgramUsage {
        let mut usage = ProgramUsage::default();

        for inst in self.instructions() {
            match &inst.op {
                DecodedOp::Ald {
                    count,
                    address,
                    offset,
                    per_patch,
                    output,
                    ..
                } => {
                    if offset.is_some() {
                        usage.features |= if *output {
                            FeatureFlags::OA_INDEXING
                        } else {
                            FeatureFlags::IA_INDEXING
                        };
                    }
                    for index in 0..u32::from(*count) {
                        let address = address + index * 4;
                        if *output {
                            usage.record_output(address, stage, *per_patch);
                        } else {
                            usage.record_input(address, stage, *per_patch);
                        }
                    }
                }
                DecodedOp::Ipa {
                    address, offset, ..
                } => {
                    if offset.is_some() {
                        usage.features |= FeatureFlags::IA_INDEXING;
                    }
                    usage.record_input(*address, stage, false);
                }
                DecodedOp::Ast {
                    count,
                    address,
                    offset,
                    per_patch,
                    ..
                } => {
                    if offset.is_some() {
                        usage.features |= FeatureFlags::OA_INDEXING;
                    }
                    for index in 0..u32::from(*count) {
                        usage.record_output(address + index * 4, stage, *per_patch);
                    }
                }
                DecodedOp::Ld { space, .. } | DecodedOp::St { space, .. } => match space {
                    MemorySpace::Local => usage.features |= FeatureFlags::LOCAL_MEMORY,
                    MemorySpace::Shared => usage.features |= FeatureFlags::SHARED_MEMORY,
                    MemorySpace::Global { .. } => {}
                },
                _ => {}
            }
        }

        usage
    }
}

impl ProgramUsage {
    fn record_input(&mut self, address: u32, stage: ShaderStage, per_patch: bool) {
        match attribute::resolve(address, stage, false, per_patch) {
            Some(AttributeTarget::User {
                location,
                component,
            }) => {
                if per_patch {
                    self.attributes.set_input_user_attribute_per_patch(location);
                } else {
                    self.attributes.set_input_user_attribute(location, component);
                }
            }
            Some(AttributeTarget::Builtin {
                variable: IoVariable::FragmentCoord,
                component: Some(0 | 1),
            }) => self.features |= FeatureFlags::FRAG_COORD_XY,
            Some(AttributeTarget::Builtin {
                variable: IoVariable::InstanceId,
                ..
            }) => self.features |= FeatureFlags::INSTANCE_ID,
            _ => {}
        }
    }

    fn record_output(&mut self, address: u32, stage: ShaderStage, per_patch: bool) {
        match attribute::resolve(address, stage, true, per_patch) {
            Some(AttributeTarget::User { location, .. }) => {
                if per_patch {
                    self.attributes.set_output_user_attribute_per_patch(location);
                } else {
                    self.attributes.set_output_user_attribute(location);
                }
            }
            Some(AttributeTarget::Builtin {
                variable,
                component,
            }) => match variable {
                IoVariable::Layer => self.features |= FeatureFlags::RT_LAYER,
                IoVariable::ViewportIndex => self.features |= FeatureFlags::VIEWPORT_INDEX,
                IoVariable::PointSize => self.features |= FeatureFlags::POINT_SIZE,
                IoVariable::ClipDistance => {
                    self.clip_distances_written |= 1 << component.unwrap_or(0);
                }
                _ => {}
            },
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn program(ops: Vec<DecodedOp>) -> DecodedProgram {
        DecodedProgram {
            blocks: vec![DecodedBlock {
                address: 0,
                instructions: ops
                    .into_iter()
                    .enumerate()
                    .map(|(i, op)| DecodedInstruction::new(i as u64 * 8, op))
                    .collect(),
            }],
            local_memory_size: 0,
        }
    }

    #[test]
    fn scan_records_attributes_and_builtins() {
        let program = program(vec![
            DecodedOp::Ald {
                dest: Register(0),
                count: 2,
                address: 0x0a8,
                vertex: None,
                offset: None,
                per_patch: false,
                output: false,
            },
            DecodedOp::Ast {
                src: Register(0),
                count: 4,
                address: 0x0c0,
                vertex: None,
                offset: None,
                per_patch: false,
            },
            DecodedOp::Ast {
                src: Register(4),
                count: 1,
                address: attribute::LAYER,
                vertex: None,
                offset: None,
                per_patch: false,
            },
            DecodedOp::Ast {
                src: Register(5),
                count: 2,
                address: attribute::CLIP_DISTANCE_0 + 4,
                vertex: None,
                offset: None,
                per_patch: false,
            },
            DecodedOp::Ld {
                dest: Register(6),
                count: 1,
                space: MemorySpace::Local,
                address: Register::RZ,
                offset: 0,
            },
        ]);

        let usage = program.scan_usage(ShaderStage::Vertex);
        assert_eq!(usage.attributes.used_input_attributes, 1 << 2);
        assert_eq!(usage.attributes.input_components(2), 0b1100);
        assert_eq!(usage.attributes.used_output_attributes, 1 << 4);
        assert_eq!(usage.clip_distances_written, 0b110);
        assert_eq!(
            usage.features,
            FeatureFlags::RT_LAYER | FeatureFlags::LOCAL_MEMORY
        );
    }

    #[test]
    fn dynamic_offsets_mark_indexing() {
        let program = program(vec![DecodedOp::Ald {
            dest: Register(0),
            count: 1,
            address: 0x080,
            vertex: None,
            offset: Some(Register(1)),
            per_patch: false,
            output: false,
        }]);
        let usage = program.scan_usage(ShaderStage::Vertex);
        assert!(usage.features.contains(FeatureFlags::IA_INDEXING));
        assert!(!usage.features.contains(FeatureFlags::OA_INDEXING));
    }
}
