//! Lowers decoded Maxwell instructions into a flat list of IR operations.
//!
//! The output is linear: control flow is expressed with `MarkLabel` and branch operations and is
//! only split into basic blocks afterwards by [`crate::cfg`]. Stage prologues and epilogues that
//! the hardware performs implicitly (output initialization, fragment color export, compute
//! emulation bookkeeping, emulated transform feedback) are emitted here as ordinary IR.

use std::collections::BTreeMap;

use crate::attribute::{self, AttributeTarget, USER_ATTRIBUTES_COUNT, USER_ATTRIBUTE_BASE};
use crate::decode::{
    DecodedInstruction, DecodedOp, DecodedProgram, LogicOp, MemorySpace, ProgramUsage,
    ShuffleMode, Src,
};
use crate::definitions::ShaderDefinitions;
use crate::features::FeatureFlags;
use crate::gpu_accessor::GpuAccessor;
use crate::ir::{
    CompareOp, IdAllocator, ImageOp, Instruction, IoVariable, NumType, Operand, Operation,
    Predicate, Register, SamplerType, StorageKind, TextureFlags, TextureOp,
};
use crate::resources::{EmulationMemories, ResourceManager};
use crate::types::ShaderStage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    pub address: u64,
    pub opcode: &'static str,
    pub message: String,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IR build error at address {:#x}, opcode {}: {}",
            self.address, self.opcode, self.message
        )
    }
}

impl std::error::Error for BuildError {}

fn err(inst: &DecodedInstruction, message: impl Into<String>) -> BuildError {
    BuildError {
        address: inst.address,
        opcode: inst.op.name(),
        message: message.into(),
    }
}

/// Append-only operation list with helpers for the common operation shapes.
#[derive(Debug, Default)]
pub struct EmitterContext {
    ops: Vec<Operation>,
    ids: IdAllocator,
}

impl EmitterContext {
    pub fn new(ids: IdAllocator) -> Self {
        Self {
            ops: Vec::new(),
            ids,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn emit(&mut self, op: Operation) {
        self.ops.push(op);
    }

    pub fn local(&mut self) -> Operand {
        self.ids.new_local()
    }

    pub fn new_label(&mut self) -> Operand {
        self.ids.new_label()
    }

    pub fn new_variable(&mut self) -> Operand {
        self.ids.new_variable()
    }

    /// Emits `inst` into a fresh local and returns it.
    pub fn value(&mut self, inst: Instruction, sources: Vec<Operand>) -> Operand {
        let dest = self.local();
        self.emit(Operation::new(inst, Some(dest), sources));
        dest
    }

    pub fn assign(&mut self, dest: Operand, inst: Instruction, sources: Vec<Operand>) {
        self.emit(Operation::new(inst, Some(dest), sources));
    }

    pub fn copy(&mut self, dest: Operand, source: Operand) {
        self.assign(dest, Instruction::Copy, vec![source]);
    }

    pub fn load(&mut self, storage_kind: StorageKind, sources: Vec<Operand>) -> Operand {
        let dest = self.local();
        self.emit(Operation::with_storage(
            Instruction::Load,
            storage_kind,
            Some(dest),
            sources,
        ));
        dest
    }

    pub fn load_into(&mut self, dest: Operand, storage_kind: StorageKind, sources: Vec<Operand>) {
        self.emit(Operation::with_storage(
            Instruction::Load,
            storage_kind,
            Some(dest),
            sources,
        ));
    }

    pub fn store(&mut self, storage_kind: StorageKind, sources: Vec<Operand>) {
        self.emit(Operation::with_storage(
            Instruction::Store,
            storage_kind,
            None,
            sources,
        ));
    }

    pub fn iadd(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Instruction::Add(NumType::U32), vec![a, b])
    }

    pub fn isub(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Instruction::Subtract(NumType::U32), vec![a, b])
    }

    pub fn imul(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Instruction::Multiply(NumType::U32), vec![a, b])
    }

    pub fn compare(&mut self, op: CompareOp, ty: NumType, a: Operand, b: Operand) -> Operand {
        self.value(Instruction::Compare(op, ty), vec![a, b])
    }

    pub fn select(&mut self, ty: NumType, cond: Operand, a: Operand, b: Operand) -> Operand {
        self.value(Instruction::ConditionalSelect(ty), vec![cond, a, b])
    }

    pub fn mark_label(&mut self, label: Operand) {
        self.emit(Operation::new(Instruction::MarkLabel, None, vec![label]));
    }

    pub fn branch(&mut self, label: Operand) {
        self.emit(Operation::new(Instruction::Branch, None, vec![label]));
    }

    pub fn branch_if_true(&mut self, label: Operand, cond: Operand) {
        self.emit(Operation::new(Instruction::BranchIfTrue, None, vec![label, cond]));
    }

    pub fn branch_if_false(&mut self, label: Operand, cond: Operand) {
        self.emit(Operation::new(Instruction::BranchIfFalse, None, vec![label, cond]));
    }

    pub fn ret(&mut self) {
        self.emit(Operation::new(Instruction::Return, None, Vec::new()));
    }

    pub fn emit_vertex(&mut self) {
        self.emit(Operation::new(Instruction::EmitVertex, None, Vec::new()));
    }

    pub fn end_primitive(&mut self) {
        self.emit(Operation::new(Instruction::EndPrimitive, None, Vec::new()));
    }

    /// Whether control can not fall off the end of the list.
    pub fn ends_in_jump(&self) -> bool {
        matches!(
            self.ops.last().map(|op| op.inst),
            Some(Instruction::Return | Instruction::Branch)
        )
    }

    pub fn finish(self) -> (Vec<Operation>, IdAllocator) {
        (self.ops, self.ids)
    }
}

/// Source list of an IO access: variable, then location, vertex and component where the
/// variable takes them.
pub fn io_sources(
    definitions: &ShaderDefinitions,
    storage_kind: StorageKind,
    variable: IoVariable,
    location: Operand,
    vertex: Operand,
    component: Operand,
) -> Vec<Operand> {
    let mut sources = vec![variable.operand()];
    if variable.has_location() {
        sources.push(location);
    }
    if definitions.has_per_vertex_index(storage_kind, variable) {
        sources.push(vertex);
    }
    if variable.has_component() {
        sources.push(component);
    }
    sources
}

/// Which implicit parts of the stage to emit around the guest program body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    pub initialize_outputs: bool,
    pub prologue: bool,
    pub epilogue: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            initialize_outputs: true,
            prologue: true,
            epilogue: true,
        }
    }
}

pub struct BuildContext<'a> {
    pub definitions: &'a ShaderDefinitions,
    pub resources: &'a mut ResourceManager,
    pub gpu_accessor: &'a dyn GpuAccessor,
    pub usage: &'a ProgramUsage,
    /// Features discovered while lowering; OR-ed into the program's usage by the caller.
    pub features: FeatureFlags,
    /// Attribute address whose component a passthrough geometry shader forwards as the layer.
    pub layer_input_attribute: Option<u32>,
}

#[derive(Debug)]
pub struct BuiltProgram {
    pub ops: Vec<Operation>,
    pub ids: IdAllocator,
    /// Index of the first operation of the guest program body (after initialization and prologue).
    pub body_start: usize,
}

pub fn build_program(
    program: &DecodedProgram,
    ctx: &mut BuildContext<'_>,
    ids: IdAllocator,
    options: EmitOptions,
) -> Result<BuiltProgram, BuildError> {
    let mut builder = Builder {
        em: EmitterContext::new(ids),
        ctx,
        labels: BTreeMap::new(),
        options,
    };

    for block in &program.blocks {
        let label = builder.em.new_label();
        builder.labels.insert(block.address, label);
    }

    if options.initialize_outputs {
        builder.initialize_outputs();
    }
    if options.prologue {
        builder.emit_prologue();
    }
    let body_start = builder.em.len();

    for block in &program.blocks {
        if let Some(&label) = builder.labels.get(&block.address) {
            builder.em.mark_label(label);
        }
        for inst in &block.instructions {
            builder.lower(inst)?;
        }
    }

    if !builder.em.ends_in_jump() {
        builder.emit_epilogue();
        builder.em.ret();
    }

    let (ops, ids) = builder.em.finish();
    tracing::trace!(ops = ops.len(), body_start, "lowered decoded program");
    Ok(BuiltProgram {
        ops,
        ids,
        body_start,
    })
}

struct Builder<'c, 'a> {
    em: EmitterContext,
    ctx: &'c mut BuildContext<'a>,
    labels: BTreeMap<u64, Operand>,
    options: EmitOptions,
}

fn reg(r: Register) -> Operand {
    if r.is_rz() {
        Operand::Constant(0)
    } else {
        Operand::Register(r)
    }
}

/// Register `index` slots after `base`; ranges starting at `RZ` stay on `RZ`.
fn reg_at(base: Register, index: u32) -> Register {
    if base.is_rz() {
        return base;
    }
    match u8::try_from(u32::from(base.0) + index) {
        Ok(n) if n != Register::RZ.0 => Register(n),
        _ => Register::RZ,
    }
}

fn pred(p: Predicate) -> Operand {
    if p.is_pt() {
        Operand::Constant(1)
    } else {
        Operand::Predicate(p)
    }
}

fn src(s: Src) -> Operand {
    match s {
        Src::Register(r) => reg(r),
        Src::Immediate(value) => Operand::Constant(value),
        Src::ConstantBuffer { slot, offset } => Operand::ConstantBuffer {
            slot,
            offset: offset / 4,
        },
    }
}

fn float(value: f32) -> Operand {
    Operand::const_f32(value)
}

impl<'a> Builder<'_, 'a> {
    fn definitions(&self) -> &'a ShaderDefinitions {
        self.ctx.definitions
    }

    fn dest(&mut self, r: Register) -> Operand {
        if r.is_rz() {
            self.em.local()
        } else {
            Operand::Register(r)
        }
    }

    fn dest_pred(&mut self, p: Predicate) -> Operand {
        if p.is_pt() {
            self.em.local()
        } else {
            Operand::Predicate(p)
        }
    }

    fn io(
        &self,
        storage_kind: StorageKind,
        variable: IoVariable,
        location: Operand,
        vertex: Operand,
        component: Operand,
    ) -> Vec<Operand> {
        io_sources(
            self.definitions(),
            storage_kind,
            variable,
            location,
            vertex,
            component,
        )
    }

    fn lower(&mut self, inst: &DecodedInstruction) -> Result<(), BuildError> {
        if let DecodedOp::Bra { target } = inst.op {
            return self.lower_branch(inst, target);
        }

        if !inst.is_predicated() {
            return self.lower_op(inst);
        }

        let skip = self.em.new_label();
        let cond = pred(inst.predicate);
        if inst.predicate_inverted {
            self.em.branch_if_true(skip, cond);
        } else {
            self.em.branch_if_false(skip, cond);
        }
        self.lower_op(inst)?;
        self.em.mark_label(skip);
        Ok(())
    }

    /// A predicated branch becomes a conditional branch instead of being skipped over.
    fn lower_branch(&mut self, inst: &DecodedInstruction, target: u64) -> Result<(), BuildError> {
        let label = *self
            .labels
            .get(&target)
            .ok_or_else(|| err(inst, format!("branch target {target:#x} is not a block start")))?;
        if inst.is_predicated() {
            let cond = pred(inst.predicate);
            if inst.predicate_inverted {
                self.em.branch_if_false(label, cond);
            } else {
                self.em.branch_if_true(label, cond);
            }
        } else {
            self.em.branch(label);
        }
        Ok(())
    }

    fn binary(&mut self, dest: Register, inst: Instruction, a: Operand, b: Operand) {
        let dest = self.dest(dest);
        self.em.assign(dest, inst, vec![a, b]);
    }

    fn unary(&mut self, dest: Register, inst: Instruction, a: Operand) {
        let dest = self.dest(dest);
        self.em.assign(dest, inst, vec![a]);
    }

    fn lower_op(&mut self, inst: &DecodedInstruction) -> Result<(), BuildError> {
        match &inst.op {
            DecodedOp::Nop => {}
            DecodedOp::Mov { dest, src: s } => self.unary(*dest, Instruction::Copy, src(*s)),
            DecodedOp::Sel {
                dest,
                a,
                b,
                pred: p,
                pred_inverted,
            } => {
                let mut cond = pred(*p);
                if *pred_inverted {
                    cond = self.em.value(Instruction::LogicalNot, vec![cond]);
                }
                let dest = self.dest(*dest);
                self.em.assign(
                    dest,
                    Instruction::ConditionalSelect(NumType::U32),
                    vec![cond, reg(*a), src(*b)],
                );
            }
            DecodedOp::FAdd {
                dest,
                a,
                b,
                negate_b,
            } => {
                let inst = if *negate_b {
                    Instruction::Subtract(NumType::F32)
                } else {
                    Instruction::Add(NumType::F32)
                };
                self.binary(*dest, inst, reg(*a), src(*b));
            }
            DecodedOp::FMul { dest, a, b } => {
                self.binary(*dest, Instruction::Multiply(NumType::F32), reg(*a), src(*b));
            }
            DecodedOp::FFma { dest, a, b, c } => {
                let dest = self.dest(*dest);
                self.em.assign(
                    dest,
                    Instruction::FusedMultiplyAdd,
                    vec![reg(*a), src(*b), reg(*c)],
                );
            }
            DecodedOp::FMnMx { dest, a, b, min } => {
                let inst = if *min {
                    Instruction::Minimum(NumType::F32)
                } else {
                    Instruction::Maximum(NumType::F32)
                };
                self.binary(*dest, inst, reg(*a), src(*b));
            }
            DecodedOp::IAdd {
                dest,
                a,
                b,
                negate_b,
            } => {
                let inst = if *negate_b {
                    Instruction::Subtract(NumType::U32)
                } else {
                    Instruction::Add(NumType::U32)
                };
                self.binary(*dest, inst, reg(*a), src(*b));
            }
            DecodedOp::IMul { dest, a, b } => {
                self.binary(*dest, Instruction::Multiply(NumType::U32), reg(*a), src(*b));
            }
            DecodedOp::IMulHi { dest, a, b, signed } => {
                let inst = if *signed {
                    Instruction::MultiplyHighS32
                } else {
                    Instruction::MultiplyHighU32
                };
                self.binary(*dest, inst, reg(*a), src(*b));
            }
            DecodedOp::Lop { dest, a, b, op } => {
                let inst = match op {
                    LogicOp::And => Instruction::BitwiseAnd,
                    LogicOp::Or => Instruction::BitwiseOr,
                    LogicOp::Xor => Instruction::BitwiseExclusiveOr,
                };
                self.binary(*dest, inst, reg(*a), src(*b));
            }
            DecodedOp::Shl { dest, a, b } => {
                self.binary(*dest, Instruction::ShiftLeft, reg(*a), src(*b));
            }
            DecodedOp::Shr { dest, a, b, signed } => {
                let inst = if *signed {
                    Instruction::ShiftRightS32
                } else {
                    Instruction::ShiftRightU32
                };
                self.binary(*dest, inst, reg(*a), src(*b));
            }
            DecodedOp::Popc { dest, src: s } => self.unary(*dest, Instruction::BitCount, src(*s)),
            DecodedOp::I2F {
                dest,
                src: s,
                signed,
            } => {
                let inst = if *signed {
                    Instruction::ConvertS32ToFP32
                } else {
                    Instruction::ConvertU32ToFP32
                };
                self.unary(*dest, inst, src(*s));
            }
            DecodedOp::F2I {
                dest,
                src: s,
                signed,
            } => {
                let inst = if *signed {
                    Instruction::ConvertFP32ToS32
                } else {
                    Instruction::ConvertFP32ToU32
                };
                self.unary(*dest, inst, src(*s));
            }
            DecodedOp::ISetP {
                dest,
                a,
                b,
                cmp,
                signed,
            } => {
                let ty = if *signed { NumType::S32 } else { NumType::U32 };
                let dest = self.dest_pred(*dest);
                self.em
                    .assign(dest, Instruction::Compare(*cmp, ty), vec![reg(*a), src(*b)]);
            }
            DecodedOp::FSetP { dest, a, b, cmp } => {
                let dest = self.dest_pred(*dest);
                self.em.assign(
                    dest,
                    Instruction::Compare(*cmp, NumType::F32),
                    vec![reg(*a), src(*b)],
                );
            }
            DecodedOp::Ald {
                dest,
                count,
                address,
                vertex,
                offset,
                per_patch,
                output,
            } => {
                for index in 0..u32::from(*count) {
                    let dest = self.dest(reg_at(*dest, index));
                    let storage_kind = match (*output, *per_patch) {
                        (false, false) => StorageKind::Input,
                        (false, true) => StorageKind::InputPerPatch,
                        (true, false) => StorageKind::Output,
                        (true, true) => StorageKind::OutputPerPatch,
                    };
                    match self.attribute_sources(
                        storage_kind,
                        address + index * 4,
                        *vertex,
                        *offset,
                    ) {
                        Some(sources) => self.em.load_into(dest, storage_kind, sources),
                        None => self.em.copy(dest, Operand::Constant(0)),
                    }
                }
            }
            DecodedOp::Ast {
                src: value,
                count,
                address,
                vertex,
                offset,
                per_patch,
            } => {
                let storage_kind = if *per_patch {
                    StorageKind::OutputPerPatch
                } else {
                    StorageKind::Output
                };
                for index in 0..u32::from(*count) {
                    if let Some(mut sources) =
                        self.attribute_sources(storage_kind, address + index * 4, *vertex, *offset)
                    {
                        sources.push(reg(reg_at(*value, index)));
                        self.em.store(storage_kind, sources);
                    }
                }
            }
            DecodedOp::Ipa {
                dest,
                address,
                offset,
            } => {
                let dest = self.dest(*dest);
                match self.attribute_sources(StorageKind::Input, *address, None, *offset) {
                    Some(sources) => self.em.load_into(dest, StorageKind::Input, sources),
                    None => self.em.copy(dest, Operand::Constant(0)),
                }
            }
            DecodedOp::S2R { dest, system } => {
                let (variable, component) = system.io_variable();
                let sources = self.io(
                    StorageKind::Input,
                    variable,
                    Operand::Constant(0),
                    Operand::Constant(0),
                    Operand::Constant(component.unwrap_or(0)),
                );
                let dest = self.dest(*dest);
                self.em.load_into(dest, StorageKind::Input, sources);
            }
            DecodedOp::Ld {
                dest,
                count,
                space,
                address,
                offset,
            } => {
                for index in 0..u32::from(*count) {
                    let (storage_kind, sources) =
                        self.memory_sources(inst, *space, *address, *offset, index)?;
                    let dest = self.dest(reg_at(*dest, index));
                    self.em.load_into(dest, storage_kind, sources);
                }
            }
            DecodedOp::St {
                src: value,
                count,
                space,
                address,
                offset,
            } => {
                for index in 0..u32::from(*count) {
                    let (storage_kind, mut sources) =
                        self.memory_sources(inst, *space, *address, *offset, index)?;
                    sources.push(reg(reg_at(*value, index)));
                    self.em.store(storage_kind, sources);
                }
            }
            DecodedOp::Tex {
                dest,
                mask,
                handle,
                sampler_type,
                coords,
                lod,
                fetch,
            } => {
                let binding =
                    self.ctx
                        .resources
                        .get_texture_binding(*handle, *sampler_type, NumType::F32);
                let mut flags = TextureFlags::empty();
                if *fetch {
                    flags |= TextureFlags::INT_COORDS;
                }
                let mut sources: Vec<Operand> = coords.iter().map(|&r| reg(r)).collect();
                if let Some(lod) = lod {
                    flags |= TextureFlags::LOD_LEVEL;
                    sources.push(reg(*lod));
                }

                let mut written = 0;
                for component in 0..4u8 {
                    if mask & (1 << component) == 0 {
                        continue;
                    }
                    let dest = self.dest(reg_at(*dest, written));
                    written += 1;
                    self.em.assign(
                        dest,
                        Instruction::TextureSample(TextureOp {
                            binding,
                            sampler_type: *sampler_type,
                            flags,
                            component,
                            result: NumType::F32,
                        }),
                        sources.clone(),
                    );
                }
            }
            DecodedOp::Suld {
                dest,
                mask,
                handle,
                sampler_type,
                coords,
            } => {
                let binding =
                    self.ctx
                        .resources
                        .get_image_binding(*handle, *sampler_type, NumType::U32);
                let sources: Vec<Operand> = coords.iter().map(|&r| reg(r)).collect();
                let mut written = 0;
                for component in 0..4u8 {
                    if mask & (1 << component) == 0 {
                        continue;
                    }
                    let dest = self.dest(reg_at(*dest, written));
                    written += 1;
                    self.em.assign(
                        dest,
                        Instruction::ImageLoad(image_op(binding, *sampler_type, component)),
                        sources.clone(),
                    );
                }
            }
            DecodedOp::Sust {
                values,
                handle,
                sampler_type,
                coords,
            } => {
                let binding =
                    self.ctx
                        .resources
                        .get_image_binding(*handle, *sampler_type, NumType::U32);
                let mut sources: Vec<Operand> = coords.iter().map(|&r| reg(r)).collect();
                sources.extend((0..4).map(|c| reg(reg_at(*values, c))));
                self.em.emit(Operation::new(
                    Instruction::ImageStore(image_op(binding, *sampler_type, 0)),
                    None,
                    sources,
                ));
            }
            DecodedOp::Shfl {
                dest,
                value,
                index,
                mask,
                mode,
            } => {
                let inst = match mode {
                    ShuffleMode::Index => Instruction::Shuffle,
                    ShuffleMode::Up => Instruction::ShuffleUp,
                    ShuffleMode::Down => Instruction::ShuffleDown,
                    ShuffleMode::Butterfly => Instruction::ShuffleXor,
                };
                let dest = self.dest(*dest);
                self.em
                    .assign(dest, inst, vec![reg(*value), src(*index), src(*mask)]);
            }
            DecodedOp::FSwzAdd { dest, a, b, mask } => {
                let dest = self.dest(*dest);
                self.em.assign(
                    dest,
                    Instruction::SwizzleAdd,
                    vec![reg(*a), reg(*b), Operand::Constant(*mask)],
                );
            }
            DecodedOp::Bar => self
                .em
                .emit(Operation::new(Instruction::Barrier, None, Vec::new())),
            DecodedOp::Bra { target } => return self.lower_branch(inst, *target),
            DecodedOp::Exit => {
                self.emit_epilogue();
                self.em.ret();
            }
            DecodedOp::Kil => self
                .em
                .emit(Operation::new(Instruction::Discard, None, Vec::new())),
            DecodedOp::Out { emit, cut } => {
                if *emit {
                    self.em.emit_vertex();
                }
                if *cut {
                    self.em.end_primitive();
                }
            }
        }
        Ok(())
    }

    /// Sources of the attribute access at byte `address`, or `None` (after logging) when the
    /// address does not name anything the translator models.
    fn attribute_sources(
        &mut self,
        storage_kind: StorageKind,
        address: u32,
        vertex: Option<Register>,
        offset: Option<Register>,
    ) -> Option<Vec<Operand>> {
        let is_output = storage_kind.is_output();
        let per_patch = storage_kind.is_per_patch();
        let stage = self.definitions().original_stage;

        let vertex = match vertex {
            Some(r) => reg(r),
            None if is_output && stage.has_arrayed_outputs() => self.em.load(
                StorageKind::Input,
                vec![IoVariable::InvocationId.operand()],
            ),
            None => Operand::Constant(0),
        };

        if let Some(offset) = offset {
            // Dynamically indexed generic attribute.
            let byte = self.em.iadd(reg(offset), Operand::Constant(address));
            let slot = self
                .em
                .value(Instruction::ShiftRightU32, vec![byte, Operand::Constant(4)]);
            let location = self
                .em
                .isub(slot, Operand::Constant(USER_ATTRIBUTE_BASE >> 4));
            let word = self
                .em
                .value(Instruction::ShiftRightU32, vec![byte, Operand::Constant(2)]);
            let component = self
                .em
                .value(Instruction::BitwiseAnd, vec![word, Operand::Constant(3)]);
            return Some(self.io(
                storage_kind,
                IoVariable::UserDefined,
                location,
                vertex,
                component,
            ));
        }

        match attribute::resolve(address, stage, is_output, per_patch) {
            Some(AttributeTarget::User {
                location,
                component,
            }) => Some(self.io(
                storage_kind,
                IoVariable::UserDefined,
                Operand::Constant(location),
                vertex,
                Operand::Constant(component),
            )),
            Some(AttributeTarget::Builtin {
                variable,
                component,
            }) => Some(self.io(
                storage_kind,
                variable,
                Operand::Constant(0),
                vertex,
                Operand::Constant(component.unwrap_or(0)),
            )),
            None => {
                let direction = if is_output { "output" } else { "input" };
                self.ctx.gpu_accessor.log(&format!(
                    "Invalid {direction} attribute offset 0x{address:x}."
                ));
                None
            }
        }
    }

    fn memory_sources(
        &mut self,
        inst: &DecodedInstruction,
        space: MemorySpace,
        address: Register,
        offset: i32,
        word: u32,
    ) -> Result<(StorageKind, Vec<Operand>), BuildError> {
        let byte_offset = (offset as u32).wrapping_add(word * 4);
        let index = if address.is_rz() {
            Operand::Constant(byte_offset >> 2)
        } else {
            let byte = self.em.iadd(reg(address), Operand::Constant(byte_offset));
            self.em
                .value(Instruction::ShiftRightU32, vec![byte, Operand::Constant(2)])
        };

        match space {
            MemorySpace::Local => {
                let id = self
                    .ctx
                    .resources
                    .current_local_memory()
                    .ok_or_else(|| err(inst, "local memory is not declared"))?;
                Ok((StorageKind::LocalMemory, vec![Operand::Constant(id), index]))
            }
            MemorySpace::Shared => {
                let id = self
                    .ctx
                    .resources
                    .current_shared_memory()
                    .ok_or_else(|| err(inst, "shared memory is not declared"))?;
                Ok((StorageKind::SharedMemory, vec![Operand::Constant(id), index]))
            }
            MemorySpace::Global { slot } => {
                let binding = self.ctx.resources.get_storage_buffer_binding(slot);
                Ok((
                    StorageKind::StorageBuffer,
                    vec![Operand::Constant(binding), Operand::Constant(0), index],
                ))
            }
        }
    }

    fn initialize_outputs(&mut self) {
        let defs = self.definitions();
        if !defs.original_stage.is_vtg()
            || defs.original_stage == ShaderStage::TessellationControl
            || defs.gp_passthrough
        {
            return;
        }

        let values = [float(0.0), float(0.0), float(0.0), float(1.0)];
        for (component, value) in values.into_iter().enumerate() {
            let mut sources = self.io(
                StorageKind::Output,
                IoVariable::Position,
                Operand::Constant(0),
                Operand::Constant(0),
                Operand::Constant(component as u32),
            );
            sources.push(value);
            self.em.store(StorageKind::Output, sources);
        }

        let used = self.ctx.usage.attributes.used_output_attributes;
        for location in 0..USER_ATTRIBUTES_COUNT {
            if used & (1 << location) == 0 {
                continue;
            }
            for (component, value) in values.into_iter().enumerate() {
                let mut sources = self.io(
                    StorageKind::Output,
                    IoVariable::UserDefined,
                    Operand::Constant(location),
                    Operand::Constant(0),
                    Operand::Constant(component as u32),
                );
                sources.push(value);
                self.em.store(StorageKind::Output, sources);
            }
        }
    }

    fn emit_prologue(&mut self) {
        let defs = self.definitions();
        if defs.vertex_as_compute {
            match defs.original_stage {
                ShaderStage::Vertex => self.emit_vertex_as_compute_prologue(),
                ShaderStage::Geometry => self.emit_geometry_as_compute_prologue(),
                _ => {}
            }
        }

        let defs = self.definitions();
        if defs.original_stage == ShaderStage::Geometry && defs.gp_passthrough {
            if let Some(attr) = self.ctx.layer_input_attribute {
                let location = (attr.saturating_sub(USER_ATTRIBUTE_BASE)) >> 4;
                let component = (attr >> 2) & 3;
                let sources = self.io(
                    StorageKind::Input,
                    IoVariable::UserDefined,
                    Operand::Constant(location),
                    Operand::Constant(0),
                    Operand::Constant(component),
                );
                let layer = self.em.load(StorageKind::Input, sources);
                self.em
                    .store(StorageKind::Output, vec![IoVariable::Layer.operand(), layer]);
            }
        }
    }

    fn global_invocation_id(&mut self, component: u32) -> Operand {
        self.em.load(
            StorageKind::Input,
            vec![
                IoVariable::GlobalInvocationId.operand(),
                Operand::Constant(component),
            ],
        )
    }

    fn vertex_info(&mut self, field: u32, component: u32) -> Operand {
        let binding = self
            .ctx
            .resources
            .reservations()
            .vertex_info_constant_buffer_binding;
        self.em.load(
            StorageKind::ConstantBuffer,
            vec![
                Operand::Constant(binding),
                Operand::Constant(field),
                Operand::Constant(component),
            ],
        )
    }

    /// Returns early from invocations whose `value` is not below `limit`.
    fn return_unless_below(&mut self, value: Operand, limit: Operand) {
        let outside = self
            .em
            .compare(CompareOp::GreaterOrEqual, NumType::U32, value, limit);
        let inside = self.em.new_label();
        self.em.branch_if_false(inside, outside);
        self.em.ret();
        self.em.mark_label(inside);
    }

    fn emit_vertex_as_compute_prologue(&mut self) {
        let Some(EmulationMemories::Vertex {
            vertex_index_vertex_rate,
            vertex_index_instance_rate,
            ..
        }) = self.ctx.resources.emulation_memories()
        else {
            return;
        };

        let vertex = self.global_invocation_id(0);
        let vertex_count = self.vertex_info(0, 0);
        self.return_unless_below(vertex, vertex_count);

        let instance = self.global_invocation_id(1);
        let instance_count = self.vertex_info(0, 1);
        self.return_unless_below(instance, instance_count);

        let is_indexed_raw = self.vertex_info(1, 3);
        let is_indexed = self.em.compare(
            CompareOp::NotEqual,
            NumType::U32,
            is_indexed_raw,
            Operand::Constant(0),
        );
        let index_base = self.vertex_info(1, 2);
        let index_position = self.em.iadd(index_base, vertex);
        let binding = self
            .ctx
            .resources
            .reservations()
            .index_buffer_texture_binding;
        let fetched = self.em.value(
            Instruction::TextureSample(buffer_fetch(binding)),
            vec![index_position],
        );
        let vertex_rate = self.em.select(NumType::U32, is_indexed, fetched, vertex);

        self.em.store(
            StorageKind::LocalMemory,
            vec![Operand::Constant(vertex_index_vertex_rate), vertex_rate],
        );
        self.em.store(
            StorageKind::LocalMemory,
            vec![Operand::Constant(vertex_index_instance_rate), instance],
        );
    }

    fn emit_geometry_as_compute_prologue(&mut self) {
        let Some(EmulationMemories::Geometry {
            topology_remap,
            output_vertex_count,
            output_index_count,
            ..
        }) = self.ctx.resources.emulation_memories()
        else {
            return;
        };

        let primitive = self.global_invocation_id(0);
        let primitive_count = self.vertex_info(1, 0);
        self.return_unless_below(primitive, primitive_count);

        let instance = self.global_invocation_id(1);
        let instance_count = self.vertex_info(0, 1);
        self.return_unless_below(instance, instance_count);

        let vertices_per_primitive = self.definitions().input_topology.input_vertices();
        let binding = self
            .ctx
            .resources
            .reservations()
            .topology_remap_buffer_texture_binding;
        let first = self
            .em
            .imul(primitive, Operand::Constant(vertices_per_primitive));
        for index in 0..vertices_per_primitive {
            let position = self.em.iadd(first, Operand::Constant(index));
            let vertex = self.em.value(
                Instruction::TextureSample(buffer_fetch(binding)),
                vec![position],
            );
            self.em.store(
                StorageKind::LocalMemory,
                vec![
                    Operand::Constant(topology_remap),
                    Operand::Constant(index),
                    vertex,
                ],
            );
        }

        for counter in [output_vertex_count, output_index_count] {
            self.em.store(
                StorageKind::LocalMemory,
                vec![Operand::Constant(counter), Operand::Constant(0)],
            );
        }
    }

    fn emit_epilogue(&mut self) {
        if !self.options.epilogue {
            return;
        }

        let defs = self.definitions();
        if defs.vertex_as_compute {
            match defs.original_stage {
                ShaderStage::Vertex => self.emit_vertex_as_compute_epilogue(),
                ShaderStage::Geometry => self.emit_geometry_as_compute_epilogue(),
                _ => {}
            }
        }

        if self.transform_feedback_emulated() {
            self.emit_transform_feedback_epilogue();
        }

        if self.definitions().original_stage == ShaderStage::Fragment {
            self.emit_fragment_epilogue();
        }
    }

    fn emit_vertex_as_compute_epilogue(&mut self) {
        let Some(memories) = self.ctx.resources.emulation_memories() else {
            return;
        };
        let reservations = self.ctx.resources.reservations();
        let binding = reservations.vertex_output_storage_buffer_binding;
        let stride = reservations.output_size_per_invocation;

        let vertex_count = self.vertex_info(0, 0);
        let vertex = self.global_invocation_id(0);
        let instance = self.global_invocation_id(1);
        let instance_base = self.em.imul(instance, vertex_count);
        let index = self.em.iadd(instance_base, vertex);
        let base = self.em.imul(index, Operand::Constant(stride));

        for offset in 0..stride {
            let value = self.em.load(
                StorageKind::LocalMemory,
                vec![
                    Operand::Constant(memories.vertex_data()),
                    Operand::Constant(offset),
                ],
            );
            let position = self.em.iadd(base, Operand::Constant(offset));
            self.em.store(
                StorageKind::StorageBuffer,
                vec![
                    Operand::Constant(binding),
                    Operand::Constant(0),
                    position,
                    value,
                ],
            );
        }
    }

    /// Pads the primitive's index range with restart indices.
    fn emit_geometry_as_compute_epilogue(&mut self) {
        let Some(EmulationMemories::Geometry {
            output_index_count,
            ..
        }) = self.ctx.resources.emulation_memories()
        else {
            return;
        };
        let binding = self
            .ctx
            .resources
            .reservations()
            .geometry_index_output_storage_buffer_binding;
        let stride = self.definitions().geometry_output_index_buffer_stride();

        let head = self.em.new_label();
        let end = self.em.new_label();
        self.em.mark_label(head);
        let count = self.em.load(
            StorageKind::LocalMemory,
            vec![Operand::Constant(output_index_count)],
        );
        let done = self.em.compare(
            CompareOp::GreaterOrEqual,
            NumType::U32,
            count,
            Operand::Constant(stride),
        );
        self.em.branch_if_true(end, done);

        let primitive = self
            .em
            .load(StorageKind::Input, vec![IoVariable::PrimitiveId.operand()]);
        let base = self.em.imul(primitive, Operand::Constant(stride));
        let index = self.em.iadd(base, count);
        self.em.store(
            StorageKind::StorageBuffer,
            vec![
                Operand::Constant(binding),
                Operand::Constant(0),
                index,
                Operand::Constant(u32::MAX),
            ],
        );
        let next = self.em.iadd(count, Operand::Constant(1));
        self.em.store(
            StorageKind::LocalMemory,
            vec![Operand::Constant(output_index_count), next],
        );
        self.em.branch(head);
        self.em.mark_label(end);
    }

    fn transform_feedback_emulated(&self) -> bool {
        let defs = self.definitions();
        defs.original_stage == ShaderStage::Vertex
            && defs.last_in_vertex_pipeline
            && defs.transform_feedback_enabled()
            && !self
                .ctx
                .gpu_accessor
                .host_capabilities()
                .supports_transform_feedback
            && self.ctx.gpu_accessor.query_transform_feedback_enabled()
            && self
                .ctx
                .resources
                .reservations()
                .transform_feedback_info_binding
                .is_some()
    }

    /// Writes the captured outputs of this vertex to the emulated transform feedback buffers.
    fn emit_transform_feedback_epilogue(&mut self) {
        let reservations = self.ctx.resources.reservations().clone();
        let Some(info) = reservations.transform_feedback_info_binding else {
            return;
        };
        self.ctx.features |= FeatureFlags::DRAW_PARAMETERS;

        let vertex_count = self.em.load(
            StorageKind::StorageBuffer,
            vec![Operand::Constant(info), Operand::Constant(1)],
        );

        let buffers = self.definitions().transform_feedback.clone();
        for (index, buffer) in buffers.iter().enumerate() {
            let Some(binding) = reservations.transform_feedback_buffer_binding(index as u32) else {
                continue;
            };
            if index as u32 >= crate::resources::TRANSFORM_FEEDBACK_BUFFERS {
                break;
            }

            let base_offset = self.em.load(
                StorageKind::StorageBuffer,
                vec![
                    Operand::Constant(info),
                    Operand::Constant(0),
                    Operand::Constant(index as u32),
                ],
            );
            let base_vertex = self
                .em
                .load(StorageKind::Input, vec![IoVariable::BaseVertex.operand()]);
            let base_instance = self
                .em
                .load(StorageKind::Input, vec![IoVariable::BaseInstance.operand()]);
            let vertex = self
                .em
                .load(StorageKind::Input, vec![IoVariable::VertexIndex.operand()]);
            let instance = self
                .em
                .load(StorageKind::Input, vec![IoVariable::InstanceIndex.operand()]);

            let instance = self.em.isub(instance, base_instance);
            let vertex = self.em.isub(vertex, base_vertex);
            let instance_base = self.em.imul(instance, vertex_count);
            let captured = self.em.iadd(instance_base, vertex);
            let words = self.em.imul(captured, Operand::Constant(buffer.stride / 4));
            let base = self.em.iadd(base_offset, words);

            for (slot, &location) in buffer.varying_locations.iter().enumerate() {
                if location == 0xff {
                    continue;
                }
                let address = u32::from(location) * 4;
                let stage = self.definitions().original_stage;
                let sources = match attribute::resolve(address, stage, true, false) {
                    Some(AttributeTarget::User {
                        location,
                        component,
                    }) => self.io(
                        StorageKind::Output,
                        IoVariable::UserDefined,
                        Operand::Constant(location),
                        Operand::Constant(0),
                        Operand::Constant(component),
                    ),
                    Some(AttributeTarget::Builtin {
                        variable,
                        component,
                    }) => self.io(
                        StorageKind::Output,
                        variable,
                        Operand::Constant(0),
                        Operand::Constant(0),
                        Operand::Constant(component.unwrap_or(0)),
                    ),
                    None => continue,
                };
                let value = self.em.load(StorageKind::Output, sources);
                let position = self.em.iadd(base, Operand::Constant(slot as u32));
                self.em.store(
                    StorageKind::StorageBuffer,
                    vec![
                        Operand::Constant(binding),
                        Operand::Constant(0),
                        position,
                        value,
                    ],
                );
            }
        }
    }

    /// Copies the color registers the output map enables to the fragment outputs.
    fn emit_fragment_epilogue(&mut self) {
        let defs = self.definitions();
        let omap = defs.omap_targets;
        let omap_depth = defs.omap_depth;

        let mut next_register = 0u32;
        for render_target in 0..8 {
            for component in 0..4 {
                if !self.definitions().omap_target_enabled(render_target, component) {
                    continue;
                }
                self.em.store(
                    StorageKind::Output,
                    vec![
                        IoVariable::FragmentOutputColor.operand(),
                        Operand::Constant(render_target),
                        Operand::Constant(component),
                        reg(reg_at(Register(0), next_register)),
                    ],
                );
                next_register += 1;
            }
        }

        if omap_depth {
            let depth = reg_at(Register(0), omap.count_ones() + 1);
            self.em.store(
                StorageKind::Output,
                vec![IoVariable::FragmentOutputDepth.operand(), reg(depth)],
            );
        }
    }
}

fn image_op(binding: u32, sampler_type: SamplerType, component: u8) -> ImageOp {
    ImageOp {
        binding,
        sampler_type,
        component,
        format: NumType::U32,
    }
}

fn buffer_fetch(binding: u32) -> TextureOp {
    TextureOp {
        binding,
        sampler_type: SamplerType::TextureBuffer,
        flags: TextureFlags::INT_COORDS,
        component: 0,
        result: NumType::U32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedBlock;
    use crate::gpu_accessor::DefaultGpuAccessor;
    use crate::resources::ResourceReservations;
    use crate::types::TargetApi;
    use pretty_assertions::assert_eq;

    fn build(
        definitions: &ShaderDefinitions,
        instructions: Vec<DecodedInstruction>,
    ) -> Result<BuiltProgram, BuildError> {
        let program = DecodedProgram {
            blocks: vec![DecodedBlock {
                address: 0,
                instructions,
            }],
            local_memory_size: 0,
        };
        let usage = program.scan_usage(definitions.stage);
        let mut resources = ResourceManager::new(
            definitions.stage,
            TargetApi::OpenGl,
            ResourceReservations::default(),
        );
        let mut ctx = BuildContext {
            definitions,
            resources: &mut resources,
            gpu_accessor: &DefaultGpuAccessor,
            usage: &usage,
            features: FeatureFlags::empty(),
            layer_input_attribute: None,
        };
        build_program(&program, &mut ctx, IdAllocator::default(), EmitOptions::default())
    }

    fn insts(ops: &[Operation]) -> Vec<&'static str> {
        ops.iter().map(|op| op.inst.name()).collect()
    }

    #[test]
    fn predicated_instruction_is_skipped_with_a_branch() {
        let defs = ShaderDefinitions::compute(1, 1, 1);
        let built = build(
            &defs,
            vec![
                DecodedInstruction::new(
                    0,
                    DecodedOp::Mov {
                        dest: Register(1),
                        src: Src::Immediate(7),
                    },
                )
                .predicated(Predicate(2), true),
                DecodedInstruction::new(8, DecodedOp::Exit),
            ],
        )
        .unwrap();

        assert_eq!(
            insts(&built.ops),
            vec!["MarkLabel", "BranchIfTrue", "Copy", "MarkLabel", "Return"]
        );
        assert_eq!(built.ops[1].sources[1], Operand::Predicate(Predicate(2)));
    }

    #[test]
    fn rz_destination_gets_a_fresh_local() {
        let defs = ShaderDefinitions::compute(1, 1, 1);
        let built = build(
            &defs,
            vec![DecodedInstruction::new(
                0,
                DecodedOp::IAdd {
                    dest: Register::RZ,
                    a: Register::RZ,
                    b: Src::ConstantBuffer {
                        slot: 1,
                        offset: 0x14,
                    },
                    negate_b: false,
                },
            )],
        )
        .unwrap();

        let add = &built.ops[1];
        assert!(matches!(add.dest, Some(Operand::Local(_))));
        assert_eq!(
            add.sources,
            vec![
                Operand::Constant(0),
                Operand::ConstantBuffer { slot: 1, offset: 5 }
            ]
        );
        // No explicit exit: a return is appended.
        assert_eq!(built.ops.last().map(|op| op.inst), Some(Instruction::Return));
    }

    #[test]
    fn unknown_branch_target_is_an_error() {
        let defs = ShaderDefinitions::compute(1, 1, 1);
        let error = build(
            &defs,
            vec![DecodedInstruction::new(0x10, DecodedOp::Bra { target: 0x80 })],
        )
        .unwrap_err();
        assert_eq!(error.address, 0x10);
        assert_eq!(error.opcode, "BRA");
        assert_eq!(
            error.to_string(),
            "IR build error at address 0x10, opcode BRA: branch target 0x80 is not a block start"
        );
    }

    #[test]
    fn vertex_outputs_are_initialized_before_the_body() {
        let defs = ShaderDefinitions::new(ShaderStage::Vertex);
        let built = build(
            &defs,
            vec![DecodedInstruction::new(
                0,
                DecodedOp::Ast {
                    src: Register(0),
                    count: 1,
                    address: 0x090,
                    vertex: None,
                    offset: None,
                    per_patch: false,
                },
            )],
        )
        .unwrap();

        // Position plus location 1, four components each.
        assert_eq!(built.body_start, 8);
        assert_eq!(
            built.ops[3].sources,
            vec![
                IoVariable::Position.operand(),
                Operand::Constant(3),
                Operand::const_f32(1.0)
            ]
        );
        let store = &built.ops[built.body_start + 1];
        assert_eq!(
            store.sources,
            vec![
                IoVariable::UserDefined.operand(),
                Operand::Constant(1),
                Operand::Constant(0),
                Operand::Register(Register(0))
            ]
        );
    }

    #[test]
    fn local_memory_without_declaration_fails() {
        let defs = ShaderDefinitions::compute(1, 1, 1);
        let error = build(
            &defs,
            vec![DecodedInstruction::new(
                0x18,
                DecodedOp::Ld {
                    dest: Register(0),
                    count: 1,
                    space: MemorySpace::Local,
                    address: Register::RZ,
                    offset: 4,
                },
            )],
        )
        .unwrap_err();
        assert_eq!(error.message, "local memory is not declared");
    }
}
