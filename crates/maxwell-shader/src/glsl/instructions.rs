//! Statements and expressions of `main`.

use std::collections::{BTreeSet, HashMap};

use crate::ir::{
    Function, ImageOp, Instruction, LocalId, NumType, Operand, Operation, SamplerType,
    StorageKind, TextureFlags, TextureOp,
};
use crate::structured::AstNode;

use super::io::{io_type, IoAccess};
use super::number_formatter::{format_float, format_int, format_uint};
use super::{Codegen, CodegenError, CodegenInput, GlslWriter, VarType};

const SWIZZLE: [&str; 4] = ["x", "y", "z", "w"];

/// Assigns every local the type of the operation defining it.
///
/// Copies take the type of their source, which may be defined later in block order, so the
/// assignment is repeated until nothing changes.
pub(super) fn infer_local_types(
    function: &Function,
    input: &CodegenInput<'_>,
) -> HashMap<LocalId, VarType> {
    let mut types = HashMap::new();
    let max_rounds = function.locals_allocated() as usize + 1;

    for _ in 0..max_rounds {
        let mut changed = false;
        for (_, id) in function.all_ops() {
            let op = function.op(id);
            let Some(Operand::Local(local)) = op.dest else {
                continue;
            };
            let ty = result_type(op, input, &types);
            if types.insert(local, ty) != Some(ty) {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    types
}

fn operand_type(operand: Operand, types: &HashMap<LocalId, VarType>) -> VarType {
    match operand {
        Operand::Predicate(_) => VarType::Bool,
        Operand::Local(local) => types.get(&local).copied().unwrap_or(VarType::U32),
        Operand::Undefined => VarType::S32,
        Operand::Constant(_)
        | Operand::ConstantBuffer { .. }
        | Operand::Register(_)
        | Operand::Variable(_)
        | Operand::Label(_) => VarType::U32,
    }
}

fn result_type(
    op: &Operation,
    input: &CodegenInput<'_>,
    types: &HashMap<LocalId, VarType>,
) -> VarType {
    match op.inst {
        Instruction::Copy => op
            .source(0)
            .map(|source| operand_type(source, types))
            .unwrap_or(VarType::U32),
        Instruction::Add(ty)
        | Instruction::Subtract(ty)
        | Instruction::Multiply(ty)
        | Instruction::Divide(ty)
        | Instruction::Negate(ty)
        | Instruction::Absolute(ty)
        | Instruction::Minimum(ty)
        | Instruction::Maximum(ty)
        | Instruction::ConditionalSelect(ty) => ty.into(),
        Instruction::FusedMultiplyAdd
        | Instruction::ConvertS32ToFP32
        | Instruction::ConvertU32ToFP32
        | Instruction::Shuffle
        | Instruction::ShuffleDown
        | Instruction::ShuffleUp
        | Instruction::ShuffleXor
        | Instruction::SwizzleAdd => VarType::F32,
        Instruction::BitCount
        | Instruction::ShiftRightS32
        | Instruction::ConvertFP32ToS32
        | Instruction::MultiplyHighS32 => VarType::S32,
        Instruction::Compare(..)
        | Instruction::LogicalAnd
        | Instruction::LogicalOr
        | Instruction::LogicalExclusiveOr
        | Instruction::LogicalNot => VarType::Bool,
        Instruction::Load => load_type(op, input),
        Instruction::TextureSample(texture) => texture.result.into(),
        Instruction::ImageLoad(image) => image.format.into(),
        _ => VarType::U32,
    }
}

fn load_type(op: &Operation, input: &CodegenInput<'_>) -> VarType {
    match op.storage_kind {
        StorageKind::ConstantBuffer | StorageKind::StorageBuffer => {
            let binding = op.source(0).and_then(|s| s.as_constant());
            let field = op.source(1).and_then(|s| s.as_constant());
            let definition = match (op.storage_kind, binding) {
                (StorageKind::ConstantBuffer, Some(b)) => input.resources.find_constant_buffer(b),
                (_, Some(b)) => input.resources.find_storage_buffer(b),
                _ => None,
            };
            definition
                .zip(field)
                .and_then(|(d, f)| d.fields.get(f as usize))
                .map(|f| f.ty.num_type().into())
                .unwrap_or(VarType::U32)
        }
        kind if kind.is_io() => IoAccess::parse(input, op)
            .map(|access| io_type(input, kind, &access))
            .unwrap_or(VarType::U32),
        _ => VarType::U32,
    }
}

fn constant(value: u32, ty: VarType) -> String {
    match ty {
        VarType::Bool => (value != 0).to_string(),
        VarType::S32 => format_int(value as i32),
        VarType::U32 => format_uint(value),
        VarType::F32 => format_float(f32::from_bits(value)),
    }
}

/// Reinterprets `expr` from `from` to `to`, keeping the bit pattern for 32-bit types.
pub(super) fn cast(expr: String, from: VarType, to: VarType) -> String {
    match (from, to) {
        _ if from == to => expr,
        (VarType::U32, VarType::S32) => format!("int({expr})"),
        (VarType::S32, VarType::U32) => format!("uint({expr})"),
        (VarType::U32, VarType::F32) => format!("uintBitsToFloat({expr})"),
        (VarType::S32, VarType::F32) => format!("intBitsToFloat({expr})"),
        (VarType::F32, VarType::U32) => format!("floatBitsToUint({expr})"),
        (VarType::F32, VarType::S32) => format!("floatBitsToInt({expr})"),
        (VarType::Bool, VarType::U32) => format!("({expr} ? 0xffffffffu : 0u)"),
        (VarType::Bool, VarType::S32) => format!("({expr} ? -1 : 0)"),
        (VarType::Bool, VarType::F32) => format!("({expr} ? 1.0 : 0.0)"),
        (VarType::U32, VarType::Bool) => format!("({expr} != 0u)"),
        (VarType::S32, VarType::Bool) => format!("({expr} != 0)"),
        (VarType::F32, VarType::Bool) => format!("({expr} != 0.0)"),
        _ => expr,
    }
}

/// `!expr`, parenthesized unless `expr` already is a single term.
fn negate(expr: &str) -> String {
    let simple = expr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || is_parenthesized(expr);
    if simple {
        format!("!{expr}")
    } else {
        format!("!({expr})")
    }
}

fn is_parenthesized(expr: &str) -> bool {
    if !expr.starts_with('(') || !expr.ends_with(')') {
        return false;
    }
    let mut depth = 0usize;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i != expr.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

fn vector(ty: VarType, parts: Vec<String>) -> String {
    if parts.len() == 1 {
        return parts.concat();
    }
    format!("{}({})", ty.vector_name(parts.len() as u32), parts.join(", "))
}

fn binary_operator(inst: Instruction) -> Option<&'static str> {
    Some(match inst {
        Instruction::Add(_) => "+",
        Instruction::Subtract(_) => "-",
        Instruction::Multiply(_) => "*",
        Instruction::Divide(_) => "/",
        Instruction::BitwiseAnd => "&",
        Instruction::BitwiseOr => "|",
        Instruction::BitwiseExclusiveOr => "^",
        Instruction::LogicalAnd => "&&",
        Instruction::LogicalOr => "||",
        Instruction::LogicalExclusiveOr => "^^",
        _ => return None,
    })
}

impl Codegen<'_> {
    fn local_type(&self, local: LocalId) -> VarType {
        self.local_types.get(&local).copied().unwrap_or(VarType::U32)
    }

    /// `operand` in its own type.
    fn operand_value(&self, operand: Operand) -> Result<(String, VarType), CodegenError> {
        Ok(match operand {
            Operand::Constant(value) => (format_uint(value), VarType::U32),
            Operand::Register(r) if r.is_rz() => (format_uint(0), VarType::U32),
            Operand::Register(r) => (format!("r{}", r.0), VarType::U32),
            Operand::Predicate(p) if p.is_pt() => ("true".to_string(), VarType::Bool),
            Operand::Predicate(p) => (format!("p{}", p.0), VarType::Bool),
            Operand::Local(local) => (format!("temp_{}", local.0), self.local_type(local)),
            Operand::Variable(v) => (format!("var_{}", v.0), VarType::U32),
            Operand::ConstantBuffer { slot, offset } => {
                let binding = self.input.resources.reservations().reserved_constant_buffers + slot;
                let name = self
                    .input
                    .resources
                    .constant_buffer_name(binding)
                    .ok_or(CodegenError::UndeclaredResource {
                        kind: "constant buffer",
                        id: slot,
                    })?;
                (
                    format!("{name}.data[{}][{}]", offset / 4, offset % 4),
                    VarType::U32,
                )
            }
            Operand::Undefined => ("undef".to_string(), VarType::S32),
            Operand::Label(_) => return Err(CodegenError::LabelAsValue),
        })
    }

    /// `operand` reinterpreted as `ty`. Constants are spelled directly in the wanted type.
    pub(super) fn operand_as(&self, operand: Operand, ty: VarType) -> Result<String, CodegenError> {
        if let Operand::Constant(value) = operand {
            return Ok(constant(value, ty));
        }
        let (expr, from) = self.operand_value(operand)?;
        Ok(cast(expr, from, ty))
    }

    fn source_as(&self, op: &Operation, index: usize, ty: VarType) -> Result<String, CodegenError> {
        let operand = op.source(index).ok_or(CodegenError::MissingOperand {
            inst: op.inst.name(),
            index,
        })?;
        self.operand_as(operand, ty)
    }

    fn sources_as(
        &self,
        op: &Operation,
        range: std::ops::Range<usize>,
        ty: VarType,
    ) -> Result<Vec<String>, CodegenError> {
        range.map(|index| self.source_as(op, index, ty)).collect()
    }

    fn call(
        &self,
        name: &str,
        op: &Operation,
        types: &[VarType],
    ) -> Result<String, CodegenError> {
        let args = types
            .iter()
            .enumerate()
            .map(|(index, &ty)| self.source_as(op, index, ty))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("{name}({})", args.join(", ")))
    }

    /// Value computed by `op`, in the type it naturally produces.
    fn expression(&self, op: &Operation) -> Result<(String, VarType), CodegenError> {
        use VarType::{Bool, F32, S32, U32};

        let ty = result_type(op, self.input, &self.local_types);
        let expr = match op.inst {
            Instruction::Copy => {
                let source = op.source(0).ok_or(CodegenError::MissingOperand {
                    inst: op.inst.name(),
                    index: 0,
                })?;
                return self.operand_value(source);
            }
            Instruction::Add(t)
            | Instruction::Subtract(t)
            | Instruction::Multiply(t)
            | Instruction::Divide(t) => {
                let operator = binary_operator(op.inst).unwrap_or("+");
                format!(
                    "({} {operator} {})",
                    self.source_as(op, 0, t.into())?,
                    self.source_as(op, 1, t.into())?
                )
            }
            Instruction::Negate(t) => format!("(-{})", self.source_as(op, 0, t.into())?),
            Instruction::Absolute(NumType::U32) => self.source_as(op, 0, U32)?,
            Instruction::Absolute(t) => self.call("abs", op, &[t.into()])?,
            Instruction::Minimum(t) => self.call("min", op, &[t.into(), t.into()])?,
            Instruction::Maximum(t) => self.call("max", op, &[t.into(), t.into()])?,
            Instruction::FusedMultiplyAdd => self.call("fma", op, &[F32, F32, F32])?,
            Instruction::BitwiseAnd | Instruction::BitwiseOr | Instruction::BitwiseExclusiveOr => {
                let operator = binary_operator(op.inst).unwrap_or("&");
                format!(
                    "({} {operator} {})",
                    self.source_as(op, 0, U32)?,
                    self.source_as(op, 1, U32)?
                )
            }
            Instruction::BitwiseNot => format!("(~{})", self.source_as(op, 0, U32)?),
            Instruction::BitCount => self.call("bitCount", op, &[U32])?,
            Instruction::ShiftLeft => format!(
                "({} << {})",
                self.source_as(op, 0, U32)?,
                self.source_as(op, 1, U32)?
            ),
            Instruction::ShiftRightS32 => format!(
                "({} >> {})",
                self.source_as(op, 0, S32)?,
                self.source_as(op, 1, U32)?
            ),
            Instruction::ShiftRightU32 => format!(
                "({} >> {})",
                self.source_as(op, 0, U32)?,
                self.source_as(op, 1, U32)?
            ),
            Instruction::Compare(cmp, t) => format!(
                "({} {} {})",
                self.source_as(op, 0, t.into())?,
                cmp.glsl_operator(),
                self.source_as(op, 1, t.into())?
            ),
            Instruction::LogicalAnd | Instruction::LogicalOr | Instruction::LogicalExclusiveOr => {
                let operator = binary_operator(op.inst).unwrap_or("&&");
                format!(
                    "({} {operator} {})",
                    self.source_as(op, 0, Bool)?,
                    self.source_as(op, 1, Bool)?
                )
            }
            Instruction::LogicalNot => negate(&self.source_as(op, 0, Bool)?),
            Instruction::ConditionalSelect(t) => format!(
                "({} ? {} : {})",
                self.source_as(op, 0, Bool)?,
                self.source_as(op, 1, t.into())?,
                self.source_as(op, 2, t.into())?
            ),
            Instruction::ConvertFP32ToS32 => self.call("int", op, &[F32])?,
            Instruction::ConvertFP32ToU32 => self.call("uint", op, &[F32])?,
            Instruction::ConvertS32ToFP32 => self.call("float", op, &[S32])?,
            Instruction::ConvertU32ToFP32 => self.call("float", op, &[U32])?,
            Instruction::MultiplyHighS32 => self.call("Helper_MultiplyHighS32", op, &[S32, S32])?,
            Instruction::MultiplyHighU32 => self.call("Helper_MultiplyHighU32", op, &[U32, U32])?,
            Instruction::Shuffle => self.call("Helper_Shuffle", op, &[F32, U32, U32])?,
            Instruction::ShuffleDown => self.call("Helper_ShuffleDown", op, &[F32, U32, U32])?,
            Instruction::ShuffleUp => self.call("Helper_ShuffleUp", op, &[F32, U32, U32])?,
            Instruction::ShuffleXor => self.call("Helper_ShuffleXor", op, &[F32, U32, U32])?,
            Instruction::SwizzleAdd => self.call("Helper_SwizzleAdd", op, &[F32, F32, S32])?,
            Instruction::Load => return self.storage_element(op, 0),
            Instruction::TextureSample(texture) => self.texture_sample(op, texture)?,
            Instruction::ImageLoad(image) => {
                let name = self.image_name(image.binding)?;
                let coords = self.image_coords(op, image)?;
                let swizzle = SWIZZLE.get(image.component as usize).unwrap_or(&"x");
                format!("imageLoad({name}, {coords}).{swizzle}")
            }
            inst => return Err(CodegenError::NoValue { inst: inst.name() }),
        };
        Ok((expr, ty))
    }

    fn texture_sample(&self, op: &Operation, texture: TextureOp) -> Result<String, CodegenError> {
        let definition = self.input.resources.find_texture(texture.binding).ok_or(
            CodegenError::UndeclaredResource {
                kind: "texture",
                id: texture.binding,
            },
        )?;
        let count = texture.sampler_type.coordinates();
        let has_lod = texture.flags.contains(TextureFlags::LOD_LEVEL);
        let swizzle = SWIZZLE.get(texture.component as usize).unwrap_or(&"x");
        let buffer = texture.sampler_type == SamplerType::TextureBuffer;

        let call = if texture.flags.contains(TextureFlags::INT_COORDS) || buffer {
            let coords = vector(VarType::S32, self.sources_as(op, 0..count, VarType::S32)?);
            if buffer {
                format!("texelFetch({}, {coords})", definition.name)
            } else {
                let lod = if has_lod {
                    self.source_as(op, count, VarType::S32)?
                } else {
                    "0".to_string()
                };
                format!("texelFetch({}, {coords}, {lod})", definition.name)
            }
        } else {
            let coords = vector(VarType::F32, self.sources_as(op, 0..count, VarType::F32)?);
            if has_lod {
                format!(
                    "textureLod({}, {coords}, {})",
                    definition.name,
                    self.source_as(op, count, VarType::F32)?
                )
            } else {
                format!("texture({}, {coords})", definition.name)
            }
        };
        Ok(format!("{call}.{swizzle}"))
    }

    fn image_name(&self, binding: u32) -> Result<&str, CodegenError> {
        self.input
            .resources
            .find_image(binding)
            .map(|image| image.name.as_str())
            .ok_or(CodegenError::UndeclaredResource { kind: "image", id: binding })
    }

    fn image_coords(&self, op: &Operation, image: ImageOp) -> Result<String, CodegenError> {
        let count = image.sampler_type.coordinates();
        Ok(vector(VarType::S32, self.sources_as(op, 0..count, VarType::S32)?))
    }

    /// Buffer, memory or IO element a `Load`/`Store` addresses, ignoring `trailing` value
    /// operands at the end of the sources.
    fn storage_element(
        &self,
        op: &Operation,
        trailing: usize,
    ) -> Result<(String, VarType), CodegenError> {
        let inst = op.inst.name();
        let end = op.sources.len().saturating_sub(trailing);
        let constant_source = |index: usize| {
            op.source(index)
                .and_then(|s| s.as_constant())
                .ok_or(CodegenError::MissingOperand { inst, index })
        };

        match op.storage_kind {
            StorageKind::ConstantBuffer | StorageKind::StorageBuffer => {
                let binding = constant_source(0)?;
                let field_index = constant_source(1)?;
                let (kind, definition) = if op.storage_kind == StorageKind::ConstantBuffer {
                    ("constant buffer", self.input.resources.find_constant_buffer(binding))
                } else {
                    ("storage buffer", self.input.resources.find_storage_buffer(binding))
                };
                let definition =
                    definition.ok_or(CodegenError::UndeclaredResource { kind, id: binding })?;
                let field = definition.fields.get(field_index as usize).ok_or(
                    CodegenError::UndeclaredResource {
                        kind: "buffer field",
                        id: field_index,
                    },
                )?;

                let mut expr = format!("{}.{}", definition.name, field.name);
                for index in 2..end {
                    expr.push_str(&format!("[{}]", self.source_as(op, index, VarType::U32)?));
                }
                Ok((expr, field.ty.num_type().into()))
            }
            StorageKind::LocalMemory | StorageKind::SharedMemory => {
                let id = constant_source(0)?;
                let (kind, definition) = if op.storage_kind == StorageKind::LocalMemory {
                    ("local memory", self.input.resources.local_memory(id))
                } else {
                    ("shared memory", self.input.resources.shared_memory(id))
                };
                let definition = definition.ok_or(CodegenError::UndeclaredResource { kind, id })?;
                let mut expr = definition.name.clone();
                if end > 1 {
                    expr.push_str(&format!("[{}]", self.source_as(op, 1, VarType::U32)?));
                }
                Ok((expr, VarType::U32))
            }
            kind if kind.is_io() => {
                let access = IoAccess::parse(self.input, op)?;
                let expr = self.io_expression(kind, &access)?;
                Ok((expr, io_type(self.input, kind, &access)))
            }
            storage => Err(CodegenError::InvalidStorage { inst, storage }),
        }
    }

    fn write_assignment(
        &self,
        w: &mut GlslWriter,
        inst: Instruction,
        dest: Operand,
        expr: String,
        ty: VarType,
    ) -> Result<(), CodegenError> {
        let line = match dest {
            Operand::Local(local) => {
                let local_ty = self.local_type(local);
                let value = cast(expr, ty, local_ty);
                if self.predeclared.contains(&local) {
                    format!("temp_{} = {value};", local.0)
                } else {
                    format!("{} temp_{} = {value};", local_ty.scalar_name(), local.0)
                }
            }
            Operand::Register(r) if r.is_rz() => return Ok(()),
            Operand::Register(r) => format!("r{} = {};", r.0, cast(expr, ty, VarType::U32)),
            Operand::Predicate(p) if p.is_pt() => return Ok(()),
            Operand::Predicate(p) => format!("p{} = {};", p.0, cast(expr, ty, VarType::Bool)),
            Operand::Variable(v) => format!("var_{} = {};", v.0, cast(expr, ty, VarType::U32)),
            dest => {
                return Err(CodegenError::InvalidDestination {
                    inst: inst.name(),
                    dest,
                })
            }
        };
        w.line(&line);
        Ok(())
    }

    fn write_op(&self, w: &mut GlslWriter, op: &Operation) -> Result<(), CodegenError> {
        match op.inst {
            Instruction::Store => {
                let (target, ty) = self.storage_element(op, 1)?;
                let value = op.sources.last().copied().ok_or(CodegenError::MissingOperand {
                    inst: op.inst.name(),
                    index: 0,
                })?;
                w.line(&format!("{target} = {};", self.operand_as(value, ty)?));
            }
            Instruction::ImageStore(image) => {
                let name = self.image_name(image.binding)?;
                let coords = self.image_coords(op, image)?;
                let count = image.sampler_type.coordinates();
                let format: VarType = image.format.into();
                let values = vector(format, self.sources_as(op, count..count + 4, format)?);
                w.line(&format!("imageStore({name}, {coords}, {values});"));
            }
            Instruction::Barrier => w.line("barrier();"),
            Instruction::Discard => w.line("discard;"),
            Instruction::EmitVertex => w.line("EmitVertex();"),
            Instruction::EndPrimitive => w.line("EndPrimitive();"),
            Instruction::Return => w.line("return;"),
            Instruction::Branch
            | Instruction::BranchIfTrue
            | Instruction::BranchIfFalse
            | Instruction::MarkLabel => {}
            inst => {
                let Some(dest) = op.dest else {
                    return Ok(());
                };
                let (expr, ty) = self.expression(op)?;
                self.write_assignment(w, inst, dest, expr, ty)?;
            }
        }
        Ok(())
    }

    /// Registers, predicates, variables and predeclared locals, at the top of `main`.
    pub(super) fn write_main_declarations(&self, w: &mut GlslWriter) {
        let mut registers = BTreeSet::new();
        let mut predicates = BTreeSet::new();
        let mut variables = BTreeSet::new();

        for (_, id) in self.function.all_ops() {
            let op = self.function.op(id);
            for operand in op.dest.iter().chain(op.sources.iter()) {
                match *operand {
                    Operand::Register(r) if !r.is_rz() => {
                        registers.insert(r.0);
                    }
                    Operand::Predicate(p) if !p.is_pt() => {
                        predicates.insert(p.0);
                    }
                    Operand::Variable(v) => {
                        variables.insert(v.0);
                    }
                    _ => {}
                }
            }
        }

        for r in &registers {
            w.line(&format!("uint r{r};"));
        }
        for p in &predicates {
            w.line(&format!("bool p{p};"));
        }
        for v in &variables {
            w.line(&format!("uint var_{v};"));
        }
        for local in self.predeclared {
            w.line(&format!(
                "{} temp_{};",
                self.local_type(*local).scalar_name(),
                local.0
            ));
        }

        let declared =
            registers.len() + predicates.len() + variables.len() + self.predeclared.len();
        if declared != 0 {
            w.blank();
        }
    }

    pub(super) fn write_nodes(
        &self,
        w: &mut GlslWriter,
        nodes: &[AstNode],
    ) -> Result<(), CodegenError> {
        for node in nodes {
            match node {
                AstNode::Op(id) => self.write_op(w, self.function.op(*id))?,
                AstNode::If {
                    cond,
                    invert,
                    then_body,
                    else_body,
                } => {
                    let cond = self.operand_as(*cond, VarType::Bool)?;
                    let cond = if *invert { negate(&cond) } else { cond };
                    w.line(&format!("if ({cond})"));
                    w.open_block();
                    self.write_nodes(w, then_body)?;
                    w.close_block("");
                    if !else_body.is_empty() {
                        w.line("else");
                        w.open_block();
                        self.write_nodes(w, else_body)?;
                        w.close_block("");
                    }
                }
                AstNode::Loop { body } => {
                    w.line("while (true)");
                    w.open_block();
                    self.write_nodes(w, body)?;
                    w.close_block("");
                }
                AstNode::Break => w.line("break;"),
                AstNode::Continue => w.line("continue;"),
                AstNode::Return => w.line("return;"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn casts_reinterpret_bits() {
        assert_eq!(
            cast("r0".to_string(), VarType::U32, VarType::F32),
            "uintBitsToFloat(r0)"
        );
        assert_eq!(
            cast("p1".to_string(), VarType::Bool, VarType::U32),
            "(p1 ? 0xffffffffu : 0u)"
        );
        assert_eq!(
            cast("temp_3".to_string(), VarType::S32, VarType::Bool),
            "(temp_3 != 0)"
        );
        assert_eq!(cast("x".to_string(), VarType::F32, VarType::F32), "x");
    }

    #[test]
    fn constants_are_spelled_in_the_wanted_type() {
        assert_eq!(constant(1.0f32.to_bits(), VarType::F32), "1.0");
        assert_eq!(constant(u32::MAX, VarType::S32), "-1");
        assert_eq!(constant(7, VarType::U32), "7u");
        assert_eq!(constant(2, VarType::Bool), "true");
    }

    #[test]
    fn negation_only_adds_parentheses_when_needed() {
        assert_eq!(negate("p0"), "!p0");
        assert_eq!(negate("(a < b)"), "!(a < b)");
        assert_eq!(negate("(a) && (b)"), "!((a) && (b))");
    }
}
