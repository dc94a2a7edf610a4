//! Structural checks on a [`Function`], run after lowering and again after the transform passes.

use thiserror::Error;

use crate::definitions::ShaderDefinitions;
use crate::ir::{Function, Instruction, Operation, StorageKind, TextureFlags};
use crate::resources::{BufferDefinition, ResourceManager};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("block {block}: {inst} expects {expected} sources, found {actual}")]
    SourceCount {
        block: usize,
        inst: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("block {block}: {inst} has no destination")]
    MissingDestination { block: usize, inst: &'static str },
    #[error("block {block}: {inst} must not have a destination")]
    UnexpectedDestination { block: usize, inst: &'static str },
    #[error("block {block}: {inst} is not the last operation of its block")]
    MisplacedTerminator { block: usize, inst: &'static str },
    #[error("block {block}: IO access without a valid variable")]
    UnknownIoVariable { block: usize },
    #[error("block {block}: {kind} {id} is not declared")]
    UnknownResource {
        block: usize,
        kind: &'static str,
        id: u32,
    },
    #[error("block {block}: {inst} on storage kind {storage:?}")]
    InvalidStorage {
        block: usize,
        inst: &'static str,
        storage: StorageKind,
    },
}

pub fn verify_function(
    function: &Function,
    definitions: &ShaderDefinitions,
    resources: &ResourceManager,
) -> Result<(), VerifyError> {
    for block in 0..function.blocks.len() {
        let last = function.last(block);
        for id in function.block_ops(block) {
            let op = function.op(id);
            if op.inst.is_terminator() && Some(id) != last {
                return Err(VerifyError::MisplacedTerminator {
                    block,
                    inst: op.inst.name(),
                });
            }
            verify_operation(block, op, definitions, resources)?;
        }
    }
    Ok(())
}

fn verify_operation(
    block: usize,
    op: &Operation,
    definitions: &ShaderDefinitions,
    resources: &ResourceManager,
) -> Result<(), VerifyError> {
    let inst = op.inst.name();
    let expected = match op.inst {
        Instruction::Load | Instruction::Store => {
            memory_access_sources(block, op, definitions, resources)?
        }
        other => fixed_sources(other),
    };
    if op.sources.len() != expected {
        return Err(VerifyError::SourceCount {
            block,
            inst,
            expected,
            actual: op.sources.len(),
        });
    }

    let wants_dest = !matches!(
        op.inst,
        Instruction::Store
            | Instruction::ImageStore(_)
            | Instruction::Barrier
            | Instruction::Branch
            | Instruction::BranchIfTrue
            | Instruction::BranchIfFalse
            | Instruction::MarkLabel
            | Instruction::Return
            | Instruction::Discard
            | Instruction::EmitVertex
            | Instruction::EndPrimitive
    );
    match (wants_dest, op.dest.is_some()) {
        (true, false) => Err(VerifyError::MissingDestination { block, inst }),
        (false, true) => Err(VerifyError::UnexpectedDestination { block, inst }),
        _ => Ok(()),
    }
}

fn fixed_sources(inst: Instruction) -> usize {
    match inst {
        Instruction::Return
        | Instruction::Discard
        | Instruction::Barrier
        | Instruction::EmitVertex
        | Instruction::EndPrimitive => 0,
        Instruction::Copy
        | Instruction::Negate(_)
        | Instruction::Absolute(_)
        | Instruction::BitwiseNot
        | Instruction::BitCount
        | Instruction::LogicalNot
        | Instruction::ConvertFP32ToS32
        | Instruction::ConvertFP32ToU32
        | Instruction::ConvertS32ToFP32
        | Instruction::ConvertU32ToFP32
        | Instruction::Branch
        | Instruction::MarkLabel => 1,
        Instruction::Add(_)
        | Instruction::Subtract(_)
        | Instruction::Multiply(_)
        | Instruction::Divide(_)
        | Instruction::Minimum(_)
        | Instruction::Maximum(_)
        | Instruction::BitwiseAnd
        | Instruction::BitwiseOr
        | Instruction::BitwiseExclusiveOr
        | Instruction::ShiftLeft
        | Instruction::ShiftRightS32
        | Instruction::ShiftRightU32
        | Instruction::Compare(..)
        | Instruction::LogicalAnd
        | Instruction::LogicalOr
        | Instruction::LogicalExclusiveOr
        | Instruction::MultiplyHighS32
        | Instruction::MultiplyHighU32
        | Instruction::BranchIfTrue
        | Instruction::BranchIfFalse => 2,
        Instruction::FusedMultiplyAdd
        | Instruction::ConditionalSelect(_)
        | Instruction::Shuffle
        | Instruction::ShuffleDown
        | Instruction::ShuffleUp
        | Instruction::ShuffleXor
        | Instruction::SwizzleAdd => 3,
        Instruction::TextureSample(tex) => {
            tex.sampler_type.coordinates() + usize::from(tex.flags.contains(TextureFlags::LOD_LEVEL))
        }
        Instruction::ImageLoad(img) => img.sampler_type.coordinates(),
        Instruction::ImageStore(img) => img.sampler_type.coordinates() + 4,
        Instruction::Load | Instruction::Store => 0,
    }
}

/// Expected source count of a `Load`/`Store`, checking the addressed resource exists.
fn memory_access_sources(
    block: usize,
    op: &Operation,
    definitions: &ShaderDefinitions,
    resources: &ResourceManager,
) -> Result<usize, VerifyError> {
    let value = usize::from(op.inst == Instruction::Store);
    let id = op.source(0).and_then(|s| s.as_constant());

    let buffer_sources = |buffer: Option<&BufferDefinition>,
                          kind: &'static str|
     -> Result<usize, VerifyError> {
        let id = id.unwrap_or(u32::MAX);
        let buffer = buffer.ok_or(VerifyError::UnknownResource { block, kind, id })?;
        let field = op
            .source(1)
            .and_then(|s| s.as_constant())
            .and_then(|f| buffer.fields.get(f as usize))
            .ok_or(VerifyError::UnknownResource {
                block,
                kind: "buffer field",
                id,
            })?;
        Ok(2 + usize::from(field.array_len.is_some()) + usize::from(field.ty.is_vector()))
    };

    let count = match op.storage_kind {
        StorageKind::Input
        | StorageKind::Output
        | StorageKind::InputPerPatch
        | StorageKind::OutputPerPatch => {
            let variable = op
                .io_variable()
                .ok_or(VerifyError::UnknownIoVariable { block })?;
            1 + usize::from(variable.has_location())
                + usize::from(definitions.has_per_vertex_index(op.storage_kind, variable))
                + usize::from(variable.has_component())
        }
        StorageKind::ConstantBuffer => {
            if op.inst == Instruction::Store {
                return Err(VerifyError::InvalidStorage {
                    block,
                    inst: op.inst.name(),
                    storage: op.storage_kind,
                });
            }
            buffer_sources(
                id.and_then(|b| resources.find_constant_buffer(b)),
                "constant buffer",
            )?
        }
        StorageKind::StorageBuffer => buffer_sources(
            id.and_then(|b| resources.find_storage_buffer(b)),
            "storage buffer",
        )?,
        StorageKind::LocalMemory | StorageKind::SharedMemory => {
            let (memory, kind) = if op.storage_kind == StorageKind::LocalMemory {
                (id.and_then(|m| resources.local_memory(m)), "local memory")
            } else {
                (id.and_then(|m| resources.shared_memory(m)), "shared memory")
            };
            let memory = memory.ok_or(VerifyError::UnknownResource {
                block,
                kind,
                id: id.unwrap_or(u32::MAX),
            })?;
            1 + usize::from(memory.array_len.is_some())
        }
        StorageKind::None => {
            return Err(VerifyError::InvalidStorage {
                block,
                inst: op.inst.name(),
                storage: op.storage_kind,
            })
        }
    };
    Ok(count + value)
}
