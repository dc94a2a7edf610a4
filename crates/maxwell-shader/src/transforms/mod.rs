//! In-place legalization passes over the IR.
//!
//! Every pass visits each live operation exactly once, in block order. A pass may insert
//! operations before or after the visited one and may remove it; it returns the operation the
//! driver should continue after.

pub mod draw_parameters;
pub mod geometry_to_compute;
pub mod vertex_to_compute;

use crate::definitions::ShaderDefinitions;
use crate::features::FeatureFlags;
use crate::gpu_accessor::GpuAccessor;
use crate::ir::{Function, Instruction, IoVariable, OpId, Operand, Operation, StorageKind};
use crate::resources::{ResourceManager, ResourceReservations};
use crate::types::ShaderStage;

pub use draw_parameters::DrawParametersReplace;
pub use geometry_to_compute::GeometryToCompute;
pub use vertex_to_compute::VertexToCompute;

/// IO access that had no slot in the compute emulation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedIo {
    pub kind: &'static str,
    pub variable: String,
}

pub struct PassContext<'a> {
    pub definitions: &'a ShaderDefinitions,
    pub resources: &'a mut ResourceManager,
    pub gpu_accessor: &'a dyn GpuAccessor,
    /// Stage the program was written for.
    pub stage: ShaderStage,
    pub unresolved: Vec<UnresolvedIo>,
}

impl PassContext<'_> {
    /// Reports an IO access the emulation can not express; the operation is kept as is.
    pub fn report_unresolved(&mut self, kind: &'static str, variable: impl Into<String>) {
        let variable = variable.into();
        self.gpu_accessor
            .log(&format!("Invalid {kind} \"{variable}\"."));
        self.unresolved.push(UnresolvedIo { kind, variable });
    }
}

pub trait TransformPass {
    fn name(&self) -> &'static str;

    fn is_enabled(
        &self,
        gpu_accessor: &dyn GpuAccessor,
        stage: ShaderStage,
        features: FeatureFlags,
    ) -> bool;

    fn run(
        &self,
        function: &mut Function,
        node: OpId,
        ctx: &mut PassContext<'_>,
        features: &mut FeatureFlags,
    ) -> OpId;
}

/// Passes in the order they run.
pub fn registered_passes() -> [&'static dyn TransformPass; 3] {
    [&DrawParametersReplace, &VertexToCompute, &GeometryToCompute]
}

pub fn run_passes(function: &mut Function, ctx: &mut PassContext<'_>, features: &mut FeatureFlags) {
    for pass in registered_passes() {
        if !pass.is_enabled(ctx.gpu_accessor, ctx.stage, *features) {
            tracing::debug!(pass = pass.name(), "transform pass skipped");
            continue;
        }
        tracing::debug!(pass = pass.name(), "running transform pass");
        run_pass(pass, function, ctx, features);
    }
}

fn run_pass(
    pass: &dyn TransformPass,
    function: &mut Function,
    ctx: &mut PassContext<'_>,
    features: &mut FeatureFlags,
) {
    for block in 0..function.blocks.len() {
        let mut cursor = function.first(block);
        while let Some(node) = cursor {
            let last = pass.run(function, node, ctx, features);
            cursor = function.next(last);
        }
    }
}

/// Inserts `inst` before `node` writing a fresh local, and returns that local.
pub(crate) fn insert_value(
    function: &mut Function,
    node: OpId,
    inst: Instruction,
    sources: Vec<Operand>,
) -> Operand {
    let dest = function.new_local();
    function.insert_before(node, Operation::new(inst, Some(dest), sources));
    dest
}

pub(crate) fn insert_load(
    function: &mut Function,
    node: OpId,
    storage_kind: StorageKind,
    sources: Vec<Operand>,
) -> Operand {
    let dest = function.new_local();
    function.insert_before(
        node,
        Operation::with_storage(Instruction::Load, storage_kind, Some(dest), sources),
    );
    dest
}

pub(crate) fn insert_store(
    function: &mut Function,
    node: OpId,
    storage_kind: StorageKind,
    sources: Vec<Operand>,
) -> OpId {
    function.insert_before(
        node,
        Operation::with_storage(Instruction::Store, storage_kind, None, sources),
    )
}

/// Record offset addressed by an IO `Load`/`Store`, if the access has a slot in the record.
///
/// Dynamically indexed accesses never resolve.
pub(crate) fn record_offset(
    reservations: &ResourceReservations,
    op: &Operation,
    storage_kind: StorageKind,
) -> Option<u32> {
    let variable = op.io_variable()?;
    let trailing = if op.inst == Instruction::Store { 2 } else { 1 };
    let last = op.sources.len().checked_sub(trailing)?;

    if variable == IoVariable::UserDefined {
        let location = op.source(1)?.as_constant()?;
        let component = op.source(last)?.as_constant()?;
        reservations.try_get_user_offset(storage_kind, location, component)
    } else if ResourceReservations::is_vector_or_array_variable(variable) {
        let component = op.source(last)?.as_constant()?;
        reservations.try_get_offset(storage_kind, variable, 0, component)
    } else {
        reservations.try_get_offset(storage_kind, variable, 0, 0)
    }
}

/// Redirects an output `Load`/`Store` to the vertex record kept in local memory.
///
/// Returns `false` and leaves the access in place when the output has no record slot.
pub(crate) fn lower_output_access(
    function: &mut Function,
    node: OpId,
    ctx: &mut PassContext<'_>,
) -> bool {
    let Some(memories) = ctx.resources.emulation_memories() else {
        return false;
    };
    let op = function.op(node).clone();
    let Some(offset) = record_offset(ctx.resources.reservations(), &op, StorageKind::Output) else {
        ctx.report_unresolved("output", io_variable_name(&op));
        return false;
    };

    let vertex_data = Operand::Constant(memories.vertex_data());
    let replacement = if op.inst == Instruction::Store {
        let value = op.sources.last().copied().unwrap_or(Operand::Undefined);
        Operation::with_storage(
            Instruction::Store,
            StorageKind::LocalMemory,
            None,
            vec![vertex_data, Operand::Constant(offset), value],
        )
    } else {
        Operation::with_storage(
            Instruction::Load,
            StorageKind::LocalMemory,
            op.dest,
            vec![vertex_data, Operand::Constant(offset)],
        )
    };
    function.insert_before(node, replacement);
    function.remove(node);
    true
}

pub(crate) fn io_variable_name(op: &Operation) -> String {
    match op.io_variable() {
        Some(variable) => format!("{variable:?}"),
        None => "unknown".to_string(),
    }
}

/// Inputs a compute dispatch provides itself, left untouched by the emulation passes.
pub(crate) fn is_valid_passthrough_input(variable: IoVariable) -> bool {
    matches!(
        variable,
        IoVariable::GlobalInvocationId
            | IoVariable::SubgroupEqMask
            | IoVariable::SubgroupGeMask
            | IoVariable::SubgroupGtMask
            | IoVariable::SubgroupLaneId
            | IoVariable::SubgroupLeMask
            | IoVariable::SubgroupLtMask
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IdAllocator, NumType, Register};
    use crate::types::TargetApi;
    use pretty_assertions::assert_eq;

    struct CbDrawParameters;

    impl GpuAccessor for CbDrawParameters {
        fn query_has_constant_buffer_draw_parameters(&self) -> bool {
            true
        }
    }

    #[test]
    fn native_vertex_only_gets_draw_parameters_replaced() {
        let mut ids = IdAllocator::default();
        let attribute = ids.new_local();
        let r0 = Operand::Register(Register(0));
        let original = vec![
            Operation::with_storage(
                Instruction::Load,
                StorageKind::Input,
                Some(attribute),
                vec![
                    IoVariable::UserDefined.operand(),
                    Operand::Constant(0),
                    Operand::Constant(0),
                ],
            ),
            Operation::new(
                Instruction::Add(NumType::U32),
                Some(r0),
                vec![
                    attribute,
                    Operand::ConstantBuffer {
                        slot: 0,
                        offset: 0x640 / 4,
                    },
                ],
            ),
            Operation::with_storage(
                Instruction::Store,
                StorageKind::Output,
                None,
                vec![IoVariable::Position.operand(), Operand::Constant(0), r0],
            ),
            Operation::new(Instruction::Return, None, vec![]),
        ];

        let mut function = Function::new(ids);
        let block = function.add_block();
        for op in original.iter().cloned() {
            function.push(block, op);
        }

        let definitions = ShaderDefinitions::new(ShaderStage::Vertex);
        let mut resources = ResourceManager::new(
            ShaderStage::Vertex,
            TargetApi::Vulkan,
            ResourceReservations::default(),
        );
        let mut ctx = PassContext {
            definitions: &definitions,
            resources: &mut resources,
            gpu_accessor: &CbDrawParameters,
            stage: ShaderStage::Vertex,
            unresolved: Vec::new(),
        };
        let mut features = FeatureFlags::empty();
        run_passes(&mut function, &mut ctx, &mut features);
        assert!(ctx.unresolved.is_empty());

        let base_vertex = Operand::Local(crate::ir::LocalId(1));
        let mut expected = original;
        expected[1].sources[1] = base_vertex;
        expected.insert(
            1,
            Operation::with_storage(
                Instruction::Load,
                StorageKind::Input,
                Some(base_vertex),
                vec![IoVariable::BaseVertex.operand()],
            ),
        );
        let ops: Vec<_> = function
            .block_ops(block)
            .map(|id| function.op(id).clone())
            .collect();
        assert_eq!(ops, expected);
        assert_eq!(features, FeatureFlags::DRAW_PARAMETERS);
    }
}
