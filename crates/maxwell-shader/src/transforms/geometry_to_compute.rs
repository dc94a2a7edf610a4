//! Rewrites a geometry program so it runs as a compute dispatch.
//!
//! Each invocation handles one input primitive of one instance. Inputs are read from the vertex
//! records the emulated vertex stage wrote; emitted vertices and primitive restarts are appended
//! to per-primitive ranges of the geometry output buffers.

use crate::features::FeatureFlags;
use crate::gpu_accessor::GpuAccessor;
use crate::ir::{
    Function, Instruction, IoVariable, NumType, OpId, Operand, Operation, StorageKind,
};
use crate::resources::EmulationMemories;
use crate::types::ShaderStage;

use super::{
    insert_load, insert_store, insert_value, io_variable_name, is_valid_passthrough_input,
    lower_output_access, record_offset, PassContext, TransformPass,
};

pub struct GeometryToCompute;

impl TransformPass for GeometryToCompute {
    fn name(&self) -> &'static str {
        "GeometryToCompute"
    }

    fn is_enabled(
        &self,
        _gpu_accessor: &dyn GpuAccessor,
        stage: ShaderStage,
        features: FeatureFlags,
    ) -> bool {
        stage == ShaderStage::Geometry && features.contains(FeatureFlags::VTG_AS_COMPUTE)
    }

    fn run(
        &self,
        function: &mut Function,
        node: OpId,
        ctx: &mut PassContext<'_>,
        _features: &mut FeatureFlags,
    ) -> OpId {
        let Some(EmulationMemories::Geometry {
            vertex_data,
            topology_remap,
            output_vertex_count,
            output_index_count,
        }) = ctx.resources.emulation_memories()
        else {
            return node;
        };
        let reservations = ctx.resources.reservations();
        let lowering = Lowering {
            vertex_info: reservations.vertex_info_constant_buffer_binding,
            vertex_output: reservations.vertex_output_storage_buffer_binding,
            geometry_vertex_output: reservations.geometry_vertex_output_storage_buffer_binding,
            geometry_index_output: reservations.geometry_index_output_storage_buffer_binding,
            input_stride: reservations.input_size_per_invocation,
            output_stride: reservations.output_size_per_invocation,
            vertex_data,
            topology_remap,
            output_vertex_count,
            output_index_count,
            max_output_vertices: ctx.definitions.max_output_vertices,
            index_stride: ctx.definitions.geometry_output_index_buffer_stride(),
        };

        let op = function.op(node);
        let replaced = match (op.inst, op.storage_kind) {
            (Instruction::EmitVertex, _) => {
                lowering.emit_vertex(function, node);
                true
            }
            (Instruction::EndPrimitive, _) => {
                lowering.end_primitive(function, node);
                true
            }
            (Instruction::Load, StorageKind::Input) => lowering.input_load(function, node, ctx),
            (Instruction::Load | Instruction::Store, StorageKind::Output) => {
                lower_output_access(function, node, ctx);
                false
            }
            _ => false,
        };
        if replaced {
            function.remove(node);
        }
        node
    }
}

struct Lowering {
    vertex_info: u32,
    vertex_output: u32,
    geometry_vertex_output: u32,
    geometry_index_output: u32,
    input_stride: u32,
    output_stride: u32,
    vertex_data: u32,
    topology_remap: u32,
    output_vertex_count: u32,
    output_index_count: u32,
    max_output_vertices: u32,
    index_stride: u32,
}

impl Lowering {
    fn global_invocation_id(function: &mut Function, node: OpId, component: u32) -> Operand {
        insert_load(
            function,
            node,
            StorageKind::Input,
            vec![
                IoVariable::GlobalInvocationId.operand(),
                Operand::Constant(component),
            ],
        )
    }

    fn vertex_count(&self, function: &mut Function, node: OpId) -> Operand {
        insert_load(
            function,
            node,
            StorageKind::ConstantBuffer,
            vec![
                Operand::Constant(self.vertex_info),
                Operand::Constant(0),
                Operand::Constant(0),
            ],
        )
    }

    /// Index of the primitive across all instances.
    fn primitive_id(&self, function: &mut Function, node: OpId) -> Operand {
        let vertex_count = self.vertex_count(function, node);
        let primitive = Self::global_invocation_id(function, node, 0);
        let instance = Self::global_invocation_id(function, node, 1);
        let base = insert_value(
            function,
            node,
            Instruction::Multiply(NumType::U32),
            vec![instance, vertex_count],
        );
        insert_value(function, node, Instruction::Add(NumType::U32), vec![base, primitive])
    }

    /// Bumps a counter kept in local memory and returns its previous value.
    fn increment(function: &mut Function, node: OpId, memory: u32) -> Operand {
        let old = insert_load(
            function,
            node,
            StorageKind::LocalMemory,
            vec![Operand::Constant(memory)],
        );
        let new = insert_value(
            function,
            node,
            Instruction::Add(NumType::U32),
            vec![old, Operand::Constant(1)],
        );
        insert_store(
            function,
            node,
            StorageKind::LocalMemory,
            vec![Operand::Constant(memory), new],
        );
        old
    }

    /// Position of the next entry of this primitive's range in a buffer of `stride` entries per
    /// primitive, advancing the counter `memory`.
    fn next_entry(&self, function: &mut Function, node: OpId, memory: u32, stride: u32) -> Operand {
        let count = Self::increment(function, node, memory);
        let primitive = self.primitive_id(function, node);
        let base = insert_value(
            function,
            node,
            Instruction::Multiply(NumType::U32),
            vec![primitive, Operand::Constant(stride)],
        );
        insert_value(function, node, Instruction::Add(NumType::U32), vec![base, count])
    }

    fn emit_vertex(&self, function: &mut Function, node: OpId) {
        let vertex = self.next_entry(
            function,
            node,
            self.output_vertex_count,
            self.max_output_vertices,
        );
        let index = self.next_entry(function, node, self.output_index_count, self.index_stride);
        insert_store(
            function,
            node,
            StorageKind::StorageBuffer,
            vec![
                Operand::Constant(self.geometry_index_output),
                Operand::Constant(0),
                index,
                vertex,
            ],
        );

        let base = insert_value(
            function,
            node,
            Instruction::Multiply(NumType::U32),
            vec![vertex, Operand::Constant(self.output_stride)],
        );
        for offset in 0..self.output_stride {
            let position = if offset == 0 {
                base
            } else {
                insert_value(
                    function,
                    node,
                    Instruction::Add(NumType::U32),
                    vec![base, Operand::Constant(offset)],
                )
            };
            let value = insert_load(
                function,
                node,
                StorageKind::LocalMemory,
                vec![Operand::Constant(self.vertex_data), Operand::Constant(offset)],
            );
            insert_store(
                function,
                node,
                StorageKind::StorageBuffer,
                vec![
                    Operand::Constant(self.geometry_vertex_output),
                    Operand::Constant(0),
                    position,
                    value,
                ],
            );
        }
    }

    fn end_primitive(&self, function: &mut Function, node: OpId) {
        let index = self.next_entry(function, node, self.output_index_count, self.index_stride);
        insert_store(
            function,
            node,
            StorageKind::StorageBuffer,
            vec![
                Operand::Constant(self.geometry_index_output),
                Operand::Constant(0),
                index,
                Operand::const_i32(-1),
            ],
        );
    }

    /// Emits the replacement of an input load before `node`. Returns `false` if the load stays.
    fn input_load(&self, function: &mut Function, node: OpId, ctx: &mut PassContext<'_>) -> bool {
        let op = function.op(node).clone();
        let Some(dest) = op.dest else {
            return false;
        };

        if let Some(element) = record_offset(ctx.resources.reservations(), &op, StorageKind::Input) {
            let vertex_operand = if op.io_variable() == Some(IoVariable::UserDefined) {
                op.source(2)
            } else {
                op.source(1)
            };
            let Some(primitive_vertex) = vertex_operand else {
                ctx.report_unresolved("input", io_variable_name(&op));
                return false;
            };

            let vertex_count = self.vertex_count(function, node);
            let input_vertex = insert_load(
                function,
                node,
                StorageKind::LocalMemory,
                vec![Operand::Constant(self.topology_remap), primitive_vertex],
            );
            let instance = Self::global_invocation_id(function, node, 1);
            let instance_base = insert_value(
                function,
                node,
                Instruction::Multiply(NumType::U32),
                vec![instance, vertex_count],
            );
            let vertex = insert_value(
                function,
                node,
                Instruction::Add(NumType::U32),
                vec![instance_base, input_vertex],
            );
            let mut position = insert_value(
                function,
                node,
                Instruction::Multiply(NumType::U32),
                vec![vertex, Operand::Constant(self.input_stride)],
            );
            if element != 0 {
                position = insert_value(
                    function,
                    node,
                    Instruction::Add(NumType::U32),
                    vec![position, Operand::Constant(element)],
                );
            }
            function.insert_before(
                node,
                Operation::with_storage(
                    Instruction::Load,
                    StorageKind::StorageBuffer,
                    Some(dest),
                    vec![
                        Operand::Constant(self.vertex_output),
                        Operand::Constant(0),
                        position,
                    ],
                ),
            );
            return true;
        }

        match op.io_variable() {
            Some(IoVariable::PrimitiveId) => {
                let primitive = self.primitive_id(function, node);
                function.insert_before(
                    node,
                    Operation::new(Instruction::Copy, Some(dest), vec![primitive]),
                );
                true
            }
            Some(variable) if is_valid_passthrough_input(variable) => false,
            _ => {
                ctx.report_unresolved("input", io_variable_name(&op));
                false
            }
        }
    }
}
