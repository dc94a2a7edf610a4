//! Rewrites a vertex program so it runs as a compute dispatch.
//!
//! Attribute reads become buffer texture fetches indexed by the vertex (or instance) index the
//! prologue stashed in local memory; outputs go to the local vertex record which the epilogue
//! copies to the vertex output buffer.

use crate::features::FeatureFlags;
use crate::gpu_accessor::GpuAccessor;
use crate::ir::{
    Function, Instruction, IoVariable, NumType, OpId, Operand, Operation, SamplerType,
    StorageKind, TextureFlags, TextureOp,
};
use crate::resources::EmulationMemories;
use crate::types::ShaderStage;

use super::{
    insert_load, insert_value, io_variable_name, is_valid_passthrough_input, lower_output_access,
    PassContext, TransformPass,
};

/// Fields of the vertex info uniform buffer.
const VERTEX_COUNTS: u32 = 0;
const VERTEX_STRIDES: u32 = 2;
const VERTEX_DIVISORS: u32 = 3;

pub struct VertexToCompute;

impl TransformPass for VertexToCompute {
    fn name(&self) -> &'static str {
        "VertexToCompute"
    }

    fn is_enabled(
        &self,
        _gpu_accessor: &dyn GpuAccessor,
        stage: ShaderStage,
        features: FeatureFlags,
    ) -> bool {
        stage == ShaderStage::Vertex && features.contains(FeatureFlags::VTG_AS_COMPUTE)
    }

    fn run(
        &self,
        function: &mut Function,
        node: OpId,
        ctx: &mut PassContext<'_>,
        _features: &mut FeatureFlags,
    ) -> OpId {
        let Some(EmulationMemories::Vertex {
            vertex_index_vertex_rate,
            vertex_index_instance_rate,
            ..
        }) = ctx.resources.emulation_memories()
        else {
            return node;
        };
        let lowering = Lowering {
            vertex_info: ctx
                .resources
                .reservations()
                .vertex_info_constant_buffer_binding,
            vertex_rate: vertex_index_vertex_rate,
            instance_rate: vertex_index_instance_rate,
        };

        let op = function.op(node);
        match (op.inst, op.storage_kind) {
            (Instruction::Load, StorageKind::Input) => {
                if lowering.input_load(function, node, ctx) {
                    function.remove(node);
                }
            }
            (Instruction::Load | Instruction::Store, StorageKind::Output) => {
                lower_output_access(function, node, ctx);
            }
            _ => {}
        }
        node
    }
}

struct Lowering {
    vertex_info: u32,
    vertex_rate: u32,
    instance_rate: u32,
}

impl Lowering {
    fn vertex_info(&self, function: &mut Function, node: OpId, indices: &[u32]) -> Operand {
        let mut sources = vec![Operand::Constant(self.vertex_info)];
        sources.extend(indices.iter().copied().map(Operand::Constant));
        insert_load(function, node, StorageKind::ConstantBuffer, sources)
    }

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

    /// Emits the replacement of an input load before `node`. Returns `false` if the load stays.
    fn input_load(&self, function: &mut Function, node: OpId, ctx: &mut PassContext<'_>) -> bool {
        let op = function.op(node).clone();
        let Some(dest) = op.dest else {
            return false;
        };
        let Some(variable) = op.io_variable() else {
            ctx.report_unresolved("input", io_variable_name(&op));
            return false;
        };

        let value = match variable {
            IoVariable::BaseVertex => self.vertex_info(function, node, &[VERTEX_COUNTS, 2]),
            IoVariable::BaseInstance => self.vertex_info(function, node, &[VERTEX_COUNTS, 3]),
            IoVariable::InstanceId => Self::global_invocation_id(function, node, 1),
            IoVariable::InstanceIndex => {
                let base = self.vertex_info(function, node, &[VERTEX_COUNTS, 3]);
                let instance = Self::global_invocation_id(function, node, 1);
                insert_value(function, node, Instruction::Add(NumType::U32), vec![base, instance])
            }
            IoVariable::VertexId | IoVariable::VertexIndex => {
                let base = self.vertex_info(function, node, &[VERTEX_COUNTS, 2]);
                let vertex = insert_load(
                    function,
                    node,
                    StorageKind::LocalMemory,
                    vec![Operand::Constant(self.vertex_rate)],
                );
                insert_value(function, node, Instruction::Add(NumType::U32), vec![base, vertex])
            }
            IoVariable::UserDefined => {
                let location = op.source(1).and_then(|s| s.as_constant());
                let component = op.source(2).and_then(|s| s.as_constant());
                let (Some(location), Some(component)) = (location, component) else {
                    ctx.report_unresolved("input", "UserDefined[dynamic]");
                    return false;
                };
                self.attribute(function, node, ctx, location, component)
            }
            variable if is_valid_passthrough_input(variable) => return false,
            variable => {
                ctx.report_unresolved("input", format!("{variable:?}"));
                return false;
            }
        };

        function.insert_before(node, Operation::new(Instruction::Copy, Some(dest), vec![value]));
        true
    }

    /// Element index of `component` of attribute `location` for the current vertex.
    fn vertex_offset(
        &self,
        function: &mut Function,
        node: OpId,
        location: u32,
        component: u32,
    ) -> Operand {
        let vertex_rate = insert_load(
            function,
            node,
            StorageKind::LocalMemory,
            vec![Operand::Constant(self.vertex_rate)],
        );
        let instance_rate = insert_load(
            function,
            node,
            StorageKind::LocalMemory,
            vec![Operand::Constant(self.instance_rate)],
        );
        let is_instance_rate = self.vertex_info(function, node, &[VERTEX_DIVISORS, location]);
        let vertex = insert_value(
            function,
            node,
            Instruction::ConditionalSelect(NumType::U32),
            vec![is_instance_rate, instance_rate, vertex_rate],
        );
        let stride = self.vertex_info(function, node, &[VERTEX_STRIDES, location, 0]);
        let base = insert_value(
            function,
            node,
            Instruction::Multiply(NumType::U32),
            vec![vertex, stride],
        );
        if component == 0 {
            return base;
        }
        insert_value(
            function,
            node,
            Instruction::Add(NumType::U32),
            vec![base, Operand::Constant(component)],
        )
    }

    fn attribute(
        &self,
        function: &mut Function,
        node: OpId,
        ctx: &PassContext<'_>,
        location: u32,
        component: u32,
    ) -> Operand {
        let defs = ctx.definitions;
        let fetch = |component: u32| TextureOp {
            binding: ctx
                .resources
                .reservations()
                .vertex_buffer_texture_binding(location),
            sampler_type: SamplerType::TextureBuffer,
            flags: TextureFlags::INT_COORDS,
            component: component as u8,
            result: defs.vertex_buffer_fetch_type(location),
        };

        if defs.is_attribute_packed(location) {
            // All components live in one element; the texture format splits them.
            let offset = self.vertex_offset(function, node, location, 0);
            let value = insert_value(
                function,
                node,
                Instruction::TextureSample(fetch(component)),
                vec![offset],
            );
            if !defs.is_attribute_packed_rgb10a2_signed(location) {
                return value;
            }
            let bits = if component == 3 { 2 } else { 10 };
            return sign_extend(
                function,
                node,
                value,
                bits,
                !defs.is_attribute_sint(location),
            );
        }

        let offset = self.vertex_offset(function, node, location, component);
        let value = insert_value(
            function,
            node,
            Instruction::TextureSample(fetch(0)),
            vec![offset],
        );
        if component == 0 {
            return value;
        }

        // Components past the format's width read as (0, 0, 0, 1).
        let exists = self.vertex_info(function, node, &[VERTEX_STRIDES, location, component]);
        let default = if component == 3 { 1.0 } else { 0.0 };
        insert_value(
            function,
            node,
            Instruction::ConditionalSelect(NumType::F32),
            vec![exists, value, Operand::const_f32(default)],
        )
    }
}

/// Sign-extends the low `bits` of `value`, then maps it to `[-1, 1)` when `normalize` is set.
fn sign_extend(
    function: &mut Function,
    node: OpId,
    value: Operand,
    bits: u32,
    normalize: bool,
) -> Operand {
    let shift = Operand::Constant(32 - bits);
    let shifted = insert_value(function, node, Instruction::ShiftLeft, vec![value, shift]);
    let extended = insert_value(function, node, Instruction::ShiftRightS32, vec![shifted, shift]);
    if !normalize {
        return extended;
    }
    let float = insert_value(function, node, Instruction::ConvertS32ToFP32, vec![extended]);
    let scale = 1.0 / (1u32 << (bits - 1)) as f32;
    insert_value(
        function,
        node,
        Instruction::Multiply(NumType::F32),
        vec![float, Operand::const_f32(scale)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_usage::IoUsage;
    use crate::definitions::{AttributeBaseType, AttributePacking, ShaderDefinitions};
    use crate::gpu_accessor::DefaultGpuAccessor;
    use crate::ir::IdAllocator;
    use crate::resources::{ResourceManager, ResourceReservations};
    use crate::transforms::{run_passes, UnresolvedIo};
    use crate::types::{InputTopology, TargetApi};
    use pretty_assertions::assert_eq;

    fn vertex_definitions() -> ShaderDefinitions {
        ShaderDefinitions::new(ShaderStage::Vertex).as_compute(32, 32, 1)
    }

    /// Runs the passes over `ops` as a compute-emulated vertex program writing location 0.
    fn lower(defs: &ShaderDefinitions, ops: Vec<Operation>) -> (Vec<Operation>, Vec<UnresolvedIo>) {
        let usage = IoUsage::new(FeatureFlags::empty(), 0, 0b1);
        let reservations = ResourceReservations::new(false, true, None, Some(usage));
        let mut resources = ResourceManager::new(ShaderStage::Compute, TargetApi::Vulkan, reservations);
        resources.set_vertex_as_compute_local_memories(ShaderStage::Vertex, InputTopology::Points);

        let mut function = Function::new(IdAllocator::default());
        let block = function.add_block();
        for op in ops {
            function.push(block, op);
        }

        let mut ctx = PassContext {
            definitions: defs,
            resources: &mut resources,
            gpu_accessor: &DefaultGpuAccessor,
            stage: ShaderStage::Vertex,
            unresolved: Vec::new(),
        };
        let mut features = FeatureFlags::VTG_AS_COMPUTE;
        run_passes(&mut function, &mut ctx, &mut features);

        let unresolved = ctx.unresolved;
        let ops = function.block_ops(block).map(|id| function.op(id).clone()).collect();
        (ops, unresolved)
    }

    fn dest() -> Operand {
        Operand::Local(crate::ir::LocalId(1000))
    }

    fn input(sources: Vec<Operand>) -> Operation {
        Operation::with_storage(Instruction::Load, StorageKind::Input, Some(dest()), sources)
    }

    fn names(ops: &[Operation]) -> Vec<&'static str> {
        ops.iter().map(|op| op.inst.name()).collect()
    }

    #[test]
    fn output_stores_land_in_the_vertex_record() {
        let store = Operation::with_storage(
            Instruction::Store,
            StorageKind::Output,
            None,
            vec![
                IoVariable::UserDefined.operand(),
                Operand::Constant(0),
                Operand::Constant(2),
                Operand::const_f32(1.5),
            ],
        );
        let (ops, unresolved) = lower(&vertex_definitions(), vec![store]);

        assert!(unresolved.is_empty());
        assert_eq!(
            ops,
            vec![Operation::with_storage(
                Instruction::Store,
                StorageKind::LocalMemory,
                None,
                // Position takes words 0..4.
                vec![Operand::Constant(0), Operand::Constant(6), Operand::const_f32(1.5)],
            )]
        );
    }

    #[test]
    fn outputs_without_a_record_slot_are_reported_and_kept() {
        let store = Operation::with_storage(
            Instruction::Store,
            StorageKind::Output,
            None,
            vec![IoVariable::Layer.operand(), Operand::Constant(1)],
        );
        let (ops, unresolved) = lower(&vertex_definitions(), vec![store.clone()]);

        assert_eq!(ops, vec![store]);
        assert_eq!(
            unresolved,
            vec![UnresolvedIo {
                kind: "output",
                variable: "Layer".to_string()
            }]
        );
    }

    #[test]
    fn vertex_index_adds_base_vertex() {
        let load = input(vec![IoVariable::VertexIndex.operand()]);
        let (ops, _) = lower(&vertex_definitions(), vec![load]);

        assert_eq!(names(&ops), vec!["Load", "Load", "Add", "Copy"]);
        assert_eq!(ops[0].storage_kind, StorageKind::ConstantBuffer);
        assert_eq!(
            ops[0].sources,
            vec![Operand::Constant(1), Operand::Constant(0), Operand::Constant(2)]
        );
        assert_eq!(ops[1].sources, vec![Operand::Constant(1)]);
        assert_eq!(ops[3].dest, Some(dest()));
    }

    #[test]
    fn missing_components_default_to_zero_or_one() {
        let load = input(vec![
            IoVariable::UserDefined.operand(),
            Operand::Constant(1),
            Operand::Constant(3),
        ]);
        let (ops, _) = lower(&vertex_definitions(), vec![load]);

        let select = ops
            .iter()
            .filter(|op| op.inst == Instruction::ConditionalSelect(NumType::F32))
            .last()
            .unwrap();
        assert_eq!(select.sources[2], Operand::const_f32(1.0));

        let sample = ops
            .iter()
            .find(|op| matches!(op.inst, Instruction::TextureSample(_)))
            .unwrap();
        let Instruction::TextureSample(tex) = sample.inst else {
            unreachable!()
        };
        assert_eq!(tex.binding, 2);
        assert_eq!(tex.component, 0);
    }

    #[test]
    fn signed_rgb10a2_alpha_is_sign_extended_from_two_bits() {
        let mut defs = vertex_definitions();
        defs.attribute_types[0].packing = AttributePacking::Rgb10A2Signed;
        let load = input(vec![
            IoVariable::UserDefined.operand(),
            Operand::Constant(0),
            Operand::Constant(3),
        ]);
        let (ops, _) = lower(&defs, vec![load]);

        let tail: Vec<_> = ops[ops.len() - 5..].to_vec();
        assert_eq!(
            names(&tail),
            vec!["ShiftLeft", "ShiftRightS32", "ConvertS32ToFP32", "Multiply", "Copy"]
        );
        assert_eq!(tail[0].sources[1], Operand::Constant(30));
        assert_eq!(tail[3].sources[1], Operand::const_f32(0.5));
    }

    #[test]
    fn signed_integer_rgb10a2_is_not_normalized() {
        let mut defs = vertex_definitions();
        defs.attribute_types[0].packing = AttributePacking::Rgb10A2Signed;
        defs.attribute_types[0].base = AttributeBaseType::Sint;
        let load = input(vec![
            IoVariable::UserDefined.operand(),
            Operand::Constant(0),
            Operand::Constant(1),
        ]);
        let (ops, _) = lower(&defs, vec![load]);

        let tail: Vec<_> = ops[ops.len() - 3..].to_vec();
        assert_eq!(names(&tail), vec!["ShiftLeft", "ShiftRightS32", "Copy"]);
        assert_eq!(tail[1].sources[1], Operand::Constant(22));
    }

    /// Evaluates the sign extension chain emitted after the fetch of `component`.
    fn extend_fetched(component: u32, raw: u32) -> f32 {
        let mut defs = vertex_definitions();
        defs.attribute_types[0].packing = AttributePacking::Rgb10A2Signed;
        let load = input(vec![
            IoVariable::UserDefined.operand(),
            Operand::Constant(0),
            Operand::Constant(component),
        ]);
        let (ops, _) = lower(&defs, vec![load]);

        let fetch = ops
            .iter()
            .position(|op| matches!(op.inst, Instruction::TextureSample(_)))
            .unwrap();
        let mut values = std::collections::HashMap::new();
        values.insert(ops[fetch].dest.unwrap(), raw);
        let read = |values: &std::collections::HashMap<Operand, u32>, op: &Operand| match op {
            Operand::Constant(c) => *c,
            other => values[other],
        };
        for op in &ops[fetch + 1..] {
            let a = read(&values, &op.sources[0]);
            let result = match op.inst {
                Instruction::ShiftLeft => a << read(&values, &op.sources[1]),
                Instruction::ShiftRightS32 => ((a as i32) >> read(&values, &op.sources[1])) as u32,
                Instruction::ConvertS32ToFP32 => (a as i32 as f32).to_bits(),
                Instruction::Multiply(NumType::F32) => {
                    let b = f32::from_bits(read(&values, &op.sources[1]));
                    (f32::from_bits(a) * b).to_bits()
                }
                Instruction::Copy => a,
                other => panic!("unexpected {other:?}"),
            };
            values.insert(op.dest.unwrap(), result);
        }
        f32::from_bits(values[&dest()])
    }

    #[test]
    fn sign_extension_maps_to_the_normalized_range() {
        assert_eq!(extend_fetched(0, 0x200), -1.0);
        assert_eq!(extend_fetched(0, 0x1ff), 511.0 / 512.0);
        assert_eq!(extend_fetched(2, 0x3ff), -1.0 / 512.0);
        assert_eq!(extend_fetched(3, 0b10), -1.0);
        assert_eq!(extend_fetched(3, 0b01), 0.5);
    }

    #[test]
    fn zero_and_extremes_of_the_packed_widths() {
        for component in 0..4 {
            let value = extend_fetched(component, 0);
            assert_eq!(value, 0.0);
            assert!(value.is_sign_positive());
        }
        // Largest positive 10-bit and 2-bit values.
        assert_eq!(extend_fetched(1, 0x1ff), 511.0 / 512.0);
        assert_eq!(extend_fetched(3, 0b01), 0.5);
        assert_eq!(extend_fetched(3, 0b11), -0.5);
        // Bits above the field width are discarded.
        assert_eq!(extend_fetched(0, 0xffff_fc00 | 0x1ff), 511.0 / 512.0);
        assert_eq!(extend_fetched(3, 0xffff_fffc | 0b01), 0.5);
    }

    #[test]
    fn compute_inputs_pass_through() {
        let load = input(vec![
            IoVariable::GlobalInvocationId.operand(),
            Operand::Constant(0),
        ]);
        let (ops, unresolved) = lower(&vertex_definitions(), vec![load.clone()]);
        assert_eq!(ops, vec![load]);
        assert!(unresolved.is_empty());

        let (_, unresolved) = lower(
            &vertex_definitions(),
            vec![input(vec![IoVariable::FrontFacing.operand()])],
        );
        assert_eq!(unresolved.len(), 1);
    }
}
