//! Draw parameters read from the guest driver constant buffer.
//!
//! NVN places base vertex, base instance and draw index in constant buffer 0. Hosts that can
//! expose the real draw parameters get those reads replaced with the built-ins.

use crate::features::FeatureFlags;
use crate::gpu_accessor::GpuAccessor;
use crate::ir::{Function, IoVariable, OpId, Operand, StorageKind};
use crate::types::ShaderStage;

use super::{insert_load, PassContext, TransformPass};

const BASE_VERTEX_OFFSET: u32 = 0x640;
const BASE_INSTANCE_OFFSET: u32 = 0x644;
const DRAW_INDEX_OFFSET: u32 = 0x648;

pub struct DrawParametersReplace;

fn draw_parameter(operand: Operand) -> Option<IoVariable> {
    match operand {
        Operand::ConstantBuffer { slot: 0, offset } => match offset * 4 {
            BASE_VERTEX_OFFSET => Some(IoVariable::BaseVertex),
            BASE_INSTANCE_OFFSET => Some(IoVariable::BaseInstance),
            DRAW_INDEX_OFFSET => Some(IoVariable::DrawIndex),
            _ => None,
        },
        _ => None,
    }
}

impl TransformPass for DrawParametersReplace {
    fn name(&self) -> &'static str {
        "DrawParametersReplace"
    }

    fn is_enabled(
        &self,
        _gpu_accessor: &dyn GpuAccessor,
        stage: ShaderStage,
        _features: FeatureFlags,
    ) -> bool {
        stage == ShaderStage::Vertex
    }

    fn run(
        &self,
        function: &mut Function,
        node: OpId,
        ctx: &mut PassContext<'_>,
        features: &mut FeatureFlags,
    ) -> OpId {
        let replace = ctx.gpu_accessor.query_has_constant_buffer_draw_parameters();

        for index in 0..function.op(node).sources.len() {
            let Some(variable) = draw_parameter(function.op(node).sources[index]) else {
                continue;
            };
            *features |= FeatureFlags::DRAW_PARAMETERS;
            if replace {
                let value = insert_load(function, node, StorageKind::Input, vec![variable.operand()]);
                function.op_mut(node).sources[index] = value;
                tracing::trace!(?variable, "replaced constant buffer draw parameter");
            }
        }

        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::ShaderDefinitions;
    use crate::ir::{IdAllocator, Instruction, NumType, Operation, Register};
    use crate::resources::{ResourceManager, ResourceReservations};
    use crate::transforms::run_passes;
    use crate::types::TargetApi;
    use pretty_assertions::assert_eq;

    struct CbDrawParameters(bool);

    impl GpuAccessor for CbDrawParameters {
        fn query_has_constant_buffer_draw_parameters(&self) -> bool {
            self.0
        }
    }

    fn run(stage: ShaderStage, accessor: &CbDrawParameters) -> (Function, FeatureFlags) {
        let definitions = ShaderDefinitions::new(stage);
        let mut resources =
            ResourceManager::new(stage, TargetApi::Vulkan, ResourceReservations::default());
        let mut function = Function::new(IdAllocator::default());
        let block = function.add_block();
        function.push(
            block,
            Operation::new(
                Instruction::Add(NumType::U32),
                Some(Operand::Register(Register(0))),
                vec![
                    Operand::ConstantBuffer {
                        slot: 0,
                        offset: 0x644 / 4,
                    },
                    Operand::ConstantBuffer {
                        slot: 0,
                        offset: 0x64c / 4,
                    },
                ],
            ),
        );

        let mut ctx = PassContext {
            definitions: &definitions,
            resources: &mut resources,
            gpu_accessor: accessor,
            stage,
            unresolved: Vec::new(),
        };
        let mut features = FeatureFlags::empty();
        run_passes(&mut function, &mut ctx, &mut features);
        (function, features)
    }

    #[test]
    fn known_offsets_become_input_loads() {
        let (function, features) = run(ShaderStage::Vertex, &CbDrawParameters(true));
        let ops: Vec<_> = function.block_ops(0).map(|id| function.op(id).clone()).collect();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].storage_kind, StorageKind::Input);
        assert_eq!(ops[0].io_variable(), Some(IoVariable::BaseInstance));
        assert_eq!(ops[1].sources[0], ops[0].dest.unwrap());
        // 0x64c is not a draw parameter.
        assert_eq!(
            ops[1].sources[1],
            Operand::ConstantBuffer {
                slot: 0,
                offset: 0x64c / 4
            }
        );
        assert_eq!(features, FeatureFlags::DRAW_PARAMETERS);
    }

    #[test]
    fn without_host_support_only_the_feature_is_recorded() {
        let (function, features) = run(ShaderStage::Vertex, &CbDrawParameters(false));
        assert_eq!(function.live_len(), 1);
        assert_eq!(features, FeatureFlags::DRAW_PARAMETERS);
    }

    #[test]
    fn other_stages_are_untouched() {
        let (function, features) = run(ShaderStage::Fragment, &CbDrawParameters(true));
        assert_eq!(function.live_len(), 1);
        assert_eq!(features, FeatureFlags::empty());
    }
}
