//! Names and types of stage IO variables.

use crate::features::FeatureFlags;
use crate::ir::{IoVariable, Operand, Operation, StorageKind};
use crate::types::{ShaderStage, TargetApi};

use super::{Codegen, CodegenError, CodegenInput, VarType};

const SWIZZLE: [&str; 4] = ["x", "y", "z", "w"];

/// Operands of an IO `Load`/`Store`, split by role.
#[derive(Debug, Clone, Copy)]
pub(super) struct IoAccess {
    pub variable: IoVariable,
    pub location: Option<Operand>,
    pub vertex: Option<Operand>,
    pub component: Option<Operand>,
}

impl IoAccess {
    pub fn parse(input: &CodegenInput<'_>, op: &Operation) -> Result<Self, CodegenError> {
        let inst = op.inst.name();
        let variable = op
            .io_variable()
            .ok_or(CodegenError::UnknownIoVariable { inst })?;

        let mut index = 1;
        let mut take = |present: bool| -> Result<Option<Operand>, CodegenError> {
            if !present {
                return Ok(None);
            }
            let operand = op
                .source(index)
                .ok_or(CodegenError::MissingOperand { inst, index })?;
            index += 1;
            Ok(Some(operand))
        };

        let location = take(variable.has_location())?;
        let vertex = take(
            input
                .definitions
                .has_per_vertex_index(op.storage_kind, variable),
        )?;
        let component = take(variable.has_component())?;

        Ok(Self {
            variable,
            location,
            vertex,
            component,
        })
    }

    fn constant_location(&self) -> Option<u32> {
        self.location.and_then(|l| l.as_constant())
    }

    fn constant_component(&self) -> Option<u32> {
        self.component.and_then(|c| c.as_constant())
    }
}

/// Value type of an IO variable as declared in the generated source.
pub(super) fn io_type(
    input: &CodegenInput<'_>,
    storage_kind: StorageKind,
    access: &IoAccess,
) -> VarType {
    let defs = input.definitions;
    match access.variable {
        IoVariable::UserDefined => {
            if storage_kind.is_per_patch() {
                return VarType::F32;
            }
            let indexed = if storage_kind.is_output() {
                FeatureFlags::OA_INDEXING
            } else {
                FeatureFlags::IA_INDEXING
            };
            match access.constant_location() {
                Some(location) if !input.features.contains(indexed) => defs
                    .user_defined_type(location, storage_kind.is_output())
                    .into(),
                _ => VarType::F32,
            }
        }
        IoVariable::FragmentOutputColor => access
            .constant_location()
            .map(|location| defs.fragment_output_color_type(location).into())
            .unwrap_or(VarType::F32),
        IoVariable::FrontFacing => VarType::Bool,
        IoVariable::BaseInstance
        | IoVariable::BaseVertex
        | IoVariable::DrawIndex
        | IoVariable::InstanceId
        | IoVariable::InstanceIndex
        | IoVariable::InvocationId
        | IoVariable::Layer
        | IoVariable::PrimitiveId
        | IoVariable::VertexId
        | IoVariable::VertexIndex
        | IoVariable::ViewportIndex => VarType::S32,
        IoVariable::GlobalInvocationId
        | IoVariable::LocalInvocationId
        | IoVariable::WorkgroupId
        | IoVariable::SubgroupEqMask
        | IoVariable::SubgroupGeMask
        | IoVariable::SubgroupGtMask
        | IoVariable::SubgroupLeMask
        | IoVariable::SubgroupLtMask
        | IoVariable::SubgroupLaneId => VarType::U32,
        IoVariable::ClipDistance
        | IoVariable::FragmentCoord
        | IoVariable::FragmentOutputDepth
        | IoVariable::PointCoord
        | IoVariable::PointSize
        | IoVariable::Position
        | IoVariable::TessellationCoord
        | IoVariable::TessellationLevelInner
        | IoVariable::TessellationLevelOuter => VarType::F32,
    }
}

/// Components `0..n` of output `location` captured back to back by native transform feedback.
///
/// `None` when the location is not captured at all and keeps its plain `vec4` declaration.
pub(super) fn transform_feedback_split(input: &CodegenInput<'_>, location: u32) -> Option<u32> {
    if !input.native_transform_feedback() {
        return None;
    }
    let defs = input.definitions;
    let captured = (0..4).any(|c| defs.user_transform_feedback_output(location, c).is_some());
    captured.then(|| defs.transform_feedback_output_components(location, 0))
}

fn subgroup_mask(input: &CodegenInput<'_>, suffix: &str) -> String {
    if input.capabilities.supports_shader_ballot {
        format!("unpackUint2x32(gl_SubGroup{suffix}MaskARB)")
    } else {
        format!("gl_Subgroup{suffix}Mask")
    }
}

/// GLSL built-in backing `variable`, without any per-vertex or component indexing.
fn builtin_name(
    input: &CodegenInput<'_>,
    storage_kind: StorageKind,
    variable: IoVariable,
) -> Option<String> {
    let vulkan = input.target_api == TargetApi::Vulkan;
    let pick = |vk: &str, gl: &str| Some(if vulkan { vk } else { gl }.to_string());

    match variable {
        IoVariable::BaseInstance => pick("gl_BaseInstance", "gl_BaseInstanceARB"),
        IoVariable::BaseVertex => pick("gl_BaseVertex", "gl_BaseVertexARB"),
        IoVariable::DrawIndex => pick("gl_DrawID", "gl_DrawIDARB"),
        IoVariable::InstanceId => pick("(gl_InstanceIndex - gl_BaseInstance)", "gl_InstanceID"),
        IoVariable::InstanceIndex => {
            pick("gl_InstanceIndex", "(gl_InstanceID + gl_BaseInstanceARB)")
        }
        IoVariable::VertexId | IoVariable::VertexIndex => pick("gl_VertexIndex", "gl_VertexID"),
        IoVariable::ClipDistance => Some("gl_ClipDistance".to_string()),
        IoVariable::FragmentCoord => Some("gl_FragCoord".to_string()),
        IoVariable::FragmentOutputDepth => Some("gl_FragDepth".to_string()),
        IoVariable::FrontFacing => Some("gl_FrontFacing".to_string()),
        IoVariable::GlobalInvocationId => Some("gl_GlobalInvocationID".to_string()),
        IoVariable::InvocationId => Some("gl_InvocationID".to_string()),
        IoVariable::Layer => Some("gl_Layer".to_string()),
        IoVariable::LocalInvocationId => Some("gl_LocalInvocationID".to_string()),
        IoVariable::PointCoord => Some("gl_PointCoord".to_string()),
        IoVariable::PointSize => Some("gl_PointSize".to_string()),
        IoVariable::Position => Some("gl_Position".to_string()),
        IoVariable::PrimitiveId => Some(
            if storage_kind == StorageKind::Input
                && input.definitions.stage == ShaderStage::Geometry
            {
                "gl_PrimitiveIDIn"
            } else {
                "gl_PrimitiveID"
            }
            .to_string(),
        ),
        IoVariable::SubgroupEqMask => Some(subgroup_mask(input, "Eq")),
        IoVariable::SubgroupGeMask => Some(subgroup_mask(input, "Ge")),
        IoVariable::SubgroupGtMask => Some(subgroup_mask(input, "Gt")),
        IoVariable::SubgroupLeMask => Some(subgroup_mask(input, "Le")),
        IoVariable::SubgroupLtMask => Some(subgroup_mask(input, "Lt")),
        IoVariable::SubgroupLaneId => pick_ballot(input),
        IoVariable::TessellationCoord => Some("gl_TessCoord".to_string()),
        IoVariable::TessellationLevelInner => Some("gl_TessLevelInner".to_string()),
        IoVariable::TessellationLevelOuter => Some("gl_TessLevelOuter".to_string()),
        IoVariable::ViewportIndex => Some("gl_ViewportIndex".to_string()),
        IoVariable::WorkgroupId => Some("gl_WorkGroupID".to_string()),
        IoVariable::UserDefined | IoVariable::FragmentOutputColor => None,
    }
}

fn pick_ballot(input: &CodegenInput<'_>) -> Option<String> {
    Some(
        if input.capabilities.supports_shader_ballot {
            "gl_SubGroupInvocationARB"
        } else {
            "gl_SubgroupInvocationID"
        }
        .to_string(),
    )
}

/// Built-ins that are arrays rather than vectors.
fn is_array_builtin(variable: IoVariable) -> bool {
    matches!(
        variable,
        IoVariable::ClipDistance
            | IoVariable::TessellationLevelInner
            | IoVariable::TessellationLevelOuter
    )
}

impl Codegen<'_> {
    /// GLSL lvalue/rvalue of an IO access.
    pub(super) fn io_expression(
        &self,
        storage_kind: StorageKind,
        access: &IoAccess,
    ) -> Result<String, CodegenError> {
        match access.variable {
            IoVariable::UserDefined if storage_kind.is_per_patch() => {
                let location = access.constant_location().ok_or_else(|| {
                    CodegenError::UnsupportedIo("dynamic per-patch location".to_string())
                })?;
                Ok(format!(
                    "patch_attr{location}{}",
                    self.component_suffix(access.component)?
                ))
            }
            IoVariable::UserDefined => self.user_attribute(storage_kind, access),
            IoVariable::FragmentOutputColor => {
                let location = access.constant_location().ok_or_else(|| {
                    CodegenError::UnsupportedIo("dynamic fragment output".to_string())
                })?;
                Ok(format!(
                    "out_attr{location}{}",
                    self.component_suffix(access.component)?
                ))
            }
            variable => {
                let name = builtin_name(self.input, storage_kind, variable).ok_or_else(|| {
                    CodegenError::UnsupportedIo(format!("{variable:?}"))
                })?;
                let name = match access.vertex {
                    Some(vertex) if variable.is_per_vertex() => {
                        let block = if storage_kind.is_output() {
                            "gl_out"
                        } else {
                            "gl_in"
                        };
                        format!("{block}[{}].{name}", self.operand_as(vertex, VarType::U32)?)
                    }
                    _ => name,
                };
                let suffix = if is_array_builtin(variable) {
                    match access.component {
                        Some(c) => format!("[{}]", self.operand_as(c, VarType::U32)?),
                        None => String::new(),
                    }
                } else {
                    self.component_suffix(access.component)?
                };
                Ok(format!("{name}{suffix}"))
            }
        }
    }

    fn user_attribute(
        &self,
        storage_kind: StorageKind,
        access: &IoAccess,
    ) -> Result<String, CodegenError> {
        let is_output = storage_kind.is_output();
        let (prefix, indexed) = if is_output {
            ("out_attr", FeatureFlags::OA_INDEXING)
        } else {
            ("in_attr", FeatureFlags::IA_INDEXING)
        };
        let vertex = match access.vertex {
            Some(vertex) => format!("[{}]", self.operand_as(vertex, VarType::U32)?),
            None => String::new(),
        };
        let component = self.component_suffix(access.component)?;

        let location = match access.constant_location() {
            Some(location) if !self.input.features.contains(indexed) => location,
            _ => {
                let location = access.location.ok_or(CodegenError::MissingOperand {
                    inst: "Load",
                    index: 1,
                })?;
                return Ok(format!(
                    "{prefix}{vertex}[{}]{component}",
                    self.operand_as(location, VarType::U32)?
                ));
            }
        };

        if is_output {
            if let Some(components) = transform_feedback_split(self.input, location) {
                return self.split_output(location, components, access);
            }
        }
        Ok(format!("{prefix}{location}{vertex}{component}"))
    }

    /// Output whose captured components were declared apart from the rest of the location.
    fn split_output(
        &self,
        location: u32,
        components: u32,
        access: &IoAccess,
    ) -> Result<String, CodegenError> {
        let component = match access.component {
            None => 0,
            Some(_) => access.constant_component().ok_or_else(|| {
                CodegenError::UnsupportedIo(format!(
                    "dynamic component of captured output {location}"
                ))
            })?,
        };
        let swizzle = SWIZZLE.get(component as usize).ok_or_else(|| {
            CodegenError::UnsupportedIo(format!("component {component} of output {location}"))
        })?;
        if components > 1 && component < components {
            Ok(format!("out_attr{location}.{swizzle}"))
        } else {
            Ok(format!("out_attr{location}_{swizzle}"))
        }
    }

    fn component_suffix(&self, component: Option<Operand>) -> Result<String, CodegenError> {
        match component {
            None => Ok(String::new()),
            Some(Operand::Constant(c)) if c < 4 => Ok(format!(".{}", SWIZZLE[c as usize])),
            Some(c) => Ok(format!("[{}]", self.operand_as(c, VarType::U32)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_usage::AttributeUsage;
    use crate::definitions::ShaderDefinitions;
    use crate::gpu_accessor::HostCapabilities;
    use crate::ir::{Function, Instruction, IoVariable};
    use crate::resources::{ResourceManager, ResourceReservations};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn expression(
        defs: &ShaderDefinitions,
        api: TargetApi,
        storage_kind: StorageKind,
        sources: Vec<Operand>,
    ) -> (String, VarType) {
        let resources = ResourceManager::new(defs.stage, api, ResourceReservations::default());
        let usage = AttributeUsage::new();
        let input = CodegenInput {
            definitions: defs,
            resources: &resources,
            usage: &usage,
            features: FeatureFlags::empty(),
            capabilities: HostCapabilities::default(),
            target_api: api,
            debug: false,
        };
        let function = Function::default();
        let predeclared = BTreeSet::new();
        let codegen = Codegen {
            function: &function,
            input: &input,
            local_types: Default::default(),
            predeclared: &predeclared,
        };
        let op = Operation::with_storage(Instruction::Load, storage_kind, None, sources);
        let access = IoAccess::parse(&input, &op).unwrap();
        (
            codegen.io_expression(storage_kind, &access).unwrap(),
            io_type(&input, storage_kind, &access),
        )
    }

    #[test]
    fn draw_parameters_follow_the_target_api() {
        let defs = ShaderDefinitions::new(ShaderStage::Vertex);
        let instance_id = vec![IoVariable::InstanceId.operand()];
        assert_eq!(
            expression(&defs, TargetApi::Vulkan, StorageKind::Input, instance_id.clone()),
            ("(gl_InstanceIndex - gl_BaseInstance)".to_string(), VarType::S32)
        );
        assert_eq!(
            expression(&defs, TargetApi::OpenGl, StorageKind::Input, instance_id).0,
            "gl_InstanceID"
        );
        assert_eq!(
            expression(
                &defs,
                TargetApi::OpenGl,
                StorageKind::Input,
                vec![IoVariable::BaseVertex.operand()]
            )
            .0,
            "gl_BaseVertexARB"
        );
    }

    #[test]
    fn arrayed_inputs_index_the_vertex() {
        let defs = ShaderDefinitions::new(ShaderStage::Geometry);
        assert_eq!(
            expression(
                &defs,
                TargetApi::Vulkan,
                StorageKind::Input,
                vec![
                    IoVariable::Position.operand(),
                    Operand::Constant(2),
                    Operand::Constant(1),
                ]
            ),
            ("gl_in[2u].gl_Position.y".to_string(), VarType::F32)
        );
        assert_eq!(
            expression(
                &defs,
                TargetApi::Vulkan,
                StorageKind::Input,
                vec![
                    IoVariable::UserDefined.operand(),
                    Operand::Constant(4),
                    Operand::Constant(0),
                    Operand::Constant(3),
                ]
            )
            .0,
            "in_attr4[0u].w"
        );
        assert_eq!(
            expression(
                &defs,
                TargetApi::Vulkan,
                StorageKind::Input,
                vec![IoVariable::PrimitiveId.operand()]
            )
            .0,
            "gl_PrimitiveIDIn"
        );
    }

    #[test]
    fn clip_distances_are_indexed_and_user_inputs_keep_their_type() {
        let mut defs = ShaderDefinitions::new(ShaderStage::Vertex);
        defs.attribute_types[2].base = crate::definitions::AttributeBaseType::Sint;
        assert_eq!(
            expression(
                &defs,
                TargetApi::OpenGl,
                StorageKind::Output,
                vec![IoVariable::ClipDistance.operand(), Operand::Constant(5)]
            )
            .0,
            "gl_ClipDistance[5u]"
        );
        assert_eq!(
            expression(
                &defs,
                TargetApi::OpenGl,
                StorageKind::Input,
                vec![
                    IoVariable::UserDefined.operand(),
                    Operand::Constant(2),
                    Operand::Constant(0),
                ]
            ),
            ("in_attr2.x".to_string(), VarType::S32)
        );
    }
}
