//! Per-stage translation driver.
//!
//! A [`TranslatorContext`] wraps one decoded program together with its stage configuration. It is
//! configured by the caller with facts about the neighbouring stages and then consumed by exactly
//! one of [`TranslatorContext::translate`] or [`TranslatorContext::translate_merged`]. The
//! passthrough generators synthesize programs for the stages that follow a compute-emulated or
//! passthrough stage and can be used alongside a translation.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::attribute::{USER_ATTRIBUTES_COUNT, USER_ATTRIBUTE_BASE};
use crate::attribute_usage::{AttributeUsage, IoUsage};
use crate::cfg;
use crate::decode::{DecodedProgram, ProgramUsage};
use crate::definitions::ShaderDefinitions;
use crate::error::TranslateError;
use crate::features::FeatureFlags;
use crate::glsl::{self, CodegenInput};
use crate::gpu_accessor::GpuAccessor;
use crate::ir::{
    Function, IdAllocator, Instruction, IoVariable, NumType, Operand, Operation, SamplerType,
    StorageKind,
};
use crate::ir_builder::{self, io_sources, BuildContext, BuiltProgram, EmitOptions, EmitterContext};
use crate::resources::{
    BufferDefinition, BufferLayout, FieldType, ImageDefinition, ResourceManager,
    ResourceReservations, StructureField, TextureDefinition, MAX_VERTEX_BUFFER_TEXTURES,
    STORAGE_SET, TEXTURE_SET, TRANSFORM_FEEDBACK_BUFFERS, UNIFORM_SET,
};
use crate::structured;
use crate::transforms::{self, PassContext};
use crate::types::{InputTopology, OutputTopology, ShaderStage, TargetApi};
use crate::verify::verify_function;

/// Work group size of a compute-emulated vertex or geometry stage.
const VTG_AS_COMPUTE_LOCAL_SIZE: [u32; 3] = [32, 32, 1];

/// Bindings the vertex passthrough program reads the emulated vertex records from.
const PASSTHROUGH_VERTEX_INFO_BINDING: u32 = 1;
const PASSTHROUGH_VERTEX_DATA_BINDING: u32 = 0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TranslationFlags: u32 {
        /// Emit a banner comment naming the stage.
        const DEBUG_MODE = 1 << 0;
        /// Fail instead of logging when a compute-emulated IO access has no record slot.
        const STRICT_IO = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslationOptions {
    pub target_api: TargetApi,
    pub flags: TranslationFlags,
}

impl TranslationOptions {
    pub fn new(target_api: TargetApi, flags: TranslationFlags) -> Self {
        Self { target_api, flags }
    }
}

/// Interface of a translated program the host needs to bind it.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderProgramInfo {
    pub stage: ShaderStage,
    pub constant_buffers: Vec<BufferDefinition>,
    pub storage_buffers: Vec<BufferDefinition>,
    pub textures: Vec<TextureDefinition>,
    pub images: Vec<ImageDefinition>,
    pub used_features: FeatureFlags,
    /// Bit `n` set when clip distance `n` is written.
    pub clip_distances_written: u8,
    /// Render target components written by a fragment program (`omap_targets` layout).
    pub fragment_output_map: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderProgram {
    pub info: ShaderProgramInfo,
    pub code: String,
    pub reservations: ResourceReservations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Unconfigured,
    Translated,
    MergedAndTranslated,
    PassthroughSynthesized,
}

impl ContextState {
    fn name(self) -> &'static str {
        match self {
            ContextState::Unconfigured => "unconfigured",
            ContextState::Translated => "translated",
            ContextState::MergedAndTranslated => "merged and translated",
            ContextState::PassthroughSynthesized => "passthrough synthesized",
        }
    }
}

pub struct TranslatorContext<'a> {
    program: &'a DecodedProgram,
    definitions: ShaderDefinitions,
    gpu_accessor: &'a dyn GpuAccessor,
    options: TranslationOptions,
    usage: ProgramUsage,
    /// Output interface of the vertex stage feeding a compute-emulated geometry stage.
    vertex_output: IoUsage,
    layer_output_attribute: Option<u32>,
    layer_input_attribute: Option<u32>,
    state: ContextState,
}

impl<'a> TranslatorContext<'a> {
    pub fn new(
        program: &'a DecodedProgram,
        definitions: ShaderDefinitions,
        gpu_accessor: &'a dyn GpuAccessor,
        options: TranslationOptions,
    ) -> Self {
        let usage = program.scan_usage(definitions.stage);
        Self {
            program,
            definitions,
            gpu_accessor,
            options,
            usage,
            vertex_output: IoUsage::new(
                FeatureFlags::empty(),
                0,
                (1 << USER_ATTRIBUTES_COUNT) - 1,
            ),
            layer_output_attribute: None,
            layer_input_attribute: None,
            state: ContextState::Unconfigured,
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.definitions.stage
    }

    pub fn definitions(&self) -> &ShaderDefinitions {
        &self.definitions
    }

    pub fn attribute_usage(&self) -> &AttributeUsage {
        &self.usage.attributes
    }

    pub fn used_features(&self) -> FeatureFlags {
        self.usage.features
    }

    pub fn layer_output_attribute(&self) -> Option<u32> {
        self.layer_output_attribute
    }

    /// Makes this stage write every attribute `next` reads.
    ///
    /// A stage followed by anything but the fragment stage (or a passthrough geometry stage,
    /// which can not modify what it forwards) is no longer the last in the vertex pipeline.
    pub fn set_next_stage(&mut self, next: &TranslatorContext<'_>) {
        self.usage.attributes = self
            .usage
            .attributes
            .merge_from_next_stage(self.definitions.gp_passthrough, &next.usage.attributes);

        let next_defs = &next.definitions;
        let forwards_only = next_defs.stage == ShaderStage::Geometry && next_defs.gp_passthrough;
        if next_defs.stage != ShaderStage::Fragment && !forwards_only {
            self.definitions.last_in_vertex_pipeline = false;
        }
    }

    pub fn merge_output_user_attributes(&mut self, mask: u32, per_patch: impl IntoIterator<Item = u32>) {
        self.usage.attributes = self.usage.attributes.merge_output_user_attributes(
            self.definitions.gp_passthrough,
            mask,
            per_patch,
        );
    }

    pub fn set_last_in_vertex_pipeline(&mut self) {
        self.definitions.last_in_vertex_pipeline = true;
    }

    /// Records the attribute address a host-side layer emulation writes the layer to.
    pub fn set_layer_output_attribute(&mut self, attribute: u32) {
        self.layer_output_attribute = Some(attribute);
    }

    /// Makes a passthrough geometry program forward `attribute` of its input as the layer.
    pub fn set_geometry_shader_layer_input_attribute(&mut self, attribute: u32) {
        self.usage.features |= FeatureFlags::RT_LAYER;
        self.layer_input_attribute = Some(attribute);
    }

    pub fn set_vertex_output_map_for_geometry_as_compute(&mut self, vertex: &TranslatorContext<'_>) {
        self.vertex_output = vertex.io_usage();
    }

    /// Output interface of this stage as the compute emulation record sees it.
    pub fn io_usage(&self) -> IoUsage {
        IoUsage::new(
            self.usage.features,
            self.usage.clip_distances_written,
            self.usage.attributes.used_output_attributes,
        )
    }

    /// Reservations a compute-emulated translation of this stage uses.
    pub fn get_resource_reservations(&self) -> ResourceReservations {
        ResourceReservations::new(
            self.transform_feedback_emulated(),
            true,
            Some(self.vertex_output),
            Some(self.io_usage()),
        )
    }

    fn transform_feedback_emulated(&self) -> bool {
        !self.gpu_accessor.host_capabilities().supports_transform_feedback
            && self.gpu_accessor.query_transform_feedback_enabled()
    }

    /// Synthesized passthroughs never consume the decoded program, so they do not count.
    fn check_unconfigured(&self) -> Result<(), TranslateError> {
        match self.state {
            ContextState::Unconfigured | ContextState::PassthroughSynthesized => Ok(()),
            state => Err(TranslateError::InvalidState {
                expected: ContextState::Unconfigured.name(),
                actual: state.name(),
            }),
        }
    }

    fn translation_definitions(&self, as_compute: bool) -> ShaderDefinitions {
        if as_compute {
            let [x, y, z] = VTG_AS_COMPUTE_LOCAL_SIZE;
            self.definitions.as_compute(x, y, z)
        } else {
            self.definitions.clone()
        }
    }

    fn translation_features(&self, as_compute: bool) -> FeatureFlags {
        if as_compute {
            self.usage.features | FeatureFlags::VTG_AS_COMPUTE
        } else {
            self.usage.features
        }
    }

    /// Translates this stage alone.
    ///
    /// With `as_compute` a vertex or geometry program is emulated by a compute dispatch.
    pub fn translate(&mut self, as_compute: bool) -> Result<ShaderProgram, TranslateError> {
        self.check_unconfigured()?;

        let definitions = self.translation_definitions(as_compute);
        let mut resources = self.create_resource_manager(&definitions, as_compute);
        resources.set_current_local_memory(
            self.program.local_memory_size,
            self.usage.features.contains(FeatureFlags::LOCAL_MEMORY),
        );
        if self.definitions.stage == ShaderStage::Compute {
            resources.set_current_shared_memory(
                self.gpu_accessor.query_compute_shared_memory_size(),
                self.usage.features.contains(FeatureFlags::SHARED_MEMORY),
            );
        }

        let mut features = self.translation_features(as_compute);
        let built = self.build(
            &definitions,
            &mut resources,
            &self.usage,
            IdAllocator::default(),
            EmitOptions::default(),
            &mut features,
        )?;

        let program = Compilation {
            definitions: &definitions,
            attributes: &self.usage.attributes,
            gpu_accessor: self.gpu_accessor,
            options: self.options,
            clip_distances_written: self.usage.clip_distances_written,
        }
        .translate(built.ops, built.ids, resources, features)?;

        self.state = ContextState::Translated;
        Ok(program)
    }

    /// Fuses `other` (which runs first) and this stage into one program.
    ///
    /// User attributes that `other` writes and this stage reads travel through compiler
    /// variables instead of stage IO.
    pub fn translate_merged(
        &mut self,
        other: &mut TranslatorContext<'_>,
        as_compute: bool,
    ) -> Result<ShaderProgram, TranslateError> {
        self.check_unconfigured()?;

        let definitions = self.translation_definitions(as_compute);
        let mut resources = self.create_resource_manager(&definitions, as_compute);
        let mut features = self.translation_features(as_compute);

        resources.set_current_local_memory(
            self.program.local_memory_size,
            self.usage.features.contains(FeatureFlags::LOCAL_MEMORY),
        );
        let second = self.build(
            &definitions,
            &mut resources,
            &self.usage,
            IdAllocator::default(),
            EmitOptions {
                initialize_outputs: false,
                prologue: false,
                epilogue: true,
            },
            &mut features,
        )?;

        other.merge_output_user_attributes(self.usage.attributes.used_output_attributes, []);
        let other_definitions = other.translation_definitions(as_compute);
        resources.set_current_local_memory(
            other.program.local_memory_size,
            other.usage.features.contains(FeatureFlags::LOCAL_MEMORY),
        );
        let first = other.build(
            &other_definitions,
            &mut resources,
            &other.usage,
            second.ids,
            EmitOptions {
                initialize_outputs: true,
                prologue: true,
                epilogue: false,
            },
            &mut features,
        )?;

        let (ops, ids) = combine(first, second.ops);
        tracing::debug!(
            first = other.definitions.stage.name(),
            second = self.definitions.stage.name(),
            ops = ops.len(),
            "merged stages"
        );

        features |= other.usage.features;
        let attributes = self.usage.attributes.inherit_from(&other.usage.attributes);
        let program = Compilation {
            definitions: &definitions,
            attributes: &attributes,
            gpu_accessor: self.gpu_accessor,
            options: self.options,
            clip_distances_written: self.usage.clip_distances_written
                | other.usage.clip_distances_written,
        }
        .translate(ops, ids, resources, features)?;

        self.state = ContextState::MergedAndTranslated;
        Ok(program)
    }

    /// Vertex program that replays the records a compute-emulated stage wrote.
    ///
    /// Emulated vertex stages are indexed by instance and vertex; an emulated geometry stage
    /// writes its records in output order.
    pub fn generate_vertex_passthrough_for_compute(&mut self) -> Result<ShaderProgram, TranslateError> {
        let instanced = self.definitions.stage == ShaderStage::Vertex;
        self.replay_records(instanced)
    }

    /// Vertex program that replays the vertices a compute-emulated geometry stage emitted. The
    /// host draws it with the index buffer the emulation wrote.
    pub fn generate_geometry_passthrough_for_compute(&mut self) -> Result<ShaderProgram, TranslateError> {
        if self.definitions.stage != ShaderStage::Geometry {
            return Err(TranslateError::InvalidState {
                expected: ShaderStage::Geometry.name(),
                actual: self.definitions.stage.name(),
            });
        }
        self.replay_records(false)
    }

    fn replay_records(&mut self, instanced: bool) -> Result<ShaderProgram, TranslateError> {
        let api = self.options.target_api;
        let reservations = self.get_resource_reservations();
        let definitions = ShaderDefinitions::new(ShaderStage::Vertex);
        let mut resources =
            ResourceManager::new(ShaderStage::Vertex, api, ResourceReservations::default());

        if instanced {
            resources.add_constant_buffer(BufferDefinition {
                layout: BufferLayout::Std140,
                set: UNIFORM_SET,
                binding: PASSTHROUGH_VERTEX_INFO_BINDING,
                name: "vb_info".to_string(),
                fields: vec![StructureField::new(FieldType::Vec4(NumType::U32), "vertex_counts")],
            });
        }
        resources.add_storage_buffer(BufferDefinition {
            layout: BufferLayout::Std430,
            set: STORAGE_SET,
            binding: PASSTHROUGH_VERTEX_DATA_BINDING,
            name: "vb_input".to_string(),
            fields: vec![StructureField::runtime_array(FieldType::Scalar(NumType::F32), "data")],
        });

        let mut em = EmitterContext::new(IdAllocator::default());
        let (vertex_id, instance_id) = match api {
            TargetApi::OpenGl => (IoVariable::VertexId, IoVariable::InstanceId),
            TargetApi::Vulkan => (IoVariable::VertexIndex, IoVariable::InstanceIndex),
        };
        let mut vertex = em.load(StorageKind::Input, vec![vertex_id.operand()]);
        if instanced {
            let vertex_count = em.load(
                StorageKind::ConstantBuffer,
                vec![
                    Operand::Constant(PASSTHROUGH_VERTEX_INFO_BINDING),
                    Operand::Constant(0),
                    Operand::Constant(0),
                ],
            );
            // Base instance is always zero for the replay draw.
            let instance = em.load(StorageKind::Input, vec![instance_id.operand()]);
            let instance_base = em.imul(instance, vertex_count);
            vertex = em.iadd(instance_base, vertex);
        }
        let base = em.imul(vertex, Operand::Constant(reservations.output_size_per_invocation));

        let mut attributes = AttributeUsage::new();
        for (io, offset) in reservations.offsets() {
            if io.storage_kind != StorageKind::Output {
                continue;
            }
            let position = if offset == 0 {
                base
            } else {
                em.iadd(base, Operand::Constant(offset))
            };
            let value = em.load(
                StorageKind::StorageBuffer,
                vec![
                    Operand::Constant(PASSTHROUGH_VERTEX_DATA_BINDING),
                    Operand::Constant(0),
                    position,
                ],
            );

            let mut sources = io_sources(
                &definitions,
                StorageKind::Output,
                io.variable,
                Operand::Constant(io.location),
                Operand::Constant(0),
                Operand::Constant(io.component),
            );
            sources.push(value);
            em.store(StorageKind::Output, sources);

            if io.variable == IoVariable::UserDefined {
                attributes.set_output_user_attribute(io.location);
            }
        }
        em.ret();

        let (ops, ids) = em.finish();
        let program = Compilation {
            definitions: &definitions,
            attributes: &attributes,
            gpu_accessor: self.gpu_accessor,
            options: self.options,
            clip_distances_written: 0,
        }
        .generate(ops, ids, resources, FeatureFlags::empty())?;

        self.mark_passthrough_synthesized();
        Ok(program)
    }

    /// Native geometry program forwarding every output attribute of this stage, for hosts
    /// without `GL_NV_geometry_shader_passthrough`.
    pub fn generate_geometry_passthrough(&mut self) -> Result<ShaderProgram, TranslateError> {
        let input_topology = self.gpu_accessor.query_primitive_topology();
        let (output_topology, max_output_vertices) = match input_topology {
            InputTopology::Points => (OutputTopology::PointList, 1),
            InputTopology::Lines | InputTopology::LinesAdjacency => (OutputTopology::LineStrip, 2),
            InputTopology::Triangles | InputTopology::TrianglesAdjacency => {
                (OutputTopology::TriangleStrip, 3)
            }
        };
        let definitions =
            ShaderDefinitions::geometry(input_topology, output_topology, max_output_vertices);
        let resources = ResourceManager::new(
            ShaderStage::Geometry,
            self.options.target_api,
            ResourceReservations::default(),
        );

        let outputs = self.usage.attributes.used_output_attributes;
        let mut attributes = AttributeUsage::new();
        let mut em = EmitterContext::new(IdAllocator::default());
        for vertex in 0..max_output_vertices {
            for location in (0..USER_ATTRIBUTES_COUNT).filter(|l| outputs & (1 << l) != 0) {
                for component in 0..4 {
                    let sources = io_sources(
                        &definitions,
                        StorageKind::Input,
                        IoVariable::UserDefined,
                        Operand::Constant(location),
                        Operand::Constant(vertex),
                        Operand::Constant(component),
                    );
                    let value = em.load(StorageKind::Input, sources);
                    attributes.set_input_user_attribute(location, component);

                    let address = USER_ATTRIBUTE_BASE + location * 16 + component * 4;
                    if self.layer_output_attribute == Some(address) {
                        em.store(StorageKind::Output, vec![IoVariable::Layer.operand(), value]);
                    } else {
                        em.store(
                            StorageKind::Output,
                            vec![
                                IoVariable::UserDefined.operand(),
                                Operand::Constant(location),
                                Operand::Constant(component),
                                value,
                            ],
                        );
                        attributes.set_output_user_attribute(location);
                    }
                }
            }

            for component in 0..4 {
                let value = em.load(
                    StorageKind::Input,
                    vec![
                        IoVariable::Position.operand(),
                        Operand::Constant(vertex),
                        Operand::Constant(component),
                    ],
                );
                em.store(
                    StorageKind::Output,
                    vec![IoVariable::Position.operand(), Operand::Constant(component), value],
                );
            }
            em.emit_vertex();
        }
        em.end_primitive();
        em.ret();

        let (ops, ids) = em.finish();
        let program = Compilation {
            definitions: &definitions,
            attributes: &attributes,
            gpu_accessor: self.gpu_accessor,
            options: self.options,
            clip_distances_written: 0,
        }
        .generate(ops, ids, resources, FeatureFlags::RT_LAYER)?;

        self.mark_passthrough_synthesized();
        Ok(program)
    }

    fn mark_passthrough_synthesized(&mut self) {
        if self.state == ContextState::Unconfigured {
            self.state = ContextState::PassthroughSynthesized;
        }
    }

    fn build(
        &self,
        definitions: &ShaderDefinitions,
        resources: &mut ResourceManager,
        usage: &ProgramUsage,
        ids: IdAllocator,
        options: EmitOptions,
        features: &mut FeatureFlags,
    ) -> Result<BuiltProgram, TranslateError> {
        let mut ctx = BuildContext {
            definitions,
            resources,
            gpu_accessor: self.gpu_accessor,
            usage,
            features: FeatureFlags::empty(),
            layer_input_attribute: self.layer_input_attribute,
        };
        let built = ir_builder::build_program(self.program, &mut ctx, ids, options)?;
        *features |= ctx.features;
        Ok(built)
    }

    /// Declares the buffers and textures the emulation passes and epilogues address by binding.
    fn create_resource_manager(
        &self,
        definitions: &ShaderDefinitions,
        as_compute: bool,
    ) -> ResourceManager {
        let tfe_emulated = self.transform_feedback_emulated();
        let reservations = ResourceReservations::new(
            tfe_emulated,
            as_compute,
            Some(self.vertex_output),
            Some(self.io_usage()),
        );
        // Resources belong to the stage the program was written for, even when emulated.
        let mut resources = ResourceManager::new(
            definitions.original_stage,
            self.options.target_api,
            reservations.clone(),
        );

        if tfe_emulated {
            if let Some(info) = reservations.transform_feedback_info_binding {
                resources.add_storage_buffer(BufferDefinition {
                    layout: BufferLayout::Std430,
                    set: STORAGE_SET,
                    binding: info,
                    name: "tfe_info".to_string(),
                    fields: vec![
                        StructureField::array(FieldType::Scalar(NumType::U32), "base_offset", 4),
                        StructureField::new(FieldType::Scalar(NumType::U32), "vertex_count"),
                    ],
                });
            }
            for index in 0..TRANSFORM_FEEDBACK_BUFFERS {
                let Some(binding) = reservations.transform_feedback_buffer_binding(index) else {
                    continue;
                };
                resources.add_storage_buffer(data_buffer(binding, &format!("tfe_data{index}"), NumType::U32));
            }
        }

        if as_compute {
            let stage = self.definitions.stage;
            resources.add_constant_buffer(BufferDefinition {
                layout: BufferLayout::Std140,
                set: UNIFORM_SET,
                binding: reservations.vertex_info_constant_buffer_binding,
                name: "vb_info".to_string(),
                fields: vec![
                    StructureField::new(FieldType::Vec4(NumType::U32), "vertex_counts"),
                    StructureField::new(FieldType::Vec4(NumType::U32), "geometry_counts"),
                    StructureField::array(
                        FieldType::Vec4(NumType::U32),
                        "vertex_strides",
                        MAX_VERTEX_BUFFER_TEXTURES,
                    ),
                    StructureField::array(
                        FieldType::Scalar(NumType::U32),
                        "vertex_divisors",
                        MAX_VERTEX_BUFFER_TEXTURES,
                    ),
                ],
            });
            resources.add_storage_buffer(data_buffer(
                reservations.vertex_output_storage_buffer_binding,
                "vertex_output",
                NumType::F32,
            ));

            match stage {
                ShaderStage::Vertex => {
                    resources.add_texture(buffer_texture(
                        reservations.index_buffer_texture_binding,
                        "ib_data".to_string(),
                        NumType::U32,
                    ));
                    let inputs = self.usage.attributes.used_input_attributes;
                    for location in (0..USER_ATTRIBUTES_COUNT).filter(|l| inputs & (1 << l) != 0) {
                        resources.add_texture(buffer_texture(
                            reservations.vertex_buffer_texture_binding(location),
                            format!("vb_data{location}"),
                            definitions.vertex_buffer_fetch_type(location),
                        ));
                    }
                }
                ShaderStage::Geometry => {
                    resources.add_texture(buffer_texture(
                        reservations.topology_remap_buffer_texture_binding,
                        "trb_data".to_string(),
                        NumType::U32,
                    ));
                    resources.add_storage_buffer(data_buffer(
                        reservations.geometry_vertex_output_storage_buffer_binding,
                        "geometry_vb_output",
                        NumType::F32,
                    ));
                    resources.add_storage_buffer(data_buffer(
                        reservations.geometry_index_output_storage_buffer_binding,
                        "geometry_ib_output",
                        NumType::U32,
                    ));
                }
                _ => {}
            }

            resources.set_vertex_as_compute_local_memories(stage, definitions.input_topology);
        }

        resources
    }
}

fn data_buffer(binding: u32, name: &str, ty: NumType) -> BufferDefinition {
    BufferDefinition {
        layout: BufferLayout::Std430,
        set: STORAGE_SET,
        binding,
        name: name.to_string(),
        fields: vec![StructureField::runtime_array(FieldType::Scalar(ty), "data")],
    }
}

fn buffer_texture(binding: u32, name: String, result: NumType) -> TextureDefinition {
    TextureDefinition {
        set: TEXTURE_SET,
        binding,
        name,
        sampler_type: SamplerType::TextureBuffer,
        result,
    }
}

/// Location and component of a user attribute access with constant operands.
fn user_attribute_slot(op: &Operation) -> Option<(u32, u32)> {
    if op.io_variable()? != IoVariable::UserDefined {
        return None;
    }
    let trailing = if op.inst == Instruction::Store { 2 } else { 1 };
    let location = op.source(1)?.as_constant()?;
    let component = op.source(op.sources.len().checked_sub(trailing)?)?.as_constant()?;
    Some((location, component))
}

/// Concatenates `first` and `second`.
///
/// Returns of the first program's body branch to the start of the second; the ones in its
/// prologue still end the invocation. Attributes the first program stores and the second loads
/// are carried in variables.
fn combine(first: BuiltProgram, second: Vec<Operation>) -> (Vec<Operation>, IdAllocator) {
    let BuiltProgram {
        ops: first_ops,
        mut ids,
        body_start,
    } = first;

    let mut bridged: BTreeMap<(u32, u32), Operand> = BTreeMap::new();
    for op in &second {
        if !op.is_load(StorageKind::Input) {
            continue;
        }
        if let Some(slot) = user_attribute_slot(op) {
            bridged.entry(slot).or_insert_with(|| ids.new_variable());
        }
    }

    let second_start = ids.new_label();
    let mut ops = Vec::with_capacity(first_ops.len() + second.len() + 1);
    let mut written = BTreeMap::new();
    for (index, mut op) in first_ops.into_iter().enumerate() {
        let slot = user_attribute_slot(&op).filter(|_| op.is_store(StorageKind::Output));
        if let Some((slot, &variable)) = slot.and_then(|slot| Some((slot, bridged.get(&slot)?))) {
            written.insert(slot, variable);
            let value = op.sources.last().copied().unwrap_or(Operand::Undefined);
            op.dest = Some(variable);
            op.turn_into_copy(value);
        }
        if op.inst == Instruction::Return && index >= body_start {
            ops.push(Operation::new(Instruction::Branch, None, vec![second_start]));
        } else {
            ops.push(op);
        }
    }

    ops.push(Operation::new(Instruction::MarkLabel, None, vec![second_start]));
    for mut op in second {
        if op.is_load(StorageKind::Input) {
            if let Some(&variable) = user_attribute_slot(&op).and_then(|slot| written.get(&slot)) {
                op.turn_into_copy(variable);
            }
        }
        ops.push(op);
    }

    (ops, ids)
}

/// Inputs of one pipeline run shared by every translation entry point.
struct Compilation<'c> {
    definitions: &'c ShaderDefinitions,
    attributes: &'c AttributeUsage,
    gpu_accessor: &'c dyn GpuAccessor,
    options: TranslationOptions,
    clip_distances_written: u8,
}

impl Compilation<'_> {
    /// Full pipeline over freshly built operations: verification, transform passes, code
    /// generation.
    fn translate(
        &self,
        ops: Vec<Operation>,
        ids: IdAllocator,
        mut resources: ResourceManager,
        mut features: FeatureFlags,
    ) -> Result<ShaderProgram, TranslateError> {
        let mut function = cfg::build_function(ops, ids)?;
        verify_function(&function, self.definitions, &resources)
            .map_err(|e| TranslateError::verify("IR construction", e))?;

        let mut ctx = PassContext {
            definitions: self.definitions,
            resources: &mut resources,
            gpu_accessor: self.gpu_accessor,
            stage: self.definitions.original_stage,
            unresolved: Vec::new(),
        };
        transforms::run_passes(&mut function, &mut ctx, &mut features);
        let unresolved = ctx.unresolved;
        if self.options.flags.contains(TranslationFlags::STRICT_IO) {
            if let Some(first) = unresolved.into_iter().next() {
                return Err(TranslateError::UnresolvedIo {
                    kind: first.kind,
                    variable: first.variable,
                });
            }
        }
        verify_function(&function, self.definitions, &resources)
            .map_err(|e| TranslateError::verify("transform passes", e))?;

        self.emit(&mut function, resources, features)
    }

    /// Code generation for synthesized programs, which need no legalization.
    fn generate(
        &self,
        ops: Vec<Operation>,
        ids: IdAllocator,
        resources: ResourceManager,
        features: FeatureFlags,
    ) -> Result<ShaderProgram, TranslateError> {
        let mut function = cfg::build_function(ops, ids)?;
        verify_function(&function, self.definitions, &resources)
            .map_err(|e| TranslateError::verify("passthrough synthesis", e))?;
        self.emit(&mut function, resources, features)
    }

    fn emit(
        &self,
        function: &mut Function,
        mut resources: ResourceManager,
        features: FeatureFlags,
    ) -> Result<ShaderProgram, TranslateError> {
        declare_guest_constant_buffers(function, &mut resources);
        let structured = structured::structure(function)?;

        let input = CodegenInput {
            definitions: self.definitions,
            resources: &resources,
            usage: self.attributes,
            features,
            capabilities: self.gpu_accessor.host_capabilities(),
            target_api: self.options.target_api,
            debug: self.options.flags.contains(TranslationFlags::DEBUG_MODE),
        };
        let code = glsl::generate(function, &structured, &input)?;

        let stage = self.definitions.stage;
        tracing::debug!(
            stage = stage.name(),
            features = ?features,
            "translation finished"
        );

        Ok(ShaderProgram {
            info: ShaderProgramInfo {
                stage,
                constant_buffers: resources.constant_buffers(),
                storage_buffers: resources.storage_buffers(),
                textures: resources.textures(),
                images: resources.images(),
                used_features: features,
                clip_distances_written: self.clip_distances_written,
                fragment_output_map: (stage == ShaderStage::Fragment)
                    .then_some(self.definitions.omap_targets),
            },
            code,
            reservations: resources.reservations().clone(),
        })
    }
}

/// Declares every guest constant buffer an operand still reads after the passes.
fn declare_guest_constant_buffers(function: &Function, resources: &mut ResourceManager) {
    for (_, id) in function.all_ops() {
        let op = function.op(id);
        for operand in op.sources.iter().chain(op.dest.iter()) {
            if let Operand::ConstantBuffer { slot, .. } = *operand {
                resources.get_constant_buffer_binding(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedBlock, DecodedInstruction, DecodedOp, Src};
    use crate::gpu_accessor::DefaultGpuAccessor;
    use crate::ir::Register;
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

    fn store_attribute(src: u8, address: u32, count: u8) -> DecodedOp {
        DecodedOp::Ast {
            src: Register(src),
            count,
            address,
            vertex: None,
            offset: None,
            per_patch: false,
        }
    }

    fn load_attribute(dest: u8, address: u32, count: u8) -> DecodedOp {
        DecodedOp::Ald {
            dest: Register(dest),
            count,
            address,
            vertex: None,
            offset: None,
            per_patch: false,
            output: false,
        }
    }

    #[test]
    fn a_context_translates_once() {
        let program = program(vec![store_attribute(0, 0x070, 4), DecodedOp::Exit]);
        let mut ctx = TranslatorContext::new(
            &program,
            ShaderDefinitions::new(ShaderStage::Vertex),
            &DefaultGpuAccessor,
            TranslationOptions::default(),
        );

        let shader = ctx.translate(false).unwrap();
        assert_eq!(shader.info.stage, ShaderStage::Vertex);
        assert!(shader.code.contains("gl_Position.w = "));

        match ctx.translate(false) {
            Err(TranslateError::InvalidState { expected, actual }) => {
                assert_eq!((expected, actual), ("unconfigured", "translated"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn next_stage_reads_extend_outputs_and_end_the_pipeline() {
        let vertex_program = program(vec![DecodedOp::Exit]);
        let geometry_program = program(vec![load_attribute(0, 0x0a0, 1), DecodedOp::Exit]);
        let mut vertex = TranslatorContext::new(
            &vertex_program,
            ShaderDefinitions::new(ShaderStage::Vertex),
            &DefaultGpuAccessor,
            TranslationOptions::default(),
        );
        let geometry = TranslatorContext::new(
            &geometry_program,
            ShaderDefinitions::new(ShaderStage::Geometry),
            &DefaultGpuAccessor,
            TranslationOptions::default(),
        );

        vertex.set_next_stage(&geometry);
        assert_eq!(vertex.attribute_usage().used_output_attributes, 1 << 2);
        assert!(!vertex.definitions().last_in_vertex_pipeline);

        vertex.set_last_in_vertex_pipeline();
        assert!(vertex.definitions().last_in_vertex_pipeline);
    }

    #[test]
    fn merged_stages_bridge_attributes_through_variables() {
        // First stage writes location 0, second reads it back and forwards it to location 1.
        let first = program(vec![
            DecodedOp::Mov {
                dest: Register(0),
                src: Src::Immediate(0x3f80_0000),
            },
            store_attribute(0, 0x080, 1),
            DecodedOp::Exit,
        ]);
        let second = program(vec![
            load_attribute(4, 0x080, 1),
            store_attribute(4, 0x090, 1),
            DecodedOp::Exit,
        ]);
        let mut vertex_a = TranslatorContext::new(
            &first,
            ShaderDefinitions::new(ShaderStage::Vertex),
            &DefaultGpuAccessor,
            TranslationOptions::default(),
        );
        let mut vertex_b = TranslatorContext::new(
            &second,
            ShaderDefinitions::new(ShaderStage::Vertex),
            &DefaultGpuAccessor,
            TranslationOptions::default(),
        );

        let shader = vertex_b.translate_merged(&mut vertex_a, false).unwrap();
        assert!(shader.code.contains("uint var_0;"));
        assert!(shader.code.contains("var_0 = "));
        assert!(shader.code.contains("r4 = var_0;"));
        assert!(shader.code.contains("out_attr1.x = "));
        // Only `x` is read back; the other components of location 0 stay outputs.
        assert!(shader.code.contains("out_attr0.y = "));
        assert!(!shader.code.contains("out_attr0.x = "));
        assert_eq!(
            vertex_b.translate(false).unwrap_err().to_string(),
            "translator context is merged and translated, expected unconfigured"
        );
    }

    #[test]
    fn geometry_passthrough_forwards_outputs_and_layer() {
        let program = program(vec![
            store_attribute(0, 0x070, 4),
            store_attribute(4, 0x080, 4),
            store_attribute(8, 0x0a0, 4),
            DecodedOp::Exit,
        ]);
        let mut vertex = TranslatorContext::new(
            &program,
            ShaderDefinitions::new(ShaderStage::Vertex),
            &DefaultGpuAccessor,
            TranslationOptions::new(TargetApi::Vulkan, TranslationFlags::empty()),
        );
        vertex.set_layer_output_attribute(0x0a0);

        let shader = vertex.generate_geometry_passthrough().unwrap();
        assert_eq!(shader.info.stage, ShaderStage::Geometry);
        assert!(shader.info.used_features.contains(FeatureFlags::RT_LAYER));
        assert!(shader.code.contains("layout (invocations = 1, points) in;"));
        assert!(shader.code.contains("layout (points, max_vertices = 1) out;"));
        assert!(shader.code.contains("gl_Layer = "));
        assert!(shader.code.contains("out_attr0.w = "));
        assert!(!shader.code.contains("out_attr2.x = "));
        assert_eq!(shader.code.matches("EmitVertex();").count(), 1);

        // Passthrough synthesis does not consume the context.
        assert!(vertex.translate(false).is_ok());
    }

    #[test]
    fn geometry_records_replay_in_output_order() {
        let geometry_program = program(vec![
            store_attribute(0, 0x070, 4),
            store_attribute(4, 0x080, 4),
            DecodedOp::Out {
                emit: true,
                cut: false,
            },
            DecodedOp::Exit,
        ]);
        let mut geometry = TranslatorContext::new(
            &geometry_program,
            ShaderDefinitions::geometry(InputTopology::Triangles, OutputTopology::TriangleStrip, 3),
            &DefaultGpuAccessor,
            TranslationOptions::new(TargetApi::Vulkan, TranslationFlags::empty()),
        );

        let shader = geometry.generate_geometry_passthrough_for_compute().unwrap();
        assert_eq!(shader.info.stage, ShaderStage::Vertex);
        assert!(shader.code.contains("vb_input"));
        assert!(!shader.code.contains("vb_info"));
        assert!(!shader.code.contains("gl_InstanceIndex"));
        assert!(shader.code.contains("gl_Position.w = "));
        assert!(shader.code.contains("out_attr0.w = "));

        let vertex_program = program(vec![DecodedOp::Exit]);
        let mut vertex = TranslatorContext::new(
            &vertex_program,
            ShaderDefinitions::new(ShaderStage::Vertex),
            &DefaultGpuAccessor,
            TranslationOptions::default(),
        );
        match vertex.generate_geometry_passthrough_for_compute() {
            Err(TranslateError::InvalidState { expected, actual }) => {
                assert_eq!((expected, actual), ("geometry", "vertex"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn emulated_stage_resources_keep_the_original_stage() {
        let program = program(vec![store_attribute(0, 0x070, 4), DecodedOp::Exit]);
        let ctx = TranslatorContext::new(
            &program,
            ShaderDefinitions::new(ShaderStage::Vertex),
            &DefaultGpuAccessor,
            TranslationOptions::default(),
        );

        let definitions = ctx.translation_definitions(true);
        assert_eq!(definitions.stage, ShaderStage::Compute);
        let resources = ctx.create_resource_manager(&definitions, true);
        assert_eq!(resources.stage(), ShaderStage::Vertex);
    }

    #[test]
    fn combine_keeps_prologue_returns() {
        let mut ids = IdAllocator::default();
        let skip = ids.new_label();
        let guard = ids.new_local();
        let ops = vec![
            Operation::new(Instruction::BranchIfFalse, None, vec![skip, guard]),
            Operation::new(Instruction::Return, None, vec![]),
            Operation::new(Instruction::MarkLabel, None, vec![skip]),
            Operation::new(Instruction::Return, None, vec![]),
        ];
        let first = BuiltProgram {
            ops,
            ids,
            body_start: 3,
        };
        let second = vec![Operation::new(Instruction::Return, None, vec![])];

        let (ops, _) = combine(first, second);
        let insts: Vec<_> = ops.iter().map(|op| op.inst.name()).collect();
        assert_eq!(
            insts,
            vec!["BranchIfFalse", "Return", "MarkLabel", "Branch", "MarkLabel", "Return"]
        );
        assert_eq!(ops[3].sources, ops[4].sources);
    }
}
