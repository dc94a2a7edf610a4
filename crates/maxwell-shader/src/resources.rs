//! Binding allocation and the per-vertex record layout used by compute emulation.
//!
//! Binding contract (one descriptor set per resource class):
//! - set 0: uniform buffers. Binding 0 is reserved for the host support buffer, guest constant
//!   buffer `n` lands at `reserved + n`.
//! - set 1: storage buffers (transform feedback emulation, compute emulation, guest global memory).
//! - set 2: textures (compute emulation index/vertex/remap buffers, then guest textures).
//! - set 3: images.
//!
//! Internal resources always take the lowest bindings of their set so that the host can bind them
//! without inspecting the translated program.

use std::collections::BTreeMap;

use crate::attribute::USER_ATTRIBUTES_COUNT;
use crate::attribute_usage::IoUsage;
use crate::ir::{IoVariable, NumType, SamplerType, StorageKind};
use crate::types::{InputTopology, ShaderStage, TargetApi};

pub const UNIFORM_SET: u32 = 0;
pub const STORAGE_SET: u32 = 1;
pub const TEXTURE_SET: u32 = 2;
pub const IMAGE_SET: u32 = 3;

/// Vertex buffers the compute-emulated vertex stage can fetch from.
pub const MAX_VERTEX_BUFFER_TEXTURES: u32 = 32;
pub const TRANSFORM_FEEDBACK_BUFFERS: u32 = 4;

/// `uvec4` elements of a guest constant buffer (64 KiB).
const CONSTANT_BUFFER_VEC4S: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferLayout {
    Std140,
    Std430,
}

impl BufferLayout {
    pub fn glsl_name(self) -> &'static str {
        match self {
            BufferLayout::Std140 => "std140",
            BufferLayout::Std430 => "std430",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(NumType),
    Vec4(NumType),
}

impl FieldType {
    pub fn num_type(self) -> NumType {
        match self {
            FieldType::Scalar(ty) | FieldType::Vec4(ty) => ty,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, FieldType::Vec4(_))
    }

    pub fn glsl_name(self) -> &'static str {
        match self {
            FieldType::Scalar(NumType::S32) => "int",
            FieldType::Scalar(NumType::U32) => "uint",
            FieldType::Scalar(NumType::F32) => "float",
            FieldType::Vec4(NumType::S32) => "ivec4",
            FieldType::Vec4(NumType::U32) => "uvec4",
            FieldType::Vec4(NumType::F32) => "vec4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureField {
    pub ty: FieldType,
    pub name: String,
    /// `Some(0)` declares a runtime-sized array.
    pub array_len: Option<u32>,
}

impl StructureField {
    pub fn new(ty: FieldType, name: &str) -> Self {
        Self {
            ty,
            name: name.to_string(),
            array_len: None,
        }
    }

    pub fn array(ty: FieldType, name: &str, len: u32) -> Self {
        Self {
            ty,
            name: name.to_string(),
            array_len: Some(len),
        }
    }

    pub fn runtime_array(ty: FieldType, name: &str) -> Self {
        Self::array(ty, name, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDefinition {
    pub layout: BufferLayout,
    pub set: u32,
    pub binding: u32,
    pub name: String,
    pub fields: Vec<StructureField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDefinition {
    pub set: u32,
    pub binding: u32,
    pub name: String,
    pub sampler_type: SamplerType,
    pub result: NumType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDefinition {
    pub set: u32,
    pub binding: u32,
    pub name: String,
    pub sampler_type: SamplerType,
    pub format: NumType,
}

/// Local or shared memory block. Always `uint` typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDefinition {
    pub name: String,
    /// `None` for a scalar.
    pub array_len: Option<u32>,
}

/// Key of the per-vertex record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IoDefinition {
    pub storage_kind: StorageKind,
    pub variable: IoVariable,
    pub location: u32,
    pub component: u32,
}

/// Bindings and record offsets fixed before translation, shared by producer and consumer stages.
///
/// Record offsets count 32-bit words from the start of one vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReservations {
    pub reserved_constant_buffers: u32,
    pub reserved_storage_buffers: u32,
    pub reserved_textures: u32,
    pub reserved_images: u32,

    pub transform_feedback_info_binding: Option<u32>,
    pub transform_feedback_buffer_base_binding: Option<u32>,

    pub vertex_info_constant_buffer_binding: u32,
    pub vertex_output_storage_buffer_binding: u32,
    pub geometry_vertex_output_storage_buffer_binding: u32,
    pub geometry_index_output_storage_buffer_binding: u32,
    pub index_buffer_texture_binding: u32,
    pub vertex_buffer_texture_base_binding: u32,
    pub topology_remap_buffer_texture_binding: u32,

    /// Words of one input vertex record.
    pub input_size_per_invocation: u32,
    /// Words of one output vertex record.
    pub output_size_per_invocation: u32,

    offsets: BTreeMap<IoDefinition, u32>,
}

impl Default for ResourceReservations {
    fn default() -> Self {
        Self::new(false, false, None, None)
    }
}

impl ResourceReservations {
    pub fn new(
        transform_feedback_emulated: bool,
        vertex_as_compute: bool,
        vac_input: Option<IoUsage>,
        vac_output: Option<IoUsage>,
    ) -> Self {
        let mut reservations = Self {
            // Host support buffer.
            reserved_constant_buffers: 1,
            reserved_storage_buffers: 0,
            reserved_textures: 0,
            reserved_images: 0,
            transform_feedback_info_binding: None,
            transform_feedback_buffer_base_binding: None,
            vertex_info_constant_buffer_binding: 0,
            vertex_output_storage_buffer_binding: 0,
            geometry_vertex_output_storage_buffer_binding: 0,
            geometry_index_output_storage_buffer_binding: 0,
            index_buffer_texture_binding: 0,
            vertex_buffer_texture_base_binding: 0,
            topology_remap_buffer_texture_binding: 0,
            input_size_per_invocation: 0,
            output_size_per_invocation: 0,
            offsets: BTreeMap::new(),
        };

        if transform_feedback_emulated {
            let info = reservations.reserved_storage_buffers;
            reservations.transform_feedback_info_binding = Some(info);
            reservations.transform_feedback_buffer_base_binding = Some(info + 1);
            reservations.reserved_storage_buffers += 1 + TRANSFORM_FEEDBACK_BUFFERS;
        }

        if vertex_as_compute {
            reservations.vertex_info_constant_buffer_binding =
                reservations.reserved_constant_buffers;
            reservations.reserved_constant_buffers += 1;

            reservations.vertex_output_storage_buffer_binding =
                reservations.reserved_storage_buffers;
            reservations.geometry_vertex_output_storage_buffer_binding =
                reservations.reserved_storage_buffers + 1;
            reservations.geometry_index_output_storage_buffer_binding =
                reservations.reserved_storage_buffers + 2;
            reservations.reserved_storage_buffers += 3;

            reservations.index_buffer_texture_binding = reservations.reserved_textures;
            reservations.vertex_buffer_texture_base_binding = reservations.reserved_textures + 1;
            reservations.topology_remap_buffer_texture_binding =
                reservations.reserved_textures + 1 + MAX_VERTEX_BUFFER_TEXTURES;
            reservations.reserved_textures += 2 + MAX_VERTEX_BUFFER_TEXTURES;

            if let Some(input) = vac_input {
                reservations.input_size_per_invocation =
                    reservations.fill_io_offset_map(&input, StorageKind::Input);
            }
            if let Some(output) = vac_output {
                reservations.output_size_per_invocation =
                    reservations.fill_io_offset_map(&output, StorageKind::Output);
            }
        }

        reservations
    }

    /// Lays out one vertex record and returns its size in words.
    ///
    /// Order: position, then layer/viewport index/point size when written, clip distances up to
    /// the highest written one, then every component of each used generic location.
    fn fill_io_offset_map(&mut self, usage: &IoUsage, storage_kind: StorageKind) -> u32 {
        let mut offset = 0;
        let mut insert = |variable, location, component| {
            self.offsets.insert(
                IoDefinition {
                    storage_kind,
                    variable,
                    location,
                    component,
                },
                offset,
            );
            offset += 1;
        };

        for component in 0..4 {
            insert(IoVariable::Position, 0, component);
        }
        if usage.uses_rt_layer() {
            insert(IoVariable::Layer, 0, 0);
        }
        if usage.uses_viewport_index() {
            insert(IoVariable::ViewportIndex, 0, 0);
        }
        if usage.uses_point_size() {
            insert(IoVariable::PointSize, 0, 0);
        }

        let clip_distances = 8 - usage.clip_distances_written.leading_zeros();
        for index in 0..clip_distances {
            insert(IoVariable::ClipDistance, 0, index);
        }

        for location in 0..USER_ATTRIBUTES_COUNT {
            if usage.user_defined_map & (1 << location) != 0 {
                for component in 0..4 {
                    insert(IoVariable::UserDefined, location, component);
                }
            }
        }

        offset
    }

    pub fn try_get_offset(
        &self,
        storage_kind: StorageKind,
        variable: IoVariable,
        location: u32,
        component: u32,
    ) -> Option<u32> {
        self.offsets
            .get(&IoDefinition {
                storage_kind,
                variable,
                location,
                component,
            })
            .copied()
    }

    pub fn try_get_user_offset(
        &self,
        storage_kind: StorageKind,
        location: u32,
        component: u32,
    ) -> Option<u32> {
        self.try_get_offset(storage_kind, IoVariable::UserDefined, location, component)
    }

    /// Record entries sorted by offset.
    pub fn offsets(&self) -> Vec<(IoDefinition, u32)> {
        let mut entries: Vec<_> = self.offsets.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|&(def, offset)| (def.storage_kind, offset));
        entries
    }

    pub fn vertex_buffer_texture_binding(&self, location: u32) -> u32 {
        self.vertex_buffer_texture_base_binding + location
    }

    pub fn transform_feedback_buffer_binding(&self, index: u32) -> Option<u32> {
        self.transform_feedback_buffer_base_binding
            .map(|base| base + index)
    }

    pub fn is_vector_or_array_variable(variable: IoVariable) -> bool {
        matches!(variable, IoVariable::Position | IoVariable::ClipDistance)
    }
}

/// Local memory ids used by the compute emulation of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulationMemories {
    Vertex {
        vertex_data: u32,
        vertex_index_vertex_rate: u32,
        vertex_index_instance_rate: u32,
    },
    Geometry {
        vertex_data: u32,
        topology_remap: u32,
        output_vertex_count: u32,
        output_index_count: u32,
    },
}

impl EmulationMemories {
    pub fn vertex_data(&self) -> u32 {
        match *self {
            EmulationMemories::Vertex { vertex_data, .. }
            | EmulationMemories::Geometry { vertex_data, .. } => vertex_data,
        }
    }
}

/// Resource declarations of one translation.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    stage: ShaderStage,
    target_api: TargetApi,
    reservations: ResourceReservations,
    constant_buffers: Vec<BufferDefinition>,
    storage_buffers: Vec<BufferDefinition>,
    textures: Vec<TextureDefinition>,
    images: Vec<ImageDefinition>,
    local_memories: Vec<MemoryDefinition>,
    shared_memories: Vec<MemoryDefinition>,
    guest_storage_buffers: BTreeMap<u32, u32>,
    guest_textures: Vec<(u32, SamplerType, NumType)>,
    guest_images: Vec<(u32, SamplerType, NumType)>,
    current_local_memory: Option<u32>,
    current_shared_memory: Option<u32>,
    emulation: Option<EmulationMemories>,
}

impl ResourceManager {
    pub fn new(stage: ShaderStage, target_api: TargetApi, reservations: ResourceReservations) -> Self {
        Self {
            stage,
            target_api,
            reservations,
            constant_buffers: Vec::new(),
            storage_buffers: Vec::new(),
            textures: Vec::new(),
            images: Vec::new(),
            local_memories: Vec::new(),
            shared_memories: Vec::new(),
            guest_storage_buffers: BTreeMap::new(),
            guest_textures: Vec::new(),
            guest_images: Vec::new(),
            current_local_memory: None,
            current_shared_memory: None,
            emulation: None,
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn target_api(&self) -> TargetApi {
        self.target_api
    }

    pub fn reservations(&self) -> &ResourceReservations {
        &self.reservations
    }

    /// Binding of guest constant buffer `slot`, declaring it on first use.
    pub fn get_constant_buffer_binding(&mut self, slot: u32) -> u32 {
        let binding = self.reservations.reserved_constant_buffers + slot;
        if !self.constant_buffers.iter().any(|b| b.binding == binding) {
            self.add_constant_buffer(BufferDefinition {
                layout: BufferLayout::Std140,
                set: UNIFORM_SET,
                binding,
                name: format!("cb{slot}"),
                fields: vec![StructureField::array(
                    FieldType::Vec4(NumType::U32),
                    "data",
                    CONSTANT_BUFFER_VEC4S,
                )],
            });
        }
        binding
    }

    pub fn constant_buffer_name(&self, binding: u32) -> Option<&str> {
        self.find_constant_buffer(binding).map(|b| b.name.as_str())
    }

    /// Binding of the guest global memory region backed by storage buffer `slot`.
    pub fn get_storage_buffer_binding(&mut self, slot: u32) -> u32 {
        if let Some(&binding) = self.guest_storage_buffers.get(&slot) {
            return binding;
        }
        let binding =
            self.reservations.reserved_storage_buffers + self.guest_storage_buffers.len() as u32;
        self.guest_storage_buffers.insert(slot, binding);
        self.add_storage_buffer(BufferDefinition {
            layout: BufferLayout::Std430,
            set: STORAGE_SET,
            binding,
            name: format!("sb{slot}"),
            fields: vec![StructureField::runtime_array(
                FieldType::Scalar(NumType::U32),
                "data",
            )],
        });
        binding
    }

    pub fn get_texture_binding(
        &mut self,
        handle: u32,
        sampler_type: SamplerType,
        result: NumType,
    ) -> u32 {
        let key = (handle, sampler_type, result);
        let index = match self.guest_textures.iter().position(|&k| k == key) {
            Some(index) => index,
            None => {
                self.guest_textures.push(key);
                self.guest_textures.len() - 1
            }
        };
        let binding = self.reservations.reserved_textures + index as u32;
        if self.find_texture(binding).is_none() {
            self.add_texture(TextureDefinition {
                set: TEXTURE_SET,
                binding,
                name: format!("tex{binding}"),
                sampler_type,
                result,
            });
        }
        binding
    }

    pub fn get_image_binding(
        &mut self,
        handle: u32,
        sampler_type: SamplerType,
        format: NumType,
    ) -> u32 {
        let key = (handle, sampler_type, format);
        let index = match self.guest_images.iter().position(|&k| k == key) {
            Some(index) => index,
            None => {
                self.guest_images.push(key);
                self.guest_images.len() - 1
            }
        };
        let binding = self.reservations.reserved_images + index as u32;
        if !self.images.iter().any(|i| i.binding == binding) {
            self.images.push(ImageDefinition {
                set: IMAGE_SET,
                binding,
                name: format!("img{binding}"),
                sampler_type,
                format,
            });
        }
        binding
    }

    /// Declares `definition`, replacing any buffer already at its binding.
    pub fn add_constant_buffer(&mut self, definition: BufferDefinition) {
        upsert(&mut self.constant_buffers, definition, |b| b.binding);
    }

    pub fn add_storage_buffer(&mut self, definition: BufferDefinition) {
        upsert(&mut self.storage_buffers, definition, |b| b.binding);
    }

    pub fn add_texture(&mut self, definition: TextureDefinition) {
        upsert(&mut self.textures, definition, |t| t.binding);
    }

    pub fn find_constant_buffer(&self, binding: u32) -> Option<&BufferDefinition> {
        self.constant_buffers.iter().find(|b| b.binding == binding)
    }

    pub fn find_storage_buffer(&self, binding: u32) -> Option<&BufferDefinition> {
        self.storage_buffers.iter().find(|b| b.binding == binding)
    }

    pub fn find_texture(&self, binding: u32) -> Option<&TextureDefinition> {
        self.textures.iter().find(|t| t.binding == binding)
    }

    pub fn find_image(&self, binding: u32) -> Option<&ImageDefinition> {
        self.images.iter().find(|i| i.binding == binding)
    }

    pub fn constant_buffers(&self) -> Vec<BufferDefinition> {
        sorted(&self.constant_buffers, |b| b.binding)
    }

    pub fn storage_buffers(&self) -> Vec<BufferDefinition> {
        sorted(&self.storage_buffers, |b| b.binding)
    }

    pub fn textures(&self) -> Vec<TextureDefinition> {
        sorted(&self.textures, |t| t.binding)
    }

    pub fn images(&self) -> Vec<ImageDefinition> {
        sorted(&self.images, |i| i.binding)
    }

    pub fn local_memories(&self) -> &[MemoryDefinition] {
        &self.local_memories
    }

    pub fn shared_memories(&self) -> &[MemoryDefinition] {
        &self.shared_memories
    }

    pub fn local_memory(&self, id: u32) -> Option<&MemoryDefinition> {
        self.local_memories.get(id as usize)
    }

    pub fn shared_memory(&self, id: u32) -> Option<&MemoryDefinition> {
        self.shared_memories.get(id as usize)
    }

    fn add_local_memory(&mut self, name: String, array_len: Option<u32>) -> u32 {
        self.local_memories.push(MemoryDefinition { name, array_len });
        self.local_memories.len() as u32 - 1
    }

    /// Declares the guest local memory of the program about to be built.
    ///
    /// Merged translations call this once per stage; each stage keeps its own block.
    pub fn set_current_local_memory(&mut self, size_in_bytes: u32, used: bool) {
        self.current_local_memory = if used && size_in_bytes != 0 {
            let name = format!("local_mem{}", self.local_memories.len());
            Some(self.add_local_memory(name, Some(size_in_bytes.div_ceil(4))))
        } else {
            None
        };
    }

    pub fn set_current_shared_memory(&mut self, size_in_bytes: u32, used: bool) {
        self.current_shared_memory = if used && size_in_bytes != 0 {
            self.shared_memories.push(MemoryDefinition {
                name: format!("shared_mem{}", self.shared_memories.len()),
                array_len: Some(size_in_bytes.div_ceil(4)),
            });
            Some(self.shared_memories.len() as u32 - 1)
        } else {
            None
        };
    }

    pub fn current_local_memory(&self) -> Option<u32> {
        self.current_local_memory
    }

    pub fn current_shared_memory(&self) -> Option<u32> {
        self.current_shared_memory
    }

    /// Declares the scratch memories the compute emulation of `original_stage` works in.
    pub fn set_vertex_as_compute_local_memories(
        &mut self,
        original_stage: ShaderStage,
        input_topology: InputTopology,
    ) {
        let vertex_data = self.add_local_memory(
            "local_vertex_data".to_string(),
            Some(self.reservations.output_size_per_invocation.max(1)),
        );

        self.emulation = match original_stage {
            ShaderStage::Vertex => Some(EmulationMemories::Vertex {
                vertex_data,
                vertex_index_vertex_rate: self
                    .add_local_memory("local_vertex_index_vr".to_string(), None),
                vertex_index_instance_rate: self
                    .add_local_memory("local_vertex_index_ir".to_string(), None),
            }),
            ShaderStage::Geometry => Some(EmulationMemories::Geometry {
                vertex_data,
                topology_remap: self.add_local_memory(
                    "local_topology_remap".to_string(),
                    Some(input_topology.input_vertices()),
                ),
                output_vertex_count: self
                    .add_local_memory("local_geometry_output_vertex".to_string(), None),
                output_index_count: self
                    .add_local_memory("local_geometry_output_index".to_string(), None),
            }),
            _ => None,
        };
    }

    pub fn emulation_memories(&self) -> Option<EmulationMemories> {
        self.emulation
    }

    /// Every `(set, binding)` pair in declaration order.
    pub fn all_bindings(&self) -> Vec<(u32, u32)> {
        self.constant_buffers
            .iter()
            .map(|b| (b.set, b.binding))
            .chain(self.storage_buffers.iter().map(|b| (b.set, b.binding)))
            .chain(self.textures.iter().map(|t| (t.set, t.binding)))
            .chain(self.images.iter().map(|i| (i.set, i.binding)))
            .collect()
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> u32) {
    let k = key(&item);
    match items.iter_mut().find(|existing| key(existing) == k) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

fn sorted<T: Clone>(items: &[T], key: impl Fn(&T) -> u32) -> Vec<T> {
    let mut items = items.to_vec();
    items.sort_by_key(|item| key(item));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureFlags;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_layout_follows_position_builtins_clip_user_order() {
        let usage = IoUsage::new(FeatureFlags::RT_LAYER | FeatureFlags::POINT_SIZE, 0b101, 0b1010);
        let reservations = ResourceReservations::new(false, true, None, Some(usage));

        assert_eq!(
            reservations.try_get_offset(StorageKind::Output, IoVariable::Position, 0, 3),
            Some(3)
        );
        assert_eq!(
            reservations.try_get_offset(StorageKind::Output, IoVariable::Layer, 0, 0),
            Some(4)
        );
        assert_eq!(
            reservations.try_get_offset(StorageKind::Output, IoVariable::PointSize, 0, 0),
            Some(5)
        );
        assert_eq!(
            reservations.try_get_offset(StorageKind::Output, IoVariable::ClipDistance, 0, 2),
            Some(8)
        );
        assert_eq!(reservations.try_get_user_offset(StorageKind::Output, 1, 0), Some(9));
        assert_eq!(reservations.try_get_user_offset(StorageKind::Output, 3, 3), Some(16));
        assert_eq!(reservations.try_get_user_offset(StorageKind::Output, 0, 0), None);
        assert_eq!(reservations.output_size_per_invocation, 17);
        assert_eq!(reservations.input_size_per_invocation, 0);
    }

    #[test]
    fn emulation_bindings_follow_reserved_slots() {
        let reservations = ResourceReservations::new(true, true, None, None);
        assert_eq!(reservations.transform_feedback_info_binding, Some(0));
        assert_eq!(reservations.transform_feedback_buffer_binding(3), Some(4));
        assert_eq!(reservations.vertex_info_constant_buffer_binding, 1);
        assert_eq!(reservations.vertex_output_storage_buffer_binding, 5);
        assert_eq!(reservations.geometry_index_output_storage_buffer_binding, 7);
        assert_eq!(reservations.reserved_storage_buffers, 8);
        assert_eq!(reservations.index_buffer_texture_binding, 0);
        assert_eq!(reservations.vertex_buffer_texture_binding(31), 32);
        assert_eq!(reservations.topology_remap_buffer_texture_binding, 33);
        assert_eq!(reservations.reserved_constant_buffers, 2);
    }

    #[test]
    fn guest_resources_are_stable_and_distinct() {
        let mut resources =
            ResourceManager::new(ShaderStage::Fragment, TargetApi::Vulkan, ResourceReservations::default());

        let cb3 = resources.get_constant_buffer_binding(3);
        assert_eq!(cb3, 4);
        assert_eq!(resources.get_constant_buffer_binding(3), cb3);

        let sb_a = resources.get_storage_buffer_binding(7);
        let sb_b = resources.get_storage_buffer_binding(2);
        assert_eq!((sb_a, sb_b), (0, 1));
        assert_eq!(resources.get_storage_buffer_binding(7), sb_a);

        let t0 = resources.get_texture_binding(0x10, SamplerType::Texture2D, NumType::F32);
        let t1 = resources.get_texture_binding(0x11, SamplerType::Texture2D, NumType::F32);
        assert_ne!(t0, t1);
        assert_eq!(
            resources.get_texture_binding(0x10, SamplerType::Texture2D, NumType::F32),
            t0
        );

        let mut bindings = resources.all_bindings();
        let before = bindings.len();
        bindings.sort();
        bindings.dedup();
        assert_eq!(bindings.len(), before);
    }

    #[test]
    fn each_stage_of_a_merge_gets_its_own_local_memory() {
        let mut resources =
            ResourceManager::new(ShaderStage::Vertex, TargetApi::OpenGl, ResourceReservations::default());
        resources.set_current_local_memory(16, true);
        let first = resources.current_local_memory();
        resources.set_current_local_memory(8, true);
        let second = resources.current_local_memory();
        assert_eq!((first, second), (Some(0), Some(1)));
        assert_eq!(resources.local_memories()[1].array_len, Some(2));

        resources.set_current_local_memory(8, false);
        assert_eq!(resources.current_local_memory(), None);
    }
}
