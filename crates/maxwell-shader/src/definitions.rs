//! Per-stage configuration snapshot.

use crate::attribute::{USER_ATTRIBUTES_COUNT, USER_ATTRIBUTE_BASE};
use crate::ir::{IoVariable, NumType, StorageKind};
use crate::types::{
    InputTopology, InterpolationQualifier, OutputTopology, ShaderStage, TessPatchType,
    TessSpacing,
};

/// Component type of a vertex attribute as seen by the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttributeBaseType {
    #[default]
    Float,
    Sint,
    Uint,
    /// Integer data converted to float by the vertex fetch.
    Sscaled,
    Uscaled,
}

impl AttributeBaseType {
    pub fn num_type(self) -> NumType {
        match self {
            AttributeBaseType::Sint => NumType::S32,
            AttributeBaseType::Uint => NumType::U32,
            AttributeBaseType::Float | AttributeBaseType::Sscaled | AttributeBaseType::Uscaled => {
                NumType::F32
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttributePacking {
    #[default]
    None,
    /// Several components share one 32-bit element; the fetch selects the component.
    Packed,
    /// Signed `RGB10A2`: components must be sign-extended (and normalized unless integer).
    Rgb10A2Signed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttributeType {
    pub base: AttributeBaseType,
    pub packing: AttributePacking,
}

/// One transform feedback target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransformFeedbackBuffer {
    /// Bytes between consecutive vertices.
    pub stride: u32,
    /// Attribute word (`byte offset / 4`) captured at each 4-byte slot; `0xff` leaves a hole.
    pub varying_locations: Vec<u8>,
}

/// Where a captured attribute component lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformFeedbackOutput {
    pub buffer: u32,
    /// Byte offset inside the vertex.
    pub offset: u32,
    pub stride: u32,
}

/// Immutable configuration of one shader stage.
///
/// A compute-emulated vertex/geometry stage is described by a copy produced with
/// [`ShaderDefinitions::as_compute`]; `original_stage` keeps the stage the program was written
/// for.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderDefinitions {
    pub stage: ShaderStage,
    pub original_stage: ShaderStage,
    pub vertex_as_compute: bool,
    pub compute_local_size: [u32; 3],
    pub gp_passthrough: bool,
    /// Geometry invocations per primitive, or tessellation control output patch size.
    pub threads_per_input_primitive: u32,
    pub input_topology: InputTopology,
    pub output_topology: OutputTopology,
    pub max_output_vertices: u32,
    pub tess_patch_type: TessPatchType,
    pub tess_spacing: TessSpacing,
    pub tess_cw: bool,
    pub early_z_force: bool,
    pub origin_upper_left: bool,
    pub dual_source_blend: bool,
    /// Four bits per render target (`rgba`), render target 0 in the low nibble.
    pub omap_targets: u32,
    pub omap_depth: bool,
    pub last_in_vertex_pipeline: bool,
    pub attribute_types: [AttributeType; USER_ATTRIBUTES_COUNT as usize],
    pub fragment_output_types: [AttributeBaseType; 8],
    pub interpolation: [InterpolationQualifier; USER_ATTRIBUTES_COUNT as usize],
    pub transform_feedback: Vec<TransformFeedbackBuffer>,
}

impl ShaderDefinitions {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            original_stage: stage,
            vertex_as_compute: false,
            compute_local_size: [1, 1, 1],
            gp_passthrough: false,
            threads_per_input_primitive: 1,
            input_topology: InputTopology::default(),
            output_topology: OutputTopology::default(),
            max_output_vertices: 1,
            tess_patch_type: TessPatchType::default(),
            tess_spacing: TessSpacing::default(),
            tess_cw: false,
            early_z_force: false,
            origin_upper_left: false,
            dual_source_blend: false,
            omap_targets: 0xf,
            omap_depth: false,
            last_in_vertex_pipeline: stage.is_vtg(),
            attribute_types: Default::default(),
            fragment_output_types: Default::default(),
            interpolation: Default::default(),
            transform_feedback: Vec::new(),
        }
    }

    pub fn compute(local_size_x: u32, local_size_y: u32, local_size_z: u32) -> Self {
        Self {
            compute_local_size: [local_size_x, local_size_y, local_size_z],
            ..Self::new(ShaderStage::Compute)
        }
    }

    pub fn geometry(
        input_topology: InputTopology,
        output_topology: OutputTopology,
        max_output_vertices: u32,
    ) -> Self {
        Self {
            input_topology,
            output_topology,
            max_output_vertices,
            ..Self::new(ShaderStage::Geometry)
        }
    }

    /// Copy of these definitions describing a compute dispatch that emulates this stage.
    pub fn as_compute(&self, local_size_x: u32, local_size_y: u32, local_size_z: u32) -> Self {
        Self {
            stage: ShaderStage::Compute,
            vertex_as_compute: true,
            compute_local_size: [local_size_x, local_size_y, local_size_z],
            ..self.clone()
        }
    }

    pub fn is_attribute_packed(&self, location: u32) -> bool {
        self.attribute_type(location).packing != AttributePacking::None
    }

    pub fn is_attribute_packed_rgb10a2_signed(&self, location: u32) -> bool {
        self.attribute_type(location).packing == AttributePacking::Rgb10A2Signed
    }

    pub fn is_attribute_sint(&self, location: u32) -> bool {
        self.attribute_type(location).base == AttributeBaseType::Sint
    }

    /// Texel type of the buffer texture a compute-emulated vertex stage fetches `location` from.
    pub fn vertex_buffer_fetch_type(&self, location: u32) -> NumType {
        if self.is_attribute_packed_rgb10a2_signed(location) {
            NumType::U32
        } else {
            self.attribute_type(location).base.num_type()
        }
    }

    pub fn attribute_type(&self, location: u32) -> AttributeType {
        self.attribute_types
            .get(location as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Value type of a generic attribute access.
    ///
    /// Packed attributes are fetched as raw integers when the stage pulls them from buffers; a
    /// native vertex stage sees whatever the host vertex format produced.
    pub fn user_defined_type(&self, location: u32, is_output: bool) -> NumType {
        if is_output {
            if self.original_stage == ShaderStage::Fragment {
                return self.fragment_output_color_type(location);
            }
            return NumType::F32;
        }
        if self.original_stage == ShaderStage::Vertex {
            return self.attribute_type(location).base.num_type();
        }
        NumType::F32
    }

    pub fn fragment_output_color_type(&self, location: u32) -> NumType {
        self.fragment_output_types
            .get(location as usize)
            .copied()
            .unwrap_or_default()
            .num_type()
    }

    pub fn interpolation_qualifier(&self, location: u32) -> InterpolationQualifier {
        self.interpolation
            .get(location as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Whether accesses to `variable` on `storage_kind` carry a vertex index operand.
    ///
    /// Follows the stage the program was written for, so a geometry program emulated in compute
    /// still addresses its inputs per vertex until the emulation pass rewrites them.
    pub fn has_per_vertex_index(&self, storage_kind: StorageKind, variable: IoVariable) -> bool {
        if !variable.is_per_vertex() {
            return false;
        }
        match storage_kind {
            StorageKind::Input => self.original_stage.has_arrayed_inputs(),
            StorageKind::Output => self.original_stage.has_arrayed_outputs(),
            _ => false,
        }
    }

    pub fn omap_target_enabled(&self, render_target: u32, component: u32) -> bool {
        let bit = render_target * 4 + component;
        bit < 32 && self.omap_targets & (1 << bit) != 0
    }

    pub fn transform_feedback_enabled(&self) -> bool {
        !self.transform_feedback.is_empty()
    }

    /// Capture slot of the attribute word `word` (`byte offset / 4`).
    pub fn transform_feedback_output(&self, word: u32) -> Option<TransformFeedbackOutput> {
        self.transform_feedback
            .iter()
            .enumerate()
            .find_map(|(buffer, tfb)| {
                tfb.varying_locations
                    .iter()
                    .position(|&loc| loc != 0xff && u32::from(loc) == word)
                    .map(|slot| TransformFeedbackOutput {
                        buffer: buffer as u32,
                        offset: slot as u32 * 4,
                        stride: tfb.stride,
                    })
            })
    }

    pub fn user_transform_feedback_output(
        &self,
        location: u32,
        component: u32,
    ) -> Option<TransformFeedbackOutput> {
        self.transform_feedback_output(USER_ATTRIBUTE_BASE / 4 + location * 4 + component)
    }

    /// Number of components starting at `component` captured back to back in the same buffer.
    ///
    /// Zero when `component` itself is not captured.
    pub fn transform_feedback_output_components(&self, location: u32, component: u32) -> u32 {
        let Some(mut prev) = self.user_transform_feedback_output(location, component) else {
            return 0;
        };
        let mut count = 1;
        for c in component + 1..4 {
            match self.user_transform_feedback_output(location, c) {
                Some(next) if next.buffer == prev.buffer && next.offset == prev.offset + 4 => {
                    count += 1;
                    prev = next;
                }
                _ => break,
            }
        }
        count
    }

    /// Index buffer entries reserved per geometry invocation: every vertex plus one restart index
    /// per primitive.
    pub fn geometry_output_index_buffer_stride(&self) -> u32 {
        let primitive_vertices = self.output_topology.vertices_per_primitive();
        self.max_output_vertices + self.max_output_vertices / primitive_vertices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn as_compute_keeps_original_stage() {
        let mut defs = ShaderDefinitions::new(ShaderStage::Vertex);
        defs.attribute_types[3].packing = AttributePacking::Rgb10A2Signed;

        let compute = defs.as_compute(32, 32, 1);
        assert_eq!(compute.stage, ShaderStage::Compute);
        assert_eq!(compute.original_stage, ShaderStage::Vertex);
        assert_eq!(compute.compute_local_size, [32, 32, 1]);
        assert!(compute.is_attribute_packed_rgb10a2_signed(3));
        assert_eq!(defs.stage, ShaderStage::Vertex);
    }

    #[test]
    fn contiguous_transform_feedback_components_are_counted() {
        let mut defs = ShaderDefinitions::new(ShaderStage::Vertex);
        let base = (USER_ATTRIBUTE_BASE / 4 + 4) as u8;
        defs.transform_feedback.push(TransformFeedbackBuffer {
            stride: 16,
            varying_locations: vec![base, base + 1, base + 2, 0xff],
        });

        assert_eq!(defs.transform_feedback_output_components(1, 0), 3);
        assert_eq!(defs.transform_feedback_output_components(1, 3), 0);
        assert_eq!(
            defs.user_transform_feedback_output(1, 2),
            Some(TransformFeedbackOutput {
                buffer: 0,
                offset: 8,
                stride: 16
            })
        );
    }

    #[test]
    fn geometry_index_stride_includes_restart_per_primitive() {
        let defs =
            ShaderDefinitions::geometry(InputTopology::Triangles, OutputTopology::TriangleStrip, 6);
        assert_eq!(defs.geometry_output_index_buffer_stride(), 8);
    }
}
