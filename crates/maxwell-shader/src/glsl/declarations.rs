//! Everything in the generated source that precedes the helper functions and `main`.

use crate::attribute::{POSITION_X, USER_ATTRIBUTES_COUNT};
use crate::attribute_usage::AttributeUsage;
use crate::definitions::TransformFeedbackOutput;
use crate::features::FeatureFlags;
use crate::ir::NumType;
use crate::resources::{BufferDefinition, MemoryDefinition};
use crate::types::{ShaderStage, TargetApi};

use super::io::transform_feedback_split;
use super::{CodegenInput, GlslWriter, VarType};

const SWIZZLE: [&str; 4] = ["x", "y", "z", "w"];

fn extension(w: &mut GlslWriter, name: &str) {
    w.line(&format!("#extension {name} : enable"));
}

fn set_locations(mask: u32) -> impl Iterator<Item = u32> {
    (0..32).filter(move |bit| mask & (1 << bit) != 0)
}

pub(super) fn write_header(w: &mut GlslWriter, input: &CodegenInput<'_>) {
    let defs = input.definitions;
    let caps = input.capabilities;

    w.line(match input.target_api {
        TargetApi::Vulkan => "#version 460 core",
        TargetApi::OpenGl => "#version 450 core",
    });
    if input.debug {
        w.line(&format!("// {} shader", defs.stage.name()));
        if defs.vertex_as_compute {
            w.line(&format!(
                "// {} stage emulated with a compute dispatch",
                defs.original_stage.name()
            ));
        }
    }

    extension(w, "GL_ARB_gpu_shader_int64");
    if caps.supports_shader_ballot {
        extension(w, "GL_ARB_shader_ballot");
    } else {
        extension(w, "GL_KHR_shader_subgroup_basic");
        extension(w, "GL_KHR_shader_subgroup_ballot");
    }
    extension(w, "GL_ARB_shader_group_vote");
    extension(w, "GL_EXT_shader_image_load_formatted");
    extension(w, "GL_EXT_texture_shadow_lod");

    match defs.stage {
        ShaderStage::Compute => extension(w, "GL_ARB_compute_shader"),
        ShaderStage::Fragment => {
            if caps.supports_fragment_shader_interlock {
                extension(w, "GL_ARB_fragment_shader_interlock");
            } else if caps.supports_fragment_shader_ordering_intel {
                extension(w, "GL_INTEL_fragment_shader_ordering");
            }
        }
        stage => {
            if stage == ShaderStage::Vertex {
                extension(w, "GL_ARB_shader_draw_parameters");
            }
            extension(w, "GL_ARB_shader_viewport_layer_array");
        }
    }

    if defs.stage == ShaderStage::Geometry && input.uses_geometry_passthrough() {
        extension(w, "GL_NV_geometry_shader_passthrough");
    }
    if caps.supports_viewport_mask {
        extension(w, "GL_NV_viewport_array2");
    }

    w.line("#pragma optionNV(fastmath off)");
    w.blank();
    w.line("const int undef = 0;");
    w.blank();
}

pub(super) fn write_stage_layout(w: &mut GlslWriter, input: &CodegenInput<'_>) {
    let defs = input.definitions;
    match defs.stage {
        ShaderStage::Geometry => {
            w.line(&format!(
                "layout (invocations = {}, {}) in;",
                defs.threads_per_input_primitive,
                defs.input_topology.glsl_name()
            ));
            if input.uses_geometry_passthrough() {
                w.line("layout (passthrough) in gl_PerVertex");
                w.open_block();
                w.line("vec4 gl_Position;");
                w.line("float gl_PointSize;");
                w.line("float gl_ClipDistance[];");
                w.close_block(" gl_in[];");
            } else {
                w.line(&format!(
                    "layout ({}, max_vertices = {}) out;",
                    defs.output_topology.glsl_name(),
                    defs.max_output_vertices
                ));
            }
            w.blank();
        }
        ShaderStage::TessellationControl => {
            w.line(&format!(
                "layout (vertices = {}) out;",
                defs.threads_per_input_primitive
            ));
            w.blank();
        }
        ShaderStage::TessellationEvaluation => {
            // Vulkan flips the framebuffer Y axis relative to OpenGL, which inverts the winding.
            let cw = defs.tess_cw != (input.target_api == TargetApi::Vulkan);
            w.line(&format!(
                "layout ({}, {}, {}) in;",
                defs.tess_patch_type.glsl_name(),
                defs.tess_spacing.glsl_name(),
                if cw { "cw" } else { "ccw" }
            ));
            w.blank();
        }
        ShaderStage::Compute => {
            let [x, y, z] = defs.compute_local_size;
            w.line(&format!(
                "layout (local_size_x = {x}, local_size_y = {y}, local_size_z = {z}) in;"
            ));
            w.blank();
        }
        ShaderStage::Fragment => {
            if defs.early_z_force {
                w.line("layout(early_fragment_tests) in;");
            }
            if defs.origin_upper_left {
                w.line("layout (origin_upper_left) in vec4 gl_FragCoord;");
            }
            if defs.early_z_force || defs.origin_upper_left {
                w.blank();
            }
        }
        ShaderStage::Vertex => {}
    }
}

fn write_buffer(
    w: &mut GlslWriter,
    target_api: TargetApi,
    buffer: &BufferDefinition,
    storage: &str,
) {
    let set = match target_api {
        TargetApi::Vulkan => format!("set = {}, ", buffer.set),
        TargetApi::OpenGl => String::new(),
    };
    w.line(&format!(
        "layout ({set}binding = {}, {}) {storage} _{}",
        buffer.binding,
        buffer.layout.glsl_name(),
        buffer.name
    ));
    w.open_block();
    for field in &buffer.fields {
        let array = match field.array_len {
            Some(0) => "[]".to_string(),
            Some(len) => format!("[{len}]"),
            None => String::new(),
        };
        w.line(&format!("{} {}{array};", field.ty.glsl_name(), field.name));
    }
    w.close_block(&format!(" {};", buffer.name));
    w.blank();
}

fn write_memory(w: &mut GlslWriter, memory: &MemoryDefinition, qualifier: &str) {
    match memory.array_len {
        Some(len) => w.line(&format!("{qualifier}uint {}[{len}];", memory.name)),
        None => w.line(&format!("{qualifier}uint {};", memory.name)),
    }
}

fn binding_layout(target_api: TargetApi, set: u32, binding: u32) -> String {
    match target_api {
        TargetApi::Vulkan => format!("binding = {binding}, set = {set}"),
        TargetApi::OpenGl => format!("binding = {binding}"),
    }
}

fn image_format(format: NumType) -> &'static str {
    match format {
        NumType::S32 => "rgba32i",
        NumType::U32 => "rgba32ui",
        NumType::F32 => "rgba32f",
    }
}

pub(super) fn write_resources(w: &mut GlslWriter, input: &CodegenInput<'_>) {
    let resources = input.resources;
    let api = input.target_api;

    for buffer in resources.constant_buffers() {
        write_buffer(w, api, &buffer, "uniform");
    }
    for buffer in resources.storage_buffers() {
        write_buffer(w, api, &buffer, "buffer");
    }

    for memory in resources.local_memories() {
        write_memory(w, memory, "");
    }
    for memory in resources.shared_memories() {
        write_memory(w, memory, "shared ");
    }
    if !resources.local_memories().is_empty() || !resources.shared_memories().is_empty() {
        w.blank();
    }

    let textures = resources.textures();
    let images = resources.images();
    for texture in &textures {
        w.line(&format!(
            "layout ({}) uniform {} {};",
            binding_layout(api, texture.set, texture.binding),
            texture.sampler_type.glsl_sampler_type(texture.result),
            texture.name
        ));
    }
    for image in &images {
        w.line(&format!(
            "layout ({}, {}) uniform {} {};",
            binding_layout(api, image.set, image.binding),
            image_format(image.format),
            image.sampler_type.glsl_image_type(image.format),
            image.name
        ));
    }
    if !textures.is_empty() || !images.is_empty() {
        w.blank();
    }
}

fn vec4_name(ty: NumType) -> String {
    VarType::from(ty).vector_name(4)
}

pub(super) fn write_inputs(w: &mut GlslWriter, input: &CodegenInput<'_>) {
    let defs = input.definitions;
    let usage = input.usage;
    let stage = defs.stage;
    if stage == ShaderStage::Compute {
        return;
    }

    let arrayed = if stage.has_arrayed_inputs() { "[]" } else { "" };
    let mut written = false;

    if input.features.contains(FeatureFlags::IA_INDEXING) {
        w.line(&format!(
            "layout (location = 0) in vec4 in_attr{arrayed}[{USER_ATTRIBUTES_COUNT}];"
        ));
        written = true;
    } else {
        let passthrough_qualified =
            stage == ShaderStage::Geometry && input.uses_geometry_passthrough();
        for location in set_locations(usage.used_input_attributes | usage.passthrough_attributes)
        {
            let passthrough = if passthrough_qualified
                && usage.passthrough_attributes & (1 << location) != 0
            {
                "passthrough, "
            } else {
                ""
            };
            let interpolation = if stage == ShaderStage::Fragment {
                defs.interpolation_qualifier(location).glsl_qualifier()
            } else {
                ""
            };
            w.line(&format!(
                "layout ({passthrough}location = {location}) {interpolation}in {} in_attr{location}{arrayed};",
                vec4_name(defs.user_defined_type(location, false))
            ));
            written = true;
        }
    }

    if stage == ShaderStage::TessellationEvaluation {
        for &index in &usage.used_input_attributes_per_patch {
            w.line(&format!(
                "layout (location = {}) patch in vec4 patch_attr{index};",
                AttributeUsage::per_patch_attribute_location(index)
            ));
            written = true;
        }
    }

    if written {
        w.blank();
    }
}

fn xfb_qualifier(output: Option<TransformFeedbackOutput>) -> String {
    match output {
        Some(output) => format!(
            ", xfb_buffer = {}, xfb_offset = {}, xfb_stride = {}",
            output.buffer, output.offset, output.stride
        ),
        None => String::new(),
    }
}

fn write_captured_output(
    w: &mut GlslWriter,
    input: &CodegenInput<'_>,
    location: u32,
    components: u32,
) {
    let defs = input.definitions;
    let first_separate = if components > 1 {
        w.line(&format!(
            "layout (location = {location}{}) out vec{components} out_attr{location};",
            xfb_qualifier(defs.user_transform_feedback_output(location, 0))
        ));
        components
    } else {
        0
    };
    for component in first_separate..4 {
        w.line(&format!(
            "layout (location = {location}, component = {component}{}) out float out_attr{location}_{};",
            xfb_qualifier(defs.user_transform_feedback_output(location, component)),
            SWIZZLE[component as usize]
        ));
    }
}

fn write_fragment_outputs(w: &mut GlslWriter, input: &CodegenInput<'_>) -> bool {
    let defs = input.definitions;
    let enabled = |rt: u32| (0..4).any(|c| defs.omap_target_enabled(rt, c));
    let mut written = false;

    // Dual-source blending pairs the lowest enabled target with the one after it.
    let first = (0..8).find(|&rt| enabled(rt));
    let paired = first.filter(|&rt| defs.dual_source_blend && rt < 7 && enabled(rt + 1));

    let mut render_target = 0;
    while render_target < 8 {
        if !enabled(render_target) {
            render_target += 1;
            continue;
        }
        if paired == Some(render_target) {
            for (index, rt) in [render_target, render_target + 1].into_iter().enumerate() {
                w.line(&format!(
                    "layout (location = {render_target}, index = {index}) out {} out_attr{rt};",
                    vec4_name(defs.fragment_output_color_type(rt))
                ));
            }
            render_target += 2;
        } else {
            w.line(&format!(
                "layout (location = {render_target}) out {} out_attr{render_target};",
                vec4_name(defs.fragment_output_color_type(render_target))
            ));
            render_target += 1;
        }
        written = true;
    }
    written
}

pub(super) fn write_outputs(w: &mut GlslWriter, input: &CodegenInput<'_>) {
    let defs = input.definitions;
    let usage = input.usage;
    let stage = defs.stage;

    let written = match stage {
        ShaderStage::Compute => false,
        ShaderStage::Fragment => write_fragment_outputs(w, input),
        _ => {
            let arrayed = if stage.has_arrayed_outputs() { "[]" } else { "" };
            let mut written = false;

            if input.features.contains(FeatureFlags::OA_INDEXING) {
                w.line(&format!(
                    "layout (location = 0) out vec4 out_attr{arrayed}[{USER_ATTRIBUTES_COUNT}];"
                ));
                written = true;
            } else {
                for location in set_locations(usage.used_output_attributes) {
                    match transform_feedback_split(input, location) {
                        Some(components) => {
                            write_captured_output(w, input, location, components)
                        }
                        None => w.line(&format!(
                            "layout (location = {location}) out vec4 out_attr{location}{arrayed};"
                        )),
                    }
                    written = true;
                }
            }

            if stage == ShaderStage::TessellationControl {
                for &index in &usage.used_output_attributes_per_patch {
                    w.line(&format!(
                        "layout (location = {}) patch out vec4 patch_attr{index};",
                        AttributeUsage::per_patch_attribute_location(index)
                    ));
                    written = true;
                }
            }

            if input.native_transform_feedback() {
                if let Some(output) = defs.transform_feedback_output(POSITION_X / 4) {
                    w.line(&format!(
                        "layout (xfb_buffer = {}, xfb_offset = {}, xfb_stride = {}) out gl_PerVertex",
                        output.buffer, output.offset, output.stride
                    ));
                    w.open_block();
                    w.line("vec4 gl_Position;");
                    w.close_block(";");
                    written = true;
                }
            }
            written
        }
    };

    if written {
        w.blank();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::USER_ATTRIBUTE_BASE;
    use crate::definitions::{ShaderDefinitions, TransformFeedbackBuffer};
    use crate::gpu_accessor::HostCapabilities;
    use crate::resources::{ResourceManager, ResourceReservations};
    use crate::types::TessPatchType;
    use pretty_assertions::assert_eq;

    struct Fixture {
        defs: ShaderDefinitions,
        resources: ResourceManager,
        usage: AttributeUsage,
        features: FeatureFlags,
        capabilities: HostCapabilities,
        api: TargetApi,
    }

    impl Fixture {
        fn new(defs: ShaderDefinitions, api: TargetApi) -> Self {
            Self {
                resources: ResourceManager::new(defs.stage, api, ResourceReservations::default()),
                defs,
                usage: AttributeUsage::new(),
                features: FeatureFlags::empty(),
                capabilities: HostCapabilities::default(),
                api,
            }
        }

        fn render(&self, write: fn(&mut GlslWriter, &CodegenInput<'_>)) -> String {
            let input = CodegenInput {
                definitions: &self.defs,
                resources: &self.resources,
                usage: &self.usage,
                features: self.features,
                capabilities: self.capabilities,
                target_api: self.api,
                debug: false,
            };
            let mut w = GlslWriter::new();
            write(&mut w, &input);
            w.finish()
        }
    }

    #[test]
    fn header_depends_on_api_and_subgroup_support() {
        let mut fixture = Fixture::new(ShaderDefinitions::new(ShaderStage::Vertex), TargetApi::Vulkan);
        fixture.capabilities.supports_shader_ballot = false;
        let vk = fixture.render(write_header);
        assert!(vk.starts_with("#version 460 core\n"));
        assert!(vk.contains("#extension GL_KHR_shader_subgroup_ballot : enable\n"));
        assert!(!vk.contains("GL_ARB_shader_ballot"));
        assert!(vk.contains("#extension GL_ARB_shader_draw_parameters : enable\n"));
        assert!(vk.ends_with("#pragma optionNV(fastmath off)\n\nconst int undef = 0;\n\n"));

        let gl = Fixture::new(ShaderDefinitions::compute(8, 8, 1), TargetApi::OpenGl)
            .render(write_header);
        assert!(gl.starts_with("#version 450 core\n"));
        assert!(gl.contains("#extension GL_ARB_compute_shader : enable\n"));
        assert!(gl.contains("#extension GL_ARB_shader_ballot : enable\n"));
    }

    #[test]
    fn input_bitmask_declares_each_location_in_ascending_order() {
        let mut fixture = Fixture::new(ShaderDefinitions::new(ShaderStage::Fragment), TargetApi::OpenGl);
        for location in [5, 1, 3] {
            fixture.usage.set_input_user_attribute(location, 0);
        }
        fixture.defs.interpolation[3] = crate::types::InterpolationQualifier::Constant;

        assert_eq!(
            fixture.render(write_inputs),
            "layout (location = 1) in vec4 in_attr1;\n\
             layout (location = 3) flat in vec4 in_attr3;\n\
             layout (location = 5) in vec4 in_attr5;\n\n"
        );
    }

    #[test]
    fn indexed_inputs_collapse_into_one_array() {
        let mut fixture = Fixture::new(
            ShaderDefinitions::geometry(
                crate::types::InputTopology::Triangles,
                crate::types::OutputTopology::TriangleStrip,
                3,
            ),
            TargetApi::Vulkan,
        );
        fixture.usage.set_input_user_attribute(2, 0);
        fixture.features = FeatureFlags::IA_INDEXING;
        assert_eq!(
            fixture.render(write_inputs),
            "layout (location = 0) in vec4 in_attr[][16];\n\n"
        );
    }

    #[test]
    fn dual_source_blending_uses_two_indices_of_location_zero() {
        let mut defs = ShaderDefinitions::new(ShaderStage::Fragment);
        defs.omap_targets = 0xff;
        defs.dual_source_blend = true;
        let out = Fixture::new(defs, TargetApi::Vulkan).render(write_outputs);
        assert_eq!(
            out,
            "layout (location = 0, index = 0) out vec4 out_attr0;\n\
             layout (location = 0, index = 1) out vec4 out_attr1;\n\n"
        );
    }

    #[test]
    fn dual_source_pair_starts_at_the_lowest_enabled_target() {
        let mut defs = ShaderDefinitions::new(ShaderStage::Fragment);
        // Render targets 4, 5 and 6.
        defs.omap_targets = 0xfff << 16;
        defs.dual_source_blend = true;
        let out = Fixture::new(defs, TargetApi::Vulkan).render(write_outputs);
        assert_eq!(
            out,
            "layout (location = 4, index = 0) out vec4 out_attr4;\n\
             layout (location = 4, index = 1) out vec4 out_attr5;\n\
             layout (location = 6) out vec4 out_attr6;\n\n"
        );
    }

    #[test]
    fn dual_source_blending_needs_two_adjacent_targets() {
        let mut defs = ShaderDefinitions::new(ShaderStage::Fragment);
        defs.omap_targets = 0xf00f << 4;
        defs.dual_source_blend = true;
        let out = Fixture::new(defs, TargetApi::Vulkan).render(write_outputs);
        assert!(!out.contains("index = "));
        assert!(out.contains("layout (location = 1) out vec4 out_attr1;\n"));
        assert!(out.contains("layout (location = 4) out vec4 out_attr4;\n"));
    }

    #[test]
    fn captured_outputs_carry_transform_feedback_layout() {
        let mut defs = ShaderDefinitions::new(ShaderStage::Vertex);
        let word = (USER_ATTRIBUTE_BASE / 4) as u8;
        defs.transform_feedback.push(TransformFeedbackBuffer {
            stride: 8,
            varying_locations: vec![word, word + 1],
        });
        let mut fixture = Fixture::new(defs, TargetApi::Vulkan);
        fixture.usage.set_output_user_attribute(0);

        assert_eq!(
            fixture.render(write_outputs),
            "layout (location = 0, xfb_buffer = 0, xfb_offset = 0, xfb_stride = 8) out vec2 out_attr0;\n\
             layout (location = 0, component = 2) out float out_attr0_z;\n\
             layout (location = 0, component = 3) out float out_attr0_w;\n\n"
        );
    }

    #[test]
    fn buffers_carry_a_set_only_on_vulkan() {
        let mut fixture = Fixture::new(ShaderDefinitions::new(ShaderStage::Fragment), TargetApi::Vulkan);
        fixture.resources.get_constant_buffer_binding(0);
        fixture.resources.get_texture_binding(4, crate::ir::SamplerType::Texture2D, NumType::F32);
        let vk = fixture.render(write_resources);
        assert!(vk.contains("layout (set = 0, binding = 1, std140) uniform _cb0\n{\n    uvec4 data[4096];\n} cb0;\n"));
        assert!(vk.contains("layout (binding = 0, set = 2) uniform sampler2D tex0;\n"));

        fixture.api = TargetApi::OpenGl;
        let gl = fixture.render(write_resources);
        assert!(gl.contains("layout (binding = 1, std140) uniform _cb0\n"));
        assert!(gl.contains("layout (binding = 0) uniform sampler2D tex0;\n"));
    }

    #[test]
    fn tessellation_winding_is_flipped_on_vulkan() {
        let mut defs = ShaderDefinitions::new(ShaderStage::TessellationEvaluation);
        defs.tess_patch_type = TessPatchType::Quads;
        defs.tess_cw = true;
        let gl = Fixture::new(defs.clone(), TargetApi::OpenGl).render(write_stage_layout);
        let vk = Fixture::new(defs, TargetApi::Vulkan).render(write_stage_layout);
        assert_eq!(gl, "layout (quads, equal_spacing, cw) in;\n\n");
        assert_eq!(vk, "layout (quads, equal_spacing, ccw) in;\n\n");
    }
}
