use std::collections::BTreeSet;

use maxwell_shader::decode::{DecodedBlock, DecodedInstruction, DecodedOp, Src};
use maxwell_shader::definitions::{AttributePacking, TransformFeedbackBuffer};
use maxwell_shader::gpu_accessor::DefaultGpuAccessor;
use maxwell_shader::ir::{Register, StorageKind};
use maxwell_shader::{
    DecodedProgram, FeatureFlags, GpuAccessor, HostCapabilities, ShaderDefinitions, ShaderProgram,
    ShaderStage, TargetApi, TranslationOptions, TranslatorContext,
};
use pretty_assertions::assert_eq;

/// Host without native transform feedback while a capture is active.
struct EmulatedCapture;

impl GpuAccessor for EmulatedCapture {
    fn host_capabilities(&self) -> HostCapabilities {
        HostCapabilities {
            supports_transform_feedback: false,
            ..HostCapabilities::default()
        }
    }

    fn query_transform_feedback_enabled(&self) -> bool {
        true
    }
}

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

fn ald(dest: u8, address: u32, count: u8) -> DecodedOp {
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

fn ast(src: u8, address: u32, count: u8) -> DecodedOp {
    DecodedOp::Ast {
        src: Register(src),
        count,
        address,
        vertex: None,
        offset: None,
        per_patch: false,
    }
}

fn vulkan() -> TranslationOptions {
    TranslationOptions {
        target_api: TargetApi::Vulkan,
        ..TranslationOptions::default()
    }
}

fn all_bindings(shader: &ShaderProgram) -> Vec<(u32, u32)> {
    let info = &shader.info;
    info.constant_buffers
        .iter()
        .map(|b| (b.set, b.binding))
        .chain(info.storage_buffers.iter().map(|b| (b.set, b.binding)))
        .chain(info.textures.iter().map(|t| (t.set, t.binding)))
        .chain(info.images.iter().map(|i| (i.set, i.binding)))
        .collect()
}

#[test]
fn packed_signed_attribute_is_fetched_and_sign_extended() {
    let program = program(vec![ald(0, 0x080, 1), ast(0, 0x070, 1), DecodedOp::Exit]);
    let mut definitions = ShaderDefinitions::new(ShaderStage::Vertex);
    definitions.attribute_types[0].packing = AttributePacking::Rgb10A2Signed;
    let mut ctx = TranslatorContext::new(&program, definitions, &DefaultGpuAccessor, vulkan());

    let shader = ctx.translate(true).unwrap();
    let code = &shader.code;

    assert_eq!(shader.info.stage, ShaderStage::Compute);
    assert!(shader.info.used_features.contains(FeatureFlags::VTG_AS_COMPUTE));
    assert!(code.contains("texelFetch(vb_data0, "), "{code}");
    assert!(code.contains(" << 22u)"), "{code}");
    assert!(code.contains(" >> 22u)"), "{code}");
    assert!(code.contains("0.001953125"), "{code}");
    assert!(code.contains("local_vertex_data"));
    assert!(!code.contains("in_attr0"));
    assert!(shader
        .info
        .textures
        .iter()
        .any(|t| t.name == "vb_data0" && t.binding == 1));
}

#[test]
fn translation_uses_the_advertised_reservations() {
    let program = program(vec![
        ald(0, 0x080, 4),
        ast(0, 0x070, 4),
        ast(0, 0x064, 1),
        ast(1, 0x2c0, 1),
        ast(0, 0x0a0, 4),
        DecodedOp::Exit,
    ]);
    let mut ctx = TranslatorContext::new(
        &program,
        ShaderDefinitions::new(ShaderStage::Vertex),
        &DefaultGpuAccessor,
        vulkan(),
    );
    let advertised = ctx.get_resource_reservations();

    let shader = ctx.translate(true).unwrap();
    assert_eq!(shader.reservations, advertised);

    let table = advertised
        .offsets()
        .into_iter()
        .filter(|(io, _)| io.storage_kind == StorageKind::Output)
        .map(|(io, offset)| {
            format!(
                "{:?} {}.{} = {offset}",
                io.variable, io.location, io.component
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    insta::assert_snapshot!(table, @r"
    Position 0.0 = 0
    Position 0.1 = 1
    Position 0.2 = 2
    Position 0.3 = 3
    Layer 0.0 = 4
    ClipDistance 0.0 = 5
    UserDefined 2.0 = 6
    UserDefined 2.1 = 7
    UserDefined 2.2 = 8
    UserDefined 2.3 = 9
    ");
    assert_eq!(advertised.output_size_per_invocation, 10);
}

#[test]
fn passthrough_replays_the_vertex_records() {
    let program = program(vec![ast(0, 0x070, 4), ast(4, 0x080, 4), DecodedOp::Exit]);
    let mut ctx = TranslatorContext::new(
        &program,
        ShaderDefinitions::new(ShaderStage::Vertex),
        &DefaultGpuAccessor,
        vulkan(),
    );
    let compute = ctx.translate(true).unwrap();
    let passthrough = ctx.generate_vertex_passthrough_for_compute().unwrap();
    let code = &passthrough.code;

    assert_eq!(passthrough.info.stage, ShaderStage::Vertex);
    assert!(code.contains("vb_input"), "{code}");
    assert!(code.contains("gl_Position.w = "), "{code}");
    assert!(code.contains("layout (location = 0) out vec4 out_attr0;"), "{code}");
    assert!(code.contains("out_attr0.w = "), "{code}");
    assert!(code.contains("gl_InstanceIndex"), "{code}");
    assert_eq!(compute.reservations.output_size_per_invocation, 8);
}

#[test]
fn passthrough_reports_no_features_of_the_emulated_stage() {
    let program = program(vec![ast(0, 0x070, 4), ast(4, 0x064, 1), DecodedOp::Exit]);
    let mut ctx = TranslatorContext::new(
        &program,
        ShaderDefinitions::new(ShaderStage::Vertex),
        &DefaultGpuAccessor,
        vulkan(),
    );
    let compute = ctx.translate(true).unwrap();
    assert!(compute.info.used_features.contains(FeatureFlags::RT_LAYER));

    let passthrough = ctx.generate_vertex_passthrough_for_compute().unwrap();
    assert!(passthrough.code.contains("gl_Layer = "), "{}", passthrough.code);
    assert_eq!(passthrough.info.used_features, FeatureFlags::empty());
}

#[test]
fn bindings_are_unique_with_emulated_capture() {
    let program = program(vec![
        ald(0, 0x080, 4),
        DecodedOp::Mov {
            dest: Register(4),
            src: Src::ConstantBuffer { slot: 2, offset: 8 },
        },
        ast(0, 0x070, 4),
        ast(4, 0x090, 1),
        DecodedOp::Exit,
    ]);
    let mut definitions = ShaderDefinitions::new(ShaderStage::Vertex);
    definitions.transform_feedback = vec![TransformFeedbackBuffer {
        stride: 8,
        varying_locations: vec![0x70 / 4, 0x90 / 4],
    }];
    let mut ctx = TranslatorContext::new(&program, definitions, &EmulatedCapture, vulkan());

    let shader = ctx.translate(true).unwrap();
    let bindings = all_bindings(&shader);
    let unique: BTreeSet<_> = bindings.iter().copied().collect();
    assert_eq!(unique.len(), bindings.len(), "{bindings:?}");

    let names: Vec<&str> = shader
        .info
        .storage_buffers
        .iter()
        .map(|b| b.name.as_str())
        .collect();
    assert!(names.contains(&"tfe_info"));
    assert!(names.contains(&"tfe_data0"));
    assert!(names.contains(&"vertex_output"));
    assert_eq!(shader.reservations.vertex_output_storage_buffer_binding, 5);
    assert!(shader.info.used_features.contains(FeatureFlags::DRAW_PARAMETERS));
}
