use maxwell_shader::decode::{DecodedBlock, DecodedInstruction, DecodedOp};
use maxwell_shader::gpu_accessor::DefaultGpuAccessor;
use maxwell_shader::ir::Register;
use maxwell_shader::{
    DecodedProgram, ShaderDefinitions, ShaderStage, TargetApi, TranslationFlags,
    TranslationOptions, TranslatorContext,
};
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
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

#[test]
fn vertex_outputs_line_up_with_fragment_inputs() {
    init_tracing();
    let vertex_program = program(vec![ast(0, 0x070, 4), DecodedOp::Exit]);
    let fragment_program = program(vec![
        DecodedOp::Ipa {
            dest: Register(0),
            address: 0x0b0,
            offset: None,
        },
        DecodedOp::Exit,
    ]);
    let options = TranslationOptions::new(TargetApi::Vulkan, TranslationFlags::empty());

    let mut vertex = TranslatorContext::new(
        &vertex_program,
        ShaderDefinitions::new(ShaderStage::Vertex),
        &DefaultGpuAccessor,
        options,
    );
    let mut fragment = TranslatorContext::new(
        &fragment_program,
        ShaderDefinitions::new(ShaderStage::Fragment),
        &DefaultGpuAccessor,
        options,
    );
    vertex.set_next_stage(&fragment);
    assert!(vertex.definitions().last_in_vertex_pipeline);

    let vertex_shader = vertex.translate(false).unwrap();
    let fragment_shader = fragment.translate(false).unwrap();

    assert!(vertex_shader
        .code
        .contains("layout (location = 3) out vec4 out_attr3;"));
    assert!(fragment_shader.code.contains("layout (location = 3) "));
    assert!(fragment_shader.code.contains(" in_attr3;"));
    assert_eq!(fragment_shader.info.fragment_output_map, Some(0xf));
    assert_eq!(vertex_shader.info.fragment_output_map, None);
}

#[test]
fn compute_emulated_vertex_is_followed_by_passthroughs() {
    init_tracing();
    let vertex_program = program(vec![
        ast(0, 0x070, 4),
        ast(4, 0x064, 1),
        ast(4, 0x080, 4),
        DecodedOp::Exit,
    ]);
    let options = TranslationOptions::new(TargetApi::OpenGl, TranslationFlags::empty());
    let mut vertex = TranslatorContext::new(
        &vertex_program,
        ShaderDefinitions::new(ShaderStage::Vertex),
        &DefaultGpuAccessor,
        options,
    );

    let compute = vertex.translate(true).unwrap();
    assert_eq!(compute.info.stage, ShaderStage::Compute);
    assert!(compute.code.starts_with("#version 450 core\n"));

    let replay = vertex.generate_vertex_passthrough_for_compute().unwrap();
    assert!(replay.code.contains("gl_VertexID"));
    assert!(replay.code.contains("gl_Layer = "));

    vertex.set_layer_output_attribute(0x080);
    let geometry = vertex.generate_geometry_passthrough().unwrap();
    assert_eq!(geometry.info.stage, ShaderStage::Geometry);
    assert!(geometry.code.contains("EmitVertex();"));
    assert!(geometry.code.contains("EndPrimitive();"));
}
