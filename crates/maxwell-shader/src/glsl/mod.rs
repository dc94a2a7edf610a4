//! GLSL code generation.
//!
//! Generation is a pure function of the structured program, the resources declared while
//! building it and the stage configuration. The output is laid out as: version and extension
//! directives, stage layout qualifiers, buffers and memories, samplers and images, stage IO, helper
//! functions, and finally `main`.
//!
//! Guest registers are `uint` variables; every value is stored in its raw bit pattern and
//! reinterpreted at each use with `floatBitsToUint`/`uintBitsToFloat` and friends. Locals carry
//! the type of the operation that defines them, so most expressions need no conversion at all.

mod declarations;
mod helpers;
mod instructions;
mod io;
pub mod number_formatter;

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::attribute_usage::AttributeUsage;
use crate::definitions::ShaderDefinitions;
use crate::features::FeatureFlags;
use crate::gpu_accessor::HostCapabilities;
use crate::ir::{Function, LocalId, NumType, Operand, StorageKind};
use crate::resources::ResourceManager;
use crate::structured::StructuredProgram;
use crate::types::TargetApi;

pub use helpers::{helper_source, HelperFunctionsMask};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("{inst} is missing source operand {index}")]
    MissingOperand { inst: &'static str, index: usize },
    #[error("{inst} does not produce a value")]
    NoValue { inst: &'static str },
    #[error("{inst} can not write to {dest:?}")]
    InvalidDestination { inst: &'static str, dest: Operand },
    #[error("label operand used as a value")]
    LabelAsValue,
    #[error("{kind} {id} is not declared")]
    UndeclaredResource { kind: &'static str, id: u32 },
    #[error("{inst} does not address a known IO variable")]
    UnknownIoVariable { inst: &'static str },
    #[error("{inst} can not access {storage:?} storage")]
    InvalidStorage {
        inst: &'static str,
        storage: StorageKind,
    },
    #[error("unsupported IO access: {0}")]
    UnsupportedIo(String),
}

/// GLSL type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Bool,
    S32,
    U32,
    F32,
}

impl VarType {
    pub fn scalar_name(self) -> &'static str {
        match self {
            VarType::Bool => "bool",
            VarType::S32 => "int",
            VarType::U32 => "uint",
            VarType::F32 => "float",
        }
    }

    pub fn vector_name(self, components: u32) -> String {
        let prefix = match self {
            VarType::Bool => "b",
            VarType::S32 => "i",
            VarType::U32 => "u",
            VarType::F32 => "",
        };
        format!("{prefix}vec{components}")
    }
}

impl From<NumType> for VarType {
    fn from(ty: NumType) -> Self {
        match ty {
            NumType::S32 => VarType::S32,
            NumType::U32 => VarType::U32,
            NumType::F32 => VarType::F32,
        }
    }
}

/// Everything besides the program that shapes the generated text.
#[derive(Debug, Clone, Copy)]
pub struct CodegenInput<'a> {
    pub definitions: &'a ShaderDefinitions,
    pub resources: &'a ResourceManager,
    pub usage: &'a AttributeUsage,
    pub features: FeatureFlags,
    pub capabilities: HostCapabilities,
    pub target_api: TargetApi,
    /// Emit a banner naming the stage.
    pub debug: bool,
}

impl CodegenInput<'_> {
    /// Transform feedback is captured natively by the host for this stage.
    pub fn native_transform_feedback(&self) -> bool {
        let defs = self.definitions;
        defs.stage.is_vtg()
            && defs.last_in_vertex_pipeline
            && defs.transform_feedback_enabled()
            && self.capabilities.supports_transform_feedback
    }

    /// Geometry inputs forwarded by the host through `GL_NV_geometry_shader_passthrough`.
    pub fn uses_geometry_passthrough(&self) -> bool {
        self.definitions.gp_passthrough && self.capabilities.supports_geometry_shader_passthrough
    }
}

pub(crate) struct GlslWriter {
    out: String,
    indent: usize,
}

impl GlslWriter {
    pub(crate) fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    fn indent(&mut self) {
        self.indent += 4;
    }

    fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(4);
    }

    pub(crate) fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push(' ');
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn open_block(&mut self) {
        self.line("{");
        self.indent();
    }

    fn close_block(&mut self, suffix: &str) {
        self.dedent();
        self.line(&format!("}}{suffix}"));
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

/// State of one `main` body emission.
pub(crate) struct Codegen<'a> {
    function: &'a Function,
    input: &'a CodegenInput<'a>,
    local_types: HashMap<LocalId, VarType>,
    predeclared: &'a BTreeSet<LocalId>,
}

/// Generates the complete GLSL source of `program`.
pub fn generate(
    function: &Function,
    program: &StructuredProgram,
    input: &CodegenInput<'_>,
) -> Result<String, CodegenError> {
    let mut w = GlslWriter::new();

    declarations::write_header(&mut w, input);
    declarations::write_stage_layout(&mut w, input);
    declarations::write_resources(&mut w, input);
    declarations::write_inputs(&mut w, input);
    declarations::write_outputs(&mut w, input);
    helpers::write_helpers(
        &mut w,
        HelperFunctionsMask::for_function(function),
        input.capabilities.supports_shader_ballot,
    );

    let codegen = Codegen {
        function,
        input,
        local_types: instructions::infer_local_types(function, input),
        predeclared: &program.predeclared_locals,
    };

    w.line("void main()");
    w.open_block();
    codegen.write_main_declarations(&mut w);
    codegen.write_nodes(&mut w, &program.body)?;
    w.close_block("");

    let text = w.finish();
    tracing::debug!(
        stage = input.definitions.stage.name(),
        bytes = text.len(),
        "generated GLSL"
    );
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_function;
    use crate::ir::{CompareOp, IdAllocator, Instruction, IoVariable, Operation, Predicate, Register};
    use crate::resources::ResourceReservations;
    use crate::structured::structure;
    use crate::types::ShaderStage;
    use pretty_assertions::assert_eq;

    fn generate_vertex(ops: Vec<Operation>, ids: IdAllocator, debug: bool) -> String {
        let mut function = build_function(ops, ids).unwrap();
        let program = structure(&mut function).unwrap();
        let definitions = ShaderDefinitions::new(ShaderStage::Vertex);
        let resources =
            ResourceManager::new(ShaderStage::Vertex, TargetApi::Vulkan, ResourceReservations::default());
        let usage = AttributeUsage::new();
        let input = CodegenInput {
            definitions: &definitions,
            resources: &resources,
            usage: &usage,
            features: FeatureFlags::empty(),
            capabilities: HostCapabilities::default(),
            target_api: TargetApi::Vulkan,
            debug,
        };
        generate(&function, &program, &input).unwrap()
    }

    #[test]
    fn guarded_position_write() {
        let mut ids = IdAllocator::default();
        let inside = ids.new_label();
        let value = ids.new_local();
        let r0 = Operand::Register(Register(0));
        let p0 = Operand::Predicate(Predicate(0));
        let ops = vec![
            Operation::new(
                Instruction::Compare(CompareOp::Less, NumType::F32),
                Some(p0),
                vec![r0, Operand::const_f32(0.0)],
            ),
            Operation::new(Instruction::BranchIfFalse, None, vec![inside, p0]),
            Operation::new(Instruction::Return, None, vec![]),
            Operation::new(Instruction::MarkLabel, None, vec![inside]),
            Operation::new(
                Instruction::Add(NumType::F32),
                Some(value),
                vec![r0, Operand::const_f32(1.0)],
            ),
            Operation::with_storage(
                Instruction::Store,
                StorageKind::Output,
                None,
                vec![IoVariable::Position.operand(), Operand::Constant(0), value],
            ),
            Operation::new(Instruction::Return, None, vec![]),
        ];

        let text = generate_vertex(ops, ids, false);
        let main = &text[text.find("void main()").unwrap()..];
        assert_eq!(
            main,
            "void main()\n\
             {\n    \
                 uint r0;\n    \
                 bool p0;\n\
                 \n    \
                 p0 = (uintBitsToFloat(r0) < 0.0);\n    \
                 if (p0)\n    \
                 {\n        \
                     return;\n    \
                 }\n    \
                 float temp_0 = (uintBitsToFloat(r0) + 1.0);\n    \
                 gl_Position.x = temp_0;\n\
             }\n"
        );
        assert!(text.starts_with("#version 460 core\n#extension GL_ARB_gpu_shader_int64"));
    }

    #[test]
    fn leaving_two_loops_declares_an_exit_selector() {
        let mut ids = IdAllocator::default();
        let outer = ids.new_label();
        let inner = ids.new_label();
        let after = ids.new_label();
        let copy = |value: u32| {
            Operation::new(
                Instruction::Copy,
                Some(Operand::Register(Register(0))),
                vec![Operand::Constant(value)],
            )
        };
        let ops = vec![
            Operation::new(Instruction::MarkLabel, None, vec![outer]),
            copy(1),
            Operation::new(Instruction::MarkLabel, None, vec![inner]),
            copy(2),
            Operation::new(
                Instruction::BranchIfTrue,
                None,
                vec![after, Operand::Predicate(Predicate(0))],
            ),
            Operation::new(
                Instruction::BranchIfTrue,
                None,
                vec![inner, Operand::Predicate(Predicate(1))],
            ),
            Operation::new(Instruction::Branch, None, vec![outer]),
            Operation::new(Instruction::MarkLabel, None, vec![after]),
            copy(3),
            Operation::new(Instruction::Return, None, vec![]),
        ];

        let text = generate_vertex(ops, ids, false);
        assert!(text.contains("    uint var_0;\n"));
        assert!(text.contains("var_0 = 0u;\n"));
        assert!(text.contains("var_0 = 1u;\n"));
        assert!(text.contains("bool temp_0 = (var_0 == 0u);\n"));
        assert_eq!(text.matches("break;").count(), 3);
    }

    #[test]
    fn helpers_precede_main_and_debug_names_the_stage() {
        let mut ids = IdAllocator::default();
        let value = ids.new_local();
        let ops = vec![
            Operation::new(
                Instruction::ShuffleXor,
                Some(value),
                vec![
                    Operand::Register(Register(1)),
                    Operand::Constant(1),
                    Operand::Constant(0x1f),
                ],
            ),
            Operation::new(
                Instruction::Copy,
                Some(Operand::Register(Register(2))),
                vec![value],
            ),
            Operation::new(Instruction::Return, None, vec![]),
        ];

        let text = generate_vertex(ops, ids, true);
        assert!(text.starts_with("#version 460 core\n// vertex shader\n"));
        let helper = text.find("float Helper_ShuffleXor(float x, uint index, uint mask)").unwrap();
        let main = text.find("void main()").unwrap();
        assert!(helper < main);
        assert!(text.contains(
            "    float temp_0 = Helper_ShuffleXor(uintBitsToFloat(r1), 1u, 31u);\n    r2 = floatBitsToUint(temp_0);\n"
        ));
        assert!(!text.contains("Helper_SwizzleAdd"));
    }
}
