//! Maxwell shader translation: decoded guest programs to GLSL.
//!
//! The pipeline runs strictly forward:
//!
//! 1. [`ir_builder`] lowers a [`decode::DecodedProgram`] into a flat list of IR operations.
//! 2. [`cfg`] splits the operations into basic blocks stored in an [`ir::Function`] arena.
//! 3. [`transforms`] legalizes the IR in place (draw parameters, vertex/geometry as compute).
//! 4. [`structured`] rebuilds `if`/`loop` nesting from the CFG.
//! 5. [`glsl`] prints the structured program together with the resource declarations.
//!
//! [`translator::TranslatorContext`] drives all of the above for one stage, fuses two stages, or
//! synthesizes passthrough programs for stages that follow a compute-emulated stage.

pub mod attribute;
pub mod attribute_usage;
pub mod cfg;
pub mod decode;
pub mod definitions;
pub mod error;
pub mod features;
pub mod glsl;
pub mod gpu_accessor;
pub mod ir;
pub mod ir_builder;
pub mod resources;
pub mod structured;
pub mod transforms;
pub mod translator;
pub mod types;
pub mod verify;

pub use attribute_usage::{AttributeUsage, IoUsage};
pub use decode::DecodedProgram;
pub use definitions::ShaderDefinitions;
pub use error::TranslateError;
pub use features::FeatureFlags;
pub use gpu_accessor::{GpuAccessor, HostCapabilities};
pub use resources::{ResourceManager, ResourceReservations};
pub use translator::{
    ShaderProgram, ShaderProgramInfo, TranslationFlags, TranslationOptions, TranslatorContext,
};
pub use types::{ShaderStage, TargetApi};
