use thiserror::Error;

use crate::cfg::CfgError;
use crate::glsl::CodegenError;
use crate::ir_builder::BuildError;
use crate::structured::StructureError;
use crate::verify::VerifyError;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("control flow graph error: {0}")]
    Cfg(#[from] CfgError),
    #[error("malformed IR after {stage}: {source}")]
    Verify {
        stage: &'static str,
        #[source]
        source: VerifyError,
    },
    #[error("control flow structuring failed: {0}")]
    Structure(#[from] StructureError),
    #[error("GLSL generation failed: {0}")]
    Codegen(#[from] CodegenError),
    /// The context was already used for a translation.
    #[error("translator context is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    /// An IO access had no slot in the compute emulation record and strict IO checking is on.
    #[error("unresolved {kind} \"{variable}\"")]
    UnresolvedIo { kind: &'static str, variable: String },
}

impl TranslateError {
    pub(crate) fn verify(stage: &'static str, source: VerifyError) -> Self {
        TranslateError::Verify { stage, source }
    }
}
