//! Host queries and the diagnostic sink consumed by the compiler.

use crate::types::InputTopology;

/// Capabilities of the host driver the generated GLSL will run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// `GL_ARB_shader_ballot`; without it the KHR subgroup extensions are used.
    pub supports_shader_ballot: bool,
    pub supports_fragment_shader_interlock: bool,
    pub supports_fragment_shader_ordering_intel: bool,
    pub supports_geometry_shader: bool,
    pub supports_geometry_shader_passthrough: bool,
    pub supports_transform_feedback: bool,
    pub supports_viewport_mask: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            supports_shader_ballot: true,
            supports_fragment_shader_interlock: false,
            supports_fragment_shader_ordering_intel: false,
            supports_geometry_shader: true,
            supports_geometry_shader_passthrough: false,
            supports_transform_feedback: true,
            supports_viewport_mask: false,
        }
    }
}

/// Queries answered by the surrounding graphics runtime.
///
/// Every method has a default so tests and simple hosts only override what they need. `log` is
/// the only diagnostic channel the compiler uses for unexpected-but-continuable shader content;
/// implementations may collect the messages instead of forwarding them to `tracing`.
pub trait GpuAccessor {
    fn log(&self, message: &str) {
        tracing::warn!(target: "maxwell_shader", "{message}");
    }

    fn host_capabilities(&self) -> HostCapabilities {
        HostCapabilities::default()
    }

    /// Whether the guest reads base vertex/base instance/draw index from constant buffer 0.
    fn query_has_constant_buffer_draw_parameters(&self) -> bool {
        false
    }

    /// Topology of the draw that a synthesized geometry passthrough shader will consume.
    fn query_primitive_topology(&self) -> InputTopology {
        InputTopology::Points
    }

    /// Shared memory size of the compute dispatch, in bytes.
    fn query_compute_shared_memory_size(&self) -> u32 {
        0xc000
    }

    fn query_transform_feedback_enabled(&self) -> bool {
        false
    }
}

/// Accessor that answers every query with its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGpuAccessor;

impl GpuAccessor for DefaultGpuAccessor {}
