//! Pipeline-level enums shared by every translation stage.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Compute,
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
}

impl ShaderStage {
    /// Vertex, tessellation and geometry stages.
    pub fn is_vtg(self) -> bool {
        matches!(
            self,
            ShaderStage::Vertex
                | ShaderStage::TessellationControl
                | ShaderStage::TessellationEvaluation
                | ShaderStage::Geometry
        )
    }

    /// Stages whose per-vertex inputs are arrays indexed by the vertex within the primitive/patch.
    pub fn has_arrayed_inputs(self) -> bool {
        matches!(
            self,
            ShaderStage::TessellationControl
                | ShaderStage::TessellationEvaluation
                | ShaderStage::Geometry
        )
    }

    /// Only tessellation control outputs are indexed by `gl_InvocationID`.
    pub fn has_arrayed_outputs(self) -> bool {
        self == ShaderStage::TessellationControl
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Compute => "compute",
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessellationControl => "tessellation control",
            ShaderStage::TessellationEvaluation => "tessellation evaluation",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
        }
    }
}

/// Host API the GLSL is generated for.
///
/// Vulkan output targets `#version 460 core` and carries descriptor `set` qualifiers; OpenGL output
/// targets `#version 450 core` and relies on ARB extensions for draw parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetApi {
    #[default]
    OpenGl,
    Vulkan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputTopology {
    #[default]
    Points,
    Lines,
    LinesAdjacency,
    Triangles,
    TrianglesAdjacency,
}

impl InputTopology {
    pub fn input_vertices(self) -> u32 {
        match self {
            InputTopology::Points => 1,
            InputTopology::Lines => 2,
            InputTopology::LinesAdjacency => 4,
            InputTopology::Triangles => 3,
            InputTopology::TrianglesAdjacency => 6,
        }
    }

    pub fn input_vertices_without_adjacency(self) -> u32 {
        match self {
            InputTopology::Points => 1,
            InputTopology::Lines | InputTopology::LinesAdjacency => 2,
            InputTopology::Triangles | InputTopology::TrianglesAdjacency => 3,
        }
    }

    pub fn glsl_name(self) -> &'static str {
        match self {
            InputTopology::Points => "points",
            InputTopology::Lines => "lines",
            InputTopology::LinesAdjacency => "lines_adjacency",
            InputTopology::Triangles => "triangles",
            InputTopology::TrianglesAdjacency => "triangles_adjacency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputTopology {
    #[default]
    PointList,
    LineStrip,
    TriangleStrip,
}

impl OutputTopology {
    pub fn glsl_name(self) -> &'static str {
        match self {
            OutputTopology::PointList => "points",
            OutputTopology::LineStrip => "line_strip",
            OutputTopology::TriangleStrip => "triangle_strip",
        }
    }

    pub fn vertices_per_primitive(self) -> u32 {
        match self {
            OutputTopology::PointList => 1,
            OutputTopology::LineStrip => 2,
            OutputTopology::TriangleStrip => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TessPatchType {
    Isolines,
    #[default]
    Triangles,
    Quads,
}

impl TessPatchType {
    pub fn glsl_name(self) -> &'static str {
        match self {
            TessPatchType::Isolines => "isolines",
            TessPatchType::Triangles => "triangles",
            TessPatchType::Quads => "quads",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TessSpacing {
    #[default]
    EqualSpacing,
    FractionalEvenSpacing,
    FractionalOddSpacing,
}

impl TessSpacing {
    pub fn glsl_name(self) -> &'static str {
        match self {
            TessSpacing::EqualSpacing => "equal_spacing",
            TessSpacing::FractionalEvenSpacing => "fractional_even_spacing",
            TessSpacing::FractionalOddSpacing => "fractional_odd_spacing",
        }
    }
}

/// Fragment input interpolation as configured by the guest pixel input map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterpolationQualifier {
    #[default]
    Perspective,
    Constant,
    ScreenLinear,
}

impl InterpolationQualifier {
    pub fn glsl_qualifier(self) -> &'static str {
        match self {
            InterpolationQualifier::Perspective => "",
            InterpolationQualifier::Constant => "flat ",
            InterpolationQualifier::ScreenLinear => "noperspective ",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacency_topologies_report_both_vertex_counts() {
        assert_eq!(InputTopology::TrianglesAdjacency.input_vertices(), 6);
        assert_eq!(
            InputTopology::TrianglesAdjacency.input_vertices_without_adjacency(),
            3
        );
        assert_eq!(InputTopology::LinesAdjacency.glsl_name(), "lines_adjacency");
    }

    #[test]
    fn only_tessellation_control_has_arrayed_outputs() {
        assert!(ShaderStage::TessellationControl.has_arrayed_outputs());
        assert!(!ShaderStage::Geometry.has_arrayed_outputs());
        assert!(ShaderStage::Geometry.has_arrayed_inputs());
        assert!(!ShaderStage::Fragment.is_vtg());
    }
}
