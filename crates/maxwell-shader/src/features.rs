use bitflags::bitflags;

bitflags! {
    /// Requirements detected while compiling a program.
    ///
    /// Flags only accumulate: passes OR new bits in, nothing ever clears them during a translation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FeatureFlags: u32 {
        /// Base vertex/base instance/draw index are read by the program.
        const DRAW_PARAMETERS = 1 << 0;
        /// `gl_FragCoord.xy` is read.
        const FRAG_COORD_XY = 1 << 1;
        const INSTANCE_ID = 1 << 2;
        /// The render target layer output is written (or forwarded by a passthrough shader).
        const RT_LAYER = 1 << 3;
        const VIEWPORT_INDEX = 1 << 4;
        const POINT_SIZE = 1 << 5;
        /// Input attributes are accessed with a dynamic index.
        const IA_INDEXING = 1 << 6;
        /// Output attributes are accessed with a dynamic index.
        const OA_INDEXING = 1 << 7;
        const LOCAL_MEMORY = 1 << 8;
        const SHARED_MEMORY = 1 << 9;
        /// Vertex/geometry work is emulated with a compute dispatch.
        const VTG_AS_COMPUTE = 1 << 10;
    }
}

impl FeatureFlags {
    /// Feature bits that change the layout of the per-vertex record exchanged between stages.
    pub fn io_layout_bits(self) -> FeatureFlags {
        self & (FeatureFlags::RT_LAYER | FeatureFlags::VIEWPORT_INDEX | FeatureFlags::POINT_SIZE)
    }
}
