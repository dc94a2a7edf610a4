//! Operation-based intermediate representation.
//!
//! Operations live in an arena owned by [`Function`] and are addressed by stable [`OpId`]s. Each
//! basic block threads its operations through an intrusive doubly linked list over the arena, so
//! passes can insert before/after or remove the operation they are visiting in O(1) without
//! invalidating ids held elsewhere. Removed slots are tombstoned, never reused.

use bitflags::bitflags;

/// Guest general purpose register. `RZ` reads as zero and discards writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(pub u8);

impl Register {
    pub const RZ: Register = Register(255);

    pub fn is_rz(self) -> bool {
        self == Self::RZ
    }
}

/// Guest predicate register. `PT` reads as true and discards writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Predicate(pub u8);

impl Predicate {
    pub const PT: Predicate = Predicate(7);

    pub fn is_pt(self) -> bool {
        self == Self::PT
    }
}

/// SSA value: defined by exactly one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

/// Mutable compiler temporary, used where a value is assigned on several paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Raw 32-bit constant; its interpretation comes from the consuming operation.
    Constant(u32),
    /// Guest constant buffer word (`offset` counts 32-bit words).
    ConstantBuffer { slot: u32, offset: u32 },
    Register(Register),
    Predicate(Predicate),
    Local(LocalId),
    Variable(VariableId),
    Label(LabelId),
    Undefined,
}

impl Operand {
    pub fn constant(value: u32) -> Self {
        Operand::Constant(value)
    }

    pub fn const_i32(value: i32) -> Self {
        Operand::Constant(value as u32)
    }

    pub fn const_f32(value: f32) -> Self {
        Operand::Constant(value.to_bits())
    }

    pub fn as_constant(&self) -> Option<u32> {
        match *self {
            Operand::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match *self {
            Operand::Local(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<LabelId> {
        match *self {
            Operand::Label(id) => Some(id),
            _ => None,
        }
    }
}

/// Built-in and user IO variables addressed by `Load`/`Store` on the IO storage kinds.
///
/// The variable travels as the first source operand of the access, encoded as a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum IoVariable {
    BaseInstance,
    BaseVertex,
    ClipDistance,
    DrawIndex,
    FragmentCoord,
    FragmentOutputColor,
    FragmentOutputDepth,
    FrontFacing,
    GlobalInvocationId,
    InstanceId,
    InstanceIndex,
    InvocationId,
    Layer,
    LocalInvocationId,
    PointCoord,
    PointSize,
    Position,
    PrimitiveId,
    SubgroupEqMask,
    SubgroupGeMask,
    SubgroupGtMask,
    SubgroupLaneId,
    SubgroupLeMask,
    SubgroupLtMask,
    TessellationCoord,
    TessellationLevelInner,
    TessellationLevelOuter,
    UserDefined,
    VertexId,
    VertexIndex,
    ViewportIndex,
    WorkgroupId,
}

impl IoVariable {
    const ALL: [IoVariable; 32] = [
        IoVariable::BaseInstance,
        IoVariable::BaseVertex,
        IoVariable::ClipDistance,
        IoVariable::DrawIndex,
        IoVariable::FragmentCoord,
        IoVariable::FragmentOutputColor,
        IoVariable::FragmentOutputDepth,
        IoVariable::FrontFacing,
        IoVariable::GlobalInvocationId,
        IoVariable::InstanceId,
        IoVariable::InstanceIndex,
        IoVariable::InvocationId,
        IoVariable::Layer,
        IoVariable::LocalInvocationId,
        IoVariable::PointCoord,
        IoVariable::PointSize,
        IoVariable::Position,
        IoVariable::PrimitiveId,
        IoVariable::SubgroupEqMask,
        IoVariable::SubgroupGeMask,
        IoVariable::SubgroupGtMask,
        IoVariable::SubgroupLaneId,
        IoVariable::SubgroupLeMask,
        IoVariable::SubgroupLtMask,
        IoVariable::TessellationCoord,
        IoVariable::TessellationLevelInner,
        IoVariable::TessellationLevelOuter,
        IoVariable::UserDefined,
        IoVariable::VertexId,
        IoVariable::VertexIndex,
        IoVariable::ViewportIndex,
        IoVariable::WorkgroupId,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn operand(self) -> Operand {
        Operand::Constant(self as u32)
    }

    /// Variables that take a location operand (`UserDefined`, fragment color outputs).
    pub fn has_location(self) -> bool {
        matches!(self, IoVariable::UserDefined | IoVariable::FragmentOutputColor)
    }

    /// Variables whose accesses carry a component (or array element) operand.
    pub fn has_component(self) -> bool {
        matches!(
            self,
            IoVariable::ClipDistance
                | IoVariable::FragmentCoord
                | IoVariable::FragmentOutputColor
                | IoVariable::GlobalInvocationId
                | IoVariable::LocalInvocationId
                | IoVariable::PointCoord
                | IoVariable::Position
                | IoVariable::SubgroupEqMask
                | IoVariable::SubgroupGeMask
                | IoVariable::SubgroupGtMask
                | IoVariable::SubgroupLeMask
                | IoVariable::SubgroupLtMask
                | IoVariable::TessellationCoord
                | IoVariable::TessellationLevelInner
                | IoVariable::TessellationLevelOuter
                | IoVariable::UserDefined
                | IoVariable::WorkgroupId
        )
    }

    /// Variables that exist once per vertex, and therefore become arrays on stages with arrayed IO.
    pub fn is_per_vertex(self) -> bool {
        matches!(
            self,
            IoVariable::ClipDistance
                | IoVariable::PointSize
                | IoVariable::Position
                | IoVariable::UserDefined
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum StorageKind {
    #[default]
    None,
    Input,
    Output,
    InputPerPatch,
    OutputPerPatch,
    ConstantBuffer,
    StorageBuffer,
    LocalMemory,
    SharedMemory,
}

impl StorageKind {
    pub fn is_input(self) -> bool {
        matches!(self, StorageKind::Input | StorageKind::InputPerPatch)
    }

    pub fn is_output(self) -> bool {
        matches!(self, StorageKind::Output | StorageKind::OutputPerPatch)
    }

    pub fn is_io(self) -> bool {
        self.is_input() || self.is_output()
    }

    pub fn is_per_patch(self) -> bool {
        matches!(self, StorageKind::InputPerPatch | StorageKind::OutputPerPatch)
    }

    pub fn is_memory(self) -> bool {
        matches!(self, StorageKind::LocalMemory | StorageKind::SharedMemory)
    }

    pub fn is_buffer(self) -> bool {
        matches!(self, StorageKind::ConstantBuffer | StorageKind::StorageBuffer)
    }
}

/// Interpretation of the 32-bit values an arithmetic operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumType {
    S32,
    U32,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl CompareOp {
    pub fn glsl_operator(self) -> &'static str {
        match self {
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterOrEqual => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerType {
    Texture1D,
    Texture2D,
    Texture2DArray,
    Texture3D,
    TextureCube,
    TextureBuffer,
}

impl SamplerType {
    pub fn coordinates(self) -> usize {
        match self {
            SamplerType::Texture1D | SamplerType::TextureBuffer => 1,
            SamplerType::Texture2D => 2,
            SamplerType::Texture2DArray | SamplerType::Texture3D | SamplerType::TextureCube => 3,
        }
    }

    fn glsl_suffix(self) -> &'static str {
        match self {
            SamplerType::Texture1D => "1D",
            SamplerType::Texture2D => "2D",
            SamplerType::Texture2DArray => "2DArray",
            SamplerType::Texture3D => "3D",
            SamplerType::TextureCube => "Cube",
            SamplerType::TextureBuffer => "Buffer",
        }
    }

    pub fn glsl_sampler_type(self, result: NumType) -> String {
        format!("{}sampler{}", num_type_prefix(result), self.glsl_suffix())
    }

    pub fn glsl_image_type(self, format: NumType) -> String {
        format!("{}image{}", num_type_prefix(format), self.glsl_suffix())
    }
}

fn num_type_prefix(ty: NumType) -> &'static str {
    match ty {
        NumType::S32 => "i",
        NumType::U32 => "u",
        NumType::F32 => "",
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u8 {
        /// Coordinates are integer texel coordinates (`texelFetch`).
        const INT_COORDS = 1 << 0;
        /// An explicit level-of-detail source follows the coordinates.
        const LOD_LEVEL = 1 << 1;
    }
}

/// Texture sample producing one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureOp {
    pub binding: u32,
    pub sampler_type: SamplerType,
    pub flags: TextureFlags,
    pub component: u8,
    pub result: NumType,
}

/// Image load/store. Loads produce the selected component; stores write all four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageOp {
    pub binding: u32,
    pub sampler_type: SamplerType,
    pub component: u8,
    pub format: NumType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Copy,
    Add(NumType),
    Subtract(NumType),
    Multiply(NumType),
    Divide(NumType),
    Negate(NumType),
    Absolute(NumType),
    Minimum(NumType),
    Maximum(NumType),
    FusedMultiplyAdd,
    BitwiseAnd,
    BitwiseOr,
    BitwiseExclusiveOr,
    BitwiseNot,
    BitCount,
    ShiftLeft,
    ShiftRightS32,
    ShiftRightU32,
    Compare(CompareOp, NumType),
    LogicalAnd,
    LogicalOr,
    LogicalExclusiveOr,
    LogicalNot,
    ConditionalSelect(NumType),
    ConvertFP32ToS32,
    ConvertFP32ToU32,
    ConvertS32ToFP32,
    ConvertU32ToFP32,
    MultiplyHighS32,
    MultiplyHighU32,
    Shuffle,
    ShuffleDown,
    ShuffleUp,
    ShuffleXor,
    SwizzleAdd,
    Load,
    Store,
    TextureSample(TextureOp),
    ImageLoad(ImageOp),
    ImageStore(ImageOp),
    Barrier,
    Branch,
    BranchIfTrue,
    BranchIfFalse,
    MarkLabel,
    Return,
    Discard,
    EmitVertex,
    EndPrimitive,
}

impl Instruction {
    /// Ends a basic block.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Instruction::Branch
                | Instruction::BranchIfTrue
                | Instruction::BranchIfFalse
                | Instruction::Return
        )
    }

    pub fn is_conditional_branch(self) -> bool {
        matches!(self, Instruction::BranchIfTrue | Instruction::BranchIfFalse)
    }

    pub fn name(self) -> &'static str {
        match self {
            Instruction::Copy => "Copy",
            Instruction::Add(_) => "Add",
            Instruction::Subtract(_) => "Subtract",
            Instruction::Multiply(_) => "Multiply",
            Instruction::Divide(_) => "Divide",
            Instruction::Negate(_) => "Negate",
            Instruction::Absolute(_) => "Absolute",
            Instruction::Minimum(_) => "Minimum",
            Instruction::Maximum(_) => "Maximum",
            Instruction::FusedMultiplyAdd => "FusedMultiplyAdd",
            Instruction::BitwiseAnd => "BitwiseAnd",
            Instruction::BitwiseOr => "BitwiseOr",
            Instruction::BitwiseExclusiveOr => "BitwiseExclusiveOr",
            Instruction::BitwiseNot => "BitwiseNot",
            Instruction::BitCount => "BitCount",
            Instruction::ShiftLeft => "ShiftLeft",
            Instruction::ShiftRightS32 => "ShiftRightS32",
            Instruction::ShiftRightU32 => "ShiftRightU32",
            Instruction::Compare(..) => "Compare",
            Instruction::LogicalAnd => "LogicalAnd",
            Instruction::LogicalOr => "LogicalOr",
            Instruction::LogicalExclusiveOr => "LogicalExclusiveOr",
            Instruction::LogicalNot => "LogicalNot",
            Instruction::ConditionalSelect(_) => "ConditionalSelect",
            Instruction::ConvertFP32ToS32 => "ConvertFP32ToS32",
            Instruction::ConvertFP32ToU32 => "ConvertFP32ToU32",
            Instruction::ConvertS32ToFP32 => "ConvertS32ToFP32",
            Instruction::ConvertU32ToFP32 => "ConvertU32ToFP32",
            Instruction::MultiplyHighS32 => "MultiplyHighS32",
            Instruction::MultiplyHighU32 => "MultiplyHighU32",
            Instruction::Shuffle => "Shuffle",
            Instruction::ShuffleDown => "ShuffleDown",
            Instruction::ShuffleUp => "ShuffleUp",
            Instruction::ShuffleXor => "ShuffleXor",
            Instruction::SwizzleAdd => "SwizzleAdd",
            Instruction::Load => "Load",
            Instruction::Store => "Store",
            Instruction::TextureSample(_) => "TextureSample",
            Instruction::ImageLoad(_) => "ImageLoad",
            Instruction::ImageStore(_) => "ImageStore",
            Instruction::Barrier => "Barrier",
            Instruction::Branch => "Branch",
            Instruction::BranchIfTrue => "BranchIfTrue",
            Instruction::BranchIfFalse => "BranchIfFalse",
            Instruction::MarkLabel => "MarkLabel",
            Instruction::Return => "Return",
            Instruction::Discard => "Discard",
            Instruction::EmitVertex => "EmitVertex",
            Instruction::EndPrimitive => "EndPrimitive",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub inst: Instruction,
    pub storage_kind: StorageKind,
    pub dest: Option<Operand>,
    pub sources: Vec<Operand>,
}

impl Operation {
    pub fn new(inst: Instruction, dest: Option<Operand>, sources: Vec<Operand>) -> Self {
        Self {
            inst,
            storage_kind: StorageKind::None,
            dest,
            sources,
        }
    }

    pub fn with_storage(
        inst: Instruction,
        storage_kind: StorageKind,
        dest: Option<Operand>,
        sources: Vec<Operand>,
    ) -> Self {
        Self {
            inst,
            storage_kind,
            dest,
            sources,
        }
    }

    pub fn source(&self, index: usize) -> Option<Operand> {
        self.sources.get(index).copied()
    }

    /// IO variable of a `Load`/`Store` on an IO storage kind.
    pub fn io_variable(&self) -> Option<IoVariable> {
        if !self.storage_kind.is_io() {
            return None;
        }
        self.sources
            .first()
            .and_then(Operand::as_constant)
            .and_then(IoVariable::from_raw)
    }

    pub fn is_load(&self, storage_kind: StorageKind) -> bool {
        self.inst == Instruction::Load && self.storage_kind == storage_kind
    }

    pub fn is_store(&self, storage_kind: StorageKind) -> bool {
        self.inst == Instruction::Store && self.storage_kind == storage_kind
    }

    /// Rewrites the operation into `dest = source`, keeping the destination.
    pub fn turn_into_copy(&mut self, source: Operand) {
        self.inst = Instruction::Copy;
        self.storage_kind = StorageKind::None;
        self.sources = vec![source];
    }
}

/// Hands out fresh locals, labels and variables.
///
/// One allocator is threaded through every emission that ends up in the same function, so two
/// independently built stages can be concatenated without id clashes.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_local: u32,
    next_label: u32,
    next_variable: u32,
}

impl IdAllocator {
    pub fn new_local(&mut self) -> Operand {
        let id = LocalId(self.next_local);
        self.next_local += 1;
        Operand::Local(id)
    }

    pub fn new_label(&mut self) -> Operand {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        Operand::Label(id)
    }

    pub fn new_variable(&mut self) -> Operand {
        let id = VariableId(self.next_variable);
        self.next_variable += 1;
        Operand::Variable(id)
    }

    pub fn locals_allocated(&self) -> u32 {
        self.next_local
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Node {
    op: Operation,
    block: usize,
    prev: Option<OpId>,
    next: Option<OpId>,
    removed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub index: usize,
    first: Option<OpId>,
    last: Option<OpId>,
    /// Fallthrough successor.
    pub next: Option<usize>,
    /// Branch target successor.
    pub branch: Option<usize>,
    pub predecessors: Vec<usize>,
}

impl BasicBlock {
    pub fn successors(&self) -> impl Iterator<Item = usize> + '_ {
        self.next
            .into_iter()
            .chain(self.branch.filter(|&b| Some(b) != self.next))
    }

    pub fn has_successors(&self) -> bool {
        self.next.is_some() || self.branch.is_some()
    }
}

/// A program: basic blocks over an operation arena. Block 0 is the entry.
#[derive(Debug, Clone, Default)]
pub struct Function {
    nodes: Vec<Node>,
    pub blocks: Vec<BasicBlock>,
    ids: IdAllocator,
}

impl Function {
    pub fn new(ids: IdAllocator) -> Self {
        Self {
            nodes: Vec::new(),
            blocks: Vec::new(),
            ids,
        }
    }

    pub fn add_block(&mut self) -> usize {
        let index = self.blocks.len();
        self.blocks.push(BasicBlock {
            index,
            ..BasicBlock::default()
        });
        index
    }

    pub fn new_local(&mut self) -> Operand {
        self.ids.new_local()
    }

    pub fn new_label(&mut self) -> Operand {
        self.ids.new_label()
    }

    pub fn new_variable(&mut self) -> Operand {
        self.ids.new_variable()
    }

    pub fn locals_allocated(&self) -> u32 {
        self.ids.locals_allocated()
    }

    fn alloc(&mut self, op: Operation, block: usize) -> OpId {
        let id = OpId(self.nodes.len() as u32);
        self.nodes.push(Node {
            op,
            block,
            prev: None,
            next: None,
            removed: false,
        });
        id
    }

    /// Appends `op` at the end of `block`.
    pub fn push(&mut self, block: usize, op: Operation) -> OpId {
        let id = self.alloc(op, block);
        match self.blocks[block].last {
            Some(last) => {
                self.nodes[last.index()].next = Some(id);
                self.nodes[id.index()].prev = Some(last);
            }
            None => self.blocks[block].first = Some(id),
        }
        self.blocks[block].last = Some(id);
        id
    }

    pub fn insert_before(&mut self, at: OpId, op: Operation) -> OpId {
        let block = self.nodes[at.index()].block;
        let prev = self.nodes[at.index()].prev;
        let id = self.alloc(op, block);
        self.nodes[id.index()].prev = prev;
        self.nodes[id.index()].next = Some(at);
        self.nodes[at.index()].prev = Some(id);
        match prev {
            Some(prev) => self.nodes[prev.index()].next = Some(id),
            None => self.blocks[block].first = Some(id),
        }
        id
    }

    pub fn insert_after(&mut self, at: OpId, op: Operation) -> OpId {
        let block = self.nodes[at.index()].block;
        let next = self.nodes[at.index()].next;
        let id = self.alloc(op, block);
        self.nodes[id.index()].prev = Some(at);
        self.nodes[id.index()].next = next;
        self.nodes[at.index()].next = Some(id);
        match next {
            Some(next) => self.nodes[next.index()].prev = Some(id),
            None => self.blocks[block].last = Some(id),
        }
        id
    }

    /// Unlinks `id` from its block. The slot stays allocated as a tombstone.
    pub fn remove(&mut self, id: OpId) {
        let node = &self.nodes[id.index()];
        if node.removed {
            return;
        }
        let (block, prev, next) = (node.block, node.prev, node.next);
        match prev {
            Some(prev) => self.nodes[prev.index()].next = next,
            None => self.blocks[block].first = next,
        }
        match next {
            Some(next) => self.nodes[next.index()].prev = prev,
            None => self.blocks[block].last = prev,
        }
        self.nodes[id.index()].removed = true;
    }

    pub fn is_removed(&self, id: OpId) -> bool {
        self.nodes[id.index()].removed
    }

    pub fn op(&self, id: OpId) -> &Operation {
        &self.nodes[id.index()].op
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.nodes[id.index()].op
    }

    pub fn block_of(&self, id: OpId) -> usize {
        self.nodes[id.index()].block
    }

    pub fn first(&self, block: usize) -> Option<OpId> {
        self.blocks[block].first
    }

    pub fn last(&self, block: usize) -> Option<OpId> {
        self.blocks[block].last
    }

    pub fn next(&self, id: OpId) -> Option<OpId> {
        self.nodes[id.index()].next
    }

    pub fn prev(&self, id: OpId) -> Option<OpId> {
        self.nodes[id.index()].prev
    }

    /// Live operations of `block`, in order.
    pub fn block_ops(&self, block: usize) -> BlockOps<'_> {
        BlockOps {
            function: self,
            cur: self.blocks[block].first,
        }
    }

    /// Live operations of every block, in block order.
    pub fn all_ops(&self) -> impl Iterator<Item = (usize, OpId)> + '_ {
        (0..self.blocks.len()).flat_map(move |b| self.block_ops(b).map(move |id| (b, id)))
    }

    pub fn live_len(&self) -> usize {
        self.nodes.iter().filter(|n| !n.removed).count()
    }
}

pub struct BlockOps<'a> {
    function: &'a Function,
    cur: Option<OpId>,
}

impl Iterator for BlockOps<'_> {
    type Item = OpId;

    fn next(&mut self) -> Option<OpId> {
        let id = self.cur?;
        self.cur = self.function.next(id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy(value: u32) -> Operation {
        Operation::new(
            Instruction::Copy,
            Some(Operand::Register(Register(0))),
            vec![Operand::constant(value)],
        )
    }

    fn values(function: &Function, block: usize) -> Vec<u32> {
        function
            .block_ops(block)
            .filter_map(|id| function.op(id).sources[0].as_constant())
            .collect()
    }

    #[test]
    fn insert_and_remove_keep_list_order() {
        let mut function = Function::default();
        let block = function.add_block();
        let a = function.push(block, copy(1));
        let c = function.push(block, copy(3));
        function.insert_after(a, copy(2));
        function.insert_before(a, copy(0));
        function.insert_after(c, copy(4));
        assert_eq!(values(&function, block), vec![0, 1, 2, 3, 4]);

        function.remove(a);
        function.remove(c);
        assert_eq!(values(&function, block), vec![0, 2, 4]);
        assert!(function.is_removed(a));
        assert_eq!(function.live_len(), 3);
    }

    #[test]
    fn removing_head_and_tail_updates_block_bounds() {
        let mut function = Function::default();
        let block = function.add_block();
        let a = function.push(block, copy(1));
        let b = function.push(block, copy(2));
        function.remove(a);
        assert_eq!(function.first(block), Some(b));
        function.remove(b);
        assert_eq!(function.first(block), None);
        assert_eq!(function.last(block), None);
        let c = function.push(block, copy(3));
        assert_eq!(function.first(block), Some(c));
    }

    #[test]
    fn io_variable_round_trips_through_operand() {
        let op = Operation::with_storage(
            Instruction::Load,
            StorageKind::Input,
            Some(Operand::Local(LocalId(0))),
            vec![IoVariable::WorkgroupId.operand(), Operand::constant(1)],
        );
        assert_eq!(op.io_variable(), Some(IoVariable::WorkgroupId));
        assert_eq!(IoVariable::from_raw(IoVariable::ALL.len() as u32), None);
    }
}
