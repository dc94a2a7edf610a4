//! Turns a reducible control flow graph into nested `if`/`loop` statements.
//!
//! Conditionals join at the immediate post-dominator of their branch block. Natural loops become
//! `loop { ... }` with `break`/`continue`. Exits that end the program stay inside the loop body.
//! A loop that continues at more than one block first gets its exits routed through a selector
//! variable: each exit edge stores the exit number and jumps to a dispatch chain after the loop,
//! which then branches to the original target.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::cfg::{compute_predecessors, reverse_postorder, Dominators, PostDominators};
use crate::ir::{CompareOp, Function, Instruction, LocalId, NumType, OpId, Operand, Operation};

const MAX_STEPS: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("irreducible control flow: edge from block {from} to block {to}")]
    Irreducible { from: usize, to: usize },
    #[error("block {0} ends in a conditional branch without a condition")]
    MissingCondition(usize),
    #[error("control flow did not converge after {0} steps")]
    StepLimit(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Op(OpId),
    If {
        cond: Operand,
        /// The body runs when `cond` is false.
        invert: bool,
        then_body: Vec<AstNode>,
        else_body: Vec<AstNode>,
    },
    Loop {
        body: Vec<AstNode>,
    },
    Break,
    Continue,
    Return,
}

impl AstNode {
    /// Whether control never falls out of this statement.
    fn is_jump(&self) -> bool {
        matches!(self, AstNode::Break | AstNode::Continue | AstNode::Return)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredProgram {
    pub body: Vec<AstNode>,
    /// Locals that must be declared up front because they are used outside the statement that
    /// defines them.
    pub predeclared_locals: BTreeSet<LocalId>,
}

#[derive(Debug)]
struct LoopInfo {
    header: usize,
    body: Vec<bool>,
    /// Blocks outside the loop, with a path to the program exit, that the body branches to.
    exits: Vec<usize>,
}

impl LoopInfo {
    fn exit(&self) -> Option<usize> {
        self.exits.first().copied()
    }

    fn size(&self) -> usize {
        self.body.iter().filter(|&&inside| inside).count()
    }
}

struct Structurizer<'a> {
    function: &'a Function,
    post_dominators: PostDominators,
    loops: Vec<LoopInfo>,
    loop_by_header: HashMap<usize, usize>,
    steps: usize,
}

/// Structures `function`, appending exit dispatch blocks to it where a loop needs them.
pub fn structure(function: &mut Function) -> Result<StructuredProgram, StructureError> {
    if function.blocks.is_empty() {
        return Ok(StructuredProgram::default());
    }

    let exit_block = final_exit_block(function);
    let loops = single_exit_loops(function, exit_block)?;
    let function = &*function;
    let post_dominators = PostDominators::compute(function, exit_block);
    let loop_by_header = loops
        .iter()
        .enumerate()
        .map(|(index, info)| (info.header, index))
        .collect();

    let mut structurizer = Structurizer {
        function,
        post_dominators,
        loops,
        loop_by_header,
        steps: 0,
    };
    let mut body = Vec::new();
    structurizer.emit(0, None, &[], false, &mut body)?;
    if body.last() == Some(&AstNode::Return) {
        body.pop();
    }

    let predeclared_locals = predeclared_locals(function, &body);
    tracing::trace!(
        loops = structurizer.loops.len(),
        predeclared = predeclared_locals.len(),
        "structured control flow"
    );
    Ok(StructuredProgram {
        body,
        predeclared_locals,
    })
}

/// The last block without successors; early returns elsewhere are treated as side exits.
fn final_exit_block(function: &Function) -> usize {
    function
        .blocks
        .iter()
        .rev()
        .find(|b| !b.has_successors())
        .map_or(function.blocks.len() - 1, |b| b.index)
}

/// Natural loops of `function`, after routing the exits of every loop that continues at more
/// than one block. Innermost loops are routed first.
fn single_exit_loops(
    function: &mut Function,
    exit_block: usize,
) -> Result<Vec<LoopInfo>, StructureError> {
    // Landing block -> header of the loop whose exit edge it carries.
    let mut landings = HashMap::new();
    for _ in 0..=function.blocks.len() {
        let dominators = Dominators::compute(function);
        let loops = find_loops(function, &dominators, exit_block, &landings)?;
        let Some(info) = loops
            .iter()
            .filter(|info| info.exits.len() > 1)
            .min_by_key(|info| info.size())
        else {
            return Ok(loops);
        };
        route_exits(function, info, &mut landings);
        compute_predecessors(function);
    }
    Err(StructureError::StepLimit(MAX_STEPS))
}

/// Redirects every exit edge of `info` to a landing block that stores the exit number in a fresh
/// selector variable, then jumps to a chain of tests that branches to the original target.
fn route_exits(function: &mut Function, info: &LoopInfo, landings: &mut HashMap<usize, usize>) {
    let selector = function.new_variable();
    let count = info.exits.len();

    let dispatch: Vec<usize> = (1..count).map(|_| function.add_block()).collect();
    for (index, &block) in dispatch.iter().enumerate() {
        let taken = function.new_local();
        function.push(
            block,
            Operation::new(
                Instruction::Compare(CompareOp::Equal, NumType::U32),
                Some(taken),
                vec![selector, Operand::Constant(index as u32)],
            ),
        );
        let label = function.new_label();
        function.push(
            block,
            Operation::new(Instruction::BranchIfTrue, None, vec![label, taken]),
        );
        let otherwise = dispatch
            .get(index + 1)
            .copied()
            .unwrap_or(info.exits[count - 1]);
        function.blocks[block].branch = Some(info.exits[index]);
        function.blocks[block].next = Some(otherwise);
    }

    for (index, &target) in info.exits.iter().enumerate() {
        let landing = function.add_block();
        function.push(
            landing,
            Operation::new(
                Instruction::Copy,
                Some(selector),
                vec![Operand::Constant(index as u32)],
            ),
        );
        let label = function.new_label();
        function.push(landing, Operation::new(Instruction::Branch, None, vec![label]));
        function.blocks[landing].branch = Some(dispatch[0]);
        landings.insert(landing, info.header);

        for block in (0..info.body.len()).filter(|&b| info.body[b]) {
            let block = &mut function.blocks[block];
            if block.next == Some(target) {
                block.next = Some(landing);
            }
            if block.branch == Some(target) {
                block.branch = Some(landing);
            }
        }
    }
    tracing::trace!(header = info.header, exits = count, "routed loop exits through a selector");
}

fn find_loops(
    function: &Function,
    dominators: &Dominators,
    exit_block: usize,
    landings: &HashMap<usize, usize>,
) -> Result<Vec<LoopInfo>, StructureError> {
    let count = function.blocks.len();
    let rpo = reverse_postorder(function);
    let mut position = vec![usize::MAX; count];
    for (index, &block) in rpo.iter().enumerate() {
        position[block] = index;
    }

    let mut latches: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &block in &rpo {
        for succ in function.blocks[block].successors() {
            if position[succ] > position[block] {
                continue;
            }
            if !dominators.dominates(succ, block) {
                return Err(StructureError::Irreducible {
                    from: block,
                    to: succ,
                });
            }
            latches.entry(succ).or_default().push(block);
        }
    }

    let reaches_exit = reaches(function, exit_block);
    let mut loops = Vec::with_capacity(latches.len());
    for (header, latches) in latches {
        let mut body = vec![false; count];
        body[header] = true;
        let mut stack = latches;
        while let Some(block) = stack.pop() {
            if !body[block] {
                body[block] = true;
                stack.extend(function.blocks[block].predecessors.iter().copied());
            }
        }

        for (&landing, &owner) in landings {
            if owner == header {
                body[landing] = true;
            }
        }

        let exits: BTreeSet<usize> = (0..count)
            .filter(|&b| body[b])
            .flat_map(|b| function.blocks[b].successors())
            .filter(|&s| !body[s] && reaches_exit[s])
            .collect();
        loops.push(LoopInfo {
            header,
            body,
            exits: exits.into_iter().collect(),
        });
    }
    Ok(loops)
}

/// Blocks with a path to `target`.
fn reaches(function: &Function, target: usize) -> Vec<bool> {
    let mut reached = vec![false; function.blocks.len()];
    let mut stack = vec![target];
    while let Some(block) = stack.pop() {
        if !reached[block] {
            reached[block] = true;
            stack.extend(function.blocks[block].predecessors.iter().copied());
        }
    }
    reached
}

impl Structurizer<'_> {
    fn step(&mut self) -> Result<(), StructureError> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(StructureError::StepLimit(MAX_STEPS));
        }
        Ok(())
    }

    /// Emits the statements starting at `start` until control reaches `stop`.
    ///
    /// `loops` is the stack of enclosing loops, innermost last. `entering` is set when `start` is
    /// the header of the innermost loop and its body is being emitted.
    fn emit(
        &mut self,
        start: usize,
        stop: Option<usize>,
        loops: &[usize],
        mut entering: bool,
        out: &mut Vec<AstNode>,
    ) -> Result<(), StructureError> {
        let mut current = Some(start);
        while let Some(block) = current {
            self.step()?;
            if Some(block) == stop {
                return Ok(());
            }

            if let Some(&innermost) = loops.last() {
                let info = &self.loops[innermost];
                if block == info.header && !entering {
                    out.push(AstNode::Continue);
                    return Ok(());
                }
                if Some(block) == info.exit() {
                    out.push(AstNode::Break);
                    return Ok(());
                }
            }

            if !entering {
                if let Some(&index) = self.loop_by_header.get(&block) {
                    if !loops.contains(&index) {
                        let mut nested = loops.to_vec();
                        nested.push(index);
                        let mut body = Vec::new();
                        self.emit(block, None, &nested, true, &mut body)?;
                        if body.last() == Some(&AstNode::Continue) {
                            body.pop();
                        }
                        out.push(AstNode::Loop { body });
                        current = self.loops[index].exit();
                        continue;
                    }
                }
            }

            entering = false;
            current = self.emit_block(block, loops, out)?;
        }
        Ok(())
    }

    /// Emits one block and returns the block control continues with, if any.
    fn emit_block(
        &mut self,
        block: usize,
        loops: &[usize],
        out: &mut Vec<AstNode>,
    ) -> Result<Option<usize>, StructureError> {
        let function = self.function;
        let mut terminator = None;
        for id in function.block_ops(block) {
            if function.op(id).inst.is_terminator() {
                terminator = Some(id);
            } else {
                out.push(AstNode::Op(id));
            }
        }

        let info = &function.blocks[block];
        let Some(terminator) = terminator else {
            return Ok(info.next);
        };
        let op = function.op(terminator);
        match op.inst {
            Instruction::Return => {
                out.push(AstNode::Return);
                Ok(None)
            }
            Instruction::Branch => Ok(info.branch),
            Instruction::BranchIfTrue | Instruction::BranchIfFalse => {
                let cond = op
                    .source(1)
                    .ok_or(StructureError::MissingCondition(block))?;
                let mut invert = op.inst == Instruction::BranchIfFalse;
                let join = self.join(block, loops);

                let mut then_body = Vec::new();
                if let Some(target) = info.branch {
                    self.emit(target, join, loops, false, &mut then_body)?;
                }
                let mut else_body = Vec::new();
                if let Some(fallthrough) = info.next {
                    self.emit(fallthrough, join, loops, false, &mut else_body)?;
                }

                if then_body.is_empty() {
                    std::mem::swap(&mut then_body, &mut else_body);
                    invert = !invert;
                }
                if then_body.is_empty() {
                    return Ok(join);
                }

                // Control never leaves an if without a join point; keep the second arm flat.
                let flatten = join.is_none() && then_body.last().is_some_and(AstNode::is_jump);
                let tail = if flatten {
                    std::mem::take(&mut else_body)
                } else {
                    Vec::new()
                };
                out.push(AstNode::If {
                    cond,
                    invert,
                    then_body,
                    else_body,
                });
                out.extend(tail);
                Ok(join)
            }
            _ => Ok(info.next),
        }
    }

    /// Where the two arms of the branch at the end of `block` meet again, if inside the current
    /// loop.
    fn join(&self, block: usize, loops: &[usize]) -> Option<usize> {
        let join = self.post_dominators.immediate_post_dominator(block)?;
        match loops.last() {
            Some(&innermost) if !self.loops[innermost].body[join] => None,
            _ => Some(join),
        }
    }
}

fn collect_emitted(nodes: &[AstNode], counts: &mut HashMap<OpId, usize>) {
    for node in nodes {
        match node {
            AstNode::Op(id) => *counts.entry(*id).or_default() += 1,
            AstNode::If {
                then_body,
                else_body,
                ..
            } => {
                collect_emitted(then_body, counts);
                collect_emitted(else_body, counts);
            }
            AstNode::Loop { body } => collect_emitted(body, counts),
            AstNode::Break | AstNode::Continue | AstNode::Return => {}
        }
    }
}

/// Locals read outside their defining block, or defined by an operation emitted more than once.
fn predeclared_locals(function: &Function, body: &[AstNode]) -> BTreeSet<LocalId> {
    let mut counts = HashMap::new();
    collect_emitted(body, &mut counts);

    let mut defined_in = HashMap::new();
    let mut predeclared = BTreeSet::new();
    for (block, id) in function.all_ops() {
        if let Some(local) = function.op(id).dest.and_then(|d| d.as_local()) {
            defined_in.insert(local, block);
            if counts.get(&id).copied().unwrap_or(0) > 1 {
                predeclared.insert(local);
            }
        }
    }
    for (block, id) in function.all_ops() {
        for local in function.op(id).sources.iter().filter_map(Operand::as_local) {
            if defined_in.get(&local).is_some_and(|&def| def != block) {
                predeclared.insert(local);
            }
        }
    }
    predeclared
}
