//! Control flow graph construction.
//!
//! A new basic block starts at every label and after every terminator. `MarkLabel` operations
//! are consumed here: the label becomes the index of the block it marks, and consecutive labels
//! share one block.

use std::collections::HashMap;

use thiserror::Error;

use crate::ir::{Function, IdAllocator, Instruction, LabelId, Operation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CfgError {
    #[error("program has no operations")]
    Empty,
    #[error("label {0} is marked more than once")]
    DuplicateLabel(u32),
    #[error("branch to undefined label {0}")]
    UndefinedLabel(u32),
    #[error("{0} without a label operand")]
    MissingLabel(&'static str),
}

pub fn build_function(ops: Vec<Operation>, ids: IdAllocator) -> Result<Function, CfgError> {
    if ops.is_empty() {
        return Err(CfgError::Empty);
    }

    let mut blocks: Vec<Vec<Operation>> = Vec::new();
    let mut labels: HashMap<LabelId, usize> = HashMap::new();
    let mut current = Vec::new();
    let mut pending_label = false;

    for op in ops {
        if op.inst == Instruction::MarkLabel {
            let label = op
                .source(0)
                .and_then(|s| s.as_label())
                .ok_or(CfgError::MissingLabel("MarkLabel"))?;
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            if labels.insert(label, blocks.len()).is_some() {
                return Err(CfgError::DuplicateLabel(label.0));
            }
            pending_label = true;
            continue;
        }

        let terminator = op.inst.is_terminator();
        current.push(op);
        pending_label = false;
        if terminator {
            blocks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() || pending_label {
        blocks.push(current);
    }

    let count = blocks.len();
    let mut edges: Vec<(Option<usize>, Option<usize>)> = Vec::with_capacity(count);
    for (index, block) in blocks.iter().enumerate() {
        let fallthrough = (index + 1 < count).then_some(index + 1);
        let edge = match block.last() {
            Some(op) if op.inst.is_terminator() && op.inst != Instruction::Return => {
                let label = op
                    .source(0)
                    .and_then(|s| s.as_label())
                    .ok_or(CfgError::MissingLabel(op.inst.name()))?;
                let target = *labels
                    .get(&label)
                    .ok_or(CfgError::UndefinedLabel(label.0))?;
                if op.inst.is_conditional_branch() {
                    (fallthrough, Some(target))
                } else {
                    (None, Some(target))
                }
            }
            Some(op) if op.inst == Instruction::Return => (None, None),
            _ => (fallthrough, None),
        };
        edges.push(edge);
    }

    // Keep blocks reachable from the entry, in their original order.
    let mut reachable = vec![false; count];
    let mut stack = vec![0];
    while let Some(index) = stack.pop() {
        if reachable[index] {
            continue;
        }
        reachable[index] = true;
        let (next, branch) = edges[index];
        stack.extend(next);
        stack.extend(branch);
    }

    let mut remap = vec![None; count];
    let mut new_index = 0;
    for (index, &live) in reachable.iter().enumerate() {
        if live {
            remap[index] = Some(new_index);
            new_index += 1;
        }
    }

    let mut function = Function::new(ids);
    for (index, block) in blocks.into_iter().enumerate() {
        if !reachable[index] {
            continue;
        }
        let new = function.add_block();
        for op in block {
            function.push(new, op);
        }
        let (next, branch) = edges[index];
        function.blocks[new].next = next.and_then(|b| remap[b]);
        function.blocks[new].branch = branch.and_then(|b| remap[b]);
    }

    compute_predecessors(&mut function);
    tracing::trace!(blocks = function.blocks.len(), "built control flow graph");
    Ok(function)
}

pub fn compute_predecessors(function: &mut Function) {
    for block in &mut function.blocks {
        block.predecessors.clear();
    }
    for index in 0..function.blocks.len() {
        let successors: Vec<usize> = function.blocks[index].successors().collect();
        for successor in successors {
            function.blocks[successor].predecessors.push(index);
        }
    }
}

/// Blocks reachable from the entry in reverse postorder.
pub fn reverse_postorder(function: &Function) -> Vec<usize> {
    let successors: Vec<Vec<usize>> = function
        .blocks
        .iter()
        .map(|b| b.successors().collect())
        .collect();
    graph_reverse_postorder(&successors, 0)
}

fn graph_reverse_postorder(successors: &[Vec<usize>], entry: usize) -> Vec<usize> {
    let mut visited = vec![false; successors.len()];
    let mut postorder = Vec::with_capacity(successors.len());
    // (node, next successor index)
    let mut stack = vec![(entry, 0)];
    visited[entry] = true;
    while let Some((node, child)) = stack.pop() {
        if let Some(&succ) = successors[node].get(child) {
            stack.push((node, child + 1));
            if !visited[succ] {
                visited[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(node);
        }
    }
    postorder.reverse();
    postorder
}

/// Immediate dominators (Cooper, Harvey, Kennedy). The entry and unreachable nodes map to `None`.
fn immediate_dominators(
    successors: &[Vec<usize>],
    predecessors: &[Vec<usize>],
    entry: usize,
) -> Vec<Option<usize>> {
    let rpo = graph_reverse_postorder(successors, entry);
    let mut order = vec![usize::MAX; successors.len()];
    for (position, &node) in rpo.iter().enumerate() {
        order[node] = position;
    }

    let mut idom: Vec<Option<usize>> = vec![None; successors.len()];
    idom[entry] = Some(entry);

    let intersect = |idom: &[Option<usize>], mut a: usize, mut b: usize| {
        while a != b {
            while order[a] > order[b] {
                a = idom[a].unwrap_or(entry);
            }
            while order[b] > order[a] {
                b = idom[b].unwrap_or(entry);
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom = None;
            for &pred in &predecessors[node] {
                if idom[pred].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, pred, current),
                });
            }
            if new_idom.is_some() && idom[node] != new_idom {
                idom[node] = new_idom;
                changed = true;
            }
        }
    }

    idom[entry] = None;
    idom
}

/// Dominator tree of a function's blocks.
#[derive(Debug, Clone)]
pub struct Dominators {
    idom: Vec<Option<usize>>,
}

impl Dominators {
    pub fn compute(function: &Function) -> Self {
        let successors: Vec<Vec<usize>> = function
            .blocks
            .iter()
            .map(|b| b.successors().collect())
            .collect();
        let predecessors: Vec<Vec<usize>> = function
            .blocks
            .iter()
            .map(|b| b.predecessors.clone())
            .collect();
        Self {
            idom: immediate_dominators(&successors, &predecessors, 0),
        }
    }

    pub fn immediate_dominator(&self, block: usize) -> Option<usize> {
        self.idom.get(block).copied().flatten()
    }

    /// Whether `a` dominates `b` (every block dominates itself).
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        let mut current = Some(b);
        while let Some(node) = current {
            if node == a {
                return true;
            }
            current = self.immediate_dominator(node);
        }
        false
    }
}

/// Post-dominator tree rooted at a virtual exit node.
///
/// Only `exit_block` is connected to the virtual exit; blocks that can not reach it (early
/// returns) have no post-dominator.
#[derive(Debug, Clone)]
pub struct PostDominators {
    ipdom: Vec<Option<usize>>,
    virtual_exit: usize,
}

impl PostDominators {
    pub fn compute(function: &Function, exit_block: usize) -> Self {
        let count = function.blocks.len();
        let virtual_exit = count;

        // Reverse graph: edges run from successor to predecessor.
        let mut reverse_successors: Vec<Vec<usize>> = vec![Vec::new(); count + 1];
        let mut reverse_predecessors: Vec<Vec<usize>> = vec![Vec::new(); count + 1];
        for block in &function.blocks {
            for succ in block.successors() {
                reverse_successors[succ].push(block.index);
                reverse_predecessors[block.index].push(succ);
            }
        }
        reverse_successors[virtual_exit].push(exit_block);
        reverse_predecessors[exit_block].push(virtual_exit);

        let mut ipdom = immediate_dominators(&reverse_successors, &reverse_predecessors, virtual_exit);
        ipdom.truncate(count);
        Self {
            ipdom: ipdom
                .into_iter()
                .map(|p| p.filter(|&p| p != virtual_exit))
                .collect(),
            virtual_exit,
        }
    }

    /// Nearest block every path from `block` to the exit passes through.
    pub fn immediate_post_dominator(&self, block: usize) -> Option<usize> {
        self.ipdom.get(block).copied().flatten()
    }

    pub fn virtual_exit(&self) -> usize {
        self.virtual_exit
    }
}
