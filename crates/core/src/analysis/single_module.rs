//! Single-module forward-edge CFI detection.
//!
//! Clang's CFI lowers every protected indirect call into a branching node whose
//! two successors are a trap block and the block performing the call, with the
//! branch condition derived from the call target.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::analysis::dataflow::{trace_back, RegisterWatchList};
use crate::model::cfg::{BasicBlock, ControlFlowGraph};
use crate::model::insn::{recover_register, InsnKind, Operand};
use crate::model::{BinaryArtifact, EvidenceKind};

/// How the comparison was tied to the protected register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDependency {
    /// The comparison names the register itself.
    Direct,
    /// A chain of moves inside the branching node links them.
    Traced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleModuleMatch {
    pub branch: u64,
    pub trap_block: u64,
    pub call_block: u64,
    pub protected: String,
    pub dependency: GuardDependency,
    pub modified: bool,
}

/// Split a branching node's successors into `(trap, call)` when they form a
/// guard pair. The `[trap, call]` ordering is tried first.
pub fn find_guard<'a>(
    first: &'a BasicBlock,
    second: &'a BasicBlock,
) -> Vec<(&'a BasicBlock, &'a BasicBlock)> {
    let mut pairs = Vec::with_capacity(2);
    if first.contains(InsnKind::Trap) && second.contains(InsnKind::Call) {
        pairs.push((first, second));
    }
    if second.contains(InsnKind::Trap) && first.contains(InsnKind::Call) {
        pairs.push((second, first));
    }
    pairs
}

/// Register the first indirect call in `call_block` transfers control through.
pub fn protected_register(call_block: &BasicBlock) -> Option<String> {
    call_block
        .instructions
        .iter()
        .filter(|i| i.is(InsnKind::Call))
        .find_map(|call| match call.target()? {
            Operand::Register(reg) => Some(reg.clone()),
            Operand::Memory { base: Some(base), .. } => Some(base.clone()),
            Operand::Immediate(_) => None,
            Operand::Memory { base: None, text } | Operand::Other(text) => {
                recover_register(text.split_whitespace().last()?)
            }
        })
}

/// True if the instruction right before the call writes the protected register.
pub fn call_register_modified(call_block: &BasicBlock, protected: &str) -> bool {
    let Some((idx, _)) = call_block.find(InsnKind::Call) else {
        return false;
    };
    if idx == 0 {
        return false;
    }
    let previous = &call_block.instructions[idx - 1];
    previous.kind != InsnKind::Store && previous.destination() == Some(protected)
}

/// Check whether `branch`'s comparison guards the call in `call_block`.
pub fn check_branching_node(
    branch: &BasicBlock,
    trap_block: &BasicBlock,
    call_block: &BasicBlock,
) -> Option<SingleModuleMatch> {
    let protected = protected_register(call_block)?;
    let (cmp_idx, cmp) = branch.rfind(InsnKind::Compare)?;

    let dependency = if cmp.op_str.contains(protected.as_str()) {
        GuardDependency::Direct
    } else {
        let mut watch = RegisterWatchList::seed(&protected, cmp);
        if !trace_back(&branch.instructions[..cmp_idx], &mut watch) {
            debug!(
                "branch {:#x}: {cmp} unrelated to {protected} (watched {:?})",
                branch.address,
                watch.registers()
            );
            return None;
        }
        GuardDependency::Traced
    };

    Some(SingleModuleMatch {
        branch: branch.address,
        trap_block: trap_block.address,
        call_block: call_block.address,
        modified: call_register_modified(call_block, &protected),
        protected,
        dependency,
    })
}

/// Scan candidate branching nodes; the first match stops the scan.
pub fn find_match(cfg: &ControlFlowGraph) -> Option<SingleModuleMatch> {
    for node in cfg.branching_nodes() {
        let (Some(first), Some(second)) =
            (cfg.block(node.successors[0]), cfg.block(node.successors[1]))
        else {
            debug!("branch {:#x}: successor missing from graph", node.address);
            continue;
        };
        if first.is_empty() || second.is_empty() {
            continue;
        }
        let found = find_guard(first, second)
            .into_iter()
            .find_map(|(trap, call)| check_branching_node(node, trap, call));
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Returns `(has_cfi, modified)` and records the match on the artifact.
pub fn detect(cfg: &ControlFlowGraph, artifact: &mut BinaryArtifact) -> (bool, bool) {
    let Some(found) = find_match(cfg) else {
        return (false, false);
    };
    debug!("{}: single-module CFI guard at {:#x}", artifact.name, found.branch);
    for (addr, kind) in [
        (found.branch, EvidenceKind::BranchingNode),
        (found.trap_block, EvidenceKind::GuardBlock),
        (found.call_block, EvidenceKind::GuardBlock),
    ] {
        if let Some(block) = cfg.block(addr) {
            artifact.add_evidence(addr, kind, render_block(block));
        }
    }
    artifact.mark_single_cfi(found.modified);
    (true, found.modified)
}

pub(crate) fn render_block(block: &BasicBlock) -> String {
    block.instructions.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("\n")
}
