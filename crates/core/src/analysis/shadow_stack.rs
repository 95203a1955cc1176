//! Backward-edge shadow call stack detection (AArch64 `x18`).

use log::debug;

use crate::analysis::single_module::render_block;
use crate::model::cfg::{BasicBlock, ControlFlowGraph, Function};
use crate::model::insn::{InsnKind, SHADOW_STACK_REGISTER};
use crate::model::{BinaryArtifact, EvidenceKind};

fn touches_shadow_stack(block: &BasicBlock, kind: InsnKind) -> bool {
    block.instructions.iter().any(|i| i.is(kind) && i.names_register(SHADOW_STACK_REGISTER))
}

/// Entry block pushes to the shadow stack.
pub fn has_prologue(cfg: &ControlFlowGraph, function: &Function) -> bool {
    cfg.entry_block(function).is_some_and(|entry| touches_shadow_stack(entry, InsnKind::Store))
}

/// First return block of `function` that pops from the shadow stack.
pub fn epilogue_block<'a>(cfg: &'a ControlFlowGraph, function: &'a Function) -> Option<&'a BasicBlock> {
    cfg.function_blocks(function)
        .filter(|b| b.contains(InsnKind::Return))
        .find(|b| touches_shadow_stack(b, InsnKind::Load))
}

/// First local, returning function with both halves of the shadow stack protocol.
pub fn find_protected_function<'a>(
    cfg: &'a ControlFlowGraph,
) -> Option<(&'a Function, &'a BasicBlock)> {
    cfg.functions()
        .filter(|f| f.has_return && !f.is_external)
        .filter(|f| has_prologue(cfg, f))
        .find_map(|f| epilogue_block(cfg, f).map(|exit| (f, exit)))
}

pub fn detect(cfg: &ControlFlowGraph, artifact: &mut BinaryArtifact) -> bool {
    let Some((function, exit)) = find_protected_function(cfg) else {
        return false;
    };
    debug!(
        "{}: shadow call stack in {} at {:#x}",
        artifact.name,
        function.name.as_deref().unwrap_or("<anonymous>"),
        function.entry
    );
    if let Some(entry) = cfg.entry_block(function) {
        artifact.add_evidence(entry.address, EvidenceKind::Prologue, render_block(entry));
    }
    artifact.add_evidence(exit.address, EvidenceKind::Epilogue, render_block(exit));
    artifact.mark_scs();
    true
}
