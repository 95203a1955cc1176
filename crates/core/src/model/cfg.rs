//! Control-flow graph consumed by the detectors.
//!
//! Providers build it once per binary; detectors only ever borrow it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::insn::{InsnKind, Instruction};

/// Basic block with its parsed instructions and successor addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub address: u64,
    pub instructions: Vec<Instruction>,
    pub successors: Vec<u64>,
}

impl BasicBlock {
    pub fn new(address: u64, instructions: Vec<Instruction>, successors: Vec<u64>) -> Self {
        Self { address, instructions, successors }
    }

    /// Build a block from `"mnemonic operands"` lines. Instruction addresses are
    /// synthesized at 4-byte steps from the block start.
    pub fn from_lines<'a>(
        address: u64,
        lines: impl IntoIterator<Item = &'a str>,
        successors: Vec<u64>,
    ) -> Self {
        let instructions = lines
            .into_iter()
            .enumerate()
            .map(|(idx, line)| Instruction::from_text(address + 4 * idx as u64, line))
            .collect();
        Self { address, instructions, successors }
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn contains(&self, kind: InsnKind) -> bool {
        self.instructions.iter().any(|i| i.is(kind))
    }

    /// First instruction of `kind` and its index in the block.
    pub fn find(&self, kind: InsnKind) -> Option<(usize, &Instruction)> {
        self.instructions.iter().enumerate().find(|(_, i)| i.is(kind))
    }

    /// Last instruction of `kind` and its index in the block.
    pub fn rfind(&self, kind: InsnKind) -> Option<(usize, &Instruction)> {
        self.instructions.iter().enumerate().rev().find(|(_, i)| i.is(kind))
    }
}

/// A recovered function: entry address plus the addresses of its blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub entry: u64,
    pub name: Option<String>,
    pub has_return: bool,
    /// Imported/stub function with no local body.
    pub is_external: bool,
    pub blocks: BTreeSet<u64>,
}

impl Function {
    pub fn new(entry: u64, name: Option<String>) -> Self {
        Self { entry, name, has_return: false, is_external: false, blocks: BTreeSet::new() }
    }

    pub fn external(entry: u64, name: impl Into<String>) -> Self {
        Self { is_external: true, ..Self::new(entry, Some(name.into())) }
    }

    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = u64>) -> Self {
        self.blocks.extend(blocks);
        self.blocks.insert(self.entry);
        self
    }

    pub fn returning(mut self, has_return: bool) -> Self {
        self.has_return = has_return;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    blocks: BTreeMap<u64, BasicBlock>,
    functions: BTreeMap<u64, Function>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block; an existing block at the same address is kept.
    pub fn add_block(&mut self, block: BasicBlock) -> &mut Self {
        self.blocks.entry(block.address).or_insert(block);
        self
    }

    pub fn add_function(&mut self, function: Function) -> &mut Self {
        self.functions.insert(function.entry, function);
        self
    }

    pub fn block(&self, address: u64) -> Option<&BasicBlock> {
        self.blocks.get(&address)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn function(&self, entry: u64) -> Option<&Function> {
        self.functions.get(&entry)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Blocks with exactly two successors.
    pub fn branching_nodes(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values().filter(|b| b.successors.len() == 2)
    }

    pub fn entry_block(&self, function: &Function) -> Option<&BasicBlock> {
        self.block(function.entry)
    }

    pub fn function_blocks<'a>(
        &'a self,
        function: &'a Function,
    ) -> impl Iterator<Item = &'a BasicBlock> + 'a {
        function.blocks.iter().filter_map(move |addr| self.block(*addr))
    }
}
