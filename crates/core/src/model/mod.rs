//! Core data model: typed instructions, control-flow graphs, loaded images and
//! the per-binary classification record.

pub mod artifact;
pub mod cfg;
pub mod image;
pub mod insn;

pub use artifact::{BinaryArtifact, EvidenceKind, EvidenceRecord};
pub use cfg::{BasicBlock, ControlFlowGraph, Function};
pub use image::{BinaryImage, ImageError, Symbol};
pub use insn::{InsnKind, Instruction, Operand};
