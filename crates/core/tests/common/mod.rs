#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cfi_audit_core::model::cfg::{BasicBlock, ControlFlowGraph, Function};
use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};

/// `cmp rax, 5; jne +3; call rax; ret; ud2`
pub const X86_64_GUARDED_CALL: [u8; 11] =
    [0x48, 0x83, 0xf8, 0x05, 0x75, 0x03, 0xff, 0xd0, 0xc3, 0x0f, 0x0b];

/// `str x30, [x18], #8; nop; ldr x30, [x18, #-8]!; ret`
pub const AARCH64_SCS_WORDS: [u32; 4] = [0xF800_865E, 0xD503_201F, 0xF85F_8E5E, 0xD65F_03C0];

pub fn aarch64_code(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Minimal relocatable ELF written with `object`.
pub struct ElfFixture {
    arch: Architecture,
    code: Vec<u8>,
    functions: Vec<(String, u64, u64)>,
    imports: Vec<String>,
    comment: Option<String>,
    rodata: Option<Vec<u8>>,
}

impl ElfFixture {
    pub fn new(arch: Architecture, code: &[u8]) -> Self {
        Self {
            arch,
            code: code.to_vec(),
            functions: Vec::new(),
            imports: Vec::new(),
            comment: None,
            rodata: None,
        }
    }

    pub fn x86_64(code: &[u8]) -> Self {
        Self::new(Architecture::X86_64, code)
    }

    pub fn aarch64(words: &[u32]) -> Self {
        Self::new(Architecture::Aarch64, &aarch64_code(words))
    }

    /// Defined function at `offset` into `.text`.
    pub fn function(mut self, name: &str, offset: u64, size: u64) -> Self {
        self.functions.push((name.to_string(), offset, size));
        self
    }

    /// Undefined symbol resolved by another module.
    pub fn import(mut self, name: &str) -> Self {
        self.imports.push(name.to_string());
        self
    }

    /// `.comment` contents, e.g. a compiler banner.
    pub fn comment(mut self, text: &str) -> Self {
        self.comment = Some(text.to_string());
        self
    }

    pub fn rodata(mut self, bytes: &[u8]) -> Self {
        self.rodata = Some(bytes.to_vec());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut obj = Object::new(BinaryFormat::Elf, self.arch, Endianness::Little);
        let text = obj.section_id(StandardSection::Text);
        obj.append_section_data(text, &self.code, 4);

        for (name, offset, size) in &self.functions {
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: *offset,
                size: *size,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Section(text),
                flags: SymbolFlags::None,
            });
        }
        for name in &self.imports {
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Text,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            });
        }
        if let Some(comment) = &self.comment {
            let section = obj.add_section(Vec::new(), b".comment".to_vec(), SectionKind::OtherString);
            let mut data = comment.as_bytes().to_vec();
            data.push(0);
            obj.append_section_data(section, &data, 1);
        }
        if let Some(rodata) = &self.rodata {
            let section = obj.section_id(StandardSection::ReadOnlyData);
            obj.append_section_data(section, rodata, 1);
        }
        obj.write().expect("write ELF fixture")
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dir");
        }
        std::fs::write(&path, self.build()).expect("write fixture");
        path
    }
}

/// Branching node at 0x100 with a trap block and a call block.
///
/// `branch` lines end just before the conditional jump; the jump itself is
/// implied by the two successors.
pub fn guarded_call_cfg(branch: &[&str], call: &[&str]) -> ControlFlowGraph {
    let mut cfg = ControlFlowGraph::new();
    cfg.add_block(BasicBlock::from_lines(0x100, branch.iter().copied(), vec![0x200, 0x300]));
    cfg.add_block(BasicBlock::from_lines(0x200, ["ud2"], vec![]));
    cfg.add_block(BasicBlock::from_lines(0x300, call.iter().copied(), vec![0x400]));
    cfg.add_block(BasicBlock::from_lines(0x400, ["ret"], vec![]));
    cfg.add_function(
        Function::new(0x100, Some("dispatch".into()))
            .with_blocks([0x100, 0x200, 0x300, 0x400])
            .returning(true),
    );
    cfg
}

/// One function whose entry block runs `entry` and whose exit block runs `exit`.
pub fn function_cfg(entry: &[&str], exit: &[&str]) -> ControlFlowGraph {
    let mut cfg = ControlFlowGraph::new();
    cfg.add_block(BasicBlock::from_lines(0x1000, entry.iter().copied(), vec![0x1010]));
    cfg.add_block(BasicBlock::from_lines(0x1010, exit.iter().copied(), vec![]));
    let returns = exit.iter().any(|l| l.trim_start().starts_with("ret"));
    cfg.add_function(
        Function::new(0x1000, Some("leaf".into())).with_blocks([0x1000, 0x1010]).returning(returns),
    );
    cfg
}
