use std::collections::{BTreeSet, HashSet};

use capstone::{arch, prelude::*, Capstone, InsnGroupId};
use goblin::elf::{self, Elf};
use log::debug;

use crate::model::cfg::{BasicBlock, ControlFlowGraph, Function};
use crate::model::insn::{InsnKind, Instruction};
use crate::model::BinaryImage;
use crate::services::analysis::{CancelToken, CfgError, CfgProvider};

/// CFG provider built on Capstone disassembly of goblin-parsed ELF objects.
pub struct CapstoneBackend;

/// A contiguous run of code disassembled as one function.
#[derive(Debug, Clone)]
struct CodeRegion {
    name: String,
    address: u64,
    file_range: (usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Fall,
    Call,
    Return,
    Trap,
    Jump { target: Option<u64>, conditional: bool },
}

#[derive(Debug, Clone)]
struct RawInsn {
    address: u64,
    size: u64,
    mnemonic: String,
    op_str: String,
    flow: Flow,
}

pub fn capstone_version() -> String {
    let (major, minor) = Capstone::lib_version();
    format!("{major}.{minor}")
}

fn make_cs(arch: &str) -> Result<Capstone, CfgError> {
    let built = match arch {
        "x86_64" | "amd64" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        "x86" | "i386" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build()
        }
        "arm" | "armv7" => {
            Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build()
        }
        "arm64" | "aarch64" => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
        other => return Err(CfgError::Build(format!("unsupported architecture {other}"))),
    };
    built.map_err(|e| CfgError::Build(format!("capstone init failed: {e}")))
}

fn section_range_to_file(
    addr: u64,
    size: Option<u64>,
    sec_addr: u64,
    sec_size: u64,
    sec_offset: u64,
    bytes_len: usize,
) -> Option<(usize, usize)> {
    if addr < sec_addr || addr >= sec_addr + sec_size {
        return None;
    }
    let offset_in_section = addr.saturating_sub(sec_addr);
    let start = sec_offset.saturating_add(offset_in_section);
    if start as usize >= bytes_len {
        return None;
    }
    let available = sec_size.saturating_sub(offset_in_section);
    let length = size.unwrap_or(available).min(available);
    let end = start.saturating_add(length).min(bytes_len as u64);
    if end <= start {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

/// Sized, defined function symbols; falls back to whole executable sections
/// when the object is stripped.
fn code_regions(elf: &Elf, bytes_len: usize) -> Vec<CodeRegion> {
    let mut regions: Vec<CodeRegion> = Vec::new();
    let mut seen = HashSet::new();
    for (syms, strtab) in [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)] {
        for sym in syms.iter() {
            if !sym.is_function()
                || sym.st_size == 0
                || sym.st_shndx == elf::section_header::SHN_UNDEF as usize
            {
                continue;
            }
            let Some(name) = strtab.get_at(sym.st_name).filter(|n| !n.is_empty()) else {
                continue;
            };
            if !seen.insert(sym.st_value) {
                continue;
            }
            let file_range = elf.section_headers.get(sym.st_shndx).and_then(|shdr| {
                section_range_to_file(
                    sym.st_value,
                    Some(sym.st_size),
                    shdr.sh_addr,
                    shdr.sh_size,
                    shdr.sh_offset,
                    bytes_len,
                )
            });
            if let Some(file_range) = file_range {
                regions.push(CodeRegion { name: name.to_string(), address: sym.st_value, file_range });
            }
        }
    }
    if !regions.is_empty() {
        return regions;
    }

    elf.section_headers
        .iter()
        .filter(|sh| sh.is_executable() && sh.sh_type == elf::section_header::SHT_PROGBITS)
        .filter_map(|sh| {
            let file_range = section_range_to_file(
                sh.sh_addr,
                None,
                sh.sh_addr,
                sh.sh_size,
                sh.sh_offset,
                bytes_len,
            )?;
            let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string();
            Some(CodeRegion { name, address: sh.sh_addr, file_range })
        })
        .collect()
}

fn has_group(detail: &capstone::InsnDetail, group: capstone::InsnGroupType::Type) -> bool {
    detail.groups().iter().any(|g| *g == InsnGroupId(group as u8))
}

/// Last immediate operand: the branch target for `jne`, `b.ne`, `cbz` and `tbz` alike.
fn decode_branch_target(detail: &capstone::InsnDetail) -> Option<u64> {
    detail
        .arch_detail()
        .operands()
        .iter()
        .filter_map(|op| match op {
            capstone::arch::ArchOperand::X86Operand(op) => match op.op_type {
                capstone::arch::x86::X86OperandType::Imm(imm) => Some(imm as u64),
                _ => None,
            },
            capstone::arch::ArchOperand::ArmOperand(op) => match op.op_type {
                capstone::arch::arm::ArmOperandType::Imm(imm) => Some(imm as u64),
                _ => None,
            },
            capstone::arch::ArchOperand::Arm64Operand(op) => match op.op_type {
                capstone::arch::arm64::Arm64OperandType::Imm(imm) => Some(imm as u64),
                _ => None,
            },
            _ => None,
        })
        .last()
}

const ARM_CONDITIONS: [&str; 16] = [
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
];

fn is_conditional_branch(mnemonic: &str) -> bool {
    if mnemonic.starts_with('j') {
        return mnemonic != "jmp";
    }
    if mnemonic.starts_with("b.") || matches!(mnemonic, "cbz" | "cbnz" | "tbz" | "tbnz") {
        return true;
    }
    mnemonic.len() == 3
        && mnemonic.starts_with('b')
        && ARM_CONDITIONS.contains(&&mnemonic[1..])
}

fn is_unconditional_branch(mnemonic: &str) -> bool {
    matches!(mnemonic, "jmp" | "b" | "br" | "bx")
}

fn classify_flow(mnemonic: &str, detail: Option<&capstone::InsnDetail>) -> Flow {
    let kind = InsnKind::classify(mnemonic);
    let group = |g| detail.is_some_and(|d| has_group(d, g));
    if kind == InsnKind::Trap {
        Flow::Trap
    } else if kind == InsnKind::Return || group(capstone::InsnGroupType::CS_GRP_RET) {
        Flow::Return
    } else if kind == InsnKind::Call || group(capstone::InsnGroupType::CS_GRP_CALL) {
        Flow::Call
    } else if is_conditional_branch(mnemonic)
        || is_unconditional_branch(mnemonic)
        || group(capstone::InsnGroupType::CS_GRP_JUMP)
    {
        Flow::Jump {
            target: detail.and_then(decode_branch_target),
            conditional: is_conditional_branch(mnemonic),
        }
    } else {
        Flow::Fall
    }
}

fn disassemble(cs: &Capstone, code: &[u8], address: u64) -> Result<Vec<RawInsn>, CfgError> {
    let insns = cs
        .disasm_all(code, address)
        .map_err(|e| CfgError::Build(format!("disassembly at {address:#x} failed: {e}")))?;
    Ok(insns
        .iter()
        .map(|i| {
            let mnemonic = i.mnemonic().unwrap_or("").to_ascii_lowercase();
            let detail = cs.insn_detail(i).ok();
            RawInsn {
                address: i.address(),
                size: i.bytes().len() as u64,
                flow: classify_flow(&mnemonic, detail.as_ref()),
                op_str: i.op_str().unwrap_or("").to_string(),
                mnemonic,
            }
        })
        .collect())
}

/// Split a linear instruction run into basic blocks.
///
/// Leaders are the entry, in-range branch targets and every instruction that
/// follows a branch, call, return or trap.
fn split_blocks(insns: &[RawInsn]) -> Vec<BasicBlock> {
    let starts: HashSet<u64> = insns.iter().map(|i| i.address).collect();
    let mut leaders = BTreeSet::new();
    if let Some(first) = insns.first() {
        leaders.insert(first.address);
    }
    for (idx, insn) in insns.iter().enumerate() {
        if insn.flow == Flow::Fall {
            continue;
        }
        if let Some(next) = insns.get(idx + 1) {
            leaders.insert(next.address);
        }
        if let Flow::Jump { target: Some(target), .. } = insn.flow {
            if starts.contains(&target) {
                leaders.insert(target);
            }
        }
    }

    let mut blocks = Vec::new();
    let mut current: Vec<&RawInsn> = Vec::new();
    for (idx, insn) in insns.iter().enumerate() {
        if !current.is_empty() && leaders.contains(&insn.address) {
            blocks.push(close_block(&current, Some(insn.address)));
            current.clear();
        }
        current.push(insn);
        if insn.flow != Flow::Fall {
            let next = insns.get(idx + 1).map(|n| n.address);
            blocks.push(close_block(&current, next));
            current.clear();
        }
    }
    if !current.is_empty() {
        blocks.push(close_block(&current, None));
    }
    blocks
}

fn close_block(insns: &[&RawInsn], next: Option<u64>) -> BasicBlock {
    let last = insns[insns.len() - 1];
    let fallthrough = next.or_else(|| last.address.checked_add(last.size));
    let successors = match last.flow {
        Flow::Return | Flow::Trap => Vec::new(),
        Flow::Fall | Flow::Call => next.into_iter().collect(),
        Flow::Jump { target, conditional } => {
            let mut succ: Vec<u64> = target.into_iter().collect();
            if conditional {
                succ.extend(fallthrough.filter(|f| Some(*f) != target));
            }
            succ
        }
    };
    let instructions = insns
        .iter()
        .map(|raw| Instruction::parse(raw.address, &raw.mnemonic, &raw.op_str))
        .collect();
    BasicBlock::new(insns[0].address, instructions, successors)
}

impl CfgProvider for CapstoneBackend {
    fn name(&self) -> &'static str {
        "capstone"
    }

    fn version(&self) -> Option<String> {
        Some(capstone_version())
    }

    fn build_cfg(
        &self,
        image: &BinaryImage,
        cancel: &CancelToken,
    ) -> Result<ControlFlowGraph, CfgError> {
        let elf = Elf::parse(&image.bytes).map_err(|e| CfgError::Build(e.to_string()))?;
        let arch = image.arch.as_deref().unwrap_or("x86_64");
        let cs = make_cs(arch)?;

        let mut cfg = ControlFlowGraph::new();
        for region in code_regions(&elf, image.bytes.len()) {
            cancel.check()?;
            let (start, end) = region.file_range;
            let insns = disassemble(&cs, &image.bytes[start..end], region.address)?;
            let blocks = split_blocks(&insns);
            let function = Function::new(region.address, Some(region.name.clone()))
                .with_blocks(blocks.iter().map(|b| b.address))
                .returning(blocks.iter().any(|b| b.contains(InsnKind::Return)));
            debug!(
                "{}: {} at {:#x}, {} instructions in {} blocks",
                image.file_name(),
                region.name,
                region.address,
                insns.len(),
                blocks.len()
            );
            for block in blocks {
                cfg.add_block(block);
            }
            cfg.add_function(function);
        }

        for sym in image.symbols.iter().filter(|s| !s.defined && s.is_function && s.address != 0) {
            if cfg.function(sym.address).is_none() {
                cfg.add_function(Function::external(sym.address, sym.name.clone()));
            }
        }
        Ok(cfg)
    }
}
