//! Typed instructions built from disassembly text.
//!
//! A CFG provider hands us one `(mnemonic, operand text)` pair per instruction.
//! They are parsed exactly once, when the owning block is built, into an
//! [`Instruction`] carrying an [`InsnKind`] tag and an ordered operand list.

use serde::{Deserialize, Serialize};

/// Register reserved for the shadow call stack pointer on AArch64.
pub const SHADOW_STACK_REGISTER: &str = "x18";

/// Mnemonics that raise an undefined-instruction or breakpoint exception.
pub const TRAP_MNEMONICS: [&str; 6] = ["ud0", "ud1", "ud2", "udf", "brk", "int3"];

/// Longest token still treated as a register name.
pub const MAX_REGISTER_LEN: usize = 8;

/// Coarse instruction classes the detectors care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsnKind {
    Compare,
    Call,
    Trap,
    Return,
    Store,
    Load,
    Other,
}

impl InsnKind {
    /// Classify a mnemonic (case-insensitive).
    pub fn classify(mnemonic: &str) -> Self {
        let m = mnemonic.trim().to_ascii_lowercase();
        if m == "cmp" {
            InsnKind::Compare
        } else if m.starts_with("call") || m == "bl" || m == "blx" || m.starts_with("blr") {
            InsnKind::Call
        } else if TRAP_MNEMONICS.contains(&m.as_str()) {
            InsnKind::Trap
        } else if m.starts_with("ret") {
            InsnKind::Return
        } else if m.starts_with("str") || m.starts_with("stp") || m.starts_with("stur") {
            InsnKind::Store
        } else if m.starts_with("ldr") || m.starts_with("ldp") || m.starts_with("ldur") {
            InsnKind::Load
        } else {
            InsnKind::Other
        }
    }
}

/// A single parsed operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Operand {
    Register(String),
    Immediate(String),
    /// Bracketed memory reference or `reg+imm` / `reg-imm` displacement.
    Memory { base: Option<String>, text: String },
    Other(String),
}

impl Operand {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.contains('[') {
            let inner = text
                .split_once('[')
                .map(|(_, rest)| rest.split(']').next().unwrap_or(rest))
                .unwrap_or(text);
            return Operand::Memory { base: leading_register(inner), text: text.to_string() };
        }
        if is_immediate(text) {
            return Operand::Immediate(text.to_string());
        }
        if looks_like_register(text) {
            return Operand::Register(text.to_string());
        }
        if let Some(base) = displacement_base(text) {
            return Operand::Memory { base: Some(base), text: text.to_string() };
        }
        Operand::Other(text.to_string())
    }

    /// Original operand text.
    pub fn text(&self) -> &str {
        match self {
            Operand::Register(t) | Operand::Immediate(t) | Operand::Other(t) => t,
            Operand::Memory { text, .. } => text,
        }
    }

    pub fn as_register(&self) -> Option<&str> {
        match self {
            Operand::Register(r) => Some(r),
            _ => None,
        }
    }

    /// Register carrying data through this operand: the register itself or a memory base.
    pub fn data_register(&self) -> Option<&str> {
        match self {
            Operand::Register(r) => Some(r),
            Operand::Memory { base, .. } => base.as_deref(),
            _ => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Immediate(_))
    }
}

/// A disassembled instruction with its operands already split and classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: u64,
    pub mnemonic: String,
    pub op_str: String,
    pub kind: InsnKind,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn parse(address: u64, mnemonic: &str, op_str: &str) -> Self {
        let mnemonic = mnemonic.trim().to_ascii_lowercase();
        let op_str = op_str.trim().to_string();
        let operands = split_operands(&op_str).into_iter().map(Operand::parse).collect();
        Self { address, kind: InsnKind::classify(&mnemonic), mnemonic, op_str, operands }
    }

    /// Parse a full `"mnemonic op, op"` line.
    pub fn from_text(address: u64, line: &str) -> Self {
        let line = line.trim();
        match line.split_once(char::is_whitespace) {
            Some((mnemonic, ops)) => Self::parse(address, mnemonic, ops),
            None => Self::parse(address, line, ""),
        }
    }

    pub fn is(&self, kind: InsnKind) -> bool {
        self.kind == kind
    }

    /// Destination register (first operand), if it is a plain register.
    pub fn destination(&self) -> Option<&str> {
        self.operands.first().and_then(Operand::as_register)
    }

    pub fn sources(&self) -> &[Operand] {
        self.operands.get(1..).unwrap_or(&[])
    }

    pub fn register_operands(&self) -> impl Iterator<Item = &str> {
        self.operands.iter().filter_map(Operand::as_register)
    }

    /// True if any operand uses `register` directly or as a memory base.
    pub fn names_register(&self, register: &str) -> bool {
        self.operands.iter().any(|op| op.data_register() == Some(register))
    }

    /// Operand an indirect call or branch transfers control through.
    pub fn target(&self) -> Option<&Operand> {
        self.operands.last()
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.op_str.is_empty() {
            write!(f, "0x{:x}: {}", self.address, self.mnemonic)
        } else {
            write!(f, "0x{:x}: {} {}", self.address, self.mnemonic, self.op_str)
        }
    }
}

/// Split operand text on commas that are not nested in `[]` or `{}`.
pub fn split_operands(op_str: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in op_str.char_indices() {
        match ch {
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(op_str[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    let tail = op_str[start..].trim();
    if !tail.is_empty() || !out.is_empty() {
        out.push(tail);
    }
    out.retain(|s| !s.is_empty());
    out
}

/// Register-shaped token: starts with a letter, alphanumeric (plus `.`/`_`) after that.
pub fn looks_like_register(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    token.len() <= MAX_REGISTER_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

/// Numeric literals, `#imm` forms and hex addresses.
pub fn is_immediate(token: &str) -> bool {
    let t = token.trim_start_matches('#').trim_start_matches('-');
    !t.is_empty()
        && (t.chars().all(|c| c.is_ascii_digit())
            || t.strip_prefix("0x").is_some_and(|hex| hex.chars().all(|c| c.is_ascii_hexdigit())))
}

/// Pull a register out of an over-long token by dropping punctuation.
pub fn recover_register(token: &str) -> Option<String> {
    let cleaned: String = token.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    looks_like_register(&cleaned).then_some(cleaned)
}

fn leading_register(inner: &str) -> Option<String> {
    let first = inner.split([',', '+', '-', '*']).next()?.trim();
    let token = first.split_whitespace().last()?;
    looks_like_register(token).then(|| token.to_string())
}

fn displacement_base(text: &str) -> Option<String> {
    let cut = text.char_indices().skip(1).find(|(_, c)| *c == '+' || *c == '-').map(|(i, _)| i)?;
    let token = text[..cut].split_whitespace().last()?;
    looks_like_register(token).then(|| token.to_string())
}
