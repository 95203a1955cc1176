//! Backward register-use trace inside a single basic block.

use log::debug;

use crate::model::insn::{Instruction, Operand};

/// Ordered, append-only set of registers whose values feed the comparison.
///
/// The first entry is always the register protected by the guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterWatchList {
    registers: Vec<String>,
}

impl RegisterWatchList {
    /// Seed with the protected register followed by every register operand of
    /// the comparison.
    pub fn seed(protected: &str, compare: &Instruction) -> Self {
        let mut list = Self { registers: vec![protected.to_string()] };
        for reg in compare.register_operands() {
            list.watch(reg);
        }
        list
    }

    pub fn protected(&self) -> &str {
        &self.registers[0]
    }

    pub fn contains(&self, register: &str) -> bool {
        self.registers.iter().any(|r| r == register)
    }

    /// Append `register` unless it is already watched.
    pub fn watch(&mut self, register: &str) {
        if !self.contains(register) {
            self.registers.push(register.to_string());
        }
    }

    pub fn registers(&self) -> &[String] {
        &self.registers
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

/// Loose textual match: either name contains the other, so `x1` relates to
/// `x10` while `eax` and `rax` stay unrelated.
pub fn related_to(candidate: &str, protected: &str) -> bool {
    candidate.contains(protected) || protected.contains(candidate)
}

/// Walk `preceding` (the instructions before the comparison, in program order)
/// backwards. Returns true once a watched definition reads from the protected
/// register.
pub fn trace_back(preceding: &[Instruction], watch: &mut RegisterWatchList) -> bool {
    for insn in preceding.iter().rev() {
        let Some(dest) = insn.destination() else {
            continue;
        };
        if !watch.contains(dest) {
            continue;
        }
        for source in insn.sources().iter().rev() {
            let Some(reg) = source_register(source) else {
                continue;
            };
            if related_to(reg, watch.protected()) {
                debug!("{insn} reads protected register {}", watch.protected());
                return true;
            }
            watch.watch(reg);
        }
    }
    false
}

fn source_register(operand: &Operand) -> Option<&str> {
    match operand {
        Operand::Immediate(_) | Operand::Other(_) => None,
        _ => operand.data_register(),
    }
}
