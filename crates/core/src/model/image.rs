//! Loaded binary image: raw bytes plus a symbol table the detectors can query.

use std::fs;
use std::path::{Path, PathBuf};

use goblin::elf::{self, Elf};
use goblin::Object;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Owner reported for symbols that are imported rather than defined locally.
pub const EXTERN_OWNER: &str = "extern";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed object: {0}")]
    Parse(#[from] goblin::error::Error),
    #[error("not an ELF object")]
    NotElf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
    /// File name of the defining object, or [`EXTERN_OWNER`] for imports.
    pub owner: String,
    pub is_function: bool,
    pub defined: bool,
}

impl Symbol {
    /// Human-readable description, e.g. `"__cfi_check" in libfoo.so at 0x1040`.
    pub fn descriptor(&self) -> String {
        format!("\"{}\" in {} at {:#x}", self.name, self.owner, self.address)
    }
}

#[derive(Debug, Clone)]
pub struct BinaryImage {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub symbols: Vec<Symbol>,
    /// Capstone-style architecture name (`x86_64`, `arm64`, ...), when known.
    pub arch: Option<String>,
}

impl BinaryImage {
    /// Image with no symbols; mostly useful for byte-level checks and tests.
    pub fn new(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self { path: path.into(), bytes, symbols: Vec::new(), arch: None }
    }

    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        self.symbols.push(symbol);
        self
    }

    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let bytes = fs::read(path)
            .map_err(|source| ImageError::Io { path: path.to_path_buf(), source })?;
        Self::parse(path, bytes)
    }

    /// Parse an ELF object, collecting `.symtab` and `.dynsym` entries.
    pub fn parse(path: &Path, bytes: Vec<u8>) -> Result<Self, ImageError> {
        let (symbols, arch) = match Object::parse(&bytes)? {
            Object::Elf(elf) => {
                let owner = file_name_of(path);
                (elf_symbols(&elf, &owner), elf_arch(elf.header.e_machine).map(str::to_string))
            }
            _ => return Err(ImageError::NotElf),
        };
        Ok(Self { path: path.to_path_buf(), bytes, symbols, arch })
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }

    /// Look a symbol up by exact name. Local definitions win over imports.
    pub fn find_symbol(&self, name: &str) -> Option<&Symbol> {
        let mut matches = self.symbols.iter().filter(|s| s.name == name);
        let first = matches.next()?;
        if first.defined {
            return Some(first);
        }
        matches.find(|s| s.defined).or(Some(first))
    }

    /// Case-insensitive byte search over the whole file.
    pub fn raw_bytes_contains(&self, pattern: &str) -> bool {
        let needle = pattern.as_bytes();
        if needle.is_empty() {
            return true;
        }
        self.bytes.windows(needle.len()).any(|w| w.eq_ignore_ascii_case(needle))
    }
}

pub fn elf_arch(e_machine: u16) -> Option<&'static str> {
    match e_machine {
        elf::header::EM_X86_64 => Some("x86_64"),
        elf::header::EM_386 => Some("x86"),
        elf::header::EM_AARCH64 => Some("arm64"),
        elf::header::EM_ARM => Some("arm"),
        _ => None,
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn elf_symbols(elf: &Elf, owner: &str) -> Vec<Symbol> {
    let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
    let mut out: Vec<Symbol> = Vec::new();
    for (syms, strtab) in tables {
        for sym in syms.iter() {
            let Some(name) = strtab.get_at(sym.st_name).filter(|n| !n.is_empty()) else {
                continue;
            };
            if sym.st_type() == elf::sym::STT_SECTION || sym.st_type() == elf::sym::STT_FILE {
                continue;
            }
            let defined = sym.st_shndx != elf::section_header::SHN_UNDEF as usize;
            let duplicate = out.iter().any(|s| s.name == name && s.defined == defined);
            if duplicate {
                continue;
            }
            out.push(Symbol {
                name: name.to_string(),
                address: sym.st_value,
                size: sym.st_size,
                owner: if defined { owner.to_string() } else { EXTERN_OWNER.to_string() },
                is_function: sym.is_function(),
                defined,
            });
        }
    }
    out
}
