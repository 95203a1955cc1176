#![allow(dead_code)]

use std::path::{Path, PathBuf};

use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};

pub const CLANG: &str = "clang version 17.0.2";

/// `cmp rax, 5; jne +3; call rax; ret; ud2`
pub const X86_64_GUARDED_CALL: [u8; 11] =
    [0x48, 0x83, 0xf8, 0x05, 0x75, 0x03, 0xff, 0xd0, 0xc3, 0x0f, 0x0b];

fn symbol(name: &str, value: u64, size: u64, scope: SymbolScope, section: SymbolSection) -> Symbol {
    Symbol {
        name: name.as_bytes().to_vec(),
        value,
        size,
        kind: SymbolKind::Text,
        scope,
        weak: false,
        section,
        flags: SymbolFlags::None,
    }
}

/// x86-64 relocatable object with sized functions, imports and a `.comment` banner.
pub fn x86_64_elf(code: &[u8], functions: &[(&str, u64, u64)], imports: &[&str], comment: Option<&str>) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    obj.append_section_data(text, code, 16);
    for (name, offset, size) in functions {
        obj.add_symbol(symbol(name, *offset, *size, SymbolScope::Linkage, SymbolSection::Section(text)));
    }
    for name in imports {
        obj.add_symbol(symbol(name, 0, 0, SymbolScope::Dynamic, SymbolSection::Undefined));
    }
    if let Some(text) = comment {
        let section = obj.add_section(Vec::new(), b".comment".to_vec(), SectionKind::OtherString);
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        obj.append_section_data(section, &data, 1);
    }
    obj.write().expect("write ELF fixture")
}

/// Library taking part in cross-DSO CFI: defines `__cfi_check`, imports `__cfi_slowpath`.
pub fn cross_dso_library() -> Vec<u8> {
    x86_64_elf(&[0xc3], &[("__cfi_check", 0, 1)], &["__cfi_slowpath"], Some(CLANG))
}

pub fn guarded_call_binary() -> Vec<u8> {
    x86_64_elf(&X86_64_GUARDED_CALL, &[("dispatch", 0, 11)], &[], Some(CLANG))
}

pub fn plain_binary() -> Vec<u8> {
    x86_64_elf(&[0x90, 0xc3], &[("main", 0, 2)], &[], Some(CLANG))
}

pub fn write(root: &Path, rel: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("create fixture dir");
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

pub fn root_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
