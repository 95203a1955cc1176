mod common;

use std::path::Path;

use cfi_audit_core::model::artifact::{
    artifact_identity, is_unsafe_language, sha256_hex, truncate_identity, MAX_IDENTITY_LEN,
};
use cfi_audit_core::model::{BinaryArtifact, EvidenceKind};
use common::ElfFixture;

fn artifact() -> BinaryArtifact {
    BinaryArtifact::from_bytes(
        Path::new("/img/system/lib64/libfoo.so"),
        b"\x7fELF",
        "android-14/system",
        "",
        "2024-01-01 00:00:00",
    )
}

#[test]
fn identity_joins_subimage_container_checksum_and_name() {
    let a = artifact();
    assert_eq!(a.name, "libfoo.so");
    assert_eq!(a.checksum, sha256_hex(b"\x7fELF"));
    assert_eq!(a.id, format!("android-14/system//{}/libfoo.so", a.checksum));
    assert!(!a.multi_cfi() && !a.single_cfi() && !a.scs());
}

#[test]
fn identity_truncation_keeps_the_suffix() {
    let long_name = "n".repeat(250);
    let id = artifact_identity("sub", "container", "abc", &long_name);
    assert_eq!(id.chars().count(), MAX_IDENTITY_LEN);
    assert!(id.ends_with(&long_name));
    assert!(id.starts_with("/abc/"), "prefix is dropped, suffix kept: {id}");

    let short = "a/b/c/d";
    assert_eq!(truncate_identity(short), short);

    let exact = "x".repeat(MAX_IDENTITY_LEN);
    assert_eq!(truncate_identity(&exact), exact);
}

#[test]
fn flags_are_idempotent_and_monotone() {
    let mut a = artifact();
    a.mark_scs();
    a.mark_scs();
    assert!(a.scs());

    a.mark_single_cfi(true);
    a.mark_single_cfi(false);
    assert!(a.single_cfi());
    assert!(a.modified, "a later unmodified match must not clear the flag");

    let b = artifact().with_flags(true, false, false).with_flags(false, false, true);
    assert!(b.multi_cfi());
    assert!(!b.single_cfi());
    assert!(b.scs());
}

#[test]
fn errors_accumulate() {
    let mut a = artifact();
    assert!(!a.has_error());
    a.push_error("first");
    a.push_error("second");
    assert!(a.has_error());
    assert_eq!(a.error, "first; second");
}

#[test]
fn evidence_is_recorded_in_order() {
    let mut a = artifact();
    a.add_evidence(0x10, EvidenceKind::BranchingNode, "0x10: cmp r0, 5");
    a.add_evidence(0x20, EvidenceKind::GuardBlock, "0x20: ud2");
    assert_eq!(a.evidence.len(), 2);
    assert_eq!(a.evidence[0].kind, EvidenceKind::BranchingNode);
    assert_eq!(a.evidence[1].address, 0x20);
}

#[test]
fn evidence_kind_text_round_trips() {
    for kind in [
        EvidenceKind::Marker,
        EvidenceKind::Symbol,
        EvidenceKind::BranchingNode,
        EvidenceKind::GuardBlock,
        EvidenceKind::Prologue,
        EvidenceKind::Epilogue,
    ] {
        assert_eq!(EvidenceKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(EvidenceKind::parse("nope"), None);
}

#[test]
fn unsafe_language_heuristic_reads_comment_section() {
    let clang = ElfFixture::x86_64(&[0xc3]).function("f", 0, 1).comment("clang version 17.0.2");
    assert!(is_unsafe_language(&clang.build()));

    let gcc = ElfFixture::x86_64(&[0xc3]).function("f", 0, 1).comment("GCC: (GNU) 13.2.0");
    assert!(is_unsafe_language(&gcc.build()));

    let rustc = ElfFixture::x86_64(&[0xc3]).function("f", 0, 1).comment("rustc version 1.80.0");
    assert!(!is_unsafe_language(&rustc.build()));
}

#[test]
fn unsafe_language_heuristic_accepts_build_id_note() {
    let mut bytes = b"\x7fELF....".to_vec();
    bytes.extend_from_slice(b".note.gnu.build-id");
    assert!(is_unsafe_language(&bytes));
    assert!(!is_unsafe_language(b"\x7fELF plain"));
}

#[test]
fn from_file_reads_checksum_and_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let path = ElfFixture::x86_64(&[0xc3]).function("f", 0, 1).write_to(dir.path(), "tool");
    let a = BinaryArtifact::from_file(&path, "v/img", "pkg.apex").expect("artifact");
    assert_eq!(a.name, "tool");
    assert_eq!(a.container, "pkg.apex");
    assert_eq!(a.checksum, sha256_hex(&std::fs::read(&path).unwrap()));
    assert_eq!(a.timestamp.len(), "2024-01-01 00:00:00".len());
}
