use std::fs;
use std::path::Path;

use cfi_audit::{canonicalize_or_current, infer_project_name, resolve_against};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_returns_cwd_for_dot() {
    let cwd = std::env::current_dir().expect("cwd");
    assert_eq!(canonicalize_or_current(".").expect("canonicalize"), cwd);
}

#[test]
fn canonicalize_or_current_resolves_existing_path() {
    let tmp = tempdir().expect("tempdir");
    let nested = tmp.path().join("nested");
    fs::create_dir_all(&nested).expect("create nested");

    let result = canonicalize_or_current(&nested.to_string_lossy()).expect("canonicalize nested");
    assert_eq!(result, nested.canonicalize().expect("canonicalize nested"));
}

#[test]
fn canonicalize_or_current_joins_missing_path_onto_cwd() {
    let cwd = std::env::current_dir().expect("cwd");
    let result = canonicalize_or_current("does-not-exist-yet/project").expect("join");
    assert_eq!(result, cwd.join("does-not-exist-yet/project"));
}

#[test]
fn infer_project_name_uses_last_path_component() {
    assert_eq!(infer_project_name(Path::new("C:/work/pixel-audit")), "pixel-audit");
    assert_eq!(infer_project_name(Path::new("/tmp/project-root")), "project-root");
}

#[test]
fn infer_project_name_falls_back_when_missing() {
    assert_eq!(infer_project_name(Path::new("/")), "unnamed-project");
}

#[test]
fn resolve_against_keeps_absolute_paths() {
    let tmp = tempdir().expect("tempdir");
    let absolute = tmp.path().join("system/bin/sh");
    let root = Path::new("/work/audit");
    assert_eq!(resolve_against(root, &absolute.to_string_lossy()), absolute);
    assert_eq!(resolve_against(root, "mnt/system"), root.join("mnt/system"));
}
