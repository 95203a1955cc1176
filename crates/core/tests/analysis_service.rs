mod common;

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use cfi_audit_core::analysis::DetectionMode;
use cfi_audit_core::db::ProjectDb;
use cfi_audit_core::model::{BinaryArtifact, BinaryImage, ControlFlowGraph};
use cfi_audit_core::services::analysis::{
    build_cfg_with_watchdog, default_provider_name, default_provider_registry, fix_lib32,
    lib32_paths, AnalysisOptions, BinaryChecker, CancelToken, CfgError, CfgProvider,
    ProviderRegistry, SymbolsOnlyProvider,
};
use common::guarded_call_cfg;

/// Loads raw bytes without parsing and hands out a fixed graph.
struct ScriptedProvider {
    cfg: ControlFlowGraph,
}

impl CfgProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn load(&self, path: &Path) -> Result<BinaryImage, CfgError> {
        let bytes = std::fs::read(path).map_err(|e| CfgError::Build(e.to_string()))?;
        Ok(BinaryImage::new(path, bytes))
    }

    fn build_cfg(&self, _image: &BinaryImage, _cancel: &CancelToken) -> Result<ControlFlowGraph, CfgError> {
        Ok(self.cfg.clone())
    }
}

/// Never finishes on its own; stops only when canceled.
struct StallingProvider;

impl CfgProvider for StallingProvider {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn build_cfg(&self, _image: &BinaryImage, cancel: &CancelToken) -> Result<ControlFlowGraph, CfgError> {
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(30) {
            cancel.check()?;
            thread::sleep(Duration::from_millis(5));
        }
        Ok(ControlFlowGraph::new())
    }
}

fn write_binary(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn registry_resolves_by_name_and_lists_sorted() {
    let mut registry = ProviderRegistry::new();
    registry.register(StallingProvider).register(SymbolsOnlyProvider);
    assert!(registry.get("stalling").is_some());
    assert!(registry.get("missing").is_none());
    assert_eq!(registry.names(), vec!["stalling".to_string(), "symbols-only".to_string()]);
}

#[test]
fn default_registry_contains_the_default_provider() {
    let registry = default_provider_registry();
    assert!(registry.get(default_provider_name()).is_some());
    assert!(registry.get("symbols-only").is_some());
}

#[test]
fn cancel_token_is_shared_between_clones() {
    let token = CancelToken::new();
    let clone = token.clone();
    assert!(clone.check().is_ok());
    token.cancel();
    assert!(clone.is_canceled());
    assert!(matches!(clone.check(), Err(CfgError::Canceled)));
}

#[test]
fn watchdog_times_out_a_stalled_build() {
    let image = BinaryImage::new("stall", vec![]);
    let started = Instant::now();
    let result = build_cfg_with_watchdog(&StallingProvider, &image, Some(Duration::from_millis(50)));
    assert!(matches!(result, Err(CfgError::Timeout(limit)) if limit == Duration::from_millis(50)));
    assert!(started.elapsed() < Duration::from_secs(10), "worker must stop once canceled");
}

#[test]
fn watchdog_passes_through_a_fast_build() {
    let provider = ScriptedProvider { cfg: guarded_call_cfg(&["cmp r0, 5"], &["call r0"]) };
    let image = BinaryImage::new("fast", vec![]);
    let cfg = build_cfg_with_watchdog(&provider, &image, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(cfg.block_count(), 4);
    let cfg = build_cfg_with_watchdog(&provider, &image, None).unwrap();
    assert_eq!(cfg.function_count(), 1);
}

#[test]
fn timeout_error_message_names_the_limit() {
    let err = CfgError::Timeout(Duration::from_secs(900));
    assert_eq!(err.to_string(), "Generation of CFG took too long (limit 900s)");
}

#[test]
fn checker_runs_detectors_on_a_loaded_binary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_binary(dir.path(), "app_process", b"no markers here");
    let provider = ScriptedProvider { cfg: guarded_call_cfg(&["cmp r0, 5"], &["call r0"]) };
    let checker = BinaryChecker::new(&provider, AnalysisOptions::default());

    let mut artifact = BinaryArtifact::from_file(&path, "v/system", "").unwrap();
    let outcome = checker.check(&mut artifact).expect("analysis");
    assert!(!outcome.multi_cfi);
    assert_eq!(outcome.single_cfi, Some(true));
    assert_eq!(outcome.scs, Some(false));
    assert!(artifact.single_cfi());
    assert!(!artifact.has_error());
}

#[test]
fn load_failure_is_recorded_and_detectors_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_binary(dir.path(), "not-elf", b"#!/bin/sh\necho hi\n");
    let checker = BinaryChecker::new(&SymbolsOnlyProvider, AnalysisOptions::default());

    let mut artifact = BinaryArtifact::from_file(&path, "v/system", "").unwrap();
    assert!(checker.check(&mut artifact).is_err());
    assert!(artifact.error.starts_with("ERROR: Could not load binary because of"), "{}", artifact.error);
    assert!(!artifact.multi_cfi() && !artifact.single_cfi() && !artifact.scs());
}

#[test]
fn cfg_failure_is_recorded_and_detectors_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_binary(dir.path(), "libcfi.so", b"__cfi cfi-check-fail");
    let provider = StallingProvider;
    let options = AnalysisOptions {
        mode: DetectionMode::Standard,
        cfg_timeout: Some(Duration::from_millis(20)),
    };
    let checker = BinaryChecker::new(&provider, options);
    let image = BinaryImage::new(&path, std::fs::read(&path).unwrap());

    let mut artifact = BinaryArtifact::from_file(&path, "v/system", "").unwrap();
    let err = checker.check_image(&image, &mut artifact).unwrap_err();
    assert!(matches!(err, CfgError::Timeout(_)));
    assert!(artifact.error.starts_with("ERROR: Could not generate CFG because of Generation of CFG took too long"));
    assert!(!artifact.multi_cfi(), "no detector runs after a CFG failure");
}

#[test]
fn only_multi_module_needs_no_cfg() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_binary(dir.path(), "libcfi.so", b"abort: cfi-check-fail");
    let options = AnalysisOptions { mode: DetectionMode::OnlyMultiModule, cfg_timeout: None };
    let checker = BinaryChecker::new(&SymbolsOnlyProvider, options);
    let image = BinaryImage::new(&path, std::fs::read(&path).unwrap());

    let mut artifact = BinaryArtifact::from_file(&path, "v/system", "").unwrap();
    let outcome = checker.check_image(&image, &mut artifact).unwrap();
    assert!(outcome.multi_cfi);
    assert!(artifact.multi_cfi());
    assert!(!artifact.has_error());
}

#[test]
fn lib32_paths_swap_the_lib_directory() {
    assert_eq!(
        lib32_paths(Path::new("/mnt/img/system/lib/libfoo.so")),
        Some(("system/lib/libfoo.so".to_string(), "system/lib64/libfoo.so".to_string()))
    );
    assert_eq!(
        lib32_paths(Path::new("/system/lib/hw/audio.so")),
        Some(("system/lib/hw/audio.so".to_string(), "system/lib64/hw/audio.so".to_string()))
    );
    assert_eq!(lib32_paths(Path::new("/system/lib64/libfoo.so")), None);
    assert_eq!(lib32_paths(Path::new("lib/libfoo.so")), None);
}

#[test]
fn fix_lib32_copies_multi_module_cfi_from_lib64() {
    let db = ProjectDb::open_in_memory().unwrap();
    let lib64 = BinaryArtifact::from_bytes(
        Path::new("/img/system/lib64/libfoo.so"),
        b"64",
        "v/system",
        "",
        "",
    )
    .with_flags(true, false, false);
    let lib32 =
        BinaryArtifact::from_bytes(Path::new("/img/system/lib/libfoo.so"), b"32", "v/system", "", "");
    db.insert_binary(&lib64).unwrap();
    db.insert_binary(&lib32).unwrap();

    assert!(fix_lib32(&db, &lib32).unwrap());
    let record = db.get_binary(&lib32.id).unwrap().unwrap();
    assert!(record.multi_cfi);
    assert_eq!(record.error, "Lib32");

    // Already hardened: nothing left to do.
    assert!(!fix_lib32(&db, &lib32).unwrap());
    // 64-bit libraries are never rewritten.
    assert!(!fix_lib32(&db, &lib64).unwrap());
}

#[test]
fn fix_lib32_needs_a_hardened_twin() {
    let db = ProjectDb::open_in_memory().unwrap();
    let lib64 =
        BinaryArtifact::from_bytes(Path::new("/img/system/lib64/libbar.so"), b"64", "v/system", "", "");
    let lib32 =
        BinaryArtifact::from_bytes(Path::new("/img/system/lib/libbar.so"), b"32", "v/system", "", "");
    db.insert_binary(&lib64).unwrap();
    db.insert_binary(&lib32).unwrap();
    assert!(!fix_lib32(&db, &lib32).unwrap());
    assert!(!db.get_binary(&lib32.id).unwrap().unwrap().multi_cfi);
}
