use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use cfi_audit_core::analysis::DetectionMode;
use cfi_audit_core::db::ProjectContext;
use cfi_audit_core::services::analysis::default_provider_registry;
use cfi_audit_core::services::scan::{ContainerSource, ScanReport, ScanRequest, ScanRunner};

use crate::commands::{
    analysis_options, emit_serialized, resolve_backend_name, select_provider, yes_no, OutputFormat,
};
use crate::{canonicalize_or_current, resolve_against};

/// Inputs for a whole-tree scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: String,
    /// Extracted filesystem to walk.
    pub tree: String,
    pub version: String,
    pub image: String,
    pub container: Option<String>,
    pub container_type: String,
    pub container_path: Option<String>,
    pub linux: bool,
    pub ignore_unsafe: bool,
    pub skip_db_check: bool,
    pub mode: DetectionMode,
    pub jobs: Option<usize>,
    pub backend: Option<String>,
    pub timeout_secs: Option<u64>,
    pub no_lib32: bool,
    pub format: OutputFormat,
    pub output: Option<String>,
}

impl ScanOptions {
    pub fn new(
        root: impl Into<String>,
        tree: impl Into<String>,
        version: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            tree: tree.into(),
            version: version.into(),
            image: image.into(),
            container: None,
            container_type: "archive".to_string(),
            container_path: None,
            linux: false,
            ignore_unsafe: false,
            skip_db_check: false,
            mode: DetectionMode::Standard,
            jobs: None,
            backend: None,
            timeout_secs: None,
            no_lib32: false,
            format: OutputFormat::Text,
            output: None,
        }
    }
}

fn print_report(report: &ScanReport) {
    println!("Scan of {}:", report.subimage);
    println!("  Discovered: {}", report.discovered);
    println!("  Inserted: {}", report.inserted);
    println!("  Updated: {}", report.updated);
    println!("  Skipped: {}", report.skipped);
    println!("  Failed: {}", report.failed);
    println!("  Lib32 fixed: {}", report.lib32_fixed);
    println!();
    for entry in &report.entries {
        let mut line = format!(
            "- {} [{:?}] unsafe: {}, multi: {}, single: {}, scs: {}",
            entry.path,
            entry.decision,
            yes_no(entry.unsafe_language),
            yes_no(entry.multi_cfi),
            yes_no(entry.single_cfi),
            yes_no(entry.scs)
        );
        if !entry.error.is_empty() {
            line.push_str(&format!(" -- {}", entry.error));
        }
        println!("{line}");
    }
    let s = &report.summary;
    println!();
    println!("Summary for '{}':", s.prefix);
    println!("  Binaries: {} ({} memory-unsafe)", s.binaries_total, s.binaries_unsafe);
    println!("  Multi-module CFI: {}", s.multi_cfi);
    println!("  Single-module CFI: {}", s.single_cfi);
    println!("  Shadow call stack: {}", s.scs);
}

/// Walk an extracted filesystem, analyze every ELF binary and record results.
pub fn scan_command(opts: &ScanOptions) -> Result<()> {
    let root_path = canonicalize_or_current(&opts.root)?;
    let ctx = ProjectContext::from_root(&root_path)?;

    let tree: PathBuf = resolve_against(&root_path, &opts.tree);
    if !tree.is_dir() {
        return Err(anyhow!("Scan tree is not a directory: {}", tree.display()));
    }

    let registry = default_provider_registry();
    let backend = resolve_backend_name(opts.backend.as_deref(), Some(&ctx.config));
    let provider = select_provider(&registry, &backend)?;

    let mut request = ScanRequest::new(&tree, &opts.version, &opts.image);
    request.container = opts.container.as_ref().map(|name| ContainerSource {
        name: name.clone(),
        container_type: opts.container_type.clone(),
        path: opts.container_path.clone().unwrap_or_else(|| name.clone()),
    });
    request.linux = opts.linux;
    request.ignore_unsafe = opts.ignore_unsafe;
    request.skip_db_check = opts.skip_db_check;
    request.fix_lib32 = !opts.no_lib32;
    request.jobs = opts.jobs.or(ctx.config.analysis.jobs);
    request.options = analysis_options(opts.mode, opts.timeout_secs, Some(&ctx.config));

    let report = ScanRunner::new(&ctx.db, provider)
        .run(&request)
        .with_context(|| format!("Scan of {} failed", tree.display()))?;

    match opts.format {
        OutputFormat::Text => print_report(&report),
        format => {
            let output = opts.output.as_deref().map(|p| resolve_against(&root_path, p));
            emit_serialized(&report, format, output.as_deref())?;
        }
    }

    Ok(())
}
