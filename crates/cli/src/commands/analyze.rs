use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use cfi_audit_core::analysis::{DetectionMode, DetectionOutcome};
use cfi_audit_core::db::{ProjectContext, ProjectLayout};
use cfi_audit_core::model::{BinaryArtifact, EvidenceRecord};
use cfi_audit_core::services::analysis::{default_provider_registry, BinaryChecker};
use log::debug;
use serde::Serialize;

use crate::commands::{analysis_options, resolve_backend_name, select_provider, yes_no};
use crate::{canonicalize_or_current, resolve_against};

/// Inputs for a single-binary check.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub root: String,
    pub path: String,
    pub mode: DetectionMode,
    pub backend: Option<String>,
    pub timeout_secs: Option<u64>,
    pub subimage: String,
    pub container: String,
    /// Store the result in the project database.
    pub save: bool,
    /// Write the evidence to `reports/evidence/`.
    pub dump: bool,
    pub json: bool,
}

impl AnalyzeOptions {
    pub fn new(root: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            path: path.into(),
            mode: DetectionMode::Standard,
            backend: None,
            timeout_secs: None,
            subimage: "adhoc".to_string(),
            container: String::new(),
            save: false,
            dump: false,
            json: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeReport {
    pub id: String,
    pub name: String,
    pub path: String,
    pub checksum: String,
    pub backend: String,
    pub mode: DetectionMode,
    pub unsafe_language: bool,
    pub multi_cfi: bool,
    pub single_cfi: bool,
    pub scs: bool,
    pub modified: bool,
    /// Which detectors ran; absent when loading or CFG generation failed.
    pub outcome: Option<DetectionOutcome>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub evidence: Vec<EvidenceRecord>,
    pub saved: bool,
    pub evidence_file: Option<String>,
}

/// Render evidence as one line per record.
pub fn format_evidence(artifact: &BinaryArtifact) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {} ({})\n", artifact.name, artifact.checksum));
    for record in &artifact.evidence {
        out.push_str(&format!(
            "{:#x} [{}]\n{}\n\n",
            record.address,
            record.kind.as_str(),
            record.description.trim_end()
        ));
    }
    out
}

/// Check one binary and optionally record the result.
pub fn analyze_command(opts: &AnalyzeOptions) -> Result<()> {
    let root_path = canonicalize_or_current(&opts.root)?;
    let layout = ProjectLayout::new(&root_path);

    let ctx = if opts.save || opts.dump || layout.project_config_path.exists() {
        Some(ProjectContext::from_root(&root_path)?)
    } else {
        debug!("no project at {}; using built-in defaults", root_path.display());
        None
    };
    let config = ctx.as_ref().map(|c| &c.config);

    let binary_path: PathBuf = resolve_against(&root_path, &opts.path);
    if !binary_path.is_file() {
        return Err(anyhow!("Binary file does not exist: {}", binary_path.display()));
    }

    let registry = default_provider_registry();
    let backend = resolve_backend_name(opts.backend.as_deref(), config);
    let provider = select_provider(&registry, &backend)?;
    let options = analysis_options(opts.mode, opts.timeout_secs, config);

    let mut artifact = BinaryArtifact::from_file(&binary_path, &opts.subimage, &opts.container)
        .with_context(|| format!("Failed to read binary {}", binary_path.display()))?;
    let outcome = BinaryChecker::new(provider, options).check(&mut artifact).ok();

    let mut saved = false;
    let mut evidence_file = None;
    if let Some(ctx) = &ctx {
        if opts.save {
            if ctx.db.binary_exists(&artifact.id)? {
                ctx.db.update_binary_results(&artifact).context("Failed to update binary")?;
            } else {
                ctx.db.insert_binary(&artifact).context("Failed to insert binary")?;
            }
            saved = true;
        }
        if opts.dump {
            let path = ctx.layout.evidence_path(&artifact.checksum, &artifact.name);
            fs::create_dir_all(&ctx.layout.evidence_dir).with_context(|| {
                format!("Failed to create evidence dir {}", ctx.layout.evidence_dir.display())
            })?;
            fs::write(&path, format_evidence(&artifact))
                .with_context(|| format!("Failed to write evidence to {}", path.display()))?;
            evidence_file = Some(path.display().to_string());
        }
    }

    let report = AnalyzeReport {
        id: artifact.id.clone(),
        name: artifact.name.clone(),
        path: artifact.path.display().to_string(),
        checksum: artifact.checksum.clone(),
        backend,
        mode: opts.mode,
        unsafe_language: artifact.unsafe_language,
        multi_cfi: artifact.multi_cfi(),
        single_cfi: artifact.single_cfi(),
        scs: artifact.scs(),
        modified: artifact.modified,
        outcome,
        error: artifact.error.clone(),
        evidence: artifact.evidence.clone(),
        saved,
        evidence_file,
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Binary: {}", report.name);
    println!("  Path: {}", report.path);
    println!("  SHA-256: {}", report.checksum);
    println!("  Backend: {} ({})", report.backend, report.mode.as_str());
    println!("  Memory-unsafe language: {}", yes_no(report.unsafe_language));
    println!("  Multi-module CFI: {}", yes_no(report.multi_cfi));
    println!("  Single-module CFI: {}", yes_no(report.single_cfi));
    if report.single_cfi {
        println!("  Call register modified before call: {}", yes_no(report.modified));
    }
    println!("  Shadow call stack: {}", yes_no(report.scs));
    if !report.error.is_empty() {
        println!("  Error: {}", report.error);
    }
    if report.saved {
        println!("  Saved as: {}", report.id);
    }
    if let Some(path) = &report.evidence_file {
        println!("  Evidence written to: {}", path);
    } else if !report.evidence.is_empty() {
        println!();
        print!("{}", format_evidence(&artifact));
    }

    Ok(())
}
