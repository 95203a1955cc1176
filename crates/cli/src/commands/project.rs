use std::fs;

use anyhow::{Context, Result};
use cfi_audit_core::db::{
    write_project_config, AnalysisConfig, ProjectConfig, ProjectContext, ProjectDb, ProjectLayout,
};
use cfi_audit_core::services::analysis::default_provider_registry;
use serde::Serialize;

use crate::commands::print_dir_status;
use crate::{canonicalize_or_current, infer_project_name};

#[derive(Serialize)]
pub struct ProjectInfoSnapshot {
    pub tool_version: String,
    pub name: String,
    pub description: Option<String>,
    pub root: String,
    pub config_file: String,
    pub config_version: String,
    pub db_path: String,
    pub schema_version: i32,
    pub analysis: AnalysisConfig,
    pub available_backends: Vec<String>,
    pub layout: ProjectInfoLayout,
    pub images: usize,
    pub binaries: usize,
}

#[derive(Serialize)]
pub struct ProjectInfoLayout {
    pub meta_dir: String,
    pub reports_dir: String,
    pub evidence_dir: String,
}

/// Initialize a new audit project at `root`.
pub fn init_project_command(root: &str, name: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let project_name = match name {
        Some(n) => n,
        None => infer_project_name(&root_path),
    };

    fs::create_dir_all(&layout.reports_dir).with_context(|| {
        format!("Failed to create reports dir: {}", layout.reports_dir.display())
    })?;
    fs::create_dir_all(&layout.evidence_dir).with_context(|| {
        format!("Failed to create evidence dir: {}", layout.evidence_dir.display())
    })?;

    let config = ProjectConfig::new(&project_name, layout.db_path_relative_string());
    write_project_config(&layout, &config)?;

    // Create the results database up front so later commands can rely on it.
    ProjectDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize results database at {}", layout.db_path.display())
    })?;

    println!("Initialized cfi-audit project:");
    println!("  Name: {}", project_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.project_config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Reports dir: {}", layout.reports_dir.display());
    println!("  Evidence dir: {}", layout.evidence_dir.display());

    Ok(())
}

/// Show basic information about an existing project.
pub fn project_info_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let layout = &ctx.layout;
    let config = &ctx.config;

    let schema_version = ctx.db.schema_version().context("Failed to read schema version")?;
    let images = ctx.db.list_images().context("Failed to list images")?.len();
    let binaries = ctx.db.list_binaries(None).context("Failed to list binaries")?.len();
    let available_backends = default_provider_registry().names();

    if json {
        let snapshot = ProjectInfoSnapshot {
            tool_version: cfi_audit_core::version().to_string(),
            name: config.name.clone(),
            description: config.description.clone(),
            root: layout.root.display().to_string(),
            config_file: layout.project_config_path.display().to_string(),
            config_version: config.config_version.clone(),
            db_path: config.db.path.clone(),
            schema_version,
            analysis: config.analysis.clone(),
            available_backends,
            layout: ProjectInfoLayout {
                meta_dir: layout.meta_dir.display().to_string(),
                reports_dir: layout.reports_dir.display().to_string(),
                evidence_dir: layout.evidence_dir.display().to_string(),
            },
            images,
            binaries,
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("cfi-audit Project Info");
    println!("======================");
    println!("Tool version: {}", cfi_audit_core::version());
    println!("Name: {}", config.name);
    if let Some(description) = &config.description {
        println!("Description: {}", description);
    }
    println!("Root: {}", layout.root.display());
    println!("Config file: {}", layout.project_config_path.display());
    println!("Config version: {}", config.config_version);
    println!("DB path (config): {}", config.db.path);
    println!("Schema version: {}", schema_version);
    match ctx.cfg_timeout() {
        Some(limit) => println!("CFG timeout: {}s", limit.as_secs()),
        None => println!("CFG timeout: disabled"),
    }
    if let Some(backend) = &config.analysis.backend {
        println!("Default backend: {}", backend);
    }
    println!("Available backends: {}", available_backends.join(", "));
    println!();

    println!("Directories:");
    print_dir_status("Meta dir (.cfi)", &layout.meta_dir);
    print_dir_status("Reports dir", &layout.reports_dir);
    print_dir_status("Evidence dir", &layout.evidence_dir);
    println!();
    println!("Images: {}", images);
    println!("Binaries: {}", binaries);

    Ok(())
}
