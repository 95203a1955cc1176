use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cfi_audit_core::analysis::DetectionMode;
use cfi_audit_core::db::ProjectConfig;
use cfi_audit_core::services::analysis::{
    default_provider_name, AnalysisOptions, CfgProvider, ProviderRegistry,
};
use serde::Serialize;

/// Helper to print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}

/// Report encodings understood by `scan --format`.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// Serialize `value` as JSON or YAML.
pub fn render_serialized<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        OutputFormat::Text => Err(anyhow!("text output is not a serialization format")),
    }
}

/// Print a serialized report, or write it to `output` when given.
pub fn emit_serialized<T: Serialize>(
    value: &T,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let body = render_serialized(value, format)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, body)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}

/// Provider name from the flag, then the project config, then the build default.
pub fn resolve_backend_name(flag: Option<&str>, config: Option<&ProjectConfig>) -> String {
    flag.map(str::to_string)
        .or_else(|| config.and_then(|c| c.analysis.backend.clone()))
        .unwrap_or_else(|| default_provider_name().to_string())
}

/// Look up a provider, listing the available names when it is unknown.
pub fn select_provider<'r>(registry: &'r ProviderRegistry, name: &str) -> Result<&'r dyn CfgProvider> {
    registry.get(name).ok_or_else(|| {
        anyhow!("Unknown backend '{}'. Available: {}", name, registry.names().join(", "))
    })
}

/// `0` disables the watchdog.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    match secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

/// Combine CLI flags with the project's analysis defaults.
pub fn analysis_options(
    mode: DetectionMode,
    timeout_secs: Option<u64>,
    config: Option<&ProjectConfig>,
) -> AnalysisOptions {
    let configured = config.map(|c| c.analysis.cfg_timeout_secs);
    let cfg_timeout = match timeout_secs.or(configured) {
        Some(secs) => timeout_from_secs(secs),
        None => AnalysisOptions::default().cfg_timeout,
    };
    AnalysisOptions { mode, cfg_timeout }
}

/// `yes` / `no` for text tables.
pub fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
