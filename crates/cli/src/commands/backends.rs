use anyhow::Result;
use serde::Serialize;

use cfi_audit_core::services::analysis::{default_provider_name, default_provider_registry};

#[derive(Debug, Serialize)]
pub struct BackendInfo {
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub default: bool,
}

fn describe(name: &str) -> String {
    match name {
        "capstone" => {
            "Capstone disassembly of ELF functions (x86, x86-64, ARM, AArch64); all detectors"
                .to_string()
        }
        "symbols-only" => {
            "Symbol and marker checks without a CFG; multi-module detection only".to_string()
        }
        other => format!("Backend '{}'", other),
    }
}

/// List the CFG providers compiled into this binary.
pub fn list_backends_command(json: bool) -> Result<()> {
    let registry = default_provider_registry();
    let default_name = default_provider_name();
    let entries: Vec<BackendInfo> = registry
        .names()
        .into_iter()
        .map(|name| BackendInfo {
            description: describe(&name),
            version: registry.get(&name).and_then(|p| p.version()),
            default: name == default_name,
            name,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Backends: (none)");
        return Ok(());
    }

    println!("Backends:");
    for entry in entries {
        let version = entry.version.map(|v| format!(" v{v}")).unwrap_or_default();
        let marker = if entry.default { " (default)" } else { "" };
        println!("- {}{}{}: {}", entry.name, version, marker, entry.description);
    }

    Ok(())
}
