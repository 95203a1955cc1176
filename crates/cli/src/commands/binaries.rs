use anyhow::{anyhow, Context, Result};
use cfi_audit_core::db::{BinaryRecord, ProjectContext};
use cfi_audit_core::model::EvidenceRecord;
use serde::Serialize;

use crate::canonicalize_or_current;
use crate::commands::yes_no;

#[derive(Serialize)]
pub struct BinaryDetails {
    #[serde(flatten)]
    pub record: BinaryRecord,
    pub evidence: Vec<EvidenceRecord>,
}

fn flags(bin: &BinaryRecord) -> String {
    let mut set = Vec::new();
    if bin.multi_cfi {
        set.push("multi-cfi");
    }
    if bin.single_cfi {
        set.push("single-cfi");
    }
    if bin.scs {
        set.push("scs");
    }
    if set.is_empty() {
        "none".to_string()
    } else {
        set.join(", ")
    }
}

/// List analyzed binaries, optionally restricted to one subimage.
pub fn list_binaries_command(root: &str, subimage: Option<&str>, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let binaries = ctx.db.list_binaries(subimage).context("Failed to list binaries")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&binaries)?);
        return Ok(());
    }

    println!("Binaries:");
    if binaries.is_empty() {
        println!("(none)");
        return Ok(());
    }
    for bin in binaries {
        let error = if bin.error.is_empty() { String::new() } else { format!(" -- {}", bin.error) };
        println!(
            "- {} (subimage: {}, path: {}, unsafe: {}, hardening: {}){}",
            bin.name,
            bin.subimage,
            bin.path,
            yes_no(bin.unsafe_language),
            flags(&bin),
            error
        );
    }

    Ok(())
}

/// Show one stored binary together with its evidence.
pub fn show_binary_command(root: &str, id: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let record = ctx
        .db
        .get_binary(id)
        .context("Failed to load binary")?
        .ok_or_else(|| anyhow!("No binary with id '{}'", id))?;
    let evidence = ctx.db.load_evidence(id).context("Failed to load evidence")?;

    if json {
        let details = BinaryDetails { record, evidence };
        println!("{}", serde_json::to_string_pretty(&details)?);
        return Ok(());
    }

    println!("Binary: {}", record.name);
    println!("  Id: {}", record.id);
    println!("  Subimage: {}", record.subimage);
    if !record.container.is_empty() {
        println!("  Container: {}", record.container);
    }
    println!("  Path: {}", record.path);
    println!("  Timestamp: {}", record.timestamp);
    println!("  SHA-256: {}", record.checksum);
    println!("  Memory-unsafe language: {}", yes_no(record.unsafe_language));
    println!("  Hardening: {}", flags(&record));
    if record.single_cfi {
        println!("  Call register modified before call: {}", yes_no(record.modified));
    }
    if !record.error.is_empty() {
        println!("  Error: {}", record.error);
    }
    if !evidence.is_empty() {
        println!("  Evidence:");
        for item in evidence {
            println!("  - {:#x} [{}]", item.address, item.kind.as_str());
            for line in item.description.lines() {
                println!("      {}", line);
            }
        }
    }

    Ok(())
}

/// Print hardening counts for every subimage under `prefix`.
pub fn summary_command(root: &str, prefix: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let summary = ctx.db.hardening_summary(prefix).context("Failed to compute summary")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let label = if prefix.is_empty() { "(all)" } else { prefix };
    println!("Hardening summary for {}:", label);
    println!("  Binaries: {}", summary.binaries_total);
    println!("  Memory-unsafe binaries: {}", summary.binaries_unsafe);
    println!("  Multi-module CFI: {}", summary.multi_cfi);
    println!("  Single-module CFI: {}", summary.single_cfi);
    println!("  Shadow call stack: {}", summary.scs);

    Ok(())
}
