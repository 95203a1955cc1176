//! Whole-tree scans: plan against the datastore, analyze in parallel, persist.

use std::collections::HashSet;
use std::path::PathBuf;

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::policy::{decide, Decision, DecisionInput};
use crate::db::{ContainerRecord, DbError, HardeningSummary, ImageRecord, ProjectDb};
use crate::model::BinaryArtifact;
use crate::services::analysis::{fix_lib32, AnalysisOptions, BinaryChecker, CfgProvider};
use crate::services::discovery::find_elf_binaries;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to walk {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Container (package, APEX, ...) the scanned tree was unpacked from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSource {
    pub name: String,
    pub container_type: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Root of an already-mounted or extracted filesystem.
    pub root: PathBuf,
    /// Distribution or build the image belongs to.
    pub version: String,
    pub image_name: String,
    pub container: Option<ContainerSource>,
    pub linux: bool,
    pub ignore_unsafe: bool,
    pub skip_db_check: bool,
    pub fix_lib32: bool,
    pub jobs: Option<usize>,
    pub options: AnalysisOptions,
}

impl ScanRequest {
    pub fn new(root: impl Into<PathBuf>, version: impl Into<String>, image_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            version: version.into(),
            image_name: image_name.into(),
            container: None,
            linux: false,
            ignore_unsafe: false,
            skip_db_check: false,
            fix_lib32: true,
            jobs: None,
            options: AnalysisOptions::default(),
        }
    }

    pub fn subimage(&self) -> String {
        ImageRecord::new(&self.version, &self.image_name).id
    }
}

/// Outcome for one discovered binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEntry {
    pub id: String,
    pub path: String,
    pub decision: Decision,
    pub unsafe_language: bool,
    pub multi_cfi: bool,
    pub single_cfi: bool,
    pub scs: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ScanEntry {
    fn from_artifact(artifact: &BinaryArtifact, decision: Decision) -> Self {
        Self {
            id: artifact.id.clone(),
            path: artifact.path.display().to_string(),
            decision,
            unsafe_language: artifact.unsafe_language,
            multi_cfi: artifact.multi_cfi(),
            single_cfi: artifact.single_cfi(),
            scs: artifact.scs(),
            error: artifact.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub subimage: String,
    pub discovered: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Binaries persisted with a load or CFG error.
    pub failed: usize,
    pub lib32_fixed: usize,
    pub entries: Vec<ScanEntry>,
    pub summary: HardeningSummary,
}

/// Runs a [`ScanRequest`] against one results database and CFG provider.
pub struct ScanRunner<'a> {
    pub db: &'a ProjectDb,
    pub provider: &'a dyn CfgProvider,
}

impl<'a> ScanRunner<'a> {
    pub fn new(db: &'a ProjectDb, provider: &'a dyn CfgProvider) -> Self {
        Self { db, provider }
    }

    pub fn run(&self, request: &ScanRequest) -> Result<ScanReport, ScanError> {
        let image = ImageRecord::new(&request.version, &request.image_name);
        self.db.insert_image(&image)?;
        let container_tag = match &request.container {
            Some(c) => {
                let record =
                    ContainerRecord::new(&image.id, &c.name, &c.container_type, &c.path);
                self.db.insert_container(&record)?;
                c.name.clone()
            }
            None => String::new(),
        };

        let paths = find_elf_binaries(&request.root)
            .map_err(|source| ScanError::Discovery { path: request.root.clone(), source })?;
        info!("{}: {} ELF binaries under {}", image.id, paths.len(), request.root.display());

        let mut report =
            ScanReport { subimage: image.id.clone(), discovered: paths.len(), ..Default::default() };

        // Plan
        let mut known = Vec::with_capacity(paths.len());
        let mut planned = Vec::new();
        let mut seen = HashSet::new();
        for path in &paths {
            let artifact = match BinaryArtifact::from_file(path, &image.id, &container_tag) {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!("skipping {}: {e}", path.display());
                    report.skipped += 1;
                    continue;
                }
            };
            if !seen.insert(artifact.id.clone()) {
                info!("{}: identical copy already scanned", path.display());
                report.skipped += 1;
                continue;
            }
            let decision = self.plan(&artifact, request)?;
            if decision.analyzes() {
                planned.push((artifact, decision));
            } else {
                report.skipped += 1;
                report.entries.push(ScanEntry::from_artifact(&artifact, decision));
                known.push(artifact);
            }
        }

        // Analyze
        let pool = rayon::ThreadPoolBuilder::new().num_threads(request.jobs.unwrap_or(0)).build()?;
        let checker = BinaryChecker::new(self.provider, request.options);
        let analyzed: Vec<(BinaryArtifact, Decision)> = pool.install(|| {
            planned
                .into_par_iter()
                .map(|(mut artifact, decision)| {
                    // Errors are already recorded on the artifact.
                    let _ = checker.check(&mut artifact);
                    (artifact, decision)
                })
                .collect()
        });

        // Persist
        for (artifact, decision) in analyzed {
            if decision.updates() {
                self.db.update_binary_results(&artifact)?;
                report.updated += 1;
            } else {
                self.db.insert_binary(&artifact)?;
                report.inserted += 1;
            }
            if artifact.has_error() {
                report.failed += 1;
            }
            report.entries.push(ScanEntry::from_artifact(&artifact, decision));
            known.push(artifact);
        }

        if request.fix_lib32 {
            for artifact in known.iter().filter(|a| a.path.to_string_lossy().contains("/lib/")) {
                if fix_lib32(self.db, artifact)? {
                    report.lib32_fixed += 1;
                }
            }
        }

        report.entries.sort_by(|a, b| a.path.cmp(&b.path));
        report.summary = self.db.hardening_summary(&request.version)?;
        Ok(report)
    }

    fn plan(&self, artifact: &BinaryArtifact, request: &ScanRequest) -> Result<Decision, DbError> {
        let exists = self.db.binary_exists(&artifact.id)?;
        let has_single_cfi = exists && self.db.has_single_cfi(&artifact.id)?;
        Ok(decide(&DecisionInput {
            unsafe_language: artifact.unsafe_language,
            exists,
            has_single_cfi,
            linux: request.linux,
            skip_db_check: request.skip_db_check,
            ignore_unsafe: request.ignore_unsafe,
        }))
    }
}
