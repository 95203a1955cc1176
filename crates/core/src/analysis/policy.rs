//! Which detectors run, and whether a binary is analyzed at all.
//!
//! Both halves are pure: [`run_detectors`] only touches the artifact it is
//! given and [`decide`] only looks at its input flags. Datastore lookups and
//! CFG construction live in `services`.

use serde::{Deserialize, Serialize};

use crate::analysis::{multi_module, shadow_stack, single_module};
use crate::model::{BinaryArtifact, BinaryImage, ControlFlowGraph};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMode {
    /// Multi-module first; single-module only when it failed; SCS always.
    #[default]
    Standard,
    /// Multi-module only. No CFG is needed.
    OnlyMultiModule,
    /// Both forward-edge detectors always run; SCS always.
    AllForwardEdge,
}

impl DetectionMode {
    pub fn needs_cfg(&self) -> bool {
        !matches!(self, DetectionMode::OnlyMultiModule)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Standard => "standard",
            DetectionMode::OnlyMultiModule => "only-multi-module",
            DetectionMode::AllForwardEdge => "all-forward-edge",
        }
    }
}

impl std::str::FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(DetectionMode::Standard),
            "only-multi-module" => Ok(DetectionMode::OnlyMultiModule),
            "all-forward-edge" => Ok(DetectionMode::AllForwardEdge),
            other => Err(format!("unknown detection mode: {other}")),
        }
    }
}

/// Per-detector results. `None` means the detector was not run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub multi_cfi: bool,
    pub single_cfi: Option<bool>,
    pub modified: bool,
    pub scs: Option<bool>,
}

/// Run the detectors selected by `mode`. Without a CFG only the multi-module
/// detector can run.
pub fn run_detectors(
    image: &BinaryImage,
    cfg: Option<&ControlFlowGraph>,
    mode: DetectionMode,
    artifact: &mut BinaryArtifact,
) -> DetectionOutcome {
    let mut outcome = DetectionOutcome {
        multi_cfi: multi_module::detect(image, artifact),
        ..DetectionOutcome::default()
    };
    if mode == DetectionMode::OnlyMultiModule {
        return outcome;
    }
    let Some(cfg) = cfg else {
        return outcome;
    };
    if mode == DetectionMode::AllForwardEdge || !outcome.multi_cfi {
        let (found, modified) = single_module::detect(cfg, artifact);
        outcome.single_cfi = Some(found);
        outcome.modified = modified;
    }
    outcome.scs = Some(shadow_stack::detect(cfg, artifact));
    outcome
}

/// What the scan should do with one binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Skip,
    /// New binary: analyze and insert.
    Analyze,
    /// Known binary re-analyzed because the datastore check was bypassed.
    ForceUpdate,
    /// Known binary re-analyzed because memory-safety filtering was lifted.
    Reanalyze,
}

impl Decision {
    pub fn analyzes(&self) -> bool {
        !matches!(self, Decision::Skip)
    }

    /// Persist with an update instead of an insert.
    pub fn updates(&self) -> bool {
        matches!(self, Decision::ForceUpdate | Decision::Reanalyze)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub unsafe_language: bool,
    pub exists: bool,
    pub has_single_cfi: bool,
    pub linux: bool,
    pub skip_db_check: bool,
    pub ignore_unsafe: bool,
}

pub fn decide(input: &DecisionInput) -> Decision {
    let existing = |fresh, known| if input.exists { known } else { fresh };

    if input.unsafe_language && (!input.exists || input.skip_db_check) {
        return existing(Decision::Analyze, Decision::ForceUpdate);
    }
    let rerun = if input.linux {
        !input.unsafe_language || input.has_single_cfi
    } else {
        !input.unsafe_language
    };
    if input.ignore_unsafe && rerun {
        return existing(Decision::Analyze, Decision::Reanalyze);
    }
    Decision::Skip
}
