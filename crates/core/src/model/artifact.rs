//! Per-binary classification record.
//!
//! A [`BinaryArtifact`] is created once per discovered file, handed to the
//! detectors as `&mut`, and finally persisted by the scan pipeline. Hardening
//! flags only ever move from `false` to `true`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use goblin::Object;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest identity string the datastore accepts.
pub const MAX_IDENTITY_LEN: usize = 255;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BUILD_ID_NOTE: &str = ".note.gnu.build-id";

/// Why a detector reached its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub address: u64,
    pub kind: EvidenceKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Marker,
    Symbol,
    BranchingNode,
    GuardBlock,
    Prologue,
    Epilogue,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Marker => "marker",
            EvidenceKind::Symbol => "symbol",
            EvidenceKind::BranchingNode => "branching_node",
            EvidenceKind::GuardBlock => "guard_block",
            EvidenceKind::Prologue => "prologue",
            EvidenceKind::Epilogue => "epilogue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "marker" => Some(EvidenceKind::Marker),
            "symbol" => Some(EvidenceKind::Symbol),
            "branching_node" => Some(EvidenceKind::BranchingNode),
            "guard_block" => Some(EvidenceKind::GuardBlock),
            "prologue" => Some(EvidenceKind::Prologue),
            "epilogue" => Some(EvidenceKind::Epilogue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryArtifact {
    pub id: String,
    pub name: String,
    pub subimage: String,
    pub container: String,
    pub path: PathBuf,
    pub timestamp: String,
    pub checksum: String,
    pub unsafe_language: bool,
    pub modified: bool,
    pub error: String,
    pub(crate) multi_cfi: bool,
    pub(crate) single_cfi: bool,
    pub(crate) scs: bool,
    #[serde(default)]
    pub evidence: Vec<EvidenceRecord>,
}

impl BinaryArtifact {
    /// Read `path` and compute checksum, timestamp and language heuristics.
    pub fn from_file(
        path: &Path,
        subimage: impl Into<String>,
        container: impl Into<String>,
    ) -> std::io::Result<Self> {
        let bytes = fs::read(path)?;
        let timestamp = file_timestamp(path)?;
        Ok(Self::from_bytes(path, &bytes, subimage, container, timestamp))
    }

    pub fn from_bytes(
        path: &Path,
        bytes: &[u8],
        subimage: impl Into<String>,
        container: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let subimage = subimage.into();
        let container = container.into();
        let checksum = sha256_hex(bytes);
        Self {
            id: artifact_identity(&subimage, &container, &checksum, &name),
            name,
            subimage,
            container,
            path: path.to_path_buf(),
            timestamp: timestamp.into(),
            checksum,
            unsafe_language: is_unsafe_language(bytes),
            modified: false,
            error: String::new(),
            multi_cfi: false,
            single_cfi: false,
            scs: false,
            evidence: Vec::new(),
        }
    }

    pub fn multi_cfi(&self) -> bool {
        self.multi_cfi
    }

    pub fn single_cfi(&self) -> bool {
        self.single_cfi
    }

    pub fn scs(&self) -> bool {
        self.scs
    }

    pub fn mark_multi_cfi(&mut self) {
        self.multi_cfi = true;
    }

    /// Record single-module CFI. `modified` can only be raised, never cleared.
    pub fn mark_single_cfi(&mut self, modified: bool) {
        self.single_cfi = true;
        self.modified |= modified;
    }

    pub fn mark_scs(&mut self) {
        self.scs = true;
    }

    /// Restore flags read back from the datastore.
    pub fn with_flags(mut self, multi_cfi: bool, single_cfi: bool, scs: bool) -> Self {
        self.multi_cfi |= multi_cfi;
        self.single_cfi |= single_cfi;
        self.scs |= scs;
        self
    }

    pub fn push_error(&mut self, message: impl AsRef<str>) {
        if !self.error.is_empty() {
            self.error.push_str("; ");
        }
        self.error.push_str(message.as_ref());
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn add_evidence(&mut self, address: u64, kind: EvidenceKind, description: impl Into<String>) {
        self.evidence.push(EvidenceRecord { address, kind, description: description.into() });
    }
}

/// `subimage/container/checksum/name`, keeping only the trailing
/// [`MAX_IDENTITY_LEN`] characters.
pub fn artifact_identity(subimage: &str, container: &str, checksum: &str, name: &str) -> String {
    truncate_identity(&format!("{subimage}/{container}/{checksum}/{name}"))
}

pub fn truncate_identity(id: &str) -> String {
    let count = id.chars().count();
    if count <= MAX_IDENTITY_LEN {
        return id.to_string();
    }
    id.chars().skip(count - MAX_IDENTITY_LEN).collect()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn file_timestamp(path: &Path) -> std::io::Result<String> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Local>::from(modified).format(TIMESTAMP_FORMAT).to_string())
}

/// Heuristic for C/C++ output: the `.comment` section names gcc or clang, or a
/// GNU build-id note is present.
pub fn is_unsafe_language(bytes: &[u8]) -> bool {
    if comment_mentions_c_toolchain(bytes) {
        return true;
    }
    let needle = BUILD_ID_NOTE.as_bytes();
    bytes.windows(needle.len()).any(|w| w == needle)
}

fn comment_mentions_c_toolchain(bytes: &[u8]) -> bool {
    let Ok(Object::Elf(elf)) = Object::parse(bytes) else {
        return false;
    };
    elf.section_headers.iter().any(|sh| {
        if elf.shdr_strtab.get_at(sh.sh_name) != Some(".comment") {
            return false;
        }
        let start = sh.sh_offset as usize;
        let end = start.saturating_add(sh.sh_size as usize).min(bytes.len());
        if start >= end {
            return false;
        }
        let text = String::from_utf8_lossy(&bytes[start..end]).to_ascii_lowercase();
        text.contains("gcc") || text.contains("clang")
    })
}
