//! Cross-DSO (multi-module) CFI detection from symbols and raw byte markers.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::model::{BinaryArtifact, BinaryImage, EvidenceKind};

pub const CROSS_DSO_MARKER: &str = "__cfi";
pub const CHECK_FAIL_MARKER: &str = "cfi-check-fail";
pub const CFI_CHECK_SYMBOL: &str = "__cfi_check";
pub const CFI_SLOWPATH_SYMBOL: &str = "__cfi_slowpath";

/// Every signal the verdict is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiModuleSignals {
    /// Raw bytes mention `__cfi`.
    pub marker: bool,
    /// `__cfi_check` resolves and is defined by this very file.
    pub self_check: bool,
    pub check_symbol: bool,
    pub slowpath_symbol: bool,
    /// Raw bytes mention `cfi-check-fail`.
    pub check_fail_marker: bool,
}

impl MultiModuleSignals {
    pub fn collect(image: &BinaryImage) -> Self {
        let file_name = image.file_name();
        let check = image.find_symbol(CFI_CHECK_SYMBOL);
        Self {
            marker: image.raw_bytes_contains(CROSS_DSO_MARKER),
            self_check: check.is_some_and(|s| s.descriptor().contains(&file_name)),
            check_symbol: check.is_some(),
            slowpath_symbol: image.find_symbol(CFI_SLOWPATH_SYMBOL).is_some(),
            check_fail_marker: image.raw_bytes_contains(CHECK_FAIL_MARKER),
        }
    }

    pub fn verdict(&self) -> bool {
        let both_symbols = self.check_symbol && self.slowpath_symbol;
        let no_symbols = !self.check_symbol && !self.slowpath_symbol;
        (self.marker && self.self_check)
            || (self.marker && both_symbols)
            || (self.slowpath_symbol && self.self_check)
            || (self.check_fail_marker && no_symbols)
    }
}

/// Sets `multi_cfi` on the artifact when the binary participates in cross-DSO CFI.
pub fn detect(image: &BinaryImage, artifact: &mut BinaryArtifact) -> bool {
    let signals = MultiModuleSignals::collect(image);
    debug!("{}: multi-module signals {:?}", artifact.name, signals);
    if !signals.verdict() {
        return false;
    }
    for name in [CFI_CHECK_SYMBOL, CFI_SLOWPATH_SYMBOL] {
        if let Some(sym) = image.find_symbol(name) {
            artifact.add_evidence(sym.address, EvidenceKind::Symbol, sym.descriptor());
        }
    }
    if signals.check_fail_marker && !signals.check_symbol {
        artifact.add_evidence(0, EvidenceKind::Marker, format!("bytes contain {CHECK_FAIL_MARKER:?}"));
    }
    artifact.mark_multi_cfi();
    true
}
