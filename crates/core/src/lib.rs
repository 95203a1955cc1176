//! cfi-audit-core
//!
//! Detects compiler-enforced control-flow hardening in binaries extracted from
//! system images: cross-DSO (multi-module) CFI, single-module forward-edge CFI
//! and the AArch64 shadow call stack.
//!
//! The crate holds the typed model, the detectors, the results database and the
//! CFG provider adapters, so every frontend (currently the CLI) stays thin.

pub mod analysis;
pub mod db;
pub mod model;
pub mod services;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
