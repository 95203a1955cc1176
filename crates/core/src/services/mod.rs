//! Orchestration around the pure detectors: CFG providers, binary discovery
//! and whole-tree scans.

pub mod analysis;
pub mod backends;
pub mod discovery;
pub mod scan;
