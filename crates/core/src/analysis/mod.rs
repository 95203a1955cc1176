//! Hardening detectors and the policy that sequences them.
//!
//! Detectors borrow the image and CFG immutably and report only through the
//! `&mut BinaryArtifact` they are handed.

pub mod dataflow;
pub mod multi_module;
pub mod policy;
pub mod shadow_stack;
pub mod single_module;

pub use dataflow::{trace_back, RegisterWatchList};
pub use multi_module::MultiModuleSignals;
pub use policy::{decide, run_detectors, Decision, DecisionInput, DetectionMode, DetectionOutcome};
pub use single_module::{GuardDependency, SingleModuleMatch};
