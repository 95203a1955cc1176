//! Results database integration and project layout definitions.
//!
//! The SQLite database stores:
//! - Subimages and the container files binaries were unpacked from
//! - One row per analyzed binary with its hardening flags and error text
//! - Evidence records explaining each positive verdict
//!
//! Configuration lives next to it in `.cfi/project.json`.

pub mod config;
pub mod context;
pub mod layout;
pub mod models;
pub mod project_db;
pub mod util;

pub use config::{AnalysisConfig, DbConfig, ProjectConfig, DEFAULT_CFG_TIMEOUT_SECS};
pub use context::ProjectContext;
pub use layout::ProjectLayout;
pub use models::{BinaryRecord, ContainerRecord, HardeningSummary, ImageRecord};
pub use project_db::{DbError, DbResult, ProjectDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_project_config, open_project_db, write_project_config};
