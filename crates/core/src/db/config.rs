use serde::{Deserialize, Serialize};

/// Default CFG construction budget per binary, in seconds.
pub const DEFAULT_CFG_TIMEOUT_SECS: u64 = 900;

/// Database location stored in the project config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the results database (typically relative to project root).
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Analysis defaults; CLI flags override these per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Wall-clock budget for building one CFG. `0` disables the watchdog.
    #[serde(default = "default_cfg_timeout")]
    pub cfg_timeout_secs: u64,
    /// Worker threads for scans; `None` lets rayon pick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
    /// CFG provider to use when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { cfg_timeout_secs: DEFAULT_CFG_TIMEOUT_SECS, jobs: None, backend: None }
    }
}

fn default_cfg_timeout() -> u64 {
    DEFAULT_CFG_TIMEOUT_SECS
}

/// Serializable project configuration, stored at `.cfi/project.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub description: Option<String>,
    /// Version of the config format itself.
    pub config_version: String,
    pub db: DbConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: "0.1.0".to_string(),
            db: DbConfig::new(db_path),
            analysis: AnalysisConfig::default(),
        }
    }
}
