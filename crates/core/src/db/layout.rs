use std::path::{Path, PathBuf};

/// Logical layout of an audit project on disk.
///
/// Derived from a root path; performs no IO. Frontends create the directories.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub root: PathBuf,
    /// Internal metadata directory (`.cfi`).
    pub meta_dir: PathBuf,
    pub project_config_path: PathBuf,
    pub db_path: PathBuf,
    /// Exported scan and summary reports.
    pub reports_dir: PathBuf,
    /// Evidence dumps, one file per binary.
    pub evidence_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".cfi");
        let reports_dir = root.join("reports");
        Self {
            project_config_path: meta_dir.join("project.json"),
            db_path: meta_dir.join("results.db"),
            evidence_dir: reports_dir.join("evidence"),
            reports_dir,
            meta_dir,
            root,
        }
    }

    /// Database path relative to `root` when possible, for storing in the config.
    pub fn db_path_relative_string(&self) -> String {
        match self.db_path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => self.db_path.to_string_lossy().to_string(),
        }
    }

    /// Evidence dump location for one binary, keyed by its checksum.
    pub fn evidence_path(&self, checksum: &str, name: &str) -> PathBuf {
        let short = checksum.get(..12).unwrap_or(checksum);
        self.evidence_dir.join(format!("{name}-{short}.txt"))
    }
}
