use serde::{Deserialize, Serialize};

/// A subimage (one mounted filesystem of a system image).
///
/// Identity is `"{version}/{name}"`, which is also the subimage tag binaries
/// are recorded under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    /// Distribution or build the image belongs to (e.g. "Android 13").
    pub version: String,
    pub name: String,
    pub image_type: String,
}

impl ImageRecord {
    pub fn new(version: impl Into<String>, name: impl Into<String>) -> Self {
        let version = version.into();
        let name = name.into();
        Self { id: format!("{version}/{name}"), version, name, image_type: "filesystem".into() }
    }
}

/// A container file (package, APEX, archive) binaries were unpacked from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub subimage: String,
    pub name: String,
    pub container_type: String,
    pub path: String,
}

impl ContainerRecord {
    pub fn new(
        subimage: impl Into<String>,
        name: impl Into<String>,
        container_type: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let subimage = subimage.into();
        let name = name.into();
        Self {
            id: format!("{subimage}/{name}"),
            subimage,
            name,
            container_type: container_type.into(),
            path: path.into(),
        }
    }
}

/// Stored view of one analyzed binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryRecord {
    pub id: String,
    pub name: String,
    pub subimage: String,
    pub container: String,
    pub path: String,
    pub timestamp: String,
    pub checksum: String,
    pub unsafe_language: bool,
    pub modified: bool,
    pub error: String,
    pub multi_cfi: bool,
    pub single_cfi: bool,
    pub scs: bool,
}

/// Hardening counts under one subimage prefix.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardeningSummary {
    pub prefix: String,
    pub binaries_total: u64,
    pub binaries_unsafe: u64,
    /// The three counts below only include memory-unsafe binaries.
    pub single_cfi: u64,
    pub multi_cfi: u64,
    pub scs: u64,
}
